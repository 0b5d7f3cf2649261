//! x86-64 code generation: TAC → abstract assembly → legalized assembly.
//!
//! # Module structure
//!
//! - `select.rs`: §4.H code selector (TAC → abstract x86-64, `Pseudo`
//!   operands for every local/temporary).
//! - `legalize.rs`: §4.I legalization (stack-slot assignment, then the
//!   fixed table of illegal-operand-form rewrites).
//! - `runtime.rs`: System V AMD64 calling-convention constants shared by
//!   both passes.

mod legalize;
mod runtime;
mod select;

use crate::error::CodeGenError;
use crate::symbol::{AsmEntry, AsmSymbolTable};
use crate::tac;

/// Runs code selection followed by legalization over a TAC program,
/// producing the abstract x86-64 assembly the emitter prints.
pub fn compile_program(program: &tac::Program) -> Result<crate::asm::Program, CodeGenError> {
    let asm_symbols = asm_symbol_table(program);
    let selected = select::select(program, &asm_symbols)?;
    legalize::legalize(selected, &program.var_types)
}

fn asm_symbol_table(program: &tac::Program) -> AsmSymbolTable {
    let mut table = AsmSymbolTable::new();
    for item in &program.items {
        match item {
            tac::TopLevel::Function(def) => {
                table.insert(&def.name, AsmEntry::Function { defined: true });
            }
            tac::TopLevel::StaticVariable(sv) => {
                table.insert(&sv.name, AsmEntry::Object { is_static: true });
            }
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompileContext;

    fn compile_source(source: &str) -> crate::asm::Program {
        let tokens = crate::lexer::tokenize(source).expect("lex");
        let mut ast_program = crate::parser::parse(tokens).expect("parse");
        let ctx = CompileContext::new();
        crate::resolver::resolve(&mut ast_program, &ctx).expect("resolve");
        let symbols = crate::typechecker::typecheck(&mut ast_program).expect("typecheck");
        let tac_program = tac::builder::build(&ast_program, &symbols, &ctx).expect("build tac");
        compile_program(&tac_program).expect("compile")
    }

    #[test]
    fn every_pseudo_is_resolved_to_a_stack_slot() {
        let program = compile_source("int main(void) { int a = 1; int b = 2; return a + b; }");
        let crate::asm::TopLevel::Function(main) = &program.items[0] else {
            panic!("expected function");
        };
        let has_pseudo = main
            .body
            .iter()
            .any(|inst| format!("{inst:?}").contains("Pseudo"));
        assert!(!has_pseudo);
        assert!(main.stack_size > 0);
        assert_eq!(main.stack_size % 16, 0);
    }

    #[test]
    fn static_global_becomes_a_data_operand_reference() {
        let program = compile_source("int counter; int main(void) { counter = 5; return counter; }");
        let has_static = program
            .items
            .iter()
            .any(|item| matches!(item, crate::asm::TopLevel::StaticVariable(sv) if sv.name == "counter"));
        assert!(has_static);
    }
}
