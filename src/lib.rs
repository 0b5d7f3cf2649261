//! An ahead-of-time compiler for a curated subset of C17, lowering a single
//! translation unit to GNU AT&T x86-64 assembly text.
//!
//! The pipeline is eight passes, each its own module: [`lexer`] tokenizes,
//! [`parser`] builds an [`ast::Program`], [`resolver`] performs identifier
//! resolution and loop/switch/goto labeling, [`typechecker`] elaborates
//! types and implicit conversions, [`tac::builder`] lowers to three-address
//! code, [`codegen`] selects and legalizes abstract x86-64, and [`emit`]
//! prints it. [`compile`] wires all eight together.

pub mod asm;
pub mod ast;
pub mod codegen;
pub mod config;
pub mod context;
pub mod emit;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod symbol;
pub mod tac;
pub mod token;
pub mod typechecker;
pub mod types;

pub use config::{CompileOptions, Target};
pub use context::CompileContext;
pub use error::CompileError;

/// Runs the full pipeline over a single translation unit and returns the
/// AT&T-syntax assembly text for it.
///
/// Each stage raises its own error type; the first failure short-circuits
/// the rest and is wrapped into [`CompileError`] via `?`.
pub fn compile(source: &str, options: &CompileOptions) -> Result<String, CompileError> {
    let ctx = CompileContext::new();

    let tokens = lexer::tokenize(source)?;
    let mut program = parser::parse(tokens)?;
    resolver::resolve(&mut program, &ctx)?;
    let symbols = typechecker::typecheck(&mut program)?;
    let tac_program = tac::builder::build(&program, &symbols, &ctx)?;
    let asm_program = codegen::compile_program(&tac_program)?;
    Ok(emit::emit(&asm_program, options)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_minimal_program_to_assembly_text() {
        let asm = compile("int main(void) { return 2 + 3 * 4; }", &CompileOptions::default())
            .expect("compile");
        assert!(asm.contains("main:"));
        assert!(asm.contains("ret"));
    }

    #[test]
    fn lexer_errors_surface_through_compile_error() {
        let err = compile("int main(void) { return 1 @ 2; }", &CompileOptions::default())
            .expect_err("expected a lex error");
        assert!(matches!(err, CompileError::Lexer(_)));
    }

    #[test]
    fn type_errors_surface_through_compile_error() {
        let err = compile(
            "int main(void) { int *p = 0; return p + p; }",
            &CompileOptions::default(),
        )
        .expect_err("expected a type error");
        assert!(matches!(err, CompileError::Type(_)));
    }
}
