//! AT&T-syntax assembly emitter (spec.md §4.J).
//!
//! Walks a legalized [`crate::asm::Program`] and writes GNU assembler text
//! into a `String`, the same `writeln!`-into-a-buffer style the teacher's
//! LLVM-IR printer used. The only target-specific knobs are global symbol
//! prefixing and section directives (spec.md §6), both read off
//! [`crate::config::Target`].

use std::fmt::Write as _;

use crate::asm::{
    BinaryOp, ConditionCode, DoubleBinaryOp, FunctionDefinition, Instruction, Operand, Program,
    Register, StaticVariable, TopLevel, UnaryOp, Width,
};
use crate::config::{CompileOptions, Target};
use crate::error::CodeGenError;
use crate::types::ConstantValue;

/// Renders a legalized program as AT&T-syntax assembly text.
pub fn emit(program: &Program, options: &CompileOptions) -> Result<String, CodeGenError> {
    let mut out = String::new();
    let emitter = Emitter { target: options.target };
    for item in &program.items {
        match item {
            TopLevel::Function(def) => emitter.function(&mut out, def)?,
            TopLevel::StaticVariable(sv) => emitter.static_variable(&mut out, sv)?,
        }
    }
    if options.target == Target::Elf {
        writeln!(out, ".section .note.GNU-stack,\"\",@progbits")?;
    }
    Ok(out)
}

struct Emitter {
    target: Target,
}

impl Emitter {
    /// Mach-O requires a leading underscore on every external symbol; ELF
    /// uses the bare name.
    fn symbol(&self, name: &str) -> String {
        match self.target {
            Target::Elf => name.to_string(),
            Target::MachO => format!("_{name}"),
        }
    }

    fn local_label(&self, name: &str) -> String {
        format!(".L{name}")
    }

    fn function(&self, out: &mut String, def: &FunctionDefinition) -> Result<(), CodeGenError> {
        let name = self.symbol(&def.name);
        if def.global {
            writeln!(out, "    .globl {name}")?;
        }
        match self.target {
            Target::Elf => writeln!(out, "    .text")?,
            Target::MachO => writeln!(out, "    .section __TEXT,__text")?,
        }
        writeln!(out, "{name}:")?;
        writeln!(out, "    pushq   %rbp")?;
        writeln!(out, "    movq    %rsp, %rbp")?;
        if def.stack_size > 0 {
            writeln!(out, "    subq    ${}, %rsp", def.stack_size)?;
        }
        for inst in &def.body {
            self.instruction(out, inst)?;
        }
        Ok(())
    }

    fn static_variable(&self, out: &mut String, sv: &StaticVariable) -> Result<(), CodeGenError> {
        let name = self.symbol(&sv.name);
        let all_zero = sv.init.iter().all(ConstantValue::is_zero)
            || matches!(sv.init.as_slice(), [ConstantValue::ZeroBytes(_)]);
        if sv.global {
            writeln!(out, "    .globl {name}")?;
        }
        if all_zero {
            let size: usize = sv.init.iter().map(ConstantValue::size).sum();
            match self.target {
                Target::Elf => writeln!(out, "    .bss")?,
                Target::MachO => writeln!(out, "    .section __DATA,__bss")?,
            }
            writeln!(out, "    .align {}", sv.alignment)?;
            writeln!(out, "{name}:")?;
            writeln!(out, "    .zero {size}")?;
            return Ok(());
        }
        match self.target {
            Target::Elf => writeln!(out, "    .data")?,
            Target::MachO => writeln!(out, "    .section __DATA,__data")?,
        }
        writeln!(out, "    .align {}", sv.alignment)?;
        writeln!(out, "{name}:")?;
        for constant in &sv.init {
            self.constant(out, constant)?;
        }
        Ok(())
    }

    fn constant(&self, out: &mut String, constant: &ConstantValue) -> Result<(), CodeGenError> {
        match constant {
            ConstantValue::I8(v) => writeln!(out, "    .byte {v}")?,
            ConstantValue::U8(v) => writeln!(out, "    .byte {v}")?,
            ConstantValue::I32(v) => writeln!(out, "    .long {v}")?,
            ConstantValue::U32(v) => writeln!(out, "    .long {v}")?,
            ConstantValue::I64(v) => writeln!(out, "    .quad {v}")?,
            ConstantValue::U64(v) => writeln!(out, "    .quad {v}")?,
            ConstantValue::F64(v) => writeln!(out, "    .quad {}", v.to_bits())?,
            ConstantValue::ZeroBytes(n) => writeln!(out, "    .zero {n}")?,
            ConstantValue::StringInit { text, null_terminated } => {
                if *null_terminated {
                    writeln!(out, "    .asciz \"{}\"", escape(text))?;
                } else {
                    writeln!(out, "    .ascii \"{}\"", escape(text))?;
                }
            }
            ConstantValue::PointerInit { name } => {
                writeln!(out, "    .quad {}", self.symbol(name))?;
            }
        }
        Ok(())
    }

    fn instruction(&self, out: &mut String, inst: &Instruction) -> Result<(), CodeGenError> {
        match inst {
            Instruction::Mov { width, src, dst } => {
                writeln!(
                    out,
                    "    mov{}   {}, {}",
                    width.suffix(),
                    self.operand(*width, src),
                    self.operand(*width, dst)
                )?;
            }
            Instruction::Movsx { src, dst } => {
                writeln!(
                    out,
                    "    movslq  {}, {}",
                    self.operand(Width::Longword, src),
                    self.operand(Width::Quadword, dst)
                )?;
            }
            Instruction::MovZeroExtend { src, dst } => {
                writeln!(
                    out,
                    "    movl    {}, {}",
                    self.operand(Width::Longword, src),
                    self.operand(Width::Longword, dst)
                )?;
            }
            Instruction::Cvttsd2si { width, src, dst } => {
                writeln!(
                    out,
                    "    cvttsd2si {}, {}",
                    self.operand(Width::Double, src),
                    self.operand(*width, dst)
                )?;
            }
            Instruction::Cvtsi2sd { width, src, dst } => {
                writeln!(
                    out,
                    "    cvtsi2sd {}, {}",
                    self.operand(*width, src),
                    self.operand(Width::Double, dst)
                )?;
            }
            Instruction::Unary { op, width, operand } => {
                writeln!(
                    out,
                    "    {}{}   {}",
                    unary_mnemonic(*op),
                    width.suffix(),
                    self.operand(*width, operand)
                )?;
            }
            Instruction::Binary { op, width, src, dst } => {
                writeln!(
                    out,
                    "    {}{}   {}, {}",
                    binary_mnemonic(*op),
                    width.suffix(),
                    self.operand(*width, src),
                    self.operand(*width, dst)
                )?;
            }
            Instruction::DoubleBinary { op, src, dst } => {
                writeln!(
                    out,
                    "    {}  {}, {}",
                    double_binary_mnemonic(*op),
                    self.operand(Width::Double, src),
                    self.operand(Width::Double, dst)
                )?;
            }
            Instruction::Cmp { width, lhs, rhs } => {
                // `Cmp{lhs, rhs}` sets flags as if computing `lhs - rhs`;
                // AT&T's `cmp src, dst` computes `dst - src`, so operands
                // are printed in reverse.
                writeln!(
                    out,
                    "    cmp{}   {}, {}",
                    width.suffix(),
                    self.operand(*width, rhs),
                    self.operand(*width, lhs)
                )?;
            }
            Instruction::Comisd { lhs, rhs } => {
                writeln!(
                    out,
                    "    ucomisd {}, {}",
                    self.operand(Width::Double, rhs),
                    self.operand(Width::Double, lhs)
                )?;
            }
            Instruction::Idiv { width, operand } => {
                writeln!(out, "    idiv{}  {}", width.suffix(), self.operand(*width, operand))?;
            }
            Instruction::Div { width, operand } => {
                writeln!(out, "    div{}   {}", width.suffix(), self.operand(*width, operand))?;
            }
            Instruction::Cdq => writeln!(out, "    cdq")?,
            Instruction::Cqo => writeln!(out, "    cqo")?,
            Instruction::Jmp(target) => writeln!(out, "    jmp     {}", self.local_label(target))?,
            Instruction::JmpCC { cc, target } => {
                writeln!(out, "    j{}     {}", cc.suffix(), self.local_label(target))?;
            }
            Instruction::SetCC { cc, dst } => {
                writeln!(out, "    set{}   {}", cc.suffix(), self.operand(Width::Longword, dst))?;
            }
            Instruction::Label(name) => writeln!(out, "{}:", self.local_label(name))?,
            Instruction::Push(operand) => {
                writeln!(out, "    pushq   {}", self.operand(Width::Quadword, operand))?;
            }
            Instruction::PushXmm(operand) => {
                writeln!(out, "    subq    $8, %rsp")?;
                writeln!(
                    out,
                    "    movsd   {}, (%rsp)",
                    self.operand(Width::Double, operand)
                )?;
            }
            Instruction::Call(name) => writeln!(out, "    call    {}", self.symbol(name))?,
            Instruction::Ret => {
                writeln!(out, "    movq    %rbp, %rsp")?;
                writeln!(out, "    popq    %rbp")?;
                writeln!(out, "    ret")?;
            }
            Instruction::Comment(text) => writeln!(out, "    # {text}")?,
            Instruction::Lea { src, dst } => {
                writeln!(
                    out,
                    "    leaq    {}, {}",
                    self.operand(Width::Quadword, src),
                    self.operand(Width::Quadword, dst)
                )?;
            }
        }
        Ok(())
    }

    fn operand(&self, width: Width, operand: &Operand) -> String {
        match operand {
            Operand::Reg(r) => format!("%{}", register_name(*r, width)),
            Operand::Imm(v) => format!("${v}"),
            Operand::Pseudo(name) => format!("%%UNRESOLVED_PSEUDO({name})"),
            Operand::Stack(offset) => format!("{offset}(%rbp)"),
            Operand::Data(name) => format!("{}(%rip)", self.symbol(name)),
        }
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'"' => escaped.push_str("\\\""),
            b'\\' => escaped.push_str("\\\\"),
            b'\n' => escaped.push_str("\\n"),
            b'\t' => escaped.push_str("\\t"),
            0x20..=0x7e => escaped.push(byte as char),
            _ => escaped.push_str(&format!("\\{byte:03o}")),
        }
    }
    escaped
}

fn unary_mnemonic(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "neg",
        UnaryOp::Not => "not",
    }
}

fn binary_mnemonic(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "imul",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
        BinaryOp::Xor => "xor",
        BinaryOp::ShiftLeft => "shl",
        BinaryOp::ShiftRightArithmetic => "sar",
        BinaryOp::ShiftRightLogical => "shr",
    }
}

fn double_binary_mnemonic(op: DoubleBinaryOp) -> &'static str {
    match op {
        DoubleBinaryOp::Add => "addsd",
        DoubleBinaryOp::Sub => "subsd",
        DoubleBinaryOp::Mul => "mulsd",
        DoubleBinaryOp::Div => "divsd",
    }
}

fn register_name(register: Register, width: Width) -> &'static str {
    use Register::*;
    match register {
        Ax => match width {
            Width::Longword => "eax",
            Width::Quadword | Width::Double => "rax",
        },
        Cx => match width {
            Width::Longword => "ecx",
            Width::Quadword | Width::Double => "rcx",
        },
        Dx => match width {
            Width::Longword => "edx",
            Width::Quadword | Width::Double => "rdx",
        },
        Di => match width {
            Width::Longword => "edi",
            Width::Quadword | Width::Double => "rdi",
        },
        Si => match width {
            Width::Longword => "esi",
            Width::Quadword | Width::Double => "rsi",
        },
        R8 => match width {
            Width::Longword => "r8d",
            Width::Quadword | Width::Double => "r8",
        },
        R9 => match width {
            Width::Longword => "r9d",
            Width::Quadword | Width::Double => "r9",
        },
        R10 => match width {
            Width::Longword => "r10d",
            Width::Quadword | Width::Double => "r10",
        },
        R11 => match width {
            Width::Longword => "r11d",
            Width::Quadword | Width::Double => "r11",
        },
        Sp => "rsp",
        Bp => "rbp",
        Xmm0 => "xmm0",
        Xmm1 => "xmm1",
        Xmm2 => "xmm2",
        Xmm3 => "xmm3",
        Xmm4 => "xmm4",
        Xmm5 => "xmm5",
        Xmm6 => "xmm6",
        Xmm7 => "xmm7",
        Xmm14 => "xmm14",
        Xmm15 => "xmm15",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompileContext;

    fn emit_source(source: &str, options: &CompileOptions) -> String {
        let tokens = crate::lexer::tokenize(source).expect("lex");
        let mut ast_program = crate::parser::parse(tokens).expect("parse");
        let ctx = CompileContext::new();
        crate::resolver::resolve(&mut ast_program, &ctx).expect("resolve");
        let symbols = crate::typechecker::typecheck(&mut ast_program).expect("typecheck");
        let tac_program =
            crate::tac::builder::build(&ast_program, &symbols, &ctx).expect("build tac");
        let asm_program = crate::codegen::compile_program(&tac_program).expect("codegen");
        emit(&asm_program, options).expect("emit")
    }

    #[test]
    fn function_gets_globl_directive_and_frame() {
        let asm = emit_source("int main(void) { return 2 + 3 * 4; }", &CompileOptions::default());
        assert!(asm.contains(".globl main"));
        assert!(asm.contains("main:"));
        assert!(asm.contains("pushq   %rbp"));
        assert!(asm.contains("popq    %rbp"));
        assert!(asm.contains("ret"));
    }

    #[test]
    fn mach_o_target_prefixes_symbols_with_underscore() {
        let options = CompileOptions::new().with_target(Target::MachO);
        let asm = emit_source("int main(void) { return 0; }", &options);
        assert!(asm.contains(".globl _main"));
        assert!(asm.contains("_main:"));
        assert!(!asm.contains(".note.GNU-stack"));
    }

    #[test]
    fn elf_target_emits_gnu_stack_note() {
        let asm = emit_source("int main(void) { return 0; }", &CompileOptions::default());
        assert!(asm.contains(".section .note.GNU-stack"));
    }

    #[test]
    fn static_variable_with_zero_initializer_goes_to_bss() {
        let asm = emit_source(
            "int counter; int main(void) { return counter; }",
            &CompileOptions::default(),
        );
        assert!(asm.contains(".bss"));
        assert!(asm.contains("counter:"));
        assert!(asm.contains(".zero 4"));
    }

    #[test]
    fn cmp_reverses_operand_order_for_att_syntax() {
        let asm = emit_source(
            "int main(void) { int a = 1; int b = 2; if (a < b) return 1; return 0; }",
            &CompileOptions::default(),
        );
        assert!(asm.contains("cmpl"));
        assert!(asm.contains("jl") || asm.contains("jge"));
    }
}
