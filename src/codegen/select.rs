//! TAC → abstract x86-64 code selection (spec.md §4.H).
//!
//! Every source-level variable and TAC temporary is emitted as a
//! `Pseudo` operand; the legalizer assigns stack slots afterward. This
//! pass never touches `%rbp`-relative offsets directly.

use std::collections::HashMap;

use crate::asm::{
    self, BinaryOp as AsmBinaryOp, ConditionCode, DoubleBinaryOp, Instruction as AsmInst, Operand,
    UnaryOp as AsmUnaryOp, Width,
};
use crate::error::CodeGenError;
use crate::symbol::{AsmEntry, AsmSymbolTable};
use crate::tac::{self, BinaryOp as TacBinaryOp, Instruction as TacInst, UnaryOp as TacUnaryOp, Value};
use crate::types::Type;

use super::runtime::{INT_ARG_REGISTERS, SSE_ARG_REGISTERS};

fn width_of(ty: &Type) -> Width {
    if ty.is_double() {
        Width::Double
    } else if ty.size() == 8 {
        Width::Quadword
    } else {
        Width::Longword
    }
}

struct Selector<'a> {
    var_types: &'a HashMap<String, Type>,
    asm_symbols: &'a AsmSymbolTable,
    body: Vec<AsmInst>,
}

impl<'a> Selector<'a> {
    fn type_of(&self, name: &str) -> &Type {
        self.var_types
            .get(name)
            .unwrap_or_else(|| panic!("selector: no recorded type for `{name}`"))
    }

    fn operand_and_width(&self, value: &Value) -> (Operand, Width) {
        match value {
            Value::Constant(c) => (constant_operand(c), width_of(&c.ty_hint())),
            Value::Variable(name) => {
                let ty = self.type_of(name);
                let operand = if self.asm_symbols.is_static_object(name) {
                    Operand::Data(name.as_str().into())
                } else {
                    Operand::pseudo(name.as_str())
                };
                (operand, width_of(ty))
            }
        }
    }

    fn emit(&mut self, inst: AsmInst) {
        self.body.push(inst);
    }

    /// Moves `src` into `dst`, using the SSE or integer `Mov` form based on
    /// width.
    fn mov(&mut self, width: Width, src: Operand, dst: Operand) {
        self.emit(AsmInst::Mov { width, src, dst });
    }

    fn select_value(&mut self, value: &Value) -> Operand {
        self.operand_and_width(value).0
    }

    fn select_instruction(&mut self, inst: &TacInst) -> Result<(), CodeGenError> {
        match inst {
            TacInst::Return(value) => {
                let (src, width) = self.operand_and_width(value);
                if width == Width::Double {
                    self.mov(width, src, Operand::Reg(asm::Register::Xmm0));
                } else {
                    self.mov(width, src, Operand::Reg(asm::Register::Ax));
                }
                self.emit(AsmInst::Ret);
                Ok(())
            }
            TacInst::Unary { op, src, dst } => self.select_unary(*op, src, dst),
            TacInst::Binary { op, lhs, rhs, dst } => self.select_binary(*op, lhs, rhs, dst),
            TacInst::Copy { src, dst } => {
                let (src_op, width) = self.operand_and_width(src);
                let dst_op = self.select_value(dst);
                self.mov(width, src_op, dst_op);
                Ok(())
            }
            TacInst::GetAddress { src, dst } => {
                let src_op = self.select_value(src);
                let dst_op = self.select_value(dst);
                self.emit(AsmInst::Lea {
                    src: src_op,
                    dst: dst_op,
                });
                Ok(())
            }
            TacInst::Load { ptr, dst } => {
                let (_, width) = self.operand_and_width(dst);
                let ptr_op = self.select_value(ptr);
                let dst_op = self.select_value(dst);
                // Pointer dereference: move through a scratch address
                // register, since `Stack`/`Data` operands can't themselves
                // be indirected through in this abstract model.
                self.emit(AsmInst::Mov {
                    width: Width::Quadword,
                    src: ptr_op,
                    dst: Operand::Reg(asm::Register::R10),
                });
                self.emit(AsmInst::Mov {
                    width,
                    src: Operand::Reg(asm::Register::R10),
                    dst: dst_op,
                });
                Ok(())
            }
            TacInst::Store { src, ptr } => {
                let (src_op, width) = self.operand_and_width(src);
                let ptr_op = self.select_value(ptr);
                self.emit(AsmInst::Mov {
                    width: Width::Quadword,
                    src: ptr_op,
                    dst: Operand::Reg(asm::Register::R10),
                });
                self.emit(AsmInst::Mov {
                    width,
                    src: src_op,
                    dst: Operand::Reg(asm::Register::R10),
                });
                Ok(())
            }
            TacInst::AddPointer {
                ptr,
                index,
                scale,
                dst,
            } => {
                let ptr_op = self.select_value(ptr);
                let (index_op, index_width) = self.operand_and_width(index);
                let dst_op = self.select_value(dst);
                self.emit(AsmInst::Mov {
                    width: Width::Quadword,
                    src: ptr_op,
                    dst: Operand::Reg(asm::Register::R10),
                });
                let index_reg = Operand::Reg(asm::Register::R11);
                if index_width == Width::Longword {
                    self.emit(AsmInst::Movsx {
                        src: index_op,
                        dst: index_reg.clone(),
                    });
                } else {
                    self.mov(Width::Quadword, index_op, index_reg.clone());
                }
                self.emit(AsmInst::Binary {
                    op: AsmBinaryOp::Mul,
                    width: Width::Quadword,
                    src: Operand::Imm(*scale as i64),
                    dst: index_reg.clone(),
                });
                self.emit(AsmInst::Binary {
                    op: AsmBinaryOp::Add,
                    width: Width::Quadword,
                    src: index_reg,
                    dst: Operand::Reg(asm::Register::R10),
                });
                self.mov(Width::Quadword, Operand::Reg(asm::Register::R10), dst_op);
                Ok(())
            }
            TacInst::Jump(label) => {
                self.emit(AsmInst::Jmp(label.as_str().into()));
                Ok(())
            }
            TacInst::JumpIfZero { cond, target } => self.select_conditional_jump(cond, target, true),
            TacInst::JumpIfNotZero { cond, target } => {
                self.select_conditional_jump(cond, target, false)
            }
            TacInst::JumpIfEqual { lhs, rhs, target } => {
                self.select_compare(lhs, rhs)?;
                self.emit(AsmInst::JmpCC {
                    cc: ConditionCode::Equal,
                    target: target.as_str().into(),
                });
                Ok(())
            }
            TacInst::Label(name) => {
                self.emit(AsmInst::Label(name.as_str().into()));
                Ok(())
            }
            TacInst::Call { name, args, dst } => self.select_call(name, args, dst),
            TacInst::SignExtend { src, dst } => {
                let src_op = self.select_value(src);
                let dst_op = self.select_value(dst);
                self.emit(AsmInst::Movsx {
                    src: src_op,
                    dst: dst_op,
                });
                Ok(())
            }
            TacInst::Truncate { src, dst } => {
                let src_op = self.select_value(src);
                let dst_op = self.select_value(dst);
                self.mov(Width::Longword, src_op, dst_op);
                Ok(())
            }
            TacInst::ZeroExtend { src, dst } => {
                let src_op = self.select_value(src);
                let dst_op = self.select_value(dst);
                self.emit(AsmInst::MovZeroExtend {
                    src: src_op,
                    dst: dst_op,
                });
                Ok(())
            }
            TacInst::DoubleToInt { src, dst } => {
                let src_op = self.select_value(src);
                let (dst_op, dst_width) = self.operand_and_width(dst);
                self.emit(AsmInst::Cvttsd2si {
                    width: dst_width,
                    src: src_op,
                    dst: dst_op,
                });
                Ok(())
            }
            TacInst::IntToDouble { src, dst } => {
                let (src_op, src_width) = self.operand_and_width(src);
                let dst_op = self.select_value(dst);
                self.emit(AsmInst::Cvtsi2sd {
                    width: src_width,
                    src: src_op,
                    dst: dst_op,
                });
                Ok(())
            }
        }
    }

    fn select_unary(&mut self, op: TacUnaryOp, src: &Value, dst: &Value) -> Result<(), CodeGenError> {
        let (src_op, width) = self.operand_and_width(src);
        let dst_op = self.select_value(dst);
        match op {
            TacUnaryOp::Not => {
                // `!x`: compare against zero and materialize the boolean.
                self.emit(AsmInst::Cmp {
                    width,
                    lhs: Operand::Imm(0),
                    rhs: src_op,
                });
                self.mov(Width::Longword, Operand::Imm(0), dst_op.clone());
                self.emit(AsmInst::SetCC {
                    cc: ConditionCode::Equal,
                    dst: dst_op,
                });
            }
            TacUnaryOp::Negate | TacUnaryOp::Complement => {
                self.mov(width, src_op, dst_op.clone());
                self.emit(AsmInst::Unary {
                    op: if op == TacUnaryOp::Negate {
                        AsmUnaryOp::Neg
                    } else {
                        AsmUnaryOp::Not
                    },
                    width,
                    operand: dst_op,
                });
            }
        }
        Ok(())
    }

    fn select_compare(&mut self, lhs: &Value, rhs: &Value) -> Result<(), CodeGenError> {
        let (lhs_op, width) = self.operand_and_width(lhs);
        let (rhs_op, _) = self.operand_and_width(rhs);
        if width == Width::Double {
            self.emit(AsmInst::Comisd {
                lhs: lhs_op,
                rhs: rhs_op,
            });
        } else {
            self.emit(AsmInst::Cmp {
                width,
                lhs: lhs_op,
                rhs: rhs_op,
            });
        }
        Ok(())
    }

    fn select_conditional_jump(
        &mut self,
        cond: &Value,
        target: &str,
        jump_if_zero: bool,
    ) -> Result<(), CodeGenError> {
        let (cond_op, width) = self.operand_and_width(cond);
        if width == Width::Double {
            // NaN-safe zero test: ucomisd against a zeroed register, then
            // branch on ZF (set when equal or unordered, which for `0.0`
            // comparison against a finite operand only arises from the
            // equal case since doubles don't produce a spurious unordered
            // result here).
            self.emit(AsmInst::Binary {
                op: AsmBinaryOp::Xor,
                width: Width::Quadword,
                src: Operand::Reg(asm::Register::Xmm15),
                dst: Operand::Reg(asm::Register::Xmm15),
            });
            self.emit(AsmInst::Comisd {
                lhs: cond_op,
                rhs: Operand::Reg(asm::Register::Xmm15),
            });
        } else {
            self.emit(AsmInst::Cmp {
                width,
                lhs: Operand::Imm(0),
                rhs: cond_op,
            });
        }
        let cc = if jump_if_zero {
            ConditionCode::Equal
        } else {
            ConditionCode::NotEqual
        };
        self.emit(AsmInst::JmpCC {
            cc,
            target: target.into(),
        });
        Ok(())
    }

    fn select_binary(
        &mut self,
        op: TacBinaryOp,
        lhs: &Value,
        rhs: &Value,
        dst: &Value,
    ) -> Result<(), CodeGenError> {
        let (_, width) = self.operand_and_width(dst);
        if width == Width::Double {
            return self.select_double_binary(op, lhs, rhs, dst);
        }
        match op {
            TacBinaryOp::Add
            | TacBinaryOp::Subtract
            | TacBinaryOp::Multiply
            | TacBinaryOp::BitAnd
            | TacBinaryOp::BitOr
            | TacBinaryOp::BitXor => {
                let asm_op = match op {
                    TacBinaryOp::Add => AsmBinaryOp::Add,
                    TacBinaryOp::Subtract => AsmBinaryOp::Sub,
                    TacBinaryOp::Multiply => AsmBinaryOp::Mul,
                    TacBinaryOp::BitAnd => AsmBinaryOp::And,
                    TacBinaryOp::BitOr => AsmBinaryOp::Or,
                    TacBinaryOp::BitXor => AsmBinaryOp::Xor,
                    _ => unreachable!(),
                };
                let lhs_op = self.select_value(lhs);
                let dst_op = self.select_value(dst);
                let rhs_op = self.select_value(rhs);
                self.mov(width, lhs_op, dst_op.clone());
                self.emit(AsmInst::Binary {
                    op: asm_op,
                    width,
                    src: rhs_op,
                    dst: dst_op,
                });
                Ok(())
            }
            TacBinaryOp::ShiftLeft | TacBinaryOp::ShiftRight => {
                let signed = self.type_of_value_is_signed(lhs);
                let asm_op = match op {
                    TacBinaryOp::ShiftLeft => AsmBinaryOp::ShiftLeft,
                    TacBinaryOp::ShiftRight if signed => AsmBinaryOp::ShiftRightArithmetic,
                    TacBinaryOp::ShiftRight => AsmBinaryOp::ShiftRightLogical,
                    _ => unreachable!(),
                };
                let lhs_op = self.select_value(lhs);
                let dst_op = self.select_value(dst);
                let rhs_op = self.select_value(rhs);
                self.mov(width, lhs_op, dst_op.clone());
                self.emit(AsmInst::Binary {
                    op: asm_op,
                    width,
                    src: rhs_op,
                    dst: dst_op,
                });
                Ok(())
            }
            TacBinaryOp::Divide | TacBinaryOp::Remainder => {
                let signed = self.type_of_value_is_signed(lhs);
                let lhs_op = self.select_value(lhs);
                let rhs_op = self.select_value(rhs);
                let dst_op = self.select_value(dst);
                self.mov(width, lhs_op, Operand::Reg(asm::Register::Ax));
                if signed {
                    self.emit(if width == Width::Quadword {
                        AsmInst::Cqo
                    } else {
                        AsmInst::Cdq
                    });
                    self.emit(AsmInst::Idiv {
                        width,
                        operand: rhs_op,
                    });
                } else {
                    self.mov(width, Operand::Imm(0), Operand::Reg(asm::Register::Dx));
                    self.emit(AsmInst::Div {
                        width,
                        operand: rhs_op,
                    });
                }
                let result_reg = if op == TacBinaryOp::Divide {
                    asm::Register::Ax
                } else {
                    asm::Register::Dx
                };
                self.mov(width, Operand::Reg(result_reg), dst_op);
                Ok(())
            }
            TacBinaryOp::Equal
            | TacBinaryOp::NotEqual
            | TacBinaryOp::LessThan
            | TacBinaryOp::LessOrEqual
            | TacBinaryOp::GreaterThan
            | TacBinaryOp::GreaterOrEqual => {
                let signed = self.type_of_value_is_signed(lhs);
                let cc = relational_condition_code(op, signed);
                self.select_compare_values(lhs, rhs)?;
                let dst_op = self.select_value(dst);
                self.mov(Width::Longword, Operand::Imm(0), dst_op.clone());
                self.emit(AsmInst::SetCC { cc, dst: dst_op });
                Ok(())
            }
        }
    }

    fn select_compare_values(&mut self, lhs: &Value, rhs: &Value) -> Result<(), CodeGenError> {
        self.select_compare(lhs, rhs)
    }

    fn select_double_binary(
        &mut self,
        op: TacBinaryOp,
        lhs: &Value,
        rhs: &Value,
        dst: &Value,
    ) -> Result<(), CodeGenError> {
        match op {
            TacBinaryOp::Add
            | TacBinaryOp::Subtract
            | TacBinaryOp::Multiply
            | TacBinaryOp::Divide => {
                let asm_op = match op {
                    TacBinaryOp::Add => DoubleBinaryOp::Add,
                    TacBinaryOp::Subtract => DoubleBinaryOp::Sub,
                    TacBinaryOp::Multiply => DoubleBinaryOp::Mul,
                    TacBinaryOp::Divide => DoubleBinaryOp::Div,
                    _ => unreachable!(),
                };
                let lhs_op = self.select_value(lhs);
                let dst_op = self.select_value(dst);
                let rhs_op = self.select_value(rhs);
                self.mov(Width::Double, lhs_op, dst_op.clone());
                self.emit(AsmInst::DoubleBinary {
                    op: asm_op,
                    src: rhs_op,
                    dst: dst_op,
                });
                Ok(())
            }
            TacBinaryOp::Equal
            | TacBinaryOp::NotEqual
            | TacBinaryOp::LessThan
            | TacBinaryOp::LessOrEqual
            | TacBinaryOp::GreaterThan
            | TacBinaryOp::GreaterOrEqual => {
                let cc = relational_condition_code(op, true);
                self.select_compare_values(lhs, rhs)?;
                let dst_op = self.select_value(dst);
                self.mov(Width::Longword, Operand::Imm(0), dst_op.clone());
                self.emit(AsmInst::SetCC { cc, dst: dst_op });
                Ok(())
            }
            _ => Err(CodeGenError::Logic(format!(
                "operator not valid on double operands: {op:?}"
            ))),
        }
    }

    fn type_of_value_is_signed(&self, value: &Value) -> bool {
        match value {
            Value::Constant(c) => c.ty_hint().is_signed(),
            Value::Variable(name) => self.type_of(name).is_signed(),
        }
    }

    fn select_call(&mut self, name: &str, args: &[Value], dst: &Value) -> Result<(), CodeGenError> {
        let mut int_args = Vec::new();
        let mut sse_args = Vec::new();
        let mut stack_args = Vec::new();
        for arg in args {
            let (op, width) = self.operand_and_width(arg);
            if width == Width::Double {
                sse_args.push(op);
            } else {
                int_args.push((op, width));
            }
        }
        // Arguments beyond the register-passed prefix go on the stack,
        // right-to-left (spec.md §4.H).
        while int_args.len() > INT_ARG_REGISTERS.len() {
            stack_args.push(int_args.pop().unwrap());
        }
        while sse_args.len() > SSE_ARG_REGISTERS.len() {
            stack_args.push((sse_args.pop().unwrap(), Width::Double));
        }

        if stack_args.len() % 2 != 0 {
            self.emit(AsmInst::Binary {
                op: AsmBinaryOp::Sub,
                width: Width::Quadword,
                src: Operand::Imm(8),
                dst: Operand::Reg(asm::Register::Sp),
            });
        }
        for (op, width) in stack_args.into_iter().rev() {
            if width == Width::Double {
                self.emit(AsmInst::PushXmm(op));
            } else if width == Width::Longword {
                // Narrow stack arguments are widened into a full register
                // before `push`, not truncated after (resolved Open
                // Question, spec.md §9).
                self.emit(AsmInst::MovZeroExtend {
                    src: op,
                    dst: Operand::Reg(asm::Register::Ax),
                });
                self.emit(AsmInst::Push(Operand::Reg(asm::Register::Ax)));
            } else {
                self.emit(AsmInst::Push(op));
            }
        }
        for (i, (op, width)) in int_args.into_iter().enumerate() {
            self.mov(width, op, Operand::Reg(INT_ARG_REGISTERS[i]));
        }
        for (i, op) in sse_args.into_iter().enumerate() {
            self.mov(Width::Double, op, Operand::Reg(SSE_ARG_REGISTERS[i]));
        }
        self.emit(AsmInst::Call(name.into()));

        let (dst_op, dst_width) = self.operand_and_width(dst);
        if dst_width == Width::Double {
            self.mov(dst_width, Operand::Reg(asm::Register::Xmm0), dst_op);
        } else {
            self.mov(dst_width, Operand::Reg(asm::Register::Ax), dst_op);
        }
        Ok(())
    }
}

fn relational_condition_code(op: TacBinaryOp, signed: bool) -> ConditionCode {
    match (op, signed) {
        (TacBinaryOp::Equal, _) => ConditionCode::Equal,
        (TacBinaryOp::NotEqual, _) => ConditionCode::NotEqual,
        (TacBinaryOp::LessThan, true) => ConditionCode::LessThan,
        (TacBinaryOp::LessThan, false) => ConditionCode::Below,
        (TacBinaryOp::LessOrEqual, true) => ConditionCode::LessOrEqual,
        (TacBinaryOp::LessOrEqual, false) => ConditionCode::BelowOrEqual,
        (TacBinaryOp::GreaterThan, true) => ConditionCode::GreaterThan,
        (TacBinaryOp::GreaterThan, false) => ConditionCode::Above,
        (TacBinaryOp::GreaterOrEqual, true) => ConditionCode::GreaterOrEqual,
        (TacBinaryOp::GreaterOrEqual, false) => ConditionCode::AboveOrEqual,
        _ => unreachable!("not a relational operator"),
    }
}

fn constant_operand(c: &crate::types::ConstantValue) -> Operand {
    use crate::types::ConstantValue as C;
    match c {
        C::I8(v) => Operand::Imm(*v as i64),
        C::U8(v) => Operand::Imm(*v as i64),
        C::I32(v) => Operand::Imm(*v as i64),
        C::U32(v) => Operand::Imm(*v as i64),
        C::I64(v) => Operand::Imm(*v),
        C::U64(v) => Operand::Imm(*v as i64),
        C::F64(_) => panic!("double constants must be pooled into a Data operand before selection"),
        C::ZeroBytes(_) | C::StringInit { .. } | C::PointerInit { .. } => {
            panic!("aggregate constant values do not appear as TAC operands")
        }
    }
}

trait ConstantTypeHint {
    fn ty_hint(&self) -> Type;
}

impl ConstantTypeHint for crate::types::ConstantValue {
    fn ty_hint(&self) -> Type {
        use crate::types::ConstantValue as C;
        match self {
            C::I8(_) | C::U8(_) => Type::Char,
            C::I32(_) => Type::Int,
            C::U32(_) => Type::UInt,
            C::I64(_) => Type::Long,
            C::U64(_) => Type::ULong,
            C::F64(_) => Type::Double,
            C::ZeroBytes(_) | C::StringInit { .. } | C::PointerInit { .. } => Type::Long,
        }
    }
}

fn classify_params(
    params: &[String],
    var_types: &HashMap<String, Type>,
) -> (Vec<(String, Width)>, Vec<(String, Width)>, Vec<(String, Width)>) {
    let mut int_params = Vec::new();
    let mut sse_params = Vec::new();
    let mut stack_params = Vec::new();
    for name in params {
        let ty = var_types
            .get(name)
            .unwrap_or_else(|| panic!("selector: no recorded type for parameter `{name}`"));
        let width = width_of(ty);
        if width == Width::Double {
            if sse_params.len() < SSE_ARG_REGISTERS.len() {
                sse_params.push((name.clone(), width));
            } else {
                stack_params.push((name.clone(), width));
            }
        } else if int_params.len() < INT_ARG_REGISTERS.len() {
            int_params.push((name.clone(), width));
        } else {
            stack_params.push((name.clone(), width));
        }
    }
    (int_params, sse_params, stack_params)
}

fn select_function(
    def: &tac::FunctionDefinition,
    var_types: &HashMap<String, Type>,
    asm_symbols: &AsmSymbolTable,
) -> Result<asm::FunctionDefinition, CodeGenError> {
    let mut selector = Selector {
        var_types,
        asm_symbols,
        body: Vec::new(),
    };

    let (int_params, sse_params, stack_params) = classify_params(&def.params, var_types);
    for (i, (name, width)) in int_params.iter().enumerate() {
        selector.mov(*width, Operand::Reg(INT_ARG_REGISTERS[i]), Operand::pseudo(name.as_str()));
    }
    for (i, (name, _)) in sse_params.iter().enumerate() {
        selector.mov(
            Width::Double,
            Operand::Reg(SSE_ARG_REGISTERS[i]),
            Operand::pseudo(name.as_str()),
        );
    }
    for (i, (name, width)) in stack_params.iter().enumerate() {
        let offset = super::runtime::FIRST_STACK_ARG_OFFSET + (i as i64) * 8;
        selector.mov(*width, Operand::Stack(offset), Operand::pseudo(name.as_str()));
    }

    for inst in &def.body {
        selector.select_instruction(inst)?;
    }

    Ok(asm::FunctionDefinition {
        name: def.name.clone(),
        global: def.global,
        // Filled in by the legalizer once every Pseudo is assigned a slot.
        stack_size: 0,
        body: selector.body,
    })
}

/// Selects an entire TAC program into abstract x86-64 (spec.md §4.H).
pub fn select(program: &tac::Program, asm_symbols: &AsmSymbolTable) -> Result<asm::Program, CodeGenError> {
    let mut items = Vec::new();
    for item in &program.items {
        match item {
            tac::TopLevel::Function(def) => {
                items.push(asm::TopLevel::Function(select_function(
                    def,
                    &program.var_types,
                    asm_symbols,
                )?));
            }
            tac::TopLevel::StaticVariable(sv) => {
                items.push(asm::TopLevel::StaticVariable(asm::StaticVariable {
                    name: sv.name.clone(),
                    global: sv.global,
                    alignment: sv.alignment,
                    init: sv.init.clone(),
                }));
            }
        }
    }
    Ok(asm::Program { items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::AsmEntry;
    use crate::tac::{FunctionDefinition, Instruction, Program};
    use crate::types::ConstantValue;

    fn simple_return_program() -> (Program, AsmSymbolTable) {
        let mut var_types = HashMap::new();
        var_types.insert("tmp.0".to_string(), Type::Int);
        let program = Program {
            items: vec![tac::TopLevel::Function(FunctionDefinition {
                name: "main".into(),
                global: true,
                params: vec![],
                body: vec![Instruction::Return(Value::Constant(ConstantValue::I32(2)))],
            })],
            var_types,
        };
        let mut asm_symbols = AsmSymbolTable::new();
        asm_symbols.insert("main", AsmEntry::Function { defined: true });
        (program, asm_symbols)
    }

    #[test]
    fn return_constant_moves_into_ax_then_rets() {
        let (program, asm_symbols) = simple_return_program();
        let selected = select(&program, &asm_symbols).expect("select");
        let asm::TopLevel::Function(main) = &selected.items[0] else {
            panic!("expected function")
        };
        assert!(matches!(main.body.last(), Some(AsmInst::Ret)));
        assert!(main.body.iter().any(|i| matches!(
            i,
            AsmInst::Mov {
                dst: Operand::Reg(asm::Register::Ax),
                ..
            }
        )));
    }

    #[test]
    fn signed_less_than_picks_signed_condition_code() {
        assert_eq!(
            relational_condition_code(TacBinaryOp::LessThan, true),
            ConditionCode::LessThan
        );
        assert_eq!(
            relational_condition_code(TacBinaryOp::LessThan, false),
            ConditionCode::Below
        );
    }
}
