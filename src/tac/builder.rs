//! AST → TAC lowering (spec.md §4.G).
//!
//! Expressions lower to a sequence of instructions plus a [`Value`] holding
//! the result; short-circuit `&&`/`||` and `?:` lower to explicit jumps
//! rather than carrying boolean algebra into the IR. Statements lower using
//! the break/continue/loop labels and switch dispatch tables the resolver
//! already attached to `Stmt` nodes, so the builder never invents its own
//! loop-nesting tracking.

use std::collections::HashMap;

use crate::ast::{self, BlockItem, Declaration, Expr, ForInit, Program as AstProgram, Stmt};
use crate::context::CompileContext;
use crate::error::CodeGenError;
use crate::symbol::{IdentifierAttrs, InitialValue, SymbolTable};
use crate::types::{ConstantValue, Type};

use super::{BinaryOp as TacBinaryOp, FunctionDefinition, Instruction, Program, StaticVariable, TopLevel, UnaryOp as TacUnaryOp, Value};

/// Tracks emitted instructions, pools repeated float/string constants into a
/// single `.data` entry, and records every temporary's type as it's minted.
struct Builder<'a> {
    ctx: &'a CompileContext,
    symbols: &'a SymbolTable,
    instructions: Vec<Instruction>,
    var_types: HashMap<String, Type>,
    /// Pooled double constants, keyed by bit pattern so `-0.0`/`0.0` aren't
    /// conflated and NaN payloads are preserved exactly.
    double_pool: HashMap<u64, String>,
    /// Pooled string-literal constants, keyed by exact text + termination.
    string_pool: HashMap<(String, bool), String>,
    extra_statics: Vec<StaticVariable>,
}

impl<'a> Builder<'a> {
    fn new(ctx: &'a CompileContext, symbols: &'a SymbolTable) -> Self {
        Builder {
            ctx,
            symbols,
            instructions: Vec::new(),
            var_types: HashMap::new(),
            double_pool: HashMap::new(),
            string_pool: HashMap::new(),
            extra_statics: Vec::new(),
        }
    }

    fn emit(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }

    fn fresh_temp(&mut self, ty: Type) -> Value {
        let name = self.ctx.fresh_temp();
        self.var_types.insert(name.clone(), ty);
        Value::Variable(name)
    }

    fn type_of_expr(&self, expr: &Expr) -> Type {
        expr.ty()
            .cloned()
            .expect("type checker must annotate every expression before lowering")
    }

    /// Pools a double literal, returning the `.data` symbol name that holds
    /// its 8-byte representation.
    fn pool_double(&mut self, value: f64) -> String {
        let key = value.to_bits();
        if let Some(name) = self.double_pool.get(&key) {
            return name.clone();
        }
        let name = self.ctx.fresh_label("dbl");
        self.extra_statics.push(StaticVariable {
            name: name.clone(),
            global: false,
            alignment: 8,
            init: vec![ConstantValue::F64(value)],
        });
        self.double_pool.insert(key, name.clone());
        name
    }

    fn pool_string(&mut self, text: String, null_terminated: bool) -> String {
        let key = (text.clone(), null_terminated);
        if let Some(name) = self.string_pool.get(&key) {
            return name.clone();
        }
        let name = self.ctx.fresh_label("str");
        self.extra_statics.push(StaticVariable {
            name: name.clone(),
            global: false,
            alignment: 1,
            init: vec![ConstantValue::StringInit {
                text: text.clone(),
                null_terminated,
            }],
        });
        self.string_pool.insert(key, name.clone());
        name
    }

    /// Lowers an expression for its value (rvalue position). Array-typed
    /// results decay to the address of their first element, matching the
    /// type checker's own decay rule.
    fn lower_expr(&mut self, expr: &Expr) -> Result<Value, CodeGenError> {
        match expr {
            Expr::Constant { value, .. } => Ok(self.lower_constant_operand(value)),

            Expr::Variable { name, ty } => {
                let ty = ty.clone().expect("annotated by type checker");
                if ty.is_array() {
                    let element = match &ty {
                        Type::Array { element, .. } => (**element).clone(),
                        _ => unreachable!(),
                    };
                    let dst = self.fresh_temp(Type::pointer_to(element));
                    self.emit(Instruction::GetAddress {
                        src: Value::Variable(name.clone()),
                        dst: dst.clone(),
                    });
                    Ok(dst)
                } else {
                    Ok(Value::Variable(name.clone()))
                }
            }

            Expr::Cast { target, inner, .. } => {
                let src = self.lower_expr(inner)?;
                self.lower_cast(src, &self.type_of_expr(inner), target)
            }

            Expr::Unary { op, inner, ty } => self.lower_unary(*op, inner, ty.as_ref().unwrap()),

            Expr::Binary {
                op: ast::BinaryOp::And,
                lhs,
                rhs,
                ..
            } => self.lower_and(lhs, rhs),
            Expr::Binary {
                op: ast::BinaryOp::Or,
                lhs,
                rhs,
                ..
            } => self.lower_or(lhs, rhs),
            Expr::Binary { op, lhs, rhs, ty } => {
                self.lower_binary(*op, lhs, rhs, ty.as_ref().unwrap())
            }

            Expr::Assignment { lhs, rhs, .. } => self.lower_assignment(lhs, rhs),

            Expr::CompoundAssignment {
                op,
                lhs,
                rhs,
                inner_ty,
                result_ty,
            } => self.lower_compound_assignment(
                *op,
                lhs,
                rhs,
                inner_ty.as_ref().unwrap(),
                result_ty.as_ref().unwrap(),
            ),

            Expr::Conditional {
                cond,
                then_branch,
                else_branch,
                ty,
            } => self.lower_conditional(cond, then_branch, else_branch, ty.as_ref().unwrap()),

            Expr::Call { name, args, ty } => self.lower_call(name, args, ty.as_ref().unwrap()),

            Expr::Dereference { inner, ty } => {
                let ptr = self.lower_expr(inner)?;
                let dst = self.fresh_temp(ty.clone().unwrap());
                self.emit(Instruction::Load {
                    ptr,
                    dst: dst.clone(),
                });
                Ok(dst)
            }

            Expr::AddressOf { inner, .. } => self.lower_address_of(inner),

            Expr::Subscript { ptr, index, ty } => {
                let addr = self.lower_subscript_address(ptr, index, ty.as_ref().unwrap())?;
                let dst = self.fresh_temp(ty.clone().unwrap());
                self.emit(Instruction::Load {
                    ptr: addr,
                    dst: dst.clone(),
                });
                Ok(dst)
            }
        }
    }

    fn lower_constant_operand(&mut self, value: &ConstantValue) -> Value {
        match value {
            ConstantValue::F64(f) => {
                let name = self.pool_double(*f);
                self.var_types.insert(name.clone(), Type::Double);
                Value::Variable(name)
            }
            ConstantValue::StringInit {
                text,
                null_terminated,
            } => {
                let name = self.pool_string(text.clone(), *null_terminated);
                let len = text.len() + usize::from(*null_terminated);
                self.var_types
                    .insert(name.clone(), Type::array_of(Type::Char, len));
                let dst = self.fresh_temp(Type::pointer_to(Type::Char));
                self.emit(Instruction::GetAddress {
                    src: Value::Variable(name),
                    dst: dst.clone(),
                });
                dst
            }
            other => Value::Constant(other.clone()),
        }
    }

    /// Lowers an expression that must produce an address: the lvalue forms
    /// plus the operand of `&`.
    fn lower_lvalue_address(&mut self, expr: &Expr) -> Result<Value, CodeGenError> {
        match expr {
            Expr::Variable { name, ty } => {
                let dst = self.fresh_temp(Type::pointer_to(ty.clone().unwrap()));
                self.emit(Instruction::GetAddress {
                    src: Value::Variable(name.clone()),
                    dst: dst.clone(),
                });
                Ok(dst)
            }
            Expr::Dereference { inner, .. } => self.lower_expr(inner),
            Expr::Subscript { ptr, index, ty } => {
                self.lower_subscript_address(ptr, index, ty.as_ref().unwrap())
            }
            _ => Err(CodeGenError::Logic(format!(
                "expression is not an lvalue: {expr:?}"
            ))),
        }
    }

    fn lower_address_of(&mut self, inner: &Expr) -> Result<Value, CodeGenError> {
        self.lower_lvalue_address(inner)
    }

    fn lower_subscript_address(
        &mut self,
        ptr_expr: &Expr,
        index_expr: &Expr,
        element_ty: &Type,
    ) -> Result<Value, CodeGenError> {
        let ptr = self.lower_expr(ptr_expr)?;
        let index = self.lower_expr(index_expr)?;
        let dst = self.fresh_temp(Type::pointer_to(element_ty.clone()));
        self.emit(Instruction::AddPointer {
            ptr,
            index,
            scale: element_ty.size(),
            dst: dst.clone(),
        });
        Ok(dst)
    }

    fn lower_cast(
        &mut self,
        src: Value,
        from: &Type,
        to: &Type,
    ) -> Result<Value, CodeGenError> {
        if from == to {
            return Ok(src);
        }
        if from.is_double() || to.is_double() {
            let dst = self.fresh_temp(to.clone());
            if to.is_double() {
                self.emit(Instruction::IntToDouble {
                    src,
                    dst: dst.clone(),
                });
            } else {
                self.emit(Instruction::DoubleToInt {
                    src,
                    dst: dst.clone(),
                });
            }
            return Ok(dst);
        }
        let dst = self.fresh_temp(to.clone());
        let from_size = from.size();
        let to_size = to.size();
        if to_size == from_size {
            self.emit(Instruction::Copy {
                src,
                dst: dst.clone(),
            });
        } else if to_size < from_size {
            self.emit(Instruction::Truncate {
                src,
                dst: dst.clone(),
            });
        } else if from.is_signed() {
            self.emit(Instruction::SignExtend {
                src,
                dst: dst.clone(),
            });
        } else {
            self.emit(Instruction::ZeroExtend {
                src,
                dst: dst.clone(),
            });
        }
        Ok(dst)
    }

    fn lower_unary(
        &mut self,
        op: ast::UnaryOp,
        inner: &Expr,
        result_ty: &Type,
    ) -> Result<Value, CodeGenError> {
        match op {
            ast::UnaryOp::Negate | ast::UnaryOp::Complement | ast::UnaryOp::Not => {
                let src = self.lower_expr(inner)?;
                let tac_op = match op {
                    ast::UnaryOp::Negate => TacUnaryOp::Negate,
                    ast::UnaryOp::Complement => TacUnaryOp::Complement,
                    ast::UnaryOp::Not => TacUnaryOp::Not,
                    _ => unreachable!(),
                };
                let dst = self.fresh_temp(result_ty.clone());
                self.emit(Instruction::Unary {
                    op: tac_op,
                    src,
                    dst: dst.clone(),
                });
                Ok(dst)
            }
            ast::UnaryOp::PreIncrement | ast::UnaryOp::PreDecrement => {
                let operand_ty = self.type_of_expr(inner);
                let one = self.one_of_type(&operand_ty);
                let updated = self.lower_binary_op_on_lvalue(
                    if op == ast::UnaryOp::PreIncrement {
                        TacBinaryOp::Add
                    } else {
                        TacBinaryOp::Subtract
                    },
                    inner,
                    one,
                    &operand_ty,
                )?;
                Ok(updated)
            }
            ast::UnaryOp::PostIncrement | ast::UnaryOp::PostDecrement => {
                let operand_ty = self.type_of_expr(inner);
                let old = self.lower_expr(inner)?;
                let saved = self.fresh_temp(operand_ty.clone());
                self.emit(Instruction::Copy {
                    src: old,
                    dst: saved.clone(),
                });
                let one = self.one_of_type(&operand_ty);
                self.lower_binary_op_on_lvalue(
                    if op == ast::UnaryOp::PostIncrement {
                        TacBinaryOp::Add
                    } else {
                        TacBinaryOp::Subtract
                    },
                    inner,
                    one,
                    &operand_ty,
                )?;
                Ok(saved)
            }
        }
    }

    fn one_of_type(&mut self, ty: &Type) -> Value {
        if ty.is_pointer() {
            Value::Constant(ConstantValue::I32(1))
        } else if ty.is_double() {
            self.lower_constant_operand(&ConstantValue::F64(1.0))
        } else if *ty == Type::Long || *ty == Type::ULong {
            Value::Constant(ConstantValue::I64(1))
        } else {
            Value::Constant(ConstantValue::I32(1))
        }
    }

    /// Computes `lvalue OP rhs`, pointer-aware (increment/decrement and
    /// compound assignment on a pointer advances by element size), and
    /// stores the result back through the lvalue's address, returning the
    /// new value.
    fn lower_binary_op_on_lvalue(
        &mut self,
        op: TacBinaryOp,
        lvalue: &Expr,
        rhs: Value,
        ty: &Type,
    ) -> Result<Value, CodeGenError> {
        let current = self.lower_expr(lvalue)?;
        let updated = if ty.is_pointer() {
            let element_size = match ty {
                Type::Pointer { referenced } => referenced.size(),
                _ => unreachable!(),
            };
            let signed_index = if op == TacBinaryOp::Subtract {
                let negated = self.fresh_temp(Type::Long);
                self.emit(Instruction::Unary {
                    op: TacUnaryOp::Negate,
                    src: rhs,
                    dst: negated.clone(),
                });
                negated
            } else {
                rhs
            };
            let dst = self.fresh_temp(ty.clone());
            self.emit(Instruction::AddPointer {
                ptr: current,
                index: signed_index,
                scale: element_size,
                dst: dst.clone(),
            });
            dst
        } else {
            let dst = self.fresh_temp(ty.clone());
            self.emit(Instruction::Binary {
                op,
                lhs: current,
                rhs,
                dst: dst.clone(),
            });
            dst
        };
        self.store_into_lvalue(lvalue, updated.clone())?;
        Ok(updated)
    }

    fn store_into_lvalue(&mut self, lvalue: &Expr, value: Value) -> Result<(), CodeGenError> {
        match lvalue {
            Expr::Variable { name, .. } => {
                self.emit(Instruction::Copy {
                    src: value,
                    dst: Value::Variable(name.clone()),
                });
                Ok(())
            }
            Expr::Dereference { .. } | Expr::Subscript { .. } => {
                let addr = self.lower_lvalue_address(lvalue)?;
                self.emit(Instruction::Store { src: value, ptr: addr });
                Ok(())
            }
            _ => Err(CodeGenError::Logic(format!(
                "cannot store into non-lvalue: {lvalue:?}"
            ))),
        }
    }

    fn binary_op_to_tac(op: ast::BinaryOp) -> TacBinaryOp {
        match op {
            ast::BinaryOp::Add => TacBinaryOp::Add,
            ast::BinaryOp::Subtract => TacBinaryOp::Subtract,
            ast::BinaryOp::Multiply => TacBinaryOp::Multiply,
            ast::BinaryOp::Divide => TacBinaryOp::Divide,
            ast::BinaryOp::Remainder => TacBinaryOp::Remainder,
            ast::BinaryOp::BitAnd => TacBinaryOp::BitAnd,
            ast::BinaryOp::BitOr => TacBinaryOp::BitOr,
            ast::BinaryOp::BitXor => TacBinaryOp::BitXor,
            ast::BinaryOp::ShiftLeft => TacBinaryOp::ShiftLeft,
            ast::BinaryOp::ShiftRight => TacBinaryOp::ShiftRight,
            ast::BinaryOp::Equal => TacBinaryOp::Equal,
            ast::BinaryOp::NotEqual => TacBinaryOp::NotEqual,
            ast::BinaryOp::LessThan => TacBinaryOp::LessThan,
            ast::BinaryOp::LessOrEqual => TacBinaryOp::LessOrEqual,
            ast::BinaryOp::GreaterThan => TacBinaryOp::GreaterThan,
            ast::BinaryOp::GreaterOrEqual => TacBinaryOp::GreaterOrEqual,
            ast::BinaryOp::And | ast::BinaryOp::Or => {
                unreachable!("short-circuit operators are lowered separately")
            }
        }
    }

    fn lower_binary(
        &mut self,
        op: ast::BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        result_ty: &Type,
    ) -> Result<Value, CodeGenError> {
        let lhs_ty = self.type_of_expr(lhs);
        let rhs_val_ty = self.type_of_expr(rhs);

        // Pointer arithmetic: `ptr + int` / `int + ptr` / `ptr - int` lower
        // via AddPointer with the referenced type's size as scale. Only
        // Add/Subtract reach here with a pointer operand (the type checker
        // rejects every other pointer binary op except pointer - pointer,
        // relationals, and equality, none of which take this branch).
        if op == ast::BinaryOp::Add && (lhs_ty.is_pointer() || rhs_val_ty.is_pointer()) {
            let (ptr_expr, ptr_ty, index_expr) = if lhs_ty.is_pointer() {
                (lhs, lhs_ty.clone(), rhs)
            } else {
                (rhs, rhs_val_ty.clone(), lhs)
            };
            let element_size = match &ptr_ty {
                Type::Pointer { referenced } => referenced.size(),
                _ => unreachable!(),
            };
            let ptr = self.lower_expr(ptr_expr)?;
            let index = self.lower_expr(index_expr)?;
            let dst = self.fresh_temp(ptr_ty);
            self.emit(Instruction::AddPointer {
                ptr,
                index,
                scale: element_size,
                dst: dst.clone(),
            });
            return Ok(dst);
        }
        if op == ast::BinaryOp::Subtract && lhs_ty.is_pointer() && rhs_val_ty.is_pointer() {
            let element_size = match &lhs_ty {
                Type::Pointer { referenced } => referenced.size(),
                _ => unreachable!(),
            };
            let l = self.lower_expr(lhs)?;
            let r = self.lower_expr(rhs)?;
            let diff = self.fresh_temp(Type::Long);
            self.emit(Instruction::Binary {
                op: TacBinaryOp::Subtract,
                lhs: l,
                rhs: r,
                dst: diff.clone(),
            });
            let dst = self.fresh_temp(Type::Long);
            self.emit(Instruction::Binary {
                op: TacBinaryOp::Divide,
                lhs: diff,
                rhs: Value::Constant(ConstantValue::I64(element_size as i64)),
                dst: dst.clone(),
            });
            return Ok(dst);
        }
        if op == ast::BinaryOp::Subtract && lhs_ty.is_pointer() {
            let element_size = match &lhs_ty {
                Type::Pointer { referenced } => referenced.size(),
                _ => unreachable!(),
            };
            let l = self.lower_expr(lhs)?;
            let r = self.lower_expr(rhs)?;
            let negated = self.fresh_temp(self.type_of_expr(rhs));
            self.emit(Instruction::Unary {
                op: TacUnaryOp::Negate,
                src: r,
                dst: negated.clone(),
            });
            let dst = self.fresh_temp(lhs_ty.clone());
            self.emit(Instruction::AddPointer {
                ptr: l,
                index: negated,
                scale: element_size,
                dst: dst.clone(),
            });
            return Ok(dst);
        }

        let l = self.lower_expr(lhs)?;
        let r = self.lower_expr(rhs)?;
        let dst = self.fresh_temp(result_ty.clone());
        self.emit(Instruction::Binary {
            op: Self::binary_op_to_tac(op),
            lhs: l,
            rhs: r,
            dst: dst.clone(),
        });
        Ok(dst)
    }

    /// `lhs && rhs`, short-circuit: if `lhs` is zero the whole expression is
    /// `0` without evaluating `rhs`.
    fn lower_and(&mut self, lhs: &Expr, rhs: &Expr) -> Result<Value, CodeGenError> {
        let false_label = self.ctx.fresh_label("and_false");
        let end_label = self.ctx.fresh_label("and_end");
        let l = self.lower_expr(lhs)?;
        self.emit(Instruction::JumpIfZero {
            cond: l,
            target: false_label.clone(),
        });
        let r = self.lower_expr(rhs)?;
        self.emit(Instruction::JumpIfZero {
            cond: r,
            target: false_label.clone(),
        });
        let dst = self.fresh_temp(Type::Int);
        self.emit(Instruction::Copy {
            src: Value::Constant(ConstantValue::I32(1)),
            dst: dst.clone(),
        });
        self.emit(Instruction::Jump(end_label.clone()));
        self.emit(Instruction::Label(false_label));
        self.emit(Instruction::Copy {
            src: Value::Constant(ConstantValue::I32(0)),
            dst: dst.clone(),
        });
        self.emit(Instruction::Label(end_label));
        Ok(dst)
    }

    fn lower_or(&mut self, lhs: &Expr, rhs: &Expr) -> Result<Value, CodeGenError> {
        let true_label = self.ctx.fresh_label("or_true");
        let end_label = self.ctx.fresh_label("or_end");
        let l = self.lower_expr(lhs)?;
        self.emit(Instruction::JumpIfNotZero {
            cond: l,
            target: true_label.clone(),
        });
        let r = self.lower_expr(rhs)?;
        self.emit(Instruction::JumpIfNotZero {
            cond: r,
            target: true_label.clone(),
        });
        let dst = self.fresh_temp(Type::Int);
        self.emit(Instruction::Copy {
            src: Value::Constant(ConstantValue::I32(0)),
            dst: dst.clone(),
        });
        self.emit(Instruction::Jump(end_label.clone()));
        self.emit(Instruction::Label(true_label));
        self.emit(Instruction::Copy {
            src: Value::Constant(ConstantValue::I32(1)),
            dst: dst.clone(),
        });
        self.emit(Instruction::Label(end_label));
        Ok(dst)
    }

    fn lower_assignment(&mut self, lhs: &Expr, rhs: &Expr) -> Result<Value, CodeGenError> {
        let value = self.lower_expr(rhs)?;
        self.store_into_lvalue(lhs, value.clone())?;
        Ok(value)
    }

    fn lower_compound_assignment(
        &mut self,
        op: ast::BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        inner_ty: &Type,
        result_ty: &Type,
    ) -> Result<Value, CodeGenError> {
        let rhs_val = self.lower_expr(rhs)?;
        let tac_op = Self::binary_op_to_tac(op);
        let updated = self.lower_binary_op_on_lvalue(tac_op, lhs, rhs_val, inner_ty)?;
        if inner_ty == result_ty {
            Ok(updated)
        } else {
            self.lower_cast(updated, inner_ty, result_ty)
        }
    }

    fn lower_conditional(
        &mut self,
        cond: &Expr,
        then_branch: &Expr,
        else_branch: &Expr,
        result_ty: &Type,
    ) -> Result<Value, CodeGenError> {
        let else_label = self.ctx.fresh_label("cond_else");
        let end_label = self.ctx.fresh_label("cond_end");
        let c = self.lower_expr(cond)?;
        self.emit(Instruction::JumpIfZero {
            cond: c,
            target: else_label.clone(),
        });
        let dst = self.fresh_temp(result_ty.clone());
        let then_val = self.lower_expr(then_branch)?;
        self.emit(Instruction::Copy {
            src: then_val,
            dst: dst.clone(),
        });
        self.emit(Instruction::Jump(end_label.clone()));
        self.emit(Instruction::Label(else_label));
        let else_val = self.lower_expr(else_branch)?;
        self.emit(Instruction::Copy {
            src: else_val,
            dst: dst.clone(),
        });
        self.emit(Instruction::Label(end_label));
        Ok(dst)
    }

    fn lower_call(
        &mut self,
        name: &str,
        args: &[Expr],
        result_ty: &Type,
    ) -> Result<Value, CodeGenError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.lower_expr(arg)?);
        }
        let dst = self.fresh_temp(result_ty.clone());
        self.emit(Instruction::Call {
            name: name.to_string(),
            args: values,
            dst: dst.clone(),
        });
        Ok(dst)
    }

    // -- statements --------------------------------------------------

    fn lower_block(&mut self, block: &ast::Block) -> Result<(), CodeGenError> {
        for item in &block.items {
            self.lower_block_item(item)?;
        }
        Ok(())
    }

    fn lower_block_item(&mut self, item: &BlockItem) -> Result<(), CodeGenError> {
        match item {
            BlockItem::Statement(stmt) => self.lower_stmt(stmt),
            BlockItem::Declaration(Declaration::Variable(decl)) => {
                self.lower_local_var_decl(decl)
            }
            BlockItem::Declaration(Declaration::Function(_)) => Ok(()),
        }
    }

    fn lower_local_var_decl(&mut self, decl: &ast::VariableDeclaration) -> Result<(), CodeGenError> {
        self.var_types.insert(decl.name.clone(), decl.ty.clone());
        match self.symbols.get(&decl.name) {
            Some(sym) if matches!(sym.attrs, IdentifierAttrs::Static { .. }) => {
                // Initializer (if any) is folded into the static's own
                // `.data`/`.bss` entry by the top-level emission pass, not
                // executed here.
                Ok(())
            }
            _ => {
                if let Some(init) = &decl.init {
                    self.lower_initializer_into(&decl.name, &decl.ty, init)?;
                }
                Ok(())
            }
        }
    }

    fn lower_initializer_into(
        &mut self,
        base_name: &str,
        ty: &Type,
        init: &ast::Initializer,
    ) -> Result<(), CodeGenError> {
        match (ty, init) {
            (_, ast::Initializer::Single(expr)) => {
                let value = self.lower_expr(expr)?;
                self.emit(Instruction::Copy {
                    src: value,
                    dst: Value::Variable(base_name.to_string()),
                });
                Ok(())
            }
            (Type::Array { element, .. }, ast::Initializer::Compound(items)) => {
                for (i, item) in items.iter().enumerate() {
                    let element_ty = (**element).clone();
                    let element_name = self.ctx.fresh_temp();
                    self.var_types
                        .insert(element_name.clone(), Type::pointer_to(element_ty.clone()));
                    let base_addr = Value::Variable(element_name.clone());
                    self.emit(Instruction::GetAddress {
                        src: Value::Variable(base_name.to_string()),
                        dst: base_addr.clone(),
                    });
                    let elem_addr = self.fresh_temp(Type::pointer_to(element_ty.clone()));
                    self.emit(Instruction::AddPointer {
                        ptr: base_addr,
                        index: Value::Constant(ConstantValue::I64(i as i64)),
                        scale: element_ty.size(),
                        dst: elem_addr.clone(),
                    });
                    match item {
                        ast::Initializer::Single(expr) => {
                            let value = self.lower_expr(expr)?;
                            self.emit(Instruction::Store {
                                src: value,
                                ptr: elem_addr,
                            });
                        }
                        ast::Initializer::Compound(_) => {
                            return Err(CodeGenError::Logic(
                                "nested compound initializers are not supported by this subset"
                                    .into(),
                            ));
                        }
                    }
                }
                Ok(())
            }
            _ => Err(CodeGenError::Logic(format!(
                "initializer shape does not match declared type {ty:?}"
            ))),
        }
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), CodeGenError> {
        match stmt {
            Stmt::Return(expr) => {
                let value = self.lower_expr(expr)?;
                self.emit(Instruction::Return(value));
                Ok(())
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = self.lower_expr(cond)?;
                match else_branch {
                    None => {
                        let end_label = self.ctx.fresh_label("if_end");
                        self.emit(Instruction::JumpIfZero {
                            cond: c,
                            target: end_label.clone(),
                        });
                        self.lower_stmt(then_branch)?;
                        self.emit(Instruction::Label(end_label));
                    }
                    Some(else_stmt) => {
                        let else_label = self.ctx.fresh_label("if_else");
                        let end_label = self.ctx.fresh_label("if_end");
                        self.emit(Instruction::JumpIfZero {
                            cond: c,
                            target: else_label.clone(),
                        });
                        self.lower_stmt(then_branch)?;
                        self.emit(Instruction::Jump(end_label.clone()));
                        self.emit(Instruction::Label(else_label));
                        self.lower_stmt(else_stmt)?;
                        self.emit(Instruction::Label(end_label));
                    }
                }
                Ok(())
            }
            Stmt::Goto(label) => {
                self.emit(Instruction::Jump(label.clone()));
                Ok(())
            }
            Stmt::Labeled { label, stmt } => {
                self.emit(Instruction::Label(label.clone()));
                self.lower_stmt(stmt)
            }
            Stmt::Block(block) => self.lower_block(block),
            Stmt::Expression(expr) => {
                self.lower_expr(expr)?;
                Ok(())
            }
            Stmt::Null => Ok(()),
            Stmt::Break { label } => {
                let label = label.as_ref().expect("resolver assigns break labels");
                self.emit(Instruction::Jump(format!("break_{label}")));
                Ok(())
            }
            Stmt::Continue { label } => {
                let label = label.as_ref().expect("resolver assigns continue labels");
                self.emit(Instruction::Jump(format!("continue_{label}")));
                Ok(())
            }
            Stmt::While { cond, body, label } => {
                let label = label.as_ref().expect("resolver assigns loop labels");
                let continue_label = format!("continue_{label}");
                let break_label = format!("break_{label}");
                self.emit(Instruction::Label(continue_label.clone()));
                let c = self.lower_expr(cond)?;
                self.emit(Instruction::JumpIfZero {
                    cond: c,
                    target: break_label.clone(),
                });
                self.lower_stmt(body)?;
                self.emit(Instruction::Jump(continue_label));
                self.emit(Instruction::Label(break_label));
                Ok(())
            }
            Stmt::DoWhile { body, cond, label } => {
                let label = label.as_ref().expect("resolver assigns loop labels");
                let start_label = format!("do_start_{label}");
                let continue_label = format!("continue_{label}");
                let break_label = format!("break_{label}");
                self.emit(Instruction::Label(start_label.clone()));
                self.lower_stmt(body)?;
                self.emit(Instruction::Label(continue_label));
                let c = self.lower_expr(cond)?;
                self.emit(Instruction::JumpIfNotZero {
                    cond: c,
                    target: start_label,
                });
                self.emit(Instruction::Label(break_label));
                Ok(())
            }
            Stmt::For {
                init,
                cond,
                update,
                body,
                label,
            } => {
                let label = label.as_ref().expect("resolver assigns loop labels");
                let start_label = format!("for_start_{label}");
                let continue_label = format!("continue_{label}");
                let break_label = format!("break_{label}");
                match init {
                    ForInit::Declaration(decl) => self.lower_local_var_decl(decl)?,
                    ForInit::Expression(Some(expr)) => {
                        self.lower_expr(expr)?;
                    }
                    ForInit::Expression(None) => {}
                }
                self.emit(Instruction::Label(start_label.clone()));
                if let Some(cond) = cond {
                    let c = self.lower_expr(cond)?;
                    self.emit(Instruction::JumpIfZero {
                        cond: c,
                        target: break_label.clone(),
                    });
                }
                self.lower_stmt(body)?;
                self.emit(Instruction::Label(continue_label));
                if let Some(update) = update {
                    self.lower_expr(update)?;
                }
                self.emit(Instruction::Jump(start_label));
                self.emit(Instruction::Label(break_label));
                Ok(())
            }
            Stmt::Switch {
                cond,
                body,
                cases,
                has_default,
                label,
            } => {
                let label = label.as_ref().expect("resolver assigns switch labels");
                let break_label = format!("break_{label}");
                let c = self.lower_expr(cond)?;
                let switch_ty = self.type_of_expr(cond);
                for (value, case_label) in cases {
                    self.emit(Instruction::JumpIfEqual {
                        lhs: c.clone(),
                        rhs: self.constant_for_switch(*value, &switch_ty),
                        target: case_label.clone(),
                    });
                }
                if *has_default {
                    self.emit(Instruction::Jump(format!("default_{label}")));
                } else {
                    self.emit(Instruction::Jump(break_label.clone()));
                }
                self.lower_stmt(body)?;
                self.emit(Instruction::Label(break_label));
                Ok(())
            }
            Stmt::Case { stmt, label, .. } => {
                let label = label.as_ref().expect("resolver assigns case labels");
                self.emit(Instruction::Label(label.clone()));
                self.lower_stmt(stmt)
            }
            Stmt::Default { stmt, label } => {
                let label = label.as_ref().expect("resolver assigns default labels");
                self.emit(Instruction::Label(label.clone()));
                self.lower_stmt(stmt)
            }
        }
    }

    fn constant_for_switch(&self, value: i64, ty: &Type) -> Value {
        match ty {
            Type::Long => Value::Constant(ConstantValue::I64(value)),
            Type::ULong => Value::Constant(ConstantValue::U64(value as u64)),
            Type::UInt => Value::Constant(ConstantValue::U32(value as u32)),
            _ => Value::Constant(ConstantValue::I32(value as i32)),
        }
    }
}

fn lower_function(
    ctx: &CompileContext,
    symbols: &SymbolTable,
    decl: &ast::FunctionDeclaration,
    body: &ast::Block,
) -> Result<(FunctionDefinition, HashMap<String, Type>, Vec<StaticVariable>), CodeGenError> {
    let mut builder = Builder::new(ctx, symbols);
    for param in &decl.params {
        builder.var_types.insert(param.name.clone(), param.ty.clone());
    }
    builder.lower_block(body)?;
    // Every function falls off the end with an implicit `return 0;` (the
    // type checker accepts a `void`-in-effect fall-through for `int main`
    // and any function whose last statement isn't a `return`).
    builder.emit(Instruction::Return(Value::Constant(ConstantValue::I32(0))));

    let global = matches!(
        symbols.get(&decl.name).map(|s| &s.attrs),
        Some(IdentifierAttrs::Function { global: true, .. })
    );

    Ok((
        FunctionDefinition {
            name: decl.name.clone(),
            global,
            params: decl.params.iter().map(|p| p.name.clone()).collect(),
            body: builder.instructions,
        },
        builder.var_types,
        builder.extra_statics,
    ))
}

fn static_variable_for_symbol(name: &str, ty: &Type, global: bool, init: &InitialValue) -> Option<StaticVariable> {
    match init {
        InitialValue::NoInitializer => None,
        InitialValue::Tentative => Some(StaticVariable {
            name: name.to_string(),
            global,
            alignment: ty.alignment(),
            init: vec![ConstantValue::ZeroBytes(ty.size())],
        }),
        InitialValue::Initial(values) => Some(StaticVariable {
            name: name.to_string(),
            global,
            alignment: ty.alignment(),
            init: values.clone(),
        }),
    }
}

/// Lowers a type-checked program into TAC (spec.md §4.G).
///
/// Static variables are emitted from the symbol table in insertion order
/// (both file-scope and the alpha-renamed block-scope statics the resolver
/// already disambiguated) rather than by walking declarations again, so
/// every static gets exactly one `.data`/`.bss` entry regardless of how
/// many times its declaration appears in the source.
pub fn build(
    program: &AstProgram,
    symbols: &SymbolTable,
    ctx: &CompileContext,
) -> Result<Program, CodeGenError> {
    let mut items = Vec::new();
    let mut var_types = HashMap::new();

    for decl in &program.declarations {
        if let Declaration::Function(func) = decl {
            if let Some(body) = &func.body {
                let (def, locals, extra_statics) = lower_function(ctx, symbols, func, body)?;
                var_types.extend(locals);
                items.push(TopLevel::Function(def));
                for s in extra_statics {
                    items.push(TopLevel::StaticVariable(s));
                }
            }
        }
    }

    for (name, symbol) in symbols.iter_in_order() {
        if let IdentifierAttrs::Static { global, init } = &symbol.attrs {
            if let Some(sv) = static_variable_for_symbol(name, &symbol.ty, *global, init) {
                var_types.insert(name.clone(), symbol.ty.clone());
                items.push(TopLevel::StaticVariable(sv));
            }
        }
    }

    Ok(Program { items, var_types })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver;
    use crate::typechecker;

    fn build_program(source: &str) -> Program {
        let tokens = crate::lexer::tokenize(source).expect("lex");
        let mut program = crate::parser::parse(tokens).expect("parse");
        let ctx = CompileContext::new();
        resolver::resolve(&mut program, &ctx).expect("resolve");
        let symbols = typechecker::typecheck(&mut program).expect("typecheck");
        build(&program, &symbols, &ctx).expect("build")
    }

    fn only_function(program: &Program) -> &FunctionDefinition {
        program
            .items
            .iter()
            .find_map(|item| match item {
                TopLevel::Function(f) => Some(f),
                _ => None,
            })
            .expect("expected a function")
    }

    #[test]
    fn return_constant_lowers_to_single_return_instruction() {
        let program = build_program("int main(void) { return 2; }");
        let main = only_function(&program);
        assert!(matches!(
            main.body.first(),
            Some(Instruction::Return(Value::Constant(ConstantValue::I32(2))))
        ));
    }

    #[test]
    fn short_circuit_and_emits_conditional_jumps() {
        let program = build_program("int main(void) { return 1 && 0; }");
        let main = only_function(&program);
        let has_jump_if_zero = main
            .body
            .iter()
            .any(|i| matches!(i, Instruction::JumpIfZero { .. }));
        assert!(has_jump_if_zero);
    }

    #[test]
    fn switch_lowers_to_equality_dispatch_ladder() {
        let source = "int main(void) { int n = 1; switch (n) { case 0: return 0; default: return 1; } }";
        let program = build_program(source);
        let main = only_function(&program);
        let equal_count = main
            .body
            .iter()
            .filter(|i| matches!(i, Instruction::JumpIfEqual { .. }))
            .count();
        assert_eq!(equal_count, 1);
    }

    #[test]
    fn tentative_static_becomes_zero_initialized_data() {
        let source = "int counter; int main(void) { return counter; }";
        let program = build_program(source);
        let has_static = program.items.iter().any(|item| {
            matches!(
                item,
                TopLevel::StaticVariable(sv) if sv.name == "counter" && sv.init == vec![ConstantValue::ZeroBytes(4)]
            )
        });
        assert!(has_static);
    }

    #[test]
    fn repeated_double_literal_is_pooled_once() {
        let source = "int main(void) { double a = 1.5; double b = 1.5; return 0; }";
        let program = build_program(source);
        let double_statics = program
            .items
            .iter()
            .filter(|item| matches!(item, TopLevel::StaticVariable(sv) if sv.name.starts_with("dbl_")))
            .count();
        assert_eq!(double_statics, 1);
    }
}
