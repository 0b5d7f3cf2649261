//! Type checker / elaborator (spec.md §4.F).
//!
//! A consuming traversal: every `check_*` function takes its AST node by
//! value and returns the same shape with every expression's `ty` field
//! populated and every implicit conversion materialized as an explicit
//! `Cast` node. Along the way it populates the program symbol table with
//! attributes and resolved static initial values.

use std::rc::Rc;

use crate::ast::{
    Block, BlockItem, Declaration, Expr, ForInit, FunctionDeclaration, Initializer, Program,
    Stmt, UnaryOp, VariableDeclaration,
};
use crate::ast::Storage;
use crate::error::TypeError;
use crate::symbol::{IdentifierAttrs, InitialValue, Symbol, SymbolTable};
use crate::types::{ConstantValue, Type};

fn err(message: impl Into<String>) -> TypeError {
    TypeError {
        message: message.into(),
    }
}

fn promote(ty: Type) -> Type {
    if ty == Type::Char {
        Type::Int
    } else {
        ty
    }
}

fn common_type(a: &Type, b: &Type) -> Type {
    let a = promote(a.clone());
    let b = promote(b.clone());
    if a == b {
        return a;
    }
    if a == Type::Double || b == Type::Double {
        return Type::Double;
    }
    if a.size() == b.size() {
        return if matches!(a, Type::UInt | Type::ULong) {
            a
        } else {
            b
        };
    }
    if a.size() > b.size() {
        a
    } else {
        b
    }
}

fn is_null_pointer_constant(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Constant {
            value: ConstantValue::I32(0)
                | ConstantValue::I64(0)
                | ConstantValue::U32(0)
                | ConstantValue::U64(0),
            ..
        }
    )
}

fn cast_to(expr: Expr, target: Type) -> Expr {
    if expr.ty() == Some(&target) {
        return expr;
    }
    Expr::Cast {
        target: target.clone(),
        inner: Box::new(expr),
        ty: Some(target),
    }
}

fn convert_by_assignment(expr: Expr, to: &Type) -> Result<Expr, TypeError> {
    let from = expr.ty().cloned().expect("expression type checked");
    if &from == to {
        return Ok(expr);
    }
    if from.is_arithmetic() && to.is_arithmetic() {
        return Ok(cast_to(expr, to.clone()));
    }
    if to.is_pointer() && is_null_pointer_constant(&expr) {
        return Ok(cast_to(expr, to.clone()));
    }
    Err(err(format!(
        "cannot convert from '{from:?}' to '{to:?}' here"
    )))
}

/// Array-to-pointer decay (spec.md §4.F), applied after visiting any
/// subexpression except where the caller explicitly needs the array lvalue
/// (the operand of `&`).
fn decay(expr: Expr) -> Expr {
    let decayed_ty = match expr.ty() {
        Some(Type::Array { element, .. }) => Some(Type::Pointer {
            referenced: Rc::clone(element),
        }),
        _ => None,
    };
    match decayed_ty {
        Some(ty) => Expr::AddressOf {
            ty: Some(ty),
            inner: Box::new(expr),
        },
        None => expr,
    }
}

pub struct TypeChecker {
    pub symbols: SymbolTable,
    return_type: Option<Type>,
}

impl TypeChecker {
    pub fn new() -> Self {
        TypeChecker {
            symbols: SymbolTable::new(),
            return_type: None,
        }
    }

    fn check_decl(&mut self, decl: Declaration) -> Result<Declaration, TypeError> {
        match decl {
            Declaration::Function(f) => Ok(Declaration::Function(self.check_function(f)?)),
            Declaration::Variable(v) => Ok(Declaration::Variable(self.check_file_scope_var(v)?)),
        }
    }

    fn check_function(&mut self, mut f: FunctionDeclaration) -> Result<FunctionDeclaration, TypeError> {
        for param in &mut f.params {
            param.ty = param.ty.decay();
        }
        let fn_ty = Type::Function {
            params: f.params.iter().map(|p| p.ty.clone()).collect(),
            ret: match &f.ty {
                Type::Function { ret, .. } => ret.clone(),
                _ => unreachable!("parser always builds a Function type for a function decl"),
            },
        };
        f.ty = fn_ty.clone();

        let has_body = f.body.is_some();
        let global = !matches!(f.storage, Storage::Static);

        if let Some(existing) = self.symbols.get(&f.name) {
            if existing.ty != fn_ty {
                return Err(err(format!(
                    "conflicting declarations of function '{}'",
                    f.name
                )));
            }
            if let IdentifierAttrs::Function { defined, .. } = existing.attrs {
                if defined && has_body {
                    return Err(err(format!("redefinition of function '{}'", f.name)));
                }
            }
        }

        let already_defined = matches!(
            self.symbols.get(&f.name).map(|s| &s.attrs),
            Some(IdentifierAttrs::Function { defined: true, .. })
        );
        self.symbols.insert(
            f.name.clone(),
            Symbol {
                ty: fn_ty,
                attrs: IdentifierAttrs::Function {
                    defined: already_defined || has_body,
                    global,
                },
            },
        );

        if let Some(body) = f.body.take() {
            for param in &f.params {
                self.symbols.insert(
                    param.name.clone(),
                    Symbol {
                        ty: param.ty.clone(),
                        attrs: IdentifierAttrs::Local,
                    },
                );
            }
            let Type::Function { ret, .. } = &f.ty else {
                unreachable!()
            };
            let saved_return = self.return_type.replace((**ret).clone());
            f.body = Some(self.check_block(body)?);
            self.return_type = saved_return;
        }

        Ok(f)
    }

    fn check_file_scope_var(
        &mut self,
        mut v: VariableDeclaration,
    ) -> Result<VariableDeclaration, TypeError> {
        let init_value = match v.init.take() {
            Some(init) => {
                let normalized = self.normalize_initializer(init, &v.ty)?;
                let flattened = flatten_constant_initializer(&normalized, &v.ty)?;
                v.init = Some(normalized);
                InitialValue::Initial(flattened)
            }
            None => {
                if matches!(v.storage, Storage::Extern) {
                    InitialValue::NoInitializer
                } else {
                    InitialValue::Tentative
                }
            }
        };

        let global = !matches!(v.storage, Storage::Static);

        let merged_init = if let Some(existing) = self.symbols.get(&v.name) {
            if existing.ty != v.ty {
                return Err(err(format!("conflicting types for '{}'", v.name)));
            }
            let IdentifierAttrs::Static {
                global: existing_global,
                init: existing_init,
            } = &existing.attrs
            else {
                return Err(err(format!("redeclaration of '{}' as a different kind of symbol", v.name)));
            };
            if !matches!(v.storage, Storage::Extern) && *existing_global != global {
                return Err(err(format!(
                    "conflicting linkage for '{}'",
                    v.name
                )));
            }
            match (existing_init, &init_value) {
                (InitialValue::Initial(_), InitialValue::Initial(_)) => {
                    return Err(err(format!("redefinition of '{}'", v.name)))
                }
                (InitialValue::Initial(_), _) => existing_init.clone(),
                (_, InitialValue::Initial(_)) => init_value,
                (InitialValue::Tentative, _) => InitialValue::Tentative,
                (InitialValue::NoInitializer, other) => other.clone(),
            }
        } else {
            init_value
        };

        self.symbols.insert(
            v.name.clone(),
            Symbol {
                ty: v.ty.clone(),
                attrs: IdentifierAttrs::Static {
                    global,
                    init: merged_init,
                },
            },
        );
        Ok(v)
    }

    fn check_local_declaration(&mut self, decl: Declaration) -> Result<Declaration, TypeError> {
        match decl {
            Declaration::Function(f) => {
                if f.body.is_some() {
                    return Err(err("nested function definitions are not allowed"));
                }
                Ok(Declaration::Function(self.check_function(f)?))
            }
            Declaration::Variable(v) => {
                Ok(Declaration::Variable(self.check_local_var(v)?))
            }
        }
    }

    fn check_local_var(&mut self, mut v: VariableDeclaration) -> Result<VariableDeclaration, TypeError> {
        match v.storage {
            Storage::Extern => {
                if let Some(existing) = self.symbols.get(&v.name) {
                    if existing.ty != v.ty {
                        return Err(err(format!("conflicting types for '{}'", v.name)));
                    }
                } else {
                    self.symbols.insert(
                        v.name.clone(),
                        Symbol {
                            ty: v.ty.clone(),
                            attrs: IdentifierAttrs::Static {
                                global: true,
                                init: InitialValue::NoInitializer,
                            },
                        },
                    );
                }
                Ok(v)
            }
            Storage::Static => {
                let init_value = match v.init.take() {
                    Some(init) => {
                        let normalized = self.normalize_initializer(init, &v.ty)?;
                        let flattened = flatten_constant_initializer(&normalized, &v.ty)?;
                        v.init = Some(normalized);
                        InitialValue::Initial(flattened)
                    }
                    None => InitialValue::Initial(zero_constants_for(&v.ty)),
                };
                self.symbols.insert(
                    v.name.clone(),
                    Symbol {
                        ty: v.ty.clone(),
                        attrs: IdentifierAttrs::Static {
                            global: false,
                            init: init_value,
                        },
                    },
                );
                Ok(v)
            }
            Storage::Default => {
                self.symbols.insert(
                    v.name.clone(),
                    Symbol {
                        ty: v.ty.clone(),
                        attrs: IdentifierAttrs::Local,
                    },
                );
                if let Some(init) = v.init.take() {
                    v.init = Some(self.normalize_initializer(init, &v.ty)?);
                }
                Ok(v)
            }
        }
    }

    fn normalize_initializer(
        &mut self,
        init: Initializer,
        ty: &Type,
    ) -> Result<Initializer, TypeError> {
        match (init, ty) {
            (Initializer::Single(expr), _) if !ty.is_array() => {
                let checked = self.check_expr(expr)?;
                Ok(Initializer::Single(convert_by_assignment(checked, ty)?))
            }
            (Initializer::Compound(items), Type::Array { element, count }) => {
                if items.len() > *count {
                    return Err(err("too many elements in array initializer"));
                }
                let mut normalized = Vec::with_capacity(*count);
                for item in items {
                    normalized.push(self.normalize_initializer(item, element)?);
                }
                while normalized.len() < *count {
                    normalized.push(zero_initializer(element));
                }
                Ok(Initializer::Compound(normalized))
            }
            (Initializer::Single(_), Type::Array { .. }) => {
                Err(err("array must be initialized with a brace-enclosed list"))
            }
            (Initializer::Compound(_), _) => {
                Err(err("scalar initializer must not be a brace-enclosed list"))
            }
        }
    }

    fn check_block(&mut self, block: Block) -> Result<Block, TypeError> {
        let mut items = Vec::with_capacity(block.items.len());
        for item in block.items {
            items.push(self.check_block_item(item)?);
        }
        Ok(Block { items })
    }

    fn check_block_item(&mut self, item: BlockItem) -> Result<BlockItem, TypeError> {
        match item {
            BlockItem::Declaration(decl) => {
                Ok(BlockItem::Declaration(self.check_local_declaration(decl)?))
            }
            BlockItem::Statement(stmt) => Ok(BlockItem::Statement(self.check_stmt(stmt)?)),
        }
    }

    fn require_condition_type(&mut self, expr: Expr) -> Result<Expr, TypeError> {
        let checked = decay(self.check_expr(expr)?);
        let ty = checked.ty().expect("checked");
        if !(ty.is_arithmetic() || ty.is_pointer()) {
            return Err(err("condition must have arithmetic or pointer type"));
        }
        Ok(checked)
    }

    fn check_stmt(&mut self, stmt: Stmt) -> Result<Stmt, TypeError> {
        Ok(match stmt {
            Stmt::Return(expr) => {
                let checked = decay(self.check_expr(expr)?);
                let ret_ty = self
                    .return_type
                    .clone()
                    .expect("return only appears inside a function body");
                Stmt::Return(convert_by_assignment(checked, &ret_ty)?)
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => Stmt::If {
                cond: self.require_condition_type(cond)?,
                then_branch: Box::new(self.check_stmt(*then_branch)?),
                else_branch: else_branch
                    .map(|e| self.check_stmt(*e))
                    .transpose()?
                    .map(Box::new),
            },
            Stmt::Goto(label) => Stmt::Goto(label),
            Stmt::Labeled { label, stmt } => Stmt::Labeled {
                label,
                stmt: Box::new(self.check_stmt(*stmt)?),
            },
            Stmt::Block(block) => Stmt::Block(self.check_block(block)?),
            Stmt::Expression(expr) => Stmt::Expression(decay(self.check_expr(expr)?)),
            Stmt::Null => Stmt::Null,
            Stmt::Break { label } => Stmt::Break { label },
            Stmt::Continue { label } => Stmt::Continue { label },
            Stmt::While { cond, body, label } => Stmt::While {
                cond: self.require_condition_type(cond)?,
                body: Box::new(self.check_stmt(*body)?),
                label,
            },
            Stmt::DoWhile { body, cond, label } => Stmt::DoWhile {
                body: Box::new(self.check_stmt(*body)?),
                cond: self.require_condition_type(cond)?,
                label,
            },
            Stmt::For {
                init,
                cond,
                update,
                body,
                label,
            } => {
                let init = match init {
                    ForInit::Declaration(v) => ForInit::Declaration(self.check_local_var(v)?),
                    ForInit::Expression(Some(e)) => {
                        ForInit::Expression(Some(decay(self.check_expr(e)?)))
                    }
                    ForInit::Expression(None) => ForInit::Expression(None),
                };
                let cond = cond.map(|c| self.require_condition_type(c)).transpose()?;
                let update = update
                    .map(|u| Ok::<_, TypeError>(decay(self.check_expr(u)?)))
                    .transpose()?;
                Stmt::For {
                    init,
                    cond,
                    update,
                    body: Box::new(self.check_stmt(*body)?),
                    label,
                }
            }
            Stmt::Switch {
                cond,
                body,
                cases,
                has_default,
                label,
            } => {
                let cond = decay(self.check_expr(cond)?);
                if !cond.ty().unwrap().is_integer() {
                    return Err(err("switch condition must have integer type"));
                }
                Stmt::Switch {
                    cond,
                    body: Box::new(self.check_stmt(*body)?),
                    cases,
                    has_default,
                    label,
                }
            }
            Stmt::Case { value, stmt, label } => Stmt::Case {
                value,
                stmt: Box::new(self.check_stmt(*stmt)?),
                label,
            },
            Stmt::Default { stmt, label } => Stmt::Default {
                stmt: Box::new(self.check_stmt(*stmt)?),
                label,
            },
        })
    }

    /// Checks `expr` without applying array-to-pointer decay — used for the
    /// operand of `&`, which needs the array's own lvalue type.
    fn check_expr_no_decay(&mut self, expr: Expr) -> Result<Expr, TypeError> {
        Ok(match expr {
            Expr::Constant { value, .. } => {
                let ty = match &value {
                    ConstantValue::I32(_) => Type::Int,
                    ConstantValue::I64(_) => Type::Long,
                    ConstantValue::U32(_) => Type::UInt,
                    ConstantValue::U64(_) => Type::ULong,
                    ConstantValue::F64(_) => Type::Double,
                    ConstantValue::I8(_) | ConstantValue::U8(_) => Type::Char,
                    ConstantValue::StringInit { text, null_terminated } => {
                        Type::array_of(Type::Char, text.len() + usize::from(*null_terminated))
                    }
                    ConstantValue::ZeroBytes(_) | ConstantValue::PointerInit { .. } => Type::Int,
                };
                Expr::Constant {
                    value,
                    ty: Some(ty),
                }
            }
            Expr::Variable { name, .. } => {
                let symbol = self
                    .symbols
                    .get(&name)
                    .ok_or_else(|| err(format!("use of undeclared identifier '{name}'")))?;
                if symbol.ty.is_function() {
                    return Err(err(format!("'{name}' is a function, not a value")));
                }
                let ty = symbol.ty.clone();
                Expr::Variable { name, ty: Some(ty) }
            }
            Expr::Cast { target, inner, .. } => {
                let inner = decay(self.check_expr(*inner)?);
                if target.is_array() || target.is_function() {
                    return Err(err("invalid cast target type"));
                }
                Expr::Cast {
                    target: target.clone(),
                    inner: Box::new(inner),
                    ty: Some(target),
                }
            }
            Expr::Unary { op, inner, .. } => self.check_unary(op, *inner)?,
            Expr::Binary { op, lhs, rhs, .. } => self.check_binary(op, *lhs, *rhs)?,
            Expr::Assignment { lhs, rhs, .. } => {
                let lhs = self.check_expr_no_decay(*lhs)?;
                let rhs = decay(self.check_expr(*rhs)?);
                let lhs_ty = lhs.ty().cloned().unwrap();
                let rhs = convert_by_assignment(rhs, &lhs_ty)?;
                Expr::Assignment {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    ty: Some(lhs_ty),
                }
            }
            Expr::CompoundAssignment { op, lhs, rhs, .. } => {
                let lhs = self.check_expr_no_decay(*lhs)?;
                let rhs = decay(self.check_expr(*rhs)?);
                let lhs_ty = lhs.ty().cloned().unwrap();
                let rhs_ty = rhs.ty().cloned().unwrap();
                check_operand_kinds_for_op(op, &lhs_ty)?;
                check_operand_kinds_for_op(op, &rhs_ty)?;
                let inner_ty = common_type(&lhs_ty, &rhs_ty);
                Expr::CompoundAssignment {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    inner_ty: Some(inner_ty),
                    result_ty: Some(lhs_ty),
                }
            }
            Expr::Conditional {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                let cond = self.require_condition_type(*cond)?;
                let then_branch = decay(self.check_expr(*then_branch)?);
                let else_branch = decay(self.check_expr(*else_branch)?);
                let result_ty = self.join_branch_types(&then_branch, &else_branch)?;
                let then_branch = convert_by_assignment(then_branch, &result_ty)?;
                let else_branch = convert_by_assignment(else_branch, &result_ty)?;
                Expr::Conditional {
                    cond: Box::new(cond),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                    ty: Some(result_ty),
                }
            }
            Expr::Call { name, args, .. } => {
                let (params, ret) = {
                    let symbol = self
                        .symbols
                        .get(&name)
                        .ok_or_else(|| err(format!("call to undeclared function '{name}'")))?;
                    match &symbol.ty {
                        Type::Function { params, ret } => (params.clone(), (**ret).clone()),
                        _ => return Err(err(format!("'{name}' is not a function"))),
                    }
                };
                if args.len() != params.len() {
                    return Err(err(format!(
                        "'{name}' expects {} argument(s), got {}",
                        params.len(),
                        args.len()
                    )));
                }
                let mut checked_args = Vec::with_capacity(args.len());
                for (arg, param_ty) in args.into_iter().zip(params.iter()) {
                    let arg = decay(self.check_expr(arg)?);
                    checked_args.push(convert_by_assignment(arg, param_ty)?);
                }
                Expr::Call {
                    name,
                    args: checked_args,
                    ty: Some(ret),
                }
            }
            Expr::Dereference { inner, .. } => {
                let inner = decay(self.check_expr(*inner)?);
                let Type::Pointer { referenced } = inner.ty().unwrap().clone() else {
                    return Err(err("cannot dereference a non-pointer value"));
                };
                Expr::Dereference {
                    inner: Box::new(inner),
                    ty: Some((*referenced).clone()),
                }
            }
            Expr::AddressOf { inner, .. } => {
                let inner = self.check_expr_no_decay(*inner)?;
                if !inner.is_lvalue() {
                    return Err(err("cannot take the address of a non-lvalue"));
                }
                let referenced = inner.ty().cloned().unwrap();
                Expr::AddressOf {
                    ty: Some(Type::pointer_to(referenced)),
                    inner: Box::new(inner),
                }
            }
            Expr::Subscript { ptr, index, .. } => {
                let ptr = decay(self.check_expr(*ptr)?);
                let index = decay(self.check_expr(*index)?);
                let Type::Pointer { referenced } = ptr.ty().unwrap().clone() else {
                    return Err(err("subscript requires a pointer or array operand"));
                };
                if !index.ty().unwrap().is_integer() {
                    return Err(err("array subscript must have integer type"));
                }
                Expr::Subscript {
                    ptr: Box::new(ptr),
                    index: Box::new(index),
                    ty: Some((*referenced).clone()),
                }
            }
        })
    }

    fn check_expr(&mut self, expr: Expr) -> Result<Expr, TypeError> {
        self.check_expr_no_decay(expr)
    }

    fn join_branch_types(&self, a: &Expr, b: &Expr) -> Result<Type, TypeError> {
        let ta = a.ty().unwrap();
        let tb = b.ty().unwrap();
        if ta == tb {
            return Ok(ta.clone());
        }
        if ta.is_arithmetic() && tb.is_arithmetic() {
            return Ok(common_type(ta, tb));
        }
        if ta.is_pointer() && is_null_pointer_constant(b) {
            return Ok(ta.clone());
        }
        if tb.is_pointer() && is_null_pointer_constant(a) {
            return Ok(tb.clone());
        }
        Err(err("branches of conditional expression have incompatible types"))
    }

    fn check_unary(&mut self, op: UnaryOp, inner: Expr) -> Result<Expr, TypeError> {
        let checked = decay(self.check_expr(inner)?);
        let inner_ty = checked.ty().cloned().unwrap();
        match op {
            UnaryOp::Negate => {
                if !inner_ty.is_arithmetic() {
                    return Err(err("unary '-' requires an arithmetic operand"));
                }
                let result_ty = promote(inner_ty);
                let checked = cast_to(checked, result_ty.clone());
                Ok(Expr::Unary {
                    op,
                    inner: Box::new(checked),
                    ty: Some(result_ty),
                })
            }
            UnaryOp::Complement => {
                if !inner_ty.is_integer() {
                    return Err(err("unary '~' requires an integer operand"));
                }
                let result_ty = promote(inner_ty);
                let checked = cast_to(checked, result_ty.clone());
                Ok(Expr::Unary {
                    op,
                    inner: Box::new(checked),
                    ty: Some(result_ty),
                })
            }
            UnaryOp::Not => {
                if !(inner_ty.is_arithmetic() || inner_ty.is_pointer()) {
                    return Err(err("unary '!' requires a scalar operand"));
                }
                Ok(Expr::Unary {
                    op,
                    inner: Box::new(checked),
                    ty: Some(Type::Int),
                })
            }
            UnaryOp::PreIncrement | UnaryOp::PreDecrement | UnaryOp::PostIncrement | UnaryOp::PostDecrement => {
                if !checked.is_lvalue() {
                    return Err(err("operand of increment/decrement must be an lvalue"));
                }
                if !(inner_ty.is_arithmetic() || inner_ty.is_pointer()) {
                    return Err(err("operand of increment/decrement must be arithmetic or pointer"));
                }
                Ok(Expr::Unary {
                    op,
                    inner: Box::new(checked),
                    ty: Some(inner_ty),
                })
            }
        }
    }

    fn check_binary(&mut self, op: crate::ast::BinaryOp, lhs: Expr, rhs: Expr) -> Result<Expr, TypeError> {
        use crate::ast::BinaryOp::*;
        let lhs = decay(self.check_expr(lhs)?);
        let rhs = decay(self.check_expr(rhs)?);
        let lhs_ty = lhs.ty().cloned().unwrap();
        let rhs_ty = rhs.ty().cloned().unwrap();

        if matches!(op, And | Or) {
            if !((lhs_ty.is_arithmetic() || lhs_ty.is_pointer())
                && (rhs_ty.is_arithmetic() || rhs_ty.is_pointer()))
            {
                return Err(err("operands of '&&'/'||' must be scalar"));
            }
            return Ok(Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                ty: Some(Type::Int),
            });
        }

        if matches!(op, ShiftLeft | ShiftRight) {
            if !(lhs_ty.is_integer() && rhs_ty.is_integer()) {
                return Err(err("shift operands must have integer type"));
            }
            let result_ty = promote(lhs_ty);
            let lhs = cast_to(lhs, result_ty.clone());
            let rhs = cast_to(rhs, Type::Int);
            return Ok(Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                ty: Some(result_ty),
            });
        }

        if op.is_bitwise() || matches!(op, Remainder) {
            if !(lhs_ty.is_integer() && rhs_ty.is_integer()) {
                return Err(err("operator requires integer operands"));
            }
            let common = common_type(&lhs_ty, &rhs_ty);
            let lhs = cast_to(lhs, common.clone());
            let rhs = cast_to(rhs, common.clone());
            return Ok(Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                ty: Some(common),
            });
        }

        if op.is_relational() {
            if lhs_ty.is_pointer() || rhs_ty.is_pointer() {
                let ty = self.join_branch_types(&lhs, &rhs)?;
                let lhs = convert_by_assignment(lhs, &ty)?;
                let rhs = convert_by_assignment(rhs, &ty)?;
                return Ok(Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    ty: Some(Type::Int),
                });
            }
            if !(lhs_ty.is_arithmetic() && rhs_ty.is_arithmetic()) {
                return Err(err("comparison requires arithmetic or pointer operands"));
            }
            let common = common_type(&lhs_ty, &rhs_ty);
            let lhs = cast_to(lhs, common.clone());
            let rhs = cast_to(rhs, common);
            return Ok(Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                ty: Some(Type::Int),
            });
        }

        // Add, Subtract, Multiply, Divide.
        if lhs_ty.is_pointer() && rhs_ty.is_integer() && matches!(op, Add | Subtract) {
            return Ok(Expr::Binary {
                op,
                ty: Some(lhs_ty),
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        if rhs_ty.is_pointer() && lhs_ty.is_integer() && matches!(op, Add) {
            return Ok(Expr::Binary {
                op,
                ty: Some(rhs_ty),
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        if lhs_ty.is_pointer() && rhs_ty.is_pointer() && matches!(op, Subtract) {
            if lhs_ty != rhs_ty {
                return Err(err("pointer subtraction requires identical pointer types"));
            }
            return Ok(Expr::Binary {
                op,
                ty: Some(Type::Long),
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        if !(lhs_ty.is_arithmetic() && rhs_ty.is_arithmetic()) {
            return Err(err("operator requires arithmetic operands"));
        }
        let common = common_type(&lhs_ty, &rhs_ty);
        let lhs = cast_to(lhs, common.clone());
        let rhs = cast_to(rhs, common.clone());
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            ty: Some(common),
        })
    }
}

impl Default for TypeChecker {
    fn default() -> Self {
        Self::new()
    }
}

fn check_operand_kinds_for_op(op: crate::ast::BinaryOp, ty: &Type) -> Result<(), TypeError> {
    use crate::ast::BinaryOp::*;
    if matches!(op, Remainder | BitAnd | BitOr | BitXor | ShiftLeft | ShiftRight) && !ty.is_integer()
    {
        return Err(err("operator requires integer operands"));
    }
    Ok(())
}

fn zero_initializer(ty: &Type) -> Initializer {
    match ty {
        Type::Array { element, count } => {
            Initializer::Compound(vec![zero_initializer(element); *count])
        }
        _ => Initializer::Single(Expr::Constant {
            value: ConstantValue::I32(0),
            ty: None,
        }),
    }
}

fn zero_constants_for(ty: &Type) -> Vec<ConstantValue> {
    match ty {
        Type::Array { element, count } => {
            let mut v = Vec::new();
            for _ in 0..*count {
                v.extend(zero_constants_for(element));
            }
            v
        }
        other => vec![ConstantValue::ZeroBytes(other.size())],
    }
}

fn const_eval(expr: &Expr) -> Result<ConstantValue, TypeError> {
    match expr {
        Expr::Constant { value, .. } => Ok(value.clone()),
        Expr::Unary {
            op: UnaryOp::Negate,
            inner,
            ty,
        } => {
            let v = const_eval(inner)?;
            Ok(negate_constant(&v, ty.as_ref().unwrap()))
        }
        Expr::Cast { target, inner, .. } => {
            let v = const_eval(inner)?;
            Ok(coerce_constant_to(&v, target))
        }
        _ => Err(err("initializer element is not a compile-time constant")),
    }
}

fn negate_constant(value: &ConstantValue, ty: &Type) -> ConstantValue {
    match (value, ty) {
        (ConstantValue::F64(v), _) => ConstantValue::F64(-v),
        (_, Type::Double) => ConstantValue::F64(-as_f64(value)),
        _ => coerce_constant_to(&ConstantValue::I64(-as_i64(value)), ty),
    }
}

fn as_i64(value: &ConstantValue) -> i64 {
    match value {
        ConstantValue::I8(v) => *v as i64,
        ConstantValue::U8(v) => *v as i64,
        ConstantValue::I32(v) => *v as i64,
        ConstantValue::U32(v) => *v as i64,
        ConstantValue::I64(v) => *v,
        ConstantValue::U64(v) => *v as i64,
        ConstantValue::F64(v) => *v as i64,
        _ => 0,
    }
}

fn as_f64(value: &ConstantValue) -> f64 {
    match value {
        ConstantValue::F64(v) => *v,
        other => as_i64(other) as f64,
    }
}

fn coerce_constant_to(value: &ConstantValue, ty: &Type) -> ConstantValue {
    match ty {
        Type::Int => ConstantValue::I32(as_i64(value) as i32),
        Type::Long => ConstantValue::I64(as_i64(value)),
        Type::UInt => ConstantValue::U32(as_i64(value) as u32),
        Type::ULong => ConstantValue::U64(as_i64(value) as u64),
        Type::Char => ConstantValue::I8(as_i64(value) as i8),
        Type::Double => ConstantValue::F64(as_f64(value)),
        Type::Pointer { .. } => {
            let n = as_i64(value);
            if n == 0 {
                ConstantValue::ZeroBytes(8)
            } else {
                ConstantValue::I64(n)
            }
        }
        Type::Array { .. } | Type::Function { .. } => value.clone(),
    }
}

fn flatten_constant_initializer(
    init: &Initializer,
    ty: &Type,
) -> Result<Vec<ConstantValue>, TypeError> {
    match (init, ty) {
        (Initializer::Single(expr), _) => {
            let value = const_eval(expr)?;
            Ok(vec![coerce_constant_to(&value, ty)])
        }
        (Initializer::Compound(items), Type::Array { element, .. }) => {
            let mut out = Vec::new();
            for item in items {
                out.extend(flatten_constant_initializer(item, element)?);
            }
            Ok(out)
        }
        (Initializer::Compound(_), _) => {
            Err(err("brace-enclosed initializer used for a scalar"))
        }
    }
}

/// Type-checks `program` in place, returning the populated program symbol
/// table (function/static attributes and resolved initial values).
pub fn typecheck(program: &mut Program) -> Result<SymbolTable, TypeError> {
    let mut checker = TypeChecker::new();
    let decls = std::mem::take(&mut program.declarations);
    let mut checked = Vec::with_capacity(decls.len());
    for decl in decls {
        checked.push(checker.check_decl(decl)?);
    }
    program.declarations = checked;
    Ok(checker.symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;
    use crate::resolver::resolve;
    use crate::context::CompileContext;

    fn check_src(src: &str) -> Result<(Program, SymbolTable), TypeError> {
        let mut program = parse(tokenize(src).unwrap()).unwrap();
        let ctx = CompileContext::new();
        resolve(&mut program, &ctx).unwrap();
        let symbols = typecheck(&mut program)?;
        Ok((program, symbols))
    }

    #[test]
    fn infers_arithmetic_common_type() {
        let (program, _) = check_src("int main(void) { long x; x = 1 + 2L; return 0; }").unwrap();
        let Declaration::Function(f) = &program.declarations[0] else {
            panic!()
        };
        let Some(BlockItem::Statement(Stmt::Expression(Expr::Assignment { rhs, .. }))) =
            f.body.as_ref().unwrap().items.get(1)
        else {
            panic!()
        };
        assert_eq!(rhs.ty(), Some(&Type::Long));
    }

    #[test]
    fn rejects_bitwise_on_double() {
        assert!(check_src("int main(void) { double x; return (int)(x & 1.0); }").is_err());
    }

    #[test]
    fn tentative_definition_resolves_to_zero() {
        let (_, symbols) = check_src("int x; int main(void) { x = 5; return x; }").unwrap();
        let symbol = symbols.get("x").unwrap();
        assert!(matches!(
            symbol.attrs,
            IdentifierAttrs::Static {
                init: InitialValue::Tentative,
                ..
            }
        ));
    }

    #[test]
    fn array_initializer_is_zero_padded() {
        let (program, _) = check_src("int a[3] = {1, 2}; int main(void) { return a[0]; }").unwrap();
        let Declaration::Variable(v) = &program.declarations[0] else {
            panic!()
        };
        let Some(Initializer::Compound(items)) = &v.init else {
            panic!()
        };
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn null_pointer_constant_converts_to_any_pointer_type() {
        let (program, _) =
            check_src("int main(void) { int *p; p = 0; return 0; }").unwrap();
        let Declaration::Function(f) = &program.declarations[0] else {
            panic!()
        };
        let Some(BlockItem::Statement(Stmt::Expression(Expr::Assignment { rhs, .. }))) =
            f.body.as_ref().unwrap().items.get(1)
        else {
            panic!()
        };
        assert_eq!(rhs.ty(), Some(&Type::pointer_to(Type::Int)));
    }

    #[test]
    fn rejects_redefinition_of_function() {
        assert!(check_src(
            "int f(void) { return 1; } int f(void) { return 2; } int main(void) { return f(); }"
        )
        .is_err());
    }
}
