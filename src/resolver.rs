//! Semantic analyzer: three staged mutating traversals over the AST.
//!
//! 1. Identifier resolution — scope stack, alpha-renaming of automatic and
//!    block-static locals, lvalue checks.
//! 2. Label analysis — per-function label uniqueness and `goto` validity.
//! 3. Loop/switch labeling — generates the labels `break`/`continue`/`case`/
//!    `default` bind to, and collects each `switch`'s case table.
//!
//! Grounded on the teacher's `Resolver`, which already performs a staged,
//! multi-pass walk over a tree (there: include resolution; here: scope
//! resolution), generalized to identifier/label/loop semantics.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::ast::{
    Block, BlockItem, Declaration, Expr, ForInit, Program, Stmt, UnaryOp, VariableDeclaration,
};
use crate::context::CompileContext;
use crate::error::SemanticError;

fn err(message: impl Into<String>) -> SemanticError {
    SemanticError {
        message: message.into(),
    }
}

#[derive(Debug, Clone)]
struct ScopeEntry {
    unique_name: String,
    has_linkage: bool,
}

#[derive(Default)]
struct Scopes {
    stack: Vec<HashMap<String, ScopeEntry>>,
}

impl Scopes {
    fn push(&mut self) {
        self.stack.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.stack.pop();
    }

    fn declared_in_current(&self, name: &str) -> Option<&ScopeEntry> {
        self.stack.last().and_then(|scope| scope.get(name))
    }

    fn lookup(&self, name: &str) -> Option<&ScopeEntry> {
        self.stack.iter().rev().find_map(|scope| scope.get(name))
    }

    fn insert(&mut self, name: String, entry: ScopeEntry) {
        self.stack.last_mut().unwrap().insert(name, entry);
    }
}

/// Runs all three analysis stages over `program` in order, mutating it in
/// place. Stops at the first error, as spec.md §4.E/§7 require.
pub fn resolve(program: &mut Program, ctx: &CompileContext) -> Result<(), SemanticError> {
    resolve_identifiers(program, ctx)?;
    analyze_labels(program)?;
    label_loops_and_switches(program, ctx)?;
    Ok(())
}

// ---------------------------------------------------------------------
// Stage 1: identifier resolution
// ---------------------------------------------------------------------

fn resolve_identifiers(program: &mut Program, ctx: &CompileContext) -> Result<(), SemanticError> {
    let mut scopes = Scopes::default();
    scopes.push();

    for decl in &mut program.declarations {
        resolve_file_scope_declaration(decl, &mut scopes, ctx)?;
    }

    scopes.pop();
    Ok(())
}

fn resolve_file_scope_declaration(
    decl: &mut Declaration,
    scopes: &mut Scopes,
    ctx: &CompileContext,
) -> Result<(), SemanticError> {
    match decl {
        Declaration::Function(f) => {
            scopes.insert(
                f.name.clone(),
                ScopeEntry {
                    unique_name: f.name.clone(),
                    has_linkage: true,
                },
            );

            scopes.push();
            let mut seen_params = HashSet::new();
            for param in &mut f.params {
                if !seen_params.insert(param.name.clone()) {
                    return Err(err(format!("duplicate parameter name '{}'", param.name)));
                }
                let unique = ctx.fresh_unique(&param.name);
                scopes.insert(
                    param.name.clone(),
                    ScopeEntry {
                        unique_name: unique.clone(),
                        has_linkage: false,
                    },
                );
                param.name = unique;
            }

            if let Some(body) = &mut f.body {
                resolve_block_items(&mut body.items, scopes, ctx)?;
            }
            scopes.pop();
            Ok(())
        }
        Declaration::Variable(v) => {
            if let Some(existing) = scopes.declared_in_current(&v.name) {
                if !existing.has_linkage {
                    return Err(err(format!("redeclaration of '{}'", v.name)));
                }
            }
            scopes.insert(
                v.name.clone(),
                ScopeEntry {
                    unique_name: v.name.clone(),
                    has_linkage: true,
                },
            );
            if let Some(init) = &mut v.init {
                resolve_initializer(init, scopes)?;
            }
            Ok(())
        }
    }
}

fn resolve_block_items(
    items: &mut [BlockItem],
    scopes: &mut Scopes,
    ctx: &CompileContext,
) -> Result<(), SemanticError> {
    for item in items {
        match item {
            BlockItem::Declaration(decl) => resolve_local_declaration(decl, scopes, ctx)?,
            BlockItem::Statement(stmt) => resolve_stmt(stmt, scopes, ctx)?,
        }
    }
    Ok(())
}

fn resolve_local_declaration(
    decl: &mut Declaration,
    scopes: &mut Scopes,
    ctx: &CompileContext,
) -> Result<(), SemanticError> {
    match decl {
        Declaration::Function(f) => {
            if f.body.is_some() {
                return Err(err("nested function definitions are not allowed"));
            }
            scopes.insert(
                f.name.clone(),
                ScopeEntry {
                    unique_name: f.name.clone(),
                    has_linkage: true,
                },
            );
            Ok(())
        }
        Declaration::Variable(v) => resolve_local_variable_declaration(v, scopes, ctx),
    }
}

fn resolve_local_variable_declaration(
    v: &mut VariableDeclaration,
    scopes: &mut Scopes,
    ctx: &CompileContext,
) -> Result<(), SemanticError> {
    use crate::ast::Storage;

    if let Some(existing) = scopes.declared_in_current(&v.name) {
        let ok = matches!(v.storage, Storage::Extern) && existing.has_linkage;
        if !ok {
            return Err(err(format!("redeclaration of '{}'", v.name)));
        }
    }

    match v.storage {
        Storage::Extern => {
            if v.init.is_some() {
                return Err(err(format!(
                    "'{}' declared 'extern' with a block-scope initializer",
                    v.name
                )));
            }
            scopes.insert(
                v.name.clone(),
                ScopeEntry {
                    unique_name: v.name.clone(),
                    has_linkage: true,
                },
            );
        }
        Storage::Default | Storage::Static => {
            let unique = ctx.fresh_unique(&v.name);
            scopes.insert(
                v.name.clone(),
                ScopeEntry {
                    unique_name: unique.clone(),
                    has_linkage: false,
                },
            );
            v.name = unique;
            if let Some(init) = &mut v.init {
                resolve_initializer(init, scopes)?;
            }
        }
    }
    Ok(())
}

fn resolve_initializer(
    init: &mut crate::ast::Initializer,
    scopes: &mut Scopes,
) -> Result<(), SemanticError> {
    use crate::ast::Initializer;
    match init {
        Initializer::Single(expr) => resolve_expr(expr, scopes),
        Initializer::Compound(items) => {
            for item in items {
                resolve_initializer(item, scopes)?;
            }
            Ok(())
        }
    }
}

fn resolve_stmt(
    stmt: &mut Stmt,
    scopes: &mut Scopes,
    ctx: &CompileContext,
) -> Result<(), SemanticError> {
    match stmt {
        Stmt::Return(e) => resolve_expr(e, scopes),
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => {
            resolve_expr(cond, scopes)?;
            resolve_stmt(then_branch, scopes, ctx)?;
            if let Some(e) = else_branch {
                resolve_stmt(e, scopes, ctx)?;
            }
            Ok(())
        }
        Stmt::Goto(_) => Ok(()),
        Stmt::Labeled { stmt, .. } => resolve_stmt(stmt, scopes, ctx),
        Stmt::Block(block) => resolve_block(block, scopes, ctx),
        Stmt::Expression(e) => resolve_expr(e, scopes),
        Stmt::Null => Ok(()),
        Stmt::Break { .. } | Stmt::Continue { .. } => Ok(()),
        Stmt::While { cond, body, .. } => {
            resolve_expr(cond, scopes)?;
            resolve_stmt(body, scopes, ctx)
        }
        Stmt::DoWhile { body, cond, .. } => {
            resolve_stmt(body, scopes, ctx)?;
            resolve_expr(cond, scopes)
        }
        Stmt::For {
            init,
            cond,
            update,
            body,
            ..
        } => {
            scopes.push();
            match init {
                ForInit::Declaration(v) => resolve_local_variable_declaration(v, scopes, ctx)?,
                ForInit::Expression(Some(e)) => resolve_expr(e, scopes)?,
                ForInit::Expression(None) => {}
            }
            if let Some(c) = cond {
                resolve_expr(c, scopes)?;
            }
            if let Some(u) = update {
                resolve_expr(u, scopes)?;
            }
            resolve_stmt(body, scopes, ctx)?;
            scopes.pop();
            Ok(())
        }
        Stmt::Switch { cond, body, .. } => {
            resolve_expr(cond, scopes)?;
            resolve_stmt(body, scopes, ctx)
        }
        Stmt::Case { stmt, .. } => resolve_stmt(stmt, scopes, ctx),
        Stmt::Default { stmt, .. } => resolve_stmt(stmt, scopes, ctx),
    }
}

fn resolve_block(
    block: &mut Block,
    scopes: &mut Scopes,
    ctx: &CompileContext,
) -> Result<(), SemanticError> {
    scopes.push();
    resolve_block_items(&mut block.items, scopes, ctx)?;
    scopes.pop();
    Ok(())
}

fn resolve_expr(expr: &mut Expr, scopes: &Scopes) -> Result<(), SemanticError> {
    match expr {
        Expr::Constant { .. } => Ok(()),
        Expr::Variable { name, .. } => {
            let entry = scopes
                .lookup(name)
                .ok_or_else(|| err(format!("use of undeclared identifier '{name}'")))?;
            *name = entry.unique_name.clone();
            Ok(())
        }
        Expr::Cast { inner, .. } => resolve_expr(inner, scopes),
        Expr::Unary { op, inner, .. } => {
            resolve_expr(inner, scopes)?;
            if op.is_mutating() && !inner.is_lvalue() {
                return Err(err("operand of increment/decrement must be an lvalue"));
            }
            Ok(())
        }
        Expr::Binary { lhs, rhs, .. } => {
            resolve_expr(lhs, scopes)?;
            resolve_expr(rhs, scopes)
        }
        Expr::Assignment { lhs, rhs, .. } => {
            resolve_expr(lhs, scopes)?;
            resolve_expr(rhs, scopes)?;
            if !lhs.is_lvalue() {
                return Err(err("left side of assignment must be an lvalue"));
            }
            Ok(())
        }
        Expr::CompoundAssignment { lhs, rhs, .. } => {
            resolve_expr(lhs, scopes)?;
            resolve_expr(rhs, scopes)?;
            if !lhs.is_lvalue() {
                return Err(err("left side of compound assignment must be an lvalue"));
            }
            Ok(())
        }
        Expr::Conditional {
            cond,
            then_branch,
            else_branch,
            ..
        } => {
            resolve_expr(cond, scopes)?;
            resolve_expr(then_branch, scopes)?;
            resolve_expr(else_branch, scopes)
        }
        Expr::Call { name, args, .. } => {
            if scopes.lookup(name).is_none() {
                return Err(err(format!("call to undeclared function '{name}'")));
            }
            for arg in args {
                resolve_expr(arg, scopes)?;
            }
            Ok(())
        }
        Expr::Dereference { inner, .. } => resolve_expr(inner, scopes),
        Expr::AddressOf { inner, .. } => {
            resolve_expr(inner, scopes)?;
            if !inner.is_lvalue() {
                return Err(err("cannot take the address of a non-lvalue"));
            }
            Ok(())
        }
        Expr::Subscript { ptr, index, .. } => {
            resolve_expr(ptr, scopes)?;
            resolve_expr(index, scopes)
        }
    }
}

// ---------------------------------------------------------------------
// Stage 2: label analysis
// ---------------------------------------------------------------------

fn analyze_labels(program: &mut Program) -> Result<(), SemanticError> {
    for decl in &program.declarations {
        if let Declaration::Function(f) = decl {
            if let Some(body) = &f.body {
                let mut labels = HashSet::new();
                collect_labels(body, &mut labels)?;
                check_gotos(body, &labels)?;
            }
        }
    }
    Ok(())
}

fn collect_labels(block: &Block, labels: &mut HashSet<String>) -> Result<(), SemanticError> {
    for item in &block.items {
        if let BlockItem::Statement(stmt) = item {
            collect_labels_stmt(stmt, labels)?;
        }
    }
    Ok(())
}

fn collect_labels_stmt(stmt: &Stmt, labels: &mut HashSet<String>) -> Result<(), SemanticError> {
    match stmt {
        Stmt::Labeled { label, stmt } => {
            if !labels.insert(label.clone()) {
                return Err(err(format!("duplicate label '{label}'")));
            }
            collect_labels_stmt(stmt, labels)
        }
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => {
            collect_labels_stmt(then_branch, labels)?;
            if let Some(e) = else_branch {
                collect_labels_stmt(e, labels)?;
            }
            Ok(())
        }
        Stmt::Block(block) => collect_labels(block, labels),
        Stmt::While { body, .. } | Stmt::DoWhile { body, .. } | Stmt::For { body, .. } => {
            collect_labels_stmt(body, labels)
        }
        Stmt::Switch { body, .. } => collect_labels_stmt(body, labels),
        Stmt::Case { stmt, .. } | Stmt::Default { stmt, .. } => collect_labels_stmt(stmt, labels),
        _ => Ok(()),
    }
}

fn check_gotos(block: &Block, labels: &HashSet<String>) -> Result<(), SemanticError> {
    for item in &block.items {
        if let BlockItem::Statement(stmt) = item {
            check_gotos_stmt(stmt, labels)?;
        }
    }
    Ok(())
}

fn check_gotos_stmt(stmt: &Stmt, labels: &HashSet<String>) -> Result<(), SemanticError> {
    match stmt {
        Stmt::Goto(label) => {
            if !labels.contains(label) {
                Err(err(format!("goto to undefined label '{label}'")))
            } else {
                Ok(())
            }
        }
        Stmt::Labeled { stmt, .. } => check_gotos_stmt(stmt, labels),
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => {
            check_gotos_stmt(then_branch, labels)?;
            if let Some(e) = else_branch {
                check_gotos_stmt(e, labels)?;
            }
            Ok(())
        }
        Stmt::Block(block) => check_gotos(block, labels),
        Stmt::While { body, .. } | Stmt::DoWhile { body, .. } | Stmt::For { body, .. } => {
            check_gotos_stmt(body, labels)
        }
        Stmt::Switch { body, .. } => check_gotos_stmt(body, labels),
        Stmt::Case { stmt, .. } | Stmt::Default { stmt, .. } => check_gotos_stmt(stmt, labels),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------
// Stage 3: loop/switch labeling
// ---------------------------------------------------------------------

#[derive(Clone, Default)]
struct SwitchCollector {
    cases: Rc<RefCell<Vec<(i64, String)>>>,
    has_default: Rc<Cell<bool>>,
}

#[derive(Clone, Default)]
struct LoopSwitchCtx {
    break_label: Option<Rc<str>>,
    continue_label: Option<Rc<str>>,
    switch: Option<SwitchCollector>,
}

fn label_loops_and_switches(
    program: &mut Program,
    ctx: &CompileContext,
) -> Result<(), SemanticError> {
    for decl in &mut program.declarations {
        if let Declaration::Function(f) = decl {
            if let Some(body) = &mut f.body {
                let top = LoopSwitchCtx::default();
                label_block(body, ctx, &top)?;
            }
        }
    }
    Ok(())
}

fn label_block(
    block: &mut Block,
    ctx: &CompileContext,
    outer: &LoopSwitchCtx,
) -> Result<(), SemanticError> {
    for item in &mut block.items {
        if let BlockItem::Statement(stmt) = item {
            label_stmt(stmt, ctx, outer)?;
        }
    }
    Ok(())
}

fn label_stmt(
    stmt: &mut Stmt,
    ctx: &CompileContext,
    outer: &LoopSwitchCtx,
) -> Result<(), SemanticError> {
    match stmt {
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => {
            label_stmt(then_branch, ctx, outer)?;
            if let Some(e) = else_branch {
                label_stmt(e, ctx, outer)?;
            }
            Ok(())
        }
        Stmt::Labeled { stmt, .. } => label_stmt(stmt, ctx, outer),
        Stmt::Block(block) => label_block(block, ctx, outer),
        Stmt::Break { label } => {
            *label = Some(
                outer
                    .break_label
                    .clone()
                    .ok_or_else(|| err("'break' outside a loop or switch"))?,
            );
            Ok(())
        }
        Stmt::Continue { label } => {
            *label = Some(
                outer
                    .continue_label
                    .clone()
                    .ok_or_else(|| err("'continue' outside a loop"))?,
            );
            Ok(())
        }
        Stmt::While { body, label, .. } => {
            let loop_label: Rc<str> = Rc::from(ctx.fresh_label("while").as_str());
            *label = Some(loop_label.clone());
            let inner = LoopSwitchCtx {
                break_label: Some(loop_label.clone()),
                continue_label: Some(loop_label),
                switch: outer.switch.clone(),
            };
            label_stmt(body, ctx, &inner)
        }
        Stmt::DoWhile { body, label, .. } => {
            let loop_label: Rc<str> = Rc::from(ctx.fresh_label("do_while").as_str());
            *label = Some(loop_label.clone());
            let inner = LoopSwitchCtx {
                break_label: Some(loop_label.clone()),
                continue_label: Some(loop_label),
                switch: outer.switch.clone(),
            };
            label_stmt(body, ctx, &inner)
        }
        Stmt::For { body, label, .. } => {
            let loop_label: Rc<str> = Rc::from(ctx.fresh_label("for").as_str());
            *label = Some(loop_label.clone());
            let inner = LoopSwitchCtx {
                break_label: Some(loop_label.clone()),
                continue_label: Some(loop_label),
                switch: outer.switch.clone(),
            };
            label_stmt(body, ctx, &inner)
        }
        Stmt::Switch {
            body,
            cases,
            has_default,
            label,
            ..
        } => {
            let switch_label: Rc<str> = Rc::from(ctx.fresh_label("switch").as_str());
            *label = Some(switch_label.clone());
            let collector = SwitchCollector::default();
            let inner = LoopSwitchCtx {
                break_label: Some(switch_label),
                continue_label: outer.continue_label.clone(),
                switch: Some(collector.clone()),
            };
            label_stmt(body, ctx, &inner)?;
            *cases = collector.cases.borrow().clone();
            *has_default = collector.has_default.get();
            Ok(())
        }
        Stmt::Case { value, stmt, label } => {
            let collector = outer
                .switch
                .clone()
                .ok_or_else(|| err("'case' outside a switch statement"))?;
            if collector.cases.borrow().iter().any(|(v, _)| v == value) {
                return Err(err(format!("duplicate case value '{value}'")));
            }
            let case_label = ctx.fresh_label("case");
            collector
                .cases
                .borrow_mut()
                .push((*value, case_label.clone()));
            *label = Some(case_label);
            label_stmt(stmt, ctx, outer)
        }
        Stmt::Default { stmt, label } => {
            let collector = outer
                .switch
                .clone()
                .ok_or_else(|| err("'default' outside a switch statement"))?;
            if collector.has_default.replace(true) {
                return Err(err("multiple 'default' labels in one switch"));
            }
            let default_label = ctx.fresh_label("default");
            *label = Some(default_label);
            label_stmt(stmt, ctx, outer)
        }
        Stmt::Return(_)
        | Stmt::Goto(_)
        | Stmt::Expression(_)
        | Stmt::Null => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn resolve_src(src: &str) -> Result<Program, SemanticError> {
        let mut program = parse(tokenize(src).unwrap()).unwrap();
        let ctx = CompileContext::new();
        resolve(&mut program, &ctx)?;
        Ok(program)
    }

    #[test]
    fn renames_shadowed_locals() {
        let program = resolve_src(
            "int main(void) { int x = 1; { int x = 2; } return x; }",
        )
        .unwrap();
        let Declaration::Function(f) = &program.declarations[0] else {
            panic!()
        };
        let Some(BlockItem::Declaration(Declaration::Variable(outer))) =
            f.body.as_ref().unwrap().items.first()
        else {
            panic!()
        };
        assert_ne!(outer.name, "x");
    }

    #[test]
    fn rejects_undeclared_identifier() {
        assert!(resolve_src("int main(void) { return y; }").is_err());
    }

    #[test]
    fn rejects_break_outside_loop() {
        assert!(resolve_src("int main(void) { break; return 0; }").is_err());
    }

    #[test]
    fn rejects_duplicate_label() {
        assert!(resolve_src("int main(void) { a: a: return 0; }").is_err());
    }

    #[test]
    fn switch_collects_case_labels_including_duffs_device_nesting() {
        let program = resolve_src(
            "int main(void) { int n = 2; switch (n) { case 0: while (n) { case 1: n = 0; } default: break; } return 0; }",
        )
        .unwrap();
        let Declaration::Function(f) = &program.declarations[0] else {
            panic!()
        };
        let Some(BlockItem::Statement(Stmt::Switch { cases, has_default, .. })) =
            f.body.as_ref().unwrap().items.get(1)
        else {
            panic!()
        };
        assert_eq!(cases.len(), 2);
        assert!(has_default);
    }
}
