//! Recursive-descent parser with precedence climbing for expressions.
//!
//! Grounded on the tokenizer/parser split of the original ast_builder: a
//! `Parser` holds the token stream and a cursor, primary forms are parsed
//! directly, and binary operators are folded in by precedence level rather
//! than one recursive function per level.

use crate::ast::{
    Block, BlockItem, Declaration, Expr, ForInit, FunctionDeclaration, Initializer, Param,
    Program, Storage, Stmt, UnaryOp, VariableDeclaration,
};
use crate::ast::BinaryOp;
use crate::error::ParseError;
use crate::token::{Token, TokenKind};
use crate::types::{ConstantValue, Type};

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Lowest precedence a binary operator may have; used as the floor for
/// top-level expression parsing and for the conditional's middle arm.
const LOWEST: u8 = 0;

fn binary_op_and_precedence(text: &str) -> Option<(BinaryOp, u8)> {
    use BinaryOp::*;
    Some(match text {
        "||" => (Or, 5),
        "&&" => (And, 10),
        "|" => (BitOr, 15),
        "^" => (BitXor, 20),
        "&" => (BitAnd, 25),
        "==" => (Equal, 30),
        "!=" => (NotEqual, 30),
        "<" => (LessThan, 35),
        ">" => (GreaterThan, 35),
        "<=" => (LessOrEqual, 35),
        ">=" => (GreaterOrEqual, 35),
        "<<" => (ShiftLeft, 40),
        ">>" => (ShiftRight, 40),
        "+" => (Add, 45),
        "-" => (Subtract, 45),
        "*" => (Multiply, 50),
        "/" => (Divide, 50),
        "%" => (Remainder, 50),
        _ => return None,
    })
}

fn compound_assignment_op(text: &str) -> Option<BinaryOp> {
    use BinaryOp::*;
    Some(match text {
        "+=" => Add,
        "-=" => Subtract,
        "*=" => Multiply,
        "/=" => Divide,
        "%=" => Remainder,
        "&=" => BitAnd,
        "|=" => BitOr,
        "^=" => BitXor,
        "<<=" => ShiftLeft,
        ">>=" => ShiftRight,
        _ => return None,
    })
}

const TYPE_KEYWORDS: &[&str] = &["void", "char", "int", "long", "double", "unsigned", "signed"];

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn current_line(&self) -> Option<usize> {
        self.peek().map(|t| t.line).or_else(|| self.tokens.last().map(|t| t.line))
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            line: self.current_line(),
        }
    }

    fn check(&self, kind: TokenKind, text: &str) -> bool {
        self.peek().is_some_and(|t| t.is(kind, text))
    }

    fn at_eof(&self) -> bool {
        self.peek().is_none()
    }

    fn expect(&mut self, kind: TokenKind, text: &str) -> Result<Token, ParseError> {
        if self.check(kind, text) {
            Ok(self.advance().unwrap())
        } else {
            Err(self.err(format!("expected '{text}'")))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(t) if t.kind == TokenKind::Identifier => {
                let text = t.text.clone();
                self.advance();
                Ok(text)
            }
            _ => Err(self.err("expected identifier")),
        }
    }

    fn is_type_specifier(&self) -> bool {
        self.peek()
            .is_some_and(|t| t.kind == TokenKind::Keyword && TYPE_KEYWORDS.contains(&t.text.as_str()))
    }

    fn is_storage_specifier(&self) -> bool {
        self.peek()
            .is_some_and(|t| t.kind == TokenKind::Keyword && (t.text == "static" || t.text == "extern"))
    }

    /// Consumes a run of type specifiers and at most one storage class
    /// specifier, in any order, per spec.md §4.D.
    fn parse_specifiers(&mut self) -> Result<(Type, Storage), ParseError> {
        let mut type_words: Vec<String> = Vec::new();
        let mut storage = Storage::Default;
        let mut saw_storage = false;

        loop {
            if self.is_type_specifier() {
                type_words.push(self.advance().unwrap().text);
            } else if self.is_storage_specifier() {
                if saw_storage {
                    return Err(self.err("at most one storage-class specifier is allowed"));
                }
                saw_storage = true;
                let word = self.advance().unwrap().text;
                storage = if word == "static" {
                    Storage::Static
                } else {
                    Storage::Extern
                };
            } else {
                break;
            }
        }

        if type_words.is_empty() {
            return Err(self.err("expected a type specifier"));
        }

        let ty = Self::resolve_base_type(&type_words).map_err(|m| self.err(m))?;
        Ok((ty, storage))
    }

    fn resolve_base_type(words: &[String]) -> Result<Type, String> {
        let mut has_unsigned = false;
        let mut has_long = false;
        let mut core: Option<&str> = None;

        for w in words {
            match w.as_str() {
                "unsigned" => has_unsigned = true,
                "signed" => {}
                "long" => has_long = true,
                other => {
                    if core.is_some() && core != Some(other) {
                        return Err(format!("conflicting type specifiers: {words:?}"));
                    }
                    core = Some(other);
                }
            }
        }

        Ok(match (core, has_long, has_unsigned) {
            (Some("double"), _, _) => Type::Double,
            (Some("char"), _, _) => Type::Char,
            (Some("void"), _, _) => {
                return Err("void is only valid as a function's return or parameter type".into())
            }
            (None, true, true) | (Some("int"), true, true) => Type::ULong,
            (None, true, false) | (Some("int"), true, false) => Type::Long,
            (None, false, true) | (Some("int"), false, true) => Type::UInt,
            (None, false, false) | (Some("int"), false, false) => Type::Int,
            _ => return Err(format!("unsupported type specifiers: {words:?}")),
        })
    }

    /// Parses pointer/array/function declarator suffixes around an
    /// identifier, producing the identifier name and the fully-assembled
    /// type built outward from `base`.
    fn parse_declarator(&mut self, base: Type) -> Result<(String, Type, Option<Vec<Param>>), ParseError> {
        let mut ty = base;
        while self.check(TokenKind::Operator, "*") {
            self.advance();
            ty = Type::pointer_to(ty);
        }

        let name = self.expect_identifier()?;

        let mut params = None;
        if self.check(TokenKind::Punctuator, "(") {
            self.advance();
            params = Some(self.parse_param_list()?);
            self.expect(TokenKind::Punctuator, ")")?;
        } else {
            while self.check(TokenKind::Punctuator, "[") {
                self.advance();
                let count_tok = self.peek().cloned();
                let count = match count_tok {
                    Some(t) if t.kind == TokenKind::NumericLiteral => {
                        self.advance();
                        t.text
                            .trim_end_matches(|c: char| c == 'l' || c == 'L' || c == 'u' || c == 'U')
                            .parse::<usize>()
                            .map_err(|_| self.err("invalid array size"))?
                    }
                    _ => return Err(self.err("expected array size")),
                };
                self.expect(TokenKind::Punctuator, "]")?;
                ty = Type::array_of(ty, count);
            }
        }

        Ok((name, ty, params))
    }

    fn parse_param_list(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        if self.check(TokenKind::Keyword, "void") && self.peek_at(1).is_some_and(|t| t.is(TokenKind::Punctuator, ")")) {
            self.advance();
            return Ok(params);
        }
        if self.check(TokenKind::Punctuator, ")") {
            return Ok(params);
        }
        loop {
            let (base, _storage) = self.parse_specifiers()?;
            let (name, ty, _) = self.parse_declarator(base)?;
            params.push(Param { name, ty });
            if self.check(TokenKind::Punctuator, ",") {
                self.advance();
            } else {
                break;
            }
        }
        Ok(params)
    }

    fn is_declaration_start(&self) -> bool {
        self.is_type_specifier() || self.is_storage_specifier()
    }

    fn parse_declaration(&mut self) -> Result<Declaration, ParseError> {
        let (base, storage) = self.parse_specifiers()?;
        let (name, ty, params) = self.parse_declarator(base)?;

        if let Some(params) = params {
            let body = if self.check(TokenKind::Punctuator, "{") {
                Some(self.parse_block()?)
            } else {
                self.expect(TokenKind::Punctuator, ";")?;
                None
            };
            let fn_ty = Type::Function {
                params: params.iter().map(|p| p.ty.clone()).collect(),
                ret: Box::new(ty),
            };
            return Ok(Declaration::Function(FunctionDeclaration {
                name,
                params,
                body,
                ty: fn_ty,
                storage,
            }));
        }

        let init = if self.check(TokenKind::Operator, "=") {
            self.advance();
            Some(self.parse_initializer()?)
        } else {
            None
        };
        self.expect(TokenKind::Punctuator, ";")?;
        Ok(Declaration::Variable(VariableDeclaration {
            name,
            init,
            ty,
            storage,
        }))
    }

    fn parse_initializer(&mut self) -> Result<Initializer, ParseError> {
        if self.check(TokenKind::Punctuator, "{") {
            self.advance();
            let mut items = Vec::new();
            if !self.check(TokenKind::Punctuator, "}") {
                loop {
                    items.push(self.parse_initializer()?);
                    if self.check(TokenKind::Operator, ",") {
                        self.advance();
                        if self.check(TokenKind::Punctuator, "}") {
                            break;
                        }
                    } else {
                        break;
                    }
                }
            }
            self.expect(TokenKind::Punctuator, "}")?;
            Ok(Initializer::Compound(items))
        } else {
            Ok(Initializer::Single(self.parse_expression(LOWEST)?))
        }
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        self.expect(TokenKind::Punctuator, "{")?;
        let mut items = Vec::new();
        while !self.check(TokenKind::Punctuator, "}") {
            if self.at_eof() {
                return Err(self.err("unterminated block"));
            }
            items.push(self.parse_block_item()?);
        }
        self.expect(TokenKind::Punctuator, "}")?;
        Ok(Block { items })
    }

    fn parse_block_item(&mut self) -> Result<BlockItem, ParseError> {
        if self.is_declaration_start() {
            Ok(BlockItem::Declaration(self.parse_declaration()?))
        } else {
            Ok(BlockItem::Statement(self.parse_statement()?))
        }
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        if self.check(TokenKind::Punctuator, "{") {
            return Ok(Stmt::Block(self.parse_block()?));
        }
        if self.check(TokenKind::Punctuator, ";") {
            self.advance();
            return Ok(Stmt::Null);
        }
        if self.check(TokenKind::Keyword, "return") {
            self.advance();
            let expr = self.parse_expression(LOWEST)?;
            self.expect(TokenKind::Punctuator, ";")?;
            return Ok(Stmt::Return(expr));
        }
        if self.check(TokenKind::Keyword, "if") {
            self.advance();
            self.expect(TokenKind::Punctuator, "(")?;
            let cond = self.parse_expression(LOWEST)?;
            self.expect(TokenKind::Punctuator, ")")?;
            let then_branch = Box::new(self.parse_statement()?);
            let else_branch = if self.check(TokenKind::Keyword, "else") {
                self.advance();
                Some(Box::new(self.parse_statement()?))
            } else {
                None
            };
            return Ok(Stmt::If {
                cond,
                then_branch,
                else_branch,
            });
        }
        if self.check(TokenKind::Keyword, "goto") {
            self.advance();
            let label = self.expect_identifier()?;
            self.expect(TokenKind::Punctuator, ";")?;
            return Ok(Stmt::Goto(label));
        }
        if self.check(TokenKind::Keyword, "break") {
            self.advance();
            self.expect(TokenKind::Punctuator, ";")?;
            return Ok(Stmt::Break { label: None });
        }
        if self.check(TokenKind::Keyword, "continue") {
            self.advance();
            self.expect(TokenKind::Punctuator, ";")?;
            return Ok(Stmt::Continue { label: None });
        }
        if self.check(TokenKind::Keyword, "while") {
            self.advance();
            self.expect(TokenKind::Punctuator, "(")?;
            let cond = self.parse_expression(LOWEST)?;
            self.expect(TokenKind::Punctuator, ")")?;
            let body = Box::new(self.parse_statement()?);
            return Ok(Stmt::While {
                cond,
                body,
                label: None,
            });
        }
        if self.check(TokenKind::Keyword, "do") {
            self.advance();
            let body = Box::new(self.parse_statement()?);
            self.expect(TokenKind::Keyword, "while")?;
            self.expect(TokenKind::Punctuator, "(")?;
            let cond = self.parse_expression(LOWEST)?;
            self.expect(TokenKind::Punctuator, ")")?;
            self.expect(TokenKind::Punctuator, ";")?;
            return Ok(Stmt::DoWhile {
                body,
                cond,
                label: None,
            });
        }
        if self.check(TokenKind::Keyword, "for") {
            self.advance();
            self.expect(TokenKind::Punctuator, "(")?;
            let init = if self.is_declaration_start() {
                let (base, storage) = self.parse_specifiers()?;
                let (name, ty, params) = self.parse_declarator(base)?;
                if params.is_some() {
                    return Err(self.err("function declarations are not allowed in a for-init"));
                }
                let init = if self.check(TokenKind::Operator, "=") {
                    self.advance();
                    Some(self.parse_initializer()?)
                } else {
                    None
                };
                self.expect(TokenKind::Punctuator, ";")?;
                ForInit::Declaration(VariableDeclaration {
                    name,
                    init,
                    ty,
                    storage,
                })
            } else if self.check(TokenKind::Punctuator, ";") {
                self.advance();
                ForInit::Expression(None)
            } else {
                let expr = self.parse_expression(LOWEST)?;
                self.expect(TokenKind::Punctuator, ";")?;
                ForInit::Expression(Some(expr))
            };
            let cond = if self.check(TokenKind::Punctuator, ";") {
                None
            } else {
                Some(self.parse_expression(LOWEST)?)
            };
            self.expect(TokenKind::Punctuator, ";")?;
            let update = if self.check(TokenKind::Punctuator, ")") {
                None
            } else {
                Some(self.parse_expression(LOWEST)?)
            };
            self.expect(TokenKind::Punctuator, ")")?;
            let body = Box::new(self.parse_statement()?);
            return Ok(Stmt::For {
                init,
                cond,
                update,
                body,
                label: None,
            });
        }
        if self.check(TokenKind::Keyword, "switch") {
            self.advance();
            self.expect(TokenKind::Punctuator, "(")?;
            let cond = self.parse_expression(LOWEST)?;
            self.expect(TokenKind::Punctuator, ")")?;
            let body = Box::new(self.parse_statement()?);
            return Ok(Stmt::Switch {
                cond,
                body,
                cases: Vec::new(),
                has_default: false,
                label: None,
            });
        }
        if self.check(TokenKind::Keyword, "case") {
            self.advance();
            let value_expr = self.parse_expression(LOWEST)?;
            let value = Self::expect_integer_literal(&value_expr)
                .map_err(|m| self.err(m))?;
            self.expect(TokenKind::Operator, ":")?;
            let stmt = Box::new(self.parse_statement()?);
            return Ok(Stmt::Case {
                value,
                stmt,
                label: None,
            });
        }
        if self.check(TokenKind::Keyword, "default") {
            self.advance();
            self.expect(TokenKind::Operator, ":")?;
            let stmt = Box::new(self.parse_statement()?);
            return Ok(Stmt::Default { stmt, label: None });
        }
        if self.peek().is_some_and(|t| t.kind == TokenKind::Identifier)
            && self
                .peek_at(1)
                .is_some_and(|t| t.is(TokenKind::Operator, ":"))
        {
            let label = self.advance().unwrap().text;
            self.advance();
            let stmt = Box::new(self.parse_statement()?);
            return Ok(Stmt::Labeled { label, stmt });
        }

        let expr = self.parse_expression(LOWEST)?;
        self.expect(TokenKind::Punctuator, ";")?;
        Ok(Stmt::Expression(expr))
    }

    fn expect_integer_literal(expr: &Expr) -> Result<i64, String> {
        match expr {
            Expr::Constant {
                value: ConstantValue::I32(n),
                ..
            } => Ok(*n as i64),
            Expr::Constant {
                value: ConstantValue::I64(n),
                ..
            } => Ok(*n),
            Expr::Unary {
                op: UnaryOp::Negate,
                inner,
                ..
            } => Self::expect_integer_literal(inner).map(|n| -n),
            _ => Err("case label must be an integer constant expression".into()),
        }
    }

    fn parse_expression(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;

        loop {
            let Some(tok) = self.peek() else { break };
            if tok.is(TokenKind::Operator, "=") {
                if min_prec > LOWEST {
                    break;
                }
                if !lhs.is_lvalue() {
                    return Err(self.err("left side of assignment must be an lvalue"));
                }
                self.advance();
                let rhs = self.parse_expression(LOWEST)?;
                lhs = Expr::Assignment {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    ty: None,
                };
                continue;
            }
            if tok.kind == TokenKind::Operator {
                if let Some(op) = compound_assignment_op(&tok.text) {
                    if min_prec > LOWEST {
                        break;
                    }
                    if !lhs.is_lvalue() {
                        return Err(self.err("left side of compound assignment must be an lvalue"));
                    }
                    self.advance();
                    let rhs = self.parse_expression(LOWEST)?;
                    lhs = Expr::CompoundAssignment {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        inner_ty: None,
                        result_ty: None,
                    };
                    continue;
                }
            }
            if tok.is(TokenKind::Operator, "?") {
                if min_prec > LOWEST {
                    break;
                }
                self.advance();
                let then_branch = self.parse_expression(LOWEST)?;
                self.expect(TokenKind::Operator, ":")?;
                let else_branch = self.parse_expression(min_prec)?;
                lhs = Expr::Conditional {
                    cond: Box::new(lhs),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                    ty: None,
                };
                continue;
            }
            if tok.kind == TokenKind::Operator {
                if let Some((op, prec)) = binary_op_and_precedence(&tok.text) {
                    if prec < min_prec {
                        break;
                    }
                    self.advance();
                    let rhs = self.parse_expression(prec + 1)?;
                    lhs = Expr::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        ty: None,
                    };
                    continue;
                }
            }
            break;
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.check(TokenKind::Keyword, "sizeof") {
            return Err(self.err("sizeof is not supported"));
        }
        if self.check(TokenKind::Punctuator, "(") && self.looks_like_cast() {
            self.advance();
            let (base, _storage) = self.parse_specifiers()?;
            let mut ty = base;
            while self.check(TokenKind::Operator, "*") {
                self.advance();
                ty = Type::pointer_to(ty);
            }
            self.expect(TokenKind::Punctuator, ")")?;
            let inner = self.parse_unary()?;
            return Ok(Expr::Cast {
                target: ty,
                inner: Box::new(inner),
                ty: None,
            });
        }

        let op = if self.check(TokenKind::Operator, "-") {
            Some(UnaryOp::Negate)
        } else if self.check(TokenKind::Operator, "~") {
            Some(UnaryOp::Complement)
        } else if self.check(TokenKind::Operator, "!") {
            Some(UnaryOp::Not)
        } else {
            None
        };
        if let Some(op) = op {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                inner: Box::new(inner),
                ty: None,
            });
        }

        if self.check(TokenKind::Operator, "++") {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::PreIncrement,
                inner: Box::new(inner),
                ty: None,
            });
        }
        if self.check(TokenKind::Operator, "--") {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::PreDecrement,
                inner: Box::new(inner),
                ty: None,
            });
        }
        if self.check(TokenKind::Operator, "*") {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Dereference {
                inner: Box::new(inner),
                ty: None,
            });
        }
        if self.check(TokenKind::Operator, "&") {
            self.advance();
            let inner = self.parse_unary()?;
            if !inner.is_lvalue() {
                return Err(self.err("cannot take the address of a non-lvalue"));
            }
            return Ok(Expr::AddressOf {
                inner: Box::new(inner),
                ty: None,
            });
        }

        self.parse_postfix()
    }

    /// Disambiguates `(int)` (a cast) from `(x)` (a parenthesized
    /// expression): a cast's parenthesized contents start with a type
    /// specifier.
    fn looks_like_cast(&self) -> bool {
        self.peek_at(1)
            .is_some_and(|t| t.kind == TokenKind::Keyword && TYPE_KEYWORDS.contains(&t.text.as_str()))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check(TokenKind::Operator, "++") {
                self.advance();
                expr = Expr::Unary {
                    op: UnaryOp::PostIncrement,
                    inner: Box::new(expr),
                    ty: None,
                };
            } else if self.check(TokenKind::Operator, "--") {
                self.advance();
                expr = Expr::Unary {
                    op: UnaryOp::PostDecrement,
                    inner: Box::new(expr),
                    ty: None,
                };
            } else if self.check(TokenKind::Punctuator, "[") {
                self.advance();
                let index = self.parse_expression(LOWEST)?;
                self.expect(TokenKind::Punctuator, "]")?;
                expr = Expr::Subscript {
                    ptr: Box::new(expr),
                    index: Box::new(index),
                    ty: None,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let Some(tok) = self.peek().cloned() else {
            return Err(self.err("unexpected end of input"));
        };

        match tok.kind {
            TokenKind::Punctuator if tok.text == "(" => {
                self.advance();
                let inner = self.parse_expression(LOWEST)?;
                self.expect(TokenKind::Punctuator, ")")?;
                Ok(inner)
            }
            TokenKind::NumericLiteral => {
                self.advance();
                Ok(Expr::Constant {
                    value: Self::parse_numeric_literal(&tok.text).map_err(|m| self.err(m))?,
                    ty: None,
                })
            }
            TokenKind::StringLiteral => {
                self.advance();
                Ok(Expr::Constant {
                    value: ConstantValue::StringInit {
                        text: tok.text,
                        null_terminated: true,
                    },
                    ty: None,
                })
            }
            TokenKind::CharLiteral => {
                self.advance();
                let byte = tok.text.bytes().next().unwrap_or(0);
                Ok(Expr::Constant {
                    value: ConstantValue::I32(byte as i32),
                    ty: None,
                })
            }
            TokenKind::Identifier => {
                self.advance();
                if self.check(TokenKind::Punctuator, "(") {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(TokenKind::Punctuator, ")") {
                        loop {
                            args.push(self.parse_expression(LOWEST + 1)?);
                            if self.check(TokenKind::Operator, ",") {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::Punctuator, ")")?;
                    Ok(Expr::Call {
                        name: tok.text,
                        args,
                        ty: None,
                    })
                } else {
                    Ok(Expr::Variable {
                        name: tok.text,
                        ty: None,
                    })
                }
            }
            _ => Err(self.err(format!("unexpected token '{}'", tok.text))),
        }
    }

    fn parse_numeric_literal(text: &str) -> Result<ConstantValue, String> {
        let lower = text.to_ascii_lowercase();
        if lower.contains('.') || ((lower.contains('e')) && !lower.starts_with("0x")) {
            return text
                .parse::<f64>()
                .map(ConstantValue::F64)
                .map_err(|_| format!("invalid floating constant '{text}'"));
        }

        let is_unsigned = lower.contains('u');
        let is_long = lower.contains('l');
        let digits = text.trim_end_matches(|c: char| matches!(c, 'l' | 'L' | 'u' | 'U'));

        if is_unsigned {
            let n: u64 = digits
                .parse()
                .map_err(|_| format!("invalid integer constant '{text}'"))?;
            if is_long || n > u32::MAX as u64 {
                Ok(ConstantValue::U64(n))
            } else {
                Ok(ConstantValue::U32(n as u32))
            }
        } else {
            let n: i64 = digits
                .parse()
                .map_err(|_| format!("invalid integer constant '{text}'"))?;
            if is_long || n > i32::MAX as i64 || n < i32::MIN as i64 {
                Ok(ConstantValue::I64(n))
            } else {
                Ok(ConstantValue::I32(n as i32))
            }
        }
    }

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut declarations = Vec::new();
        while !self.at_eof() {
            declarations.push(self.parse_declaration()?);
        }
        Ok(Program { declarations })
    }
}

pub fn parse(tokens: Vec<Token>) -> Result<Program, ParseError> {
    Parser::new(tokens).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_src(src: &str) -> Program {
        parse(tokenize(src).expect("tokenize")).expect("parse")
    }

    #[test]
    fn parses_minimal_main() {
        let program = parse_src("int main(void) { return 2; }");
        assert_eq!(program.declarations.len(), 1);
        match &program.declarations[0] {
            Declaration::Function(f) => {
                assert_eq!(f.name, "main");
                assert!(f.body.is_some());
            }
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn precedence_climbing_orders_multiply_before_add() {
        let program = parse_src("int main(void) { return 2 + 3 * 4; }");
        let Declaration::Function(f) = &program.declarations[0] else {
            panic!()
        };
        let Some(BlockItem::Statement(Stmt::Return(expr))) = f.body.as_ref().unwrap().items.first()
        else {
            panic!()
        };
        match expr {
            Expr::Binary {
                op: BinaryOp::Add,
                rhs,
                ..
            } => {
                assert!(matches!(**rhs, Expr::Binary { op: BinaryOp::Multiply, .. }));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn right_associative_assignment() {
        let program = parse_src("int main(void) { int a; int b; a = b = 3; return a; }");
        let Declaration::Function(f) = &program.declarations[0] else {
            panic!()
        };
        let items = &f.body.as_ref().unwrap().items;
        let Some(BlockItem::Statement(Stmt::Expression(Expr::Assignment { rhs, .. }))) = items.get(2)
        else {
            panic!("expected assignment statement, got {:?}", items.get(2))
        };
        assert!(matches!(**rhs, Expr::Assignment { .. }));
    }

    #[test]
    fn rejects_sizeof() {
        let err = parse(tokenize("int main(void) { return sizeof(int); }").unwrap());
        assert!(err.is_err());
    }

    #[test]
    fn parses_conditional_expression() {
        let program = parse_src("int main(void) { return 1 ? 2 : 3; }");
        let Declaration::Function(f) = &program.declarations[0] else {
            panic!()
        };
        let Some(BlockItem::Statement(Stmt::Return(expr))) = f.body.as_ref().unwrap().items.first()
        else {
            panic!()
        };
        assert!(matches!(expr, Expr::Conditional { .. }));
    }

    #[test]
    fn parses_for_loop_with_declaration_init() {
        let program = parse_src("int main(void) { for (int i = 0; i < 10; i = i + 1) {} return 0; }");
        let Declaration::Function(f) = &program.declarations[0] else {
            panic!()
        };
        assert!(matches!(
            f.body.as_ref().unwrap().items.first(),
            Some(BlockItem::Statement(Stmt::For { .. }))
        ));
    }

    #[test]
    fn cast_vs_parenthesized_expression() {
        let program = parse_src("int main(void) { int x; x = (int)(1 + 2); return x; }");
        let Declaration::Function(f) = &program.declarations[0] else {
            panic!()
        };
        let Some(BlockItem::Statement(Stmt::Expression(Expr::Assignment { rhs, .. }))) =
            f.body.as_ref().unwrap().items.get(1)
        else {
            panic!()
        };
        assert!(matches!(**rhs, Expr::Cast { .. }));
    }
}
