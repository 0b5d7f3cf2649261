//! Tokenizer for C source.
//!
//! Single pass, one character of lookahead, tracking `(line, column)` on
//! every token. Grounded on `original_source/src/lexer/tokenizer.cpp`:
//! maximal-munch operators, `L`/`U` numeric suffix rules, and the
//! unterminated-literal/comment error messages all follow it directly.

use crate::error::LexError;
use crate::token::{is_keyword, Token, TokenKind};

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    _source: &'a str,
}

fn is_operator_char(c: char) -> bool {
    matches!(
        c,
        '+' | '-' | '*' | '/' | '<' | '>' | '^' | '?' | '%' | '!' | '=' | '~' | '|' | '&' | ',' | '.' | ':'
    )
}

fn is_punctuator_char(c: char) -> bool {
    matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | ';')
}

fn is_numeric_suffix(c: char) -> bool {
    matches!(c, 'l' | 'L' | 'u' | 'U')
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            _source: source,
        }
    }

    fn err(&self, message: impl Into<String>) -> LexError {
        LexError {
            message: message.into(),
            line: self.line,
            column: self.column,
        }
    }

    fn reached_eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> char {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> char {
        self.chars.get(self.pos + n).copied().unwrap_or('\0')
    }

    fn step(&mut self) -> char {
        if self.reached_eof() {
            return '\0';
        }
        let c = self.chars[self.pos];
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn make(&self, kind: TokenKind, text: impl Into<String>, line: usize, column: usize) -> Token {
        Token::new(kind, text, line, column)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), ' ' | '\t' | '\r' | '\n') {
            self.step();
        }
    }

    fn skip_comment(&mut self) -> Result<(), LexError> {
        let opener = self.step(); // '/' or '*'
        let oneliner = opener == '/';
        loop {
            if self.reached_eof() {
                if !oneliner {
                    return Err(self.err("Unclosed comment block"));
                }
                return Ok(());
            }
            let c = self.peek();
            if oneliner && c == '\n' {
                self.step();
                return Ok(());
            }
            if !oneliner && c == '*' {
                self.step();
                if self.peek() == '/' {
                    self.step();
                    return Ok(());
                }
                continue;
            }
            self.step();
        }
    }

    fn parse_exponent(&mut self) -> Result<String, LexError> {
        let mut exponent = String::new();
        exponent.push(self.step()); // 'e'/'E'
        if matches!(self.peek(), '+' | '-') {
            exponent.push(self.step());
        }
        let mut has_digits = false;
        while self.peek().is_ascii_digit() {
            has_digits = true;
            exponent.push(self.step());
        }
        if !has_digits {
            return Err(self.err("Exponential parts of numeric literals must have a numeric part."));
        }
        if self.peek() == '.' {
            return Err(self.err("Exponential parts of numeric literals can't contain a '.'."));
        }
        Ok(exponent)
    }

    fn parse_numeric_suffixes(&mut self, after_exponent: bool) -> Result<String, LexError> {
        let mut suffixes = String::new();
        let mut l_count = 0;
        let mut u_count = 0;
        loop {
            match self.peek() {
                'l' | 'L' => {
                    l_count += 1;
                    if l_count > 1 {
                        return Err(
                            self.err("This implementation supports only one L suffix in numeric literals.")
                        );
                    }
                    suffixes.push(self.step());
                }
                'u' | 'U' => {
                    u_count += 1;
                    if u_count > 1 {
                        return Err(self.err("Numeric literals can have only one U suffix."));
                    }
                    if after_exponent {
                        return Err(self.err("Floating point numbers are always signed."));
                    }
                    suffixes.push(self.step());
                }
                _ => break,
            }
        }
        let next = self.peek();
        let terminator_ok = next == '\0'
            || next.is_whitespace()
            || is_operator_char(next)
            || is_punctuator_char(next);
        if !terminator_ok || (after_exponent && matches!(next, 'e' | 'E')) {
            return Err(self.err(format!("Unsupported '{next}' suffix after numeric literal.")));
        }
        Ok(suffixes)
    }

    fn make_numeric_literal(&mut self) -> Result<Token, LexError> {
        let (start_line, start_col) = (self.line, self.column);
        let mut literal = String::new();
        let mut dot_count = if self.peek() == '.' { 1 } else { 0 };

        loop {
            let c = self.step();
            literal.push(c);
            let next = self.peek();
            if next.is_ascii_digit() {
                continue;
            }
            if next == '.' {
                dot_count += 1;
                if dot_count > 1 {
                    return Err(self.err("Fractional numeric literals can contain only one '.'"));
                }
                continue;
            }
            if matches!(next, 'e' | 'E') {
                literal.push_str(&self.parse_exponent()?);
                let next = self.peek();
                if is_numeric_suffix(next) {
                    literal.push_str(&self.parse_numeric_suffixes(true)?);
                }
                break;
            }
            if is_numeric_suffix(next) {
                literal.push_str(&self.parse_numeric_suffixes(false)?);
                break;
            }
            break;
        }

        let next = self.peek();
        let terminator_ok =
            next == '\0' || next.is_whitespace() || is_operator_char(next) || is_punctuator_char(next);
        if !terminator_ok {
            return Err(self.err("Identifiers can't start with numbers."));
        }

        Ok(self.make(TokenKind::NumericLiteral, literal, start_line, start_col))
    }

    fn make_string_literal(&mut self) -> Result<Token, LexError> {
        let (start_line, start_col) = (self.line, self.column);
        self.step(); // opening '"'
        let mut literal = String::new();
        loop {
            if self.reached_eof() {
                return Err(self.err("Unclosed string literal"));
            }
            let mut c = self.step();
            if c == '\\' {
                if self.reached_eof() {
                    return Err(self.err("Unclosed string literal"));
                }
                c = self.step();
                literal.push('\\');
            }
            if c == '"' && literal.chars().last() != Some('\\') {
                break;
            }
            literal.push(c);
        }
        Ok(self.make(TokenKind::StringLiteral, literal, start_line, start_col))
    }

    fn make_char_literal(&mut self) -> Result<Token, LexError> {
        let (start_line, start_col) = (self.line, self.column);
        self.step(); // opening '\''
        if self.reached_eof() {
            return Err(self.err("Invalid char literal"));
        }
        let mut c = self.step();
        if c == '\\' {
            c = self.step();
        }
        if self.step() != '\'' {
            return Err(self.err("Invalid char literal"));
        }
        Ok(self.make(TokenKind::CharLiteral, c.to_string(), start_line, start_col))
    }

    fn make_identifier_or_keyword(&mut self) -> Token {
        let (start_line, start_col) = (self.line, self.column);
        let mut word = String::new();
        loop {
            let c = self.peek();
            if c == '_' || c.is_alphanumeric() {
                word.push(self.step());
            } else {
                break;
            }
        }
        let kind = if is_keyword(&word) {
            TokenKind::Keyword
        } else {
            TokenKind::Identifier
        };
        self.make(kind, word, start_line, start_col)
    }

    fn make_operator(&mut self) -> Token {
        let (start_line, start_col) = (self.line, self.column);
        let first = self.step();
        let two = |this: &mut Self, second: char, text: &str| -> Option<String> {
            if this.peek() == second {
                this.step();
                Some(text.to_string())
            } else {
                None
            }
        };
        let text = match first {
            '-' => two(self, '-', "--").or_else(|| two(self, '=', "-=")),
            '+' => two(self, '+', "++").or_else(|| two(self, '=', "+=")),
            '*' => two(self, '=', "*="),
            '/' => two(self, '=', "/="),
            '%' => two(self, '=', "%="),
            '<' => {
                if self.peek() == '<' {
                    self.step();
                    if self.peek() == '=' {
                        self.step();
                        Some("<<=".to_string())
                    } else {
                        Some("<<".to_string())
                    }
                } else {
                    two(self, '=', "<=")
                }
            }
            '>' => {
                if self.peek() == '>' {
                    self.step();
                    if self.peek() == '=' {
                        self.step();
                        Some(">>=".to_string())
                    } else {
                        Some(">>".to_string())
                    }
                } else {
                    two(self, '=', ">=")
                }
            }
            '&' => two(self, '&', "&&").or_else(|| two(self, '=', "&=")),
            '|' => two(self, '|', "||").or_else(|| two(self, '=', "|=")),
            '=' => two(self, '=', "=="),
            '!' => two(self, '=', "!="),
            '^' => two(self, '=', "^="),
            _ => None,
        };
        let text = text.unwrap_or_else(|| first.to_string());
        self.make(TokenKind::Operator, text, start_line, start_col)
    }

    fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        loop {
            if self.reached_eof() {
                return Ok(None);
            }
            let c = self.peek();

            if c == ' ' || c == '\t' || c == '\r' || c == '\n' {
                self.skip_whitespace();
                continue;
            }

            if c.is_ascii_digit() || c == '.' {
                // A lone '.' is the punctuator-like member-access operator.
                if c == '.' && !self.peek_at(1).is_ascii_digit() {
                    return Ok(Some(self.make_operator()));
                }
                return Ok(Some(self.make_numeric_literal()?));
            }

            if c == '"' {
                return Ok(Some(self.make_string_literal()?));
            }

            if c == '\'' {
                return Ok(Some(self.make_char_literal()?));
            }

            if c == '_' || c.is_alphabetic() {
                return Ok(Some(self.make_identifier_or_keyword()));
            }

            if is_operator_char(c) {
                if c == '/' {
                    let nxt = self.peek_at(1);
                    if nxt == '/' || nxt == '*' {
                        self.step();
                        self.skip_comment()?;
                        continue;
                    }
                }
                return Ok(Some(self.make_operator()));
            }

            if is_punctuator_char(c) {
                let (line, column) = (self.line, self.column);
                let text = self.step().to_string();
                return Ok(Some(self.make(TokenKind::Punctuator, text, line, column)));
            }

            return Err(self.err(format!("Can't recognize the character '{c}'.")));
        }
    }
}

/// Tokenize a complete source buffer. Stops and returns an error at the
/// first lexical failure; does not attempt recovery.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    while let Some(tok) = lexer.next_token()? {
        tokens.push(tok);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<(TokenKind, String)> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn tokenizes_simple_return() {
        let toks = kinds("int main(void){ return 2+3*4; }");
        assert_eq!(
            toks,
            vec![
                (TokenKind::Keyword, "int".into()),
                (TokenKind::Identifier, "main".into()),
                (TokenKind::Punctuator, "(".into()),
                (TokenKind::Keyword, "void".into()),
                (TokenKind::Punctuator, ")".into()),
                (TokenKind::Punctuator, "{".into()),
                (TokenKind::Keyword, "return".into()),
                (TokenKind::NumericLiteral, "2".into()),
                (TokenKind::Operator, "+".into()),
                (TokenKind::NumericLiteral, "3".into()),
                (TokenKind::Operator, "*".into()),
                (TokenKind::NumericLiteral, "4".into()),
                (TokenKind::Punctuator, ";".into()),
                (TokenKind::Punctuator, "}".into()),
            ]
        );
    }

    #[test]
    fn maximal_munch_operators() {
        let toks = kinds("a <<= b >>= c != d");
        let ops: Vec<_> = toks
            .into_iter()
            .filter(|(k, _)| *k == TokenKind::Operator)
            .map(|(_, t)| t)
            .collect();
        assert_eq!(ops, vec!["<<=", ">>=", "!="]);
    }

    #[test]
    fn numeric_suffixes() {
        let toks = kinds("10L 20U 30ul 1.5e10 1.5e-3f".trim_end_matches('f'));
        let lits: Vec<_> = toks
            .into_iter()
            .filter(|(k, _)| *k == TokenKind::NumericLiteral)
            .map(|(_, t)| t)
            .collect();
        assert_eq!(lits, vec!["10L", "20U", "30ul", "1.5e10", "1.5e-3"]);
    }

    #[test]
    fn rejects_double_l_suffix() {
        let err = tokenize("10LL").unwrap_err();
        assert!(err.message.contains("only one L suffix"));
    }

    #[test]
    fn rejects_u_suffix_after_exponent() {
        let err = tokenize("1e10U").unwrap_err();
        assert!(err.message.contains("always signed"));
    }

    #[test]
    fn rejects_identifier_starting_with_digit() {
        let err = tokenize("123abc").unwrap_err();
        assert!(err.message.contains("can't start with numbers"));
    }

    #[test]
    fn unterminated_block_comment_errors() {
        let err = tokenize("/* never closed").unwrap_err();
        assert!(err.message.contains("Unclosed comment block"));
    }

    #[test]
    fn line_comment_stops_at_newline() {
        let toks = kinds("int x; // trailing comment\nint y;");
        assert_eq!(toks.len(), 8);
    }

    #[test]
    fn unterminated_string_errors() {
        let err = tokenize("\"abc").unwrap_err();
        assert!(err.message.contains("Unclosed string literal"));
    }

    #[test]
    fn string_with_escape() {
        let toks = kinds(r#""a\"b""#);
        assert_eq!(toks[0].1, r#"a\"b"#);
    }

    #[test]
    fn char_literal() {
        let toks = kinds("'a'");
        assert_eq!(toks, vec![(TokenKind::CharLiteral, "a".into())]);
    }

    #[test]
    fn tracks_line_and_column() {
        let toks = tokenize("int x;\nint y;").unwrap();
        assert_eq!(toks[0].line, 1);
        assert_eq!(toks[3].line, 2);
    }
}
