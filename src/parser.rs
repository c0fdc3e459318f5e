//! Pratt parser for the text inside `{{ ... }}`.
//!
//! Precedence, lowest to highest:
//!
//! ```text
//! |            filter pipe, left to right
//! ??           null-coalesce, right associative
//! ||           logical or
//! &&           logical and
//! == != < > <= >=
//! + -
//! * /
//! - !          unary
//! ( )          grouping
//! ```
//!
//! Plain variable paths skip the parser and the cache entirely.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::ast::*;
use crate::cache::{CachedExpr, ExprCache};
use crate::error::{Result, TemplateError};
use crate::limits::ResourceLimits;

const UNARY_BP: u8 = 16;

/// True when `text` is a bare path (`user.items[0].name`, `@index`, `.`)
/// that can be turned into [`Expr::Path`] without parsing.
pub fn is_simple_path(text: &str) -> bool {
    if text == "." {
        return true;
    }
    if matches!(text, "true" | "false" | "null") {
        return false;
    }
    let body = text.strip_prefix('@').unwrap_or(text);
    match body.chars().next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    let mut in_index = false;
    for c in body.chars() {
        match c {
            '[' if !in_index => in_index = true,
            ']' if in_index => in_index = false,
            c if in_index => {
                if !c.is_ascii_digit() {
                    return false;
                }
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' => {}
            _ => return false,
        }
    }
    !in_index
}

/// Inverse of [`is_simple_path`] on trimmed text.
pub fn needs_full_parsing(text: &str) -> bool {
    !is_simple_path(text.trim())
}

/// Parses through the process-wide cache.
pub fn parse_expression(text: &str, limits: &ResourceLimits) -> Result<Arc<Expr>> {
    parse_expression_with_cache(text, limits, ExprCache::global())
}

pub fn parse_expression_with_cache(
    text: &str,
    limits: &ResourceLimits,
    cache: &ExprCache,
) -> Result<Arc<Expr>> {
    let text = text.trim();
    if text.len() > limits.max_expression_length {
        return Err(TemplateError::limit(
            "max_expression_length",
            text.len(),
            limits.max_expression_length,
        ));
    }
    if is_simple_path(text) {
        return Ok(Arc::new(Expr::Path(text.to_string())));
    }
    if let Some(hit) = cache.get(text) {
        // The entry may have been parsed under a looser depth limit.
        if hit.depth > limits.max_expression_depth {
            return Err(TemplateError::limit(
                "max_expression_depth",
                hit.depth,
                limits.max_expression_depth,
            ));
        }
        return Ok(hit.expr);
    }

    tracing::trace!(expression = text, "expression cache miss");
    let mut parser = Parser::new(text, limits.max_expression_depth);
    let expr = Arc::new(parser.parse()?);
    let entry = CachedExpr {
        expr: Arc::clone(&expr),
        depth: parser.deepest,
    };
    cache.insert(text, entry, limits.max_cache_size);
    Ok(expr)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Infix {
    Pipe,
    Coalesce,
    Or,
    And,
    Compare(CompareOp),
    Arith(ArithOp),
}

impl Infix {
    /// (left, right) binding power; equal values make the operator right associative.
    fn binding_power(self) -> (u8, u8) {
        match self {
            Infix::Pipe => (2, 3),
            Infix::Coalesce => (4, 4),
            Infix::Or => (6, 7),
            Infix::And => (8, 9),
            Infix::Compare(_) => (10, 11),
            Infix::Arith(ArithOp::Add | ArithOp::Sub) => (12, 13),
            Infix::Arith(ArithOp::Mul | ArithOp::Div) => (14, 15),
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
    deepest: usize,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, max_depth: usize) -> Self {
        Self {
            src,
            pos: 0,
            depth: 0,
            deepest: 0,
            max_depth,
        }
    }

    fn parse(&mut self) -> Result<Expr> {
        if self.src.is_empty() {
            return Err(self.error("empty expression"));
        }
        let expr = self.parse_expr(0)?;
        self.skip_ws();
        match self.peek() {
            Some(c) => Err(self.error(format!("unexpected character `{}`", c))),
            None => Ok(expr),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn prev(&self) -> Option<char> {
        self.src[..self.pos].chars().next_back()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::syntax(message, self.pos, self.src)
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr> {
        self.depth += 1;
        if self.depth > self.max_depth {
            let depth = self.depth;
            self.depth -= 1;
            return Err(TemplateError::limit("max_expression_depth", depth, self.max_depth));
        }
        self.deepest = self.deepest.max(self.depth);
        let result = self.parse_expr_bp(min_bp);
        self.depth -= 1;
        result
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Expr> {
        let mut lhs = self.parse_prefix()?;

        loop {
            self.skip_ws();
            let Some((op, len)) = self.peek_infix() else {
                break;
            };
            let (l_bp, r_bp) = op.binding_power();
            if l_bp < min_bp {
                break;
            }
            self.pos += len;

            lhs = match op {
                Infix::Pipe => self.parse_filter(lhs)?,
                Infix::Coalesce => Expr::Coalesce(Box::new(lhs), Box::new(self.parse_expr(r_bp)?)),
                Infix::Or => Expr::Or(Box::new(lhs), Box::new(self.parse_expr(r_bp)?)),
                Infix::And => Expr::And(Box::new(lhs), Box::new(self.parse_expr(r_bp)?)),
                Infix::Compare(cmp) => {
                    Expr::Comparison(Box::new(lhs), cmp, Box::new(self.parse_expr(r_bp)?))
                }
                Infix::Arith(arith) => {
                    Expr::Arithmetic(Box::new(lhs), arith, Box::new(self.parse_expr(r_bp)?))
                }
            };
        }

        Ok(lhs)
    }

    fn peek_infix(&self) -> Option<(Infix, usize)> {
        let rest = self.rest();
        let two = [
            ("??", Infix::Coalesce),
            ("||", Infix::Or),
            ("&&", Infix::And),
            ("==", Infix::Compare(CompareOp::Eq)),
            ("!=", Infix::Compare(CompareOp::Ne)),
            ("<=", Infix::Compare(CompareOp::Le)),
            (">=", Infix::Compare(CompareOp::Ge)),
        ];
        if let Some((_, op)) = two.iter().find(|(s, _)| rest.starts_with(s)) {
            return Some((*op, 2));
        }
        let op = match rest.chars().next()? {
            '|' => Infix::Pipe,
            '<' => Infix::Compare(CompareOp::Lt),
            '>' => Infix::Compare(CompareOp::Gt),
            '+' => Infix::Arith(ArithOp::Add),
            '-' => Infix::Arith(ArithOp::Sub),
            '*' => Infix::Arith(ArithOp::Mul),
            '/' => Infix::Arith(ArithOp::Div),
            _ => return None,
        };
        Some((op, 1))
    }

    fn parse_prefix(&mut self) -> Result<Expr> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.error("unexpected end of expression")),
            Some('(') => {
                self.bump();
                let inner = self.parse_expr(0)?;
                self.skip_ws();
                if !self.eat(")") {
                    return Err(self.error("missing closing `)`"));
                }
                Ok(inner)
            }
            Some('-') => {
                self.bump();
                Ok(Expr::Negate(Box::new(self.parse_expr(UNARY_BP)?)))
            }
            Some('!') => {
                self.bump();
                Ok(Expr::Not(Box::new(self.parse_expr(UNARY_BP)?)))
            }
            Some(quote @ ('\'' | '"')) => self.parse_string(quote).map(Expr::StringLit),
            Some(c) if c.is_ascii_digit() => self.parse_number(),
            Some('.') => {
                self.bump();
                Ok(Expr::Path(".".to_string()))
            }
            Some(c) if c.is_alphabetic() || c == '_' || c == '@' => self.parse_path(),
            Some(c) => Err(self.error(format!("unexpected character `{}`", c))),
        }
    }

    fn parse_number(&mut self) -> Result<Expr> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') && matches!(self.peek_second(), Some(c) if c.is_ascii_digit()) {
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(c) if is_ident_char(c)) {
            return Err(self.error("identifier cannot start with a digit"));
        }
        Decimal::from_str(&self.src[start..self.pos])
            .map(Expr::NumberLit)
            .map_err(|_| TemplateError::syntax("number out of range", start, self.src))
    }

    fn parse_path(&mut self) -> Result<Expr> {
        let start = self.pos;
        if self.peek() == Some('@') {
            self.bump();
        }
        loop {
            match self.peek() {
                Some(c) if is_ident_char(c) => {
                    self.bump();
                }
                Some('.') if matches!(self.peek_second(), Some(c) if is_ident_char(c)) => {
                    self.bump();
                }
                // `my-field` is one segment; `a - b` is subtraction.
                Some('-')
                    if matches!(self.prev(), Some(c) if is_ident_char(c))
                        && matches!(self.peek_second(), Some(c) if is_ident_char(c)) =>
                {
                    self.bump();
                }
                Some('[') => {
                    self.bump();
                    let digits = self.pos;
                    while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                        self.bump();
                    }
                    if self.pos == digits {
                        return Err(self.error("array index must be a non-negative integer"));
                    }
                    if !self.eat("]") {
                        return Err(self.error("missing closing `]`"));
                    }
                }
                _ => break,
            }
        }

        let text = &self.src[start..self.pos];
        Ok(match text {
            "true" => Expr::BoolLit(true),
            "false" => Expr::BoolLit(false),
            "null" => Expr::NullLit,
            "@" => return Err(TemplateError::syntax("expected loop variable after `@`", start, self.src)),
            _ => Expr::Path(text.to_string()),
        })
    }

    fn parse_string(&mut self, quote: char) -> Result<String> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(TemplateError::syntax("unterminated string literal", start, self.src)),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c @ ('\\' | '\'' | '"')) => out.push(c),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => {
                        return Err(TemplateError::syntax("unterminated string literal", start, self.src))
                    }
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_filter(&mut self, input: Expr) -> Result<Expr> {
        self.skip_ws();
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_ident_char(c)) {
            self.bump();
        }
        if self.pos == start {
            return Err(self.error("empty filter name"));
        }
        let name = self.src[start..self.pos].to_string();

        self.skip_ws();
        let arg = if self.eat(":") {
            self.skip_ws();
            Some(self.parse_filter_arg()?)
        } else {
            None
        };

        Ok(Expr::Filter {
            input: Box::new(input),
            name,
            arg,
        })
    }

    fn parse_filter_arg(&mut self) -> Result<String> {
        if let Some(quote @ ('\'' | '"')) = self.peek() {
            return self.parse_string(quote);
        }
        let start = self.pos;
        while matches!(self.peek(), Some(c) if !c.is_whitespace() && c != '|' && c != ')') {
            self.bump();
        }
        if self.pos == start {
            return Err(self.error("missing filter argument after `:`"));
        }
        Ok(self.src[start..self.pos].to_string())
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Expr> {
        parse_expression_with_cache(text, &ResourceLimits::default(), &ExprCache::new())
            .map(|e| (*e).clone())
    }

    fn path(p: &str) -> Box<Expr> {
        Box::new(Expr::Path(p.to_string()))
    }

    fn num(n: i64) -> Box<Expr> {
        Box::new(Expr::NumberLit(Decimal::from(n)))
    }

    #[test]
    fn simple_path_detection() {
        assert!(is_simple_path("name"));
        assert!(is_simple_path("user.items[0].name"));
        assert!(is_simple_path("@index"));
        assert!(is_simple_path("."));
        assert!(!is_simple_path("a + b"));
        assert!(!is_simple_path("my-field"));
        assert!(!is_simple_path("42"));
        assert!(!is_simple_path("true"));
        assert!(!is_simple_path("items[x]"));
        assert!(!is_simple_path("items[0"));
        assert!(needs_full_parsing("price * qty | currency"));
    }

    #[test]
    fn multiplicative_binds_tighter_than_additive() {
        assert_eq!(
            parse("a + b * 2").unwrap(),
            Expr::Arithmetic(
                path("a"),
                ArithOp::Add,
                Box::new(Expr::Arithmetic(path("b"), ArithOp::Mul, num(2)))
            )
        );
    }

    #[test]
    fn parentheses_override_precedence() {
        assert_eq!(
            parse("(a + b) * 2").unwrap(),
            Expr::Arithmetic(
                Box::new(Expr::Arithmetic(path("a"), ArithOp::Add, path("b"))),
                ArithOp::Mul,
                num(2)
            )
        );
    }

    #[test]
    fn subtraction_is_left_associative() {
        assert_eq!(
            parse("10 - 3 - 2").unwrap(),
            Expr::Arithmetic(
                Box::new(Expr::Arithmetic(num(10), ArithOp::Sub, num(3))),
                ArithOp::Sub,
                num(2)
            )
        );
    }

    #[test]
    fn coalesce_is_right_associative() {
        assert_eq!(
            parse("a ?? b ?? 'x'").unwrap(),
            Expr::Coalesce(
                path("a"),
                Box::new(Expr::Coalesce(path("b"), Box::new(Expr::StringLit("x".into()))))
            )
        );
    }

    #[test]
    fn filter_binds_loosest_and_chains() {
        assert_eq!(
            parse("price * qty | currency:2 | upper").unwrap(),
            Expr::Filter {
                input: Box::new(Expr::Filter {
                    input: Box::new(Expr::Arithmetic(path("price"), ArithOp::Mul, path("qty"))),
                    name: "currency".into(),
                    arg: Some("2".into()),
                }),
                name: "upper".into(),
                arg: None,
            }
        );
    }

    #[test]
    fn quoted_filter_argument() {
        let Expr::Filter { arg, .. } = parse("when | date:'%d %B %Y'").unwrap() else {
            panic!("expected filter");
        };
        assert_eq!(arg.as_deref(), Some("%d %B %Y"));
    }

    #[test]
    fn hyphen_inside_identifier_is_part_of_path() {
        assert_eq!(parse("my-field").unwrap(), Expr::Path("my-field".into()));
        assert_eq!(
            parse("a - b").unwrap(),
            Expr::Arithmetic(path("a"), ArithOp::Sub, path("b"))
        );
        assert_eq!(parse("-a").unwrap(), Expr::Negate(path("a")));
        assert_eq!(parse("- 5").unwrap(), Expr::Negate(num(5)));
    }

    #[test]
    fn logical_and_comparison_ladder() {
        assert_eq!(
            parse("a > 1 && b || !c").unwrap(),
            Expr::Or(
                Box::new(Expr::And(
                    Box::new(Expr::Comparison(path("a"), CompareOp::Gt, num(1))),
                    path("b")
                )),
                Box::new(Expr::Not(path("c")))
            )
        );
    }

    #[test]
    fn literals() {
        assert_eq!(parse("true").unwrap(), Expr::BoolLit(true));
        assert_eq!(parse("null").unwrap(), Expr::NullLit);
        assert_eq!(parse("3.25").unwrap(), Expr::NumberLit(Decimal::new(325, 2)));
        assert_eq!(parse(r#""a\"b\n""#).unwrap(), Expr::StringLit("a\"b\n".into()));
        assert_eq!(parse(r"'it\'s'").unwrap(), Expr::StringLit("it's".into()));
    }

    #[test]
    fn syntax_errors_carry_position_and_text() {
        match parse("(a + b").unwrap_err() {
            TemplateError::Syntax {
                position,
                expression,
                ..
            } => {
                assert_eq!(position, 6);
                assert_eq!(expression, "(a + b");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse("a | ").unwrap_err().is_syntax());
        assert!(parse("'open").unwrap_err().is_syntax());
        assert!(parse("a # b").unwrap_err().is_syntax());
        assert!(parse("a = b").unwrap_err().is_syntax());
        assert!(parse("2x").unwrap_err().is_syntax());
    }

    #[test]
    fn overlong_expression_is_rejected_before_parsing() {
        let limits = ResourceLimits {
            max_expression_length: 10,
            ..ResourceLimits::default()
        };
        let err = parse_expression_with_cache("a + b + c + d", &limits, &ExprCache::new()).unwrap_err();
        assert!(err.is_limit_exceeded());
    }

    fn parenthesized(levels: usize) -> String {
        format!("{}1{}", "(".repeat(levels), ")".repeat(levels))
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let limits = ResourceLimits::default();
        let err = parse_expression_with_cache(&parenthesized(60), &limits, &ExprCache::new()).unwrap_err();
        assert!(err.is_limit_exceeded());

        assert!(parse_expression_with_cache(&parenthesized(10), &limits, &ExprCache::new()).is_ok());
    }

    #[test]
    fn nesting_depth_limit_is_inclusive() {
        // The outer expression is one level, each parenthesis adds one.
        let limits = ResourceLimits::default();
        assert!(parse_expression_with_cache(&parenthesized(49), &limits, &ExprCache::new()).is_ok());

        let err = parse_expression_with_cache(&parenthesized(50), &limits, &ExprCache::new()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::LimitExceeded {
                limit: "max_expression_depth",
                actual: 51,
                max: 50,
            }
        );
    }

    #[test]
    fn cached_tree_is_rechecked_against_a_stricter_depth_limit() {
        let cache = ExprCache::new();
        let text = format!("{}1 + 0{}", "(".repeat(30), ")".repeat(30));
        let loose = ResourceLimits {
            max_expression_depth: 100,
            ..ResourceLimits::default()
        };
        let strict = ResourceLimits {
            max_expression_depth: 10,
            ..ResourceLimits::default()
        };

        assert!(parse_expression_with_cache(&text, &loose, &cache).is_ok());
        assert_eq!(cache.len(), 1);

        let err = parse_expression_with_cache(&text, &strict, &cache).unwrap_err();
        assert!(
            matches!(err, TemplateError::LimitExceeded { limit: "max_expression_depth", max: 10, .. }),
            "got {:?}",
            err
        );
        assert!(parse_expression_with_cache(&text, &loose, &cache).is_ok());
    }

    #[test]
    fn parsed_trees_are_cached_but_fast_paths_are_not() {
        let cache = ExprCache::new();
        let limits = ResourceLimits::default();
        let first = parse_expression_with_cache("a + 1", &limits, &cache).unwrap();
        let second = parse_expression_with_cache("a + 1", &limits, &cache).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        parse_expression_with_cache("user.name", &limits, &cache).unwrap();
        assert_eq!(cache.len(), 1);
    }
}
