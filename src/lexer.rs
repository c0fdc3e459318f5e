use std::sync::Arc;

use crate::ast::Expr;
use crate::error::{Result, TemplateError};
use crate::limits::ResourceLimits;
use crate::parser::{needs_full_parsing, parse_expression};

/// One piece of a template string.
///
/// Tokens borrow from the source text and hold no evaluation state, so a
/// loop body can be replayed once per item without re-tokenizing.
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    Text(&'a str),
    Variable(&'a str),    // {{ user.name }}
    IfStart(&'a str),     // {{#if cond}}
    Else,                 // {{else}}
    IfEnd,                // {{/if}}
    EachStart(&'a str),   // {{#each items}}
    EachEnd,              // {{/each}}
    InlineExpression(Arc<Expr>, &'a str),
}

pub fn tokenize<'a>(input: &'a str, limits: &ResourceLimits) -> Result<Vec<Token<'a>>> {
    let mut tokens = Vec::new();
    tokenize_into(input, limits, &mut tokens)?;
    Ok(tokens)
}

/// Same as [`tokenize`] but reuses `out`, which is cleared first.
pub fn tokenize_into<'a>(
    input: &'a str,
    limits: &ResourceLimits,
    out: &mut Vec<Token<'a>>,
) -> Result<()> {
    out.clear();
    for token in Tokenizer::new(input, *limits) {
        out.push(token?);
    }
    Ok(())
}

#[derive(Clone)]
pub struct Tokenizer<'a> {
    input: &'a str,
    cursor: usize,
    limits: ResourceLimits,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str, limits: ResourceLimits) -> Self {
        Self {
            input,
            cursor: 0,
            limits,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.cursor..]
    }

    fn advance(&mut self, n: usize) {
        self.cursor += n;
    }

    pub fn next_token(&mut self) -> Option<Result<Token<'a>>> {
        let rest = self.remaining();
        if rest.is_empty() {
            return None;
        }

        match rest.find("{{") {
            Some(0) => {}
            Some(idx) => {
                self.advance(idx);
                return Some(Ok(Token::Text(&rest[..idx])));
            }
            None => {
                self.advance(rest.len());
                return Some(Ok(Token::Text(rest)));
            }
        }

        let open = self.cursor;
        let Some(close) = rest[2..].find("}}") else {
            // Nothing after this can be tokenized meaningfully.
            self.cursor = self.input.len();
            return Some(Err(TemplateError::syntax(
                "unterminated `{{`",
                open,
                snippet(rest),
            )));
        };

        let inner = rest[2..2 + close].trim();
        self.advance(close + 4);
        Some(self.classify(inner, open))
    }

    fn classify(&self, inner: &'a str, open: usize) -> Result<Token<'a>> {
        match inner {
            "else" => return Ok(Token::Else),
            "/if" => return Ok(Token::IfEnd),
            "/each" => return Ok(Token::EachEnd),
            "#if" | "#each" => {
                return Err(TemplateError::syntax(
                    format!("`{}` needs an argument", inner),
                    open,
                    inner,
                ))
            }
            _ => {}
        }
        if let Some(cond) = keyword_argument(inner, "#if") {
            return Ok(Token::IfStart(cond));
        }
        if let Some(items) = keyword_argument(inner, "#each") {
            return Ok(Token::EachStart(items));
        }

        if needs_full_parsing(inner) {
            let expr = parse_expression(inner, &self.limits)?;
            Ok(Token::InlineExpression(expr, inner))
        } else {
            Ok(Token::Variable(inner))
        }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Result<Token<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

// `#if cond` -> `cond`; the keyword must be followed by whitespace.
fn keyword_argument<'a>(inner: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = inner.strip_prefix(keyword)?;
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(40).collect()
}
