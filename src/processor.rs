//! String-mode control flow over a flat token list.
//!
//! Blocks are located by scanning forward for the matching end marker and
//! their bodies are processed recursively as sub-slices of the same token
//! list, so an `each` body is replayed per item without re-tokenizing.

use crate::context::{iteration_scope, loop_items, Context};
use crate::error::{Result, TemplateError};
use crate::eval::Evaluator;
use crate::lexer::{tokenize, Token};
use crate::path::resolve_path;

/// What to do with `{{ a * b }}`-style tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlinePolicy {
    Evaluate,
    /// Substitute empty text instead of evaluating.
    Blank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    If,
    Each,
}

impl BlockKind {
    fn tag(self) -> &'static str {
        match self {
            BlockKind::If => "if",
            BlockKind::Each => "each",
        }
    }
}

/// Token indices of one `{{#if}}`/`{{#each}}` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Block {
    start: usize,
    else_at: Option<usize>,
    end: usize,
}

impl Block {
    fn branches<'t, 'a>(&self, tokens: &'t [Token<'a>]) -> (&'t [Token<'a>], &'t [Token<'a>]) {
        match self.else_at {
            Some(else_at) => (&tokens[self.start + 1..else_at], &tokens[else_at + 1..self.end]),
            None => (&tokens[self.start + 1..self.end], &[]),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Processor<'a> {
    evaluator: Evaluator<'a>,
    inline: InlinePolicy,
}

impl<'a> Processor<'a> {
    pub fn new(evaluator: Evaluator<'a>) -> Self {
        Self {
            evaluator,
            inline: InlinePolicy::Evaluate,
        }
    }

    pub fn with_inline_policy(mut self, inline: InlinePolicy) -> Self {
        self.inline = inline;
        self
    }

    pub fn render(&self, template: &str, ctx: &mut Context) -> Result<String> {
        let tokens = tokenize(template, self.evaluator.limits())?;
        let mut out = String::with_capacity(template.len());
        self.render_tokens(&tokens, ctx, &mut out)?;
        Ok(out)
    }

    /// Renders an already tokenized template, appending to `out`.
    pub fn render_tokens(&self, tokens: &[Token<'_>], ctx: &mut Context, out: &mut String) -> Result<()> {
        check_nesting(tokens, self.evaluator.limits().max_template_nesting_depth)?;
        self.process(tokens, ctx, 0, out)
    }

    fn process(&self, tokens: &[Token<'_>], ctx: &mut Context, depth: usize, out: &mut String) -> Result<()> {
        let mut i = 0;
        while i < tokens.len() {
            match &tokens[i] {
                Token::Text(text) => out.push_str(text),
                Token::Variable(path) => {
                    let value = resolve_path(path, ctx, self.evaluator.limits())?;
                    out.push_str(&value.to_string());
                }
                Token::InlineExpression(expr, raw) => match self.inline {
                    InlinePolicy::Evaluate => {
                        out.push_str(&self.evaluator.evaluate(expr, ctx)?.to_string());
                    }
                    InlinePolicy::Blank => {
                        tracing::warn!(expression = *raw, "no filter registry configured, inline expression left blank");
                    }
                },
                Token::IfStart(condition) => {
                    let block = find_block(tokens, i, BlockKind::If)?;
                    let depth = self.enter(depth)?;
                    let (then, otherwise) = block.branches(tokens);
                    if self.evaluator.evaluate_str(condition, ctx)?.is_truthy() {
                        self.process(then, ctx, depth, out)?;
                    } else {
                        self.process(otherwise, ctx, depth, out)?;
                    }
                    i = block.end;
                }
                Token::EachStart(spec) => {
                    let block = find_block(tokens, i, BlockKind::Each)?;
                    let depth = self.enter(depth)?;
                    let (body, empty) = block.branches(tokens);
                    self.each(spec, body, empty, ctx, depth, out)?;
                    i = block.end;
                }
                Token::Else => return Err(stray("{{else}}", i)),
                Token::IfEnd => return Err(stray("{{/if}}", i)),
                Token::EachEnd => return Err(stray("{{/each}}", i)),
            }
            i += 1;
        }
        Ok(())
    }

    fn enter(&self, depth: usize) -> Result<usize> {
        let max = self.evaluator.limits().max_template_nesting_depth;
        if depth + 1 > max {
            return Err(TemplateError::limit("max_template_nesting_depth", depth + 1, max));
        }
        Ok(depth + 1)
    }

    fn each(
        &self,
        spec: &str,
        body: &[Token<'_>],
        empty: &[Token<'_>],
        ctx: &mut Context,
        depth: usize,
        out: &mut String,
    ) -> Result<()> {
        let (source, binding) = split_binding(spec);
        let items = loop_items(self.evaluator.evaluate_str(source, ctx)?);
        if items.is_empty() {
            return self.process(empty, ctx, depth, out);
        }

        let count = items.len();
        let saved = ctx.loop_snapshot();
        let mut result = Ok(());
        for (index, (key, item)) in items.into_iter().enumerate() {
            let scope = iteration_scope(item, binding);
            result = ctx.with_iteration(scope, index, count, key.as_deref(), |ctx| {
                self.process(body, ctx, depth, out)
            });
            if result.is_err() {
                break;
            }
        }
        ctx.restore_loop(saved);
        result
    }
}

/// `items as item` -> (`items`, Some(`item`)); anything else is all source.
pub fn split_binding(spec: &str) -> (&str, Option<&str>) {
    if let Some((source, name)) = spec.rsplit_once(" as ") {
        let name = name.trim();
        let is_ident = name
            .chars()
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_alphanumeric() || c == '_');
        if is_ident {
            return (source.trim(), Some(name));
        }
    }
    (spec.trim(), None)
}

fn stray(tag: &str, index: usize) -> TemplateError {
    TemplateError::syntax(format!("unexpected `{}` at token {}", tag, index), index, tag)
}

fn find_block(tokens: &[Token<'_>], start: usize, kind: BlockKind) -> Result<Block> {
    let mut depth = 0usize;
    let mut else_at = None;
    for (i, token) in tokens.iter().enumerate().skip(start) {
        let closing = match token {
            Token::IfStart(_) | Token::EachStart(_) => {
                depth += 1;
                continue;
            }
            Token::Else if depth == 1 && else_at.is_none() => {
                else_at = Some(i);
                continue;
            }
            Token::IfEnd => BlockKind::If,
            Token::EachEnd => BlockKind::Each,
            _ => continue,
        };
        depth -= 1;
        if depth == 0 {
            if closing != kind {
                return Err(TemplateError::syntax(
                    format!("`{{{{#{}}}}}` closed by `{{{{/{}}}}}`", kind.tag(), closing.tag()),
                    i,
                    block_source(&tokens[start]),
                ));
            }
            return Ok(Block { start, else_at, end: i });
        }
    }
    Err(TemplateError::syntax(
        format!("unclosed `{{{{#{}}}}}` block", kind.tag()),
        start,
        block_source(&tokens[start]),
    ))
}

fn block_source(token: &Token<'_>) -> String {
    match token {
        Token::IfStart(cond) => format!("#if {}", cond),
        Token::EachStart(spec) => format!("#each {}", spec),
        other => format!("{:?}", other),
    }
}

/// Rejects templates whose block structure nests deeper than `max`,
/// regardless of what the data would make reachable.
pub fn check_nesting(tokens: &[Token<'_>], max: usize) -> Result<()> {
    let mut depth = 0usize;
    for token in tokens {
        match token {
            Token::IfStart(_) | Token::EachStart(_) => {
                depth += 1;
                if depth > max {
                    return Err(TemplateError::limit("max_template_nesting_depth", depth, max));
                }
            }
            Token::IfEnd | Token::EachEnd => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterRegistry;
    use crate::limits::ResourceLimits;
    use crate::value::Value;

    fn render_with(template: &str, data: &str, inline: InlinePolicy) -> Result<String> {
        let limits = ResourceLimits::default();
        let filters = FilterRegistry::with_builtins();
        let processor = Processor::new(Evaluator::new(&limits, Some(&filters))).with_inline_policy(inline);
        let mut ctx = Context::new(Value::from_json_str(data).unwrap());
        let out = processor.render(template, &mut ctx)?;
        assert_eq!(ctx.depth(), 1, "scope stack not unwound");
        assert_eq!(ctx.loop_state(), None, "loop state leaked");
        Ok(out)
    }

    fn render(template: &str, data: &str) -> Result<String> {
        render_with(template, data, InlinePolicy::Evaluate)
    }

    #[test]
    fn if_else_branches() {
        let t = "{{#if vip}}gold{{else}}standard{{/if}}";
        assert_eq!(render(t, r#"{"vip": true}"#).unwrap(), "gold");
        assert_eq!(render(t, r#"{"vip": false}"#).unwrap(), "standard");
        assert_eq!(render(t, "{}").unwrap(), "standard");
    }

    #[test]
    fn else_belongs_to_the_outer_block_only_at_depth_one() {
        let t = "{{#if a}}{{#if b}}AB{{else}}A{{/if}}{{else}}none{{/if}}";
        assert_eq!(render(t, r#"{"a": 1, "b": 0}"#).unwrap(), "A");
        assert_eq!(render(t, r#"{"a": 0, "b": 1}"#).unwrap(), "none");
    }

    #[test]
    fn each_exposes_loop_variables() {
        let t = "{{#each items}}{{#if @first}}[{{/if}}{{@index}}:{{name}}{{#if @last}}]{{else}},{{/if}}{{/each}}";
        let data = r#"{"items": [{"name": "a"}, {"name": "b"}, {"name": "c"}]}"#;
        assert_eq!(render(t, data).unwrap(), "[0:a,1:b,2:c]");
    }

    #[test]
    fn each_with_binding_and_outer_lookup() {
        let t = "{{#each lines as line}}{{line.sku}}@{{store}};{{/each}}";
        let data = r#"{"store": "north", "lines": [{"sku": "A1"}, {"sku": "B2"}]}"#;
        assert_eq!(render(t, data).unwrap(), "A1@north;B2@north;");
    }

    #[test]
    fn each_over_object_exposes_key() {
        let t = "{{#each totals}}{{@key}}={{.}} {{/each}}";
        let data = r#"{"totals": {"net": 10, "tax": 2}}"#;
        assert_eq!(render(t, data).unwrap(), "net=10 tax=2 ");
    }

    #[test]
    fn each_else_renders_for_empty_collection() {
        let t = "{{#each items}}x{{else}}nothing{{/each}}";
        assert_eq!(render(t, r#"{"items": []}"#).unwrap(), "nothing");
        assert_eq!(render(t, r#"{"items": [1]}"#).unwrap(), "x");
    }

    #[test]
    fn nested_loops_restore_outer_loop_state() {
        let t = "{{#each rows}}{{#each cols}}{{@index}}{{/each}}|{{@index}};{{/each}}";
        let data = r#"{"rows": [{"cols": [1, 2]}, {"cols": [3]}]}"#;
        assert_eq!(render(t, data).unwrap(), "01|0;0|1;");
    }

    #[test]
    fn inline_expressions_follow_policy() {
        let data = r#"{"price": 2.5, "qty": 4}"#;
        assert_eq!(render("{{price * qty}}", data).unwrap(), "10.0");
        assert_eq!(render_with("[{{price * qty}}]", data, InlinePolicy::Blank).unwrap(), "[]");
        assert_eq!(
            render_with("[{{price}}]", data, InlinePolicy::Blank).unwrap(),
            "[2.5]"
        );
    }

    #[test]
    fn unclosed_and_stray_blocks_are_syntax_errors() {
        assert!(render("{{#if show}}content", "{}").unwrap_err().is_syntax());
        assert!(render("{{#each xs}}{{#if a}}{{/each}}", "{}").unwrap_err().is_syntax());
        assert!(render("text{{/if}}", "{}").unwrap_err().is_syntax());
        assert!(render("{{else}}", "{}").unwrap_err().is_syntax());
        assert!(render("{{#if a}}x{{/each}}", "{}").unwrap_err().is_syntax());
    }

    #[test]
    fn nesting_limit_is_checked_structurally() {
        let limits = ResourceLimits {
            max_template_nesting_depth: 2,
            ..ResourceLimits::default()
        };
        let processor = Processor::new(Evaluator::new(&limits, None));
        let mut ctx = Context::new(Value::Null);
        // The innermost block is unreachable with this data but still counts.
        let t = "{{#if a}}{{#if b}}{{#if c}}x{{/if}}{{/if}}{{/if}}";
        assert!(processor.render(t, &mut ctx).unwrap_err().is_limit_exceeded());
        assert_eq!(processor.render("{{#if a}}{{#if b}}x{{/if}}{{/if}}", &mut ctx).unwrap(), "");
    }

    #[test]
    fn split_binding_forms() {
        assert_eq!(split_binding("items as item"), ("items", Some("item")));
        assert_eq!(split_binding(" order.lines  as  line "), ("order.lines", Some("line")));
        assert_eq!(split_binding("items"), ("items", None));
        assert_eq!(split_binding("'x as y'"), ("'x as y'", None));
    }
}
