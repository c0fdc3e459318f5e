//! Tree-mode control flow: expands `each`/`if`/`table` pseudo-elements into
//! concrete elements and substitutes every text property.
//!
//! Depth is tracked in one counter that is bumped around every nesting
//! construct and restored on every exit path. Loop and table bodies are
//! also measured structurally before their collection is evaluated, so a
//! too-deep body fails even when the data would make it unreachable.

use rust_decimal::Decimal;

use crate::ast::CompareOp;
use crate::context::{iteration_scope, loop_items, Context};
use crate::element::{
    structural_depth, Condition, ConditionOp, EachBlock, Element, IfBlock, Node, PropValue, Props,
    TableBlock,
};
use crate::error::{Result, TemplateError};
use crate::eval::{compare, Evaluator};
use crate::filters::FilterRegistry;
use crate::limits::ResourceLimits;
use crate::processor::{InlinePolicy, Processor};
use crate::value::Value;

pub struct Expander<'a> {
    evaluator: Evaluator<'a>,
    processor: Processor<'a>,
    depth: usize,
}

impl<'a> Expander<'a> {
    /// Without a filter registry, inline expressions inside text properties
    /// are blanked rather than evaluated.
    pub fn new(limits: &'a ResourceLimits, filters: Option<&'a FilterRegistry>) -> Self {
        let evaluator = Evaluator::new(limits, filters);
        let inline = if filters.is_some() {
            InlinePolicy::Evaluate
        } else {
            InlinePolicy::Blank
        };
        Self {
            evaluator,
            processor: Processor::new(evaluator).with_inline_policy(inline),
            depth: 0,
        }
    }

    pub fn expand(&mut self, nodes: &[Node], ctx: &mut Context) -> Result<Vec<Element>> {
        let mut out = Vec::with_capacity(nodes.len());
        self.expand_into(nodes, ctx, &mut out)?;
        Ok(out)
    }

    fn expand_into(&mut self, nodes: &[Node], ctx: &mut Context, out: &mut Vec<Element>) -> Result<()> {
        for node in nodes {
            match node {
                Node::Element(el) => {
                    let expanded = self.expand_element(el, ctx)?;
                    out.push(expanded);
                }
                Node::Each(block) => self.nested(|this| this.expand_each(block, ctx, out))?,
                Node::If(block) => self.nested(|this| this.expand_if(block, ctx, out))?,
                Node::Table(block) => self.nested(|this| this.expand_table(block, ctx, out))?,
            }
        }
        Ok(())
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let max = self.max_depth();
        self.depth += 1;
        let result = if self.depth > max {
            Err(TemplateError::limit("max_template_nesting_depth", self.depth, max))
        } else {
            f(self)
        };
        self.depth -= 1;
        result
    }

    fn max_depth(&self) -> usize {
        self.evaluator.limits().max_template_nesting_depth
    }

    /// Fails if a body `body_depth` levels deep cannot fit below the current level.
    fn check_headroom(&self, body_depth: usize) -> Result<()> {
        let needed = self.depth + body_depth;
        if needed > self.max_depth() {
            return Err(TemplateError::limit("max_template_nesting_depth", needed, self.max_depth()));
        }
        Ok(())
    }

    fn expand_element(&mut self, el: &Element, ctx: &mut Context) -> Result<Element> {
        let props = self.substitute_props(&el.props, ctx)?;
        let children = if el.children.is_empty() {
            Vec::new()
        } else {
            self.nested(|this| this.expand(&el.children, ctx))?
                .into_iter()
                .map(Node::Element)
                .collect()
        };
        Ok(Element {
            kind: el.kind.clone(),
            props,
            children,
        })
    }

    fn expand_each(&mut self, block: &EachBlock, ctx: &mut Context, out: &mut Vec<Element>) -> Result<()> {
        self.check_headroom(structural_depth(&block.body))?;
        let items = loop_items(self.evaluator.evaluate_str(&block.items, ctx)?);
        let count = items.len();
        let saved = ctx.loop_snapshot();

        let mut result = Ok(());
        for (index, (key, item)) in items.into_iter().enumerate() {
            let scope = iteration_scope(item, block.bind_as.as_deref());
            result = ctx.with_iteration(scope, index, count, key.as_deref(), |ctx| {
                self.expand_into(&block.body, ctx, out)
            });
            if result.is_err() {
                break;
            }
        }
        ctx.restore_loop(saved);
        result
    }

    fn expand_if(&mut self, block: &IfBlock, ctx: &mut Context, out: &mut Vec<Element>) -> Result<()> {
        if self.holds(&block.condition, ctx)? {
            return self.expand_into(&block.then, ctx, out);
        }
        for branch in &block.else_if {
            if self.holds(&branch.condition, ctx)? {
                return self.expand_into(&branch.then, ctx, out);
            }
        }
        match &block.otherwise {
            Some(nodes) => self.expand_into(nodes, ctx, out),
            None => Ok(()),
        }
    }

    fn expand_table(&mut self, block: &TableBlock, ctx: &mut Context, out: &mut Vec<Element>) -> Result<()> {
        let body_depth = 1 + structural_depth(&block.header).max(structural_depth(&block.row));
        self.check_headroom(body_depth)?;

        let props = self.substitute_props(&block.props, ctx)?;
        let mut children = Vec::new();
        if !block.header.is_empty() {
            let cells = self.nested(|this| this.expand(&block.header, ctx))?;
            children.push(Node::Element(Element::new("table-header").with_children(cells)));
        }

        let items = loop_items(self.evaluator.evaluate_str(&block.source, ctx)?);
        let count = items.len();
        let saved = ctx.loop_snapshot();
        let mut result = Ok(());
        for (index, (key, item)) in items.into_iter().enumerate() {
            let scope = iteration_scope(item, block.bind_as.as_deref());
            result = ctx.with_iteration(scope, index, count, key.as_deref(), |ctx| {
                self.nested(|this| this.expand(&block.row, ctx))
            })
            .map(|cells| children.push(Node::Element(Element::new("table-row").with_children(cells))));
            if result.is_err() {
                break;
            }
        }
        ctx.restore_loop(saved);
        result?;

        out.push(Element {
            kind: "table".to_string(),
            props,
            children,
        });
        Ok(())
    }

    fn holds(&self, condition: &Condition, ctx: &Context) -> Result<bool> {
        let subject = self.evaluator.evaluate_str(condition.expression(), ctx)?;
        let Some(op) = condition.op else {
            return Ok(subject.is_truthy());
        };
        let expected = condition.value.as_ref().unwrap_or(&Value::Null);
        Ok(condition_holds(&subject, op, expected))
    }

    fn substitute_props(&self, props: &Props, ctx: &mut Context) -> Result<Props> {
        props
            .iter()
            .map(|(name, value)| -> Result<(String, PropValue)> {
                Ok((name.clone(), self.substitute(value, ctx)?))
            })
            .collect()
    }

    fn substitute(&self, value: &PropValue, ctx: &mut Context) -> Result<PropValue> {
        Ok(match value {
            PropValue::Text(text) if text.contains("{{") => PropValue::Text(self.processor.render(text, ctx)?),
            PropValue::List(items) => PropValue::List(
                items
                    .iter()
                    .map(|item| self.substitute(item, ctx))
                    .collect::<Result<_>>()?,
            ),
            PropValue::Map(entries) => PropValue::Map(self.substitute_props(entries, ctx)?),
            other => other.clone(),
        })
    }
}

/// Applies one of the fixed `if` operators to an evaluated subject.
pub fn condition_holds(subject: &Value, op: ConditionOp, expected: &Value) -> bool {
    match op {
        ConditionOp::Equals => compare(subject, CompareOp::Eq, expected),
        ConditionOp::NotEquals => compare(subject, CompareOp::Ne, expected),
        ConditionOp::GreaterThan => compare(subject, CompareOp::Gt, expected),
        ConditionOp::GreaterOrEqual => compare(subject, CompareOp::Ge, expected),
        ConditionOp::LessThan => compare(subject, CompareOp::Lt, expected),
        ConditionOp::LessOrEqual => compare(subject, CompareOp::Le, expected),
        ConditionOp::In => contains(expected, subject),
        ConditionOp::NotIn => !contains(expected, subject),
        ConditionOp::Contains => contains(subject, expected),
        ConditionOp::HasItems => match subject {
            Value::Array(items) => !items.is_empty(),
            Value::Object(entries) => !entries.is_empty(),
            _ => false,
        },
        ConditionOp::CountEquals => count(subject).is_some_and(|n| compare(&n, CompareOp::Eq, expected)),
        ConditionOp::CountGreaterThan => count(subject).is_some_and(|n| compare(&n, CompareOp::Gt, expected)),
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| compare(item, CompareOp::Eq, needle)),
        Value::Object(entries) => needle.as_str().is_some_and(|key| entries.contains_key(key)),
        Value::String(text) => match needle {
            Value::String(part) => text.contains(part.as_str()),
            Value::Number(_) | Value::Bool(_) => text.contains(&needle.to_string()),
            _ => false,
        },
        _ => false,
    }
}

fn count(subject: &Value) -> Option<Value> {
    match subject {
        Value::Null => Some(Value::Number(Decimal::ZERO)),
        Value::Array(_) | Value::Object(_) => subject.len().map(Value::from),
        _ => None,
    }
}
