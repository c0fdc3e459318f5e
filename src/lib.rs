//! pagebind: the expression and control-flow engine behind data-bound
//! document-layout templates.
//!
//! A template binds a tree of data (objects, arrays, strings, fixed-decimal
//! numbers, booleans, null) to placeholders:
//!
//! - `{{ user.items[0].name }}` path substitution.
//! - `{{#if cond}} ... {{else}} ... {{/if}}` conditionals.
//! - `{{#each items}} ... {{/each}}`, optionally `{{#each items as item}}`;
//!   `@index`, `@first`, `@last` and `@key` are available in the body.
//! - Inline expressions with `+ - * /`, `== != < > <= >=`, `&& ||`, `??`,
//!   unary `- !`, parentheses and filter pipes: `{{ price * qty | currency }}`.
//!
//! Two drivers share the same parser, evaluator and context:
//!
//! - [`TemplateEngine::render`] works on plain template strings.
//! - [`TemplateEngine::expand`] works on an element tree produced by the
//!   document parser and returns concrete elements for the layout engine.
//!
//! Error policy:
//! - Missing or mistyped data never fails; it becomes `Null` and renders
//!   as empty text.
//! - Malformed syntax and crossed [`ResourceLimits`] fail the whole render;
//!   there is no partial output.
//!
//! ```
//! use pagebind::{render_template, Value};
//!
//! let data = Value::from_json_str(r#"{"name": "World"}"#).unwrap();
//! assert_eq!(render_template("Hello {{name}}!", &data).unwrap(), "Hello World!");
//! ```

pub mod ast;
pub mod cache;
pub mod context;
pub mod element;
pub mod error;
pub mod eval;
pub mod expander;
pub mod filters;
pub mod lexer;
pub mod limits;
pub mod parser;
pub mod path;
pub mod processor;
pub mod value;

pub use ast::{ArithOp, CompareOp, Expr};
pub use cache::{CachedExpr, ExprCache};
pub use context::{Context, LoopState};
pub use element::{Condition, ConditionOp, EachBlock, ElseIf, Element, IfBlock, Node, PropValue, TableBlock};
pub use error::{Result, TemplateError};
pub use eval::Evaluator;
pub use expander::Expander;
pub use filters::{Culture, Filter, FilterRegistry};
pub use lexer::{tokenize, Token};
pub use limits::ResourceLimits;
pub use parser::parse_expression;
pub use path::resolve_path;
pub use processor::{InlinePolicy, Processor};
pub use value::{Map, Value};

/// Host-facing entry point: resource limits plus an optional filter table.
#[derive(Debug, Clone, Default)]
pub struct TemplateEngine {
    limits: ResourceLimits,
    filters: Option<FilterRegistry>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_filters(mut self, filters: FilterRegistry) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn with_builtin_filters(self) -> Self {
        self.with_filters(FilterRegistry::with_builtins())
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn filters(&self) -> Option<&FilterRegistry> {
        self.filters.as_ref()
    }

    pub fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&self.limits, self.filters.as_ref())
    }

    /// Renders a template string against `data`.
    pub fn render(&self, template: &str, data: &Value) -> Result<String> {
        tracing::debug!(template_len = template.len(), "rendering template string");
        let mut ctx = Context::new(data.clone());
        let out = Processor::new(self.evaluator()).render(template, &mut ctx)?;
        tracing::debug!(output_len = out.len(), "rendered template string");
        Ok(out)
    }

    /// Expands control flow in an element tree and substitutes its text.
    pub fn expand(&self, nodes: &[Node], data: &Value) -> Result<Vec<Element>> {
        tracing::debug!(nodes = nodes.len(), "expanding element tree");
        let mut ctx = Context::new(data.clone());
        let elements = Expander::new(&self.limits, self.filters.as_ref()).expand(nodes, &mut ctx)?;
        tracing::debug!(elements = elements.len(), "expanded element tree");
        Ok(elements)
    }

    /// Evaluates a single expression (the text inside `{{ }}`).
    pub fn evaluate(&self, expression: &str, data: &Value) -> Result<Value> {
        let ctx = Context::new(data.clone());
        self.evaluator().evaluate_str(expression, &ctx)
    }
}

/// Renders with default limits and the built-in filters.
pub fn render_template(template: &str, data: &Value) -> Result<String> {
    TemplateEngine::new().with_builtin_filters().render(template, data)
}
