//! Element trees exchanged with the document parser and the layout engine.
//!
//! The document parser produces [`Node`]s, which may contain control-flow
//! pseudo-elements. The expander turns them into plain [`Element`]s whose
//! text properties have been substituted.
//!
//! ```yaml
//! - type: element
//!   kind: text
//!   props: { content: "Invoice {{number}}" }
//! - type: each
//!   items: lines
//!   as: line
//!   body:
//!     - type: element
//!       kind: text
//!       props: { content: "{{line.sku}}" }
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

pub type Props = IndexMap<String, PropValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Element(Element),
    Each(EachBlock),
    If(IfBlock),
    Table(TableBlock),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub kind: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub props: Props,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

/// A property value; text is substituted, everything else passes through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<PropValue>),
    Map(IndexMap<String, PropValue>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EachBlock {
    /// Expression producing an array or object.
    pub items: String,
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub bind_as: Option<String>,
    #[serde(default)]
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfBlock {
    pub condition: Condition,
    #[serde(default)]
    pub then: Vec<Node>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub else_if: Vec<ElseIf>,
    #[serde(rename = "else", default, skip_serializing_if = "Option::is_none")]
    pub otherwise: Option<Vec<Node>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElseIf {
    pub condition: Condition,
    #[serde(default)]
    pub then: Vec<Node>,
}

/// `test` is an expression (bare or wrapped in `{{ }}`); without `op` its
/// truthiness decides, otherwise it is compared against `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub test: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<ConditionOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    #[serde(alias = "==")]
    Equals,
    #[serde(alias = "!=")]
    NotEquals,
    In,
    NotIn,
    Contains,
    #[serde(alias = ">")]
    GreaterThan,
    #[serde(alias = ">=")]
    GreaterOrEqual,
    #[serde(alias = "<")]
    LessThan,
    #[serde(alias = "<=")]
    LessOrEqual,
    HasItems,
    CountEquals,
    CountGreaterThan,
}

/// Repeats `row` per item of `source` inside a `table` element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableBlock {
    pub source: String,
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub bind_as: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub props: Props,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header: Vec<Node>,
    #[serde(default)]
    pub row: Vec<Node>,
}

impl Element {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            props: Props::new(),
            children: Vec::new(),
        }
    }

    pub fn with_prop(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    pub fn with_children(mut self, children: Vec<Element>) -> Self {
        self.children = children.into_iter().map(Node::Element).collect();
        self
    }

    pub fn text(&self, prop: &str) -> Option<&str> {
        match self.props.get(prop) {
            Some(PropValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Children that are plain elements; after expansion that is all of them.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        PropValue::Text(s.to_string())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        PropValue::Text(s)
    }
}

impl From<f64> for PropValue {
    fn from(n: f64) -> Self {
        PropValue::Number(n)
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        PropValue::Bool(b)
    }
}

impl Condition {
    pub fn truthy(test: impl Into<String>) -> Self {
        Self {
            test: test.into(),
            op: None,
            value: None,
        }
    }

    pub fn compare(test: impl Into<String>, op: ConditionOp, value: impl Into<Value>) -> Self {
        Self {
            test: test.into(),
            op: Some(op),
            value: Some(value.into()),
        }
    }

    /// The expression text with optional `{{ }}` wrapping removed.
    pub fn expression(&self) -> &str {
        let test = self.test.trim();
        test.strip_prefix("{{")
            .and_then(|inner| inner.strip_suffix("}}"))
            .map(str::trim)
            .unwrap_or(test)
    }
}

/// Control-flow nesting of `nodes`, counted the way the expander counts it.
pub fn structural_depth(nodes: &[Node]) -> usize {
    nodes.iter().map(node_depth).max().unwrap_or(0)
}

fn node_depth(node: &Node) -> usize {
    match node {
        Node::Element(el) if el.children.is_empty() => 0,
        Node::Element(el) => 1 + structural_depth(&el.children),
        Node::Each(block) => 1 + structural_depth(&block.body),
        Node::If(block) => {
            let branches = std::iter::once(&block.then)
                .chain(block.else_if.iter().map(|b| &b.then))
                .chain(block.otherwise.iter());
            1 + branches.map(|b| structural_depth(b)).max().unwrap_or(0)
        }
        // table, then one level per row
        Node::Table(block) => 2 + structural_depth(&block.header).max(structural_depth(&block.row)),
    }
}
