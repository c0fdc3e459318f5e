use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

/// Parsed form of the text inside one `{{ ... }}`.
///
/// Nodes carry no mutable state, so a tree can be shared between
/// concurrent evaluations through the parse cache.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Path(String), // user.items[0].name, @index, .
    NumberLit(Decimal),
    StringLit(String),
    BoolLit(bool),
    NullLit,
    Arithmetic(Box<Expr>, ArithOp, Box<Expr>),
    Comparison(Box<Expr>, CompareOp, Box<Expr>),
    Coalesce(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Not(Box<Expr>),
    Filter {
        input: Box<Expr>,
        name: String,
        arg: Option<String>,
    },
}
