//! Expression evaluation.
//!
//! This is the one place where the degrade-versus-fail policy is decided:
//! [`arithmetic`] and [`compare`] are total and turn mistyped or missing
//! operands into `Null`/`false`, while errors can only come from path
//! syntax and limits or from filter lookup.

use std::cmp::Ordering;

use rust_decimal::Decimal;

use crate::ast::*;
use crate::context::Context;
use crate::error::{Result, TemplateError};
use crate::filters::FilterRegistry;
use crate::limits::ResourceLimits;
use crate::parser::parse_expression;
use crate::path::resolve_path;
use crate::value::Value;

#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    limits: &'a ResourceLimits,
    filters: Option<&'a FilterRegistry>,
}

impl<'a> Evaluator<'a> {
    pub fn new(limits: &'a ResourceLimits, filters: Option<&'a FilterRegistry>) -> Self {
        Self { limits, filters }
    }

    pub fn limits(&self) -> &'a ResourceLimits {
        self.limits
    }

    pub fn filters(&self) -> Option<&'a FilterRegistry> {
        self.filters
    }

    /// Parses (through the cache) and evaluates `text`.
    pub fn evaluate_str(&self, text: &str, ctx: &Context) -> Result<Value> {
        let expr = parse_expression(text, self.limits)?;
        self.evaluate(&expr, ctx)
    }

    pub fn evaluate(&self, expr: &Expr, ctx: &Context) -> Result<Value> {
        match expr {
            Expr::Path(path) => resolve_path(path, ctx, self.limits),
            Expr::NumberLit(n) => Ok(Value::Number(*n)),
            Expr::StringLit(s) => Ok(Value::String(s.clone())),
            Expr::BoolLit(b) => Ok(Value::Bool(*b)),
            Expr::NullLit => Ok(Value::Null),
            Expr::Arithmetic(lhs, op, rhs) => {
                let l = self.evaluate(lhs, ctx)?;
                let r = self.evaluate(rhs, ctx)?;
                Ok(arithmetic(&l, *op, &r))
            }
            Expr::Comparison(lhs, op, rhs) => {
                let l = self.evaluate(lhs, ctx)?;
                let r = self.evaluate(rhs, ctx)?;
                Ok(Value::Bool(compare(&l, *op, &r)))
            }
            Expr::Coalesce(lhs, rhs) => match self.evaluate(lhs, ctx)? {
                Value::Null => self.evaluate(rhs, ctx),
                value => Ok(value),
            },
            Expr::Or(lhs, rhs) => {
                if self.evaluate(lhs, ctx)?.is_truthy() {
                    Ok(Value::Bool(true))
                } else {
                    Ok(Value::Bool(self.evaluate(rhs, ctx)?.is_truthy()))
                }
            }
            Expr::And(lhs, rhs) => {
                if !self.evaluate(lhs, ctx)?.is_truthy() {
                    Ok(Value::Bool(false))
                } else {
                    Ok(Value::Bool(self.evaluate(rhs, ctx)?.is_truthy()))
                }
            }
            Expr::Negate(operand) => Ok(match self.evaluate(operand, ctx)? {
                Value::Number(n) => Value::Number(unsigned_zero(-n)),
                _ => Value::Null,
            }),
            Expr::Not(operand) => Ok(Value::Bool(!self.evaluate(operand, ctx)?.is_truthy())),
            Expr::Filter { input, name, arg } => {
                let value = self.evaluate(input, ctx)?;
                let registry = self
                    .filters
                    .ok_or_else(|| TemplateError::FilterRegistryMissing(name.clone()))?;
                registry.apply(name, &value, arg.as_deref())
            }
        }
    }
}

/// Number-only arithmetic; anything else, overflow, or division by zero is `Null`.
pub fn arithmetic(lhs: &Value, op: ArithOp, rhs: &Value) -> Value {
    let (Value::Number(a), Value::Number(b)) = (lhs, rhs) else {
        return Value::Null;
    };
    let result = match op {
        ArithOp::Add => a.checked_add(*b),
        ArithOp::Sub => a.checked_sub(*b),
        ArithOp::Mul => a.checked_mul(*b),
        ArithOp::Div => a.checked_div(*b),
    };
    result.map(|n| Value::Number(unsigned_zero(n))).unwrap_or(Value::Null)
}

// `-0` is not a canonical number text; zero keeps its scale but drops the sign.
fn unsigned_zero(mut n: Decimal) -> Decimal {
    if n.is_zero() {
        n.set_sign_positive(true);
    }
    n
}

/// Comparison with SQL-style null handling: `Null` equals only `Null` and
/// orders against nothing.
pub fn compare(lhs: &Value, op: CompareOp, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => matches!(op, CompareOp::Eq | CompareOp::Le | CompareOp::Ge),
        (Value::Null, _) | (_, Value::Null) => op == CompareOp::Ne,
        (Value::Number(a), Value::Number(b)) => ordered(a.cmp(b), op),
        (Value::String(a), Value::String(b)) => ordered(a.as_str().cmp(b.as_str()), op),
        (Value::Bool(a), Value::Bool(b)) => equality_only(a == b, op),
        (Value::Array(a), Value::Array(b)) => equality_only(a == b, op),
        (Value::Object(a), Value::Object(b)) => equality_only(a == b, op),
        _ => op == CompareOp::Ne,
    }
}

fn ordered(ord: Ordering, op: CompareOp) -> bool {
    match op {
        CompareOp::Eq => ord.is_eq(),
        CompareOp::Ne => ord.is_ne(),
        CompareOp::Lt => ord.is_lt(),
        CompareOp::Gt => ord.is_gt(),
        CompareOp::Le => ord.is_le(),
        CompareOp::Ge => ord.is_ge(),
    }
}

fn equality_only(equal: bool, op: CompareOp) -> bool {
    match op {
        CompareOp::Eq => equal,
        CompareOp::Ne => !equal,
        _ => false,
    }
}
