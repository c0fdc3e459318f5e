//! Dotted/bracketed path resolution: `user.items[0].name`, `@index`, `.`.
//!
//! Missing data is never an error. A property on a non-object, an index on
//! a non-array, or an out-of-range index all resolve to `Null`. Only
//! malformed paths and crossed limits raise.

use crate::context::Context;
use crate::error::{Result, TemplateError};
use crate::limits::ResourceLimits;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Property(&'a str),
    Index(usize),
}

/// Resolves `path` against the context's scopes and loop state.
///
/// The first property segment is looked up in the current scope and then
/// in each enclosing scope, so loop bodies can still reach outer data.
pub fn resolve_path(path: &str, ctx: &Context, limits: &ResourceLimits) -> Result<Value> {
    check_length(path, limits)?;

    if path == "." {
        return Ok(ctx.current().clone());
    }
    if let Some(name) = path.strip_prefix('@') {
        return Ok(loop_variable(name, ctx));
    }

    let segments = parse_segments(path, limits)?;
    let Some((first, rest)) = segments.split_first() else {
        return Ok(Value::Null);
    };
    let start = match first {
        Segment::Property(name) => ctx.scopes().find_map(|scope| scope.get(name)),
        Segment::Index(_) => step(ctx.current(), *first),
    };
    Ok(start
        .and_then(|value| walk(value, rest))
        .cloned()
        .unwrap_or(Value::Null))
}

/// Resolves `path` against a single value, without scopes or loop variables.
pub fn lookup<'v>(root: &'v Value, path: &str, limits: &ResourceLimits) -> Result<Option<&'v Value>> {
    check_length(path, limits)?;
    if path == "." {
        return Ok(Some(root));
    }
    let segments = parse_segments(path, limits)?;
    Ok(walk(root, &segments))
}

pub fn parse_segments<'a>(path: &'a str, limits: &ResourceLimits) -> Result<Vec<Segment<'a>>> {
    let bytes = path.as_bytes();
    let mut segments = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'[' {
            let close = path[i + 1..]
                .find(']')
                .map(|offset| i + 1 + offset)
                .ok_or_else(|| TemplateError::syntax("missing closing `]`", i, path))?;
            let digits = &path[i + 1..close];
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(TemplateError::syntax(
                    "array index must be a non-negative integer",
                    i + 1,
                    path,
                ));
            }
            let index = digits.parse::<usize>().unwrap_or(usize::MAX);
            if index > limits.max_array_index {
                return Err(TemplateError::limit("max_array_index", index, limits.max_array_index));
            }
            segments.push(Segment::Index(index));
            i = close + 1;
        } else {
            let end = path[i..]
                .find(['.', '['])
                .map(|offset| i + offset)
                .unwrap_or(path.len());
            let name = &path[i..end];
            if name.is_empty() || name.contains(']') {
                return Err(TemplateError::syntax("empty or malformed path segment", i, path));
            }
            segments.push(Segment::Property(name));
            i = end;
        }

        if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
            if i == bytes.len() {
                return Err(TemplateError::syntax("path ends with `.`", i, path));
            }
        } else if i < bytes.len() && bytes[i] != b'[' {
            return Err(TemplateError::syntax("unexpected character in path", i, path));
        }
    }

    Ok(segments)
}

fn check_length(path: &str, limits: &ResourceLimits) -> Result<()> {
    if path.len() > limits.max_path_length {
        return Err(TemplateError::limit(
            "max_path_length",
            path.len(),
            limits.max_path_length,
        ));
    }
    Ok(())
}

fn loop_variable(name: &str, ctx: &Context) -> Value {
    let state = ctx.loop_state();
    match name {
        "index" => state.map(|s| Value::from(s.index)).unwrap_or(Value::Null),
        "first" => Value::Bool(state.is_some_and(|s| s.is_first)),
        "last" => Value::Bool(state.is_some_and(|s| s.is_last)),
        "key" => ctx.loop_key().map(Value::from).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn step<'v>(value: &'v Value, segment: Segment<'_>) -> Option<&'v Value> {
    match (value, segment) {
        (Value::Object(map), Segment::Property(name)) => map.get(name),
        (Value::Array(items), Segment::Index(index)) => items.get(index),
        _ => None,
    }
}

fn walk<'v>(start: &'v Value, segments: &[Segment<'_>]) -> Option<&'v Value> {
    segments
        .iter()
        .try_fold(start, |value, segment| step(value, *segment))
}
