//! Execution context: scope stack plus the current loop state.
//!
//! Loop state is one flat slot rather than per-scope. Entering a nested
//! loop overwrites it, so drivers save it with [`Context::loop_snapshot`]
//! and put it back with [`Context::restore_loop`] once the inner loop ends.

use crate::error::{Result, TemplateError};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopState {
    pub index: usize,
    pub is_first: bool,
    pub is_last: bool,
}

/// Saved loop slot, see [`Context::loop_snapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopSnapshot {
    state: Option<LoopState>,
    key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Context {
    scopes: Vec<Value>,
    loop_state: Option<LoopState>,
    loop_key: Option<String>,
}

impl Context {
    pub fn new(root: Value) -> Self {
        Self {
            scopes: vec![root],
            loop_state: None,
            loop_key: None,
        }
    }

    /// Root for path resolution.
    pub fn current(&self) -> &Value {
        // The root scope is never popped, so the stack is never empty.
        &self.scopes[self.scopes.len() - 1]
    }

    pub fn root(&self) -> &Value {
        &self.scopes[0]
    }

    /// Scopes from innermost to the root.
    pub fn scopes(&self) -> impl Iterator<Item = &Value> {
        self.scopes.iter().rev()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn push_scope(&mut self, scope: Value) {
        self.scopes.push(scope);
    }

    pub fn pop_scope(&mut self) -> Result<Value> {
        if self.scopes.len() <= 1 {
            return Err(TemplateError::InvalidUsage(
                "cannot pop the root scope".to_string(),
            ));
        }
        self.scopes
            .pop()
            .ok_or_else(|| TemplateError::InvalidUsage("scope stack is empty".to_string()))
    }

    pub fn set_loop_variables(&mut self, index: usize, count: usize) -> Result<()> {
        if count == 0 || index >= count {
            return Err(TemplateError::InvalidUsage(format!(
                "loop index {} out of range for {} items",
                index, count
            )));
        }
        self.loop_state = Some(LoopState {
            index,
            is_first: index == 0,
            is_last: index == count - 1,
        });
        Ok(())
    }

    pub fn set_loop_key(&mut self, key: impl Into<String>) {
        self.loop_key = Some(key.into());
    }

    pub fn clear_loop(&mut self) {
        self.loop_state = None;
        self.loop_key = None;
    }

    pub fn loop_state(&self) -> Option<LoopState> {
        self.loop_state
    }

    pub fn loop_key(&self) -> Option<&str> {
        self.loop_key.as_deref()
    }

    pub fn loop_snapshot(&self) -> LoopSnapshot {
        LoopSnapshot {
            state: self.loop_state,
            key: self.loop_key.clone(),
        }
    }

    pub fn restore_loop(&mut self, snapshot: LoopSnapshot) {
        self.loop_state = snapshot.state;
        self.loop_key = snapshot.key;
    }

    /// Runs one loop iteration: push `scope`, set loop variables, run
    /// `body`, then clear the loop state and pop, in that order, whether or
    /// not `body` failed.
    pub fn with_iteration<T>(
        &mut self,
        scope: Value,
        index: usize,
        count: usize,
        key: Option<&str>,
        body: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.push_scope(scope);
        let result = self.set_loop_variables(index, count).and_then(|()| {
            // Array iterations have no key, even inside an object loop.
            self.loop_key = key.map(str::to_string);
            body(self)
        });
        self.clear_loop();
        self.pop_scope()?;
        result
    }
}

/// Splits a collection into loop items: array elements, or object entries
/// with their keys. Anything else yields no items.
pub fn loop_items(collection: Value) -> Vec<(Option<String>, Value)> {
    match collection {
        Value::Array(items) => items.into_iter().map(|item| (None, item)).collect(),
        Value::Object(entries) => entries.into_iter().map(|(k, v)| (Some(k), v)).collect(),
        _ => Vec::new(),
    }
}

/// The scope pushed for one iteration: the item itself, or `{name: item}`.
pub fn iteration_scope(item: Value, binding: Option<&str>) -> Value {
    match binding {
        Some(name) => {
            let mut scope = crate::value::Map::new();
            scope.insert(name.to_string(), item);
            Value::Object(scope)
        }
        None => item,
    }
}
