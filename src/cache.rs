//! Expression text -> parsed tree cache

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

use crate::ast::Expr;

static GLOBAL: LazyLock<ExprCache> = LazyLock::new(ExprCache::new);

/// A parsed tree plus the nesting depth its parse reached, so a hit can be
/// re-checked against a stricter `max_expression_depth` than the one it was
/// parsed under.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedExpr {
    pub expr: Arc<Expr>,
    pub depth: usize,
}

/// Concurrency-safe cache of parsed expressions keyed by exact text.
///
/// When an insert finds the cache at capacity the whole table is cleared
/// first. There is no per-entry recency tracking.
#[derive(Debug, Default)]
pub struct ExprCache {
    entries: RwLock<HashMap<String, CachedExpr>>,
}

impl ExprCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache used by [`parse_expression`](crate::parse_expression).
    pub fn global() -> &'static ExprCache {
        &GLOBAL
    }

    pub fn get(&self, text: &str) -> Option<CachedExpr> {
        self.entries.read().get(text).cloned()
    }

    /// Inserts `entry`, clearing everything first if `max_entries` is reached.
    /// A capacity of zero disables caching.
    pub fn insert(&self, text: &str, entry: CachedExpr, max_entries: usize) {
        if max_entries == 0 {
            return;
        }
        let mut entries = self.entries.write();
        if entries.len() >= max_entries && !entries.contains_key(text) {
            tracing::debug!(evicted = entries.len(), "expression cache full, clearing");
            entries.clear();
        }
        entries.insert(text.to_string(), entry);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> CachedExpr {
        CachedExpr {
            expr: Arc::new(Expr::Path(p.to_string())),
            depth: 1,
        }
    }

    #[test]
    fn overflow_clears_whole_cache_before_insert() {
        let cache = ExprCache::new();
        cache.insert("a + 1", path("a"), 2);
        cache.insert("b + 1", path("b"), 2);
        assert_eq!(cache.len(), 2);

        cache.insert("c + 1", path("c"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("a + 1").is_none());
        assert!(cache.get("b + 1").is_none());
        assert_eq!(cache.get("c + 1"), Some(path("c")));
    }

    #[test]
    fn reinserting_existing_key_does_not_evict() {
        let cache = ExprCache::new();
        cache.insert("a", path("a"), 2);
        cache.insert("b", path("b"), 2);
        cache.insert("b", path("b"), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let cache = ExprCache::new();
        cache.insert("a", path("a"), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let cache = ExprCache::new();
        std::thread::scope(|s| {
            for t in 0..4 {
                let cache = &cache;
                s.spawn(move || {
                    for i in 0..200 {
                        let key = format!("t{t} + {i}");
                        cache.insert(&key, path(&key), 64);
                        let _ = cache.get(&key);
                    }
                });
            }
        });
        assert!(cache.len() <= 64);
    }
}
