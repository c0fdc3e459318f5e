//! Resource limits guarding against pathological templates and data.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Bounds checked by the parser, path resolver and control-flow drivers.
///
/// Every field has a documented default, so partial configuration documents
/// are accepted:
///
/// ```
/// let limits = pagebind::ResourceLimits::from_yaml_str("max_render_depth: 8").unwrap();
/// assert_eq!(limits.max_template_nesting_depth, 8);
/// assert_eq!(limits.max_path_length, 1000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub max_path_length: usize,
    pub max_array_index: usize,
    pub max_expression_length: usize,
    pub max_expression_depth: usize,
    #[serde(alias = "max_render_depth")]
    pub max_template_nesting_depth: usize,
    pub max_cache_size: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_path_length: 1000,
            max_array_index: 10_000,
            max_expression_length: 2000,
            max_expression_depth: 50,
            max_template_nesting_depth: 100,
            max_cache_size: 1024,
        }
    }
}

impl ResourceLimits {
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(source)?)
    }
}
