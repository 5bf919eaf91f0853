//! Config module: assembler options.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Fold operators over immediate operands while emitting.
    pub optimize: bool,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self { optimize: true }
    }
}

impl AssemblerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn optimize(mut self, enabled: bool) -> Self {
        self.optimize = enabled;
        self
    }
}
