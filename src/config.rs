//! Heap configuration types.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::collectors::CollectorKind;
use crate::error::{GcError, GcResult};
use crate::gc::policy::{DEFAULT_INITIAL_THRESHOLD, DEFAULT_MAX_THRESHOLD};
use crate::gc::roots::DEFAULT_STACK_CAPACITY;

/// Default size of a fixed arena (and of each semispace): 512 KiB.
pub const DEFAULT_ARENA_BYTES: usize = 512 * 1024;

/// Smallest accepted fixed arena.
const MIN_ARENA_BYTES: usize = 64;

/// Configuration for a [`Heap`](crate::Heap).
///
/// ```toml
/// collector = "cheney_copy"
/// initial_threshold = 8
/// max_threshold = 1024
/// stack_capacity = 1024
/// arena_bytes = 524288
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Collection algorithm
    pub collector: CollectorKind,
    /// Object count that triggers the first collection
    pub initial_threshold: usize,
    /// Upper bound for the object-count threshold
    pub max_threshold: usize,
    /// Root stack slots
    pub stack_capacity: usize,
    /// Bytes per fixed arena (per semispace for copying collectors).
    /// Reference-counting and mark-sweep heaps grow on demand.
    pub arena_bytes: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            collector: CollectorKind::default(),
            initial_threshold: DEFAULT_INITIAL_THRESHOLD,
            max_threshold: DEFAULT_MAX_THRESHOLD,
            stack_capacity: DEFAULT_STACK_CAPACITY,
            arena_bytes: DEFAULT_ARENA_BYTES,
        }
    }
}

impl HeapConfig {
    /// Default configuration for the given collector.
    pub fn for_collector(collector: CollectorKind) -> Self {
        Self {
            collector,
            ..Self::default()
        }
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> GcResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| GcError::Config(format!("failed to parse heap config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> GcResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            GcError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize to TOML text.
    pub fn to_toml_string(&self) -> GcResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| GcError::Config(format!("failed to serialize heap config: {}", e)))
    }

    /// Reject configurations no heap can run with.
    pub fn validate(&self) -> GcResult<()> {
        if self.stack_capacity == 0 {
            return Err(GcError::Config("stack_capacity must be positive".into()));
        }
        if self.initial_threshold == 0 {
            return Err(GcError::Config("initial_threshold must be positive".into()));
        }
        if self.initial_threshold > self.max_threshold {
            return Err(GcError::Config(format!(
                "initial_threshold {} exceeds max_threshold {}",
                self.initial_threshold, self.max_threshold
            )));
        }
        if self.arena_bytes < MIN_ARENA_BYTES {
            return Err(GcError::Config(format!(
                "arena_bytes must be at least {}",
                MIN_ARENA_BYTES
            )));
        }
        Ok(())
    }
}
