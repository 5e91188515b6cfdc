//! Memory manager configuration parameters.
//!
//! Controls how precisely the pools account for allocations and whether
//! misuse and leak checks run at all:
//! - Diagnostic level (tracking precision)
//! - Release tier (check strictness)
//! - Fixed capacities of the bounded pools

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// How precisely allocations are tracked.
///
/// Cumulative counters are always exact. The level selects what the heap
/// maintains for outstanding (live) allocations, which pools without their
/// own precise free tracking depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLevel {
    /// No outstanding tracking on the heap.
    Off,
    /// Outstanding allocation count only.
    Counts,
    /// Outstanding count and bytes.
    Bytes,
    /// Outstanding count and bytes, plus approximate heap leak reports on scope exit.
    LeakDetection,
}

impl DiagnosticLevel {
    /// Whether releases adjust outstanding counts.
    pub fn tracks_counts(self) -> bool {
        self >= DiagnosticLevel::Counts
    }

    /// Whether releases adjust outstanding bytes.
    pub fn tracks_bytes(self) -> bool {
        self >= DiagnosticLevel::Bytes
    }
}

impl Default for DiagnosticLevel {
    fn default() -> Self {
        DiagnosticLevel::LeakDetection
    }
}

/// Build strictness tier. Misuse and leak checks only run at [`ReleaseTier::Debug`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseTier {
    Debug,
    Checked,
    Release,
    Shipping,
}

impl ReleaseTier {
    pub fn checks_enabled(self) -> bool {
        self < ReleaseTier::Checked
    }
}

impl Default for ReleaseTier {
    fn default() -> Self {
        ReleaseTier::Debug
    }
}

/// Memory manager configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct MemoryConfig {
    /// When false, every allocation goes to the untracked system allocator.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub diagnostic_level: DiagnosticLevel,

    #[serde(default)]
    pub release_tier: ReleaseTier,

    /// Bytes reserved for the permanent (bump) pool.
    #[serde(default = "default_permanent_capacity")]
    #[validate(range(min = 4096, max = 1073741824))]
    #[validate(custom(function = validation::validate_alignment_multiple))]
    pub permanent_capacity: usize,

    /// Bytes reserved for the temporary stack pool.
    #[serde(default = "default_temporary_stack_capacity")]
    #[validate(range(min = 4096, max = 1073741824))]
    #[validate(custom(function = validation::validate_alignment_multiple))]
    pub temporary_stack_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_permanent_capacity() -> usize {
    1 << 20
}

fn default_temporary_stack_capacity() -> usize {
    256 << 10
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            diagnostic_level: DiagnosticLevel::default(),
            release_tier: ReleaseTier::default(),
            permanent_capacity: default_permanent_capacity(),
            temporary_stack_capacity: default_temporary_stack_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered_by_precision() {
        assert!(!DiagnosticLevel::Off.tracks_counts());
        assert!(DiagnosticLevel::Counts.tracks_counts());
        assert!(!DiagnosticLevel::Counts.tracks_bytes());
        assert!(DiagnosticLevel::LeakDetection.tracks_bytes());
    }

    #[test]
    fn only_debug_tier_runs_checks() {
        assert!(ReleaseTier::Debug.checks_enabled());
        assert!(!ReleaseTier::Checked.checks_enabled());
        assert!(!ReleaseTier::Shipping.checks_enabled());
    }

    #[test]
    fn rejects_unaligned_capacity() {
        let config = MemoryConfig {
            temporary_stack_capacity: 5000,
            ..MemoryConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
