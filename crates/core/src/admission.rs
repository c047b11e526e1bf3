//! Admission control: how many active jobs an owner may hold.
//!
//! Pure functions and constants. The async controller that counts
//! jobs in storage lives in `relay-orchestrator`.

use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Ceiling applied when a scope has no override of its own.
pub const DEFAULT_MAX_ACTIVE_PER_OWNER: u32 = 3;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Default ceiling plus per-scope overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionLimits {
    /// Ceiling for owners outside any overridden scope.
    pub default_ceiling: u32,
    /// Overrides keyed by scope id.
    pub scope_ceilings: HashMap<String, u32>,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            default_ceiling: DEFAULT_MAX_ACTIVE_PER_OWNER,
            scope_ceilings: HashMap::new(),
        }
    }
}

impl AdmissionLimits {
    /// Limits with the given default and no overrides.
    pub fn new(default_ceiling: u32) -> Self {
        Self {
            default_ceiling,
            scope_ceilings: HashMap::new(),
        }
    }

    /// Add (or replace) the override for one scope.
    pub fn with_scope_ceiling(mut self, scope_id: impl Into<String>, ceiling: u32) -> Self {
        self.scope_ceilings.insert(scope_id.into(), ceiling);
        self
    }

    /// Resolve the ceiling that applies to a submission in `scope_id`.
    pub fn ceiling_for(&self, scope_id: Option<&str>) -> u32 {
        scope_id
            .and_then(|scope| self.scope_ceilings.get(scope))
            .copied()
            .unwrap_or(self.default_ceiling)
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Why a submission was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull {
    pub active: u32,
    pub ceiling: u32,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Accept,
    Reject(QueueFull),
}

impl AdmissionDecision {
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Accept iff `active < ceiling`.
///
/// A ceiling of zero therefore rejects every submission.
pub fn decide(active: u32, ceiling: u32) -> AdmissionDecision {
    if active < ceiling {
        AdmissionDecision::Accept
    } else {
        AdmissionDecision::Reject(QueueFull { active, ceiling })
    }
}
