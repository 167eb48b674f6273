//! Per-request call guard: duplicate and budget ledgers for tool invocations
//!
//! Upstream models occasionally loop on an expensive call (same tool, same
//! arguments, round after round). The guard bounds the cost without aborting
//! the conversation: a refused invocation gets a synthetic result explaining
//! the refusal, and the round continues.
//!
//! Two ledgers, both scoped to a single request:
//!
//! - exact ledger: `(name, canonicalized arguments) → count`. Once a pair
//!   has dispatched [`DUPLICATE_LIMIT`] times, further identical calls are
//!   refused.
//! - name ledger: `name → count`, checked against the per-name budgets
//!   configured on the engine (e.g. an expensive enrichment tool capped at
//!   1 per request).
//!
//! Ledgers are exclusively owned by one request's driver, so no locking.

use serde_json::Value;
use std::collections::HashMap;

/// How many times one exact `(name, arguments)` pair may dispatch per request
pub const DUPLICATE_LIMIT: u32 = 2;

/// Outcome of consulting the guard for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Dispatch; both ledgers have been incremented
    Permit,
    /// Identical `(name, arguments)` already dispatched [`DUPLICATE_LIMIT`] times
    Duplicate,
    /// The per-name budget for this tool is spent
    Exhausted { cap: u32 },
}

/// Deduplication and budget ledgers for one request
#[derive(Debug, Default)]
pub struct CallGuard {
    exact: HashMap<(String, String), u32>,
    per_name: HashMap<String, u32>,
    budgets: HashMap<String, u32>,
}

impl CallGuard {
    /// Create a guard with the given per-name invocation budgets.
    /// Tools absent from the map are bounded only by the duplicate ledger.
    pub fn new(budgets: HashMap<String, u32>) -> Self {
        Self {
            exact: HashMap::new(),
            per_name: HashMap::new(),
            budgets,
        }
    }

    /// Consult the ledgers for one invocation.
    ///
    /// On `Permit` both counters are incremented; refusals never increment,
    /// so a refused call does not consume budget.
    pub fn admit(&mut self, name: &str, arguments: &Value) -> Verdict {
        let key = (name.to_string(), canonical_arguments(arguments));

        if self.exact.get(&key).copied().unwrap_or(0) >= DUPLICATE_LIMIT {
            return Verdict::Duplicate;
        }

        if let Some(&cap) = self.budgets.get(name) {
            if self.per_name.get(name).copied().unwrap_or(0) >= cap {
                return Verdict::Exhausted { cap };
            }
        }

        *self.exact.entry(key).or_insert(0) += 1;
        *self.per_name.entry(name.to_string()).or_insert(0) += 1;
        Verdict::Permit
    }

    /// Total admitted invocations of a tool so far this request
    pub fn dispatched(&self, name: &str) -> u32 {
        self.per_name.get(name).copied().unwrap_or(0)
    }
}

/// Canonical text form of an argument object.
///
/// serde_json's default object representation is a BTreeMap, so serializing
/// a parsed value yields key-sorted text at every nesting level: two
/// argument objects that differ only in key order canonicalize identically.
fn canonical_arguments(arguments: &Value) -> String {
    arguments.to_string()
}
