// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Live usage counters.
//!
//! Counters are maintained by symmetric add/subtract on every lifecycle
//! transition, so at any instant a QoS's `grp_used_*` equals the sum of the
//! contributions of its live jobs, and a per-user entry equals that QoS's
//! contributions from that user. Counters never go negative: a decrement
//! that would cross zero clamps and emits the underflow diagnostic.

use acctpol_config::{TresCounts, UserId};
use std::collections::HashMap;

/// Decrement `counter` by `delta`, clamping at zero with a diagnostic.
pub(crate) fn refund(counter: &mut u64, delta: u64, scope: &str, what: &str) {
    if *counter >= delta {
        *counter -= delta;
    } else {
        tracing::debug!(%scope, %what, current = *counter, delta, "usage underflow, clamping to zero");
        *counter = 0;
    }
}

/// Decrement a 32-bit `counter` by `delta`, clamping at zero with a
/// diagnostic.
pub(crate) fn refund_u32(counter: &mut u32, delta: u32, scope: &str, what: &str) {
    if *counter >= delta {
        *counter -= delta;
    } else {
        tracing::debug!(%scope, %what, current = *counter, delta, "usage underflow, clamping to zero");
        *counter = 0;
    }
}

/// Apply a signed delta to `counter`, clamping a crossing of zero with a
/// diagnostic.
pub(crate) fn apply_signed(counter: &mut u64, delta: i64, scope: &str, what: &str) {
    if delta >= 0 {
        *counter = counter.saturating_add(delta as u64);
    } else {
        refund(counter, delta.unsigned_abs(), scope, what);
    }
}

/// Per-user usage inside a QoS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserUsage {
    /// Running jobs of this user in the QoS.
    pub jobs: u32,
    /// Jobs of this user in the system under the QoS.
    pub submit_jobs: u32,
    /// CPUs allocated to this user's running jobs in the QoS.
    pub cpus: u64,
    /// Nodes allocated to this user's running jobs in the QoS.
    pub nodes: u64,
}

impl UserUsage {
    /// True when every counter is zero and the entry can be dropped.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.jobs == 0 && self.submit_jobs == 0 && self.cpus == 0 && self.nodes == 0
    }
}

/// Live usage aggregated over a QoS.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QosUsage {
    /// Running jobs.
    pub grp_used_jobs: u32,
    /// Jobs in the system (pending or running).
    pub grp_used_submit_jobs: u32,
    /// CPUs allocated to running jobs.
    pub grp_used_cpus: u64,
    /// Memory (MiB) allocated to running jobs.
    pub grp_used_mem: u64,
    /// Nodes allocated to running jobs.
    pub grp_used_nodes: u64,
    /// Aggregate wall-clock seconds consumed, decayed by the priority
    /// subsystem.
    pub grp_used_wall: f64,
    /// CPU-seconds committed by running jobs' time limits.
    pub grp_used_cpu_run_secs: u64,
    /// Historical CPU-seconds consumed.
    pub usage_raw: f64,
    /// Per-user usage, keyed by user id. Entries are created on first use
    /// and dropped when they return to zero.
    pub user_usage: HashMap<UserId, UserUsage>,
}

impl QosUsage {
    /// The per-user entry for `user_id`, created on first use.
    pub fn user_entry(&mut self, user_id: UserId) -> &mut UserUsage {
        self.user_usage.entry(user_id).or_default()
    }

    /// Read-only view of the per-user entry for `user_id`.
    #[must_use]
    pub fn user(&self, user_id: UserId) -> UserUsage {
        self.user_usage.get(&user_id).copied().unwrap_or_default()
    }

    /// Drop the per-user entry for `user_id` if every counter is zero.
    pub fn prune_user(&mut self, user_id: UserId) {
        if self.user_usage.get(&user_id).is_some_and(UserUsage::is_zero) {
            let _ = self.user_usage.remove(&user_id);
        }
    }
}

/// Live usage aggregated over an association's subtree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssocUsage {
    /// Running jobs.
    pub used_jobs: u32,
    /// Jobs in the system (pending or running).
    pub used_submit_jobs: u32,
    /// Per-resource allocation of running jobs.
    pub grp_used_tres: TresCounts,
    /// Aggregate wall-clock seconds consumed, decayed by the priority
    /// subsystem.
    pub grp_used_wall: f64,
    /// CPU-seconds committed by running jobs' time limits.
    pub used_cpu_run_secs: u64,
    /// Historical CPU-seconds consumed.
    pub usage_raw: f64,
}
