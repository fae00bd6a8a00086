// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! QoS precedence resolution and the first-claim accumulator.
//!
//! A job can be governed by up to two QoS classes: its own and the
//! partition's. Checks iterate the primary first; the first QoS that
//! supplies a finite value for a limit slot *claims* that slot, and later
//! passes (the secondary QoS, then the association walk) observe the claim
//! and skip re-checking it.

use crate::tables::{QosId, QosTable};
use acctpol_config::Limit;

/// The ordered QoS pair governing a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QosPair {
    /// Checked first; claims limit slots ahead of the secondary.
    pub primary: Option<QosId>,
    /// Checked second, only for slots the primary left unclaimed.
    pub secondary: Option<QosId>,
}

impl QosPair {
    /// The pair in iteration order, skipping absent entries.
    #[must_use]
    pub fn iter(self) -> impl Iterator<Item = QosId> {
        [self.primary, self.secondary].into_iter().flatten()
    }
}

/// Resolve the effective QoS pair for a job.
///
/// The job QoS wins the primary slot only when it carries the partition
/// override flag; otherwise the partition QoS leads. A pair that collapses
/// to the same class keeps only the primary.
#[must_use]
pub fn resolve_qos_pair(
    job_qos: Option<QosId>,
    partition_qos: Option<QosId>,
    qos_table: &QosTable,
) -> QosPair {
    let pair = match (job_qos, partition_qos) {
        (None, None) => QosPair::default(),
        (None, Some(part)) => QosPair {
            primary: Some(part),
            secondary: None,
        },
        (Some(job), None) => QosPair {
            primary: Some(job),
            secondary: None,
        },
        (Some(job), Some(part)) => {
            let job_overrides = qos_table
                .get(job)
                .is_some_and(|record| record.overrides_partition());
            if job_overrides {
                QosPair {
                    primary: Some(job),
                    secondary: Some(part),
                }
            } else {
                QosPair {
                    primary: Some(part),
                    secondary: Some(job),
                }
            }
        }
    };
    if pair.primary == pair.secondary {
        QosPair {
            primary: pair.primary,
            secondary: None,
        }
    } else {
        pair
    }
}

/// The scratch record tracking which limit slots a QoS pass has claimed.
///
/// Every slot starts unlimited; once a pass writes a finite value the slot
/// is claimed and later passes skip it.
#[derive(Debug, Clone, Copy, Default)]
pub struct QosOut {
    /// Claimed group CPU cap.
    pub grp_cpus: Limit,
    /// Claimed group memory cap.
    pub grp_mem: Limit,
    /// Claimed group node cap.
    pub grp_nodes: Limit,
    /// Claimed group concurrent-jobs cap.
    pub grp_jobs: Limit,
    /// Claimed group submitted-jobs cap.
    pub grp_submit_jobs: Limit,
    /// Claimed group wall-clock cap.
    pub grp_wall: Limit,
    /// Claimed group historical CPU-minutes cap.
    pub grp_cpu_mins: Limit,
    /// Claimed group committed CPU-minutes cap.
    pub grp_cpu_run_mins: Limit,
    /// Claimed per-job CPU cap.
    pub max_cpus_pj: Limit,
    /// Claimed per-job CPU floor.
    pub min_cpus_pj: Limit,
    /// Claimed per-job node cap.
    pub max_nodes_pj: Limit,
    /// Claimed per-job wall-clock cap.
    pub max_wall_pj: Limit,
    /// Claimed per-job CPU-minutes cap.
    pub max_cpu_mins_pj: Limit,
    /// Claimed per-user CPU cap.
    pub max_cpus_pu: Limit,
    /// Claimed per-user node cap.
    pub max_nodes_pu: Limit,
    /// Claimed per-user concurrent-jobs cap.
    pub max_jobs_pu: Limit,
    /// Claimed per-user submitted-jobs cap.
    pub max_submit_jobs_pu: Limit,
}

impl QosOut {
    /// Claim `value` into `slot` if the slot is still open and the value is
    /// finite. Returns the cap to check now, or `None` when the check must
    /// be skipped (slot already claimed, or no finite value to claim).
    pub fn claim(slot: &mut Limit, value: Limit) -> Option<u64> {
        if slot.is_finite() {
            return None;
        }
        let cap = value.finite()?;
        *slot = value;
        Some(cap)
    }
}
