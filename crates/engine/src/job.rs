// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Job-side records the engine reads and annotates.
//!
//! The engine never owns jobs; callers hand in a [`JobRecord`] (or a bare
//! [`JobRequest`] at admission) and the engine reads the request snapshot,
//! writes decisions into `state_reason`/`state_desc`, and installs derived
//! limits. The request snapshot taken at `begin` is what `fini` reverses,
//! even if limits changed in the interim.

use crate::reason::ReasonCode;
use crate::tables::{AssocId, QosId};
use acctpol_config::{AccountName, Limit, PartitionName, UserId};

/// A memory request, either per allocated node or per allocated CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRequest {
    /// MiB per allocated node.
    PerNode(u64),
    /// MiB per allocated CPU.
    PerCpu(u64),
}

impl MemoryRequest {
    /// Total MiB this request amounts to for a concrete allocation.
    #[must_use]
    pub fn total(self, node_cnt: u64, cpu_cnt: u64) -> u64 {
        match self {
            MemoryRequest::PerNode(mib) => mib.saturating_mul(node_cnt),
            MemoryRequest::PerCpu(mib) => mib.saturating_mul(cpu_cnt),
        }
    }
}

/// Who fixed a request field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetBy {
    /// The field is whatever the user asked for.
    #[default]
    Unset,
    /// The policy engine derived the field; it may re-derive it later.
    Policy,
    /// An administrator pinned the field; the engine must neither reject nor
    /// alter it.
    Admin,
}

impl SetBy {
    /// True when an administrator pinned the field.
    #[must_use]
    pub fn is_admin(self) -> bool {
        matches!(self, SetBy::Admin)
    }

    /// True when the engine derived the field.
    #[must_use]
    pub fn is_policy(self) -> bool {
        matches!(self, SetBy::Policy)
    }
}

/// Per-field provenance markers for the limit-derived parts of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LimitSet {
    /// Provenance of the time limit.
    pub time: SetBy,
    /// Provenance of the CPU ceiling.
    pub max_cpus: SetBy,
    /// Provenance of the CPU floor.
    pub min_cpus: SetBy,
    /// Provenance of the node ceiling.
    pub max_nodes: SetBy,
    /// Provenance of the memory request.
    pub pn_min_mem: SetBy,
}

/// The resource request of a job, as submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobRequest {
    /// Submitting user id.
    pub user_id: UserId,
    /// CPUs the job needs at minimum.
    pub min_cpus: u64,
    /// CPU ceiling, absent when the user left it open.
    pub max_cpus: Option<u64>,
    /// Nodes the job needs at minimum.
    pub min_nodes: u64,
    /// Node ceiling, absent when the user left it open.
    pub max_nodes: Option<u64>,
    /// Memory request, absent when the user left it open.
    pub pn_min_mem: Option<MemoryRequest>,
    /// Requested wall-clock minutes, absent when the user left it open.
    pub time_limit: Option<u32>,
}

impl Default for JobRequest {
    fn default() -> Self {
        JobRequest {
            user_id: 0,
            min_cpus: 1,
            max_cpus: None,
            min_nodes: 1,
            max_nodes: None,
            pn_min_mem: None,
            time_limit: None,
        }
    }
}

impl JobRequest {
    /// Total memory of this request when mapped onto its minimum shape.
    #[must_use]
    pub fn memory(&self) -> u64 {
        match self.pn_min_mem {
            None => 0,
            Some(request) => request.total(self.min_nodes, self.min_cpus),
        }
    }
}

/// A partition as this engine sees it: a wall-clock ceiling and an optional
/// default QoS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRecord {
    /// Name of the partition.
    pub name: PartitionName,
    /// Maximum wall-clock minutes for any job in the partition.
    pub max_time: Limit,
    /// QoS applied to jobs that do not carry one of their own.
    pub qos: Option<QosId>,
}

impl PartitionRecord {
    /// A partition with no ceiling and no default QoS.
    #[must_use]
    pub fn unconstrained(name: PartitionName) -> Self {
        PartitionRecord {
            name,
            max_time: Limit::Unlimited,
            qos: None,
        }
    }
}

/// A job as this engine sees it across its lifecycle.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// Unique job id.
    pub job_id: u32,
    /// Owning user id.
    pub user_id: UserId,
    /// Account the job was submitted under.
    pub account: AccountName,
    /// Partition the job was submitted to.
    pub partition: PartitionRecord,
    /// QoS attached to the job, if any.
    pub qos: Option<QosId>,
    /// Association the job resolved to. Re-bound by the usage mutator when
    /// stale.
    pub assoc: Option<AssocId>,
    /// Request details. Jobs purged from the system may lose these.
    pub details: Option<JobRequest>,
    /// Provenance markers for derived request fields.
    pub limit_set: LimitSet,
    /// Effective wall-clock minutes, once derived or requested.
    pub time_limit: Option<u32>,
    /// Why the job is currently held, if it is.
    pub state_reason: ReasonCode,
    /// Human-readable elaboration of `state_reason`; cleared whenever the
    /// reason is rewritten.
    pub state_desc: Option<String>,
    /// CPUs actually allocated, resolved at begin.
    pub total_cpus: u64,
    /// Nodes actually allocated, resolved at begin.
    pub node_cnt: u64,
    /// Unix time the job started.
    pub start_time: i64,
    /// Seconds the job has spent suspended.
    pub suspended_secs: i64,
    /// Unix time the job is expected to end.
    pub end_time_exp: i64,
}

impl JobRecord {
    /// A fresh record for a job owned by `user_id` under `account`.
    #[must_use]
    pub fn new(
        job_id: u32,
        user_id: UserId,
        account: AccountName,
        partition: PartitionRecord,
    ) -> Self {
        JobRecord {
            job_id,
            user_id,
            account,
            partition,
            qos: None,
            assoc: None,
            details: Some(JobRequest {
                user_id,
                ..JobRequest::default()
            }),
            limit_set: LimitSet::default(),
            time_limit: None,
            state_reason: ReasonCode::WaitNoReason,
            state_desc: None,
            total_cpus: 0,
            node_cnt: 0,
            start_time: 0,
            suspended_secs: 0,
            end_time_exp: 0,
        }
    }

    /// Rewrite the hold reason, clearing the stale description with it.
    pub fn set_state_reason(&mut self, reason: ReasonCode) {
        self.state_reason = reason;
        self.state_desc = None;
    }

    /// Total memory of the job mapped onto its actual allocation.
    #[must_use]
    pub fn allocated_memory(&self) -> u64 {
        match self.details.as_ref().and_then(|details| details.pn_min_mem) {
            None => 0,
            Some(request) => request.total(self.node_cnt, self.total_cpus),
        }
    }

    /// CPU-seconds committed by the job's time limit at its allocation size.
    #[must_use]
    pub fn committed_cpu_run_secs(&self) -> u64 {
        self.committed_cpu_run_secs_for(self.time_limit)
    }

    /// CPU-seconds a hypothetical time limit would commit at the job's
    /// allocation size.
    #[must_use]
    pub fn committed_cpu_run_secs_for(&self, time_limit: Option<u32>) -> u64 {
        let minutes = u64::from(time_limit.unwrap_or(0));
        self.total_cpus.saturating_mul(minutes).saturating_mul(60)
    }
}

#[cfg(test)]
mod tests {
    use super::{JobRecord, JobRequest, MemoryRequest, PartitionRecord};
    use crate::reason::ReasonCode;
    use acctpol_config::Limit;

    fn record() -> JobRecord {
        JobRecord::new(
            11,
            1001,
            "physics".into(),
            PartitionRecord::unconstrained("batch".into()),
        )
    }

    #[test]
    fn memory_normalization_per_cpu_and_per_node() {
        assert_eq!(MemoryRequest::PerCpu(512).total(4, 16), 512 * 16);
        assert_eq!(MemoryRequest::PerNode(2048).total(4, 16), 2048 * 4);

        let request = JobRequest {
            min_cpus: 8,
            min_nodes: 2,
            pn_min_mem: Some(MemoryRequest::PerNode(1024)),
            ..JobRequest::default()
        };
        assert_eq!(request.memory(), 2048);
    }

    #[test]
    fn state_reason_write_clears_description() {
        let mut job = record();
        job.state_desc = Some("held by operator".to_owned());
        job.set_state_reason(ReasonCode::WaitQosGrpCpu);
        assert_eq!(job.state_reason, ReasonCode::WaitQosGrpCpu);
        assert_eq!(job.state_desc, None);
    }

    #[test]
    fn committed_cpu_run_secs_scales_with_allocation() {
        let mut job = record();
        job.total_cpus = 4;
        job.time_limit = Some(30);
        assert_eq!(job.committed_cpu_run_secs(), 4 * 30 * 60);
        assert_eq!(job.committed_cpu_run_secs_for(Some(60)), 4 * 60 * 60);
        assert_eq!(job.committed_cpu_run_secs_for(None), 0);
    }

    #[test]
    fn unconstrained_partition() {
        let part = PartitionRecord::unconstrained("debug".into());
        assert_eq!(part.max_time, Limit::Unlimited);
        assert!(part.qos.is_none());
    }
}
