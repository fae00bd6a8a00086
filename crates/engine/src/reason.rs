// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Reason codes attached to policy decisions.
//!
//! Every negative decision carries one of these codes so the caller can tell
//! which limit produced it. The `WaitQos*`/`WaitAssoc*` families form the
//! *limit-wait band*: a job holding one of them is merely held and becomes
//! eligible again once usage drains. `FailTimeout` and `FailAccount` are
//! terminal.
//!
//! Variants are declared in band order with explicit discriminants so the
//! band test is a range check.

use acctpol_config::Tres;
use std::fmt;

/// Why a policy decision went against a job.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReasonCode {
    /// No policy objection recorded.
    #[default]
    WaitNoReason = 0,

    /// QoS group CPU cap.
    WaitQosGrpCpu = 10,
    /// QoS historical CPU-minutes cap.
    WaitQosGrpCpuMin = 11,
    /// QoS committed CPU-minutes cap.
    WaitQosGrpCpuRunMin = 12,
    /// QoS concurrent-jobs cap.
    WaitQosGrpJob = 13,
    /// QoS group memory cap.
    WaitQosGrpMem = 14,
    /// QoS group node cap.
    WaitQosGrpNode = 15,
    /// QoS submitted-jobs cap.
    WaitQosGrpSubJob = 16,
    /// QoS aggregate wall-clock cap.
    WaitQosGrpWall = 17,
    /// QoS per-job CPU-minutes cap.
    WaitQosMaxCpuMinsPerJob = 18,
    /// QoS per-job CPU cap.
    WaitQosMaxCpuPerJob = 19,
    /// QoS per-user CPU cap.
    WaitQosMaxCpuPerUser = 20,
    /// QoS per-user concurrent-jobs cap.
    WaitQosMaxJobPerUser = 21,
    /// QoS per-job node cap.
    WaitQosMaxNodePerJob = 22,
    /// QoS per-user node cap.
    WaitQosMaxNodePerUser = 23,
    /// QoS per-user submitted-jobs cap.
    WaitQosMaxSubJobPerUser = 24,
    /// QoS per-job wall-clock cap.
    WaitQosMaxWallPerJob = 25,
    /// QoS per-job CPU floor.
    WaitQosMinCpu = 26,

    /// Association group CPU cap.
    WaitAssocGrpCpu = 27,
    /// Association historical CPU-minutes cap.
    WaitAssocGrpCpuMin = 28,
    /// Association committed CPU-minutes cap.
    WaitAssocGrpCpuRunMin = 29,
    /// Association concurrent-jobs cap.
    WaitAssocGrpJob = 30,
    /// Association group memory cap.
    WaitAssocGrpMem = 31,
    /// Association group node cap.
    WaitAssocGrpNode = 32,
    /// Association submitted-jobs cap.
    WaitAssocGrpSubJob = 33,
    /// Association aggregate wall-clock cap.
    WaitAssocGrpWall = 34,
    /// Association concurrent-jobs cap on the leaf.
    WaitAssocMaxJob = 35,
    /// Association per-job CPU-minutes cap.
    WaitAssocMaxCpuMinsPerJob = 36,
    /// Association per-job CPU cap.
    WaitAssocMaxCpuPerJob = 37,
    /// Association per-job node cap.
    WaitAssocMaxNodePerJob = 38,
    /// Association submitted-jobs cap on the leaf.
    WaitAssocMaxSubJob = 39,
    /// Association per-job wall-clock cap.
    WaitAssocMaxWallPerJob = 40,

    /// The job exhausted a time-based limit while running.
    FailTimeout = 100,
    /// The job's account is invalid or no longer exists.
    FailAccount = 101,
}

impl ReasonCode {
    /// True when this code is in the limit-wait band: the job is held, not
    /// rejected, and the scheduler should re-test it as usage drains.
    #[must_use]
    pub fn is_limit_wait(self) -> bool {
        let code = self as u16;
        (ReasonCode::WaitQosGrpCpu as u16..=ReasonCode::WaitAssocMaxWallPerJob as u16)
            .contains(&code)
    }

    /// The association group-cap code for a resource axis.
    #[must_use]
    pub fn assoc_grp(tres: Tres) -> ReasonCode {
        match tres {
            Tres::Cpu => ReasonCode::WaitAssocGrpCpu,
            Tres::Mem => ReasonCode::WaitAssocGrpMem,
            Tres::Node => ReasonCode::WaitAssocGrpNode,
        }
    }

    /// Stable wire name of this code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::WaitNoReason => "WAIT_NO_REASON",
            ReasonCode::WaitQosGrpCpu => "WAIT_QOS_GRP_CPU",
            ReasonCode::WaitQosGrpCpuMin => "WAIT_QOS_GRP_CPU_MIN",
            ReasonCode::WaitQosGrpCpuRunMin => "WAIT_QOS_GRP_CPU_RUN_MIN",
            ReasonCode::WaitQosGrpJob => "WAIT_QOS_GRP_JOB",
            ReasonCode::WaitQosGrpMem => "WAIT_QOS_GRP_MEM",
            ReasonCode::WaitQosGrpNode => "WAIT_QOS_GRP_NODE",
            ReasonCode::WaitQosGrpSubJob => "WAIT_QOS_GRP_SUB_JOB",
            ReasonCode::WaitQosGrpWall => "WAIT_QOS_GRP_WALL",
            ReasonCode::WaitQosMaxCpuMinsPerJob => "WAIT_QOS_MAX_CPU_MINS_PER_JOB",
            ReasonCode::WaitQosMaxCpuPerJob => "WAIT_QOS_MAX_CPU_PER_JOB",
            ReasonCode::WaitQosMaxCpuPerUser => "WAIT_QOS_MAX_CPU_PER_USER",
            ReasonCode::WaitQosMaxJobPerUser => "WAIT_QOS_MAX_JOB_PER_USER",
            ReasonCode::WaitQosMaxNodePerJob => "WAIT_QOS_MAX_NODE_PER_JOB",
            ReasonCode::WaitQosMaxNodePerUser => "WAIT_QOS_MAX_NODE_PER_USER",
            ReasonCode::WaitQosMaxSubJobPerUser => "WAIT_QOS_MAX_SUB_JOB_PER_USER",
            ReasonCode::WaitQosMaxWallPerJob => "WAIT_QOS_MAX_WALL_PER_JOB",
            ReasonCode::WaitQosMinCpu => "WAIT_QOS_MIN_CPU",
            ReasonCode::WaitAssocGrpCpu => "WAIT_ASSOC_GRP_CPU",
            ReasonCode::WaitAssocGrpCpuMin => "WAIT_ASSOC_GRP_CPU_MIN",
            ReasonCode::WaitAssocGrpCpuRunMin => "WAIT_ASSOC_GRP_CPU_RUN_MIN",
            ReasonCode::WaitAssocGrpJob => "WAIT_ASSOC_GRP_JOB",
            ReasonCode::WaitAssocGrpMem => "WAIT_ASSOC_GRP_MEM",
            ReasonCode::WaitAssocGrpNode => "WAIT_ASSOC_GRP_NODE",
            ReasonCode::WaitAssocGrpSubJob => "WAIT_ASSOC_GRP_SUB_JOB",
            ReasonCode::WaitAssocGrpWall => "WAIT_ASSOC_GRP_WALL",
            ReasonCode::WaitAssocMaxJob => "WAIT_ASSOC_MAX_JOB",
            ReasonCode::WaitAssocMaxCpuMinsPerJob => "WAIT_ASSOC_MAX_CPU_MINS_PER_JOB",
            ReasonCode::WaitAssocMaxCpuPerJob => "WAIT_ASSOC_MAX_CPU_PER_JOB",
            ReasonCode::WaitAssocMaxNodePerJob => "WAIT_ASSOC_MAX_NODE_PER_JOB",
            ReasonCode::WaitAssocMaxSubJob => "WAIT_ASSOC_MAX_SUB_JOB",
            ReasonCode::WaitAssocMaxWallPerJob => "WAIT_ASSOC_MAX_WALL_PER_JOB",
            ReasonCode::FailTimeout => "FAIL_TIMEOUT",
            ReasonCode::FailAccount => "FAIL_ACCOUNT",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ReasonCode;

    #[test]
    fn limit_wait_band_bounds() {
        assert!(!ReasonCode::WaitNoReason.is_limit_wait());
        assert!(ReasonCode::WaitQosGrpCpu.is_limit_wait());
        assert!(ReasonCode::WaitQosMaxSubJobPerUser.is_limit_wait());
        assert!(ReasonCode::WaitAssocMaxWallPerJob.is_limit_wait());
        assert!(!ReasonCode::FailTimeout.is_limit_wait());
        assert!(!ReasonCode::FailAccount.is_limit_wait());
    }

    #[test]
    fn wire_names_round_trip_the_family_shape() {
        assert_eq!(ReasonCode::WaitQosGrpCpu.to_string(), "WAIT_QOS_GRP_CPU");
        assert_eq!(
            ReasonCode::WaitAssocMaxNodePerJob.to_string(),
            "WAIT_ASSOC_MAX_NODE_PER_JOB"
        );
    }
}
