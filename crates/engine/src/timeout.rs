// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Runtime timeout evaluation.
//!
//! A periodic read-only scan over running jobs: a job times out once a
//! time-based limit is exhausted, be it historical CPU-minutes, aggregate
//! wall minutes, or its own CPU-minute budget. Under safe-limits enforcement the
//! scan is suppressed entirely: finishability was proven at start, so there
//! is no runtime cancellation.

use crate::job::JobRecord;
use crate::precedence::{QosOut, QosPair};
use crate::reason::ReasonCode;
use crate::tables::{AssocTable, QosTable};

/// Decide whether `job` has exhausted a time-based limit at `now_secs`.
/// Sets `FAIL_TIMEOUT` on the job and returns true when it has; the caller
/// kills the job.
pub(crate) fn job_time_out(
    qos_table: &QosTable,
    assocs: &AssocTable,
    pair: QosPair,
    job: &mut JobRecord,
    now_secs: i64,
    safe_limits: bool,
) -> bool {
    if safe_limits {
        return false;
    }

    let run_secs = (now_secs - job.start_time - job.suspended_secs).max(0) as u64;
    let job_cpu_usage_mins = (run_secs / 60).saturating_mul(job.total_cpus);

    let mut out = QosOut::default();

    for qos_id in pair.iter() {
        let Some(qos) = qos_table.get(qos_id) else {
            continue;
        };
        let usage = &qos.usage;

        if let Some(cap) = QosOut::claim(&mut out.grp_cpu_mins, qos.limits.grp_cpu_mins) {
            if usage.usage_raw / 60.0 >= cap as f64 {
                job.set_state_reason(ReasonCode::FailTimeout);
                return true;
            }
        }

        if let Some(cap) = QosOut::claim(&mut out.grp_wall, qos.limits.grp_wall) {
            if usage.grp_used_wall / 60.0 >= cap as f64 {
                job.set_state_reason(ReasonCode::FailTimeout);
                return true;
            }
        }

        if let Some(cap) = QosOut::claim(&mut out.max_cpu_mins_pj, qos.limits.max_cpu_mins_pj) {
            if job_cpu_usage_mins >= cap {
                job.set_state_reason(ReasonCode::FailTimeout);
                return true;
            }
        }
    }

    let Some(assoc_id) = job.assoc else {
        return false;
    };
    for id in assocs.chain_to_root(assoc_id) {
        let Some(assoc) = assocs.get(id) else { continue };
        // The root association is not consulted for timeouts.
        if assoc.is_root() {
            break;
        }
        let usage = &assoc.usage;

        if !out.grp_cpu_mins.is_finite()
            && assoc
                .effective
                .grp_cpu_mins()
                .reached_by_f64(usage.usage_raw / 60.0)
        {
            job.set_state_reason(ReasonCode::FailTimeout);
            return true;
        }

        if !out.grp_wall.is_finite()
            && assoc
                .effective
                .grp_wall
                .reached_by_f64(usage.grp_used_wall / 60.0)
        {
            job.set_state_reason(ReasonCode::FailTimeout);
            return true;
        }

        if !out.max_cpu_mins_pj.is_finite()
            && assoc
                .effective
                .max_cpu_mins_pj()
                .reached_by(job_cpu_usage_mins)
        {
            job.set_state_reason(ReasonCode::FailTimeout);
            return true;
        }
    }

    false
}
