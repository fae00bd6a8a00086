// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The usage mutator.
//!
//! Applies submit/begin/finish deltas to the live counters of the QoS pair
//! and every association up to the root, and rewrites the committed
//! CPU-minute contribution when a running job's time limit is altered. All
//! adjustments run under the write bundle; decrements clamp at zero with the
//! underflow diagnostic. The deltas of a finish are computed from the job's
//! own snapshot, so they mirror exactly what begin added even if limits
//! changed in the interim.

use crate::job::JobRecord;
use crate::precedence::{QosPair, resolve_qos_pair};
use crate::tables::{AssocId, AssocTable, QosTable};
use crate::usage::{apply_signed, refund, refund_u32};
use acctpol_config::Tres;

/// A lifecycle transition the mutator applies to the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UsageOp {
    /// The job entered the system.
    AddSubmit,
    /// The job left the system without running.
    RemSubmit,
    /// The job started running.
    Begin,
    /// The job finished; reverses begin and releases the submission.
    Fini,
}

/// Confirm the job's association reference, re-binding it when stale.
/// Returns `None` (and leaves the job untouched) when no association can be
/// resolved; the caller must then skip the mutation.
pub(crate) fn valid_job_assoc(assocs: &AssocTable, job: &mut JobRecord) -> Option<AssocId> {
    if let Some(id) = job.assoc {
        if let Some(record) = assocs.get(id) {
            if record.user == Some(job.user_id) && record.account == job.account {
                return Some(id);
            }
        }
    }
    let rebound = assocs.find(&job.account, Some(&job.partition.name), job.user_id)?;
    tracing::debug!(
        job_id = job.job_id,
        account = %job.account,
        %rebound,
        "re-bound stale association reference"
    );
    job.assoc = Some(rebound);
    Some(rebound)
}

/// Apply `op` for `job` to the QoS pair and the association chain. Returns
/// false when the job has no resolvable association and nothing was done.
pub(crate) fn adjust_limit_usage(
    assocs: &mut AssocTable,
    qos_table: &mut QosTable,
    job: &mut JobRecord,
    op: UsageOp,
) -> bool {
    let Some(assoc_id) = valid_job_assoc(assocs, job) else {
        tracing::debug!(
            job_id = job.job_id,
            account = %job.account,
            user_id = job.user_id,
            "no association for job, skipping usage adjustment"
        );
        return false;
    };

    let job_memory = job.allocated_memory();
    let run_secs = job.committed_cpu_run_secs();
    let pair = resolve_qos_pair(job.qos, job.partition.qos, qos_table);

    for qos_id in pair.iter() {
        let Some(qos) = qos_table.get_mut(qos_id) else {
            continue;
        };
        let scope = qos.scope();
        let usage = &mut qos.usage;
        match op {
            UsageOp::AddSubmit => {
                usage.grp_used_submit_jobs += 1;
                usage.user_entry(job.user_id).submit_jobs += 1;
            }
            UsageOp::RemSubmit => {
                refund_u32(&mut usage.grp_used_submit_jobs, 1, &scope, "grp_used_submit_jobs");
                let entry = usage.user_entry(job.user_id);
                refund_u32(&mut entry.submit_jobs, 1, &scope, "user submit_jobs");
                usage.prune_user(job.user_id);
            }
            UsageOp::Begin => {
                usage.grp_used_jobs += 1;
                usage.grp_used_cpus += job.total_cpus;
                usage.grp_used_mem += job_memory;
                usage.grp_used_nodes += job.node_cnt;
                usage.grp_used_cpu_run_secs += run_secs;
                let entry = usage.user_entry(job.user_id);
                entry.jobs += 1;
                entry.cpus += job.total_cpus;
                entry.nodes += job.node_cnt;
            }
            UsageOp::Fini => {
                refund_u32(&mut usage.grp_used_jobs, 1, &scope, "grp_used_jobs");
                refund(&mut usage.grp_used_cpus, job.total_cpus, &scope, "grp_used_cpus");
                refund(&mut usage.grp_used_mem, job_memory, &scope, "grp_used_mem");
                refund(&mut usage.grp_used_nodes, job.node_cnt, &scope, "grp_used_nodes");
                refund(
                    &mut usage.grp_used_cpu_run_secs,
                    run_secs,
                    &scope,
                    "grp_used_cpu_run_secs",
                );
                refund_u32(&mut usage.grp_used_submit_jobs, 1, &scope, "grp_used_submit_jobs");
                let entry = usage.user_entry(job.user_id);
                refund_u32(&mut entry.jobs, 1, &scope, "user jobs");
                refund(&mut entry.cpus, job.total_cpus, &scope, "user cpus");
                refund(&mut entry.nodes, job.node_cnt, &scope, "user nodes");
                refund_u32(&mut entry.submit_jobs, 1, &scope, "user submit_jobs");
                usage.prune_user(job.user_id);
            }
        }
    }

    for id in assocs.chain_to_root(assoc_id) {
        let Some(assoc) = assocs.get_mut(id) else { continue };
        let scope = assoc.scope();
        let usage = &mut assoc.usage;
        match op {
            UsageOp::AddSubmit => {
                usage.used_submit_jobs += 1;
            }
            UsageOp::RemSubmit => {
                refund_u32(&mut usage.used_submit_jobs, 1, &scope, "used_submit_jobs");
            }
            UsageOp::Begin => {
                usage.used_jobs += 1;
                usage.grp_used_tres[Tres::Cpu] += job.total_cpus;
                usage.grp_used_tres[Tres::Mem] += job_memory;
                usage.grp_used_tres[Tres::Node] += job.node_cnt;
                usage.used_cpu_run_secs += run_secs;
            }
            UsageOp::Fini => {
                refund_u32(&mut usage.used_jobs, 1, &scope, "used_jobs");
                refund(
                    &mut usage.grp_used_tres[Tres::Cpu],
                    job.total_cpus,
                    &scope,
                    "grp_used_tres[cpu]",
                );
                refund(
                    &mut usage.grp_used_tres[Tres::Mem],
                    job_memory,
                    &scope,
                    "grp_used_tres[mem]",
                );
                refund(
                    &mut usage.grp_used_tres[Tres::Node],
                    job.node_cnt,
                    &scope,
                    "grp_used_tres[node]",
                );
                refund(&mut usage.used_cpu_run_secs, run_secs, &scope, "used_cpu_run_secs");
                refund_u32(&mut usage.used_submit_jobs, 1, &scope, "used_submit_jobs");
            }
        }
    }

    true
}

/// Rewrite the committed CPU-minute contribution of a running job whose time
/// limit changes to `new_time_limit`. Limits are not re-validated here; the
/// runtime timeout path is the safety net for alters that overshoot.
pub(crate) fn alter_job(
    assocs: &mut AssocTable,
    qos_table: &mut QosTable,
    job: &mut JobRecord,
    new_time_limit: u32,
) -> bool {
    let Some(assoc_id) = valid_job_assoc(assocs, job) else {
        tracing::debug!(
            job_id = job.job_id,
            account = %job.account,
            user_id = job.user_id,
            "no association for job, skipping alter"
        );
        return false;
    };

    let old_secs = job.committed_cpu_run_secs();
    let new_secs = job.committed_cpu_run_secs_for(Some(new_time_limit));
    let delta = new_secs as i64 - old_secs as i64;
    let pair: QosPair = resolve_qos_pair(job.qos, job.partition.qos, qos_table);

    for qos_id in pair.iter() {
        let Some(qos) = qos_table.get_mut(qos_id) else {
            continue;
        };
        let scope = qos.scope();
        apply_signed(
            &mut qos.usage.grp_used_cpu_run_secs,
            delta,
            &scope,
            "grp_used_cpu_run_secs",
        );
    }

    for id in assocs.chain_to_root(assoc_id) {
        let Some(assoc) = assocs.get_mut(id) else { continue };
        let scope = assoc.scope();
        apply_signed(
            &mut assoc.usage.used_cpu_run_secs,
            delta,
            &scope,
            "used_cpu_run_secs",
        );
    }

    true
}
