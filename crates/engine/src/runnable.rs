// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Start-time runnability checks.
//!
//! Pre-select runs before node selection and considers only limits that do
//! not depend on the chosen allocation. Post-select runs with the selected
//! node and CPU counts and covers the allocation-dependent limits, including
//! the safe-limits flavor of the historical CPU-minute caps. Both write the
//! hold reason into the job and return false to tell the scheduler to keep
//! the job pending; neither mutates counters.

use crate::job::{JobRecord, MemoryRequest};
use crate::precedence::{QosOut, QosPair};
use crate::reason::ReasonCode;
use crate::tables::{AssocRecord, AssocTable, QosRecord, QosTable};
use acctpol_config::Tres;

/// True when the job's recorded state reason does not block it on a limit.
#[must_use]
pub(crate) fn job_runnable_state(job: &JobRecord) -> bool {
    !job.state_reason.is_limit_wait()
}

/// Configuration-only runnability: `grp_jobs`, `grp_wall`, `max_jobs_pu` and
/// `max_wall_pj`, for the QoS pair and every association up the tree.
pub(crate) fn pre_select(
    qos_table: &QosTable,
    assocs: &AssocTable,
    pair: QosPair,
    job: &mut JobRecord,
) -> bool {
    // A stale hold from an earlier pass is re-derived from scratch.
    if job.state_reason.is_limit_wait() {
        job.set_state_reason(ReasonCode::WaitNoReason);
    }

    let mut out = QosOut::default();

    for qos_id in pair.iter() {
        let Some(qos) = qos_table.get(qos_id) else {
            continue;
        };
        if let Some(reason) = qos_pre_select_hold(qos, &mut out, job) {
            job.set_state_reason(reason);
            return false;
        }
    }

    let Some(assoc_id) = job.assoc else {
        job.set_state_reason(ReasonCode::FailAccount);
        return false;
    };
    for (depth, id) in assocs.chain_to_root(assoc_id).into_iter().enumerate() {
        let Some(assoc) = assocs.get(id) else { continue };
        if let Some(reason) = assoc_pre_select_hold(assoc, &out, job, depth == 0) {
            job.set_state_reason(reason);
            return false;
        }
    }

    true
}

fn qos_pre_select_hold(
    qos: &QosRecord,
    out: &mut QosOut,
    job: &JobRecord,
) -> Option<ReasonCode> {
    let usage = &qos.usage;
    let user = usage.user(job.user_id);

    if let Some(cap) = QosOut::claim(&mut out.grp_jobs, qos.limits.grp_jobs) {
        if u64::from(usage.grp_used_jobs) >= cap {
            return Some(ReasonCode::WaitQosGrpJob);
        }
    }

    if let Some(cap) = QosOut::claim(&mut out.grp_wall, qos.limits.grp_wall) {
        if (usage.grp_used_wall / 60.0) as u64 >= cap {
            return Some(ReasonCode::WaitQosGrpWall);
        }
    }

    if let Some(cap) = QosOut::claim(&mut out.max_jobs_pu, qos.limits.max_jobs_pu) {
        if u64::from(user.jobs) >= cap {
            return Some(ReasonCode::WaitQosMaxJobPerUser);
        }
    }

    // Enforces caps lowered after the job was admitted.
    if let Some(cap) = QosOut::claim(&mut out.max_wall_pj, qos.limits.max_wall_pj) {
        if job
            .time_limit
            .is_some_and(|minutes| u64::from(minutes) > cap)
        {
            return Some(ReasonCode::WaitQosMaxWallPerJob);
        }
    }

    None
}

fn assoc_pre_select_hold(
    assoc: &AssocRecord,
    out: &QosOut,
    job: &JobRecord,
    leaf: bool,
) -> Option<ReasonCode> {
    let eff = assoc.effective;
    let usage = &assoc.usage;

    if !out.grp_jobs.is_finite() && eff.grp_jobs.reached_by(u64::from(usage.used_jobs)) {
        return Some(ReasonCode::WaitAssocGrpJob);
    }

    if !out.grp_wall.is_finite() && eff.grp_wall.reached_by((usage.grp_used_wall / 60.0) as u64) {
        return Some(ReasonCode::WaitAssocGrpWall);
    }

    if !leaf {
        return None;
    }

    if eff.max_jobs.reached_by(u64::from(usage.used_jobs)) {
        return Some(ReasonCode::WaitAssocMaxJob);
    }

    if !out.max_wall_pj.is_finite()
        && job
            .time_limit
            .is_some_and(|minutes| eff.max_wall_pj.exceeded_by(u64::from(minutes)))
    {
        return Some(ReasonCode::WaitAssocMaxWallPerJob);
    }

    None
}

/// One post-select runnability run, at a concrete allocation.
struct PostSelect {
    node_cnt: u64,
    cpu_cnt: u64,
    job_memory: u64,
    memory_exempt: bool,
    /// Requested wall minutes times allocated CPUs.
    job_cpu_time_limit: u64,
    safe_limits: bool,
    out: QosOut,
}

/// Allocation-aware runnability for the QoS pair and the association chain.
///
/// `pn_min_mem` is the selected per-node or per-CPU memory; `safe_limits`
/// requires the job to be able to finish within the remaining historical
/// CPU-minute budget rather than merely start under it.
pub(crate) fn post_select(
    qos_table: &QosTable,
    assocs: &AssocTable,
    pair: QosPair,
    job: &mut JobRecord,
    node_cnt: u64,
    cpu_cnt: u64,
    pn_min_mem: Option<MemoryRequest>,
    safe_limits: bool,
) -> bool {
    let job_memory = pn_min_mem.map_or(0, |mem| mem.total(node_cnt, cpu_cnt));
    let memory_exempt =
        job.limit_set.pn_min_mem.is_admin() || job.limit_set.min_cpus.is_admin();
    let mut check = PostSelect {
        node_cnt,
        cpu_cnt,
        job_memory,
        memory_exempt,
        job_cpu_time_limit: u64::from(job.time_limit.unwrap_or(0)).saturating_mul(cpu_cnt),
        safe_limits,
        out: QosOut::default(),
    };

    for qos_id in pair.iter() {
        let Some(qos) = qos_table.get(qos_id) else {
            continue;
        };
        if let Some(reason) = check.qos_hold(qos, job.user_id) {
            job.set_state_reason(reason);
            return false;
        }
    }

    let Some(assoc_id) = job.assoc else {
        job.set_state_reason(ReasonCode::FailAccount);
        return false;
    };
    for (depth, id) in assocs.chain_to_root(assoc_id).into_iter().enumerate() {
        let Some(assoc) = assocs.get(id) else { continue };
        if let Some(reason) = check.assoc_hold(assoc, depth == 0) {
            job.set_state_reason(reason);
            return false;
        }
    }

    true
}

impl PostSelect {
    /// Historical CPU-minutes cap, in both enforcement flavors.
    fn cpu_mins_hold(&self, cap: u64, usage_mins: f64, cpu_run_mins: u64) -> bool {
        if self.safe_limits {
            // The job must fit in the remaining budget to ever finish.
            (self.job_cpu_time_limit + cpu_run_mins) as f64 > cap as f64 - usage_mins
        } else {
            usage_mins >= cap as f64
        }
    }

    fn qos_hold(&mut self, qos: &QosRecord, user_id: u32) -> Option<ReasonCode> {
        let limits = qos.limits;
        let usage = &qos.usage;
        let user = usage.user(user_id);
        let usage_mins = usage.usage_raw / 60.0;
        let cpu_run_mins = usage.grp_used_cpu_run_secs / 60;

        if let Some(cap) = QosOut::claim(&mut self.out.grp_cpu_mins, limits.grp_cpu_mins) {
            if self.cpu_mins_hold(cap, usage_mins, cpu_run_mins) {
                return Some(ReasonCode::WaitQosGrpCpuMin);
            }
        }

        if let Some(cap) = QosOut::claim(&mut self.out.grp_cpus, limits.grp_cpus) {
            if self.cpu_cnt > cap || usage.grp_used_cpus + self.cpu_cnt > cap {
                return Some(ReasonCode::WaitQosGrpCpu);
            }
        }

        if !self.memory_exempt {
            if let Some(cap) = QosOut::claim(&mut self.out.grp_mem, limits.grp_mem) {
                if self.job_memory > cap || usage.grp_used_mem + self.job_memory > cap {
                    return Some(ReasonCode::WaitQosGrpMem);
                }
            }
        }

        if let Some(cap) = QosOut::claim(&mut self.out.grp_cpu_run_mins, limits.grp_cpu_run_mins)
        {
            if cpu_run_mins + self.job_cpu_time_limit > cap {
                return Some(ReasonCode::WaitQosGrpCpuRunMin);
            }
        }

        if let Some(cap) = QosOut::claim(&mut self.out.grp_nodes, limits.grp_nodes) {
            if self.node_cnt > cap || usage.grp_used_nodes + self.node_cnt > cap {
                return Some(ReasonCode::WaitQosGrpNode);
            }
        }

        if let Some(cap) = QosOut::claim(&mut self.out.max_cpu_mins_pj, limits.max_cpu_mins_pj) {
            if self.job_cpu_time_limit > cap {
                return Some(ReasonCode::WaitQosMaxCpuMinsPerJob);
            }
        }

        if let Some(cap) = QosOut::claim(&mut self.out.max_cpus_pj, limits.max_cpus_pj) {
            if self.cpu_cnt > cap {
                return Some(ReasonCode::WaitQosMaxCpuPerJob);
            }
        }

        if let Some(floor) = QosOut::claim(&mut self.out.min_cpus_pj, limits.min_cpus_pj) {
            if self.cpu_cnt < floor {
                return Some(ReasonCode::WaitQosMinCpu);
            }
        }

        if let Some(cap) = QosOut::claim(&mut self.out.max_nodes_pj, limits.max_nodes_pj) {
            if self.node_cnt > cap {
                return Some(ReasonCode::WaitQosMaxNodePerJob);
            }
        }

        if let Some(cap) = QosOut::claim(&mut self.out.max_cpus_pu, limits.max_cpus_pu) {
            if self.cpu_cnt > cap || user.cpus + self.cpu_cnt > cap {
                return Some(ReasonCode::WaitQosMaxCpuPerUser);
            }
        }

        if let Some(cap) = QosOut::claim(&mut self.out.max_nodes_pu, limits.max_nodes_pu) {
            if self.node_cnt > cap || user.nodes + self.node_cnt > cap {
                return Some(ReasonCode::WaitQosMaxNodePerUser);
            }
        }

        None
    }

    fn assoc_hold(&mut self, assoc: &AssocRecord, leaf: bool) -> Option<ReasonCode> {
        let eff = assoc.effective;
        let usage = &assoc.usage;
        let usage_mins = usage.usage_raw / 60.0;
        let cpu_run_mins = usage.used_cpu_run_secs / 60;

        if !self.out.grp_cpu_mins.is_finite() {
            if let Some(cap) = eff.grp_cpu_mins().finite() {
                if self.cpu_mins_hold(cap, usage_mins, cpu_run_mins) {
                    return Some(ReasonCode::WaitAssocGrpCpuMin);
                }
            }
        }

        if !self.out.grp_cpus.is_finite() {
            if let Some(cap) = eff.grp_cpus().finite() {
                if self.cpu_cnt > cap || usage.grp_used_tres[Tres::Cpu] + self.cpu_cnt > cap {
                    return Some(ReasonCode::WaitAssocGrpCpu);
                }
            }
        }

        if !self.memory_exempt && !self.out.grp_mem.is_finite() {
            if let Some(cap) = eff.grp_mem().finite() {
                if self.job_memory > cap || usage.grp_used_tres[Tres::Mem] + self.job_memory > cap
                {
                    return Some(ReasonCode::WaitAssocGrpMem);
                }
            }
        }

        if !self.out.grp_cpu_run_mins.is_finite() {
            if let Some(cap) = eff.grp_cpu_run_mins().finite() {
                if cpu_run_mins + self.job_cpu_time_limit > cap {
                    return Some(ReasonCode::WaitAssocGrpCpuRunMin);
                }
            }
        }

        if !self.out.grp_nodes.is_finite() {
            if let Some(cap) = eff.grp_nodes().finite() {
                if self.node_cnt > cap || usage.grp_used_tres[Tres::Node] + self.node_cnt > cap {
                    return Some(ReasonCode::WaitAssocGrpNode);
                }
            }
        }

        if !leaf {
            return None;
        }

        if !self.out.max_cpu_mins_pj.is_finite()
            && eff.max_cpu_mins_pj().exceeded_by(self.job_cpu_time_limit)
        {
            return Some(ReasonCode::WaitAssocMaxCpuMinsPerJob);
        }

        if !self.out.max_cpus_pj.is_finite() && eff.max_cpus_pj().exceeded_by(self.cpu_cnt) {
            return Some(ReasonCode::WaitAssocMaxCpuPerJob);
        }

        if !self.out.max_nodes_pj.is_finite() && eff.max_nodes_pj().exceeded_by(self.node_cnt) {
            return Some(ReasonCode::WaitAssocMaxNodePerJob);
        }

        None
    }
}
