// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Submit-time admission validation.
//!
//! The validator decides whether a job request can ever run under the QoS
//! pair and the association chain, and derives request fields the user left
//! open (ceilings, the effective time limit). Violations are enforced
//! synchronously only under *strict checking*: the caller passed a reason
//! slot, or a governing QoS carries the deny-on-limit flag. Outside strict
//! checking the validator still derives values but never fails.
//!
//! Admin-set request fields are exempt: the engine neither rejects nor
//! rewrites them.

use crate::job::{JobRequest, LimitSet, PartitionRecord, SetBy};
use crate::precedence::{QosOut, QosPair};
use crate::reason::ReasonCode;
use crate::tables::{AssocId, AssocRecord, AssocTable, QosRecord, QosTable};
use acctpol_config::{Limit, Tres, UserId};

/// One admission run over a request.
pub(crate) struct Validator<'a> {
    strict: bool,
    user_id: UserId,
    job_memory: u64,
    req: &'a mut JobRequest,
    part: &'a PartitionRecord,
    limit_set: &'a mut LimitSet,
    reason: Option<&'a mut ReasonCode>,
    out: QosOut,
    wall_cap: Limit,
}

/// Validate `req` against the QoS pair and the association chain from
/// `assoc_id` to the root. On success the request may have been completed
/// with derived ceilings and a derived time limit.
pub(crate) fn validate(
    qos_table: &QosTable,
    assocs: &AssocTable,
    pair: QosPair,
    assoc_id: AssocId,
    req: &mut JobRequest,
    part: &PartitionRecord,
    reason: Option<&mut ReasonCode>,
    limit_set: &mut LimitSet,
    update_call: bool,
) -> bool {
    let deny_on_limit = pair
        .iter()
        .filter_map(|id| qos_table.get(id))
        .any(|record| record.denies_on_limit());
    let strict = reason.is_some() || deny_on_limit;

    if update_call && limit_set.time.is_policy() {
        // A policy-derived time limit is re-derived against current caps.
        req.time_limit = None;
    }

    let mut validator = Validator {
        strict,
        user_id: req.user_id,
        job_memory: req.memory(),
        req,
        part,
        limit_set,
        reason,
        out: QosOut::default(),
        wall_cap: Limit::Unlimited,
    };

    for qos_id in pair.iter() {
        let Some(record) = qos_table.get(qos_id) else {
            continue;
        };
        if !validator.check_qos(record) {
            return false;
        }
    }

    for (depth, id) in assocs.chain_to_root(assoc_id).into_iter().enumerate() {
        let Some(record) = assocs.get(id) else { continue };
        if !validator.check_assoc(record, depth == 0) {
            return false;
        }
    }

    validator.install_time_limit();
    true
}

impl Validator<'_> {
    fn fail(&mut self, code: ReasonCode) -> bool {
        if let Some(slot) = self.reason.as_deref_mut() {
            *slot = code;
        }
        false
    }

    /// Validate every limit slot of one QoS that the accumulator has not yet
    /// claimed, in the fixed slot order.
    fn check_qos(&mut self, qos: &QosRecord) -> bool {
        let limits = qos.limits;
        let user = qos.usage.user(self.user_id);

        // CPU per-user: the request alone, and the request on top of the
        // user's running allocation.
        if self.strict && !self.limit_set.max_cpus.is_admin() {
            if let Some(cap) = QosOut::claim(&mut self.out.max_cpus_pu, limits.max_cpus_pu) {
                if self.req.min_cpus > cap || user.cpus + self.req.min_cpus > cap {
                    return self.fail(ReasonCode::WaitQosMaxCpuPerUser);
                }
            }
        }

        // CPU group.
        if self.strict && !self.limit_set.max_cpus.is_admin() {
            if let Some(cap) = QosOut::claim(&mut self.out.grp_cpus, limits.grp_cpus) {
                if self.req.min_cpus > cap {
                    return self.fail(ReasonCode::WaitQosGrpCpu);
                }
            }
        }

        // Memory group.
        if self.strict && !self.limit_set.pn_min_mem.is_admin() {
            if let Some(cap) = QosOut::claim(&mut self.out.grp_mem, limits.grp_mem) {
                if self.job_memory > cap {
                    return self.fail(ReasonCode::WaitQosGrpMem);
                }
            }
        }

        // Node per-user, in the same dual form.
        if self.strict && !self.limit_set.max_nodes.is_admin() {
            if let Some(cap) = QosOut::claim(&mut self.out.max_nodes_pu, limits.max_nodes_pu) {
                if self.req.min_nodes > cap || user.nodes + self.req.min_nodes > cap {
                    return self.fail(ReasonCode::WaitQosMaxNodePerUser);
                }
            }
        }

        // Node group.
        if self.strict && !self.limit_set.max_nodes.is_admin() {
            if let Some(cap) = QosOut::claim(&mut self.out.grp_nodes, limits.grp_nodes) {
                if self.req.min_nodes > cap {
                    return self.fail(ReasonCode::WaitQosGrpNode);
                }
            }
        }

        // Submitted-jobs group.
        if self.strict {
            if let Some(cap) = QosOut::claim(&mut self.out.grp_submit_jobs, limits.grp_submit_jobs)
            {
                if u64::from(qos.usage.grp_used_submit_jobs) + 1 > cap {
                    return self.fail(ReasonCode::WaitQosGrpSubJob);
                }
            }
        }

        // CPUs per job, with ceiling derivation.
        if !self.limit_set.max_cpus.is_admin() {
            if let Some(cap) = QosOut::claim(&mut self.out.max_cpus_pj, limits.max_cpus_pj) {
                if self.req.min_cpus > cap {
                    if self.strict {
                        return self.fail(ReasonCode::WaitQosMaxCpuPerJob);
                    }
                } else if self.req.max_cpus.is_none()
                    || (self.limit_set.max_cpus.is_policy()
                        && self.req.max_cpus.is_some_and(|max| max > cap))
                {
                    self.req.max_cpus = Some(cap);
                    self.limit_set.max_cpus = SetBy::Policy;
                }
            }
        }

        // CPU-minutes per job, expressed as a wall ceiling at the requested
        // width.
        if let Some(cap) = QosOut::claim(&mut self.out.max_cpu_mins_pj, limits.max_cpu_mins_pj) {
            let qos_time_limit = cap / self.req.min_cpus.max(1);
            if self.strict
                && self
                    .req
                    .time_limit
                    .is_some_and(|minutes| u64::from(minutes) > qos_time_limit)
            {
                return self.fail(ReasonCode::WaitQosMaxCpuMinsPerJob);
            }
        }

        // Nodes per job, with ceiling derivation.
        if !self.limit_set.max_nodes.is_admin() {
            if let Some(cap) = QosOut::claim(&mut self.out.max_nodes_pj, limits.max_nodes_pj) {
                if self.req.min_nodes > cap {
                    if self.strict {
                        return self.fail(ReasonCode::WaitQosMaxNodePerJob);
                    }
                } else if self.req.max_nodes.is_none()
                    || (self.limit_set.max_nodes.is_policy()
                        && self.req.max_nodes.is_some_and(|max| max > cap))
                {
                    self.req.max_nodes = Some(cap);
                    self.limit_set.max_nodes = SetBy::Policy;
                }
            }
        }

        // Submitted jobs per user.
        if self.strict {
            if let Some(cap) =
                QosOut::claim(&mut self.out.max_submit_jobs_pu, limits.max_submit_jobs_pu)
            {
                if u64::from(user.submit_jobs) + 1 > cap {
                    return self.fail(ReasonCode::WaitQosMaxSubJobPerUser);
                }
            }
        }

        // Wall-clock per job. The claim always happens so the cap can feed
        // the derived time limit; only the rejection is strict.
        if !self.limit_set.time.is_admin() {
            if let Some(cap) = QosOut::claim(&mut self.out.max_wall_pj, limits.max_wall_pj) {
                self.wall_cap = self.wall_cap.min(Limit::At(cap));
                if self.strict
                    && self
                        .req
                        .time_limit
                        .is_some_and(|minutes| u64::from(minutes) > cap)
                {
                    return self.fail(ReasonCode::WaitQosMaxWallPerJob);
                }
            }
        }

        // CPU floor per job.
        if self.strict && !self.limit_set.min_cpus.is_admin() {
            if let Some(floor) = QosOut::claim(&mut self.out.min_cpus_pj, limits.min_cpus_pj) {
                if self.req.min_cpus < floor {
                    return self.fail(ReasonCode::WaitQosMinCpu);
                }
            }
        }

        true
    }

    /// Validate one association of the chain. Group limits apply at every
    /// level; per-job limits only at the leaf, whose effective projection
    /// already folds in every ancestor.
    fn check_assoc(&mut self, assoc: &AssocRecord, leaf: bool) -> bool {
        let eff = assoc.effective;
        let usage = &assoc.usage;

        if self.strict {
            // Request-alone group caps per tracked resource.
            for tres in Tres::ALL {
                let claimed = match tres {
                    Tres::Cpu => {
                        self.out.grp_cpus.is_finite() || self.limit_set.max_cpus.is_admin()
                    }
                    Tres::Mem => {
                        self.out.grp_mem.is_finite() || self.limit_set.pn_min_mem.is_admin()
                    }
                    Tres::Node => {
                        self.out.grp_nodes.is_finite() || self.limit_set.max_nodes.is_admin()
                    }
                };
                if claimed {
                    continue;
                }
                let requested = match tres {
                    Tres::Cpu => self.req.min_cpus,
                    Tres::Mem => self.job_memory,
                    Tres::Node => self.req.min_nodes,
                };
                if eff.grp_tres[tres].exceeded_by(requested) {
                    return self.fail(ReasonCode::assoc_grp(tres));
                }
            }

            // Usage-plus-submission group caps.
            if !self.out.grp_submit_jobs.is_finite()
                && eff
                    .grp_submit_jobs
                    .exceeded_by(u64::from(usage.used_submit_jobs) + 1)
            {
                return self.fail(ReasonCode::WaitAssocGrpSubJob);
            }
            if !self.out.grp_nodes.is_finite()
                && !self.limit_set.max_nodes.is_admin()
                && eff
                    .grp_nodes()
                    .exceeded_by(usage.grp_used_tres[Tres::Node] + self.req.min_nodes)
            {
                return self.fail(ReasonCode::WaitAssocGrpNode);
            }
            if !self.out.grp_wall.is_finite() && !self.limit_set.time.is_admin() {
                let wall_mins = (usage.grp_used_wall / 60.0) as u64;
                if let Some(minutes) = self.req.time_limit {
                    if eff.grp_wall.exceeded_by(wall_mins + u64::from(minutes)) {
                        return self.fail(ReasonCode::WaitAssocGrpWall);
                    }
                }
            }
        }

        if !leaf {
            return true;
        }

        // Per-job caps, leaf only.
        if !self.out.max_cpus_pj.is_finite() && !self.limit_set.max_cpus.is_admin() {
            if let Some(cap) = eff.max_cpus_pj().finite() {
                if self.req.min_cpus > cap {
                    if self.strict {
                        return self.fail(ReasonCode::WaitAssocMaxCpuPerJob);
                    }
                } else if self.req.max_cpus.is_none()
                    || (self.limit_set.max_cpus.is_policy()
                        && self.req.max_cpus.is_some_and(|max| max > cap))
                {
                    self.req.max_cpus = Some(cap);
                    self.limit_set.max_cpus = SetBy::Policy;
                }
            }
        }

        if !self.out.max_nodes_pj.is_finite() && !self.limit_set.max_nodes.is_admin() {
            if let Some(cap) = eff.max_nodes_pj().finite() {
                if self.req.min_nodes > cap {
                    if self.strict {
                        return self.fail(ReasonCode::WaitAssocMaxNodePerJob);
                    }
                } else if self.req.max_nodes.is_none()
                    || (self.limit_set.max_nodes.is_policy()
                        && self.req.max_nodes.is_some_and(|max| max > cap))
                {
                    self.req.max_nodes = Some(cap);
                    self.limit_set.max_nodes = SetBy::Policy;
                }
            }
        }

        if self.strict
            && eff
                .max_submit_jobs
                .exceeded_by(u64::from(usage.used_submit_jobs) + 1)
        {
            return self.fail(ReasonCode::WaitAssocMaxSubJob);
        }

        if !self.out.max_wall_pj.is_finite() && !self.limit_set.time.is_admin() {
            if let Some(cap) = eff.max_wall_pj.finite() {
                self.wall_cap = self.wall_cap.min(Limit::At(cap));
                if self.strict
                    && self
                        .req
                        .time_limit
                        .is_some_and(|minutes| u64::from(minutes) > cap)
                {
                    return self.fail(ReasonCode::WaitAssocMaxWallPerJob);
                }
            }
        }

        true
    }

    /// Install the effective time limit: the minimum of any active wall cap
    /// and the partition ceiling, falling back to the explicit request.
    fn install_time_limit(&mut self) {
        if self.limit_set.time.is_admin() {
            return;
        }
        let cap = self.wall_cap.min(self.part.max_time);
        match self.req.time_limit {
            None => {
                if let Some(cap) = cap.finite() {
                    self.req.time_limit = Some(clip_minutes(cap));
                    self.limit_set.time = SetBy::Policy;
                }
            }
            Some(minutes) => {
                if self.limit_set.time.is_policy() && cap.exceeded_by(u64::from(minutes)) {
                    if let Some(cap) = cap.finite() {
                        self.req.time_limit = Some(clip_minutes(cap));
                    }
                }
            }
        }
    }
}

fn clip_minutes(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
