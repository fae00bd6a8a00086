// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Accounting-policy enforcement engine for batch workload scheduling.
//!
//! The engine decides, at each lifecycle event of a job, whether the job may
//! enter the system, may start, must be held, or must be terminated, based
//! on declarative limits attached to accounts (hierarchical associations)
//! and QoS classes, and it maintains the live usage counters those limits
//! are compared against.
//!
//! Everything hangs off a [`PolicyEngine`] handle: the enforcement flags,
//! the lock-bundled QoS/association tables, the collaborator hooks, and the
//! `last_job_update` timestamp the engine bumps whenever it rewrites an
//! observable job field. Lifecycle events map onto the public operations:
//!
//! | event           | operation                                        |
//! |-----------------|--------------------------------------------------|
//! | submit          | [`PolicyEngine::validate`], [`PolicyEngine::add_job_submit`] |
//! | pre-select      | [`PolicyEngine::job_runnable_pre_select`]        |
//! | post-select     | [`PolicyEngine::job_runnable_post_select`]       |
//! | begin           | [`PolicyEngine::job_begin`]                      |
//! | alter           | [`PolicyEngine::alter_job`]                      |
//! | finish          | [`PolicyEngine::job_fini`]                       |
//! | purge           | [`PolicyEngine::remove_job_submit`]              |
//! | timeout scan    | [`PolicyEngine::job_time_out`]                   |
//!
//! Decisions return `bool` plus a reason code; they never panic and never
//! raise errors. Errors are reserved for configuration problems
//! (see [`error::Error`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use acctpol_config::{ClusterPolicy, EnforceFlags, Limit, PartitionName};

pub mod error;
pub mod hooks;
pub mod job;
pub mod lock;
pub mod precedence;
pub mod reason;
pub mod tables;
pub mod usage;

mod max_nodes;
mod mutate;
mod runnable;
mod timeout;
mod validate;

pub use error::Error;
pub use hooks::{Hooks, NoopHooks, PriorityHook, StorageHook};
pub use job::{JobRecord, JobRequest, LimitSet, MemoryRequest, PartitionRecord, SetBy};
pub use lock::{LockLevel, LockLevels};
pub use precedence::{QosPair, resolve_qos_pair};
pub use reason::ReasonCode;
pub use tables::{AssocId, ManagerGuard, ManagerTables, QosId};

use mutate::UsageOp;
use tables::{AssocTable, QosTable, TresRegistry, UserTable};

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

/// The accounting-policy enforcement engine.
///
/// One engine serves a whole scheduler; every public operation takes `&self`
/// and acquires the lock bundle its path needs. Lifecycle events of a single
/// job are assumed serialized by the caller.
#[derive(Debug)]
pub struct PolicyEngine {
    enforce: EnforceFlags,
    tables: ManagerTables,
    partitions: HashMap<PartitionName, PartitionRecord>,
    hooks: Hooks,
    last_job_update: AtomicI64,
}

impl PolicyEngine {
    /// Build an engine from a validated policy document.
    pub fn from_policy(policy: &ClusterPolicy) -> Result<Self, Error> {
        acctpol_config::Error::from_validation(policy.validation_errors("policy"))?;

        let qos_table = QosTable::from_policy(policy);
        let mut partitions = HashMap::new();
        for part in &policy.partitions {
            let qos = match &part.qos {
                None => None,
                Some(name) => Some(qos_table.resolve(name).ok_or_else(|| {
                    Error::UnknownPartitionQos {
                        partition: part.name.clone(),
                        name: name.clone(),
                    }
                })?),
            };
            let _ = partitions.insert(
                part.name.clone(),
                PartitionRecord {
                    name: part.name.clone(),
                    max_time: part.max_time,
                    qos,
                },
            );
        }

        Ok(PolicyEngine {
            enforce: policy.enforce,
            tables: ManagerTables::new(
                AssocTable::from_policy(policy),
                qos_table,
                UserTable::from_policy(policy),
                TresRegistry,
            ),
            partitions,
            hooks: Hooks::default(),
            last_job_update: AtomicI64::new(0),
        })
    }

    /// Replace the collaborator hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// The enforcement flags this engine runs with.
    #[must_use]
    pub fn enforce(&self) -> EnforceFlags {
        self.enforce
    }

    /// The partition record for `name`, if declared.
    #[must_use]
    pub fn partition(&self, name: &str) -> Option<&PartitionRecord> {
        self.partitions.get(name)
    }

    /// Unix time of the engine's last write to an observable job field.
    #[must_use]
    pub fn last_job_update(&self) -> i64 {
        self.last_job_update.load(Ordering::Relaxed)
    }

    /// Acquire the lock bundle directly. External reference updates (account
    /// reassignment, limit changes) serialize against the engine's own paths
    /// by taking the affected sub-locks in `Write` mode.
    #[must_use]
    pub fn lock(&self, levels: LockLevels) -> ManagerGuard<'_> {
        self.tables.lock(levels)
    }

    /// Resolve the leaf association for a job's `(account, partition, user)`.
    #[must_use]
    pub fn find_assoc(
        &self,
        account: &str,
        partition: Option<&str>,
        user_id: u32,
    ) -> Option<AssocId> {
        let guard = self.tables.lock(LockLevels::for_runnability());
        guard
            .association
            .get()
            .and_then(|assocs| assocs.find(account, partition, user_id))
    }

    /// Resolve a QoS name.
    #[must_use]
    pub fn find_qos(&self, name: &str) -> Option<QosId> {
        let guard = self.tables.lock(LockLevels::for_runnability());
        guard.qos.get().and_then(|qos| qos.resolve(name))
    }

    fn limits_enforced(&self) -> bool {
        self.enforce.contains(EnforceFlags::LIMITS)
    }

    fn safe_limits(&self) -> bool {
        self.enforce.contains(EnforceFlags::SAFE)
    }

    fn touch_last_job_update(&self) {
        self.last_job_update.store(now_secs(), Ordering::Relaxed);
    }

    /// Validate a submit request against the QoS pair and the association
    /// chain. On success the request may have been completed with derived
    /// ceilings and an effective time limit, recorded in `limit_set`.
    ///
    /// Violations fail the call only under strict checking: `reason` is
    /// non-nil, or a governing QoS denies on limit. The failing limit's code
    /// is written through `reason` when a slot is provided.
    pub fn validate(
        &self,
        req: &mut JobRequest,
        part: &PartitionRecord,
        assoc: AssocId,
        qos: Option<QosId>,
        reason: Option<&mut ReasonCode>,
        limit_set: &mut LimitSet,
        update_call: bool,
    ) -> bool {
        if !self.limits_enforced() {
            return true;
        }
        let guard = self.tables.lock(LockLevels::for_validation());
        let (Some(assocs), Some(qos_table)) = (guard.association.get(), guard.qos.get()) else {
            return true;
        };
        let pair = resolve_qos_pair(qos, part.qos, qos_table);
        validate::validate(
            qos_table, assocs, pair, assoc, req, part, reason, limit_set, update_call,
        )
    }

    /// Account a new submission on the QoS pair and every association up the
    /// tree.
    pub fn add_job_submit(&self, job: &mut JobRecord) {
        self.adjust_usage(job, UsageOp::AddSubmit);
    }

    /// Release a submission that leaves the system without running.
    pub fn remove_job_submit(&self, job: &mut JobRecord) {
        self.adjust_usage(job, UsageOp::RemSubmit);
    }

    /// Account a job that starts running.
    pub fn job_begin(&self, job: &mut JobRecord) {
        self.adjust_usage(job, UsageOp::Begin);
    }

    /// Reverse the begin-time deltas and release the submission of a job
    /// that finished. The priority subsystem is notified before any
    /// bookkeeping, with no bundle locks held.
    pub fn job_fini(&self, job: &mut JobRecord) {
        if self.limits_enforced() {
            self.hooks.priority.job_end(job);
        }
        self.adjust_usage(job, UsageOp::Fini);
    }

    fn adjust_usage(&self, job: &mut JobRecord, op: UsageOp) {
        if !self.limits_enforced() {
            return;
        }
        let mut guard = self.tables.lock(LockLevels::for_mutation());
        let ManagerGuard {
            association, qos, ..
        } = &mut guard;
        let (Some(assocs), Some(qos_table)) = (association.get_mut(), qos.get_mut()) else {
            return;
        };
        let _ = mutate::adjust_limit_usage(assocs, qos_table, job, op);
    }

    /// Rewrite a running job's time limit, adjusting the committed
    /// CPU-minute counters by the signed difference. Limits are not
    /// re-validated; the runtime timeout path is the safety net.
    pub fn alter_job(&self, job: &mut JobRecord, new_time_limit: u32) {
        if self.limits_enforced() {
            let mut guard = self.tables.lock(LockLevels::for_mutation());
            let ManagerGuard {
                association, qos, ..
            } = &mut guard;
            if let (Some(assocs), Some(qos_table)) = (association.get_mut(), qos.get_mut()) {
                let _ = mutate::alter_job(assocs, qos_table, job, new_time_limit);
            }
        }
        job.time_limit = Some(new_time_limit);
        self.touch_last_job_update();
    }

    /// True when the job's recorded state reason does not hold it on a
    /// limit.
    #[must_use]
    pub fn job_runnable_state(&self, job: &JobRecord) -> bool {
        runnable::job_runnable_state(job)
    }

    /// Configuration-only runnability, before node selection. On a hold the
    /// job's state reason is set and false is returned; counters are not
    /// touched.
    pub fn job_runnable_pre_select(&self, job: &mut JobRecord) -> bool {
        if !self.limits_enforced() {
            return true;
        }
        let before = job.state_reason;
        let verdict = {
            let guard = self.tables.lock(LockLevels::for_runnability());
            let (Some(assocs), Some(qos_table)) = (guard.association.get(), guard.qos.get())
            else {
                return true;
            };
            let pair = resolve_qos_pair(job.qos, job.partition.qos, qos_table);
            runnable::pre_select(qos_table, assocs, pair, job)
        };
        if job.state_reason != before {
            self.touch_last_job_update();
        }
        verdict
    }

    /// Allocation-aware runnability, after node selection. `pn_min_mem` is
    /// the selected per-node or per-CPU memory request.
    pub fn job_runnable_post_select(
        &self,
        job: &mut JobRecord,
        node_cnt: u64,
        cpu_cnt: u64,
        pn_min_mem: Option<MemoryRequest>,
    ) -> bool {
        if !self.limits_enforced() {
            return true;
        }
        let before = job.state_reason;
        let verdict = {
            let guard = self.tables.lock(LockLevels::for_runnability());
            let (Some(assocs), Some(qos_table)) = (guard.association.get(), guard.qos.get())
            else {
                return true;
            };
            let pair = resolve_qos_pair(job.qos, job.partition.qos, qos_table);
            runnable::post_select(
                qos_table,
                assocs,
                pair,
                job,
                node_cnt,
                cpu_cnt,
                pn_min_mem,
                self.safe_limits(),
            )
        };
        if job.state_reason != before {
            self.touch_last_job_update();
        }
        verdict
    }

    /// The tightest node-count cap applicable to `job`; `reason` receives
    /// the code of the winning limit.
    #[must_use]
    pub fn get_max_nodes(&self, job: &JobRecord, reason: &mut ReasonCode) -> Limit {
        if !self.limits_enforced() {
            return Limit::Unlimited;
        }
        let guard = self.tables.lock(LockLevels::for_runnability());
        let (Some(assocs), Some(qos_table)) = (guard.association.get(), guard.qos.get()) else {
            return Limit::Unlimited;
        };
        let pair = resolve_qos_pair(job.qos, job.partition.qos, qos_table);
        max_nodes::get_max_nodes(qos_table, assocs, pair, job, reason)
    }

    /// Re-validate a pending job against current limits, re-deriving any
    /// policy-set fields. A time-limit change is written back to the job,
    /// bumps `last_job_update`, and notifies the accounting-storage hook.
    /// Returns whether the time limit changed.
    pub fn update_pending_job(&self, job: &mut JobRecord) -> Result<bool, Error> {
        let assoc = job.assoc.ok_or_else(|| Error::NoAssociation {
            job_id: job.job_id,
            account: job.account.to_string(),
            user_id: job.user_id,
        })?;
        let mut req = job.details.ok_or(Error::MissingJobDetails {
            job_id: job.job_id,
        })?;
        req.time_limit = job.time_limit;
        let mut limit_set = job.limit_set;
        let old_time = job.time_limit;

        if !self.limits_enforced() {
            return Ok(false);
        }

        let accepted = {
            let guard = self.tables.lock(LockLevels::for_validation());
            let (Some(assocs), Some(qos_table)) = (guard.association.get(), guard.qos.get())
            else {
                return Ok(false);
            };
            let pair = resolve_qos_pair(job.qos, job.partition.qos, qos_table);
            validate::validate(
                qos_table, assocs, pair, assoc, &mut req, &job.partition, None, &mut limit_set,
                true,
            )
        };
        if !accepted {
            return Err(Error::PolicyViolation {
                job_id: job.job_id,
                reason: ReasonCode::WaitNoReason,
            });
        }

        job.details = Some(req);
        job.limit_set = limit_set;
        if req.time_limit != old_time {
            job.time_limit = req.time_limit;
            self.touch_last_job_update();
            self.hooks.storage.job_start_direct(job);
            return Ok(true);
        }
        Ok(false)
    }

    /// Decide whether a running job has exhausted a time-based limit, using
    /// the wall clock.
    pub fn job_time_out(&self, job: &mut JobRecord) -> bool {
        self.job_time_out_at(job, now_secs())
    }

    /// Decide whether a running job has exhausted a time-based limit at an
    /// explicit instant. Sets `FAIL_TIMEOUT` on the job when it has; the
    /// caller kills the job.
    pub fn job_time_out_at(&self, job: &mut JobRecord, now_secs: i64) -> bool {
        if !self.limits_enforced() {
            return false;
        }
        let before = job.state_reason;
        let timed_out = {
            let guard = self.tables.lock(LockLevels::for_runnability());
            let (Some(assocs), Some(qos_table)) = (guard.association.get(), guard.qos.get())
            else {
                return false;
            };
            let pair = resolve_qos_pair(job.qos, job.partition.qos, qos_table);
            timeout::job_time_out(qos_table, assocs, pair, job, now_secs, self.safe_limits())
        };
        if job.state_reason != before {
            self.touch_last_job_update();
        }
        timed_out
    }
}
