// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end lifecycle tests for the enforcement engine: admission,
//! runnability, usage bookkeeping symmetry, alters, timeouts, and the
//! safe-limits flavor, driven through the public `PolicyEngine` surface.

use acctpol_config::{ClusterPolicy, Limit};
use acctpol_engine::{
    Hooks, JobRecord, JobRequest, LimitSet, LockLevels, PartitionRecord, PolicyEngine,
    PriorityHook, ReasonCode, SetBy, StorageHook,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

fn engine(yaml: &str) -> PolicyEngine {
    let policy = ClusterPolicy::from_yaml(yaml).expect("test policy should parse");
    PolicyEngine::from_policy(&policy).expect("engine should build")
}

/// A pending job bound to its leaf association, ready for lifecycle events.
fn pending_job(engine: &PolicyEngine, job_id: u32, user_id: u32, account: &str) -> JobRecord {
    let partition = engine
        .partition("batch")
        .cloned()
        .unwrap_or_else(|| PartitionRecord::unconstrained("batch".into()));
    let mut job = JobRecord::new(job_id, user_id, account.to_owned().into(), partition);
    job.assoc = engine.find_assoc(account, Some("batch"), user_id);
    assert!(job.assoc.is_some(), "leaf association should resolve");
    job
}

/// Submit and start a job with the given allocation.
fn run_job(engine: &PolicyEngine, job: &mut JobRecord, cpus: u64, nodes: u64, minutes: u32) {
    job.total_cpus = cpus;
    job.node_cnt = nodes;
    job.time_limit = Some(minutes);
    engine.add_job_submit(job);
    engine.job_begin(job);
}

fn qos_usage(engine: &PolicyEngine, name: &str) -> acctpol_engine::usage::QosUsage {
    let id = engine.find_qos(name).expect("qos should resolve");
    let guard = engine.lock(LockLevels::for_runnability());
    guard
        .qos
        .get()
        .expect("qos table")
        .get(id)
        .expect("qos record")
        .usage
        .clone()
}

fn leaf_usage(
    engine: &PolicyEngine,
    account: &str,
    user_id: u32,
) -> acctpol_engine::usage::AssocUsage {
    let guard = engine.lock(LockLevels::for_runnability());
    let assocs = guard.association.get().expect("assoc table");
    let id = assocs
        .find(account, None, user_id)
        .expect("leaf should resolve");
    assocs.get(id).expect("record").usage.clone()
}

const BASE_POLICY: &str = r"
enforce: [limits]
qos:
  - name: q
    limits:
      max_cpus_pu: 8
partitions:
  - name: batch
accounts:
  account: root
  children:
    - account: dept
      users:
        - name: u
          uid: 42
";

#[test]
fn per_user_cpu_cap_rejects_the_third_submission() {
    let engine = engine(BASE_POLICY);
    let qos = engine.find_qos("q");
    let part = engine.partition("batch").expect("partition").clone();
    let assoc = engine.find_assoc("dept", None, 42).expect("assoc");

    // Two 4-CPU jobs are admitted and started.
    for job_id in [1, 2] {
        let mut req = JobRequest {
            user_id: 42,
            min_cpus: 4,
            ..JobRequest::default()
        };
        let mut reason = ReasonCode::WaitNoReason;
        let mut limit_set = LimitSet::default();
        assert!(engine.validate(
            &mut req,
            &part,
            assoc,
            qos,
            Some(&mut reason),
            &mut limit_set,
            false,
        ));
        let mut job = pending_job(&engine, job_id, 42, "dept");
        job.qos = qos;
        run_job(&engine, &mut job, 4, 1, 10);
    }

    // The user now holds 8 of 8 CPUs; even a 2-CPU request is refused.
    let mut req = JobRequest {
        user_id: 42,
        min_cpus: 2,
        ..JobRequest::default()
    };
    let mut reason = ReasonCode::WaitNoReason;
    let mut limit_set = LimitSet::default();
    assert!(!engine.validate(
        &mut req,
        &part,
        assoc,
        qos,
        Some(&mut reason),
        &mut limit_set,
        false,
    ));
    assert_eq!(reason, ReasonCode::WaitQosMaxCpuPerUser);
}

#[test]
fn group_job_cap_holds_until_a_job_finishes() {
    let engine = engine(
        r"
enforce: [limits]
partitions:
  - name: batch
accounts:
  account: root
  children:
    - account: dept
      limits:
        grp_jobs: 2
      users:
        - name: u
          uid: 42
",
    );

    let mut first = pending_job(&engine, 1, 42, "dept");
    run_job(&engine, &mut first, 1, 1, 10);
    let mut second = pending_job(&engine, 2, 42, "dept");
    run_job(&engine, &mut second, 1, 1, 10);

    let mut third = pending_job(&engine, 3, 42, "dept");
    third.time_limit = Some(10);
    engine.add_job_submit(&mut third);
    assert!(!engine.job_runnable_pre_select(&mut third));
    assert_eq!(third.state_reason, ReasonCode::WaitAssocGrpJob);
    assert!(!engine.job_runnable_state(&third));

    // One running job finishing unblocks the held one.
    engine.job_fini(&mut first);
    assert!(engine.job_runnable_pre_select(&mut third));
    assert_eq!(third.state_reason, ReasonCode::WaitNoReason);
    assert!(engine.job_runnable_state(&third));
}

#[test]
fn safe_limits_refuse_a_job_that_cannot_finish() {
    let engine = engine(
        r"
enforce: [limits, safe]
qos:
  - name: q
    limits:
      grp_cpu_mins: 1000
partitions:
  - name: batch
accounts:
  account: root
  children:
    - account: dept
      users:
        - name: u
          uid: 42
",
    );
    let qos = engine.find_qos("q").expect("qos");

    // 900 of the 1000 CPU-minutes are already consumed.
    {
        let mut guard = engine.lock(LockLevels::for_reconfiguration());
        let table = guard.qos.get_mut().expect("qos table");
        table.get_mut(qos).expect("record").usage.usage_raw = 900.0 * 60.0;
    }

    let mut job = pending_job(&engine, 7, 42, "dept");
    job.qos = Some(qos);
    job.time_limit = Some(20);
    // 10 CPUs for 20 minutes needs 200 CPU-minutes; only 100 remain.
    assert!(!engine.job_runnable_post_select(&mut job, 1, 10, None));
    assert_eq!(job.state_reason, ReasonCode::WaitQosGrpCpuMin);
}

#[test]
fn admin_set_time_is_neither_rejected_nor_rewritten() {
    let engine = engine(
        r"
enforce: [limits]
qos:
  - name: q
    limits:
      max_wall_pj: 60
partitions:
  - name: batch
accounts:
  account: root
  children:
    - account: dept
      users:
        - name: u
          uid: 42
",
    );
    let qos = engine.find_qos("q");
    let part = engine.partition("batch").expect("partition").clone();
    let assoc = engine.find_assoc("dept", None, 42).expect("assoc");

    let mut req = JobRequest {
        user_id: 42,
        time_limit: Some(1440),
        ..JobRequest::default()
    };
    let mut reason = ReasonCode::WaitNoReason;
    let mut limit_set = LimitSet {
        time: SetBy::Admin,
        ..LimitSet::default()
    };
    assert!(engine.validate(
        &mut req,
        &part,
        assoc,
        qos,
        Some(&mut reason),
        &mut limit_set,
        false,
    ));
    assert_eq!(req.time_limit, Some(1440));
    assert_eq!(limit_set.time, SetBy::Admin);
}

#[test]
fn alter_adjusts_committed_cpu_run_seconds_by_the_delta() {
    let engine = engine(
        r"
enforce: [limits]
qos:
  - name: q
partitions:
  - name: batch
accounts:
  account: root
  children:
    - account: dept
      users:
        - name: u
          uid: 42
",
    );
    let qos = engine.find_qos("q");
    let mut job = pending_job(&engine, 9, 42, "dept");
    job.qos = qos;
    run_job(&engine, &mut job, 4, 1, 30);
    assert_eq!(qos_usage(&engine, "q").grp_used_cpu_run_secs, 4 * 30 * 60);

    engine.alter_job(&mut job, 60);
    assert_eq!(job.time_limit, Some(60));
    // The signed delta is exactly 4 cpus * 30 added minutes * 60.
    assert_eq!(qos_usage(&engine, "q").grp_used_cpu_run_secs, 4 * 60 * 60);
    assert_eq!(
        leaf_usage(&engine, "dept", 42).used_cpu_run_secs,
        4 * 60 * 60
    );

    // Finish subtracts the altered commitment, not the original one.
    engine.job_fini(&mut job);
    assert_eq!(qos_usage(&engine, "q").grp_used_cpu_run_secs, 0);
}

#[test]
fn max_nodes_honors_the_first_claim_across_the_pair() {
    let engine = engine(
        r"
enforce: [limits]
qos:
  - name: a
    flags: [part_qos]
    limits:
      max_nodes_pj: 10
  - name: b
    limits:
      max_nodes_pj: 5
partitions:
  - name: batch
    qos: b
accounts:
  account: root
  children:
    - account: dept
      users:
        - name: u
          uid: 42
",
    );
    let mut job = pending_job(&engine, 4, 42, "dept");
    // Job QoS `a` overrides the partition QoS `b`, so its looser per-job cap
    // claims the slot and `b`'s stricter value is never consulted.
    job.qos = engine.find_qos("a");
    let mut reason = ReasonCode::WaitNoReason;
    assert_eq!(engine.get_max_nodes(&job, &mut reason), Limit::At(10));
    assert_eq!(reason, ReasonCode::WaitQosMaxNodePerJob);
}

#[test]
fn first_finite_qos_value_claims_a_validation_slot() {
    let engine = engine(
        r"
enforce: [limits]
qos:
  - name: loose
    limits:
      grp_cpus: 100
  - name: tight
    flags: [deny_limit]
    limits:
      grp_cpus: 4
partitions:
  - name: batch
    qos: loose
accounts:
  account: root
  children:
    - account: dept
      users:
        - name: u
          uid: 42
",
    );
    let part = engine.partition("batch").expect("partition").clone();
    let assoc = engine.find_assoc("dept", None, 42).expect("assoc");
    let tight = engine.find_qos("tight");

    // The partition QoS leads the pair and claims grp_cpus at 100; the job
    // QoS's stricter 4 never affects the decision.
    let mut req = JobRequest {
        user_id: 42,
        min_cpus: 8,
        ..JobRequest::default()
    };
    let mut reason = ReasonCode::WaitNoReason;
    let mut limit_set = LimitSet::default();
    assert!(engine.validate(
        &mut req,
        &part,
        assoc,
        tight,
        Some(&mut reason),
        &mut limit_set,
        false,
    ));

    // Without the partition QoS in front, the same request is refused.
    let unconstrained = PartitionRecord::unconstrained("debug".into());
    let mut req = JobRequest {
        user_id: 42,
        min_cpus: 8,
        ..JobRequest::default()
    };
    assert!(!engine.validate(
        &mut req,
        &unconstrained,
        assoc,
        tight,
        Some(&mut reason),
        &mut limit_set,
        false,
    ));
    assert_eq!(reason, ReasonCode::WaitQosGrpCpu);
}

#[test]
fn missing_time_limit_installs_the_tightest_cap() {
    let engine = engine(
        r"
enforce: [limits]
qos:
  - name: q
    limits:
      max_wall_pj: 100
partitions:
  - name: batch
    max_time: 60
accounts:
  account: root
  children:
    - account: dept
      users:
        - name: u
          uid: 42
",
    );
    let part = engine.partition("batch").expect("partition").clone();
    let assoc = engine.find_assoc("dept", None, 42).expect("assoc");

    let mut req = JobRequest {
        user_id: 42,
        ..JobRequest::default()
    };
    let mut reason = ReasonCode::WaitNoReason;
    let mut limit_set = LimitSet::default();
    assert!(engine.validate(
        &mut req,
        &part,
        assoc,
        engine.find_qos("q"),
        Some(&mut reason),
        &mut limit_set,
        false,
    ));
    assert_eq!(req.time_limit, Some(60));
    assert_eq!(limit_set.time, SetBy::Policy);
}

#[test]
fn submit_counters_reach_every_ancestor_and_reverse() {
    let engine = engine(BASE_POLICY);
    let mut job = pending_job(&engine, 5, 42, "dept");
    job.qos = engine.find_qos("q");

    engine.add_job_submit(&mut job);
    assert_eq!(leaf_usage(&engine, "dept", 42).used_submit_jobs, 1);
    assert_eq!(qos_usage(&engine, "q").grp_used_submit_jobs, 1);
    {
        let guard = engine.lock(LockLevels::for_runnability());
        let assocs = guard.association.get().expect("assoc table");
        let leaf = assocs.find("dept", None, 42).expect("leaf");
        for id in assocs.chain_to_root(leaf) {
            assert_eq!(
                assocs.get(id).expect("record").usage.used_submit_jobs,
                1,
                "every ancestor including the root counts the submission"
            );
        }
    }

    engine.remove_job_submit(&mut job);
    {
        let guard = engine.lock(LockLevels::for_runnability());
        let assocs = guard.association.get().expect("assoc table");
        let leaf = assocs.find("dept", None, 42).expect("leaf");
        for id in assocs.chain_to_root(leaf) {
            assert_eq!(assocs.get(id).expect("record").usage.used_submit_jobs, 0);
        }
    }
    assert_eq!(qos_usage(&engine, "q").grp_used_submit_jobs, 0);
}

#[test]
fn full_lifecycle_restores_all_counters_exactly() {
    let engine = engine(BASE_POLICY);
    let before_qos = qos_usage(&engine, "q");
    let before_leaf = leaf_usage(&engine, "dept", 42);

    let mut job = pending_job(&engine, 6, 42, "dept");
    job.qos = engine.find_qos("q");
    job.details = job.details.map(|mut details| {
        details.pn_min_mem = Some(acctpol_engine::MemoryRequest::PerCpu(512));
        details
    });
    run_job(&engine, &mut job, 8, 2, 45);

    // Live counters reflect the allocation while the job runs.
    let live = qos_usage(&engine, "q");
    assert_eq!(live.grp_used_jobs, 1);
    assert_eq!(live.grp_used_cpus, 8);
    assert_eq!(live.grp_used_mem, 512 * 8);
    assert_eq!(live.grp_used_nodes, 2);
    assert_eq!(live.user(42).cpus, 8);

    engine.job_fini(&mut job);
    assert_eq!(qos_usage(&engine, "q"), before_qos);
    assert_eq!(leaf_usage(&engine, "dept", 42), before_leaf);
}

#[test]
fn decrements_from_zero_saturate() {
    let engine = engine(BASE_POLICY);
    let mut job = pending_job(&engine, 8, 42, "dept");
    job.qos = engine.find_qos("q");
    job.total_cpus = 4;
    job.node_cnt = 1;
    job.time_limit = Some(10);

    // A finish with no matching begin underflows every counter; all clamp.
    engine.job_fini(&mut job);
    let usage = qos_usage(&engine, "q");
    assert_eq!(usage.grp_used_jobs, 0);
    assert_eq!(usage.grp_used_cpus, 0);
    assert_eq!(usage.grp_used_cpu_run_secs, 0);
    assert!(usage.user_usage.is_empty());
    assert_eq!(leaf_usage(&engine, "dept", 42).used_jobs, 0);
}

#[test]
fn timeout_fires_only_without_safe_limits() {
    let strict = r"
enforce: [limits]
qos:
  - name: q
    limits:
      grp_cpu_mins: 10
partitions:
  - name: batch
accounts:
  account: root
  children:
    - account: dept
      users:
        - name: u
          uid: 42
";
    let engine_plain = engine(strict);
    let engine_safe = engine(&strict.replace("enforce: [limits]", "enforce: [limits, safe]"));

    for engine in [&engine_plain, &engine_safe] {
        let qos = engine.find_qos("q").expect("qos");
        let mut guard = engine.lock(LockLevels::for_reconfiguration());
        let table = guard.qos.get_mut().expect("qos table");
        // Way past the 10 CPU-minute budget.
        table.get_mut(qos).expect("record").usage.usage_raw = 100.0 * 60.0;
    }

    let mut job = pending_job(&engine_plain, 10, 42, "dept");
    job.qos = engine_plain.find_qos("q");
    job.start_time = 0;
    job.total_cpus = 1;
    assert!(engine_plain.job_time_out_at(&mut job, 3600));
    assert_eq!(job.state_reason, ReasonCode::FailTimeout);

    let mut job = pending_job(&engine_safe, 11, 42, "dept");
    job.qos = engine_safe.find_qos("q");
    job.start_time = 0;
    job.total_cpus = 1;
    assert!(!engine_safe.job_time_out_at(&mut job, 3600));
    assert_eq!(job.state_reason, ReasonCode::WaitNoReason);
}

#[test]
fn per_job_cpu_minute_cap_times_out_a_running_job() {
    let engine = engine(
        r"
enforce: [limits]
qos:
  - name: q
    limits:
      max_cpu_mins_pj: 40
partitions:
  - name: batch
accounts:
  account: root
  children:
    - account: dept
      users:
        - name: u
          uid: 42
",
    );
    let mut job = pending_job(&engine, 12, 42, "dept");
    job.qos = engine.find_qos("q");
    job.total_cpus = 4;
    job.start_time = 0;
    // 9 minutes * 4 CPUs = 36 CPU-minutes: still under the cap.
    assert!(!engine.job_time_out_at(&mut job, 9 * 60));
    // 10 minutes * 4 CPUs reaches 40.
    assert!(engine.job_time_out_at(&mut job, 10 * 60));
    assert_eq!(job.state_reason, ReasonCode::FailTimeout);

    // Suspended time does not count against the budget.
    job.set_state_reason(ReasonCode::WaitNoReason);
    job.suspended_secs = 5 * 60;
    assert!(!engine.job_time_out_at(&mut job, 10 * 60));
}

struct CountingPriority(Arc<AtomicU32>);

impl PriorityHook for CountingPriority {
    fn job_end(&self, _job: &JobRecord) {
        let _ = self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct CountingStorage(Arc<AtomicU32>);

impl StorageHook for CountingStorage {
    fn job_start_direct(&self, _job: &JobRecord) {
        let _ = self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn hooks_fire_on_fini_and_on_pending_time_rewrites() {
    let ended = Arc::new(AtomicU32::new(0));
    let stored = Arc::new(AtomicU32::new(0));
    let engine = engine(
        r"
enforce: [limits]
qos:
  - name: q
    limits:
      max_wall_pj: 120
partitions:
  - name: batch
    max_time: 2880
accounts:
  account: root
  children:
    - account: dept
      users:
        - name: u
          uid: 42
",
    )
    .with_hooks(Hooks {
        priority: Box::new(CountingPriority(Arc::clone(&ended))),
        storage: Box::new(CountingStorage(Arc::clone(&stored))),
    });

    // Admission derives the 120-minute cap.
    let part = engine.partition("batch").expect("partition").clone();
    let assoc = engine.find_assoc("dept", None, 42).expect("assoc");
    let mut req = JobRequest {
        user_id: 42,
        ..JobRequest::default()
    };
    let mut reason = ReasonCode::WaitNoReason;
    let mut limit_set = LimitSet::default();
    assert!(engine.validate(
        &mut req,
        &part,
        assoc,
        engine.find_qos("q"),
        Some(&mut reason),
        &mut limit_set,
        false,
    ));
    assert_eq!(req.time_limit, Some(120));

    let mut job = pending_job(&engine, 20, 42, "dept");
    job.qos = engine.find_qos("q");
    job.details = Some(req);
    job.limit_set = limit_set;
    job.time_limit = req.time_limit;
    engine.add_job_submit(&mut job);

    // The wall cap tightens while the job is pending.
    let qos_id = engine.find_qos("q").expect("qos");
    {
        let mut guard = engine.lock(LockLevels::for_reconfiguration());
        let table = guard.qos.get_mut().expect("qos table");
        table.get_mut(qos_id).expect("record").limits.max_wall_pj = Limit::At(60);
    }

    let updated = engine.update_pending_job(&mut job).expect("update should pass");
    assert!(updated);
    assert_eq!(job.time_limit, Some(60));
    assert_eq!(stored.load(Ordering::SeqCst), 1);
    assert!(engine.last_job_update() > 0);

    // Finishing the job notifies the priority subsystem once.
    job.total_cpus = 1;
    job.node_cnt = 1;
    engine.job_begin(&mut job);
    engine.job_fini(&mut job);
    assert_eq!(ended.load(Ordering::SeqCst), 1);
}

#[test]
fn disabled_enforcement_admits_everything_and_keeps_no_usage() {
    let engine = engine(
        r"
qos:
  - name: q
    flags: [deny_limit]
    limits:
      grp_cpus: 1
partitions:
  - name: batch
accounts:
  account: root
  children:
    - account: dept
      users:
        - name: u
          uid: 42
",
    );
    let part = engine.partition("batch").expect("partition").clone();
    let assoc = engine.find_assoc("dept", None, 42).expect("assoc");
    let mut req = JobRequest {
        user_id: 42,
        min_cpus: 64,
        ..JobRequest::default()
    };
    let mut reason = ReasonCode::WaitNoReason;
    let mut limit_set = LimitSet::default();
    assert!(engine.validate(
        &mut req,
        &part,
        assoc,
        engine.find_qos("q"),
        Some(&mut reason),
        &mut limit_set,
        false,
    ));

    let mut job = pending_job(&engine, 30, 42, "dept");
    job.qos = engine.find_qos("q");
    run_job(&engine, &mut job, 64, 4, 30);
    assert_eq!(qos_usage(&engine, "q").grp_used_cpus, 0);
}
