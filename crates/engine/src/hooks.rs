// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Collaborator hooks.
//!
//! The engine is the policy core of a larger scheduler; a few transitions
//! must notify external subsystems. Hooks are invoked with no bundle locks
//! held, so implementations are free to block or take their own locks.

use crate::job::JobRecord;
use std::fmt;

/// Priority-subsystem notifications.
pub trait PriorityHook: Send + Sync {
    /// The job ended; called before the finish bookkeeping runs.
    fn job_end(&self, job: &JobRecord);
}

/// Accounting-storage notifications.
pub trait StorageHook: Send + Sync {
    /// A pending job's time limit was rewritten by policy.
    fn job_start_direct(&self, job: &JobRecord);
}

/// A hook implementation that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl PriorityHook for NoopHooks {
    fn job_end(&self, _job: &JobRecord) {}
}

impl StorageHook for NoopHooks {
    fn job_start_direct(&self, _job: &JobRecord) {}
}

/// The hook bundle an engine carries.
pub struct Hooks {
    /// Priority-subsystem hook.
    pub priority: Box<dyn PriorityHook>,
    /// Accounting-storage hook.
    pub storage: Box<dyn StorageHook>,
}

impl Default for Hooks {
    fn default() -> Self {
        Hooks {
            priority: Box::new(NoopHooks),
            storage: Box::new(NoopHooks),
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}
