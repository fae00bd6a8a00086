// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The association-manager lock bundle.
//!
//! All live policy state is guarded by four independent reader/writer
//! sub-locks (association, qos, user, and tres) acquired together as a
//! bundle. Deadlock freedom comes from a total acquisition order: sub-locks
//! are always taken in the order they are declared in [`LockLevels`],
//! regardless of which levels a path requests. Two further slots existed in
//! the original lock table and are preserved for compatibility; nothing maps
//! to them here.
//!
//! Readers of a bundle observe either the pre-state or the post-state of any
//! mutation taken under the write bundle, never a partial update across the
//! QoS-and-associations walk.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Requested level for one sub-lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockLevel {
    /// Do not acquire this sub-lock.
    #[default]
    No,
    /// Acquire shared.
    Read,
    /// Acquire exclusive.
    Write,
}

/// Requested levels for the whole bundle, in acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockLevels {
    /// Level for the association table.
    pub association: LockLevel,
    /// Level for the QoS table.
    pub qos: LockLevel,
    /// Level for the user table.
    pub user: LockLevel,
    /// Level for the TRES registry.
    pub tres: LockLevel,
    reserved: [LockLevel; 2],
}

impl LockLevels {
    /// Bundle for the admission validator: association, qos and user shared.
    #[must_use]
    pub fn for_validation() -> Self {
        LockLevels {
            association: LockLevel::Read,
            qos: LockLevel::Read,
            user: LockLevel::Read,
            ..LockLevels::default()
        }
    }

    /// Bundle for runnability checks, the max-nodes query and the timeout
    /// scan: association and qos shared.
    #[must_use]
    pub fn for_runnability() -> Self {
        LockLevels {
            association: LockLevel::Read,
            qos: LockLevel::Read,
            ..LockLevels::default()
        }
    }

    /// Bundle for the usage mutator and alter: association and qos exclusive.
    #[must_use]
    pub fn for_mutation() -> Self {
        LockLevels {
            association: LockLevel::Write,
            qos: LockLevel::Write,
            ..LockLevels::default()
        }
    }

    /// Bundle for external reference updates: everything exclusive.
    #[must_use]
    pub fn for_reconfiguration() -> Self {
        LockLevels {
            association: LockLevel::Write,
            qos: LockLevel::Write,
            user: LockLevel::Write,
            tres: LockLevel::Write,
            reserved: [LockLevel::No; 2],
        }
    }
}

/// A held sub-lock at the level the bundle requested.
#[derive(Debug)]
pub enum TableGuard<'a, T> {
    /// The sub-lock was not requested.
    NotHeld,
    /// The sub-lock is held shared.
    Read(RwLockReadGuard<'a, T>),
    /// The sub-lock is held exclusive.
    Write(RwLockWriteGuard<'a, T>),
}

impl<'a, T> TableGuard<'a, T> {
    /// Acquire `lock` at `level`.
    pub fn acquire(lock: &'a RwLock<T>, level: LockLevel) -> Self {
        match level {
            LockLevel::No => TableGuard::NotHeld,
            LockLevel::Read => TableGuard::Read(lock.read()),
            LockLevel::Write => TableGuard::Write(lock.write()),
        }
    }

    /// Shared access to the guarded table, if the sub-lock is held.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        match self {
            TableGuard::NotHeld => None,
            TableGuard::Read(guard) => Some(&**guard),
            TableGuard::Write(guard) => Some(&**guard),
        }
    }

    /// Exclusive access to the guarded table, if the sub-lock is held
    /// exclusive.
    #[must_use]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        match self {
            TableGuard::Write(guard) => Some(&mut **guard),
            _ => None,
        }
    }

    /// True when the sub-lock is held at any level.
    #[must_use]
    pub fn is_held(&self) -> bool {
        !matches!(self, TableGuard::NotHeld)
    }
}

#[cfg(test)]
mod tests {
    use super::{LockLevel, LockLevels, TableGuard};
    use parking_lot::RwLock;

    #[test]
    fn bundle_constructors_match_the_lock_table() {
        let validate = LockLevels::for_validation();
        assert_eq!(validate.association, LockLevel::Read);
        assert_eq!(validate.qos, LockLevel::Read);
        assert_eq!(validate.user, LockLevel::Read);
        assert_eq!(validate.tres, LockLevel::No);

        let mutate = LockLevels::for_mutation();
        assert_eq!(mutate.association, LockLevel::Write);
        assert_eq!(mutate.qos, LockLevel::Write);
        assert_eq!(mutate.user, LockLevel::No);
    }

    #[test]
    fn guard_levels_gate_access() {
        let lock = RwLock::new(7_u32);

        let none = TableGuard::acquire(&lock, LockLevel::No);
        assert!(!none.is_held());
        assert!(none.get().is_none());

        let read = TableGuard::acquire(&lock, LockLevel::Read);
        assert_eq!(read.get().copied(), Some(7));
        drop(read);

        let mut write = TableGuard::acquire(&lock, LockLevel::Write);
        if let Some(value) = write.get_mut() {
            *value = 9;
        }
        drop(write);
        assert_eq!(*lock.read(), 9);
    }

    #[test]
    fn read_bundles_do_not_exclude_each_other() {
        let lock = RwLock::new(0_u32);
        let first = TableGuard::acquire(&lock, LockLevel::Read);
        let second = TableGuard::acquire(&lock, LockLevel::Read);
        assert!(first.is_held());
        assert!(second.is_held());
    }
}
