// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Runtime registries for QoS classes and the association tree.
//!
//! The declarative [`ClusterPolicy`] is resolved once into index-based
//! tables: records reference each other through stable indices rather than
//! pointers, and entries are only removed while the write bundle is held.
//! After the tree is built, per-job limit slots are propagated down from
//! parents so that leaf associations carry the controller-effective
//! projection of every ancestor's per-job limits.

use crate::lock::{LockLevels, TableGuard};
use crate::usage::{AssocUsage, QosUsage};
use acctpol_config::{
    AccountConfig, AccountName, AssocLimits, ClusterPolicy, Limit, PartitionName, QosConfig,
    QosFlags, QosLimits, QosName, Tres, TresLimits, UserId,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

/// Stable index of a QoS in the [`QosTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QosId(pub(crate) usize);

impl fmt::Display for QosId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "qos#{}", self.0)
    }
}

/// Stable index of an association in the [`AssocTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssocId(pub(crate) usize);

impl fmt::Display for AssocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "assoc#{}", self.0)
    }
}

/// A QoS with its limits and live usage.
#[derive(Debug, Clone)]
pub struct QosRecord {
    /// Name of the QoS.
    pub name: QosName,
    /// Behavior flags.
    pub flags: QosFlags,
    /// Limit slots.
    pub limits: QosLimits,
    /// Live usage.
    pub usage: QosUsage,
}

impl QosRecord {
    fn from_config(config: &QosConfig) -> Self {
        QosRecord {
            name: config.name.clone(),
            flags: config.flags,
            limits: config.limits,
            usage: QosUsage::default(),
        }
    }

    /// True when violations of this QoS are terminal rejections.
    #[must_use]
    pub fn denies_on_limit(&self) -> bool {
        self.flags.contains(QosFlags::DENY_LIMIT)
    }

    /// True when this QoS overrides a partition QoS.
    #[must_use]
    pub fn overrides_partition(&self) -> bool {
        self.flags.contains(QosFlags::PART_QOS)
    }

    /// Diagnostic scope label.
    #[must_use]
    pub fn scope(&self) -> String {
        format!("qos/{}", self.name)
    }
}

/// The registry of QoS classes.
#[derive(Debug, Default)]
pub struct QosTable {
    records: Vec<QosRecord>,
    by_name: HashMap<QosName, QosId>,
}

impl QosTable {
    /// Build the registry from policy declarations.
    #[must_use]
    pub fn from_policy(policy: &ClusterPolicy) -> Self {
        let mut table = QosTable::default();
        for config in &policy.qos {
            let id = QosId(table.records.len());
            table.records.push(QosRecord::from_config(config));
            let _ = table.by_name.insert(config.name.clone(), id);
        }
        table
    }

    /// Resolve a QoS name to its id.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<QosId> {
        self.by_name.get(name).copied()
    }

    /// The record for `id`, if it exists.
    #[must_use]
    pub fn get(&self, id: QosId) -> Option<&QosRecord> {
        self.records.get(id.0)
    }

    /// Mutable record for `id`, if it exists.
    #[must_use]
    pub fn get_mut(&mut self, id: QosId) -> Option<&mut QosRecord> {
        self.records.get_mut(id.0)
    }
}

/// One node of the association tree.
#[derive(Debug, Clone)]
pub struct AssocRecord {
    /// Stable index of this record.
    pub id: AssocId,
    /// Account this association belongs to.
    pub account: AccountName,
    /// Partition scope of a leaf-user association, if any.
    pub partition: Option<PartitionName>,
    /// Owning user of a leaf-user association.
    pub user: Option<UserId>,
    /// Parent association; `None` only for the root.
    pub parent: Option<AssocId>,
    /// Limit slots as declared.
    pub limits: AssocLimits,
    /// Controller-effective limits after tree propagation.
    pub effective: AssocLimits,
    /// Live usage of the subtree.
    pub usage: AssocUsage,
}

impl AssocRecord {
    /// True for the distinguished root association.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Diagnostic scope label.
    #[must_use]
    pub fn scope(&self) -> String {
        match self.user {
            Some(uid) => format!("assoc/{}/uid{}", self.account, uid),
            None => format!("assoc/{}", self.account),
        }
    }
}

/// The association tree, rooted at a distinguished root association.
#[derive(Debug, Default)]
pub struct AssocTable {
    records: Vec<AssocRecord>,
    by_user: HashMap<(AccountName, Option<PartitionName>, UserId), AssocId>,
}

impl AssocTable {
    /// Build the tree from policy declarations and propagate limits.
    #[must_use]
    pub fn from_policy(policy: &ClusterPolicy) -> Self {
        let mut table = AssocTable::default();
        table.build_account(&policy.accounts, None);
        table.propagate();
        table
    }

    fn build_account(&mut self, account: &AccountConfig, parent: Option<AssocId>) {
        let id = AssocId(self.records.len());
        self.records.push(AssocRecord {
            id,
            account: account.account.clone(),
            partition: None,
            user: None,
            parent,
            limits: account.limits,
            effective: account.limits,
            usage: AssocUsage::default(),
        });
        for user in &account.users {
            let user_id = AssocId(self.records.len());
            self.records.push(AssocRecord {
                id: user_id,
                account: account.account.clone(),
                partition: user.partition.clone(),
                user: Some(user.uid),
                parent: Some(id),
                limits: user.limits,
                effective: user.limits,
                usage: AssocUsage::default(),
            });
            let _ = self.by_user.insert(
                (account.account.clone(), user.partition.clone(), user.uid),
                user_id,
            );
        }
        for child in &account.children {
            self.build_account(child, Some(id));
        }
    }

    /// Propagate per-job limit slots down the tree: an unset slot inherits
    /// the nearest ancestor's effective value. Group slots stay per-level.
    /// The root's per-job slots are forced to unlimited.
    fn propagate(&mut self) {
        // Parents are built before their children, so one forward pass
        // suffices.
        for i in 0..self.records.len() {
            let parent = self.records[i]
                .parent
                .map(|parent| self.records[parent.0].effective);
            let record = &mut self.records[i];
            record.effective = record.limits;
            match parent {
                None => {
                    record.effective.max_tres_pj = TresLimits::unlimited();
                    record.effective.max_tres_mins_pj = TresLimits::unlimited();
                    record.effective.max_jobs = Limit::Unlimited;
                    record.effective.max_submit_jobs = Limit::Unlimited;
                    record.effective.max_wall_pj = Limit::Unlimited;
                }
                Some(parent) => {
                    record.effective.max_tres_pj =
                        tres_or(record.limits.max_tres_pj, parent.max_tres_pj);
                    record.effective.max_tres_mins_pj =
                        tres_or(record.limits.max_tres_mins_pj, parent.max_tres_mins_pj);
                    record.effective.max_jobs = record.limits.max_jobs.or(parent.max_jobs);
                    record.effective.max_submit_jobs =
                        record.limits.max_submit_jobs.or(parent.max_submit_jobs);
                    record.effective.max_wall_pj =
                        record.limits.max_wall_pj.or(parent.max_wall_pj);
                }
            }
        }
    }

    /// The root association, if the table is non-empty.
    #[must_use]
    pub fn root(&self) -> Option<AssocId> {
        if self.records.is_empty() {
            None
        } else {
            Some(AssocId(0))
        }
    }

    /// The record for `id`, if it exists.
    #[must_use]
    pub fn get(&self, id: AssocId) -> Option<&AssocRecord> {
        self.records.get(id.0)
    }

    /// Mutable record for `id`, if it exists.
    #[must_use]
    pub fn get_mut(&mut self, id: AssocId) -> Option<&mut AssocRecord> {
        self.records.get_mut(id.0)
    }

    /// True when `id` names a live record.
    #[must_use]
    pub fn contains(&self, id: AssocId) -> bool {
        id.0 < self.records.len()
    }

    /// Look up the leaf association for `(account, partition, user)`. A
    /// partition-scoped association wins over a partition-agnostic one.
    #[must_use]
    pub fn find(
        &self,
        account: &str,
        partition: Option<&str>,
        user_id: UserId,
    ) -> Option<AssocId> {
        if let Some(partition) = partition {
            let key = (
                AccountName::from(account.to_owned()),
                Some(PartitionName::from(partition.to_owned())),
                user_id,
            );
            if let Some(id) = self.by_user.get(&key) {
                return Some(*id);
            }
        }
        let key = (AccountName::from(account.to_owned()), None, user_id);
        self.by_user.get(&key).copied()
    }

    /// The ids of `start` and its ancestors, leaf to root inclusive.
    #[must_use]
    pub fn chain_to_root(&self, start: AssocId) -> Vec<AssocId> {
        let mut chain = Vec::new();
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let Some(record) = self.get(id) else { break };
            chain.push(id);
            cursor = record.parent;
        }
        chain
    }
}

fn tres_or(own: TresLimits, parent: TresLimits) -> TresLimits {
    let mut merged = own;
    for tres in Tres::ALL {
        merged[tres] = own[tres].or(parent[tres]);
    }
    merged
}

/// The registry of known users.
#[derive(Debug, Default)]
pub struct UserTable {
    names: HashMap<UserId, String>,
}

impl UserTable {
    /// Build the registry from the leaf users of the account tree.
    #[must_use]
    pub fn from_policy(policy: &ClusterPolicy) -> Self {
        let mut table = UserTable::default();
        table.collect(&policy.accounts);
        table
    }

    fn collect(&mut self, account: &AccountConfig) {
        for user in &account.users {
            let _ = self.names.insert(user.uid, user.name.clone());
        }
        for child in &account.children {
            self.collect(child);
        }
    }

    /// Login name for `user_id`, if known.
    #[must_use]
    pub fn name(&self, user_id: UserId) -> Option<&str> {
        self.names.get(&user_id).map(String::as_str)
    }
}

/// The registry of tracked resource axes.
///
/// The tracked set is fixed at build time; the registry exists so external
/// reconfiguration serializes against readers through the tres sub-lock.
#[derive(Debug, Default)]
pub struct TresRegistry;

impl TresRegistry {
    /// All tracked axes, in vector order.
    #[must_use]
    pub fn tracked(&self) -> &'static [Tres] {
        &Tres::ALL
    }
}

/// All live policy state, partitioned by sub-lock domain.
#[derive(Debug)]
pub struct ManagerTables {
    association: RwLock<AssocTable>,
    qos: RwLock<QosTable>,
    user: RwLock<UserTable>,
    tres: RwLock<TresRegistry>,
}

/// A held lock bundle with access to each domain at its requested level.
#[derive(Debug)]
pub struct ManagerGuard<'a> {
    /// The association table at the requested level.
    pub association: TableGuard<'a, AssocTable>,
    /// The QoS table at the requested level.
    pub qos: TableGuard<'a, QosTable>,
    /// The user table at the requested level.
    pub user: TableGuard<'a, UserTable>,
    /// The TRES registry at the requested level.
    pub tres: TableGuard<'a, TresRegistry>,
}

impl ManagerTables {
    /// Wrap already-built tables into the lock bundle.
    #[must_use]
    pub fn new(
        association: AssocTable,
        qos: QosTable,
        user: UserTable,
        tres: TresRegistry,
    ) -> Self {
        ManagerTables {
            association: RwLock::new(association),
            qos: RwLock::new(qos),
            user: RwLock::new(user),
            tres: RwLock::new(tres),
        }
    }

    /// Resolve a validated policy into runtime tables.
    #[must_use]
    pub fn from_policy(policy: &ClusterPolicy) -> Self {
        ManagerTables::new(
            AssocTable::from_policy(policy),
            QosTable::from_policy(policy),
            UserTable::from_policy(policy),
            TresRegistry,
        )
    }

    /// Acquire the bundle at the requested levels, in the fixed total order.
    #[must_use]
    pub fn lock(&self, levels: LockLevels) -> ManagerGuard<'_> {
        ManagerGuard {
            association: TableGuard::acquire(&self.association, levels.association),
            qos: TableGuard::acquire(&self.qos, levels.qos),
            user: TableGuard::acquire(&self.user, levels.user),
            tres: TableGuard::acquire(&self.tres, levels.tres),
        }
    }
}
