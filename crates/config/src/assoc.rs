// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Account-tree (association) declarations.
//!
//! Associations form a tree rooted at a distinguished root account. Interior
//! nodes are accounts; leaves bind a user (and optionally a partition) to the
//! account above them. Limits at any node constrain the aggregate of the
//! subtree below it; per-job limits are propagated down the tree at load
//! time, so only leaf associations enforce them.

use crate::limit::Limit;
use crate::tres::{Tres, TresLimits};
use crate::{AccountName, PartitionName, UserId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The limit slots of an association. Absent slots are unlimited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct AssocLimits {
    /// Aggregate per-resource allocation across live jobs in the subtree.
    #[serde(default)]
    pub grp_tres: TresLimits,
    /// Historical per-resource minutes consumed by the subtree.
    #[serde(default)]
    pub grp_tres_mins: TresLimits,
    /// Per-resource minutes committed by running jobs in the subtree.
    #[serde(default)]
    pub grp_tres_run_mins: TresLimits,
    /// Per-resource caps for a single job.
    #[serde(default)]
    pub max_tres_pj: TresLimits,
    /// Per-resource minute caps for a single job.
    #[serde(default)]
    pub max_tres_mins_pj: TresLimits,

    /// Concurrent running jobs in the subtree.
    #[serde(default)]
    pub grp_jobs: Limit,
    /// Jobs in the system (pending or running) in the subtree.
    #[serde(default)]
    pub grp_submit_jobs: Limit,
    /// Aggregate wall-clock minutes consumed by the subtree.
    #[serde(default)]
    pub grp_wall: Limit,

    /// Concurrent running jobs under this association.
    #[serde(default)]
    pub max_jobs: Limit,
    /// Jobs in the system under this association.
    #[serde(default)]
    pub max_submit_jobs: Limit,
    /// Wall-clock minutes for a single job.
    #[serde(default)]
    pub max_wall_pj: Limit,
}

impl AssocLimits {
    /// Group node cap (the node slot of `grp_tres`).
    #[must_use]
    pub fn grp_nodes(&self) -> Limit {
        self.grp_tres[Tres::Node]
    }

    /// Group memory cap in MiB (the memory slot of `grp_tres`).
    #[must_use]
    pub fn grp_mem(&self) -> Limit {
        self.grp_tres[Tres::Mem]
    }

    /// Group CPU cap (the CPU slot of `grp_tres`).
    #[must_use]
    pub fn grp_cpus(&self) -> Limit {
        self.grp_tres[Tres::Cpu]
    }

    /// Per-job node cap (the node slot of `max_tres_pj`).
    #[must_use]
    pub fn max_nodes_pj(&self) -> Limit {
        self.max_tres_pj[Tres::Node]
    }

    /// Per-job CPU cap (the CPU slot of `max_tres_pj`).
    #[must_use]
    pub fn max_cpus_pj(&self) -> Limit {
        self.max_tres_pj[Tres::Cpu]
    }

    /// Per-job CPU-minute cap (the CPU slot of `max_tres_mins_pj`).
    #[must_use]
    pub fn max_cpu_mins_pj(&self) -> Limit {
        self.max_tres_mins_pj[Tres::Cpu]
    }

    /// Historical CPU-minute cap (the CPU slot of `grp_tres_mins`).
    #[must_use]
    pub fn grp_cpu_mins(&self) -> Limit {
        self.grp_tres_mins[Tres::Cpu]
    }

    /// Committed CPU-minute cap (the CPU slot of `grp_tres_run_mins`).
    #[must_use]
    pub fn grp_cpu_run_mins(&self) -> Limit {
        self.grp_tres_run_mins[Tres::Cpu]
    }
}

/// A leaf association binding a user to the enclosing account.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UserAssocConfig {
    /// Login name of the user.
    pub name: String,
    /// Numeric user id.
    pub uid: UserId,
    /// Partition this association is scoped to, if any.
    #[serde(default)]
    pub partition: Option<PartitionName>,
    /// Limit slots for this user association.
    #[serde(default)]
    pub limits: AssocLimits,
}

/// An account node in the association tree.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AccountConfig {
    /// Name of the account.
    pub account: AccountName,
    /// Limit slots for this account.
    #[serde(default)]
    pub limits: AssocLimits,
    /// Child accounts.
    #[serde(default)]
    pub children: Vec<AccountConfig>,
    /// Leaf user associations under this account.
    #[serde(default)]
    pub users: Vec<UserAssocConfig>,
}

#[cfg(test)]
mod tests {
    use super::AccountConfig;
    use crate::limit::Limit;
    use crate::tres::Tres;
    use pretty_assertions::assert_eq;

    #[test]
    fn deserializes_nested_tree() {
        let root: AccountConfig = serde_yaml::from_str(
            r"
account: root
children:
  - account: physics
    limits:
      grp_tres: '1=512,4=32'
      grp_jobs: 20
    users:
      - name: alice
        uid: 1001
        limits:
          max_tres_pj: {cpu: 64}
  - account: chemistry
    users:
      - name: bob
        uid: 1002
        partition: batch
",
        )
        .expect("should parse account tree");

        assert_eq!(root.account, "root");
        assert_eq!(root.children.len(), 2);

        let physics = &root.children[0];
        assert_eq!(physics.limits.grp_tres[Tres::Cpu], Limit::At(512));
        assert_eq!(physics.limits.grp_nodes(), Limit::At(32));
        assert_eq!(physics.limits.grp_jobs, Limit::At(20));
        assert_eq!(physics.users[0].limits.max_cpus_pj(), Limit::At(64));

        let bob = &root.children[1].users[0];
        assert_eq!(bob.uid, 1002);
        assert_eq!(bob.partition.as_deref(), Some("batch"));
    }
}
