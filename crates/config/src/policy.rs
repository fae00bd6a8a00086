// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Top-level cluster policy document.

use crate::assoc::AccountConfig;
use crate::enforce::EnforceFlags;
use crate::error::Error;
use crate::partition::PartitionConfig;
use crate::qos::QosConfig;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// The whole accounting policy for a cluster: enforcement flags, QoS
/// definitions, the account tree, and partitions.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClusterPolicy {
    /// Enforcement flags.
    #[serde(default)]
    pub enforce: EnforceFlags,
    /// QoS definitions.
    #[serde(default)]
    pub qos: Vec<QosConfig>,
    /// Root of the account tree.
    pub accounts: AccountConfig,
    /// Partition declarations.
    #[serde(default)]
    pub partitions: Vec<PartitionConfig>,
}

impl ClusterPolicy {
    /// Parse a policy from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, Error> {
        serde_yaml::from_str(text)
            .map_err(|err| Error::deserialization("<inline>", "YAML", err))
    }

    /// Parse a policy from JSON text.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text)
            .map_err(|err| Error::deserialization("<inline>", "JSON", err))
    }

    /// Load and parse a policy from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| Error::file_read(path.display(), err))?;
        serde_yaml::from_str(&text)
            .map_err(|err| Error::deserialization(path.display(), "YAML", err))
    }

    /// Load and parse a policy from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| Error::file_read(path.display(), err))?;
        serde_json::from_str(&text)
            .map_err(|err| Error::deserialization(path.display(), "JSON", err))
    }

    /// Returns validation errors for this policy document.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();

        let mut qos_names = HashSet::new();
        for (i, qos) in self.qos.iter().enumerate() {
            if !qos_names.insert(qos.name.clone()) {
                errors.push(format!(
                    "{path_prefix}.qos[{i}]: duplicate qos name `{}`",
                    qos.name
                ));
            }
            if let (Some(min), Some(max)) = (
                qos.limits.min_cpus_pj.finite(),
                qos.limits.max_cpus_pj.finite(),
            ) {
                if min > max {
                    errors.push(format!(
                        "{path_prefix}.qos[{i}]: min_cpus_pj ({min}) exceeds max_cpus_pj ({max})"
                    ));
                }
            }
        }

        let mut partition_names = HashSet::new();
        for (i, part) in self.partitions.iter().enumerate() {
            if !partition_names.insert(part.name.clone()) {
                errors.push(format!(
                    "{path_prefix}.partitions[{i}]: duplicate partition name `{}`",
                    part.name
                ));
            }
            if let Some(qos) = &part.qos {
                if !self.qos.iter().any(|q| q.name == *qos) {
                    errors.push(format!(
                        "{path_prefix}.partitions[{i}]: unknown qos `{qos}`"
                    ));
                }
            }
        }

        let mut account_names = HashSet::new();
        let mut user_keys = HashSet::new();
        self.validate_account(
            &self.accounts,
            &format!("{path_prefix}.accounts"),
            &partition_names,
            &mut account_names,
            &mut user_keys,
            &mut errors,
        );

        errors
    }

    fn validate_account(
        &self,
        account: &AccountConfig,
        path: &str,
        partitions: &HashSet<crate::PartitionName>,
        account_names: &mut HashSet<crate::AccountName>,
        user_keys: &mut HashSet<(crate::AccountName, Option<crate::PartitionName>, u32)>,
        errors: &mut Vec<String>,
    ) {
        if !account_names.insert(account.account.clone()) {
            errors.push(format!(
                "{path}: duplicate account name `{}`",
                account.account
            ));
        }
        for (i, user) in account.users.iter().enumerate() {
            if let Some(partition) = &user.partition {
                if !partitions.contains(partition) {
                    errors.push(format!(
                        "{path}.users[{i}]: unknown partition `{partition}`"
                    ));
                }
            }
            let key = (
                account.account.clone(),
                user.partition.clone(),
                user.uid,
            );
            if !user_keys.insert(key) {
                errors.push(format!(
                    "{path}.users[{i}]: duplicate user association for uid {} in `{}`",
                    user.uid, account.account
                ));
            }
        }
        for (i, child) in account.children.iter().enumerate() {
            self.validate_account(
                child,
                &format!("{path}.children[{i}]"),
                partitions,
                account_names,
                user_keys,
                errors,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ClusterPolicy;
    use crate::enforce::EnforceFlags;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const POLICY: &str = r"
enforce: [limits]
qos:
  - name: normal
  - name: high
    flags: [deny_limit]
    limits:
      grp_cpus: 256
partitions:
  - name: batch
    max_time: 2880
    qos: normal
accounts:
  account: root
  children:
    - account: physics
      users:
        - name: alice
          uid: 1001
";

    #[test]
    fn parses_and_validates_clean_policy() {
        let policy = ClusterPolicy::from_yaml(POLICY).expect("should parse policy");
        assert_eq!(policy.enforce, EnforceFlags::LIMITS);
        assert_eq!(policy.qos.len(), 2);
        assert_eq!(policy.validation_errors("policy"), Vec::<String>::new());
    }

    #[test]
    fn loads_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(POLICY.as_bytes()).expect("write policy");
        let policy = ClusterPolicy::from_yaml_file(file.path()).expect("should load");
        assert_eq!(policy.partitions[0].name, "batch");
    }

    #[test]
    fn read_error_carries_path() {
        let err = ClusterPolicy::from_yaml_file(std::path::Path::new("/nonexistent/policy.yaml"))
            .expect_err("should fail");
        assert!(err.to_string().contains("/nonexistent/policy.yaml"));
    }

    #[test]
    fn flags_duplicate_qos_and_unknown_references() {
        let policy = ClusterPolicy::from_yaml(
            r"
qos:
  - name: normal
  - name: normal
partitions:
  - name: batch
    qos: missing
accounts:
  account: root
  users:
    - name: alice
      uid: 1001
      partition: debug
",
        )
        .expect("should parse");
        let errors = policy.validation_errors("policy");
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("duplicate qos name `normal`"));
        assert!(errors[1].contains("unknown qos `missing`"));
        assert!(errors[2].contains("unknown partition `debug`"));
    }

    #[test]
    fn flags_degenerate_cpu_bounds() {
        let policy = ClusterPolicy::from_yaml(
            r"
qos:
  - name: odd
    limits:
      min_cpus_pj: 8
      max_cpus_pj: 4
accounts:
  account: root
",
        )
        .expect("should parse");
        let errors = policy.validation_errors("policy");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("min_cpus_pj (8) exceeds max_cpus_pj (4)"));
    }
}
