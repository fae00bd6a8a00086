// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! QoS (quality-of-service class) declarations.
//!
//! A QoS is a named bundle of limits independent of the account tree. Group
//! slots cap the aggregate across every live job running under the QoS,
//! per-job slots cap a single job's request, and per-user slots cap the
//! aggregate per owning user.

use crate::QosName;
use crate::limit::Limit;
use crate::mem_units;
use bitflags::bitflags;
use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;

bitflags! {
    /// Behavior flags on a QoS.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QosFlags: u32 {
        /// When this QoS is attached to a job, it overrides the partition QoS
        /// in the precedence order.
        const PART_QOS = 1;
        /// Limit violations are terminal rejections at submission rather than
        /// "held pending".
        const DENY_LIMIT = 2;
    }
}

impl QosFlags {
    fn from_label(label: &str) -> Option<QosFlags> {
        match label.to_ascii_lowercase().as_str() {
            "part_qos" => Some(QosFlags::PART_QOS),
            "deny_limit" => Some(QosFlags::DENY_LIMIT),
            _ => None,
        }
    }

    fn labels(self) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if self.contains(QosFlags::PART_QOS) {
            labels.push("part_qos");
        }
        if self.contains(QosFlags::DENY_LIMIT) {
            labels.push("deny_limit");
        }
        labels
    }
}

impl<'de> Deserialize<'de> for QosFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let labels = Vec::<String>::deserialize(deserializer)?;
        let mut flags = QosFlags::empty();
        for label in &labels {
            let Some(flag) = QosFlags::from_label(label) else {
                return Err(DeError::custom(format!(
                    "unknown qos flag `{label}` (expected part_qos or deny_limit)"
                )));
            };
            flags |= flag;
        }
        Ok(flags)
    }
}

impl Serialize for QosFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.labels().serialize(serializer)
    }
}

impl JsonSchema for QosFlags {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("QosFlags")
    }

    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema!({
            "description": "QoS behavior flags",
            "type": "array",
            "items": { "type": "string", "enum": ["part_qos", "deny_limit"] }
        })
    }
}

/// The limit slots of a QoS. Absent slots are unlimited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct QosLimits {
    /// Aggregate CPUs allocated across live jobs.
    #[serde(default)]
    pub grp_cpus: Limit,
    /// Aggregate nodes allocated across live jobs.
    #[serde(default)]
    pub grp_nodes: Limit,
    /// Aggregate memory (MiB) allocated across live jobs.
    #[serde(default, deserialize_with = "mem_units::deserialize")]
    pub grp_mem: Limit,
    /// Concurrent running jobs.
    #[serde(default)]
    pub grp_jobs: Limit,
    /// Jobs in the system (pending or running).
    #[serde(default)]
    pub grp_submit_jobs: Limit,
    /// Aggregate wall-clock minutes consumed.
    #[serde(default)]
    pub grp_wall: Limit,
    /// Historical CPU-minutes consumed.
    #[serde(default)]
    pub grp_cpu_mins: Limit,
    /// CPU-minutes committed by running jobs.
    #[serde(default)]
    pub grp_cpu_run_mins: Limit,

    /// CPUs for a single job.
    #[serde(default)]
    pub max_cpus_pj: Limit,
    /// Minimum CPUs for a single job.
    #[serde(default)]
    pub min_cpus_pj: Limit,
    /// Nodes for a single job.
    #[serde(default)]
    pub max_nodes_pj: Limit,
    /// Wall-clock minutes for a single job.
    #[serde(default)]
    pub max_wall_pj: Limit,
    /// CPU-minutes for a single job.
    #[serde(default)]
    pub max_cpu_mins_pj: Limit,

    /// CPUs allocated per user.
    #[serde(default)]
    pub max_cpus_pu: Limit,
    /// Nodes allocated per user.
    #[serde(default)]
    pub max_nodes_pu: Limit,
    /// Concurrent running jobs per user.
    #[serde(default)]
    pub max_jobs_pu: Limit,
    /// Jobs in the system per user.
    #[serde(default)]
    pub max_submit_jobs_pu: Limit,
}

/// A QoS declaration: a name, behavior flags, and a limit bundle.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct QosConfig {
    /// Name of the QoS.
    pub name: QosName,
    /// Behavior flags.
    #[serde(default)]
    pub flags: QosFlags,
    /// Limit slots.
    #[serde(default)]
    pub limits: QosLimits,
}

#[cfg(test)]
mod tests {
    use super::{QosConfig, QosFlags};
    use crate::limit::Limit;
    use pretty_assertions::assert_eq;

    #[test]
    fn deserializes_full_declaration() {
        let qos: QosConfig = serde_yaml::from_str(
            "name: interactive\n\
             flags: [part_qos, deny_limit]\n\
             limits:\n\
             \x20 grp_cpus: 512\n\
             \x20 grp_mem: 1 TiB\n\
             \x20 max_wall_pj: 240\n\
             \x20 max_jobs_pu: 4\n",
        )
        .expect("should parse qos");
        assert_eq!(qos.name, "interactive");
        assert_eq!(qos.flags, QosFlags::PART_QOS | QosFlags::DENY_LIMIT);
        assert_eq!(qos.limits.grp_cpus, Limit::At(512));
        assert_eq!(qos.limits.grp_mem, Limit::At(1024 * 1024));
        assert_eq!(qos.limits.max_wall_pj, Limit::At(240));
        assert_eq!(qos.limits.max_jobs_pu, Limit::At(4));
        assert_eq!(qos.limits.grp_jobs, Limit::Unlimited);
    }

    #[test]
    fn unknown_limit_slot_is_rejected() {
        let result = serde_yaml::from_str::<QosConfig>(
            "name: bad\nlimits:\n\x20 grp_gpus: 4\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn flags_default_to_empty() {
        let qos: QosConfig = serde_yaml::from_str("name: normal\n").expect("should parse");
        assert_eq!(qos.flags, QosFlags::empty());
    }
}
