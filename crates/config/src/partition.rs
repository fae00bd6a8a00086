// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Partition declarations.

use crate::limit::Limit;
use crate::{PartitionName, QosName};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A partition: a named subset of the cluster with a wall-clock ceiling and
/// an optional default QoS.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PartitionConfig {
    /// Name of the partition.
    pub name: PartitionName,
    /// Maximum wall-clock minutes for any job in the partition.
    #[serde(default)]
    pub max_time: Limit,
    /// QoS applied to jobs that do not carry one of their own.
    #[serde(default)]
    pub qos: Option<QosName>,
}

#[cfg(test)]
mod tests {
    use super::PartitionConfig;
    use crate::limit::Limit;

    #[test]
    fn deserializes_with_defaults() {
        let part: PartitionConfig = serde_yaml::from_str("name: debug").expect("should parse");
        assert_eq!(part.max_time, Limit::Unlimited);
        assert_eq!(part.qos, None);
    }

    #[test]
    fn deserializes_full() {
        let part: PartitionConfig =
            serde_yaml::from_str("{name: batch, max_time: 2880, qos: normal}")
                .expect("should parse");
        assert_eq!(part.max_time, Limit::At(2880));
        assert_eq!(part.qos.as_deref(), Some("normal"));
    }
}
