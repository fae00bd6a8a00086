// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Enforcement flags.
//!
//! The enforcement mask decides which flavor of accounting policy the engine
//! applies. Without `LIMITS` the decision paths admit everything and the
//! usage mutator is a no-op; `SAFE` additionally requires a starting job to
//! prove it can finish within the remaining historical CPU-minute budget, and
//! in exchange disables runtime timeout enforcement.

use bitflags::bitflags;
use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;

bitflags! {
    /// Accounting-enforcement mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EnforceFlags: u32 {
        /// Enable limit enforcement and live usage bookkeeping.
        const LIMITS = 1;
        /// Require finishability against historical CPU-minute caps at start;
        /// disables runtime timeout enforcement.
        const SAFE = 2;
    }
}

impl EnforceFlags {
    fn from_label(label: &str) -> Option<EnforceFlags> {
        match label.to_ascii_lowercase().as_str() {
            "limits" => Some(EnforceFlags::LIMITS),
            "safe" => Some(EnforceFlags::SAFE),
            _ => None,
        }
    }

    fn labels(self) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if self.contains(EnforceFlags::LIMITS) {
            labels.push("limits");
        }
        if self.contains(EnforceFlags::SAFE) {
            labels.push("safe");
        }
        labels
    }
}

impl<'de> Deserialize<'de> for EnforceFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let labels = Vec::<String>::deserialize(deserializer)?;
        let mut flags = EnforceFlags::empty();
        for label in &labels {
            let Some(flag) = EnforceFlags::from_label(label) else {
                return Err(DeError::custom(format!(
                    "unknown enforcement flag `{label}` (expected limits or safe)"
                )));
            };
            flags |= flag;
        }
        Ok(flags)
    }
}

impl Serialize for EnforceFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.labels().serialize(serializer)
    }
}

impl JsonSchema for EnforceFlags {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("EnforceFlags")
    }

    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema!({
            "description": "Accounting-enforcement flags",
            "type": "array",
            "items": { "type": "string", "enum": ["limits", "safe"] }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::EnforceFlags;

    #[test]
    fn deserializes_label_list() {
        let flags: EnforceFlags =
            serde_yaml::from_str("[limits, safe]").expect("should parse flags");
        assert_eq!(flags, EnforceFlags::LIMITS | EnforceFlags::SAFE);
    }

    #[test]
    fn rejects_unknown_label() {
        assert!(serde_yaml::from_str::<EnforceFlags>("[limits, strict]").is_err());
    }

    #[test]
    fn serializes_back_to_labels() {
        let text =
            serde_yaml::to_string(&(EnforceFlags::LIMITS | EnforceFlags::SAFE)).expect("to_string");
        assert_eq!(text.trim(), "- limits\n- safe");
    }
}
