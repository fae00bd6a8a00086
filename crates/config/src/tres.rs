// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Trackable resources (TRES).
//!
//! A trackable resource is a generic accounting axis (CPU, memory, node)
//! identified by a small stable wire id. Inside the engine, per-resource
//! quantities are fixed-length vectors indexed by [`Tres`]; the persistent
//! external format is the string codec `"<id>=<count>,..."` (for example
//! `"1=200,2=50"`), parsed once at policy load.

use crate::error::Error;
use crate::limit::Limit;
use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Index, IndexMut};

/// A tracked resource axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tres {
    /// Processor count.
    Cpu,
    /// Memory, in mebibytes.
    Mem,
    /// Node count.
    Node,
}

impl Tres {
    /// Number of tracked resource axes.
    pub const COUNT: usize = 3;

    /// All tracked axes, in vector order.
    pub const ALL: [Tres; Tres::COUNT] = [Tres::Cpu, Tres::Mem, Tres::Node];

    /// Stable wire id used by the string codec.
    #[must_use]
    pub const fn wire_id(self) -> u32 {
        match self {
            Tres::Cpu => 1,
            Tres::Mem => 2,
            Tres::Node => 4,
        }
    }

    /// The axis for a wire id, if tracked.
    #[must_use]
    pub const fn from_wire_id(id: u32) -> Option<Tres> {
        match id {
            1 => Some(Tres::Cpu),
            2 => Some(Tres::Mem),
            4 => Some(Tres::Node),
            _ => None,
        }
    }

    /// The axis for a configuration label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Tres> {
        match label.to_ascii_lowercase().as_str() {
            "cpu" => Some(Tres::Cpu),
            "mem" | "memory" => Some(Tres::Mem),
            "node" => Some(Tres::Node),
            _ => None,
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Tres::Cpu => "cpu",
            Tres::Mem => "mem",
            Tres::Node => "node",
        }
    }

    const fn index(self) -> usize {
        match self {
            Tres::Cpu => 0,
            Tres::Mem => 1,
            Tres::Node => 2,
        }
    }
}

impl fmt::Display for Tres {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A per-resource vector of counts, one slot per tracked axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TresCounts([u64; Tres::COUNT]);

impl TresCounts {
    /// A vector with every slot zero.
    #[must_use]
    pub const fn zero() -> Self {
        TresCounts([0; Tres::COUNT])
    }

    /// Build a vector from explicit per-axis counts.
    #[must_use]
    pub const fn new(cpu: u64, mem: u64, node: u64) -> Self {
        TresCounts([cpu, mem, node])
    }

    /// True when every slot is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|count| *count == 0)
    }
}

impl Index<Tres> for TresCounts {
    type Output = u64;

    fn index(&self, tres: Tres) -> &u64 {
        &self.0[tres.index()]
    }
}

impl IndexMut<Tres> for TresCounts {
    fn index_mut(&mut self, tres: Tres) -> &mut u64 {
        &mut self.0[tres.index()]
    }
}

impl fmt::Display for TresCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for tres in Tres::ALL {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            write!(f, "{}={}", tres.wire_id(), self[tres])?;
        }
        Ok(())
    }
}

/// A per-resource vector of limits, one slot per tracked axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TresLimits([Limit; Tres::COUNT]);

impl TresLimits {
    /// A vector with every slot unlimited.
    #[must_use]
    pub const fn unlimited() -> Self {
        TresLimits([Limit::Unlimited; Tres::COUNT])
    }

    /// True when every slot is unlimited.
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.0.iter().all(|limit| limit.is_unlimited())
    }

    /// Parse the string codec (`"1=200,2=50"`).
    ///
    /// Wire ids that are not tracked are skipped with a debug log; malformed
    /// entries are an error.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let mut limits = TresLimits::unlimited();
        for entry in input.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let Some((id_text, count_text)) = entry.split_once('=') else {
                return Err(Error::InvalidTresVector {
                    input: input.to_owned(),
                    details: format!("entry `{entry}` is not of the form <id>=<count>"),
                });
            };
            let id: u32 = id_text.trim().parse().map_err(|_| Error::InvalidTresVector {
                input: input.to_owned(),
                details: format!("`{id_text}` is not a numeric resource id"),
            })?;
            let count: u64 = count_text
                .trim()
                .parse()
                .map_err(|_| Error::InvalidTresVector {
                    input: input.to_owned(),
                    details: format!("`{count_text}` is not a non-negative count"),
                })?;
            match Tres::from_wire_id(id) {
                Some(tres) => limits.0[tres.index()] = Limit::At(count),
                None => tracing::debug!(id, "skipping untracked resource id in tres vector"),
            }
        }
        Ok(limits)
    }
}

impl Index<Tres> for TresLimits {
    type Output = Limit;

    fn index(&self, tres: Tres) -> &Limit {
        &self.0[tres.index()]
    }
}

impl IndexMut<Tres> for TresLimits {
    fn index_mut(&mut self, tres: Tres) -> &mut Limit {
        &mut self.0[tres.index()]
    }
}

impl fmt::Display for TresLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for tres in Tres::ALL {
            if let Limit::At(cap) = self[tres] {
                if !first {
                    write!(f, ",")?;
                }
                first = false;
                write!(f, "{}={}", tres.wire_id(), cap)?;
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TresLimitsRepr {
    Text(String),
    Map(BTreeMap<String, Limit>),
}

impl<'de> Deserialize<'de> for TresLimits {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match TresLimitsRepr::deserialize(deserializer)? {
            TresLimitsRepr::Text(text) => {
                TresLimits::parse(&text).map_err(|err| DeError::custom(err.to_string()))
            }
            TresLimitsRepr::Map(entries) => {
                let mut limits = TresLimits::unlimited();
                for (label, limit) in entries {
                    let Some(tres) = Tres::from_label(&label) else {
                        return Err(DeError::custom(format!(
                            "unknown resource label `{label}` (expected cpu, mem or node)"
                        )));
                    };
                    limits.0[tres.index()] = limit;
                }
                Ok(limits)
            }
        }
    }
}

impl Serialize for TresLimits {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl JsonSchema for TresLimits {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("TresLimits")
    }

    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema!({
            "description": "Per-resource limits: a codec string (\"1=200,2=50\") or a map keyed by resource label",
            "anyOf": [
                { "type": "string" },
                { "type": "object" }
            ]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Tres, TresCounts, TresLimits};
    use crate::limit::Limit;
    use pretty_assertions::assert_eq;

    #[test]
    fn codec_round_trip() {
        let limits = TresLimits::parse("1=200,2=50").expect("should parse");
        assert_eq!(limits[Tres::Cpu], Limit::At(200));
        assert_eq!(limits[Tres::Mem], Limit::At(50));
        assert_eq!(limits[Tres::Node], Limit::Unlimited);
        assert_eq!(limits.to_string(), "1=200,2=50");
    }

    #[test]
    fn codec_skips_untracked_ids() {
        let limits = TresLimits::parse("1=8,3=1000,4=2").expect("should parse");
        assert_eq!(limits[Tres::Cpu], Limit::At(8));
        assert_eq!(limits[Tres::Node], Limit::At(2));
    }

    #[test]
    fn codec_rejects_malformed_entries() {
        assert!(TresLimits::parse("1:8").is_err());
        assert!(TresLimits::parse("cpu=8").is_err());
        assert!(TresLimits::parse("1=-3").is_err());
    }

    #[test]
    fn map_form_deserializes() {
        let limits: TresLimits =
            serde_yaml::from_str("{cpu: 16, node: unlimited, mem: 2048}").expect("should parse");
        assert_eq!(limits[Tres::Cpu], Limit::At(16));
        assert_eq!(limits[Tres::Mem], Limit::At(2048));
        assert_eq!(limits[Tres::Node], Limit::Unlimited);
    }

    #[test]
    fn string_form_deserializes() {
        let limits: TresLimits = serde_yaml::from_str("\"1=200,4=10\"").expect("should parse");
        assert_eq!(limits[Tres::Cpu], Limit::At(200));
        assert_eq!(limits[Tres::Node], Limit::At(10));
    }

    #[test]
    fn counts_index_and_zero() {
        let mut counts = TresCounts::zero();
        assert!(counts.is_zero());
        counts[Tres::Cpu] += 4;
        counts[Tres::Node] += 1;
        assert_eq!(counts, TresCounts::new(4, 0, 1));
        assert_eq!(counts.to_string(), "1=4,2=0,4=1");
    }
}
