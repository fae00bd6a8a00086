// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Two-state policy limit values.
//!
//! Every enforceable quantity in the policy model is either unlimited
//! (enforcement disabled for that slot) or capped at a finite value. In
//! configuration files a limit is written as a plain non-negative integer or
//! as the string `"unlimited"` (the alias `"infinite"` is accepted).

use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;

/// A single policy limit: unlimited, or capped at a finite value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Limit {
    /// Enforcement of this slot is disabled.
    #[default]
    Unlimited,
    /// The slot is capped at the given value.
    At(u64),
}

impl Limit {
    /// True when enforcement of this slot is disabled.
    #[must_use]
    pub const fn is_unlimited(self) -> bool {
        matches!(self, Limit::Unlimited)
    }

    /// True when this slot carries a finite cap.
    #[must_use]
    pub const fn is_finite(self) -> bool {
        matches!(self, Limit::At(_))
    }

    /// The finite cap, if any.
    #[must_use]
    pub const fn finite(self) -> Option<u64> {
        match self {
            Limit::Unlimited => None,
            Limit::At(value) => Some(value),
        }
    }

    /// The tighter of two limits, treating `Unlimited` as positive infinity.
    #[must_use]
    pub fn min(self, other: Limit) -> Limit {
        match (self, other) {
            (Limit::At(a), Limit::At(b)) => Limit::At(a.min(b)),
            (Limit::At(a), Limit::Unlimited) => Limit::At(a),
            (Limit::Unlimited, other) => other,
        }
    }

    /// This limit if finite, otherwise `fallback`.
    #[must_use]
    pub const fn or(self, fallback: Limit) -> Limit {
        match self {
            Limit::At(_) => self,
            Limit::Unlimited => fallback,
        }
    }

    /// True when `value` strictly exceeds a finite cap.
    #[must_use]
    pub fn exceeded_by(self, value: u64) -> bool {
        matches!(self, Limit::At(cap) if value > cap)
    }

    /// True when `value` has reached or exceeded a finite cap.
    #[must_use]
    pub fn reached_by(self, value: u64) -> bool {
        matches!(self, Limit::At(cap) if value >= cap)
    }

    /// True when a floating-point usage value has reached a finite cap.
    #[must_use]
    pub fn reached_by_f64(self, value: f64) -> bool {
        match self {
            Limit::Unlimited => false,
            Limit::At(cap) => value >= cap as f64,
        }
    }

    /// True when `value` falls short of a finite floor (for minimum slots).
    #[must_use]
    pub fn undershot_by(self, value: u64) -> bool {
        matches!(self, Limit::At(floor) if value < floor)
    }

    /// True when this limit is finite and strictly tighter than `other`.
    #[must_use]
    pub fn tighter_than(self, other: Limit) -> bool {
        match (self, other) {
            (Limit::At(a), Limit::At(b)) => a < b,
            (Limit::At(_), Limit::Unlimited) => true,
            (Limit::Unlimited, _) => false,
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Unlimited => write!(f, "unlimited"),
            Limit::At(value) => write!(f, "{value}"),
        }
    }
}

impl From<u64> for Limit {
    fn from(value: u64) -> Self {
        Limit::At(value)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LimitRepr {
    Number(u64),
    Text(String),
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match LimitRepr::deserialize(deserializer)? {
            LimitRepr::Number(value) => Ok(Limit::At(value)),
            LimitRepr::Text(text) => match text.to_ascii_lowercase().as_str() {
                "unlimited" | "infinite" => Ok(Limit::Unlimited),
                other => Err(DeError::custom(format!(
                    "invalid limit `{other}`: expected a non-negative integer or \"unlimited\""
                ))),
            },
        }
    }
}

impl Serialize for Limit {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Limit::Unlimited => serializer.serialize_str("unlimited"),
            Limit::At(value) => serializer.serialize_u64(*value),
        }
    }
}

impl JsonSchema for Limit {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("Limit")
    }

    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema!({
            "description": "A policy limit: a non-negative integer or \"unlimited\"",
            "anyOf": [
                { "type": "integer", "minimum": 0 },
                { "type": "string", "enum": ["unlimited", "infinite"] }
            ]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Limit;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Holder {
        #[serde(default)]
        value: Limit,
    }

    fn de_yaml(input: &str) -> Result<Holder, serde_yaml::Error> {
        serde_yaml::from_str::<Holder>(input)
    }

    #[test]
    fn parses_number_as_cap() {
        let cfg = de_yaml("value: 128").expect("should parse numeric limit");
        assert_eq!(cfg.value, Limit::At(128));
    }

    #[test]
    fn parses_unlimited_aliases() {
        let cfg = de_yaml("value: unlimited").expect("should parse unlimited");
        assert_eq!(cfg.value, Limit::Unlimited);

        let cfg = de_yaml("value: INFINITE").expect("should parse infinite alias");
        assert_eq!(cfg.value, Limit::Unlimited);
    }

    #[test]
    fn rejects_unknown_text() {
        assert!(de_yaml("value: lots").is_err());
    }

    #[test]
    fn absent_field_defaults_to_unlimited() {
        let cfg = de_yaml("{}").expect("should default");
        assert_eq!(cfg.value, Limit::Unlimited);
    }

    #[test]
    fn min_treats_unlimited_as_infinity() {
        assert_eq!(Limit::Unlimited.min(Limit::At(5)), Limit::At(5));
        assert_eq!(Limit::At(3).min(Limit::At(5)), Limit::At(3));
        assert_eq!(Limit::Unlimited.min(Limit::Unlimited), Limit::Unlimited);
    }

    #[test]
    fn comparison_helpers() {
        assert!(Limit::At(4).exceeded_by(5));
        assert!(!Limit::At(4).exceeded_by(4));
        assert!(Limit::At(4).reached_by(4));
        assert!(!Limit::Unlimited.reached_by(u64::MAX));
        assert!(Limit::At(4).undershot_by(3));
        assert!(Limit::At(4).tighter_than(Limit::Unlimited));
        assert!(!Limit::Unlimited.tighter_than(Limit::At(1)));
    }
}
