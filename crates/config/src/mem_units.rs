// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Support for byte units like "KB / KiB", "MB / MiB", "GB / GiB" in memory
//! limits. Memory quantities in the policy model are mebibytes; a limit may
//! be written as a plain number (MiB), as a string with units, or as
//! `"unlimited"`.

use crate::limit::Limit;
use byte_unit::Byte;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

const MIB: u128 = 1024 * 1024;

#[derive(Deserialize)]
#[serde(untagged)]
enum Value {
    Number(u64),
    Text(String),
}

/// Deserialize a memory limit that can be specified either as a number (in
/// MiB), as a string with units (e.g. "64 GiB"), or as `"unlimited"`.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Limit, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;

    let text = match value {
        Value::Number(mib) => return Ok(Limit::At(mib)),
        Value::Text(text) => text,
    };

    match text.to_ascii_lowercase().as_str() {
        "unlimited" | "infinite" => return Ok(Limit::Unlimited),
        _ => {}
    }

    let parsed: Byte = text.parse().map_err(DeError::custom)?;
    let mib = parsed.as_u64() as u128 / MIB;
    Ok(Limit::At(mib as u64))
}

#[cfg(test)]
mod tests {
    use super::deserialize;
    use crate::limit::Limit;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Holder {
        #[serde(default, deserialize_with = "deserialize")]
        value: Limit,
    }

    fn de_yaml(input: &str) -> Result<Holder, serde_yaml::Error> {
        serde_yaml::from_str::<Holder>(input)
    }

    #[test]
    fn parses_number_as_mib() {
        let cfg = de_yaml("value: 2048").expect("should parse numeric MiB");
        assert_eq!(cfg.value, Limit::At(2048));
    }

    #[test]
    fn parses_string_with_iec_units() {
        let cfg = de_yaml("value: 64 GiB").expect("should parse 64 GiB");
        assert_eq!(cfg.value, Limit::At(64 * 1024));

        let cfg = de_yaml("value: '512 MiB'").expect("should parse 512 MiB");
        assert_eq!(cfg.value, Limit::At(512));
    }

    #[test]
    fn parses_unlimited() {
        let cfg = de_yaml("value: unlimited").expect("should parse unlimited");
        assert_eq!(cfg.value, Limit::Unlimited);
    }

    #[test]
    fn rejects_garbage() {
        assert!(de_yaml("value: plenty").is_err());
    }
}
