// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Declarative accounting-policy model.
//!
//! Data Model:
//! - cluster policy
//!   - enforcement flags
//!   - QoS definitions (named limit bundles)
//!   - account tree (hierarchical associations, leaf users)
//!   - partitions
//!
//! A cluster policy is the document an administrator writes (YAML or JSON);
//! the runtime engine loads it once and keeps its own live state. Limits are
//! expressed with [`Limit`] (a finite value or unlimited), trackable-resource
//! vectors with [`TresLimits`], and the persistent external format for those
//! vectors remains the string codec (`"1=200,2=50"`).

use std::borrow::Cow;

pub mod assoc;
pub mod enforce;
pub mod error;
pub mod limit;
/// Byte-unit support for memory limits in configuration files.
pub mod mem_units;
pub mod partition;
pub mod policy;
pub mod qos;
pub mod tres;

/// The name of an account in the association hierarchy.
pub type AccountName = Cow<'static, str>;

/// The name of a QoS (quality-of-service class).
pub type QosName = Cow<'static, str>;

/// The name of a partition.
pub type PartitionName = Cow<'static, str>;

/// Numeric user id of a job owner.
pub type UserId = u32;

pub use assoc::{AccountConfig, AssocLimits, UserAssocConfig};
pub use enforce::EnforceFlags;
pub use error::Error;
pub use limit::Limit;
pub use partition::PartitionConfig;
pub use policy::ClusterPolicy;
pub use qos::{QosConfig, QosFlags, QosLimits};
pub use tres::{Tres, TresCounts, TresLimits};
