// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the enforcement engine.

use crate::reason::ReasonCode;
use acctpol_config::{PartitionName, QosName};

/// All errors the enforcement engine can surface to callers.
///
/// Decision outcomes (a job being held or rejected by a limit) are *not*
/// errors; they are boolean results paired with a [`ReasonCode`]. These
/// variants cover configuration problems the caller must treat as permanent
/// for the affected job.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A wrapper for policy-configuration errors.
    #[error("A policy configuration error occurred: {0}")]
    ConfigError(#[from] acctpol_config::Error),

    /// The job carries no resolvable association.
    #[error("Job {job_id} has no association for account `{account}` and user {user_id}")]
    NoAssociation {
        /// The id of the affected job.
        job_id: u32,
        /// The account the job named.
        account: String,
        /// The owning user id.
        user_id: u32,
    },

    /// The job record carries no request details.
    #[error("Job {job_id} has no request details")]
    MissingJobDetails {
        /// The id of the affected job.
        job_id: u32,
    },

    /// A QoS name did not resolve against the loaded policy.
    #[error("Unknown qos `{name}`")]
    UnknownQos {
        /// The unresolved QoS name.
        name: QosName,
    },

    /// A partition's default QoS did not resolve against the loaded policy.
    #[error("Partition `{partition}` names unknown qos `{name}`")]
    UnknownPartitionQos {
        /// The partition carrying the reference.
        partition: PartitionName,
        /// The unresolved QoS name.
        name: QosName,
    },

    /// Re-validation of a pending job failed against current limits.
    #[error("Job {job_id} violates current limits: {reason}")]
    PolicyViolation {
        /// The id of the affected job.
        job_id: u32,
        /// The limit that produced the violation.
        reason: ReasonCode,
    },
}
