// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the policy-configuration crate.

use miette::Diagnostic;
use std::fmt::Display;

/// Errors that can occur while reading, parsing, or validating a cluster
/// policy document.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// The policy document parsed but failed semantic validation.
    #[error("Invalid policy configuration: {errors:?}")]
    #[diagnostic(code(acctpol::config::invalid_policy))]
    InvalidPolicy {
        /// All validation failures, each with its document path.
        errors: Vec<String>,
    },

    /// An error that occurred while reading a policy file.
    #[error("File read error: {details}\nFile: {path}")]
    #[diagnostic(code(acctpol::config::file_read_error))]
    FileReadError {
        /// The path of the file that could not be read.
        path: String,
        /// A description of the error that occurred.
        details: String,
    },

    /// An error that occurred while deserializing a policy file.
    #[error("{format} deserialization error: {details}\nFile: {path}")]
    #[diagnostic(code(acctpol::config::deserialization_error))]
    DeserializationError {
        /// The path of the file that could not be deserialized.
        path: String,
        /// The format of the policy file (e.g. "YAML").
        format: String,
        /// A description of the error that occurred.
        details: String,
    },

    /// A stringified TRES vector could not be parsed.
    #[error("Invalid tres vector `{input}`: {details}")]
    #[diagnostic(code(acctpol::config::invalid_tres_vector))]
    InvalidTresVector {
        /// The offending codec string.
        input: String,
        /// A description of the error that occurred.
        details: String,
    },
}

impl Error {
    /// Build an [`Error::InvalidPolicy`] from accumulated validation errors,
    /// or `Ok(())` when there are none.
    pub fn from_validation(errors: Vec<String>) -> Result<(), Error> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidPolicy { errors })
        }
    }

    pub(crate) fn file_read(path: impl Display, details: impl Display) -> Error {
        Error::FileReadError {
            path: path.to_string(),
            details: details.to_string(),
        }
    }

    pub(crate) fn deserialization(
        path: impl Display,
        format: &str,
        details: impl Display,
    ) -> Error {
        Error::DeserializationError {
            path: path.to_string(),
            format: format.to_owned(),
            details: details.to_string(),
        }
    }
}
