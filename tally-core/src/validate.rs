// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Why a sink refused a row, for example an empty metric name or a tag without `=`.
///
/// Holds every problem found in the row, not just the first. Rows are rejected rarely, so
/// this is free to allocate.
#[derive(Clone, PartialEq, Eq)]
pub struct ValidationError(Vec<String>);

impl ValidationError {
    /// A single problem.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self(vec![reason.into()])
    }

    /// Collects problems while a row is checked. See [`ValidationErrorBuilder::build`].
    pub fn builder() -> ValidationErrorBuilder {
        ValidationErrorBuilder::default()
    }

    /// Prefix every problem with the part of the row it was found in.
    pub fn context(mut self, part: &str) -> Self {
        for reason in &mut self.0 {
            *reason = format!("`{part}`: {reason}");
        }
        self
    }

    /// The problems, in the order they were found.
    pub fn reasons(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Debug for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.0).finish()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid row: ")?;
        f.write_str(&self.0.join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// Accumulates the problems found in one row.
#[derive(Debug, Clone, Default)]
pub struct ValidationErrorBuilder(Vec<String>);

impl ValidationErrorBuilder {
    /// Record a problem.
    pub fn invalid(&mut self, reason: impl Into<String>) -> &mut Self {
        self.0.push(reason.into());
        self
    }

    /// Record a problem found in `part` of the row.
    pub fn invalid_for(&mut self, part: &str, reason: &str) -> &mut Self {
        self.0.push(format!("`{part}`: {reason}"));
        self
    }

    /// Record every problem in `error`.
    pub fn extend(&mut self, error: ValidationError) -> &mut Self {
        self.0.extend(error.0);
        self
    }

    /// `Ok` if nothing was recorded.
    pub fn build(self) -> Result<(), ValidationError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ValidationError(self.0))
        }
    }
}
