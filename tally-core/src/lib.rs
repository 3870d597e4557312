// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use crate::sink::{MetricSink, SinkError};
pub use crate::tags::TagSet;
pub use crate::validate::{ValidationError, ValidationErrorBuilder};

pub mod sink;
pub mod tags;
mod validate;

/// In-memory sinks for tests. This is not part of the stable API.
#[cfg(any(test, feature = "test-util"))]
pub mod test_util;
