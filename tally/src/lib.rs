#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod aggregator;
pub mod bucket;
pub mod cursor;
#[doc(hidden)]
pub mod rate_limit;
mod registry;
mod slot;
pub mod table;

pub use aggregator::{Aggregator, AggregatorKind, FieldType};
pub use bucket::{DistributionBucket, InvalidBoundaries};
pub use cursor::{Cursor, Row, UnsupportedOperation};
pub use registry::AggregatorRegistry;
pub use slot::Slot;
pub use table::{AggregationTable, SlotAddress, TableConfig, TableConfigError};
