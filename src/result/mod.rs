//! Result data model
//!
//! This module contains:
//! - `node` - The recursive [`ResultNode`] document
//! - `status` - Task status values
//! - `aggregate` - Status rollup from children to parent
//! - `stopwatch` - Wall-clock timing
//! - `usage` - Storage usage counters carried in `ext`
//! - `error` - Result model error types

pub mod aggregate;
pub mod error;
pub mod node;
pub mod status;
pub mod stopwatch;
pub mod usage;

pub use aggregate::{aggregate, aggregate_statuses};
pub use error::ResultError;
pub use node::ResultNode;
pub use status::{Status, UnknownStatus};
pub use stopwatch::{now_timestamp, Stopwatch};
pub use usage::StorageUsage;
