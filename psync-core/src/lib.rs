//! psync-core: reconciliation primitives for remote policy resources.
//!
//! This crate holds the parts of psync that do not know anything about a
//! concrete resource type:
//! - [`Driver`]: create/read/update/delete against any [`Lifecycle`]
//!   implementation, polling pending states until a target state is reached
//! - [`drift`]: content fingerprints and the fingerprint/etag rule that decides
//!   whether a statement list really changed
//! - [`LifecycleError`] / [`RemoteError`]: the error taxonomy surfaced to callers
//!
//! # Example
//! ```ignore
//! use psync_core::{Driver, DriverConfig};
//!
//! let driver = Driver::new(DriverConfig::default());
//! driver.create(&mut adapter).await?;
//! ```

pub mod config;
pub mod drift;
pub mod driver;
pub mod error;

pub use config::DriverConfig;
pub use drift::{AppliedMarker, Drift, DriftReason, Fingerprint};
pub use driver::{Driver, Lifecycle};
pub use error::{LifecycleError, Operation, RemoteError};
