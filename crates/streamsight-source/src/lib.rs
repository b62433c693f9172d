//! # streamsight-source
//!
//! The document-store boundary. The live-view engine consumes exactly
//! three capabilities from a source, expressed by the [`SourceAdapter`]
//! trait:
//! - a one-shot snapshot query,
//! - a long-lived change-feed subscription (re-invocable after
//!   invalidation),
//! - a point fetch by document id.
//!
//! [`MemorySource`] is the built-in implementation: an in-process document
//! store whose mutation API emits precisely the engine's
//! [`ChangeEvent`]s. It backs the server binary and the test suites; wire
//! adapters for external stores plug in behind the same trait.

mod adapter;
mod events;
mod memory;

pub use adapter::{ChangeFeed, SourceAdapter, SourceError};
pub use events::ChangeEvent;
pub use memory::MemorySource;
