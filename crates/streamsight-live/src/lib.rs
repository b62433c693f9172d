//! # streamsight-live
//!
//! The materialization/synchronization engine. A [`LiveView`] is one
//! continuously synchronized, ordered, projected result set for one
//! (collection, filter, projection, sort) shape: built once from a
//! snapshot, then kept current by applying the collection's change feed.
//!
//! The [`ChangeFeedMultiplexer`] shares one underlying source
//! subscription per collection across every view watching it, and
//! survives feed invalidation by transparently resubscribing. The
//! [`ViewRegistry`] deduplicates views by a content fingerprint of their
//! query shape and owns their lifecycle.

mod error;
mod fingerprint;
mod multiplexer;
mod registry;
mod view;

pub use error::LiveError;
pub use fingerprint::ViewFingerprint;
pub use multiplexer::{ChangeFeedMultiplexer, FeedStats};
pub use registry::{ViewInfo, ViewRegistry};
pub use view::{LiveView, ReadyState, ViewOptions};
