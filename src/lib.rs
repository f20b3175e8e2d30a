//! Continuously scrollable video feed.
//!
//! A fixed pool of playback handles is shared by every item of a vertically
//! paged feed. The [`coordinator::Coordinator`] keeps the current item and its
//! two neighbors bound, decides what plays, and holds a scroll lock after each
//! settle until the neighbor being approached is buffered. The
//! [`driver`] runs a coordinator on its own tokio task and exposes it through
//! a cloneable [`driver::FeedHandle`].

pub mod config;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod feed;
pub mod media;
pub mod pool;

pub use config::ViewerConfig;
pub use coordinator::{
    Coordinator, CoordinatorSettings, Direction, DragPermission, NeighborWindow, Phase, Wake,
};
pub use driver::{spawn_feed, FeedCommand, FeedHandle, FeedStatus};
pub use error::{FetchError, LoadError};
pub use feed::{HttpFeedSource, MediaListSource, StaticFeed};
pub use media::{HandleId, MediaBackend, MediaItem, Readiness, ReadinessReporter};
pub use pool::ResourcePool;
