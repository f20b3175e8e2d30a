//! Playback handles and the media layers that drive them.

pub mod backend;
#[cfg(feature = "gstreamer")]
pub mod gst;
pub mod handle;
pub mod item;
pub mod probe;
#[cfg(test)]
pub(crate) mod testing;

pub use backend::MediaBackend;
pub use handle::{
    HandleId, MediaHandle, Readiness, ReadinessReporter, ReadinessSnapshot, ReadinessWatch,
};
pub use item::MediaItem;
pub use probe::HttpProbeBackend;
