use super::handle::ReadinessReporter;
use super::item::MediaItem;
use crate::error::LoadError;

/// The media layer behind a pooled handle.
///
/// `load` only starts loading. The backend finishes asynchronously, on its
/// own threads or tasks, and publishes the outcome through the reporter it
/// was given. Everything else is called from the feed's owner context.
pub trait MediaBackend: Send + 'static {
    /// Start loading `item`, replacing whatever was loaded before.
    fn load(&mut self, item: &MediaItem, reporter: ReadinessReporter) -> Result<(), LoadError>;

    fn play(&mut self) -> anyhow::Result<()>;

    fn pause(&mut self) -> anyhow::Result<()>;

    /// Restart from the beginning when playback reaches the end.
    fn set_looping(&mut self, looping: bool);

    /// Drop the loaded source and cancel any loading still in flight.
    fn unload(&mut self);
}
