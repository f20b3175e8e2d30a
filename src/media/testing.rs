//! Scripted backend for unit tests.

use super::backend::MediaBackend;
use super::handle::{Readiness, ReadinessReporter};
use super::item::MediaItem;
use crate::error::LoadError;

/// Records every call and lets the test decide when loads finish.
#[derive(Debug, Default)]
pub struct ManualBackend {
    reporter: Option<ReadinessReporter>,
    pub loads: Vec<MediaItem>,
    pub unloads: usize,
    pub playing: bool,
    pub play_calls: usize,
    pub pause_calls: usize,
    pub looping: bool,
    pub reject_loads: bool,
}

impl ManualBackend {
    /// A backend whose every load is refused.
    pub fn rejecting() -> Self {
        Self {
            reject_loads: true,
            ..Self::default()
        }
    }

    /// Reporter of the most recent load.
    pub fn reporter(&self) -> Option<ReadinessReporter> {
        self.reporter.clone()
    }

    /// Finish the most recent load.
    pub fn report(&self, readiness: Readiness) -> bool {
        self.reporter
            .as_ref()
            .is_some_and(|reporter| reporter.report(readiness))
    }
}

impl MediaBackend for ManualBackend {
    fn load(&mut self, item: &MediaItem, reporter: ReadinessReporter) -> Result<(), LoadError> {
        self.loads.push(item.clone());
        self.reporter = Some(reporter);
        if self.reject_loads {
            return Err(LoadError::Rejected(item.to_string()));
        }
        Ok(())
    }

    fn play(&mut self) -> anyhow::Result<()> {
        self.play_calls += 1;
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) -> anyhow::Result<()> {
        self.pause_calls += 1;
        self.playing = false;
        Ok(())
    }

    fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    fn unload(&mut self) {
        self.unloads += 1;
        self.playing = false;
    }
}
