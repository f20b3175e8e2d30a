//! Buffering backend that needs no decoder.
//!
//! Loading a source downloads its first bytes (or checks that a local file
//! exists) on a tokio task and reports the outcome. Play and pause only track
//! transport state. This is what the headless viewer runs with when the
//! `gstreamer` feature is off.

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use reqwest::header::RANGE;
use tokio::task::JoinHandle;

use super::backend::MediaBackend;
use super::handle::{Readiness, ReadinessReporter};
use super::item::MediaItem;
use crate::error::LoadError;

pub struct HttpProbeBackend {
    client: reqwest::Client,
    prebuffer_bytes: usize,
    task: Option<JoinHandle<()>>,
    playing: bool,
    looping: bool,
}

impl HttpProbeBackend {
    pub fn new(client: reqwest::Client, prebuffer_bytes: usize) -> Self {
        Self {
            client,
            prebuffer_bytes: prebuffer_bytes.max(1),
            task: None,
            playing: false,
            looping: false,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl MediaBackend for HttpProbeBackend {
    fn load(&mut self, item: &MediaItem, reporter: ReadinessReporter) -> Result<(), LoadError> {
        self.cancel();
        self.playing = false;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| LoadError::NoRuntime(item.to_string()))?;

        let task = match item.url().scheme() {
            "file" => {
                let path = item
                    .url()
                    .to_file_path()
                    .map_err(|()| LoadError::Rejected(item.to_string()))?;
                let item = item.clone();
                runtime.spawn(async move {
                    match tokio::fs::metadata(&path).await {
                        Ok(meta) if meta.is_file() => {
                            reporter.report(Readiness::Ready);
                        }
                        Ok(_) => {
                            tracing::warn!("{} is not a file", item);
                            reporter.report(Readiness::Failed);
                        }
                        Err(e) => {
                            tracing::warn!("Failed to open {}: {}", item, e);
                            reporter.report(Readiness::Failed);
                        }
                    }
                })
            }
            "http" | "https" => runtime.spawn(prebuffer(
                self.client.clone(),
                item.clone(),
                self.prebuffer_bytes,
                reporter,
            )),
            _ => return Err(LoadError::Rejected(item.to_string())),
        };

        self.task = Some(task);
        Ok(())
    }

    fn play(&mut self) -> anyhow::Result<()> {
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) -> anyhow::Result<()> {
        self.playing = false;
        Ok(())
    }

    fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    fn unload(&mut self) {
        self.cancel();
        self.playing = false;
    }
}

impl Drop for HttpProbeBackend {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn prebuffer(
    client: reqwest::Client,
    item: MediaItem,
    limit: usize,
    reporter: ReadinessReporter,
) {
    match read_head(&client, &item, limit).await {
        Ok(received) => {
            tracing::debug!("Buffered {} bytes of {}", received, item);
            reporter.report(Readiness::Ready);
        }
        Err(e) => {
            tracing::warn!("Failed to buffer {}: {:#}", item, e);
            reporter.report(Readiness::Failed);
        }
    }
}

/// Download up to `limit` bytes from the start of the source.
async fn read_head(client: &reqwest::Client, item: &MediaItem, limit: usize) -> Result<usize> {
    let response = client
        .get(item.url().clone())
        .header(RANGE, format!("bytes=0-{}", limit - 1))
        .send()
        .await
        .context("Failed to send request")?
        .error_for_status()
        .context("Server returned error")?;

    let mut stream = response.bytes_stream();
    let mut received = 0;
    while let Some(chunk) = stream.next().await {
        received += chunk.context("Failed to read response")?.len();
        if received >= limit {
            break;
        }
    }

    if received == 0 {
        bail!("empty response");
    }
    Ok(received)
}
