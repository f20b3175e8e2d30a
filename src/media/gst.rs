//! GStreamer-based playback handles.
//!
//! Each backend builds one decode pipeline on first use and rebinds it to new
//! sources for the rest of its life. Readiness is reported from bus messages
//! on GStreamer's streaming threads; looping is a flushing seek back to zero
//! on end of stream.

use anyhow::{Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::backend::MediaBackend;
use super::handle::{Readiness, ReadinessReporter};
use super::item::MediaItem;
use crate::error::LoadError;

/// Video frame extracted from the pipeline.
#[derive(Clone)]
pub struct VideoFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

struct Pipeline {
    pipeline: gst::Pipeline,
    source: gst::Element,
}

/// Playback handle backend driving a GStreamer pipeline.
pub struct GstBackend {
    pipeline: Option<Pipeline>,
    current_frame: Arc<Mutex<Option<VideoFrame>>>,
    reporter: Arc<Mutex<Option<ReadinessReporter>>>,
    looping: Arc<AtomicBool>,
}

impl GstBackend {
    /// Initialize GStreamer (call once at startup).
    pub fn init() -> Result<()> {
        gst::init().context("Failed to initialize GStreamer")?;
        tracing::info!("GStreamer initialized: {}", gst::version_string());
        Ok(())
    }

    pub fn new() -> Self {
        Self {
            pipeline: None,
            current_frame: Arc::new(Mutex::new(None)),
            reporter: Arc::new(Mutex::new(None)),
            looping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the latest decoded frame, if any.
    pub fn current_frame(&self) -> Option<VideoFrame> {
        self.current_frame.lock().ok()?.clone()
    }

    fn build_pipeline(&self) -> Result<Pipeline> {
        let pipeline = gst::Pipeline::new();

        let source = gst::ElementFactory::make("uridecodebin")
            .name("source")
            .build()
            .context("Failed to create uridecodebin")?;

        let convert = gst::ElementFactory::make("videoconvert")
            .name("convert")
            .build()
            .context("Failed to create videoconvert")?;

        let scale = gst::ElementFactory::make("videoscale")
            .name("scale")
            .build()
            .context("Failed to create videoscale")?;

        let appsink = gst_app::AppSink::builder()
            .name("sink")
            .caps(
                &gst_video::VideoCapsBuilder::new()
                    .format(gst_video::VideoFormat::Rgba)
                    .build(),
            )
            .build();

        pipeline
            .add_many([&source, &convert, &scale, appsink.upcast_ref()])
            .context("Failed to add elements to pipeline")?;

        gst::Element::link_many([&convert, &scale, appsink.upcast_ref()])
            .context("Failed to link elements")?;

        // uridecodebin exposes its pads again after every rebind
        let convert_weak = convert.downgrade();
        source.connect_pad_added(move |_src, src_pad| {
            let Some(convert) = convert_weak.upgrade() else {
                return;
            };
            let Some(sink_pad) = convert.static_pad("sink") else {
                return;
            };
            if sink_pad.is_linked() {
                return;
            }

            let caps = src_pad
                .current_caps()
                .unwrap_or_else(|| src_pad.query_caps(None));
            let is_video = caps
                .structure(0)
                .map(|s| s.name().starts_with("video/"))
                .unwrap_or(false);

            if is_video {
                if let Err(e) = src_pad.link(&sink_pad) {
                    tracing::error!("Failed to link pads: {:?}", e);
                }
            }
        });

        let frame_slot = self.current_frame.clone();
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let caps = sample.caps().ok_or(gst::FlowError::Error)?;

                    let video_info =
                        gst_video::VideoInfo::from_caps(caps).map_err(|_| gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;

                    let frame = VideoFrame {
                        pixels: map.as_slice().to_vec(),
                        width: video_info.width(),
                        height: video_info.height(),
                    };
                    if let Ok(mut guard) = frame_slot.lock() {
                        *guard = Some(frame);
                    }

                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        let reporter = self.reporter.clone();
        let looping = self.looping.clone();
        let pipeline_weak = pipeline.downgrade();
        let bus = pipeline.bus().context("Pipeline has no bus")?;
        bus.set_sync_handler(move |_bus, msg| {
            match msg.view() {
                gst::MessageView::AsyncDone(_) => report(&reporter, Readiness::Ready),
                gst::MessageView::Error(err) => {
                    tracing::error!("GStreamer error: {} ({:?})", err.error(), err.debug());
                    report(&reporter, Readiness::Failed);
                }
                gst::MessageView::Eos(_) if looping.load(Ordering::SeqCst) => {
                    if let Some(pipeline) = pipeline_weak.upgrade() {
                        // Seeking from a streaming thread can deadlock
                        pipeline.call_async(|pipeline| {
                            let _ = pipeline.seek_simple(
                                gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                                gst::ClockTime::ZERO,
                            );
                        });
                    }
                }
                _ => {}
            }
            gst::BusSyncReply::Drop
        });

        Ok(Pipeline { pipeline, source })
    }
}

impl Default for GstBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn report(slot: &Mutex<Option<ReadinessReporter>>, readiness: Readiness) {
    if let Ok(guard) = slot.lock() {
        if let Some(reporter) = guard.as_ref() {
            reporter.report(readiness);
        }
    }
}

impl MediaBackend for GstBackend {
    fn load(&mut self, item: &MediaItem, reporter: ReadinessReporter) -> Result<(), LoadError> {
        if self.pipeline.is_none() {
            self.pipeline = Some(self.build_pipeline()?);
        }
        let Some(Pipeline { pipeline, source }) = self.pipeline.as_ref() else {
            return Err(LoadError::Rejected(item.to_string()));
        };

        pipeline
            .set_state(gst::State::Null)
            .context("Failed to reset pipeline")?;
        if let Ok(mut frame) = self.current_frame.lock() {
            *frame = None;
        }
        if let Ok(mut slot) = self.reporter.lock() {
            *slot = Some(reporter.clone());
        }

        tracing::debug!("Loading {} into pipeline", item);
        source.set_property("uri", item.as_str());

        // Prerolling in PAUSED buffers the first frames without playing them
        match pipeline
            .set_state(gst::State::Paused)
            .context("Failed to preroll pipeline")?
        {
            gst::StateChangeSuccess::Success | gst::StateChangeSuccess::NoPreroll => {
                reporter.report(Readiness::Ready);
            }
            _ => {}
        }
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        if let Some(Pipeline { pipeline, .. }) = &self.pipeline {
            pipeline
                .set_state(gst::State::Playing)
                .context("Failed to set pipeline to playing")?;
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if let Some(Pipeline { pipeline, .. }) = &self.pipeline {
            pipeline
                .set_state(gst::State::Paused)
                .context("Failed to set pipeline to paused")?;
        }
        Ok(())
    }

    fn set_looping(&mut self, looping: bool) {
        self.looping.store(looping, Ordering::SeqCst);
    }

    fn unload(&mut self) {
        if let Ok(mut slot) = self.reporter.lock() {
            *slot = None;
        }
        if let Some(Pipeline { pipeline, .. }) = &self.pipeline {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                tracing::warn!("Failed to stop pipeline: {:?}", e);
            }
        }
        if let Ok(mut frame) = self.current_frame.lock() {
            *frame = None;
        }
    }
}

impl Drop for GstBackend {
    fn drop(&mut self) {
        if let Some(Pipeline { pipeline, .. }) = &self.pipeline {
            let _ = pipeline.set_state(gst::State::Null);
        }
    }
}
