//! Per-block render cycle.
//!
//! `RenderEngine::process` is called once per fixed-size device block from
//! the audio callback. It must not lock, block, or perform I/O, and it never
//! fails: underruns, empty queues and odd configurations all resolve to a
//! fully written output block plus an event describing what happened.
//!
//! The scratch buffer is sized at construction for the largest rate the
//! config allows. A `Configure` that raises `rate_max` may grow it once.
//! While recording, each captured block allocates its `pcm16` payload, since
//! `InputData` hands an owned buffer to the control side. Fully played chunks
//! are also freed here.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::TryRecvError;

use super::rate::{determine_playback_rate, smooth_rate};
use super::{PlaybackConfig, PlaybackState};
use crate::audio::pcm::encode_block;
use crate::audio::resample::resample_into;
use crate::buffering::{ChunkQueue, Occupancy};
use crate::ipc::messages::{BufferingStatus, ControlMessage, EngineEvent, PlaybackMetrics};
use crate::ipc::EngineEndpoint;

/// Counters shared with the control side. Written only by the render callback.
#[derive(Debug, Default)]
pub struct RenderDiagnostics {
    pub blocks_rendered: AtomicUsize,
    pub blocks_buffering: AtomicUsize,
    pub underruns: AtomicUsize,
    pub chunks_received: AtomicUsize,
    pub samples_played: AtomicUsize,
    pub capture_blocks: AtomicUsize,
    pub events_dropped: AtomicUsize,
    pub configs_applied: AtomicUsize,
}

impl RenderDiagnostics {
    pub fn reset(&self) {
        self.blocks_rendered.store(0, Ordering::Relaxed);
        self.blocks_buffering.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        self.chunks_received.store(0, Ordering::Relaxed);
        self.samples_played.store(0, Ordering::Relaxed);
        self.capture_blocks.store(0, Ordering::Relaxed);
        self.events_dropped.store(0, Ordering::Relaxed);
        self.configs_applied.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks_rendered: self.blocks_rendered.load(Ordering::Relaxed),
            blocks_buffering: self.blocks_buffering.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            samples_played: self.samples_played.load(Ordering::Relaxed),
            capture_blocks: self.capture_blocks.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            configs_applied: self.configs_applied.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub blocks_rendered: usize,
    pub blocks_buffering: usize,
    pub underruns: usize,
    pub chunks_received: usize,
    pub samples_played: usize,
    pub capture_blocks: usize,
    pub events_dropped: usize,
    pub configs_applied: usize,
}

/// What a single `process` call did with the output block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockReport {
    /// Silence written; not enough consumable audio.
    Buffering(BufferingStatus),
    /// Audio rendered at the reported rate.
    Played(PlaybackMetrics),
}

impl BlockReport {
    pub fn is_playing(&self) -> bool {
        matches!(self, BlockReport::Played(_))
    }
}

/// Owns the playback queue and state. Lives on the real-time thread.
pub struct RenderEngine {
    config: PlaybackConfig,
    block_len: usize,
    queue: ChunkQueue,
    smoothed_rate: f64,
    in_playback: bool,
    recording: bool,
    /// Queue samples read for the current block, `floor(block_len × rate)` long.
    scratch: Vec<f32>,
    endpoint: EngineEndpoint,
    diagnostics: Arc<RenderDiagnostics>,
}

impl RenderEngine {
    pub fn new(
        config: PlaybackConfig,
        block_len: usize,
        endpoint: EngineEndpoint,
        diagnostics: Arc<RenderDiagnostics>,
    ) -> Self {
        let mut engine = Self {
            config,
            block_len,
            queue: ChunkQueue::new(),
            smoothed_rate: 1.0,
            in_playback: false,
            recording: false,
            scratch: Vec::new(),
            endpoint,
            diagnostics,
        };
        engine.reserve_scratch();
        engine
    }

    /// Fixed device block length in samples.
    pub fn block_len(&self) -> usize {
        self.block_len
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState {
            smoothed_rate: self.smoothed_rate,
            offset: self.queue.offset(),
            in_playback: self.in_playback,
        }
    }

    /// Current queue occupancy under the active silence rule.
    pub fn occupancy(&self) -> Occupancy {
        self.queue
            .occupancy(self.config.skip_silence_when_idle, self.in_playback)
    }

    /// Render one device block.
    ///
    /// `input` is the matching capture block, if the device has one. `output`
    /// is always fully written; its length is normally `block_len`.
    pub fn process(&mut self, input: Option<&[f32]>, output: &mut [f32]) -> BlockReport {
        self.drain_commands();

        if let Some(input) = input {
            self.capture(input);
        }

        self.render(output)
    }

    fn drain_commands(&mut self) {
        loop {
            match self.endpoint.commands.try_recv() {
                Ok(message) => self.handle_message(message),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn handle_message(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Configure(update) => {
                self.config = self.config.apply(&update);
                self.reserve_scratch();
                self.diagnostics
                    .configs_applied
                    .fetch_add(1, Ordering::Relaxed);
            }
            ControlMessage::StartRecording => self.recording = true,
            ControlMessage::StopRecording => self.recording = false,
            ControlMessage::AddOutputBuffer(chunk) => {
                self.queue.enqueue(chunk);
                self.diagnostics
                    .chunks_received
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn capture(&mut self, input: &[f32]) {
        if !self.recording || input.is_empty() {
            return;
        }
        let pcm16 = encode_block(input);
        self.diagnostics
            .capture_blocks
            .fetch_add(1, Ordering::Relaxed);
        self.emit(EngineEvent::InputData { pcm16 });
    }

    fn render(&mut self, output: &mut [f32]) -> BlockReport {
        let occupancy = self.occupancy();
        let target_samples = self.config.target_samples(self.block_len);
        let buffer_health = occupancy.consumable as f64 / target_samples.max(1) as f64;

        if self.queue.is_empty() {
            // Keep the hysteresis flag; the next chunk resumes playback directly.
            return self.report_buffering(output, buffer_health, occupancy.total);
        }

        let consume = self.in_playback || occupancy.consumable >= target_samples;
        if !consume || occupancy.consumable == 0 {
            self.in_playback = false;
            return self.report_buffering(output, buffer_health, occupancy.total);
        }

        let instantaneous =
            determine_playback_rate(occupancy.consumable, target_samples, &self.config);
        self.smoothed_rate = smooth_rate(self.smoothed_rate, instantaneous, self.config.smoothing);

        let needed = (output.len() as f64 * self.smoothed_rate).floor() as usize;
        self.scratch.clear();
        self.scratch.resize(needed, 0.0);

        let skip_silence = self.config.skip_silence_when_idle && !self.in_playback;
        let samples_read = self.queue.drain_into(&mut self.scratch, skip_silence);
        let underrun = samples_read < needed;

        resample_into(&self.scratch, output);
        if self.config.volume != 1.0 {
            let gain = self.config.volume as f32;
            output.iter_mut().for_each(|s| *s *= gain);
        }
        self.in_playback = true;

        self.diagnostics
            .blocks_rendered
            .fetch_add(1, Ordering::Relaxed);
        self.diagnostics
            .samples_played
            .fetch_add(samples_read, Ordering::Relaxed);
        if underrun {
            self.diagnostics.underruns.fetch_add(1, Ordering::Relaxed);
        }

        let metrics = PlaybackMetrics {
            buffer_health,
            playback_rate: self.smoothed_rate,
            underrun,
            samples_read,
        };
        self.emit(EngineEvent::PlaybackMetrics(metrics));
        BlockReport::Played(metrics)
    }

    fn report_buffering(
        &mut self,
        output: &mut [f32],
        buffer_health: f64,
        total_buffered: usize,
    ) -> BlockReport {
        output.fill(0.0);
        self.diagnostics
            .blocks_buffering
            .fetch_add(1, Ordering::Relaxed);
        let status = BufferingStatus {
            buffer_health,
            total_buffered,
        };
        self.emit(EngineEvent::BufferingStatus(status));
        BlockReport::Buffering(status)
    }

    fn emit(&self, event: EngineEvent) {
        if self.endpoint.events.try_send(event).is_err() {
            self.diagnostics
                .events_dropped
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    fn reserve_scratch(&mut self) {
        let max_rate = self.config.rate_max.max(1.0);
        let wanted = (self.block_len as f64 * max_rate).ceil() as usize + 1;
        if wanted > self.scratch.capacity() {
            self.scratch.reserve(wanted - self.scratch.len());
        }
    }
}
