//! `PlaybackSession`: control-side owner of a render engine.
//!
//! ## Lifecycle
//!
//! ```text
//! PlaybackSession::new(config)
//!     ├─► take_engine()          → RenderEngine driven by your own audio callback
//!     └─► start_device(..)       → cpal duplex stream + event pump, status = running
//!             └─► stop()         → running=false, stream dropped on its own thread
//! ```
//!
//! Whichever path drives the engine, the control thread feeds it through
//! `push_samples` / `push_pcm16_le`, reports latency through `record_rtt`
//! (or `ping_sent` / `pong_received`), and collects engine events with
//! `poll_events`, which also fans them out to `subscribe()` receivers.
//!
//! `PlaybackSession` is `Send + Sync`; every mutable field sits behind a
//! `parking_lot::Mutex` or an atomic, none of which the render thread touches.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Instant;

use crossbeam_channel::TryRecvError;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    audio::{convert::RateConverter, pcm::decode_le_bytes},
    config::SessionConfig,
    control::{AdaptiveBufferController, PingTracker, UnderrunLog, UnderrunRecord},
    engine::{render::DiagnosticsSnapshot, ConfigUpdate, RenderDiagnostics, RenderEngine},
    error::{CadenceError, Result},
    ipc::{
        create_channels,
        messages::{ControlMessage, EngineEvent, PlaybackStatus},
        ControlEndpoint,
    },
};

/// Broadcast capacity for event subscribers.
const BROADCAST_CAP: usize = 1_024;

/// Sleep between empty event polls on the device pump thread.
#[cfg(feature = "audio-cpal")]
const PUMP_IDLE_MS: u64 = 5;

/// Control-side view of playback health.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: PlaybackStatus,
    pub buffer_health: f64,
    pub playback_rate: f64,
    pub mean_rtt_ms: f64,
    /// Last fill target pushed by the controller.
    pub target_blocks: usize,
    pub underruns: usize,
}

struct SessionShared {
    config: SessionConfig,
    control: ControlEndpoint,
    controller: Mutex<AdaptiveBufferController>,
    converter: Mutex<RateConverter>,
    pinger: Mutex<PingTracker>,
    underruns: Mutex<UnderrunLog>,
    snapshot: Mutex<SessionSnapshot>,
    started_at: Mutex<Instant>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl SessionShared {
    fn send(&self, message: ControlMessage) -> Result<()> {
        self.control
            .commands
            .send(message)
            .map_err(|_| CadenceError::ChannelClosed)
    }

    fn poll_events(&self, now: Instant) -> usize {
        let mut handled = 0;
        loop {
            match self.control.events.try_recv() {
                Ok(event) => {
                    self.observe(&event, now);
                    let _ = self.event_tx.send(event);
                    handled += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        handled
    }

    fn observe(&self, event: &EngineEvent, now: Instant) {
        match event {
            EngineEvent::PlaybackMetrics(metrics) => {
                let mut snapshot = self.snapshot.lock();
                snapshot.status = PlaybackStatus::Playing;
                snapshot.buffer_health = metrics.buffer_health;
                snapshot.playback_rate = metrics.playback_rate;
                if metrics.underrun {
                    let since_start = now.saturating_duration_since(*self.started_at.lock());
                    let mut log = self.underruns.lock();
                    log.record(since_start, snapshot.mean_rtt_ms);
                    snapshot.underruns = log.len();
                }
            }
            EngineEvent::BufferingStatus(status) => {
                let mut snapshot = self.snapshot.lock();
                snapshot.status = PlaybackStatus::Buffering;
                snapshot.buffer_health = status.buffer_health;
            }
            EngineEvent::InputData { .. } => {}
        }
    }

    fn record_rtt(&self, rtt_ms: f64, now: Instant) -> Result<Option<ConfigUpdate>> {
        let (update, mean_rtt_ms) = {
            let mut controller = self.controller.lock();
            let update = controller.record_rtt(rtt_ms, now);
            (update, controller.mean_rtt_ms())
        };

        {
            let mut snapshot = self.snapshot.lock();
            snapshot.mean_rtt_ms = mean_rtt_ms;
            if let Some(blocks) = update.and_then(|u| u.target_blocks) {
                snapshot.target_blocks = blocks;
            }
        }

        if let Some(update) = update {
            self.send(ControlMessage::Configure(update))?;
        }
        Ok(update)
    }

    /// Rebuild the rate-dependent pieces after a device reports its real rate.
    #[cfg(any(feature = "audio-cpal", test))]
    fn set_device_rate(&self, device_rate: u32) -> Result<()> {
        if device_rate == self.config.device_sample_rate {
            return Ok(());
        }
        info!(
            configured = self.config.device_sample_rate,
            actual = device_rate,
            "device sample rate differs from config, retargeting"
        );
        *self.converter.lock() = RateConverter::new(
            self.config.stream_sample_rate,
            device_rate,
            self.config.convert_chunk,
        )?;
        *self.controller.lock() = AdaptiveBufferController::new(
            self.config.controller,
            device_rate,
            self.config.block_len,
        );
        Ok(())
    }
}

/// Control-side handle to one playback stream.
pub struct PlaybackSession {
    shared: Arc<SessionShared>,
    engine: Mutex<Option<RenderEngine>>,
    running: Arc<AtomicBool>,
    diagnostics: Arc<RenderDiagnostics>,
}

impl PlaybackSession {
    /// Validate `config` and build the engine, channels, and controller.
    ///
    /// # Errors
    /// `InvalidConfig` if validation fails or the rate converter cannot be built.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;

        let (control, endpoint) = create_channels(config.event_channel_capacity);
        let diagnostics = Arc::new(RenderDiagnostics::default());
        let engine = RenderEngine::new(
            config.playback,
            config.block_len,
            endpoint,
            Arc::clone(&diagnostics),
        );
        let converter = RateConverter::new(
            config.stream_sample_rate,
            config.device_sample_rate,
            config.convert_chunk,
        )?;
        let controller = AdaptiveBufferController::new(
            config.controller,
            config.device_sample_rate,
            config.block_len,
        );
        let (event_tx, _) = broadcast::channel(BROADCAST_CAP);

        let snapshot = SessionSnapshot {
            status: PlaybackStatus::Buffering,
            buffer_health: 0.0,
            playback_rate: 1.0,
            mean_rtt_ms: 0.0,
            target_blocks: config.playback.target_blocks,
            underruns: 0,
        };

        info!(
            block_len = config.block_len,
            device_rate = config.device_sample_rate,
            stream_rate = config.stream_sample_rate,
            target_blocks = config.playback.target_blocks,
            "playback session created"
        );

        Ok(Self {
            shared: Arc::new(SessionShared {
                config,
                control,
                controller: Mutex::new(controller),
                converter: Mutex::new(converter),
                pinger: Mutex::new(PingTracker::new()),
                underruns: Mutex::new(UnderrunLog::default()),
                snapshot: Mutex::new(snapshot),
                started_at: Mutex::new(Instant::now()),
                event_tx,
            }),
            engine: Mutex::new(Some(engine)),
            running: Arc::new(AtomicBool::new(false)),
            diagnostics,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Hand the render engine to the real-time context. Succeeds once.
    ///
    /// # Errors
    /// `EngineTaken` on the second call or after `start_device`.
    pub fn take_engine(&self) -> Result<RenderEngine> {
        self.engine.lock().take().ok_or(CadenceError::EngineTaken)
    }

    /// Queue decoded float samples at the stream rate for playback.
    ///
    /// # Errors
    /// `ChannelClosed` once the engine has been dropped.
    pub fn push_samples(&self, samples: &[f32]) -> Result<()> {
        let ready = self.shared.converter.lock().push(samples);
        for chunk in ready {
            self.shared.send(ControlMessage::AddOutputBuffer(chunk))?;
        }
        Ok(())
    }

    /// Release speech still held by the rate converter. Call at end of stream
    /// or when delivery pauses; a no-op when rates match.
    ///
    /// # Errors
    /// `ChannelClosed` once the engine has been dropped.
    pub fn flush_stream(&self) -> Result<()> {
        let tail = self.shared.converter.lock().flush();
        match tail {
            Some(chunk) => self.shared.send(ControlMessage::AddOutputBuffer(chunk)),
            None => Ok(()),
        }
    }

    /// Decode little-endian 16-bit PCM from the network and queue it.
    ///
    /// # Errors
    /// `OddPcmLength` for a truncated payload, `ChannelClosed` as for `push_samples`.
    pub fn push_pcm16_le(&self, bytes: &[u8]) -> Result<()> {
        let samples = decode_le_bytes(bytes)?;
        self.push_samples(&samples)
    }

    pub fn start_recording(&self) -> Result<()> {
        self.shared.send(ControlMessage::StartRecording)
    }

    pub fn stop_recording(&self) -> Result<()> {
        self.shared.send(ControlMessage::StopRecording)
    }

    /// Forward a partial configuration update to the engine.
    pub fn configure(&self, update: ConfigUpdate) -> Result<()> {
        self.shared.send(ControlMessage::Configure(update))
    }

    /// Set the linear output gain. Negative or non-finite values are ignored
    /// by the engine.
    pub fn set_volume(&self, volume: f64) -> Result<()> {
        self.configure(ConfigUpdate::volume(volume))
    }

    /// Mark a keep-alive ping as sent now.
    pub fn ping_sent(&self) {
        self.shared.pinger.lock().ping_sent(Instant::now());
    }

    /// Close the outstanding ping and feed its RTT to the controller.
    ///
    /// Returns the RTT in ms, or `None` when no ping was outstanding.
    pub fn pong_received(&self) -> Result<Option<f64>> {
        let now = Instant::now();
        let Some(rtt_ms) = self.shared.pinger.lock().pong_received(now) else {
            debug!("pong without outstanding ping");
            return Ok(None);
        };
        self.shared.record_rtt(rtt_ms, now)?;
        Ok(Some(rtt_ms))
    }

    /// Feed an externally measured RTT sample to the controller.
    ///
    /// Returns the update pushed to the engine, if a retune was due.
    pub fn record_rtt(&self, rtt_ms: f64) -> Result<Option<ConfigUpdate>> {
        self.shared.record_rtt(rtt_ms, Instant::now())
    }

    /// As [`record_rtt`](Self::record_rtt) with an explicit clock, for simulation.
    pub fn record_rtt_at(&self, rtt_ms: f64, now: Instant) -> Result<Option<ConfigUpdate>> {
        self.shared.record_rtt(rtt_ms, now)
    }

    /// Drain pending engine events without blocking, updating the snapshot and
    /// underrun log and rebroadcasting each event. Returns how many were handled.
    pub fn poll_events(&self) -> usize {
        self.shared.poll_events(Instant::now())
    }

    /// As [`poll_events`](Self::poll_events), timestamping underruns against `now`.
    pub fn poll_events_at(&self, now: Instant) -> usize {
        self.shared.poll_events(now)
    }

    /// Subscribe to engine events delivered by `poll_events` (or the device pump).
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        *self.shared.snapshot.lock()
    }

    pub fn underruns(&self) -> Vec<UnderrunRecord> {
        self.shared.underruns.lock().records().to_vec()
    }

    /// Render-side counters.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Restart the clock underrun timestamps are measured from.
    pub fn mark_stream_start(&self) {
        self.mark_stream_start_at(Instant::now());
    }

    pub fn mark_stream_start_at(&self, at: Instant) {
        *self.shared.started_at.lock() = at;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Open the output device (and the input device when `capture` is set)
    /// and drive the engine from its callback.
    ///
    /// Must be called from within a Tokio runtime. Blocks until the device is
    /// confirmed open. A failed open consumes the engine; build a new session
    /// to retry.
    ///
    /// # Errors
    /// - `AlreadyRunning` if started before, `EngineTaken` after `take_engine`.
    /// - `NoDefaultOutputDevice` / `AudioStream` on device error.
    #[cfg(feature = "audio-cpal")]
    pub fn start_device(&self, preferred_output: Option<String>, capture: bool) -> Result<()> {
        use crate::audio::AudioDuplex;

        if self.running.load(Ordering::SeqCst) {
            return Err(CadenceError::AlreadyRunning);
        }
        let engine = self.take_engine()?;

        self.diagnostics.reset();
        self.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let running = Arc::clone(&self.running);
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        tokio::task::spawn_blocking(move || {
            // cpal::Stream is !Send: open and drop it on this thread.
            let duplex = match AudioDuplex::open(
                engine,
                Arc::clone(&running),
                preferred_output.as_deref(),
                capture,
            ) {
                Ok(d) => {
                    let _ = open_tx.send(Ok(d.sample_rate));
                    d
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            while running.load(Ordering::Relaxed) {
                if shared.poll_events(Instant::now()) == 0 {
                    std::thread::sleep(std::time::Duration::from_millis(PUMP_IDLE_MS));
                }
            }
            shared.poll_events(Instant::now());

            drop(duplex);
            info!("device stream closed");
        });

        let opened = open_rx.recv().unwrap_or_else(|_| {
            Err(CadenceError::Other(anyhow::anyhow!(
                "device thread died unexpectedly"
            )))
        });
        self.confirm_device_open(opened)?;
        info!(capture, "playback device started");
        Ok(())
    }

    /// Adopt the rate the device opened at. Any failure here, including a
    /// rate the converter cannot handle, leaves the session stopped so the
    /// device thread unwinds and `stop` reports `NotRunning`.
    #[cfg(any(feature = "audio-cpal", test))]
    fn confirm_device_open(&self, opened: Result<u32>) -> Result<()> {
        let adopted = opened.and_then(|rate| {
            self.shared.set_device_rate(rate)?;
            Ok(rate)
        });
        match adopted {
            Ok(rate) => {
                self.mark_stream_start();
                debug!(sample_rate = rate, "device rate adopted");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Stop the device stream started by `start_device`.
    ///
    /// # Errors
    /// `NotRunning` if no device stream is active.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(CadenceError::NotRunning);
        }
        self.running.store(false, Ordering::SeqCst);
        info!("playback stop requested");
        Ok(())
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("config", &self.shared.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
