//! Device I/O via the cpal backend, plus the sample-level audio helpers.
//!
//! # Design constraints
//!
//! The cpal callbacks run on OS audio threads at elevated priority. They
//! **must not** block on a mutex or perform I/O. The only steady-state
//! allocation is the `pcm16` payload of each `inputData` event while
//! recording.
//!
//! The output callback owns the `RenderEngine` outright. cpal hands it
//! buffers of whatever size the host picks, so a `BlockDriver` renders fixed
//! `block_len` blocks into a small staging buffer and copies them out frame
//! by frame, duplicating the mono signal across every output channel.
//!
//! When capture is enabled, the input callback mixes to mono and pushes into
//! an SPSC capture ring; the output callback pops one block per render and
//! passes it to the engine's capture path.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on macOS).
//! `AudioDuplex` therefore must be created and dropped on the same thread.
//! The session does this by calling `open` inside `spawn_blocking`.

pub mod convert;
pub mod device;
pub mod pcm;
pub mod resample;
pub mod silence;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use crate::{
    buffering::{CaptureConsumer, Consumer},
    engine::RenderEngine,
    error::{CadenceError, Result},
};
#[cfg(feature = "audio-cpal")]
use std::sync::atomic::Ordering;
use std::sync::{atomic::AtomicBool, Arc};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Renders fixed-size engine blocks and serves them one sample at a time.
pub struct BlockDriver {
    engine: RenderEngine,
    block: Vec<f32>,
    input_block: Vec<f32>,
    pos: usize,
    capture: Option<CaptureConsumer>,
}

impl BlockDriver {
    pub fn new(engine: RenderEngine, capture: Option<CaptureConsumer>) -> Self {
        let block_len = engine.block_len().max(1);
        Self {
            engine,
            block: vec![0.0; block_len],
            input_block: vec![0.0; block_len],
            pos: block_len,
            capture,
        }
    }

    /// Next mono output sample, rendering a new block when the current one is spent.
    pub fn next_sample(&mut self) -> f32 {
        if self.pos >= self.block.len() {
            self.render_block();
        }
        let sample = self.block[self.pos];
        self.pos += 1;
        sample
    }

    /// Fill an interleaved buffer of `channels` channels.
    pub fn fill_interleaved(&mut self, data: &mut [f32], channels: usize) {
        for frame in data.chunks_mut(channels.max(1)) {
            let sample = self.next_sample();
            frame.fill(sample);
        }
    }

    fn render_block(&mut self) {
        let captured = match self.capture.as_mut() {
            Some(ring) => {
                let n = ring.pop_slice(&mut self.input_block);
                self.input_block[n..].fill(0.0);
                n > 0
            }
            None => false,
        };
        let input = captured.then_some(self.input_block.as_slice());
        self.engine.process(input, &mut self.block);
        self.pos = 0;
    }
}

/// Handle to active output (and optional input) device streams. Both
/// callbacks go quiet once the shared `running` flag is cleared.
///
/// **Not `Send`**: create and drop this type on the same OS thread.
pub struct AudioDuplex {
    #[cfg(feature = "audio-cpal")]
    _output: Stream,
    #[cfg(feature = "audio-cpal")]
    _input: Option<Stream>,
    /// Output sample rate reported by the device (Hz).
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioDuplex {
    /// Open an output device by preferred name, otherwise the default output
    /// device, otherwise the first available one, and drive `engine` from
    /// its callback. With `capture`, also open the default input device.
    ///
    /// Capture is best-effort: an input device that is missing or runs at a
    /// different rate from the output is logged and skipped.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        engine: RenderEngine,
        running: Arc<AtomicBool>,
        preferred_output: Option<&str>,
        capture: bool,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = select_output_device(&host, preferred_output)?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening output device"
        );

        let supported = device
            .default_output_config()
            .map_err(|e| CadenceError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "output config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (input, capture_ring) = if capture {
            match open_capture(&host, sample_rate, Arc::clone(&running)) {
                Ok((stream, ring)) => (Some(stream), Some(ring)),
                Err(e) => {
                    warn!("capture disabled: {e}");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let mut driver = BlockDriver::new(engine, capture_ring);
        let running_out = Arc::clone(&running);
        let ch = channels as usize;

        let output = match supported.sample_format() {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _info| {
                    if !running_out.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }
                    driver.fill_interleaved(data, ch);
                },
                |err| error!("output stream error: {err}"),
                None,
            ),
            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _info| {
                    if !running_out.load(Ordering::Relaxed) {
                        data.fill(0);
                        return;
                    }
                    for frame in data.chunks_mut(ch.max(1)) {
                        let sample = driver.next_sample();
                        frame.fill((sample.clamp(-1.0, 1.0) * 32767.0) as i16);
                    }
                },
                |err| error!("output stream error: {err}"),
                None,
            ),
            fmt => {
                return Err(CadenceError::AudioStream(format!(
                    "unsupported output sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| CadenceError::AudioStream(e.to_string()))?;

        output
            .play()
            .map_err(|e| CadenceError::AudioStream(e.to_string()))?;

        Ok(Self {
            _output: output,
            _input: input,
            sample_rate,
            channels,
        })
    }
}

#[cfg(feature = "audio-cpal")]
fn select_output_device(host: &cpal::Host, preferred: Option<&str>) -> Result<cpal::Device> {
    if let Some(preferred_name) = preferred {
        match host.output_devices() {
            Ok(mut devices) => {
                if let Some(found) = devices.find(|device| {
                    device
                        .name()
                        .map(|name| name == preferred_name)
                        .unwrap_or(false)
                }) {
                    return Ok(found);
                }
                warn!(
                    "preferred output device '{}' not found, falling back",
                    preferred_name
                );
            }
            Err(e) => {
                warn!("failed to list output devices while resolving preference: {e}");
            }
        }
    }

    if let Some(default) = host.default_output_device() {
        return Ok(default);
    }
    let mut devices = host
        .output_devices()
        .map_err(|e| CadenceError::AudioDevice(e.to_string()))?;
    let fallback = devices.next().ok_or(CadenceError::NoDefaultOutputDevice)?;
    warn!("no default output device, falling back to first available output");
    Ok(fallback)
}

/// Open the default input device and mix it to mono into a fresh capture ring.
#[cfg(feature = "audio-cpal")]
fn open_capture(
    host: &cpal::Host,
    output_rate: u32,
    running: Arc<AtomicBool>,
) -> Result<(Stream, CaptureConsumer)> {
    use crate::buffering::{create_capture_ring, Producer};

    let device = host
        .default_input_device()
        .ok_or_else(|| CadenceError::AudioDevice("no default input device".into()))?;
    let supported = device
        .default_input_config()
        .map_err(|e| CadenceError::AudioDevice(e.to_string()))?;

    let sample_rate = supported.sample_rate().0;
    if sample_rate != output_rate {
        return Err(CadenceError::AudioDevice(format!(
            "input rate {sample_rate} Hz does not match output rate {output_rate} Hz"
        )));
    }
    let channels = supported.channels();
    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let (mut producer, consumer) = create_capture_ring();
    let ch = channels.max(1) as usize;
    let mut mix_buf: Vec<f32> = Vec::new();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _info| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                if ch == 1 {
                    producer.push_slice(data);
                    return;
                }
                let frames = data.len() / ch;
                mix_buf.resize(frames, 0.0);
                for (f, frame) in data.chunks_exact(ch).enumerate() {
                    mix_buf[f] = frame.iter().sum::<f32>() / ch as f32;
                }
                producer.push_slice(&mix_buf);
            },
            |err| error!("input stream error: {err}"),
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _info| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                let frames = data.len() / ch;
                mix_buf.resize(frames, 0.0);
                for (f, frame) in data.chunks_exact(ch).enumerate() {
                    let sum: f32 = frame.iter().map(|s| *s as f32 / 32768.0).sum();
                    mix_buf[f] = sum / ch as f32;
                }
                producer.push_slice(&mix_buf);
            },
            |err| error!("input stream error: {err}"),
            None,
        ),
        fmt => {
            return Err(CadenceError::AudioStream(format!(
                "unsupported input sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| CadenceError::AudioStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CadenceError::AudioStream(e.to_string()))?;
    info!(sample_rate, channels, "capture device opened");

    Ok((stream, consumer))
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioDuplex {
    pub fn open(
        _engine: RenderEngine,
        _running: Arc<AtomicBool>,
        _preferred_output: Option<&str>,
        _capture: bool,
    ) -> Result<Self> {
        Err(CadenceError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
