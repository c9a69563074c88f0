//! Offline jitter simulator.
//!
//! Streams a gated test tone through a `PlaybackSession` with simulated
//! network jitter, stalls and RTT, renders every device block on a virtual
//! clock, and prints a JSON summary. `--output` also writes the rendered
//! audio as a 16-bit WAV. `--device` plays through the real output device
//! in wall-clock time instead.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use cadence_core::{
    audio::pcm::{encode_block, pcm16_to_le_bytes},
    BlockReport, PlaybackSession, SessionConfig, UnderrunRecord,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

#[derive(Debug)]
struct Args {
    seconds: f64,
    jitter_ms: f64,
    rtt_ms: f64,
    chunk_ms: f64,
    stall_every_s: f64,
    stall_ms: f64,
    seed: u64,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
    list_devices: bool,
    device: bool,
    device_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    seconds: f64,
    block_len: usize,
    device_sample_rate: u32,
    blocks: usize,
    blocks_playing: usize,
    blocks_buffering: usize,
    underruns: usize,
    chunks_sent: usize,
    min_rate: f64,
    max_rate: f64,
    mean_rtt_ms: f64,
    final_target_blocks: usize,
    events_dropped: usize,
    underrun_log: Vec<UnderrunRecord>,
}

/// One network chunk: arrival time (ms since start), first stream sample, length.
#[derive(Debug, Clone, Copy)]
struct Arrival {
    at_ms: f64,
    start: usize,
    len: usize,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("cadence-sim failed: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("cadence_core=info,cadence_sim=info")
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;

    if args.list_devices {
        let devices = cadence_core::audio::device::list_output_devices()
            .into_iter()
            .chain(cadence_core::audio::device::list_input_devices())
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    let config = SessionConfig::load(args.config.as_deref()).context("loading config")?;
    if args.device {
        run_device(&args, config)
    } else {
        run_virtual(&args, config)
    }
}

fn value<T: std::str::FromStr>(
    it: &mut impl Iterator<Item = String>,
    flag: &str,
) -> anyhow::Result<T> {
    let Some(v) = it.next() else {
        anyhow::bail!("missing value for {flag}");
    };
    v.parse::<T>()
        .map_err(|_| anyhow::anyhow!("invalid value for {flag}: {v}"))
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        seconds: 10.0,
        jitter_ms: 40.0,
        rtt_ms: 120.0,
        chunk_ms: 20.0,
        stall_every_s: 0.0,
        stall_ms: 0.0,
        seed: 7,
        output: None,
        config: None,
        list_devices: false,
        device: false,
        device_name: None,
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--seconds" => args.seconds = value::<f64>(&mut it, &arg)?.max(0.0),
            "--jitter-ms" => args.jitter_ms = value::<f64>(&mut it, &arg)?.max(0.0),
            "--rtt-ms" => args.rtt_ms = value::<f64>(&mut it, &arg)?.max(0.0),
            "--chunk-ms" => args.chunk_ms = value::<f64>(&mut it, &arg)?.max(1.0),
            "--stall-every-s" => args.stall_every_s = value::<f64>(&mut it, &arg)?.max(0.0),
            "--stall-ms" => args.stall_ms = value::<f64>(&mut it, &arg)?.max(0.0),
            "--seed" => args.seed = value(&mut it, &arg)?,
            "--output" => args.output = Some(value(&mut it, &arg)?),
            "--config" => args.config = Some(value(&mut it, &arg)?),
            "--list-devices" => args.list_devices = true,
            "--device" => args.device = true,
            "--device-name" => {
                args.device = true;
                args.device_name = Some(value(&mut it, &arg)?);
            }
            "--help" | "-h" => {
                println!(
                    "Usage: cadence-sim [--seconds <s>] [--jitter-ms <ms>] [--rtt-ms <ms>] \\
  [--chunk-ms <ms>] [--stall-every-s <s> --stall-ms <ms>] [--seed <n>] \\
  [--output <file.wav>] [--config <file.json>] [--list-devices] \\
  [--device | --device-name <name>]"
                );
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

/// 220 Hz tone, on for 1.5 s then silent for 0.5 s.
fn tone(stream_rate: u32, start: usize, len: usize) -> Vec<f32> {
    let rate = stream_rate as f64;
    (start..start + len)
        .map(|n| {
            let t = n as f64 / rate;
            if t % 2.0 < 1.5 {
                (0.3 * (2.0 * std::f64::consts::PI * 220.0 * t).sin()) as f32
            } else {
                0.0
            }
        })
        .collect()
}

fn chunk_len(args: &Args, stream_rate: u32) -> usize {
    ((args.chunk_ms * stream_rate as f64) / 1000.0).round().max(1.0) as usize
}

/// Chunk arrivals, in order. Chunk `i` leaves the sender at its stream time
/// and lands after a uniform jitter; arrivals inside a stall window slide to
/// the window's end.
fn schedule(args: &Args, stream_rate: u32, rng: &mut StdRng) -> Vec<Arrival> {
    let total = (args.seconds * stream_rate as f64) as usize;
    let chunk = chunk_len(args, stream_rate);
    let every_ms = args.stall_every_s * 1000.0;

    let mut arrivals = Vec::with_capacity(total / chunk + 1);
    let mut last_ms = 0.0f64;
    let mut start = 0usize;
    while start < total {
        let produced_ms = start as f64 * 1000.0 / stream_rate as f64;
        let mut at_ms = produced_ms + rng.gen::<f64>() * args.jitter_ms;
        if every_ms > 0.0 && args.stall_ms > 0.0 && at_ms >= every_ms {
            let phase = at_ms % every_ms;
            if phase < args.stall_ms {
                at_ms += args.stall_ms - phase;
            }
        }
        last_ms = last_ms.max(at_ms);
        let len = chunk.min(total - start);
        arrivals.push(Arrival {
            at_ms: last_ms,
            start,
            len,
        });
        start += len;
    }
    arrivals
}

fn push_chunk(session: &PlaybackSession, stream_rate: u32, chunk: Arrival) -> anyhow::Result<()> {
    let samples = tone(stream_rate, chunk.start, chunk.len);
    session.push_pcm16_le(&pcm16_to_le_bytes(&encode_block(&samples)))?;
    Ok(())
}

/// Virtual-clock run: renders as fast as the CPU allows.
fn run_virtual(args: &Args, config: SessionConfig) -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let stream_rate = config.stream_sample_rate;
    let arrivals = schedule(args, stream_rate, &mut rng);

    let session = PlaybackSession::new(config)?;
    let mut engine = session.take_engine()?;
    let block_len = session.config().block_len;
    let device_rate = session.config().device_sample_rate;
    let block_ms = block_len as f64 * 1000.0 / device_rate as f64;
    let total_blocks = (args.seconds * 1000.0 / block_ms).ceil() as usize;

    let base = Instant::now();
    session.mark_stream_start_at(base);
    let at = |ms: f64| base + Duration::from_secs_f64(ms / 1000.0);

    let mut rendered: Vec<f32> = Vec::with_capacity(total_blocks * block_len);
    let mut out = vec![0.0f32; block_len];
    let mut next_chunk = 0usize;
    let mut next_ping_ms = 0.0f64;
    let mut blocks_playing = 0usize;
    let mut min_rate = f64::INFINITY;
    let mut max_rate = f64::NEG_INFINITY;

    for block in 0..total_blocks {
        let now_ms = block as f64 * block_ms;

        while let Some(chunk) = arrivals.get(next_chunk).filter(|c| c.at_ms <= now_ms) {
            push_chunk(&session, stream_rate, *chunk)?;
            next_chunk += 1;
            if next_chunk == arrivals.len() {
                session.flush_stream()?;
            }
        }

        if now_ms >= next_ping_ms {
            let rtt = args.rtt_ms + rng.gen::<f64>() * args.jitter_ms;
            session.record_rtt_at(rtt, at(now_ms))?;
            next_ping_ms += 1000.0;
        }

        if let BlockReport::Played(metrics) = engine.process(None, &mut out) {
            blocks_playing += 1;
            min_rate = min_rate.min(metrics.playback_rate);
            max_rate = max_rate.max(metrics.playback_rate);
        }
        rendered.extend_from_slice(&out);
        session.poll_events_at(at(now_ms));
    }

    if let Some(path) = &args.output {
        write_wav(path, device_rate, &rendered)?;
    }

    let snapshot = session.snapshot();
    let diagnostics = session.diagnostics();
    let summary = Summary {
        seconds: args.seconds,
        block_len,
        device_sample_rate: device_rate,
        blocks: total_blocks,
        blocks_playing,
        blocks_buffering: diagnostics.blocks_buffering,
        underruns: diagnostics.underruns,
        chunks_sent: next_chunk,
        min_rate: if blocks_playing > 0 { min_rate } else { 1.0 },
        max_rate: if blocks_playing > 0 { max_rate } else { 1.0 },
        mean_rtt_ms: snapshot.mean_rtt_ms,
        final_target_blocks: snapshot.target_blocks,
        events_dropped: diagnostics.events_dropped,
        underrun_log: session.underruns(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn write_wav(path: &Path, sample_rate: u32, samples: &[f32]) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;
    for sample in encode_block(samples) {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    info!(path = %path.display(), samples = samples.len(), "wrote rendered audio");
    Ok(())
}

/// Wall-clock run through the output device.
#[cfg(feature = "audio-cpal")]
fn run_device(args: &Args, config: SessionConfig) -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let stream_rate = config.stream_sample_rate;
    let arrivals = schedule(args, stream_rate, &mut rng);

    let runtime = tokio::runtime::Runtime::new()?;
    let _guard = runtime.enter();
    let session = PlaybackSession::new(config)?;
    session.start_device(args.device_name.clone(), false)?;

    let started = Instant::now();
    let mut next_ping = Duration::ZERO;
    for chunk in arrivals {
        let due = Duration::from_secs_f64(chunk.at_ms / 1000.0);
        if let Some(wait) = due.checked_sub(started.elapsed()) {
            std::thread::sleep(wait);
        }
        push_chunk(&session, stream_rate, chunk)?;

        let elapsed = started.elapsed();
        if elapsed >= next_ping {
            session.record_rtt(args.rtt_ms + rng.gen::<f64>() * args.jitter_ms)?;
            next_ping = elapsed + Duration::from_secs(1);
        }
    }

    session.flush_stream()?;
    // Tail
    std::thread::sleep(Duration::from_millis(500));
    session.stop()?;
    println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
    Ok(())
}

#[cfg(not(feature = "audio-cpal"))]
fn run_device(_args: &Args, _config: SessionConfig) -> anyhow::Result<()> {
    anyhow::bail!("device playback requires the 'audio-cpal' feature")
}
