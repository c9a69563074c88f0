use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use cadence_core::{
    BlockReport, ConfigUpdate, EngineEvent, PlaybackSession, PlaybackStatus, RenderEngine,
    SessionConfig,
};
use tokio::sync::broadcast::error::TryRecvError;

const BLOCK: usize = 128;

fn session_with(config: SessionConfig) -> (PlaybackSession, RenderEngine) {
    let session = PlaybackSession::new(config).expect("valid config");
    let engine = session.take_engine().expect("engine available");
    (session, engine)
}

fn render(engine: &mut RenderEngine) -> (BlockReport, Vec<f32>) {
    let mut out = vec![7.0f32; BLOCK];
    let report = engine.process(None, &mut out);
    (report, out)
}

#[test]
fn buffers_until_target_then_plays_through_underrun() {
    let (session, mut engine) = session_with(SessionConfig::default());
    let target = session.config().playback.target_samples(BLOCK);
    assert_eq!(target, 24 * BLOCK);

    session.push_samples(&vec![0.25; 2 * target / 3]).unwrap();
    let (report, out) = render(&mut engine);
    let BlockReport::Buffering(status) = report else {
        panic!("expected buffering below target, got {report:?}");
    };
    assert_eq!(status.total_buffered, 2 * target / 3);
    assert!(out.iter().all(|s| *s == 0.0));

    session.push_samples(&vec![0.25; target / 3]).unwrap();
    let (report, out) = render(&mut engine);
    let BlockReport::Played(metrics) = report else {
        panic!("expected playback at target, got {report:?}");
    };
    assert!(!metrics.underrun);
    assert_eq!(metrics.playback_rate, 1.0);
    assert_eq!(metrics.samples_read, BLOCK);
    assert!(out.iter().all(|s| (*s - 0.25).abs() < 1e-6));

    // Below target from here on; hysteresis keeps draining until the queue is dry.
    let mut saw_underrun = false;
    let mut rates = Vec::new();
    for _ in 0..40 {
        let (report, out) = render(&mut engine);
        assert_eq!(out.len(), BLOCK);
        match report {
            BlockReport::Played(m) => {
                rates.push(m.playback_rate);
                saw_underrun |= m.underrun;
            }
            BlockReport::Buffering(status) => {
                assert_eq!(status.total_buffered, 0);
                assert!(out.iter().all(|s| *s == 0.0));
                break;
            }
        }
    }
    assert!(saw_underrun, "draining the queue must end in an underrun");
    assert!(rates.windows(2).all(|w| w[1] <= w[0] + 1e-12), "rate only slows while draining");
    assert!(rates.iter().all(|r| *r >= 0.8));

    session.poll_events();
    assert!(!session.underruns().is_empty());
    assert_eq!(session.snapshot().status, PlaybackStatus::Buffering);
    assert!(session.diagnostics().underruns >= 1);
}

#[test]
fn leading_silence_is_not_counted_while_idle() {
    let (session, mut engine) = session_with(SessionConfig::default());
    session.push_samples(&vec![0.0; 4_000]).unwrap();

    let (report, _) = render(&mut engine);
    let BlockReport::Buffering(status) = report else {
        panic!("silence must not start playback");
    };
    assert_eq!(status.total_buffered, 4_000);
    assert_eq!(status.buffer_health, 0.0);
}

#[test]
fn subscribers_see_events_in_engine_order() {
    let (session, mut engine) = session_with(SessionConfig::default());
    let mut rx = session.subscribe();

    render(&mut engine);
    session.push_samples(&vec![0.5; 24 * BLOCK]).unwrap();
    render(&mut engine);
    assert_eq!(session.poll_events(), 2);

    assert!(matches!(rx.try_recv(), Ok(EngineEvent::BufferingStatus(_))));
    match rx.try_recv() {
        Ok(EngineEvent::PlaybackMetrics(m)) => {
            assert_relative_eq!(m.buffer_health, 1.0);
            assert!(!m.underrun);
        }
        other => panic!("expected playback metrics, got {other:?}"),
    }
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn controller_retunes_engine_target_from_rtt() {
    let (session, mut engine) = session_with(SessionConfig::default());
    let t0 = Instant::now();

    let update = session.record_rtt_at(400.0, t0).unwrap();
    assert_eq!(update, Some(ConfigUpdate::target_blocks(81)));
    assert!(session
        .record_rtt_at(400.0, t0 + Duration::from_secs(1))
        .unwrap()
        .is_none());

    render(&mut engine);
    assert_eq!(engine.config().target_blocks, 81);
    assert_eq!(session.snapshot().target_blocks, 81);
    assert_relative_eq!(session.snapshot().mean_rtt_ms, 400.0);
}

#[test]
fn underrun_timestamp_follows_stream_clock() {
    let mut config = SessionConfig::default();
    config.playback.target_blocks = 2;
    let (session, mut engine) = session_with(config);

    let start = Instant::now();
    session.mark_stream_start_at(start);
    session.push_samples(&vec![0.5; 2 * BLOCK + 10]).unwrap();
    for _ in 0..4 {
        render(&mut engine);
    }
    session.poll_events_at(start + Duration::from_millis(1_500));

    let log = session.underruns();
    assert!(!log.is_empty());
    assert_eq!(log[0].time_since_stream_start_ms, 1_500);
}

#[test]
fn stream_rate_is_converted_to_device_rate() {
    let config = SessionConfig {
        stream_sample_rate: 24_000,
        device_sample_rate: 48_000,
        ..SessionConfig::default()
    };
    let (session, mut engine) = session_with(config);
    session.push_samples(&vec![0.3; 480]).unwrap();

    let (report, _) = render(&mut engine);
    let BlockReport::Buffering(status) = report else {
        panic!("one chunk is below target");
    };
    assert!(
        (944..=976).contains(&status.total_buffered),
        "expected ~960 device-rate samples, got {}",
        status.total_buffered
    );
}

#[test]
fn short_utterance_is_released_by_silence_or_flush() {
    let config = SessionConfig {
        stream_sample_rate: 24_000,
        device_sample_rate: 48_000,
        ..SessionConfig::default()
    };
    let (session, mut engine) = session_with(config);

    // Shorter than one converter chunk: held until something closes it.
    session.push_samples(&vec![0.3; 240]).unwrap();
    let (report, _) = render(&mut engine);
    let BlockReport::Buffering(status) = report else {
        panic!("nothing should have reached the queue yet");
    };
    assert_eq!(status.total_buffered, 0);

    // A silent packet flushes the speech and queues its own silence.
    session.push_samples(&vec![0.0; 120]).unwrap();
    let (report, _) = render(&mut engine);
    let BlockReport::Buffering(status) = report else {
        panic!("still below target");
    };
    assert_eq!(status.total_buffered, 480 + 240);

    session.push_samples(&vec![0.3; 100]).unwrap();
    session.flush_stream().unwrap();
    let (report, _) = render(&mut engine);
    let BlockReport::Buffering(status) = report else {
        panic!("still below target");
    };
    assert_eq!(status.total_buffered, 480 + 240 + 200);
    assert_eq!(session.diagnostics().chunks_received, 3);
}
