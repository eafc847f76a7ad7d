// Integration tests for gapless playback scheduling
//
// All tests run with paused tokio time so the virtual device clock only
// moves when the test advances it.

mod common;

use common::pcm;
use std::sync::Arc;
use std::time::Duration;
use voice_session::audio::{PlaybackPipeline, VirtualOutputDevice};
use voice_session::OutputDevice;

const EPS: f64 = 1e-9;

fn pipeline() -> (PlaybackPipeline, Arc<VirtualOutputDevice>) {
    let device = Arc::new(VirtualOutputDevice::default());
    (PlaybackPipeline::new(device.clone()), device)
}

#[tokio::test(start_paused = true)]
async fn test_buffers_are_contiguous() {
    let (playback, device) = pipeline();

    // 100ms, 50ms, 200ms at 24kHz
    for samples in [2400, 1200, 4800] {
        playback.enqueue(&pcm(samples, 1000)).unwrap();
    }

    let timeline = device.timeline();
    assert_eq!(timeline.len(), 3);
    assert!((timeline[0].start_time - 0.1).abs() < EPS);
    for pair in timeline.windows(2) {
        assert!((pair[1].start_time - pair[0].end_time()).abs() < EPS);
        assert!(pair[1].start_time > pair[0].start_time);
    }
    assert!((playback.scheduled_until() - 0.45).abs() < EPS);
}

#[tokio::test(start_paused = true)]
async fn test_buffers_arriving_during_playback_stay_gapless() {
    let (playback, device) = pipeline();

    playback.enqueue(&pcm(4800, 1000)).unwrap();
    // Device is mid-way through the first buffer
    tokio::time::advance(Duration::from_millis(150)).await;
    playback.enqueue(&pcm(2400, 1000)).unwrap();

    let timeline = device.timeline();
    assert_eq!(timeline.len(), 2);
    assert!((timeline[1].start_time - timeline[0].end_time()).abs() < EPS);
    assert!(playback.is_playing());
}

#[tokio::test(start_paused = true)]
async fn test_underrun_restarts_timeline() {
    let (playback, device) = pipeline();

    playback.enqueue(&pcm(2400, 1000)).unwrap();
    // Queue drains at 0.2s; the next chunk arrives late
    tokio::time::advance(Duration::from_millis(500)).await;
    assert!(!playback.is_playing());

    playback.enqueue(&pcm(2400, 1000)).unwrap();

    let timeline = device.timeline();
    let now = device.current_time();
    assert!((timeline[1].start_time - (now + 0.1)).abs() < 1e-6);
    assert!(timeline[1].start_time > timeline[0].end_time());
}

#[tokio::test(start_paused = true)]
async fn test_stop_discards_pending_audio() {
    let (playback, device) = pipeline();

    playback.enqueue(&pcm(2400, 1000)).unwrap();
    playback.enqueue(&pcm(2400, 1000)).unwrap();
    playback.enqueue(&pcm(2400, 1000)).unwrap();

    // First buffer (0.1..0.2) has played, the rest is pending
    tokio::time::advance(Duration::from_millis(250)).await;
    playback.stop();

    let timeline = device.timeline();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].id, 0);
    assert!(!playback.is_playing());
    assert_eq!(*playback.volume().borrow(), 0.0);

    // Next turn starts a fresh timeline
    playback.enqueue(&pcm(2400, 1000)).unwrap();
    let timeline = device.timeline();
    let now = device.current_time();
    assert!((timeline[1].start_time - (now + 0.1)).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_stop_when_idle_is_harmless() {
    let (playback, device) = pipeline();

    playback.stop();
    playback.stop();

    assert!(device.timeline().is_empty());
    assert!(!playback.is_playing());
}

#[tokio::test(start_paused = true)]
async fn test_custom_rate_and_lead_time() {
    let device = Arc::new(VirtualOutputDevice::new(48000));
    let playback =
        PlaybackPipeline::with_sample_rate(device.clone(), 16000).with_initial_buffer_time(0.25);

    playback.enqueue(&pcm(1600, 1000)).unwrap();

    let timeline = device.timeline();
    assert!((timeline[0].start_time - 0.25).abs() < EPS);
    assert!((timeline[0].duration - 0.1).abs() < EPS);
    assert_eq!(playback.sample_rate(), 16000);
}
