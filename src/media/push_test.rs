#![cfg(unix)]

use std::time::{Duration, Instant};

use ffmpeg_cli::PixelFormat;

use super::*;
use crate::media::testing::{fake_ffmpeg, init_logger, wait_for};
use crate::media::types::PumpOptions;

const FRAME: usize = 4 * 4 * 3;

fn options(toolchain: ffmpeg_cli::Toolchain, reconnect: bool) -> PumpOptions {
    PumpOptions {
        toolchain,
        reconnect,
        startup_timeout: Duration::from_secs(5),
        reconnect_delay: Duration::from_millis(50),
        teardown_grace: Duration::from_secs(1),
        ..Default::default()
    }
}

#[test]
fn test_repeats_last_frame_at_frame_rate() -> anyhow::Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("out.raw");
    let toolchain = fake_ffmpeg(dir.path(), &format!("cat > '{}'", out.display()))?;

    let config = PushConfig::builder("rtmp://srv/live/test", 4, 4, 50)
        .pixel_format(PixelFormat::Rgb24)
        .options(options(toolchain, false))
        .build()?;

    let started = Instant::now();
    let sink = SinkPump::open(config)?;
    assert!(sink.is_pushing());
    assert_eq!(sink.frame_size(), FRAME);

    sink.put_frame(vec![7u8; FRAME])?;
    std::thread::sleep(Duration::from_secs(1));
    sink.release();
    let elapsed = started.elapsed();

    // one frame per 20ms, whether or not new frames were put
    let written = sink.status().frames;
    let expected = elapsed.as_secs_f64() * 50.0;
    assert!(written as f64 <= expected + 2.0, "{} > {}", written, expected);
    assert!(written as f64 >= expected * 0.6, "{} < {}", written, expected);

    let bytes = std::fs::read(&out)?;
    assert_eq!(bytes.len() % FRAME, 0);
    // frames still in the pipe when the encoder is torn down may be lost
    let landed = bytes.len() / FRAME;
    assert!(landed <= written as usize && landed + 2 >= written as usize);
    // black until the first frame was put, then that frame over and over
    assert!(bytes[..FRAME].iter().all(|b| *b == 0));
    assert!(bytes[bytes.len() - FRAME..].iter().all(|b| *b == 7));
    assert!(!sink.is_pushing());
    Ok(())
}

#[test]
fn test_starts_from_black_in_planar_format() -> anyhow::Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("out.yuv");
    let toolchain = fake_ffmpeg(dir.path(), &format!("cat > '{}'", out.display()))?;

    let config = PushConfig::builder("rtmp://srv/live/test", 4, 4, 50)
        .pixel_format(PixelFormat::Yuv420p)
        .options(options(toolchain, false))
        .build()?;
    let sink = SinkPump::open(config)?;
    assert_eq!(sink.frame_size(), 24);
    sink.release();

    let bytes = std::fs::read(&out)?;
    assert!(bytes.len() >= 24);
    // black luma, neutral chroma
    assert!(bytes[..16].iter().all(|b| *b == 16));
    assert!(bytes[16..24].iter().all(|b| *b == 128));
    Ok(())
}

#[test]
fn test_encoder_exit_stops_without_reconnect() -> anyhow::Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let toolchain = fake_ffmpeg(dir.path(), "exit 0")?;

    let config = PushConfig::builder("rtmp://srv/live/test", 4, 4, 50)
        .options(options(toolchain, false))
        .build()?;
    let sink = SinkPump::open(config)?;

    let status = wait_for(Duration::from_secs(5), || sink.status(), |s| {
        s.phase == PumpPhase::Stopped
    });
    assert_eq!(status.phase, PumpPhase::Stopped);
    assert_eq!(status.cycles, 1);
    assert!(matches!(status.last_error, Some(StreamError::StreamEnded(_))));
    assert!(!sink.is_pushing());
    Ok(())
}

#[test]
fn test_encoder_exit_reconnects() -> anyhow::Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    // swallow two frames, then go away
    let toolchain = fake_ffmpeg(dir.path(), &format!("head -c {} > /dev/null", FRAME * 2))?;

    let config = PushConfig::builder("rtmp://srv/live/test", 4, 4, 50)
        .options(PumpOptions {
            startup_timeout: Duration::from_millis(200),
            ..options(toolchain, true)
        })
        .build()?;
    let sink = SinkPump::open(config)?;

    // never confirmed, but the sink keeps going
    assert!(matches!(
        sink.status().last_error,
        Some(StreamError::StartupTimeout(_)) | Some(StreamError::StreamEnded(_))
    ));
    let status = wait_for(Duration::from_secs(5), || sink.status(), |s| s.cycles >= 3);
    assert!(status.cycles >= 3, "{:?}", status);
    assert_ne!(status.phase, PumpPhase::Stopped);

    sink.release();
    assert_eq!(sink.status().phase, PumpPhase::Stopped);
    Ok(())
}

#[test]
fn test_put_frame_checks_size_and_drops_when_full() -> anyhow::Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    // accepts nothing, so the queue only drains at the frame rate
    let toolchain = fake_ffmpeg(dir.path(), "sleep 30")?;

    let config = PushConfig::builder("rtmp://srv/live/test", 4, 4, 1)
        .options(PumpOptions {
            startup_timeout: Duration::from_millis(100),
            ..options(toolchain, false)
        })
        .build()?;
    let sink = SinkPump::open(config)?;

    assert!(matches!(
        sink.put_frame(vec![0u8; FRAME - 1]),
        Err(StreamError::Config(_))
    ));
    for _ in 0..20 {
        sink.put_frame(RawFrame::from(vec![0u8; FRAME]))?;
    }

    let started = Instant::now();
    sink.release();
    assert!(started.elapsed() < Duration::from_secs(3));
    Ok(())
}
