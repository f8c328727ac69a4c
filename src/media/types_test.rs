use std::time::Duration;

use ffmpeg_cli::{hw, PixelFormat};

use super::*;

#[test]
fn test_pull_defaults() {
    let config = PullConfig::builder("rtsp://cam/1").build().unwrap();

    assert_eq!(config.pixel_format, PixelFormat::Rgb24);
    assert!(!config.options.reconnect);
    assert_eq!(config.options.startup_timeout, Duration::from_secs(9));
    assert_eq!(config.options.queue_capacity, 5);
    assert_eq!(config.accelerator.name(), "none");
}

#[test]
fn test_pull_rejects_empty_url() {
    assert!(matches!(
        PullConfig::builder("  ").build(),
        Err(StreamError::Config(_))
    ));

    let options = PumpOptions {
        queue_capacity: 0,
        ..Default::default()
    };
    assert!(PullConfig::builder("a.mp4").options(options).build().is_err());
}

#[test]
fn test_push_validation() {
    let ok = PushConfig::builder("rtmp://srv/live/a", 1280, 720, 25)
        .pixel_format(PixelFormat::Bgr24)
        .build()
        .unwrap();
    assert_eq!(ok.black_frame().unwrap().len(), 1280 * 720 * 3);
    assert_eq!(ok.frame_interval(), Duration::from_millis(40));
    assert_eq!(ok.codec, "h264");
    assert_eq!(ok.rw_timeout, Duration::from_secs(3));

    for (w, h, fr) in [(0, 720, 25), (1280, 0, 25), (1280, 720, 0), (1280, 720, 120)] {
        let result = PushConfig::builder("rtmp://srv/live/a", w, h, fr).build();
        assert!(matches!(result, Err(StreamError::Config(_))), "{w}x{h}@{fr}");
    }

    // 4:2:0 input needs even geometry
    let odd = PushConfig::builder("rtmp://srv/live/a", 641, 480, 25)
        .pixel_format(PixelFormat::Yuv420p)
        .build();
    assert!(matches!(odd, Err(StreamError::Config(_))));

    assert!(PushConfig::builder("rtmp://srv/live/a", 640, 480, 119)
        .codec("")
        .build()
        .is_err());
}

#[test]
fn test_relay_builder() {
    let config = RelayConfig::builder("rtsp://cam/1", "rtmp://srv/live/a")
        .encoding(RelayEncoding::Copy)
        .accelerator(hw::no_accel())
        .reconnect(true)
        .build()
        .unwrap();

    assert_eq!(config.encoding, RelayEncoding::Copy);
    assert!(config.options.reconnect);
    assert_eq!(RelayEncoding::default(), RelayEncoding::Encode("h264".into()));

    assert!(RelayConfig::builder("rtsp://cam/1", "")
        .build()
        .is_err());
    assert!(RelayConfig::builder("rtsp://cam/1", "rtmp://srv/live/a")
        .encoding(RelayEncoding::Encode(String::new()))
        .build()
        .is_err());
}

#[test]
fn test_raw_frame() {
    let frame = RawFrame::from(vec![0u8; 12]);
    assert_eq!(frame.len(), 12);
    assert!(frame.as_ref().iter().all(|b| *b == 0));
    assert_eq!(frame.to_string(), "RawFrame { data: 12 }");

    // clones share the buffer
    let copy = frame.clone();
    assert_eq!(copy.data().as_ptr(), frame.data().as_ptr());
    assert!(RawFrame::default().is_empty());
}
