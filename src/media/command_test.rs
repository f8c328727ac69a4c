use std::sync::Arc;
use std::time::Duration;

use ffmpeg_cli::hw::Capability;
use ffmpeg_cli::{Accelerator, NoAccel, PixelFormat, StreamDescriptor, StreamInfo};

use super::*;
use crate::media::types::{PullConfig, PushConfig, RelayConfig, RelayEncoding};

/// Hardware profile that always reports itself available.
#[derive(Debug)]
struct FakeCuda;

impl Accelerator for FakeCuda {
    fn name(&self) -> &'static str {
        "nvidia"
    }

    fn hwaccel_args(&self) -> Vec<String> {
        vec!["-hwaccel".into(), "cuda".into()]
    }

    fn encoder_params(&self) -> Vec<String> {
        vec!["-preset".into(), "p1".into()]
    }

    fn capability(&self) -> Capability {
        Capability {
            available: true,
            encoders: [("h264".to_string(), "h264_nvenc".to_string())].into(),
            decoders: [("h264".to_string(), "h264_cuvid".to_string())].into(),
        }
    }
}

fn h264_descriptor() -> StreamDescriptor {
    StreamDescriptor::new(vec![StreamInfo {
        codec_type: Some("video".into()),
        codec_name: "h264".into(),
        width: 1920,
        height: 1080,
        ..Default::default()
    }])
}

#[test]
fn test_pull_args_rtsp() {
    let config = PullConfig::builder("rtsp://cam/1")
        .pixel_format(PixelFormat::Bgr24)
        .build()
        .unwrap();

    assert_eq!(
        pull_args(&config, &NoAccel, None),
        [
            "-loglevel",
            "warning",
            "-rtsp_transport",
            "tcp",
            "-flags",
            "low_delay",
            "-i",
            "rtsp://cam/1",
            "-pix_fmt",
            "bgr24",
            "-f",
            "rawvideo",
            "pipe:"
        ]
    );
}

#[test]
fn test_pull_args_file_with_hwaccel() {
    let config = PullConfig::builder("/data/clip.mp4").build().unwrap();
    let decoder = select_decoder(&FakeCuda, &h264_descriptor());
    assert_eq!(decoder.as_deref(), Some("h264_cuvid"));

    let args = pull_args(&config, &FakeCuda, decoder.as_deref());
    assert_eq!(
        args,
        [
            "-loglevel",
            "warning",
            "-hwaccel",
            "cuda",
            "-c:v",
            "h264_cuvid",
            "-re",
            "-i",
            "/data/clip.mp4",
            "-pix_fmt",
            "rgb24",
            "-f",
            "rawvideo",
            "pipe:"
        ]
    );

    // software decoding never names a decoder
    assert_eq!(select_decoder(&NoAccel, &h264_descriptor()), None);
}

#[test]
fn test_push_args() {
    let config = PushConfig::builder("rtmp://srv/live/test", 1280, 720, 25)
        .pixel_format(PixelFormat::Bgr24)
        .build()
        .unwrap();

    assert_eq!(
        push_args(&config, &NoAccel),
        [
            "-loglevel",
            "warning",
            "-y",
            "-rw_timeout",
            "3000000",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "bgr24",
            "-s",
            "1280x720",
            "-r",
            "25",
            "-i",
            "-",
            "-c:v",
            "libx264",
            "-tune",
            "zerolatency",
            "-preset",
            "ultrafast",
            "-an",
            "-pix_fmt",
            "yuv420p",
            "-f",
            "flv",
            "rtmp://srv/live/test"
        ]
    );
}

#[test]
fn test_push_encoder_selection() {
    assert_eq!(
        select_encoder(&FakeCuda, "h264"),
        ("h264_nvenc".to_string(), vec!["-preset".to_string(), "p1".to_string()])
    );
    // no hevc mapping on the fake profile
    assert_eq!(select_encoder(&FakeCuda, "hevc").0, "libx265");

    let config = PushConfig::builder("rtsp://srv/live", 640, 480, 30)
        .rw_timeout(Duration::from_millis(1500))
        .build()
        .unwrap();
    let args = push_args(&config, &FakeCuda);
    assert!(args.windows(2).any(|w| w == ["-rw_timeout", "1500000"]));
    assert!(args.windows(2).any(|w| w == ["-c:v", "h264_nvenc"]));
    assert!(args.ends_with(&[
        "-rtsp_transport".to_string(),
        "tcp".to_string(),
        "-f".to_string(),
        "rtsp".to_string(),
        "rtsp://srv/live".to_string()
    ]));
}

#[test]
fn test_relay_args() {
    let copy = RelayConfig::builder("rtsp://cam/1", "rtmp://srv/live/a")
        .encoding(RelayEncoding::Copy)
        .build()
        .unwrap();
    assert_eq!(
        relay_args(&copy, &FakeCuda, Some("h264_cuvid")),
        [
            "-loglevel",
            "warning",
            "-rtsp_transport",
            "tcp",
            "-flags",
            "low_delay",
            "-i",
            "rtsp://cam/1",
            "-c:v",
            "copy",
            "-an",
            "-f",
            "flv",
            "rtmp://srv/live/a"
        ]
    );

    let encode = RelayConfig::builder("/data/clip.mkv", "rtmp://srv/live/a")
        .accelerator(Arc::new(FakeCuda))
        .build()
        .unwrap();
    let args = relay_args(&encode, &FakeCuda, Some("h264_cuvid"));
    assert!(args.windows(2).any(|w| w == ["-hwaccel", "cuda"]));
    assert!(args.windows(2).any(|w| w == ["-c:v", "h264_nvenc"]));
    assert!(args.contains(&"-re".to_string()));
    // no raw pipe on either side
    assert!(!args.iter().any(|a| a == "pipe:" || a == "-"));
}

#[test]
fn test_urls_are_single_arguments() {
    let url = r#"rtsp://user:p@ss;rm -rf /'$(id)'`whoami`"x"@cam/1?a=1&b=2|tee"#;
    let config = PullConfig::builder(url).build().unwrap();

    let first = pull_args(&config, &NoAccel, None);
    let second = pull_args(&config, &NoAccel, None);
    assert_eq!(first, second);

    assert_eq!(first.iter().filter(|a| a.as_str() == url).count(), 1);
    let pos = first.iter().position(|a| a == "-i").unwrap();
    assert_eq!(first[pos + 1], url);

    let push = PushConfig::builder(url, 4, 4, 25).build().unwrap();
    let args = push_args(&push, &NoAccel);
    assert_eq!(args.last().map(String::as_str), Some(url));
    assert_eq!(args.iter().filter(|a| a.as_str() == url).count(), 1);
}
