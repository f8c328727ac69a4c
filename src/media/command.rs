//! ffmpeg argument lists for each pump kind.
//!
//! Everything here is a pure function of its inputs. URLs travel as single
//! arguments and are never passed through a shell.

use ffmpeg_cli::config::micros_arg;
use ffmpeg_cli::metadata::is_stream;
use ffmpeg_cli::{Accelerator, NoAccel, StreamDescriptor};

use crate::media::types::{PullConfig, PushConfig, RelayConfig, RelayEncoding};

fn push_pair(args: &mut Vec<String>, flag: &str, value: impl Into<String>) {
    args.push(flag.to_string());
    args.push(value.into());
}

/// Accelerated decoder for the probed video codec, if the profile has one.
pub fn select_decoder(accel: &dyn Accelerator, descriptor: &StreamDescriptor) -> Option<String> {
    if !accel.is_hardware() {
        return None;
    }
    let codec = &descriptor.video()?.codec_name;
    let decoder = accel.resolve_decoder(codec);
    (decoder != *codec).then_some(decoder)
}

/// Encoder name and its options for `codec`.
///
/// A hardware profile without a mapping for `codec` falls back to the
/// software encoder rather than handing ffmpeg a bare codec family name.
pub fn select_encoder(accel: &dyn Accelerator, codec: &str) -> (String, Vec<String>) {
    let encoder = accel.resolve_encoder(codec);
    if encoder != codec || !accel.is_hardware() {
        return (encoder, accel.encoder_params());
    }
    log::debug!("{} has no {} encoder, using software", accel.name(), codec);
    (NoAccel.resolve_encoder(codec), NoAccel.encoder_params())
}

/// Muxer for a push destination.
pub fn output_format(url: &str) -> &'static str {
    if url.starts_with("rtsp://") {
        "rtsp"
    } else {
        "flv"
    }
}

/// Reading side shared by pull and relay: transport, hardware decode and
/// pacing options followed by `-i <url>`.
fn input_args(args: &mut Vec<String>, url: &str, accel: &dyn Accelerator, decoder: Option<&str>) {
    if url.starts_with("rtsp://") {
        push_pair(args, "-rtsp_transport", "tcp");
    }
    if accel.is_hardware() {
        args.extend(accel.hwaccel_args());
        if let Some(decoder) = decoder {
            push_pair(args, "-c:v", decoder);
        }
    }
    if is_stream(url) {
        push_pair(args, "-flags", "low_delay");
    } else {
        // files are read at their native rate
        args.push("-re".to_string());
    }
    push_pair(args, "-i", url);
}

fn destination_args(args: &mut Vec<String>, url: &str) {
    if url.starts_with("rtsp://") {
        push_pair(args, "-rtsp_transport", "tcp");
    }
    push_pair(args, "-f", output_format(url));
    args.push(url.to_string());
}

/// `ffmpeg` arguments that decode `config.url` to raw frames on stdout.
pub fn pull_args(config: &PullConfig, accel: &dyn Accelerator, decoder: Option<&str>) -> Vec<String> {
    let mut args = Vec::with_capacity(16);
    push_pair(&mut args, "-loglevel", "warning");
    input_args(&mut args, &config.url, accel, decoder);
    push_pair(&mut args, "-pix_fmt", config.pixel_format.as_str());
    push_pair(&mut args, "-f", "rawvideo");
    args.push("pipe:".to_string());
    args
}

/// `ffmpeg` arguments that encode raw frames from stdin to `config.url`.
pub fn push_args(config: &PushConfig, accel: &dyn Accelerator) -> Vec<String> {
    let (encoder, params) = select_encoder(accel, &config.codec);

    let mut args = Vec::with_capacity(32);
    push_pair(&mut args, "-loglevel", "warning");
    args.push("-y".to_string());
    push_pair(&mut args, "-rw_timeout", micros_arg(config.rw_timeout));
    push_pair(&mut args, "-f", "rawvideo");
    push_pair(&mut args, "-pix_fmt", config.pixel_format.as_str());
    push_pair(&mut args, "-s", format!("{}x{}", config.width, config.height));
    push_pair(&mut args, "-r", config.frame_rate.to_string());
    push_pair(&mut args, "-i", "-");
    push_pair(&mut args, "-c:v", encoder);
    args.extend(params);
    args.push("-an".to_string());
    push_pair(&mut args, "-pix_fmt", "yuv420p");
    destination_args(&mut args, &config.url);
    args
}

/// `ffmpeg` arguments that read `source_url` and publish it to `sink_url`
/// in one process.
pub fn relay_args(config: &RelayConfig, accel: &dyn Accelerator, decoder: Option<&str>) -> Vec<String> {
    let mut args = Vec::with_capacity(32);
    push_pair(&mut args, "-loglevel", "warning");
    match &config.encoding {
        RelayEncoding::Copy => {
            // decoding is pointless when packets are copied
            input_args(&mut args, &config.source_url, &NoAccel, None);
            push_pair(&mut args, "-c:v", "copy");
        }
        RelayEncoding::Encode(codec) => {
            input_args(&mut args, &config.source_url, accel, decoder);
            let (encoder, params) = select_encoder(accel, codec);
            push_pair(&mut args, "-c:v", encoder);
            args.extend(params);
            push_pair(&mut args, "-pix_fmt", "yuv420p");
        }
    }
    args.push("-an".to_string());
    destination_args(&mut args, &config.sink_url);
    args
}

#[cfg(test)]
#[path = "command_test.rs"]
mod command_test;
