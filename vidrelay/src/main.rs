use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ffmpeg_sink::OutputFormat;
use ffmpeg_source::InputCapture;
use ffmpeg_types::{Shutdown, WallClock};

mod output;
mod relay;

use output::SessionFactory;
use relay::{Relay, RelayConfig};

#[derive(Parser, Debug)]
#[command(name = "vidrelay")]
#[command(about = "Relays a live video source to an RTSP or RTMP server")]
struct Args {
    /// Capture source URL (any input FFmpeg can read)
    #[arg(short, long)]
    input: String,

    /// Option passed to the capture demuxer, as KEY=VALUE (repeatable)
    #[arg(long = "input-option", value_parser = parse_key_value)]
    input_options: Vec<(String, String)>,

    /// Destination kind
    #[arg(short = 'f', long, default_value = "rtsp")]
    output_format: OutputFormat,

    /// Destination URL [default: depends on the destination kind]
    #[arg(short, long)]
    output: Option<String>,

    /// Video encoder name
    #[arg(short = 'v', long, default_value = "libvpx")]
    video_codec: String,

    /// Audio encoder name
    #[arg(short = 'a', long, default_value = "libopus")]
    audio_codec: String,

    /// Video bitrate in bits per second
    #[arg(long, default_value = "30000000")]
    video_bitrate: usize,

    /// Audio bitrate in bits per second
    #[arg(long, default_value = "320000")]
    audio_bitrate: usize,

    /// Longest wait for the capture source to open, in milliseconds
    #[arg(long, default_value = "10000")]
    open_timeout_ms: u64,

    /// Longest wait for a single captured frame, in milliseconds
    #[arg(long, default_value = "2000")]
    capture_timeout_ms: u64,

    /// Pause before reconnecting after a failed session, in milliseconds
    #[arg(long, default_value = "2000")]
    restart_delay_ms: u64,

    /// Enable debug logging
    #[arg(long)]
    verbose: bool,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn check_encoder(name: &str, video: bool) -> anyhow::Result<()> {
    let Some(codec) = ffmpeg_next::encoder::find_by_name(name) else {
        bail!("unknown encoder '{name}'");
    };
    if video && !codec.is_video() {
        bail!("'{name}' is not a video encoder");
    }
    if !video && !codec.is_audio() {
        bail!("'{name}' is not an audio encoder");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    ffmpeg_next::init().context("could not initialize FFmpeg")?;
    check_encoder(&args.video_codec, true)?;
    check_encoder(&args.audio_codec, false)?;

    let destination = args
        .output
        .clone()
        .unwrap_or_else(|| args.output_format.default_destination().to_string());
    let config = RelayConfig {
        video_encoder: args.video_codec.clone(),
        audio_encoder: args.audio_codec.clone(),
        video_bitrate: args.video_bitrate,
        audio_bitrate: args.audio_bitrate,
        capture_timeout: Duration::from_millis(args.capture_timeout_ms),
        restart_delay: Duration::from_millis(args.restart_delay_ms),
    };

    // Create shutdown signal
    let shutdown = Arc::new(Shutdown::new());

    // Run the relay on a blocking thread, FFmpeg calls block
    let relay_shutdown = shutdown.clone();
    let input = args.input.clone();
    let input_options = args.input_options.clone();
    let output_format = args.output_format;
    let open_timeout = Duration::from_millis(args.open_timeout_ms);
    let mut relay_handle = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let capture = InputCapture::open(&input, &input_options, open_timeout)
            .with_context(|| format!("could not open capture source {input}"))?;
        info!(
            input = %input,
            frame_rate = %capture.frame_rate(),
            audio = capture.has_audio(),
            "capture source opened"
        );
        info!(
            format = %output_format,
            destination = %destination,
            video = %config.video_encoder,
            audio = %config.audio_encoder,
            "relaying"
        );

        let factory = SessionFactory::new(output_format, destination);
        let mut relay = Relay::new(
            capture,
            factory,
            config,
            Arc::new(WallClock::new()),
            relay_shutdown,
        );
        relay.run();
        Ok(())
    });

    // Wait for Ctrl+C or for the relay to give up on its own
    tokio::select! {
        result = &mut relay_handle => {
            return result.context("relay thread panicked")?;
        }
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "could not listen for Ctrl+C");
            }
            info!("shutting down");
            shutdown.trigger();
        }
    }

    relay_handle.await.context("relay thread panicked")??;
    info!("done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_options() {
        assert_eq!(
            parse_key_value("rtsp_transport=tcp").unwrap(),
            ("rtsp_transport".to_string(), "tcp".to_string())
        );
        assert_eq!(
            parse_key_value("headers=a=b").unwrap(),
            ("headers".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=tcp").is_err());
    }

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["vidrelay", "-i", "udp://0.0.0.0:5000"]).unwrap();
        assert_eq!(args.output_format, OutputFormat::Rtsp);
        assert_eq!(args.video_codec, "libvpx");
        assert_eq!(args.audio_codec, "libopus");
        assert_eq!(args.video_bitrate, 30_000_000);
        assert_eq!(args.audio_bitrate, 320_000);
        assert_eq!(args.open_timeout_ms, 10_000);
        assert_eq!(args.capture_timeout_ms, 2000);
        assert_eq!(args.restart_delay_ms, 2000);
        assert!(args.output.is_none());
        assert!(args.input_options.is_empty());
    }

    #[test]
    fn rtmp_with_input_options() {
        let args = Args::try_parse_from([
            "vidrelay",
            "-i",
            "rtsp://camera/stream",
            "--input-option",
            "rtsp_transport=tcp",
            "-f",
            "rtmp",
            "-o",
            "rtmp://example.com/live/key",
        ])
        .unwrap();
        assert_eq!(args.output_format, OutputFormat::Rtmp);
        assert_eq!(args.output.as_deref(), Some("rtmp://example.com/live/key"));
        assert_eq!(
            args.input_options,
            vec![("rtsp_transport".to_string(), "tcp".to_string())]
        );
    }

    #[test]
    fn input_is_required() {
        assert!(Args::try_parse_from(["vidrelay"]).is_err());
    }

    #[test]
    fn unknown_encoders_are_rejected() {
        ffmpeg_next::init().unwrap();
        assert!(check_encoder("no-such-encoder", true).is_err());
        assert!(check_encoder("aac", true).is_err());
        assert!(check_encoder("aac", false).is_ok());
    }
}
