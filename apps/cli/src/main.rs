use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use syscon_core::protocol::{FrameDecoder, SyncMarker, describe_type};
use syscon_core::session::{DfuSession, PolicyMode, SessionConfig, UpdateOutcome};
use syscon_core::{AckStatus, FirmwareImage, classify_ack};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Syscon firmware update tool", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Flash a firmware image to the syscon
    Flash {
        /// Serial device wired to the syscon (baud rate already configured)
        #[arg(long)]
        device: Option<String>,

        /// Firmware image (16-byte header + application)
        #[arg(long)]
        image: Option<String>,

        /// TOML session config; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// When to move on to the next step
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,

        /// Response timeout in ms (correlated policy)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Re-sends before giving up (correlated policy)
        #[arg(long)]
        retries: Option<u32>,

        /// Stop on a negative ACK (correlated policy)
        #[arg(long)]
        abort_on_nack: Option<bool>,
    },
    /// Print the frames found in a raw byte capture
    Decode {
        /// Capture file
        capture: PathBuf,

        /// Parse host -> device traffic instead of device -> host
        #[arg(long)]
        host_to_device: bool,
    },
    /// Show how an image will be split into DFU packets
    Inspect {
        /// Firmware image
        image: PathBuf,
    },
    /// Write a default session config
    InitConfig {
        /// Output path
        path: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    AnyFrame,
    Correlated,
}

impl From<PolicyArg> for PolicyMode {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::AnyFrame => PolicyMode::AnyFrame,
            PolicyArg::Correlated => PolicyMode::Correlated,
        }
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args.command) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Flash {
            device,
            image,
            config,
            policy,
            timeout_ms,
            retries,
            abort_on_nack,
        } => {
            let mut cfg = match config {
                Some(path) => SessionConfig::load_from_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => SessionConfig::default(),
            };
            if device.is_some() {
                cfg.device_path = device;
            }
            if image.is_some() {
                cfg.image_path = image;
            }
            if let Some(policy) = policy {
                cfg.policy.mode = policy.into();
            }
            if let Some(timeout_ms) = timeout_ms {
                cfg.policy.timeout_ms = timeout_ms;
            }
            if let Some(retries) = retries {
                cfg.policy.max_retries = retries;
            }
            if let Some(abort_on_nack) = abort_on_nack {
                cfg.policy.abort_on_nack = abort_on_nack;
            }
            flash(cfg)
        }
        Commands::Decode {
            capture,
            host_to_device,
        } => decode(&capture, host_to_device),
        Commands::Inspect { image } => inspect(&image),
        Commands::InitConfig { path } => {
            SessionConfig::default().save_to_file(&path)?;
            info!(path = %path.display(), "Wrote default config");
            Ok(())
        }
    }
}

fn flash(config: SessionConfig) -> Result<()> {
    info!("Starting syscon DFU...");
    let session = DfuSession::new(config);
    let report = session.run()?;

    match report.outcome {
        UpdateOutcome::Complete => {
            info!(
                chunks = report.chunks_sent,
                bytes = report.bytes_sent,
                discarded = report.decoder.bytes_discarded,
                crc_failures = report.decoder.crc_failures,
                "Firmware update finished"
            );
            Ok(())
        }
        UpdateOutcome::Aborted { reason } => bail!("update aborted: {}", reason),
    }
}

fn decode(capture: &Path, host_to_device: bool) -> Result<()> {
    let bytes = std::fs::read(capture)
        .with_context(|| format!("reading capture {}", capture.display()))?;
    let sync = if host_to_device {
        SyncMarker::HostToDevice
    } else {
        SyncMarker::DeviceToHost
    };

    let mut decoder = FrameDecoder::with_sync(sync);
    let frames = decoder.feed(&bytes);

    for (i, frame) in frames.iter().enumerate() {
        let status = match classify_ack(frame) {
            Some(AckStatus::Ack(v)) => format!(" ack={}", v),
            Some(AckStatus::Nack(v)) => format!(" NACK={}", v),
            None => String::new(),
        };
        println!(
            "{:>5}  {:<20} len={:<5}{}  {}",
            i,
            describe_type(frame.frame_type),
            frame.payload.len(),
            status,
            hex_preview(&frame.payload, 16)
        );
    }

    let stats = decoder.stats();
    println!(
        "{} frames, {} bytes discarded, {} CRC failures, {} bytes incomplete",
        stats.frames,
        stats.bytes_discarded,
        stats.crc_failures,
        decoder.buffered().len()
    );
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let image = FirmwareImage::load(path)?;
    println!("header: {}", hex_preview(image.header(), 16));
    println!(
        "body:   {} bytes in {} packets",
        image.body().len(),
        image.chunk_count()
    );
    for chunk in image.chunks() {
        println!(
            "  offset={:<6} wire_offset=0x{:04X} len={:<5} words={}",
            chunk.offset,
            chunk.wire_offset(),
            chunk.data.len(),
            chunk.word_count()
        );
    }
    Ok(())
}

fn hex_preview(data: &[u8], max: usize) -> String {
    let mut out: Vec<String> = data.iter().take(max).map(|b| format!("{:02X}", b)).collect();
    if data.len() > max {
        out.push("..".to_string());
    }
    out.join(" ")
}
