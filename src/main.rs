// tagalong - broadcast payloads as offline-finding beacon keys
//
// Drives a local Bluetooth controller through hcitool, or logs the commands
// it would issue with --dry-run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use tagalong::advert::Advertisement;
use tagalong::link_layer;
use tagalong::transmit::plan_segments;
use tagalong::{
    ChunkWidth, DeviceId, LogDriver, RadioDriver, RunReport, Tagalong, TagalongConfig,
    Transmitter,
};

#[derive(Parser)]
#[command(name = "tagalong")]
#[command(about = "Send data through offline-finding relays as beacon keys", long_about = None)]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log radio commands instead of running hcitool
    #[arg(long, global = true)]
    dry_run: bool,

    /// Device identifier (0x-prefixed hex or decimal)
    #[arg(long, global = true)]
    device_id: Option<DeviceId>,

    /// Payload bits per key (1-8)
    #[arg(long, global = true)]
    chunk_width: Option<u8>,

    /// Broadcasts per key
    #[arg(long, global = true)]
    repeat: Option<u32>,

    /// Bluetooth interface
    #[arg(short, long, global = true)]
    interface: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Broadcast a single payload
    Send {
        payload: String,
        /// Payload is hex-encoded
        #[arg(long)]
        hex: bool,
        /// First message id
        #[arg(short, long)]
        message_id: Option<u32>,
    },
    /// Broadcast new rows from a CSV file, resuming from the checkpoint
    Csv {
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Print the keys for a payload without broadcasting
    Keys {
        payload: String,
        #[arg(long)]
        hex: bool,
    },
    /// Print raw link-layer packets for a payload
    Frames {
        payload: String,
        #[arg(long)]
        hex: bool,
        #[arg(long, default_value = "37")]
        channel: u8,
    },
    /// Write the default configuration
    InitConfig {
        #[arg(default_value = "tagalong.yaml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::InitConfig { path, force } = &cli.command {
        return cmd_init_config(path, *force);
    }

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Send { payload, hex, message_id } => {
            cmd_send(config, cli.dry_run, &payload, hex, message_id).await
        }
        Commands::Csv { file } => cmd_csv(config, cli.dry_run, file).await,
        Commands::Keys { payload, hex } => cmd_keys(&config, &payload, hex),
        Commands::Frames { payload, hex, channel } => cmd_frames(&config, &payload, hex, channel),
        Commands::InitConfig { .. } => Ok(()),
    }
}

fn load_config(cli: &Cli) -> Result<TagalongConfig> {
    let mut config = match &cli.config {
        Some(path) => TagalongConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => TagalongConfig::default(),
    };

    if let Some(device_id) = cli.device_id {
        config.device_id = device_id;
    }
    if let Some(width) = cli.chunk_width {
        config.encoding.chunk_width = ChunkWidth::new(width).context("Invalid --chunk-width")?;
    }
    if let Some(repeat) = cli.repeat {
        config.transmit.repeat_count = repeat;
    }
    if let Some(interface) = &cli.interface {
        config.radio.interface = interface.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn decode_payload(payload: &str, is_hex: bool) -> Result<Vec<u8>> {
    if is_hex {
        hex::decode(payload.trim()).context("Payload is not valid hex")
    } else {
        Ok(payload.as_bytes().to_vec())
    }
}

fn build_transmitter(
    config: &TagalongConfig,
    dry_run: bool,
) -> Transmitter<Box<dyn RadioDriver>> {
    if dry_run {
        let mut config = config.clone();
        config.radio.settle_delay_ms = 0;
        config.radio.restart_delay_ms = 0;
        let driver: Box<dyn RadioDriver> = Box::new(LogDriver::new());
        Tagalong::transmitter(&config, driver)
    } else {
        let driver: Box<dyn RadioDriver> = Box::new(config.hcitool_driver());
        Tagalong::transmitter(config, driver)
    }
}

fn cancel_on_ctrl_c<D: RadioDriver>(transmitter: &Transmitter<D>) {
    let token = transmitter.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current key");
            token.cancel();
        }
    });
}

async fn cmd_send(
    mut config: TagalongConfig,
    dry_run: bool,
    payload: &str,
    is_hex: bool,
    message_id: Option<u32>,
) -> Result<()> {
    let payload = decode_payload(payload, is_hex)?;
    if let Some(id) = message_id {
        config.message_ids.first = id;
    }

    let mut transmitter = build_transmitter(&config, dry_run);
    cancel_on_ctrl_c(&transmitter);

    let report = transmitter.send_payload(&payload).await.context("Failed to send payload")?;

    println!("Message ids:    {:?}", report.message_ids);
    println!("Segments sent:  {}", report.segments_sent);
    println!("Keys broadcast: {}", report.keys_broadcast);
    for failure in &report.failures {
        println!(
            "  failed segment {:?} (message {:?}): {}",
            failure.segment, failure.message_id, failure.error
        );
    }

    if !report.is_complete() {
        bail!("{} of the payload's segments failed", report.segments_failed);
    }
    Ok(())
}

async fn cmd_csv(config: TagalongConfig, dry_run: bool, file: Option<PathBuf>) -> Result<()> {
    let mut source = config.csv_source(file.as_deref()).context("Failed to open CSV source")?;
    let mut checkpoint = config.checkpoint_store();

    let mut transmitter = build_transmitter(&config, dry_run);
    cancel_on_ctrl_c(&transmitter);

    let report = transmitter
        .run(&mut source, &mut checkpoint)
        .await
        .context("CSV transmission stopped")?;

    print_run_report(&report);
    Ok(())
}

fn print_run_report(report: &RunReport) {
    println!("Rows seen:       {}", report.rows_seen);
    println!("Rows skipped:    {}", report.rows_skipped);
    println!("Rows sent:       {}", report.rows_sent);
    println!("Rows failed:     {}", report.rows_failed);
    println!("Keys broadcast:  {}", report.keys_broadcast);
    println!("Next message id: {}", report.next_message_id);
    if let Some(ts) = report.last_timestamp {
        println!("Last timestamp:  {}", ts);
    }
    if report.cancelled {
        println!("Run was cancelled");
    }
    for failure in &report.failures {
        println!(
            "  row {:?} segment {:?}: {}",
            failure.row, failure.segment, failure.error
        );
    }
}

fn cmd_keys(config: &TagalongConfig, payload: &str, is_hex: bool) -> Result<()> {
    let payload = decode_payload(payload, is_hex)?;
    let settings = config.transmit_settings();
    let encoder = Tagalong::encoder(config);

    for plan in plan_segments(&payload, &settings, settings.first_message_id)? {
        println!("segment {} message {}", plan.index, plan.message_id);
        for chunk in encoder.segment(plan.bytes, plan.message_id) {
            let chunk = chunk?;
            let advert = Advertisement::assemble(&chunk.key);
            println!(
                "  chunk {:>3} value {:#04x} attempts {:>3} key {} address {}",
                chunk.index,
                chunk.value,
                chunk.key.attempts(),
                chunk.key.to_hex(),
                advert.address
            );
        }
    }
    Ok(())
}

fn cmd_frames(config: &TagalongConfig, payload: &str, is_hex: bool, channel: u8) -> Result<()> {
    let payload = decode_payload(payload, is_hex)?;
    let settings = config.transmit_settings();
    let encoder = Tagalong::encoder(config);

    for plan in plan_segments(&payload, &settings, settings.first_message_id)? {
        for chunk in encoder.segment(plan.bytes, plan.message_id) {
            let chunk = chunk?;
            let frame = link_layer::build_frame(&Advertisement::assemble(&chunk.key), channel)?;
            println!("{}", frame.to_hex());
        }
    }
    Ok(())
}

fn cmd_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let yaml = TagalongConfig::default().to_yaml()?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote default configuration to {}", path.display());
    Ok(())
}
