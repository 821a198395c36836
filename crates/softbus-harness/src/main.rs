//! SoftBus simulation runner.
//!
//! # Usage
//!
//! ```bash
//! # Send 1000 stream frames over the Continuous channel
//! softbus-sim loopback --channel continuous --kind stream --messages 1000
//!
//! # Drop roughly a tenth of the control frames, reproducibly
//! softbus-sim loopback --drop-probability 0.1 --seed 7 --sniff
//!
//! # Push 10000 messages of 4 KiB through a file-backed virtual bus
//! softbus-sim vbus --messages 10000 --payload-size 4096 --mapped-dir /tmp
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use softbus_harness::{LoopbackScenario, PayloadKind, VbusScenario};
use softbus_proto::ChannelType;
use softbus_vbus::RegionBackend;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// SoftBus simulation runner
#[derive(Parser, Debug)]
#[command(name = "softbus-sim")]
#[command(about = "Run SoftBus transport and virtual bus scenarios")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send frames from a Source to a Sink over loopback TCP
    Loopback(LoopbackArgs),
    /// Push messages through a virtual bus
    Vbus(VbusArgs),
}

#[derive(clap::Args, Debug)]
struct LoopbackArgs {
    /// Channel to run on
    #[arg(long, value_enum, default_value_t = Channel::Control)]
    channel: Channel,

    /// Send call to use
    #[arg(long, value_enum, default_value_t = Kind::Bytes)]
    kind: Kind,

    /// Frames to send
    #[arg(short, long, default_value = "100")]
    messages: usize,

    /// Payload bytes per frame
    #[arg(long, default_value = "1024")]
    payload_size: usize,

    /// First port of the listen scan window
    #[arg(long, default_value = "50000")]
    base_port: u16,

    /// Probability of dropping each outgoing frame
    #[arg(long, default_value = "0.0")]
    drop_probability: f64,

    /// Fault injector seed
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Send command envelopes and validate them with the protocol sniffer
    #[arg(long)]
    sniff: bool,
}

#[derive(clap::Args, Debug)]
struct VbusArgs {
    /// Bus name
    #[arg(long, default_value = "dcamera_bus")]
    name: String,

    /// Messages to push
    #[arg(short, long, default_value = "1000")]
    messages: usize,

    /// Payload bytes per message
    #[arg(long, default_value = "1024")]
    payload_size: usize,

    /// Ring capacity in bytes
    #[arg(long, default_value = "1048576")]
    buffer_size: usize,

    /// Write slots
    #[arg(long, default_value = "64")]
    max_messages: usize,

    /// Back the ring with a file in this directory instead of the heap
    #[arg(long)]
    mapped_dir: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Channel {
    Control,
    Snapshot,
    Continuous,
}

impl From<Channel> for ChannelType {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::Control => Self::Control,
            Channel::Snapshot => Self::Snapshot,
            Channel::Continuous => Self::Continuous,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Kind {
    Bytes,
    Message,
    Stream,
}

impl From<Kind> for PayloadKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Bytes => Self::Bytes,
            Kind::Message => Self::Message,
            Kind::Stream => Self::Stream,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let report = match args.command {
        Command::Loopback(args) => {
            let scenario = LoopbackScenario {
                channel: args.channel.into(),
                kind: args.kind.into(),
                messages: args.messages,
                payload_size: args.payload_size,
                base_port: args.base_port,
                drop_probability: args.drop_probability,
                seed: args.seed,
                sniff: args.sniff,
            };
            serde_json::to_string_pretty(&scenario.run()?)?
        },
        Command::Vbus(args) => {
            let backend = args.mapped_dir.map_or(RegionBackend::Heap, |dir| RegionBackend::Mapped { dir });
            let scenario = VbusScenario {
                name: args.name,
                messages: args.messages,
                payload_size: args.payload_size,
                buffer_size: args.buffer_size,
                max_messages: args.max_messages,
                backend,
            };
            serde_json::to_string_pretty(&scenario.run()?)?
        },
    };

    tracing::info!("Scenario report:\n{}", report);
    Ok(())
}
