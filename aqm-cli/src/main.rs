use std::path::PathBuf;
use std::time::Duration;

use aqm_core::qdisc::queue::QueueSizeUnit;
use bandwidth::Bandwidth;
use bytesize::ByteSize;
use clap::{Parser, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod sim;

use config::SimConfig;
use sim::Dumbbell;

/// Bulk senders through a PI managed bottleneck, simulated in virtual time.
#[derive(Debug, Parser, Clone)]
#[command(version)]
pub struct CommandArgs {
    /// Config file (.toml or .json), flags take precedence over it
    #[arg(short, long, value_name = "File")]
    config: Option<PathBuf>,

    /// Number of bulk senders
    #[arg(long)]
    sources: Option<usize>,
    /// Bottleneck bandwidth
    #[arg(long, value_name = "Bandwidth", value_parser = human_bandwidth::parse_bandwidth)]
    bandwidth: Option<Bandwidth>,
    /// Bottleneck one-way delay
    #[arg(long, value_name = "Delay", value_parser = humantime::parse_duration)]
    delay: Option<Duration>,
    /// Simulated time
    #[arg(long, value_name = "Duration", value_parser = humantime::parse_duration)]
    duration: Option<Duration>,

    /// Whether the queue disc counts packets or bytes
    #[arg(long, value_name = "Mode")]
    mode: Option<Mode>,
    /// Mean packet size in bytes, also the size of every simulated packet
    #[arg(long, value_name = "Bytes")]
    mean_packet_size: Option<u32>,
    /// Desired queue length
    #[arg(long)]
    queue_ref: Option<f64>,
    /// Queue limit in packets or bytes
    #[arg(long)]
    queue_limit: Option<u64>,
    /// PI gain applied to the current queue length
    #[arg(short)]
    a: Option<f64>,
    /// PI gain applied to the previous queue length
    #[arg(short)]
    b: Option<f64>,
    /// Sampling frequency of the controller in Hz
    #[arg(short)]
    w: Option<f64>,
    /// Random stream of the early drop decisions
    #[arg(long)]
    stream: Option<i64>,

    /// Write "time queue_size average" samples to this file
    #[arg(long, value_name = "File")]
    plot: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
#[value(rename_all = "lower")]
enum Mode {
    Packets,
    Bytes,
}

impl From<Mode> for QueueSizeUnit {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Packets => QueueSizeUnit::Packets,
            Mode::Bytes => QueueSizeUnit::Bytes,
        }
    }
}

impl CommandArgs {
    fn apply(&self, config: &mut SimConfig) {
        macro_rules! set {
            ($($field:ident => $target:expr),* $(,)?) => {
                $(
                    if let Some(value) = self.$field {
                        $target = value.into();
                    }
                )*
            };
        }
        let queue_disc = &mut config.bottleneck.queue_disc;
        set!(
            mode => queue_disc.mode,
            mean_packet_size => queue_disc.mean_packet_size,
            queue_ref => queue_disc.queue_ref,
            queue_limit => queue_disc.queue_limit,
            a => queue_disc.a,
            b => queue_disc.b,
            w => queue_disc.w,
        );
        set!(
            sources => config.sources,
            bandwidth => config.bottleneck.bandwidth,
            stream => config.bottleneck.stream,
            delay => config.bottleneck_delay,
            duration => config.duration,
        );
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    let opts = CommandArgs::parse();
    debug!("{:?}", opts);

    let mut config = match &opts.config {
        Some(path) => aqm_core::config::load_with_defaults(path, &SimConfig::default())?,
        None => SimConfig::default(),
    };
    opts.apply(&mut config);
    info!(
        sources = config.sources,
        bandwidth = ?config.bottleneck.bandwidth,
        duration = ?config.duration,
        "Start simulation"
    );
    debug!(?config);

    let report = Dumbbell::new(config)?.run();

    if let Some(path) = &opts.plot {
        report.write_plot(path)?;
        info!("Queue samples written to {}", path.display());
    }

    println!("*** PI stats from bottleneck queue ***");
    println!("\t {} drops due to probability", report.pi.unforced_drop);
    println!("\t {} drops due to queue full", report.pi.forced_drop);
    println!(
        "\t {} delivered, goodput {}",
        ByteSize::b(report.delivered_bytes),
        human_bandwidth::format_bandwidth(report.goodput())
    );
    for (flow, source) in report.sources.iter().enumerate() {
        info!(flow, sent = source.sent, lost = source.lost, "Source finished");
    }
    Ok(())
}
