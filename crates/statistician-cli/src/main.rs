use std::future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use statistician_core::{
    CollectorConfig, DeviceClass, ErrorTextPolicy, Scope, SessionReport, SimulatedDevice,
    Snapshot, StatisticsCollector, UnavailablePolicy,
};
use tokio::time::{interval_at, sleep, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod report;

#[derive(Debug, Parser)]
#[command(name = "statistician")]
#[command(about = "Acquisition statistics collector for camera transport counters")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Reset a statistic to its sentinel when its node becomes unreadable.
    #[arg(long, global = true)]
    reset_unavailable: bool,

    /// Keep the last seen error text when the device reports no error.
    #[arg(long, global = true)]
    keep_last_error: bool,

    #[arg(long, global = true, value_enum, default_value = "control")]
    flags_scope: FlagsScope,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a collection session against a simulated device.
    Simulate {
        #[arg(long, value_enum, default_value = "usb")]
        class: ClassArg,

        #[arg(long, default_value_t = 2000)]
        duration_ms: u64,

        #[arg(long, default_value_t = 500)]
        report_ms: u64,

        /// Unplug the simulated device after this many milliseconds.
        #[arg(long)]
        disconnect_after_ms: Option<u64>,

        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ClassArg {
    Usb,
    Gige,
}

impl From<ClassArg> for DeviceClass {
    fn from(value: ClassArg) -> Self {
        match value {
            ClassArg::Usb => DeviceClass::Usb,
            ClassArg::Gige => DeviceClass::GigE,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FlagsScope {
    Control,
    Stream,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Ndjson,
}

struct SessionPlan {
    duration: Duration,
    report_every: Duration,
    disconnect_after: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let config = CollectorConfig {
        unavailable: if cli.reset_unavailable {
            UnavailablePolicy::Reset
        } else {
            UnavailablePolicy::Retain
        },
        error_text: if cli.keep_last_error {
            ErrorTextPolicy::KeepLastError
        } else {
            ErrorTextPolicy::Latest
        },
        temperature_flags_scope: match cli.flags_scope {
            FlagsScope::Control => Scope::Control,
            FlagsScope::Stream => Scope::Stream,
        },
    };

    match cli.command {
        Command::Simulate {
            class,
            duration_ms,
            report_ms,
            disconnect_after_ms,
            format,
        } => {
            let device = Arc::new(SimulatedDevice::typical(class.into()));
            let plan = SessionPlan {
                duration: Duration::from_millis(duration_ms),
                report_every: Duration::from_millis(report_ms.max(1)),
                disconnect_after: disconnect_after_ms.map(Duration::from_millis),
            };

            let mut collector = StatisticsCollector::new(config);
            let class = collector
                .initialize(Arc::clone(&device))
                .context("initialize collector")?;
            let settings = collector.config();
            info!(
                unavailable = ?settings.unavailable,
                error_text = ?settings.error_text,
                flags_scope = %settings.temperature_flags_scope,
                "collector configured"
            );
            collector.start().context("start statistics poller")?;
            info!(%class, duration_ms, "acquisition started");

            session_loop(&collector, &device, &plan).await?;

            let (collector, session) = tokio::task::spawn_blocking(move || {
                let session = collector.stop();
                (collector, session)
            })
            .await?;

            let snapshot = collector
                .snapshot()
                .context("collector returned no snapshot")?;
            print_session(snapshot, session.as_ref(), format)?;
        }
    }

    Ok(())
}

async fn session_loop(
    collector: &StatisticsCollector<SimulatedDevice>,
    device: &SimulatedDevice,
    plan: &SessionPlan,
) -> Result<()> {
    let deadline = sleep(plan.duration);
    tokio::pin!(deadline);

    let unplug = async {
        match plan.disconnect_after {
            Some(after) => sleep(after).await,
            None => future::pending::<()>().await,
        }
    };
    tokio::pin!(unplug);
    let mut unplugged = false;

    let mut ticker = interval_at(Instant::now() + plan.report_every, plan.report_every);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, stopping");
                break;
            }
            _ = &mut deadline => {
                info!("acquisition finished");
                break;
            }
            _ = &mut unplug, if !unplugged => {
                warn!("simulating device removal");
                device.disconnect();
                unplugged = true;
            }
            _ = ticker.tick() => {
                let exited = collector.poller_exited();
                info!(sweeps = collector.sweep_count(), reads = device.reads(), exited, "tick");
                if exited {
                    warn!("statistics poller exited, ending acquisition");
                    break;
                }
            }
        }
    }

    Ok(())
}

fn print_session(
    snapshot: &Snapshot,
    session: Option<&SessionReport>,
    format: OutputFormat,
) -> Result<()> {
    let out = serde_json::json!({
        "session": session,
        "statistics": snapshot,
    });
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Ndjson => {
            println!("{}", serde_json::to_string(&out)?);
        }
        OutputFormat::Human => {
            let mut text = String::new();
            report::render_human(snapshot, session, &mut text)?;
            print!("{text}");
        }
    }
    Ok(())
}
