//! execleak CLI - Main entry point

mod cli;

use clap::{Parser, ValueEnum};
use execleak_foundation::{HarnessConfig, ProbeSource};
use execleak_task::Scenario;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// execleak - shows whether closing a silent exec stream leaves its reader running
#[derive(Parser, Debug)]
#[command(name = "execleak")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Which command the trials run
    #[arg(short = 'm', long, value_enum, default_value = "both")]
    scenario: ScenarioArg,

    /// Config file (TOML). Defaults to <config dir>/execleak/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Image to run the container from
    #[arg(long)]
    image: Option<String>,

    /// Trials per run
    #[arg(short = 'n', long)]
    trials: Option<u32>,

    /// Seconds to wait after starting each exec
    #[arg(long)]
    settle_secs: Option<u64>,

    /// Seconds to wait after closing each exec
    #[arg(long)]
    drain_secs: Option<u64>,

    /// Disable TTY mode on exec create/start
    #[arg(long)]
    no_tty: bool,

    /// Forward this process's stdin into each exec
    #[arg(long)]
    forward_stdin: bool,

    /// Where the leak probe looks for readers (registry, proc)
    #[arg(long)]
    probe: Option<ProbeSource>,

    /// Print the run reports as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScenarioArg {
    Silent,
    Periodic,
    Both,
}

impl ScenarioArg {
    /// Control first, so silent-run leaks cannot show up in the control
    fn scenarios(self) -> Vec<Scenario> {
        match self {
            ScenarioArg::Silent => vec![Scenario::Silent],
            ScenarioArg::Periodic => vec![Scenario::Periodic],
            ScenarioArg::Both => vec![Scenario::Periodic, Scenario::Silent],
        }
    }
}

impl Args {
    fn apply(&self, config: &mut HarnessConfig) {
        if let Some(image) = &self.image {
            config.image = image.clone();
        }
        if let Some(trials) = self.trials {
            config.trials = trials;
        }
        if let Some(secs) = self.settle_secs {
            config.settle_secs = secs;
        }
        if let Some(secs) = self.drain_secs {
            config.drain_secs = secs;
        }
        if self.no_tty {
            config.tty = false;
        }
        if self.forward_stdin {
            config.forward_stdin = true;
        }
        if let Some(probe) = self.probe {
            config.probe_source = probe;
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            let code = e
                .downcast_ref::<execleak_foundation::Error>()
                .map(|e| e.exit_code())
                .unwrap_or(1);
            eprintln!("{}", e);
            code
        }
    };

    // Leaked readers are still parked on the runtime; don't wait for them
    std::process::exit(code);
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = HarnessConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    cli::run(&config, &args.scenario.scenarios(), args.json).await
}
