//! pmwatch: keep pm2 apps healthy.
//!
//! Probes one or more apps on a fixed interval and restarts them through
//! pm2 when a probe fails.
//!
//! # Usage
//!
//! ```text
//! pmwatch -a web -u "http://localhost:8080/ Hello" -f 2000 -d 10000 -vv
//! pmwatch -c /etc/pmwatch.toml
//! ```

mod console;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{ArgAction, Parser};
use pmwatch_core::{Action, HttpRule, Pm2, PmwatchConfig, Rule, Supervisor, WatchOptions};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "pmwatch",
    about = "Health-check supervisor for pm2 apps",
    version,
    override_usage = "pmwatch -a <APPS> -u <URL> [OPTIONS]"
)]
struct Cli {
    /// The app or apps (separate with commas) to monitor.
    #[arg(short, long, value_name = "APPS")]
    app: Option<String>,

    /// Install a URL monitoring rule: "<url> [required string] [timeout ms]".
    #[arg(short, long, value_name = "URL")]
    url: Option<String>,

    /// Skip restarts while an app has been up for less than this many ms.
    #[arg(short = 'd', long, value_name = "MS")]
    restart_delay: Option<u64>,

    /// Monitoring frequency in ms (default 1000).
    #[arg(short, long, value_name = "MS")]
    frequency: Option<u64>,

    /// Load watchers from a TOML config file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// pm2 executable to drive.
    #[arg(long, value_name = "PATH", default_value = "pm2")]
    pm2: PathBuf,

    /// Be verbose. Repeat for more output.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "warn",
        1 => "warn,pmwatch=info,pmwatch_core=info",
        _ => "info,pmwatch=debug,pmwatch_core=debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_filter))?,
        )
        .with_writer(std::io::stderr)
        .init();

    let supervisor = Supervisor::new(Arc::new(Pm2::with_program(cli.pm2.clone())))
        .context("failed to build the HTTP client")?;
    tokio::spawn(console::print_events(supervisor.subscribe(), cli.verbose));

    install(&cli, &supervisor)?;
    supervisor.monitor();
    info!(
        watchers = supervisor.watchers().len(),
        frequency_ms = supervisor.frequency().as_millis() as u64,
        "pmwatch running"
    );

    // Runs until interrupted; the monitor loop never finishes by itself.
    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl-C handler")?;
    info!("shutdown signal received");
    Ok(())
}

/// Register watchers from the config file and/or command line.
fn install(cli: &Cli, supervisor: &Supervisor) -> anyhow::Result<()> {
    if let Some(path) = &cli.config {
        let config = PmwatchConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        config.install(supervisor)?;
    }

    match (&cli.app, &cli.url) {
        (Some(apps), Some(url)) => {
            let apps = split_apps(apps);
            if apps.is_empty() {
                bail!("App must be specified: --app [app1,app2...]");
            }
            let options = WatchOptions {
                restart_delay: cli.restart_delay.map(Duration::from_millis),
            };
            supervisor.add_with(apps, url_rule(url)?, Action::Restart, options)?;
        }
        (Some(_), None) => {
            bail!("You must specify a rule to use. Specify at least one of: --url [url]")
        }
        (None, _) if cli.config.is_none() => {
            bail!("App must be specified: --app [app1,app2...]")
        }
        (None, Some(_)) => bail!("--url needs --app to know what to restart"),
        (None, None) => {}
    }

    if let Some(ms) = cli.frequency {
        supervisor.set_frequency(Duration::from_millis(ms));
    }
    Ok(())
}

fn split_apps(apps: &str) -> Vec<String> {
    apps.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `"<url> [required string] [timeout ms]"`.
fn url_rule(spec: &str) -> anyhow::Result<Rule> {
    let mut segments = spec.split_whitespace();
    let Some(url) = segments.next() else {
        bail!("--url must not be empty");
    };

    let mut rule = HttpRule::new(url);
    if let Some(needle) = segments.next() {
        rule = rule.validator(needle);
    }
    if let Some(timeout) = segments.next() {
        let ms: u64 = timeout
            .parse()
            .with_context(|| format!("invalid timeout {timeout:?} in --url"))?;
        rule = rule.timeout(Duration::from_millis(ms));
    }
    if let Some(extra) = segments.next() {
        bail!("unexpected {extra:?} in --url");
    }
    Ok(Rule::Http(rule))
}
