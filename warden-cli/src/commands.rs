use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use warden_config::{JailConfig, WardenConfig};
use warden_core::bantime::{BanTimeOption, BanTimePolicy};
use warden_core::ticket::BanTime;
use warden_core::time::{parse_duration, SystemClock};
use warden_core::worker::StatusFlavor;
use warden_simulator::Simulation;
use warden_telemetry::EventLogger;

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Configuration file; defaults to `config/warden.yaml` plus overrides
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every enabled jail until interrupted
    Run(RunArgs),
    /// Validate the configuration and preview ban-time escalation
    Check(CheckArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Stop after this long (e.g. `30s`, `1m`) instead of waiting for Ctrl-C
    #[arg(short, long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Print extended status (backend, ban time) instead of the ban list
    #[arg(long)]
    pub stats: bool,

    /// Print prometheus metrics on exit
    #[arg(long)]
    pub metrics: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Only check this jail
    #[arg(short, long)]
    pub jail: Option<String>,

    /// Highest previous ban count to preview
    #[arg(long, default_value_t = 5)]
    pub counts: u32,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<WardenConfig> {
    match path {
        Some(path) => WardenConfig::load_from_path(&path)
            .with_context(|| format!("loading {}", path.display())),
        None => WardenConfig::load().context("loading configuration"),
    }
}

pub async fn run(config_path: Option<PathBuf>, args: RunArgs) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    EventLogger::init(&config.telemetry.log_level);

    let mut simulation = Simulation::new(&config, Arc::new(SystemClock))
        .context("building jails")?;
    for (jail, summary) in simulation.start().context("starting jails")? {
        info!(
            jail = %jail,
            restored = summary.restored,
            expired = summary.expired,
            ignored = summary.ignored,
            "Restored current bans"
        );
    }

    match args.duration {
        Some(duration) => {
            tokio::select! {
                interrupted = tokio::signal::ctrl_c() => interrupted?,
                _ = tokio::time::sleep(duration) => info!(?duration, "Run time elapsed"),
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    let flavor = if args.stats {
        StatusFlavor::Stats
    } else {
        StatusFlavor::Basic
    };
    for (jail, status) in simulation.statuses(flavor) {
        println!("Status for the jail: {jail}");
        print!("{status}");
    }

    simulation.stop();
    simulation.save().context("saving ban store")?;

    if args.metrics || config.telemetry.print_metrics {
        print!("{}", simulation.metrics().gather_metrics()?);
    }
    Ok(())
}

pub fn check(config_path: Option<PathBuf>, args: CheckArgs) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let jails: Vec<&JailConfig> = match &args.jail {
        Some(name) => vec![config
            .jail(name)
            .with_context(|| format!("no jail named {name:?}"))?],
        None => config.jails.iter().collect(),
    };

    println!("Configuration OK: {} jail(s)", config.jails.len());
    for jail in jails {
        println!(
            "{} ({}): backend {}, bantime {}",
            jail.name,
            if jail.enabled { "enabled" } else { "disabled" },
            jail.backend,
            BanTime::Finite(jail.ban_time()),
        );
        for (count, ban_time) in escalation_preview(jail, args.counts)? {
            println!("  |- ban count {count}: {ban_time}");
        }
    }
    Ok(())
}

/// Ban time for each previous ban count up to `counts`. `rndtime` is left
/// out so the preview is reproducible.
fn escalation_preview(jail: &JailConfig, counts: u32) -> anyhow::Result<Vec<(u32, BanTime)>> {
    let policy = BanTimePolicy::new();
    for (option, value) in jail.bantime_extra.options() {
        if option != BanTimeOption::RndTime {
            policy.set_option(option.as_str(), Some(&value))?;
        }
    }
    if !policy.snapshot().increment() {
        return Ok(Vec::new());
    }

    let base = jail.ban_time();
    Ok((0..=counts)
        .map(|count| (count, policy.evaluate(base, count)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_arguments() {
        let cli = Cli::try_parse_from([
            "warden", "run", "--config", "cfg.yaml", "--duration", "1m 30s", "--stats",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("cfg.yaml")));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.duration, Some(Duration::from_secs(90)));
                assert!(args.stats);
                assert!(!args.metrics);
            }
            Commands::Check(_) => panic!("expected run"),
        }

        assert!(Cli::try_parse_from(["warden", "run", "--duration", "soon"]).is_err());
    }

    #[test]
    fn previews_multiplier_escalation() {
        let config = WardenConfig::from_yaml_str(
            r#"
jails:
  - name: sshd
    bantime: 10m
    bantime_extra:
      increment: true
      multipliers: [1, 2, 4]
      maxtime: 30m
      rndtime: 5m
  - name: flat
"#,
        )
        .unwrap();

        let preview = escalation_preview(config.jail("sshd").unwrap(), 3).unwrap();
        assert_eq!(
            preview,
            vec![
                (0, BanTime::from_secs(600)),
                (1, BanTime::from_secs(1_200)),
                (2, BanTime::from_secs(1_800)),
                (3, BanTime::from_secs(1_800)),
            ]
        );

        assert!(escalation_preview(config.jail("flat").unwrap(), 3)
            .unwrap()
            .is_empty());
    }
}
