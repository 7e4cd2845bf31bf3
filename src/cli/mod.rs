pub mod report;

use std::{fmt::Display, io::IsTerminal, path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use chrono::{DateTime, FixedOffset};
use chrono_english::parse_date_string;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use tracing::{info, level_filters::LevelFilter};

use crate::{
    daemon::{
        open_store, start_daemon,
        storage::{entities::DayKey, record_storage::RecordStorage},
    },
    tracking::{
        blocking::{BlockListService, BlockListUpdate},
        config::{stored_match_rule, TrackerConfig, DEFAULT_KEEP_TOP},
        pruner::Pruner,
        query::UsageQueries,
    },
    utils::{
        clock::{local_time, Clock, DefaultClock},
        dir::resolve_application_path,
        logging::{enable_logging, CLI_PREFIX, HOST_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "sitewatch", version, long_about = None)]
#[command(about = "Browsing time tracker and site blocker", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
    #[arg(long, global = true, help = "Enable logging")]
    log: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

#[derive(Debug, Clone, clap::Args)]
struct DayArgs {
    #[arg(
        long,
        help = "Day to report on. Examples are \"today\", \"yesterday\", \"15/03/2025\". Defaults to today"
    )]
    day: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
}

impl DayArgs {
    fn resolve(&self, now: DateTime<FixedOffset>) -> Result<DayKey> {
        let Some(day) = &self.day else {
            return Ok(DayKey::new(now.date_naive()));
        };
        match parse_date_string(day, now, self.date_style.into()) {
            Ok(v) => Ok(DayKey::new(v.date_naive())),
            Err(e) => Err(Args::command()
                .error(
                    clap::error::ErrorKind::ValueValidation,
                    format!("Failed to validate day {e}"),
                )
                .into()),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Run the native messaging host in the current console. Browsers start it on their own, this is for debugging"
    )]
    Serve {
        #[command(flatten)]
        tracker: TrackerConfig,
    },
    #[command(about = "Sites with the most time on a day")]
    Top {
        #[command(flatten)]
        day: DayArgs,
        #[arg(short, default_value_t = 10, help = "Number of sites to show")]
        n: usize,
    },
    #[command(about = "Blocked attempts in every hour of a day")]
    Heatmap {
        #[command(flatten)]
        day: DayArgs,
    },
    #[command(about = "Time spent on one site in every hour of a day")]
    Profile {
        domain: String,
        #[command(flatten)]
        day: DayArgs,
    },
    #[command(about = "Blocked attempts of a day for every blocked site")]
    Attempts {
        #[command(flatten)]
        day: DayArgs,
    },
    #[command(about = "Edit the block list")]
    Block {
        #[command(subcommand)]
        command: BlockCommand,
    },
    #[command(
        about = "Trim stored days to their most used sites. Blocked sites are matched the way the host last did"
    )]
    Prune {
        #[arg(long, default_value_t = DEFAULT_KEEP_TOP, help = "Sites kept per day")]
        keep_top: usize,
        #[arg(long, help = "Also drop days older than this many days")]
        retention_days: Option<u32>,
    },
    #[command(about = "Print the redirect rules generated from the block list")]
    Rules,
}

#[derive(Subcommand, Debug)]
enum BlockCommand {
    Add { domain: String },
    Remove { domain: String },
    List,
}

fn describe_update(update: &BlockListUpdate, domain: &str, verb: &str) -> String {
    if update.changed {
        format!("{verb} {domain}\n")
    } else {
        format!("Nothing changed for {domain}\n")
    }
}

/// Runs every command that works on the store alone and returns what should be printed. Blocked
/// sites are matched with the rule the host stored, so reports agree with the browser.
async fn execute<S: RecordStorage>(
    command: Commands,
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    colored: bool,
) -> Result<String> {
    let now = local_time(&*clock, clock.time());
    let match_rule = stored_match_rule(&storage).await?;
    match command {
        Commands::Serve { .. } => bail!("The host can't run on top of an already opened store"),
        Commands::Top { day, n } => {
            let queries = UsageQueries::new(storage, clock, match_rule);
            let sites = queries.top_sites(day.resolve(now)?, n).await?;
            Ok(report::render_top_sites(&sites, colored))
        }
        Commands::Heatmap { day } => {
            let queries = UsageQueries::new(storage, clock, match_rule);
            let hours = queries.attempt_heatmap(day.resolve(now)?).await?;
            Ok(report::render_heatmap(&hours, colored))
        }
        Commands::Profile { domain, day } => {
            let queries = UsageQueries::new(storage, clock, match_rule);
            let hours = queries.site_hourly_profile(day.resolve(now)?, &domain).await?;
            Ok(report::render_profile(&domain, &hours, colored))
        }
        Commands::Attempts { day } => {
            let queries = UsageQueries::new(storage, clock, match_rule);
            let attempts = queries.blocked_attempt_counts(day.resolve(now)?).await?;
            Ok(report::render_attempts(&attempts, colored))
        }
        Commands::Block { command } => {
            let service = BlockListService::new(storage);
            match command {
                BlockCommand::Add { domain } => {
                    Ok(describe_update(&service.add(&domain).await?, &domain, "Blocked"))
                }
                BlockCommand::Remove { domain } => Ok(describe_update(
                    &service.remove(&domain).await?,
                    &domain,
                    "Unblocked",
                )),
                BlockCommand::List => Ok(service
                    .load()
                    .await?
                    .iter()
                    .map(|v| format!("{v}\n"))
                    .collect()),
            }
        }
        Commands::Prune {
            keep_top,
            retention_days,
        } => {
            let pruner = Pruner::new(storage, clock, keep_top, match_rule, retention_days);
            let report = pruner.run_scheduled().await?;
            Ok(format!(
                "Removed {} site entries and {} days\n",
                report.sites, report.days
            ))
        }
        Commands::Rules => {
            let rules = BlockListService::new(storage).rules().await?;
            Ok(format!("{}\n", report::render_rules(&rules)?))
        }
    }
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    let dir = resolve_application_path(args.dir)?;
    let prefix = match args.commands {
        Commands::Serve { .. } => HOST_PREFIX,
        _ => CLI_PREFIX,
    };
    enable_logging(prefix, &dir.join("logs"), logging_level, args.log)?;

    if let Commands::Serve { tracker } = args.commands {
        return start_daemon(dir, tracker).await;
    }

    let storage = Arc::new(open_store(&dir)?);
    info!("Running {:?}", args.commands);
    let output = execute(
        args.commands,
        storage,
        Arc::new(DefaultClock),
        std::io::stdout().is_terminal(),
    )
    .await?;
    print!("{output}");
    Ok(())
}
