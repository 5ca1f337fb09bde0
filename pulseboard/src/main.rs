//! pulseboard - usage dashboard data service
//!
//! Loads exported collections into the local document store and prints the
//! tables the dashboard charts are drawn from, as JSON.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/pulseboard/documents.db (~/.local/share/pulseboard/documents.db)
//! - Config: $XDG_CONFIG_HOME/pulseboard/config.toml (~/.config/pulseboard/config.toml)
//! - Logs: $XDG_STATE_HOME/pulseboard/pulseboard.log

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};
use pulseboard_core::analytics::SeriesMetric;
use pulseboard_core::{
    Config, CountrySelection, Dashboard, Database, DateRange, FreeUserSegment, Granularity,
    MetricSelector, ShareMode,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pulseboard")]
#[command(about = "Usage dashboard data service")]
#[command(version)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/pulseboard/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Day the lifetime summary runs up to (default: today in the reporting zone)
    #[arg(long)]
    today: Option<NaiveDate>,

    #[command(subcommand)]
    command: Command,
}

/// Inclusive date range picked in the dashboard.
#[derive(ClapArgs, Debug)]
struct RangeArgs {
    /// First day (YYYY-MM-DD)
    #[arg(long)]
    start: String,

    /// Last day, inclusive (YYYY-MM-DD)
    #[arg(long)]
    end: String,
}

impl RangeArgs {
    fn range(&self) -> Result<DateRange> {
        DateRange::parse(&self.start, &self.end).context("invalid date range")
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a JSON Lines file into a collection
    Import {
        /// Target collection name
        collection: String,
        /// One JSON document per line
        file: PathBuf,
    },

    /// List collections and their document counts
    Collections,

    /// Lifetime totals computed at startup
    Summary,

    /// All-country totals and percentages per date
    General {
        #[arg(long, default_value = "daily")]
        view: Granularity,
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Countries of a view and the default selection
    Countries {
        #[arg(long, default_value = "daily")]
        view: Granularity,
        /// active[:<metric>], new_users or interactions[:<selector>]
        #[arg(long, default_value = "active")]
        metric: SeriesMetric,
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Per-country series of one metric
    Series {
        #[arg(long, default_value = "daily")]
        view: Granularity,
        #[arg(long, default_value = "active")]
        metric: SeriesMetric,
        /// Countries to include (repeatable; none means all)
        #[arg(long = "country")]
        countries: Vec<String>,
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Share of the highlighted countries, the rest as "Others"
    Share {
        #[arg(long, default_value = "daily")]
        view: Granularity,
        #[arg(long, default_value = "total_active")]
        metric: MetricSelector,
        /// category or total
        #[arg(long, default_value = "category")]
        mode: ShareMode,
        /// Highlighted countries (repeatable; none means all)
        #[arg(long = "country")]
        countries: Vec<String>,
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Monthly DAU/MAU ratio per country
    Ratio {
        #[arg(long = "country")]
        countries: Vec<String>,
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Distinct free users per country
    FreeUsers {
        /// total or heavy
        #[arg(long, default_value = "total")]
        segment: FreeUserSegment,
    },

    /// Free users by cycles consumed and year of last activity
    Cycles {
        #[arg(long = "country")]
        countries: Vec<String>,
        #[arg(long)]
        from_year: i32,
        #[arg(long)]
        to_year: i32,
    },

    /// Error counts per day or month
    Errors {
        #[arg(long, default_value = "daily")]
        view: Granularity,
        /// Error kinds to keep (repeatable; none keeps all)
        #[arg(long = "kind")]
        kinds: Vec<String>,
    },

    /// Invalid-format errors per file type
    InvalidFormats {
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Daily feature activity
    Features {
        #[command(flatten)]
        range: RangeArgs,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;
    let _log_guard = pulseboard_core::logging::init(&config.logging).ok();

    let db_path = config.store.database_path();
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?
        .with_query_timeout(config.store.query_timeout());
    db.migrate().context("failed to migrate database")?;

    // Loading commands never need the lifetime summary
    match &args.command {
        Command::Import { collection, file } => {
            let count = db
                .import_jsonl(collection, file)
                .with_context(|| format!("failed to import {}", file.display()))?;
            println!("Imported {} documents into {}", count, collection);
            return Ok(());
        }
        Command::Collections => {
            for (collection, count) in db.list_collections()? {
                println!("{:<32} {:>10}", collection, count);
            }
            return Ok(());
        }
        _ => {}
    }

    let today = match args.today {
        Some(day) => day,
        None => Utc::now()
            .with_timezone(&config.metrics.utc_offset()?)
            .date_naive(),
    };
    let dashboard =
        Dashboard::bootstrap(db, &config, today).context("failed to compute lifetime metrics")?;
    tracing::debug!(%today, "Dashboard ready");

    run_report(&dashboard, args.command)
}

fn run_report(dashboard: &Dashboard<Database>, command: Command) -> Result<()> {
    match command {
        Command::Import { .. } | Command::Collections => Ok(()),
        Command::Summary => {
            let totals = dashboard.total_metrics();
            print_json(&serde_json::json!({
                "metrics": totals,
                "formatted": totals.formatted(),
            }))
        }
        Command::General { view, range } => {
            print_json(&dashboard.general_series(view, &range.range()?)?)
        }
        Command::Countries {
            view,
            metric,
            range,
        } => print_json(&dashboard.country_options(view, &range.range()?, metric)?),
        Command::Series {
            view,
            metric,
            countries,
            range,
        } => {
            let selection = CountrySelection::from_list(countries);
            print_json(&*dashboard.country_series(view, metric, &range.range()?, &selection)?)
        }
        Command::Share {
            view,
            metric,
            mode,
            countries,
            range,
        } => {
            let highlighted = CountrySelection::from_list(countries);
            print_json(&dashboard.country_share(view, &range.range()?, &highlighted, metric, mode)?)
        }
        Command::Ratio { countries, range } => {
            let selection = CountrySelection::from_list(countries);
            print_json(&*dashboard.dau_mau_ratio(&range.range()?, &selection)?)
        }
        Command::FreeUsers { segment } => print_json(&dashboard.free_users(segment)?),
        Command::Cycles {
            countries,
            from_year,
            to_year,
        } => {
            if from_year > to_year {
                anyhow::bail!("--from-year must not be after --to-year");
            }
            let selection = CountrySelection::from_list(countries);
            print_json(&dashboard.cycle_usage(&selection, (from_year, to_year))?)
        }
        Command::Errors { view, kinds } => {
            let series = dashboard.error_series(view)?;
            if kinds.is_empty() {
                print_json(&series)
            } else {
                print_json(&series.select(&kinds)?)
            }
        }
        Command::InvalidFormats { range } => {
            print_json(&dashboard.invalid_format_types(&range.range()?)?)
        }
        Command::Features { range } => print_json(&dashboard.feature_activity(&range.range()?)?),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize report")?;
    println!("{}", json);
    Ok(())
}
