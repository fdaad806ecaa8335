//! `recur` CLI — expand and inspect RFC 5545 recurrence sets from the command line.
//!
//! ## Usage
//!
//! ```sh
//! # First five occurrences of a daily rule
//! recur expand --dtstart 20151109T100000 --rrule "FREQ=DAILY" --limit 5
//!
//! # Occurrences from a date on, as JSON
//! recur expand --dtstart 20151109T100000 --rrule "FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE,FR" \
//!     --from 20151220T000000 --json
//!
//! # Zoned values, extra and excluded dates
//! recur expand --tzid Europe/Berlin --dtstart 20260105T090000 --rrule "FREQ=WEEKLY" \
//!     --rdate 20260107T090000 --exdate 20260112T090000
//!
//! # Neighbours of a value
//! recur next --dtstart 20260105 --rrule "FREQ=MONTHLY;BYDAY=-1FR" --after 20260301
//! recur previous --dtstart 20260105 --rrule "FREQ=MONTHLY;BYDAY=-1FR" --before 20260301
//!
//! # Check that DTSTART is the first occurrence and something remains
//! recur validate --dtstart 20260105 --rrule "FREQ=WEEKLY;BYDAY=MO"
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use recurrence_engine::{CacheConfig, RecurrenceRule, RecurrenceSet, Temporal};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "recur",
    version,
    about = "Expand and inspect RFC 5545 recurrence sets"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List occurrences in ascending order
    Expand {
        #[command(flatten)]
        set: SetArgs,
        /// Only list occurrences at or after this value
        #[arg(long)]
        from: Option<String>,
        /// Maximum number of occurrences to list
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Print JSON instead of one value per line
        #[arg(long)]
        json: bool,
    },
    /// Print the first occurrence strictly after a value
    Next {
        #[command(flatten)]
        set: SetArgs,
        #[arg(long)]
        after: String,
        #[arg(long)]
        json: bool,
    },
    /// Print the last occurrence strictly before a value
    Previous {
        #[command(flatten)]
        set: SetArgs,
        #[arg(long)]
        before: String,
        #[arg(long)]
        json: bool,
    },
    /// Check that the start is the first occurrence and the set is not empty
    Validate {
        #[command(flatten)]
        set: SetArgs,
    },
}

/// The recurrence set shared by every subcommand.
#[derive(Args)]
struct SetArgs {
    /// Start value (DTSTART), e.g. 20260105, 20260105T090000, 20260105T090000Z
    #[arg(long)]
    dtstart: String,
    /// RRULE value, e.g. "FREQ=WEEKLY;BYDAY=MO,WE"
    #[arg(long)]
    rrule: Option<String>,
    /// Additional occurrence (RDATE); repeatable
    #[arg(long)]
    rdate: Vec<String>,
    /// Excluded occurrence (EXDATE); repeatable
    #[arg(long)]
    exdate: Vec<String>,
    /// IANA timezone applied to every date-time value without its own zone
    #[arg(long)]
    tzid: Option<String>,
    /// Reentry cache capacity (0 disables the cache)
    #[arg(long, default_value_t = CacheConfig::DEFAULT_CAPACITY)]
    cache_capacity: usize,
    /// Record every n-th occurrence in the reentry cache
    #[arg(long, default_value_t = CacheConfig::DEFAULT_STRIDE)]
    cache_stride: u32,
}

impl SetArgs {
    fn value(&self, text: &str) -> Result<Temporal> {
        parse_value(text, self.tzid.as_deref())
    }

    fn build(&self) -> Result<RecurrenceSet> {
        let start = self
            .value(&self.dtstart)
            .with_context(|| format!("Invalid --dtstart '{}'", self.dtstart))?;
        let config = CacheConfig::new(self.cache_capacity, self.cache_stride)
            .context("Invalid cache settings")?;
        let mut set = RecurrenceSet::new(start).with_cache_config(config)?;

        if let Some(text) = &self.rrule {
            let rule: RecurrenceRule = text
                .parse()
                .with_context(|| format!("Invalid --rrule '{text}'"))?;
            set.set_rule(Some(rule))
                .with_context(|| format!("RRULE '{text}' does not fit DTSTART {start}"))?;
        }
        for text in &self.rdate {
            let value = self
                .value(text)
                .with_context(|| format!("Invalid --rdate '{text}'"))?;
            set.add_addition(value)
                .with_context(|| format!("RDATE {value} does not match DTSTART {start}"))?;
        }
        for text in &self.exdate {
            let value = self
                .value(text)
                .with_context(|| format!("Invalid --exdate '{text}'"))?;
            set.add_exclusion(value)
                .with_context(|| format!("EXDATE {value} does not match DTSTART {start}"))?;
        }
        tracing::debug!(
            start = %start,
            rule = ?set.rule().map(|r| r.to_string()),
            additions = self.rdate.len(),
            exclusions = self.exdate.len(),
            "recurrence set built"
        );
        Ok(set)
    }
}

#[derive(Serialize)]
struct ExpandOutput {
    dtstart: Temporal,
    rrule: Option<String>,
    occurrences: Vec<Temporal>,
}

#[derive(Serialize)]
struct NeighbourOutput {
    occurrence: Option<Temporal>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Expand {
            set,
            from,
            limit,
            json,
        } => {
            let from = from
                .map(|text| {
                    set.value(&text)
                        .with_context(|| format!("Invalid --from '{text}'"))
                })
                .transpose()?;
            let mut recurrence = set.build()?;
            let occurrences: Vec<Temporal> = recurrence
                .occurrences(from.as_ref())
                .context("Failed to expand recurrence set")?
                .take(limit)
                .collect();
            tracing::debug!(count = occurrences.len(), "expanded");

            if json {
                let output = ExpandOutput {
                    dtstart: *recurrence.start(),
                    rrule: recurrence.rule().map(|r| r.to_string()),
                    occurrences,
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                for value in occurrences {
                    println!("{value}");
                }
            }
        }
        Commands::Next { set, after, json } => {
            let after = set
                .value(&after)
                .with_context(|| format!("Invalid --after '{after}'"))?;
            let found = set
                .build()?
                .next_occurrence(&after)
                .context("Failed to find next occurrence")?;
            print_neighbour(found, json)?;
        }
        Commands::Previous { set, before, json } => {
            let before = set
                .value(&before)
                .with_context(|| format!("Invalid --before '{before}'"))?;
            let found = set
                .build()?
                .previous_occurrence(&before)
                .context("Failed to find previous occurrence")?;
            print_neighbour(found, json)?;
        }
        Commands::Validate { set } => {
            set.build()?
                .validate()
                .context("Recurrence set is invalid")?;
            println!("valid");
        }
    }

    Ok(())
}

/// Install a stderr subscriber. `RUST_LOG` wins over `-v`.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse a value given on the command line, applying `--tzid` to date-times
/// that carry no zone of their own.
fn parse_value(text: &str, tzid: Option<&str>) -> Result<Temporal> {
    let text = text.trim();
    let zoned_elsewhere = text.starts_with("TZID=") || text.ends_with(['Z', 'z']);
    let value = match tzid {
        Some(tzid) if !zoned_elsewhere && text.contains(['T', 't']) => {
            Temporal::parse_with_tzid(text, Some(tzid))?
        }
        _ => text.parse()?,
    };
    Ok(value)
}

fn print_neighbour(found: Option<Temporal>, json: bool) -> Result<()> {
    if json {
        let output = NeighbourOutput { occurrence: found };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        match found {
            Some(value) => println!("{value}"),
            None => println!("none"),
        }
    }
    Ok(())
}
