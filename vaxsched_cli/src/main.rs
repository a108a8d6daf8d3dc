use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vaxsched_core::*;

#[derive(Parser)]
#[command(name = "vaxsched")]
#[command(about = "Vaccination eligibility and scheduling engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the next dose of every vaccine for a child
    Schedule {
        /// Child identifier
        #[arg(long)]
        child: String,

        /// Evaluate as of this date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show the reconciled dose history for a child
    Ledger {
        /// Child identifier
        #[arg(long)]
        child: String,
    },

    /// Check whether a vaccine can be booked on a date
    Check {
        /// Child identifier
        #[arg(long)]
        child: String,

        /// Vaccine identifier
        #[arg(long)]
        vaccine: String,

        /// Proposed appointment date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Validate and list the active protocol
    Protocol,
}

fn main() -> Result<()> {
    // Keep stdout for schedules; diagnostics go to stderr
    vaxsched_core::logging::init_with_level("warn");

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(data_dir) = cli.data_dir {
        config.data.data_dir = data_dir;
    }

    let store = FileStore::from_config(&config);
    tracing::debug!("Using data directory {:?}", store.data_dir());
    let rules = store.load_rule_set()?;
    let scheduler = Scheduler::new(&rules, &store).with_policy(config.sync.clone());

    match cli.command {
        Commands::Schedule { child, as_of, json } => {
            let as_of = as_of.unwrap_or_else(|| Local::now().date_naive());
            cmd_schedule(&scheduler, &child, as_of, json)
        }
        Commands::Ledger { child } => cmd_ledger(&scheduler, &child),
        Commands::Check {
            child,
            vaccine,
            date,
            json,
        } => cmd_check(&scheduler, &child, &vaccine, date, json),
        Commands::Protocol => cmd_protocol(&rules),
    }
}

fn cmd_schedule(
    scheduler: &Scheduler<'_, FileStore>,
    child_id: &str,
    as_of: NaiveDate,
    json: bool,
) -> Result<()> {
    let schedule = scheduler.compute_schedule(child_id, as_of)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&schedule)?);
        return Ok(());
    }

    println!("Schedule for {} as of {}", child_id, as_of);
    println!();
    println!(
        "  {:<32} {:>4}  {:<18} {:<12} {}",
        "Vaccine", "Dose", "Status", "Date", "Age window"
    );
    for entry in &schedule {
        let suggested = entry
            .suggested_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".into());
        let window = match entry.max_age_months {
            Some(max) => format!("{}-{} mo", entry.min_age_months, max),
            None => format!("{}+ mo", entry.min_age_months),
        };
        println!(
            "  {:<32} {:>4}  {:<18} {:<12} {}",
            entry.vaccine_name,
            entry.dose_number_to_apply,
            entry.status.to_string(),
            suggested,
            window
        );
    }

    Ok(())
}

fn cmd_ledger(scheduler: &Scheduler<'_, FileStore>, child_id: &str) -> Result<()> {
    let (child, ledger) = scheduler.snapshot(child_id)?;

    println!(
        "Dose history for {} (born {})",
        child.child_id, child.birth_date
    );

    let mut any = false;
    for vaccine_id in ledger.vaccine_ids(child_id) {
        println!();
        println!("  {}", vaccine_id);
        for entry in ledger.doses_for(child_id, vaccine_id) {
            any = true;
            println!(
                "    #{} {}  {:<11} {}",
                entry.dose_index,
                entry.effective_date(),
                entry.event.source_kind().to_string(),
                entry.event.source_id()
            );
        }
    }

    if !any {
        println!();
        println!("  No doses recorded.");
    }

    Ok(())
}

fn cmd_check(
    scheduler: &Scheduler<'_, FileStore>,
    child_id: &str,
    vaccine_id: &str,
    date: NaiveDate,
    json: bool,
) -> Result<()> {
    let check = scheduler.check_booking(child_id, vaccine_id, date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&check)?);
        return Ok(());
    }

    match check {
        BookingCheck::Allowed { dose_number } => {
            println!("✓ Dose {} of {} can be given on {}", dose_number, vaccine_id, date);
        }
        BookingCheck::TooEarly {
            dose_number,
            earliest,
        } => {
            println!(
                "✗ Too early: dose {} of {} is eligible from {}",
                dose_number, vaccine_id, earliest
            );
        }
        BookingCheck::AgeExceeded {
            dose_number,
            cutoff,
        } => {
            println!(
                "✗ Age exceeded: dose {} of {} had to be given by {}",
                dose_number, vaccine_id, cutoff
            );
        }
        BookingCheck::SeriesComplete => {
            println!("✓ Series complete: no further doses of {} needed", vaccine_id);
        }
        BookingCheck::NotApplicable { dose_number } => {
            println!(
                "✗ Not applicable: dose {} of {} is restricted by sex",
                dose_number, vaccine_id
            );
        }
    }

    Ok(())
}

fn cmd_protocol(rules: &ProtocolRuleSet) -> Result<()> {
    println!("Protocol: {} vaccines", rules.len());

    for vaccine in rules.vaccines() {
        println!();
        println!("  {} ({})", vaccine.name, vaccine.id);
        for rule in rules.rules_for(&vaccine.id)? {
            let max = rule
                .max_age_months
                .map(|m| format!("{} mo", m))
                .unwrap_or_else(|| "-".into());
            let interval = rule
                .min_interval_days
                .map(|d| format!("{} d", d))
                .unwrap_or_else(|| "-".into());
            let mut flags = Vec::new();
            if rule.is_booster {
                flags.push("booster".to_string());
            }
            if rule.target_sex != TargetSex::Any {
                flags.push(format!("{:?} only", rule.target_sex).to_lowercase());
            }
            println!(
                "    dose {}: from {} mo, until {}, interval {} {}",
                rule.dose_number,
                rule.min_age_months,
                max,
                interval,
                flags.join(", ")
            );
        }
    }

    println!();
    println!("✓ Protocol is valid");
    Ok(())
}
