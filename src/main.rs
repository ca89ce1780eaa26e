use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use cashpath::api::{self, ProjectionArgs, migration};
use cashpath::core::format::{format_currency, format_percent};
use cashpath::core::{ContributionConfig, Projection, derive_milestones, project};

const CONFIG_ENV: &str = "CASHPATH_CONTRIBUTION_CONFIG";

#[derive(Parser, Debug)]
#[command(
    name = "cashpath",
    about = "Month-by-month personal finance projection (salary, retirement contributions, loans, milestones)"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(long, help = "Contribution rate table (TOML)")]
        config: Option<PathBuf>,
    },
    /// Project a stored profile and print the monthly table.
    Project {
        #[arg(long, help = "Profile JSON file, any stored version")]
        profile: PathBuf,
        #[arg(long, help = "Contribution rate table (TOML)")]
        config: Option<PathBuf>,
        #[arg(long, help = "Treat this date as today, YYYY-MM-DD")]
        today: Option<String>,
        #[arg(long, help = "Print the projection as JSON")]
        json: bool,
        #[command(flatten)]
        settings: ProjectionArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Serve { port, config } => {
            let config = load_config(config.as_deref())?;
            api::run_http_server(port, config)
                .await
                .context("HTTP server failed")
        }
        Command::Project {
            profile,
            config,
            today,
            json,
            settings,
        } => {
            let config = load_config(config.as_deref())?;
            run_projection_command(&profile, &config, today.as_deref(), json, settings)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ContributionConfig> {
    let from_env = env::var_os(CONFIG_ENV).map(PathBuf::from);
    let Some(path) = path.map(Path::to_path_buf).or(from_env) else {
        log::info!("using bundled contribution table");
        return Ok(ContributionConfig::bundled()?);
    };
    let source = fs::read_to_string(&path)
        .with_context(|| format!("failed to read contribution table {}", path.display()))?;
    let config = ContributionConfig::from_toml_str(&source)
        .with_context(|| format!("invalid contribution table {}", path.display()))?;
    log::info!("loaded contribution table from {}", path.display());
    Ok(config)
}

fn run_projection_command(
    profile_path: &Path,
    config: &ContributionConfig,
    today: Option<&str>,
    json: bool,
    args: ProjectionArgs,
) -> Result<()> {
    let raw = fs::read_to_string(profile_path)
        .with_context(|| format!("failed to read profile {}", profile_path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("profile {} is not JSON", profile_path.display()))?;
    let profile = migration::normalize_profile(value)?;
    let today = api::resolve_today(today).map_err(|e| anyhow!(e))?;
    let settings = api::build_settings(args, today).map_err(|e| anyhow!(e))?;

    let projection = project(&profile, &settings, config, today)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&projection)?);
    } else {
        print_table(&projection);
    }
    Ok(())
}

fn print_table(projection: &Projection) {
    println!(
        "{:<9} {:>4} {:>13} {:>13} {:>13} {:>14} {:>14} {:>14}",
        "Month", "Age", "Take-home", "Expenses", "Loan", "Cash", "Retirement", "Net worth"
    );
    for m in &projection.months {
        let tags = m
            .milestones
            .iter()
            .map(|k| format!("{k:?}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{:<9} {:>4} {:>13} {:>13} {:>13} {:>14} {:>14} {:>14} {}",
            m.label,
            m.age,
            format_currency(m.take_home),
            format_currency(m.expense_total),
            format_currency(m.loan_balance),
            format_currency(m.cash),
            format_currency(m.retirement_total),
            format_currency(m.net_worth),
            tags
        );
    }

    let meta = &projection.metadata;
    println!();
    println!(
        "{} to {}: {} of {} months (monthly salary growth {})",
        meta.start_label,
        meta.end_label,
        meta.months_emitted,
        meta.months_requested,
        format_percent(meta.monthly_salary_growth)
    );
    if meta.loan_non_convergent {
        println!("Warning: the scheduled loan payment never covers the interest.");
    }
    for milestone in derive_milestones(projection, &[]) {
        let when = milestone
            .reached
            .as_ref()
            .map(|hit| hit.label.clone())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:>9} {:>6.1}%  {}",
            milestone.title, when, milestone.progress_pct, milestone.time_remaining
        );
    }
}
