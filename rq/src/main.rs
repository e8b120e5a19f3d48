//! rq - rate-limit aware API request runner
//!
//! CLI entry point for sending requests through the scheduler.

use std::fs;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use futures::future::join_all;
use reqwest::Method;
use tracing::{debug, info};

use ratequeue::cli::{Cli, Command, get_log_path};
use ratequeue::config::Config;
use ratequeue::executor::{HttpExecutor, RequestDefinition, RequestExecutor};
use ratequeue::resources::{CardAdd, Cards};
use ratequeue::scheduler::{RequestOptions, Scheduler};

fn setup_logging(verbose: bool) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Write to log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!("rq loaded config: base_url={}", config.http.base_url);

    match cli.command {
        Command::Request {
            method,
            path,
            query,
            count,
            queue,
        } => cmd_request(&config, &method, &path, query, count, queue).await,
        Command::CardAdd {
            list,
            name,
            desc,
            queue,
        } => cmd_card_add(&config, list, name, desc, queue).await,
        Command::Config => cmd_config(&config),
    }
}

fn build_scheduler(config: &Config) -> Result<Scheduler> {
    config.validate()?;
    let executor: Arc<dyn RequestExecutor> =
        Arc::new(HttpExecutor::from_config(&config.http).context("Failed to create HTTP executor")?);
    Ok(Scheduler::new(config.scheduler.clone(), executor))
}

fn options(queue: bool) -> RequestOptions {
    RequestOptions { use_queue: queue }
}

/// Schedule `count` identical requests and report each outcome
async fn cmd_request(
    config: &Config,
    method: &str,
    path: &str,
    query: Vec<(String, String)>,
    count: usize,
    queue: bool,
) -> Result<()> {
    let method: Method = method
        .to_uppercase()
        .parse()
        .map_err(|_| eyre::eyre!("Invalid HTTP method: {}", method))?;
    let scheduler = build_scheduler(config)?;

    let mut request = RequestDefinition::new(method, path);
    request.query = query;

    let settlements: Vec<_> = (0..count)
        .map(|index| {
            let settlement = scheduler.schedule(request.clone(), options(queue));
            debug!(id = %settlement.id(), index, "cmd_request: scheduled");
            settlement
        })
        .collect();
    let outcomes = join_all(settlements).await;

    let mut failures = 0;
    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(response) => {
                println!("{} #{} {}", "ok".green(), index + 1, response.status);
                if count == 1 {
                    println!("{}", serde_json::to_string_pretty(&response.json)?);
                }
            }
            Err(err) => {
                failures += 1;
                println!("{} #{} {}", "error".red(), index + 1, err);
            }
        }
    }

    if let Some(state) = scheduler.rate_limit().await {
        println!(
            "rate limit: {}/{} remaining, resets at {}",
            state.remaining, state.limit, state.reset_at
        );
    }
    let stats = scheduler.stats().await;
    info!(?stats, "cmd_request: finished");

    if failures > 0 {
        return Err(eyre::eyre!("{} of {} requests failed", failures, count));
    }
    Ok(())
}

async fn cmd_card_add(config: &Config, list: String, name: String, desc: Option<String>, queue: bool) -> Result<()> {
    let cards = Cards::new(build_scheduler(config)?);
    let params = CardAdd {
        id_list: list,
        name: Some(name),
        desc,
    };
    let card = cards.add(&params, options(queue)).await.context("Failed to create card")?;
    println!("{} created card {}", "ok".green(), card.id);
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}
