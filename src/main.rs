//! # Aether CLI (`aether`)
//!
//! The `aether` binary is the primary interface for the discoverability
//! ranking engine. It provides commands for database initialization,
//! page audits, weight management, topic exploration, action ranking,
//! metrics import, and starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! aether --config ./config/aether.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `aether init` | Create the SQLite database and run schema migrations |
//! | `aether audit run <url>` | Audit a page and print the report |
//! | `aether audit show <id>` | Show a stored audit record |
//! | `aether audit list` | List recent audits |
//! | `aether weights show` | Show current category weights |
//! | `aether weights update <cat>=<obs>...` | Apply an observed-impact update |
//! | `aether topic explore "<query>"` | Explore and score a content topic |
//! | `aether actions rank --city <city>` | Rank the top-5 recommended actions |
//! | `aether metrics import <file.json>` | Load per-page metric records |
//! | `aether watchlist add <city> <page>` | Watch a page for action ranking |
//! | `aether checkers` | List registered diagnostic checkers |
//! | `aether serve` | Start the JSON HTTP server |

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use aether::actions::ActionRanker;
use aether::audit::AuditEngine;
use aether::checkers::{CheckerRegistry, DbMetricsProvider};
use aether::config::{self, Config};
use aether::models::{AuditRecord, RecommendedAction, TopicScore};
use aether::progress::ProgressMode;
use aether::signals::SyntheticSignals;
use aether::topics::TopicService;
use aether::weights::WeightStore;
use aether::{db, migrate, rules, server};

/// Aether CLI — a discoverability ranking engine for search and AI
/// answer engines.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/aether.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "aether",
    about = "Aether — discoverability ranking engine for search and AI answer engines",
    version,
    long_about = "Aether audits marketplace pages across five diagnostic categories, learns \
    category weights from observed impact, scores candidate content topics into a single win \
    score, and ranks declarative fix recommendations per city."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/aether.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables, and
    /// seeds the weight store with default weights. Idempotent.
    Init,

    /// Run and inspect page audits.
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },

    /// Inspect and update category weights.
    Weights {
        #[command(subcommand)]
        action: WeightsAction,
    },

    /// Explore and score content topics.
    Topic {
        #[command(subcommand)]
        action: TopicAction,
    },

    /// Rank and list recommended actions.
    Actions {
        #[command(subcommand)]
        action: ActionsAction,
    },

    /// Import per-page metric records.
    Metrics {
        #[command(subcommand)]
        action: MetricsAction,
    },

    /// Manage the per-city page watchlist.
    Watchlist {
        #[command(subcommand)]
        action: WatchlistAction,
    },

    /// List registered diagnostic checkers.
    Checkers,

    /// Start the JSON HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// audit, weights, topics, and actions endpoints.
    Serve,
}

#[derive(Subcommand)]
enum AuditAction {
    /// Audit a page and print the report.
    Run {
        /// Target page URL (http:// or https://).
        url: String,

        /// Restrict the run to specific categories (repeatable).
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Print the full record as JSON instead of the human report.
        #[arg(long)]
        json: bool,
    },

    /// Show a stored audit record by id.
    Show {
        /// Audit UUID.
        id: String,

        /// Print the full record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List recent audits, newest first.
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
}

#[derive(Subcommand)]
enum WeightsAction {
    /// Show the current weight set and learning rate.
    Show,

    /// Apply an observed-impact update.
    ///
    /// Takes `category=observed` pairs, e.g.
    /// `aether weights update content=0.4 schema=0.1`.
    Update {
        #[arg(required = true, value_parser = parse_weight_pair)]
        observed: Vec<(String, f64)>,
    },

    /// Restore default weights and the configured learning rate.
    Reset,

    /// Set the smoothing factor (0 < alpha <= 1).
    SetRate {
        alpha: f64,
    },
}

#[derive(Subcommand)]
enum TopicAction {
    /// Explore a topic: collect signals, score it, print the record.
    Explore {
        /// Topic query, e.g. "used cars under 5 lakh".
        query: String,

        /// City the topic targets. Defaults to the configured city.
        #[arg(long, default_value = "")]
        city: String,

        /// Progress output: off, human, or json. Defaults by TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Show the status of an exploration job.
    Status {
        /// Job UUID.
        job_id: String,
    },

    /// Show the latest score record for a topic.
    Show {
        /// Topic id, e.g. `used-cars-under-5-lakh--hyderabad`.
        topic_id: String,
    },
}

#[derive(Subcommand)]
enum ActionsAction {
    /// Rank a fresh batch of recommended actions for a city.
    Rank {
        #[arg(long, default_value = "")]
        city: String,
    },

    /// Show the latest ranked batch for a city.
    List {
        #[arg(long, default_value = "")]
        city: String,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum MetricsAction {
    /// Import metric records from a JSON file.
    ///
    /// Expected shape: `{"<page>": {"<metric>": <value>, ...}, ...}`.
    Import {
        /// Path to the JSON file.
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum WatchlistAction {
    /// Add a page to a city's watchlist.
    Add {
        city: String,
        page: String,
    },

    /// List watchlisted pages for a city.
    List {
        city: String,
    },
}

/// Parse a `category=observed` pair for `weights update`.
fn parse_weight_pair(s: &str) -> Result<(String, f64), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid CATEGORY=VALUE: no '=' found in '{}'", s))?;
    let value: f64 = s[pos + 1..]
        .parse()
        .map_err(|_| format!("invalid observed value in '{}'", s))?;
    Ok((s[..pos].to_string(), value))
}

fn init_tracing() {
    // RUST_LOG controls verbosity; default keeps the CLI quiet.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Everything the command handlers need, built once per invocation.
struct Engines {
    weights: WeightStore,
    audits: AuditEngine,
    topics: TopicService,
    actions: ActionRanker,
    metrics: Arc<DbMetricsProvider>,
}

async fn build_engines(cfg: &Config) -> Result<Engines> {
    let config = Arc::new(cfg.clone());
    let pool = db::connect(&cfg.db).await?;
    let weights = WeightStore::new(pool.clone());
    let registry = Arc::new(CheckerRegistry::with_builtins());
    let metrics = Arc::new(DbMetricsProvider::new(pool.clone()));

    Ok(Engines {
        audits: AuditEngine::new(
            config.clone(),
            pool.clone(),
            weights.clone(),
            registry,
            metrics.clone(),
        ),
        topics: TopicService::new(
            config.clone(),
            pool.clone(),
            weights.clone(),
            Arc::new(SyntheticSignals),
        ),
        actions: ActionRanker::new(config, pool, weights.clone(), metrics.clone()),
        weights,
        metrics,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Audit { action } => {
            let engines = build_engines(&cfg).await?;
            match action {
                AuditAction::Run {
                    url,
                    categories,
                    json,
                } => {
                    let categories = if categories.is_empty() {
                        None
                    } else {
                        Some(categories)
                    };
                    let record = engines.audits.run_audit(&url, categories).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&record)?);
                    } else {
                        print_audit_report(&record);
                    }
                }
                AuditAction::Show { id, json } => {
                    let record = engines
                        .audits
                        .get_audit(&id)
                        .await?
                        .with_context(|| format!("no audit with id: {}", id))?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&record)?);
                    } else {
                        print_audit_report(&record);
                    }
                }
                AuditAction::List { limit, offset } => {
                    let (records, total) = engines.audits.list_audits(limit, offset).await?;
                    println!("{} audits ({} shown)", total, records.len());
                    for r in records {
                        println!(
                            "  {}  {:<9}  {:>5}  {} issues  {}",
                            r.id,
                            r.status.as_str(),
                            r.score.map_or("-".to_string(), |s| format!("{:.1}", s)),
                            r.issues_total,
                            r.target_url
                        );
                    }
                }
            }
        }
        Commands::Weights { action } => {
            let engines = build_engines(&cfg).await?;
            match action {
                WeightsAction::Show => {
                    let set = engines.weights.get().await?;
                    println!("learning rate: {}", set.learning_rate);
                    for (category, weight) in &set.weights {
                        println!("  {:<16} {:.4}", category, weight);
                    }
                    let events = engines.weights.history(5).await?;
                    if !events.is_empty() {
                        println!();
                        println!("Recent updates:");
                        for (version, observed, _, _) in events {
                            println!("  v{}  observed {}", version, observed);
                        }
                    }
                }
                WeightsAction::Update { observed } => {
                    let observed: BTreeMap<String, f64> = observed.into_iter().collect();
                    let set = engines.weights.update(&observed).await?;
                    println!("weights updated:");
                    for (category, weight) in &set.weights {
                        println!("  {:<16} {:.4}", category, weight);
                    }
                }
                WeightsAction::Reset => {
                    engines.weights.reset(cfg.learning.alpha).await?;
                    println!("Weights reset to defaults.");
                }
                WeightsAction::SetRate { alpha } => {
                    engines.weights.set_learning_rate(alpha).await?;
                    println!("Learning rate set to {}.", alpha);
                }
            }
        }
        Commands::Topic { action } => {
            let engines = build_engines(&cfg).await?;
            match action {
                TopicAction::Explore {
                    query,
                    city,
                    progress,
                } => {
                    let mode = match progress.as_deref() {
                        None => ProgressMode::default_for_tty(),
                        Some("off") => ProgressMode::Off,
                        Some("human") => ProgressMode::Human,
                        Some("json") => ProgressMode::Json,
                        Some(other) => {
                            anyhow::bail!("unknown progress mode: '{}'", other)
                        }
                    };
                    let reporter = mode.reporter();
                    let score = engines
                        .topics
                        .explore_inline(&query, &city, reporter.as_ref())
                        .await?;
                    print_topic_score(&score);
                }
                TopicAction::Status { job_id } => {
                    let job = engines
                        .topics
                        .get_job(&job_id)
                        .await?
                        .with_context(|| format!("no exploration job with id: {}", job_id))?;
                    println!(
                        "{}  {:<9}  {:>3}%  {}",
                        job.id,
                        job.status.as_str(),
                        job.progress,
                        job.stage
                    );
                    if let Some(error) = job.error {
                        println!("  error: {}", error);
                    }
                    if let Some(topic_id) = job.topic_id {
                        println!("  topic: {}", topic_id);
                    }
                }
                TopicAction::Show { topic_id } => {
                    let score = engines
                        .topics
                        .get_topic(&topic_id)
                        .await?
                        .with_context(|| format!("no topic with id: {}", topic_id))?;
                    print_topic_score(&score);
                }
            }
        }
        Commands::Actions { action } => {
            let engines = build_engines(&cfg).await?;
            match action {
                ActionsAction::Rank { city } => {
                    let batch = engines.actions.rank(&city).await?;
                    if batch.is_empty() {
                        println!("No matching actions. Is the watchlist populated?");
                    }
                    for a in &batch {
                        print_action(a);
                    }
                }
                ActionsAction::List { city, limit } => {
                    let city = if city.is_empty() {
                        cfg.scoring.default_city.clone()
                    } else {
                        city
                    };
                    let mut batch = engines.actions.latest(&city).await?;
                    batch.truncate(limit as usize);
                    if batch.is_empty() {
                        println!("No ranked actions for {}.", city);
                    }
                    for a in &batch {
                        print_action(a);
                    }
                }
            }
        }
        Commands::Metrics { action } => match action {
            MetricsAction::Import { file } => {
                let engines = build_engines(&cfg).await?;
                let content = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read metrics file: {}", file.display()))?;
                let records: HashMap<String, HashMap<String, f64>> =
                    serde_json::from_str(&content)
                        .with_context(|| "Failed to parse metrics file")?;
                let written = engines.metrics.import(&records).await?;
                println!("Imported {} metric values for {} pages.", written, records.len());
            }
        },
        Commands::Watchlist { action } => {
            let engines = build_engines(&cfg).await?;
            match action {
                WatchlistAction::Add { city, page } => {
                    engines.metrics.add_to_watchlist(&city, &page).await?;
                    println!("Watching {} in {}.", page, city);
                }
                WatchlistAction::List { city } => {
                    use aether::checkers::MetricsProvider;
                    let pages = engines.metrics.watchlist(&city).await?;
                    if pages.is_empty() {
                        println!("No watchlisted pages for {}.", city);
                    }
                    for page in pages {
                        println!("  {}", page);
                    }
                }
            }
        }
        Commands::Checkers => {
            let registry = CheckerRegistry::with_builtins();
            println!("{} checkers registered:", registry.len());
            for checker in registry.checkers() {
                println!("  {:<16} {}", checker.category(), checker.description());
            }
            let rule_count = match &cfg.actions.rules_path {
                Some(path) => rules::load_rules(path)?.len(),
                None => rules::default_rules().len(),
            };
            println!("{} action rules loaded.", rule_count);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn print_audit_report(record: &AuditRecord) {
    println!("Audit {}  [{}]", record.id, record.status.as_str());
    println!("  target: {}", record.target_url);
    if let Some(score) = record.score {
        println!("  overall score: {:.1} / 100", score);
    }
    if let Some(error) = &record.error {
        println!("  error: {}", error);
    }
    println!();
    for category in &record.categories {
        let marker = if category.degraded { " (degraded)" } else { "" };
        println!("  {:<16} {:>5.1}{}", category.category, category.score, marker);
    }
    if !record.issues.is_empty() {
        println!();
        println!("  Top issues:");
        for issue in record.issues.iter().take(10) {
            println!(
                "  [{:<8}] {}  {}",
                issue.severity.as_str(),
                issue.id,
                issue.description
            );
            println!("             fix: {}", issue.suggested_fix);
        }
    }
}

fn print_topic_score(score: &TopicScore) {
    println!("Topic {}  ({})", score.topic_id, score.city);
    println!("  win score:   {:.4}", score.win_score);
    println!("  seo score:   {:.4}", score.seo_score);
    println!("  geo score:   {:.4}", score.geo_score);
    println!("  competition: {:.4}", score.competition);
    println!("  difficulty:  {:.4}", score.difficulty);
}

fn print_action(a: &RecommendedAction) {
    println!(
        "#{} [{:.4}] {}  ({}, {} effort)",
        a.priority, a.score, a.title, a.pillar, a.effort.as_str()
    );
    println!("    page: {}", a.page);
    println!(
        "    rule {}: {} {} observed {}",
        a.evidence.rule_id, a.evidence.metric, a.evidence.threshold, a.evidence.observed
    );
    if !a.guidance.is_empty() {
        println!("    {}", a.guidance);
    }
}
