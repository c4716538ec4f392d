//! CLI entry point for `mailrank`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use mailrank::config::Config;
use mailrank::embedding::HashingEmbedder;
use mailrank::error::MailRankError;
use mailrank::i18n;
use mailrank::index::builder::{self, BuildOptions};
use mailrank::index::reader;
use mailrank::ingest::{self, SourceKind};
use mailrank::search::{HybridEngine, RetrievalOptions, SearchOutcome};
use mailrank::store::MessageStore;

#[derive(Parser)]
#[command(name = "mailrank", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Language (en, ko). Defaults to system locale.
    #[arg(long, value_name = "LANG", global = true)]
    lang: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a mail source into the message store
    Ingest {
        /// Directory of .eml files, a single .eml file, or an MBOX file
        source: PathBuf,
        /// Message store to (re)create
        #[arg(long, env = "MAILRANK_DB", value_name = "PATH")]
        db_path: Option<PathBuf>,
        /// Messages written per transaction
        #[arg(long, value_name = "N")]
        batch_size: Option<usize>,
    },
    /// Build a new index generation
    Index {
        #[arg(long, env = "MAILRANK_DB", value_name = "PATH")]
        db_path: Option<PathBuf>,
        #[arg(long, env = "MAILRANK_INDEX_DIR", value_name = "DIR")]
        index_dir: Option<PathBuf>,
    },
    /// Search the index
    Search {
        /// Query text; supports field:value, "quoted phrases", -exclusions and OR
        query: String,
        #[arg(long, env = "MAILRANK_INDEX_DIR", value_name = "DIR")]
        index_dir: Option<PathBuf>,
        /// Maximum number of results
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Weight of the semantic score, 0.0 (keywords only) to 1.0 (semantic only)
        #[arg(short, long)]
        weight: Option<f64>,
        /// Retrieval deadline in milliseconds (0 disables it)
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Show the main user and important contacts
    Contacts {
        #[arg(long, env = "MAILRANK_DB", value_name = "PATH")]
        db_path: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Show the state of the index
    Status {
        #[arg(long, env = "MAILRANK_INDEX_DIR", value_name = "DIR")]
        index_dir: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

/// Detect language early from --lang arg or system env, before clap processes --help.
fn detect_lang_early() -> i18n::Lang {
    let args: Vec<String> = std::env::args().collect();
    for (i, arg) in args.iter().enumerate() {
        let code = if arg == "--lang" {
            args.get(i + 1).map(String::as_str)
        } else {
            arg.strip_prefix("--lang=")
        };
        if let Some(lang) = code.and_then(i18n::Lang::from_code) {
            return lang;
        }
    }
    i18n::detect_system_lang()
}

/// Build a localized clap Command using i18n strings.
fn build_localized_command() -> clap::Command {
    let mut cmd = Cli::command()
        .about(i18n::app_about())
        .long_about(i18n::app_long_about())
        .after_help(i18n::app_after_help())
        .mut_arg("verbose", |a| a.help(i18n::help_verbose()))
        .mut_arg("lang", |a| a.help(i18n::help_lang()));

    let names: Vec<String> = cmd
        .get_subcommands()
        .map(|s| s.get_name().to_string())
        .collect();
    for name in names {
        let about = match name.as_str() {
            "ingest" => i18n::help_cmd_ingest(),
            "index" => i18n::help_cmd_index(),
            "search" => i18n::help_cmd_search(),
            "contacts" => i18n::help_cmd_contacts(),
            "status" => i18n::help_cmd_status(),
            "completions" => i18n::help_cmd_completions(),
            "manpage" => i18n::help_cmd_manpage(),
            _ => continue,
        };
        cmd = cmd.mut_subcommand(name, |s| s.about(about));
    }
    cmd
}

fn main() -> anyhow::Result<()> {
    // Detect language BEFORE clap parsing so --help is localized
    i18n::set_lang(detect_lang_early());

    let matches = build_localized_command().get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    let (config, config_error) = match mailrank::config::load_config() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);
    if let Some(e) = config_error {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
    }
    tracing::debug!(
        log_file = %mailrank::config::log_file_path(&config).display(),
        "Logging initialized"
    );

    match cli.command {
        Commands::Ingest {
            source,
            db_path,
            batch_size,
        } => cmd_ingest(&config, &source, db_path, batch_size),
        Commands::Index { db_path, index_dir } => cmd_index(&config, db_path, index_dir),
        Commands::Search {
            query,
            index_dir,
            limit,
            weight,
            timeout_ms,
            json,
        } => cmd_search(&config, &query, index_dir, limit, weight, timeout_ms, json),
        Commands::Contacts { db_path, json } => cmd_contacts(&config, db_path, json),
        Commands::Status { index_dir, json } => cmd_status(&config, index_dir, json),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = mailrank::config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailrank.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn progress_bar(label: &str, counter: &str) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} {label} [{{bar:40.cyan/blue}}] {counter} ({{eta}})"
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Open the message store, turning a missing file into a localized hint.
fn open_store(path: &Path) -> anyhow::Result<MessageStore> {
    match MessageStore::open(path) {
        Err(MailRankError::SourceNotFound(_)) => {
            anyhow::bail!("{}: {}", i18n::err_database_not_found(), path.display())
        }
        other => Ok(other?),
    }
}

/// Ingest a mail source into a fresh message store.
fn cmd_ingest(
    config: &Config,
    source: &Path,
    db_path: Option<PathBuf>,
    batch_size: Option<usize>,
) -> anyhow::Result<()> {
    let db_path = db_path.unwrap_or_else(|| config.ingest.db_path.clone());
    let batch_size = batch_size.unwrap_or(config.ingest.batch_size);

    let source = match ingest::open_source(source) {
        Err(MailRankError::SourceNotFound(p)) => {
            anyhow::bail!("{}: {}", i18n::err_source_not_found(), p.display())
        }
        other => other?,
    };
    let mut store = MessageStore::create(&db_path)?;

    let counter = match source.kind() {
        SourceKind::Mbox => "{bytes}/{total_bytes}",
        _ => "{pos}/{len}",
    };
    let pb = progress_bar(i18n::msg_ingesting(), counter)?;
    let start = Instant::now();
    let stats = ingest::ingest(
        &source,
        &mut store,
        batch_size,
        Some(&|current, total| {
            pb.set_length(total);
            pb.set_position(current);
        }),
    )?;
    pb.finish_and_clear();

    println!();
    println!("  {}", i18n::msg_ingest_complete());
    println!("  {:<22} {} ({})", i18n::msg_source(), source.path().display(), source.kind());
    println!("  {:<22} {}", i18n::msg_database(), db_path.display());
    println!("  {:<22} {}", i18n::msg_messages(), stats.messages);
    if stats.skipped > 0 {
        println!("  {:<22} {}", i18n::msg_skipped(), stats.skipped);
    }
    println!("  {:<22} {:.2?}", i18n::msg_elapsed(), start.elapsed());
    println!();
    Ok(())
}

/// Build a new index generation from the message store.
fn cmd_index(
    config: &Config,
    db_path: Option<PathBuf>,
    index_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let db_path = db_path.unwrap_or_else(|| config.ingest.db_path.clone());
    let index_dir = index_dir.unwrap_or_else(|| config.index.index_dir.clone());

    let messages = open_store(&db_path)?.load_all()?;
    let embedder = HashingEmbedder::new(config.embedding.dimension)?;
    let options = BuildOptions {
        metric: config.embedding.metric,
        max_chars: config.embedding.max_chars,
        keep_generations: config.index.keep_generations,
    };

    let pb = progress_bar(i18n::msg_indexing(), "{pos}/{len}")?;
    let start = Instant::now();
    let report = builder::build_index(
        &index_dir,
        messages,
        &embedder,
        &options,
        Some(&|current, total| {
            pb.set_length(total);
            pb.set_position(current);
        }),
    )?;
    pb.finish_and_clear();

    println!();
    println!("  {}", i18n::msg_index_complete());
    println!("  {:<22} {}", i18n::msg_index_dir(), index_dir.display());
    println!("  {:<22} {}", i18n::msg_generation(), report.generation);
    println!("  {:<22} {}", i18n::msg_messages(), report.messages);
    println!("  {:<22} {}", i18n::msg_lexical_terms(), report.lexical_terms);
    println!("  {:<22} {}", i18n::msg_vectors(), report.vectors);
    println!(
        "  {:<22} {}",
        i18n::msg_index_size(),
        format_size(report.bytes_written, BINARY)
    );
    println!(
        "  {:<22} {}",
        i18n::msg_main_user(),
        report.profile.main_user.as_deref().unwrap_or(i18n::msg_none())
    );
    println!(
        "  {:<22} {}",
        i18n::msg_important_contacts(),
        report.profile.important_contacts.len()
    );
    if !report.pruned.is_empty() {
        println!("  {:<22} {:?}", i18n::msg_pruned(), report.pruned);
    }
    println!("  {:<22} {:.2?}", i18n::msg_elapsed(), start.elapsed());
    println!();
    Ok(())
}

/// Run a hybrid search and print the ranked hits.
fn cmd_search(
    config: &Config,
    query: &str,
    index_dir: Option<PathBuf>,
    limit: Option<usize>,
    weight: Option<f64>,
    timeout_ms: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let index_dir = index_dir.unwrap_or_else(|| config.index.index_dir.clone());
    let limit = limit.unwrap_or(config.search.limit);
    let weight = weight.unwrap_or(config.search.semantic_weight);
    let timeout = match timeout_ms {
        Some(0) => None,
        Some(ms) => Some(Duration::from_millis(ms)),
        None => (config.search.timeout_ms > 0)
            .then(|| Duration::from_millis(config.search.timeout_ms)),
    };

    let embedder = Arc::new(HashingEmbedder::new(config.embedding.dimension)?);
    let engine = HybridEngine::open(&index_dir, embedder, RetrievalOptions::from(&config.search));
    if !engine.is_available() {
        anyhow::bail!("{}: {}", i18n::err_index_not_found(), index_dir.display());
    }

    let outcome = engine.search_with_loaded_profile_within(query, limit, weight, timeout)?;
    for warning in &outcome.warnings {
        eprintln!("{}: {warning}", i18n::msg_warning());
    }

    if json {
        print_search_results_json(query, &outcome)
    } else {
        print_search_results_table(&outcome);
        Ok(())
    }
}

/// Print search results as a human-readable table.
fn print_search_results_table(outcome: &SearchOutcome) {
    println!();
    if outcome.is_empty() {
        println!("  {}", i18n::msg_no_results());
        println!();
        return;
    }
    println!("  {} {}", outcome.hits.len(), i18n::msg_results());
    println!();

    println!(
        "  {} {} {} {} {}",
        fit(i18n::col_rank(), 4),
        fit(i18n::col_score(), 7),
        fit(i18n::col_date(), 16),
        fit(i18n::col_from(), 26),
        i18n::col_subject()
    );
    println!("  {}", "-".repeat(100));

    for (i, hit) in outcome.hits.iter().enumerate() {
        let date = hit
            .message
            .sent_at
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "  {} {} {} {} {}",
            fit(&(i + 1).to_string(), 4),
            fit(&format!("{:.3}", hit.scores.final_score), 7),
            fit(&date, 16),
            fit(&hit.message.sender, 26),
            fit(&hit.message.subject, 44).trim_end()
        );
    }
    println!();
    println!(
        "  {}: {:.2}",
        i18n::msg_semantic_weight(),
        outcome.effective_semantic_weight
    );
    println!();
}

/// Print search results as JSON.
fn print_search_results_json(query: &str, outcome: &SearchOutcome) -> anyhow::Result<()> {
    let results: Vec<serde_json::Value> = outcome
        .hits
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            let m = &hit.message;
            serde_json::json!({
                "rank": i + 1,
                "id": m.id,
                "subject": m.subject,
                "sender": m.sender,
                "recipients": m.recipients,
                "sent_at": m.sent_at.map(|d| d.to_rfc3339()),
                "folder_path": m.folder_path,
                "thread_topic": m.thread_topic,
                "scores": hit.scores,
            })
        })
        .collect();

    let output = serde_json::json!({
        "query": query,
        "generation": outcome.generation,
        "effective_semantic_weight": outcome.effective_semantic_weight,
        "lexical_candidates": outcome.lexical_candidates,
        "semantic_candidates": outcome.semantic_candidates,
        "warnings": outcome.warnings,
        "result_count": results.len(),
        "results": results,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Show the contact-graph analysis of the stored archive.
fn cmd_contacts(config: &Config, db_path: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let db_path = db_path.unwrap_or_else(|| config.ingest.db_path.clone());
    let messages = open_store(&db_path)?.load_all()?;
    let report = mailrank::contacts::analyze_report(&messages);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!(
        "  {:<22} {}",
        i18n::msg_main_user(),
        report.profile.main_user.as_deref().unwrap_or(i18n::msg_none())
    );
    println!();
    println!("  {}:", i18n::msg_important_contacts());
    if report.profile.important_contacts.is_empty() {
        println!("    {}", i18n::msg_none());
    }
    for (address, count) in report
        .interactions
        .iter()
        .filter(|(a, _)| report.profile.is_important(a))
    {
        println!("    {count:>6}  {address}");
    }
    println!();
    println!("  {}:", i18n::msg_top_senders());
    for (sender, count) in report.sender_counts.iter().take(10) {
        println!("    {count:>6}  {sender}");
    }
    println!();
    Ok(())
}

/// Describe the current index generation.
fn cmd_status(config: &Config, index_dir: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let index_dir = index_dir.unwrap_or_else(|| config.index.index_dir.clone());
    let status = match reader::inspect(&index_dir) {
        Err(e) if e.is_index_unavailable() => {
            anyhow::bail!("{}: {}", i18n::err_index_not_found(), index_dir.display())
        }
        other => other?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let or_none = |v: Option<String>| v.unwrap_or_else(|| i18n::msg_none().to_string());
    println!();
    println!("  {:<22} {}", i18n::msg_index_dir(), status.index_dir.display());
    println!("  {:<22} {}", i18n::msg_generation(), status.generation);
    println!(
        "  {:<22} {:?}",
        i18n::msg_generations_on_disk(),
        status.generations_on_disk
    );
    println!("  {:<22} {}", i18n::msg_messages(), status.documents);
    println!(
        "  {:<22} {}",
        i18n::msg_lexical_terms(),
        or_none(status.lexical_terms.map(|n| n.to_string()))
    );
    println!(
        "  {:<22} {}",
        i18n::msg_vectors(),
        or_none(status.vectors.map(|n| n.to_string()))
    );
    println!(
        "  {:<22} {}",
        i18n::msg_dimension(),
        or_none(status.dimension.map(|n| n.to_string()))
    );
    println!(
        "  {:<22} {}",
        i18n::msg_metric(),
        or_none(status.metric.map(|m| m.to_string()))
    );
    println!("  {:<22} {}", i18n::msg_model(), or_none(status.model));
    println!("  {:<22} {}", i18n::msg_main_user(), or_none(status.main_user));
    println!(
        "  {:<22} {}",
        i18n::msg_important_contacts(),
        status.important_contacts
    );
    println!(
        "  {:<22} {}",
        i18n::msg_index_size(),
        format_size(status.size_bytes, BINARY)
    );
    println!();
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailrank", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let man = clap_mangen::Man::new(build_localized_command());
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Pad or truncate `s` to exactly `width` terminal columns.
fn fit(s: &str, width: usize) -> String {
    let s: String = s
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let current = UnicodeWidthStr::width(s.as_str());
    if current <= width {
        return format!("{s}{}", " ".repeat(width - current));
    }

    let mut out = String::new();
    let mut used = 0;
    for ch in s.chars() {
        let w = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    used += 1;
    out.push_str(&" ".repeat(width.saturating_sub(used)));
    out
}
