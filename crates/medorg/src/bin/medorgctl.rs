//! Operator CLI for the processing queue.
//!
//! Exit code 0 on success, 1 on operator-visible failure. Output is
//! line-oriented and grep-friendly.

use std::io::Write;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use medorg::queue::{self, ItemStatus, QueueItem, QueueStore};
use medorg::Config;

#[derive(Parser)]
#[command(name = "medorgctl", about = "Manage the medorg processing queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show queue statistics
    Status,
    /// List queue items, optionally filtered by status
    List {
        /// Filter items by status
        #[arg(short, long)]
        status: Option<ItemStatus>,
        /// Maximum number of items to show
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: i64,
        /// Show error messages under each row
        #[arg(short, long)]
        verbose: bool,
    },
    /// Retry a failed item (must be in status 'error')
    Retry {
        /// ID of the item to retry
        id: i64,
    },
    /// Retry every failed item with a retriable error
    RetryAll,
    /// Remove old completed items from the queue
    Cleanup {
        /// Remove completed items older than this many days
        #[arg(short, long)]
        days: i32,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Force-reset an item to 'pending' regardless of its current status
    Reset {
        /// ID of the item to reset
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    let pool = queue::connect(&config.database)
        .await
        .context("failed to connect to the queue database")?;
    queue::run_migrations(&pool)
        .await
        .context("failed to apply schema migrations")?;
    let store = QueueStore::new(pool, config.retry.clone());

    match cli.command {
        Command::Status => cmd_status(&store).await,
        Command::List {
            status,
            limit,
            verbose,
        } => cmd_list(&store, status, limit, verbose).await,
        Command::Retry { id } => cmd_retry(&store, id).await,
        Command::RetryAll => cmd_retry_all(&store).await,
        Command::Cleanup { days, yes } => cmd_cleanup(&store, days, yes).await,
        Command::Reset { id } => cmd_reset(&store, id).await,
    }
}

async fn cmd_status(store: &QueueStore) -> anyhow::Result<()> {
    let counts = store.count_by_status().await?;
    let total: i64 = counts.iter().map(|(_, count)| count).sum();

    println!("Queue Status ({total} total)");
    println!("{}", "=".repeat(40));
    if counts.is_empty() {
        println!("  (empty queue)");
        return Ok(());
    }
    for (status, count) in &counts {
        println!("  {:<20} {:>5}", status.as_str(), count);
    }
    println!("{}", "-".repeat(40));
    println!("  {:<20} {:>5}", "total", total);

    if let Some(created_at) = store.oldest_pending().await? {
        let age = Utc::now().signed_duration_since(created_at);
        println!();
        println!("  Oldest pending: {} ago", format_age(age));
    }
    let retryable = store.count_ready_retryable().await?;
    if retryable > 0 {
        println!("  Retryable errors: {retryable}");
    }
    Ok(())
}

async fn cmd_list(
    store: &QueueStore,
    status: Option<ItemStatus>,
    limit: i64,
    verbose: bool,
) -> anyhow::Result<()> {
    let items = match status {
        Some(status) => store.list_by_status(status, limit).await?,
        None => store.list_recent(limit).await?,
    };

    if items.is_empty() {
        match status {
            Some(status) => println!("No items found with status '{status}'."),
            None => println!("No items found."),
        }
        return Ok(());
    }

    println!(
        "{:<6} {:<14} {:<12} {:<20} {:<8} {}",
        "ID", "Status", "Code", "Actress", "Retries", "File"
    );
    println!("{}", "-".repeat(90));
    for item in &items {
        println!("{}", format_row(item));
        if verbose {
            if let Some(error) = &item.error_message {
                println!("       Error: {error}");
            }
        }
    }
    println!();
    println!("{} item(s) shown.", items.len());
    Ok(())
}

async fn cmd_retry(store: &QueueStore, id: i64) -> anyhow::Result<()> {
    let Some(item) = store.get(id).await? else {
        bail!("Item {id} not found.");
    };
    if item.status != ItemStatus::Error {
        bail!(
            "Item {id} has status '{}', not 'error'. Use 'reset' to force.",
            item.status
        );
    }

    store.reset_for_retry(id).await?;
    println!("Item {id} reset to 'pending' for retry.");
    println!("  File: {}", item.file_path);
    Ok(())
}

async fn cmd_retry_all(store: &QueueStore) -> anyhow::Result<()> {
    let ids = store.reset_all_retriable().await?;
    if ids.is_empty() {
        println!("No retriable error items.");
    } else {
        println!("{} item(s) reset to 'pending' for retry.", ids.len());
    }
    Ok(())
}

async fn cmd_cleanup(store: &QueueStore, days: i32, yes: bool) -> anyhow::Result<()> {
    let count = store.count_cleanup_candidates(days).await?;
    if count == 0 {
        println!("No completed items older than {days} days.");
        return Ok(());
    }

    if !yes {
        print!("Delete {count} completed item(s) older than {days} days? [y/N] ");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let deleted = store.cleanup_completed(days).await?;
    println!("Deleted {deleted} completed item(s).");
    Ok(())
}

async fn cmd_reset(store: &QueueStore, id: i64) -> anyhow::Result<()> {
    let Some(item) = store.get(id).await? else {
        bail!("Item {id} not found.");
    };
    if item.status == ItemStatus::Pending {
        println!("Item {id} is already 'pending'.");
        return Ok(());
    }

    store.force_reset(id).await?;
    println!("Item {id} reset from '{}' to 'pending'.", item.status);
    println!("  File: {}", item.file_path);
    Ok(())
}

fn format_row(item: &QueueItem) -> String {
    let mut filename = item.filename().to_string();
    if filename.len() > 40 {
        filename = format!("{}...", truncate_chars(&filename, 37));
    }
    format!(
        "{:<6} {:<14} {:<12} {:<20} {:<8} {}",
        item.id,
        item.status.as_str(),
        item.movie_code.as_deref().unwrap_or("-"),
        item.actress.as_deref().unwrap_or("-"),
        item.retry_count,
        filename
    )
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn format_age(age: chrono::Duration) -> String {
    let total_seconds = age.num_seconds().max(0);
    if total_seconds < 60 {
        return format!("{total_seconds}s");
    }
    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{minutes}m");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h {}m", hours, minutes % 60);
    }
    let days = hours / 24;
    format!("{}d {}h", days, hours % 24)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(chrono::Duration::seconds(42)), "42s");
        assert_eq!(format_age(chrono::Duration::seconds(90)), "1m");
        assert_eq!(format_age(chrono::Duration::minutes(150)), "2h 30m");
        assert_eq!(format_age(chrono::Duration::hours(50)), "2d 2h");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("ab", 3), "ab");
    }
}
