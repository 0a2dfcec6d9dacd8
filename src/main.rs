use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use temporal_sync::clock::{Clock, SystemClock};
use temporal_sync::config::SyncConfig;
use temporal_sync::fixture::{
    check_category_name, CategoryFixture, Fixture, FixtureCategory, FixtureContent,
};
use temporal_sync::runtime::SyncTask;
use temporal_sync::store::{all_rows, MemoryStore, TemporalStore, Version};
use temporal_sync::tracker::{MemoryTrackerStore, TrackerStore};
use temporal_sync::types::{AccountId, Timestamp, OPEN};

type FixtureStore = MemoryStore<String, FixtureContent>;

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run fixture-described categories against the persisted state.
    Sync {
        #[arg(long)]
        fixture: PathBuf,
        #[arg(long)]
        state: PathBuf,
        #[arg(long)]
        account: u64,
        /// Only this category (default: every category, in fixture order).
        #[arg(long)]
        category: Option<String>,
    },
    /// Print the rows of a category valid at a point in time.
    AsOf {
        #[arg(long)]
        state: PathBuf,
        #[arg(long)]
        account: u64,
        #[arg(long)]
        category: String,
        /// Epoch milliseconds (default: now).
        #[arg(long)]
        at: Option<Timestamp>,
    },
    /// Print every stored version of one key.
    History {
        #[arg(long)]
        state: PathBuf,
        #[arg(long)]
        account: u64,
        #[arg(long)]
        category: String,
        #[arg(long)]
        key: String,
    },
    /// Print finished trackers and the next scheduled attempt.
    Trackers {
        #[arg(long)]
        state: PathBuf,
        #[arg(long)]
        account: u64,
        #[arg(long)]
        category: String,
    },
}

fn store_path(state: &Path, category: &str) -> Result<PathBuf> {
    check_category_name(category)?;
    Ok(state.join(format!("{category}.store.json")))
}

fn trackers_path(state: &Path) -> PathBuf {
    state.join("trackers.json")
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Sync {
            fixture,
            state,
            account,
            category,
        } => run_sync(&fixture, &state, AccountId(account), category.as_deref()).await,
        Command::AsOf {
            state,
            account,
            category,
            at,
        } => print_as_of(&state, AccountId(account), &category, at),
        Command::History {
            state,
            account,
            category,
            key,
        } => print_history(&state, AccountId(account), &category, &key),
        Command::Trackers {
            state,
            account,
            category,
        } => print_trackers(&state, AccountId(account), &category),
    }
}

async fn run_sync(
    fixture_path: &Path,
    state: &Path,
    account: AccountId,
    only: Option<&str>,
) -> Result<()> {
    let fixture = Fixture::load(fixture_path)?;
    std::fs::create_dir_all(state)
        .with_context(|| format!("create state dir {}", state.display()))?;
    let config = SyncConfig::load(state.join("config.json"))?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let trackers = Arc::new(MemoryTrackerStore::load(trackers_path(state))?);

    let selected: Vec<&CategoryFixture> = match only {
        Some(name) => match fixture.category(name) {
            Some(category) => vec![category],
            None => bail!("fixture has no category {name}"),
        },
        None => fixture.categories.iter().collect(),
    };

    log::info!("[CLI] {account}: syncing {} categories", selected.len());
    for declared in selected {
        let path = store_path(state, &declared.name)?;
        let store = Arc::new(FixtureStore::load(&path)?);
        let client = declared.client(clock.now());
        let task = SyncTask::new(
            FixtureCategory::from(declared),
            Arc::new(client),
            store.clone(),
            trackers.clone(),
            Arc::clone(&clock),
            config.clone(),
        );

        let report = task.run(account).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        store.save(&path)?;
        // Persist after every category so a later storage failure keeps
        // earlier trackers.
        trackers.save(trackers_path(state))?;
    }
    Ok(())
}

fn print_version(row: &Version<String, FixtureContent>) -> Result<()> {
    let end = if row.life_end == OPEN {
        "open".to_string()
    } else {
        row.life_end.to_string()
    };
    let container = row
        .content
        .container
        .parent()
        .map(String::as_str)
        .unwrap_or("TOP_LEVEL");
    println!(
        "{:<24} [{}, {})  in {:<16} {}",
        row.key,
        row.life_start,
        end,
        container,
        serde_json::to_string(&row.content.content)?
    );
    Ok(())
}

fn print_as_of(
    state: &Path,
    account: AccountId,
    category: &str,
    at: Option<Timestamp>,
) -> Result<()> {
    let config = SyncConfig::load(state.join("config.json"))?;
    let store = FixtureStore::load(store_path(state, category)?)?;
    let at = at.unwrap_or_else(|| SystemClock.now());

    let rows =
        store.list_all_as_of(account, at, &all_rows::<String, FixtureContent>, config.page_size)?;
    println!("{account} {category} as of {at}: {} rows", rows.len());
    for row in &rows {
        print_version(row)?;
    }
    Ok(())
}

fn print_history(state: &Path, account: AccountId, category: &str, key: &str) -> Result<()> {
    let store = FixtureStore::load(store_path(state, category)?)?;
    let versions = store.history(account, &key.to_string())?;
    if versions.is_empty() {
        bail!("{account} {category}: no versions for key {key}");
    }
    for row in &versions {
        print_version(row)?;
    }
    Ok(())
}

fn print_trackers(state: &Path, account: AccountId, category: &str) -> Result<()> {
    let trackers = MemoryTrackerStore::load(trackers_path(state))?;
    for record in trackers.history(account, category)? {
        println!(
            "scheduled={} started={:?} finished={:?} {:?} {}",
            record.scheduled_at,
            record.started_at,
            record.finished_at,
            record.status,
            record.detail.as_deref().unwrap_or("")
        );
    }
    match trackers.unfinished(account, category)? {
        Some(next) => println!("next attempt at {}", next.scheduled_at),
        None => println!("never run"),
    }
    Ok(())
}
