//! `stsync` - CLI for stationsync
//!
//! This binary checks value-flag entries, previews data-entry forms against
//! the remote API or the local cache, and drains the offline sync queue.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use stationsync::cli::{
    CacheCommand, CheckCommand, Cli, Command, ConfigCommand, DeleteCommand, FormCommand,
    OutputFormat, RestoreCommand, SyncCommand,
};
use stationsync::codec::check_entry;
use stationsync::form::{FormDefinition, FormEntry, FormSlot, SlotLayout};
use stationsync::metadata::MetadataBundle;
use stationsync::observation::{format_datetime, CacheEntry, ObservationRecord};
use stationsync::remote::{HttpTransport, ObservationTransport};
use stationsync::storage::{self, CacheStore, SharedStore};
use stationsync::{init_logging, Config, ObservationService, SyncEngine, SyncOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    // Execute the command
    match cli.command {
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Sync(cmd) => handle_sync(&config, &cmd).await,
        Command::Check(cmd) => handle_check(&cmd),
        Command::Form(cmd) => handle_form(&config, &cmd).await,
        Command::Delete(cmd) => handle_delete(&config, &cmd).await,
        Command::Restore(cmd) => handle_restore(&config, &cmd).await,
        Command::Cache(cmd) => handle_cache(&config, cmd),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn open_store(config: &Config) -> anyhow::Result<SharedStore> {
    let path = config.database_path();
    let store = CacheStore::open(&path)
        .with_context(|| format!("failed to open cache at {}", path.display()))?;
    Ok(store.into_shared())
}

fn transport(config: &Config) -> anyhow::Result<Arc<dyn ObservationTransport>> {
    let transport = HttpTransport::new(&config.remote.base_url, config.request_timeout())?;
    Ok(Arc::new(transport))
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let stats = storage::lock(&store)?.stats()?;

    if json {
        let status = serde_json::json!({
            "database_path": config.database_path(),
            "remote": config.remote.base_url,
            "cache": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("stsync status");
        println!("-------------");
        println!("Database:        {}", config.database_path().display());
        println!("Remote:          {}", config.remote.base_url);
        println!("Cached:          {}", stats.total);
        println!("  Unsynced:      {}", stats.unsynced);
        println!("  Synced:        {}", stats.synced);
        println!("  Rejected:      {}", stats.rejected);
        if let Some(oldest) = stats.oldest_unsynced {
            println!("Oldest unsynced: {}", format_datetime(&oldest));
        }
        println!("Database size:   {} bytes", stats.db_size_bytes);
    }
    Ok(())
}

async fn handle_sync(config: &Config, cmd: &SyncCommand) -> anyhow::Result<()> {
    let batch_size = cmd.batch_size.unwrap_or(config.sync.batch_size);
    let engine = SyncEngine::new(open_store(config)?, transport(config)?, batch_size);
    engine.subscribe(|count: usize| info!("{count} observations waiting to sync"));

    let outcome = engine.sync().await?;

    if cmd.json {
        let value = match &outcome {
            SyncOutcome::AlreadySyncing => serde_json::json!({ "status": "already_syncing" }),
            SyncOutcome::Drained { pushed, batches } => {
                serde_json::json!({ "status": "drained", "pushed": pushed, "batches": batches })
            }
            SyncOutcome::Failed { pushed, error } => {
                serde_json::json!({ "status": "failed", "pushed": pushed, "error": error.to_string() })
            }
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        match &outcome {
            SyncOutcome::AlreadySyncing => println!("A sync is already running."),
            SyncOutcome::Drained { pushed, batches } => {
                println!("Pushed {pushed} observations in {batches} requests. Queue is empty.");
            }
            SyncOutcome::Failed { pushed, error } => {
                println!("Pushed {pushed} observations before the sync stopped: {error}");
            }
        }
    }

    if let SyncOutcome::Failed { error, .. } = outcome {
        if !error.is_network() {
            bail!("sync rejected by server: {error}");
        }
    }
    Ok(())
}

fn handle_check(cmd: &CheckCommand) -> anyhow::Result<()> {
    let scale = cmd.entry_scale();
    let threshold = cmd.threshold();
    let validation = check_entry(&cmd.token, scale, !cmd.no_missing, threshold.as_ref());

    let errors: Vec<String> = validation.errors.iter().map(ToString::to_string).collect();
    let warnings: Vec<String> = validation
        .warnings
        .iter()
        .map(|w| w.message(scale))
        .collect();

    if cmd.json {
        let value = serde_json::json!({
            "token": cmd.token,
            "valid": validation.is_valid(),
            "value": validation.value,
            "flag": validation.flag,
            "errors": errors,
            "warnings": warnings,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let value = validation
            .value
            .map_or_else(|| "-".to_string(), |v| v.to_string());
        let flag = validation
            .flag
            .map_or_else(|| "-".to_string(), |f| f.to_string());
        println!("Value: {value}");
        println!("Flag:  {flag}");
        for error in &errors {
            println!("Error:   {error}");
        }
        for warning in &warnings {
            println!("Warning: {warning}");
        }
    }

    if !validation.is_valid() {
        bail!("token {:?} is not a valid entry", cmd.token);
    }
    Ok(())
}

async fn handle_form(config: &Config, cmd: &FormCommand) -> anyhow::Result<()> {
    let bundle = MetadataBundle::from_json_file(&cmd.metadata)
        .with_context(|| format!("failed to read metadata from {}", cmd.metadata.display()))?;
    let definition = FormDefinition::new(bundle, cmd.selection())?;
    let store = open_store(config)?;

    let layout = if cmd.offline {
        let query = definition.observation_query()?;
        let records: Vec<ObservationRecord> = storage::lock(&store)?
            .find_for_query(&query)?
            .into_iter()
            .map(CacheEntry::into_record)
            .collect();
        definition.build_slots(&records)?
    } else {
        let transport = transport(config)?;
        let engine = Arc::new(SyncEngine::new(
            store,
            Arc::clone(&transport),
            config.sync.batch_size,
        ));
        if config.sync.sync_on_startup {
            match engine.sync().await {
                Ok(outcome) => info!("Startup sync: {outcome:?}"),
                Err(e) => warn!("Startup sync failed: {e}"),
            }
        }
        let service = ObservationService::new(engine, transport, config.sync.sync_after_save);
        FormEntry::load(definition, &service).await?.layout().clone()
    };

    print_layout(&layout, cmd.format)
}

fn service(config: &Config) -> anyhow::Result<ObservationService> {
    let transport = transport(config)?;
    let engine = Arc::new(SyncEngine::new(
        open_store(config)?,
        Arc::clone(&transport),
        config.sync.batch_size,
    ));
    Ok(ObservationService::new(engine, transport, config.sync.sync_after_save))
}

async fn handle_delete(config: &Config, cmd: &DeleteCommand) -> anyhow::Result<()> {
    let key = cmd.key.key();
    let service = service(config)?;
    let deleted = if cmd.hard {
        service.hard_delete(std::slice::from_ref(&key)).await?
    } else {
        service.soft_delete(std::slice::from_ref(&key)).await?
    };

    let mode = if cmd.hard { "hard" } else { "soft" };
    if cmd.json {
        let value = serde_json::json!({ "key": key, "mode": mode, "deleted": deleted });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if deleted == 0 {
        println!("No observation matched {key}.");
    } else {
        println!("Deleted ({mode}) {key}.");
    }
    Ok(())
}

async fn handle_restore(config: &Config, cmd: &RestoreCommand) -> anyhow::Result<()> {
    let key = cmd.key.key();
    let restored = service(config)?.restore(std::slice::from_ref(&key)).await?;

    if cmd.json {
        let value = serde_json::json!({ "key": key, "restored": restored });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if restored == 0 {
        println!("No deleted observation matched {key}.");
    } else {
        println!("Restored {key}.");
    }
    Ok(())
}

fn print_layout(layout: &SlotLayout, format: OutputFormat) -> anyhow::Result<()> {
    let slot_json = |slot: &FormSlot| {
        serde_json::json!({
            "key": slot.key(),
            "token": slot.token(),
            "exists": slot.exists(),
            "comment": slot.record().comment,
        })
    };

    match (layout, format) {
        (SlotLayout::Linear { fields, slots }, OutputFormat::Json) => {
            let rows: Vec<_> = fields
                .iter()
                .zip(slots)
                .map(|(field, slot)| serde_json::json!({ "field": field, "slot": slot_json(slot) }))
                .collect();
            let total = FormSlot::total_of(slots);
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "slots": rows, "total": total }))?
            );
        }
        (SlotLayout::Grid { rows, columns, slots }, OutputFormat::Json) => {
            let cells: Vec<Vec<_>> = slots
                .iter()
                .map(|row| row.iter().map(&slot_json).collect())
                .collect();
            let value = serde_json::json!({ "rows": rows, "columns": columns, "slots": cells });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        (SlotLayout::Linear { fields, slots }, _) => {
            for (field, slot) in fields.iter().zip(slots) {
                let marker = if slot.exists() { "*" } else { " " };
                println!(
                    "{:>8} {marker} {:<8} {}",
                    field.label,
                    slot.token(),
                    format_datetime(&slot.record().datetime)
                );
            }
            if let Some(total) = FormSlot::total_of(slots) {
                println!("{:>8}   {total}", "Total");
            }
        }
        (SlotLayout::Grid { rows, columns, slots }, _) => {
            let header: Vec<String> = columns.iter().map(|c| format!("{:>8}", c.label)).collect();
            println!("{:>8} {}", "", header.join(" "));
            for (row, cells) in rows.iter().zip(slots) {
                let tokens: Vec<String> = cells.iter().map(|s| format!("{:>8}", s.token())).collect();
                println!("{:>8} {}", row.label, tokens.join(" "));
            }
        }
    }
    Ok(())
}

fn handle_cache(config: &Config, cmd: CacheCommand) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let store = storage::lock(&store)?;

    match cmd {
        CacheCommand::List {
            state,
            limit,
            format,
        } => {
            let entries = store.list(state.map(Into::into), limit)?;
            if format == OutputFormat::Json {
                let value: Vec<_> = entries
                    .iter()
                    .map(|entry| {
                        serde_json::json!({
                            "record": entry.record(),
                            "syncState": entry.sync_state(),
                            "entryDatetime": entry.entry_datetime(),
                            "serverErrorMessage": entry.server_error_message(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else if entries.is_empty() {
                println!("No cached observations.");
            } else {
                for entry in &entries {
                    println!("{} {:<8} {}", entry.sync_state(), token_of(entry.record()), entry.record().key());
                    if let Some(message) = entry.server_error_message() {
                        println!("    rejected: {message}");
                    }
                }
            }
        }
        CacheCommand::Clear { yes } => {
            let unsynced = store.count_where(stationsync::SyncState::Unsynced)?;
            if !yes {
                println!("This deletes every cached observation ({unsynced} not yet synced).");
                println!("Use --yes to confirm.");
                return Ok(());
            }
            let removed = store.clear_all()?;
            println!("Removed {removed} cached observations.");
        }
    }
    Ok(())
}

fn token_of(record: &ObservationRecord) -> String {
    let value = record.value.map(|v| v.to_string()).unwrap_or_default();
    let flag = record.flag.map(|f| f.letter().to_string()).unwrap_or_default();
    format!("{value}{flag}")
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:    {}", config.database_path().display());
                println!();
                println!("[Sync]");
                println!("  Batch size:       {}", config.sync.batch_size);
                println!("  Sync on startup:  {}", config.sync.sync_on_startup);
                println!("  Sync after save:  {}", config.sync.sync_after_save);
                println!();
                println!("[Remote]");
                println!("  Base URL:         {}", config.remote.base_url);
                println!("  Timeout (secs):   {}", config.remote.request_timeout_secs);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
