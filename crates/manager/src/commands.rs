use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use hms_backup_client::{RestClient, RestConfig};
use hms_backup_core::{DataStore, RetentionPolicy};
use hms_backup_storage::{
    ActivityLog, BackupRunOutcome, FailureNotifier, LogNotifier, PostgresDataStore,
    RestoreSessionOutcome, Restorer, Scheduler, SelectionProvider, SnapshotRepository,
    SqliteDataStore,
};
use tracing::{error, info, warn};

use crate::cli::BackupLabel;
use crate::config::{DataStoreSettings, Settings};

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;

/// Builds the data-store client the settings describe.
pub async fn connect_store(settings: &DataStoreSettings) -> Result<Arc<dyn DataStore>> {
    let store: Arc<dyn DataStore> = match settings {
        DataStoreSettings::Rest {
            url,
            api_key,
            key_column,
        } => {
            let mut config = RestConfig::new(url.clone(), api_key.clone());
            config.key_column = key_column.clone();
            Arc::new(RestClient::new(config)?)
        }
        DataStoreSettings::Postgres { database_url } => {
            Arc::new(PostgresDataStore::connect(database_url).await?)
        }
        DataStoreSettings::Sqlite { path } => Arc::new(SqliteDataStore::new(path)?),
    };
    info!(source = %store.source_identifier(), "data store ready");
    Ok(store)
}

pub fn build_scheduler(settings: &Settings, store: Arc<dyn DataStore>) -> Result<Scheduler> {
    let repo = SnapshotRepository::new(&settings.root)?;
    Ok(Scheduler::new(
        store,
        repo,
        settings.tables.clone(),
        RetentionPolicy::new(settings.max_snapshots),
        ActivityLog::new(&settings.activity_log),
    )
    .with_page_size(settings.page_size))
}

/// `backup <label>`: one full cycle, including the activity log line when the
/// data store cannot even be reached.
pub async fn run_backup(settings: &Settings, label: BackupLabel) -> u8 {
    let prepared = match connect_store(&settings.data_store).await {
        Ok(store) => build_scheduler(settings, store),
        Err(e) => Err(e),
    };
    match prepared {
        Ok(scheduler) => backup(&scheduler, label).await,
        Err(e) => backup_not_started(&settings.activity_log, label, &e),
    }
}

/// A backup that failed before any table was read: FAILED activity line,
/// operator alert, exit code 1.
pub fn backup_not_started(activity_log: &Path, label: BackupLabel, err: &anyhow::Error) -> u8 {
    let message = format!("{err:#}");
    error!(%label, error = %message, "backup could not start");
    if let Err(e) = ActivityLog::new(activity_log).record_failure(&message) {
        warn!(error = %e, "activity log not updated");
    }
    LogNotifier.notify_failure(label.as_str(), &message);
    eprintln!("backup failed: {message}");
    EXIT_FAILURE
}

pub async fn backup(scheduler: &Scheduler, label: BackupLabel) -> u8 {
    match scheduler.run_scheduled_backup(label.as_str()).await {
        BackupRunOutcome::Succeeded { snapshot, pruned } => {
            println!(
                "backup {} complete: {} records in {} tables ({} failed)",
                snapshot.id,
                snapshot.total_records(),
                snapshot.metadata.tables.len(),
                snapshot.failed_tables()
            );
            for (table, outcome) in snapshot.metadata.tables.iter() {
                if let Some(message) = &outcome.error_message {
                    println!("  {table}: {message}");
                }
            }
            if !pruned.is_empty() {
                println!("removed {} old backups", pruned.len());
            }
            EXIT_OK
        }
        BackupRunOutcome::Failed { error } => {
            eprintln!("backup failed: {error}");
            EXIT_FAILURE
        }
    }
}

/// `backup setup`: crontab lines for the three scheduled labels.
pub fn setup_template(program: &str, config_path: Option<&Path>, settings: &Settings) -> String {
    let config = config_path
        .map(|path| format!(" --config {}", path.display()))
        .unwrap_or_default();
    let output = settings.root.join("cron.log");
    let hour = settings.schedule_hour;
    let line = |schedule: String, label: BackupLabel| {
        format!(
            "{schedule} {program}{config} backup {label} >> {} 2>&1\n",
            output.display()
        )
    };

    let mut template = String::from("# hms-backup schedule, install with `crontab -e`\n");
    template.push_str(&format!("# daily at {hour:02}:00\n"));
    template.push_str(&line(format!("0 {hour} * * *"), BackupLabel::Daily));
    template.push_str(&format!("# weekly on Sunday at {:02}:00\n", (hour + 1) % 24));
    template.push_str(&line(format!("0 {} * * 0", (hour + 1) % 24), BackupLabel::Weekly));
    template.push_str(&format!("# monthly on the 1st at {:02}:00\n", (hour + 2) % 24));
    template.push_str(&line(format!("0 {} 1 * *", (hour + 2) % 24), BackupLabel::Monthly));
    template
}

pub async fn run_restore(settings: &Settings, provider: &mut dyn SelectionProvider) -> u8 {
    let store = match connect_store(&settings.data_store).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("restore failed: {e:#}");
            return EXIT_FAILURE;
        }
    };
    let repo = match SnapshotRepository::new(&settings.root) {
        Ok(repo) => repo,
        Err(e) => {
            eprintln!("restore failed: {e:#}");
            return EXIT_FAILURE;
        }
    };
    restore(store.as_ref(), &repo, settings.batch_size, provider).await
}

pub async fn restore(
    store: &dyn DataStore,
    repo: &SnapshotRepository,
    batch_size: usize,
    provider: &mut dyn SelectionProvider,
) -> u8 {
    let restorer = Restorer::new(store, repo).with_batch_size(batch_size);
    match restorer.restore_interactive(provider).await {
        Ok(RestoreSessionOutcome::Completed(outcome)) => {
            for table in &outcome.tables {
                match &table.error_message {
                    Some(message) => println!(
                        "  {}: FAILED after {} rows: {message}",
                        table.table, table.inserted_count
                    ),
                    None => println!("  {}: {} rows", table.table, table.inserted_count),
                }
            }
            println!(
                "restore complete: {} records restored, {} tables failed",
                outcome.total_restored, outcome.failed_table_count
            );
            EXIT_OK
        }
        Ok(RestoreSessionOutcome::Declined) => {
            println!("restore cancelled");
            EXIT_OK
        }
        Ok(RestoreSessionOutcome::NoSnapshots) => {
            eprintln!("no backups found in {}", repo.root().display());
            EXIT_FAILURE
        }
        Ok(RestoreSessionOutcome::InvalidSelection(answer)) => {
            eprintln!("invalid selection: {answer:?}");
            EXIT_FAILURE
        }
        Err(e) => {
            eprintln!("restore failed: {e:#}");
            EXIT_FAILURE
        }
    }
}
