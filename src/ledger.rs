use crate::error::Error;
use crate::workspace::Workspace;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use tracing::debug;

/// One entry in the undo ledger. Written (and fsynced) before the
/// physical move it describes, WAL style: at any crash point either the
/// backup exists and the original is recoverable, or the move had not
/// started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub run_id: String,
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub dest_path: PathBuf,
    /// Content fingerprint at move time, verified again at restore time.
    pub fingerprint: String,
    pub ts: DateTime<Utc>,
}

/// Process-wide record of one `run` invocation. Threaded through the
/// pipeline explicitly rather than held as ambient global state, and
/// persisted at run end (success or caught failure) so `status` and
/// `undo` can read it later.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunLedger {
    pub run_id: String,
    pub mode: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files_seen: u64,
    pub archived: u64,
    pub reviewed: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub token_cost: u64,
    pub backup_count: u64,
    #[serde(default)]
    pub undone: bool,
}

impl RunLedger {
    pub fn start(mode: &str) -> RunLedger {
        RunLedger {
            run_id: new_run_id(),
            mode: mode.to_string(),
            started_at: Some(Utc::now()),
            ..RunLedger::default()
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn save(&self, workspace: &Workspace) -> Result<(), Error> {
        fs::create_dir_all(&workspace.runs_dir)?;
        let path = ledger_path(workspace, &self.run_id);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        debug!("Run ledger persisted to {}", path.display());
        Ok(())
    }

    pub fn load(workspace: &Workspace, run_id: &str) -> Result<RunLedger, Error> {
        let path = ledger_path(workspace, run_id);
        let data = fs::read_to_string(&path)
            .map_err(|err| Error::Ledger(format!("Cannot read run {}: {}", run_id, err)))?;
        serde_json::from_str(&data)
            .map_err(|err| Error::Ledger(format!("Corrupted run ledger {}: {}", run_id, err)))
    }
}

/// Run ids follow the original `YYYYMMDD_HHMMSS` format, which also makes
/// them sort chronologically.
fn new_run_id() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

fn ledger_path(workspace: &Workspace, run_id: &str) -> PathBuf {
    workspace.runs_dir.join(format!("{}.json", run_id))
}

fn manifest_path(workspace: &Workspace, run_id: &str) -> PathBuf {
    workspace.runs_dir.join(format!("{}.backups.jsonl", run_id))
}

/// Append one backup record to the run's manifest and flush it to disk
/// before returning. Append-only: records are removed only by `undo`.
pub fn append_backup_record(workspace: &Workspace, record: &BackupRecord) -> Result<(), Error> {
    fs::create_dir_all(&workspace.runs_dir)?;
    let path = manifest_path(workspace, &record.run_id);
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    let line = serde_json::to_string(record)?;
    writeln!(file, "{}", line)?;
    file.sync_all()?;
    Ok(())
}

/// All backup records of a run, in append order. A manifest that fails to
/// parse is a corrupted-ledger error (fatal for undo, never silently
/// skipped).
pub fn read_backup_records(
    workspace: &Workspace,
    run_id: &str,
) -> Result<Vec<BackupRecord>, Error> {
    let path = manifest_path(workspace, run_id);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(&path)?;
    let mut records = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: BackupRecord = serde_json::from_str(&line).map_err(|err| {
            Error::Ledger(format!(
                "Corrupted backup manifest {} line {}: {}",
                path.display(),
                line_no + 1,
                err
            ))
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Rewrite the manifest with the records that remain after a (possibly
/// partial) undo. An empty remainder deletes the manifest file.
pub fn rewrite_backup_records(
    workspace: &Workspace,
    run_id: &str,
    remaining: &[BackupRecord],
) -> Result<(), Error> {
    let path = manifest_path(workspace, run_id);
    if remaining.is_empty() {
        if path.exists() {
            fs::remove_file(&path)?;
        }
        return Ok(());
    }

    let mut file = File::create(&path)?;
    for record in remaining {
        writeln!(file, "{}", serde_json::to_string(record)?)?;
    }
    file.sync_all()?;
    Ok(())
}

/// Drop one record (the most recently appended match) from the run's
/// manifest. Compensation for a move that failed before the source was
/// touched; such a record describes no destructive action and must not
/// surface in undo.
pub fn remove_backup_record(workspace: &Workspace, record: &BackupRecord) -> Result<(), Error> {
    let mut records = read_backup_records(workspace, &record.run_id)?;
    if let Some(pos) = records.iter().rposition(|r| r == record) {
        records.remove(pos);
        rewrite_backup_records(workspace, &record.run_id, &records)?;
    }
    Ok(())
}

/// Run ids with a persisted ledger, sorted ascending (oldest first).
pub fn list_run_ids(workspace: &Workspace) -> Result<Vec<String>, Error> {
    let mut ids = Vec::new();
    if !workspace.runs_dir.exists() {
        return Ok(ids);
    }
    for entry in fs::read_dir(&workspace.runs_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(id) = name.strip_suffix(".json") {
            ids.push(id.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

pub fn latest_run_id(workspace: &Workspace) -> Result<Option<String>, Error> {
    Ok(list_run_ids(workspace)?.pop())
}

/// Disambiguate a run id against ledgers and manifests already on disk.
/// Two runs started within the same wall-clock second must not share
/// state.
pub fn unique_run_id(workspace: &Workspace, base: &str) -> String {
    let mut candidate = base.to_string();
    let mut n = 1;
    while ledger_path(workspace, &candidate).exists()
        || manifest_path(workspace, &candidate).exists()
    {
        n += 1;
        candidate = format!("{}_{}", base, n);
    }
    candidate
}

/// Run ids that still have a backup manifest on disk, sorted ascending.
/// A crashed run may have a manifest without a persisted ledger, so this
/// is the authoritative list for recovery and undo.
pub fn list_manifest_run_ids(workspace: &Workspace) -> Result<Vec<String>, Error> {
    let mut ids = Vec::new();
    if !workspace.runs_dir.exists() {
        return Ok(ids);
    }
    for entry in fs::read_dir(&workspace.runs_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(id) = name.strip_suffix(".backups.jsonl") {
            ids.push(id.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

/// Workspace-wide aggregate over all persisted runs, for `status`.
#[derive(Debug, Default)]
pub struct StatusSummary {
    pub total_runs: u64,
    pub total_files: u64,
    pub total_archived: u64,
    pub total_reviewed: u64,
    pub total_token_cost: u64,
    pub latest: Option<RunLedger>,
}

pub fn status_summary(workspace: &Workspace) -> Result<StatusSummary, Error> {
    let mut summary = StatusSummary::default();
    for run_id in list_run_ids(workspace)? {
        let ledger = RunLedger::load(workspace, &run_id)?;
        summary.total_runs += 1;
        summary.total_files += ledger.files_seen;
        summary.total_archived += ledger.archived;
        summary.total_reviewed += ledger.reviewed;
        summary.total_token_cost += ledger.token_cost;
        summary.latest = Some(ledger);
    }
    Ok(summary)
}
