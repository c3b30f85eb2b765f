use crate::error::Error;
use crate::fingerprint::{self, FileRecord};
use crate::ledger::{self, BackupRecord};
use crate::routing;
use crate::workspace::Workspace;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Default: relocate the source, backed by an undo record.
    Move,
    /// Safe mode: duplicate to the destination, source untouched. Nothing
    /// destructive happens, so no backup record is written.
    Copy,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Move => "move",
            TransferMode::Copy => "copy",
        }
    }
}

#[derive(Debug)]
pub struct TransferOutcome {
    /// Resolved absolute destination (after collision handling).
    pub dest_path: PathBuf,
    pub backed_up: bool,
}

/// Performs the physical move/copy for one run. Callers serialize calls
/// to `apply` under the engine's mutation lock: collision resolution and
/// the backup manifest append must not race between workers.
pub struct FileTransactor<'a> {
    workspace: &'a Workspace,
    run_id: String,
    mode: TransferMode,
}

impl<'a> FileTransactor<'a> {
    pub fn new(workspace: &'a Workspace, run_id: &str, mode: TransferMode) -> FileTransactor<'a> {
        FileTransactor {
            workspace,
            run_id: run_id.to_string(),
            mode,
        }
    }

    /// Relocate `record` to the workspace-relative `dest_rel`.
    ///
    /// Move mode is backup-first: the undo record is durable in the
    /// manifest before the source is touched, the source is renamed into
    /// the hidden trash area, and only then copied to the destination.
    /// At any crash point either the backup exists and the original is
    /// recoverable, or the operation had not started. A failure during
    /// the final copy leaves "backup exists, destination absent", which
    /// run-start recovery resolves.
    pub fn apply(&self, record: &FileRecord, dest_rel: &Path) -> Result<TransferOutcome, Error> {
        let dest = routing::resolve_collision(&self.workspace.root.join(dest_rel));
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        match self.mode {
            TransferMode::Copy => {
                fs::copy(&record.path, &dest)?;
                debug!("Copied {} -> {}", record.path.display(), dest.display());
                Ok(TransferOutcome {
                    dest_path: dest,
                    backed_up: false,
                })
            }
            TransferMode::Move => {
                let backup_path = self.backup_path_for(record);
                if let Some(parent) = backup_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                // The record must be durable before anything destructive.
                let backup_record = BackupRecord {
                    run_id: self.run_id.clone(),
                    original_path: record.path.clone(),
                    backup_path: backup_path.clone(),
                    dest_path: dest.clone(),
                    fingerprint: record.fingerprint.clone(),
                    ts: Utc::now(),
                };
                ledger::append_backup_record(self.workspace, &backup_record)?;

                if let Err(err) = fs::rename(&record.path, &backup_path) {
                    // The move never started; the record must not outlive
                    // it, or every later undo reports a phantom conflict.
                    if let Err(cleanup_err) =
                        ledger::remove_backup_record(self.workspace, &backup_record)
                    {
                        warn!(
                            "Failed to drop backup record for unmoved {}: {}",
                            record.path.display(),
                            cleanup_err
                        );
                    }
                    return Err(err.into());
                }

                if let Err(err) = fs::copy(&backup_path, &dest) {
                    // Roll back to "backup exists, destination absent".
                    if dest.exists() {
                        let _ = fs::remove_file(&dest);
                    }
                    return Err(err.into());
                }

                debug!(
                    "Moved {} -> {} (backup at {})",
                    record.path.display(),
                    dest.display(),
                    backup_path.display()
                );
                Ok(TransferOutcome {
                    dest_path: dest,
                    backed_up: true,
                })
            }
        }
    }

    fn backup_path_for(&self, record: &FileRecord) -> PathBuf {
        let base = self
            .workspace
            .trash_dir
            .join(&self.run_id)
            .join(record.file_name());
        routing::resolve_collision(&base)
    }
}

/// One record that `undo` could not restore.
#[derive(Debug)]
pub struct UndoConflict {
    pub record: BackupRecord,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct UndoReport {
    pub run_id: String,
    pub restored: u64,
    pub conflicts: Vec<UndoConflict>,
    /// True when the run had no backup records left to replay.
    pub nothing_to_undo: bool,
}

/// Replay a run's backup records in reverse, restoring originals.
///
/// Each destination is fingerprint-verified before it is touched: a file
/// the user edited or replaced since the move is reported as a conflict
/// and its record retained, while the rest of the batch continues
/// (partial undo is allowed, silent skips are not). Records whose
/// destination never materialized are incomplete transactions and are
/// restored straight from the backup. Undoing an already-restored run is
/// a no-op.
pub fn undo_run(workspace: &Workspace, run_id: &str) -> Result<UndoReport, Error> {
    let records = ledger::read_backup_records(workspace, run_id)?;
    let mut report = UndoReport {
        run_id: run_id.to_string(),
        ..UndoReport::default()
    };

    if records.is_empty() {
        report.nothing_to_undo = true;
        return Ok(report);
    }

    let mut remaining: Vec<BackupRecord> = Vec::new();

    for record in records.iter().rev() {
        match restore_record(record) {
            Ok(()) => {
                report.restored += 1;
            }
            Err(reason) => {
                warn!(
                    "Undo conflict for {}: {}",
                    record.dest_path.display(),
                    reason
                );
                report.conflicts.push(UndoConflict {
                    record: record.clone(),
                    reason,
                });
                remaining.push(record.clone());
            }
        }
    }

    // Manifest keeps conflicted records (append order) for a later retry.
    remaining.reverse();
    ledger::rewrite_backup_records(workspace, run_id, &remaining)?;

    if remaining.is_empty() {
        let _ = fs::remove_dir(workspace.trash_dir.join(run_id));
        if let Ok(mut run_ledger) = ledger::RunLedger::load(workspace, run_id) {
            run_ledger.undone = true;
            run_ledger.save(workspace)?;
        }
        info!("Run {} fully restored ({} files)", run_id, report.restored);
    }

    Ok(report)
}

fn restore_record(record: &BackupRecord) -> Result<(), String> {
    if record.dest_path.exists() {
        let current = fingerprint::fingerprint_file(&record.dest_path)
            .map_err(|err| format!("cannot read destination: {}", err))?;
        if current != record.fingerprint {
            return Err("destination modified since move (fingerprint mismatch)".to_string());
        }

        if let Some(parent) = record.original_path.parent() {
            fs::create_dir_all(parent).map_err(|err| err.to_string())?;
        }
        fs::rename(&record.dest_path, &record.original_path).map_err(|err| err.to_string())?;
        if record.backup_path.exists() {
            fs::remove_file(&record.backup_path).map_err(|err| err.to_string())?;
        }
        Ok(())
    } else if record.backup_path.exists() {
        // Incomplete transaction: the backup was written but the move to
        // the destination never completed.
        if let Some(parent) = record.original_path.parent() {
            fs::create_dir_all(parent).map_err(|err| err.to_string())?;
        }
        fs::rename(&record.backup_path, &record.original_path).map_err(|err| err.to_string())?;
        Ok(())
    } else {
        Err("both destination and backup are missing".to_string())
    }
}

/// Resolve incomplete transactions left by an interrupted run before a
/// new run proceeds: any record of the most recent run whose backup
/// exists but whose destination does not is restored to its original
/// path. Completed records are left alone.
pub fn recover_incomplete(workspace: &Workspace) -> Result<u64, Error> {
    let mut recovered = 0u64;

    // A crashed run can leave a manifest with no persisted ledger, so
    // recovery walks the manifests themselves.
    for run_id in ledger::list_manifest_run_ids(workspace)? {
        let records = ledger::read_backup_records(workspace, &run_id)?;
        if records.is_empty() {
            continue;
        }

        let mut remaining = Vec::new();
        let mut recovered_here = 0u64;
        for record in records {
            if !record.dest_path.exists() && record.backup_path.exists() {
                if let Some(parent) = record.original_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(&record.backup_path, &record.original_path)?;
                info!(
                    "Recovered incomplete transaction: {} restored",
                    record.original_path.display()
                );
                recovered_here += 1;
            } else {
                remaining.push(record);
            }
        }

        if recovered_here > 0 {
            ledger::rewrite_backup_records(workspace, &run_id, &remaining)?;
            recovered += recovered_here;
        }
    }

    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Workspace) {
        let tmp = tempdir().unwrap();
        let ws = Workspace::new(tmp.path());
        ws.ensure_structure().unwrap();
        (tmp, ws)
    }

    fn inbox_file(ws: &Workspace, name: &str, bytes: &[u8]) -> FileRecord {
        let path = ws.inbox.join(name);
        fs::write(&path, bytes).unwrap();
        FileRecord::from_path(&path).unwrap()
    }

    #[test]
    fn test_copy_mode_leaves_source_untouched() {
        let (_tmp, ws) = setup();
        let record = inbox_file(&ws, "a.pdf", b"contents");
        let transactor = FileTransactor::new(&ws, "run1", TransferMode::Copy);

        let outcome = transactor
            .apply(&record, Path::new("Organized/2024-03/Invoice/a.pdf"))
            .unwrap();

        assert!(record.path.exists());
        assert!(!outcome.backed_up);
        assert_eq!(fs::read(&outcome.dest_path).unwrap(), b"contents");
        assert!(ledger::read_backup_records(&ws, "run1").unwrap().is_empty());
    }

    #[test]
    fn test_move_writes_backup_before_destination() {
        let (_tmp, ws) = setup();
        let record = inbox_file(&ws, "a.pdf", b"contents");
        let transactor = FileTransactor::new(&ws, "run1", TransferMode::Move);

        let outcome = transactor
            .apply(&record, Path::new("Organized/2024-03/Invoice/a.pdf"))
            .unwrap();

        assert!(!record.path.exists());
        assert!(outcome.backed_up);
        assert_eq!(fs::read(&outcome.dest_path).unwrap(), b"contents");

        let records = ledger::read_backup_records(&ws, "run1").unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].backup_path.exists());
        assert_eq!(records[0].original_path, ws.inbox.join("a.pdf"));
        assert_eq!(records[0].fingerprint, record.fingerprint);
    }

    #[test]
    fn test_collision_gets_distinct_name() {
        let (_tmp, ws) = setup();
        let first = inbox_file(&ws, "a.pdf", b"identical");
        let second = inbox_file(&ws, "b.pdf", b"identical");
        let transactor = FileTransactor::new(&ws, "run1", TransferMode::Move);

        let dest_rel = Path::new("Organized/2024-03/Invoice/same.pdf");
        let out1 = transactor.apply(&first, dest_rel).unwrap();
        let out2 = transactor.apply(&second, dest_rel).unwrap();

        assert_ne!(out1.dest_path, out2.dest_path);
        assert!(out1.dest_path.exists());
        assert!(out2.dest_path.exists());
    }

    #[test]
    fn test_failed_move_leaves_no_backup_record() {
        let (_tmp, ws) = setup();
        let record = inbox_file(&ws, "a.pdf", b"contents");
        // Source vanishes between fingerprinting and the organize phase.
        fs::remove_file(&record.path).unwrap();
        let transactor = FileTransactor::new(&ws, "run1", TransferMode::Move);

        let result = transactor.apply(&record, Path::new("Organized/2024-03/Invoice/a.pdf"));
        assert!(result.is_err());

        // No move happened, so no record may survive: undo has nothing to
        // replay and reports no conflicts.
        assert!(ledger::read_backup_records(&ws, "run1").unwrap().is_empty());
        let report = undo_run(&ws, "run1").unwrap();
        assert!(report.nothing_to_undo);
        assert!(report.conflicts.is_empty());
    }

    #[test]
    fn test_undo_restores_originals_in_reverse() {
        let (_tmp, ws) = setup();
        let a = inbox_file(&ws, "a.pdf", b"aaa");
        let b = inbox_file(&ws, "b.pdf", b"bbb");
        let transactor = FileTransactor::new(&ws, "run1", TransferMode::Move);
        transactor
            .apply(&a, Path::new("Organized/2024-01/Receipt/a.pdf"))
            .unwrap();
        transactor
            .apply(&b, Path::new("Organized/2024-02/Receipt/b.pdf"))
            .unwrap();

        let report = undo_run(&ws, "run1").unwrap();
        assert_eq!(report.restored, 2);
        assert!(report.conflicts.is_empty());
        assert_eq!(fs::read(ws.inbox.join("a.pdf")).unwrap(), b"aaa");
        assert_eq!(fs::read(ws.inbox.join("b.pdf")).unwrap(), b"bbb");
        assert!(!ws.organized.join("2024-01/Receipt/a.pdf").exists());

        // Idempotent: nothing left to undo.
        let again = undo_run(&ws, "run1").unwrap();
        assert!(again.nothing_to_undo);
    }

    #[test]
    fn test_undo_reports_conflict_for_edited_destination() {
        let (_tmp, ws) = setup();
        let a = inbox_file(&ws, "a.pdf", b"aaa");
        let b = inbox_file(&ws, "b.pdf", b"bbb");
        let transactor = FileTransactor::new(&ws, "run1", TransferMode::Move);
        let out_a = transactor
            .apply(&a, Path::new("Organized/2024-01/Receipt/a.pdf"))
            .unwrap();
        transactor
            .apply(&b, Path::new("Organized/2024-02/Receipt/b.pdf"))
            .unwrap();

        // User edits one archived file after the run.
        fs::write(&out_a.dest_path, b"edited by user").unwrap();

        let report = undo_run(&ws, "run1").unwrap();
        assert_eq!(report.restored, 1);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].record.original_path, ws.inbox.join("a.pdf"));

        // The conflicted record stays in the manifest; the edited file is
        // left where the user put it.
        assert_eq!(ledger::read_backup_records(&ws, "run1").unwrap().len(), 1);
        assert_eq!(fs::read(&out_a.dest_path).unwrap(), b"edited by user");
        assert!(ws.inbox.join("b.pdf").exists());
        assert!(!ws.inbox.join("a.pdf").exists());
    }

    #[test]
    fn test_recover_incomplete_transaction() {
        let (_tmp, ws) = setup();
        let a = inbox_file(&ws, "a.pdf", b"aaa");
        let transactor = FileTransactor::new(&ws, "run1", TransferMode::Move);
        let outcome = transactor
            .apply(&a, Path::new("Organized/2024-01/Receipt/a.pdf"))
            .unwrap();

        // Simulate a crash between backup rename and destination copy.
        fs::remove_file(&outcome.dest_path).unwrap();
        let mut ledger_file = ledger::RunLedger::start("move");
        ledger_file.run_id = "run1".to_string();
        ledger_file.save(&ws).unwrap();

        let recovered = recover_incomplete(&ws).unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(fs::read(ws.inbox.join("a.pdf")).unwrap(), b"aaa");
        assert!(ledger::read_backup_records(&ws, "run1").unwrap().is_empty());
    }
}
