use crate::cache::ClassificationCache;
use crate::classify::{mime_hint_for_extension, ClassificationResult, Classifier};
use crate::config::AppConfig;
use crate::error::Error;
use crate::fingerprint::{self, FileRecord};
use crate::ledger::RunLedger;
use crate::progress::ProgressReporter;
use crate::report::{FlushedReports, ReportAggregator, ReportRow};
use crate::routing::{self, Outcome, ReviewReason};
use crate::transact::{FileTransactor, TransferMode};
use crate::workspace::Workspace;
use dashmap::DashMap;
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How one distinct content fingerprint was resolved during the classify
/// phase. Shared by every file carrying those bytes.
enum Resolved {
    Classified {
        result: ClassificationResult,
        from_cache: bool,
    },
    Failed(ReviewReason),
}

#[derive(Debug)]
pub struct RunSummary {
    pub scan_duration: Duration,
    pub classify_duration: Duration,
    pub organize_duration: Duration,
    pub report_duration: Duration,
    pub recovered_transactions: u64,
    pub ledger: RunLedger,
    pub reports: FlushedReports,
}

pub struct Engine<'a> {
    workspace: &'a Workspace,
    config: &'a AppConfig,
    classifier: &'a dyn Classifier,
    cache: &'a ClassificationCache,
}

impl<'a> Engine<'a> {
    pub fn new(
        workspace: &'a Workspace,
        config: &'a AppConfig,
        classifier: &'a dyn Classifier,
        cache: &'a ClassificationCache,
    ) -> Engine<'a> {
        Engine {
            workspace,
            config,
            classifier,
            cache,
        }
    }

    /// Run the full pipeline:
    /// 1. Shallow inbox scan
    /// 2. Parallel fingerprinting (group files by content)
    /// 3. Classification per distinct fingerprint: cache hit short-circuits
    ///    the classifier, misses are bounded by the concurrency limit
    /// 4. Route + transact, serialized (single mutation critical section)
    /// 5. Flush reports, persist the run ledger
    pub fn run(
        &self,
        mode: TransferMode,
        dev: bool,
        reporter: &dyn ProgressReporter,
    ) -> Result<RunSummary, Error> {
        self.workspace.ensure_structure()?;

        let mut ledger = RunLedger::start(mode.as_str());
        ledger.run_id = crate::ledger::unique_run_id(self.workspace, &ledger.run_id);
        let run_id = ledger.run_id.clone();
        let _lock = self.workspace.acquire_run_lock(&run_id)?;

        // Interrupted prior runs leave "backup exists, destination absent"
        // entries; resolve them before mutating anything new.
        let recovered_transactions = crate::transact::recover_incomplete(self.workspace)?;
        if recovered_transactions > 0 {
            info!(
                "Recovered {} incomplete transaction(s) from a prior run",
                recovered_transactions
            );
        }

        info!("Run {} starting in {}", run_id, self.workspace.root.display());

        // Phase 1: scan
        reporter.on_scan_start();
        let scan_start = Instant::now();
        let scan_target = if self.workspace.inbox.is_dir() {
            self.workspace.inbox.clone()
        } else {
            self.workspace.root.clone()
        };
        let paths = crate::scan::scan_inbox(&scan_target, self.config)?;
        let scan_duration = scan_start.elapsed();
        ledger.files_seen = paths.len() as u64;
        reporter.on_scan_complete(paths.len());
        debug!(
            "Scan completed in {:.2}s - {} files",
            scan_duration.as_secs_f64(),
            paths.len()
        );

        // Phase 2 + 3: fingerprint and classify
        reporter.on_classify_start(paths.len());
        let classify_start = Instant::now();
        let (records, unreadable, resolved) = self.fingerprint_and_classify(&paths, reporter)?;
        let classify_duration = classify_start.elapsed();

        let (hits, misses, fresh_tokens) = tally_resolved(&resolved);
        ledger.cache_hits = hits;
        ledger.cache_misses = misses;
        ledger.token_cost = fresh_tokens;
        reporter.on_classify_complete(hits, misses);
        debug!(
            "Classification completed in {:.2}s - {} distinct fingerprints, {} cache hits",
            classify_duration.as_secs_f64(),
            resolved.len(),
            hits
        );

        // Phase 4: route + transact, serialized in stable path order.
        let organize_start = Instant::now();
        let mut aggregator = ReportAggregator::new();
        let transactor = FileTransactor::new(self.workspace, &run_id, mode);

        for record in unreadable {
            ledger.reviewed += 1;
            aggregator.record(ReportRow::reviewed(
                &record,
                None,
                "unknown",
                ReviewReason::Unreadable,
                None,
            ));
        }

        for record in &records {
            self.organize_one(record, &resolved, &transactor, &mut ledger, &mut aggregator);
        }
        let organize_duration = organize_start.elapsed();
        ledger.backup_count = crate::ledger::read_backup_records(self.workspace, &run_id)?
            .len() as u64;

        // Phase 5: reports + ledger persistence
        reporter.on_report_start();
        let report_start = Instant::now();
        let reports = aggregator.flush(self.workspace, dev)?;
        ledger.finish();
        ledger.save(self.workspace)?;
        let report_duration = report_start.elapsed();
        reporter.on_report_complete();

        info!(
            "Run {} finished: {} archived, {} reviewed, {} failures",
            run_id, ledger.archived, ledger.reviewed, ledger.failures
        );

        Ok(RunSummary {
            scan_duration,
            classify_duration,
            organize_duration,
            report_duration,
            recovered_transactions,
            ledger,
            reports,
        })
    }

    /// Fingerprint every scanned path and resolve one classification per
    /// distinct fingerprint. Identical bytes never trigger a second
    /// classifier call, within a run or across runs.
    #[allow(clippy::type_complexity)]
    fn fingerprint_and_classify(
        &self,
        paths: &[PathBuf],
        reporter: &dyn ProgressReporter,
    ) -> Result<(Vec<FileRecord>, Vec<FileRecord>, DashMap<String, Resolved>), Error> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.concurrency.max(1))
            .build()
            .map_err(|err| Error::Other(format!("Failed to build worker pool: {}", err)))?;

        let by_fingerprint: DashMap<String, Vec<FileRecord>> = DashMap::new();
        let unreadable_map: DashMap<PathBuf, ()> = DashMap::new();
        let done = AtomicUsize::new(0);

        pool.install(|| {
            paths.par_iter().for_each(|path| {
                match FileRecord::from_path(path) {
                    Ok(record) => {
                        by_fingerprint
                            .entry(record.fingerprint.clone())
                            .or_default()
                            .push(record);
                    }
                    Err(err) => {
                        warn!("Unreadable file {}: {}", path.display(), err);
                        unreadable_map.insert(path.clone(), ());
                    }
                }
                reporter.on_file_done(done.fetch_add(1, Ordering::Relaxed) + 1, paths.len());
            });
        });

        let resolved: DashMap<String, Resolved> = DashMap::new();
        let groups: Vec<_> = by_fingerprint.iter().collect();
        pool.install(|| {
            groups.par_iter().for_each(|group| {
                let fingerprint = group.key();
                let representative = &group.value()[0];
                resolved.insert(
                    fingerprint.clone(),
                    self.resolve_fingerprint(fingerprint, representative),
                );
            });
        });
        drop(groups);

        let mut records: Vec<FileRecord> = by_fingerprint
            .into_iter()
            .flat_map(|(_, group)| group)
            .collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));

        let unreadable: Vec<FileRecord> = unreadable_map
            .into_iter()
            .map(|(path, _)| {
                let extension = path
                    .extension()
                    .and_then(|s| s.to_str())
                    .map(|s| s.to_ascii_lowercase())
                    .unwrap_or_default();
                FileRecord {
                    path,
                    fingerprint: String::new(),
                    size: 0,
                    extension,
                }
            })
            .collect();

        Ok((records, unreadable, resolved))
    }

    /// Cache lookup, then (on miss only) the external classifier. The hit
    /// path must never invoke the classifier: skipping the call is a hard
    /// cost guarantee, not an optimization.
    fn resolve_fingerprint(&self, fingerprint: &str, record: &FileRecord) -> Resolved {
        match self.cache.get(fingerprint) {
            Ok(Some(result)) => {
                return Resolved::Classified {
                    result,
                    from_cache: true,
                };
            }
            Ok(None) => {}
            Err(err) => {
                warn!("Cache lookup failed for {}: {}", fingerprint, err);
            }
        }

        let bytes = match fingerprint::read_full_file(&record.path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Unreadable file {}: {}", record.path.display(), err);
                return Resolved::Failed(ReviewReason::Unreadable);
            }
        };

        let mime_hint = mime_hint_for_extension(&record.extension);
        match self.classifier.classify(&bytes, mime_hint) {
            Ok(result) => {
                if let Err(err) = self.cache.put(fingerprint, &result) {
                    warn!("Cache write failed for {}: {}", fingerprint, err);
                }
                Resolved::Classified {
                    result,
                    from_cache: false,
                }
            }
            Err(err) => {
                warn!("Classifier failed for {}: {}", record.path.display(), err);
                Resolved::Failed(ReviewReason::ClassifierError)
            }
        }
    }

    fn organize_one(
        &self,
        record: &FileRecord,
        resolved: &DashMap<String, Resolved>,
        transactor: &FileTransactor<'_>,
        ledger: &mut RunLedger,
        aggregator: &mut ReportAggregator,
    ) {
        let entry = resolved.get(&record.fingerprint);
        let (result, reason) = match entry.as_deref() {
            Some(Resolved::Classified { result, .. }) => (Some(result), None),
            Some(Resolved::Failed(reason)) => (None, Some(*reason)),
            None => (None, Some(ReviewReason::ClassifierError)),
        };

        let Some(result) = result else {
            // Unreadable or classifier failure: the file stays in the
            // inbox, there is no trustworthy classification to route on.
            let reason = reason.unwrap_or(ReviewReason::ClassifierError);
            ledger.reviewed += 1;
            aggregator.record(ReportRow::reviewed(record, None, "unknown", reason, None));
            return;
        };

        let decision = routing::route(record, result, self.config);
        match decision.outcome {
            Outcome::Archive { ref dest_rel } => {
                match transactor.apply(record, dest_rel) {
                    Ok(outcome) => {
                        ledger.archived += 1;
                        aggregator.record(ReportRow::archived(
                            record,
                            result,
                            &decision.category,
                            outcome.dest_path,
                        ));
                    }
                    Err(err) => {
                        warn!("Transfer failed for {}: {}", record.path.display(), err);
                        ledger.failures += 1;
                        aggregator.record(ReportRow::reviewed(
                            record,
                            Some(result),
                            &decision.category,
                            ReviewReason::TransferFailed,
                            None,
                        ));
                    }
                }
            }
            Outcome::Review { reason } => {
                let dest_rel = routing::review_dest_rel(record, reason);
                match transactor.apply(record, &dest_rel) {
                    Ok(outcome) => {
                        ledger.reviewed += 1;
                        aggregator.record(ReportRow::reviewed(
                            record,
                            Some(result),
                            &decision.category,
                            reason,
                            Some(outcome.dest_path),
                        ));
                    }
                    Err(err) => {
                        warn!("Transfer failed for {}: {}", record.path.display(), err);
                        ledger.failures += 1;
                        aggregator.record(ReportRow::reviewed(
                            record,
                            Some(result),
                            &decision.category,
                            ReviewReason::TransferFailed,
                            None,
                        ));
                    }
                }
            }
        }
    }
}

/// (cache hits, classifier calls, tokens spent) per distinct fingerprint.
fn tally_resolved(resolved: &DashMap<String, Resolved>) -> (u64, u64, u64) {
    let mut hits = 0u64;
    let mut misses = 0u64;
    let mut tokens = 0u64;
    for entry in resolved.iter() {
        if let Resolved::Classified { result, from_cache } = entry.value() {
            if *from_cache {
                hits += 1;
            } else {
                misses += 1;
                tokens += result.token_cost;
            }
        }
    }
    (hits, misses, tokens)
}

/// Replay the undo ledger for `run_id`, or the most recent run when none
/// is named. Holds the workspace lock: undo and run must not interleave.
pub fn undo(
    workspace: &Workspace,
    run_id: Option<&str>,
) -> Result<crate::transact::UndoReport, Error> {
    workspace.require_valid()?;

    let run_id = match run_id {
        Some(id) => Some(id.to_string()),
        None => {
            // Latest means the most recent run overall, not the most
            // recent one with backup records: undoing after a copy-mode
            // run must not reach back and reverse an accepted earlier
            // move. Manifests are included so a crashed run with no
            // ledger file is still addressable; ids share a sortable
            // format.
            let mut ids = crate::ledger::list_run_ids(workspace)?;
            ids.extend(crate::ledger::list_manifest_run_ids(workspace)?);
            ids.sort();
            ids.pop()
        }
    };
    let Some(run_id) = run_id else {
        return Ok(crate::transact::UndoReport {
            nothing_to_undo: true,
            ..Default::default()
        });
    };

    let _lock = workspace.acquire_run_lock(&format!("undo-{}", run_id))?;
    crate::transact::undo_run(workspace, &run_id)
}
