use chrono::NaiveDate;
use coworker::classify::{ClassificationResult, Classifier, ClassifierError};
use coworker::{
    AppConfig, ClassificationCache, Engine, SilentReporter, TransferMode, Workspace,
};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

/// Deterministic classifier for pipeline tests. File content encodes the
/// classification as `category|date|merchant|amount|currency|confidence`
/// (empty fields omitted); content starting with `ERROR` fails. Counts
/// every invocation so tests can assert on cache behavior.
struct StubClassifier {
    calls: AtomicUsize,
}

impl StubClassifier {
    fn new() -> StubClassifier {
        StubClassifier {
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for StubClassifier {
    fn classify(
        &self,
        bytes: &[u8],
        _mime_hint: &str,
    ) -> Result<ClassificationResult, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let text = String::from_utf8_lossy(bytes);
        if text.starts_with("ERROR") {
            return Err(ClassifierError::Unavailable("stub failure".to_string()));
        }

        let parts: Vec<&str> = text.trim().split('|').collect();
        let field = |n: usize| parts.get(n).filter(|s| !s.is_empty()).map(|s| s.to_string());
        Ok(ClassificationResult {
            category: field(0).unwrap_or_default(),
            doc_date: parts
                .get(1)
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()),
            merchant: field(2),
            amount: parts.get(3).and_then(|s| s.parse().ok()),
            currency: field(4),
            summary: None,
            confidence: parts.get(5).and_then(|s| s.parse().ok()).unwrap_or(0.95),
            token_cost: 100,
            latency_ms: 5,
        })
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        categories: vec!["Invoice".to_string(), "Receipt".to_string()],
        amount_required_categories: vec!["Invoice".to_string(), "Receipt".to_string()],
        confidence_threshold: 0.7,
        concurrency: 2,
        include_extensions: vec!["pdf".to_string(), "png".to_string()],
        ignore_patterns: Vec::new(),
    }
}

fn setup() -> (tempfile::TempDir, Workspace, ClassificationCache) {
    let tmp = tempdir().unwrap();
    let ws = Workspace::new(tmp.path());
    ws.ensure_structure().unwrap();
    let cache = ClassificationCache::open(&ws.cache_dir).unwrap();
    (tmp, ws, cache)
}

fn inbox_file(ws: &Workspace, name: &str, content: &str) {
    fs::write(ws.inbox.join(name), content).unwrap();
}

fn files_under(dir: &std::path::Path) -> Vec<String> {
    let mut names = Vec::new();
    if !dir.exists() {
        return names;
    }
    for entry in walk(dir) {
        names.push(entry);
    }
    names.sort();
    names
}

fn walk(dir: &std::path::Path) -> Vec<String> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        if entry.path().is_dir() {
            out.extend(walk(&entry.path()));
        } else {
            out.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    out
}

#[test]
fn test_run_archives_with_structured_names() {
    let (_tmp, ws, cache) = setup();
    inbox_file(&ws, "scan001.pdf", "Invoice|2024-03-05|Acme Corp|120.00|USD|0.95");
    inbox_file(&ws, "scan002.pdf", "Receipt|2024-04-01|Cafe|7.50|EUR|0.9");

    let classifier = StubClassifier::new();
    let config = test_config();
    let engine = Engine::new(&ws, &config, &classifier, &cache);
    let summary = engine.run(TransferMode::Move, false, &SilentReporter).unwrap();

    assert_eq!(summary.ledger.files_seen, 2);
    assert_eq!(summary.ledger.archived, 2);
    assert_eq!(summary.ledger.reviewed, 0);
    assert_eq!(summary.ledger.failures, 0);
    assert_eq!(summary.ledger.token_cost, 200);

    // Sources left the inbox, destinations carry the structured name.
    assert!(files_under(&ws.inbox).is_empty());
    let invoice_dir = ws.organized.join("2024-03").join("Invoice");
    let archived = files_under(&invoice_dir);
    assert_eq!(archived.len(), 1);
    assert!(archived[0].starts_with("2024-03-05__Invoice__Acme_Corp__120.00USD__"));
    assert!(archived[0].ends_with(".pdf"));

    // Reports written under Exports/.
    let master = fs::read_to_string(&summary.reports.master_path).unwrap();
    assert!(master.contains("Acme Corp"));
    assert!(master.contains("2024-04-01"));
}

#[test]
fn test_identical_bytes_classified_once() {
    let (_tmp, ws, cache) = setup();
    let content = "Invoice|2024-03-05|Acme Corp|120.00|USD|0.95";
    inbox_file(&ws, "original.pdf", content);
    inbox_file(&ws, "duplicate.pdf", content);

    let classifier = StubClassifier::new();
    let config = test_config();
    let engine = Engine::new(&ws, &config, &classifier, &cache);
    let summary = engine.run(TransferMode::Move, false, &SilentReporter).unwrap();

    // Two files, one distinct fingerprint, one classifier call.
    assert_eq!(summary.ledger.archived, 2);
    assert_eq!(classifier.call_count(), 1);
    assert_eq!(summary.ledger.cache_misses, 1);

    // Same bytes under a new name in a later run: pure cache hit.
    inbox_file(&ws, "resubmitted.pdf", content);
    let second = engine.run(TransferMode::Move, false, &SilentReporter).unwrap();
    assert_eq!(classifier.call_count(), 1);
    assert_eq!(second.ledger.cache_hits, 1);
    assert_eq!(second.ledger.cache_misses, 0);
    assert_eq!(second.ledger.token_cost, 0);

    // Both identical archives exist under distinct collision-suffixed names.
    let archived = files_under(&ws.organized);
    assert_eq!(archived.len(), 3);
    let distinct: std::collections::HashSet<_> = archived.iter().collect();
    assert_eq!(distinct.len(), 3);
}

#[test]
fn test_safe_mode_copies_and_writes_no_backups() {
    let (_tmp, ws, cache) = setup();
    inbox_file(&ws, "scan001.pdf", "Invoice|2024-03-05|Acme|120.00|USD|0.95");

    let classifier = StubClassifier::new();
    let config = test_config();
    let engine = Engine::new(&ws, &config, &classifier, &cache);
    let summary = engine.run(TransferMode::Copy, false, &SilentReporter).unwrap();

    assert_eq!(summary.ledger.archived, 1);
    assert_eq!(summary.ledger.backup_count, 0);

    // Source untouched, destination byte-identical.
    let source = ws.inbox.join("scan001.pdf");
    assert!(source.exists());
    let archived = files_under(&ws.organized);
    assert_eq!(archived.len(), 1);
    let dest = ws
        .organized
        .join("2024-03")
        .join("Invoice")
        .join(&archived[0]);
    assert_eq!(fs::read(&dest).unwrap(), fs::read(&source).unwrap());
}

#[test]
fn test_review_routing_by_reason() {
    let (_tmp, ws, cache) = setup();
    // Low confidence, missing date, missing amount on an amount-required
    // category, and a classifier failure.
    inbox_file(&ws, "fuzzy.pdf", "Invoice|2024-03-05|Acme|120.00|USD|0.40");
    inbox_file(&ws, "undated.pdf", "Invoice||Acme|120.00|USD|0.95");
    inbox_file(&ws, "noamount.pdf", "Receipt|2024-03-05|Cafe|||0.95");
    inbox_file(&ws, "broken.pdf", "ERROR this one cannot be classified");

    let classifier = StubClassifier::new();
    let config = test_config();
    let engine = Engine::new(&ws, &config, &classifier, &cache);
    let summary = engine.run(TransferMode::Move, false, &SilentReporter).unwrap();

    assert_eq!(summary.ledger.archived, 0);
    assert_eq!(summary.ledger.reviewed, 4);

    // Policy-flagged files relocate into per-reason folders.
    assert_eq!(files_under(&ws.review.join("Low_Confidence")), ["fuzzy.pdf"]);
    assert_eq!(files_under(&ws.review.join("Missing_Date")), ["undated.pdf"]);
    assert_eq!(
        files_under(&ws.review.join("Missing_Amount")),
        ["noamount.pdf"]
    );

    // A classifier failure leaves the file in place for a retry.
    assert!(ws.inbox.join("broken.pdf").exists());

    let review_log = fs::read_to_string(&summary.reports.review_path).unwrap();
    assert!(review_log.contains("low confidence"));
    assert!(review_log.contains("missing date"));
    assert!(review_log.contains("missing amount"));
    assert!(review_log.contains("classifier error"));
}

#[test]
fn test_run_then_undo_restores_inbox() {
    let (_tmp, ws, cache) = setup();
    inbox_file(&ws, "scan001.pdf", "Invoice|2024-03-05|Acme|120.00|USD|0.95");
    inbox_file(&ws, "fuzzy.pdf", "Receipt|2024-03-05|Cafe|7.50|EUR|0.40");

    let classifier = StubClassifier::new();
    let config = test_config();
    let engine = Engine::new(&ws, &config, &classifier, &cache);
    let summary = engine.run(TransferMode::Move, false, &SilentReporter).unwrap();
    assert_eq!(summary.ledger.archived + summary.ledger.reviewed, 2);
    assert!(files_under(&ws.inbox).is_empty());

    let report = coworker::engine::undo(&ws, None).unwrap();
    assert_eq!(report.restored, 2);
    assert!(report.conflicts.is_empty());

    // Originals back under their original names and bytes.
    assert_eq!(
        fs::read_to_string(ws.inbox.join("scan001.pdf")).unwrap(),
        "Invoice|2024-03-05|Acme|120.00|USD|0.95"
    );
    assert_eq!(
        fs::read_to_string(ws.inbox.join("fuzzy.pdf")).unwrap(),
        "Receipt|2024-03-05|Cafe|7.50|EUR|0.40"
    );
    assert!(files_under(&ws.organized).is_empty());
    assert!(files_under(&ws.review).is_empty());

    // A second undo finds nothing left to replay.
    let again = coworker::engine::undo(&ws, Some(&summary.ledger.run_id)).unwrap();
    assert!(again.nothing_to_undo);
}

#[test]
fn test_undo_latest_does_not_reach_past_a_safe_run() {
    let (_tmp, ws, cache) = setup();
    inbox_file(&ws, "first.pdf", "Invoice|2024-03-05|Acme|120.00|USD|0.95");

    let classifier = StubClassifier::new();
    let config = test_config();
    let engine = Engine::new(&ws, &config, &classifier, &cache);
    let moved = engine.run(TransferMode::Move, false, &SilentReporter).unwrap();
    assert_eq!(moved.ledger.archived, 1);

    inbox_file(&ws, "second.pdf", "Receipt|2024-04-01|Cafe|7.50|EUR|0.9");
    let safe = engine.run(TransferMode::Copy, false, &SilentReporter).unwrap();
    assert_eq!(safe.ledger.archived, 1);
    assert!(moved.ledger.run_id < safe.ledger.run_id);

    // The latest run wrote no backup records; undo must report that
    // instead of silently reversing the accepted earlier move.
    let report = coworker::engine::undo(&ws, None).unwrap();
    assert!(report.nothing_to_undo);
    assert_eq!(report.run_id, safe.ledger.run_id);
    assert!(!ws.inbox.join("first.pdf").exists());
    assert_eq!(files_under(&ws.organized).len(), 2);

    // The move-mode run is still undoable when named explicitly.
    let report = coworker::engine::undo(&ws, Some(&moved.ledger.run_id)).unwrap();
    assert_eq!(report.restored, 1);
    assert!(ws.inbox.join("first.pdf").exists());
}

#[test]
fn test_unknown_extension_and_hidden_files_skipped() {
    let (_tmp, ws, cache) = setup();
    inbox_file(&ws, "scan001.pdf", "Invoice|2024-03-05|Acme|120.00|USD|0.95");
    inbox_file(&ws, "notes.docx", "not a supported format");
    inbox_file(&ws, ".DS_Store", "junk");

    let classifier = StubClassifier::new();
    let config = test_config();
    let engine = Engine::new(&ws, &config, &classifier, &cache);
    let summary = engine.run(TransferMode::Move, false, &SilentReporter).unwrap();

    assert_eq!(summary.ledger.files_seen, 1);
    assert_eq!(summary.ledger.archived, 1);
    assert!(ws.inbox.join("notes.docx").exists());
    assert!(ws.inbox.join(".DS_Store").exists());
}

#[test]
fn test_monthly_summary_totals() {
    let (_tmp, ws, cache) = setup();
    inbox_file(&ws, "a.pdf", "Invoice|2024-03-05|Acme|100.00|USD|0.95");
    inbox_file(&ws, "b.pdf", "Invoice|2024-03-20|Acme|20.50|USD|0.95");
    inbox_file(&ws, "c.pdf", "Receipt|2024-04-01|Cafe|7.00|USD|0.95");

    let classifier = StubClassifier::new();
    let config = test_config();
    let engine = Engine::new(&ws, &config, &classifier, &cache);
    let summary = engine.run(TransferMode::Move, false, &SilentReporter).unwrap();

    let totals = &summary.reports.monthly_totals;
    assert_eq!(totals[&("2024-03".to_string(), "Invoice".to_string())], 120.5);
    assert_eq!(totals[&("2024-04".to_string(), "Receipt".to_string())], 7.0);

    let monthly = fs::read_to_string(&summary.reports.monthly_path).unwrap();
    assert!(monthly.contains("2024-03,Invoice,120.50"));
}
