use crate::classify::ClassificationResult;
use crate::error::Error;
use crate::fingerprint::FileRecord;
use crate::routing::ReviewReason;
use crate::workspace::Workspace;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

/// One line of the master/review report, derived 1:1 from a processed
/// file and its classification + routing.
#[derive(Debug, Clone)]
pub struct ReportRow {
    pub file_name: String,
    pub source_path: PathBuf,
    pub dest_path: Option<PathBuf>,
    pub category: String,
    pub doc_date: Option<NaiveDate>,
    pub merchant: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub summary: Option<String>,
    pub review_reason: Option<ReviewReason>,
    pub fingerprint: String,
    pub confidence: f32,
    pub token_cost: u64,
    pub latency_ms: u64,
}

impl ReportRow {
    pub fn is_archived(&self) -> bool {
        self.review_reason.is_none()
    }

    pub fn archived(
        record: &FileRecord,
        result: &ClassificationResult,
        category: &str,
        dest_path: PathBuf,
    ) -> ReportRow {
        ReportRow {
            file_name: record.file_name(),
            source_path: record.path.clone(),
            dest_path: Some(dest_path),
            category: category.to_string(),
            doc_date: result.doc_date,
            merchant: result.merchant.clone(),
            amount: result.amount,
            currency: result.currency.clone(),
            summary: result.summary.clone(),
            review_reason: None,
            fingerprint: record.fingerprint.clone(),
            confidence: result.confidence,
            token_cost: result.token_cost,
            latency_ms: result.latency_ms,
        }
    }

    pub fn reviewed(
        record: &FileRecord,
        result: Option<&ClassificationResult>,
        category: &str,
        reason: ReviewReason,
        dest_path: Option<PathBuf>,
    ) -> ReportRow {
        ReportRow {
            file_name: record.file_name(),
            source_path: record.path.clone(),
            dest_path,
            category: category.to_string(),
            doc_date: result.and_then(|r| r.doc_date),
            merchant: result.and_then(|r| r.merchant.clone()),
            amount: result.and_then(|r| r.amount),
            currency: result.and_then(|r| r.currency.clone()),
            summary: result.and_then(|r| r.summary.clone()),
            review_reason: Some(reason),
            fingerprint: record.fingerprint.clone(),
            confidence: result.map(|r| r.confidence).unwrap_or(0.0),
            token_cost: result.map(|r| r.token_cost).unwrap_or(0),
            latency_ms: result.map(|r| r.latency_ms).unwrap_or(0),
        }
    }
}

#[derive(Debug)]
pub struct FlushedReports {
    pub master_path: PathBuf,
    pub review_path: PathBuf,
    pub monthly_path: PathBuf,
    /// Amount totals per (YYYY-MM, category), order-independent.
    pub monthly_totals: BTreeMap<(String, String), f64>,
}

/// Accumulates per-file outcomes and serializes them at run end. Owns the
/// in-memory rows until `flush`; the CSV files are the durable form.
#[derive(Debug, Default)]
pub struct ReportAggregator {
    rows: Vec<ReportRow>,
}

impl ReportAggregator {
    pub fn new() -> ReportAggregator {
        ReportAggregator::default()
    }

    pub fn record(&mut self, row: ReportRow) {
        self.rows.push(row);
    }

    /// Amount totals grouped by (month, category) over Archive-routed
    /// rows. Summation is commutative: totals do not depend on the order
    /// files were processed in.
    pub fn monthly_totals(&self) -> BTreeMap<(String, String), f64> {
        let mut totals: BTreeMap<(String, String), f64> = BTreeMap::new();
        for row in self.rows.iter().filter(|r| r.is_archived()) {
            let (Some(date), Some(amount)) = (row.doc_date, row.amount) else {
                continue;
            };
            let key = (date.format("%Y-%m").to_string(), row.category.clone());
            *totals.entry(key).or_insert(0.0) += amount;
        }
        totals
    }

    /// Write the master report, monthly summary and review log under
    /// `Exports/`. Row order follows a stable sort (date, category,
    /// filename) so re-running over re-ordered input reproduces the same
    /// files byte for byte.
    pub fn flush(&self, workspace: &Workspace, dev: bool) -> Result<FlushedReports, Error> {
        std::fs::create_dir_all(&workspace.exports)?;

        let master_path = workspace.exports.join("master_report.csv");
        let review_path = workspace.exports.join("review_log.csv");
        let monthly_path = workspace.exports.join("monthly_summary.csv");

        self.write_master(&master_path, dev)?;
        self.write_review_log(&review_path, dev)?;
        let monthly_totals = self.write_monthly_summary(&monthly_path)?;

        info!(
            "Reports flushed: {} archived rows, {} review rows",
            self.rows.iter().filter(|r| r.is_archived()).count(),
            self.rows.iter().filter(|r| !r.is_archived()).count(),
        );

        Ok(FlushedReports {
            master_path,
            review_path,
            monthly_path,
            monthly_totals,
        })
    }

    fn sorted_rows(&self, archived: bool) -> Vec<&ReportRow> {
        let mut rows: Vec<&ReportRow> = self
            .rows
            .iter()
            .filter(|r| r.is_archived() == archived)
            .collect();
        rows.sort_by(|a, b| {
            (a.doc_date, &a.category, &a.file_name).cmp(&(b.doc_date, &b.category, &b.file_name))
        });
        rows
    }

    fn write_master(&self, path: &PathBuf, dev: bool) -> Result<(), Error> {
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec![
            "Date",
            "Category",
            "Merchant",
            "Amount",
            "Currency",
            "Summary",
            "Source File",
            "Destination",
        ];
        if dev {
            header.extend(["Fingerprint", "Confidence", "Tokens", "Latency (ms)"]);
        }
        writer.write_record(&header)?;

        for row in self.sorted_rows(true) {
            let mut fields = vec![
                row.doc_date
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default(),
                row.category.clone(),
                row.merchant.clone().unwrap_or_default(),
                row.amount.map(|a| format!("{:.2}", a)).unwrap_or_default(),
                row.currency.clone().unwrap_or_default(),
                row.summary.clone().unwrap_or_default(),
                row.file_name.clone(),
                row.dest_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ];
            if dev {
                fields.extend([
                    row.fingerprint.clone(),
                    format!("{:.2}", row.confidence),
                    row.token_cost.to_string(),
                    row.latency_ms.to_string(),
                ]);
            }
            writer.write_record(&fields)?;
        }

        writer.flush()?;
        Ok(())
    }

    fn write_review_log(&self, path: &PathBuf, dev: bool) -> Result<(), Error> {
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec!["Source File", "Reason", "Category", "Confidence", "Date"];
        if dev {
            header.push("Fingerprint");
        }
        writer.write_record(&header)?;

        for row in self.sorted_rows(false) {
            let reason = row
                .review_reason
                .map(|r| r.as_str().to_string())
                .unwrap_or_default();
            let mut fields = vec![
                row.file_name.clone(),
                reason,
                row.category.clone(),
                format!("{:.2}", row.confidence),
                row.doc_date
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default(),
            ];
            if dev {
                fields.push(row.fingerprint.clone());
            }
            writer.write_record(&fields)?;
        }

        writer.flush()?;
        Ok(())
    }

    fn write_monthly_summary(
        &self,
        path: &PathBuf,
    ) -> Result<BTreeMap<(String, String), f64>, Error> {
        let totals = self.monthly_totals();
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["Month", "Category", "Total"])?;
        for ((month, category), total) in &totals {
            writer.write_record([month.as_str(), category.as_str(), &format!("{:.2}", total)])?;
        }
        writer.flush()?;
        Ok(totals)
    }
}
