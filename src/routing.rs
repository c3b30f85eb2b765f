use crate::classify::ClassificationResult;
use crate::config::AppConfig;
use crate::fingerprint::FileRecord;
use std::fmt;
use std::path::{Path, PathBuf};

/// Why a file was flagged for human review instead of archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewReason {
    LowConfidence,
    MissingDate,
    MissingAmount,
    Unreadable,
    ClassifierError,
    TransferFailed,
}

impl ReviewReason {
    /// Human-readable reason, as printed in the review log.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewReason::LowConfidence => "low confidence",
            ReviewReason::MissingDate => "missing date",
            ReviewReason::MissingAmount => "missing amount",
            ReviewReason::Unreadable => "unreadable",
            ReviewReason::ClassifierError => "classifier error",
            ReviewReason::TransferFailed => "transfer failed",
        }
    }

    /// Folder name under Review/ for relocated files.
    pub fn folder_name(&self) -> &'static str {
        match self {
            ReviewReason::LowConfidence => "Low_Confidence",
            ReviewReason::MissingDate => "Missing_Date",
            ReviewReason::MissingAmount => "Missing_Amount",
            ReviewReason::Unreadable => "Unreadable",
            ReviewReason::ClassifierError => "Classifier_Error",
            ReviewReason::TransferFailed => "Transfer_Failed",
        }
    }
}

impl fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Relocate into the dated/categorized tree at this workspace-relative
    /// path (e.g. `Organized/2024-03/Invoice/...`).
    Archive { dest_rel: PathBuf },
    /// Flag for manual inspection.
    Review { reason: ReviewReason },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    pub outcome: Outcome,
    /// Category after taxonomy normalization.
    pub category: String,
}

impl RoutingDecision {
    pub fn is_archive(&self) -> bool {
        matches!(self.outcome, Outcome::Archive { .. })
    }
}

/// Pure routing policy: classification result + configuration in,
/// destination outcome out.
///
/// Review iff confidence is below the threshold OR a required field is
/// missing. Low confidence wins the tie-break: a fully populated but
/// low-confidence result is still review. The archive path scheme depends
/// on the document date, so a missing date always forces review.
pub fn route(
    record: &FileRecord,
    result: &ClassificationResult,
    config: &AppConfig,
) -> RoutingDecision {
    let category = normalize_category(&result.category, config);

    if result.confidence < config.confidence_threshold {
        return RoutingDecision {
            outcome: Outcome::Review {
                reason: ReviewReason::LowConfidence,
            },
            category,
        };
    }

    let doc_date = match result.doc_date {
        Some(date) => date,
        None => {
            return RoutingDecision {
                outcome: Outcome::Review {
                    reason: ReviewReason::MissingDate,
                },
                category,
            };
        }
    };

    if result.amount.is_none() && config.requires_amount(&category) {
        return RoutingDecision {
            outcome: Outcome::Review {
                reason: ReviewReason::MissingAmount,
            },
            category,
        };
    }

    let month_folder = doc_date.format("%Y-%m").to_string();
    let file_name = archive_file_name(record, result, &category);
    let dest_rel = Path::new("Organized")
        .join(month_folder)
        .join(&category)
        .join(file_name);

    RoutingDecision {
        outcome: Outcome::Archive { dest_rel },
        category,
    }
}

/// Workspace-relative destination for a review-routed file.
pub fn review_dest_rel(record: &FileRecord, reason: ReviewReason) -> PathBuf {
    Path::new("Review")
        .join(reason.folder_name())
        .join(record.file_name())
}

fn normalize_category(label: &str, config: &AppConfig) -> String {
    config
        .categories
        .iter()
        .find(|c| c.eq_ignore_ascii_case(label))
        .cloned()
        .unwrap_or_else(|| "unknown".to_string())
}

/// Deterministic archive filename:
/// `{date}__{category}__{merchant}__{amount}{currency}__{hash8}.{ext}`.
/// The fingerprint prefix keeps renamed copies of the same bytes mapping
/// to the same destination name.
fn archive_file_name(
    record: &FileRecord,
    result: &ClassificationResult,
    category: &str,
) -> String {
    let date = result
        .doc_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let merchant = result
        .merchant
        .as_deref()
        .map(sanitize_component)
        .unwrap_or_else(|| "Unknown".to_string());
    let amount = result
        .amount
        .map(|a| format!("{:.2}", a))
        .unwrap_or_else(|| "0".to_string());
    let currency = result.currency.as_deref().unwrap_or("");

    let base = format!(
        "{}__{}__{}__{}{}__{}",
        date,
        sanitize_component(category),
        merchant,
        amount,
        currency,
        record.short_hash()
    );
    if record.extension.is_empty() {
        base
    } else {
        format!("{}.{}", base, record.extension)
    }
}

/// Strip filesystem-hostile characters and spaces, cap the length.
fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect();
    let cleaned = cleaned.trim().replace(' ', "_");
    cleaned.chars().take(50).collect()
}

/// Resolve a destination collision by appending a numeric suffix before
/// the extension. Deterministic given the directory state; never
/// overwrites. Callers must hold the mutation lock so two files cannot
/// race to the same resolved name.
pub fn resolve_collision(dest: &Path) -> PathBuf {
    if !dest.exists() {
        return dest.to_path_buf();
    }

    let stem = dest
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = dest.extension().map(|s| s.to_string_lossy().into_owned());
    let parent = dest.parent().unwrap_or_else(|| Path::new(""));

    let mut counter = 1u32;
    loop {
        let candidate_name = match &extension {
            Some(ext) => format!("{}_{}.{}", stem, counter, ext),
            None => format!("{}_{}", stem, counter),
        };
        let candidate = parent.join(candidate_name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
