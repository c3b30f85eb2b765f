pub mod cache;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod logging;
pub mod progress;
pub mod report;
pub mod routing;
pub mod scan;
pub mod transact;
pub mod workspace;

pub use cache::ClassificationCache;
pub use classify::{ClassificationResult, Classifier, ClassifierError, CommandClassifier};
pub use config::AppConfig;
pub use engine::{Engine, RunSummary};
pub use error::Error;
pub use fingerprint::FileRecord;
pub use ledger::RunLedger;
pub use progress::{ProgressReporter, SilentReporter};
pub use routing::{Outcome, ReviewReason, RoutingDecision};
pub use transact::{TransferMode, UndoReport};
pub use workspace::Workspace;
