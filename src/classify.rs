use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured output of the external classifier for one content
/// fingerprint. Immutable once cached: a cache hit returns the result
/// exactly as originally computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// One of the configured taxonomy labels, or "unknown".
    pub category: String,
    pub doc_date: Option<NaiveDate>,
    pub merchant: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub summary: Option<String>,
    /// Confidence score in [0, 1].
    pub confidence: f32,
    pub token_cost: u64,
    pub latency_ms: u64,
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("classifier returned malformed response: {0}")]
    Malformed(String),

    #[error("classifier timed out after {0}ms")]
    Timeout(u64),
}

/// External collaborator that turns file bytes into a typed
/// classification. The AI call itself (prompt construction, model
/// invocation, response parsing) lives behind this seam; tests inject
/// counting or canned implementations.
pub trait Classifier: Send + Sync {
    fn classify(
        &self,
        bytes: &[u8],
        mime_hint: &str,
    ) -> Result<ClassificationResult, ClassifierError>;
}

/// Classifier backed by an external command (`CLASSIFIER_CMD`).
///
/// The command receives the file bytes on stdin and the mime hint as its
/// single argument, and prints one `ClassificationResult` as JSON on
/// stdout. This keeps the model integration (prompting, API keys, retry)
/// out of process: any script that speaks the JSON contract plugs in.
pub struct CommandClassifier {
    program: String,
}

impl CommandClassifier {
    pub fn from_env() -> Option<CommandClassifier> {
        std::env::var("CLASSIFIER_CMD")
            .ok()
            .filter(|cmd| !cmd.trim().is_empty())
            .map(|program| CommandClassifier { program })
    }
}

impl Classifier for CommandClassifier {
    fn classify(
        &self,
        bytes: &[u8],
        mime_hint: &str,
    ) -> Result<ClassificationResult, ClassifierError> {
        use std::io::Write;
        use std::process::{Command, Stdio};

        let mut child = Command::new(&self.program)
            .arg(mime_hint)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| ClassifierError::Unavailable(err.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClassifierError::Unavailable("no stdin pipe".to_string()))?;

        // Feed stdin from a separate thread while this one drains stdout.
        // A child that emits more than a pipe buffer before reading its
        // input would otherwise deadlock against us on a large document.
        let payload = bytes.to_vec();
        let writer = std::thread::spawn(move || stdin.write_all(&payload));

        let output = child
            .wait_with_output()
            .map_err(|err| ClassifierError::Unavailable(err.to_string()))?;
        let write_result = writer
            .join()
            .map_err(|_| ClassifierError::Unavailable("stdin writer panicked".to_string()))?;

        if !output.status.success() {
            return Err(ClassifierError::Unavailable(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        // A broken stdin pipe only matters if the child also failed to
        // produce a usable result (it may legitimately stop reading early).
        serde_json::from_slice(&output.stdout).map_err(|err| match write_result {
            Err(write_err) => ClassifierError::Unavailable(write_err.to_string()),
            Ok(()) => ClassifierError::Malformed(err.to_string()),
        })
    }
}

/// Best-effort mime type from a lowercase file extension.
pub fn mime_hint_for_extension(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_hints() {
        assert_eq!(mime_hint_for_extension("jpeg"), "image/jpeg");
        assert_eq!(mime_hint_for_extension("pdf"), "application/pdf");
        assert_eq!(mime_hint_for_extension("exe"), "application/octet-stream");
    }

    // The script floods stdout (well past a pipe buffer) before touching
    // stdin, while the input is larger than a pipe buffer too. JSON
    // tolerates the leading whitespace.
    #[cfg(unix)]
    #[test]
    fn test_command_classifier_streams_large_documents() {
        use std::os::unix::fs::PermissionsExt;
        use tempfile::tempdir;

        let tmp = tempdir().unwrap();
        let script = tmp.path().join("classify.sh");
        std::fs::write(
            &script,
            concat!(
                "#!/bin/sh\n",
                "head -c 131072 /dev/zero | tr '\\0' ' '\n",
                "printf '%s' '{\"category\":\"Invoice\",\"doc_date\":\"2024-03-05\",",
                "\"merchant\":\"Acme\",\"amount\":120.0,\"currency\":\"USD\",",
                "\"summary\":null,\"confidence\":0.95,\"token_cost\":100,\"latency_ms\":5}'\n",
                "cat > /dev/null\n",
            ),
        )
        .unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let classifier = CommandClassifier {
            program: script.display().to_string(),
        };
        let bytes = vec![b'x'; 1 << 20];
        let result = classifier.classify(&bytes, "application/pdf").unwrap();
        assert_eq!(result.category, "Invoice");
        assert_eq!(result.amount, Some(120.0));
        assert_eq!(result.doc_date, NaiveDate::from_ymd_opt(2024, 3, 5));
    }
}
