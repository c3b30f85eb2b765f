use crate::classify::ClassificationResult;
use crate::error::Error;
use rocksdb::{IteratorMode, Options, DB};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, trace, warn};

/// Persistent fingerprint → ClassificationResult store, scoped to the
/// workspace and surviving across runs. A hit means the classifier is
/// never re-invoked for that content ("we never re-send the same file
/// twice"). Injected into the pipeline so tests can point it at a
/// throwaway directory.
pub struct ClassificationCache {
    db: Mutex<DB>,
}

impl ClassificationCache {
    pub fn open(path: &Path) -> Result<ClassificationCache, Error> {
        let mut db_options = Options::default();
        db_options.create_if_missing(true);
        let db = DB::open(&db_options, path)
            .map_err(|err| Error::Cache(format!("Failed to open cache at {}: {}", path.display(), err)))?;
        debug!("Classification cache open at {}", path.display());
        Ok(ClassificationCache { db: Mutex::new(db) })
    }

    /// Cached result for a fingerprint, if any. Entries that no longer
    /// decode (schema drift between versions) fail closed: logged and
    /// treated as a miss, so the fresh result overwrites them.
    pub fn get(&self, fingerprint: &str) -> Result<Option<ClassificationResult>, Error> {
        let db = self.lock()?;
        match db.get(fingerprint.as_bytes()) {
            Ok(Some(value)) => match bincode::deserialize::<ClassificationResult>(&value) {
                Ok(result) => {
                    trace!("Cache hit for {}", fingerprint);
                    Ok(Some(result))
                }
                Err(err) => {
                    warn!(
                        "Stale or incompatible cache entry for {} ({}); treating as miss",
                        fingerprint, err
                    );
                    Ok(None)
                }
            },
            Ok(None) => Ok(None),
            Err(err) => Err(Error::Cache(err.to_string())),
        }
    }

    /// Store a result. Concurrent writers for the same fingerprint are
    /// tolerated; last write wins, results for one fingerprint are stable.
    pub fn put(&self, fingerprint: &str, result: &ClassificationResult) -> Result<(), Error> {
        let value = bincode::serialize(result)
            .map_err(|err| Error::Cache(format!("Serialize error: {}", err)))?;
        let db = self.lock()?;
        db.put(fingerprint.as_bytes(), value)
            .map_err(|err| Error::Cache(err.to_string()))?;
        trace!("Cached result for {}", fingerprint);
        Ok(())
    }

    pub fn count_keys(&self) -> Result<usize, Error> {
        let db = self.lock()?;
        let mut count = 0usize;
        for item in db.iterator(IteratorMode::Start) {
            item.map_err(|err| Error::Cache(err.to_string()))?;
            count += 1;
        }
        Ok(count)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, DB>, Error> {
        self.db
            .lock()
            .map_err(|err| Error::Cache(format!("Failed to lock cache: {}", err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn sample_result() -> ClassificationResult {
        ClassificationResult {
            category: "Invoice".to_string(),
            doc_date: NaiveDate::from_ymd_opt(2024, 3, 5),
            merchant: Some("Acme".to_string()),
            amount: Some(120.0),
            currency: Some("USD".to_string()),
            summary: Some("March invoice".to_string()),
            confidence: 0.92,
            token_cost: 310,
            latency_ms: 850,
        }
    }

    #[test]
    fn test_get_miss_then_hit_round_trip() {
        let tmp = tempdir().unwrap();
        let cache = ClassificationCache::open(&tmp.path().join("cache")).unwrap();

        assert!(cache.get("h1").unwrap().is_none());
        cache.put("h1", &sample_result()).unwrap();
        let hit = cache.get("h1").unwrap().unwrap();
        assert_eq!(hit, sample_result());
        assert_eq!(cache.count_keys().unwrap(), 1);
    }

    #[test]
    fn test_survives_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("cache");
        {
            let cache = ClassificationCache::open(&path).unwrap();
            cache.put("h1", &sample_result()).unwrap();
        }
        let cache = ClassificationCache::open(&path).unwrap();
        assert!(cache.get("h1").unwrap().is_some());
    }

    #[test]
    fn test_undecodable_entry_is_a_miss() {
        let tmp = tempdir().unwrap();
        let cache = ClassificationCache::open(&tmp.path().join("cache")).unwrap();
        {
            let db = cache.db.lock().unwrap();
            db.put(b"h_bad", b"\x00garbage").unwrap();
        }
        assert!(cache.get("h_bad").unwrap().is_none());
    }
}
