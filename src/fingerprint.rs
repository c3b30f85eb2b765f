use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

const READ_CHUNK_SIZE: usize = 8192;

/// One input file under processing. The fingerprint is a pure function of
/// byte content: identical bytes share one fingerprint (and one cache
/// entry) regardless of name or location.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: PathBuf,
    pub fingerprint: String,
    pub size: u64,
    pub extension: String,
}

impl FileRecord {
    pub fn from_path(path: &Path) -> io::Result<FileRecord> {
        let metadata = std::fs::metadata(path)?;
        let fingerprint = fingerprint_file(path)?;
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();
        Ok(FileRecord {
            path: path.to_path_buf(),
            fingerprint,
            size: metadata.len(),
            extension,
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// First 8 hex chars of the fingerprint, used in destination names.
    pub fn short_hash(&self) -> &str {
        &self.fingerprint[..self.fingerprint.len().min(8)]
    }
}

/// Streaming blake3 digest of a file's bytes, hex encoded.
pub fn fingerprint_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

pub fn read_full_file(path: &Path) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;
    Ok(buffer)
}
