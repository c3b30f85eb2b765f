use crate::config::AppConfig;
use glob::Pattern;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::error;

/// Folders never picked up by the scan, even when they sit inside the
/// scan target (ad-hoc runs scan the workspace root directly).
const EXCLUDED_DIRS: &[&str] = &["Organized", "Review", "Exports", ".coworker"];

/// Shallow inbox scan. Yields supported files sorted by name, filtering by
/// extension and glob ignore patterns. Skips hidden entries, symlinks,
/// empty files and the workspace output folders.
pub fn scan_inbox(scan_target: &Path, config: &AppConfig) -> io::Result<Vec<PathBuf>> {
    let ignore_patterns: Vec<Pattern> = config
        .ignore_patterns
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(pattern) => Some(pattern),
            Err(err) => {
                error!("Invalid glob pattern '{}': {}", glob, err);
                None
            }
        })
        .collect();

    let mut files = Vec::new();
    if !scan_target.is_dir() {
        return Ok(files);
    }

    let entries = match fs::read_dir(scan_target) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            error!(
                "Access denied reading directory {}: {}",
                scan_target.display(),
                err
            );
            return Ok(files);
        }
        Err(err) => return Err(err),
    };

    for entry_result in entries {
        let entry = entry_result?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();

        if name.starts_with('.') || EXCLUDED_DIRS.contains(&name.as_str()) {
            continue;
        }

        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) => {
                error!("Error getting metadata for {}: {}", path.display(), err);
                continue;
            }
        };

        if !metadata.is_file() || metadata.file_type().is_symlink() || metadata.len() == 0 {
            continue;
        }

        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();
        if !config.include_extensions.contains(&extension) {
            continue;
        }

        if ignore_patterns.iter().any(|p| p.matches_path(&path)) {
            continue;
        }

        files.push(path);
    }

    // Stable processing order keeps run output reproducible.
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_scan_filters_extensions_and_system_dirs() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("a.pdf"), b"pdf").unwrap();
        fs::write(root.join("b.jpg"), b"jpg").unwrap();
        fs::write(root.join("notes.txt"), b"txt").unwrap();
        fs::write(root.join(".hidden.pdf"), b"hidden").unwrap();
        fs::write(root.join("empty.pdf"), b"").unwrap();
        fs::create_dir_all(root.join("Organized")).unwrap();
        fs::write(root.join("Organized").join("c.pdf"), b"already done").unwrap();

        let files = scan_inbox(root, &AppConfig::default()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.pdf", "b.jpg"]);
    }

    #[test]
    fn test_scan_respects_ignore_patterns() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("keep.pdf"), b"keep").unwrap();
        fs::write(root.join("draft_skip.pdf"), b"skip").unwrap();

        let config = AppConfig {
            ignore_patterns: vec!["**/draft_*".to_string()],
            ..AppConfig::default()
        };
        let files = scan_inbox(root, &config).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("keep.pdf"));
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        let tmp = tempdir().unwrap();
        let files = scan_inbox(&tmp.path().join("nope"), &AppConfig::default()).unwrap();
        assert!(files.is_empty());
    }
}
