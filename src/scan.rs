// Media directory scan: builds the permanent item set at startup.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Extensions (lowercase) treated as rateable media.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff", "avif", "heic", // images
    "mp4", "m4v", "webm", "mkv", "mov", "avi", "wmv", // video
];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("media directory not found: {path}")]
    NotADirectory { path: PathBuf },

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How an item key is derived from a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyMode {
    /// Path relative to the media directory, `/`-separated.
    #[default]
    Path,
    /// Hex SHA-256 of the file contents; survives renames and moves.
    Hash,
}

impl std::str::FromStr for KeyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "path" => Ok(KeyMode::Path),
            "hash" | "sha256" => Ok(KeyMode::Hash),
            other => Err(format!("unknown key mode '{other}' (expected path or hash)")),
        }
    }
}

pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MEDIA_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Walk `root` and return the sorted, deduplicated item keys.
///
/// Hidden entries (leading `.`) and symlinks are skipped.
pub fn scan_media(root: &Path, mode: KeyMode) -> Result<Vec<String>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotADirectory {
            path: root.to_path_buf(),
        });
    }

    let mut files = Vec::new();
    walk(root, &mut files)?;

    let mut keys = Vec::with_capacity(files.len());
    for file in &files {
        let key = match mode {
            KeyMode::Path => relative_key(root, file),
            KeyMode::Hash => hash_file(file)?,
        };
        keys.push(key);
    }
    keys.sort();
    keys.dedup();

    tracing::info!(
        "Scanned {}: {} media files, {} distinct items",
        root.display(),
        files.len(),
        keys.len()
    );
    Ok(keys)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ScanError> {
    let io_err = |source| ScanError::Io {
        path: dir.to_path_buf(),
        source,
    };
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let file_type = entry.file_type().map_err(io_err)?;
        let path = entry.path();
        if file_type.is_dir() {
            walk(&path, out)?;
        } else if file_type.is_file() && is_media_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn relative_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Hex-encoded SHA-256 of a file's contents.
pub fn hash_file(path: &Path) -> Result<String, ScanError> {
    let io_err = |source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(io_err)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn media_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("holiday/beach")).unwrap();
        fs::create_dir_all(root.join(".thumbnails")).unwrap();
        fs::write(root.join("cat.JPG"), b"cat").unwrap();
        fs::write(root.join("holiday/beach/wave.mp4"), b"wave").unwrap();
        fs::write(root.join("holiday/sunset.png"), b"sunset").unwrap();
        fs::write(root.join("holiday/notes.txt"), b"not media").unwrap();
        fs::write(root.join(".thumbnails/cat.jpg"), b"thumb").unwrap();
        fs::write(root.join(".hidden.png"), b"hidden").unwrap();
        dir
    }

    #[test]
    fn test_is_media_file() {
        assert!(is_media_file(Path::new("a/b.jpeg")));
        assert!(is_media_file(Path::new("clip.WebM")));
        assert!(!is_media_file(Path::new("readme.md")));
        assert!(!is_media_file(Path::new("no_extension")));
    }

    #[test]
    fn test_scan_path_keys() {
        let dir = media_tree();
        let keys = scan_media(dir.path(), KeyMode::Path).unwrap();
        assert_eq!(
            keys,
            vec![
                "cat.JPG".to_string(),
                "holiday/beach/wave.mp4".to_string(),
                "holiday/sunset.png".to_string(),
            ]
        );
    }

    #[test]
    fn test_scan_hash_keys_dedupe_identical_content() {
        let dir = media_tree();
        fs::write(dir.path().join("cat_copy.jpg"), b"cat").unwrap();
        let keys = scan_media(dir.path(), KeyMode::Hash).unwrap();
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(|k| k.len() == 64));
    }

    #[test]
    fn test_hash_file_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.png");
        fs::write(&path, b"").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_missing_directory() {
        let err = scan_media(Path::new("/definitely/not/here"), KeyMode::Path).unwrap_err();
        assert!(matches!(err, ScanError::NotADirectory { .. }));
    }

    #[test]
    fn test_key_mode_from_str() {
        assert_eq!("path".parse::<KeyMode>().unwrap(), KeyMode::Path);
        assert_eq!("HASH".parse::<KeyMode>().unwrap(), KeyMode::Hash);
        assert!("inode".parse::<KeyMode>().is_err());
    }
}
