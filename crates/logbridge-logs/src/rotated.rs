use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Rotated siblings of a live log file
///
/// For a live file `messages`, `messages.0` is the most recently rotated,
/// still uncompressed file and `messages.<n>.gz` are older compressed ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotatedLogs {
    /// Uncompressed rotated file, if present
    pub main: Option<PathBuf>,

    /// Compressed files, oldest first
    pub compressed: Vec<PathBuf>,
}

impl RotatedLogs {
    /// Classify directory entry names against the live file's base name
    pub fn from_names<I, S>(dir: &Path, base: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let main_name = format!("{}.0", base);
        let mut logs = Self::default();
        let mut compressed = Vec::new();

        for name in names {
            let name = name.as_ref();
            if name == main_name {
                logs.main = Some(dir.join(name));
            } else if let Some(index) = compressed_index(name, base) {
                compressed.push((index, dir.join(name)));
            }
        }

        // highest index is the oldest
        compressed.sort_by(|a, b| b.0.cmp(&a.0));
        logs.compressed = compressed.into_iter().map(|(_, path)| path).collect();
        logs
    }

    /// List the rotated siblings of `source` on disk
    pub async fn discover(source: &Path) -> io::Result<Self> {
        let dir = match source.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let base = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }

        let logs = Self::from_names(&dir, &base, names);
        debug!(main = ?logs.main, compressed = ?logs.compressed, "Discovered rotated logs");
        Ok(logs)
    }
}

fn compressed_index(name: &str, base: &str) -> Option<u64> {
    name.strip_prefix(base)?
        .strip_prefix('.')?
        .strip_suffix(".gz")?
        .parse()
        .ok()
}
