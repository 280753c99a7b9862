//! Sequentially numbered artifact paths (`1.png`, `2.png`, ...).

use std::path::{Path, PathBuf};

use regex::Regex;
use tokio::fs;

/// Next free `<N>.<ext>` path in `dir`, one past the highest existing number.
///
/// Creates `dir` if it does not exist. Files that are not purely numeric
/// (`cover.png`, `7-old.png`) are ignored, and gaps are not reused.
pub async fn next_sequential_path(dir: &Path, ext: &str) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir).await?;

    let pattern = Regex::new(&format!(r"^(\d+)\.{}$", regex::escape(ext)))
        .map_err(std::io::Error::other)?;

    let mut max_number: u64 = 0;
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(captures) = name.to_str().and_then(|n| pattern.captures(n)) else {
            continue;
        };
        if let Ok(n) = captures[1].parse::<u64>() {
            max_number = max_number.max(n);
        }
    }

    Ok(dir.join(format!("{}.{ext}", max_number + 1)))
}
