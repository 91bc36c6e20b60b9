//! Atomic file replacement: temp file + fsync + rename.
//!
//! The write is split into two steps so that callers (and tests) can reason about the
//! window between them: until `commit_temp` runs, the target file is untouched.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

pub const TEMP_SUFFIX: &str = "tmp";

/// `tasks/backend.json` -> `tasks/backend.json.tmp`
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

/// Step 1: write `data` next to `path` and sync it to disk.
pub fn write_temp(path: &Path, data: &[u8]) -> io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = temp_path_for(path);

    let file = File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(data)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    Ok(temp_path)
}

/// Step 2: atomically move the temp file over `path`.
pub fn commit_temp(temp_path: &Path, path: &Path) -> io::Result<()> {
    fs::rename(temp_path, path)?;

    // make the rename itself durable; not every platform lets us open a directory
    #[cfg(unix)]
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }

    debug!(path = %path.display(), "atomic write committed");
    Ok(())
}

pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let temp_path = write_temp(path, data)?;
    commit_temp(&temp_path, path)
}
