//! Small JSON state files written atomically

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Write `value` as JSON via a temp file and rename
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
    }

    let json = serde_json::to_vec_pretty(value).context("Failed to serialize state")?;

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;

    file.write_all(&json).context("Failed to write state")?;
    file.sync_all().context("Failed to sync state file")?;

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    Ok(())
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open state file {:?}", path))?;

    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .context("Failed to read state file")?;

    serde_json::from_slice(&data).context("Failed to deserialize state")
}
