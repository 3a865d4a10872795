//! Durable bot state: the branch queue and the review store
//!
//! Both stores keep their contents in memory and, when opened with a path,
//! rewrite a TOML file after every mutation. A missing file is an empty
//! store.

pub mod queue;
pub mod reviews;

pub use queue::BranchQueue;
pub use reviews::ReviewStore;

use crate::error::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Version written into every store file
pub const STORE_VERSION: u32 = 1;

/// Path of the branch queue file for a bot
pub fn queue_path(data_dir: &Path, bot_name: &str) -> PathBuf {
    data_dir.join(format!("{}.branches.toml", escape_file_name(bot_name)))
}

/// Path of the review store file for a bot
pub fn reviews_path(data_dir: &Path, bot_name: &str) -> PathBuf {
    data_dir.join(format!("{}.reviews.toml", escape_file_name(bot_name)))
}

/// Replace characters that are not valid in file names
pub fn escape_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' | ' ' => '-',
            other => other,
        })
        .collect()
}

/// Lock a store mutex; a panic elsewhere never leaves the data half-written
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Load a store file, returning `None` if it doesn't exist
fn load_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Storage(format!("failed to read {}: {e}", path.display())))?;

    let state: T = toml::from_str(&content)
        .map_err(|e| Error::Storage(format!("failed to parse {}: {e}", path.display())))?;

    Ok(Some(state))
}

/// Write a store file with a header comment, creating its directory
fn save_file<T: Serialize>(path: &Path, title: &str, state: &T) -> Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        fs::create_dir_all(dir)
            .map_err(|e| Error::Storage(format!("failed to create {}: {e}", dir.display())))?;
    }

    let content = toml::to_string_pretty(state)
        .map_err(|e| Error::Storage(format!("failed to serialize {title}: {e}")))?;

    let content_with_header =
        format!("# mergebot {title}\n# Auto-generated - manual edits may be overwritten\n\n{content}");

    fs::write(path, content_with_header)
        .map_err(|e| Error::Storage(format!("failed to write {}: {e}", path.display())))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_file_name() {
        assert_eq!(escape_file_name("my bot"), "my-bot");
        assert_eq!(escape_file_name(r#"a/b\c<d>e:f"g|h?i*j"#), "a-b-c-d-e-f-g-h-i-j");
        assert_eq!(escape_file_name("plain"), "plain");
    }

    #[test]
    fn test_store_paths() {
        let dir = Path::new("/var/lib/mergebot");
        assert_eq!(
            queue_path(dir, "ci bot"),
            PathBuf::from("/var/lib/mergebot/ci-bot.branches.toml")
        );
        assert_eq!(
            reviews_path(dir, "ci bot"),
            PathBuf::from("/var/lib/mergebot/ci-bot.reviews.toml")
        );
    }
}
