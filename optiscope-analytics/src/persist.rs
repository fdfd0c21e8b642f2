use crate::error::AnalyticsError;
use serde::{Serialize, de::DeserializeOwned};
use std::{
    fs::{self, File},
    io::{ErrorKind, Write},
    path::Path,
};

/// Replace the file at `path` with the JSON encoding of `value`.
///
/// The document is written to a sibling temp file, flushed to disk and then
/// renamed over the target, so readers only ever observe a complete file.
pub fn write_json_atomic<T>(path: &Path, value: &T) -> Result<(), AnalyticsError>
where
    T: Serialize + ?Sized,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    Ok(())
}

/// Read a JSON document, returning `None` if the file does not exist.
pub fn read_json<T>(path: &Path) -> Result<Option<T>, AnalyticsError>
where
    T: DeserializeOwned,
{
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

/// Run filesystem work on the blocking pool so it never stalls the async runtime.
pub async fn off_runtime<T, F>(work: F) -> Result<T, AnalyticsError>
where
    F: FnOnce() -> Result<T, AnalyticsError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

/// Remove a file, ignoring one that is already gone.
pub fn remove_file(path: &Path) -> Result<(), AnalyticsError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::path::PathBuf;

    /// Fresh scratch directory under the system temp dir.
    pub fn scratch_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "optiscope-{label}-{}",
            rand::random::<u64>()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
