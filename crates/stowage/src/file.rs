// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::{DurableStore, Error, Result};

const TEMP_SUFFIX: &str = ".tmp";
const KEY_LENGTH_PREFIX: usize = 4;
const RECORD_NAME_LENGTH: usize = 64;

/// A durable store that keeps one file per key inside a directory.
///
/// File names are the hex-encoded SHA-256 digest of the key, so every name is 64 characters
/// long regardless of the key. Each file starts with the key itself (a little-endian `u32`
/// length followed by the UTF-8 bytes) and continues with the value; [`read_all`] recovers keys
/// from there. Writes go to a temporary file that is flushed to disk and then atomically renamed
/// over the target, making each write crash-consistent. Leftover temporary files from an
/// interrupted write are ignored and removed by [`FileStore::open`].
///
/// [`read_all`]: DurableStore::read_all
///
/// # Examples
///
/// ```no_run
/// use bytes::Bytes;
/// use stowage::{DurableStore, FileStore};
///
/// # async fn example() -> stowage::Result<()> {
/// let store = FileStore::open("/var/lib/app/store").await?;
/// store.write("settings", Bytes::from_static(b"{}")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    root: Arc<PathBuf>,
    temp_counter: Arc<AtomicU64>,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or listed.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;

        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX) {
                if let Err(error) = tokio::fs::remove_file(entry.path()).await {
                    tracing::event!(
                        name: "stowage.cleanup",
                        tracing::Level::WARN,
                        store.path = %entry.path().display(),
                        error = %error,
                        "failed to remove interrupted write",
                    );
                }
            }
        }

        Ok(Self {
            root: Arc::new(root),
            temp_counter: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Returns the directory backing this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(file_name(key))
    }

    fn temp_path_for(&self, key: &str) -> PathBuf {
        let sequence = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!("{}.{sequence}{TEMP_SUFFIX}", file_name(key)))
    }
}

fn file_name(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn is_record_name(name: &str) -> bool {
    name.len() == RECORD_NAME_LENGTH && name.bytes().all(|byte| byte.is_ascii_hexdigit())
}

fn key_header(key: &str) -> Result<[u8; KEY_LENGTH_PREFIX]> {
    let length = u32::try_from(key.len()).map_err(Error::caused_by)?;
    Ok(length.to_le_bytes())
}

/// Splits a record file into its key and value.
fn split_record(contents: Bytes) -> Option<(String, Bytes)> {
    let (length, rest) = contents.split_first_chunk::<KEY_LENGTH_PREFIX>()?;
    let length = usize::try_from(u32::from_le_bytes(*length)).ok()?;
    let (key, _) = rest.split_at_checked(length)?;
    let key = std::str::from_utf8(key).ok()?.to_owned();
    let value = contents.slice(KEY_LENGTH_PREFIX + length..);
    Some((key, value))
}

impl DurableStore for FileStore {
    async fn read_all(&self) -> Result<Vec<(String, Bytes)>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(self.root.as_path()).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_record_name(&name) {
                continue;
            }

            let contents = match tokio::fs::read(entry.path()).await {
                Ok(contents) => Bytes::from(contents),
                // Deleted concurrently between listing and reading.
                Err(error) if error.kind() == ErrorKind::NotFound => continue,
                Err(error) => return Err(Error::from(error)),
            };

            match split_record(contents) {
                Some((key, value)) if file_name(&key) == name => records.push((key, value)),
                _ => tracing::event!(
                    name: "stowage.malformed",
                    tracing::Level::WARN,
                    store.path = %entry.path().display(),
                    "skipping file that is not a store record",
                ),
            }
        }

        Ok(records)
    }

    async fn read(&self, key: &str) -> Result<Option<Bytes>> {
        let contents = match tokio::fs::read(self.path_for(key)).await {
            Ok(contents) => Bytes::from(contents),
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        match split_record(contents) {
            Some((stored, value)) if stored == key => Ok(Some(value)),
            Some(_) => Ok(None),
            None => Err(Error::from_message(format!("record for '{key}' is malformed"))),
        }
    }

    async fn write(&self, key: &str, value: Bytes) -> Result<()> {
        let header = key_header(key)?;
        let temp = self.temp_path_for(key);

        let result = async {
            let mut file = tokio::fs::File::create(&temp).await?;
            file.write_all(&header).await?;
            file.write_all(key.as_bytes()).await?;
            file.write_all(&value).await?;
            file.sync_all().await?;
            tokio::fs::rename(&temp, self.path_for(key)).await
        }
        .await;

        if let Err(error) = result {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(error.into());
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Err(error) if error.kind() != ErrorKind::NotFound => Err(error.into()),
            _ => Ok(()),
        }
    }
}
