use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;

use crate::paste::Paste;

use super::{BurnClaim, Store, StoreError};

/// Filesystem backend: content at `<dir>/<id>`, metadata at `<dir>/<id>.json`.
///
/// Burn claims are POSIX renames, which is what makes them atomic against
/// concurrent claims of the same id.
pub struct FsStore {
    root: PathBuf,
    /// Serializes metadata read-modify-write cycles (the read counter).
    counter_lock: Mutex<()>,
}

impl FsStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<FsStore, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(FsStore { root, counter_lock: Mutex::new(()) })
    }

    fn content_path(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    /// Publish metadata atomically: write a temp sibling, then rename over
    /// the destination, so readers never observe a half-written record.
    async fn write_metadata(&self, id: &str, meta: &Paste) -> Result<(), StoreError> {
        let tmp = self.root.join(format!("{id}.json.tmp"));
        tokio::fs::write(&tmp, serde_json::to_vec(meta)?).await?;
        tokio::fs::rename(&tmp, self.metadata_path(id)).await?;
        Ok(())
    }
}

async fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Store for FsStore {
    async fn put_content(&self, id: &str, bytes: Bytes) -> Result<(), StoreError> {
        tokio::fs::write(self.content_path(id), &bytes).await?;
        Ok(())
    }

    async fn put_metadata(&self, id: &str, meta: &Paste) -> Result<(), StoreError> {
        self.write_metadata(id, meta).await
    }

    async fn get_metadata(&self, id: &str) -> Result<Option<Paste>, StoreError> {
        match tokio::fs::read(self.metadata_path(id)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_content(&self, id: &str) -> Result<Option<Bytes>, StoreError> {
        match tokio::fs::read(self.content_path(id)).await {
            Ok(raw) => Ok(Some(Bytes::from(raw))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_content_prefix(&self, id: &str, n: usize) -> Result<Option<Bytes>, StoreError> {
        let file = match tokio::fs::File::open(self.content_path(id)).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut buf = Vec::with_capacity(n.min(64 * 1024));
        file.take(n as u64).read_to_end(&mut buf).await?;
        Ok(Some(Bytes::from(buf)))
    }

    async fn stat_content(&self, id: &str) -> Result<Option<u64>, StoreError> {
        match tokio::fs::metadata(self.content_path(id)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        match tokio::fs::metadata(self.metadata_path(id)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        remove_if_present(&self.content_path(id)).await?;
        remove_if_present(&self.metadata_path(id)).await?;
        Ok(())
    }

    async fn increment_read_count(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.counter_lock.lock().await;

        let Some(mut meta) = self.get_metadata(id).await? else {
            return Err(StoreError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                "metadata record missing",
            )));
        };

        meta.read_count += 1;
        self.write_metadata(id, &meta).await
    }

    async fn claim(&self, id: &str) -> Result<Option<BurnClaim>, StoreError> {
        let claim = BurnClaim::new(id);

        // the content rename is the linearization point; losing the race
        // surfaces as NotFound here
        match tokio::fs::rename(self.content_path(id), self.root.join(claim.content_key())).await
        {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        // a missing metadata half at this point is an orphan; the claim stands
        match tokio::fs::rename(self.metadata_path(id), self.root.join(claim.metadata_key()))
            .await
        {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                log::warn!("burn claim for {id}: metadata rename failed: {e}");
            }
        }

        Ok(Some(claim))
    }

    async fn read_claimed(&self, claim: &BurnClaim) -> Result<Bytes, StoreError> {
        Ok(Bytes::from(tokio::fs::read(self.root.join(claim.content_key())).await?))
    }

    async fn discard_claim(&self, claim: &BurnClaim) {
        for key in [claim.content_key(), claim.metadata_key()] {
            if let Err(e) = remove_if_present(&self.root.join(&key)).await {
                log::warn!("failed to remove burn temporary {key}: {e}");
            }
        }
    }
}
