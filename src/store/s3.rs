use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::paste::Paste;

use super::{BurnClaim, Store, StoreError};

/// Object-store backend: the two halves live at `<prefix><id>` and
/// `<prefix><id>.json`.
///
/// Objects cannot be renamed, so the burn claim is linearized by a
/// conditional put (`If-None-Match: *`) of a marker object; the winner then
/// copies both halves to the claim keys and the public keys are deleted by
/// the caller. A 412 on the marker means another reader holds the claim.
pub struct S3Store {
    client: Client,
    bucket: String,
    prefix: String,
    counter_lock: Mutex<()>,
}

impl S3Store {
    pub async fn connect(bucket: impl Into<String>, prefix: impl Into<String>) -> S3Store {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        S3Store::with_client(Client::new(&config), bucket, prefix)
    }

    pub fn with_client(
        client: Client,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> S3Store {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }

        S3Store { client, bucket: bucket.into(), prefix, counter_lock: Mutex::new(()) }
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    fn metadata_key(&self, id: &str) -> String {
        format!("{}{}.json", self.prefix, id)
    }

    async fn put(&self, key: String, bytes: Bytes) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| object_err("put", &e))?;
        Ok(())
    }

    async fn get(&self, key: String) -> Result<Option<Bytes>, StoreError> {
        match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(out) => {
                let data =
                    out.body.collect().await.map_err(|e| StoreError::Object(e.to_string()))?;
                Ok(Some(data.into_bytes()))
            }
            Err(e) if status_of(&e) == Some(404) => Ok(None),
            Err(e) => Err(object_err("get", &e)),
        }
    }

    async fn delete_key(&self, key: String) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| object_err("delete", &e))?;
        Ok(())
    }

    /// Server-side copy; `Ok(false)` means the source is gone.
    async fn copy(&self, src: &str, dst: String) -> Result<bool, StoreError> {
        let source = format!("{}/{}", self.bucket, urlencoding::encode(src));

        match self
            .client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(source)
            .key(dst)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if status_of(&e) == Some(404) => Ok(false),
            Err(e) => Err(object_err("copy", &e)),
        }
    }
}

fn status_of<E>(err: &SdkError<E>) -> Option<u16> {
    err.raw_response().map(|resp| resp.status().as_u16())
}

fn object_err<E: std::fmt::Display>(op: &str, err: &SdkError<E>) -> StoreError {
    StoreError::Object(format!("{op} failed: {err}"))
}

#[async_trait]
impl Store for S3Store {
    async fn put_content(&self, id: &str, bytes: Bytes) -> Result<(), StoreError> {
        self.put(self.key(id), bytes).await
    }

    async fn put_metadata(&self, id: &str, meta: &Paste) -> Result<(), StoreError> {
        self.put(self.metadata_key(id), Bytes::from(serde_json::to_vec(meta)?)).await
    }

    async fn get_metadata(&self, id: &str) -> Result<Option<Paste>, StoreError> {
        match self.get(self.metadata_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn get_content(&self, id: &str) -> Result<Option<Bytes>, StoreError> {
        self.get(self.key(id)).await
    }

    async fn get_content_prefix(&self, id: &str, n: usize) -> Result<Option<Bytes>, StoreError> {
        if n == 0 {
            return Ok(self.stat_content(id).await?.map(|_| Bytes::new()));
        }

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(id))
            .range(format!("bytes=0-{}", n - 1));

        match request.send().await {
            Ok(out) => {
                let data =
                    out.body.collect().await.map_err(|e| StoreError::Object(e.to_string()))?;
                Ok(Some(data.into_bytes()))
            }
            Err(e) if status_of(&e) == Some(404) => Ok(None),
            // a zero-length object cannot satisfy any range
            Err(e) if status_of(&e) == Some(416) => Ok(Some(Bytes::new())),
            Err(e) => Err(object_err("ranged get", &e)),
        }
    }

    async fn stat_content(&self, id: &str) -> Result<Option<u64>, StoreError> {
        match self.client.head_object().bucket(&self.bucket).key(self.key(id)).send().await {
            Ok(out) => {
                Ok(Some(out.content_length().and_then(|len| len.try_into().ok()).unwrap_or(0)))
            }
            Err(e) if status_of(&e) == Some(404) => Ok(None),
            Err(e) => Err(object_err("head", &e)),
        }
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.metadata_key(id))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if status_of(&e) == Some(404) => Ok(false),
            Err(e) => Err(object_err("head", &e)),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.delete_key(self.key(id)).await?;
        self.delete_key(self.metadata_key(id)).await?;
        Ok(())
    }

    async fn increment_read_count(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.counter_lock.lock().await;

        let Some(mut meta) = self.get_metadata(id).await? else {
            return Err(StoreError::Object("metadata record missing".to_owned()));
        };

        meta.read_count += 1;
        self.put_metadata(id, &meta).await
    }

    async fn claim(&self, id: &str) -> Result<Option<BurnClaim>, StoreError> {
        let claim = BurnClaim::new(id);
        let marker = self.key(&claim.marker_key());

        let put_marker = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&marker)
            .if_none_match("*")
            .body(ByteStream::from(Bytes::from(claim.stamp.to_string())))
            .send()
            .await;

        match put_marker {
            Ok(_) => {}
            Err(e) if status_of(&e) == Some(412) => return Ok(None),
            Err(e) => return Err(object_err("claim marker", &e)),
        }

        match self.copy(&self.key(id), self.key(&claim.content_key())).await {
            // source already gone: burned and cleaned up before our marker landed
            Ok(false) => {
                if let Err(e) = self.delete_key(marker).await {
                    log::warn!("failed to remove stale burn marker for {id}: {e}");
                }
                return Ok(None);
            }
            Ok(true) => {}
            Err(e) => {
                if let Err(del) = self.delete_key(marker).await {
                    log::warn!("failed to remove burn marker for {id}: {del}");
                }
                return Err(e);
            }
        }

        // a missing or uncopyable metadata half is an orphan; the content claim stands
        match self.copy(&self.metadata_key(id), self.key(&claim.metadata_key())).await {
            Ok(true) => {}
            Ok(false) => log::warn!("burn claim for {id}: metadata half missing"),
            Err(e) => log::warn!("burn claim for {id}: metadata copy failed: {e}"),
        }

        Ok(Some(claim))
    }

    async fn read_claimed(&self, claim: &BurnClaim) -> Result<Bytes, StoreError> {
        match self.get(self.key(&claim.content_key())).await? {
            Some(bytes) => Ok(bytes),
            None => Err(StoreError::Object("claimed content vanished".to_owned())),
        }
    }

    async fn discard_claim(&self, claim: &BurnClaim) {
        for key in [claim.content_key(), claim.metadata_key(), claim.marker_key()] {
            if let Err(e) = self.delete_key(self.key(&key)).await {
                log::warn!("failed to remove burn temporary {key}: {e}");
            }
        }
    }
}
