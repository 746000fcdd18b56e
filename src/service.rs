use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;

use crate::config::{Config, MAX_TTL, MIN_TTL};
use crate::error::Error;
use crate::media;
use crate::paste::Paste;
use crate::slug;
use crate::store::{bounded, BurnClaim, Store, StoreError, OP_TIMEOUT};

/// Candidates drawn per allocation round.
const ALLOC_BATCH: usize = 5;
/// Rounds before giving up; each round grows the slug by one character.
const ALLOC_ROUNDS: usize = 3;

/// Inputs for minting a paste. The handler has already read, decoded and
/// capped the content.
#[derive(Debug)]
pub struct CreatePaste {
    pub content: Bytes,
    /// Filename hint (multipart uploads) used for classification.
    pub filename: Option<String>,
    /// Client-declared media type; generic declarations are ignored.
    pub declared_type: Option<String>,
    pub custom_slug: Option<String>,
    pub burn_after_read: bool,
    pub ttl: Option<Duration>,
}

/// Business logic over a [`Store`]: slug allocation, expiry enforcement and
/// the two-step create. Every backend call is bounded by [`OP_TIMEOUT`].
pub struct PasteService {
    store: Arc<dyn Store>,
    default_ttl: Duration,
    slug_length: usize,
}

impl PasteService {
    pub fn new(store: Arc<dyn Store>, config: &Config) -> PasteService {
        PasteService {
            store,
            default_ttl: config.default_ttl,
            slug_length: config.slug_length,
        }
    }

    pub async fn create(&self, req: CreatePaste) -> Result<Paste, Error> {
        let ttl = self.resolve_ttl(req.ttl)?;

        let id = match req.custom_slug {
            Some(requested) => self.claim_custom_slug(requested).await?,
            None => self.allocate_slug().await?,
        };

        let now = Utc::now();
        let expires_at =
            Some(now + chrono::Duration::from_std(ttl).map_err(|_| Error::TtlOutOfRange)?);

        let content_type = match req.declared_type.as_deref() {
            Some(declared) if !is_generic_type(declared) => declared.to_ascii_lowercase(),
            _ => media::detect(req.filename.as_deref().unwrap_or(""), &req.content),
        };

        let paste = Paste {
            id: id.clone(),
            created_at: now,
            expires_at,
            size: req.content.len() as u64,
            content_type,
            burn_after_read: req.burn_after_read,
            read_count: 0,
        };

        // content first; a record only exists once both halves landed
        bounded(self.store.put_content(&id, req.content)).await?;

        if let Err(e) = bounded(self.store.put_metadata(&id, &paste)).await {
            if let Err(cleanup) = bounded(self.store.delete(&id)).await {
                log::warn!("orphan content cleanup for {id} failed: {cleanup}");
            }
            return Err(e.into());
        }

        Ok(paste)
    }

    /// Fetch a live record. Expired records and orphan halves are deleted on
    /// access; cleanup failures are logged and never mask the outcome.
    pub async fn get(&self, slug: &str) -> Result<Paste, Error> {
        let Some(meta) = bounded(self.store.get_metadata(slug)).await? else {
            match bounded(self.store.stat_content(slug)).await {
                Ok(Some(_)) => {
                    if let Err(e) = bounded(self.store.delete(slug)).await {
                        log::warn!("orphan content cleanup for {slug} failed: {e}");
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("orphan probe for {slug} failed: {e}"),
            }
            return Err(Error::NotFound);
        };

        if meta.is_expired(Utc::now()) {
            if let Err(e) = bounded(self.store.delete(slug)).await {
                log::warn!("expiry cleanup for {slug} failed: {e}");
            }
            return Err(Error::NotFound);
        }

        Ok(meta)
    }

    pub async fn get_content(&self, slug: &str) -> Result<Option<Bytes>, Error> {
        Ok(bounded(self.store.get_content(slug)).await?)
    }

    pub async fn get_content_prefix(&self, slug: &str, n: usize) -> Result<Option<Bytes>, Error> {
        Ok(bounded(self.store.get_content_prefix(slug, n)).await?)
    }

    pub async fn stat_content(&self, slug: &str) -> Result<Option<u64>, Error> {
        Ok(bounded(self.store.stat_content(slug)).await?)
    }

    pub async fn delete(&self, slug: &str) -> Result<(), Error> {
        Ok(bounded(self.store.delete(slug)).await?)
    }

    /// Best-effort; the counter is informational and failures only get logged.
    pub async fn increment_read_count(&self, slug: &str) {
        if let Err(e) = bounded(self.store.increment_read_count(slug)).await {
            log::warn!("read-count bump for {slug} failed: {e}");
        }
    }

    pub async fn claim(&self, slug: &str) -> Result<Option<BurnClaim>, Error> {
        Ok(bounded(self.store.claim(slug)).await?)
    }

    pub async fn read_claimed(&self, claim: &BurnClaim) -> Result<Bytes, Error> {
        Ok(bounded(self.store.read_claimed(claim)).await?)
    }

    pub async fn discard_claim(&self, claim: &BurnClaim) {
        if tokio::time::timeout(OP_TIMEOUT, self.store.discard_claim(claim)).await.is_err() {
            log::warn!("discarding burn temporaries for {} timed out", claim.id);
        }
    }

    fn resolve_ttl(&self, requested: Option<Duration>) -> Result<Duration, Error> {
        match requested {
            None => Ok(self.default_ttl),
            Some(ttl) if (MIN_TTL..=MAX_TTL).contains(&ttl) => Ok(ttl),
            Some(_) => Err(Error::TtlOutOfRange),
        }
    }

    /// Vanity slugs may reclaim an expired occupant, never a live one.
    async fn claim_custom_slug(&self, requested: String) -> Result<String, Error> {
        if !slug::is_valid(&requested) {
            return Err(Error::InvalidSlug);
        }

        match bounded(self.store.get_metadata(&requested)).await? {
            None => Ok(requested),
            Some(meta) if meta.is_expired(Utc::now()) => {
                self.reap(&requested).await?;
                Ok(requested)
            }
            Some(_) => Err(Error::SlugTaken),
        }
    }

    /// Batches of candidates at growing lengths; a candidate is allocatable
    /// if absent or expired.
    async fn allocate_slug(&self) -> Result<String, Error> {
        let now = Utc::now();

        for round in 0..ALLOC_ROUNDS {
            let length = self.slug_length + round;

            for candidate in slug::generate_batch(ALLOC_BATCH, length) {
                match bounded(self.store.get_metadata(&candidate)).await? {
                    None => return Ok(candidate),
                    Some(meta) if meta.is_expired(now) => {
                        self.reap(&candidate).await?;
                        return Ok(candidate);
                    }
                    Some(_) => {}
                }
            }

            log::warn!("slug batch at length {length} fully collided, growing");
        }

        Err(Error::SlugSpaceExhausted)
    }

    async fn reap(&self, slug: &str) -> Result<(), StoreError> {
        bounded(self.store.delete(slug)).await
    }
}

fn is_generic_type(media_type: &str) -> bool {
    let essence = media_type.split(';').next().unwrap_or("").trim();

    essence.is_empty()
        || essence.eq_ignore_ascii_case("application/octet-stream")
        || essence.eq_ignore_ascii_case("application/x-www-form-urlencoded")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsStore;
    use chrono::TimeDelta;
    use tempfile::TempDir;

    async fn service() -> (TempDir, Arc<FsStore>, PasteService) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsStore::open(dir.path()).await.unwrap());
        let svc = PasteService::new(store.clone(), &Config::default());
        (dir, store, svc)
    }

    fn request(content: &[u8]) -> CreatePaste {
        CreatePaste {
            content: Bytes::copy_from_slice(content),
            filename: None,
            declared_type: None,
            custom_slug: None,
            burn_after_read: false,
            ttl: None,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (_dir, _store, svc) = service().await;

        let paste = svc.create(request(b"hello")).await.unwrap();
        assert!(slug::is_valid(&paste.id));
        assert_eq!(paste.size, 5);
        assert_eq!(paste.content_type, "text/plain; charset=utf-8");
        assert!(paste.expires_at.is_some());

        let fetched = svc.get(&paste.id).await.unwrap();
        assert_eq!(fetched, paste);
        assert_eq!(svc.get_content(&paste.id).await.unwrap().unwrap(), &b"hello"[..]);
    }

    #[tokio::test]
    async fn declared_type_wins_unless_generic() {
        let (_dir, _store, svc) = service().await;

        let mut req = request(b"{}");
        req.declared_type = Some("Application/JSON".to_owned());
        let paste = svc.create(req).await.unwrap();
        assert_eq!(paste.content_type, "application/json");

        let mut req = request(b"hello");
        req.declared_type = Some("application/octet-stream".to_owned());
        let paste = svc.create(req).await.unwrap();
        assert_eq!(paste.content_type, "text/plain; charset=utf-8");
    }

    #[tokio::test]
    async fn ttl_window_is_enforced_before_any_write() {
        let (dir, _store, svc) = service().await;

        let mut req = request(b"x");
        req.ttl = Some(Duration::from_secs(30 * 60));
        assert!(matches!(svc.create(req).await, Err(Error::TtlOutOfRange)));

        let mut req = request(b"x");
        req.ttl = Some(MAX_TTL + Duration::from_secs(1));
        assert!(matches!(svc.create(req).await, Err(Error::TtlOutOfRange)));

        // nothing was persisted
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let mut req = request(b"x");
        req.ttl = Some(MIN_TTL);
        assert!(svc.create(req).await.is_ok());
    }

    #[tokio::test]
    async fn custom_slugs_validate_and_refuse_live_occupants() {
        let (_dir, _store, svc) = service().await;

        let mut req = request(b"x");
        req.custom_slug = Some("BADSLUG!!!".to_owned());
        assert!(matches!(svc.create(req).await, Err(Error::InvalidSlug)));

        let mut req = request(b"x");
        req.custom_slug = Some("ABCDE".to_owned());
        assert_eq!(svc.create(req).await.unwrap().id, "ABCDE");

        let mut req = request(b"y");
        req.custom_slug = Some("ABCDE".to_owned());
        assert!(matches!(svc.create(req).await, Err(Error::SlugTaken)));
    }

    #[tokio::test]
    async fn expired_custom_slug_is_reclaimed() {
        let (_dir, store, svc) = service().await;

        let mut stale = Paste {
            id: "REUSE".to_owned(),
            created_at: Utc::now() - TimeDelta::days(2),
            expires_at: Some(Utc::now() - TimeDelta::hours(1)),
            size: 3,
            content_type: "text/plain".to_owned(),
            burn_after_read: false,
            read_count: 9,
        };
        store.put_content("REUSE", Bytes::from_static(b"old")).await.unwrap();
        store.put_metadata("REUSE", &stale).await.unwrap();

        let mut req = request(b"new");
        req.custom_slug = Some("REUSE".to_owned());
        let paste = svc.create(req).await.unwrap();
        assert_eq!(paste.id, "REUSE");
        assert_eq!(paste.read_count, 0);
        assert_eq!(svc.get_content("REUSE").await.unwrap().unwrap(), &b"new"[..]);

        // a live occupant is still refused after the reclaim
        stale.id = "TAKEN".to_owned();
        stale.expires_at = Some(Utc::now() + TimeDelta::hours(1));
        store.put_metadata("TAKEN", &stale).await.unwrap();
        let mut req = request(b"z");
        req.custom_slug = Some("TAKEN".to_owned());
        assert!(matches!(svc.create(req).await, Err(Error::SlugTaken)));
    }

    #[tokio::test]
    async fn expired_records_vanish_on_access() {
        let (_dir, store, svc) = service().await;

        let paste = svc.create(request(b"soon gone")).await.unwrap();

        let mut meta = store.get_metadata(&paste.id).await.unwrap().unwrap();
        meta.expires_at = Some(Utc::now() - TimeDelta::seconds(1));
        store.put_metadata(&paste.id, &meta).await.unwrap();

        assert!(matches!(svc.get(&paste.id).await, Err(Error::NotFound)));
        // both halves were deleted on that access
        assert!(store.get_metadata(&paste.id).await.unwrap().is_none());
        assert!(store.get_content(&paste.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_metadata_half_reports_not_found_and_reaps_content() {
        let (_dir, store, svc) = service().await;

        store.put_content("GHOST", Bytes::from_static(b"orphan")).await.unwrap();

        assert!(matches!(svc.get("GHOST").await, Err(Error::NotFound)));
        assert!(store.get_content("GHOST").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_count_failures_are_swallowed() {
        let (_dir, _store, svc) = service().await;
        // no such record; must not panic or error
        svc.increment_read_count("ZZZZZ").await;
    }
}
