//! Cookie binding table: cookie -> bound media id plus per-cookie load counts
//!
//! The table guards the consistency between "which media is assigned to a
//! cookie" and "how many active loads reference that assignment". Both maps
//! sit behind one lock: writers are mutually exclusive, readers run
//! concurrently. Load counts deliberately survive binding removal and table
//! refills, because they track in-flight consumer interest rather than the
//! assignment itself.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::directory::CookieDefaultRow;
use crate::error::{Error, Result};
use crate::types::{Cookie, MediaId};

#[derive(Debug, Default)]
struct BindingInner {
    media_by_cookie: HashMap<Cookie, MediaId>,
    load_counts: HashMap<Cookie, u32>,
}

/// Mapping from external-source cookie to bound media id, with load counting
#[derive(Debug, Default)]
pub struct CookieBindingTable {
    inner: RwLock<BindingInner>,
}

impl CookieBindingTable {
    /// Create an empty binding table
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BindingInner::default()),
        }
    }

    /// Get the media id bound to a cookie, if any
    pub async fn get(&self, cookie: Cookie) -> Option<MediaId> {
        self.inner.read().await.media_by_cookie.get(&cookie).copied()
    }

    /// Bind a cookie to a media id, replacing any previous binding
    pub async fn set(&self, cookie: Cookie, media_id: MediaId) {
        trace!("Binding cookie {} to media {}", cookie, media_id);
        self.inner.write().await.media_by_cookie.insert(cookie, media_id);
    }

    /// Remove the binding for a cookie, returning the media id it held.
    ///
    /// The cookie's load count is left untouched.
    pub async fn remove(&self, cookie: Cookie) -> Option<MediaId> {
        self.inner.write().await.media_by_cookie.remove(&cookie)
    }

    /// Current load count for a cookie (0 when the cookie was never loaded)
    pub async fn load_count(&self, cookie: Cookie) -> u32 {
        self.inner.read().await.load_counts.get(&cookie).copied().unwrap_or(0)
    }

    /// Increment the cookie's load count, returning the new count
    pub async fn increment_load_count(&self, cookie: Cookie) -> u32 {
        let mut inner = self.inner.write().await;
        let count = inner.load_counts.entry(cookie).or_insert(0);
        *count += 1;
        *count
    }

    /// Decrement the cookie's load count, returning the new count.
    ///
    /// Fails with [`Error::LoadCountUnderflow`] when the count is already 0;
    /// the table is left unchanged in that case.
    pub async fn decrement_load_count(&self, cookie: Cookie) -> Result<u32> {
        let mut inner = self.inner.write().await;
        match inner.load_counts.get_mut(&cookie) {
            Some(count) if *count > 0 => {
                *count -= 1;
                Ok(*count)
            }
            _ => Err(Error::underflow(cookie)),
        }
    }

    /// Whether the cookie has ever been load-counted (distinct from count 0)
    pub async fn has_load_count(&self, cookie: Cookie) -> bool {
        self.inner.read().await.load_counts.contains_key(&cookie)
    }

    /// Replace the cookie -> media assignments from the default-media table.
    ///
    /// Only the binding half is rebuilt; load counts are untouched. Rows
    /// naming the reserved media id 0 are skipped.
    pub async fn fill_from_defaults<I>(&self, rows: I) -> usize
    where
        I: IntoIterator<Item = CookieDefaultRow>,
    {
        let mut media_by_cookie = HashMap::new();
        for row in rows {
            let media_id = MediaId::new(row.media_id);
            if media_id.is_unbound() {
                warn!(
                    "Default media table: skipping source {} ({:?}) with reserved media id 0",
                    row.cookie, row.source_name
                );
                continue;
            }
            trace!(
                "Default media table: source {} ({:?}) mapped to media {} ({:?})",
                row.cookie,
                row.source_name,
                row.media_id,
                row.media_name
            );
            media_by_cookie.insert(Cookie::new(row.cookie), media_id);
        }

        let count = media_by_cookie.len();
        {
            let mut inner = self.inner.write().await;
            if !inner.media_by_cookie.is_empty() {
                debug!("Default media table: emptying cookie to media map");
            }
            inner.media_by_cookie = media_by_cookie;
        }
        debug!("Default media table: {} cookies mapped", count);
        count
    }

    /// Number of bound cookies
    pub async fn len(&self) -> usize {
        self.inner.read().await.media_by_cookie.len()
    }

    /// Whether no cookie is bound
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.media_by_cookie.is_empty()
    }
}
