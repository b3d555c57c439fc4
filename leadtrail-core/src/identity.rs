//! Visitor and session identity
//!
//! The visitor id lives in durable storage and survives restarts; the session id
//! and session start live in ephemeral storage scoped to one browsing session.
//! Both are created lazily on first access and never change afterwards.
//!
//! Storage failures are not errors for the caller: the store logs a warning and
//! keeps a volatile id in memory for the rest of its lifetime.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::utils;

/// Durable key for the visitor id
pub const VISITOR_KEY: &str = "leadtrail_visitor_id";
/// Ephemeral key for the session id
pub const SESSION_KEY: &str = "leadtrail_session_id";
/// Ephemeral key for the session start (epoch milliseconds)
pub const SESSION_START_KEY: &str = "leadtrail_session_start";

/// Cookie lifetime used by [`CookieStorage`]
const COOKIE_DAYS: i64 = 365;

/// Key/value store backing identity
pub trait Storage: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

// ============================================
// Storage backends
// ============================================

/// In-memory storage; the ephemeral (per-session) scope
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    values: HashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// Durable storage: one JSON object per origin under a data directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Storage for `origin` (e.g. `https://example.com`) under `dir`
    pub fn for_origin(dir: &Path, origin: &str) -> Self {
        Self {
            path: dir.join(format!("{}.json", origin_slug(origin))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Storage(format!("failed to read {:?}: {}", self.path, e)))?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content)
            .map_err(|e| Error::Storage(format!("corrupt identity file {:?}: {}", self.path, e)))
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("failed to create {:?}: {}", parent, e)))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(values)?;
        std::fs::write(&tmp, body)
            .map_err(|e| Error::Storage(format!("failed to write {:?}: {}", tmp, e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| Error::Storage(format!("failed to replace {:?}: {}", self.path, e)))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let mut values = self.read_all()?;
        if values.remove(key).is_some() {
            self.write_all(&values)?;
        }
        Ok(())
    }
}

/// Origin (`scheme://host[:port]`) of a page URL, or the input when it does not parse
pub fn origin_of(page_url: &str) -> String {
    match url::Url::parse(page_url) {
        Ok(parsed) => parsed.origin().ascii_serialization(),
        Err(_) => page_url.to_string(),
    }
}

/// Turn an origin into a file-name-safe slug
fn origin_slug(origin: &str) -> String {
    let slug: String = origin
        .trim_end_matches('/')
        .replace("://", "_")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if slug.is_empty() {
        "default".to_string()
    } else {
        slug
    }
}

/// Cookie-jar storage
///
/// Reads from a `Cookie:` header and records a `Set-Cookie` string for every
/// write so the host can hand them back to its cookie jar.
pub struct CookieStorage {
    cookies: BTreeMap<String, String>,
    issued: Vec<String>,
    clock: Arc<dyn Clock>,
}

impl CookieStorage {
    pub fn from_header(header: &str, clock: Arc<dyn Clock>) -> Self {
        let cookies = header
            .split(';')
            .map(str::trim)
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            cookies,
            issued: Vec::new(),
            clock,
        }
    }

    /// Current jar rendered as a `Cookie:` header
    pub fn header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Drain the `Set-Cookie` strings produced since the last call
    pub fn take_set_cookies(&mut self) -> Vec<String> {
        std::mem::take(&mut self.issued)
    }
}

impl Storage for CookieStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(utils::cookie_value(&self.header(), key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if value.contains(';') {
            return Err(Error::Storage(format!("cookie value for {} contains ';'", key)));
        }
        self.cookies.insert(key.to_string(), value.to_string());
        self.issued.push(utils::set_cookie_string(
            key,
            value,
            COOKIE_DAYS,
            self.clock.now(),
        ));
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if self.cookies.remove(key).is_some() {
            self.issued
                .push(utils::set_cookie_string(key, "", -1, self.clock.now()));
        }
        Ok(())
    }
}

// ============================================
// Identity store
// ============================================

/// Snapshot of the current identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub visitor_id: String,
    pub session_id: String,
    pub session_start: DateTime<Utc>,
}

/// Lazily creates and remembers visitor and session identity
pub struct IdentityStore {
    durable: Box<dyn Storage>,
    ephemeral: Box<dyn Storage>,
    clock: Arc<dyn Clock>,
    visitor_id: Option<String>,
    session_id: Option<String>,
    session_start: Option<DateTime<Utc>>,
}

impl IdentityStore {
    pub fn new(
        durable: Box<dyn Storage>,
        ephemeral: Box<dyn Storage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            durable,
            ephemeral,
            clock,
            visitor_id: None,
            session_id: None,
            session_start: None,
        }
    }

    /// Store with both scopes held in memory
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(
            Box::new(MemoryStorage::new()),
            Box::new(MemoryStorage::new()),
            clock,
        )
    }

    /// Visitor id, creating and persisting it on first use
    pub fn visitor_id(&mut self) -> String {
        if let Some(id) = &self.visitor_id {
            return id.clone();
        }

        let id = match self.durable.get(VISITOR_KEY) {
            Ok(Some(existing)) if !existing.is_empty() => existing,
            Ok(_) => {
                let id = utils::generate_id("visitor", self.clock.now());
                if let Err(e) = self.durable.set(VISITOR_KEY, &id) {
                    tracing::warn!(error = %e, "Durable storage unavailable, visitor id is volatile");
                }
                id
            }
            Err(e) => {
                tracing::warn!(error = %e, "Durable storage unavailable, visitor id is volatile");
                utils::generate_id("visitor", self.clock.now())
            }
        };

        tracing::debug!(visitor_id = %id, "Visitor identity resolved");
        self.visitor_id = Some(id.clone());
        id
    }

    /// Session id, creating it (and the session start) on first use
    pub fn session_id(&mut self) -> String {
        if let Some(id) = &self.session_id {
            return id.clone();
        }

        let id = match self.ephemeral.get(SESSION_KEY) {
            Ok(Some(existing)) if !existing.is_empty() => existing,
            Ok(_) => self.create_session(),
            Err(e) => {
                tracing::warn!(error = %e, "Session storage unavailable, session id is volatile");
                self.session_start = Some(self.clock.now());
                utils::generate_id("session", self.clock.now())
            }
        };

        tracing::debug!(session_id = %id, "Session identity resolved");
        self.session_id = Some(id.clone());
        id
    }

    fn create_session(&mut self) -> String {
        let now = self.clock.now();
        let id = utils::generate_id("session", now);
        let stored = self
            .ephemeral
            .set(SESSION_KEY, &id)
            .and_then(|_| {
                self.ephemeral
                    .set(SESSION_START_KEY, &now.timestamp_millis().to_string())
            });
        if let Err(e) = stored {
            tracing::warn!(error = %e, "Session storage unavailable, session id is volatile");
        }
        self.session_start = Some(now);
        id
    }

    /// When the current session started, if known
    pub fn session_start(&mut self) -> Option<DateTime<Utc>> {
        self.session_id();
        if self.session_start.is_none() {
            self.session_start = self
                .ephemeral
                .get(SESSION_START_KEY)
                .ok()
                .flatten()
                .and_then(|raw| raw.parse::<i64>().ok())
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        }
        self.session_start
    }

    /// Milliseconds since the session started; 0 when unknown
    pub fn session_duration_ms(&mut self) -> i64 {
        match self.session_start() {
            Some(start) => (self.clock.now() - start).num_milliseconds().max(0),
            None => 0,
        }
    }

    /// Resolve both ids at once
    pub fn snapshot(&mut self) -> Identity {
        let visitor_id = self.visitor_id();
        let session_id = self.session_id();
        let session_start = self.session_start().unwrap_or_else(|| self.clock.now());
        Identity {
            visitor_id,
            session_id,
            session_start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    struct BrokenStorage;

    impl Storage for BrokenStorage {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::Storage("quota exceeded".to_string()))
        }
        fn set(&mut self, _key: &str, _value: &str) -> Result<()> {
            Err(Error::Storage("quota exceeded".to_string()))
        }
        fn remove(&mut self, _key: &str) -> Result<()> {
            Err(Error::Storage("quota exceeded".to_string()))
        }
    }

    fn clock() -> ManualClock {
        ManualClock::new(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
    }

    #[test]
    fn test_visitor_id_is_stable() {
        let clock = clock();
        let mut store = IdentityStore::in_memory(Arc::new(clock.clone()));

        let first = store.visitor_id();
        clock.advance_ms(60_000);
        assert_eq!(store.visitor_id(), first);
        assert!(first.starts_with("visitor_1700000000000_"));
    }

    #[test]
    fn test_visitor_id_survives_new_store_on_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(clock());

        let first = {
            let durable = FileStorage::for_origin(dir.path(), "https://example.com");
            let mut store = IdentityStore::new(
                Box::new(durable),
                Box::new(MemoryStorage::new()),
                clock.clone(),
            );
            store.visitor_id()
        };

        let durable = FileStorage::for_origin(dir.path(), "https://example.com");
        let mut store =
            IdentityStore::new(Box::new(durable), Box::new(MemoryStorage::new()), clock);
        assert_eq!(store.visitor_id(), first);
    }

    #[test]
    fn test_origins_do_not_share_visitor() {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(clock());

        let mut a = IdentityStore::new(
            Box::new(FileStorage::for_origin(dir.path(), "https://a.example")),
            Box::new(MemoryStorage::new()),
            clock.clone(),
        );
        let mut b = IdentityStore::new(
            Box::new(FileStorage::for_origin(dir.path(), "https://b.example")),
            Box::new(MemoryStorage::new()),
            clock,
        );
        assert_ne!(a.visitor_id(), b.visitor_id());
    }

    #[test]
    fn test_session_duration() {
        let clock = clock();
        let mut store = IdentityStore::in_memory(Arc::new(clock.clone()));

        let session = store.session_id();
        assert!(session.starts_with("session_"));
        assert_eq!(store.session_duration_ms(), 0);

        clock.advance_ms(2_500);
        assert_eq!(store.session_duration_ms(), 2_500);
        assert_eq!(store.session_id(), session);
    }

    #[test]
    fn test_existing_session_reused() {
        let clock = clock();
        let mut ephemeral = MemoryStorage::new();
        ephemeral.set(SESSION_KEY, "session_1_abc").unwrap();
        ephemeral
            .set(SESSION_START_KEY, &(1_700_000_000_000i64 - 4_000).to_string())
            .unwrap();

        let mut store = IdentityStore::new(
            Box::new(MemoryStorage::new()),
            Box::new(ephemeral),
            Arc::new(clock),
        );
        assert_eq!(store.session_id(), "session_1_abc");
        assert_eq!(store.session_duration_ms(), 4_000);
    }

    #[test]
    fn test_missing_session_start_means_zero_duration() {
        let mut ephemeral = MemoryStorage::new();
        ephemeral.set(SESSION_KEY, "session_1_abc").unwrap();
        let mut store = IdentityStore::new(
            Box::new(MemoryStorage::new()),
            Box::new(ephemeral),
            Arc::new(clock()),
        );
        assert_eq!(store.session_duration_ms(), 0);
    }

    #[test]
    fn test_broken_storage_degrades_to_volatile_ids() {
        let clock = clock();
        let mut store = IdentityStore::new(
            Box::new(BrokenStorage),
            Box::new(BrokenStorage),
            Arc::new(clock.clone()),
        );

        let visitor = store.visitor_id();
        let session = store.session_id();
        assert!(visitor.starts_with("visitor_"));
        assert_eq!(store.visitor_id(), visitor);
        assert_eq!(store.session_id(), session);

        clock.advance_ms(1_000);
        assert_eq!(store.session_duration_ms(), 1_000);
    }

    #[test]
    fn test_cookie_storage_issues_set_cookie() {
        let clock: Arc<dyn Clock> = Arc::new(clock());
        let mut cookies = CookieStorage::from_header("theme=dark", clock);

        assert_eq!(cookies.get("theme").unwrap().as_deref(), Some("dark"));
        cookies.set(VISITOR_KEY, "visitor_1_x").unwrap();

        assert_eq!(
            cookies.get(VISITOR_KEY).unwrap().as_deref(),
            Some("visitor_1_x")
        );
        let issued = cookies.take_set_cookies();
        assert_eq!(issued.len(), 1);
        assert!(issued[0].starts_with("leadtrail_visitor_id=visitor_1_x; expires="));
        assert!(cookies.take_set_cookies().is_empty());
    }

    #[test]
    fn test_origin_of_strips_path_and_query() {
        assert_eq!(
            origin_of("https://example.com/contact?utm_source=ads"),
            "https://example.com"
        );
        assert_eq!(origin_of("http://localhost:8080/"), "http://localhost:8080");
        assert_eq!(origin_of("not a url"), "not a url");
    }

    #[test]
    fn test_origin_slug() {
        assert_eq!(origin_slug("https://example.com/"), "https_example.com");
        assert_eq!(origin_slug("http://localhost:5000"), "http_localhost_5000");
        assert_eq!(origin_slug(""), "default");
    }
}
