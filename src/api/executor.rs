//! Purpose: Run one logical archive call: lock, cache decision, transport, session, unlock.
//! Exports: `RequestExecutor`, `Mode`, `join_uri`, `OFFLINE_TIMEOUT`.
//! Role: Sole serialization point between processes sharing a cache directory.
//! Invariants: A uri's lock row is released on every exit path of `execute`.
//! Invariants: Release deletes only the row this call holds, never a reclaimer's.
//! Invariants: Mutating calls clear the memory cache before reaching the network.
//! Invariants: A 404 triggers at most one root probe and one retry.
#![allow(clippy::result_large_err)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::classify::{ErrorClassifier, HtmlErrorClassifier};
use super::transport::{Method, Transport, TransportRequest, TransportResponse};
use crate::core::clock::{Clock, SystemClock};
use crate::core::disk_cache::PersistentCache;
use crate::core::error::{Error, ErrorKind};
use crate::core::lock::{ClaimOutcome, LockRow, LockStore, STALE_LOCK_SECS};
use crate::core::memcache::{DEFAULT_MEMORY_TTL_SECS, MemoryCache};
use crate::core::session::SessionState;

/// Upper bound on the network fallback in offline mode.
pub const OFFLINE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Mode {
    /// Gate GETs on the memory cache, otherwise go to the network.
    #[default]
    Online,
    /// Prefer the persistent cache; fall back to a bounded network call.
    Offline,
}

enum Attempt {
    Done(Vec<u8>),
    Relocated,
}

pub struct RequestExecutor {
    server: String,
    transport: Box<dyn Transport>,
    cache: Box<dyn PersistentCache>,
    classifier: Box<dyn ErrorClassifier>,
    locks: LockStore,
    memcache: MemoryCache,
    session: SessionState,
    clock: Arc<dyn Clock>,
    owner: u32,
    mode: Mode,
    stale_after: f64,
    offline_timeout: Duration,
    latencies: HashMap<String, Duration>,
}

impl RequestExecutor {
    pub fn new(
        server: impl Into<String>,
        transport: Box<dyn Transport>,
        cache: Box<dyn PersistentCache>,
        locks: LockStore,
    ) -> Self {
        Self {
            server: server.into().trim_end_matches('/').to_string(),
            transport,
            cache,
            classifier: Box::new(HtmlErrorClassifier),
            locks,
            memcache: MemoryCache::new(DEFAULT_MEMORY_TTL_SECS),
            session: SessionState::default(),
            clock: Arc::new(SystemClock),
            owner: std::process::id(),
            mode: Mode::Online,
            stale_after: STALE_LOCK_SECS,
            offline_timeout: OFFLINE_TIMEOUT,
            latencies: HashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Lock owner id recorded in claims. Defaults to the process id.
    pub fn with_owner(mut self, owner: u32) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_classifier(mut self, classifier: Box<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_memory_ttl(mut self, ttl: f64) -> Self {
        self.memcache.set_ttl(ttl);
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn owner(&self) -> u32 {
        self.owner
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn set_memory_ttl(&mut self, ttl: f64) {
        self.memcache.set_ttl(ttl);
    }

    pub fn memory_cache(&self) -> &MemoryCache {
        &self.memcache
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn set_session_token(&mut self, token: impl Into<String>) {
        self.session.replace(token);
    }

    pub fn locks(&self) -> &LockStore {
        &self.locks
    }

    pub fn persistent_cache(&self) -> &dyn PersistentCache {
        self.cache.as_ref()
    }

    /// Duration of the last network fetch of `uri` (absolute or server-relative).
    pub fn latency(&self, uri: &str) -> Option<Duration> {
        self.latencies.get(&join_uri(&self.server, uri)).copied()
    }

    pub fn execute(
        &mut self,
        uri: &str,
        method: Method,
        body: Option<&[u8]>,
        headers: &[(String, String)],
    ) -> Result<Vec<u8>, Error> {
        let relative = self.relative_uri(uri);
        match self.execute_once(&relative, method, body, headers, true)? {
            Attempt::Done(content) => Ok(content),
            Attempt::Relocated => match self.execute_once(&relative, method, body, headers, false)? {
                Attempt::Done(content) => Ok(content),
                Attempt::Relocated => Err(Error::new(ErrorKind::Internal)
                    .with_message("relocation attempted twice")
                    .with_uri(relative)),
            },
        }
    }

    fn execute_once(
        &mut self,
        uri: &str,
        method: Method,
        body: Option<&[u8]>,
        headers: &[(String, String)],
        allow_relocation: bool,
    ) -> Result<Attempt, Error> {
        let url = join_uri(&self.server, uri);
        let claim = self.acquire(&url)?;
        let result = self.perform(&url, method, body, headers, allow_relocation);
        match self.locks.release_claim(&claim) {
            Ok(true) => {}
            Ok(false) => warn!(uri = %url, "uri lock was reclaimed before release"),
            Err(err) => warn!(uri = %url, error = %err, "failed to release uri lock"),
        }
        result
    }

    /// Claims `url` for this owner and returns the row now held.
    fn acquire(&self, url: &str) -> Result<LockRow, Error> {
        let now = self.clock.now();
        let held = LockRow {
            uri: url.to_string(),
            owner: self.owner,
            claimed_at: now,
        };
        let row = match self.locks.claim(url, self.owner, now)? {
            ClaimOutcome::Claimed => return Ok(held),
            ClaimOutcome::Conflict(row) => row,
        };
        if row.owner != self.owner && !row.is_stale(now, self.stale_after) {
            return Err(Error::concurrent_access(self.owner, row.owner, url));
        }
        debug!(
            uri = %url,
            owner = row.owner,
            age = row.age(now),
            "reclaiming uri lock"
        );
        self.locks.reclaim(&row)?;
        match self.locks.claim(url, self.owner, now)? {
            ClaimOutcome::Claimed => Ok(held),
            ClaimOutcome::Conflict(row) => Err(Error::concurrent_access(self.owner, row.owner, url)),
        }
    }

    fn perform(
        &mut self,
        url: &str,
        method: Method,
        body: Option<&[u8]>,
        headers: &[(String, String)],
        allow_relocation: bool,
    ) -> Result<Attempt, Error> {
        let mut headers: Vec<(String, String)> = headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("cookie"))
            .cloned()
            .collect();
        headers.push(("cookie".to_string(), self.session.token().to_string()));

        if method.is_mutating() {
            self.memcache.clear();
        }

        let response = match (method, self.mode) {
            (Method::Get, Mode::Online) => {
                let now = self.clock.now();
                if self.memcache.is_fresh(url, now) {
                    if let Some(content) = self.cache.get(url)? {
                        debug!(uri = %url, "GET served from cache");
                        self.memcache.touch(url, now);
                        return Ok(Attempt::Done(content));
                    }
                }
                self.fetch(url, method, body, &headers, None)?
            }
            (Method::Get, Mode::Offline) => {
                if let Some(content) = self.cache.get(url)? {
                    debug!(uri = %url, "GET served from cache (offline)");
                    return Ok(Attempt::Done(content));
                }
                self.fetch(url, method, body, &headers, Some(self.offline_timeout))?
            }
            _ => self.transport.request(&TransportRequest {
                url,
                method,
                body,
                headers: &headers,
                timeout: None,
            })?,
        };

        self.handle_response(url, method, response, allow_relocation)
    }

    /// Network GET with latency bookkeeping.
    fn fetch(
        &mut self,
        url: &str,
        method: Method,
        body: Option<&[u8]>,
        headers: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<TransportResponse, Error> {
        let started = Instant::now();
        let response = self.transport.request(&TransportRequest {
            url,
            method,
            body,
            headers,
            timeout,
        })?;
        let elapsed = started.elapsed();
        debug!(uri = %url, status = response.status, elapsed_ms = elapsed.as_millis() as u64, "GET");
        self.latencies.insert(url.to_string(), elapsed);
        self.memcache.touch(url, self.clock.now());
        Ok(response)
    }

    fn handle_response(
        &mut self,
        url: &str,
        method: Method,
        response: TransportResponse,
        allow_relocation: bool,
    ) -> Result<Attempt, Error> {
        if let Some(cookie) = response.header("set-cookie") {
            if self.session.adopt_set_cookie(cookie) {
                debug!("session token rotated");
            }
        }

        if response.status == 404 {
            if allow_relocation && self.relocate()? {
                return Ok(Attempt::Relocated);
            }
            return Err(Error::new(ErrorKind::Transport)
                .with_message("resource not found")
                .with_status(response.status, response.reason)
                .with_uri(url));
        }

        if let Some(fault) = self.classifier.classify(&response.content) {
            let mut err = Error::new(ErrorKind::Server)
                .with_message(fault.detail)
                .with_uri(url);
            if !response.is_success() {
                err = err.with_status(response.status, response.reason);
            }
            return Err(err);
        }

        if response.status >= 400 {
            return Err(Error::new(ErrorKind::Transport)
                .with_message("request rejected")
                .with_status(response.status, response.reason)
                .with_uri(url));
        }

        if method == Method::Get && response.is_success() {
            self.cache.put(url, &response.content)?;
        }
        Ok(Attempt::Done(response.content))
    }

    /// Probes the bare server url. Returns true when the canonical root moved.
    fn relocate(&mut self) -> Result<bool, Error> {
        let headers = vec![("cookie".to_string(), self.session.token().to_string())];
        let probe = self.transport.request(&TransportRequest {
            url: &self.server,
            method: Method::Get,
            body: None,
            headers: &headers,
            timeout: None,
        })?;
        let location = probe
            .header("content-location")
            .map(|location| location.trim_end_matches('/').to_string())
            .unwrap_or_else(|| self.server.clone());
        if location == self.server {
            return Ok(false);
        }
        info!(from = %self.server, to = %location, "server root relocated");
        self.server = location;
        Ok(true)
    }

    fn relative_uri(&self, uri: &str) -> String {
        match uri.strip_prefix(&self.server) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') => {
                rest.to_string()
            }
            _ => uri.to_string(),
        }
    }
}

/// Resolves `uri` against `server` unless it is already absolute.
pub fn join_uri(server: &str, uri: &str) -> String {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return uri.to_string();
    }
    let server = server.trim_end_matches('/');
    if uri.is_empty() {
        return server.to_string();
    }
    if uri.starts_with('?') {
        return format!("{server}{uri}");
    }
    format!("{server}/{}", uri.trim_start_matches('/'))
}
