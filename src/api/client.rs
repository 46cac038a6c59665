//! Purpose: Client facade owning one executor and its per-instance state.
//! Exports: `ArchiveClient`, `ClientBuilder`, `SESSION_PATH`, `force_csv_format`.
//! Role: Entry point for bindings and the CLI; wires stores, transport, and session.
//! Invariants: Memory cache and session token live exactly as long as the client.
//! Invariants: Table reads always request `format=csv`.
#![allow(clippy::result_large_err)]

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::attributes::{AttributeResolver, MatchPolicy, ObjectRef};
use super::config::ClientConfig;
use super::executor::{Mode, RequestExecutor, join_uri};
use super::transport::{Method, Transport, UreqTransport};
use crate::core::clock::Clock;
use crate::core::disk_cache::FileCache;
use crate::core::error::{Error, ErrorKind};
use crate::core::lock::LockStore;
use crate::core::table::TabularResult;

pub const SESSION_PATH: &str = "/REST/JSESSION";

pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Box<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    owner: Option<u32>,
    mode: Mode,
    memory_ttl: Option<f64>,
    negotiate_session: bool,
}

impl ClientBuilder {
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn owner(mut self, owner: u32) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn memory_ttl(mut self, ttl: f64) -> Self {
        self.memory_ttl = Some(ttl);
        self
    }

    /// Skip the session endpoint and authenticate with credentials on every call.
    pub fn without_session(mut self) -> Self {
        self.negotiate_session = false;
        self
    }

    pub fn connect(self) -> Result<ArchiveClient, Error> {
        self.config.validate()?;
        let cache_root = self.config.user_cache_dir();
        std::fs::create_dir_all(&cache_root).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to create cache directory")
                .with_path(&cache_root)
                .with_source(err)
        })?;
        let locks = LockStore::open(cache_root.join("lock.db"))?;
        let cache = FileCache::open(cache_root.join("http"))?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Box::new(
                UreqTransport::new().with_basic_auth(&self.config.user, &self.config.password),
            ),
        };

        let mut executor =
            RequestExecutor::new(self.config.server.clone(), transport, Box::new(cache), locks)
                .with_mode(self.mode);
        if let Some(clock) = self.clock {
            executor = executor.with_clock(clock);
        }
        if let Some(owner) = self.owner {
            executor = executor.with_owner(owner);
        }
        if let Some(ttl) = self.memory_ttl {
            executor = executor.with_memory_ttl(ttl);
        }

        let mut client = ArchiveClient {
            config: self.config,
            executor,
        };
        if self.negotiate_session {
            client.login()?;
        }
        Ok(client)
    }
}

pub struct ArchiveClient {
    config: ClientConfig,
    executor: RequestExecutor,
}

impl ArchiveClient {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            clock: None,
            owner: None,
            mode: Mode::Online,
            memory_ttl: None,
            negotiate_session: true,
        }
    }

    pub fn connect(config: ClientConfig) -> Result<Self, Error> {
        Self::builder(config).connect()
    }

    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::connect(ClientConfig::load(path)?)
    }

    /// Trades credentials for a session cookie used by every later call.
    pub fn login(&mut self) -> Result<(), Error> {
        let content = self.executor.execute(SESSION_PATH, Method::Get, None, &[])?;
        let session_id = String::from_utf8_lossy(&content).trim().to_string();
        if session_id.is_empty() {
            return Err(Error::new(ErrorKind::Server)
                .with_message("session endpoint returned an empty id")
                .with_uri(SESSION_PATH));
        }
        self.executor.set_session_token(format!("JSESSIONID={session_id}"));
        // Session ids must not outlive the process in the response cache.
        let url = join_uri(self.executor.server(), SESSION_PATH);
        self.executor.persistent_cache().remove(&url)?;
        debug!(server = %self.executor.server(), "session negotiated");
        Ok(())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn server(&self) -> &str {
        self.executor.server()
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut RequestExecutor {
        &mut self.executor
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.executor.set_mode(mode);
    }

    pub fn set_memory_ttl(&mut self, ttl: f64) {
        self.executor.set_memory_ttl(ttl);
    }

    pub fn exec(
        &mut self,
        uri: &str,
        method: Method,
        body: Option<&[u8]>,
        headers: &[(String, String)],
    ) -> Result<Vec<u8>, Error> {
        self.executor.execute(uri, method, body, headers)
    }

    pub fn get_table(&mut self, uri: &str) -> Result<TabularResult, Error> {
        let uri = force_csv_format(uri);
        let content = self.executor.execute(&uri, Method::Get, None, &[])?;
        let text = String::from_utf8(content).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("table response is not utf-8")
                .with_uri(uri.clone())
                .with_source(err)
        })?;
        TabularResult::from_csv(&text).map_err(|err| err.with_uri(uri))
    }

    pub fn attrs(&mut self, object: ObjectRef) -> AttributeResolver<'_> {
        AttributeResolver::new(self, object)
    }

    pub fn attrs_with_policy(
        &mut self,
        object: ObjectRef,
        policy: MatchPolicy,
    ) -> AttributeResolver<'_> {
        AttributeResolver::new(self, object).with_policy(policy)
    }

    /// Writes the current settings, including a relocated server root.
    pub fn save_config(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let mut config = self.config.clone();
        config.server = self.executor.server().to_string();
        config.save(path)
    }
}

/// Rewrites `uri` so the server answers in CSV.
pub fn force_csv_format(uri: &str) -> String {
    if uri.contains("format=json") {
        return uri.replace("format=json", "format=csv");
    }
    if uri.contains("format=csv") {
        return uri.to_string();
    }
    if uri.contains('?') {
        format!("{uri}&format=csv")
    } else {
        format!("{uri}?format=csv")
    }
}
