//! Purpose: Persisted connection settings for rebuilding a client without prompts.
//! Exports: `ClientConfig`.
//! Role: JSON document with `server`, `user`, `password`, `cachedir`.
//! Invariants: `cachedir` is the base directory; per-user subdirectories are derived.
#![allow(clippy::result_large_err)]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server: String,
    pub user: String,
    pub password: String,
    pub cachedir: PathBuf,
}

impl ClientConfig {
    pub fn new(
        server: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            user: user.into(),
            password: password.into(),
            cachedir: std::env::temp_dir(),
        }
    }

    pub fn with_cachedir(mut self, cachedir: impl Into<PathBuf>) -> Self {
        self.cachedir = cachedir.into();
        self
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read config")
                .with_path(path)
                .with_source(err)
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid config json")
                .with_hint("Expected an object with server, user, password, and cachedir.")
                .with_path(path)
                .with_source(err)
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode config json")
                .with_source(err)
        })?;
        std::fs::write(path, text).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write config")
                .with_path(path)
                .with_source(err)
        })
    }

    pub fn validate(&self) -> Result<(), Error> {
        let url = Url::parse(&self.server).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid server url")
                .with_source(err)
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("server url must use http or https scheme"));
        }
        if self.user.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("user must not be empty"));
        }
        Ok(())
    }

    /// `<cachedir>/<user>@<host[:port][.path]>`, one directory per account and server.
    pub fn user_cache_dir(&self) -> PathBuf {
        let location = self
            .server
            .split_once("//")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.server)
            .trim_end_matches('/')
            .replace('/', ".");
        self.cachedir.join(format!("{}@{}", self.user, location))
    }
}
