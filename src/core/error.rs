//! Purpose: Crate-wide error value with a stable kind taxonomy.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Every fallible operation in the crate returns this type.
//! Invariants: Kinds are additive-only; exit codes never change once assigned.
use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    /// The uri is claimed by another live owner; retry later.
    ConcurrentAccess,
    Transport,
    /// The server answered with an error payload.
    Server,
    AttributeResolution,
    Corrupt,
    Io,
    Permission,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    path: Option<PathBuf>,
    uri: Option<String>,
    status: Option<u16>,
    reason: Option<String>,
    caller_pid: Option<u32>,
    owner_pid: Option<u32>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            path: None,
            uri: None,
            status: None,
            reason: None,
            caller_pid: None,
            owner_pid: None,
            source: None,
        }
    }

    /// Uri held by a live owner other than the caller.
    pub fn concurrent_access(caller_pid: u32, owner_pid: u32, uri: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::ConcurrentAccess)
            .with_message(format!("uri is locked by process {owner_pid}"))
            .with_uri(uri);
        err.caller_pid = Some(caller_pid);
        err.owner_pid = Some(owner_pid);
        err
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn caller_pid(&self) -> Option<u32> {
        self.caller_pid
    }

    pub fn owner_pid(&self) -> Option<u32> {
        self.owner_pid
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_status(mut self, status: u16, reason: impl Into<String>) -> Self {
        self.status = Some(status);
        self.reason = Some(reason.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let (Some(status), Some(reason)) = (self.status, &self.reason) {
            write!(f, " ({status} {reason})")?;
        }
        if let Some(uri) = &self.uri {
            write!(f, " (uri: {uri})")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::ConcurrentAccess => 3,
        ErrorKind::Transport => 4,
        ErrorKind::Server => 5,
        ErrorKind::AttributeResolution => 6,
        ErrorKind::Corrupt => 7,
        ErrorKind::Io => 8,
        ErrorKind::Permission => 9,
    }
}
