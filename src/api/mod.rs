//! Purpose: Define the public Rust API boundary for the archive client.
//! Exports: Client facade, executor, transport seam, attribute access, and core types.
//! Role: Stable surface for the CLI and embedding applications.
//! Invariants: Storage internals are reached only through the types re-exported here.

mod attributes;
mod classify;
mod client;
mod config;
mod executor;
mod transport;

pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::disk_cache::{FileCache, PersistentCache};
pub use crate::core::error::{Error, ErrorKind, to_exit_code};
pub use crate::core::fuzzy::{Candidate, close_matches, similarity};
pub use crate::core::lock::{ClaimOutcome, LockRow, LockStore, STALE_LOCK_SECS};
pub use crate::core::memcache::{DEFAULT_MEMORY_TTL_SECS, MemoryCache};
pub use crate::core::session::{LEGACY_TOKEN_LEN, SessionState};
pub use crate::core::table::{Lookup, RowRef, TabularResult};
pub use attributes::{
    AttributeResolver, ESCAPED_SPACE, MatchPolicy, ObjectRef, escape_value, rank_headers,
    resolve_header, unescape_value,
};
pub use classify::{ErrorClassifier, HtmlErrorClassifier, ServerFault};
pub use client::{ArchiveClient, ClientBuilder, SESSION_PATH, force_csv_format};
pub use config::ClientConfig;
pub use executor::{Mode, OFFLINE_TIMEOUT, RequestExecutor, join_uri};
pub use transport::{Method, Transport, TransportRequest, TransportResponse, UreqTransport};
