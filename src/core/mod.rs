// Core modules: lock relation, caches, session state, tabular model, matching, errors.
pub mod clock;
pub(crate) mod csv;
pub mod disk_cache;
pub mod error;
pub mod fuzzy;
pub mod glob;
pub mod lock;
pub mod memcache;
pub mod session;
pub mod table;
