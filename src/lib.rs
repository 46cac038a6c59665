//! Purpose: Library crate behind the `archive-client` CLI.
//! Exports: `api` (client facade, executor, tables) and `core` (stores, caches, errors).
//! Role: Mediates access to a remote archive with local caching and cross-process uri locks.
//! Invariants: No process-wide singletons; all mutable state is owned by a client instance.
pub mod api;
pub mod core;
