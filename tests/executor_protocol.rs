// Request lifecycle: locking, caching, relocation, and session handling.
mod common;

use std::path::PathBuf;
use std::sync::Arc;

use archive_client::api::{
    ArchiveClient, ClaimOutcome, Clock, Error, ErrorKind, LEGACY_TOKEN_LEN, LockStore, ManualClock,
    Method, Mode, OFFLINE_TIMEOUT, SESSION_PATH, STALE_LOCK_SECS, Transport, TransportRequest,
    TransportResponse,
};
use common::{SERVER, ScriptedTransport, client, config, url};

const PROJECTS_CSV: &str = "ID,name\nP1,Alpha\nP2,Beta\n";

#[test]
fn repeated_get_within_ttl_uses_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    let projects = url("/REST/projects?format=csv");
    transport.respond_text(&projects, PROJECTS_CSV);
    let clock = Arc::new(ManualClock::new(1_000.0));
    let mut client = client(dir.path(), &transport, &clock, 1);

    let first = client.get_table("/REST/projects").expect("first");
    let second = client.get_table("/REST/projects").expect("second");
    assert_eq!(first, second);
    assert_eq!(first.get_all("name", "*"), vec!["Alpha", "Beta"]);
    assert_eq!(transport.count(&projects), 1);

    clock.advance(1.5);
    client.get_table("/REST/projects").expect("third");
    assert_eq!(transport.count(&projects), 2);
}

#[test]
fn zero_ttl_always_goes_to_network() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    let projects = url("/REST/projects?format=csv");
    transport.respond_text(&projects, PROJECTS_CSV);
    let clock = Arc::new(ManualClock::new(1_000.0));
    let mut client = client(dir.path(), &transport, &clock, 1);
    client.set_memory_ttl(0.0);

    client.get_table("/REST/projects").expect("first");
    client.get_table("/REST/projects").expect("second");
    assert_eq!(transport.count(&projects), 2);
}

#[test]
fn mutating_call_invalidates_memory_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    let projects = url("/REST/projects?format=csv");
    transport.respond_text(&projects, PROJECTS_CSV);
    transport.respond_text(&url("/REST/projects/P3"), "");
    let clock = Arc::new(ManualClock::new(1_000.0));
    let mut client = client(dir.path(), &transport, &clock, 1);

    client.get_table("/REST/projects").expect("get");
    client
        .exec("/REST/projects/P3", Method::Put, None, &[])
        .expect("put");
    assert!(client.executor().memory_cache().is_empty());
    // Offline reads keep the last listing; only the memory map is cleared.
    assert!(
        client
            .executor()
            .persistent_cache()
            .get(&projects)
            .expect("get")
            .is_some()
    );
    client.get_table("/REST/projects").expect("get again");
    assert_eq!(transport.count(&projects), 2);
}

#[test]
fn live_foreign_lock_is_a_concurrent_access_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    let projects = url("/REST/projects");
    transport.respond_text(&projects, "ok");
    let clock = Arc::new(ManualClock::new(1_000.0));
    let mut client = client(dir.path(), &transport, &clock, 1);

    let other = LockStore::open(config(dir.path()).user_cache_dir().join("lock.db")).expect("open");
    assert!(matches!(
        other.claim(&projects, 2, 999.0).expect("claim"),
        ClaimOutcome::Claimed
    ));

    let err = client
        .exec("/REST/projects", Method::Get, None, &[])
        .expect_err("locked");
    assert_eq!(err.kind(), ErrorKind::ConcurrentAccess);
    assert_eq!(err.owner_pid(), Some(2));
    assert_eq!(err.caller_pid(), Some(1));
    assert!(transport.calls().is_empty());
    // The foreign row is untouched.
    assert_eq!(other.row(&projects).expect("row").expect("held").owner, 2);
}

#[test]
fn stale_foreign_lock_is_reclaimed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    let projects = url("/REST/projects");
    transport.respond_text(&projects, "ok");
    let clock = Arc::new(ManualClock::new(1_000.0));
    let mut client = client(dir.path(), &transport, &clock, 1);

    let other = LockStore::open(config(dir.path()).user_cache_dir().join("lock.db")).expect("open");
    other.claim(&projects, 2, 989.0).expect("claim");

    let content = client
        .exec("/REST/projects", Method::Get, None, &[])
        .expect("reclaimed");
    assert_eq!(content, b"ok");
    assert!(other.rows().expect("rows").is_empty());
}

#[test]
fn own_leftover_lock_is_reclaimed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    let projects = url("/REST/projects");
    transport.respond_text(&projects, "ok");
    let clock = Arc::new(ManualClock::new(1_000.0));
    let mut client = client(dir.path(), &transport, &clock, 7);
    client
        .executor()
        .locks()
        .claim(&projects, 7, 1_000.0)
        .expect("claim");

    client
        .exec("/REST/projects", Method::Get, None, &[])
        .expect("own lock");
}

#[test]
fn lock_is_released_when_the_call_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    transport.respond(
        &url("/REST/broken"),
        TransportResponse::new(500, "Internal Server Error", b"boom".to_vec()),
    );
    let clock = Arc::new(ManualClock::new(1_000.0));
    let mut client = client(dir.path(), &transport, &clock, 1);

    let err = client
        .exec("/REST/broken", Method::Get, None, &[])
        .expect_err("500");
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(err.status(), Some(500));
    assert!(client.executor().locks().rows().expect("rows").is_empty());
    assert!(
        client
            .executor()
            .persistent_cache()
            .get(&url("/REST/broken"))
            .expect("get")
            .is_none()
    );
}

#[test]
fn html_error_page_becomes_server_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    transport.respond_text(
        &url("/REST/projects/P9"),
        "<!DOCTYPE html><html><head><title>Status 403: Access denied</title></head></html>",
    );
    let clock = Arc::new(ManualClock::new(1_000.0));
    let mut client = client(dir.path(), &transport, &clock, 1);

    let err = client
        .exec("/REST/projects/P9", Method::Get, None, &[])
        .expect_err("html");
    assert_eq!(err.kind(), ErrorKind::Server);
    assert_eq!(err.message(), Some("Status 403: Access denied"));
    assert!(client.executor().locks().rows().expect("rows").is_empty());
}

#[test]
fn not_found_relocates_and_retries_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    let moved = "http://archive.test/central";
    transport.respond(
        SERVER,
        TransportResponse::new(200, "OK", Vec::new()).with_header("Content-Location", moved),
    );
    transport.respond_text(&format!("{moved}/REST/projects"), "moved-ok");
    let clock = Arc::new(ManualClock::new(1_000.0));
    let mut client = client(dir.path(), &transport, &clock, 1);

    let content = client
        .exec("/REST/projects", Method::Get, None, &[])
        .expect("relocated");
    assert_eq!(content, b"moved-ok");
    assert_eq!(client.server(), moved);
    assert_eq!(transport.count(&url("/REST/projects")), 1);
    assert_eq!(transport.count(SERVER), 1);
}

#[test]
fn not_found_without_relocation_is_a_transport_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    transport.respond(
        SERVER,
        TransportResponse::new(200, "OK", Vec::new()).with_header("content-location", SERVER),
    );
    let clock = Arc::new(ManualClock::new(1_000.0));
    let mut client = client(dir.path(), &transport, &clock, 1);

    let err = client
        .exec("/REST/missing", Method::Get, None, &[])
        .expect_err("404");
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(err.status(), Some(404));
    assert_eq!(client.server(), SERVER);
    assert_eq!(transport.count(&url("/REST/missing")), 1);
}

#[test]
fn set_cookie_replaces_session_token() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    let cookie = "JSESSIONID=0123456789ABCDEF0123456789ABCDEF; Path=/xnat; HttpOnly";
    transport.respond(
        &url("/REST/a"),
        TransportResponse::new(200, "OK", b"a".to_vec()).with_header("Set-Cookie", cookie),
    );
    transport.respond_text(&url("/REST/b"), "b");
    let clock = Arc::new(ManualClock::new(1_000.0));
    let mut client = client(dir.path(), &transport, &clock, 1);

    client.exec("/REST/a", Method::Get, None, &[]).expect("a");
    client.exec("/REST/b", Method::Get, None, &[]).expect("b");

    let expected: String = cookie.chars().take(LEGACY_TOKEN_LEN).collect();
    assert_eq!(client.executor().session().token(), expected);
    let calls = transport.calls();
    assert_eq!(calls[1].cookie.as_deref(), Some(expected.as_str()));
}

#[test]
fn offline_mode_prefers_persistent_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::new(1_000.0));
    let projects = url("/REST/projects?format=csv");

    let online = ScriptedTransport::new();
    online.respond_text(&projects, PROJECTS_CSV);
    let mut first = client(dir.path(), &online, &clock, 1);
    first.get_table("/REST/projects").expect("online");
    drop(first);

    let offline = ScriptedTransport::new();
    let mut second = client(dir.path(), &offline, &clock, 2);
    second.set_mode(Mode::Offline);
    let table = second.get_table("/REST/projects").expect("offline");
    assert_eq!(table.len(), 2);
    assert!(offline.calls().is_empty());

    offline.respond_text(&url("/REST/subjects?format=csv"), "ID\nS1\n");
    second.get_table("/REST/subjects").expect("fallback");
    let calls = offline.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].timeout, Some(OFFLINE_TIMEOUT));
}

#[test]
fn login_installs_session_cookie() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    transport.respond_text(&url(SESSION_PATH), "A1B2C3\n");
    transport.respond_text(&url("/REST/projects"), "ok");
    let clock = Arc::new(ManualClock::new(1_000.0));
    let mut client = ArchiveClient::builder(config(dir.path()))
        .transport(Box::new(transport.clone()))
        .clock(clock.clone())
        .owner(1)
        .connect()
        .expect("connect");

    client
        .exec("/REST/projects", Method::Get, None, &[])
        .expect("get");
    let calls = transport.calls();
    assert_eq!(calls[0].cookie.as_deref(), Some("authentication_by_credentials"));
    assert_eq!(calls[1].cookie.as_deref(), Some("JSESSIONID=A1B2C3"));
    assert!(
        client
            .executor()
            .persistent_cache()
            .get(&url(SESSION_PATH))
            .expect("get")
            .is_none()
    );
}

#[test]
fn latency_is_recorded_for_network_fetches() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    transport.respond_text(&url("/REST/projects"), "ok");
    let clock = Arc::new(ManualClock::new(1_000.0));
    let mut client = client(dir.path(), &transport, &clock, 1);

    assert!(client.executor().latency("/REST/projects").is_none());
    client
        .exec("/REST/projects", Method::Get, None, &[])
        .expect("get");
    assert!(client.executor().latency("/REST/projects").is_some());
}

/// Stalls past the staleness threshold; meanwhile owner 2 takes the uri over.
struct StallingTransport {
    clock: Arc<ManualClock>,
    locks: PathBuf,
}

impl Transport for StallingTransport {
    fn request(&self, request: &TransportRequest<'_>) -> Result<TransportResponse, Error> {
        self.clock.advance(STALE_LOCK_SECS + 1.0);
        let now = self.clock.now();
        let locks = LockStore::open(&self.locks)?;
        if let ClaimOutcome::Conflict(row) = locks.claim(request.url, 2, now)? {
            assert!(row.is_stale(now, STALE_LOCK_SECS));
            assert!(locks.reclaim(&row)?);
            assert_eq!(locks.claim(request.url, 2, now)?, ClaimOutcome::Claimed);
        }
        Ok(TransportResponse::new(200, "OK", b"slow".to_vec()))
    }
}

#[test]
fn finishing_late_leaves_the_reclaimers_lock_alone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::new(1_000.0));
    let lock_path = config(dir.path()).user_cache_dir().join("lock.db");
    let mut client = ArchiveClient::builder(config(dir.path()))
        .transport(Box::new(StallingTransport {
            clock: clock.clone(),
            locks: lock_path.clone(),
        }))
        .clock(clock.clone())
        .owner(1)
        .without_session()
        .connect()
        .expect("connect");

    let content = client
        .exec("/REST/slow", Method::Get, None, &[])
        .expect("slow get");
    assert_eq!(content, b"slow");

    let slow = url("/REST/slow");
    let locks = LockStore::open(&lock_path).expect("open");
    let row = locks.row(&slow).expect("row").expect("owner 2 still holds it");
    assert_eq!(row.owner, 2);
    assert!(matches!(
        locks.claim(&slow, 3, clock.now()).expect("claim"),
        ClaimOutcome::Conflict(_)
    ));
}

#[test]
fn transport_failure_releases_lock() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    transport.fail(&url("/REST/projects"), "connection reset");
    let clock = Arc::new(ManualClock::new(1_000.0));
    let mut client = client(dir.path(), &transport, &clock, 1);

    let err = client
        .exec("/REST/projects", Method::Get, None, &[])
        .expect_err("reset");
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(err.message(), Some("connection reset"));
    assert!(client.executor().locks().rows().expect("rows").is_empty());
    assert!(client.executor().memory_cache().is_empty());
}

#[test]
fn offline_fallback_propagates_transport_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    transport.fail(&url("/REST/subjects"), "timed out");
    let clock = Arc::new(ManualClock::new(1_000.0));
    let mut client = client(dir.path(), &transport, &clock, 1);
    client.set_mode(Mode::Offline);

    let err = client
        .exec("/REST/subjects", Method::Get, None, &[])
        .expect_err("timeout");
    assert_eq!(err.kind(), ErrorKind::Transport);
    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].timeout, Some(OFFLINE_TIMEOUT));
    assert!(client.executor().locks().rows().expect("rows").is_empty());
}

#[test]
fn relocated_retry_that_misses_again_fails_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    let moved = "http://archive.test/central";
    transport.respond(
        SERVER,
        TransportResponse::new(200, "OK", Vec::new()).with_header("content-location", moved),
    );
    let clock = Arc::new(ManualClock::new(1_000.0));
    let mut client = client(dir.path(), &transport, &clock, 1);

    let err = client
        .exec("/REST/gone", Method::Get, None, &[])
        .expect_err("404 twice");
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(err.status(), Some(404));
    assert_eq!(client.server(), moved);
    assert_eq!(transport.count(&url("/REST/gone")), 1);
    assert_eq!(transport.count(&format!("{moved}/REST/gone")), 1);
    assert_eq!(transport.count(SERVER), 1);
    assert_eq!(transport.count(moved), 0);
    assert!(client.executor().locks().rows().expect("rows").is_empty());
}
