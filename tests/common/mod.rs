//! Shared fixtures for client integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use archive_client::api::{
    ArchiveClient, ClientConfig, Clock, Error, ErrorKind, ManualClock, Method, Transport,
    TransportRequest, TransportResponse,
};

pub const SERVER: &str = "http://archive.test/xnat";

#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub url: String,
    pub method: Method,
    pub cookie: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Clone)]
enum Reply {
    Respond(TransportResponse),
    /// Connection-level failure, surfaced as a `Transport` error.
    Fail(String),
}

#[derive(Default)]
struct Script {
    routes: HashMap<String, VecDeque<Reply>>,
    calls: Vec<RecordedCall>,
}

/// In-memory server. Each url answers its queued replies in order and
/// repeats the last one; unknown urls answer 404.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: TransportResponse) {
        self.queue(url, Reply::Respond(response));
    }

    pub fn fail(&self, url: &str, message: &str) {
        self.queue(url, Reply::Fail(message.to_string()));
    }

    fn queue(&self, url: &str, reply: Reply) {
        let mut script = self.script.lock().expect("script lock");
        script
            .routes
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn respond_text(&self, url: &str, body: &str) {
        self.respond(url, TransportResponse::new(200, "OK", body.as_bytes().to_vec()));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.script.lock().expect("script lock").calls.clone()
    }

    pub fn count(&self, url: &str) -> usize {
        self.calls().iter().filter(|call| call.url == url).count()
    }
}

impl Transport for ScriptedTransport {
    fn request(&self, request: &TransportRequest<'_>) -> Result<TransportResponse, Error> {
        let mut script = self.script.lock().expect("script lock");
        script.calls.push(RecordedCall {
            url: request.url.to_string(),
            method: request.method,
            cookie: request
                .headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("cookie"))
                .map(|(_, value)| value.clone()),
            timeout: request.timeout,
        });
        let reply = match script.routes.get_mut(request.url) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail(message)) => Err(Error::new(ErrorKind::Transport)
                .with_message(message)
                .with_uri(request.url)),
            None => Ok(TransportResponse::new(404, "Not Found", Vec::new())),
        }
    }
}

pub fn url(uri: &str) -> String {
    format!("{SERVER}{uri}")
}

pub fn config(cachedir: &Path) -> ClientConfig {
    ClientConfig::new(SERVER, "alice", "secret").with_cachedir(cachedir)
}

/// Client without session negotiation, driven by a manual clock.
pub fn client(
    cachedir: &Path,
    transport: &ScriptedTransport,
    clock: &Arc<ManualClock>,
    owner: u32,
) -> ArchiveClient {
    ArchiveClient::builder(config(cachedir))
        .transport(Box::new(transport.clone()))
        .clock(clock.clone() as Arc<dyn Clock>)
        .owner(owner)
        .without_session()
        .connect()
        .expect("connect")
}
