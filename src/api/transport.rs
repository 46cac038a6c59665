//! Purpose: HTTP transport seam and its ureq-backed implementation.
//! Exports: `Method`, `Transport`, `TransportRequest`, `TransportResponse`, `UreqTransport`.
//! Role: The executor's only path to the network.
//! Invariants: Non-2xx statuses are responses; only connection/timeout failures are errors.
//! Invariants: `content-location` reports the final url when the server did not send one.
#![allow(clippy::result_large_err)]

use std::fmt;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }

    pub fn is_mutating(self) -> bool {
        matches!(self, Method::Put | Method::Post | Method::Delete)
    }

    pub fn parse(raw: &str) -> Result<Self, Error> {
        match raw.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "PUT" => Ok(Method::Put),
            "POST" => Ok(Method::Post),
            "DELETE" => Ok(Method::Delete),
            _ => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unsupported http method `{raw}`"))
                .with_hint("Use GET, PUT, POST, or DELETE.")),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct TransportRequest<'a> {
    pub url: &'a str,
    pub method: Method,
    pub body: Option<&'a [u8]>,
    pub headers: &'a [(String, String)],
    pub timeout: Option<Duration>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub reason: String,
    /// Header names are stored lowercased.
    pub headers: Vec<(String, String)>,
    pub content: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, reason: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers: Vec::new(),
            content: content.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait Transport {
    fn request(&self, request: &TransportRequest<'_>) -> Result<TransportResponse, Error>;
}

#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
    authorization: Option<String>,
}

impl UreqTransport {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            authorization: None,
        }
    }

    pub fn with_basic_auth(mut self, user: &str, password: &str) -> Self {
        let encoded = general_purpose::STANDARD.encode(format!("{user}:{password}"));
        self.authorization = Some(format!("Basic {encoded}"));
        self
    }

    /// Trusts only the certificates in a PEM bundle, for archives behind a private CA.
    pub fn with_tls_ca_file(mut self, path: impl AsRef<Path>) -> Result<Self, Error> {
        let roots = archive_roots(path.as_ref())?;
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let tls = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        self.agent = ureq::builder().tls_config(Arc::new(tls)).build();
        Ok(self)
    }
}

fn archive_roots(path: &Path) -> Result<rustls::RootCertStore, Error> {
    let ca_error = |message: &str| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("archive CA bundle {message}"))
            .with_hint("Pass a PEM file holding the certificate(s) that signed the archive server.")
            .with_path(path)
    };
    let pem = std::fs::read(path).map_err(|err| ca_error("is unreadable").with_source(err))?;
    let certs = rustls_pemfile::certs(&mut Cursor::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| ca_error("is not valid PEM").with_source(err))?;
    let mut roots = rustls::RootCertStore::empty();
    let (added, _) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(ca_error("holds no usable certificates"));
    }
    Ok(roots)
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn request(&self, request: &TransportRequest<'_>) -> Result<TransportResponse, Error> {
        let mut call = self.agent.request(request.method.as_str(), request.url);
        if let Some(authorization) = &self.authorization {
            call = call.set("Authorization", authorization);
        }
        for (name, value) in request.headers {
            call = call.set(name, value);
        }
        if let Some(timeout) = request.timeout {
            call = call.timeout(timeout);
        }
        let result = match request.body {
            Some(body) => call.send_bytes(body),
            None => call.call(),
        };
        match result {
            Ok(resp) => read_response(resp, request.url),
            Err(ureq::Error::Status(_, resp)) => read_response(resp, request.url),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Transport)
                .with_message("request failed")
                .with_uri(request.url)
                .with_source(err)),
        }
    }
}

fn read_response(response: ureq::Response, url: &str) -> Result<TransportResponse, Error> {
    let status = response.status();
    let reason = response.status_text().to_string();
    let final_url = response.get_url().to_string();
    let mut headers = Vec::new();
    for name in response.headers_names() {
        for value in response.all(&name) {
            headers.push((name.to_ascii_lowercase(), value.to_string()));
        }
    }
    if !headers.iter().any(|(name, _)| name == "content-location") {
        headers.push(("content-location".to_string(), final_url));
    }
    let mut content = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut content)
        .map_err(|err| {
            Error::new(ErrorKind::Transport)
                .with_message("failed to read response body")
                .with_uri(url)
                .with_source(err)
        })?;
    Ok(TransportResponse {
        status,
        reason,
        headers,
        content,
    })
}
