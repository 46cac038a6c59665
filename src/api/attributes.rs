//! Purpose: Read and write archive object attributes addressed by hierarchical paths.
//! Exports: `AttributeResolver`, `ObjectRef`, `MatchPolicy`, `resolve_header`, `rank_headers`.
//! Role: Bridges attribute paths to the columns the server actually returns.
//! Invariants: Values are space-escaped on write and unescaped on read.
//! Invariants: Written values are percent-encoded so `#`, `&`, `=` reach the server intact.
//! Invariants: Header binding never accepts a candidate below the policy's similarity floor.
#![allow(clippy::result_large_err)]

use url::form_urlencoded::byte_serialize;

use super::client::ArchiveClient;
use super::transport::Method;
use crate::core::error::{Error, ErrorKind};
use crate::core::fuzzy::{Candidate, close_matches};
use crate::core::table::TabularResult;

/// Two-character stand-in for a space; the server rejects literal spaces in query values.
pub const ESCAPED_SPACE: &str = "\\s";

/// Archive object the attributes belong to: its resource uri and its `ID`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ObjectRef {
    pub uri: String,
    pub id: String,
}

impl ObjectRef {
    pub fn new(uri: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            id: id.into(),
        }
    }

    /// Listing that contains this object as one row.
    pub fn collection_uri(&self) -> String {
        uri_parent(&self.uri)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchPolicy {
    pub min_similarity: f64,
}

impl MatchPolicy {
    /// Binds to the best candidate however weak the match.
    pub fn permissive() -> Self {
        Self {
            min_similarity: 0.0,
        }
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            min_similarity: 0.6,
        }
    }
}

pub struct AttributeResolver<'a> {
    client: &'a mut ArchiveClient,
    object: ObjectRef,
    policy: MatchPolicy,
}

impl<'a> AttributeResolver<'a> {
    pub fn new(client: &'a mut ArchiveClient, object: ObjectRef) -> Self {
        Self {
            client,
            object,
            policy: MatchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    pub fn get(&mut self, path: &str) -> Result<String, Error> {
        let table = self.fetch_row(&[path])?;
        self.value_for(&table, path)
    }

    pub fn mget(&mut self, paths: &[&str]) -> Result<Vec<String>, Error> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let table = self.fetch_row(paths)?;
        paths.iter().map(|path| self.value_for(&table, path)).collect()
    }

    pub fn set(&mut self, path: &str, value: &str) -> Result<(), Error> {
        self.mset(&[(path, value)])
    }

    /// One PUT carrying every `path=value` pair, in the given order.
    pub fn mset(&mut self, attrs: &[(&str, &str)]) -> Result<(), Error> {
        if attrs.is_empty() {
            return Ok(());
        }
        let uri = format!("{}?{}", self.object.uri, set_query(attrs));
        self.client.exec(&uri, Method::Put, None, &[])?;
        Ok(())
    }

    fn fetch_row(&mut self, paths: &[&str]) -> Result<TabularResult, Error> {
        let uri = format!(
            "{}?columns=ID,{}",
            self.object.collection_uri(),
            paths.join(",")
        );
        let table = self.client.get_table(&uri)?;
        Ok(table.filter(&[], &[("ID", self.object.id.as_str())]))
    }

    fn value_for(&self, table: &TabularResult, path: &str) -> Result<String, Error> {
        let header = resolve_header(path, table.headers(), self.policy)?;
        table
            .get_all(&header, "*")
            .into_iter()
            .next()
            .map(|value| unescape_value(&value))
            .ok_or_else(|| {
                Error::new(ErrorKind::AttributeResolution)
                    .with_message(format!(
                        "no `{header}` value for object `{}`",
                        self.object.id
                    ))
                    .with_uri(self.object.uri.clone())
            })
    }
}

/// Candidates for `path` among `headers`, best first: final-segment matches,
/// then whole-path matches for headers not already listed.
pub fn rank_headers(path: &str, headers: &[String]) -> Vec<Candidate> {
    let leaf = path.rsplit('/').next().unwrap_or(path);
    let mut ranked = close_matches(leaf, headers.iter().map(String::as_str), headers.len(), 0.0);
    for candidate in close_matches(path, headers.iter().map(String::as_str), headers.len(), 0.0) {
        if !ranked.iter().any(|seen| seen.value == candidate.value) {
            ranked.push(candidate);
        }
    }
    ranked
}

/// Binds `path` to one of `headers`: best final-segment match first, then the
/// best whole-path match. Both steps honour `policy.min_similarity`.
pub fn resolve_header(path: &str, headers: &[String], policy: MatchPolicy) -> Result<String, Error> {
    let leaf = path.rsplit('/').next().unwrap_or(path);
    let candidates = || headers.iter().map(String::as_str);
    if let Some(best) = close_matches(leaf, candidates(), 1, policy.min_similarity).pop() {
        return Ok(best.value);
    }
    if let Some(best) = close_matches(path, candidates(), 1, policy.min_similarity).pop() {
        return Ok(best.value);
    }
    Err(Error::new(ErrorKind::AttributeResolution)
        .with_message(format!("no returned column matches `{path}`"))
        .with_hint(format!("Returned columns: {}", headers.join(", "))))
}

pub fn escape_value(value: &str) -> String {
    value.replace(' ', ESCAPED_SPACE)
}

pub fn unescape_value(value: &str) -> String {
    value.replace(ESCAPED_SPACE, " ")
}

/// Space marker first, then percent-encoding of everything else reserved.
fn query_value(value: &str) -> String {
    byte_serialize(escape_value(value).as_bytes()).collect()
}

fn set_query(attrs: &[(&str, &str)]) -> String {
    attrs
        .iter()
        .map(|(path, value)| format!("{path}={}", query_value(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn uri_parent(uri: &str) -> String {
    let path = uri.split_once('?').map(|(path, _)| path).unwrap_or(uri);
    let path = path.trim_end_matches('/');
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        MatchPolicy, ObjectRef, escape_value, rank_headers, resolve_header, set_query,
        unescape_value,
    };
    use crate::core::error::ErrorKind;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn final_segment_resolves_to_underscored_header() {
        let found = resolve_header(
            "category/firstname",
            &headers(&["ID", "first_name"]),
            MatchPolicy::default(),
        )
        .expect("header");
        assert_eq!(found, "first_name");
    }

    #[test]
    fn whole_path_is_the_fallback() {
        let found = resolve_header(
            "xnat:subjectData/demographics",
            &headers(&["ID", "xnat:subjectdata/demographic"]),
            MatchPolicy::default(),
        )
        .expect("header");
        assert_eq!(found, "xnat:subjectdata/demographic");
    }

    #[test]
    fn weak_matches_are_refused_by_default() {
        let err = resolve_header("category/firstname", &headers(&["ID", "dob"]), MatchPolicy::default())
            .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::AttributeResolution);
    }

    #[test]
    fn permissive_policy_binds_best_available() {
        let found = resolve_header(
            "category/firstname",
            &headers(&["ID", "first"]),
            MatchPolicy::permissive(),
        )
        .expect("header");
        assert_eq!(found, "first");
    }

    #[test]
    fn no_headers_is_an_error_even_when_permissive() {
        let err = resolve_header("a/b", &[], MatchPolicy::permissive()).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::AttributeResolution);
    }

    #[test]
    fn ranking_lists_every_header_once() {
        let ranked = rank_headers("category/firstname", &headers(&["ID", "first_name", "label"]));
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].value, "first_name");
    }

    #[test]
    fn spaces_are_escaped_in_queries() {
        assert_eq!(escape_value("New York"), "New\\sYork");
        assert_eq!(unescape_value("New\\sYork"), "New York");
        assert_eq!(
            set_query(&[("xnat:subjectData/city", "New York"), ("label", "S 1")]),
            "xnat:subjectData/city=New%5CsYork&label=S%5Cs1"
        );
    }

    #[test]
    fn reserved_characters_survive_the_query() {
        let query = set_query(&[("note", "tube #3 & co=x"), ("label", "S1")]);
        let url = url::Url::parse(&format!("http://host/REST/S1?{query}")).expect("url");
        assert_eq!(url.fragment(), None);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("note".to_string(), "tube\\s#3\\s&\\sco=x".to_string()),
                ("label".to_string(), "S1".to_string()),
            ]
        );
        assert_eq!(unescape_value(&pairs[0].1), "tube #3 & co=x");
    }

    #[test]
    fn collection_uri_drops_last_segment_and_query() {
        let object = ObjectRef::new("/REST/projects/P1/subjects/S1?format=json", "S1");
        assert_eq!(object.collection_uri(), "/REST/projects/P1/subjects");
        let object = ObjectRef::new("/REST/projects/P1/subjects/S1/", "S1");
        assert_eq!(object.collection_uri(), "/REST/projects/P1/subjects");
    }
}
