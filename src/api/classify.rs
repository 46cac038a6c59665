//! Purpose: Recognize error pages the archive returns in place of data.
//! Exports: `ErrorClassifier`, `ServerFault`, `HtmlErrorClassifier`.
//! Invariants: Classification is a pure function of the payload bytes.

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerFault {
    pub detail: String,
}

pub trait ErrorClassifier {
    fn classify(&self, content: &[u8]) -> Option<ServerFault>;
}

/// Treats any HTML document as a fault. Data endpoints answer in CSV, JSON
/// or XML; HTML only comes back from the server's error pages.
#[derive(Clone, Copy, Debug, Default)]
pub struct HtmlErrorClassifier;

impl ErrorClassifier for HtmlErrorClassifier {
    fn classify(&self, content: &[u8]) -> Option<ServerFault> {
        let text = String::from_utf8_lossy(content);
        let head = text.trim_start();
        let lowered = head.chars().take(64).collect::<String>().to_ascii_lowercase();
        if !(lowered.starts_with("<!doctype html") || lowered.starts_with("<html")) {
            return None;
        }
        let detail = element_text(head, "title")
            .or_else(|| element_text(head, "h3"))
            .unwrap_or_else(|| "unrecognized error page".to_string());
        Some(ServerFault { detail })
    }
}

fn element_text(document: &str, tag: &str) -> Option<String> {
    let lowered = document.to_ascii_lowercase();
    let open = format!("<{tag}");
    let start = lowered.find(&open)?;
    let body_start = start + lowered[start..].find('>')? + 1;
    let body_len = lowered[body_start..].find(&format!("</{tag}>"))?;
    let text = document[body_start..body_start + body_len].trim();
    if text.is_empty() {
        return None;
    }
    Some(text.split_whitespace().collect::<Vec<_>>().join(" "))
}
