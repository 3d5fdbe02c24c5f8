use std::time::Duration;

use tracing::debug;

use crate::error::{IngestError, Result};

/// Collaborator seam for file-format extraction: a pure `bytes → text`
/// function per format. The built-in implementation covers plain text and
/// HTML; PDF/DOCX extractors plug in behind the same trait.
pub trait ContentExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], content_type: &str) -> Result<String>;
}

#[derive(Default)]
pub struct BasicExtractor;

impl ContentExtractor for BasicExtractor {
    fn extract(&self, bytes: &[u8], content_type: &str) -> Result<String> {
        let text = String::from_utf8_lossy(bytes);
        if content_type.contains("html") {
            Ok(strip_html(&text))
        } else {
            Ok(text.into_owned())
        }
    }
}

/// GET a URL source with a bounded timeout and reduce the body to plain
/// text. Any failure carries the message that lands in `Source.last_error`.
pub async fn fetch_url(client: &reqwest::Client, url: &str, timeout: Duration) -> Result<String> {
    debug!(url, "fetching url source");

    let resp = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| IngestError::Fetch(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(IngestError::Fetch(format!(
            "GET {} returned status {}",
            url,
            resp.status().as_u16()
        )));
    }

    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/plain")
        .to_string();

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| IngestError::Fetch(e.to_string()))?;

    BasicExtractor.extract(&bytes, &content_type)
}

/// Reduce HTML to plain text: drop script/style subtrees, turn block-level
/// closers into line breaks, strip the remaining tags, decode the common
/// entities.
pub fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        rest = &rest[open..];

        // ASCII lowering keeps byte offsets aligned with `rest`.
        let lower: String = rest.chars().map(|c| c.to_ascii_lowercase()).collect();
        if lower.starts_with("<script") || lower.starts_with("<style") {
            let closer = if lower.starts_with("<script") {
                "</script>"
            } else {
                "</style>"
            };
            match lower.find(closer) {
                Some(end) => {
                    rest = &rest[end + closer.len()..];
                    continue;
                }
                None => {
                    rest = "";
                    break;
                }
            }
        }

        match rest.find('>') {
            Some(close) => {
                let tag = rest[1..close].trim_start_matches('/');
                let tag_name: String = tag
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric())
                    .collect::<String>()
                    .to_ascii_lowercase();
                if matches!(
                    tag_name.as_str(),
                    "p" | "div" | "br" | "li" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "tr"
                ) {
                    out.push('\n');
                }
                rest = &rest[close + 1..];
            }
            None => {
                // Unclosed tag: drop the tail.
                rest = "";
            }
        }
    }
    out.push_str(rest);

    decode_entities(&out)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_keeps_text() {
        let html = "<html><body><h1>Title</h1><p>Hello <b>world</b>.</p></body></html>";
        let text = strip_html(html);
        assert!(text.contains("Title"));
        assert!(text.contains("Hello world."));
        assert!(!text.contains('<'));
    }

    #[test]
    fn drops_script_and_style_content() {
        let html = "<p>keep</p><script>var secret = 1;</script><style>.x{color:red}</style><p>also</p>";
        let text = strip_html(html);
        assert!(text.contains("keep"));
        assert!(text.contains("also"));
        assert!(!text.contains("secret"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn block_tags_become_line_breaks() {
        let text = strip_html("<p>one</p><p>two</p>");
        let lines: Vec<&str> = text.split('\n').filter(|l| !l.is_empty()).collect();
        assert_eq!(lines, ["one", "two"]);
    }

    #[test]
    fn entities_decode() {
        assert_eq!(strip_html("a &amp; b &lt;c&gt;"), "a & b <c>");
    }

    #[test]
    fn extractor_passes_plain_text_through() {
        let text = BasicExtractor
            .extract(b"plain content", "text/plain")
            .unwrap();
        assert_eq!(text, "plain content");
    }

    #[test]
    fn extractor_strips_html_content_type() {
        let text = BasicExtractor
            .extract(b"<p>hi</p>", "text/html; charset=utf-8")
            .unwrap();
        assert_eq!(text.trim(), "hi");
    }
}
