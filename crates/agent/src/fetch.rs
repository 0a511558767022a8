//! `fetch`: read a web page for the model.
//!
//! HTML is flattened to plain text with light markdown (headings, list
//! items); other content types come back raw behind a short prefix. The
//! model pages through long documents with `start_index`/`max_length`.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::Deserialize;
use serde_json::{json, Value};

use kh_codec::escape::decode_entities;
use kh_domain::error::{Error, Result};
use kh_domain::tool::ToolDefinition;
use kh_tools::{parse_args, Tool, ToolError};

pub const FETCH: &str = "fetch";

const DEFAULT_MAX_LENGTH: usize = 5000;
const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;
const TIMEOUT: Duration = Duration::from_secs(30);
const BROWSER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize)]
struct FetchArgs {
    url: String,
    #[serde(default)]
    start_index: Option<f64>,
    #[serde(default)]
    max_length: Option<f64>,
    #[serde(default)]
    raw: bool,
}

pub struct FetchTool {
    client: reqwest::Client,
    max_bytes: usize,
}

impl FetchTool {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            max_bytes: MAX_BODY_BYTES,
        })
    }

    /// Body of `url` as text, plus a prefix explaining raw content.
    async fn load(&self, url: &str, raw: bool) -> std::result::Result<(String, String), String> {
        let mut resp = self
            .client
            .get(url)
            .header(USER_AGENT, BROWSER_AGENT)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(|e| e.to_string())? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(format!("response exceeded {} bytes", self.max_bytes));
            }
            body.extend_from_slice(&chunk);
        }
        let page = String::from_utf8_lossy(&body).into_owned();

        let head: String = page.chars().take(100).collect();
        let is_html = head.contains("<html")
            || content_type.contains("text/html")
            || content_type.is_empty();

        if is_html && !raw {
            let text = html_to_text(&page);
            if text.is_empty() {
                return Err("page has no readable text".into());
            }
            return Ok((text, String::new()));
        }
        let prefix = if raw {
            String::new()
        } else {
            format!("Content type {content_type} cannot be simplified, but here is the raw content:\n")
        };
        Ok((page, prefix))
    }
}

#[async_trait::async_trait]
impl Tool for FetchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: FETCH.into(),
            description: "Fetch a URL from the internet and return its readable text.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "The URL to fetch"},
                    "start_index": {
                        "type": "number",
                        "description": "Character offset to start from. Default is 0.",
                        "default": 0
                    },
                    "max_length": {
                        "type": "number",
                        "description": format!(
                            "Maximum number of characters to return. Default is {DEFAULT_MAX_LENGTH}."
                        ),
                        "default": DEFAULT_MAX_LENGTH
                    },
                    "raw": {
                        "type": "boolean",
                        "description": "Return the page source instead of extracted text.",
                        "default": false
                    }
                },
                "required": ["url"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> std::result::Result<String, ToolError> {
        let args: FetchArgs = parse_args(args)?;
        let start = args.start_index.map_or(0, to_index);
        let len = args.max_length.map_or(DEFAULT_MAX_LENGTH, to_index);

        tracing::debug!(url = %args.url, start, len, "fetching page");
        let (content, prefix) = self
            .load(&args.url, args.raw)
            .await
            .map_err(|e| ToolError::Failed(format!("fetching {}: {e}", args.url)))?;

        let window: String = content.chars().skip(start).take(len).collect();
        Ok(prefix + &window)
    }
}

/// Non-negative integer from a JSON number; models send `100` and `100.0`.
fn to_index(n: f64) -> usize {
    if n.is_finite() && n > 0.0 {
        n as usize
    } else {
        0
    }
}

// ── HTML flattening ──────────────────────────────────────────────────

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "tr", "article", "section", "header", "footer", "blockquote", "pre", "table",
    "ul", "ol", "main", "nav", "aside", "figure",
];
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "head", "svg", "template"];

/// Flatten HTML to text. Script-like elements are dropped, block elements
/// end a line, headings become `#` lines and list items `- ` lines.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::new();
    let mut skipping: Option<String> = None;
    let mut rest = html;

    while let Some(lt) = rest.find('<') {
        if skipping.is_none() {
            out.push_str(&rest[..lt]);
        }
        let after = &rest[lt + 1..];
        if let Some(body) = after.strip_prefix("!--") {
            rest = body.find("-->").map_or("", |end| &body[end + 3..]);
            continue;
        }
        let Some(gt) = after.find('>') else {
            rest = "";
            break;
        };
        let tag = &after[..gt];
        rest = &after[gt + 1..];

        let closing = tag.starts_with('/');
        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        if let Some(skipped) = &skipping {
            if closing && name == *skipped {
                skipping = None;
            }
            continue;
        }
        if !closing && SKIPPED_TAGS.contains(&name.as_str()) && !tag.ends_with('/') {
            skipping = Some(name);
            continue;
        }

        match name.as_str() {
            "br" => out.push('\n'),
            "li" if !closing => {
                line_break(&mut out);
                out.push_str("- ");
            }
            h if is_heading(h) => {
                line_break(&mut out);
                if !closing {
                    let level = h[1..].parse::<usize>().unwrap_or(1);
                    out.push_str(&"#".repeat(level));
                    out.push(' ');
                }
            }
            b if BLOCK_TAGS.contains(&b) || b == "li" => line_break(&mut out),
            _ => {}
        }
    }
    if skipping.is_none() {
        out.push_str(rest);
    }

    collapse(&decode_entities(&out))
}

fn is_heading(name: &str) -> bool {
    name.len() == 2 && name.starts_with('h') && matches!(name.as_bytes()[1], b'1'..=b'6')
}

fn line_break(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

/// Squeeze runs of spaces inside lines and runs of blank lines to one.
fn collapse(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut blank = false;
    for line in text.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            if !blank && !result.is_empty() {
                result.push('\n');
                blank = true;
            }
            continue;
        }
        result.push_str(&words.join(" "));
        result.push('\n');
        blank = false;
    }
    result.trim().to_string()
}
