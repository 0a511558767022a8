//! A forgiving tokenizer for model-written markup.
//!
//! Never fails: unterminated tags end at EOF, a `<` that does not start a
//! tag is text, stray `<!...>` / `<?...>` constructs and comments are
//! skipped. Tag and attribute names are ASCII-lowercased. Text and
//! attribute values come out entity-decoded.

use crate::escape::decode_entities;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Start {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    End {
        name: String,
    },
    Text(String),
}

impl Token {
    pub(crate) fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
        attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

pub(crate) struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.')
}

impl<'a> Scanner<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    /// Skip past the next occurrence of `needle`, or to EOF.
    fn skip_past(&mut self, needle: &str) {
        match self.rest().find(needle) {
            Some(i) => self.pos += i + needle.len(),
            None => self.pos = self.src.len(),
        }
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    /// Read a name at the cursor. Empty if the cursor is not on a name.
    fn read_name(&mut self) -> String {
        let rest = self.rest();
        let mut chars = rest.char_indices();
        match chars.next() {
            Some((_, c)) if is_name_start(c) => {}
            _ => return String::new(),
        }
        let end = rest
            .char_indices()
            .skip(1)
            .find(|(_, c)| !is_name_char(*c))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        self.pos += end;
        rest[..end].to_ascii_lowercase()
    }

    pub(crate) fn next_token(&mut self) -> Option<Token> {
        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return None;
            }

            if !rest.starts_with('<') {
                let end = rest.find('<').unwrap_or(rest.len());
                self.pos += end;
                return Some(Token::Text(decode_entities(&rest[..end])));
            }

            if rest.starts_with("<!--") {
                self.pos += 4;
                self.skip_past("-->");
                continue;
            }
            if rest.starts_with(CDATA_OPEN) {
                self.pos += CDATA_OPEN.len();
                let body = self.rest();
                let end = body.find(CDATA_CLOSE).unwrap_or(body.len());
                self.pos += end;
                self.skip_past(CDATA_CLOSE);
                return Some(Token::Text(body[..end].to_string()));
            }
            if rest.starts_with("<!") || rest.starts_with("<?") {
                self.skip_past(">");
                continue;
            }

            if let Some(after) = rest.strip_prefix("</") {
                if after.starts_with(is_name_start) {
                    self.pos += 2;
                    let name = self.read_name();
                    self.skip_to_tag_end();
                    return Some(Token::End { name });
                }
                self.pos += 1;
                return Some(Token::Text("<".into()));
            }

            if rest[1..].starts_with(is_name_start) {
                self.pos += 1;
                return Some(self.read_start_tag());
            }

            self.pos += 1;
            return Some(Token::Text("<".into()));
        }
    }

    /// Consume up to and including the next `>`, stopping early (without
    /// consuming) at a `<` so a missing `>` cannot swallow the next tag.
    fn skip_to_tag_end(&mut self) {
        let rest = self.rest();
        match rest.find(['>', '<']) {
            Some(i) if rest.as_bytes()[i] == b'>' => self.pos += i + 1,
            Some(i) => self.pos += i,
            None => self.pos = self.src.len(),
        }
    }

    fn read_start_tag(&mut self) -> Token {
        let name = self.read_name();
        let mut attrs = Vec::new();
        let mut self_closing = false;

        loop {
            self.skip_whitespace();
            let rest = self.rest();
            let Some(c) = rest.chars().next() else { break };
            match c {
                '>' => {
                    self.pos += 1;
                    break;
                }
                '<' => break,
                '/' if rest[1..].starts_with('>') => {
                    self.pos += 2;
                    self_closing = true;
                    break;
                }
                c if is_name_start(c) => {
                    let key = self.read_name();
                    self.skip_whitespace();
                    let value = if self.rest().starts_with('=') {
                        self.pos += 1;
                        self.skip_whitespace();
                        self.read_attr_value()
                    } else {
                        String::new()
                    };
                    attrs.push((key, value));
                }
                other => self.pos += other.len_utf8(),
            }
        }

        Token::Start { name, attrs, self_closing }
    }

    fn read_attr_value(&mut self) -> String {
        let rest = self.rest();
        match rest.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let body = &rest[1..];
                let end = body.find(q).unwrap_or(body.len());
                self.pos += 1 + end + if end < body.len() { 1 } else { 0 };
                decode_entities(&body[..end])
            }
            _ => {
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == '>' || c == '<')
                    .unwrap_or(rest.len());
                let mut value = &rest[..end];
                // `<image url=x/>` : the slash belongs to the tag.
                if value.ends_with('/') && rest[end..].starts_with('>') {
                    value = &value[..value.len() - 1];
                    self.pos += end - 1;
                } else {
                    self.pos += end;
                }
                decode_entities(value)
            }
        }
    }

    /// Take everything up to the closing `</tag>` as raw text and consume
    /// the close tag. CDATA sections are unwrapped verbatim; the rest is
    /// entity-decoded. A missing close tag runs to EOF.
    pub(crate) fn take_raw(&mut self, tag: &str) -> String {
        let rest = self.rest();
        let mut out = String::new();
        let mut plain_start = 0;
        let mut i = 0;

        while let Some(off) = rest[i..].find('<') {
            let at = i + off;
            let here = &rest[at..];
            if here.starts_with(CDATA_OPEN) {
                out.push_str(&decode_entities(&rest[plain_start..at]));
                let body_start = at + CDATA_OPEN.len();
                let body_end = rest[body_start..]
                    .find(CDATA_CLOSE)
                    .map(|e| body_start + e)
                    .unwrap_or(rest.len());
                out.push_str(&rest[body_start..body_end]);
                i = (body_end + CDATA_CLOSE.len()).min(rest.len());
                plain_start = i;
                continue;
            }
            if let Some(close_len) = match_close_tag(here, tag) {
                out.push_str(&decode_entities(&rest[plain_start..at]));
                self.pos += at + close_len;
                return out;
            }
            i = at + 1;
        }

        out.push_str(&decode_entities(&rest[plain_start..]));
        self.pos = self.src.len();
        out
    }
}

/// If `s` starts with `</tag>` (case-insensitive, whitespace allowed before
/// `>`), return its byte length.
fn match_close_tag(s: &str, tag: &str) -> Option<usize> {
    let after = s.strip_prefix("</")?;
    if after.len() < tag.len() || !after.is_char_boundary(tag.len()) {
        return None;
    }
    if !after[..tag.len()].eq_ignore_ascii_case(tag) {
        return None;
    }
    let tail = &after[tag.len()..];
    let trimmed = tail.trim_start();
    if !trimmed.starts_with('>') {
        return None;
    }
    Some(2 + tag.len() + (tail.len() - trimmed.len()) + 1)
}
