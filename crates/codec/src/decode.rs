//! Model output → canonical XML → platform messages.
//!
//! [`sanitize_with`] walks the token stream once with a small state
//! machine. Paragraph text is kept; `time`/`name`/`uid` bodies are
//! dropped; unknown tags lose their markup but keep their text; `code` and
//! `tex` are raw spans. Text found outside any `<p>` is gathered into its
//! own paragraph. A paragraph only survives if it has something visible.

use crate::error::CodecError;
use crate::escape::{escape_attr, escape_text};
use crate::scanner::{Scanner, Token};
use crate::segment::Segment;
use crate::tables::FaceTable;

/// Open-element depth past which a document is rejected as malformed.
const MAX_DEPTH: usize = 256;

/// Tags whose body is name text we never show (the tag itself is kept).
const VOID_WITH_BODY: &[&str] = &["mention"];
/// Tags that carry no body at all.
const VOID: &[&str] = &["reply", "image", "face", "br"];
/// Tags whose whole content is discarded.
const IGNORE: &[&str] = &["time", "name", "uid"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Canonical nodes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One canonical inline element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Br,
    Mention { uid: String },
    Reply { id: String },
    ImageUrl(String),
    ImageNamed(String),
    Face { id: String, name: String },
    Code { lang: String, text: String },
    Tex(String),
}

impl Node {
    fn is_visible(&self) -> bool {
        match self {
            Node::Text(t) => !t.trim().is_empty(),
            _ => true,
        }
    }

    fn write_xml(&self, out: &mut String) {
        match self {
            Node::Text(t) => out.push_str(&escape_text(t)),
            Node::Br => out.push_str("<br/>"),
            Node::Mention { uid } => {
                out.push_str(&format!("<mention uid=\"{}\"/>", escape_attr(uid)))
            }
            Node::Reply { id } => out.push_str(&format!("<reply id=\"{}\"/>", escape_attr(id))),
            Node::ImageUrl(url) => {
                out.push_str(&format!("<image url=\"{}\"/>", escape_attr(url)))
            }
            Node::ImageNamed(name) => {
                out.push_str(&format!("<image name=\"{}\"/>", escape_attr(name)))
            }
            Node::Face { id, name } => out.push_str(&format!(
                "<face id=\"{}\" name=\"{}\"/>",
                escape_attr(id),
                escape_attr(name)
            )),
            Node::Code { lang, text } => out.push_str(&format!(
                "<code lang=\"{}\">{}</code>",
                escape_attr(lang),
                escape_text(text)
            )),
            Node::Tex(tex) => out.push_str(&format!("<tex>{}</tex>", escape_text(tex))),
        }
    }
}

/// A visible paragraph of canonical nodes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Paragraph {
    pub nodes: Vec<Node>,
}

impl Paragraph {
    fn push(&mut self, node: Node) {
        if let (Node::Text(new), Some(Node::Text(prev))) = (&node, self.nodes.last_mut()) {
            prev.push_str(new);
            return;
        }
        self.nodes.push(node);
    }

    fn is_visible(&self) -> bool {
        self.nodes.iter().any(Node::is_visible)
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::from("<p>");
        for node in &self.nodes {
            node.write_xml(&mut out);
        }
        out.push_str("</p>");
        out
    }

    /// Convert to platform segments. `br` folds into the surrounding text.
    pub fn to_segments(&self) -> Vec<Segment> {
        fn push_text(segments: &mut Vec<Segment>, s: &str) {
            if let Some(Segment::Text { text }) = segments.last_mut() {
                text.push_str(s);
            } else {
                segments.push(Segment::text(s));
            }
        }

        let mut segments: Vec<Segment> = Vec::new();
        for node in &self.nodes {
            match node {
                Node::Text(t) => push_text(&mut segments, t),
                Node::Br => push_text(&mut segments, "\n"),
                Node::Mention { uid } => segments.push(Segment::mention(uid.clone())),
                Node::Reply { id } => segments.push(Segment::reply(id.clone())),
                Node::ImageUrl(url) => segments.push(Segment::image(url.clone())),
                Node::ImageNamed(name) => {
                    segments.push(Segment::NamedImage { name: name.clone() })
                }
                Node::Face { id, .. } => segments.push(Segment::Face { id: id.clone() }),
                Node::Code { lang, text } => segments.push(Segment::Code {
                    lang: lang.clone(),
                    text: text.clone(),
                }),
                Node::Tex(tex) => segments.push(Segment::Formula { tex: tex.clone() }),
            }
        }
        segments
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions<'a> {
    pub faces: &'a FaceTable,
    /// On a face id/name mismatch emit `<image name>` instead of the face
    /// looked up by name.
    pub face_mismatch_as_image: bool,
}

impl Default for DecodeOptions<'static> {
    fn default() -> Self {
        Self {
            faces: FaceTable::global(),
            face_mismatch_as_image: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sanitizer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenKind {
    Paragraph,
    /// Body dropped (`time`, `name`, `uid`, `mention`).
    Muted,
    /// Markup dropped, body kept.
    Unknown,
}

struct Open {
    name: String,
    kind: OpenKind,
}

struct Sanitizer<'o> {
    opts: DecodeOptions<'o>,
    out: Vec<Paragraph>,
    stack: Vec<Open>,
    current: Paragraph,
    outside: Paragraph,
    p_depth: usize,
    reply_in_current: bool,
    reply_in_outside: bool,
}

impl<'o> Sanitizer<'o> {
    fn new(opts: DecodeOptions<'o>) -> Self {
        Self {
            opts,
            out: Vec::new(),
            stack: Vec::new(),
            current: Paragraph::default(),
            outside: Paragraph::default(),
            p_depth: 0,
            reply_in_current: false,
            reply_in_outside: false,
        }
    }

    fn muted(&self) -> bool {
        self.stack.iter().any(|o| o.kind == OpenKind::Muted)
    }

    fn flush_current(&mut self) {
        let para = std::mem::take(&mut self.current);
        if para.is_visible() {
            self.out.push(para);
        }
        self.reply_in_current = false;
    }

    fn flush_outside(&mut self) {
        let para = std::mem::take(&mut self.outside);
        if para.is_visible() {
            self.out.push(para);
        }
        self.reply_in_outside = false;
    }

    fn emit(&mut self, node: Node) {
        let is_reply = matches!(node, Node::Reply { .. });
        if self.p_depth > 0 {
            if is_reply {
                if self.reply_in_current {
                    self.flush_current();
                }
                self.reply_in_current = true;
            }
            self.current.push(node);
        } else {
            if is_reply {
                if self.reply_in_outside {
                    self.flush_outside();
                }
                self.reply_in_outside = true;
            }
            self.outside.push(node);
        }
    }

    fn text(&mut self, text: String) {
        if self.muted() {
            return;
        }
        // Outside paragraphs, whitespace between tags is not content.
        if self.p_depth == 0 && text.trim().is_empty() {
            return;
        }
        self.emit(Node::Text(text));
    }

    fn push_open(&mut self, name: String, kind: OpenKind) -> Result<(), CodecError> {
        if self.stack.len() >= MAX_DEPTH {
            return Err(CodecError::Malformed(format!(
                "nesting deeper than {MAX_DEPTH} elements"
            )));
        }
        self.stack.push(Open { name, kind });
        Ok(())
    }

    fn start(
        &mut self,
        scanner: &mut Scanner<'_>,
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    ) -> Result<(), CodecError> {
        if name == "p" {
            if self_closing {
                return Ok(());
            }
            if self.p_depth == 0 {
                self.flush_outside();
                self.reply_in_current = false;
            }
            self.p_depth += 1;
            return self.push_open(name, OpenKind::Paragraph);
        }

        if name == "code" || name == "tex" {
            if self_closing {
                return Ok(());
            }
            let raw = scanner.take_raw(&name);
            if self.muted() {
                return Ok(());
            }
            let node = if name == "code" {
                let lang = Token::attr(&attrs, "lang")
                    .filter(|l| !l.is_empty())
                    .unwrap_or("text")
                    .to_string();
                Node::Code { lang, text: raw }
            } else {
                Node::Tex(raw)
            };
            self.emit(node);
            return Ok(());
        }

        if IGNORE.contains(&name.as_str()) {
            if self_closing {
                return Ok(());
            }
            return self.push_open(name, OpenKind::Muted);
        }

        let is_void = VOID.contains(&name.as_str());
        let is_void_with_body = VOID_WITH_BODY.contains(&name.as_str());
        if is_void || is_void_with_body {
            if !self.muted() {
                if let Some(node) = self.void_node(&name, &attrs) {
                    self.emit(node);
                }
            }
            if is_void_with_body && !self_closing {
                return self.push_open(name, OpenKind::Muted);
            }
            return Ok(());
        }

        if self_closing {
            return Ok(());
        }
        self.push_open(name, OpenKind::Unknown)
    }

    fn void_node(&self, name: &str, attrs: &[(String, String)]) -> Option<Node> {
        let attr = |key: &str| Token::attr(attrs, key).filter(|v| !v.is_empty());
        match name {
            "br" => Some(Node::Br),
            "mention" => attr("uid").map(|uid| Node::Mention { uid: uid.to_string() }),
            "reply" => attr("id").map(|id| Node::Reply { id: id.to_string() }),
            "image" => {
                if let Some(url) = attr("url").filter(|u| u.starts_with("http")) {
                    Some(Node::ImageUrl(url.to_string()))
                } else {
                    attr("name").map(|n| Node::ImageNamed(n.to_string()))
                }
            }
            "face" => self.face_node(attr("id"), attr("name")),
            _ => None,
        }
    }

    /// Reconcile a face's id and name against the face table.
    fn face_node(&self, id: Option<&str>, name: Option<&str>) -> Option<Node> {
        let faces = self.opts.faces;
        let face = |id: &str, name: &str| Node::Face {
            id: id.to_string(),
            name: name.to_string(),
        };
        match (id, name) {
            (Some(id), Some(name)) => {
                if faces.name_of(id) == Some(name) {
                    return Some(face(id, name));
                }
                if self.opts.face_mismatch_as_image {
                    return Some(Node::ImageNamed(name.to_string()));
                }
                match faces.id_of(name) {
                    Some(real_id) => Some(face(real_id, name)),
                    None => Some(Node::ImageNamed(name.to_string())),
                }
            }
            (Some(id), None) => faces.name_of(id).map(|name| face(id, name)),
            (None, Some(name)) => match faces.id_of(name) {
                Some(id) => Some(face(id, name)),
                None => Some(Node::ImageNamed(name.to_string())),
            },
            (None, None) => None,
        }
    }

    fn end(&mut self, name: &str) {
        let Some(at) = self.stack.iter().rposition(|o| o.name == name) else {
            return;
        };
        let closed: Vec<Open> = self.stack.drain(at..).collect();
        for open in closed.iter().rev() {
            if open.kind == OpenKind::Paragraph {
                self.p_depth -= 1;
                if self.p_depth == 0 {
                    self.flush_current();
                }
            }
        }
    }

    fn run(mut self, raw: &str) -> Result<Vec<Paragraph>, CodecError> {
        let mut scanner = Scanner::new(raw);
        while let Some(token) = scanner.next_token() {
            match token {
                Token::Start { name, attrs, self_closing } => {
                    self.start(&mut scanner, name, attrs, self_closing)?
                }
                Token::End { name } => self.end(&name),
                Token::Text(text) => self.text(text),
            }
        }
        if self.p_depth > 0 {
            self.flush_current();
        }
        self.flush_outside();
        Ok(self.out)
    }
}

/// Parse untrusted model output into visible paragraphs. A malformed
/// document degrades to one plain-text paragraph holding the raw input.
pub fn paragraphs(raw: &str, opts: DecodeOptions<'_>) -> Vec<Paragraph> {
    match Sanitizer::new(opts).run(raw) {
        Ok(paras) => paras,
        Err(err) => {
            tracing::warn!(error = %err, "falling back to plain text");
            let para = Paragraph {
                nodes: vec![Node::Text(raw.to_string())],
            };
            if para.is_visible() {
                vec![para]
            } else {
                Vec::new()
            }
        }
    }
}

/// Repair model output into canonical XML using the global face table.
pub fn sanitize(raw: &str) -> String {
    sanitize_with(raw, DecodeOptions::default())
}

pub fn sanitize_with(raw: &str, opts: DecodeOptions<'_>) -> String {
    paragraphs(raw, opts).iter().map(Paragraph::to_xml).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Iterator over outbound platform messages, one per paragraph.
#[derive(Debug)]
pub struct Decoded {
    inner: std::vec::IntoIter<Paragraph>,
}

impl Iterator for Decoded {
    type Item = Vec<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|p| p.to_segments())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Decoded {}

/// Decode model output into platform messages using the global face table.
pub fn decode(raw: &str) -> Result<Decoded, CodecError> {
    decode_with(raw, DecodeOptions::default())
}

pub fn decode_with(raw: &str, opts: DecodeOptions<'_>) -> Result<Decoded, CodecError> {
    let paras = paragraphs(raw, opts);
    if paras.is_empty() {
        return Err(CodecError::NoParagraphs);
    }
    Ok(Decoded {
        inner: paras.into_iter(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn faces() -> FaceTable {
        FaceTable::from_map(HashMap::from([("14".to_string(), "smile".to_string())]))
    }

    fn clean(raw: &str) -> String {
        let table = faces();
        sanitize_with(
            raw,
            DecodeOptions {
                faces: &table,
                face_mismatch_as_image: true,
            },
        )
    }

    #[test]
    fn keeps_well_formed_paragraphs() {
        assert_eq!(clean("<p>hello</p><p>world</p>"), "<p>hello</p><p>world</p>");
    }

    #[test]
    fn blank_paragraphs_are_dropped() {
        assert_eq!(clean("<p>   </p><p>hi</p>"), "<p>hi</p>");
        assert_eq!(clean("<p><time>12:00</time></p>"), "");
    }

    #[test]
    fn bare_text_becomes_a_paragraph() {
        assert_eq!(clean("just words"), "<p>just words</p>");
        assert_eq!(clean("lead<p>body</p>tail"), "<p>lead</p><p>body</p><p>tail</p>");
    }

    #[test]
    fn whitespace_between_paragraphs_is_ignored() {
        assert_eq!(clean("<p>a</p>\n  \n<p>b</p>"), "<p>a</p><p>b</p>");
    }

    #[test]
    fn ignored_tags_drop_body_but_keep_tail() {
        assert_eq!(
            clean("<p><name>Kohi</name><uid>1</uid><time>now</time>hey</p>"),
            "<p>hey</p>"
        );
    }

    #[test]
    fn unknown_tags_keep_their_text() {
        assert_eq!(clean("<p><b>bold</b> and <i>it</i></p>"), "<p>bold and it</p>");
    }

    #[test]
    fn second_reply_splits_the_paragraph() {
        assert_eq!(
            clean(r#"<p><reply id="1"/>a<reply id="2"/>b</p>"#),
            r#"<p><reply id="1"/>a</p><p><reply id="2"/>b</p>"#
        );
    }

    #[test]
    fn mention_body_is_dropped() {
        assert_eq!(
            clean(r#"<p><mention uid="42">Alice</mention> hi</p>"#),
            r#"<p><mention uid="42"/> hi</p>"#
        );
    }

    #[test]
    fn void_tags_without_required_attribute_are_dropped() {
        assert_eq!(clean("<p><mention/><reply/>x</p>"), "<p>x</p>");
    }

    #[test]
    fn image_prefers_http_url_then_name() {
        assert_eq!(
            clean(r#"<p><image url="http://a/b.png"/><image url="file:///etc" name="cat"/><image/></p>"#),
            r#"<p><image url="http://a/b.png"/><image name="cat"/></p>"#
        );
    }

    #[test]
    fn faces_are_checked_against_table() {
        assert_eq!(
            clean(r#"<p><face id="14" name="smile"/></p>"#),
            r#"<p><face id="14" name="smile"/></p>"#
        );
        assert_eq!(
            clean(r#"<p><face id="99" name="wave"/></p>"#),
            r#"<p><image name="wave"/></p>"#
        );
        assert_eq!(clean(r#"<p><face id="14"/></p>"#), r#"<p><face id="14" name="smile"/></p>"#);
    }

    #[test]
    fn face_mismatch_can_resolve_by_name() {
        let table = faces();
        let out = sanitize_with(
            r#"<p><face id="99" name="smile"/></p>"#,
            DecodeOptions {
                faces: &table,
                face_mismatch_as_image: false,
            },
        );
        assert_eq!(out, r#"<p><face id="14" name="smile"/></p>"#);
    }

    #[test]
    fn code_is_raw_and_escaped_once() {
        let out = clean(r#"<p><code lang="rust"><![CDATA[if a < b && c > d {}]]></code></p>"#);
        assert_eq!(
            out,
            r#"<p><code lang="rust">if a &lt; b &amp;&amp; c &gt; d {}</code></p>"#
        );
        assert_eq!(clean(&out), out);
    }

    #[test]
    fn code_without_lang_defaults_to_text() {
        assert_eq!(clean("<p><code><b></code></p>"), r#"<p><code lang="text">&lt;b&gt;</code></p>"#);
    }

    #[test]
    fn sanitize_is_idempotent_on_messy_input() {
        let raw = r#"intro <p>one<br>two &amp; <mention uid="7">x</mention><p>nested</p></p><tex>a<b</tex>"#;
        let once = clean(raw);
        assert_eq!(clean(&once), once);
    }

    #[test]
    fn unclosed_paragraph_is_flushed_at_end() {
        assert_eq!(clean("<p>dangling"), "<p>dangling</p>");
    }

    #[test]
    fn nbsp_only_paragraph_is_blank() {
        assert_eq!(clean("<p>&nbsp;\u{a0}</p>"), "");
    }

    #[test]
    fn excessive_nesting_falls_back_to_plain_text() {
        let raw = format!("{}deep", "<b>".repeat(300));
        let paras = paragraphs(&raw, DecodeOptions::default());
        assert_eq!(paras.len(), 1);
        assert_eq!(paras[0].nodes, vec![Node::Text(raw)]);
    }

    #[test]
    fn decode_yields_one_message_per_paragraph() {
        let table = faces();
        let opts = DecodeOptions {
            faces: &table,
            face_mismatch_as_image: true,
        };
        let messages: Vec<_> = decode_with(
            r#"<p><reply id="9"/>a<br/>b</p><p><mention uid="1"/>c</p>"#,
            opts,
        )
        .unwrap()
        .collect();
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0],
            vec![Segment::reply("9"), Segment::text("a\nb")]
        );
        assert_eq!(messages[1], vec![Segment::mention("1"), Segment::text("c")]);
    }

    #[test]
    fn decode_of_empty_output_is_an_error() {
        assert_eq!(decode("  ").unwrap_err(), CodecError::NoParagraphs);
        assert_eq!(decode("<p> </p>").unwrap_err(), CodecError::NoParagraphs);
    }

    #[test]
    fn blank_paragraph_sends_no_message() {
        let messages: Vec<_> = decode("<p>   </p><p>hello</p>").unwrap().collect();
        assert_eq!(messages, vec![vec![Segment::text("hello")]]);
    }
}
