use serde::{Deserialize, Serialize};

/// One element of a platform rich-text message.
///
/// `Code`, `Formula` and `NamedImage` only appear in decoded output; the
/// platform adapter is expected to render them (a code block, a formula
/// image, a sticker looked up by name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text { text: String },
    Mention { uid: String, name: Option<String> },
    Reply { id: String },
    Image { url: String },
    NamedImage { name: String },
    Sticker { url: String, summary: Option<String> },
    Face { id: String },
    Voice,
    Code { lang: String, text: String },
    Formula { tex: String },
    Other { kind: String },
}

impl Segment {
    pub fn text(s: impl Into<String>) -> Self {
        Segment::Text { text: s.into() }
    }

    pub fn mention(uid: impl Into<String>) -> Self {
        Segment::Mention { uid: uid.into(), name: None }
    }

    pub fn reply(id: impl Into<String>) -> Self {
        Segment::Reply { id: id.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Segment::Image { url: url.into() }
    }
}

/// Concatenate the text of a decoded message, ignoring non-text segments.
pub fn plain_text(segments: &[Segment]) -> String {
    let mut out = String::new();
    for seg in segments {
        match seg {
            Segment::Text { text } => out.push_str(text),
            Segment::Code { text, .. } => out.push_str(text),
            Segment::Formula { tex } => out.push_str(tex),
            _ => {}
        }
    }
    out
}
