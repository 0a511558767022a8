use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fragment id for model-written content on agent entries.
pub const CONTENT_FRAGMENT: &str = "content";
/// Fragment id for the JSON-encoded tool call list on agent entries.
pub const TOOL_CALLS_FRAGMENT: &str = "tool_calls";

/// Identity of a [`RecordSeg`] inside its list. Assigned by
/// [`crate::RecordList::add`], never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegId(pub u64);

/// One named payload of an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: String,
    pub xml: String,
    /// Set once the fragment has been recalled; `xml` then holds the
    /// tombstone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recalled_at: Option<DateTime<Utc>>,
}

impl Fragment {
    pub fn new(id: impl Into<String>, xml: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            xml: xml.into(),
            recalled_at: None,
        }
    }

    pub fn is_recalled(&self) -> bool {
        self.recalled_at.is_some()
    }

    pub(crate) fn tombstone(&mut self, at: DateTime<Utc>) {
        self.xml = format!("[deleted at {}]", at.format("%Y-%m-%d %H:%M:%S"));
        self.recalled_at = Some(at);
    }
}

/// A single logical conversation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSeg {
    pub id: SegId,
    pub speaker_name: String,
    pub speaker_id: String,
    pub fragments: Vec<Fragment>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<SegId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl RecordSeg {
    /// New entry stamped `now`, with a single fragment.
    pub fn new(
        speaker_name: impl Into<String>,
        speaker_id: impl Into<String>,
        fragment_id: impl Into<String>,
        xml: impl Into<String>,
    ) -> Self {
        Self {
            id: SegId(0),
            speaker_name: speaker_name.into(),
            speaker_id: speaker_id.into(),
            fragments: vec![Fragment::new(fragment_id, xml)],
            timestamp: Utc::now(),
            reply_to: None,
            images: Vec::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn replying_to(mut self, target: SegId) -> Self {
        self.reply_to = Some(target);
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn with_fragment(mut self, id: impl Into<String>, xml: impl Into<String>) -> Self {
        self.fragments.push(Fragment::new(id, xml));
        self
    }

    pub fn fragment(&self, id: &str) -> Option<&Fragment> {
        self.fragments.iter().find(|f| f.id == id)
    }
}
