use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kh_codec::escape::escape_text;
use kh_domain::error::{Error, Result};
use kh_domain::speaker::TOOL_SPEAKER_ID;
use kh_domain::tool::{Message, ToolCall};
use kh_domain::trace::TraceEvent;

use crate::record::{RecordSeg, SegId, TOOL_CALLS_FRAGMENT};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RecordList
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Timestamp-ordered, bounded conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordList {
    segs: Vec<RecordSeg>,
    max_len: usize,
    next_id: u64,
}

impl RecordList {
    pub fn new(max_len: usize) -> Self {
        Self {
            segs: Vec::new(),
            max_len: max_len.max(1),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.segs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segs.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecordSeg> {
        self.segs.iter()
    }

    pub fn last(&self) -> Option<&RecordSeg> {
        self.segs.last()
    }

    pub fn clear(&mut self) {
        self.segs.clear();
    }

    pub fn get(&self, id: SegId) -> Option<&RecordSeg> {
        self.segs.iter().find(|s| s.id == id)
    }

    /// Entry holding the fragment `fragment_id` (the platform message id
    /// for inbound messages).
    pub fn find_by_fragment(&self, fragment_id: &str) -> Option<SegId> {
        self.segs
            .iter()
            .rev()
            .find(|s| s.fragments.iter().any(|f| f.id == fragment_id))
            .map(|s| s.id)
    }

    /// Insert `seg` in timestamp order, merging it into the preceding
    /// entry when allowed. Returns the id of the entry now holding it.
    pub fn add(&mut self, mut seg: RecordSeg) -> SegId {
        if let Some(target) = seg.reply_to.and_then(|id| self.get(id)) {
            let mut images = target.images.clone();
            images.append(&mut seg.images);
            seg.images = images;
        }

        let pos = self.segs.partition_point(|s| s.timestamp <= seg.timestamp);

        if pos > 0 && mergeable(&self.segs[pos - 1], &seg) {
            let prev = &mut self.segs[pos - 1];
            prev.fragments.append(&mut seg.fragments);
            prev.images.append(&mut seg.images);
            prev.timestamp = prev.timestamp.max(seg.timestamp);
            let id = prev.id;
            TraceEvent::RecordAppended {
                speaker_id: seg.speaker_id,
                merged: true,
                len: self.segs.len(),
            }
            .emit();
            return id;
        }

        seg.id = SegId(self.next_id);
        self.next_id += 1;
        let id = seg.id;
        let speaker_id = seg.speaker_id.clone();
        self.segs.insert(pos, seg);

        while self.segs.len() > self.max_len {
            let evicted = self.segs.remove(0);
            tracing::debug!(seg = evicted.id.0, "evicted oldest record");
        }

        TraceEvent::RecordAppended {
            speaker_id,
            merged: false,
            len: self.segs.len(),
        }
        .emit();
        id
    }

    /// Replace the first fragment called `fragment_id` with a tombstone.
    ///
    /// Returns `false` when no such fragment exists or it was already
    /// recalled; the first tombstone is kept.
    pub fn recall(&mut self, fragment_id: &str, speaker_id: Option<&str>) -> bool {
        self.recall_at(fragment_id, speaker_id, Utc::now())
    }

    pub fn recall_at(
        &mut self,
        fragment_id: &str,
        speaker_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> bool {
        let fragment = self
            .segs
            .iter_mut()
            .filter(|s| speaker_id.map_or(true, |sid| s.speaker_id == sid))
            .flat_map(|s| s.fragments.iter_mut())
            .find(|f| f.id == fragment_id);

        match fragment {
            Some(f) if !f.is_recalled() => {
                f.tombstone(at);
                TraceEvent::RecordRecalled {
                    fragment_id: fragment_id.to_owned(),
                }
                .emit();
                true
            }
            _ => false,
        }
    }

    // ── Projection ────────────────────────────────────────────────────

    /// Render the list as chat turns, oldest first.
    ///
    /// Tool results follow the assistant turn that issued their calls.
    /// Messages recorded while those calls were still running are moved
    /// behind the tool block. Tool results whose call is no longer in the
    /// window (evicted with the assistant turn that issued it) are left out.
    pub fn project(&self, agent_id: &str, image_mode: bool) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.segs.len());
        let mut issued: HashSet<String> = HashSet::new();
        let mut awaiting: HashSet<String> = HashSet::new();
        let mut deferred: Vec<Message> = Vec::new();

        for seg in &self.segs {
            if seg.speaker_id == agent_id {
                if !awaiting.is_empty() {
                    tracing::debug!(missing = awaiting.len(), "tool block closed without all results");
                    awaiting.clear();
                    out.append(&mut deferred);
                }
                let (text, calls) = assistant_parts(seg);
                issued.extend(calls.iter().map(|c| c.call_id.clone()));
                awaiting.extend(calls.iter().map(|c| c.call_id.clone()));
                if calls.is_empty() {
                    out.push(Message::assistant(text));
                } else {
                    out.push(Message::assistant_with_calls(&text, &calls));
                }
            } else if seg.speaker_id == TOOL_SPEAKER_ID {
                for f in &seg.fragments {
                    if issued.contains(&f.id) {
                        out.push(Message::tool_result(f.id.clone(), f.xml.clone()));
                        awaiting.remove(&f.id);
                    } else {
                        tracing::debug!(call_id = %f.id, "dropping orphaned tool result");
                    }
                }
                if awaiting.is_empty() {
                    out.append(&mut deferred);
                }
            } else {
                let text = self.render_user(seg);
                let turn = if image_mode && !seg.images.is_empty() {
                    Message::user_with_images(text, &seg.images)
                } else {
                    Message::user(text)
                };
                if awaiting.is_empty() {
                    out.push(turn);
                } else {
                    deferred.push(turn);
                }
            }
        }
        out.append(&mut deferred);
        out
    }

    fn render_user(&self, seg: &RecordSeg) -> String {
        let mut text = format!(
            "<name>{}</name><uid>{}</uid><time>{}</time>\n",
            escape_text(&seg.speaker_name),
            escape_text(&seg.speaker_id),
            seg.timestamp.format("%Y-%m-%d %H:%M"),
        );
        if let Some(target) = seg.reply_to.and_then(|id| self.get(id)) {
            for f in &target.fragments {
                for line in f.xml.lines() {
                    text.push_str("> ");
                    text.push_str(line);
                    text.push('\n');
                }
            }
        }
        let body: Vec<&str> = seg.fragments.iter().map(|f| f.xml.as_str()).collect();
        text.push_str(&body.join("\n"));
        text
    }

    // ── Checkpointing ─────────────────────────────────────────────────

    /// Write the list as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Other(format!("serializing records: {e}")))?;
        std::fs::write(path, json).map_err(Error::Io)?;
        Ok(())
    }

    /// Load a list written by [`RecordList::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        let list: RecordList = serde_json::from_str(&raw)?;
        Ok(list)
    }
}

fn mergeable(prev: &RecordSeg, new: &RecordSeg) -> bool {
    prev.speaker_id == new.speaker_id
        && prev.reply_to.is_none()
        && new.reply_to.is_none()
        && new.speaker_id != TOOL_SPEAKER_ID
}

/// Content text and decoded tool calls of an agent entry.
fn assistant_parts(seg: &RecordSeg) -> (String, Vec<ToolCall>) {
    let mut text = Vec::new();
    let mut calls = Vec::new();
    for f in &seg.fragments {
        if f.id != TOOL_CALLS_FRAGMENT {
            text.push(f.xml.as_str());
            continue;
        }
        if f.is_recalled() {
            continue;
        }
        match serde_json::from_str::<Vec<ToolCall>>(&f.xml) {
            Ok(mut decoded) => calls.append(&mut decoded),
            Err(e) => tracing::warn!(error = %e, "skipping undecodable tool_calls fragment"),
        }
    }
    (text.join("\n"), calls)
}
