use serde::{Deserialize, Serialize};

use super::d_true;

/// MessageCodec settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    /// JSON file mapping platform face ids to names (`{"14": "smile"}`).
    #[serde(default)]
    pub faces_file: Option<String>,
    /// When a `<face>` id and name disagree, emit `<image name>` instead
    /// of re-resolving the face by name.
    #[serde(default = "d_true")]
    pub face_mismatch_as_image: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            faces_file: None,
            face_mismatch_as_image: true,
        }
    }
}
