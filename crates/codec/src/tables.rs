//! Process-wide lookup tables: platform face ids and user display names.
//!
//! Both are read on every encode/decode. The face table is loaded once at
//! startup; the name directory learns names as messages arrive.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use parking_lot::RwLock;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FaceTable
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

static FACES: OnceLock<FaceTable> = OnceLock::new();

/// Bidirectional map between built-in face ids and their names.
#[derive(Debug, Clone, Default)]
pub struct FaceTable {
    by_id: HashMap<String, String>,
    by_name: HashMap<String, String>,
}

impl FaceTable {
    pub fn from_map(map: HashMap<String, String>) -> Self {
        let by_name = map.iter().map(|(id, name)| (name.clone(), id.clone())).collect();
        Self { by_id: map, by_name }
    }

    /// Load a JSON object of `{ "<id>": "<name>" }`.
    pub fn load_json(path: &Path) -> kh_domain::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let map: HashMap<String, String> = serde_json::from_str(&raw)?;
        Ok(Self::from_map(map))
    }

    /// Install the process-wide table. Returns `false` if a table was
    /// already installed (or read) earlier.
    pub fn install(table: FaceTable) -> bool {
        FACES.set(table).is_ok()
    }

    /// The process-wide table; empty if none was installed.
    pub fn global() -> &'static FaceTable {
        FACES.get_or_init(FaceTable::default)
    }

    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(String::as_str)
    }

    pub fn id_of(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// NameDirectory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

static NAMES: OnceLock<NameDirectory> = OnceLock::new();

/// uid → last seen display name.
#[derive(Debug, Default)]
pub struct NameDirectory {
    names: RwLock<HashMap<String, String>>,
}

impl NameDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static NameDirectory {
        NAMES.get_or_init(NameDirectory::default)
    }

    pub fn remember(&self, uid: &str, name: &str) {
        if name.is_empty() {
            return;
        }
        self.names.write().insert(uid.to_string(), name.to_string());
    }

    pub fn name_of(&self, uid: &str) -> Option<String> {
        self.names.read().get(uid).cloned()
    }

    /// Display name for a mention: the known name, else the first five
    /// characters of the uid.
    pub fn display_name(&self, uid: &str) -> String {
        self.name_of(uid)
            .unwrap_or_else(|| uid.chars().take(5).collect())
    }
}
