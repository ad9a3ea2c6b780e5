//! Input source snapshot types

use serde::{Deserialize, Serialize};

/// Stable identity of an input source (e.g. `com.apple.keylayout.US`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Input source category as reported by the text input subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    Keyboard,
    Palette,
    Ink,
    Other,
}

/// Input source type within the keyboard category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A plain keyboard layout
    Layout,
    /// A mode of an input method (e.g. Hiragana)
    InputMode,
    /// An input method without modes
    InputMethod,
    Other,
}

/// Immutable snapshot of one input source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSource {
    pub id: SourceId,
    /// Localized, human-readable name
    pub name: String,
    pub enabled: bool,
    pub selectable: bool,
    pub category: SourceCategory,
    pub kind: SourceKind,
}

impl InputSource {
    /// Whether this source belongs in the cycling ring.
    ///
    /// Enabled, selectable, keyboard category, layout or input mode.
    pub fn is_cyclable(&self) -> bool {
        self.enabled
            && self.selectable
            && self.category == SourceCategory::Keyboard
            && matches!(self.kind, SourceKind::Layout | SourceKind::InputMode)
    }
}
