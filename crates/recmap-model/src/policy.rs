use serde::{Deserialize, Serialize};

/// Shape of an embedded value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EmbedKind {
    /// Named map: bin name to value, or element key to element.
    Map,
    /// Positional list ordered by ordinal, or by insertion for collections.
    List,
}

/// How a member is embedded in its parent rather than stored as a reference.
///
/// `kind` is how the member itself is stored; `element_kind` is how each
/// element is stored when the member is a collection of objects.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedSpec {
    #[serde(rename = "type")]
    pub kind: Option<EmbedKind>,
    pub element_kind: Option<EmbedKind>,
    /// Keep the element key inside elements of a map-embedded collection.
    pub save_key: bool,
}

impl EmbedSpec {
    pub fn map() -> Self {
        Self {
            kind: Some(EmbedKind::Map),
            ..Default::default()
        }
    }

    pub fn list() -> Self {
        Self {
            kind: Some(EmbedKind::List),
            ..Default::default()
        }
    }

    pub fn elements(mut self, kind: EmbedKind) -> Self {
        self.element_kind = Some(kind);
        self
    }

    pub fn save_key(mut self, save_key: bool) -> Self {
        self.save_key = save_key;
        self
    }
}

/// How a referenced record is located.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReferenceKind {
    /// Store the target's user key.
    #[default]
    Id,
    /// Store the target's record digest.
    Digest,
}

/// A member stored as a foreign key to a separate record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceSpec {
    #[serde(rename = "type")]
    pub kind: ReferenceKind,
    /// Decode to a key-only placeholder instead of fetching the target.
    pub lazy: bool,
    /// Resolve through the batched resolution pass.
    pub batch_load: bool,
}

impl Default for ReferenceSpec {
    fn default() -> Self {
        Self {
            kind: ReferenceKind::Id,
            lazy: false,
            batch_load: true,
        }
    }
}

impl ReferenceSpec {
    pub fn id() -> Self {
        Self::default()
    }

    pub fn digest() -> Self {
        Self {
            kind: ReferenceKind::Digest,
            ..Default::default()
        }
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn eager_single(mut self) -> Self {
        self.batch_load = false;
        self
    }
}
