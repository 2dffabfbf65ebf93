// zodbbackup/src/config/blob_storage.rs
use serde::Deserialize;
use std::collections::BTreeMap;

/// Options of a sibling configuration section, e.g. a Zope instance part.
pub type PeerConfig = BTreeMap<String, String>;

/// A kind of peer section known to carry a blob-storage location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerShape {
    /// A ZEO server part: its blob storage is the authoritative one.
    Zeoserver,
    /// A Zope instance / client part.
    Instance,
    /// Any part with a blob storage option.
    Any,
}

pub const DEFAULT_SHAPES: [PeerShape; 3] = [PeerShape::Zeoserver, PeerShape::Instance, PeerShape::Any];

const BLOB_KEYS: [&str; 2] = ["blob-storage", "blob_storage"];

impl PeerShape {
    fn matches(&self, peer: &PeerConfig) -> bool {
        let recipe = peer.get("recipe").map(|r| r.to_ascii_lowercase()).unwrap_or_default();
        match self {
            PeerShape::Zeoserver => recipe.contains("zeoserver"),
            PeerShape::Instance => recipe.contains("instance"),
            PeerShape::Any => true,
        }
    }

    /// The blob storage location this peer declares, when it has this shape.
    pub fn extract<'a>(&self, peer: &'a PeerConfig) -> Option<&'a str> {
        if !self.matches(peer) {
            return None;
        }
        BLOB_KEYS
            .iter()
            .find_map(|key| peer.get(*key))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// Finds the blob storage location among named peer sections.
///
/// Shapes are tried in priority order; within one shape, peers are tried in
/// name order. The first hit wins.
pub struct BlobStorageResolver<'a> {
    shapes: &'a [PeerShape],
}

impl<'a> BlobStorageResolver<'a> {
    pub fn new(shapes: &'a [PeerShape]) -> Self {
        Self { shapes }
    }

    pub fn resolve<'p>(&self, peers: &'p BTreeMap<String, PeerConfig>) -> Option<(&'p str, &'p str)> {
        self.shapes.iter().find_map(|shape| {
            peers
                .iter()
                .find_map(|(name, peer)| shape.extract(peer).map(|location| (name.as_str(), location)))
        })
    }
}
