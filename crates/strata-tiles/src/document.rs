//! 3D Tiles JSON schema and validation.
//!
//! Parsing is two-phase: serde reads the raw shape, then [`TilesetDocument::parse`]
//! rejects documents the engine cannot stream (bad version, unsupported
//! required extensions, bounding volumes of the wrong arity, negative errors).

use glam::{DMat3, DMat4, DVec3};
use serde::Deserialize;

use crate::bounds::{BoundingRegion, BoundingSphere, BoundingVolume, OrientedBox};
use crate::error::StructuralError;
use crate::tile::Refinement;

/// 3D Tiles asset versions this engine reads.
const SUPPORTED_VERSIONS: &[&str] = &["0.0", "1.0"];

/// Required extensions the engine understands. Empty: any required
/// extension is rejected.
const SUPPORTED_EXTENSIONS: &[&str] = &[];

/// Top-level `tileset.json`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilesetDocument {
    pub asset: AssetDocument,
    /// Error of the whole tileset; the root's parent error when present.
    #[serde(default)]
    pub geometric_error: Option<f64>,
    pub root: TileDocument,
    #[serde(default)]
    pub extensions_used: Vec<String>,
    #[serde(default)]
    pub extensions_required: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDocument {
    pub version: String,
    #[serde(default)]
    pub tileset_version: Option<String>,
}

/// One node of the tile hierarchy as written in JSON.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileDocument {
    pub bounding_volume: VolumeDocument,
    pub geometric_error: f64,
    #[serde(default)]
    pub refine: Option<String>,
    #[serde(default)]
    pub content: Option<ContentDocument>,
    #[serde(default)]
    pub children: Vec<TileDocument>,
    /// Column-major local transform.
    #[serde(default)]
    pub transform: Option<[f64; 16]>,
    #[serde(default)]
    pub viewer_request_volume: Option<VolumeDocument>,
    #[serde(default)]
    pub expire: Option<ExpireDocument>,
}

/// `boundingVolume` object. Exactly one member must be present.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct VolumeDocument {
    #[serde(default, rename = "box")]
    pub oriented_box: Option<Vec<f64>>,
    #[serde(default)]
    pub sphere: Option<Vec<f64>>,
    #[serde(default)]
    pub region: Option<Vec<f64>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentDocument {
    #[serde(default)]
    pub uri: Option<String>,
    /// Pre-1.0 spelling of `uri`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub bounding_volume: Option<VolumeDocument>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExpireDocument {
    /// Seconds after load at which the content goes stale.
    #[serde(default)]
    pub duration: Option<f64>,
}

impl TilesetDocument {
    /// Parse and validate a tileset document.
    pub fn parse(bytes: &[u8]) -> Result<Self, StructuralError> {
        let document: TilesetDocument = serde_json::from_slice(bytes)?;
        document.validate()?;
        Ok(document)
    }

    fn validate(&self) -> Result<(), StructuralError> {
        if !SUPPORTED_VERSIONS.contains(&self.asset.version.as_str()) {
            return Err(StructuralError::UnsupportedVersion(self.asset.version.clone()));
        }
        if let Some(extension) = self
            .extensions_required
            .iter()
            .find(|e| !SUPPORTED_EXTENSIONS.contains(&e.as_str()))
        {
            return Err(StructuralError::UnsupportedExtension(extension.clone()));
        }
        if let Some(error) = self.geometric_error
            && !is_non_negative(error)
        {
            return Err(StructuralError::InvalidValue {
                field: "geometricError",
                value: error,
            });
        }

        let mut stack = vec![&self.root];
        while let Some(tile) = stack.pop() {
            tile.validate()?;
            stack.extend(tile.children.iter());
        }
        Ok(())
    }
}

impl TileDocument {
    fn validate(&self) -> Result<(), StructuralError> {
        if !is_non_negative(self.geometric_error) {
            return Err(StructuralError::InvalidValue {
                field: "geometricError",
                value: self.geometric_error,
            });
        }
        self.bounding_volume.to_volume()?;
        if let Some(volume) = &self.viewer_request_volume {
            volume.to_volume()?;
        }
        if let Some(content) = &self.content
            && let Some(volume) = &content.bounding_volume
        {
            volume.to_volume()?;
        }
        self.refinement()?;
        if let Some(duration) = self.expire.as_ref().and_then(|e| e.duration)
            && !is_non_negative(duration)
        {
            return Err(StructuralError::InvalidValue {
                field: "expire.duration",
                value: duration,
            });
        }
        Ok(())
    }

    /// Declared refinement, if any. Case-insensitive.
    pub fn refinement(&self) -> Result<Option<Refinement>, StructuralError> {
        match self.refine.as_deref() {
            None => Ok(None),
            Some(r) if r.eq_ignore_ascii_case("REPLACE") => Ok(Some(Refinement::Replace)),
            Some(r) if r.eq_ignore_ascii_case("ADD") => Ok(Some(Refinement::Add)),
            Some(r) => Err(StructuralError::UnknownRefinement(r.to_string())),
        }
    }

    /// Local transform, identity when absent.
    pub fn local_transform(&self) -> DMat4 {
        self.transform
            .map(|m| DMat4::from_cols_array(&m))
            .unwrap_or(DMat4::IDENTITY)
    }

    /// Content locator, preferring `uri` over the legacy `url`.
    pub fn content_uri(&self) -> Option<&str> {
        let content = self.content.as_ref()?;
        content.uri.as_deref().or(content.url.as_deref())
    }
}

impl VolumeDocument {
    /// Convert to a bounding volume in the document's local frame.
    pub fn to_volume(&self) -> Result<BoundingVolume, StructuralError> {
        match (&self.oriented_box, &self.sphere, &self.region) {
            (Some(b), None, None) => {
                let b = fixed::<12>(b)?;
                let center = DVec3::new(b[0], b[1], b[2]);
                let half_axes = DMat3::from_cols(
                    DVec3::new(b[3], b[4], b[5]),
                    DVec3::new(b[6], b[7], b[8]),
                    DVec3::new(b[9], b[10], b[11]),
                );
                Ok(BoundingVolume::Box(OrientedBox::new(center, half_axes)))
            }
            (None, Some(s), None) => {
                let s = fixed::<4>(s)?;
                if !is_non_negative(s[3]) {
                    return Err(StructuralError::InvalidValue {
                        field: "boundingVolume.sphere",
                        value: s[3],
                    });
                }
                Ok(BoundingVolume::Sphere(BoundingSphere::new(
                    DVec3::new(s[0], s[1], s[2]),
                    s[3],
                )))
            }
            (None, None, Some(r)) => {
                let r = fixed::<6>(r)?;
                Ok(BoundingVolume::Region(BoundingRegion::new(
                    r[0], r[1], r[2], r[3], r[4], r[5],
                )))
            }
            _ => Err(StructuralError::MissingField("boundingVolume")),
        }
    }
}

fn is_non_negative(value: f64) -> bool {
    value >= 0.0
}

fn fixed<const N: usize>(values: &[f64]) -> Result<[f64; N], StructuralError> {
    let array: [f64; N] = values
        .try_into()
        .map_err(|_| StructuralError::MissingField("boundingVolume"))?;
    if let Some(bad) = array.iter().find(|v| !v.is_finite()) {
        return Err(StructuralError::InvalidValue {
            field: "boundingVolume",
            value: *bad,
        });
    }
    Ok(array)
}

/// Resolve a content locator against the locator of the document that
/// referenced it, appending the tileset version as a `v=` query.
///
/// Absolute locators (with a scheme or a leading `/`) are kept as-is.
pub fn resolve_uri(base: &str, uri: &str, tileset_version: Option<&str>) -> String {
    let mut resolved = if uri.contains("://") || uri.starts_with('/') {
        uri.to_string()
    } else {
        let base = base.split(['?', '#']).next().unwrap_or(base);
        match base.rfind('/') {
            Some(slash) => format!("{}{}", &base[..=slash], uri),
            None => uri.to_string(),
        }
    };
    if let Some(version) = tileset_version {
        let separator = if resolved.contains('?') { '&' } else { '?' };
        resolved.push(separator);
        resolved.push_str("v=");
        resolved.push_str(version);
    }
    resolved
}

/// Strip any query or fragment from a resolved locator.
pub fn strip_query(uri: &str) -> &str {
    uri.split(['?', '#']).next().unwrap_or(uri)
}
