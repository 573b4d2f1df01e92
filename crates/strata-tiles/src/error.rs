//! Error types for tileset loading, option validation, and tile content.

/// Errors surfaced synchronously by the tileset API.
#[derive(Debug, thiserror::Error)]
pub enum TilesError {
    /// The tileset document is malformed or unsupported. Fatal to the load.
    #[error("invalid tileset: {0}")]
    Structural(#[from] StructuralError),

    /// An option was assigned a value outside its valid range.
    #[error("invalid value {value} for option `{name}`")]
    InvalidOption {
        /// Name of the rejected option.
        name: &'static str,
        /// The rejected value, formatted.
        value: String,
    },
}

/// Ways a tileset document can be malformed.
#[derive(Debug, thiserror::Error)]
pub enum StructuralError {
    /// The document is not valid JSON or does not match the schema.
    #[error("failed to parse tileset JSON: {0}")]
    Json(#[source] serde_json::Error),

    /// `asset.version` is not a supported 3D Tiles version.
    #[error("unsupported 3D Tiles version {0:?} (expected \"0.0\" or \"1.0\")")]
    UnsupportedVersion(String),

    /// A required extension is not implemented.
    #[error("unsupported required extension: {0}")]
    UnsupportedExtension(String),

    /// A required field is missing or has the wrong shape.
    #[error("missing or invalid field `{0}`")]
    MissingField(&'static str),

    /// `refine` is neither `REPLACE` nor `ADD`.
    #[error("unknown refinement {0:?}")]
    UnknownRefinement(String),

    /// A numeric field holds a value outside its domain.
    #[error("field `{field}` has invalid value {value}")]
    InvalidValue {
        /// Field path.
        field: &'static str,
        /// Offending value.
        value: f64,
    },
}

impl From<serde_json::Error> for StructuralError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Per-tile content failures. Never fatal to the tileset.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ContentError {
    /// The content source could not deliver bytes.
    #[error("failed to fetch {uri}: {message}")]
    Fetch {
        /// Resolved content locator.
        uri: String,
        /// Error message reported by the source.
        message: String,
    },

    /// The bytes could not be turned into renderable content.
    #[error("failed to process {uri}: {message}")]
    Process {
        /// Resolved content locator.
        uri: String,
        /// Error message reported by the processor.
        message: String,
    },

    /// The request was cancelled before it completed.
    #[error("request cancelled")]
    Cancelled,
}

impl ContentError {
    /// The human-readable message without the locator prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Fetch { message, .. } | Self::Process { message, .. } => message,
            Self::Cancelled => "request cancelled",
        }
    }
}

/// Result alias for the tileset API.
pub type TilesResult<T> = Result<T, TilesError>;
