//! Content source backed by the local filesystem.

use std::path::Path;

use strata_tiles::{ContentSource, strip_query};

/// Reads content locators as file paths.
///
/// Query strings and fragments (such as the `v=` tileset version) are
/// ignored, and a `file://` prefix is accepted. Other schemes are refused.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileSource;

impl ContentSource for FileSource {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>, String> {
        let path = strip_query(uri);
        let path = match path.split_once("://") {
            Some(("file", rest)) => rest,
            Some((scheme, _)) => return Err(format!("unsupported scheme `{scheme}`")),
            None => path,
        };
        std::fs::read(Path::new(path)).map_err(|e| format!("{path}: {e}"))
    }
}
