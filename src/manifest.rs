use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the manifest inside a working directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// One country tile written by the splitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub country: String,
    pub file_name: String,
    pub width: usize,
    pub height: usize,
    pub geo_transform: [f64; 6],
}

/// The list of tiles produced for one source raster, handed from the splitter to the merger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileManifest {
    pub source: PathBuf,
    pub nodata: f64,
    pub tiles: Vec<TileRecord>,
}

impl TileManifest {
    pub fn new(source: &Path, nodata: f64) -> Self {
        TileManifest {
            source: source.to_path_buf(),
            nodata,
            tiles: Vec::new(),
        }
    }

    /// Adds `record`, replacing any earlier record for the same file.
    pub fn push(&mut self, record: TileRecord) {
        match self.tiles.iter_mut().find(|t| t.file_name == record.file_name) {
            Some(existing) => *existing = record,
            None => self.tiles.push(record),
        }
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Country codes in production order.
    pub fn countries(&self) -> Vec<&str> {
        self.tiles.iter().map(|t| t.country.as_str()).collect()
    }

    /// Tile paths under `dir`, sorted by file name, each listed once.
    pub fn tile_paths(&self, dir: &Path) -> Vec<PathBuf> {
        let mut names: Vec<&str> = self.tiles.iter().map(|t| t.file_name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names.into_iter().map(|name| dir.join(name)).collect()
    }

    /// Writes `manifest.json` into `dir`, replacing any previous one.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILE);
        let json_string = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json_string)
            .with_context(|| format!("Failed to write manifest {:?}", path))?;
        Ok(path)
    }

    /// Reads `manifest.json` from `dir`, or `None` when there is none.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read manifest {:?}", path))?;
        let manifest = serde_json::from_str(&content)
            .with_context(|| format!("Malformed manifest {:?}", path))?;
        Ok(Some(manifest))
    }
}
