use crate::behavior::BehaviorContext;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Behavior,
    Map,
    Image,
    Audio,
}

impl AssetKind {
    fn from_extension(ext: &str) -> Option<AssetKind> {
        match ext {
            "behavior" => Some(AssetKind::Behavior),
            "map" => Some(AssetKind::Map),
            "png" | "jpg" | "jpeg" => Some(AssetKind::Image),
            "wav" | "mp3" | "ogg" => Some(AssetKind::Audio),
            _ => None,
        }
    }
}

/// A source-text container. Holds at most one compiled behavior context,
/// replaced wholesale on recompilation; map compilation results are owned by
/// the runtime that requested them.
pub struct Asset {
    pub id: Uuid,
    pub kind: AssetKind,
    pub name: String,
    pub source: String,
    pub behavior: Option<Rc<BehaviorContext>>,
}

impl Asset {
    pub fn new(kind: AssetKind, name: impl Into<String>, source: impl Into<String>) -> Asset {
        Asset { id: Uuid::new_v4(), kind, name: name.into(), source: source.into(), behavior: None }
    }
}

/// All assets of one project, looked up by name and kind.
#[derive(Default)]
pub struct AssetFolder {
    assets: Vec<Asset>,
}

impl AssetFolder {
    pub fn new() -> AssetFolder {
        AssetFolder::default()
    }

    /// Loads every recognized source file of a project directory. Binary
    /// assets (images, audio) are registered by name only; their decoding is
    /// the platform collaborator's job.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<AssetFolder> {
        let dir = dir.as_ref();
        let mut folder = AssetFolder::new();
        let entries = fs::read_dir(dir).with_context(|| format!("Reading {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            let (Some(stem), Some(ext)) = (path.file_stem(), path.extension()) else {
                continue;
            };
            let Some(kind) = AssetKind::from_extension(&ext.to_string_lossy()) else {
                continue;
            };
            let name = stem.to_string_lossy().to_string();
            let source = match kind {
                AssetKind::Behavior | AssetKind::Map => {
                    fs::read_to_string(&path).with_context(|| format!("Reading {}", path.display()))?
                }
                AssetKind::Image | AssetKind::Audio => String::new(),
            };
            folder.add(Asset::new(kind, name, source));
        }
        Ok(folder)
    }

    pub fn add(&mut self, asset: Asset) {
        // Re-adding a name replaces the previous asset of the same kind.
        self.assets.retain(|a| !(a.name == asset.name && a.kind == asset.kind));
        self.assets.push(asset);
    }

    pub fn get(&self, name: &str, kind: AssetKind) -> Option<&Asset> {
        self.assets.iter().find(|a| a.name == name && a.kind == kind)
    }

    pub fn get_mut(&mut self, name: &str, kind: AssetKind) -> Option<&mut Asset> {
        self.assets.iter_mut().find(|a| a.name == name && a.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.iter()
    }
}
