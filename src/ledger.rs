//! JSON ledgers that remember what earlier runs already did.
//!
//! Both files are flat objects keyed by a human readable name. They are read
//! once when a run starts and rewritten in full when it ends.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Video title to the id the platform assigned when it was uploaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadLedger(BTreeMap<String, String>);

impl UploadLedger {
    pub fn get(&self, title: &str) -> Option<&str> {
        self.0.get(title).map(String::as_str)
    }

    pub fn record(&mut self, title: impl Into<String>, video_id: impl Into<String>) {
        self.0.insert(title.into(), video_id.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What is known about one playlist. `vid_ids` is treated as a set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistRecord {
    pub id: String,
    #[serde(default)]
    pub vid_ids: Vec<String>,
}

impl PlaylistRecord {
    pub fn new(id: impl Into<String>, first_member: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vid_ids: vec![first_member.into()],
        }
    }

    pub fn contains(&self, video_id: &str) -> bool {
        self.vid_ids.iter().any(|id| id == video_id)
    }

    pub fn add_member(&mut self, video_id: impl Into<String>) {
        let video_id = video_id.into();
        if !self.contains(&video_id) {
            self.vid_ids.push(video_id);
        }
    }
}

/// Playlist name to the playlist created (or found) for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaylistLedger(BTreeMap<String, PlaylistRecord>);

impl PlaylistLedger {
    pub fn get(&self, name: &str) -> Option<&PlaylistRecord> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PlaylistRecord> {
        self.0.get_mut(name)
    }

    /// A name keeps the first playlist id it was bound to.
    pub fn insert_new(&mut self, name: impl Into<String>, record: PlaylistRecord) {
        self.0.entry(name.into()).or_insert(record);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct LedgerPaths {
    pub uploads: PathBuf,
    pub playlists: PathBuf,
}

/// Both ledgers, owned by whoever drives a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledgers {
    pub uploads: UploadLedger,
    pub playlists: PlaylistLedger,
}

impl Ledgers {
    pub fn load(paths: &LedgerPaths) -> Result<Self> {
        let ledgers = Self {
            uploads: load_or_create(&paths.uploads)?,
            playlists: load_or_create(&paths.playlists)?,
        };
        info!(
            "Ledgers know {} uploaded video(s) and {} playlist(s)",
            ledgers.uploads.len(),
            ledgers.playlists.len()
        );
        Ok(ledgers)
    }

    pub fn flush(&self, paths: &LedgerPaths) -> Result<()> {
        flush(&paths.uploads, &self.uploads)?;
        flush(&paths.playlists, &self.playlists)?;
        Ok(())
    }
}

/// Reads a ledger, creating it as `{}` when the file does not exist yet.
///
/// Empty or unparsable files are treated as an empty ledger; losing the cache
/// only costs extra remote lookups, never a failed run.
pub fn load_or_create<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(b"{}")
                .with_context(|| format!("initializing ledger {}", path.display()))?;
            info!("Created empty ledger {}", path.display());
            return Ok(T::default());
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            info!("The file '{}' already exists. Loading file", path.display());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("creating ledger {}", path.display()));
        }
    }

    let raw =
        fs::read_to_string(path).with_context(|| format!("reading ledger {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    match serde_json::from_str(&raw) {
        Ok(ledger) => Ok(ledger),
        Err(err) => {
            warn!(
                "Ignoring unreadable ledger {}: {err}; starting from an empty one",
                path.display()
            );
            Ok(T::default())
        }
    }
}

/// Replaces the ledger on disk with `ledger`.
pub fn flush<T: Serialize>(path: &Path, ledger: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("staging ledger next to {}", path.display()))?;
    serde_json::to_writer(&mut tmp, ledger)
        .with_context(|| format!("serializing ledger {}", path.display()))?;
    tmp.flush()?;
    tmp.persist(path)
        .with_context(|| format!("writing ledger {}", path.display()))?;
    Ok(())
}
