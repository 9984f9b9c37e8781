//! Decides, row by row, what still has to happen on the platform.
//!
//! The ledgers are consulted first and trusted whenever they have an answer;
//! the platform is only asked when they are silent. A row's ledger entries
//! and output fields are written only once both its video and its playlist
//! have been resolved, so a row that fails halfway leaves no trace.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::ledger::{Ledgers, PlaylistRecord};
use crate::sheet::Row;
use crate::youtube::{NewPlaylist, VideoService, VideoUpload};

/// Why a row was passed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoVideoFile,
    MissingFile(PathBuf),
}

/// Where a row's video id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoSource {
    /// Upload ledger hit.
    Ledger,
    /// Found on the channel by title.
    Existing,
    Uploaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistMembership {
    /// Row names no playlist.
    NotRequested,
    /// Ledger already lists the video.
    AlreadyRecorded,
    /// Platform already had the video in a playlist that was new to the ledger.
    AlreadyPresent,
    Added,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Skipped(SkipReason),
    Resolved {
        video_id: String,
        video: VideoSource,
        playlist_id: Option<String>,
        membership: PlaylistMembership,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub rows: usize,
    pub skipped: usize,
    pub from_ledger: usize,
    pub existing: usize,
    pub uploaded: usize,
    pub playlist_adds: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &RowOutcome) {
        self.rows += 1;
        match outcome {
            RowOutcome::Skipped(_) => self.skipped += 1,
            RowOutcome::Resolved {
                video, membership, ..
            } => {
                match video {
                    VideoSource::Ledger => self.from_ledger += 1,
                    VideoSource::Existing => self.existing += 1,
                    VideoSource::Uploaded => self.uploaded += 1,
                }
                if *membership == PlaylistMembership::Added {
                    self.playlist_adds += 1;
                }
            }
        }
    }
}

pub struct Reconciler<'a, S: VideoService + ?Sized> {
    service: &'a mut S,
    ledgers: &'a mut Ledgers,
    video_dir: PathBuf,
}

impl<'a, S: VideoService + ?Sized> Reconciler<'a, S> {
    pub fn new(service: &'a mut S, ledgers: &'a mut Ledgers, video_dir: impl Into<PathBuf>) -> Self {
        Self {
            service,
            ledgers,
            video_dir: video_dir.into(),
        }
    }

    /// Processes rows in order, stopping at the first fatal error. Rows handled
    /// before the failure keep their updates.
    pub fn run(&mut self, rows: &mut [Row]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for row in rows.iter_mut() {
            let outcome = self
                .process_row(row)
                .with_context(|| format!("processing sheet row {} ({})", row.index + 1, row.title))?;
            summary.record(&outcome);
        }
        Ok(summary)
    }

    pub fn process_row(&mut self, row: &mut Row) -> Result<RowOutcome> {
        let Some(file_name) = row.video_file.as_deref() else {
            info!("Row {} has no video file, skipping", row.index + 1);
            return Ok(RowOutcome::Skipped(SkipReason::NoVideoFile));
        };
        let video_path = self.video_dir.join(file_name);

        info!("Uploading video: {}", row.title);
        if !video_path.exists() {
            warn!("The file '{}' does not exist.", video_path.display());
            return Ok(RowOutcome::Skipped(SkipReason::MissingFile(video_path)));
        }

        let (video_id, video) = self.resolve_video(row, &video_path)?;
        let (playlist_id, membership) = self.resolve_playlist(row, &video_id)?;

        if video != VideoSource::Ledger {
            self.ledgers.uploads.record(row.title.clone(), video_id.clone());
        }
        row.video_id = Some(video_id.clone());
        if playlist_id.is_some() {
            row.playlist_id = playlist_id.clone();
        }

        Ok(RowOutcome::Resolved {
            video_id,
            video,
            playlist_id,
            membership,
        })
    }

    fn resolve_video(&mut self, row: &Row, video_path: &Path) -> Result<(String, VideoSource)> {
        if let Some(video_id) = self.ledgers.uploads.get(&row.title) {
            info!("Video {} already uploaded with id: {video_id}", row.title);
            return Ok((video_id.to_string(), VideoSource::Ledger));
        }

        if let Some(video_id) = self
            .service
            .search_by_exact_title(&row.title)
            .with_context(|| format!("searching for an existing video titled {:?}", row.title))?
        {
            info!("Video already exists with ID: {video_id}");
            return Ok((video_id, VideoSource::Existing));
        }

        let video_id = self
            .service
            .upload(&VideoUpload {
                file: video_path,
                title: &row.title,
                description: &row.description,
                category_id: &row.category_id,
                keywords: &row.keywords,
                privacy_status: &row.privacy_status,
            })
            .with_context(|| format!("uploading {}", video_path.display()))?;
        info!("Uploaded new video with ID: {video_id}");
        Ok((video_id, VideoSource::Uploaded))
    }

    fn resolve_playlist(
        &mut self,
        row: &Row,
        video_id: &str,
    ) -> Result<(Option<String>, PlaylistMembership)> {
        let target = &row.playlist;
        if target.name.is_empty() {
            return Ok((None, PlaylistMembership::NotRequested));
        }

        if let Some(record) = self.ledgers.playlists.get(&target.name) {
            let playlist_id = record.id.clone();
            info!(
                "Playlist {} already exists with id {playlist_id}",
                target.name
            );
            if record.contains(video_id) {
                info!("Video {} already in playlist {}", row.title, target.name);
                return Ok((Some(playlist_id), PlaylistMembership::AlreadyRecorded));
            }
            self.service
                .add_video_to_playlist(&playlist_id, video_id)
                .with_context(|| format!("adding {video_id} to playlist {playlist_id}"))?;
            info!("Video {video_id} has been added to the playlist {playlist_id}.");
            if let Some(record) = self.ledgers.playlists.get_mut(&target.name) {
                record.add_member(video_id);
            }
            return Ok((Some(playlist_id), PlaylistMembership::Added));
        }

        let playlist_id = self
            .service
            .get_or_create_playlist(&NewPlaylist {
                title: &target.name,
                description: &target.description,
                privacy_status: &target.privacy_status,
            })
            .with_context(|| format!("looking up playlist {:?}", target.name))?;

        let membership = if self
            .service
            .is_video_in_playlist(&playlist_id, video_id)
            .with_context(|| format!("listing members of playlist {playlist_id}"))?
        {
            info!("Video {video_id} is already in the playlist.");
            PlaylistMembership::AlreadyPresent
        } else {
            self.service
                .add_video_to_playlist(&playlist_id, video_id)
                .with_context(|| format!("adding {video_id} to playlist {playlist_id}"))?;
            info!("Video {video_id} has been added to the playlist {playlist_id}.");
            PlaylistMembership::Added
        };

        self.ledgers.playlists.insert_new(
            target.name.clone(),
            PlaylistRecord::new(playlist_id.clone(), video_id),
        );
        Ok((Some(playlist_id), membership))
    }
}
