#![forbid(unsafe_code)]

//! Uploads every video listed in the input sheet that the channel does not
//! have yet, files each one into its playlist, and writes the assigned ids to
//! the output sheet.
//!
//! Re-running is safe: the upload and playlist ledgers remember what earlier
//! runs did, and the channel itself is searched before anything is uploaded.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use newtube_uploader::auth::resolve_credentials;
use newtube_uploader::config::{Settings, SettingsOverrides, resolve_settings};
use newtube_uploader::ledger::{LedgerPaths, Ledgers};
use newtube_uploader::reconcile::{Reconciler, RunSummary};
use newtube_uploader::sheet::{Row, Sheet};
use newtube_uploader::youtube::{YouTubeClient, build_agent};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "upload_videos", about = "Upload a sheet of videos to YouTube")]
struct UploaderArgs {
    /// Env file holding the run settings.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Google OAuth client secrets used to refresh the access token.
    #[arg(long, value_name = "PATH")]
    client_secrets: Option<PathBuf>,
}

impl UploaderArgs {
    fn overrides(self) -> SettingsOverrides {
        SettingsOverrides {
            env_path: self.env_file,
            client_secrets: self.client_secrets,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("newtube_uploader=info,upload_videos=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    init_tracing();
    let settings = resolve_settings(UploaderArgs::parse().overrides())?;

    info!("Input sheet: {}", settings.input_sheet.display());
    info!("Output sheet: {}", settings.output_sheet.display());
    info!("Video directory: {}", settings.video_dir.display());

    let agent = build_agent();
    let credentials = resolve_credentials(&agent, &settings)?;
    credentials
        .bearer()
        .context("obtaining a YouTube access token")?;
    let mut client = YouTubeClient::with_agent(agent, credentials, settings.upload_chunk_size);

    run(&settings, &mut client)
}

fn run(settings: &Settings, client: &mut YouTubeClient) -> Result<()> {
    let mut sheet = Sheet::read(&settings.input_sheet)?;
    let mut rows = sheet.rows()?;
    if sheet.is_empty() {
        warn!("{} has no rows", settings.input_sheet.display());
    } else {
        info!("Loaded {} row(s)", sheet.len());
    }

    let ledger_paths = LedgerPaths {
        uploads: settings.upload_ledger.clone(),
        playlists: settings.playlist_ledger.clone(),
    };
    let mut ledgers = Ledgers::load(&ledger_paths)?;

    let outcome = Reconciler::new(client, &mut ledgers, &settings.video_dir).run(&mut rows);
    if let Err(err) = &outcome {
        error!("Stopping early: {err:#}");
        info!("Saving progress from the rows completed so far");
    }

    let saved = save_progress(&mut sheet, &rows, settings, &ledgers, &ledger_paths);
    let summary = combine_outcomes(outcome, saved)?;
    info!(
        rows = summary.rows,
        skipped = summary.skipped,
        from_ledger = summary.from_ledger,
        existing = summary.existing,
        uploaded = summary.uploaded,
        playlist_adds = summary.playlist_adds,
        "All rows processed."
    );
    Ok(())
}

fn save_progress(
    sheet: &mut Sheet,
    rows: &[Row],
    settings: &Settings,
    ledgers: &Ledgers,
    ledger_paths: &LedgerPaths,
) -> Result<()> {
    for row in rows {
        sheet.apply(row);
    }
    sheet
        .write(&settings.output_sheet)
        .context("writing the output sheet")?;
    ledgers
        .flush(ledger_paths)
        .context("saving the upload and playlist ledgers")?;
    Ok(())
}

/// A failed save is reported with the error that stopped the run attached,
/// so neither cause is lost.
fn combine_outcomes(outcome: Result<RunSummary>, saved: Result<()>) -> Result<RunSummary> {
    match (outcome, saved) {
        (outcome, Ok(())) => outcome,
        (Ok(_), Err(save_err)) => Err(save_err),
        (Err(run_err), Err(save_err)) => {
            Err(save_err.context(format!("the run had already stopped: {run_err:#}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uploader_args_default_to_none() {
        let args = UploaderArgs::try_parse_from(["upload_videos"]).unwrap();
        assert!(args.env_file.is_none());
        assert!(args.client_secrets.is_none());
    }

    #[test]
    fn uploader_args_accept_file_locations() {
        let overrides = UploaderArgs::try_parse_from([
            "upload_videos",
            "--env-file",
            "/etc/newtube/uploader.env",
            "--client-secrets",
            "/etc/newtube/client_secret.json",
        ])
        .unwrap()
        .overrides();
        assert_eq!(
            overrides.env_path,
            Some(PathBuf::from("/etc/newtube/uploader.env"))
        );
        assert_eq!(
            overrides.client_secrets,
            Some(PathBuf::from("/etc/newtube/client_secret.json"))
        );
    }

    #[test]
    fn uploader_args_reject_other_flags() {
        assert!(UploaderArgs::try_parse_from(["upload_videos", "--parallel"]).is_err());
    }

    #[test]
    fn failed_save_keeps_the_error_that_stopped_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut sheet = Sheet::from_reader("video_file,title
a.mp4,A
".as_bytes()).unwrap();
        let rows = sheet.rows().unwrap();
        let settings = Settings {
            input_sheet: dir.path().join("videos.csv"),
            output_sheet: dir.path().join("missing").join("out.csv"),
            video_dir: dir.path().to_path_buf(),
            upload_ledger: dir.path().join("upload_ids.json"),
            playlist_ledger: dir.path().join("playlist_ids.json"),
            client_secrets: dir.path().join("client_secret.json"),
            access_token: None,
            refresh_token: None,
            upload_chunk_size: None,
        };
        let ledger_paths = LedgerPaths {
            uploads: settings.upload_ledger.clone(),
            playlists: settings.playlist_ledger.clone(),
        };

        let saved = save_progress(
            &mut sheet,
            &rows,
            &settings,
            &Ledgers::default(),
            &ledger_paths,
        );
        let outcome = Err(anyhow::anyhow!("YouTube API returned HTTP 403: quotaExceeded"));
        let err = combine_outcomes(outcome, saved).unwrap_err();

        let chain = format!("{err:#}");
        assert!(chain.contains("quotaExceeded"), "{chain}");
        assert!(chain.contains("writing the output sheet"), "{chain}");
    }

    #[test]
    fn run_error_is_returned_when_saving_succeeds() {
        let err = combine_outcomes(Err(anyhow::anyhow!("row 3 failed")), Ok(())).unwrap_err();
        assert_eq!(err.to_string(), "row 3 failed");
    }

    #[test]
    fn save_error_is_returned_after_a_clean_run() {
        let err =
            combine_outcomes(Ok(RunSummary::default()), Err(anyhow::anyhow!("disk full")))
                .unwrap_err();
        assert_eq!(err.to_string(), "disk full");
    }
}
