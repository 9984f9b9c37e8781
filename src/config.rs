#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_INPUT_SHEET: &str = "videos.csv";
pub const DEFAULT_VIDEO_DIR: &str = "vids";
pub const DEFAULT_UPLOAD_LEDGER: &str = "upload_ids.json";
pub const DEFAULT_PLAYLIST_LEDGER: &str = "playlist_ids.json";
pub const DEFAULT_CLIENT_SECRETS: &str = "client_secret.json";

/// Everything a single upload run needs to know about its surroundings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub input_sheet: PathBuf,
    pub output_sheet: PathBuf,
    pub video_dir: PathBuf,
    pub upload_ledger: PathBuf,
    pub playlist_ledger: PathBuf,
    pub client_secrets: PathBuf,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// `None` uploads the whole file in a single request.
    pub upload_chunk_size: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub env_path: Option<PathBuf>,
    pub client_secrets: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    build_settings_with_overrides(file_vars, env_lookup, SettingsOverrides::default())
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<Settings> {
    let path_or = |key: &str, default: &str| {
        lookup_value(key, file_vars, &env_lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(default))
    };

    let input_sheet = path_or("INPUT_SHEET", DEFAULT_INPUT_SHEET);
    let output_sheet = lookup_value("OUTPUT_SHEET", file_vars, &env_lookup)
        .map(PathBuf::from)
        .unwrap_or_else(|| default_output_sheet(&input_sheet));
    if output_sheet == input_sheet {
        bail!(
            "OUTPUT_SHEET must differ from INPUT_SHEET ({})",
            input_sheet.display()
        );
    }

    let client_secrets = overrides
        .client_secrets
        .unwrap_or_else(|| path_or("CLIENT_SECRETS_FILE", DEFAULT_CLIENT_SECRETS));

    let upload_chunk_size = lookup_value("UPLOAD_CHUNK_SIZE", file_vars, &env_lookup)
        .map(|value| {
            value
                .parse::<u64>()
                .with_context(|| format!("UPLOAD_CHUNK_SIZE is not a byte count: {value}"))
        })
        .transpose()?
        .filter(|size| *size > 0);

    Ok(Settings {
        input_sheet,
        output_sheet,
        video_dir: path_or("VIDEO_DIR", DEFAULT_VIDEO_DIR),
        upload_ledger: path_or("UPLOAD_LEDGER", DEFAULT_UPLOAD_LEDGER),
        playlist_ledger: path_or("PLAYLIST_LEDGER", DEFAULT_PLAYLIST_LEDGER),
        client_secrets,
        access_token: lookup_value("YOUTUBE_ACCESS_TOKEN", file_vars, &env_lookup),
        refresh_token: lookup_value("YOUTUBE_REFRESH_TOKEN", file_vars, &env_lookup),
        upload_chunk_size,
    })
}

/// `videos.csv` becomes `videos_with_ids.csv` in the same directory.
pub fn default_output_sheet(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "videos".to_string());
    let extension = input
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());
    input.with_file_name(format!("{stem}_with_ids.{extension}"))
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> Settings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_settings(&vars, |_| None).unwrap()
    }

    #[test]
    fn build_settings_uses_defaults() {
        let settings = settings_from("");
        assert_eq!(settings.input_sheet, PathBuf::from(DEFAULT_INPUT_SHEET));
        assert_eq!(settings.output_sheet, PathBuf::from("videos_with_ids.csv"));
        assert_eq!(settings.video_dir, PathBuf::from(DEFAULT_VIDEO_DIR));
        assert_eq!(settings.upload_ledger, PathBuf::from(DEFAULT_UPLOAD_LEDGER));
        assert_eq!(settings.playlist_ledger, PathBuf::from(DEFAULT_PLAYLIST_LEDGER));
        assert_eq!(settings.client_secrets, PathBuf::from(DEFAULT_CLIENT_SECRETS));
        assert!(settings.access_token.is_none());
        assert!(settings.refresh_token.is_none());
        assert!(settings.upload_chunk_size.is_none());
    }

    #[test]
    fn build_settings_reads_file_values() {
        let settings = settings_from(
            "INPUT_SHEET=\"/data/neuroai_videos.csv\"\nVIDEO_DIR=\"/data/vids\"\nUPLOAD_CHUNK_SIZE=\"1048576\"\nYOUTUBE_ACCESS_TOKEN='ya29.token'\n",
        );
        assert_eq!(
            settings.output_sheet,
            PathBuf::from("/data/neuroai_videos_with_ids.csv")
        );
        assert_eq!(settings.video_dir, PathBuf::from("/data/vids"));
        assert_eq!(settings.upload_chunk_size, Some(1_048_576));
        assert_eq!(settings.access_token.as_deref(), Some("ya29.token"));
    }

    #[test]
    fn build_settings_prefers_env_over_file() {
        let vars = read_env_file(make_config("VIDEO_DIR=\"/file\"\n").path()).unwrap();
        let settings = build_settings(&vars, |key| {
            if key == "VIDEO_DIR" {
                Some("/env".to_string())
            } else {
                None
            }
        })
        .unwrap();
        assert_eq!(settings.video_dir, PathBuf::from("/env"));
    }

    #[test]
    fn build_settings_override_precedence() {
        let mut vars = HashMap::new();
        vars.insert("CLIENT_SECRETS_FILE".to_string(), "/file.json".to_string());
        let settings = build_settings_with_overrides(
            &vars,
            |key| (key == "CLIENT_SECRETS_FILE").then(|| "/env.json".to_string()),
            SettingsOverrides {
                client_secrets: Some(PathBuf::from("/override.json")),
                env_path: None,
            },
        )
        .unwrap();
        assert_eq!(settings.client_secrets, PathBuf::from("/override.json"));
    }

    #[test]
    fn build_settings_rejects_output_equal_to_input() {
        let mut vars = HashMap::new();
        vars.insert("INPUT_SHEET".to_string(), "rows.csv".to_string());
        vars.insert("OUTPUT_SHEET".to_string(), "rows.csv".to_string());
        let err = build_settings(&vars, |_| None).unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn build_settings_rejects_bad_chunk_size() {
        let mut vars = HashMap::new();
        vars.insert("UPLOAD_CHUNK_SIZE".to_string(), "lots".to_string());
        assert!(build_settings(&vars, |_| None).is_err());
    }

    #[test]
    fn build_settings_ignores_blank_values() {
        let settings = settings_from("YOUTUBE_ACCESS_TOKEN=\"   \"\nVIDEO_DIR=\"\"\n");
        assert!(settings.access_token.is_none());
        assert_eq!(settings.video_dir, PathBuf::from(DEFAULT_VIDEO_DIR));
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export INPUT_SHEET="/sheets/in.csv"
            VIDEO_DIR='/vids'
            UPLOAD_LEDGER =  "ledger.json"
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("INPUT_SHEET").unwrap(), "/sheets/in.csv");
        assert_eq!(vars.get("VIDEO_DIR").unwrap(), "/vids");
        assert_eq!(vars.get("UPLOAD_LEDGER").unwrap(), "ledger.json");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn default_output_sheet_keeps_directory_and_extension() {
        assert_eq!(
            default_output_sheet(Path::new("/a/b/list.tsv")),
            PathBuf::from("/a/b/list_with_ids.tsv")
        );
    }
}
