//! Spreadsheet rows describing the videos to upload.
//!
//! The sheet is kept as raw records so that columns this tool does not know
//! about survive the round trip to the output file untouched.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use tracing::warn;

pub const VIDEO_FILE: &str = "video_file";
pub const TITLE: &str = "title";
pub const DESCRIPTION: &str = "description";
pub const CATEGORY_ID: &str = "category_id";
pub const KEYWORDS: &str = "keywords";
pub const PRIVACY_STATUS: &str = "privacy_status";
pub const PLAYLIST_NAME: &str = "playlist_name";
pub const PLAYLIST_DESCRIPTION: &str = "playlist_description";
pub const PLAYLIST_PRIVACY_STATUS: &str = "playlist_privacy_status";
pub const VIDEO_ID: &str = "video_id";
pub const PLAYLIST_ID: &str = "playlist_id";

/// Playlist a row's video should end up in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistTarget {
    pub name: String,
    pub description: String,
    pub privacy_status: String,
}

/// One video described by the sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    /// Position of the record in the sheet, header excluded.
    pub index: usize,
    /// `None` when the cell is blank or holds a spreadsheet NaN.
    pub video_file: Option<String>,
    pub title: String,
    pub description: String,
    pub category_id: String,
    pub keywords: Vec<String>,
    pub privacy_status: String,
    pub playlist: PlaylistTarget,
    pub video_id: Option<String>,
    pub playlist_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Sheet {
    headers: Vec<String>,
    records: Vec<Vec<String>>,
}

impl Sheet {
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("reading {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new().flexible(true).from_reader(reader);
        let mut headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();
        for required in [VIDEO_FILE, TITLE] {
            if !headers.iter().any(|header| header == required) {
                bail!("sheet has no `{required}` column");
            }
        }
        let named = headers.len();
        for output in [VIDEO_ID, PLAYLIST_ID] {
            if !headers.iter().any(|header| header == output) {
                headers.push(output.to_string());
            }
        }

        let mut records = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let record: StringRecord = record?;
            let mut values: Vec<String> = record.iter().map(str::to_string).collect();
            // Cells past the header row are carried to the end of the output
            // record so the appended id columns never overwrite them.
            let extra = values.split_off(values.len().min(named));
            if !extra.is_empty() {
                warn!(
                    "Sheet row {} has {} cell(s) beyond the header; keeping them",
                    index + 1,
                    extra.len()
                );
            }
            values.resize(headers.len(), String::new());
            values.extend(extra);
            records.push(values);
        }
        Ok(Self { headers, records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn rows(&self) -> Result<Vec<Row>> {
        (0..self.records.len())
            .map(|index| {
                self.row(index)
                    .with_context(|| format!("parsing sheet row {}", index + 1))
            })
            .collect()
    }

    fn row(&self, index: usize) -> Result<Row> {
        let cell = |column: &str| self.cell(index, column).unwrap_or_default();
        Ok(Row {
            index,
            video_file: usable(cell(VIDEO_FILE)),
            title: cell(TITLE).to_string(),
            description: cell(DESCRIPTION).to_string(),
            category_id: coerce_identifier(cell(CATEGORY_ID))?,
            keywords: split_keywords(cell(KEYWORDS)),
            privacy_status: cell(PRIVACY_STATUS).trim().to_string(),
            playlist: PlaylistTarget {
                name: usable(cell(PLAYLIST_NAME)).unwrap_or_default(),
                description: cell(PLAYLIST_DESCRIPTION).to_string(),
                privacy_status: cell(PLAYLIST_PRIVACY_STATUS).trim().to_string(),
            },
            video_id: usable(cell(VIDEO_ID)),
            playlist_id: usable(cell(PLAYLIST_ID)),
        })
    }

    /// Copies the row's output fields back into its record.
    pub fn apply(&mut self, row: &Row) {
        let video_id = row.video_id.clone().unwrap_or_default();
        let playlist_id = row.playlist_id.clone().unwrap_or_default();
        self.set_cell(row.index, VIDEO_ID, video_id);
        self.set_cell(row.index, PLAYLIST_ID, playlist_id);
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        self.to_writer(file)
            .with_context(|| format!("writing {}", path.display()))
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = WriterBuilder::new().flexible(true).from_writer(writer);
        writer.write_record(&self.headers)?;
        for record in &self.records {
            writer.write_record(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    fn cell(&self, index: usize, column: &str) -> Option<&str> {
        let column = self.column(column)?;
        self.records
            .get(index)
            .and_then(|record| record.get(column))
            .map(String::as_str)
    }

    fn set_cell(&mut self, index: usize, column: &str, value: String) {
        if let Some(column) = self.column(column)
            && let Some(slot) = self
                .records
                .get_mut(index)
                .and_then(|record| record.get_mut(column))
        {
            *slot = value;
        }
    }
}

/// Blank cells and the `nan` a spreadsheet export leaves behind count as empty.
fn usable(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Spreadsheets hand identifiers back as floats (`22.0`); the API wants `22`.
pub fn coerce_identifier(value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if let Ok(integer) = trimmed.parse::<i64>() {
        return Ok(integer.to_string());
    }
    let float: f64 = trimmed
        .parse()
        .map_err(|_| anyhow!("`{trimmed}` is not a numeric identifier"))?;
    let whole = float.trunc();
    // `i64::MAX as f64` rounds up to 2^63, so the upper bound is exclusive.
    if !whole.is_finite() || whole < i64::MIN as f64 || whole >= i64::MAX as f64 {
        bail!("`{trimmed}` is not a numeric identifier");
    }
    Ok((whole as i64).to_string())
}

pub fn split_keywords(value: &str) -> Vec<String> {
    if value.trim().is_empty() {
        return Vec::new();
    }
    value
        .split(',')
        .map(|keyword| keyword.trim().to_string())
        .collect()
}
