//! YouTube Data API v3 access.
//!
//! [`VideoService`] is everything the reconciliation workflow is allowed to do
//! against the platform. [`YouTubeClient`] implements it over plain HTTPS with
//! `ureq`; tests substitute a recording fake.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use ureq::{Agent, AgentBuilder, Response};

use crate::auth::Credentials;
use crate::error::ApiError;
use crate::paging::{Page, Pages};
use crate::upload::{ChunkProgress, UploadSession, drive_upload};

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
const LIST_PAGE_SIZE: &str = "50";
const SEARCH_RESULTS: &str = "25";
/// Resumable upload chunks must be multiples of this, except the last one.
pub const CHUNK_GRANULARITY: u64 = 256 * 1024;

/// Metadata for a new video.
#[derive(Debug, Clone, Copy)]
pub struct VideoUpload<'a> {
    pub file: &'a Path,
    pub title: &'a str,
    pub description: &'a str,
    pub category_id: &'a str,
    pub keywords: &'a [String],
    pub privacy_status: &'a str,
}

/// Metadata for a new playlist.
#[derive(Debug, Clone, Copy)]
pub struct NewPlaylist<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub privacy_status: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistSummary {
    pub id: String,
    pub title: String,
}

pub type ItemIter<'a, T> = Box<dyn Iterator<Item = Result<T, ApiError>> + 'a>;

/// What the uploader needs from the video platform.
pub trait VideoService {
    /// First video on the authenticated channel whose title matches `title`
    /// ignoring case and surrounding whitespace.
    fn search_by_exact_title(&mut self, title: &str) -> Result<Option<String>, ApiError>;

    /// Uploads a video and returns the id the platform assigned to it.
    fn upload(&mut self, video: &VideoUpload<'_>) -> Result<String, ApiError>;

    fn create_playlist(&mut self, playlist: &NewPlaylist<'_>) -> Result<String, ApiError>;

    /// Every playlist owned by the authenticated channel.
    fn list_own_playlists(&mut self) -> ItemIter<'_, PlaylistSummary>;

    fn list_playlist_member_video_ids(&mut self, playlist_id: &str) -> ItemIter<'_, String>;

    fn add_video_to_playlist(&mut self, playlist_id: &str, video_id: &str)
    -> Result<(), ApiError>;

    /// Id of the first own playlist titled exactly `playlist.title`, creating
    /// one when none exists.
    fn get_or_create_playlist(&mut self, playlist: &NewPlaylist<'_>) -> Result<String, ApiError> {
        let mut existing = None;
        for summary in self.list_own_playlists() {
            let summary = summary?;
            if summary.title == playlist.title {
                existing = Some(summary.id);
                break;
            }
        }
        match existing {
            Some(id) => Ok(id),
            None => self.create_playlist(playlist),
        }
    }

    fn is_video_in_playlist(&mut self, playlist_id: &str, video_id: &str) -> Result<bool, ApiError> {
        for member in self.list_playlist_member_video_ids(playlist_id) {
            if member? == video_id {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Case-insensitive comparison ignoring surrounding whitespace.
pub fn titles_match(candidate: &str, wanted: &str) -> bool {
    candidate.trim().to_lowercase() == wanted.trim().to_lowercase()
}

/// The search endpoint returns snippet titles HTML-escaped.
pub fn unescape_html(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Rounds a requested chunk size up to what the upload endpoint accepts.
pub fn normalize_chunk_size(requested: u64) -> u64 {
    requested.div_ceil(CHUNK_GRANULARITY).max(1) * CHUNK_GRANULARITY
}

/// Parses the `Range: bytes=0-N` header of a 308 reply into the next offset.
fn next_offset(range: Option<&str>) -> Result<u64, ApiError> {
    let Some(range) = range else {
        return Ok(0);
    };
    range
        .trim()
        .strip_prefix("bytes=")
        .and_then(|span| span.split_once('-'))
        .and_then(|(_, last)| last.trim().parse::<u64>().ok())
        .map(|last| last + 1)
        .ok_or_else(|| ApiError::Decode(format!("unparsable Range header `{range}`")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchListResponse {
    #[serde(default)]
    items: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: SearchResultId,
    snippet: TitleSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TitleSnippet {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistListResponse {
    #[serde(default)]
    items: Vec<PlaylistResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistResource {
    id: String,
    snippet: TitleSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemListResponse {
    #[serde(default)]
    items: Vec<PlaylistItemResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemResource {
    snippet: PlaylistItemSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemSnippet {
    resource_id: ResourceId,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    #[serde(default)]
    kind: String,
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedResource {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoBody<'a> {
    snippet: VideoSnippet<'a>,
    status: PrivacyStatus<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet<'a> {
    title: &'a str,
    description: &'a str,
    tags: &'a [String],
    category_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrivacyStatus<'a> {
    privacy_status: &'a str,
}

#[derive(Debug, Serialize)]
struct PlaylistBody<'a> {
    snippet: PlaylistSnippet<'a>,
    status: PrivacyStatus<'a>,
}

#[derive(Debug, Serialize)]
struct PlaylistSnippet<'a> {
    title: &'a str,
    description: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemBody<'a> {
    snippet: NewPlaylistItem<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewPlaylistItem<'a> {
    playlist_id: &'a str,
    resource_id: ResourceId,
}

fn decode<T: serde::de::DeserializeOwned>(response: Response, what: &str) -> Result<T, ApiError> {
    response
        .into_json()
        .map_err(|err| ApiError::Decode(format!("{what}: {err}")))
}

/// HTTP client acting on behalf of one OAuth grant.
pub struct YouTubeClient {
    agent: Agent,
    credentials: Credentials,
    chunk_size: Option<u64>,
    sleep: fn(Duration),
}

impl YouTubeClient {
    pub fn new(credentials: Credentials, chunk_size: Option<u64>) -> Self {
        Self::with_agent(build_agent(), credentials, chunk_size)
    }

    pub fn with_agent(agent: Agent, credentials: Credentials, chunk_size: Option<u64>) -> Self {
        Self {
            agent,
            credentials,
            chunk_size: chunk_size.map(normalize_chunk_size),
            sleep: std::thread::sleep,
        }
    }

    fn get(&self, resource: &str, query: &[(&str, &str)]) -> Result<Response, ApiError> {
        let url = format!("{API_BASE}/{resource}");
        debug!(%url, ?query, "GET");
        let mut request = self
            .agent
            .get(&url)
            .set("Authorization", &self.credentials.bearer()?);
        for (key, value) in query {
            request = request.query(key, value);
        }
        Ok(request.call()?)
    }

    fn post(&self, resource: &str, part: &str, body: &impl Serialize) -> Result<Response, ApiError> {
        let url = format!("{API_BASE}/{resource}");
        debug!(%url, part, "POST");
        Ok(self
            .agent
            .post(&url)
            .set("Authorization", &self.credentials.bearer()?)
            .query("part", part)
            .send_json(body)?)
    }

    fn playlists_page(&self, page_token: Option<&str>) -> Result<Page<PlaylistSummary>, ApiError> {
        let mut query = vec![
            ("part", "snippet"),
            ("mine", "true"),
            ("maxResults", LIST_PAGE_SIZE),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let response: PlaylistListResponse = decode(self.get("playlists", &query)?, "playlists.list")?;
        let items = response
            .items
            .into_iter()
            .map(|playlist| PlaylistSummary {
                id: playlist.id,
                title: playlist.snippet.title,
            })
            .collect();
        Ok((items, response.next_page_token))
    }

    fn playlist_items_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
    ) -> Result<Page<String>, ApiError> {
        let mut query = vec![
            ("part", "snippet"),
            ("playlistId", playlist_id),
            ("maxResults", LIST_PAGE_SIZE),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let response: PlaylistItemListResponse =
            decode(self.get("playlistItems", &query)?, "playlistItems.list")?;
        let items = response
            .items
            .into_iter()
            .filter_map(|item| item.snippet.resource_id.video_id)
            .collect();
        Ok((items, response.next_page_token))
    }
}

/// Agent shared by every request. Redirects stay off so the upload endpoint's
/// `308 Resume Incomplete` reaches [`ResumableUpload`] instead of being followed.
pub fn build_agent() -> Agent {
    AgentBuilder::new()
        .redirects(0)
        .timeout_connect(Duration::from_secs(30))
        .timeout_read(Duration::from_secs(300))
        .timeout_write(Duration::from_secs(300))
        .build()
}

impl VideoService for YouTubeClient {
    fn search_by_exact_title(&mut self, title: &str) -> Result<Option<String>, ApiError> {
        let response: SearchListResponse = decode(
            self.get(
                "search",
                &[
                    ("part", "id,snippet"),
                    ("q", title),
                    ("type", "video"),
                    ("forMine", "true"),
                    ("maxResults", SEARCH_RESULTS),
                ],
            )?,
            "search.list",
        )?;
        Ok(response.items.into_iter().find_map(|item| {
            if titles_match(&unescape_html(&item.snippet.title), title) {
                item.id.video_id
            } else {
                None
            }
        }))
    }

    fn upload(&mut self, video: &VideoUpload<'_>) -> Result<String, ApiError> {
        let metadata = serde_json::to_value(VideoBody {
            snippet: VideoSnippet {
                title: video.title,
                description: video.description,
                tags: video.keywords,
                category_id: video.category_id,
            },
            status: PrivacyStatus {
                privacy_status: video.privacy_status,
            },
        })
        .map_err(|err| ApiError::Decode(err.to_string()))?;
        let mut session = ResumableUpload::new(
            &self.agent,
            &self.credentials,
            video.file,
            metadata,
            self.chunk_size,
        )?;
        let sleep = self.sleep;
        drive_upload(&mut session, &mut |delay| sleep(delay))
    }

    fn create_playlist(&mut self, playlist: &NewPlaylist<'_>) -> Result<String, ApiError> {
        let body = PlaylistBody {
            snippet: PlaylistSnippet {
                title: playlist.title,
                description: playlist.description,
            },
            status: PrivacyStatus {
                privacy_status: playlist.privacy_status,
            },
        };
        let created: CreatedResource =
            decode(self.post("playlists", "snippet,status", &body)?, "playlists.insert")?;
        Ok(created.id)
    }

    fn list_own_playlists(&mut self) -> ItemIter<'_, PlaylistSummary> {
        let client = &*self;
        Box::new(Pages::new(move |token: Option<&str>| client.playlists_page(token)))
    }

    fn list_playlist_member_video_ids(&mut self, playlist_id: &str) -> ItemIter<'_, String> {
        let client = &*self;
        let playlist_id = playlist_id.to_string();
        Box::new(Pages::new(move |token: Option<&str>| {
            client.playlist_items_page(&playlist_id, token)
        }))
    }

    fn add_video_to_playlist(
        &mut self,
        playlist_id: &str,
        video_id: &str,
    ) -> Result<(), ApiError> {
        let body = PlaylistItemBody {
            snippet: NewPlaylistItem {
                playlist_id,
                resource_id: ResourceId {
                    kind: "youtube#video".to_string(),
                    video_id: Some(video_id.to_string()),
                },
            },
        };
        self.post("playlistItems", "snippet", &body)?;
        Ok(())
    }
}

/// One resumable upload session against the videos.insert endpoint.
///
/// The session URI is requested lazily by the first chunk so that a server
/// error while opening the session is retried like any other chunk.
pub struct ResumableUpload<'a> {
    agent: &'a Agent,
    credentials: &'a Credentials,
    path: PathBuf,
    metadata: Value,
    content_type: String,
    total: u64,
    chunk_size: u64,
    session_uri: Option<String>,
    offset: u64,
    resync: bool,
}

impl<'a> ResumableUpload<'a> {
    pub fn new(
        agent: &'a Agent,
        credentials: &'a Credentials,
        path: &Path,
        metadata: Value,
        chunk_size: Option<u64>,
    ) -> Result<Self, ApiError> {
        let total = std::fs::metadata(path)
            .map_err(|err| ApiError::io(path, err))?
            .len();
        let content_type = mime_guess::from_path(path)
            .first_raw()
            .filter(|mime| mime.starts_with("video/"))
            .unwrap_or("application/octet-stream")
            .to_string();
        Ok(Self {
            agent,
            credentials,
            path: path.to_path_buf(),
            metadata,
            content_type,
            total,
            chunk_size: chunk_size.unwrap_or(total).max(1),
            session_uri: None,
            offset: 0,
            resync: false,
        })
    }

    fn session_uri(&mut self) -> Result<String, ApiError> {
        if let Some(uri) = &self.session_uri {
            return Ok(uri.clone());
        }
        let response = self
            .agent
            .post(UPLOAD_URL)
            .set("Authorization", &self.credentials.bearer()?)
            .set("X-Upload-Content-Length", &self.total.to_string())
            .set("X-Upload-Content-Type", &self.content_type)
            .query("uploadType", "resumable")
            .query("part", "snippet,status")
            .send_json(&self.metadata)?;
        let uri = response
            .header("Location")
            .map(str::to_string)
            .ok_or_else(|| {
                ApiError::Decode("upload session response has no Location header".into())
            })?;
        debug!(%uri, "opened upload session");
        self.session_uri = Some(uri.clone());
        Ok(uri)
    }

    /// Asks the server how much of the file it already holds.
    fn query_status(&mut self, uri: &str) -> Result<Option<ChunkProgress>, ApiError> {
        let response = self
            .agent
            .put(uri)
            .set("Authorization", &self.credentials.bearer()?)
            .set("Content-Range", &format!("bytes */{}", self.total))
            .send_bytes(&[])?;
        self.absorb(response).map(|progress| match progress {
            complete @ ChunkProgress::Complete(_) => Some(complete),
            ChunkProgress::InProgress { .. } => None,
        })
    }

    fn send_chunk(&mut self, uri: &str) -> Result<ChunkProgress, ApiError> {
        let len = self.total.saturating_sub(self.offset).min(self.chunk_size);
        let mut file = File::open(&self.path).map_err(|err| ApiError::io(&self.path, err))?;
        file.seek(SeekFrom::Start(self.offset))
            .map_err(|err| ApiError::io(&self.path, err))?;
        let range = if len == 0 {
            format!("bytes */{}", self.total)
        } else {
            format!(
                "bytes {}-{}/{}",
                self.offset,
                self.offset + len - 1,
                self.total
            )
        };
        let response = self
            .agent
            .put(uri)
            .set("Authorization", &self.credentials.bearer()?)
            .set("Content-Type", &self.content_type)
            .set("Content-Length", &len.to_string())
            .set("Content-Range", &range)
            .send(file.take(len))?;
        self.absorb(response)
    }

    fn absorb(&mut self, response: Response) -> Result<ChunkProgress, ApiError> {
        match response.status() {
            200 | 201 => Ok(ChunkProgress::Complete(decode(response, "videos.insert")?)),
            308 => {
                self.offset = next_offset(response.header("Range"))?;
                Ok(ChunkProgress::InProgress {
                    bytes_sent: self.offset,
                    total: self.total,
                })
            }
            status => Err(ApiError::Status {
                status,
                message: response.into_string().unwrap_or_default(),
            }),
        }
    }

    fn advance(&mut self) -> Result<ChunkProgress, ApiError> {
        let uri = self.session_uri()?;
        if self.resync {
            if let Some(complete) = self.query_status(&uri)? {
                return Ok(complete);
            }
            self.resync = false;
        }
        self.send_chunk(&uri)
    }
}

impl UploadSession for ResumableUpload<'_> {
    fn next_chunk(&mut self) -> Result<ChunkProgress, ApiError> {
        let result = self.advance();
        if result.is_err() && self.session_uri.is_some() {
            self.resync = true;
        }
        result
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
