//! Access token resolution.
//!
//! Obtaining consent is left to Google's own tooling; this module only turns
//! what that produced (an access token, or a refresh token plus the OAuth
//! client secrets) into bearer tokens for the API. Refreshed tokens are
//! renewed shortly before they expire, so a run that outlives one token keeps
//! working.

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{debug, info};
use ureq::Agent;

use crate::config::Settings;
use crate::error::ApiError;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// A token is renewed once it is this close to its expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// The `installed` (or `web`) section of a Google client secrets file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// An access token together with the moment it stops being accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub access_token: String,
    /// `None` when the issuer did not say; such a token is used as long as
    /// there is nothing to renew it with.
    pub expires_at: Option<SystemTime>,
}

impl IssuedToken {
    fn is_fresh(&self, now: SystemTime) -> bool {
        match self.expires_at {
            Some(expires_at) => now + EXPIRY_MARGIN < expires_at,
            None => true,
        }
    }
}

struct RefreshGrant {
    agent: Agent,
    secrets: ClientSecrets,
    refresh_token: String,
}

/// Source of `Authorization` header values for every API request.
pub struct Credentials {
    grant: Option<RefreshGrant>,
    current: RefCell<Option<IssuedToken>>,
}

impl Credentials {
    /// A token supplied from outside; it is never renewed.
    pub fn fixed(access_token: impl Into<String>) -> Self {
        Self {
            grant: None,
            current: RefCell::new(Some(IssuedToken {
                access_token: access_token.into(),
                expires_at: None,
            })),
        }
    }

    /// Tokens minted from a refresh token. The first one is fetched on the
    /// first call to [`Credentials::bearer`].
    pub fn refreshing(agent: Agent, secrets: ClientSecrets, refresh_token: String) -> Self {
        Self {
            grant: Some(RefreshGrant {
                agent,
                secrets,
                refresh_token,
            }),
            current: RefCell::new(None),
        }
    }

    pub fn bearer(&self) -> Result<String, ApiError> {
        self.bearer_at(SystemTime::now())
    }

    fn bearer_at(&self, now: SystemTime) -> Result<String, ApiError> {
        {
            let current = self.current.borrow();
            if let Some(token) = current.as_ref()
                && (self.grant.is_none() || token.is_fresh(now))
            {
                return Ok(format!("Bearer {}", token.access_token));
            }
        }
        let Some(grant) = &self.grant else {
            return Err(ApiError::Decode("no access token available".to_string()));
        };
        let issued =
            refresh_access_token(&grant.agent, &grant.secrets, &grant.refresh_token, now)?;
        let header = format!("Bearer {}", issued.access_token);
        *self.current.borrow_mut() = Some(issued);
        Ok(header)
    }
}

pub fn parse_client_secrets(raw: &str) -> Result<ClientSecrets> {
    let file: ClientSecretsFile =
        serde_json::from_str(raw).context("client secrets are not valid JSON")?;
    match file.installed.or(file.web) {
        Some(secrets) => Ok(secrets),
        None => bail!("client secrets have neither an `installed` nor a `web` section"),
    }
}

pub fn load_client_secrets(path: &Path) -> Result<ClientSecrets> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_client_secrets(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Exchanges a long-lived refresh token for a fresh access token.
pub fn refresh_access_token(
    agent: &Agent,
    secrets: &ClientSecrets,
    refresh_token: &str,
    now: SystemTime,
) -> Result<IssuedToken, ApiError> {
    let response = agent.post(&secrets.token_uri).send_form(&[
        ("client_id", secrets.client_id.as_str()),
        ("client_secret", secrets.client_secret.as_str()),
        ("refresh_token", refresh_token),
        ("grant_type", "refresh_token"),
    ])?;
    let token: TokenResponse = response
        .into_json()
        .map_err(|err| ApiError::Decode(format!("token endpoint response: {err}")))?;
    match token.expires_in {
        Some(expires_in) => info!("Obtained access token valid for {expires_in} seconds"),
        None => info!("Obtained access token without an expiry"),
    }
    Ok(IssuedToken {
        access_token: token.access_token,
        expires_at: token
            .expires_in
            .map(|seconds| now + Duration::from_secs(seconds)),
    })
}

/// Picks the credentials for this run. A refresh token (with the client
/// secrets) wins because it can outlive a long run; otherwise an explicit
/// access token is used as-is.
pub fn resolve_credentials(agent: &Agent, settings: &Settings) -> Result<Credentials> {
    if let Some(refresh_token) = &settings.refresh_token {
        let secrets = load_client_secrets(&settings.client_secrets)?;
        if settings.access_token.is_some() {
            debug!("YOUTUBE_REFRESH_TOKEN is set; ignoring YOUTUBE_ACCESS_TOKEN");
        }
        return Ok(Credentials::refreshing(
            agent.clone(),
            secrets,
            refresh_token.clone(),
        ));
    }
    match &settings.access_token {
        Some(token) => Ok(Credentials::fixed(token.clone())),
        None => bail!(
            "no YouTube credentials: set YOUTUBE_ACCESS_TOKEN, or YOUTUBE_REFRESH_TOKEN together with {}",
            settings.client_secrets.display()
        ),
    }
}
