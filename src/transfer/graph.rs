//! Microsoft Graph drive store (client-credentials flow)

use super::{FileStore, RemotePath};
use crate::config::GraphConfig;
use crate::error::{RateSheetError, RateSheetResult};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

/// Token and drive established on first use
#[derive(Debug, Clone)]
struct Session {
    token: String,
    drive_id: String,
}

pub struct GraphStore {
    config: GraphConfig,
    client: Client,
    session: Mutex<Option<Session>>,
}

impl GraphStore {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    async fn session(&self) -> RateSheetResult<Session> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }

        let token = self.acquire_token().await?;
        let site_id = self.site_id(&token).await?;
        let drive_id = self.drive_id(&token, &site_id).await?;
        info!(site = %self.config.site_path, "connected to Graph drive");

        let session = Session { token, drive_id };
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn acquire_token(&self) -> RateSheetResult<String> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.config.login_base.trim_end_matches('/'),
            self.config.tenant_id
        );
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("scope", GRAPH_SCOPE),
            ("grant_type", "client_credentials"),
        ];

        let response = self.client.post(&url).form(&form).send().await?;
        let body: TokenResponse = response.json().await?;
        match body.access_token {
            Some(token) if !token.is_empty() => {
                debug!("access token acquired");
                Ok(token)
            }
            _ => Err(RateSheetError::Auth(format!(
                "{}: {}",
                body.error.unwrap_or_else(|| "unknown_error".to_string()),
                body.error_description.unwrap_or_default()
            ))),
        }
    }

    async fn site_id(&self, token: &str) -> RateSheetResult<String> {
        let url = format!(
            "{}/sites/{}:/sites/{}",
            self.graph_base(),
            self.config.site_hostname,
            self.config.site_path.trim_matches('/')
        );
        let response = check_status("site lookup", self.client.get(&url).bearer_auth(token).send().await?).await?;
        Ok(response.json::<IdResponse>().await?.id)
    }

    async fn drive_id(&self, token: &str, site_id: &str) -> RateSheetResult<String> {
        let url = format!("{}/sites/{}/drive", self.graph_base(), site_id);
        let response = check_status("drive lookup", self.client.get(&url).bearer_auth(token).send().await?).await?;
        Ok(response.json::<IdResponse>().await?.id)
    }

    fn graph_base(&self) -> &str {
        self.config.graph_base.trim_end_matches('/')
    }

    fn content_url(&self, drive_id: &str, remote: &RemotePath) -> String {
        format!(
            "{}/drives/{}/root:/{}:/content",
            self.graph_base(),
            drive_id,
            encode_item_path(&remote.item_path())
        )
    }
}

/// Percent-encode each segment of a drive item path, keeping the separators
fn encode_item_path(item_path: &str) -> String {
    item_path
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl FileStore for GraphStore {
    async fn download(&self, remote: &RemotePath, dest: &Path) -> RateSheetResult<()> {
        let session = self.session().await?;
        let url = self.content_url(&session.drive_id, remote);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&session.token)
            .send()
            .await?;
        let bytes = check_status("download", response).await?.bytes().await?;

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(dest, &bytes).await?;

        info!(remote = %remote, dest = %dest.display(), bytes = bytes.len(), "downloaded");
        Ok(())
    }

    async fn upload(&self, src: &Path, remote: &RemotePath) -> RateSheetResult<()> {
        let bytes = fs::read(src).await.map_err(|e| {
            RateSheetError::Transfer(format!("Cannot read {}: {}", src.display(), e))
        })?;
        let size = bytes.len();

        let session = self.session().await?;
        let url = self.content_url(&session.drive_id, remote);
        let response = self
            .client
            .put(&url)
            .bearer_auth(&session.token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        check_status("upload", response).await?;

        info!(src = %src.display(), remote = %remote, bytes = size, "uploaded");
        Ok(())
    }
}

/// Pass 2xx responses through; anything else becomes a transfer error with the body
async fn check_status(action: &str, response: Response) -> RateSheetResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RateSheetError::Transfer(format!(
        "{} failed ({}): {}",
        action, status, body
    )))
}
