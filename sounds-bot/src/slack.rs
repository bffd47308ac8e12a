use anyhow::{bail, Context as _};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use crate::{sound::FILETYPE, User};

const SLACK_API_BASE: &str = "https://slack.com/api";
const USERS_PAGE_SIZE: &str = "200";

/// Metadata of an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileInfo {
    pub title: String,
    pub url: String,
}

impl FileInfo {
    /// Only mp3 uploads are turned into sounds.
    pub fn is_sound(&self) -> bool {
        let suffix = format!(".{FILETYPE}");
        [&self.title, &self.url]
            .iter()
            .all(|s| s.to_ascii_lowercase().ends_with(&suffix))
    }
}

/// The slice of the chat service the bot depends on.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Checks the bot token and returns the bot's own user id.
    async fn auth_test(&self) -> anyhow::Result<String>;

    /// Every workspace member, all pages.
    async fn list_users(&self) -> anyhow::Result<Vec<User>>;

    async fn file_info(&self, file_id: &str) -> anyhow::Result<FileInfo>;

    /// Fetches a private file URL with the bot's credentials.
    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>>;

    async fn post_ephemeral(&self, channel: &str, user: &str, text: &str) -> anyhow::Result<()>;

    /// Asks for a fresh realtime websocket URL.
    async fn open_socket(&self) -> anyhow::Result<String>;
}

/// Slack Web API client.
#[derive(Debug, Clone)]
pub struct SlackClient {
    http: Client,
    bot_token: String,
    app_token: String,
}

impl SlackClient {
    pub fn new(bot_token: impl Into<String>, app_token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            bot_token: bot_token.into(),
            app_token: app_token.into(),
        }
    }

    async fn call(&self, method: &str, token: &str, form: &[(&str, &str)]) -> anyhow::Result<Value> {
        debug!("Calling {method}");
        let resp: Value = self
            .http
            .post(format!("{SLACK_API_BASE}/{method}"))
            .bearer_auth(token)
            .form(form)
            .send()
            .await
            .with_context(|| format!("Failed to call {method}"))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("Invalid response from {method}"))?;
        check_ok(method, resp)
    }
}

fn check_ok(method: &str, resp: Value) -> anyhow::Result<Value> {
    if resp.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(resp);
    }
    let error = resp
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    bail!("{method} failed: {error}")
}

/// One `users.list` page and the cursor of the next one, if any.
fn parse_members(resp: &Value) -> anyhow::Result<(Vec<User>, Option<String>)> {
    let members = match resp.get("members") {
        Some(members) => serde_json::from_value(members.clone()).context("Invalid member list")?,
        None => Vec::new(),
    };
    let next_cursor = resp
        .pointer("/response_metadata/next_cursor")
        .and_then(Value::as_str)
        .filter(|cursor| !cursor.is_empty())
        .map(str::to_owned);
    Ok((members, next_cursor))
}

fn parse_file_info(resp: &Value) -> FileInfo {
    let field = |name: &str| {
        resp.pointer(&format!("/file/{name}"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned()
    };
    FileInfo {
        title: field("title"),
        url: field("url_private"),
    }
}

#[async_trait]
impl ChatClient for SlackClient {
    async fn auth_test(&self) -> anyhow::Result<String> {
        let resp = self.call("auth.test", &self.bot_token, &[]).await?;
        resp.get("user_id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .context("auth.test returned no user_id")
    }

    async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        let mut users = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut form = vec![("limit", USERS_PAGE_SIZE)];
            if let Some(cursor) = &cursor {
                form.push(("cursor", cursor.as_str()));
            }
            let resp = self.call("users.list", &self.bot_token, &form).await?;
            let (page, next_cursor) = parse_members(&resp)?;
            users.extend(page);
            match next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        info!("Loaded {} users", users.len());
        Ok(users)
    }

    async fn file_info(&self, file_id: &str) -> anyhow::Result<FileInfo> {
        let resp = self
            .call("files.info", &self.bot_token, &[("file", file_id)])
            .await?;
        Ok(parse_file_info(&resp))
    }

    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let bytes = self
            .http
            .get(url)
            .bearer_auth(&self.bot_token)
            .send()
            .await
            .with_context(|| format!("Failed to download {url}"))?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    async fn post_ephemeral(&self, channel: &str, user: &str, text: &str) -> anyhow::Result<()> {
        self.call(
            "chat.postEphemeral",
            &self.bot_token,
            &[("channel", channel), ("user", user), ("text", text)],
        )
        .await?;
        Ok(())
    }

    async fn open_socket(&self) -> anyhow::Result<String> {
        let resp = self
            .call("apps.connections.open", &self.app_token, &[])
            .await?;
        resp.get("url")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .context("apps.connections.open returned no url")
    }
}
