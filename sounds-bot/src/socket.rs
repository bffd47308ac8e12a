use std::time::{Duration, Instant};

use anyhow::Context as _;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::{
    core::{Bot, Event},
    slack::ChatClient,
    UserDirectory,
};

/// Sessions that lived at least this long reset the reconnect delay.
const HEALTHY_SESSION: Duration = Duration::from_secs(60);

/// Socket Mode frame.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Value,
    reason: Option<String>,
}

fn str_field(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Extracts the event of an `events_api` payload. Messages posted by the
/// bot itself are dropped.
pub fn parse_event(payload: &Value, bot_user_id: &str) -> Option<Event> {
    let event = payload.get("event")?;
    match event.get("type")?.as_str()? {
        "message" => {
            let user = str_field(event, "/user")?;
            if user == bot_user_id {
                return None;
            }
            Some(Event::Message {
                text: str_field(event, "/text").unwrap_or_default(),
                user,
                channel: str_field(event, "/channel").unwrap_or_default(),
            })
        }
        "file_created" | "file_shared" => Some(Event::FileShared {
            file_id: str_field(event, "/file/id").or_else(|| str_field(event, "/file_id"))?,
            user: str_field(event, "/user_id").or_else(|| str_field(event, "/user")),
            channel: str_field(event, "/channel_id"),
        }),
        other => {
            debug!("Ignoring {other} event");
            None
        }
    }
}

/// Runs one event through the bot and posts its reply. Never fails.
pub async fn handle_and_reply(bot: &mut Bot, client: &dyn ChatClient, event: Event) {
    match bot.handle_event(event, client, Utc::now()).await {
        Ok(Some(reply)) => {
            if let Err(e) = client
                .post_ephemeral(&reply.channel, &reply.user, &reply.text)
                .await
            {
                warn!("Error while sending a reply: {e:?}");
            }
        }
        Ok(None) => {}
        Err(e) => warn!("Error while processing an event: {e:?}"),
    }
}

/// Connects once and handles events until the server closes the session.
#[tracing::instrument(skip_all)]
pub async fn run_session(bot: &mut Bot, client: &dyn ChatClient) -> anyhow::Result<()> {
    let users: UserDirectory = client
        .list_users()
        .await
        .context("Failed to list users")?
        .into_iter()
        .collect();
    bot.set_users(users);
    let bot_user_id = client.auth_test().await.context("Failed to authenticate")?;
    let url = client
        .open_socket()
        .await
        .context("Failed to open a socket")?;

    let (mut ws, _) = connect_async(url.as_str())
        .await
        .context("Failed to connect to the socket")?;
    info!("Connected as {bot_user_id}");

    while let Some(message) = ws.next().await {
        let text = match message.context("Socket read failed")? {
            Message::Text(text) => text,
            Message::Close(frame) => {
                info!("Socket closed: {frame:?}");
                return Ok(());
            }
            _ => continue,
        };
        let envelope: Envelope = match serde_json::from_str(text.as_str()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Malformed frame {}: {e:?}", text.as_str());
                continue;
            }
        };
        if let Some(envelope_id) = &envelope.envelope_id {
            let ack = json!({ "envelope_id": envelope_id }).to_string();
            ws.send(Message::Text(ack.into()))
                .await
                .context("Failed to acknowledge an envelope")?;
        }

        match envelope.kind.as_str() {
            "hello" => info!("Session is ready"),
            "disconnect" => {
                info!("Server requested a reconnect: {:?}", envelope.reason);
                return Ok(());
            }
            "events_api" => {
                if let Some(event) = parse_event(&envelope.payload, &bot_user_id) {
                    handle_and_reply(bot, client, event).await;
                }
            }
            other => debug!("Ignoring {other} envelope"),
        }
    }
    Ok(())
}

/// Exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

/// Keeps a session alive forever, reconnecting with backoff.
pub async fn run_forever(bot: &mut Bot, client: &dyn ChatClient) -> anyhow::Result<()> {
    let mut backoff = Backoff::default();
    loop {
        let started = Instant::now();
        match run_session(bot, client).await {
            Ok(()) => {
                info!("Session ended");
                backoff.reset();
            }
            Err(e) => {
                warn!("Session failed: {e:?}");
                if started.elapsed() >= HEALTHY_SESSION {
                    backoff.reset();
                }
            }
        }
        let delay = backoff.next_delay();
        info!("Reconnecting in {}", humantime::format_duration(delay));
        tokio::time::sleep(delay).await;
    }
}
