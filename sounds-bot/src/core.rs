use std::{fmt::Write as _, str::FromStr};

use anyhow::Context as _;
use chrono::{DateTime, Local, Utc};
use prettytable::{format, Cell, Row, Table};
use tracing::{debug, info, warn};

use crate::{
    config::is_private,
    moderation::{ban_minutes, PlayLog, PunishmentTracker, ThrottleTracker},
    slack::ChatClient,
    sound::Placement,
    Command, Configs, SoundFile, SoundStorage, Toolbox, User, UserDirectory,
};

const SUGGESTION_LIMIT: usize = 5;
const LIST_COLUMNS: usize = 4;

const HELP_TEXT: &str = "
Welcome to sounds, the bot that brings fun to your team.
To interact with the bot, simply use these commands:
    list sounds: shows the full list of all the sounds available
    play replace_with_sound: plays the sound you chose from the list
    show logs: shows a list who played the last 10 sounds
    pad replace_with_sound: adds 0.5s at the beginning of the sound
    trim replace_with_sound 2.5 10: trim the selected sound to be only between 2.5 and 10 seconds
    fade replace_with_sound: adds a 1s fadeout on your sound
    download replace_with_youtube_url replace_with_sound: downloads a sound from youtube
    help: shows this help";

const ADMIN_HELP_TEXT: &str = "
    remove sound_name: removes the sound from the list
    show conf: show the config variables
    set x to y: updates the x config variable with y value
    punish @user 30: prevent user from playing a sound for 30 minutes";

const UPLOAD_HELP_TEXT: &str = "
How to upload a sound ?
In the bot channel, upload your mp3 file. This file should already be cut properly and have 0.5s of silence at the beginning.
Be sure you filename ends with .mp3 and if you want to put your file in a specific folder separate the folder from the filename like so folder:filename.mp3

That's it with the instructions, have fun !";

/// Something that happened in the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Message {
        text: String,
        user: String,
        channel: String,
    },
    FileShared {
        file_id: String,
        user: Option<String>,
        channel: Option<String>,
    },
}

/// A private message to one user in one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub channel: String,
    pub user: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy)]
enum Edit<'a> {
    Pad,
    Fade,
    Trim { from: &'a str, to: &'a str },
}

impl Edit<'_> {
    fn verb(&self) -> &'static str {
        match self {
            Self::Pad => "pad",
            Self::Fade => "fade",
            Self::Trim { .. } => "trim",
        }
    }

    fn done(&self) -> &'static str {
        match self {
            Self::Pad => "Padded",
            Self::Fade => "Faded",
            Self::Trim { .. } => "Trimmed",
        }
    }
}

fn clock(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

fn help_text(is_admin: bool) -> String {
    let mut message = HELP_TEXT.to_owned();
    if is_admin {
        message.push_str(ADMIN_HELP_TEXT);
    }
    message.push_str(UPLOAD_HELP_TEXT);
    message
}

/// Application state. Events are handled one at a time through `&mut self`.
#[derive(Debug)]
pub struct Bot {
    configs: Configs,
    storage: SoundStorage,
    toolbox: Toolbox,
    users: UserDirectory,
    throttle: ThrottleTracker,
    punishments: PunishmentTracker,
    logs: PlayLog,
}

impl Bot {
    pub fn new(configs: Configs, storage: SoundStorage, toolbox: Toolbox) -> Self {
        Self {
            configs,
            storage,
            toolbox,
            users: UserDirectory::default(),
            throttle: ThrottleTracker::default(),
            punishments: PunishmentTracker::default(),
            logs: PlayLog::default(),
        }
    }

    pub fn set_users(&mut self, users: UserDirectory) {
        self.users = users;
    }

    pub fn configs(&self) -> &Configs {
        &self.configs
    }

    pub fn storage(&self) -> &SoundStorage {
        &self.storage
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    /// Handles one event to completion and returns the reply to post, if any.
    #[tracing::instrument(skip(self, client))]
    pub async fn handle_event(
        &mut self,
        event: Event,
        client: &dyn ChatClient,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Reply>> {
        match event {
            Event::Message {
                text,
                user,
                channel,
            } => {
                let user = match self.users.get(&user) {
                    Some(user) => user.clone(),
                    None => {
                        debug!("Ignoring a message from unknown user {user}");
                        return Ok(None);
                    }
                };
                if text.is_empty() || channel.is_empty() {
                    return Ok(None);
                }
                let text = text.replace('\u{2019}', "'");
                Ok(self
                    .process_message(&text, &user, now)
                    .await
                    .map(|text| Reply {
                        channel,
                        user: user.id,
                        text,
                    }))
            }
            Event::FileShared {
                file_id,
                user,
                channel,
            } => {
                let added = self.add_sound(client, &file_id).await?;
                Ok(match (added, user, channel) {
                    (Some(_), Some(user), Some(channel)) => Some(Reply {
                        channel,
                        user,
                        text: "Sound added correctly".to_owned(),
                    }),
                    _ => None,
                })
            }
        }
    }

    /// Parses and runs a chat command. `None` means stay silent.
    #[tracing::instrument(skip(self, user), fields(user = %user.name))]
    pub async fn process_message(
        &mut self,
        text: &str,
        user: &User,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let command = Command::from_str(text).ok()?;
        if command.requires_admin() && !user.is_admin {
            debug!("{} is not allowed to run {command:?}", user.name);
            return None;
        }
        info!("{} runs {command:?}", user.name);

        match command {
            Command::Play { name } => Some(self.play(&name, user, now)),
            Command::Remove { name } => Some(self.remove(&name)),
            Command::SetConfig { key, value } => Some(self.set_config(&key, &value)),
            Command::ShowConf => Some(self.show_conf()),
            Command::Punish { target, minutes } => Some(self.punish(&target, minutes, now)),
            Command::Help => Some(help_text(user.is_admin)),
            Command::ListSounds => Some(self.list_sounds()),
            Command::ShowLogs => self.show_logs(),
            Command::Download { url, name } => Some(self.download(&url, &name).await),
            Command::Pad { name } => Some(self.edit(&name, Edit::Pad).await),
            Command::Trim { name, from, to } => {
                Some(self.edit(&name, Edit::Trim { from: &from, to: &to }).await)
            }
            Command::Fade { name } => Some(self.edit(&name, Edit::Fade).await),
        }
    }

    /// Stores an uploaded mp3 in the library. Other uploads are ignored.
    #[tracing::instrument(skip(self, client))]
    pub async fn add_sound(
        &self,
        client: &dyn ChatClient,
        file_id: &str,
    ) -> anyhow::Result<Option<SoundFile>> {
        let file = client.file_info(file_id).await?;
        if !file.is_sound() {
            debug!("Ignoring upload {:?}", file.title);
            return Ok(None);
        }
        let placement = match Placement::from_raw(&file.title) {
            Some(placement) => placement,
            None => {
                warn!("Upload {:?} has no usable name", file.title);
                return Ok(None);
            }
        };

        let content = client.download(&file.url).await?;
        let sound = self
            .storage
            .store(&placement, &content)
            .with_context(|| format!("Failed to store {:?}", file.title))?;
        self.normalize(&sound);
        info!("Added {:?}", sound.path);
        Ok(Some(sound))
    }

    fn normalize(&self, sound: &SoundFile) {
        if let Err(e) = self.toolbox.normalize(sound) {
            warn!("Error while normalizing {:?}: {e:?}", sound.path);
        }
    }

    fn not_found(&self, name: &str) -> String {
        let mut message = format!("No sound matching {name}");
        let suggestions = self.storage.suggestions(name, SUGGESTION_LIMIT);
        if !suggestions.is_empty() {
            write!(message, "\nDid you mean: {}?", suggestions.join(", ")).ok();
        }
        message
    }

    fn play(&mut self, name: &str, user: &User, now: DateTime<Utc>) -> String {
        let sound = match self.storage.get(name) {
            Some(sound) => sound,
            None => return self.not_found(name),
        };

        let status = self.throttle.check_and_record(user, &self.configs, now);
        let mut message = if status.map_or(false, |s| s.throttled) {
            "You reached your throttling limit. Try again later.".to_owned()
        } else if let Some(release) = self.punishments.is_punished(user, now) {
            format!("You have been punished ! No sounds until {}.", clock(release))
        } else {
            match self.toolbox.play(&sound) {
                Ok(()) => {
                    self.logs.record(user, name, now);
                    format!("Playing {name}")
                }
                Err(e) => {
                    warn!("Error while playing {:?}: {e:?}", sound.path);
                    format!("Could not play {name}: operation failed")
                }
            }
        };
        if let Some(status) = status {
            write!(
                message,
                "\n {} plays left. Reset at {}.",
                status.remaining,
                clock(status.reset_at)
            )
            .ok();
        }
        message
    }

    fn remove(&self, name: &str) -> String {
        match self.storage.remove(name) {
            Ok(Some(_)) => format!("Removed {name}"),
            Ok(None) => self.not_found(name),
            Err(e) => {
                warn!("Error while removing {name}: {e:?}");
                format!("Could not remove {name}: operation failed")
            }
        }
    }

    fn set_config(&mut self, key: &str, value: &str) -> String {
        if is_private(key) {
            return "Can't set private variables".to_owned();
        }
        match self.configs.set(key, value) {
            Ok(_) => "Config set".to_owned(),
            Err(e) => {
                warn!("Error while setting {key}: {e:?}");
                format!("Could not set {key}: operation failed")
            }
        }
    }

    fn show_conf(&self) -> String {
        self.configs
            .public_entries()
            .map(|(key, value)| format!("{key}: {value}\n"))
            .collect()
    }

    fn punish(&mut self, target: &str, minutes: Option<i64>, now: DateTime<Utc>) -> String {
        let target = match self.users.find(target) {
            Some(user) => user.clone(),
            None => return format!("Couldn't find user {target}"),
        };
        let minutes = ban_minutes(minutes, &self.configs);
        let release = self.punishments.punish(&target, minutes, now);
        info!("{} is punished until {release}", target.name);
        format!("{} has been punished for {minutes} minutes.", target.name)
    }

    fn list_sounds(&self) -> String {
        let mut message = "```\nAvailable sounds are :\n".to_owned();
        for (folder, names) in self.storage.list_all() {
            let mut table = Table::new();
            table.set_format(*format::consts::FORMAT_CLEAN);
            for chunk in names.chunks(LIST_COLUMNS) {
                table.add_row(Row::new(chunk.iter().map(|name| Cell::new(name)).collect()));
            }
            write!(message, "\n{}:\n{table}", folder.to_uppercase()).ok();
        }
        message.push_str("```");
        message
    }

    fn show_logs(&self) -> Option<String> {
        if self.logs.is_empty() {
            return None;
        }
        Some(
            self.logs
                .recent()
                .iter()
                .map(|entry| format!("{} played {} at {}", entry.user, entry.sound, clock(entry.at)))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    async fn download(&self, url: &str, name: &str) -> String {
        let placement = match Placement::from_raw(name) {
            Some(placement) => placement,
            None => return format!("Could not download {name}: invalid name"),
        };
        match self.toolbox.download(url, &self.storage, &placement).await {
            Ok(sound) => {
                self.normalize(&sound);
                "Sound added correctly".to_owned()
            }
            Err(e) => {
                warn!("Error while downloading {url}: {e:?}");
                format!("Could not download {name}: operation failed")
            }
        }
    }

    async fn edit(&self, name: &str, edit: Edit<'_>) -> String {
        let sound = match self.storage.get(name) {
            Some(sound) => sound,
            None => return self.not_found(name),
        };
        let result = match edit {
            Edit::Pad => self.toolbox.pad(&sound).await,
            Edit::Fade => self.toolbox.fade(&sound).await,
            Edit::Trim { from, to } => self.toolbox.trim(&sound, from, to).await,
        };
        match result {
            Ok(()) => format!("{} {name}", edit.done()),
            Err(e) => {
                warn!("Error while trying to {} {name}: {e:?}", edit.verb());
                format!("Could not {} {name}: operation failed", edit.verb())
            }
        }
    }
}
