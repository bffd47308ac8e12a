//! In-memory [`ChatClient`] for integration tests.

#![allow(dead_code)]

use std::{collections::HashMap, path::Path, sync::Mutex};

use anyhow::Context as _;
use async_trait::async_trait;
use sounds_bot::{
    Bot, ChatClient, Configs, FileInfo, SoundStorage, ToolCommand, Toolbox, ToolboxBuilder, User,
    UserDirectory,
};

/// One recorded `post_ephemeral` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posted {
    pub channel: String,
    pub user: String,
    pub text: String,
}

/// Serves fixed users and files and records every reply.
#[derive(Default)]
pub struct MockChat {
    pub users: Vec<User>,
    /// File id to metadata; contents are keyed by URL.
    pub files: HashMap<String, FileInfo>,
    pub contents: HashMap<String, Vec<u8>>,
    pub socket_url: String,
    pub posted: Mutex<Vec<Posted>>,
}

impl MockChat {
    pub fn with_users(users: Vec<User>) -> Self {
        Self {
            users,
            ..Default::default()
        }
    }

    pub fn add_file(&mut self, file_id: &str, title: &str, url: &str, content: &[u8]) {
        self.files.insert(
            file_id.to_owned(),
            FileInfo {
                title: title.to_owned(),
                url: url.to_owned(),
            },
        );
        self.contents.insert(url.to_owned(), content.to_vec());
    }

    pub fn posted(&self) -> Vec<Posted> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for MockChat {
    async fn auth_test(&self) -> anyhow::Result<String> {
        Ok("B0".to_owned())
    }

    async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        Ok(self.users.clone())
    }

    async fn file_info(&self, file_id: &str) -> anyhow::Result<FileInfo> {
        self.files.get(file_id).cloned().context("file_not_found")
    }

    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        self.contents.get(url).cloned().context("not found")
    }

    async fn post_ephemeral(&self, channel: &str, user: &str, text: &str) -> anyhow::Result<()> {
        self.posted.lock().unwrap().push(Posted {
            channel: channel.to_owned(),
            user: user.to_owned(),
            text: text.to_owned(),
        });
        Ok(())
    }

    async fn open_socket(&self) -> anyhow::Result<String> {
        Ok(self.socket_url.clone())
    }
}

pub fn admin() -> User {
    User::new("U0", "root", true)
}

pub fn member() -> User {
    User::new("U1", "bob", false)
}

/// `sh -c <script>` with the given placeholder arguments.
pub fn sh(script: &str, args: &[&str]) -> ToolCommand {
    let mut all = vec!["-c", script];
    all.extend_from_slice(args);
    ToolCommand::new("sh", &all)
}

/// Tools that succeed without touching real audio.
pub fn fake_toolbox() -> Toolbox {
    ToolboxBuilder::default()
        .player(sh("exit 0", &["{input}"]))
        .normalizer(sh("exit 0", &["{input}"]))
        .build()
        .unwrap()
}

pub fn new_bot(dir: &Path, toolbox: Toolbox) -> Bot {
    let configs = Configs::load_or_create(dir.join("config.json")).unwrap();
    let storage = SoundStorage::new(dir.join("sounds"));
    storage.ensure_dir().unwrap();
    let mut bot = Bot::new(configs, storage, toolbox);
    bot.set_users(vec![admin(), member()].into_iter().collect::<UserDirectory>());
    bot
}
