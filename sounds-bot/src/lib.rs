pub mod command;
pub mod config;
pub mod core;
pub mod jobs;
pub mod moderation;
pub mod slack;
pub mod socket;
pub mod sound;
pub mod user;

#[macro_use]
extern crate derive_builder;

pub use crate::{
    command::Command,
    config::{ConfigValue, Configs},
    core::{Bot, Event, Reply},
    jobs::{JobError, ToolCommand, Toolbox, ToolboxBuilder},
    slack::{ChatClient, FileInfo, SlackClient},
    socket::{run_forever, run_session},
    sound::{Placement, SoundFile, SoundStorage},
    user::{User, UserDirectory},
};
