use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context as _};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Keys filled in at load time when the config file does not have them.
static DEFAULT_OPTIONS: Lazy<Vec<(&'static str, ConfigValue)>> = Lazy::new(|| {
    vec![
        ("_token", ConfigValue::Null),
        ("_app_token", ConfigValue::Null),
        ("throttling", ConfigValue::Bool(true)),
        ("throttling_reset", ConfigValue::Int(10 * 60)),
        ("throttling_count", ConfigValue::Int(5)),
        ("default_ban_length", ConfigValue::Int(30)),
    ]
});

const FALLBACK_THROTTLING_RESET: i64 = 10 * 60;
const FALLBACK_THROTTLING_COUNT: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Null,
    /// Floats, arrays and objects nobody reads, kept so they survive a save.
    Other(serde_json::Value),
}

impl ConfigValue {
    /// Integers win over booleans, booleans over raw strings. Never fails.
    pub fn parse(raw: &str) -> Self {
        if let Ok(n) = raw.parse::<i64>() {
            return Self::Int(n);
        }
        match parse_bool(raw) {
            Some(b) => Self::Bool(b),
            None => Self::Str(raw.to_owned()),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Str(s) => parse_bool(s).unwrap_or(!s.is_empty()),
            Self::Null => false,
            Self::Other(v) => v.as_f64().map_or(true, |f| f != 0.0),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Str(s) => s.trim().parse().ok(),
            Self::Null | Self::Other(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
            Self::Other(v) => write!(f, "{v}"),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Some(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn write_values(config_file: &Path, values: &BTreeMap<String, ConfigValue>) -> anyhow::Result<()> {
    let j = serde_json::to_string_pretty(values)?;
    fs::write(config_file, j).with_context(|| format!("Failed to write {config_file:?}"))?;
    Ok(())
}

pub fn is_private(key: &str) -> bool {
    key.starts_with('_')
}

/// Flat key/value settings backed by a JSON file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configs {
    values: BTreeMap<String, ConfigValue>,
    config_file: PathBuf,
}

impl Configs {
    pub fn load_or_create<P: AsRef<Path>>(config_file: P) -> anyhow::Result<Self> {
        let config_file = config_file.as_ref().to_path_buf();
        let exists = config_file.exists();
        let mut values: BTreeMap<String, ConfigValue> = if exists {
            let j = fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read {config_file:?}"))?;
            serde_json::from_str(&j)
                .with_context(|| format!("Failed to parse {config_file:?}"))?
        } else {
            BTreeMap::new()
        };

        for (key, value) in DEFAULT_OPTIONS.iter() {
            values
                .entry((*key).to_owned())
                .or_insert_with(|| value.clone());
        }

        let configs = Self {
            values,
            config_file,
        };
        if !exists {
            info!("Creating a default config at {:?}", configs.config_file);
            configs.save()?;
        }
        Ok(configs)
    }

    fn save(&self) -> anyhow::Result<()> {
        write_values(&self.config_file, &self.values)
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    /// Parses `raw` and persists the whole document. Private keys are refused.
    pub fn set(&mut self, key: &str, raw: &str) -> anyhow::Result<&ConfigValue> {
        if is_private(key) {
            bail!("Refusing to set private key {key}");
        }
        // The live values only change once the file has been written.
        let mut values = self.values.clone();
        values.insert(key.to_owned(), ConfigValue::parse(raw));
        write_values(&self.config_file, &values).context("Failed to set config")?;
        self.values = values;
        self.values
            .get(key)
            .context("Config value vanished after insert")
    }

    pub fn public_entries(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.values
            .iter()
            .filter(|(key, _)| !is_private(key))
            .map(|(key, value)| (key.as_str(), value))
    }

    pub fn throttling(&self) -> bool {
        self.get("throttling").map_or(false, ConfigValue::is_truthy)
    }

    pub fn throttling_reset(&self) -> i64 {
        self.get("throttling_reset")
            .and_then(ConfigValue::as_int)
            .unwrap_or(FALLBACK_THROTTLING_RESET)
    }

    pub fn throttling_count(&self) -> i64 {
        self.get("throttling_count")
            .and_then(ConfigValue::as_int)
            .unwrap_or(FALLBACK_THROTTLING_COUNT)
    }

    pub fn default_ban_length(&self) -> Option<i64> {
        self.get("default_ban_length").and_then(ConfigValue::as_int)
    }

    pub fn bot_token(&self) -> Option<&str> {
        self.get("_token").and_then(ConfigValue::as_str)
    }

    pub fn app_token(&self) -> Option<&str> {
        self.get("_app_token").and_then(ConfigValue::as_str)
    }
}
