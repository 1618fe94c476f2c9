use anyhow::{anyhow, Result};
use std::{path::PathBuf, time::Duration};
use tokio::io::AsyncReadExt;

const CONFIG_PATH_REL_HOME: &str = ".config/purkachu/config.toml";
const DATA_DIR_REL_HOME: &str = ".local/share/purkachu";
/// Overrides `general.discord_token` so the token can stay out of the config file.
const TOKEN_ENV_VAR: &str = "BOT_TOKEN";

/// Bot configuration
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Config {
    pub general: General,
    #[serde(default)]
    pub registry: Registry,
    #[serde(default)]
    pub afk_kicker: AfkKicker,
    #[serde(default)]
    pub defaults: Defaults,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct General {
    #[serde(default)]
    pub discord_token: String,
    /// Discord user ids allowed to run owner-only commands
    #[serde(default)]
    pub bot_owners: Vec<u64>,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Where per-guild settings files live.  Defaults to `~/.local/share/purkachu`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Registry {
    pub tick_interval_ms: u64,
    pub default_cache_ttl_ms: u64,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AfkKicker {
    pub enabled: bool,
    /// How long a member may sit self-muted before being moved to the AFK channel
    pub mute_limit_seconds: u64,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub motd: String,
}

fn default_command_prefix() -> String {
    "?".to_owned()
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            tick_interval_ms: crate::registry::DEFAULT_TICK_INTERVAL.as_millis() as u64,
            default_cache_ttl_ms: crate::registry::DEFAULT_CACHE_TTL.as_millis() as u64,
        }
    }
}

impl Registry {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn default_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.default_cache_ttl_ms)
    }
}

impl Default for AfkKicker {
    fn default() -> Self {
        Self {
            enabled: false,
            mute_limit_seconds: 20 * 60,
        }
    }
}

impl AfkKicker {
    pub fn mute_limit(&self) -> Duration {
        Duration::from_secs(self.mute_limit_seconds)
    }
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            motd: "Purkachu is super cool!".to_owned(),
        }
    }
}

impl Config {
    fn config_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|p| p.join(CONFIG_PATH_REL_HOME))
            .ok_or(anyhow!("Could not find home directory"))
    }

    pub async fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut file = tokio::fs::File::open(&path).await.map_err(|e| {
            anyhow!(
                "Could not open configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).await.map_err(|e| {
            anyhow!(
                "Could not read configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        let mut config = Self::parse(&contents).map_err(|e| {
            anyhow!(
                "Could not parse configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
            config.general.discord_token = token;
        }
        if config.general.discord_token.is_empty() {
            return Err(anyhow!(
                "No Discord token: set `general.discord_token` in `{}` or `{}`",
                path.to_string_lossy(),
                TOKEN_ENV_VAR
            ));
        }

        Ok(config)
    }

    fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(Into::into)
    }

    pub async fn reload(&mut self) -> Result<()> {
        let new = Self::load().await?;
        *self = new;
        Ok(())
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.general.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::home_dir()
                .map(|p| p.join(DATA_DIR_REL_HOME))
                .ok_or(anyhow!("Could not find home directory")),
        }
    }

    pub fn is_owner(&self, user_id: u64) -> bool {
        self.general.bot_owners.contains(&user_id)
    }
}
