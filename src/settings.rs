use crate::registry::{Key, Registry};
use anyhow::{anyhow, Result};
use serenity::all::{GuildId, RoleId, UserId};
use std::{collections::BTreeSet, io::ErrorKind, path::PathBuf};
use tokio::sync::Mutex;

const SETTINGS_FILE_PREFIX: &str = "settings.";
const SETTINGS_FILE_SUFFIX: &str = ".json";
const SETTINGS_CACHE_SLOT: &str = "settings";

/// Per-guild settings which persist across sessions
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GuildSettings {
    pub motd: Option<String>,
    pub admin_users: BTreeSet<UserId>,
    pub admin_roles: BTreeSet<RoleId>,
}

/// JSON files under the data directory, one per guild.  Reads go through the registry cache.
pub struct SettingsStore {
    dir: PathBuf,
    default_motd: String,
    registry: Registry,
    /// Held for every write, and across the whole load-modify-save of `update`.
    writes: Mutex<()>,
}

impl GuildSettings {
    pub fn is_admin(&self, user_id: UserId, roles: &[RoleId]) -> bool {
        self.admin_users.contains(&user_id) || roles.iter().any(|r| self.admin_roles.contains(r))
    }
}

impl SettingsStore {
    pub fn new(dir: PathBuf, default_motd: String, registry: Registry) -> Self {
        Self {
            dir,
            default_motd,
            registry,
            writes: Mutex::new(()),
        }
    }

    /// Settings of a guild which has never saved any
    fn defaults(&self) -> GuildSettings {
        GuildSettings {
            motd: Some(self.default_motd.clone()),
            ..Default::default()
        }
    }

    fn path(&self, guild_id: GuildId) -> PathBuf {
        self.dir.join(format!(
            "{}{}{}",
            SETTINGS_FILE_PREFIX, guild_id, SETTINGS_FILE_SUFFIX
        ))
    }

    fn cache_key(guild_id: GuildId) -> Key {
        Key::tenant(guild_id.get(), SETTINGS_CACHE_SLOT)
    }

    /// Settings for `guild_id`, or defaults if the guild has never saved any.
    pub async fn load(&self, guild_id: GuildId) -> Result<GuildSettings> {
        if let Some(settings) = self.registry.get_cache(&Self::cache_key(guild_id)).await {
            return Ok(settings);
        }

        let path = self.path(guild_id);
        let settings = match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                anyhow!(
                    "Could not parse settings at `{}`: {}",
                    path.to_string_lossy(),
                    e
                )
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => self.defaults(),
            Err(e) => {
                return Err(anyhow!(
                    "Could not read settings at `{}`: {}",
                    path.to_string_lossy(),
                    e
                ))
            }
        };

        self.registry
            .set_cache_default(Self::cache_key(guild_id), settings.clone())
            .await;
        Ok(settings)
    }

    pub async fn save(&self, guild_id: GuildId, settings: &GuildSettings) -> Result<()> {
        let _writes = self.writes.lock().await;
        self.write(guild_id, settings).await
    }

    /// Caller must hold `writes`; the temporary file path is shared by all writers of a guild.
    async fn write(&self, guild_id: GuildId, settings: &GuildSettings) -> Result<()> {
        let path = self.path(guild_id);
        let serialized = serde_json::to_string_pretty(settings)
            .map_err(|e| anyhow!("Could not serialize settings: {}", e))?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            anyhow!(
                "Could not create directory `{}`: {}",
                self.dir.to_string_lossy(),
                e
            )
        })?;

        // Create a temporary file in the same directory.
        let tmp_path = path.with_extension("json.new");

        tokio::fs::write(&tmp_path, serialized).await.map_err(|e| {
            anyhow!(
                "Could not write settings to temporary file `{}`: {}",
                tmp_path.to_string_lossy(),
                e
            )
        })?;

        // Atomically rename the temporary file over the target file.
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            anyhow!(
                "Could not rename temporary file `{}` to `{}`: {}",
                tmp_path.to_string_lossy(),
                path.to_string_lossy(),
                e
            )
        })?;

        self.registry
            .set_cache_default(Self::cache_key(guild_id), settings.clone())
            .await;
        Ok(())
    }

    /// Load, mutate and save.  Returns whatever `f` returns.
    pub async fn update<R>(
        &self,
        guild_id: GuildId,
        f: impl FnOnce(&mut GuildSettings) -> R,
    ) -> Result<R> {
        let _writes = self.writes.lock().await;
        let mut settings = self.load(guild_id).await?;
        let result = f(&mut settings);
        self.write(guild_id, &settings).await?;
        Ok(result)
    }

    /// Guilds which have a settings file.
    pub async fn guild_ids(&self) -> Result<Vec<GuildId>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(anyhow!(
                    "Could not read data directory `{}`: {}",
                    self.dir.to_string_lossy(),
                    e
                ))
            }
        };

        let mut guild_ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(id) = file_name
                .to_str()
                .and_then(|name| name.strip_prefix(SETTINGS_FILE_PREFIX))
                .and_then(|name| name.strip_suffix(SETTINGS_FILE_SUFFIX))
                .and_then(|id| id.parse::<u64>().ok())
                .filter(|id| *id != 0)
            else {
                continue;
            };
            guild_ids.push(GuildId::new(id));
        }

        guild_ids.sort();
        Ok(guild_ids)
    }
}
