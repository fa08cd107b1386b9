use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use twin_api::{DEFAULT_API_BASE_URL, TokenStore};
use twin_stream::{ChannelConfig, ChannelResult, DEFAULT_RECONNECT_DELAY, DEFAULT_WS_URL};

use crate::chat::animator::{DEFAULT_CHARS_PER_TICK, DEFAULT_TICK_INTERVAL};
use crate::chat::pager::DEFAULT_PAGE_SIZE;
use crate::chat::scroll_manager::DEFAULT_NEAR_TOP_THRESHOLD;
use crate::chat::sessions::DEFAULT_SESSION_CACHE_TTL;
use crate::chat::view::ScreenConfig;

pub const SETTINGS_DIRECTORY_NAME: &str = "twin";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "TWIN_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub ws_url: String,
    pub reconnect_delay_ms: u64,
    pub page_size: u32,
    pub reveal_chars_per_tick: usize,
    pub reveal_tick_ms: u64,
    pub session_cache_ttl_secs: u64,
    pub near_top_threshold_px: f32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            page_size: DEFAULT_PAGE_SIZE,
            reveal_chars_per_tick: DEFAULT_CHARS_PER_TICK,
            reveal_tick_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            session_cache_ttl_secs: DEFAULT_SESSION_CACHE_TTL.as_secs(),
            near_top_threshold_px: DEFAULT_NEAR_TOP_THRESHOLD,
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();

        self.api_base_url = self.api_base_url.trim().trim_end_matches('/').to_string();
        if self.api_base_url.is_empty() {
            self.api_base_url = defaults.api_base_url;
        }
        self.ws_url = self.ws_url.trim().to_string();
        if self.ws_url.is_empty() {
            self.ws_url = defaults.ws_url;
        }

        // Zero would spin the reconnect loop and the reveal timer.
        if self.reconnect_delay_ms == 0 {
            self.reconnect_delay_ms = defaults.reconnect_delay_ms;
        }
        if self.reveal_tick_ms == 0 {
            self.reveal_tick_ms = defaults.reveal_tick_ms;
        }
        self.page_size = self.page_size.max(1);
        self.reveal_chars_per_tick = self.reveal_chars_per_tick.max(1);
        if !self.near_top_threshold_px.is_finite() || self.near_top_threshold_px < 0.0 {
            self.near_top_threshold_px = defaults.near_top_threshold_px;
        }

        self
    }

    pub fn channel_config(&self) -> ChannelResult<ChannelConfig> {
        Ok(ChannelConfig::new(&self.ws_url)?
            .with_reconnect_delay(Duration::from_millis(self.reconnect_delay_ms)))
    }

    pub fn screen_config(&self) -> ScreenConfig {
        ScreenConfig {
            page_size: self.page_size,
            chars_per_tick: self.reveal_chars_per_tick,
            tick_interval: Duration::from_millis(self.reveal_tick_ms),
            near_top_threshold: self.near_top_threshold_px,
            ..ScreenConfig::default()
        }
    }

    pub fn session_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.session_cache_ttl_secs)
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ClientSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".twin"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Token file kept beside the settings file.
    pub fn token_store(&self) -> TokenStore {
        match self.config_path.parent() {
            Some(dir) => TokenStore::new(dir.join(twin_api::auth::TOKEN_FILE_NAME)),
            None => TokenStore::new(TokenStore::default_path()),
        }
    }

    pub fn settings(&self) -> Arc<ClientSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ClientSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &Path) -> ClientSettings {
        if !path.exists() {
            tracing::info!(path = ?path, "settings file not found, using defaults");
        }

        let figment = Figment::from(Serialized::defaults(ClientSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<ClientSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(path = ?path, %error, "failed to parse settings, using defaults");
                ClientSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ClientSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = ?self.config_path, "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}
