use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub subtitles: SubtitleConfig,

    #[serde(default)]
    pub effects: EffectsConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Hardware decode mode handed to the engine (`mediacodec`, `auto`, `no`, ...)
    #[serde(default = "default_hwdec")]
    pub hwdec: String,

    /// Engine video output
    #[serde(default = "default_vo")]
    pub render_backend: String,

    #[serde(default = "default_gpu_api")]
    pub gpu_api: String,

    #[serde(default = "default_true")]
    pub target_colorspace_hint: bool,

    #[serde(default = "default_tone_mapping")]
    pub tone_mapping: String,

    /// Requested surface color depth in bits per channel
    #[serde(default = "default_bit_depth")]
    pub surface_bit_depth: u8,

    #[serde(default)]
    pub mpv_verbose_logging: bool,

    #[serde(default = "default_cache_secs")]
    pub cache_secs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    /// How long a selection waits for the video to finish loading
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: u64,

    #[serde(default = "default_subtitle_format")]
    pub preferred_format: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectsConfig {
    #[serde(default)]
    pub sharpen_enabled: bool,

    #[serde(default = "default_sharpen")]
    pub sharpen_strength: f32,

    #[serde(default)]
    pub tone_boost_enabled: bool,

    #[serde(default = "default_tone")]
    pub tone_boost_strength: f32,

    #[serde(default)]
    pub frame_blend_enabled: bool,

    #[serde(default = "default_blend")]
    pub frame_blend_strength: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            info!("No config file found, using defaults");
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let contents = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;
        info!("Config loaded successfully");
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;

        debug!("Config saved to {:?}", path);
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("reel-tv").join("config.toml"))
    }
}

impl SubtitleConfig {
    /// Where fetched subtitle payloads live; safe to delete at any time
    pub fn resolved_cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir().context("Failed to get cache directory")?;
        Ok(cache_dir.join("reel-tv").join("subtitles"))
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            hwdec: default_hwdec(),
            render_backend: default_vo(),
            gpu_api: default_gpu_api(),
            target_colorspace_hint: default_true(),
            tone_mapping: default_tone_mapping(),
            surface_bit_depth: default_bit_depth(),
            mpv_verbose_logging: false,
            cache_secs: default_cache_secs(),
        }
    }
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            poll_attempts: default_poll_attempts(),
            ready_timeout_secs: default_ready_timeout(),
            max_payload_bytes: default_max_payload(),
            preferred_format: default_subtitle_format(),
            cache_dir: None,
        }
    }
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            sharpen_enabled: false,
            sharpen_strength: default_sharpen(),
            tone_boost_enabled: false,
            tone_boost_strength: default_tone(),
            frame_blend_enabled: false,
            frame_blend_strength: default_blend(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_hwdec() -> String { "auto-safe".to_string() }
fn default_vo() -> String { "gpu-next".to_string() }
fn default_gpu_api() -> String { "opengl".to_string() }
fn default_tone_mapping() -> String { "auto".to_string() }
fn default_bit_depth() -> u8 { 10 }
fn default_cache_secs() -> u32 { 30 }
fn default_poll_interval() -> u64 { 500 }
fn default_poll_attempts() -> u32 { 6 }
fn default_ready_timeout() -> u64 { 20 }
fn default_max_payload() -> u64 { 5 * 1024 * 1024 }
fn default_subtitle_format() -> String { "srt".to_string() }
fn default_sharpen() -> f32 { 0.5 }
fn default_tone() -> f32 { 1.2 }
fn default_blend() -> f32 { 0.5 }
fn default_timeout() -> u64 { 30 }
