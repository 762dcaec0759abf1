#![allow(dead_code)]

pub mod builders;
pub mod mocks;

use reel_tv::config::Config;
use std::path::PathBuf;
use tempfile::TempDir;

/// Config pointing at a test server with a throwaway subtitle cache
pub struct TestContext {
    pub config: Config,
    _temp_dir: TempDir,
}

impl TestContext {
    pub fn new(server_url: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let mut config = Config::default();
        config.server.url = server_url.to_string();
        config.server.access_token = Some("test_token".to_string());
        config.server.user_id = Some("test_user".to_string());
        config.network.timeout_secs = 5;
        config.subtitles.cache_dir = Some(temp_dir.path().join("subtitles"));

        Self {
            config,
            _temp_dir: temp_dir,
        }
    }

    pub fn with_max_payload(mut self, bytes: u64) -> Self {
        self.config.subtitles.max_payload_bytes = bytes;
        self
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.config
            .subtitles
            .cache_dir
            .clone()
            .expect("cache dir is always set")
    }

    /// Files currently in the cache directory
    pub fn cached_files(&self) -> Vec<String> {
        match std::fs::read_dir(self.cache_dir()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
