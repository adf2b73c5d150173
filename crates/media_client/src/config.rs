use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_SETTINGS_FILE: &str = "media.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    pub sync_timeout_secs: u64,
    pub display_density: f32,
    pub border_size_dp: f32,
    pub single_text_size_dp: f32,
    pub multi_fraction: f32,
    pub image_corner_radius: f32,
    pub preview_max_width: u32,
    pub preview_max_height: u32,
    pub content_scheme: String,
    pub memory_cache_entries: usize,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            sync_timeout_secs: 60,
            display_density: 1.0,
            border_size_dp: 1.0,
            single_text_size_dp: 16.0,
            multi_fraction: 26.0 / 40.0,
            image_corner_radius: 12.0,
            preview_max_width: 512,
            preview_max_height: 512,
            content_scheme: "content".into(),
            memory_cache_entries: 64,
        }
    }
}

impl MediaSettings {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

/// Defaults, then `media.toml` in the working directory, then `MEDIA__*`
/// environment overrides.
pub fn load_settings() -> anyhow::Result<MediaSettings> {
    let path = PathBuf::from(DEFAULT_SETTINGS_FILE);
    let mut settings = if path.exists() {
        load_settings_file(&path)?
    } else {
        MediaSettings::default()
    };
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

pub fn load_settings_file(path: &Path) -> anyhow::Result<MediaSettings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read media settings '{}'", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("failed to parse media settings '{}'", path.display()))
}

pub(crate) fn apply_env_overrides(
    settings: &mut MediaSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    if let Some(v) = parsed(&lookup, "MEDIA__SYNC_TIMEOUT_SECS") {
        settings.sync_timeout_secs = v;
    }
    if let Some(v) = parsed(&lookup, "MEDIA__DISPLAY_DENSITY") {
        settings.display_density = v;
    }
    if let Some(v) = parsed(&lookup, "MEDIA__IMAGE_CORNER_RADIUS") {
        settings.image_corner_radius = v;
    }
    if let Some(v) = parsed(&lookup, "MEDIA__PREVIEW_MAX_WIDTH") {
        settings.preview_max_width = v;
    }
    if let Some(v) = parsed(&lookup, "MEDIA__PREVIEW_MAX_HEIGHT") {
        settings.preview_max_height = v;
    }
    if let Some(v) = parsed(&lookup, "MEDIA__MEMORY_CACHE_ENTRIES") {
        settings.memory_cache_entries = v;
    }
    if let Some(v) = lookup("MEDIA__CONTENT_SCHEME") {
        let v = v.trim();
        if !v.is_empty() {
            settings.content_scheme = v.to_string();
        }
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable media setting override");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
