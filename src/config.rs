use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::{ClipRange, HeatChannel};
use crate::error::PlateError;

pub const DEFAULT_CONFIG_FILE: &str = "plate-view.json";
pub const DEFAULT_EXTENSION: &str = "csv";
pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_HEATMAP_INTERVAL_MINUTES: u64 = 30;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub watch_interval_secs: Option<u64>,
    #[serde(default)]
    pub heatmap_interval_minutes: Option<u64>,
    #[serde(default)]
    pub channels: HashMap<HeatChannel, ChannelEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ChannelEntry {
    #[serde(default)]
    pub bounds: Option<[f64; 2]>,
    #[serde(default)]
    pub highlight: Option<[f64; 2]>,
}

/// Clip bounds and highlight ranges for every heat channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSettings {
    bounds: HashMap<HeatChannel, ClipRange>,
    highlight: HashMap<HeatChannel, ClipRange>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            bounds: HeatChannel::ALL
                .into_iter()
                .map(|channel| (channel, channel.default_bounds()))
                .collect(),
            highlight: HeatChannel::ALL
                .into_iter()
                .filter_map(|channel| Some((channel, channel.default_highlight()?)))
                .collect(),
        }
    }
}

impl ChannelSettings {
    pub fn bounds(&self, channel: HeatChannel) -> ClipRange {
        self.bounds
            .get(&channel)
            .copied()
            .unwrap_or_else(|| channel.default_bounds())
    }

    pub fn highlight(&self, channel: HeatChannel) -> Option<ClipRange> {
        self.highlight.get(&channel).copied()
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub extension: String,
    pub watch_interval: Duration,
    pub heatmap_interval: Duration,
    pub channels: ChannelSettings,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            extension: DEFAULT_EXTENSION.to_string(),
            watch_interval: Duration::from_secs(DEFAULT_WATCH_INTERVAL_SECS),
            heatmap_interval: Duration::from_secs(DEFAULT_HEATMAP_INTERVAL_MINUTES * 60),
            channels: ChannelSettings::default(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `plate-view.json` in the working directory when no
    /// path is given. Only the implicit file may be absent.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, PlateError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(ResolvedConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| PlateError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| PlateError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, PlateError> {
        let defaults = ResolvedConfig::default();

        let extension = match config.extension {
            Some(ext) => {
                let ext = ext.trim().trim_start_matches('.').to_string();
                if ext.is_empty() {
                    return Err(PlateError::ConfigParse("extension must not be empty".to_string()));
                }
                ext
            }
            None => defaults.extension,
        };

        let watch_interval = match config.watch_interval_secs {
            Some(0) => {
                return Err(PlateError::ConfigParse(
                    "watch_interval_secs must be positive".to_string(),
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.watch_interval,
        };

        let heatmap_interval = match config.heatmap_interval_minutes {
            Some(minutes) => heatmap_interval(minutes)?,
            None => defaults.heatmap_interval,
        };

        let mut channels = defaults.channels;
        for (channel, entry) in config.channels {
            if let Some(bounds) = entry.bounds {
                channels.bounds.insert(channel, range(channel, "bounds", bounds)?);
            }
            if let Some(highlight) = entry.highlight {
                channels
                    .highlight
                    .insert(channel, range(channel, "highlight", highlight)?);
            }
        }

        Ok(ResolvedConfig {
            extension,
            watch_interval,
            heatmap_interval,
            channels,
        })
    }
}

/// Converts a heatmap interval in minutes, rejecting zero and values too
/// large to express in seconds.
pub fn heatmap_interval(minutes: u64) -> Result<Duration, PlateError> {
    if minutes == 0 {
        return Err(PlateError::ConfigParse(
            "heatmap interval must be positive".to_string(),
        ));
    }
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| {
            PlateError::ConfigParse(format!("heatmap interval of {minutes} minutes is too large"))
        })
}

fn range(channel: HeatChannel, field: &str, [min, max]: [f64; 2]) -> Result<ClipRange, PlateError> {
    if !min.is_finite() || !max.is_finite() || min > max {
        return Err(PlateError::ConfigParse(format!(
            "{field} for {channel} must be an ordered [min, max] pair"
        )));
    }
    Ok(ClipRange::new(min, max))
}
