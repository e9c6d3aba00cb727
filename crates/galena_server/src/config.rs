use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::permissions::Rank;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    /// Broadcast tick interval in milliseconds.
    pub broadcast_interval_ms: u64,
    /// Maximum packed changes shipped per level per broadcast tick.
    pub broadcast_batch_size: usize,
    /// Change-log cache size that triggers a background flush.
    pub flush_threshold: usize,
    /// Bounded wait for the flush lock; a timed-out flush is retried later.
    pub flush_lock_timeout_ms: u64,
    pub physics_interval_ms: u64,
    /// Cells changed by one draw operation beyond which observers should
    /// resend the whole level instead of applying deltas.
    pub reload_threshold: u64,
    pub default_draw_limit: u64,
    /// Upper bound on cells per level, whatever the axis split.
    pub max_volume: u64,
    pub autosave_secs: u64,
    /// Per-block minimum-rank overrides applied to every level.
    pub block_ranks: Vec<BlockRankSpec>,
    pub levels: Vec<LevelSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockRankSpec {
    pub id: u16,
    pub place: Option<Rank>,
    pub delete: Option<Rank>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LevelSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub length: u32,
    #[serde(default = "default_true")]
    pub physics: bool,
    #[serde(default)]
    pub zones: Vec<ZoneSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneSpec {
    pub name: String,
    pub min: [i32; 3],
    pub max: [i32; 3],
    pub required: Rank,
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            broadcast_interval_ms: 100,
            broadcast_batch_size: 256,
            flush_threshold: 1024,
            flush_lock_timeout_ms: 50,
            physics_interval_ms: 50,
            reload_threshold: 10_000,
            default_draw_limit: 32_768,
            max_volume: 512 * 512 * 512,
            autosave_secs: 300,
            block_ranks: Vec::new(),
            levels: vec![LevelSpec {
                name: "main".to_string(),
                width: 128,
                height: 64,
                length: 128,
                physics: true,
                zones: Vec::new(),
            }],
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to parse config {}: {err}", path.display()),
            )
        })
    }

    /// Load the config file if present, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> io::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::ServerConfig;
    use crate::permissions::Rank;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.broadcast_interval_ms, 100);
        assert_eq!(config.levels.len(), 1);
        assert!(config.levels[0].physics);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            broadcast_batch_size = 64

            [[block_ranks]]
            id = 46
            place = "operator"

            [[levels]]
            name = "arena"
            width = 64
            height = 32
            length = 64
            physics = false

            [[levels.zones]]
            name = "spawn"
            min = [0, 0, 0]
            max = [15, 31, 15]
            required = "operator"
            "#,
        )
        .expect("parse config");

        assert_eq!(config.broadcast_batch_size, 64);
        assert_eq!(config.broadcast_interval_ms, 100);
        assert_eq!(config.block_ranks.len(), 1);
        assert_eq!(config.block_ranks[0].place, Some(Rank::Operator));
        assert_eq!(config.block_ranks[0].delete, None);
        assert_eq!(config.levels.len(), 1);
        let level = &config.levels[0];
        assert_eq!(level.name, "arena");
        assert!(!level.physics);
        assert_eq!(level.zones[0].required, Rank::Operator);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ServerConfig::load_or_default(Path::new("/nonexistent/galena.toml"))
            .expect("fallback to defaults");
        assert_eq!(config.flush_threshold, 1024);
    }
}
