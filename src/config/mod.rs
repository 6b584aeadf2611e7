//! # Configuration Management Module
//!
//! Centralised, typed configuration for the farm server, loaded from a TOML file
//! at startup and treated as read-only afterwards.
//!
//! ## Configuration Structure
//!
//! - [`ServerConfig`] - listener address, idle timeout, frame limits
//! - [`StorageConfig`] - player record backend and data directory
//! - [`LoggingConfig`] - log level and optional log file
//! - [`GrowthPolicy`] - accrual constants used by the world tick
//! - [`TickConfig`] - online tick cadence, offline sweep sizing, accrual backlog
//! - [`WisdomTreePolicy`] - wisdom tree decay and care
//! - [`MaintenanceConfig`] - special farm scheduler switches
//! - [`NewPlayerTemplate`] - shape of a record created on first login
//! - [`CropCatalog`] - crop name to maturity time
//! - [`SpecialFarmConfig`] - showcase accounts maintained automatically
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sproutfarm::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Listening on {}", config.server.bind_addr());
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 4040
//! idle_timeout_secs = 30
//!
//! [growth]
//! base_increment = 1
//! new_player_bonus = 9
//! land_level_bonus = [0, 1, 3, 6, 10]
//!
//! [tick]
//! online_interval_ms = 1000
//! offline_sweep_secs = 5
//! sweep_limit = 5000
//! max_backlog_secs = 86400
//!
//! [crops.wheat]
//! grow_time = 600
//!
//! [[special_farms]]
//! name = "Wheat Valley"
//! account_id = "special_wheat"
//! crops = ["wheat"]
//! policy = "single-crop"
//! ```
//!
//! A file that fails [`Config::validate`] halts startup.

use anyhow::{anyhow, bail, Result};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::fs;

use crate::farm::LAND_TIERS;
use crate::validation::validate_account_id;

/// Crop name to maturity settings.
pub type CropCatalog = BTreeMap<String, CropSpec>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub growth: GrowthPolicy,
    #[serde(default)]
    pub tick: TickConfig,
    #[serde(default)]
    pub wisdom_tree: WisdomTreePolicy,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub new_player: NewPlayerTemplate,
    #[serde(default = "default_crops")]
    pub crops: CropCatalog,
    #[serde(default)]
    pub special_farms: Vec<SpecialFarmConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds of silence before a `ping`; a second silent period disconnects.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Largest frame (and therefore per-connection buffer) accepted before a newline.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_read_buffer_bytes")]
    pub read_buffer_bytes: usize,
}

fn default_idle_timeout_secs() -> u64 {
    30
}

fn default_max_frame_bytes() -> usize {
    64 * 1024
}

fn default_read_buffer_bytes() -> usize {
    4096
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Embedded sled database under `data_dir/players`.
    Sled,
    /// One JSON document per account under `data_dir/game_saves`.
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    pub data_dir: String,
}

fn default_backend() -> StorageBackend {
    StorageBackend::Sled
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Growth accrual constants. See [`crate::farm::growth`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrowthPolicy {
    pub base_increment: u64,
    pub new_player_bonus: u64,
    /// New-player bonus applies while account age is below this many seconds.
    pub new_player_window_secs: u64,
    /// Extra growth per tick, indexed by land tier.
    pub land_level_bonus: [u64; LAND_TIERS],
    /// Duration granted by a `fertilize_crop` action.
    pub fertilizer_duration_secs: u64,
    /// Bonus granted by a `fertilize_crop` action.
    pub fertilizer_bonus: u64,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            base_increment: 1,
            new_player_bonus: 9,
            new_player_window_secs: 3 * 24 * 60 * 60,
            land_level_bonus: [0, 1, 3, 6, 10],
            fertilizer_duration_secs: 600,
            fertilizer_bonus: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickConfig {
    pub online_interval_ms: u64,
    pub offline_sweep_secs: u64,
    /// Upper bound on records fetched by one offline sweep query.
    pub sweep_limit: usize,
    /// Most growth time a record can be owed. Only gaps longer than this
    /// (server downtime) lose ticks.
    #[serde(default = "default_max_backlog_secs")]
    pub max_backlog_secs: u64,
}

const MAX_BACKLOG_LIMIT_SECS: u64 = 365 * 24 * 60 * 60;

fn default_max_backlog_secs() -> u64 {
    24 * 60 * 60
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            online_interval_ms: 1000,
            offline_sweep_secs: 5,
            sweep_limit: 5000,
            max_backlog_secs: default_max_backlog_secs(),
        }
    }
}

/// Health rules for the wisdom tree every farm carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WisdomTreePolicy {
    /// Days a chore (weeding, pest control) may be skipped before health drains.
    pub neglect_days: i64,
    /// Health lost per neglected day, drawn uniformly from `min..=max`.
    pub decay_per_day_min: u32,
    pub decay_per_day_max: u32,
    pub weed_heal: u32,
    pub pest_control_heal: u32,
}

impl Default for WisdomTreePolicy {
    fn default() -> Self {
        Self {
            neglect_days: 3,
            decay_per_day_min: 1,
            decay_per_day_max: 3,
            weed_heal: 10,
            pest_control_heal: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    /// Seconds between date-rollover checks.
    pub poll_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_secs: 60,
        }
    }
}

/// Shape of the record created the first time an account logs in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlayerTemplate {
    pub plot_count: usize,
    /// Leading plots that start out dug.
    pub dug_plots: usize,
    pub starting_money: u64,
    #[serde(default)]
    pub starting_seeds: HashMap<String, u32>,
    #[serde(default = "default_wisdom_tree_health")]
    pub wisdom_tree_health: u32,
}

fn default_wisdom_tree_health() -> u32 {
    100
}

impl Default for NewPlayerTemplate {
    fn default() -> Self {
        let mut starting_seeds = HashMap::new();
        starting_seeds.insert("wheat".to_string(), 10);
        Self {
            plot_count: 40,
            dug_plots: 20,
            starting_money: 4000,
            starting_seeds,
            wisdom_tree_health: default_wisdom_tree_health(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropSpec {
    /// Seconds of accrued growth needed to mature.
    pub grow_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlantingPolicy {
    /// Every plot gets the first crop of the set.
    SingleCrop,
    /// Every plot gets an independently drawn crop.
    RandomFromSet,
    /// A random number of plots in `1..=min(80, plots)` get random crops; the rest stay empty.
    BoundedRandomCount,
}

/// One showcase account kept planted by the maintenance scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialFarmConfig {
    pub name: String,
    pub account_id: String,
    pub crops: Vec<String>,
    pub policy: PlantingPolicy,
    /// Days maintenance may run; empty means every day.
    #[serde(default)]
    pub weekdays: Vec<Weekday>,
    #[serde(default)]
    pub description: String,
}

impl SpecialFarmConfig {
    pub fn runs_on(&self, day: Weekday) -> bool {
        self.weekdays.is_empty() || self.weekdays.contains(&day)
    }
}

fn default_crops() -> CropCatalog {
    [
        ("wheat", 600),
        ("rice", 600),
        ("cucumber", 1800),
        ("gourd", 2400),
        ("watermelon", 3600),
        ("pumpkin", 3600),
        ("cantaloupe", 3600),
        ("pineapple", 5400),
        ("mango", 5400),
        ("dragon_fruit", 7200),
        ("tulip", 1800),
        ("morning_glory", 1200),
        ("lily", 2400),
        ("gardenia", 2400),
        ("rose", 3600),
        ("sunflower", 1800),
        ("saffron", 7200),
        ("lucky_clover", 10800),
        ("lucky_flower", 10800),
        ("hybrid_tree_1", 21600),
        ("hybrid_tree_2", 21600),
    ]
    .into_iter()
    .map(|(name, grow_time)| (name.to_string(), CropSpec { grow_time }))
    .collect()
}

fn default_special_farms() -> Vec<SpecialFarmConfig> {
    use Weekday::*;
    let farm = |name: &str,
                account_id: &str,
                crops: &[&str],
                policy: PlantingPolicy,
                weekdays: &[Weekday],
                description: &str| SpecialFarmConfig {
        name: name.to_string(),
        account_id: account_id.to_string(),
        crops: crops.iter().map(|c| c.to_string()).collect(),
        policy,
        weekdays: weekdays.to_vec(),
        description: description.to_string(),
    };
    vec![
        farm(
            "Hybrid Farm",
            "special_hybrid",
            &["hybrid_tree_1", "hybrid_tree_2"],
            PlantingPolicy::RandomFromSet,
            &[],
            "Grows nothing but hybrid trees",
        ),
        farm(
            "Flower Farm",
            "special_flower",
            &[
                "tulip",
                "morning_glory",
                "lily",
                "gardenia",
                "rose",
                "sunflower",
                "saffron",
                "lucky_flower",
            ],
            PlantingPolicy::RandomFromSet,
            &[Mon, Wed, Fri, Sun],
            "A riot of flowers",
        ),
        farm(
            "Fruit Farm",
            "special_fruit",
            &[
                "watermelon",
                "pumpkin",
                "cantaloupe",
                "gourd",
                "cucumber",
                "dragon_fruit",
                "pineapple",
                "mango",
            ],
            PlantingPolicy::RandomFromSet,
            &[Tue, Thu, Sat],
            "Melons and fruit",
        ),
        farm(
            "Wheat Valley",
            "special_wheat",
            &["wheat"],
            PlantingPolicy::SingleCrop,
            &[],
            "Wall-to-wall wheat",
        ),
        farm(
            "Rice Fragrance",
            "special_rice",
            &["rice"],
            PlantingPolicy::SingleCrop,
            &[],
            "Wall-to-wall rice",
        ),
        farm(
            "Lucky Farm",
            "special_lucky",
            &["lucky_clover", "lucky_flower"],
            PlantingPolicy::BoundedRandomCount,
            &[Mon],
            "A handful of lucky plants",
        ),
    ]
}

impl Config {
    /// Load configuration from a file and validate it.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config
            .validate()
            .map_err(|e| anyhow!("Invalid config file {}: {}", path, e))?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.idle_timeout_secs == 0 {
            bail!("server.idle_timeout_secs must be > 0");
        }
        if self.server.max_frame_bytes < 256 {
            bail!("server.max_frame_bytes must be at least 256");
        }
        if self.server.read_buffer_bytes == 0 {
            bail!("server.read_buffer_bytes must be > 0");
        }
        if self.tick.online_interval_ms == 0 || self.tick.offline_sweep_secs == 0 {
            bail!("tick intervals must be > 0");
        }
        if self.tick.sweep_limit == 0 {
            bail!("tick.sweep_limit must be > 0");
        }
        if self.tick.max_backlog_secs.saturating_mul(1000) < self.tick.online_interval_ms {
            bail!("tick.max_backlog_secs must cover at least one online tick");
        }
        if self.tick.max_backlog_secs > MAX_BACKLOG_LIMIT_SECS {
            bail!("tick.max_backlog_secs must be at most {} (one year)", MAX_BACKLOG_LIMIT_SECS);
        }
        let tree = &self.wisdom_tree;
        if tree.neglect_days <= 0 {
            bail!("wisdom_tree.neglect_days must be > 0");
        }
        if tree.decay_per_day_min > tree.decay_per_day_max {
            bail!(
                "wisdom_tree.decay_per_day_min ({}) exceeds decay_per_day_max ({})",
                tree.decay_per_day_min,
                tree.decay_per_day_max
            );
        }
        if self.maintenance.poll_secs == 0 {
            bail!("maintenance.poll_secs must be > 0");
        }
        if self.new_player.dug_plots > self.new_player.plot_count {
            bail!(
                "new_player.dug_plots ({}) exceeds plot_count ({})",
                self.new_player.dug_plots,
                self.new_player.plot_count
            );
        }
        for (name, spec) in &self.crops {
            if spec.grow_time == 0 {
                bail!("crop '{}' has grow_time 0", name);
            }
        }

        let mut names = HashSet::new();
        let mut accounts = HashSet::new();
        for farm in &self.special_farms {
            if !names.insert(farm.name.as_str()) {
                bail!("duplicate special farm name '{}'", farm.name);
            }
            if !accounts.insert(farm.account_id.as_str()) {
                bail!("special farm account '{}' is used twice", farm.account_id);
            }
            validate_account_id(&farm.account_id)
                .map_err(|e| anyhow!("special farm '{}': {}", farm.name, e))?;
            if farm.crops.is_empty() {
                bail!("special farm '{}' has no crops", farm.name);
            }
            if let Some(missing) = farm.crops.iter().find(|c| !self.crops.contains_key(*c)) {
                bail!(
                    "special farm '{}' references unknown crop '{}'",
                    farm.name,
                    missing
                );
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 4040,
                idle_timeout_secs: default_idle_timeout_secs(),
                max_frame_bytes: default_max_frame_bytes(),
                read_buffer_bytes: default_read_buffer_bytes(),
            },
            storage: StorageConfig {
                backend: StorageBackend::Sled,
                data_dir: "./data".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("sproutfarm.log".to_string()),
            },
            growth: GrowthPolicy::default(),
            tick: TickConfig::default(),
            wisdom_tree: WisdomTreePolicy::default(),
            maintenance: MaintenanceConfig::default(),
            new_player: NewPlayerTemplate::default(),
            crops: default_crops(),
            special_farms: default_special_farms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.special_farms.len(), 6);
        assert_eq!(config.server.bind_addr(), "0.0.0.0:4040");
    }

    #[test]
    fn default_config_roundtrips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.growth, config.growth);
        assert_eq!(parsed.wisdom_tree, config.wisdom_tree);
        assert_eq!(parsed.special_farms[5].weekdays, vec![Weekday::Mon]);
        assert_eq!(
            parsed.special_farms[5].policy,
            PlantingPolicy::BoundedRandomCount
        );
    }

    #[test]
    fn minimal_file_fills_defaults() {
        let text = r#"
            [server]
            host = "127.0.0.1"
            port = 5000

            [storage]
            data_dir = "/tmp/farm"

            [logging]
            level = "debug"

            [[special_farms]]
            name = "Wheat"
            account_id = "special_wheat"
            crops = ["wheat"]
            policy = "single-crop"
            weekdays = ["Tue", "Thursday", "sat"]
        "#;
        let config: Config = toml::from_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Sled);
        assert_eq!(config.server.idle_timeout_secs, 30);
        assert_eq!(config.growth.land_level_bonus[2], 3);
        assert_eq!(config.tick.max_backlog_secs, 86_400);
        assert_eq!(config.wisdom_tree.neglect_days, 3);
        assert_eq!(config.new_player.wisdom_tree_health, 100);
        let farm = &config.special_farms[0];
        assert!(farm.runs_on(Weekday::Thu));
        assert!(!farm.runs_on(Weekday::Mon));
    }

    #[test]
    fn empty_weekdays_means_every_day() {
        let farm = &Config::default().special_farms[0];
        for day in [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ] {
            assert!(farm.runs_on(day));
        }
    }

    #[test]
    fn unknown_special_crop_is_rejected() {
        let mut config = Config::default();
        config.special_farms[0].crops.push("moon_melon".into());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("moon_melon"), "{err}");
    }

    #[test]
    fn inverted_decay_range_is_rejected() {
        let mut config = Config::default();
        config.wisdom_tree.decay_per_day_min = 5;
        config.wisdom_tree.decay_per_day_max = 2;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("decay_per_day_min"), "{err}");
    }

    #[test]
    fn backlog_shorter_than_a_tick_is_rejected() {
        let mut config = Config::default();
        config.tick.online_interval_ms = 5000;
        config.tick.max_backlog_secs = 1;
        assert!(config.validate().is_err());
        config.tick.max_backlog_secs = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_special_account_is_rejected() {
        let mut config = Config::default();
        let dup = config.special_farms[0].account_id.clone();
        config.special_farms[1].account_id = dup;
        assert!(config.validate().is_err());
    }

    #[test]
    fn wrong_tier_count_fails_to_parse() {
        let text = r#"
            [server]
            host = "127.0.0.1"
            port = 5000
            [storage]
            data_dir = "d"
            [logging]
            level = "info"
            [growth]
            base_increment = 1
            new_player_bonus = 9
            new_player_window_secs = 10
            land_level_bonus = [0, 1, 2]
            fertilizer_duration_secs = 1
            fertilizer_bonus = 1
        "#;
        assert!(toml::from_str::<Config>(text).is_err());
    }
}
