use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::NewPlayerTemplate;

/// Number of land tiers; `land_level` is always `< LAND_TIERS`.
pub const LAND_TIERS: usize = 5;

/// Nominal maturity marker for an unplanted plot.
pub const EMPTY_PLOT_MAX_GROW_TIME: u64 = 3;

/// One unit of farmable land. Position in [`PlayerRecord::land`] identifies the physical plot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandPlot {
    #[serde(default)]
    pub dug: bool,
    #[serde(default)]
    pub planted: bool,
    #[serde(default)]
    pub dead: bool,
    #[serde(default)]
    pub crop_type: String,
    #[serde(default)]
    pub grow_time: u64,
    #[serde(default = "default_max_grow_time")]
    pub max_grow_time: u64,
    /// Tier 0..=4; each tier adds a fixed per-tick growth bonus.
    #[serde(default)]
    pub land_level: u8,
    #[serde(default)]
    pub watered: bool,
    #[serde(default)]
    pub fertilized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fertilize_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fertilize_duration: u64,
    #[serde(default)]
    pub fertilize_bonus: u64,
}

fn default_max_grow_time() -> u64 {
    EMPTY_PLOT_MAX_GROW_TIME
}

impl Default for LandPlot {
    fn default() -> Self {
        Self {
            dug: false,
            planted: false,
            dead: false,
            crop_type: String::new(),
            grow_time: 0,
            max_grow_time: EMPTY_PLOT_MAX_GROW_TIME,
            land_level: 0,
            watered: false,
            fertilized: false,
            fertilize_started_at: None,
            fertilize_duration: 0,
            fertilize_bonus: 0,
        }
    }
}

impl LandPlot {
    /// A freshly dug plot with nothing in it.
    pub fn dug_empty() -> Self {
        Self {
            dug: true,
            ..Self::default()
        }
    }

    /// True when the tick engine still has work to do on this plot.
    pub fn is_growing(&self) -> bool {
        self.dug && self.planted && !self.dead && self.grow_time < self.max_grow_time
    }

    pub fn is_mature(&self) -> bool {
        self.planted && !self.dead && self.grow_time >= self.max_grow_time
    }

    pub fn clear_fertilizer(&mut self) {
        self.fertilized = false;
        self.fertilize_started_at = None;
        self.fertilize_duration = 0;
        self.fertilize_bonus = 0;
    }

    /// Put `crop` in the ground with zero accumulated growth.
    pub fn plant(&mut self, crop: &str, max_grow_time: u64) {
        self.planted = true;
        self.dead = false;
        self.crop_type = crop.to_string();
        self.grow_time = 0;
        self.max_grow_time = max_grow_time.max(1);
    }

    /// Back to dug-but-empty, keeping the tier.
    pub fn clear_crop(&mut self) {
        self.planted = false;
        self.dead = false;
        self.crop_type.clear();
        self.grow_time = 0;
        self.max_grow_time = EMPTY_PLOT_MAX_GROW_TIME;
        self.watered = false;
        self.clear_fertilizer();
    }
}

/// Bookkeeping for special-farm accounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    /// Local wall-clock time of the last planting, `%Y-%m-%d %H:%M:%S`.
    #[serde(default)]
    pub last_maintenance_timestamp: String,
}

impl MaintenanceRecord {
    pub fn maintained_on(&self, date: &str) -> bool {
        !self.last_maintenance_timestamp.is_empty()
            && self.last_maintenance_timestamp.starts_with(date)
    }
}

/// The tree every farm carries. Health drains while chores go undone; at zero it is dead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WisdomTree {
    pub health: u32,
    pub max_health: u32,
    pub last_weeded_at: DateTime<Utc>,
    pub last_pest_control_at: DateTime<Utc>,
}

impl WisdomTree {
    pub fn new(max_health: u32, now: DateTime<Utc>) -> Self {
        Self {
            health: max_health,
            max_health,
            last_weeded_at: now,
            last_pest_control_at: now,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.health == 0
    }
}

/// Durable per-account document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub account_id: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub farm_name: String,
    /// Argon2 PHC string; `None` for accounts that cannot log in (special farms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub experience: u64,
    #[serde(default)]
    pub money: u64,
    pub registered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_play_secs: u64,
    #[serde(default)]
    pub land: Vec<LandPlot>,
    #[serde(default)]
    pub seeds: HashMap<String, u32>,
    #[serde(default)]
    pub items: HashMap<String, u32>,
    #[serde(default)]
    pub pets: HashMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wisdom_tree: Option<WisdomTree>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance: Option<MaintenanceRecord>,
    /// Marker bumped by the tick engine and every save.
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency counter, incremented by the store on each write.
    #[serde(default)]
    pub revision: u64,
}

fn default_level() -> u32 {
    1
}

impl PlayerRecord {
    /// Minimal record with `plot_count` untouched plots.
    pub fn new(account_id: &str, plot_count: usize, now: DateTime<Utc>) -> Self {
        Self {
            account_id: account_id.to_string(),
            nickname: account_id.to_string(),
            farm_name: String::new(),
            password_hash: None,
            level: 1,
            experience: 0,
            money: 0,
            registered_at: now,
            last_login: None,
            total_play_secs: 0,
            land: vec![LandPlot::default(); plot_count],
            seeds: HashMap::new(),
            items: HashMap::new(),
            pets: HashMap::new(),
            wisdom_tree: None,
            maintenance: None,
            updated_at: now,
            revision: 0,
        }
    }

    /// First-login record built from the configured template.
    pub fn from_template(account_id: &str, template: &NewPlayerTemplate, now: DateTime<Utc>) -> Self {
        let mut record = Self::new(account_id, template.plot_count, now);
        for plot in record.land.iter_mut().take(template.dug_plots) {
            plot.dug = true;
        }
        record.money = template.starting_money;
        record.seeds = template.starting_seeds.clone();
        record.farm_name = format!("{}'s farm", account_id);
        record.wisdom_tree = Some(WisdomTree::new(template.wisdom_tree_health, now));
        record
    }

    /// New-player growth bonus applies while `now - registered_at < window_secs`.
    pub fn is_new_player(&self, now: DateTime<Utc>, window_secs: u64) -> bool {
        let age = now.signed_duration_since(self.registered_at).num_seconds();
        age >= 0 && (age as u64) < window_secs
    }

    pub fn has_growing_plot(&self) -> bool {
        self.land.iter().any(LandPlot::is_growing)
    }

    /// Visitor-safe view: no credentials, no inventories beyond seeds.
    pub fn public_view(&self) -> PublicFarmView {
        PublicFarmView {
            account_id: self.account_id.clone(),
            nickname: self.nickname.clone(),
            farm_name: self.farm_name.clone(),
            level: self.level,
            experience: self.experience,
            money: self.money,
            farm_lots: self.land.clone(),
            last_login: self.last_login,
            total_play_secs: self.total_play_secs,
            wisdom_tree: self.wisdom_tree.clone(),
        }
    }
}

/// What another player sees when spectating a farm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicFarmView {
    pub account_id: String,
    pub nickname: String,
    pub farm_name: String,
    pub level: u32,
    pub experience: u64,
    pub money: u64,
    pub farm_lots: Vec<LandPlot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    pub total_play_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wisdom_tree: Option<WisdomTree>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growing_requires_dug_planted_alive_and_immature() {
        let mut plot = LandPlot::dug_empty();
        assert!(!plot.is_growing());
        plot.plant("wheat", 10);
        assert!(plot.is_growing());
        plot.dead = true;
        assert!(!plot.is_growing());
        plot.dead = false;
        plot.grow_time = 10;
        assert!(!plot.is_growing());
        assert!(plot.is_mature());
    }

    #[test]
    fn record_deserializes_with_missing_optional_fields() {
        let json = r#"{
            "account_id": "u1",
            "registered_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
            "land": [{"dug": true}]
        }"#;
        let record: PlayerRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.level, 1);
        assert_eq!(record.land[0].max_grow_time, EMPTY_PLOT_MAX_GROW_TIME);
        assert!(record.maintenance.is_none());
        assert_eq!(record.revision, 0);
    }

    #[test]
    fn maintenance_date_prefix_match() {
        let m = MaintenanceRecord {
            last_maintenance_timestamp: "2024-05-06 00:00:12".into(),
        };
        assert!(m.maintained_on("2024-05-06"));
        assert!(!m.maintained_on("2024-05-07"));
        assert!(!MaintenanceRecord::default().maintained_on("2024-05-06"));
    }
}
