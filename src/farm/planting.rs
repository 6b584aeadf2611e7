//! Mass-planting for special (showcase) farms.

use rand::seq::index::sample;
use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

use super::types::LandPlot;
use crate::config::{CropCatalog, PlantingPolicy, SpecialFarmConfig};

/// Upper bound on plots planted by [`PlantingPolicy::BoundedRandomCount`].
pub const BOUNDED_PLANT_MAX: usize = 80;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlantingError {
    #[error("special farm '{0}' has no crops configured")]
    EmptyCropSet(String),
    #[error("crop '{0}' is not in the crop catalog")]
    UnknownCrop(String),
    #[error("special farm '{0}' has no land")]
    NoLand(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlantingReport {
    pub planted: usize,
    pub left_empty: usize,
}

fn reset_planted(plot: &mut LandPlot, crop: &str, max_grow_time: u64) {
    *plot = LandPlot::dug_empty();
    plot.plant(crop, max_grow_time);
    plot.watered = true;
    plot.fertilized = true;
}

/// Reset every plot in `land` and plant it according to the farm's policy.
pub fn plant_special_farm<R: Rng>(
    land: &mut [LandPlot],
    farm: &SpecialFarmConfig,
    catalog: &CropCatalog,
    rng: &mut R,
) -> Result<PlantingReport, PlantingError> {
    if farm.crops.is_empty() {
        return Err(PlantingError::EmptyCropSet(farm.name.clone()));
    }
    if land.is_empty() {
        return Err(PlantingError::NoLand(farm.name.clone()));
    }
    let mut grow_times = Vec::with_capacity(farm.crops.len());
    for crop in &farm.crops {
        let spec = catalog
            .get(crop)
            .ok_or_else(|| PlantingError::UnknownCrop(crop.clone()))?;
        grow_times.push((crop.as_str(), spec.grow_time));
    }

    let plot_count = land.len();
    let selected: Vec<bool> = match farm.policy {
        PlantingPolicy::SingleCrop | PlantingPolicy::RandomFromSet => vec![true; plot_count],
        PlantingPolicy::BoundedRandomCount => {
            let target = rng.gen_range(1..=BOUNDED_PLANT_MAX.min(plot_count));
            let mut mask = vec![false; plot_count];
            for idx in sample(rng, plot_count, target) {
                mask[idx] = true;
            }
            mask
        }
    };

    let mut report = PlantingReport {
        planted: 0,
        left_empty: 0,
    };
    for (plot, plant_here) in land.iter_mut().zip(selected) {
        if !plant_here {
            *plot = LandPlot::dug_empty();
            report.left_empty += 1;
            continue;
        }
        let (crop, grow_time) = match farm.policy {
            PlantingPolicy::SingleCrop => grow_times[0],
            PlantingPolicy::RandomFromSet | PlantingPolicy::BoundedRandomCount => {
                // crops were checked non-empty above
                *grow_times.choose(rng).unwrap_or(&grow_times[0])
            }
        };
        reset_planted(plot, crop, grow_time);
        report.planted += 1;
    }
    Ok(report)
}
