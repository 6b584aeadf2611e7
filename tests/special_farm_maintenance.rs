use std::sync::Arc;

use chrono::{Datelike, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;

use sproutfarm::admin::seed_special_farms;
use sproutfarm::config::Config;
use sproutfarm::engine::{AccountLocks, MaintenanceError, MaintenanceOutcome, MaintenanceScheduler};
use sproutfarm::storage::StorageGateway;

mod common;
use common::{local_day, memory_storage, test_config};

fn scheduler(storage: StorageGateway, config: &Config) -> MaintenanceScheduler {
    MaintenanceScheduler::detached(
        storage,
        Arc::new(AccountLocks::new()),
        config.special_farms.clone(),
        config.crops.clone(),
        config.maintenance.clone(),
    )
    .with_rng(StdRng::seed_from_u64(7))
}

async fn seeded() -> (StorageGateway, Config) {
    let config = test_config();
    let storage = memory_storage();
    seed_special_farms(&storage, &config, Utc::now()).await.unwrap();
    (storage, config)
}

fn outcome<'a>(
    report: &'a [(String, Result<MaintenanceOutcome, MaintenanceError>)],
    name: &str,
) -> &'a Result<MaintenanceOutcome, MaintenanceError> {
    &report.iter().find(|(n, _)| n == name).expect("farm in report").1
}

#[tokio::test]
async fn second_run_same_day_is_a_no_op() {
    let (storage, config) = seeded().await;
    let mut scheduler = scheduler(storage.clone(), &config);
    let monday = local_day(0, 0, 0, 30);

    let first = scheduler.run_all(monday).await;
    assert!(matches!(
        outcome(&first, "Wheat Valley"),
        Ok(MaintenanceOutcome::Planted { planted: 40 })
    ));
    let before = storage.load("special_wheat").await.unwrap().unwrap();
    assert_eq!(
        before.maintenance.as_ref().unwrap().last_maintenance_timestamp,
        "2024-05-06 00:00:30"
    );

    let second = scheduler.run_all(local_day(0, 18, 0, 0)).await;
    for (name, result) in &second {
        assert!(
            matches!(
                result,
                Ok(MaintenanceOutcome::AlreadyMaintained) | Ok(MaintenanceOutcome::NotScheduledToday)
            ),
            "{name} replanted twice: {result:?}"
        );
    }
    let after = storage.load("special_wheat").await.unwrap().unwrap();
    assert_eq!(after.revision, before.revision);
    assert_eq!(after.land, before.land);
}

#[tokio::test]
async fn weekday_gating_over_a_full_week() {
    let (storage, config) = seeded().await;
    let mut scheduler = scheduler(storage, &config);

    for day in 0..7 {
        let now = local_day(day, 0, 1, 0);
        let report = scheduler.run_all(now).await;
        assert_eq!(report.len(), config.special_farms.len());
        for farm in &config.special_farms {
            let result = outcome(&report, &farm.name);
            if farm.runs_on(now.weekday()) {
                assert!(
                    matches!(result, Ok(MaintenanceOutcome::Planted { .. })),
                    "{} should run on {:?}: {:?}",
                    farm.name,
                    now.weekday(),
                    result
                );
            } else {
                assert!(
                    matches!(result, Ok(MaintenanceOutcome::NotScheduledToday)),
                    "{} should skip {:?}",
                    farm.name,
                    now.weekday()
                );
            }
        }
    }
}

#[tokio::test]
async fn bounded_farm_plants_a_subset_of_forty_plots() {
    let (storage, config) = seeded().await;
    let lucky = config
        .special_farms
        .iter()
        .find(|f| f.name == "Lucky Farm")
        .unwrap()
        .clone();
    let mut scheduler = scheduler(storage.clone(), &config);

    let result = scheduler.maintain("Lucky Farm", local_day(0, 0, 5, 0), false).await;
    let Ok(MaintenanceOutcome::Planted { planted }) = result else {
        panic!("expected planting, got {result:?}");
    };
    assert!((1..=40).contains(&planted));

    let record = storage.load(&lucky.account_id).await.unwrap().unwrap();
    assert_eq!(record.land.len(), 40);
    assert!(record.land.iter().all(|p| p.dug));
    let planted_plots: Vec<_> = record.land.iter().filter(|p| p.planted).collect();
    assert_eq!(planted_plots.len(), planted);
    for plot in planted_plots {
        assert!(lucky.crops.contains(&plot.crop_type));
        assert_eq!(plot.grow_time, 0);
        assert_eq!(plot.max_grow_time, config.crops[&plot.crop_type].grow_time);
    }
    for plot in record.land.iter().filter(|p| !p.planted) {
        assert!(plot.crop_type.is_empty());
    }
}

#[tokio::test]
async fn random_farm_plants_every_plot_from_its_set() {
    let (storage, config) = seeded().await;
    let mut scheduler = scheduler(storage.clone(), &config);

    scheduler
        .maintain("special_hybrid", local_day(2, 9, 0, 0), false)
        .await
        .unwrap();
    let record = storage.load("special_hybrid").await.unwrap().unwrap();
    assert!(record.land.iter().all(|p| p.planted
        && (p.crop_type == "hybrid_tree_1" || p.crop_type == "hybrid_tree_2")));
}

#[tokio::test]
async fn manual_run_respects_daily_guard_unless_forced() {
    let (storage, config) = seeded().await;
    let mut scheduler = scheduler(storage, &config);
    // Tuesday is not a Lucky Farm day, but manual runs ignore the weekday
    let tuesday = local_day(1, 10, 0, 0);

    let first = scheduler.maintain("Lucky Farm", tuesday, false).await.unwrap();
    assert!(matches!(first, MaintenanceOutcome::Planted { .. }));
    let guarded = scheduler.maintain("Lucky Farm", tuesday, false).await.unwrap();
    assert_eq!(guarded, MaintenanceOutcome::AlreadyMaintained);
    let forced = scheduler.maintain("Lucky Farm", tuesday, true).await.unwrap();
    assert!(matches!(forced, MaintenanceOutcome::Planted { .. }));
}

#[tokio::test]
async fn unknown_farm_and_missing_account_are_errors() {
    let config = test_config();
    let mut scheduler = scheduler(memory_storage(), &config);
    let now = local_day(0, 1, 0, 0);

    let err = scheduler.maintain("Nowhere", now, false).await.unwrap_err();
    assert!(matches!(err, MaintenanceError::UnknownFarm(_)));

    // nothing seeded
    let err = scheduler.maintain("Wheat Valley", now, false).await.unwrap_err();
    assert!(matches!(err, MaintenanceError::MissingAccount(ref id) if id == "special_wheat"));

    // one farm failing does not stop the rest of the pass
    let report = scheduler.run_all(now).await;
    assert_eq!(report.len(), config.special_farms.len());
}

#[tokio::test]
async fn poll_runs_only_on_date_rollover() {
    let (storage, config) = seeded().await;
    let mut scheduler = scheduler(storage.clone(), &config);

    assert!(scheduler.poll(local_day(0, 23, 58, 0)).await.is_none());
    assert!(scheduler.poll(local_day(0, 23, 59, 0)).await.is_none());
    let report = scheduler.poll(local_day(1, 0, 0, 0)).await.expect("rollover run");
    assert!(matches!(
        outcome(&report, "Fruit Farm"),
        Ok(MaintenanceOutcome::Planted { .. })
    ));
    assert!(scheduler.poll(local_day(1, 0, 1, 0)).await.is_none());
}

#[tokio::test]
async fn startup_check_catches_up_and_stays_idempotent() {
    let (storage, config) = seeded().await;
    let mut scheduler = scheduler(storage.clone(), &config);
    let report = scheduler.startup_check(local_day(0, 7, 0, 0)).await;
    assert!(matches!(
        outcome(&report, "Hybrid Farm"),
        Ok(MaintenanceOutcome::Planted { .. })
    ));

    // a restart later the same day
    let mut restarted = MaintenanceScheduler::detached(
        storage,
        Arc::new(AccountLocks::new()),
        config.special_farms.clone(),
        config.crops.clone(),
        config.maintenance.clone(),
    );
    let report = restarted.startup_check(local_day(0, 8, 0, 0)).await;
    assert!(matches!(
        outcome(&report, "Hybrid Farm"),
        Ok(MaintenanceOutcome::AlreadyMaintained)
    ));
}
