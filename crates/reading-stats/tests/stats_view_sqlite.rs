use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use reading_stats::{
    DeviceId, Metric, MetricSeries, PendingReadingQueue, ReadingValues, SqliteStatsStore,
    StatsConfig, StatsError, StatsView,
};
use tempfile::tempdir;

async fn seeded_store(path: &std::path::Path, device: DeviceId) -> SqliteStatsStore {
    let store = SqliteStatsStore::new(path);
    store.init().await.expect("init storage");
    store.register_device(device).await.expect("register device");
    store
}

/// Records eight readings straight into the log and aggregates them the way
/// the batch process would.
async fn record_aggregated_history(store: &SqliteStatsStore, device: DeviceId) {
    let base = Utc
        .with_ymd_and_hms(2026, 4, 1, 0, 0, 0)
        .single()
        .expect("valid datetime");
    for minute in 0..8 {
        let reading = store
            .reserve_reading(
                device,
                base + Duration::minutes(minute),
                ReadingValues::new(20.0, 45.0, 80.0),
            )
            .await
            .expect("reserve reading");
        store.append_reading(&reading).await.expect("append reading");
    }

    for (metric, value) in [
        (Metric::Temperature, 20.0),
        (Metric::Humidity, 45.0),
        (Metric::BatteryCharge, 80.0),
    ] {
        store
            .upsert_series(&MetricSeries {
                device_id: device,
                metric,
                average: value,
                maximum: value,
                minimum: value,
            })
            .await
            .expect("upsert series");
    }
}

#[tokio::test]
async fn queued_readings_are_merged_until_the_batch_catches_up() {
    let dir = tempdir().expect("temp dir");
    let device = DeviceId::new(11);
    let store = Arc::new(seeded_store(&dir.path().join("stats.db"), device).await);
    record_aggregated_history(&store, device).await;

    let queue = Arc::new(PendingReadingQueue::new());
    let later = Utc
        .with_ymd_and_hms(2026, 4, 1, 1, 0, 0)
        .single()
        .expect("valid datetime");
    for (offset, temperature) in [(0, 30.0), (1, 40.0)] {
        let reading = store
            .reserve_reading(
                device,
                later + Duration::minutes(offset),
                ReadingValues::new(temperature, 50.0, 70.0),
            )
            .await
            .expect("reserve pending reading");
        queue.push(&reading);
    }

    let view = StatsView::new(store.clone(), store.clone(), queue.clone());

    let temperature = view
        .current_view(device, Metric::Temperature)
        .await
        .expect("temperature view");
    assert_eq!(temperature.average, 23.0);
    assert_eq!(temperature.maximum, 40.0);
    assert_eq!(temperature.minimum, 20.0);

    let all = view.current_views(device).await.expect("all views");
    assert_eq!(all.humidity.average, 46.0);
    assert_eq!(all.battery_charge.minimum, 70.0);

    // Persisted rows are untouched by the reads above.
    let persisted = view
        .persisted(device, Metric::Temperature)
        .await
        .expect("persisted view");
    assert_eq!(persisted.average, 20.0);
    assert_eq!(persisted.maximum, 20.0);

    // Losing the queue degrades the average instead of failing the read.
    queue.drain_through(device, u64::MAX);
    let degraded = view
        .current_view(device, Metric::Temperature)
        .await
        .expect("degraded view");
    assert_eq!(degraded.average, 16.0);
    assert_eq!(degraded.maximum, 20.0);
}

#[tokio::test]
async fn synchronized_device_returns_persisted_values() {
    let dir = tempdir().expect("temp dir");
    let device = DeviceId::new(12);
    let store = Arc::new(seeded_store(&dir.path().join("stats.db"), device).await);
    record_aggregated_history(&store, device).await;

    let view = StatsView::with_config(
        store.clone(),
        store.clone(),
        Arc::new(PendingReadingQueue::new()),
        &StatsConfig {
            fetch_timeout_ms: Some(500),
            ..StatsConfig::default()
        },
    );

    let all = view.current_views(device).await.expect("all views");
    let persisted = view.persisted_all(device).await.expect("persisted views");
    assert_eq!(all, persisted);
}

#[tokio::test]
async fn missing_rows_surface_as_record_not_found() {
    let dir = tempdir().expect("temp dir");
    let device = DeviceId::new(13);
    let store = Arc::new(seeded_store(&dir.path().join("stats.db"), device).await);
    let view = StatsView::new(
        store.clone(),
        store.clone(),
        Arc::new(PendingReadingQueue::new()),
    );

    assert!(matches!(
        view.current_view(device, Metric::Temperature).await,
        Err(StatsError::RecordNotFound { .. })
    ));

    store
        .upsert_series(&MetricSeries {
            device_id: DeviceId::new(14),
            metric: Metric::Temperature,
            average: 1.0,
            maximum: 1.0,
            minimum: 1.0,
        })
        .await
        .expect_err("series for an unregistered device violates the foreign key");

    assert!(matches!(
        view.current_view(DeviceId::new(99), Metric::Humidity).await,
        Err(StatsError::RecordNotFound { .. })
    ));
}
