use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use trip_logger_data_management::{TripPatch, TripStore};

use crate::{engine::SessionEngine, error::RecoverableError};

/// Periodic persistence of the in-progress record.
///
/// One coordinator exists per active session; `complete`/`cancel` drop
/// it unconditionally together with the other timers. A tick that finds
/// nothing dirty does not touch the store at all.
pub struct AutoSaveCoordinator {
    interval: Interval,
}

impl AutoSaveCoordinator {
    pub fn start(period: Duration) -> Self {
        // The first save is one full period after session start, not
        // immediately: the record was just created.
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    /// One save pass: persist when dirty, otherwise no-op. A failed
    /// attempt records a storage fault and leaves the dirty flag set so
    /// the next tick retries; the session itself keeps running.
    pub async fn save<S: TripStore>(&mut self, engine: &mut SessionEngine, store: &S) {
        if !engine.autosave_due() {
            return;
        }

        let Some(record) = engine.trip().cloned() else {
            return;
        };

        match store.update(record.trip_id, TripPatch::snapshot_of(&record)).await {
            Ok(()) => {
                engine.mark_saved();
                tracing::debug!(trip_id = record.trip_id, waypoints = record.waypoints.len(), "auto-saved trip");
            }
            Err(err) => {
                tracing::warn!(trip_id = record.trip_id, %err, "auto-save failed, will retry next tick");
                engine.record_error(RecoverableError::from_store(&err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use chrono::{TimeZone, Utc};
    use geo_types::Point;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trip_logger_data_management::{StoreError, database::db::SqliteTripStore};
    use trip_logger_lib::{fix::PositioningFix, trip::TripRecord};

    fn started_engine() -> SessionEngine {
        let mut engine = SessionEngine::new(&SessionConfig::default());
        let fix = PositioningFix::new(
            Point::new(139.7671, 35.6812),
            5.0,
            Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
        );
        engine.start_from_fix(fix.timestamp, fix).unwrap();
        engine
    }

    /// Store wrapper that counts update calls and can be switched to
    /// fail them.
    struct CountingStore {
        inner: SqliteTripStore,
        updates: AtomicUsize,
        fail_updates: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl TripStore for CountingStore {
        async fn create(&self, record: &TripRecord) -> Result<i64, StoreError> {
            self.inner.create(record).await
        }

        async fn get(&self, trip_id: i64) -> Result<TripRecord, StoreError> {
            self.inner.get(trip_id).await
        }

        async fn update(&self, trip_id: i64, patch: TripPatch) -> Result<(), StoreError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            if self.fail_updates.load(Ordering::SeqCst) {
                return Err(StoreError::Database("injected failure".into()));
            }
            self.inner.update(trip_id, patch).await
        }

        async fn delete(&self, trip_id: i64) -> Result<(), StoreError> {
            self.inner.delete(trip_id).await
        }

        async fn query_active(&self) -> Result<Vec<TripRecord>, StoreError> {
            self.inner.query_active().await
        }
    }

    async fn counting_store(fail_updates: bool) -> CountingStore {
        CountingStore {
            inner: SqliteTripStore::connect_in_memory().await.unwrap(),
            updates: AtomicUsize::new(0),
            fail_updates: std::sync::atomic::AtomicBool::new(fail_updates),
        }
    }

    #[tokio::test]
    async fn clean_tick_never_touches_the_store() {
        let store = counting_store(false).await;
        let mut engine = started_engine();
        let id = store.create(engine.trip().unwrap()).await.unwrap();
        engine.confirm_created(id);

        let mut autosave = AutoSaveCoordinator::start(Duration::from_secs(30));
        autosave.save(&mut engine, &store).await;

        assert_eq!(store.updates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dirty_tick_persists_and_clears_flag() {
        let store = counting_store(false).await;
        let mut engine = started_engine();
        let id = store.create(engine.trip().unwrap()).await.unwrap();
        engine.confirm_created(id);

        let t1 = Utc.with_ymd_and_hms(2025, 6, 1, 8, 1, 0).unwrap();
        engine.apply_fix(t1, PositioningFix::new(Point::new(139.7671, 35.6822), 5.0, t1));
        assert!(engine.autosave_due());

        let mut autosave = AutoSaveCoordinator::start(Duration::from_secs(30));
        autosave.save(&mut engine, &store).await;

        assert_eq!(store.updates.load(Ordering::SeqCst), 1);
        assert!(!engine.autosave_due());

        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.waypoints.len(), 2);
    }

    #[tokio::test]
    async fn failed_save_stays_dirty_and_records_fault() {
        let store = counting_store(true).await;
        let mut engine = started_engine();
        let id = store.inner.create(engine.trip().unwrap()).await.unwrap();
        engine.confirm_created(id);

        let t1 = Utc.with_ymd_and_hms(2025, 6, 1, 8, 1, 0).unwrap();
        engine.apply_fix(t1, PositioningFix::new(Point::new(139.7671, 35.6822), 5.0, t1));

        let mut autosave = AutoSaveCoordinator::start(Duration::from_secs(30));
        autosave.save(&mut engine, &store).await;

        assert!(engine.autosave_due(), "failed save must leave the record dirty");
        assert!(matches!(engine.errors().last(), Some(RecoverableError::StorageUnavailable { .. })));

        // The next tick retries and succeeds once storage is back.
        store.fail_updates.store(false, Ordering::SeqCst);
        autosave.save(&mut engine, &store).await;
        assert_eq!(store.updates.load(Ordering::SeqCst), 2);
        assert!(!engine.autosave_due());
    }
}
