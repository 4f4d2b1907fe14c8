use std::path::PathBuf;

use const_format::concatcp;
use sqlx::{query, query_as, sqlite::{SqliteConnectOptions, SqlitePoolOptions}, Executor, Pool, Sqlite, SqlitePool};
use trip_logger_lib::trip::TripRecord;

use crate::{StoreError, TripPatch, TripStore, APP_DIR_NAME, DB_FILE_NAME};

use super::constants::*;

/// SQLite-backed trip store. One row per trip; the waypoint sequence is
/// a single bincode blob so every record update is one atomic statement.
#[derive(Clone)]
pub struct SqliteTripStore {
    pool: Pool<Sqlite>,
}

impl SqliteTripStore {
    /// Open (or create) the database in the per-user data directory.
    pub async fn connect() -> Result<Self, StoreError> {
        let dir = data_dir()?;
        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .map_err(|e| StoreError::Database(format!("Failed to create data directory {dir:?}: {e}")))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(dir.join(DB_FILE_NAME))
            .foreign_keys(true)
            .create_if_missing(true);

        tracing::info!(?dir, "opening trip database");
        Self::connect_with(options).await
    }

    pub async fn connect_with(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect to database: {e}")))?;

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Private in-memory database, used by tests. Capped to a single
    /// connection so the whole pool sees one database.
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to open in-memory database: {e}")))?;

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.pool.execute(concatcp!("
            CREATE TABLE IF NOT EXISTS ", TRIPS_TABLE_NAME, "(",
                TRIP_ID,             " INTEGER PRIMARY KEY AUTOINCREMENT,",
                CREATED_AT,          " TIMESTAMP NOT NULL,",
                UPDATED_AT,          " TIMESTAMP NOT NULL,",
                TRIP_DATE,           " DATE NOT NULL,",
                START_TIME,          " TIMESTAMP NOT NULL,",
                END_TIME,            " TIMESTAMP,",
                STATUS,              " TEXT NOT NULL,",
                START_LAT,           " REAL NOT NULL,",
                START_LON,           " REAL NOT NULL,",
                END_LAT,             " REAL,",
                END_LON,             " REAL,",
                WAYPOINTS,           " BLOB NOT NULL,",
                TOTAL_DISTANCE_KM,   " REAL,",
                TOTAL_DURATION_SECS, " INTEGER,",
                PAUSED_SECS,         " INTEGER NOT NULL)"))
            .await
            .map_err(|e| StoreError::from_sqlx("Failed to initialize schema", e))?;

        Ok(())
    }

    /// Every trip, oldest first. Not part of the gateway contract; used
    /// by the maintenance CLI.
    pub async fn list_all(&self) -> Result<Vec<TripRecord>, StoreError> {
        query_as::<_, TripRecord>(concatcp!("SELECT * FROM ", TRIPS_TABLE_NAME, " ORDER BY ", TRIP_ID))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("Failed to list trips", e))
    }
}

#[async_trait::async_trait]
impl TripStore for SqliteTripStore {
    async fn create(&self, record: &TripRecord) -> Result<i64, StoreError> {
        query_as::<_, (i64,)>(concatcp!("
            INSERT INTO ", TRIPS_TABLE_NAME, "(",
            TRIP_ID, ", ", CREATED_AT, ", ", UPDATED_AT, ", ", TRIP_DATE, ", ", START_TIME, ", ", END_TIME, ", ",
            STATUS, ", ", START_LAT, ", ", START_LON, ", ", END_LAT, ", ", END_LON, ", ",
            WAYPOINTS, ", ", TOTAL_DISTANCE_KM, ", ", TOTAL_DURATION_SECS, ", ", PAUSED_SECS, ")
            VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) RETURNING ", TRIP_ID))
            .bind(record.created_at)
            .bind(record.updated_at)
            .bind(record.trip_date)
            .bind(record.start_time)
            .bind(record.end_time)
            .bind(record.status.as_str())
            .bind(record.start_location.y())
            .bind(record.start_location.x())
            .bind(record.end_location.map(|p| p.y()))
            .bind(record.end_location.map(|p| p.x()))
            .bind(record.waypoints_blob())
            .bind(record.total_distance_km)
            .bind(record.total_duration_secs)
            .bind(record.paused_secs)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("Failed to insert trip", e))
            .map(|row| row.0)
    }

    async fn get(&self, trip_id: i64) -> Result<TripRecord, StoreError> {
        query_as::<_, TripRecord>(concatcp!("SELECT * FROM ", TRIPS_TABLE_NAME, " WHERE ", TRIP_ID, " = ?1"))
            .bind(trip_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => StoreError::NotFound(trip_id),
                other => StoreError::from_sqlx("Failed to get trip", other),
            })
    }

    async fn update(&self, trip_id: i64, patch: TripPatch) -> Result<(), StoreError> {
        // The mutable columns only move from NULL to a value, so COALESCE
        // applies the patch in one atomic statement.
        let blob = patch.waypoints.as_ref().map(|w| bincode::serialize(w).unwrap());

        let result = query(concatcp!("
            UPDATE ", TRIPS_TABLE_NAME, " SET ",
            UPDATED_AT,          " = COALESCE(?1, ", UPDATED_AT, "), ",
            STATUS,              " = COALESCE(?2, ", STATUS, "), ",
            END_TIME,            " = COALESCE(?3, ", END_TIME, "), ",
            END_LAT,             " = COALESCE(?4, ", END_LAT, "), ",
            END_LON,             " = COALESCE(?5, ", END_LON, "), ",
            WAYPOINTS,           " = COALESCE(?6, ", WAYPOINTS, "), ",
            TOTAL_DISTANCE_KM,   " = COALESCE(?7, ", TOTAL_DISTANCE_KM, "), ",
            TOTAL_DURATION_SECS, " = COALESCE(?8, ", TOTAL_DURATION_SECS, "), ",
            PAUSED_SECS,         " = COALESCE(?9, ", PAUSED_SECS, ")
            WHERE ", TRIP_ID, " = ?10"))
            .bind(patch.updated_at)
            .bind(patch.status.map(|s| s.as_str()))
            .bind(patch.end_time)
            .bind(patch.end_location.map(|p| p.y()))
            .bind(patch.end_location.map(|p| p.x()))
            .bind(blob)
            .bind(patch.total_distance_km)
            .bind(patch.total_duration_secs)
            .bind(patch.paused_secs)
            .bind(trip_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("Failed to update trip", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(trip_id));
        }

        Ok(())
    }

    async fn delete(&self, trip_id: i64) -> Result<(), StoreError> {
        query(concatcp!("DELETE FROM ", TRIPS_TABLE_NAME, " WHERE ", TRIP_ID, " = ?1"))
            .bind(trip_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("Failed to delete trip", e))
            .map(|_| ())
    }

    async fn query_active(&self) -> Result<Vec<TripRecord>, StoreError> {
        query_as::<_, TripRecord>(concatcp!("
            SELECT * FROM ", TRIPS_TABLE_NAME, "
            WHERE ", STATUS, " = '", STATUS_ACTIVE, "' ORDER BY ", START_TIME))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("Failed to query active trips", e))
    }
}

fn data_dir() -> Result<PathBuf, StoreError> {
    directories::ProjectDirs::from("", "", APP_DIR_NAME)
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| StoreError::Database("No usable data directory on this platform".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use geo_types::Point;
    use trip_logger_lib::{trip::TripStatus, waypoint::{Waypoint, WaypointKind}};

    fn sample_trip() -> TripRecord {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        let start = Point::new(139.7671, 35.6812);
        let mut trip = TripRecord::begin(t0, start);
        trip.waypoints.push(Waypoint::new(1, start, t0, WaypointKind::Start));
        trip.waypoints.push(Waypoint::new(2, Point::new(139.78, 35.69), t0 + Duration::seconds(60), WaypointKind::Other));
        trip
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = SqliteTripStore::connect_in_memory().await.unwrap();

        let trip = sample_trip();
        let id = store.create(&trip).await.unwrap();
        assert!(id > 0);

        let loaded = store.get(id).await.unwrap();
        assert_eq!(loaded.trip_id, id);
        assert_eq!(loaded.status, TripStatus::Active);
        assert_eq!(loaded.waypoints, trip.waypoints);
        assert_eq!(loaded.start_location, trip.start_location);
        assert_eq!(loaded.end_time, None);
    }

    #[tokio::test]
    async fn get_missing_trip_is_not_found() {
        let store = SqliteTripStore::connect_in_memory().await.unwrap();
        assert!(matches!(store.get(99).await, Err(StoreError::NotFound(99))));
    }

    #[tokio::test]
    async fn patch_touches_only_present_fields() {
        let store = SqliteTripStore::connect_in_memory().await.unwrap();
        let trip = sample_trip();
        let id = store.create(&trip).await.unwrap();

        let end = trip.start_time + Duration::seconds(600);
        store
            .update(id, TripPatch {
                status: Some(TripStatus::Completed),
                end_time: Some(end),
                total_distance_km: Some(1.5),
                total_duration_secs: Some(600),
                ..Default::default()
            })
            .await
            .unwrap();

        let loaded = store.get(id).await.unwrap();
        assert_eq!(loaded.status, TripStatus::Completed);
        assert_eq!(loaded.end_time, Some(end));
        assert_eq!(loaded.total_distance_km, Some(1.5));
        // Untouched fields keep their stored values.
        assert_eq!(loaded.waypoints, trip.waypoints);
        assert_eq!(loaded.start_time, trip.start_time);
    }

    #[tokio::test]
    async fn update_missing_trip_is_not_found() {
        let store = SqliteTripStore::connect_in_memory().await.unwrap();
        let err = store.update(7, TripPatch::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(7)));
    }

    #[tokio::test]
    async fn query_active_skips_closed_trips() {
        let store = SqliteTripStore::connect_in_memory().await.unwrap();

        let active_id = store.create(&sample_trip()).await.unwrap();
        let closed_id = store.create(&sample_trip()).await.unwrap();
        store
            .update(closed_id, TripPatch {
                status: Some(TripStatus::Completed),
                ..Default::default()
            })
            .await
            .unwrap();

        let active = store.query_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].trip_id, active_id);
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let store = SqliteTripStore::connect_in_memory().await.unwrap();
        let id = store.create(&sample_trip()).await.unwrap();

        store.delete(id).await.unwrap();
        assert!(matches!(store.get(id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn waypoint_label_survives_blob_rewrite() {
        let store = SqliteTripStore::connect_in_memory().await.unwrap();
        let trip = sample_trip();
        let id = store.create(&trip).await.unwrap();

        let mut loaded = store.get(id).await.unwrap();
        loaded.waypoints[1].label = Some("viewpoint".into());
        store
            .update(id, TripPatch {
                waypoints: Some(loaded.waypoints.clone()),
                ..Default::default()
            })
            .await
            .unwrap();

        let reloaded = store.get(id).await.unwrap();
        assert_eq!(reloaded.waypoints[1].label.as_deref(), Some("viewpoint"));
    }
}
