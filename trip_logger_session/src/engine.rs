use chrono::{DateTime, Utc};
use geo_types::Point;
use trip_logger_lib::{
    fix::PositioningFix,
    statistics::{self, TripStatistics},
    trip::{TripRecord, TripStatus},
    waypoint::{Waypoint, WaypointKind},
};

use crate::{
    accumulator::WaypointAccumulator,
    clock::TripClock,
    config::SessionConfig,
    error::RecoverableError,
    state::{permits, CommandKind, SessionSnapshot, SessionStatus},
};

/// The session state machine.
///
/// Owns the transient runtime state of one recording session: status,
/// the in-progress record, the latest fix, the pause-aware clock and the
/// error list. All mutations go through `&mut self`, so whoever owns the
/// engine serializes them; the async service drives it from a single
/// task. Time always arrives as an explicit `now`, which keeps every
/// transition deterministic under test.
pub struct SessionEngine {
    status: SessionStatus,
    trip: Option<TripRecord>,
    clock: Option<TripClock>,
    accumulator: WaypointAccumulator,
    latest_fix: Option<PositioningFix>,
    stats: TripStatistics,
    errors: Vec<RecoverableError>,
    dirty: bool,
    next_waypoint_id: i64,
}

impl SessionEngine {
    pub fn new(config: &SessionConfig) -> Self {
        let accumulator = WaypointAccumulator::new(config.waypoint_threshold_km);
        Self {
            status: SessionStatus::Idle,
            trip: None,
            clock: None,
            accumulator,
            latest_fix: None,
            stats: TripStatistics::default(),
            errors: Vec::new(),
            dirty: false,
            next_waypoint_id: 1,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn trip(&self) -> Option<&TripRecord> {
        self.trip.as_ref()
    }

    pub fn errors(&self) -> &[RecoverableError] {
        &self.errors
    }

    /// Whether the in-progress record has mutations not yet persisted.
    pub fn autosave_due(&self) -> bool {
        self.dirty && self.trip.is_some()
    }

    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    /// Append a recoverable fault to the runtime error list.
    pub fn record_error(&mut self, error: RecoverableError) {
        tracing::warn!(%error, "session fault recorded");
        self.errors.push(error);
    }

    /// Reject a command issued in the wrong state: the violation is
    /// recorded once and nothing is mutated.
    pub fn reject(&mut self, command: CommandKind) -> RecoverableError {
        let error = RecoverableError::InvariantViolation {
            message: format!("{command:?} is not valid while {:?}", self.status),
        };
        self.record_error(error.clone());
        error
    }

    fn guard(&mut self, command: CommandKind) -> Result<(), RecoverableError> {
        if permits(self.status, command) {
            Ok(())
        } else {
            Err(self.reject(command))
        }
    }

    /// Begin recording from an initial fix.
    pub fn start_from_fix(&mut self, now: DateTime<Utc>, fix: PositioningFix) -> Result<(), RecoverableError> {
        self.guard(CommandKind::Start)?;
        self.latest_fix = Some(fix);
        self.begin_trip(now, fix.position, Some(fix.accuracy_m));
        Ok(())
    }

    /// Begin recording from an explicitly supplied start location, for
    /// when no fix can be obtained.
    pub fn start_manual(&mut self, now: DateTime<Utc>, location: Point) -> Result<(), RecoverableError> {
        self.guard(CommandKind::Start)?;
        self.begin_trip(now, location, None);
        Ok(())
    }

    fn begin_trip(&mut self, now: DateTime<Utc>, location: Point, accuracy_m: Option<f64>) {
        let mut trip = TripRecord::begin(now, location);

        let mut start = Waypoint::new(1, location, now, WaypointKind::Start);
        start.accuracy_m = accuracy_m;
        trip.waypoints.push(start);

        self.next_waypoint_id = 2;
        self.accumulator.arm(location);
        self.clock = Some(TripClock::start(now));
        self.stats = TripStatistics::default();
        self.trip = Some(trip);
        self.status = SessionStatus::Active;
        // The caller persists the fresh record synchronously, so there
        // is nothing unsaved yet.
        self.dirty = false;
    }

    /// Store-assigned id for the record built by `begin_trip`.
    pub fn confirm_created(&mut self, trip_id: i64) {
        if let Some(trip) = self.trip.as_mut() {
            trip.trip_id = trip_id;
        }
    }

    /// Roll a failed start back to Idle. Retryable without side effects.
    pub fn abort_start(&mut self, error: RecoverableError) {
        self.clear_runtime(false);
        self.record_error(error);
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), RecoverableError> {
        self.guard(CommandKind::Pause)?;
        if let Some(clock) = self.clock.as_mut() {
            clock.pause(now);
        }
        self.status = SessionStatus::Paused;
        tracing::debug!("session paused");
        Ok(())
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), RecoverableError> {
        self.guard(CommandKind::Resume)?;
        if let Some(clock) = self.clock.as_mut() {
            clock.resume(now);
            let paused_secs = clock.paused_total().num_seconds();
            if let Some(trip) = self.trip.as_mut() {
                trip.paused_secs = paused_secs;
                trip.updated_at = now;
            }
        }
        self.status = SessionStatus::Active;
        self.dirty = true;
        tracing::debug!("session resumed");
        Ok(())
    }

    /// One positioning update, applied in arrival order. Only an active,
    /// unpaused session distills fixes into waypoints; anything else
    /// ignores them.
    pub fn apply_fix(&mut self, now: DateTime<Utc>, fix: PositioningFix) {
        if self.status != SessionStatus::Active {
            return;
        }

        self.latest_fix = Some(fix);

        if self.accumulator.accept(&fix) {
            let waypoint = Waypoint::from_fix(self.take_waypoint_id(), &fix, WaypointKind::Other);
            self.push_waypoint(now, waypoint);
        }
    }

    /// Explicit marker request, timestamped at invocation and placed at
    /// the latest known position.
    pub fn add_waypoint(
        &mut self,
        now: DateTime<Utc>,
        kind: WaypointKind,
        label: Option<String>,
    ) -> Result<(), RecoverableError> {
        self.guard(CommandKind::AddWaypoint)?;

        let Some(position) = self.last_known_position() else {
            return Err(self.reject(CommandKind::AddWaypoint));
        };

        self.accumulator.record_manual(kind, position);

        let mut waypoint = Waypoint::new(self.take_waypoint_id(), position, now, kind);
        waypoint.accuracy_m = self.latest_fix.map(|f| f.accuracy_m);
        waypoint.label = label;
        self.push_waypoint(now, waypoint);

        Ok(())
    }

    /// Build the finalized record: synthetic end waypoint, final
    /// statistics, Completed status. The engine is untouched until the
    /// caller has persisted the result and calls `commit_terminal`, so a
    /// failed save leaves the session running for an explicit retry.
    pub fn finalize(
        &mut self,
        now: DateTime<Utc>,
        fresh_fix: Option<PositioningFix>,
    ) -> Result<TripRecord, RecoverableError> {
        self.guard(CommandKind::Complete)?;

        // The transition table only lets Complete through while a trip
        // and clock exist, so these are pure corruption guards.
        let Some(trip) = self.trip.as_ref() else {
            return Err(RecoverableError::InvariantViolation {
                message: "no trip in progress".into(),
            });
        };
        let Some(clock) = self.clock.as_ref() else {
            return Err(RecoverableError::InvariantViolation {
                message: "no clock for in-progress trip".into(),
            });
        };

        let mut finalized = trip.clone();

        let end_fix = fresh_fix.or(self.latest_fix);
        let (end_position, end_accuracy) = match end_fix {
            Some(fix) => (fix.position, Some(fix.accuracy_m)),
            None => {
                // Not even one fix all trip: fall back to where we last
                // recorded anything.
                let last = finalized.waypoints.last().map(|wp| wp.position);
                (last.unwrap_or(finalized.start_location), None)
            }
        };

        let mut end = Waypoint::new(self.next_waypoint_id, end_position, now, WaypointKind::End);
        end.accuracy_m = end_accuracy;
        finalized.waypoints.push(end);

        let elapsed_secs = clock.elapsed(now).num_seconds();
        let stats = statistics::compute(&finalized.waypoints, elapsed_secs);

        finalized.status = TripStatus::Completed;
        finalized.end_time = Some(now);
        finalized.end_location = Some(end_position);
        finalized.total_distance_km = Some(stats.distance_km);
        finalized.total_duration_secs = Some(elapsed_secs);
        finalized.paused_secs = ((now - finalized.start_time).num_seconds() - elapsed_secs).max(0);
        finalized.updated_at = now;

        Ok(finalized)
    }

    /// Discard the runtime state after a terminal transition has been
    /// made durable.
    pub fn commit_terminal(&mut self) {
        self.clear_runtime(true);
    }

    /// Tear down for cancellation and hand back the id to delete.
    pub fn cancel(&mut self) -> Result<i64, RecoverableError> {
        self.guard(CommandKind::Cancel)?;

        let Some(trip) = self.trip.as_ref() else {
            return Err(RecoverableError::InvariantViolation {
                message: "no trip in progress".into(),
            });
        };
        let trip_id = trip.trip_id;

        self.clear_runtime(true);
        tracing::info!(trip_id, "session cancelled");
        Ok(trip_id)
    }

    pub fn dismiss_error(&mut self, index: usize) -> Result<(), RecoverableError> {
        if index >= self.errors.len() {
            return Err(self.reject(CommandKind::DismissError));
        }
        self.errors.remove(index);
        Ok(())
    }

    /// Re-enter Active from a record a prior run left behind: waypoints
    /// reloaded, statistics recomputed, clock seeded from the persisted
    /// start time and cumulative pause duration.
    pub fn resume_recovered(&mut self, now: DateTime<Utc>, record: TripRecord) -> Result<(), RecoverableError> {
        self.guard(CommandKind::Start)?;

        if record.status != TripStatus::Active {
            let error = RecoverableError::InvariantViolation {
                message: format!("cannot resume a {} trip", record.status.as_str()),
            };
            self.record_error(error.clone());
            return Err(error);
        }

        self.next_waypoint_id = record.waypoints.iter().map(|wp| wp.waypoint_id).max().unwrap_or(0) + 1;

        let anchor = record.waypoints.last().map(|wp| wp.position).unwrap_or(record.start_location);
        self.accumulator.arm(anchor);

        let clock = TripClock::resume_from(record.start_time, chrono::Duration::seconds(record.paused_secs));
        self.stats = statistics::compute(&record.waypoints, clock.elapsed(now).num_seconds());
        self.clock = Some(clock);
        self.latest_fix = None;
        self.trip = Some(record);
        self.status = SessionStatus::Active;
        self.dirty = false;

        tracing::info!("recovered session re-entered Active");
        Ok(())
    }

    /// Read-only view for presentation collaborators.
    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            elapsed_secs: self
                .clock
                .as_ref()
                .map(|c| c.elapsed(now).num_seconds())
                .unwrap_or(0),
            statistics: self.stats,
            waypoints: self.trip.as_ref().map(|t| t.waypoints.clone()).unwrap_or_default(),
            errors: self.errors.clone(),
        }
    }

    fn take_waypoint_id(&mut self) -> i64 {
        let id = self.next_waypoint_id;
        self.next_waypoint_id += 1;
        id
    }

    fn last_known_position(&self) -> Option<Point> {
        self.latest_fix
            .map(|f| f.position)
            .or_else(|| self.trip.as_ref().and_then(|t| t.waypoints.last().map(|wp| wp.position)))
    }

    fn push_waypoint(&mut self, now: DateTime<Utc>, waypoint: Waypoint) {
        let Some(trip) = self.trip.as_mut() else {
            return;
        };
        trip.waypoints.push(waypoint);
        trip.updated_at = now;
        self.dirty = true;

        if let Some(clock) = self.clock.as_ref() {
            self.stats = statistics::compute(&trip.waypoints, clock.elapsed(now).num_seconds());
        }
    }

    fn clear_runtime(&mut self, clear_errors: bool) {
        self.status = SessionStatus::Idle;
        self.trip = None;
        self.clock = None;
        self.latest_fix = None;
        self.accumulator.disarm();
        self.stats = TripStatistics::default();
        self.dirty = false;
        self.next_waypoint_id = 1;
        if clear_errors {
            self.errors.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn fix_at(lon: f64, lat: f64, secs: i64) -> PositioningFix {
        PositioningFix::new(Point::new(lon, lat), 5.0, t(secs))
    }

    fn started_engine() -> SessionEngine {
        let mut engine = SessionEngine::new(&SessionConfig::default());
        engine.start_from_fix(t(0), fix_at(139.7671, 35.6812, 0)).unwrap();
        engine.confirm_created(1);
        engine
    }

    #[test]
    fn start_records_synthetic_start_waypoint() {
        let engine = started_engine();
        let trip = engine.trip().unwrap();
        assert_eq!(engine.status(), SessionStatus::Active);
        assert_eq!(trip.waypoints.len(), 1);
        assert_eq!(trip.waypoints[0].kind, WaypointKind::Start);
        assert!(!engine.autosave_due());
    }

    #[test]
    fn below_threshold_fixes_leave_only_the_start_waypoint() {
        let mut engine = started_engine();

        // A walk around the parking lot: every step well under 0.1 km.
        for i in 1..20 {
            engine.apply_fix(t(i * 5), fix_at(139.7671, 35.6812 + i as f64 * 0.00001, i * 5));
        }

        assert_eq!(engine.trip().unwrap().waypoints.len(), 1);
        assert!(!engine.autosave_due());
    }

    #[test]
    fn fix_past_threshold_becomes_waypoint() {
        // Start at Tokyo station, then a fix ~0.11 km away at t=60.
        let mut engine = started_engine();
        engine.apply_fix(t(60), fix_at(139.7671, 35.6822, 60));

        let trip = engine.trip().unwrap();
        assert_eq!(trip.waypoints.len(), 2);
        assert_eq!(trip.waypoints[1].kind, WaypointKind::Other);
        assert!(engine.autosave_due());
    }

    #[test]
    fn waypoint_count_and_distance_grow_monotonically() {
        let mut engine = started_engine();

        let mut last_count = 1;
        let mut last_distance = 0.0;
        for i in 1..=8 {
            engine.apply_fix(t(i * 60), fix_at(139.7671, 35.6812 + i as f64 * 0.001, i * 60));

            let snapshot = engine.snapshot(t(i * 60));
            assert!(snapshot.waypoints.len() >= last_count);
            assert!(snapshot.statistics.distance_km >= last_distance);
            last_count = snapshot.waypoints.len();
            last_distance = snapshot.statistics.distance_km;
        }
        assert_eq!(last_count, 9);
    }

    #[test]
    fn paused_session_ignores_fixes() {
        let mut engine = started_engine();
        engine.pause(t(10)).unwrap();

        engine.apply_fix(t(20), fix_at(139.7671, 35.7, 20));
        assert_eq!(engine.trip().unwrap().waypoints.len(), 1);
    }

    #[test]
    fn manual_fuel_waypoint_pause_resume_complete_reports_90s() {
        // Start, fuel stop immediately, pause at 30, resume at
        // 90, complete at 150 -> elapsed 150 - 60 = 90 s.
        let mut engine = started_engine();
        engine.add_waypoint(t(0), WaypointKind::Fuel, Some("last cheap station".into())).unwrap();
        engine.pause(t(30)).unwrap();
        engine.resume(t(90)).unwrap();

        let finalized = engine.finalize(t(150), None).unwrap();
        assert_eq!(finalized.total_duration_secs, Some(90));
        assert_eq!(finalized.paused_secs, 60);
        assert_eq!(finalized.status, TripStatus::Completed);
        assert_eq!(finalized.waypoints.last().unwrap().kind, WaypointKind::End);

        // Runtime survives until the save is confirmed.
        assert_eq!(engine.status(), SessionStatus::Active);
        engine.commit_terminal();
        assert_eq!(engine.status(), SessionStatus::Idle);
        assert!(engine.trip().is_none());
    }

    #[test]
    fn complete_from_paused_freezes_elapsed_at_pause() {
        let mut engine = started_engine();
        engine.pause(t(40)).unwrap();

        let finalized = engine.finalize(t(100), None).unwrap();
        assert_eq!(finalized.total_duration_secs, Some(40));
        assert_eq!(finalized.paused_secs, 60);
    }

    #[test]
    fn invalid_commands_are_rejected_without_mutation() {
        let mut engine = SessionEngine::new(&SessionConfig::default());

        assert!(engine.pause(t(0)).is_err());
        assert!(engine.resume(t(0)).is_err());
        assert!(engine.finalize(t(0), None).is_err());
        assert!(engine.cancel().is_err());
        assert_eq!(engine.status(), SessionStatus::Idle);
        assert_eq!(engine.errors().len(), 4);
        assert!(engine.errors().iter().all(|e| !e.is_retryable()));

        // Starting twice is rejected, not queued.
        engine.start_manual(t(0), Point::new(139.7671, 35.6812)).unwrap();
        assert!(engine.start_manual(t(1), Point::new(139.7671, 35.6812)).is_err());
        assert_eq!(engine.status(), SessionStatus::Active);
    }

    #[test]
    fn failed_finalize_leaves_session_retryable() {
        let mut engine = started_engine();
        let first = engine.finalize(t(100), None).unwrap();

        // Persistence failed; the engine was never committed, so a retry
        // produces an equivalent record with the same end waypoint id.
        engine.record_error(RecoverableError::StorageUnavailable { message: "disk gone".into() });
        assert_eq!(engine.status(), SessionStatus::Active);

        let second = engine.finalize(t(100), None).unwrap();
        assert_eq!(first.waypoints.len(), second.waypoints.len());
        assert_eq!(first.waypoints.last().unwrap().waypoint_id, second.waypoints.last().unwrap().waypoint_id);
    }

    #[test]
    fn cancel_clears_runtime_and_reports_id() {
        let mut engine = started_engine();
        engine.apply_fix(t(60), fix_at(139.7671, 35.6822, 60));

        let trip_id = engine.cancel().unwrap();
        assert_eq!(trip_id, 1);
        assert_eq!(engine.status(), SessionStatus::Idle);
        assert!(engine.trip().is_none());
        assert!(!engine.autosave_due());
    }

    #[test]
    fn recovery_reproduces_waypoints_and_elapsed() {
        let mut engine = started_engine();
        engine.apply_fix(t(60), fix_at(139.7671, 35.6822, 60));
        engine.pause(t(100)).unwrap();
        engine.resume(t(160)).unwrap();

        let stored = engine.trip().unwrap().clone();
        let live_elapsed = engine.snapshot(t(200)).elapsed_secs;

        let mut recovered = SessionEngine::new(&SessionConfig::default());
        recovered.resume_recovered(t(200), stored.clone()).unwrap();

        let snapshot = recovered.snapshot(t(200));
        assert_eq!(snapshot.status, SessionStatus::Active);
        assert_eq!(snapshot.waypoints, stored.waypoints);
        assert_eq!(snapshot.elapsed_secs, live_elapsed);

        // New waypoints continue the id sequence.
        recovered.apply_fix(t(260), fix_at(139.7671, 35.6832, 260));
        assert_eq!(recovered.trip().unwrap().waypoints.last().unwrap().waypoint_id, 3);
    }

    #[test]
    fn recovering_a_completed_record_is_rejected() {
        let mut stored = TripRecord::begin(t(0), Point::new(139.7671, 35.6812));
        stored.status = TripStatus::Completed;

        let mut engine = SessionEngine::new(&SessionConfig::default());
        assert!(engine.resume_recovered(t(10), stored).is_err());
        assert_eq!(engine.status(), SessionStatus::Idle);
    }

    #[test]
    fn dismiss_error_drops_one_entry() {
        let mut engine = SessionEngine::new(&SessionConfig::default());
        engine.record_error(RecoverableError::PositioningTimeout { attempts: 3 });
        engine.record_error(RecoverableError::StorageUnavailable { message: "busy".into() });

        engine.dismiss_error(0).unwrap();
        assert_eq!(engine.errors().len(), 1);
        assert!(matches!(engine.errors()[0], RecoverableError::StorageUnavailable { .. }));

        assert!(engine.dismiss_error(5).is_err());
    }
}
