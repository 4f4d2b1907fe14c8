use std::sync::Arc;

use chrono::Utc;
use geo_types::Point;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Interval;
use tracing::{error, info, warn};
use trip_logger_data_management::{StoreError, TripPatch, TripStore};
use trip_logger_lib::{fix::PositioningFix, trip::TripRecord, waypoint::WaypointKind};

use crate::{
    autosave::AutoSaveCoordinator,
    config::SessionConfig,
    engine::SessionEngine,
    error::{RecoverableError, SessionError},
    positioning::{FixSubscription, PositioningSource},
    state::{CommandKind, SessionSnapshot, SessionStatus, permits},
};

/// Commands sent from the handle to the service task.
enum SessionCommand {
    Start {
        manual_location: Option<Point>,
        resp: oneshot::Sender<Result<(), RecoverableError>>,
    },
    Pause {
        resp: oneshot::Sender<Result<(), RecoverableError>>,
    },
    Resume {
        resp: oneshot::Sender<Result<(), RecoverableError>>,
    },
    Complete {
        resp: oneshot::Sender<Result<TripRecord, RecoverableError>>,
    },
    Cancel {
        resp: oneshot::Sender<Result<(), RecoverableError>>,
    },
    AddWaypoint {
        kind: WaypointKind,
        label: Option<String>,
        resp: oneshot::Sender<Result<(), RecoverableError>>,
    },
    DismissError {
        index: usize,
        resp: oneshot::Sender<Result<(), RecoverableError>>,
    },
    ResumeRecovered {
        record: TripRecord,
        resp: oneshot::Sender<Result<(), RecoverableError>>,
    },
    Shutdown,
}

/// Cloneable command surface plus the published snapshot stream.
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<SessionCommand>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Start recording from a fresh positioning fix.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.request(|resp| SessionCommand::Start { manual_location: None, resp }).await
    }

    /// Start recording from an explicit start location, bypassing
    /// positioning.
    pub async fn start_at(&self, location: Point) -> Result<(), SessionError> {
        self.request(|resp| SessionCommand::Start { manual_location: Some(location), resp }).await
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.request(|resp| SessionCommand::Pause { resp }).await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.request(|resp| SessionCommand::Resume { resp }).await
    }

    /// Finish the trip. The returned record is the finalized hand-off
    /// artifact; on a storage error the session keeps running and the
    /// call can be retried.
    pub async fn complete(&self) -> Result<TripRecord, SessionError> {
        self.request(|resp| SessionCommand::Complete { resp }).await
    }

    pub async fn cancel(&self) -> Result<(), SessionError> {
        self.request(|resp| SessionCommand::Cancel { resp }).await
    }

    pub async fn add_waypoint(&self, kind: WaypointKind, label: Option<String>) -> Result<(), SessionError> {
        self.request(|resp| SessionCommand::AddWaypoint { kind, label, resp }).await
    }

    pub async fn dismiss_error(&self, index: usize) -> Result<(), SessionError> {
        self.request(|resp| SessionCommand::DismissError { index, resp }).await
    }

    /// Re-enter Active on a record recovered from a prior run.
    pub async fn resume_recovered(&self, record: TripRecord) -> Result<(), SessionError> {
        self.request(|resp| SessionCommand::ResumeRecovered { record, resp }).await
    }

    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(SessionCommand::Shutdown).await;
    }

    /// Latest published runtime snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Watch the snapshot stream, refreshed on every mutation and on the
    /// display tick.
    pub fn snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, RecoverableError>>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(build(tx))
            .await
            .map_err(|_| SessionError::ServiceStopped)?;
        rx.await
            .map_err(|_| SessionError::ServiceStopped)?
            .map_err(SessionError::from)
    }
}

/// Trips a prior run left Active, for the caller to resume or close out.
pub async fn recover_active<S: TripStore>(store: &S) -> Result<Vec<TripRecord>, StoreError> {
    store.query_active().await
}

/// Owns the engine and serializes everything that mutates it: user
/// commands, subscription fixes, auto-save ticks and display ticks all
/// pass through one `select!` loop, one at a time, in arrival order.
/// Subscription and timer handles live here and are dropped on every
/// terminal transition.
pub struct SessionService<S, P> {
    engine: SessionEngine,
    config: SessionConfig,
    store: Arc<S>,
    positioning: Arc<P>,
    command_rx: mpsc::Receiver<SessionCommand>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    subscription: Option<FixSubscription>,
    autosave: Option<AutoSaveCoordinator>,
    display: Option<Interval>,
}

impl<S, P> SessionService<S, P>
where
    S: TripStore + 'static,
    P: PositioningSource,
{
    /// Spawn the service task and return its command handle.
    pub fn spawn(config: SessionConfig, store: Arc<S>, positioning: Arc<P>) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::idle());

        let service = Self {
            engine: SessionEngine::new(&config),
            config,
            store,
            positioning,
            command_rx,
            snapshot_tx,
            subscription: None,
            autosave: None,
            display: None,
        };

        tokio::spawn(service.run());

        SessionHandle { command_tx, snapshot_rx }
    }

    async fn run(mut self) {
        info!("session service started");

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            let stop = self.handle_command(cmd).await;
                            self.publish();
                            if stop {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                fix = Self::next_fix(&mut self.subscription), if self.subscription.is_some() => {
                    match fix {
                        Some(fix) => self.engine.apply_fix(Utc::now(), fix),
                        None => {
                            // The provider dropped us; recording carries
                            // on from the last known position.
                            self.subscription = None;
                            self.engine.record_error(RecoverableError::PositioningUnavailable {
                                message: "fix stream ended".into(),
                            });
                        }
                    }
                    self.publish();
                }

                _ = Self::tick_autosave(&mut self.autosave), if self.autosave.is_some() => {
                    if let Some(autosave) = self.autosave.as_mut() {
                        autosave.save(&mut self.engine, self.store.as_ref()).await;
                    }
                    self.publish();
                }

                _ = Self::tick_display(&mut self.display), if self.display.is_some() => {
                    self.publish();
                }
            }
        }

        info!("session service stopped");
    }

    /// Returns true when the service should stop.
    async fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::Start { manual_location, resp } => {
                let result = self.do_start(manual_location).await;
                let _ = resp.send(result);
            }
            SessionCommand::Pause { resp } => {
                let result = self.engine.pause(Utc::now());
                if result.is_ok() {
                    self.subscription = None;
                    info!("recording paused");
                }
                let _ = resp.send(result);
            }
            SessionCommand::Resume { resp } => {
                let result = self.engine.resume(Utc::now());
                if result.is_ok() {
                    self.subscription = Some(self.positioning.watch());
                    info!("recording resumed");
                }
                let _ = resp.send(result);
            }
            SessionCommand::Complete { resp } => {
                let result = self.do_complete().await;
                let _ = resp.send(result);
            }
            SessionCommand::Cancel { resp } => {
                let result = self.do_cancel().await;
                let _ = resp.send(result);
            }
            SessionCommand::AddWaypoint { kind, label, resp } => {
                let _ = resp.send(self.engine.add_waypoint(Utc::now(), kind, label));
            }
            SessionCommand::DismissError { index, resp } => {
                let _ = resp.send(self.engine.dismiss_error(index));
            }
            SessionCommand::ResumeRecovered { record, resp } => {
                let result = self.engine.resume_recovered(Utc::now(), record);
                if result.is_ok() {
                    self.arm();
                    info!("recovered session resumed");
                }
                let _ = resp.send(result);
            }
            SessionCommand::Shutdown => return true,
        }

        false
    }

    async fn do_start(&mut self, manual_location: Option<Point>) -> Result<(), RecoverableError> {
        if self.engine.status() != SessionStatus::Idle {
            return Err(self.engine.reject(CommandKind::Start));
        }

        match manual_location {
            Some(location) => self.engine.start_manual(Utc::now(), location)?,
            None => {
                let fix = match self.obtain_fix().await {
                    Ok(fix) => fix,
                    Err(error) => {
                        // Stays Idle; the caller may retry start().
                        self.engine.record_error(error.clone());
                        return Err(error);
                    }
                };
                self.engine.start_from_fix(Utc::now(), fix)?;
            }
        }

        let Some(record) = self.engine.trip().cloned() else {
            return Err(self.engine.reject(CommandKind::Start));
        };

        match self.store.create(&record).await {
            Ok(trip_id) => {
                self.engine.confirm_created(trip_id);
                self.arm();
                info!(trip_id, "recording started");
                Ok(())
            }
            Err(err) => {
                let error = RecoverableError::from_store(&err);
                self.engine.abort_start(error.clone());
                Err(error)
            }
        }
    }

    async fn do_complete(&mut self) -> Result<TripRecord, RecoverableError> {
        if !permits(self.engine.status(), CommandKind::Complete) {
            return Err(self.engine.reject(CommandKind::Complete));
        }

        // One bounded attempt at a fresh end fix. The latest cached fix
        // is the fallback, so failure here is not an error.
        let fresh_fix = match tokio::time::timeout(self.config.fix_timeout, self.positioning.current_fix()).await {
            Ok(Ok(fix)) => Some(fix),
            _ => None,
        };

        let finalized = self.engine.finalize(Utc::now(), fresh_fix)?;

        match self.store.update(finalized.trip_id, TripPatch::snapshot_of(&finalized)).await {
            Ok(()) => {
                self.engine.commit_terminal();
                self.disarm();
                info!(
                    trip_id = finalized.trip_id,
                    distance_km = finalized.total_distance_km,
                    duration_secs = finalized.total_duration_secs,
                    "trip completed"
                );
                Ok(finalized)
            }
            Err(err) => {
                // Surfaced synchronously for an explicit retry; the
                // session is never silently dropped.
                let error = RecoverableError::from_store(&err);
                self.engine.record_error(error.clone());
                Err(error)
            }
        }
    }

    async fn do_cancel(&mut self) -> Result<(), RecoverableError> {
        let trip_id = self.engine.cancel()?;
        self.disarm();

        if let Err(err) = self.store.delete(trip_id).await {
            // The runtime is already torn down; a leftover row is
            // cleaned up by the maintenance CLI.
            error!(trip_id, %err, "failed to delete cancelled trip");
        }

        Ok(())
    }

    async fn obtain_fix(&self) -> Result<PositioningFix, RecoverableError> {
        if !self.positioning.is_available() {
            return Err(RecoverableError::PositioningUnavailable {
                message: "location provider reports unavailable".into(),
            });
        }

        let attempts = self.config.fix_retries + 1;
        for attempt in 1..=attempts {
            match tokio::time::timeout(self.config.fix_timeout, self.positioning.current_fix()).await {
                Ok(Ok(fix)) => return Ok(fix),
                Ok(Err(err)) => {
                    return Err(RecoverableError::PositioningUnavailable { message: err.to_string() });
                }
                Err(_) => warn!(attempt, "positioning request timed out"),
            }
        }

        Err(RecoverableError::PositioningTimeout { attempts })
    }

    fn arm(&mut self) {
        self.subscription = Some(self.positioning.watch());
        self.autosave = Some(AutoSaveCoordinator::start(self.config.autosave_period));

        let mut display = tokio::time::interval(self.config.display_tick);
        display.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        self.display = Some(display);
    }

    /// Drop subscription and timers. Runs on every terminal transition.
    fn disarm(&mut self) {
        self.subscription = None;
        self.autosave = None;
        self.display = None;
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.engine.snapshot(Utc::now()));
    }

    async fn next_fix(subscription: &mut Option<FixSubscription>) -> Option<PositioningFix> {
        match subscription.as_mut() {
            Some(sub) => sub.next_fix().await,
            None => std::future::pending().await,
        }
    }

    async fn tick_autosave(autosave: &mut Option<AutoSaveCoordinator>) {
        match autosave.as_mut() {
            Some(autosave) => autosave.tick().await,
            None => std::future::pending().await,
        }
    }

    async fn tick_display(display: &mut Option<Interval>) {
        match display.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}
