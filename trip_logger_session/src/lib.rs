//! Recording session engine for the trip logger.
//!
//! Turns a live stream of positioning fixes into a structured trip
//! record: session state machine, threshold-based waypoint detection,
//! derived statistics, a pause-aware clock and periodic persistence with
//! crash recovery. All mutation is serialized through one service task.

pub mod accumulator;
pub mod autosave;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod positioning;
pub mod service;
pub mod state;

pub use {
    config::SessionConfig,
    engine::SessionEngine,
    error::{RecoverableError, SessionError},
    positioning::{FixSubscription, PositioningFailure, PositioningSource, SimulatedSource},
    service::{SessionHandle, SessionService, recover_active},
    state::{SessionSnapshot, SessionStatus},
};
