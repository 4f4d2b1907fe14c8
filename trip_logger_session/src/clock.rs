use chrono::{DateTime, Duration, Utc};

/// Pause-aware stopwatch: `elapsed = now - started_at - paused_total`.
///
/// The authoritative value is always recomputed from wall-clock
/// timestamps, so a missed or delayed refresh tick self-corrects on the
/// next one.
#[derive(Debug, Clone)]
pub struct TripClock {
    started_at: DateTime<Utc>,
    paused_at: Option<DateTime<Utc>>,
    paused_total: Duration,
}

impl TripClock {
    pub fn start(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            paused_at: None,
            paused_total: Duration::zero(),
        }
    }

    /// Rebuild the clock of a recovered session from its persisted
    /// start time and cumulative pause duration.
    pub fn resume_from(started_at: DateTime<Utc>, paused_total: Duration) -> Self {
        Self {
            started_at,
            paused_at: None,
            paused_total,
        }
    }

    /// Freeze the running tally. A second pause without an intervening
    /// resume changes nothing.
    pub fn pause(&mut self, now: DateTime<Utc>) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    /// Fold the elapsed pause interval into the cumulative total.
    pub fn resume(&mut self, now: DateTime<Utc>) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += now - paused_at;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn paused_total(&self) -> Duration {
        self.paused_total
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        // While paused the tally is frozen at the pause instant.
        let end = self.paused_at.unwrap_or(now);
        let elapsed = end - self.started_at - self.paused_total;
        elapsed.max(Duration::zero())
    }
}
