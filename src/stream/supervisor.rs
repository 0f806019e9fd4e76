//! Connection supervisor
//!
//! Two states: connected, and disconnected-waiting. The supervisor does not
//! detect link loss itself; it reacts to the streamer's forced-disconnect
//! flag, waits out the reconnect timeout while reporting a countdown, then
//! asks the streamer to reconnect. Retries go on for as long as the session
//! runs.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::constants::SUPERVISOR_TICK_MS;
use crate::session::SessionContext;
use crate::status::StatusReporter;
use crate::stream::Streamer;

/// Monotonic time source, as an offset from an arbitrary origin
pub trait Clock: Send {
    fn now(&self) -> Duration;

    /// Reading this clock showed (or will show) at `instant`
    fn reading_at(&self, instant: Instant) -> Duration;
}

/// Wall clock backed by [`Instant`]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn reading_at(&self, instant: Instant) -> Duration {
        instant.saturating_duration_since(self.origin)
    }
}

/// Link state as the supervisor sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    DisconnectedWaiting {
        /// Clock reading when the link dropped or the last attempt failed
        since: Duration,
    },
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Link is up, nothing to do
    Connected,
    /// A forced disconnect was observed this tick
    Disconnected,
    /// Still waiting out the reconnect timeout
    Waiting { remaining: Duration },
    /// Reconnect attempt succeeded
    Reconnected,
    /// Reconnect attempt failed; a new wait has started
    ReconnectFailed,
}

/// Supervises the streamer's server connection
pub struct ConnectionSupervisor<S: Streamer, C: Clock = MonotonicClock> {
    streamer: Arc<Mutex<S>>,
    session: Arc<SessionContext>,
    status: Arc<StatusReporter>,
    clock: C,
    state: ConnectionState,
    timeout: Duration,
}

impl<S: Streamer> ConnectionSupervisor<S, MonotonicClock> {
    pub fn new(
        streamer: Arc<Mutex<S>>,
        session: Arc<SessionContext>,
        status: Arc<StatusReporter>,
    ) -> Self {
        Self::with_clock(streamer, session, status, MonotonicClock::new())
    }
}

impl<S: Streamer, C: Clock> ConnectionSupervisor<S, C> {
    pub fn with_clock(
        streamer: Arc<Mutex<S>>,
        session: Arc<SessionContext>,
        status: Arc<StatusReporter>,
        clock: C,
    ) -> Self {
        let timeout = streamer.lock().reconnect_timeout();
        let state = ConnectionState::DisconnectedWaiting { since: clock.now() };
        Self {
            streamer,
            session,
            status,
            clock,
            state,
            timeout,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// First connection attempt at session start.
    ///
    /// A failure here is not fatal: the supervisor starts out waiting and
    /// retries after the reconnect timeout.
    pub fn connect_initial(&mut self) -> TickOutcome {
        self.attempt(self.clock.now())
    }

    /// Advance the state machine by one tick
    pub fn tick(&mut self) -> TickOutcome {
        let now = self.clock.now();
        match self.state {
            ConnectionState::Connected => {
                let dropped_at = self.streamer.lock().take_forced_disconnect();
                if let Some(at) = dropped_at {
                    let since = self.clock.reading_at(at).min(now);
                    self.state = ConnectionState::DisconnectedWaiting { since };
                    self.session.set_connected(false);
                    self.status.server("Disconnected from server");
                    TickOutcome::Disconnected
                } else {
                    TickOutcome::Connected
                }
            }
            ConnectionState::DisconnectedWaiting { since } => {
                let elapsed = now.saturating_sub(since);
                if elapsed >= self.timeout {
                    self.attempt(now)
                } else {
                    let remaining = self.timeout - elapsed;
                    self.status
                        .server(&format!("Connecting in {} seconds", whole_seconds(remaining)));
                    TickOutcome::Waiting { remaining }
                }
            }
        }
    }

    fn attempt(&mut self, now: Duration) -> TickOutcome {
        let result = {
            let mut streamer = self.streamer.lock();
            let result = streamer.connect();
            if result.is_ok() {
                // Drop any disconnect raised before this connect succeeded
                streamer.take_forced_disconnect();
                streamer.reset_metadata();
            }
            result
        };

        match result {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                self.session.set_connected(true);
                self.status.server("Connected");
                tracing::info!("Connected to server");
                TickOutcome::Reconnected
            }
            Err(e) => {
                self.state = ConnectionState::DisconnectedWaiting { since: now };
                self.session.set_connected(false);
                self.status.server(&format!("Connect failed: {}", e));
                tracing::warn!("Connect failed, retrying in {:?}: {}", self.timeout, e);
                TickOutcome::ReconnectFailed
            }
        }
    }

    /// Tick once per second until the session stops.
    pub fn run(mut self) {
        let tick = Duration::from_millis(SUPERVISOR_TICK_MS);
        let slice = Duration::from_millis(50);

        while !self.session.stop_requested() {
            self.tick();

            let started = Instant::now();
            while started.elapsed() < tick && !self.session.stop_requested() {
                thread::sleep(slice);
            }
        }
        tracing::debug!("Connection supervisor stopped");
    }
}

/// Seconds left, rounded up so the countdown never reads zero while waiting
fn whole_seconds(remaining: Duration) -> u64 {
    remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
}
