/// History fetch session: connect, resolve the device clock, stream records
/// until the device goes quiet, then hand the series back to the caller.
use std::fmt;

use log::{debug, error, info, warn};
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, timeout, Duration, Instant, MissedTickBehavior};

use crate::bluetooth::protocol::{
    decode_current_reading, decode_history_record, CURRENT_STATUS_CHAR, HISTORY_CHAR, TIME_CHAR,
};
use crate::bluetooth::transport::Transport;
use crate::config::FetchConfig;
use crate::error::{SessionError, TransportError};
use crate::history::{ClockReference, HistoryAggregator, StalenessMonitor};
use crate::models::{CurrentReading, HistorySample};
use crate::utils::{cancelled, format_datetime};

/// Terminal status text when every connection attempt failed
pub const RETRIES_EXHAUSTED_STATUS: &str = "Failed to connect after several attempts.";

/// Lifecycle of a fetch session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    RetryWait,
    ReadingClock,
    ReadingCurrentStatus,
    Subscribing,
    Collecting,
    Unsubscribing,
    Completed,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::RetryWait => "retry-wait",
            SessionState::ReadingClock => "reading-clock",
            SessionState::ReadingCurrentStatus => "reading-current-status",
            SessionState::Subscribing => "subscribing",
            SessionState::Collecting => "collecting",
            SessionState::Unsubscribing => "unsubscribing",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Receives every state transition of a running session
///
/// This is the only way session progress leaves the session: the CLI writes
/// it to the task log, tests record it.
pub trait SessionListener: Send {
    fn on_transition(&mut self, state: SessionState, status: &str);

    /// Called once per session when the current-status read succeeds
    fn on_current_reading(&mut self, _address: &str, _reading: &CurrentReading) {}
}

/// Timing and retry limits for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub connect_timeout: Duration,
    pub stale_after: Duration,
    pub first_record_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_backoff: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
            stale_after: Duration::from_secs(10),
            first_record_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl From<&FetchConfig> for SessionSettings {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_backoff: Duration::from_secs(config.retry_backoff_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            stale_after: Duration::from_secs(config.stale_after_secs),
            first_record_timeout: Duration::from_secs(config.first_record_timeout_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }
}

/// What a completed session hands to the exporter
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub address: String,
    pub clock_origin: OffsetDateTime,
    pub current_reading: Option<CurrentReading>,
    pub samples: Vec<HistorySample>,
    /// Number of connection attempts that failed before one succeeded
    pub retries: u32,
    /// Collection ended because the caller asked, not because the device went quiet
    pub cancelled: bool,
}

/// Why the collection loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Stale,
    NothingArrived,
    Cancelled,
}

/// One fetch against one device
///
/// The session exclusively owns the clock reference, staleness monitor and
/// aggregator. Notifications reach it through a channel, so all mutation
/// happens on the task running [`FetchSession::run`].
pub struct FetchSession<'t, T: Transport> {
    transport: &'t T,
    settings: SessionSettings,
    address: String,
    state: SessionState,
    retry_count: u32,
    clock: ClockReference,
    staleness: StalenessMonitor,
    history: HistoryAggregator,
    current_reading: Option<CurrentReading>,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'t, T: Transport> FetchSession<'t, T> {
    pub fn new(transport: &'t T, address: &str, settings: SessionSettings) -> Self {
        Self {
            transport,
            settings,
            address: address.to_string(),
            state: SessionState::Idle,
            retry_count: 0,
            clock: ClockReference::new(),
            staleness: StalenessMonitor::new(),
            history: HistoryAggregator::new(),
            current_reading: None,
            cancel: None,
        }
    }

    /// Stop collecting (and keep what was received) once `cancel` turns true
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Drive the session to `Completed` or `Failed`
    pub async fn run<L: SessionListener>(
        mut self,
        listener: &mut L,
    ) -> Result<SessionReport, SessionError> {
        let conn = match self.connect_with_retry(listener).await {
            Ok(conn) => conn,
            Err(e) => {
                let status = match &e {
                    SessionError::RetriesExhausted { .. } => RETRIES_EXHAUSTED_STATUS.to_string(),
                    other => format!("Error occurred: {}", other),
                };
                error!("Session for {} failed: {}", self.address, e);
                self.transition(listener, SessionState::Failed, &status);
                return Err(e);
            }
        };

        let result = self.collect(&conn, listener).await;

        if let Err(e) = self.transport.disconnect(conn).await {
            warn!("Failed to disconnect from {}: {}", self.address, e);
        }

        match result {
            Ok((clock_origin, cancelled)) => {
                let samples = self.history.export();
                let status = format!("Collected {} historical records", samples.len());
                self.transition(listener, SessionState::Completed, &status);
                Ok(SessionReport {
                    address: self.address,
                    clock_origin,
                    current_reading: self.current_reading,
                    samples,
                    retries: self.retry_count,
                    cancelled,
                })
            }
            Err(e) => {
                error!("Session for {} failed: {}", self.address, e);
                self.transition(listener, SessionState::Failed, &format!("Error occurred: {}", e));
                Err(e)
            }
        }
    }

    fn transition<L: SessionListener>(&mut self, listener: &mut L, state: SessionState, status: &str) {
        info!("[{}] {} -> {}: {}", self.address, self.state, state, status);
        self.state = state;
        listener.on_transition(state, status);
    }

    /// Connecting / RetryWait loop. Only this phase is retried.
    async fn connect_with_retry<L: SessionListener>(
        &mut self,
        listener: &mut L,
    ) -> Result<T::Connection, SessionError> {
        let mut cancel = self.cancel.clone();

        loop {
            let status = format!("Trying to connect {}", self.address);
            self.transition(listener, SessionState::Connecting, &status);

            let attempt = timeout(self.settings.connect_timeout, self.transport.connect(&self.address));
            let err = match attempt.await {
                Ok(Ok(conn)) => {
                    info!("Connected to: {}", self.address);
                    return Ok(conn);
                }
                Ok(Err(e)) => e,
                Err(_) => TransportError::Timeout(self.settings.connect_timeout),
            };

            self.retry_count += 1;
            if self.retry_count >= self.settings.max_retries {
                return Err(SessionError::RetriesExhausted {
                    attempts: self.retry_count,
                    last: err,
                });
            }

            let status = format!(
                "Connection failed: {}. Retrying ({}/{})...",
                err, self.retry_count, self.settings.max_retries
            );
            self.transition(listener, SessionState::RetryWait, &status);

            tokio::select! {
                _ = sleep(self.settings.retry_backoff) => {}
                _ = cancelled_opt(cancel.as_mut()) => return Err(SessionError::Cancelled),
            }
        }
    }

    /// ReadingClock through Unsubscribing on an open connection
    ///
    /// Returns the resolved clock origin and whether collection was cancelled.
    async fn collect<L: SessionListener>(
        &mut self,
        conn: &T::Connection,
        listener: &mut L,
    ) -> Result<(OffsetDateTime, bool), SessionError> {
        self.transition(listener, SessionState::ReadingClock, &format!("Connected to: {}", self.address));
        let raw_time = self.transport.read_characteristic(conn, TIME_CHAR).await?;
        let clock_origin = self
            .clock
            .resolve(&raw_time, OffsetDateTime::now_utc())
            .map_err(SessionError::Clock)?;
        info!("Device clock origin: {}", format_datetime(&clock_origin));

        self.transition(listener, SessionState::ReadingCurrentStatus, "Reading current status...");
        self.read_current_status(conn, listener).await;

        self.transition(listener, SessionState::Subscribing, "Start to fetch historical data...");
        let mut notifications = self.transport.subscribe(conn, HISTORY_CHAR).await?;

        self.transition(listener, SessionState::Collecting, "Receiving historical data...");
        let reason = self.collect_until_idle(&mut notifications, clock_origin).await?;

        let status = match reason {
            StopReason::Stale => format!("No new data for {:?}, stopping", self.settings.stale_after),
            StopReason::NothingArrived => "Device sent no history, stopping".to_string(),
            StopReason::Cancelled => "Cancelled, stopping".to_string(),
        };
        self.transition(listener, SessionState::Unsubscribing, &status);
        drop(notifications);
        self.transport.unsubscribe(conn, HISTORY_CHAR).await?;

        Ok((clock_origin, reason == StopReason::Cancelled))
    }

    async fn read_current_status<L: SessionListener>(&mut self, conn: &T::Connection, listener: &mut L) {
        if self.current_reading.is_some() {
            return;
        }

        let raw = match self.transport.read_characteristic(conn, CURRENT_STATUS_CHAR).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Could not read current status from {}: {}", self.address, e);
                return;
            }
        };

        match decode_current_reading(&raw) {
            Ok(reading) => {
                info!(
                    "Sensor status: Temperature: {:.2}°C, RH: {}%, Voltage: {:.3}V, Battery: {:.2}%",
                    reading.temperature, reading.humidity, reading.voltage, reading.battery
                );
                listener.on_current_reading(&self.address, &reading);
                self.current_reading = Some(reading);
            }
            Err(e) => warn!("Ignoring current status from {}: {}", self.address, e),
        }
    }

    /// The Collecting state: decode every frame, poll staleness on a fixed tick
    async fn collect_until_idle(
        &mut self,
        notifications: &mut mpsc::Receiver<Vec<u8>>,
        clock_origin: OffsetDateTime,
    ) -> Result<StopReason, SessionError> {
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let subscribed_at = Instant::now();
        let mut cancel = self.cancel.clone();

        loop {
            tokio::select! {
                biased;

                _ = cancelled_opt(cancel.as_mut()) => return Ok(StopReason::Cancelled),
                frame = notifications.recv() => match frame {
                    Some(data) => self.handle_frame(&data, clock_origin),
                    None => return Err(SessionError::NotificationsClosed),
                },
                _ = ticker.tick() => {
                    let now = Instant::now();
                    if self.staleness.is_stale(now, self.settings.stale_after) {
                        return Ok(StopReason::Stale);
                    }
                    if self.history.is_empty()
                        && now.saturating_duration_since(subscribed_at) > self.settings.first_record_timeout
                    {
                        return Ok(StopReason::NothingArrived);
                    }
                }
            }
        }
    }

    fn handle_frame(&mut self, data: &[u8], clock_origin: OffsetDateTime) {
        match decode_history_record(data, clock_origin) {
            Ok(sample) => {
                debug!(
                    "History data at index {}: {} min {:.1}°C/{}% max {:.1}°C/{}%",
                    sample.index,
                    format_datetime(&sample.timestamp),
                    sample.min_temperature,
                    sample.min_humidity,
                    sample.max_temperature,
                    sample.max_humidity
                );
                self.history.append(sample);
                self.staleness.mark_activity(Instant::now());
            }
            Err(e) => warn!("Skipping history frame from {}: {}", self.address, e),
        }
    }
}

async fn cancelled_opt(cancel: Option<&mut watch::Receiver<bool>>) {
    match cancel {
        Some(rx) => cancelled(rx).await,
        None => std::future::pending().await,
    }
}
