// MIT License - Copyright (c) 2026 Peter Wright

//! Connection lifecycle: socket, handshake, dialect negotiation, reconnect.
//!
//! One connection "generation" covers a single socket from TCP connect to
//! loss. Each generation bumps a counter, and every deferred actor (reader
//! task, keepalive task, loss notifications) carries its generation so work
//! from a torn-down connection can never touch the current one.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, interval, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::{PanelConfig, PanelType};
use crate::detect::{Topology, resolve, run_detection};
use crate::error::{ArrowheadError, Result};
use crate::event::{EventSender, PanelEvent};
use crate::message::{Message, parse_line};
use crate::protocol::{
    Command, ProtocolMode, extract_version_number, firmware_supports_mode4,
};
use crate::state::StateStore;
use crate::transport::command::CommandEngine;
use crate::transport::link::{LinkLoss, spawn_reader};

/// Connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    /// Reconnection gave up after the configured number of attempts
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// State shared between the public handle, the supervisor, and per-
/// generation tasks.
pub(crate) struct SessionShared {
    pub store: Arc<StateStore>,
    pub engine: RwLock<Option<Arc<CommandEngine>>>,
    pub topology: RwLock<Option<Topology>>,
    pub generation: AtomicU64,
    reader_task: RwLock<Option<JoinHandle<()>>>,
    keepalive_task: RwLock<Option<JoinHandle<()>>>,
}

impl SessionShared {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            store,
            engine: RwLock::new(None),
            topology: RwLock::new(None),
            generation: AtomicU64::new(0),
            reader_task: RwLock::new(None),
            keepalive_task: RwLock::new(None),
        }
    }

    pub async fn engine(&self) -> Result<Arc<CommandEngine>> {
        self.engine
            .read()
            .await
            .clone()
            .ok_or(ArrowheadError::NotConnected)
    }

    /// Best-effort task cancellation for Drop, where we cannot await.
    pub(crate) fn abort_tasks(&self) {
        if let Ok(mut guard) = self.reader_task.try_write() {
            if let Some(h) = guard.take() {
                h.abort();
            }
        }
        if let Ok(mut guard) = self.keepalive_task.try_write() {
            if let Some(h) = guard.take() {
                h.abort();
            }
        }
    }
}

/// Tear down the current generation: cancel its tasks and fail the pending
/// command with a connection-lost error.
pub(crate) async fn teardown(shared: &SessionShared) {
    if let Some(h) = shared.reader_task.write().await.take() {
        h.abort();
    }
    if let Some(h) = shared.keepalive_task.write().await.take() {
        h.abort();
    }
    if let Some(engine) = shared.engine.write().await.take() {
        engine.shutdown().await;
    }
}

/// Initial connection with retries, mirroring the reconnect schedule.
/// Returns once `Connected`, or with the last error after the configured
/// attempts (non-retryable errors, e.g. bad credentials, fail immediately).
pub(crate) async fn establish(
    shared: &Arc<SessionShared>,
    config: &PanelConfig,
    lost_tx: &mpsc::Sender<LinkLoss>,
) -> Result<()> {
    let seed = jitter_seed();
    let mut attempt: u32 = 0;
    loop {
        match connect_once(shared, config, lost_tx).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                attempt += 1;
                let exhausted = config
                    .max_reconnect_attempts
                    .is_some_and(|max| attempt >= max);
                if !e.is_retryable() || exhausted {
                    shared.store.set_connection_state(ConnectionState::Failed).await;
                    return Err(e);
                }
                shared
                    .store
                    .set_connection_state(ConnectionState::Disconnected)
                    .await;
                shared.store.set_retry_count(attempt).await;
                let delay = backoff_delay(
                    config.reconnect_base_delay_ms,
                    config.reconnect_max_delay_ms,
                    attempt,
                    seed,
                );
                warn!(
                    "Connection attempt {} failed ({}); retrying in {:.1}s",
                    attempt,
                    e,
                    delay.as_secs_f64()
                );
                sleep(delay).await;
            }
        }
    }
}

/// Watch for link loss and reconnect with backoff. Runs until shutdown.
pub(crate) fn spawn_supervisor(
    shared: Arc<SessionShared>,
    config: PanelConfig,
    event_tx: EventSender,
    mut lost_rx: mpsc::Receiver<LinkLoss>,
    lost_tx: mpsc::Sender<LinkLoss>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let seed = jitter_seed();
        let reset_after = Duration::from_millis(config.backoff_reset_after_ms);
        let mut connected_at = Instant::now();
        let mut carried_attempts: u32 = 0;

        loop {
            let loss = tokio::select! {
                _ = shutdown_rx.changed() => break,
                loss = lost_rx.recv() => match loss {
                    Some(loss) => loss,
                    None => break,
                },
            };
            // A loss report from a generation we already replaced is stale.
            if loss.generation != shared.generation.load(Ordering::SeqCst) {
                debug!("Ignoring stale loss report (generation {})", loss.generation);
                continue;
            }

            teardown(&shared).await;
            shared
                .store
                .set_connection_state(ConnectionState::Disconnected)
                .await;
            warn!("Connection to panel lost; scheduling reconnect");

            // A connection that held for a while earns a fresh backoff run.
            let mut attempt = if connected_at.elapsed() >= reset_after {
                0
            } else {
                carried_attempts
            };

            let reconnected = loop {
                attempt += 1;
                if config
                    .max_reconnect_attempts
                    .is_some_and(|max| attempt > max)
                {
                    break false;
                }
                let delay = backoff_delay(
                    config.reconnect_base_delay_ms,
                    config.reconnect_max_delay_ms,
                    attempt,
                    seed,
                );
                info!(
                    "Reconnect attempt {} in {:.1}s",
                    attempt,
                    delay.as_secs_f64()
                );
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = sleep(delay) => {}
                }
                match connect_once(&shared, &config, &lost_tx).await {
                    Ok(()) => break true,
                    Err(e) if e.is_retryable() => {
                        warn!("Reconnect attempt {} failed: {}", attempt, e);
                        shared
                            .store
                            .set_connection_state(ConnectionState::Disconnected)
                            .await;
                        shared.store.set_retry_count(attempt).await;
                    }
                    Err(e) => {
                        error!("Reconnect failed with non-retryable error: {}", e);
                        break false;
                    }
                }
            };

            if reconnected {
                connected_at = Instant::now();
                carried_attempts = attempt;
                info!("Panel reconnected");
            } else {
                shared.store.set_connection_state(ConnectionState::Failed).await;
                let _ = event_tx.send(PanelEvent::ConnectionFailed { attempts: attempt });
                error!("Giving up on reconnection after {} attempts", attempt);
                // Park until shutdown; a manual restart builds a new session.
            }
        }
    })
}

/// One full connection attempt: TCP connect, authenticate, negotiate the
/// dialect, resolve topology (first connect only), seed the store, spawn
/// the per-generation tasks.
async fn connect_once(
    shared: &Arc<SessionShared>,
    config: &PanelConfig,
    lost_tx: &mpsc::Sender<LinkLoss>,
) -> Result<()> {
    let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

    shared
        .store
        .set_connection_state(ConnectionState::Connecting)
        .await;

    let addr = format!("{}:{}", config.host, config.port);
    info!("Connecting to panel at {}", addr);
    let stream = timeout(
        Duration::from_millis(config.connect_timeout_ms),
        TcpStream::connect(&addr),
    )
    .await
    .map_err(|_| ArrowheadError::ConnectionTimeout)?
    .map_err(|e| {
        error!("TCP connect failed: {}", e);
        ArrowheadError::Io(e)
    })?;

    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;

    shared
        .store
        .set_connection_state(ConnectionState::Authenticating)
        .await;
    authenticate(&mut reader, &mut writer, config).await?;
    debug!("Authentication successful");

    let (mode, firmware) = negotiate_mode(&mut reader, &mut writer, config).await?;
    info!(
        "Session dialect: {}{}",
        mode,
        firmware
            .as_deref()
            .map(|v| format!(" (firmware {})", v))
            .unwrap_or_default()
    );

    let engine = Arc::new(CommandEngine::new(
        writer,
        Duration::from_millis(config.command_timeout_ms),
    ));
    let reader_handle = spawn_reader(
        reader,
        engine.clone(),
        shared.store.clone(),
        mode,
        config.panel_type.supports_rf(),
        generation,
        lost_tx.clone(),
    );
    *shared.reader_task.write().await = Some(reader_handle);

    // Topology is resolved once per session; reconnects reuse it so that
    // sticky state (bypass) survives re-seeding.
    let topology = {
        let cached = shared.topology.read().await.clone();
        match cached {
            Some(t) => t,
            None => {
                let detected = if config.auto_detect && config.panel_type.supports_detection() {
                    match run_detection(&engine).await {
                        Ok(d) => Some(d),
                        Err(e) => {
                            warn!("Topology detection failed, using fallback: {}", e);
                            None
                        }
                    }
                } else {
                    None
                };
                let t = resolve(detected, config);
                if t.fallback {
                    warn!(
                        "Topology fell back to defaults ({} zones, {} areas)",
                        t.zones.len(),
                        t.areas.len()
                    );
                }
                *shared.topology.write().await = Some(t.clone());
                t
            }
        }
    };
    shared.store.seed(&topology, config).await;
    shared.store.set_session_info(mode, firmware).await;

    *shared.engine.write().await = Some(engine.clone());
    shared.store.set_retry_count(0).await;
    shared
        .store
        .set_connection_state(ConnectionState::Connected)
        .await;

    // Prime the state model; the panel answers with a burst of status lines.
    if let Err(e) = engine.send(&Command::Status).await {
        warn!("Initial STATUS poll failed: {}", e);
    }

    let keepalive = spawn_keepalive(
        shared.clone(),
        engine,
        config.clone(),
        generation,
        lost_tx.clone(),
    );
    *shared.keepalive_task.write().await = Some(keepalive);

    Ok(())
}

/// Authenticate a fresh socket.
///
/// Panels with telnet-style login protection present a `login:` banner;
/// panels without it stay silent, in which case any reply to a STATUS
/// probe proves we are talking to the automation port.
async fn authenticate(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    config: &PanelConfig,
) -> Result<()> {
    let auth_timeout = Duration::from_millis(config.auth_timeout_ms());

    match read_line_timeout(reader, auth_timeout).await? {
        Some(banner) if banner.to_lowercase().contains("login:") => {
            debug!("Login banner received, authenticating as {}", config.username);
            write_line(writer, &config.username).await?;

            let prompt = read_line_timeout(reader, auth_timeout)
                .await?
                .ok_or_else(|| auth_error("no password prompt"))?;
            if !prompt.to_lowercase().contains("password:") {
                return Err(auth_error(&format!(
                    "unexpected reply to username: {}",
                    prompt
                )));
            }
            write_line(writer, &config.password).await?;

            let verdict = read_line_timeout(reader, auth_timeout)
                .await?
                .ok_or_else(|| auth_error("no reply to password"))?;
            let lower = verdict.to_lowercase();
            if lower.contains("welcome") || lower.contains("ready") || lower.contains("ok") {
                Ok(())
            } else {
                Err(auth_error(&format!("panel rejected credentials: {}", verdict)))
            }
        }
        // Either a non-login banner or silence: probe the port directly.
        _ => {
            debug!("No login banner, probing with STATUS");
            write_line(writer, "STATUS").await?;
            match read_line_timeout(reader, auth_timeout).await? {
                Some(_) => Ok(()),
                None => Err(auth_error("no response to STATUS probe")),
            }
        }
    }
}

fn auth_error(reason: &str) -> ArrowheadError {
    ArrowheadError::Auth {
        reason: reason.to_string(),
    }
}

/// Fix the session dialect: MODE 4 needs both a firmware at or above the
/// threshold and an explicit OK on the capability probe; anything less
/// falls back to MODE 1.
async fn negotiate_mode(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    config: &PanelConfig,
) -> Result<(ProtocolMode, Option<String>)> {
    if config.panel_type != PanelType::Eci {
        return Ok((ProtocolMode::Mode1, None));
    }

    let window = Duration::from_millis(config.command_timeout_ms);

    write_line(writer, &Command::Version.to_wire_string()).await?;
    let banner = scan_for(reader, window, |msg| match msg {
        Message::VersionReply(banner) => Some(banner),
        _ => None,
    })
    .await?;

    let Some(banner) = banner else {
        warn!("No reply to VERSION query; staying on MODE 1");
        return Ok((ProtocolMode::Mode1, None));
    };

    let Some(version) = extract_version_number(&banner).map(str::to_string) else {
        warn!("Unparseable firmware banner {:?}; staying on MODE 1", banner);
        return Ok((ProtocolMode::Mode1, Some(banner)));
    };
    info!("Panel firmware version: {}", version);

    if !firmware_supports_mode4(&version) {
        return Ok((ProtocolMode::Mode1, Some(banner)));
    }

    write_line(writer, &Command::ModeProbe.to_wire_string()).await?;
    let confirmed = scan_for(reader, window, |msg| match msg {
        Message::Ok(_) => Some(true),
        Message::Error(_) => Some(false),
        _ => None,
    })
    .await?;

    match confirmed {
        Some(true) => Ok((ProtocolMode::Mode4, Some(banner))),
        Some(false) => {
            info!("Panel declined MODE 4, staying on MODE 1");
            Ok((ProtocolMode::Mode1, Some(banner)))
        }
        None => {
            warn!("MODE 4 probe timed out; staying on MODE 1");
            Ok((ProtocolMode::Mode1, Some(banner)))
        }
    }
}

/// Read lines until `pick` extracts a value or the window elapses.
/// Unsolicited status lines interleaved with the handshake are skipped.
async fn scan_for<T>(
    reader: &mut BufReader<OwnedReadHalf>,
    window: Duration,
    pick: impl Fn(Message) -> Option<T>,
) -> Result<Option<T>> {
    let deadline = Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        match read_line_timeout(reader, remaining).await? {
            Some(line) => {
                let msg = parse_line(&line, ProtocolMode::Mode1, false);
                if let Some(value) = pick(msg) {
                    return Ok(Some(value));
                }
            }
            None => return Ok(None),
        }
    }
}

/// Read one line with a timeout. `Ok(None)` = window elapsed;
/// `ConnectionLost` = EOF.
async fn read_line_timeout(
    reader: &mut BufReader<OwnedReadHalf>,
    window: Duration,
) -> Result<Option<String>> {
    let mut buf = String::new();
    match timeout(window, reader.read_line(&mut buf)).await {
        Err(_) => Ok(None),
        Ok(Ok(0)) => Err(ArrowheadError::ConnectionLost),
        Ok(Ok(_)) => Ok(Some(buf.trim().to_string())),
        Ok(Err(e)) => Err(e.into()),
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> Result<()> {
    writer.write_all(format!("{}\n", line).as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Liveness watchdog for one generation: polls STATUS after a silence
/// window, and declares the socket dead after the idle timeout.
fn spawn_keepalive(
    shared: Arc<SessionShared>,
    engine: Arc<CommandEngine>,
    config: PanelConfig,
    generation: u64,
    lost_tx: mpsc::Sender<LinkLoss>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let liveness_ms = config.liveness_window_ms() as i64;
        let idle_ms = config.idle_timeout_ms as i64;
        let mut ticker = interval(Duration::from_millis(config.scan_interval_ms));
        ticker.tick().await; // immediate first tick

        loop {
            ticker.tick().await;
            // Generation guard: a keepalive outliving its connection must
            // never poll or kill the replacement.
            if shared.generation.load(Ordering::SeqCst) != generation {
                break;
            }
            let silent_ms = match shared.store.last_contact().await {
                Some(t) => (Utc::now() - t).num_milliseconds(),
                None => i64::MAX,
            };
            if silent_ms >= idle_ms {
                warn!(
                    "No panel traffic for {}ms; treating socket as dead",
                    silent_ms
                );
                engine.mark_disconnected();
                let _ = lost_tx.send(LinkLoss { generation }).await;
                break;
            }
            if silent_ms >= liveness_ms {
                debug!("Silence of {}ms; sending STATUS poll", silent_ms);
                if let Err(e) = engine.send(&Command::Status).await {
                    warn!("Liveness STATUS poll failed: {}", e);
                }
            }
        }
    })
}

/// Exponential backoff with bounded jitter.
///
/// The delay doubles per attempt up to the cap; jitter adds 0-25% of the
/// step, which desynchronizes retries without ever making the sequence
/// decrease (1.25x of step n is below 2x of step n).
pub(crate) fn backoff_delay(base_ms: u64, max_ms: u64, attempt: u32, seed: u64) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let raw = base_ms.saturating_mul(1u64 << shift);
    if raw >= max_ms {
        return Duration::from_millis(max_ms);
    }
    let jitter_frac = splitmix64(seed ^ u64::from(attempt)) % 250; // per-mille, 0-249
    let jittered = raw + raw.saturating_mul(jitter_frac) / 1000;
    Duration::from_millis(jittered.min(max_ms))
}

fn jitter_seed() -> u64 {
    u64::from(std::process::id()) ^ 0x9e37_79b9_7f4a_7c15
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_monotonic_up_to_cap() {
        for seed in [1u64, 42, 777] {
            let mut prev = Duration::ZERO;
            for attempt in 1..=12 {
                let d = backoff_delay(1_000, 60_000, attempt, seed);
                assert!(
                    d >= prev,
                    "delay decreased at attempt {} (seed {}): {:?} < {:?}",
                    attempt,
                    seed,
                    d,
                    prev
                );
                assert!(d <= Duration::from_millis(60_000));
                prev = d;
            }
            assert_eq!(prev, Duration::from_millis(60_000));
        }
    }

    #[test]
    fn test_backoff_jitter_bounded() {
        for attempt in 1..=5u32 {
            let raw = 1_000u64 * (1 << (attempt - 1));
            for seed in 0..50u64 {
                let d = backoff_delay(1_000, 600_000, attempt, seed).as_millis() as u64;
                assert!(d >= raw, "below base at attempt {}", attempt);
                assert!(
                    d < raw + raw / 4 + 1,
                    "jitter above 25% at attempt {}: {} vs raw {}",
                    attempt,
                    d,
                    raw
                );
            }
        }
    }

    #[test]
    fn test_backoff_caps() {
        assert_eq!(
            backoff_delay(10_000, 300_000, 30, 7),
            Duration::from_millis(300_000)
        );
        // Attempt numbering is 1-based; attempt 1 is the base delay plus jitter
        let first = backoff_delay(10_000, 300_000, 1, 7).as_millis() as u64;
        assert!((10_000..12_500).contains(&first));
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Authenticating.to_string(), "authenticating");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Failed.to_string(), "failed");
    }
}
