//! Single long-lived push channel per authenticated session.
//!
//! The `ConnectionManager` runs on its own thread and owns the channel produced by a
//! `Connector`. The session talks to it through a `ConnectionHandle` (outbound
//! commands) and receives `ConnectionEvent`s (inbound quotes and lifecycle changes) on a
//! `crossbeam_channel` receiver, so network work never blocks dispatch.
//!
//! Lifecycle:
//! - `connect` spawns the manager, which dials with bounded exponential backoff and
//!   reports `Connected { epoch }` with a fresh epoch for every live channel.
//! - A read error, a peer close, or heartbeat silence ends the channel with `Dropped`;
//!   the manager then dials again. Once retries are exhausted it reports `Offline` and
//!   waits for `reconnect`, `update_credential`, or `disconnect`.
//! - Control frames are stamped with the epoch the session last saw. Frames from an
//!   older epoch are discarded, because after every `Connected` the session re-issues
//!   subscribe for the registry's full active set.
pub mod backoff;
pub mod liveness;
pub mod tcp;

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, select, tick, unbounded};
use feed_common::{ControlMessage, FeedError, PushMessage, QuoteUpdate, Result};
use log::{debug, error, info, warn};

use crate::config::{FeedConfig, ReconnectConfig};
use crate::connection::backoff::Backoff;
use crate::connection::liveness::LivenessMonitor;
use crate::registry::ControlSink;

/// Access token presented when the channel is opened.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    /// Wraps an access token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// The raw token.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential").field("token", &"***").finish()
    }
}

/// Writing half of an open channel.
pub trait FrameWriter: Send {
    /// Sends one control frame.
    fn send(&mut self, message: &ControlMessage) -> Result<()>;
    /// Closes the channel; the paired reader must stop soon after.
    fn close(&mut self);
}

/// Reading half of an open channel.
pub trait FrameReader: Send {
    /// Blocks for the next frame; `Ok(None)` means the peer closed the channel.
    fn next_message(&mut self) -> Result<Option<PushMessage>>;
}

/// An authenticated channel split into its two halves.
pub struct Connection {
    /// Outbound half.
    pub writer: Box<dyn FrameWriter>,
    /// Inbound half, moved onto a dedicated reader thread.
    pub reader: Box<dyn FrameReader>,
}

/// Opens authenticated channels to the push server.
pub trait Connector: Send + 'static {
    /// Dials and authenticates with `credential`.
    fn connect(&mut self, credential: &Credential) -> Result<Connection>;
}

/// Notification from the manager thread to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A channel is live; control frames must now carry `epoch`.
    Connected {
        /// Sequence number of this channel.
        epoch: u64,
    },
    /// Inbound price update.
    Quote(QuoteUpdate),
    /// The live channel was lost; a reconnect follows.
    Dropped {
        /// Human-readable cause.
        reason: String,
    },
    /// A connect attempt failed; the next one starts after `delay`.
    Reconnecting {
        /// Failed attempts so far in this cycle.
        attempt: u32,
        /// Wait before the next attempt.
        delay: Duration,
    },
    /// Retries exhausted; waiting for `reconnect` or a new credential.
    Offline {
        /// Last connect error.
        reason: String,
    },
    /// The manager stopped; no further events follow.
    Closed,
}

enum Command {
    Control { epoch: u64, message: ControlMessage },
    UpdateCredential(String),
    Reconnect,
    Disconnect,
}

/// Session-side handle used to steer the manager thread.
///
/// Clones share the current epoch. The handle is also the registry's `ControlSink`.
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: Sender<Command>,
    epoch: Rc<Cell<u64>>,
}

impl ConnectionHandle {
    /// Epoch of the channel the session last saw connect (0 while down).
    pub fn epoch(&self) -> u64 {
        self.epoch.get()
    }

    pub(crate) fn set_epoch(&self, epoch: u64) {
        self.epoch.set(epoch);
    }

    /// Swaps the access token without disturbing subscriptions.
    pub fn update_credential(&self, token: impl Into<String>) -> Result<()> {
        self.send(Command::UpdateCredential(token.into()))
    }

    /// Drops the current channel (if any) and dials again with a fresh backoff.
    pub fn reconnect(&self) -> Result<()> {
        self.send(Command::Reconnect)
    }

    /// Closes the channel and stops the manager thread.
    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| FeedError::ChannelSend("connection manager stopped".into()))
    }
}

impl ControlSink for ConnectionHandle {
    fn send_control(&self, message: ControlMessage) {
        let epoch = self.epoch.get();
        if self.commands.send(Command::Control { epoch, message }).is_err() {
            debug!("Connection manager stopped, control frame dropped");
        }
    }
}

enum Establish {
    Connected(Connection),
    Offline,
    Closed,
}

enum Wait {
    Elapsed,
    Retry,
    Stop,
}

enum Pump {
    Dropped(String),
    Closed,
}

/// Owner of the push channel, running on a dedicated thread.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    credential: Credential,
    commands: Receiver<Command>,
    events: Sender<ConnectionEvent>,
    epoch: u64,
    reconnect: ReconnectConfig,
    heartbeat_interval: Duration,
    idle_timeout: Duration,
}

impl<C: Connector> ConnectionManager<C> {
    /// Spawns the manager thread and starts dialing.
    ///
    /// Events are delivered on `events` in the order they happen.
    pub fn connect(
        connector: C,
        credential: Credential,
        config: &FeedConfig,
        events: Sender<ConnectionEvent>,
    ) -> Result<(ConnectionHandle, JoinHandle<()>)> {
        let (commands_tx, commands_rx) = unbounded();
        let manager = ConnectionManager {
            connector,
            credential,
            commands: commands_rx,
            events,
            epoch: 0,
            reconnect: config.reconnect.clone(),
            heartbeat_interval: config.heartbeat_interval(),
            idle_timeout: config.idle_timeout(),
        };
        let join = thread::Builder::new()
            .name("feed-connection".into())
            .spawn(move || manager.run())?;
        let handle = ConnectionHandle {
            commands: commands_tx,
            epoch: Rc::new(Cell::new(0)),
        };
        Ok((handle, join))
    }

    fn run(mut self) {
        info!("Connection manager started");
        loop {
            let connection = match self.establish() {
                Establish::Connected(connection) => connection,
                Establish::Offline => {
                    if self.wait_for_restart() {
                        continue;
                    }
                    break;
                }
                Establish::Closed => break,
            };

            self.epoch += 1;
            info!("Push channel connected (epoch {})", self.epoch);
            if !self.emit(ConnectionEvent::Connected { epoch: self.epoch }) {
                let mut connection = connection;
                connection.writer.close();
                break;
            }

            match self.pump(connection) {
                Pump::Dropped(reason) => {
                    warn!("Push channel dropped: {}", reason);
                    if !self.emit(ConnectionEvent::Dropped { reason }) {
                        break;
                    }
                }
                Pump::Closed => break,
            }
        }
        self.emit(ConnectionEvent::Closed);
        info!("Connection manager stopped");
    }

    fn emit(&self, event: ConnectionEvent) -> bool {
        self.events.send(event).is_ok()
    }

    fn establish(&mut self) -> Establish {
        let mut backoff = Backoff::new(
            self.reconnect.initial_backoff(),
            self.reconnect.max_backoff(),
        );
        let mut failures = 0u32;
        loop {
            match self.connector.connect(&self.credential) {
                Ok(connection) => return Establish::Connected(connection),
                Err(e) => {
                    failures += 1;
                    warn!(
                        "Connect attempt {}/{} failed: {}",
                        failures, self.reconnect.max_attempts, e
                    );
                    if failures >= self.reconnect.max_attempts {
                        error!("Giving up after {} attempts, going offline", failures);
                        self.emit(ConnectionEvent::Offline {
                            reason: e.to_string(),
                        });
                        return Establish::Offline;
                    }
                    let delay = backoff.next_delay();
                    self.emit(ConnectionEvent::Reconnecting {
                        attempt: failures,
                        delay,
                    });
                    match self.wait(delay) {
                        Wait::Elapsed => {}
                        Wait::Retry => {
                            backoff.reset();
                            failures = 0;
                        }
                        Wait::Stop => return Establish::Closed,
                    }
                }
            }
        }
    }

    /// Sleeps for `delay` while still answering commands.
    fn wait(&mut self, delay: Duration) -> Wait {
        let deadline = Instant::now() + delay;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.commands.recv_timeout(remaining) {
                Ok(Command::Control { message, .. }) => {
                    debug!("Dropping {:?} while disconnected", message);
                }
                Ok(Command::UpdateCredential(token)) => {
                    self.credential = Credential::new(token);
                    return Wait::Retry;
                }
                Ok(Command::Reconnect) => return Wait::Retry,
                Ok(Command::Disconnect) | Err(RecvTimeoutError::Disconnected) => {
                    return Wait::Stop;
                }
                Err(RecvTimeoutError::Timeout) => return Wait::Elapsed,
            }
        }
    }

    /// Blocks in the offline state; `true` means dial again.
    fn wait_for_restart(&mut self) -> bool {
        loop {
            match self.commands.recv() {
                Ok(Command::Control { message, .. }) => {
                    debug!("Dropping {:?} while offline", message);
                }
                Ok(Command::UpdateCredential(token)) => {
                    self.credential = Credential::new(token);
                    return true;
                }
                Ok(Command::Reconnect) => return true,
                Ok(Command::Disconnect) | Err(_) => return false,
            }
        }
    }

    /// Shuttles frames for one live channel until it ends.
    fn pump(&mut self, connection: Connection) -> Pump {
        let Connection { mut writer, reader } = connection;
        let (inbound_tx, inbound_rx) = unbounded();
        let reader_thread = thread::Builder::new()
            .name(format!("feed-reader-{}", self.epoch))
            .spawn(move || read_loop(reader, inbound_tx));
        if let Err(e) = reader_thread {
            writer.close();
            return Pump::Dropped(format!("cannot start reader thread: {}", e));
        }

        let commands = self.commands.clone();
        let heartbeat = tick(self.heartbeat_interval);
        let mut liveness = LivenessMonitor::new(self.idle_timeout);

        let outcome = 'pump: loop {
            select! {
                recv(commands) -> command => match command {
                    Ok(Command::Control { epoch, message }) => {
                        if epoch != self.epoch {
                            debug!("Dropping {:?} issued under epoch {}", message, epoch);
                            continue 'pump;
                        }
                        debug!("Sending {:?}", message);
                        if let Err(e) = writer.send(&message) {
                            break 'pump Pump::Dropped(e.to_string());
                        }
                    }
                    Ok(Command::UpdateCredential(token)) => {
                        self.credential = Credential::new(token);
                        let auth = ControlMessage::Authenticate {
                            token: self.credential.token().to_string(),
                        };
                        if let Err(e) = writer.send(&auth) {
                            break 'pump Pump::Dropped(e.to_string());
                        }
                        info!("Credential updated in place");
                    }
                    Ok(Command::Reconnect) => {
                        break 'pump Pump::Dropped("reconnect requested".into());
                    }
                    Ok(Command::Disconnect) | Err(_) => break 'pump Pump::Closed,
                },
                recv(inbound_rx) -> frame => match frame {
                    Ok(Ok(PushMessage::Quote(update))) => {
                        liveness.record();
                        if !self.emit(ConnectionEvent::Quote(update)) {
                            break 'pump Pump::Closed;
                        }
                    }
                    Ok(Ok(PushMessage::Pong)) => {
                        liveness.record();
                        debug!("PONG received");
                    }
                    Ok(Err(e)) => break 'pump Pump::Dropped(e.to_string()),
                    Err(_) => break 'pump Pump::Dropped("reader stopped".into()),
                },
                recv(heartbeat) -> _ => {
                    if liveness.is_expired() {
                        break 'pump Pump::Dropped(format!(
                            "no frames for {:?}",
                            liveness.silence()
                        ));
                    }
                    if let Err(e) = writer.send(&ControlMessage::Ping) {
                        break 'pump Pump::Dropped(e.to_string());
                    }
                    debug!("PING sent");
                }
            }
        };
        writer.close();
        outcome
    }
}

fn read_loop(mut reader: Box<dyn FrameReader>, inbound: Sender<Result<PushMessage>>) {
    loop {
        match reader.next_message() {
            Ok(Some(message)) => {
                if inbound.send(Ok(message)).is_err() {
                    break;
                }
            }
            Ok(None) => {
                let _ = inbound.send(Err(FeedError::Connection("closed by peer".into())));
                break;
            }
            Err(e) => {
                let _ = inbound.send(Err(e));
                break;
            }
        }
    }
    debug!("Reader thread stopping");
}
