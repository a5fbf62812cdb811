//! Single-threaded event loop of an authenticated session.
//!
//! A `Session` owns the `SubscriptionRegistry` and the session side of the connection
//! manager. Everything that touches subscription state (mounts, unmounts, inbound
//! quotes, reconnects) runs on the thread that calls `poll`, one event at a time, so
//! per-symbol delivery is FIFO and refcount updates never interleave.
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use feed_common::{FeedError, Result};
use log::{debug, info, warn};
use strum_macros::Display;

use crate::config::FeedConfig;
use crate::connection::{
    ConnectionEvent, ConnectionHandle, ConnectionManager, Connector, Credential,
};
use crate::model::quote::QuoteMergePolicy;
use crate::registry::SubscriptionRegistry;

/// Poll interval used by `run_until`.
const POLL_INTERVAL_MS: u64 = 100;

/// Connection status as seen by the UI ("no internet" banner and friends).
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ConnectionState {
    /// Dialing for the first time.
    Connecting,
    /// Live channel; quotes are current.
    Online,
    /// Channel lost, dialing again.
    Reconnecting {
        /// Failed attempts in the current cycle.
        attempt: u32,
    },
    /// Retries exhausted; quotes are stale until `reconnect`.
    Offline,
    /// Disconnected for good.
    Closed,
}

type StateListener = Box<dyn FnMut(&ConnectionState)>;

/// Live quote session: registry, connection, and the loop between them.
pub struct Session {
    registry: SubscriptionRegistry,
    connection: ConnectionHandle,
    events: Receiver<ConnectionEvent>,
    state: ConnectionState,
    state_listeners: Vec<StateListener>,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    /// Starts the connection manager and creates an empty registry.
    pub fn start<C: Connector>(
        config: &FeedConfig,
        connector: C,
        credential: Credential,
    ) -> Result<Self> {
        config.validate()?;
        let (events_tx, events_rx) = unbounded();
        let (connection, worker) =
            ConnectionManager::connect(connector, credential, config, events_tx)?;
        let registry = SubscriptionRegistry::new(
            connection.clone(),
            QuoteMergePolicy::new(config.series_capacity),
        );
        info!("Session started");
        Ok(Self {
            registry,
            connection,
            events: events_rx,
            state: ConnectionState::Connecting,
            state_listeners: Vec::new(),
            worker: Some(worker),
        })
    }

    /// Registry handle to pass to UI components.
    pub fn registry(&self) -> SubscriptionRegistry {
        self.registry.clone()
    }

    /// Current connection status.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Epoch of the live channel, 0 while down.
    pub fn epoch(&self) -> u64 {
        self.connection.epoch()
    }

    /// Registers a callback fired on every status change.
    pub fn on_state_change(&mut self, listener: impl FnMut(&ConnectionState) + 'static) {
        self.state_listeners.push(Box::new(listener));
    }

    /// Handles at most one event, waiting up to `timeout` for it.
    ///
    /// Returns `false` once the session is closed.
    pub fn poll(&mut self, timeout: Duration) -> bool {
        match self.events.recv_timeout(timeout) {
            Ok(event) => self.handle_event(event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                if self.state != ConnectionState::Closed {
                    self.registry.mark_stale();
                    self.set_state(ConnectionState::Closed);
                }
            }
        }
        self.state != ConnectionState::Closed
    }

    /// Polls until `shutdown` is set or the session closes.
    pub fn run_until(&mut self, shutdown: &AtomicBool) {
        let interval = Duration::from_millis(POLL_INTERVAL_MS);
        while !shutdown.load(Ordering::Relaxed) {
            if !self.poll(interval) {
                break;
            }
        }
    }

    /// Swaps the access token; subscriptions stay in place.
    pub fn update_credential(&self, token: impl Into<String>) -> Result<()> {
        self.connection.update_credential(token)
    }

    /// Forces a fresh connect cycle, e.g. from the offline banner's retry button.
    pub fn reconnect(&self) -> Result<()> {
        self.connection.reconnect()
    }

    /// Closes the channel and marks every quote stale.
    pub fn disconnect(&mut self) -> Result<()> {
        self.registry.mark_stale();
        self.connection.set_epoch(0);
        self.connection.disconnect()
    }

    /// Logout: releases every subscription, closes the channel, and joins the manager.
    pub fn shutdown(mut self) -> Result<()> {
        self.registry.teardown();
        if let Err(e) = self.connection.disconnect() {
            debug!("Disconnect on shutdown: {}", e);
        }
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| FeedError::Connection("connection thread panicked".into()))?;
        }
        while let Ok(event) = self.events.try_recv() {
            debug!("Discarding {:?} after shutdown", event);
        }
        self.set_state(ConnectionState::Closed);
        info!("Session shut down");
        Ok(())
    }

    fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { epoch } => {
                self.connection.set_epoch(epoch);
                self.registry.resubscribe_all();
                self.set_state(ConnectionState::Online);
            }
            ConnectionEvent::Quote(update) => {
                let outcome = self.registry.dispatch(&update);
                debug!("{} update: {:?}", update.symbol, outcome);
            }
            ConnectionEvent::Dropped { reason } => {
                warn!("Channel dropped ({}), quotes are stale", reason);
                self.connection.set_epoch(0);
                self.registry.mark_stale();
                self.set_state(ConnectionState::Reconnecting { attempt: 0 });
            }
            ConnectionEvent::Reconnecting { attempt, delay } => {
                debug!("Reconnect attempt {} in {:?}", attempt, delay);
                self.set_state(ConnectionState::Reconnecting { attempt });
            }
            ConnectionEvent::Offline { reason } => {
                warn!("Offline: {}", reason);
                self.connection.set_epoch(0);
                self.registry.mark_stale();
                self.set_state(ConnectionState::Offline);
            }
            ConnectionEvent::Closed => {
                self.connection.set_epoch(0);
                self.registry.mark_stale();
                self.set_state(ConnectionState::Closed);
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        info!("Connection state: {} -> {}", self.state, state);
        self.state = state;
        for listener in &mut self.state_listeners {
            listener(&self.state);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.connection.disconnect();
        }
    }
}
