//! Station-mode connection sequence.
//!
//! A [`ConnectionSession`] is created by the task that brings the network up.
//! It hands a [`ConnectionStateMachine`] to the event-loop subscriptions, then
//! blocks in [`ConnectionSession::wait`] until the machine raises one of the
//! two terminal outcomes. The session is consumed by the wait; reconnecting
//! after a later drop is outside its scope.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;

/// Connection attempts, the first one included, before giving up.
pub const MAX_CONNECT_ATTEMPTS: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Failed)
    }
}

/// Lifecycle notifications from the Wi-Fi and IP stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetEvent {
    StaStarted,
    StaDisconnected,
    GotIp(Ipv4Addr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Connected(Ipv4Addr),
    Failed { attempts: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitTimeout {
    #[default]
    Forever,
    After(Duration),
}

impl WaitTimeout {
    /// Zero means no timeout.
    pub fn from_secs(secs: u64) -> Self {
        match secs {
            0 => WaitTimeout::Forever,
            secs => WaitTimeout::After(Duration::from_secs(secs)),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("failed to connect after {attempts} attempts")]
    RetriesExhausted { attempts: u8 },
    #[error("no connection outcome within {0:?}")]
    TimedOut(Duration),
    #[error("SSID must be 1 to 32 bytes")]
    InvalidSsid,
    #[error("password must be at most 64 bytes")]
    InvalidPassword,
}

/// Network name and passphrase for station mode.
#[derive(Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: heapless::String<32>,
    pub password: heapless::String<64>,
}

impl WifiCredentials {
    pub fn new(ssid: &str, password: &str) -> Result<Self, ConnectionError> {
        if ssid.is_empty() {
            return Err(ConnectionError::InvalidSsid);
        }
        Ok(Self {
            ssid: ssid.try_into().map_err(|_| ConnectionError::InvalidSsid)?,
            password: password
                .try_into()
                .map_err(|_| ConnectionError::InvalidPassword)?,
        })
    }

    /// An empty password selects an open network.
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Issues association requests to the Wi-Fi driver.
pub trait Station {
    type Error: fmt::Debug;

    fn connect(&mut self) -> Result<(), Self::Error>;
}

/// One-shot outcome cell. The first raised outcome wins; later ones are
/// dropped.
#[derive(Debug, Default)]
pub struct Rendezvous {
    outcome: Mutex<Option<Outcome>>,
    raised: Condvar,
}

impl Rendezvous {
    fn raise(&self, outcome: Outcome) -> bool {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.raised.notify_all();
        true
    }

    pub fn outcome(&self) -> Option<Outcome> {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the elapsed bound if it ran out first.
    fn wait(&self, timeout: WaitTimeout) -> Result<Outcome, Duration> {
        let slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        match timeout {
            WaitTimeout::Forever => {
                let slot = self
                    .raised
                    .wait_while(slot, |outcome| outcome.is_none())
                    .unwrap_or_else(PoisonError::into_inner);
                (*slot).ok_or(Duration::MAX)
            }
            WaitTimeout::After(duration) => {
                let (slot, _) = self
                    .raised
                    .wait_timeout_while(slot, duration, |outcome| outcome.is_none())
                    .unwrap_or_else(PoisonError::into_inner);
                (*slot).ok_or(duration)
            }
        }
    }
}

/// Retry policy for the initial association.
///
/// Owns the retry counter and the state; nothing else mutates them.
pub struct ConnectionStateMachine<S> {
    station: S,
    state: ConnectionState,
    retries: u8,
    rendezvous: Arc<Rendezvous>,
}

impl<S: Station> ConnectionStateMachine<S> {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retries(&self) -> u8 {
        self.retries
    }

    /// Apply one notification. Returns the outcome if this event raised one.
    pub fn handle(&mut self, event: NetEvent) -> Option<Outcome> {
        if self.state.is_terminal() {
            debug!("Ignoring {:?} in terminal state {:?}", event, self.state);
            return None;
        }

        match event {
            NetEvent::StaStarted => {
                self.retries = 0;
                self.state = ConnectionState::Connecting;
                self.connect();
                None
            }
            NetEvent::StaDisconnected if self.state == ConnectionState::Connecting => {
                self.retries += 1;
                // Count first, then compare: the fifth consecutive disconnect fails.
                if self.retries < MAX_CONNECT_ATTEMPTS {
                    info!(
                        "Retrying connection to the AP ({}/{})",
                        self.retries + 1,
                        MAX_CONNECT_ATTEMPTS
                    );
                    self.connect();
                    None
                } else {
                    warn!("Connection to the AP failed {} times", self.retries);
                    self.state = ConnectionState::Failed;
                    self.raise(Outcome::Failed {
                        attempts: self.retries,
                    })
                }
            }
            NetEvent::StaDisconnected => {
                debug!("Disconnect before station start ignored");
                None
            }
            NetEvent::GotIp(ip) => {
                info!("Got IP: {}", ip);
                self.retries = 0;
                self.state = ConnectionState::Connected;
                self.raise(Outcome::Connected(ip))
            }
        }
    }

    fn connect(&mut self) {
        // A failed request surfaces later as a disconnect notification.
        if let Err(e) = self.station.connect() {
            warn!("Connect request rejected: {:?}", e);
        }
    }

    fn raise(&self, outcome: Outcome) -> Option<Outcome> {
        self.rendezvous.raise(outcome).then_some(outcome)
    }
}

#[derive(Debug, Default)]
pub struct ConnectionSession {
    rendezvous: Arc<Rendezvous>,
}

impl ConnectionSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh machine in `Idle`, sharing this session's rendezvous.
    pub fn state_machine<S: Station>(&self, station: S) -> ConnectionStateMachine<S> {
        ConnectionStateMachine {
            station,
            state: ConnectionState::Idle,
            retries: 0,
            rendezvous: self.rendezvous.clone(),
        }
    }

    /// Block until the machine reaches a terminal state.
    pub fn wait(self, timeout: WaitTimeout) -> Result<Ipv4Addr, ConnectionError> {
        match self.rendezvous.wait(timeout) {
            Ok(Outcome::Connected(ip)) => {
                info!("Connected to AP");
                Ok(ip)
            }
            Ok(Outcome::Failed { attempts }) => {
                warn!("Failed to connect");
                Err(ConnectionError::RetriesExhausted { attempts })
            }
            Err(waited) => {
                warn!("No connection outcome after {:?}", waited);
                Err(ConnectionError::TimedOut(waited))
            }
        }
    }
}
