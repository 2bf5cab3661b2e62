use std::time::Duration;

use crate::backoff::{Backoff, BackoffPolicy};

/// Connection lifecycle for the live channel.
///
/// Disconnected → Connecting → Connected → (Closing | Errored) → Disconnected → …
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Errored,
}

/// Transport-free state machine driving connect/reconnect decisions.
///
/// The socket owner reports events; the machine answers with the reconnect
/// delay. After `shutdown` it never schedules another attempt.
#[derive(Debug, Clone)]
pub struct Link {
    state: LinkState,
    backoff: Backoff,
    shut_down: bool,
    last_loss: Option<LinkState>,
    attempts: u64,
    connections: u64,
}

impl Link {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: LinkState::Disconnected,
            backoff: Backoff::new(policy),
            shut_down: false,
            last_loss: None,
            attempts: 0,
            connections: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// How the most recent connection ended (`Closing` or `Errored`).
    pub fn last_loss(&self) -> Option<LinkState> {
        self.last_loss
    }

    /// Connection attempts made so far.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Successful opens so far.
    pub fn connections(&self) -> u64 {
        self.connections
    }

    /// Begin a connection attempt. Returns `false` when one is already under
    /// way or the link has been shut down.
    pub fn start(&mut self) -> bool {
        if self.shut_down || self.state != LinkState::Disconnected {
            return false;
        }
        self.state = LinkState::Connecting;
        self.attempts += 1;
        true
    }

    pub fn opened(&mut self) {
        if self.state == LinkState::Connecting {
            self.state = LinkState::Connected;
            self.connections += 1;
            self.backoff.reset();
        }
    }

    /// Peer closed the connection. Returns the reconnect delay, if any.
    pub fn closed(&mut self) -> Option<Duration> {
        self.lose(LinkState::Closing)
    }

    /// Transport error. Returns the reconnect delay, if any.
    pub fn failed(&mut self) -> Option<Duration> {
        self.lose(LinkState::Errored)
    }

    /// Terminal: no further reconnects are scheduled.
    pub fn shutdown(&mut self) {
        self.shut_down = true;
        self.state = LinkState::Disconnected;
    }

    fn lose(&mut self, via: LinkState) -> Option<Duration> {
        // A close that follows an error (or vice versa) reports the same loss.
        if !matches!(self.state, LinkState::Connecting | LinkState::Connected) {
            return None;
        }
        self.last_loss = Some(via);
        self.state = LinkState::Disconnected;
        if self.shut_down {
            return None;
        }
        Some(self.backoff.next_delay())
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}
