//! Per-connection peer state machine.
//!
//! ```text
//! Connecting --Ready--> Authenticating --Identity/Welcome--> Active
//!      \___________________\_______________________________\--> Disconnected
//! ```
//!
//! Kicks, transport closes and heartbeat timeouts move any state to
//! `Disconnected`, which is terminal.

use std::fmt;

/// Lifecycle state of one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// Transport open, waiting for `Ready`.
    Connecting,
    /// `Ready` seen, waiting for `Identity` (server) or `Welcome` (client).
    Authenticating,
    /// Fully joined; gameplay messages are accepted.
    Active,
    Disconnected,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerState::Connecting => "connecting",
            PeerState::Authenticating => "authenticating",
            PeerState::Active => "active",
            PeerState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// What drives a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Ready,
    /// Identity accepted and the welcome exchanged.
    Authenticated,
    Disconnect,
}

/// Errors raised by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The event is not valid in the current state.
    #[error("unexpected {event:?} while {state}")]
    InvalidTransition {
        state: PeerState,
        event: SessionEvent,
    },
    /// The identity exchange failed.
    #[error("authentication failed: {0}")]
    Rejected(String),
}

impl PeerState {
    /// The state after `event`, or an error if the event is out of order.
    pub fn advance(self, event: SessionEvent) -> Result<PeerState, SessionError> {
        match (self, event) {
            (PeerState::Disconnected, _) => {
                Err(SessionError::InvalidTransition { state: self, event })
            }
            (_, SessionEvent::Disconnect) => Ok(PeerState::Disconnected),
            (PeerState::Connecting, SessionEvent::Ready) => Ok(PeerState::Authenticating),
            (PeerState::Authenticating, SessionEvent::Authenticated) => Ok(PeerState::Active),
            _ => Err(SessionError::InvalidTransition { state: self, event }),
        }
    }

    pub fn is_active(self) -> bool {
        self == PeerState::Active
    }

    pub fn is_connected(self) -> bool {
        self != PeerState::Disconnected
    }
}

/// A peer's current state plus a transition counter.
#[derive(Debug, Clone)]
pub struct Session {
    state: PeerState,
    transitions: u32,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: PeerState::Connecting,
            transitions: 0,
        }
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Number of successful transitions so far.
    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    /// Applies `event`, leaving the state unchanged on error.
    pub fn handle(&mut self, event: SessionEvent) -> Result<PeerState, SessionError> {
        let next = self.state.advance(event)?;
        tracing::debug!("Session {} -> {}", self.state, next);
        self.state = next;
        self.transitions += 1;
        Ok(next)
    }

    /// Moves to `Disconnected`. Returns `false` if already there.
    pub fn disconnect(&mut self) -> bool {
        self.handle(SessionEvent::Disconnect).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut session = Session::new();
        assert_eq!(session.handle(SessionEvent::Ready), Ok(PeerState::Authenticating));
        assert_eq!(session.handle(SessionEvent::Authenticated), Ok(PeerState::Active));
        assert!(session.state().is_active());
        assert!(session.disconnect());
        assert_eq!(session.state(), PeerState::Disconnected);
        assert_eq!(session.transitions(), 3);
    }

    #[test]
    fn test_out_of_order_events_are_rejected() {
        let mut session = Session::new();
        assert_eq!(
            session.handle(SessionEvent::Authenticated),
            Err(SessionError::InvalidTransition {
                state: PeerState::Connecting,
                event: SessionEvent::Authenticated,
            })
        );
        assert_eq!(session.state(), PeerState::Connecting);

        session.handle(SessionEvent::Ready).unwrap();
        assert!(session.handle(SessionEvent::Ready).is_err());
        assert_eq!(session.state(), PeerState::Authenticating);
    }

    #[test]
    fn test_disconnect_from_any_state_is_terminal() {
        for setup in [0, 1, 2] {
            let mut session = Session::new();
            if setup >= 1 {
                session.handle(SessionEvent::Ready).unwrap();
            }
            if setup >= 2 {
                session.handle(SessionEvent::Authenticated).unwrap();
            }
            assert!(session.disconnect());
            assert!(!session.disconnect());
            assert!(session.handle(SessionEvent::Ready).is_err());
            assert!(!session.state().is_connected());
        }
    }
}
