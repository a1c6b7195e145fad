//! Session identity and lifetime state machines

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Instant;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::{Error, Result};

/// 64-bit session identifier, drawn from the system CSPRNG
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Generate a random session id
    pub fn random() -> Self {
        let mut bytes = [0u8; 8];
        OsRng.fill_bytes(&mut bytes);
        Self(u64::from_be_bytes(bytes))
    }

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Server-side session lifetime
///
/// `Accepted → Handshaking → Established → Closed`; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Connection accepted, nothing read yet
    #[default]
    Accepted,
    /// HandshakeInit parsed, response not yet sent
    Handshaking,
    /// Response sent, data loop running
    Established,
    /// Torn down; the address is back in the pool
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Accepted => write!(f, "ACCEPTED"),
            SessionState::Handshaking => write!(f, "HANDSHAKING"),
            SessionState::Established => write!(f, "ESTABLISHED"),
            SessionState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Client-side connection lifetime
///
/// `Idle → Dialing → Handshaking → Established → Closing → Idle`; with
/// auto-reconnect enabled a timer takes `Idle` back to `Dialing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Idle,
    Dialing,
    Handshaking,
    Established,
    Closing,
}

impl ClientState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: ClientState) -> bool {
        use ClientState::*;
        matches!(
            (self, next),
            (Idle, Dialing)
                | (Dialing, Handshaking)
                | (Handshaking, Established)
                | (Dialing, Closing)
                | (Handshaking, Closing)
                | (Established, Closing)
                | (Closing, Idle)
        )
    }

    /// Transition to `next`, or report the illegal edge
    pub fn transition_to(self, next: ClientState) -> Result<ClientState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientState::Idle => write!(f, "IDLE"),
            ClientState::Dialing => write!(f, "DIALING"),
            ClientState::Handshaking => write!(f, "HANDSHAKING"),
            ClientState::Established => write!(f, "ESTABLISHED"),
            ClientState::Closing => write!(f, "CLOSING"),
        }
    }
}

/// Server-side session record
///
/// Owned exclusively by the server's session table; the table is the single
/// place that decides when the session ends.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    /// Tunnel address assigned from the pool; set when established
    pub assigned_addr: Option<Ipv4Addr>,
    /// Last packet successfully processed for this session
    pub last_seen: Instant,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::Accepted,
            assigned_addr: None,
            last_seen: Instant::now(),
        }
    }

    /// `Accepted → Handshaking`, after the init message parses
    pub fn begin_handshake(&mut self) -> Result<()> {
        match self.state {
            SessionState::Accepted => {
                self.state = SessionState::Handshaking;
                Ok(())
            }
            _ => Err(self.bad_transition(SessionState::Handshaking)),
        }
    }

    /// `Handshaking → Established`, once the response is sent
    pub fn establish(&mut self, addr: Ipv4Addr) -> Result<()> {
        match self.state {
            SessionState::Handshaking => {
                self.assigned_addr = Some(addr);
                self.state = SessionState::Established;
                Ok(())
            }
            _ => Err(self.bad_transition(SessionState::Established)),
        }
    }

    /// Terminal transition; legal from every live state
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            SessionState::Closed => Err(self.bad_transition(SessionState::Closed)),
            _ => {
                self.state = SessionState::Closed;
                Ok(())
            }
        }
    }

    /// Refresh the liveness timestamp
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    fn bad_transition(&self, to: SessionState) -> Error {
        Error::InvalidStateTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_display() {
        let sid = SessionId::new(0xDEADBEEF);
        assert_eq!(format!("{}", sid), "00000000DEADBEEF");
        assert_eq!(sid.value(), 0xDEADBEEF);
    }

    #[test]
    fn test_session_id_random_distinct() {
        assert_ne!(SessionId::random(), SessionId::random());
    }

    #[test]
    fn test_server_session_lifecycle() {
        let mut session = Session::new(SessionId::random());
        assert_eq!(session.state, SessionState::Accepted);

        session.begin_handshake().unwrap();
        assert_eq!(session.state, SessionState::Handshaking);

        session.establish(Ipv4Addr::new(10, 8, 0, 2)).unwrap();
        assert_eq!(session.state, SessionState::Established);
        assert_eq!(session.assigned_addr, Some(Ipv4Addr::new(10, 8, 0, 2)));

        session.close().unwrap();
        assert_eq!(session.state, SessionState::Closed);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut session = Session::new(SessionId::random());
        session.close().unwrap();
        assert!(session.close().is_err());
        assert!(session.begin_handshake().is_err());
    }

    #[test]
    fn test_cannot_establish_from_accepted() {
        let mut session = Session::new(SessionId::random());
        assert!(session.establish(Ipv4Addr::new(10, 8, 0, 2)).is_err());
    }

    #[test]
    fn test_close_from_handshaking() {
        let mut session = Session::new(SessionId::random());
        session.begin_handshake().unwrap();
        session.close().unwrap();
        assert_eq!(session.state, SessionState::Closed);
    }

    #[test]
    fn test_client_state_transitions() {
        use ClientState::*;

        let state = Idle.transition_to(Dialing).unwrap();
        let state = state.transition_to(Handshaking).unwrap();
        let state = state.transition_to(Established).unwrap();
        let state = state.transition_to(Closing).unwrap();
        assert_eq!(state.transition_to(Idle).unwrap(), Idle);
    }

    #[test]
    fn test_client_state_illegal_edges() {
        use ClientState::*;

        assert!(Idle.transition_to(Established).is_err());
        assert!(Established.transition_to(Dialing).is_err());
        assert!(Closing.transition_to(Established).is_err());
        // Failed dial or handshake goes through Closing
        assert!(Dialing.can_transition_to(Closing));
        assert!(Handshaking.can_transition_to(Closing));
    }
}
