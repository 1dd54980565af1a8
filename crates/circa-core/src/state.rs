//! Circuit and channel state machines.
//!
//! Every machine tracks both roles' states: one circuit object models the
//! whole conversation, and each processed command fires the transition
//! lookup for the client perspective and the server perspective. The lookup
//! tables are flat `(role, state, command kind) → new state` functions; an
//! undefined combination is a protocol violation and pins the machine at its
//! error state.

use std::fmt;

use tracing::trace;

use crate::command::CommandKind;

/// Which side of a virtual circuit we are.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn peer(self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Client => "CLIENT",
            Role::Server => "SERVER",
        })
    }
}

/// Per-role state of a virtual circuit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    /// Server side before the version exchange begins.
    Idle,
    SendVersionRequest,
    AwaitVersionResponse,
    SendVersionResponse,
    Connected,
    Error,
}

impl CircuitState {
    pub fn is_terminal(self) -> bool {
        self == CircuitState::Error
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Idle => "IDLE",
            CircuitState::SendVersionRequest => "SEND_VERSION_REQUEST",
            CircuitState::AwaitVersionResponse => "AWAIT_VERSION_RESPONSE",
            CircuitState::SendVersionResponse => "SEND_VERSION_RESPONSE",
            CircuitState::Connected => "CONNECTED",
            CircuitState::Error => "ERROR",
        })
    }
}

/// Per-role state of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Client side parked until its circuit connects.
    NeedCircuit,
    /// Server side before the create request arrives.
    Idle,
    SendCreateChanRequest,
    AwaitCreateChanResponse,
    SendCreateChanResponse,
    Connected,
    MustClose,
    Closed,
    Error,
}

impl ChannelState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Closed | ChannelState::Error)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelState::NeedCircuit => "NEED_CIRCUIT",
            ChannelState::Idle => "IDLE",
            ChannelState::SendCreateChanRequest => "SEND_CREATE_CHAN_REQUEST",
            ChannelState::AwaitCreateChanResponse => "AWAIT_CREATE_CHAN_RESPONSE",
            ChannelState::SendCreateChanResponse => "SEND_CREATE_CHAN_RESPONSE",
            ChannelState::Connected => "CONNECTED",
            ChannelState::MustClose => "MUST_CLOSE",
            ChannelState::Closed => "CLOSED",
            ChannelState::Error => "ERROR",
        })
    }
}

/// Command-triggered circuit transitions. `None` means the command is not
/// legal for this role in this state.
pub fn circuit_transition(
    role: Role,
    state: CircuitState,
    kind: CommandKind,
) -> Option<CircuitState> {
    use CircuitState::*;
    use CommandKind::*;

    match (role, state) {
        (Role::Client, SendVersionRequest) => match kind {
            EchoRequest | EchoResponse => Some(SendVersionRequest),
            VersionRequest => Some(AwaitVersionResponse),
            ErrorResponse => Some(Error),
            _ => None,
        },
        (Role::Client, AwaitVersionResponse) => match kind {
            // Host and client names may come before or after we connect.
            EchoRequest | EchoResponse | HostNameRequest | ClientNameRequest => {
                Some(AwaitVersionResponse)
            }
            VersionResponse => Some(Connected),
            ErrorResponse => Some(Error),
            _ => None,
        },
        (Role::Client, Connected) => match kind {
            EchoRequest | EchoResponse | HostNameRequest | ClientNameRequest
            | AccessRightsResponse => Some(Connected),
            ErrorResponse => Some(Error),
            // Circuits are not closed by a command, only by the host.
            _ => None,
        },
        (Role::Server, Idle) => match kind {
            VersionRequest => Some(SendVersionResponse),
            EchoRequest | EchoResponse => Some(Idle),
            ErrorResponse => Some(Error),
            _ => None,
        },
        (Role::Server, SendVersionResponse) => match kind {
            VersionResponse => Some(Connected),
            EchoRequest | EchoResponse | HostNameRequest | ClientNameRequest => {
                Some(SendVersionResponse)
            }
            ErrorResponse => Some(Error),
            _ => None,
        },
        (Role::Server, Connected) => match kind {
            HostNameRequest | ClientNameRequest | AccessRightsResponse | EchoRequest
            | EchoResponse => Some(Connected),
            ErrorResponse => Some(Error),
            _ => None,
        },
        _ => None,
    }
}

/// Command-triggered channel transitions; the client and server sets mirror
/// each other apart from the creation handshake.
pub fn channel_transition(
    role: Role,
    state: ChannelState,
    kind: CommandKind,
) -> Option<ChannelState> {
    use ChannelState::*;
    use CommandKind::*;

    match (role, state) {
        (Role::Client, SendCreateChanRequest) => match kind {
            CreateChanRequest => Some(AwaitCreateChanResponse),
            ErrorResponse => Some(Error),
            _ => None,
        },
        (Role::Client, AwaitCreateChanResponse) => match kind {
            CreateChanResponse => Some(Connected),
            ErrorResponse => Some(Error),
            _ => None,
        },
        (Role::Server, Idle) => match kind {
            CreateChanRequest => Some(SendCreateChanResponse),
            ErrorResponse => Some(Error),
            _ => None,
        },
        (Role::Server, SendCreateChanResponse) => match kind {
            CreateChanResponse => Some(Connected),
            ErrorResponse => Some(Error),
            _ => None,
        },
        (_, Connected) => match kind {
            ReadNotifyRequest | ReadNotifyResponse | WriteNotifyRequest | WriteNotifyResponse
            | WriteRequest | EventAddRequest | EventAddResponse | EventCancelRequest
            | EventCancelResponse => Some(Connected),
            ClearChannelRequest => Some(MustClose),
            ServerDisconnResponse => Some(Closed),
            ErrorResponse => Some(Error),
            _ => None,
        },
        (_, MustClose) => match kind {
            // The server may pre-empt our clear with a disconnect.
            ClearChannelResponse | ServerDisconnResponse => Some(Closed),
            ErrorResponse => Some(Error),
            _ => None,
        },
        // Closed and Error are terminal.
        _ => None,
    }
}

/// A refused transition: the role whose table had no entry, and its state at
/// the time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Refusal<S> {
    pub role: Role,
    pub state: S,
}

/// Dual-role circuit state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitStateMachine {
    client: CircuitState,
    server: CircuitState,
}

impl CircuitStateMachine {
    pub fn new() -> Self {
        Self {
            client: CircuitState::SendVersionRequest,
            server: CircuitState::Idle,
        }
    }

    pub fn state(&self, role: Role) -> CircuitState {
        match role {
            Role::Client => self.client,
            Role::Server => self.server,
        }
    }

    fn set_state(&mut self, role: Role, state: CircuitState) {
        match role {
            Role::Client => self.client = state,
            Role::Server => self.server = state,
        }
    }

    /// Force both roles to `ERROR` (host-signalled teardown).
    pub fn fail(&mut self) {
        self.client = CircuitState::Error;
        self.server = CircuitState::Error;
    }

    /// Fire the command-triggered transition for both roles, client first.
    ///
    /// On a refused transition the refusing role is pinned at `ERROR`
    /// (unless already terminal) and no further role is processed.
    pub fn process(&mut self, kind: CommandKind) -> Result<(), Refusal<CircuitState>> {
        for role in [Role::Client, Role::Server] {
            let state = self.state(role);
            match circuit_transition(role, state, kind) {
                Some(new_state) => {
                    if new_state != state {
                        trace!(%role, old = %state, new = %new_state, command = %kind,
                               "circuit transition");
                    }
                    self.set_state(role, new_state);
                }
                None => {
                    if !state.is_terminal() {
                        self.set_state(role, CircuitState::Error);
                    }
                    return Err(Refusal { role, state });
                }
            }
        }
        Ok(())
    }
}

impl Default for CircuitStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Dual-role channel state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelStateMachine {
    client: ChannelState,
    server: ChannelState,
}

impl ChannelStateMachine {
    /// A channel created locally by the client, parked until its circuit is
    /// connected.
    pub fn new_client_created() -> Self {
        Self {
            client: ChannelState::NeedCircuit,
            server: ChannelState::Idle,
        }
    }

    /// A channel first seen in a `CreateChanRequest` arriving at the server.
    pub fn new_server_created() -> Self {
        Self {
            client: ChannelState::SendCreateChanRequest,
            server: ChannelState::Idle,
        }
    }

    pub fn state(&self, role: Role) -> ChannelState {
        match role {
            Role::Client => self.client,
            Role::Server => self.server,
        }
    }

    fn set_state(&mut self, role: Role, state: ChannelState) {
        match role {
            Role::Client => self.client = state,
            Role::Server => self.server = state,
        }
    }

    /// Force both roles to `CLOSED` (host-signalled teardown).
    pub fn close(&mut self) {
        self.client = ChannelState::Closed;
        self.server = ChannelState::Closed;
    }

    /// Fire the command-triggered transition for both roles, client first.
    pub fn process(&mut self, kind: CommandKind) -> Result<(), Refusal<ChannelState>> {
        for role in [Role::Client, Role::Server] {
            let state = self.state(role);
            match channel_transition(role, state, kind) {
                Some(new_state) => {
                    if new_state != state {
                        trace!(%role, old = %state, new = %new_state, command = %kind,
                               "channel transition");
                    }
                    self.set_state(role, new_state);
                }
                None => {
                    if !state.is_terminal() {
                        self.set_state(role, ChannelState::Error);
                    }
                    return Err(Refusal { role, state });
                }
            }
        }
        Ok(())
    }

    /// The state-triggered rule: a channel parked in `NEED_CIRCUIT` advances
    /// to `SEND_CREATE_CHAN_REQUEST` once its circuit is `CONNECTED` for the
    /// same role.
    pub fn fire_state_triggered(&mut self, role: Role, circuit_state: CircuitState) {
        if self.state(role) == ChannelState::NeedCircuit
            && circuit_state == CircuitState::Connected
        {
            trace!(%role, "channel released by connected circuit");
            self.set_state(role, ChannelState::SendCreateChanRequest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind::*;

    #[test]
    fn circuit_handshake_both_roles() {
        let mut sm = CircuitStateMachine::new();
        assert_eq!(sm.state(Role::Client), CircuitState::SendVersionRequest);
        assert_eq!(sm.state(Role::Server), CircuitState::Idle);

        sm.process(VersionRequest).unwrap();
        assert_eq!(sm.state(Role::Client), CircuitState::AwaitVersionResponse);
        assert_eq!(sm.state(Role::Server), CircuitState::SendVersionResponse);

        sm.process(VersionResponse).unwrap();
        assert_eq!(sm.state(Role::Client), CircuitState::Connected);
        assert_eq!(sm.state(Role::Server), CircuitState::Connected);
    }

    #[test]
    fn echo_legal_in_every_circuit_state() {
        let mut sm = CircuitStateMachine::new();
        sm.process(EchoRequest).unwrap();
        sm.process(EchoResponse).unwrap();
        sm.process(VersionRequest).unwrap();
        sm.process(EchoRequest).unwrap();
        sm.process(VersionResponse).unwrap();
        sm.process(EchoResponse).unwrap();
        assert_eq!(sm.state(Role::Client), CircuitState::Connected);
    }

    #[test]
    fn names_may_precede_version_response() {
        let mut sm = CircuitStateMachine::new();
        sm.process(VersionRequest).unwrap();
        sm.process(HostNameRequest).unwrap();
        sm.process(ClientNameRequest).unwrap();
        assert_eq!(sm.state(Role::Client), CircuitState::AwaitVersionResponse);
        sm.process(VersionResponse).unwrap();
        sm.process(HostNameRequest).unwrap();
        assert_eq!(sm.state(Role::Client), CircuitState::Connected);
    }

    #[test]
    fn names_illegal_before_version_request() {
        let mut sm = CircuitStateMachine::new();
        let refusal = sm.process(HostNameRequest).unwrap_err();
        assert_eq!(refusal.role, Role::Client);
        assert_eq!(refusal.state, CircuitState::SendVersionRequest);
        assert_eq!(sm.state(Role::Client), CircuitState::Error);
    }

    #[test]
    fn circuit_error_is_absorbing() {
        let mut sm = CircuitStateMachine::new();
        sm.process(HostNameRequest).unwrap_err();
        assert_eq!(sm.state(Role::Client), CircuitState::Error);
        // Stays in ERROR; even Echo is refused now.
        sm.process(EchoRequest).unwrap_err();
        assert_eq!(sm.state(Role::Client), CircuitState::Error);
    }

    #[test]
    fn channel_creation_both_roles() {
        let mut sm = ChannelStateMachine::new_server_created();
        sm.process(CreateChanRequest).unwrap();
        assert_eq!(sm.state(Role::Client), ChannelState::AwaitCreateChanResponse);
        assert_eq!(sm.state(Role::Server), ChannelState::SendCreateChanResponse);

        sm.process(CreateChanResponse).unwrap();
        assert_eq!(sm.state(Role::Client), ChannelState::Connected);
        assert_eq!(sm.state(Role::Server), ChannelState::Connected);
    }

    #[test]
    fn connected_channel_accepts_data_commands() {
        let mut sm = ChannelStateMachine::new_server_created();
        sm.process(CreateChanRequest).unwrap();
        sm.process(CreateChanResponse).unwrap();
        for kind in [
            ReadNotifyRequest,
            ReadNotifyResponse,
            WriteRequest,
            WriteNotifyRequest,
            WriteNotifyResponse,
            EventAddRequest,
            EventAddResponse,
            EventCancelRequest,
            EventCancelResponse,
        ] {
            sm.process(kind).unwrap();
            assert_eq!(sm.state(Role::Client), ChannelState::Connected);
            assert_eq!(sm.state(Role::Server), ChannelState::Connected);
        }
    }

    #[test]
    fn clear_then_response_closes() {
        let mut sm = ChannelStateMachine::new_server_created();
        sm.process(CreateChanRequest).unwrap();
        sm.process(CreateChanResponse).unwrap();
        sm.process(ClearChannelRequest).unwrap();
        assert_eq!(sm.state(Role::Client), ChannelState::MustClose);
        sm.process(ClearChannelResponse).unwrap();
        assert_eq!(sm.state(Role::Client), ChannelState::Closed);
    }

    #[test]
    fn server_disconn_preempts_clear() {
        let mut sm = ChannelStateMachine::new_server_created();
        sm.process(CreateChanRequest).unwrap();
        sm.process(CreateChanResponse).unwrap();
        sm.process(ClearChannelRequest).unwrap();
        sm.process(ServerDisconnResponse).unwrap();
        assert_eq!(sm.state(Role::Client), ChannelState::Closed);
        // The straggling clear response is refused and the state stays put.
        sm.process(ClearChannelResponse).unwrap_err();
        assert_eq!(sm.state(Role::Client), ChannelState::Closed);
    }

    #[test]
    fn closed_is_absorbing_not_error() {
        let mut sm = ChannelStateMachine::new_server_created();
        sm.process(CreateChanRequest).unwrap();
        sm.process(CreateChanResponse).unwrap();
        sm.process(ServerDisconnResponse).unwrap();
        assert_eq!(sm.state(Role::Client), ChannelState::Closed);
        sm.process(ReadNotifyRequest).unwrap_err();
        assert_eq!(sm.state(Role::Client), ChannelState::Closed);
        assert_eq!(sm.state(Role::Server), ChannelState::Closed);
    }

    #[test]
    fn refusal_pins_error() {
        let mut sm = ChannelStateMachine::new_server_created();
        // ReadNotify before the channel is created.
        let refusal = sm.process(ReadNotifyRequest).unwrap_err();
        assert_eq!(refusal.role, Role::Client);
        assert_eq!(refusal.state, ChannelState::SendCreateChanRequest);
        assert_eq!(sm.state(Role::Client), ChannelState::Error);
    }

    #[test]
    fn error_response_is_legal_everywhere_live() {
        let mut sm = ChannelStateMachine::new_server_created();
        sm.process(ErrorResponse).unwrap();
        assert_eq!(sm.state(Role::Client), ChannelState::Error);
    }

    #[test]
    fn state_triggered_release() {
        let mut sm = ChannelStateMachine::new_client_created();
        assert_eq!(sm.state(Role::Client), ChannelState::NeedCircuit);

        // Circuit not yet connected: nothing happens.
        sm.fire_state_triggered(Role::Client, CircuitState::AwaitVersionResponse);
        assert_eq!(sm.state(Role::Client), ChannelState::NeedCircuit);

        sm.fire_state_triggered(Role::Client, CircuitState::Connected);
        assert_eq!(sm.state(Role::Client), ChannelState::SendCreateChanRequest);

        // Idempotent once released.
        sm.fire_state_triggered(Role::Client, CircuitState::Connected);
        assert_eq!(sm.state(Role::Client), ChannelState::SendCreateChanRequest);
    }
}
