//! Virtual circuits: the top-level object a host binds to a stream
//! transport.
//!
//! A [`VirtualCircuit`] owns the receive queue, the channel registry, and
//! the subscription and in-flight request registries. Every command, whether
//! outgoing through [`VirtualCircuit::send`] or incoming through
//! [`VirtualCircuit::recv`], is pushed through the circuit and channel state
//! machines. It performs no I/O: `send` returns bytes for the host to
//! transmit, `recv` consumes bytes the host read.

use std::collections::HashMap;

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use crate::command::{
    encode_command, decode_commands, ClearChannelRequest, Command, CommandKind,
    CreateChanRequest, Direction, EventAddRequest, EventCancelRequest, HostNameRequest,
    ClientNameRequest, ReadNotifyRequest, VersionRequest, VersionResponse, WriteNotifyRequest,
    PROTOCOL_VERSION, MAX_PRIORITY,
};
use crate::dbr::{DbrPayload, DbrType};
use crate::error::{fault_for, CommandError, Fault, ProtocolError};
use crate::flags::{AccessRights, EventMask};
use crate::state::{ChannelState, ChannelStateMachine, CircuitState, CircuitStateMachine, Role};

/// A live subscription, created by an `EventAddRequest` and removed by the
/// matching `EventCancelResponse`.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionInfo {
    pub subscription_id: u32,
    pub cid: u32,
    pub data_type: DbrType,
    pub data_count: u32,
    pub mask: EventMask,
}

/// What an in-flight ioid is waiting for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoKind {
    Read,
    Write,
}

/// A pending read or write notification, removed when the matching response
/// arrives or the server disconnects the channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InFlightRequest {
    pub ioid: u32,
    pub cid: u32,
    pub kind: IoKind,
}

/// A named process variable as multiplexed on one circuit.
#[derive(Clone, Debug)]
pub struct Channel {
    cid: u32,
    name: String,
    state: ChannelStateMachine,
    sid: Option<u32>,
    native_data_type: Option<DbrType>,
    native_data_count: u32,
    access_rights: AccessRights,
}

impl Channel {
    fn new(cid: u32, name: String, state: ChannelStateMachine) -> Self {
        Self {
            cid,
            name,
            state,
            sid: None,
            native_data_type: None,
            native_data_count: 0,
            access_rights: AccessRights::empty(),
        }
    }

    pub fn cid(&self) -> u32 {
        self.cid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self, role: Role) -> ChannelState {
        self.state.state(role)
    }

    /// Server-assigned id, known once the create response arrived.
    pub fn sid(&self) -> Option<u32> {
        self.sid
    }

    pub fn native_data_type(&self) -> Option<DbrType> {
        self.native_data_type
    }

    pub fn native_data_count(&self) -> u32 {
        self.native_data_count
    }

    pub fn access_rights(&self) -> AccessRights {
        self.access_rights
    }
}

/// One end of a CA virtual circuit.
pub struct VirtualCircuit {
    our_role: Role,
    priority: u16,
    peer_address: Option<String>,
    state: CircuitStateMachine,
    channels: HashMap<u32, Channel>,
    sid_to_cid: HashMap<u32, u32>,
    subscriptions: HashMap<u32, SubscriptionInfo>,
    in_flight: HashMap<u32, InFlightRequest>,
    recv_buf: BytesMut,
    /// Negotiated protocol version, known after the version exchange.
    version: Option<u16>,
    host_name: Option<String>,
    client_name: Option<String>,
    next_cid: u32,
    next_ioid: u32,
    next_subscription_id: u32,
    disconnected: bool,
}

impl VirtualCircuit {
    /// A fresh, unbound circuit. `priority` must be ≤ 99.
    pub fn new(our_role: Role, priority: u16) -> Result<Self, CommandError> {
        if priority > MAX_PRIORITY {
            return Err(CommandError::PriorityOutOfRange(priority));
        }
        Ok(Self {
            our_role,
            priority,
            peer_address: None,
            state: CircuitStateMachine::new(),
            channels: HashMap::new(),
            sid_to_cid: HashMap::new(),
            subscriptions: HashMap::new(),
            in_flight: HashMap::new(),
            recv_buf: BytesMut::new(),
            version: None,
            host_name: None,
            client_name: None,
            next_cid: 0,
            next_ioid: 0,
            next_subscription_id: 0,
            disconnected: false,
        })
    }

    pub fn our_role(&self) -> Role {
        self.our_role
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }

    /// Record the transport this circuit is bound to. A circuit can only be
    /// bound once; hosts create a new circuit per connection.
    pub fn bind(&mut self, peer_address: impl Into<String>) -> Result<(), ProtocolError> {
        if self.peer_address.is_some() {
            return Err(ProtocolError::local("circuit is already bound"));
        }
        self.peer_address = Some(peer_address.into());
        Ok(())
    }

    pub fn peer_address(&self) -> Option<&str> {
        self.peer_address.as_deref()
    }

    pub fn state(&self, role: Role) -> CircuitState {
        self.state.state(role)
    }

    /// Negotiated minor protocol version, once the version exchange is done.
    pub fn version(&self) -> Option<u16> {
        self.version
    }

    pub fn host_name(&self) -> Option<&str> {
        self.host_name.as_deref()
    }

    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    pub fn channel(&self, cid: u32) -> Option<&Channel> {
        self.channels.get(&cid)
    }

    pub fn channel_by_sid(&self, sid: u32) -> Option<&Channel> {
        self.sid_to_cid.get(&sid).and_then(|cid| self.channels.get(cid))
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn subscription(&self, subscription_id: u32) -> Option<&SubscriptionInfo> {
        self.subscriptions.get(&subscription_id)
    }

    pub fn in_flight_request(&self, ioid: u32) -> Option<&InFlightRequest> {
        self.in_flight.get(&ioid)
    }

    /// Allocate a fresh ioid: monotonic, skipping ids still in flight.
    pub fn new_ioid(&mut self) -> u32 {
        loop {
            let ioid = self.next_ioid;
            self.next_ioid = self.next_ioid.wrapping_add(1);
            if !self.in_flight.contains_key(&ioid) {
                return ioid;
            }
        }
    }

    /// Allocate a fresh subscription id: monotonic, skipping live ids.
    pub fn new_subscription_id(&mut self) -> u32 {
        loop {
            let id = self.next_subscription_id;
            self.next_subscription_id = self.next_subscription_id.wrapping_add(1);
            if !self.subscriptions.contains_key(&id) {
                return id;
            }
        }
    }

    fn new_cid(&mut self) -> u32 {
        loop {
            let cid = self.next_cid;
            self.next_cid = self.next_cid.wrapping_add(1);
            if !self.channels.contains_key(&cid) {
                return cid;
            }
        }
    }

    /// Register a new channel for `name` and return its cid (client role
    /// only). The channel starts in `NEED_CIRCUIT` and advances to
    /// `SEND_CREATE_CHAN_REQUEST` as soon as the circuit is connected.
    pub fn add_channel(&mut self, name: &str) -> Result<u32, ProtocolError> {
        self.check_alive()?;
        if self.our_role != Role::Client {
            return Err(ProtocolError::local("only the CLIENT role creates channels"));
        }
        // Reuse the create-request validation so a bad name fails here, not
        // at send time.
        CreateChanRequest::new(0, PROTOCOL_VERSION, name)
            .map_err(|e| ProtocolError::local(e.to_string()))?;

        let cid = self.new_cid();
        let mut channel = Channel::new(cid, name.to_owned(), ChannelStateMachine::new_client_created());
        channel
            .state
            .fire_state_triggered(Role::Client, self.state.state(Role::Client));
        debug!(cid, name, state = %channel.state(Role::Client), "channel added");
        self.channels.insert(cid, channel);
        Ok(cid)
    }

    /// Host-signalled teardown (transport closed, idle timeout): both state
    /// machines go terminal, all subscriptions and in-flight requests are
    /// dropped, and every later `send`/`recv` fails with a local error.
    pub fn disconnect(&mut self) {
        debug!(role = %self.our_role, "circuit disconnected by host");
        self.state.fail();
        for channel in self.channels.values_mut() {
            channel.state.close();
        }
        self.subscriptions.clear();
        self.in_flight.clear();
        self.recv_buf.clear();
        self.disconnected = true;
    }

    fn check_alive(&self) -> Result<(), ProtocolError> {
        if self.disconnected {
            Err(ProtocolError::local("circuit has been disconnected"))
        } else {
            Ok(())
        }
    }

    /// Validate and serialize one outgoing command.
    ///
    /// The command is run through the circuit and channel state machines as
    /// an outgoing event; on success the returned buffer is ready for
    /// transmission, and buffers from consecutive calls concatenate into a
    /// valid wire stream.
    pub fn send(&mut self, command: &Command) -> Result<BytesMut, ProtocolError> {
        self.check_alive()?;
        match command.direction() {
            Direction::Request if self.our_role != Role::Client => {
                return Err(ProtocolError::local(format!(
                    "{} is a request; only the CLIENT role sends requests",
                    command.kind()
                )));
            }
            Direction::Response if self.our_role != Role::Server => {
                return Err(ProtocolError::local(format!(
                    "{} is a response; only the SERVER role sends responses",
                    command.kind()
                )));
            }
            _ => {}
        }

        self.process_command(command, true)?;

        let mut buf = BytesMut::new();
        encode_command(command, &mut buf)
            .map_err(|e| ProtocolError::local(e.to_string()))?;
        trace!(command = %command.kind(), len = buf.len(), "command sent");
        Ok(buf)
    }

    /// Feed received bytes in, get validated commands out.
    ///
    /// Appends `bytes` to the receive queue, decodes as many whole commands
    /// as are buffered, and runs each through the state machines as an
    /// incoming event. Returns the commands in wire order plus the number of
    /// bytes still unparsed (a partial trailing frame).
    pub fn recv(&mut self, bytes: &[u8]) -> Result<(Vec<Command>, usize), ProtocolError> {
        self.check_alive()?;
        self.recv_buf.extend_from_slice(bytes);

        let peer = self.our_role.peer();
        let (commands, consumed) = match decode_commands(&self.recv_buf, peer) {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %e, "malformed wire data");
                return Err(e.into());
            }
        };
        let _ = self.recv_buf.split_to(consumed);

        for command in &commands {
            self.process_command(command, false)?;
            trace!(command = %command.kind(), "command received");
        }
        Ok((commands, self.recv_buf.len()))
    }

    /// Dispatch one command through the relevant state machines and update
    /// the registries. `sent_by_us` distinguishes the outgoing path from the
    /// incoming one for error attribution.
    fn process_command(&mut self, command: &Command, sent_by_us: bool) -> Result<(), ProtocolError> {
        let fault = fault_for(self.our_role, command.direction(), sent_by_us);
        match command.kind() {
            CommandKind::VersionRequest
            | CommandKind::VersionResponse
            | CommandKind::EchoRequest
            | CommandKind::EchoResponse
            | CommandKind::HostNameRequest
            | CommandKind::ClientNameRequest
            | CommandKind::AccessRightsResponse => {
                self.process_circuit_command(command, sent_by_us, fault)
            }
            CommandKind::ErrorResponse => {
                // An error response naming a known channel faults the
                // channel; otherwise it faults the whole circuit.
                let cid = match command {
                    Command::ErrorResponse(c) => c.cid,
                    _ => unreachable!(),
                };
                if self.channels.contains_key(&cid) {
                    self.process_channel_command(command, fault)
                } else {
                    self.process_circuit_command(command, sent_by_us, fault)
                }
            }
            _ => self.process_channel_command(command, fault),
        }
    }

    fn process_circuit_command(
        &mut self,
        command: &Command,
        sent_by_us: bool,
        fault: Fault,
    ) -> Result<(), ProtocolError> {
        let kind = command.kind();

        // Access rights target a channel but ride the circuit tables; the
        // channel must exist before the state machines run.
        if let Command::AccessRightsResponse(c) = command {
            if !self.channels.contains_key(&c.cid) {
                return Err(self.refuse(fault, format!("unknown cid {}", c.cid)));
            }
        }

        if let Err(refusal) = self.state.process(kind) {
            return Err(self.refuse(
                fault,
                format!(
                    "{} cannot be processed when role={} and circuit state={}",
                    kind, refusal.role, refusal.state
                ),
            ));
        }

        // The coupling that releases channels parked in NEED_CIRCUIT once
        // the circuit handshakes.
        let circuit_state = self.state;
        for channel in self.channels.values_mut() {
            for role in [Role::Client, Role::Server] {
                channel
                    .state
                    .fire_state_triggered(role, circuit_state.state(role));
            }
        }

        match command {
            Command::VersionRequest(c) => {
                if !sent_by_us {
                    self.priority = c.priority;
                    self.version = Some(PROTOCOL_VERSION.min(c.version));
                }
            }
            Command::VersionResponse(c) => {
                if !sent_by_us {
                    self.version = Some(PROTOCOL_VERSION.min(c.version));
                }
            }
            Command::HostNameRequest(c) => self.host_name = Some(c.name.clone()),
            Command::ClientNameRequest(c) => self.client_name = Some(c.name.clone()),
            Command::AccessRightsResponse(c) => {
                let channel = self.channels.get_mut(&c.cid).expect("checked above");
                channel.access_rights = c.rights;
            }
            _ => {}
        }
        Ok(())
    }

    fn process_channel_command(
        &mut self,
        command: &Command,
        fault: Fault,
    ) -> Result<(), ProtocolError> {
        let kind = command.kind();
        let cid = self.resolve_cid(command, fault)?;

        // A CreateChanRequest arriving at the server is the first time this
        // end hears of the channel.
        if kind == CommandKind::CreateChanRequest && !self.channels.contains_key(&cid) {
            if self.our_role != Role::Server {
                return Err(self.refuse(fault, format!("unknown cid {}", cid)));
            }
            let name = match command {
                Command::CreateChanRequest(c) => c.name.clone(),
                _ => unreachable!(),
            };
            debug!(cid, %name, "channel created by peer request");
            self.channels.insert(
                cid,
                Channel::new(cid, name, ChannelStateMachine::new_server_created()),
            );
        }

        // Uniqueness invariants, checked before any state changes.
        match command {
            Command::EventAddRequest(c) => {
                if self.subscriptions.contains_key(&c.subscription_id) {
                    return Err(self.refuse(
                        fault,
                        format!("subscription_id {} is already in use", c.subscription_id),
                    ));
                }
            }
            Command::EventCancelRequest(c) => {
                if !self.subscriptions.contains_key(&c.subscription_id) {
                    return Err(self.refuse(
                        fault,
                        format!("unknown subscription_id {}", c.subscription_id),
                    ));
                }
            }
            Command::ReadNotifyRequest(c) => {
                if self.in_flight.contains_key(&c.ioid) {
                    return Err(
                        self.refuse(fault, format!("ioid {} is already in use", c.ioid))
                    );
                }
            }
            Command::WriteNotifyRequest(c) => {
                if self.in_flight.contains_key(&c.ioid) {
                    return Err(
                        self.refuse(fault, format!("ioid {} is already in use", c.ioid))
                    );
                }
            }
            Command::CreateChanRequest(c) => {
                let channel = self.channels.get(&cid).expect("created or pre-existing");
                if channel.name != c.name {
                    return Err(self.refuse(
                        fault,
                        format!(
                            "cid {} is registered for {:?}, not {:?}",
                            cid, channel.name, c.name
                        ),
                    ));
                }
            }
            Command::CreateChanResponse(c) => {
                if let Some(&other) = self.sid_to_cid.get(&c.sid) {
                    if other != cid {
                        return Err(self.refuse(
                            fault,
                            format!("sid {} is already assigned to cid {}", c.sid, other),
                        ));
                    }
                }
            }
            _ => {}
        }

        let channel = match self.channels.get_mut(&cid) {
            Some(channel) => channel,
            None => return Err(self.refuse(fault, format!("unknown cid {}", cid))),
        };
        if let Err(refusal) = channel.state.process(kind) {
            let name = channel.name.clone();
            return Err(self.refuse(
                fault,
                format!(
                    "{} cannot be processed on channel {:?} when role={} and channel state={}",
                    kind, name, refusal.role, refusal.state
                ),
            ));
        }

        match command {
            Command::CreateChanResponse(c) => {
                let channel = self.channels.get_mut(&cid).expect("processed above");
                channel.sid = Some(c.sid);
                channel.native_data_type = Some(c.data_type);
                channel.native_data_count = c.data_count;
                self.sid_to_cid.insert(c.sid, cid);
            }
            Command::EventAddRequest(c) => {
                self.subscriptions.insert(
                    c.subscription_id,
                    SubscriptionInfo {
                        subscription_id: c.subscription_id,
                        cid,
                        data_type: c.data_type,
                        data_count: c.data_count,
                        mask: c.mask,
                    },
                );
            }
            Command::EventCancelResponse(c) => {
                self.subscriptions.remove(&c.subscription_id);
            }
            Command::ReadNotifyRequest(c) => {
                self.in_flight.insert(
                    c.ioid,
                    InFlightRequest {
                        ioid: c.ioid,
                        cid,
                        kind: IoKind::Read,
                    },
                );
            }
            Command::WriteNotifyRequest(c) => {
                self.in_flight.insert(
                    c.ioid,
                    InFlightRequest {
                        ioid: c.ioid,
                        cid,
                        kind: IoKind::Write,
                    },
                );
            }
            Command::ReadNotifyResponse(c) => {
                self.in_flight.remove(&c.ioid);
            }
            Command::WriteNotifyResponse(c) => {
                self.in_flight.remove(&c.ioid);
            }
            Command::ClearChannelResponse(_) | Command::ServerDisconnResponse(_) => {
                // The channel is gone; its subscriptions and pending
                // requests go with it.
                self.subscriptions.retain(|_, sub| sub.cid != cid);
                self.in_flight.retain(|_, req| req.cid != cid);
            }
            _ => {}
        }
        Ok(())
    }

    /// Resolve which channel a command addresses. Data responses carry no
    /// cid; they are matched through the ioid or subscription registries.
    fn resolve_cid(&self, command: &Command, fault: Fault) -> Result<u32, ProtocolError> {
        match command {
            Command::CreateChanRequest(c) => Ok(c.cid),
            Command::CreateChanResponse(c) => Ok(c.cid),
            Command::ClearChannelRequest(c) => Ok(c.cid),
            Command::ClearChannelResponse(c) => Ok(c.cid),
            Command::ReadNotifyRequest(c) => Ok(c.cid),
            Command::WriteRequest(c) => Ok(c.cid),
            Command::WriteNotifyRequest(c) => Ok(c.cid),
            Command::EventAddRequest(c) => Ok(c.cid),
            Command::EventCancelRequest(c) => Ok(c.cid),
            Command::EventCancelResponse(c) => Ok(c.cid),
            Command::ServerDisconnResponse(c) => Ok(c.cid),
            Command::ErrorResponse(c) => Ok(c.cid),
            Command::ReadNotifyResponse(c) => {
                let req = self
                    .in_flight
                    .get(&c.ioid)
                    .ok_or_else(|| ProtocolError::new(fault, format!("unknown ioid {}", c.ioid)))?;
                if req.kind != IoKind::Read {
                    return Err(ProtocolError::new(
                        fault,
                        format!("ioid {} belongs to a write, not a read", c.ioid),
                    ));
                }
                Ok(req.cid)
            }
            Command::WriteNotifyResponse(c) => {
                let req = self
                    .in_flight
                    .get(&c.ioid)
                    .ok_or_else(|| ProtocolError::new(fault, format!("unknown ioid {}", c.ioid)))?;
                if req.kind != IoKind::Write {
                    return Err(ProtocolError::new(
                        fault,
                        format!("ioid {} belongs to a read, not a write", c.ioid),
                    ));
                }
                Ok(req.cid)
            }
            Command::EventAddResponse(c) => self
                .subscriptions
                .get(&c.subscription_id)
                .map(|sub| sub.cid)
                .ok_or_else(|| {
                    ProtocolError::new(
                        fault,
                        format!("unknown subscription_id {}", c.subscription_id),
                    )
                }),
            _ => unreachable!("circuit-level command routed to a channel"),
        }
    }

    fn refuse(&self, fault: Fault, reason: String) -> ProtocolError {
        let err = ProtocolError::new(fault, reason);
        warn!(error = %err, "protocol violation");
        err
    }

    // ------------------------------------------------------------------
    // Command builders: fill in ids from the circuit's allocators so the
    // host never invents one.
    // ------------------------------------------------------------------

    /// The opening version request for this circuit's priority.
    pub fn version_request(&self) -> VersionRequest {
        VersionRequest {
            priority: self.priority,
            version: PROTOCOL_VERSION,
        }
    }

    /// The answering version response (negotiated version if known).
    pub fn version_response(&self) -> VersionResponse {
        VersionResponse {
            version: self.version.unwrap_or(PROTOCOL_VERSION),
        }
    }

    pub fn host_name_request(&self, name: &str) -> Result<HostNameRequest, ProtocolError> {
        HostNameRequest::new(name).map_err(|e| ProtocolError::local(e.to_string()))
    }

    pub fn client_name_request(&self, name: &str) -> Result<ClientNameRequest, ProtocolError> {
        ClientNameRequest::new(name).map_err(|e| ProtocolError::local(e.to_string()))
    }

    /// The create request for a channel previously registered with
    /// [`add_channel`](Self::add_channel).
    pub fn create_chan_request(&self, cid: u32) -> Result<CreateChanRequest, ProtocolError> {
        let channel = self
            .channels
            .get(&cid)
            .ok_or_else(|| ProtocolError::local(format!("unknown cid {}", cid)))?;
        CreateChanRequest::new(cid, PROTOCOL_VERSION, channel.name.clone())
            .map_err(|e| ProtocolError::local(e.to_string()))
    }

    /// A read request with a freshly allocated ioid.
    pub fn read_notify(
        &mut self,
        cid: u32,
        data_type: DbrType,
        data_count: u32,
    ) -> Result<ReadNotifyRequest, ProtocolError> {
        self.require_channel(cid)?;
        Ok(ReadNotifyRequest {
            data_type,
            data_count,
            cid,
            ioid: self.new_ioid(),
        })
    }

    /// A write request with a freshly allocated ioid.
    pub fn write_notify(
        &mut self,
        cid: u32,
        data_type: DbrType,
        payload: DbrPayload,
    ) -> Result<WriteNotifyRequest, ProtocolError> {
        self.require_channel(cid)?;
        Ok(WriteNotifyRequest {
            data_type,
            cid,
            ioid: self.new_ioid(),
            payload,
        })
    }

    /// A subscription request with a freshly allocated subscription id.
    pub fn subscribe(
        &mut self,
        cid: u32,
        data_type: DbrType,
        data_count: u32,
        mask: EventMask,
    ) -> Result<EventAddRequest, ProtocolError> {
        self.require_channel(cid)?;
        let subscription_id = self.new_subscription_id();
        Ok(EventAddRequest::new(
            data_type,
            data_count,
            cid,
            subscription_id,
            mask,
        ))
    }

    /// The cancel request matching a live subscription.
    pub fn unsubscribe(&self, subscription_id: u32) -> Result<EventCancelRequest, ProtocolError> {
        let sub = self.subscriptions.get(&subscription_id).ok_or_else(|| {
            ProtocolError::local(format!("unknown subscription_id {}", subscription_id))
        })?;
        Ok(EventCancelRequest {
            data_type: sub.data_type,
            data_count: sub.data_count,
            cid: sub.cid,
            subscription_id,
        })
    }

    /// The clear request for a channel that has completed creation.
    pub fn clear_channel(&self, cid: u32) -> Result<ClearChannelRequest, ProtocolError> {
        let channel = self
            .channels
            .get(&cid)
            .ok_or_else(|| ProtocolError::local(format!("unknown cid {}", cid)))?;
        let sid = channel.sid.ok_or_else(|| {
            ProtocolError::local(format!("channel {} has no sid yet", cid))
        })?;
        Ok(ClearChannelRequest { sid, cid })
    }

    fn require_channel(&self, cid: u32) -> Result<(), ProtocolError> {
        if self.channels.contains_key(&cid) {
            Ok(())
        } else {
            Err(ProtocolError::local(format!("unknown cid {}", cid)))
        }
    }
}

impl std::fmt::Debug for VirtualCircuit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualCircuit")
            .field("our_role", &self.our_role)
            .field("priority", &self.priority)
            .field("peer_address", &self.peer_address)
            .field("client_state", &self.state.state(Role::Client))
            .field("server_state", &self.state.state(Role::Server))
            .field("channels", &self.channels.len())
            .field("subscriptions", &self.subscriptions.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}
