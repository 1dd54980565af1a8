//! The CA command set.
//!
//! One struct per wire command, carrying exactly the typed fields of its
//! payload plus a static direction tag. Construction validates field ranges;
//! whether a command is legal for a given circuit or channel state is the
//! state machines' concern, not this module's.
//!
//! Several command codes are shared between a request and a response form
//! (0, 2, 12, 15, 18, 19, 23); which form a frame decodes to is determined
//! by the role of whoever sent it, so [`decode_commands`] takes the sender's
//! role.

use bytes::{BufMut, BytesMut};

use crate::dbr::{decode_payload, encode_payload, DbrPayload, DbrType, MAX_STRING_SIZE};
use crate::error::{CommandError, DecodeError};
use crate::flags::{AccessRights, EventMask};
use crate::header::{pad8, MessageHeader};
use crate::state::Role;

/// Protocol minor version this engine speaks.
pub const PROTOCOL_VERSION: u16 = 13;

/// Highest legal circuit priority.
pub const MAX_PRIORITY: u16 = 99;

/// Channel name byte limit (terminating NUL excluded).
pub const MAX_CHANNEL_NAME: usize = 60;

/// CA status codes carried in response `status` fields. The values are
/// opaque to the engine; only successful completion is referenced here.
pub mod eca {
    /// Successful completion.
    pub const NORMAL: u32 = 1;
}

/// Whether a command is a request, a response, or legal in both directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
    Bidirectional,
}

/// Exchange protocol versions and declare the circuit priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionRequest {
    pub priority: u16,
    pub version: u16,
}

impl VersionRequest {
    pub const CODE: u16 = 0;
    pub const DIRECTION: Direction = Direction::Request;

    pub fn new(priority: u16, version: u16) -> Result<Self, CommandError> {
        if priority > MAX_PRIORITY {
            return Err(CommandError::PriorityOutOfRange(priority));
        }
        Ok(Self { priority, version })
    }
}

/// Server's half of the version exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionResponse {
    pub version: u16,
}

impl VersionResponse {
    pub const CODE: u16 = 0;
    pub const DIRECTION: Direction = Direction::Response;

    pub fn new(version: u16) -> Self {
        Self { version }
    }
}

/// Open a subscription on a channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EventAddRequest {
    pub data_type: DbrType,
    pub data_count: u32,
    pub cid: u32,
    pub subscription_id: u32,
    /// Monitor deadbands; rarely used, zero by default.
    pub low: f32,
    pub high: f32,
    pub to: f32,
    pub mask: EventMask,
}

impl EventAddRequest {
    pub const CODE: u16 = 1;
    pub const DIRECTION: Direction = Direction::Request;

    pub fn new(
        data_type: DbrType,
        data_count: u32,
        cid: u32,
        subscription_id: u32,
        mask: EventMask,
    ) -> Self {
        Self {
            data_type,
            data_count,
            cid,
            subscription_id,
            low: 0.0,
            high: 0.0,
            to: 0.0,
            mask,
        }
    }
}

/// One pushed subscription update.
#[derive(Clone, Debug, PartialEq)]
pub struct EventAddResponse {
    pub data_type: DbrType,
    pub status: u32,
    pub subscription_id: u32,
    pub payload: DbrPayload,
}

impl EventAddResponse {
    pub const CODE: u16 = 1;
    pub const DIRECTION: Direction = Direction::Response;
}

/// Tear down a subscription.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EventCancelRequest {
    pub data_type: DbrType,
    pub data_count: u32,
    pub cid: u32,
    pub subscription_id: u32,
}

impl EventCancelRequest {
    pub const CODE: u16 = 2;
    pub const DIRECTION: Direction = Direction::Request;
}

/// Server confirmation that a subscription is gone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EventCancelResponse {
    pub data_type: DbrType,
    pub cid: u32,
    pub subscription_id: u32,
}

impl EventCancelResponse {
    pub const CODE: u16 = 2;
    pub const DIRECTION: Direction = Direction::Response;
}

/// Fire-and-forget write; no response follows.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteRequest {
    pub data_type: DbrType,
    pub cid: u32,
    pub ioid: u32,
    pub payload: DbrPayload,
}

impl WriteRequest {
    pub const CODE: u16 = 4;
    pub const DIRECTION: Direction = Direction::Request;
}

/// Server-reported failure of an earlier request.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub cid: u32,
    pub status_code: u32,
    /// Header of the request being faulted, embedded verbatim.
    pub original_request: MessageHeader,
    pub message: String,
}

impl ErrorResponse {
    pub const CODE: u16 = 11;
    pub const DIRECTION: Direction = Direction::Response;
}

/// Close a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClearChannelRequest {
    pub sid: u32,
    pub cid: u32,
}

impl ClearChannelRequest {
    pub const CODE: u16 = 12;
    pub const DIRECTION: Direction = Direction::Request;
}

/// Server confirmation of a channel clear.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClearChannelResponse {
    pub sid: u32,
    pub cid: u32,
}

impl ClearChannelResponse {
    pub const CODE: u16 = 12;
    pub const DIRECTION: Direction = Direction::Response;
}

/// Read a value, expecting a confirmation carrying data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReadNotifyRequest {
    pub data_type: DbrType,
    pub data_count: u32,
    pub cid: u32,
    pub ioid: u32,
}

impl ReadNotifyRequest {
    pub const CODE: u16 = 15;
    pub const DIRECTION: Direction = Direction::Request;
}

/// Data answering a [`ReadNotifyRequest`], matched by ioid.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadNotifyResponse {
    pub data_type: DbrType,
    pub status: u32,
    pub ioid: u32,
    pub payload: DbrPayload,
}

impl ReadNotifyResponse {
    pub const CODE: u16 = 15;
    pub const DIRECTION: Direction = Direction::Response;
}

/// Create a channel for a named process variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateChanRequest {
    pub cid: u32,
    pub version: u16,
    pub name: String,
}

impl CreateChanRequest {
    pub const CODE: u16 = 18;
    pub const DIRECTION: Direction = Direction::Request;

    pub fn new(cid: u32, version: u16, name: impl Into<String>) -> Result<Self, CommandError> {
        let name = name.into();
        check_channel_name(&name)?;
        Ok(Self { cid, version, name })
    }
}

/// Server acknowledgement of a channel, assigning its sid and native type.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CreateChanResponse {
    pub data_type: DbrType,
    pub data_count: u32,
    pub cid: u32,
    pub sid: u32,
}

impl CreateChanResponse {
    pub const CODE: u16 = 18;
    pub const DIRECTION: Direction = Direction::Response;
}

/// Write a value, expecting a confirmation without data.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteNotifyRequest {
    pub data_type: DbrType,
    pub cid: u32,
    pub ioid: u32,
    pub payload: DbrPayload,
}

impl WriteNotifyRequest {
    pub const CODE: u16 = 19;
    pub const DIRECTION: Direction = Direction::Request;
}

/// Confirmation of a [`WriteNotifyRequest`], matched by ioid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WriteNotifyResponse {
    pub data_type: DbrType,
    pub data_count: u32,
    pub status: u32,
    pub ioid: u32,
}

impl WriteNotifyResponse {
    pub const CODE: u16 = 19;
    pub const DIRECTION: Direction = Direction::Response;
}

/// Advertise the client's user name for access-rights decisions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientNameRequest {
    pub name: String,
}

impl ClientNameRequest {
    pub const CODE: u16 = 20;
    pub const DIRECTION: Direction = Direction::Request;

    pub fn new(name: impl Into<String>) -> Result<Self, CommandError> {
        let name = name.into();
        check_peer_name("client name", &name)?;
        Ok(Self { name })
    }
}

/// Advertise the client's host name for access-rights decisions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostNameRequest {
    pub name: String,
}

impl HostNameRequest {
    pub const CODE: u16 = 21;
    pub const DIRECTION: Direction = Direction::Request;

    pub fn new(name: impl Into<String>) -> Result<Self, CommandError> {
        let name = name.into();
        check_peer_name("host name", &name)?;
        Ok(Self { name })
    }
}

/// Server grant of read/write rights on a channel. May arrive at any point
/// after channel creation, including before the create response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessRightsResponse {
    pub cid: u32,
    pub rights: AccessRights,
}

impl AccessRightsResponse {
    pub const CODE: u16 = 22;
    pub const DIRECTION: Direction = Direction::Response;
}

/// Connection liveness probe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EchoRequest;

impl EchoRequest {
    pub const CODE: u16 = 23;
    pub const DIRECTION: Direction = Direction::Bidirectional;
}

/// Answer to an [`EchoRequest`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EchoResponse;

impl EchoResponse {
    pub const CODE: u16 = 23;
    pub const DIRECTION: Direction = Direction::Bidirectional;
}

/// Server notice that it is dropping a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerDisconnResponse {
    pub cid: u32,
}

impl ServerDisconnResponse {
    pub const CODE: u16 = 27;
    pub const DIRECTION: Direction = Direction::Response;
}

fn check_channel_name(name: &str) -> Result<(), CommandError> {
    if name.is_empty() {
        return Err(CommandError::EmptyChannelName);
    }
    if name.len() > MAX_CHANNEL_NAME {
        return Err(CommandError::StringTooLong {
            what: "channel name",
            len: name.len(),
            max: MAX_CHANNEL_NAME,
        });
    }
    if name.as_bytes().contains(&0) {
        return Err(CommandError::EmbeddedNul("channel name"));
    }
    Ok(())
}

fn check_peer_name(what: &'static str, name: &str) -> Result<(), CommandError> {
    if name.len() >= MAX_STRING_SIZE {
        return Err(CommandError::StringTooLong {
            what,
            len: name.len(),
            max: MAX_STRING_SIZE - 1,
        });
    }
    if name.as_bytes().contains(&0) {
        return Err(CommandError::EmbeddedNul(what));
    }
    Ok(())
}

/// Discriminant of a [`Command`], used as the key of the state-machine
/// transition tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    VersionRequest,
    VersionResponse,
    EventAddRequest,
    EventAddResponse,
    EventCancelRequest,
    EventCancelResponse,
    WriteRequest,
    ErrorResponse,
    ClearChannelRequest,
    ClearChannelResponse,
    ReadNotifyRequest,
    ReadNotifyResponse,
    CreateChanRequest,
    CreateChanResponse,
    WriteNotifyRequest,
    WriteNotifyResponse,
    ClientNameRequest,
    HostNameRequest,
    AccessRightsResponse,
    EchoRequest,
    EchoResponse,
    ServerDisconnResponse,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::VersionRequest => "VersionRequest",
            CommandKind::VersionResponse => "VersionResponse",
            CommandKind::EventAddRequest => "EventAddRequest",
            CommandKind::EventAddResponse => "EventAddResponse",
            CommandKind::EventCancelRequest => "EventCancelRequest",
            CommandKind::EventCancelResponse => "EventCancelResponse",
            CommandKind::WriteRequest => "WriteRequest",
            CommandKind::ErrorResponse => "ErrorResponse",
            CommandKind::ClearChannelRequest => "ClearChannelRequest",
            CommandKind::ClearChannelResponse => "ClearChannelResponse",
            CommandKind::ReadNotifyRequest => "ReadNotifyRequest",
            CommandKind::ReadNotifyResponse => "ReadNotifyResponse",
            CommandKind::CreateChanRequest => "CreateChanRequest",
            CommandKind::CreateChanResponse => "CreateChanResponse",
            CommandKind::WriteNotifyRequest => "WriteNotifyRequest",
            CommandKind::WriteNotifyResponse => "WriteNotifyResponse",
            CommandKind::ClientNameRequest => "ClientNameRequest",
            CommandKind::HostNameRequest => "HostNameRequest",
            CommandKind::AccessRightsResponse => "AccessRightsResponse",
            CommandKind::EchoRequest => "EchoRequest",
            CommandKind::EchoResponse => "EchoResponse",
            CommandKind::ServerDisconnResponse => "ServerDisconnResponse",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            CommandKind::EchoRequest | CommandKind::EchoResponse => Direction::Bidirectional,
            CommandKind::VersionRequest
            | CommandKind::EventAddRequest
            | CommandKind::EventCancelRequest
            | CommandKind::WriteRequest
            | CommandKind::ClearChannelRequest
            | CommandKind::ReadNotifyRequest
            | CommandKind::CreateChanRequest
            | CommandKind::WriteNotifyRequest
            | CommandKind::ClientNameRequest
            | CommandKind::HostNameRequest => Direction::Request,
            _ => Direction::Response,
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded (or to-be-encoded) CA command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    VersionRequest(VersionRequest),
    VersionResponse(VersionResponse),
    EventAddRequest(EventAddRequest),
    EventAddResponse(EventAddResponse),
    EventCancelRequest(EventCancelRequest),
    EventCancelResponse(EventCancelResponse),
    WriteRequest(WriteRequest),
    ErrorResponse(ErrorResponse),
    ClearChannelRequest(ClearChannelRequest),
    ClearChannelResponse(ClearChannelResponse),
    ReadNotifyRequest(ReadNotifyRequest),
    ReadNotifyResponse(ReadNotifyResponse),
    CreateChanRequest(CreateChanRequest),
    CreateChanResponse(CreateChanResponse),
    WriteNotifyRequest(WriteNotifyRequest),
    WriteNotifyResponse(WriteNotifyResponse),
    ClientNameRequest(ClientNameRequest),
    HostNameRequest(HostNameRequest),
    AccessRightsResponse(AccessRightsResponse),
    EchoRequest(EchoRequest),
    EchoResponse(EchoResponse),
    ServerDisconnResponse(ServerDisconnResponse),
}

macro_rules! impl_from_command {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Command {
                fn from(cmd: $variant) -> Self {
                    Command::$variant(cmd)
                }
            }
        )*
    };
}

impl_from_command!(
    VersionRequest,
    VersionResponse,
    EventAddRequest,
    EventAddResponse,
    EventCancelRequest,
    EventCancelResponse,
    WriteRequest,
    ErrorResponse,
    ClearChannelRequest,
    ClearChannelResponse,
    ReadNotifyRequest,
    ReadNotifyResponse,
    CreateChanRequest,
    CreateChanResponse,
    WriteNotifyRequest,
    WriteNotifyResponse,
    ClientNameRequest,
    HostNameRequest,
    AccessRightsResponse,
    EchoRequest,
    EchoResponse,
    ServerDisconnResponse,
);

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::VersionRequest(_) => CommandKind::VersionRequest,
            Command::VersionResponse(_) => CommandKind::VersionResponse,
            Command::EventAddRequest(_) => CommandKind::EventAddRequest,
            Command::EventAddResponse(_) => CommandKind::EventAddResponse,
            Command::EventCancelRequest(_) => CommandKind::EventCancelRequest,
            Command::EventCancelResponse(_) => CommandKind::EventCancelResponse,
            Command::WriteRequest(_) => CommandKind::WriteRequest,
            Command::ErrorResponse(_) => CommandKind::ErrorResponse,
            Command::ClearChannelRequest(_) => CommandKind::ClearChannelRequest,
            Command::ClearChannelResponse(_) => CommandKind::ClearChannelResponse,
            Command::ReadNotifyRequest(_) => CommandKind::ReadNotifyRequest,
            Command::ReadNotifyResponse(_) => CommandKind::ReadNotifyResponse,
            Command::CreateChanRequest(_) => CommandKind::CreateChanRequest,
            Command::CreateChanResponse(_) => CommandKind::CreateChanResponse,
            Command::WriteNotifyRequest(_) => CommandKind::WriteNotifyRequest,
            Command::WriteNotifyResponse(_) => CommandKind::WriteNotifyResponse,
            Command::ClientNameRequest(_) => CommandKind::ClientNameRequest,
            Command::HostNameRequest(_) => CommandKind::HostNameRequest,
            Command::AccessRightsResponse(_) => CommandKind::AccessRightsResponse,
            Command::EchoRequest(_) => CommandKind::EchoRequest,
            Command::EchoResponse(_) => CommandKind::EchoResponse,
            Command::ServerDisconnResponse(_) => CommandKind::ServerDisconnResponse,
        }
    }

    pub fn direction(&self) -> Direction {
        self.kind().direction()
    }

    /// Wire command code.
    pub fn code(&self) -> u16 {
        match self.kind() {
            CommandKind::VersionRequest | CommandKind::VersionResponse => 0,
            CommandKind::EventAddRequest | CommandKind::EventAddResponse => 1,
            CommandKind::EventCancelRequest | CommandKind::EventCancelResponse => 2,
            CommandKind::WriteRequest => 4,
            CommandKind::ErrorResponse => 11,
            CommandKind::ClearChannelRequest | CommandKind::ClearChannelResponse => 12,
            CommandKind::ReadNotifyRequest | CommandKind::ReadNotifyResponse => 15,
            CommandKind::CreateChanRequest | CommandKind::CreateChanResponse => 18,
            CommandKind::WriteNotifyRequest | CommandKind::WriteNotifyResponse => 19,
            CommandKind::ClientNameRequest => 20,
            CommandKind::HostNameRequest => 21,
            CommandKind::AccessRightsResponse => 22,
            CommandKind::EchoRequest | CommandKind::EchoResponse => 23,
            CommandKind::ServerDisconnResponse => 27,
        }
    }
}

/// Serialize one command, appending header, payload, and alignment padding
/// to `buf`. Consecutive encodes into the same buffer form a valid wire
/// stream.
pub fn encode_command(cmd: &Command, buf: &mut BytesMut) -> Result<(), CommandError> {
    let mut payload = BytesMut::new();
    let mut hdr = build_header(cmd, &mut payload)?;
    hdr.payload_size = payload.len() as u32;
    hdr.write_to(buf);
    buf.put_slice(&payload);
    buf.put_bytes(0, pad8(payload.len()) - payload.len());
    Ok(())
}

/// Build the header (payload_size filled in by the caller) and serialize the
/// payload bytes.
fn build_header(cmd: &Command, payload: &mut BytesMut) -> Result<MessageHeader, CommandError> {
    let code = cmd.code();
    Ok(match cmd {
        Command::VersionRequest(c) => {
            if c.priority > MAX_PRIORITY {
                return Err(CommandError::PriorityOutOfRange(c.priority));
            }
            MessageHeader::new(code, 0, c.priority, u32::from(c.version), 0, 0)
        }
        Command::VersionResponse(c) => {
            MessageHeader::new(code, 0, 0, u32::from(c.version), 0, 0)
        }
        Command::EventAddRequest(c) => {
            payload.put_f32(c.low);
            payload.put_f32(c.high);
            payload.put_f32(c.to);
            payload.put_u16(c.mask.bits());
            payload.put_u16(0);
            MessageHeader::new(
                code,
                0,
                c.data_type.as_u16(),
                c.data_count,
                c.cid,
                c.subscription_id,
            )
        }
        Command::EventAddResponse(c) => {
            encode_payload(c.data_type, &c.payload, payload)?;
            MessageHeader::new(
                code,
                0,
                c.data_type.as_u16(),
                c.payload.count() as u32,
                c.status,
                c.subscription_id,
            )
        }
        Command::EventCancelRequest(c) => MessageHeader::new(
            code,
            0,
            c.data_type.as_u16(),
            c.data_count,
            c.cid,
            c.subscription_id,
        ),
        Command::EventCancelResponse(c) => MessageHeader::new(
            code,
            0,
            c.data_type.as_u16(),
            0,
            c.cid,
            c.subscription_id,
        ),
        Command::WriteRequest(c) => {
            encode_payload(c.data_type, &c.payload, payload)?;
            MessageHeader::new(
                code,
                0,
                c.data_type.as_u16(),
                c.payload.count() as u32,
                c.cid,
                c.ioid,
            )
        }
        Command::ErrorResponse(c) => {
            c.original_request.write_to(payload);
            payload.put_slice(c.message.as_bytes());
            payload.put_u8(0);
            MessageHeader::new(code, 0, 0, 0, c.cid, c.status_code)
        }
        Command::ClearChannelRequest(c) => MessageHeader::new(code, 0, 0, 0, c.sid, c.cid),
        Command::ClearChannelResponse(c) => MessageHeader::new(code, 0, 0, 0, c.sid, c.cid),
        Command::ReadNotifyRequest(c) => MessageHeader::new(
            code,
            0,
            c.data_type.as_u16(),
            c.data_count,
            c.cid,
            c.ioid,
        ),
        Command::ReadNotifyResponse(c) => {
            encode_payload(c.data_type, &c.payload, payload)?;
            MessageHeader::new(
                code,
                0,
                c.data_type.as_u16(),
                c.payload.count() as u32,
                c.status,
                c.ioid,
            )
        }
        Command::CreateChanRequest(c) => {
            check_channel_name(&c.name)?;
            payload.put_slice(c.name.as_bytes());
            payload.put_u8(0);
            MessageHeader::new(code, 0, 0, 0, c.cid, u32::from(c.version))
        }
        Command::CreateChanResponse(c) => MessageHeader::new(
            code,
            0,
            c.data_type.as_u16(),
            c.data_count,
            c.cid,
            c.sid,
        ),
        Command::WriteNotifyRequest(c) => {
            encode_payload(c.data_type, &c.payload, payload)?;
            MessageHeader::new(
                code,
                0,
                c.data_type.as_u16(),
                c.payload.count() as u32,
                c.cid,
                c.ioid,
            )
        }
        Command::WriteNotifyResponse(c) => MessageHeader::new(
            code,
            0,
            c.data_type.as_u16(),
            c.data_count,
            c.status,
            c.ioid,
        ),
        Command::ClientNameRequest(c) => {
            check_peer_name("client name", &c.name)?;
            payload.put_slice(c.name.as_bytes());
            payload.put_u8(0);
            MessageHeader::new(code, 0, 0, 0, 0, 0)
        }
        Command::HostNameRequest(c) => {
            check_peer_name("host name", &c.name)?;
            payload.put_slice(c.name.as_bytes());
            payload.put_u8(0);
            MessageHeader::new(code, 0, 0, 0, 0, 0)
        }
        Command::AccessRightsResponse(c) => {
            MessageHeader::new(code, 0, 0, 0, c.cid, c.rights.bits())
        }
        Command::EchoRequest(_) | Command::EchoResponse(_) => {
            MessageHeader::new(code, 0, 0, 0, 0, 0)
        }
        Command::ServerDisconnResponse(c) => MessageHeader::new(code, 0, 0, 0, c.cid, 0),
    })
}

/// Decode as many whole commands as `buf` holds.
///
/// `sender` is the role of the peer that produced the bytes; it selects the
/// request or response form for the command codes shared by both. Returns
/// the commands in wire order and the number of bytes consumed. Nothing is
/// retained: a partial trailing frame consumes zero of its bytes and the
/// caller buffers them for the next call.
pub fn decode_commands(buf: &[u8], sender: Role) -> Result<(Vec<Command>, usize), DecodeError> {
    let mut commands = Vec::new();
    let mut consumed = 0;

    while let Some((hdr, hdr_len)) = MessageHeader::from_bytes(&buf[consumed..]) {
        let frame_len = hdr_len + hdr.padded_payload_size();
        if buf.len() - consumed < frame_len {
            break;
        }
        let payload_end = consumed + hdr_len + hdr.payload_size as usize;
        let payload = &buf[consumed + hdr_len..payload_end];
        commands.push(decode_one(&hdr, payload, sender)?);
        consumed += frame_len;
    }

    Ok((commands, consumed))
}

fn decode_one(hdr: &MessageHeader, payload: &[u8], sender: Role) -> Result<Command, DecodeError> {
    let from_client = sender == Role::Client;
    Ok(match hdr.command {
        0 => {
            if from_client {
                Command::VersionRequest(VersionRequest {
                    priority: hdr.data_type,
                    version: hdr.data_count as u16,
                })
            } else {
                Command::VersionResponse(VersionResponse {
                    version: hdr.data_count as u16,
                })
            }
        }
        1 => {
            let data_type = dbr_type(hdr)?;
            if from_client {
                if payload.len() < 16 {
                    return Err(DecodeError::PayloadTooShort {
                        expected: 16,
                        got: payload.len(),
                    });
                }
                Command::EventAddRequest(EventAddRequest {
                    data_type,
                    data_count: hdr.data_count,
                    cid: hdr.param1,
                    subscription_id: hdr.param2,
                    low: f32::from_be_bytes(payload[0..4].try_into().unwrap()),
                    high: f32::from_be_bytes(payload[4..8].try_into().unwrap()),
                    to: f32::from_be_bytes(payload[8..12].try_into().unwrap()),
                    mask: EventMask::from_wire(u16::from_be_bytes(
                        payload[12..14].try_into().unwrap(),
                    )),
                })
            } else {
                Command::EventAddResponse(EventAddResponse {
                    data_type,
                    status: hdr.param1,
                    subscription_id: hdr.param2,
                    payload: decode_payload(data_type, hdr.data_count as usize, payload)?,
                })
            }
        }
        2 => {
            let data_type = dbr_type(hdr)?;
            if from_client {
                Command::EventCancelRequest(EventCancelRequest {
                    data_type,
                    data_count: hdr.data_count,
                    cid: hdr.param1,
                    subscription_id: hdr.param2,
                })
            } else {
                Command::EventCancelResponse(EventCancelResponse {
                    data_type,
                    cid: hdr.param1,
                    subscription_id: hdr.param2,
                })
            }
        }
        4 => {
            if !from_client {
                return Err(DecodeError::NoSuchCommandForRole {
                    command: 4,
                    sender,
                });
            }
            let data_type = dbr_type(hdr)?;
            Command::WriteRequest(WriteRequest {
                data_type,
                cid: hdr.param1,
                ioid: hdr.param2,
                payload: decode_payload(data_type, hdr.data_count as usize, payload)?,
            })
        }
        11 => {
            if from_client {
                return Err(DecodeError::NoSuchCommandForRole {
                    command: 11,
                    sender,
                });
            }
            let (original, used) =
                MessageHeader::from_bytes(payload).ok_or(DecodeError::PayloadTooShort {
                    expected: crate::header::FIXED_HEADER_SIZE,
                    got: payload.len(),
                })?;
            let rest = &payload[used..];
            let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            let message = std::str::from_utf8(&rest[..end])
                .map_err(|_| DecodeError::InvalidString("error message"))?
                .to_owned();
            Command::ErrorResponse(ErrorResponse {
                cid: hdr.param1,
                status_code: hdr.param2,
                original_request: original,
                message,
            })
        }
        12 => {
            if from_client {
                Command::ClearChannelRequest(ClearChannelRequest {
                    sid: hdr.param1,
                    cid: hdr.param2,
                })
            } else {
                Command::ClearChannelResponse(ClearChannelResponse {
                    sid: hdr.param1,
                    cid: hdr.param2,
                })
            }
        }
        15 => {
            let data_type = dbr_type(hdr)?;
            if from_client {
                Command::ReadNotifyRequest(ReadNotifyRequest {
                    data_type,
                    data_count: hdr.data_count,
                    cid: hdr.param1,
                    ioid: hdr.param2,
                })
            } else {
                Command::ReadNotifyResponse(ReadNotifyResponse {
                    data_type,
                    status: hdr.param1,
                    ioid: hdr.param2,
                    payload: decode_payload(data_type, hdr.data_count as usize, payload)?,
                })
            }
        }
        18 => {
            if from_client {
                let end = payload
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap_or(payload.len());
                let name = std::str::from_utf8(&payload[..end])
                    .map_err(|_| DecodeError::InvalidString("channel name"))?
                    .to_owned();
                Command::CreateChanRequest(CreateChanRequest {
                    cid: hdr.param1,
                    version: hdr.param2 as u16,
                    name,
                })
            } else {
                Command::CreateChanResponse(CreateChanResponse {
                    data_type: dbr_type(hdr)?,
                    data_count: hdr.data_count,
                    cid: hdr.param1,
                    sid: hdr.param2,
                })
            }
        }
        19 => {
            let data_type = dbr_type(hdr)?;
            if from_client {
                Command::WriteNotifyRequest(WriteNotifyRequest {
                    data_type,
                    cid: hdr.param1,
                    ioid: hdr.param2,
                    payload: decode_payload(data_type, hdr.data_count as usize, payload)?,
                })
            } else {
                Command::WriteNotifyResponse(WriteNotifyResponse {
                    data_type,
                    data_count: hdr.data_count,
                    status: hdr.param1,
                    ioid: hdr.param2,
                })
            }
        }
        20 | 21 => {
            if !from_client {
                return Err(DecodeError::NoSuchCommandForRole {
                    command: hdr.command,
                    sender,
                });
            }
            let end = payload
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(payload.len());
            let what = if hdr.command == 20 {
                "client name"
            } else {
                "host name"
            };
            let name = std::str::from_utf8(&payload[..end])
                .map_err(|_| DecodeError::InvalidString(what))?
                .to_owned();
            if hdr.command == 20 {
                Command::ClientNameRequest(ClientNameRequest { name })
            } else {
                Command::HostNameRequest(HostNameRequest { name })
            }
        }
        22 => {
            if from_client {
                return Err(DecodeError::NoSuchCommandForRole {
                    command: 22,
                    sender,
                });
            }
            Command::AccessRightsResponse(AccessRightsResponse {
                cid: hdr.param1,
                rights: AccessRights::from_wire(hdr.param2),
            })
        }
        23 => {
            if from_client {
                Command::EchoRequest(EchoRequest)
            } else {
                Command::EchoResponse(EchoResponse)
            }
        }
        27 => {
            if from_client {
                return Err(DecodeError::NoSuchCommandForRole {
                    command: 27,
                    sender,
                });
            }
            Command::ServerDisconnResponse(ServerDisconnResponse { cid: hdr.param1 })
        }
        other => return Err(DecodeError::UnknownCommand(other)),
    })
}

fn dbr_type(hdr: &MessageHeader) -> Result<DbrType, DecodeError> {
    DbrType::from_u16(hdr.data_type).ok_or(DecodeError::UnknownDbrType(hdr.data_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbr::{DbrMetadata, DbrValue, TimeStamp};
    use crate::header::{EXTENDED_HEADER_SIZE, FIXED_HEADER_SIZE};

    fn roundtrip(cmd: Command, sender: Role) -> Command {
        let mut buf = BytesMut::new();
        encode_command(&cmd, &mut buf).unwrap();
        assert_eq!(buf.len() % 8, 0, "frames are 8-byte aligned");
        let (decoded, used) = decode_commands(&buf, sender).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(decoded.len(), 1);
        decoded.into_iter().next().unwrap()
    }

    #[test]
    fn version_exchange_roundtrip() {
        let req = Command::from(VersionRequest::new(0, 13).unwrap());
        assert_eq!(roundtrip(req.clone(), Role::Client), req);

        let resp = Command::from(VersionResponse::new(13));
        assert_eq!(roundtrip(resp.clone(), Role::Server), resp);
    }

    #[test]
    fn priority_out_of_range_rejected() {
        assert_eq!(
            VersionRequest::new(100, 13),
            Err(CommandError::PriorityOutOfRange(100))
        );
    }

    #[test]
    fn create_chan_roundtrip() {
        let req = Command::from(CreateChanRequest::new(7, PROTOCOL_VERSION, "XF:test").unwrap());
        assert_eq!(roundtrip(req.clone(), Role::Client), req);

        let resp = Command::from(CreateChanResponse {
            data_type: DbrType::Double,
            data_count: 1,
            cid: 7,
            sid: 42,
        });
        assert_eq!(roundtrip(resp.clone(), Role::Server), resp);
    }

    #[test]
    fn channel_name_validation() {
        assert!(matches!(
            CreateChanRequest::new(0, 13, ""),
            Err(CommandError::EmptyChannelName)
        ));
        let long = "x".repeat(MAX_CHANNEL_NAME + 1);
        assert!(matches!(
            CreateChanRequest::new(0, 13, long),
            Err(CommandError::StringTooLong { .. })
        ));
    }

    #[test]
    fn event_add_roundtrip() {
        let req = Command::from(EventAddRequest::new(
            DbrType::TimeDouble,
            1,
            0,
            7,
            EventMask::VALUE,
        ));
        assert_eq!(roundtrip(req.clone(), Role::Client), req);

        let resp = Command::from(EventAddResponse {
            data_type: DbrType::TimeDouble,
            status: eca::NORMAL,
            subscription_id: 7,
            payload: DbrPayload::with_metadata(
                DbrMetadata {
                    severity: 1,
                    stamp: TimeStamp {
                        secs: 1000,
                        nanos: 500,
                    },
                    ..Default::default()
                },
                DbrValue::Double(vec![3.25]),
            ),
        });
        assert_eq!(roundtrip(resp.clone(), Role::Server), resp);
    }

    #[test]
    fn event_cancel_roundtrip() {
        let req = Command::from(EventCancelRequest {
            data_type: DbrType::Double,
            data_count: 1,
            cid: 0,
            subscription_id: 7,
        });
        assert_eq!(roundtrip(req.clone(), Role::Client), req);

        let resp = Command::from(EventCancelResponse {
            data_type: DbrType::Double,
            cid: 0,
            subscription_id: 7,
        });
        assert_eq!(roundtrip(resp.clone(), Role::Server), resp);
    }

    #[test]
    fn write_and_notify_roundtrip() {
        let write = Command::from(WriteRequest {
            data_type: DbrType::Long,
            cid: 3,
            ioid: 9,
            payload: DbrPayload::new(DbrValue::Long(vec![-5, 6])),
        });
        assert_eq!(roundtrip(write.clone(), Role::Client), write);

        let req = Command::from(WriteNotifyRequest {
            data_type: DbrType::Long,
            cid: 3,
            ioid: 10,
            payload: DbrPayload::new(DbrValue::Long(vec![11])),
        });
        assert_eq!(roundtrip(req.clone(), Role::Client), req);

        let resp = Command::from(WriteNotifyResponse {
            data_type: DbrType::Long,
            data_count: 1,
            status: eca::NORMAL,
            ioid: 10,
        });
        assert_eq!(roundtrip(resp.clone(), Role::Server), resp);
    }

    #[test]
    fn read_notify_roundtrip() {
        let req = Command::from(ReadNotifyRequest {
            data_type: DbrType::StsInt,
            data_count: 2,
            cid: 1,
            ioid: 4,
        });
        assert_eq!(roundtrip(req.clone(), Role::Client), req);

        let resp = Command::from(ReadNotifyResponse {
            data_type: DbrType::StsInt,
            status: eca::NORMAL,
            ioid: 4,
            payload: DbrPayload::with_metadata(
                DbrMetadata {
                    status: 3,
                    severity: 2,
                    ..Default::default()
                },
                DbrValue::Int(vec![17, -17]),
            ),
        });
        assert_eq!(roundtrip(resp.clone(), Role::Server), resp);
    }

    #[test]
    fn extended_header_roundtrip() {
        // 70_000 doubles: payload_size 560_000, both sentinel fields on.
        let resp = Command::from(ReadNotifyResponse {
            data_type: DbrType::Double,
            status: eca::NORMAL,
            ioid: 1,
            payload: DbrPayload::new(DbrValue::Double(vec![0.5; 70_000])),
        });
        let mut buf = BytesMut::new();
        encode_command(&resp, &mut buf).unwrap();
        assert_eq!(buf.len(), EXTENDED_HEADER_SIZE + 560_000);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 0xFFFF);
        assert_eq!(u16::from_be_bytes([buf[6], buf[7]]), 0xFFFF);
        assert_eq!(
            u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]),
            560_000
        );
        assert_eq!(
            u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]),
            70_000
        );

        let (decoded, used) = decode_commands(&buf, Role::Server).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(decoded, vec![resp]);
    }

    #[test]
    fn error_response_roundtrip() {
        let original = MessageHeader::new(15, 0, 6, 1, 5, 12);
        let resp = Command::from(ErrorResponse {
            cid: 5,
            status_code: 72,
            original_request: original,
            message: "channel not connected".into(),
        });
        assert_eq!(roundtrip(resp.clone(), Role::Server), resp);
    }

    #[test]
    fn names_echo_access_disconn_roundtrip() {
        let cases = [
            (
                Command::from(ClientNameRequest::new("operator").unwrap()),
                Role::Client,
            ),
            (
                Command::from(HostNameRequest::new("ioc01.example").unwrap()),
                Role::Client,
            ),
            (Command::from(EchoRequest), Role::Client),
            (Command::from(EchoResponse), Role::Server),
            (
                Command::from(AccessRightsResponse {
                    cid: 2,
                    rights: AccessRights::READ | AccessRights::WRITE,
                }),
                Role::Server,
            ),
            (
                Command::from(ServerDisconnResponse { cid: 2 }),
                Role::Server,
            ),
            (
                Command::from(ClearChannelRequest { sid: 42, cid: 2 }),
                Role::Client,
            ),
            (
                Command::from(ClearChannelResponse { sid: 42, cid: 2 }),
                Role::Server,
            ),
        ];
        for (cmd, sender) in cases {
            assert_eq!(roundtrip(cmd.clone(), sender), cmd);
        }
    }

    #[test]
    fn unknown_command_code_rejected() {
        let hdr = MessageHeader::new(99, 0, 0, 0, 0, 0);
        let mut buf = BytesMut::new();
        hdr.write_to(&mut buf);
        let err = decode_commands(&buf, Role::Client).unwrap_err();
        assert_eq!(err, DecodeError::UnknownCommand(99));
    }

    #[test]
    fn bad_data_type_rejected() {
        let hdr = MessageHeader::new(15, 0, 999, 1, 0, 0);
        let mut buf = BytesMut::new();
        hdr.write_to(&mut buf);
        let err = decode_commands(&buf, Role::Client).unwrap_err();
        assert_eq!(err, DecodeError::UnknownDbrType(999));
    }

    #[test]
    fn short_dbr_payload_rejected() {
        // Header claims 3 doubles but carries payload for 1.
        let hdr = MessageHeader::new(15, 8, 6, 3, 1, 1);
        let mut buf = BytesMut::new();
        hdr.write_to(&mut buf);
        buf.put_f64(1.0);
        let err = decode_commands(&buf, Role::Server).unwrap_err();
        assert!(matches!(err, DecodeError::PayloadTooShort { .. }));
    }

    #[test]
    fn response_only_codes_rejected_from_client() {
        for code in [11u16, 22, 27] {
            let hdr = MessageHeader::new(code, 0, 0, 0, 0, 0);
            let mut buf = BytesMut::new();
            hdr.write_to(&mut buf);
            let err = decode_commands(&buf, Role::Client).unwrap_err();
            assert_eq!(
                err,
                DecodeError::NoSuchCommandForRole {
                    command: code,
                    sender: Role::Client
                }
            );
        }
    }

    #[test]
    fn request_only_codes_rejected_from_server() {
        for code in [4u16, 20, 21] {
            let hdr = MessageHeader::new(code, 0, if code == 4 { 6 } else { 0 }, 0, 0, 0);
            let mut buf = BytesMut::new();
            hdr.write_to(&mut buf);
            let err = decode_commands(&buf, Role::Server).unwrap_err();
            assert_eq!(
                err,
                DecodeError::NoSuchCommandForRole {
                    command: code,
                    sender: Role::Server
                }
            );
        }
    }

    #[test]
    fn partial_frame_consumes_nothing() {
        let cmd = Command::from(CreateChanRequest::new(1, 13, "XF:test").unwrap());
        let mut buf = BytesMut::new();
        encode_command(&cmd, &mut buf).unwrap();

        // Header alone: decoder must wait for the payload.
        let (cmds, used) = decode_commands(&buf[..FIXED_HEADER_SIZE], Role::Client).unwrap();
        assert!(cmds.is_empty());
        assert_eq!(used, 0);

        // One byte short of the full frame: still nothing.
        let (cmds, used) = decode_commands(&buf[..buf.len() - 1], Role::Client).unwrap();
        assert!(cmds.is_empty());
        assert_eq!(used, 0);
    }

    #[test]
    fn multiple_commands_decode_in_wire_order() {
        let first = Command::from(VersionRequest::new(0, 13).unwrap());
        let second = Command::from(HostNameRequest::new("ioc01").unwrap());
        let third = Command::from(EchoRequest);

        let mut buf = BytesMut::new();
        encode_command(&first, &mut buf).unwrap();
        encode_command(&second, &mut buf).unwrap();
        encode_command(&third, &mut buf).unwrap();

        let (cmds, used) = decode_commands(&buf, Role::Client).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(cmds, vec![first, second, third]);
    }

    #[test]
    fn direction_tags() {
        assert_eq!(
            Command::from(VersionRequest::new(0, 13).unwrap()).direction(),
            Direction::Request
        );
        assert_eq!(
            Command::from(ServerDisconnResponse { cid: 0 }).direction(),
            Direction::Response
        );
        assert_eq!(Command::from(EchoRequest).direction(), Direction::Bidirectional);
        assert_eq!(Command::from(EchoResponse).direction(), Direction::Bidirectional);
    }
}
