use bitflags::bitflags;
use bytes::Bytes;
use std::net::SocketAddr;

use crate::buf_ext::BufExt;
use crate::error::{Error, Result};

pub(crate) const DEFAULT_CQL_VERSION: &str = "3.0.0";
pub(crate) const CQL_VERSION_KEY: &str = "CQL_VERSION";

pub(crate) const FRAME_HEADER_LEN: usize = 8;

// Server-pushed events are correlated to this reserved stream id, never to a request.
pub(crate) const EVENT_STREAM_ID: i8 = -1;

pub(crate) const RESULT_VOID: i32 = 0x0001;
pub(crate) const RESULT_ROWS: i32 = 0x0002;
pub(crate) const RESULT_SET_KEYSPACE: i32 = 0x0003;
pub(crate) const RESULT_PREPARED: i32 = 0x0004;
pub(crate) const RESULT_SCHEMA_CHANGE: i32 = 0x0005;

/// Native protocol version spoken on the connection, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
  #[default]
  V1,
  V2,
}

impl ProtocolVersion {
  pub(crate) fn request_byte(self) -> u8 {
    match self {
      ProtocolVersion::V1 => 0x01,
      ProtocolVersion::V2 => 0x02,
    }
  }

  // The high bit flags the direction; the numeric version is the same both ways.
  pub(crate) fn response_byte(self) -> u8 {
    0x80 | self.request_byte()
  }
}

bitflags! {
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct FrameFlags: u8 {
    const COMPRESSED = 0x01;
    const TRACING = 0x02;
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
  Error = 0x00,
  Startup = 0x01,
  Ready = 0x02,
  Authenticate = 0x03,
  Credentials = 0x04,
  Options = 0x05,
  Supported = 0x06,
  Query = 0x07,
  Result = 0x08,
  Prepare = 0x09,
  Execute = 0x0A,
  Register = 0x0B,
  Event = 0x0C,
}

impl TryFrom<u8> for Opcode {
  type Error = Error;

  fn try_from(v: u8) -> Result<Self> {
    match v {
      0x00 => Ok(Opcode::Error),
      0x01 => Ok(Opcode::Startup),
      0x02 => Ok(Opcode::Ready),
      0x03 => Ok(Opcode::Authenticate),
      0x04 => Ok(Opcode::Credentials),
      0x05 => Ok(Opcode::Options),
      0x06 => Ok(Opcode::Supported),
      0x07 => Ok(Opcode::Query),
      0x08 => Ok(Opcode::Result),
      0x09 => Ok(Opcode::Prepare),
      0x0A => Ok(Opcode::Execute),
      0x0B => Ok(Opcode::Register),
      0x0C => Ok(Opcode::Event),
      v => Err(Error::Protocol(format!("unknown opcode 0x{:02x}", v))),
    }
  }
}

/// Replica agreement level for a read or write, as sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Consistency {
  Any = 0x0000,
  One = 0x0001,
  Two = 0x0002,
  Three = 0x0003,
  Quorum = 0x0004,
  All = 0x0005,
  LocalQuorum = 0x0006,
  EachQuorum = 0x0007,
}

impl TryFrom<u16> for Consistency {
  type Error = Error;

  fn try_from(v: u16) -> Result<Self> {
    match v {
      0x0000 => Ok(Consistency::Any),
      0x0001 => Ok(Consistency::One),
      0x0002 => Ok(Consistency::Two),
      0x0003 => Ok(Consistency::Three),
      0x0004 => Ok(Consistency::Quorum),
      0x0005 => Ok(Consistency::All),
      0x0006 => Ok(Consistency::LocalQuorum),
      0x0007 => Ok(Consistency::EachQuorum),
      v => Err(Error::Protocol(format!("unknown consistency 0x{:04x}", v))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
  pub version: u8,
  pub flags: FrameFlags,
  pub stream: i8,
  pub opcode: Opcode,
  pub length: u32,
}

impl FrameHeader {
  pub(crate) fn parse(b: [u8; FRAME_HEADER_LEN], version: ProtocolVersion) -> Result<Self> {
    if b[0] != version.response_byte() {
      return Err(Error::Protocol(format!(
        "unexpected response version byte 0x{:02x}, expected 0x{:02x}",
        b[0],
        version.response_byte()
      )));
    }

    Ok(Self {
      version: b[0],
      flags: FrameFlags::from_bits_truncate(b[1]),
      stream: b[2] as i8,
      opcode: Opcode::try_from(b[3])?,
      length: u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
    })
  }
}

/// Event classes a connection can subscribe to with REGISTER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
  TopologyChange,
  StatusChange,
  SchemaChange,
}

impl EventType {
  pub fn as_str(self) -> &'static str {
    match self {
      EventType::TopologyChange => "TOPOLOGY_CHANGE",
      EventType::StatusChange => "STATUS_CHANGE",
      EventType::SchemaChange => "SCHEMA_CHANGE",
    }
  }
}

/// A decoded server push notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  TopologyChange { change: String, node: SocketAddr },
  StatusChange { status: String, node: SocketAddr },
  SchemaChange { change: String, keyspace: String, table: String },
}

impl Event {
  pub(crate) fn parse(b: &mut Bytes) -> Result<Event> {
    let event_type = b.cql_get_string()?;
    match event_type.as_str() {
      "TOPOLOGY_CHANGE" => Ok(Event::TopologyChange {
        change: b.cql_get_string()?,
        node: b.cql_get_inet()?,
      }),
      "STATUS_CHANGE" => Ok(Event::StatusChange {
        status: b.cql_get_string()?,
        node: b.cql_get_inet()?,
      }),
      "SCHEMA_CHANGE" => Ok(Event::SchemaChange {
        change: b.cql_get_string()?,
        keyspace: b.cql_get_string()?,
        table: b.cql_get_string()?,
      }),
      _ => Err(Error::Protocol(format!("unknown event type {:?}", event_type))),
    }
  }
}
