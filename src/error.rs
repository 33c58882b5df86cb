use bytes::Bytes;
use std::io;
use std::str::FromStr;

use crate::buf_ext::BufExt;
use crate::protocol::Consistency;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong on a connection: server-reported errors
/// (decoded from ERROR frames, connection stays usable), and client-local
/// failures (`Io` tears the connection down, the rest are per-call).
#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("io error: {0}")]
  Io(#[from] io::Error),

  #[error("server error: {0}")]
  Server(String),

  #[error("protocol error: {0}")]
  Protocol(String),

  #[error("bad credentials: {0}")]
  BadCredentials(String),

  #[error("cannot reach {consistency:?}: {required} replicas required, {alive} alive")]
  Unavailable {
    consistency: Consistency,
    required: i32,
    alive: i32,
  },

  #[error("coordinator overloaded: {0}")]
  Overloaded(String),

  #[error("coordinator is bootstrapping: {0}")]
  IsBootstrapping(String),

  #[error("truncate failed: {0}")]
  Truncate(String),

  #[error("{write_type:?} write timed out at {consistency:?}: {received} of {blockfor} replicas acknowledged")]
  WriteTimeout {
    consistency: Consistency,
    received: i32,
    blockfor: i32,
    write_type: WriteType,
  },

  #[error("read timed out at {consistency:?}: {received} of {blockfor} replicas answered, data_present={data_present}")]
  ReadTimeout {
    consistency: Consistency,
    received: i32,
    blockfor: i32,
    data_present: bool,
  },

  #[error("syntax error: {0}")]
  Syntax(String),

  #[error("unauthorized: {0}")]
  Unauthorized(String),

  #[error("invalid query: {0}")]
  Invalid(String),

  #[error("configuration error: {0}")]
  Config(String),

  #[error("{keyspace}.{table} already exists")]
  AlreadyExists { keyspace: String, table: String },

  /// The server evicted the statement; re-prepare and retry to recover.
  #[error("unprepared statement {id:?}")]
  Unprepared { id: Bytes },

  #[error("decode error: {0}")]
  Decode(String),

  #[error("encode error: {0}")]
  Encode(String),

  #[error("connection is busy with an unfinished result")]
  Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
  Simple,
  Batch,
  UnloggedBatch,
  Counter,
  BatchLog,
}

impl FromStr for WriteType {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "SIMPLE" => Ok(WriteType::Simple),
      "BATCH" => Ok(WriteType::Batch),
      "UNLOGGED_BATCH" => Ok(WriteType::UnloggedBatch),
      "COUNTER" => Ok(WriteType::Counter),
      "BATCH_LOG" => Ok(WriteType::BatchLog),
      s => Err(Error::Protocol(format!("unknown write type {:?}", s))),
    }
  }
}

impl Error {
  /// Decodes the body of an ERROR frame. A malformed body comes back as the
  /// decoding failure itself.
  pub(crate) fn parse(b: &mut Bytes) -> Error {
    match Self::parse_body(b) {
      Ok(err) => err,
      Err(err) => err,
    }
  }

  fn parse_body(b: &mut Bytes) -> Result<Error> {
    // The code is an [int] on the wire even though all defined values fit a short.
    let code = b.cql_get_int()?;
    let message = b.cql_get_string()?;

    let err = match code {
      0x0000 => Error::Server(message),
      0x000A => Error::Protocol(message),
      0x0100 => Error::BadCredentials(message),
      0x1000 => Error::Unavailable {
        consistency: b.cql_get_consistency()?,
        required: b.cql_get_int()?,
        alive: b.cql_get_int()?,
      },
      0x1001 => Error::Overloaded(message),
      0x1002 => Error::IsBootstrapping(message),
      0x1003 => Error::Truncate(message),
      0x1100 => Error::WriteTimeout {
        consistency: b.cql_get_consistency()?,
        received: b.cql_get_int()?,
        blockfor: b.cql_get_int()?,
        write_type: b.cql_get_string()?.parse()?,
      },
      0x1200 => Error::ReadTimeout {
        consistency: b.cql_get_consistency()?,
        received: b.cql_get_int()?,
        blockfor: b.cql_get_int()?,
        data_present: b.cql_get_byte()? != 0,
      },
      0x2000 => Error::Syntax(message),
      0x2100 => Error::Unauthorized(message),
      0x2200 => Error::Invalid(message),
      0x2300 => Error::Config(message),
      0x2400 => Error::AlreadyExists {
        keyspace: b.cql_get_string()?,
        table: b.cql_get_string()?,
      },
      0x2500 => Error::Unprepared {
        id: b.cql_get_short_bytes()?,
      },
      code => Error::Server(format!("unknown error code 0x{:04x}: {}", code, message)),
    };
    Ok(err)
  }
}
