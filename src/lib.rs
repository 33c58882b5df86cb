//! Client core for the Cassandra CQL native binary protocol, versions 1 and 2.

mod buf_ext;
mod conn;
mod debug;
mod error;
mod protocol;
mod query;
mod stream;
mod value;

pub use conn::{Authenticator, Connection, ConnectionOptions, EventStream};
pub use error::{Error, Result, WriteType};
pub use protocol::{Consistency, Event, EventType, FrameFlags, FrameHeader, Opcode, ProtocolVersion};
pub use query::{ColumnSpec, FromRow, PreparedStatement, QueryResult, Row, Rows, TypeSpec};
pub use value::{FromValue, Value};

#[cfg(feature = "ssl")]
pub use openssl;
