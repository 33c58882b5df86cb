use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net;
use url::Url;

use crate::buf_ext::{BufExt, BufMutExt};
use crate::debug::WireBytes;
use crate::error::{Error, Result};
use crate::protocol::{
  Consistency, Event, EventType, FrameFlags, FrameHeader, Opcode, ProtocolVersion, CQL_VERSION_KEY,
  DEFAULT_CQL_VERSION, EVENT_STREAM_ID, FRAME_HEADER_LEN, RESULT_PREPARED, RESULT_ROWS, RESULT_SCHEMA_CHANGE,
  RESULT_SET_KEYSPACE, RESULT_VOID,
};
use crate::query::{parse_metadata, ColumnSpec, PreparedStatement, QueryResult, Rows};
use crate::stream::Stream;
use crate::value::Value;

const DEFAULT_PORT: u16 = 9042;

// Ordinary requests all go out on one stream id; -1 stays reserved for events.
const DEFAULT_STREAM_ID: i8 = 0;

/// Produces the CREDENTIALS payload for the authenticator class the server
/// announced in AUTHENTICATE.
pub trait Authenticator: Send + Sync {
  fn credentials(&self, authenticator: &str) -> Result<Vec<(String, String)>>;
}

#[derive(Clone)]
pub struct ConnectionOptions {
  pub version: ProtocolVersion,
  pub keyspace: Option<String>,
  pub consistency: Consistency,
  pub tracing: bool,
  pub authenticator: Option<Arc<dyn Authenticator>>,
  pub connect_timeout: Option<Duration>,
  pub read_timeout: Option<Duration>,
  pub write_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
  fn default() -> Self {
    Self {
      version: ProtocolVersion::V1,
      keyspace: None,
      consistency: Consistency::One,
      tracing: false,
      authenticator: None,
      connect_timeout: None,
      read_timeout: None,
      write_timeout: None,
    }
  }
}

impl fmt::Debug for ConnectionOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ConnectionOptions")
      .field("version", &self.version)
      .field("keyspace", &self.keyspace)
      .field("consistency", &self.consistency)
      .field("tracing", &self.tracing)
      .field("authenticator", &self.authenticator.is_some())
      .field("connect_timeout", &self.connect_timeout)
      .field("read_timeout", &self.read_timeout)
      .field("write_timeout", &self.write_timeout)
      .finish()
  }
}

impl TryFrom<&Url> for ConnectionOptions {
  type Error = Error;

  fn try_from(url: &Url) -> Result<Self> {
    let query_pairs = url.query_pairs().collect::<std::collections::BTreeMap<_, _>>();
    let keyspace = query_pairs.get("keyspace").map(|v| v.to_string());

    let version = match query_pairs.get("version").map(|v| v.as_ref()) {
      None | Some("1") => ProtocolVersion::V1,
      Some("2") => ProtocolVersion::V2,
      Some(version) => {
        return Err(Error::Io(io::Error::new(
          io::ErrorKind::InvalidInput,
          format!("{} is not a supported protocol version", version),
        )))
      }
    };

    let connect_timeout = query_pairs
      .get("connect_timeout_ms")
      .and_then(|v| v.parse().ok())
      .map(Duration::from_millis);

    let read_timeout = query_pairs
      .get("read_timeout_ms")
      .and_then(|v| v.parse().ok())
      .map(Duration::from_millis);

    let write_timeout = query_pairs
      .get("write_timeout_ms")
      .and_then(|v| v.parse().ok())
      .map(Duration::from_millis);

    Ok(Self {
      version,
      keyspace,
      connect_timeout,
      read_timeout,
      write_timeout,
      ..Self::default()
    })
  }
}

/// One connection to one node, speaking CQL v1 or v2 with a single request
/// in flight at a time.
#[derive(Debug)]
pub struct Connection {
  stream: Stream,
  options: ConnectionOptions,
  stream_id: i8,
  keyspace: Option<String>,
  // Unread remainder of the current response body; empty between requests.
  body: Bytes,
  // Server pushes decoded off the wire while a request was pending.
  events: VecDeque<Event>,
}

impl Connection {
  pub async fn connect_from_url(url: &Url) -> Result<Self> {
    match url.scheme() {
      "tcp" => {
        let port = url.port().unwrap_or(DEFAULT_PORT);
        let addrs = match url.host() {
          Some(url::Host::Domain(domain)) => net::lookup_host(format!("{}:{}", domain, port))
            .await
            .map(|v| v.collect::<Vec<_>>())?,
          Some(url::Host::Ipv4(ip)) => vec![SocketAddrV4::new(ip, port).into()],
          Some(url::Host::Ipv6(ip)) => vec![SocketAddrV6::new(ip, port, 0, 0).into()],
          None => {
            return Err(Error::Io(io::Error::new(io::ErrorKind::InvalidInput, "url has no host")));
          }
        };
        let options = url.try_into()?;
        Self::connect_tcp(addrs, options).await
      }
      scheme => Err(Error::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} is not supported", scheme),
      ))),
    }
  }

  pub async fn connect_tcp(addrs: impl Into<Vec<SocketAddr>>, options: ConnectionOptions) -> Result<Self> {
    let stream = match options.connect_timeout {
      Some(connect_timeout) => tokio::time::timeout(connect_timeout, Stream::connect_tcp(addrs))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connection timed out"))
        .and_then(|r| r)?,
      None => Stream::connect_tcp(addrs).await?,
    };
    Self::connect(stream, options).await
  }

  #[cfg(feature = "ssl")]
  pub async fn connect_ssl_from_url(url: &Url, ssl_connector: openssl::ssl::SslConnector) -> Result<Self> {
    match url.scheme() {
      "tcp" => {
        let port = url.port().unwrap_or(DEFAULT_PORT);
        let (domain, addrs) = match url.host() {
          Some(url::Host::Domain(domain)) => net::lookup_host(format!("{}:{}", domain, port))
            .await
            .map(|v| (domain.to_string(), v.collect::<Vec<_>>()))?,
          Some(url::Host::Ipv4(ip)) => (ip.to_string(), vec![SocketAddrV4::new(ip, port).into()]),
          Some(url::Host::Ipv6(ip)) => (ip.to_string(), vec![SocketAddrV6::new(ip, port, 0, 0).into()]),
          None => {
            return Err(Error::Io(io::Error::new(io::ErrorKind::InvalidInput, "url has no host")));
          }
        };
        let options = url.try_into()?;
        Self::connect_ssl(addrs, domain, options, ssl_connector).await
      }
      scheme => Err(Error::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} is not supported", scheme),
      ))),
    }
  }

  #[cfg(feature = "ssl")]
  pub async fn connect_ssl(
    addrs: impl Into<Vec<SocketAddr>>,
    domain: impl Into<String>,
    options: ConnectionOptions,
    ssl_connector: openssl::ssl::SslConnector,
  ) -> Result<Self> {
    let stream = match options.connect_timeout {
      Some(connect_timeout) => tokio::time::timeout(connect_timeout, Stream::connect_ssl(addrs, domain, ssl_connector))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connection timed out"))
        .and_then(|r| r)?,
      None => Stream::connect_ssl(addrs, domain, ssl_connector).await?,
    };
    Self::connect(stream, options).await
  }

  async fn connect(stream: Stream, options: ConnectionOptions) -> Result<Self> {
    let mut connection = Self {
      stream,
      options,
      stream_id: DEFAULT_STREAM_ID,
      keyspace: None,
      body: Bytes::new(),
      events: VecDeque::new(),
    };

    connection.startup().await?;

    if let Some(keyspace) = connection.options.keyspace.clone() {
      connection.use_keyspace(keyspace).await?;
    }

    Ok(connection)
  }

  /// Opens a sibling connection with the same options and keyspace, e.g. to
  /// dedicate one connection to events while this one keeps serving queries.
  pub async fn duplicate(&self) -> Result<Self> {
    let stream = match self.options.connect_timeout {
      Some(connect_timeout) => tokio::time::timeout(connect_timeout, self.stream.duplicate())
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connection timed out"))
        .and_then(|r| r)?,
      None => self.stream.duplicate().await?,
    };
    let mut options = self.options.clone();
    options.keyspace = self.keyspace.clone().or(options.keyspace);
    Self::connect(stream, options).await
  }

  pub fn keyspace(&self) -> Option<&str> {
    self.keyspace.as_deref()
  }

  pub fn options(&self) -> &ConnectionOptions {
    &self.options
  }

  /// Runs a CQL statement and decodes whatever result the server sends back.
  pub async fn query(&mut self, cql: impl AsRef<str>, consistency: Consistency) -> Result<QueryResult<'_>> {
    let cql = cql.as_ref();
    if starts_with_keyword(cql, "PREPARE") {
      return Err(Error::Invalid(
        "PREPARE statements must go through Connection::prepare".to_string(),
      ));
    }

    let header = self.request(Opcode::Query, query_body(cql, consistency)?).await?;
    self.finish_result(header)
  }

  /// Parses a statement server-side for later execution with bound values.
  pub async fn prepare(&mut self, cql: impl AsRef<str>) -> Result<PreparedStatement> {
    let mut b = BytesMut::new();
    b.cql_put_long_string(cql.as_ref())?;

    let header = self.request(Opcode::Prepare, b.freeze()).await?;
    match self.decode_result(header)? {
      RawResult::Prepared(statement) => Ok(statement),
      _ => Err(Error::Protocol("expected a prepared result".to_string())),
    }
  }

  /// Executes a prepared statement. `values` must match the statement's bound
  /// variables one to one; pass `None` to use the statement's consistency.
  pub async fn execute(
    &mut self,
    statement: &PreparedStatement,
    values: &[Value],
    consistency: Option<Consistency>,
  ) -> Result<QueryResult<'_>> {
    if values.len() != statement.columns.len() {
      return Err(Error::Invalid(format!(
        "statement takes {} bound values, {} given",
        statement.columns.len(),
        values.len()
      )));
    }
    if values.len() > i16::MAX as usize {
      return Err(Error::Encode(format!("{} bound values exceed a short", values.len())));
    }

    let mut b = BytesMut::new();
    b.cql_put_short_bytes(&statement.id)?;
    b.put_u16(values.len() as u16);
    for value in values {
      value.encode_bytes(&mut b)?;
    }
    b.cql_put_consistency(consistency.unwrap_or(statement.consistency));

    let header = self.request(Opcode::Execute, b.freeze()).await?;
    self.finish_result(header)
  }

  /// Switches the connection's keyspace; a no-op when it is already selected.
  pub async fn use_keyspace(&mut self, keyspace: impl AsRef<str>) -> Result<()> {
    let keyspace = keyspace.as_ref();
    let name = validate_keyspace_name(keyspace)?;
    if self.keyspace.as_deref() == Some(name) {
      return Ok(());
    }

    let header = self
      .request(Opcode::Query, query_body(&format!("USE {}", keyspace), Consistency::Any)?)
      .await?;
    match self.decode_result(header)? {
      RawResult::SetKeyspace(keyspace) => {
        self.keyspace = Some(keyspace);
        Ok(())
      }
      _ => Err(Error::Protocol("USE did not return a set-keyspace result".to_string())),
    }
  }

  /// Asks the server which startup options it supports.
  pub async fn request_options(&mut self) -> Result<std::collections::BTreeMap<String, Vec<String>>> {
    let header = self.request(Opcode::Options, Bytes::new()).await?;
    match header.opcode {
      Opcode::Supported => {
        let mut body = std::mem::take(&mut self.body);
        body.cql_get_string_multimap()
      }
      Opcode::Error => Err(self.read_error()),
      opcode => {
        self.discard_response_body();
        Err(Error::Protocol(format!("unexpected {:?} in reply to OPTIONS", opcode)))
      }
    }
  }

  /// Subscribes to server events. The connection is consumed: after REGISTER
  /// it only carries pushes, so keep a [`Connection::duplicate`] for queries.
  pub async fn register(mut self, events: &[EventType]) -> Result<EventStream> {
    let names = events.iter().map(|event| event.as_str()).collect::<Vec<_>>();
    let mut b = BytesMut::new();
    b.cql_put_string_list(&names)?;

    let header = self.request(Opcode::Register, b.freeze()).await?;
    match header.opcode {
      Opcode::Ready => {
        self.discard_response_body();
        Ok(EventStream { conn: self })
      }
      Opcode::Error => Err(self.read_error()),
      opcode => Err(Error::Protocol(format!("unexpected {:?} in reply to REGISTER", opcode))),
    }
  }

  pub async fn close(mut self) -> Result<()> {
    self.discard_response_body();
    self.stream.shutdown().await?;
    Ok(())
  }

  // STARTUP must be the first frame on the wire; the server answers READY or
  // demands AUTHENTICATE -> CREDENTIALS first.
  async fn startup(&mut self) -> Result<()> {
    let mut b = BytesMut::new();
    b.cql_put_string_map(&[(CQL_VERSION_KEY, DEFAULT_CQL_VERSION)])?;

    let header = self.request(Opcode::Startup, b.freeze()).await?;
    match header.opcode {
      Opcode::Ready => {
        self.discard_response_body();
        Ok(())
      }
      Opcode::Authenticate => {
        let class = self.body.cql_get_string()?;
        self.discard_response_body();
        self.authenticate(&class).await
      }
      Opcode::Error => Err(self.read_error()),
      opcode => {
        self.discard_response_body();
        Err(Error::Protocol(format!("unexpected {:?} in reply to STARTUP", opcode)))
      }
    }
  }

  async fn authenticate(&mut self, class: &str) -> Result<()> {
    let authenticator = self.options.authenticator.clone().ok_or_else(|| {
      Error::BadCredentials(format!(
        "server requires authentication with {} but no authenticator is configured",
        class
      ))
    })?;

    let credentials = authenticator.credentials(class)?;
    let pairs = credentials
      .iter()
      .map(|(key, value)| (key.as_str(), value.as_str()))
      .collect::<Vec<_>>();
    let mut b = BytesMut::new();
    b.cql_put_string_map(&pairs)?;

    let header = self.request(Opcode::Credentials, b.freeze()).await?;
    match header.opcode {
      Opcode::Ready => {
        self.discard_response_body();
        Ok(())
      }
      Opcode::Error => Err(self.read_error()),
      opcode => {
        self.discard_response_body();
        Err(Error::Protocol(format!("unexpected {:?} in reply to CREDENTIALS", opcode)))
      }
    }
  }

  // One request in flight: write a frame, then block on its response frame.
  async fn request(&mut self, opcode: Opcode, body: Bytes) -> Result<FrameHeader> {
    if self.body.has_remaining() {
      return Err(Error::Busy);
    }
    self.write_frame(opcode, &body).await?;
    self.read_frame().await
  }

  async fn write_frame(&mut self, opcode: Opcode, body: &[u8]) -> Result<()> {
    let length = u32::try_from(body.len()).map_err(|_| Error::Encode(format!("frame body of {} bytes", body.len())))?;

    let flags = if self.options.tracing {
      FrameFlags::TRACING
    } else {
      FrameFlags::empty()
    };

    let mut b = BytesMut::with_capacity(FRAME_HEADER_LEN + body.len());
    b.put_u8(self.options.version.request_byte());
    b.put_u8(flags.bits());
    b.put_i8(self.stream_id);
    b.put_u8(opcode as u8);
    b.put_u32(length);
    b.put_slice(body);

    log::trace!(">> {:?} {:?}", opcode, WireBytes(&b));

    match self.options.write_timeout {
      Some(write_timeout) => tokio::time::timeout(write_timeout, Self::write_all_flush(&mut self.stream, &b))
        .await
        .map_err(|_| Error::Io(io::Error::new(io::ErrorKind::TimedOut, "write timed out")))
        .and_then(|r| r),
      None => Self::write_all_flush(&mut self.stream, &b).await,
    }
  }

  async fn write_all_flush(stream: &mut Stream, b: &[u8]) -> Result<()> {
    stream.write_all(b).await?;
    stream.flush().await?;
    Ok(())
  }

  // Reads until a frame answers the pending request, diverting event frames
  // into the buffer; they are never allowed to satisfy a request slot.
  async fn read_frame(&mut self) -> Result<FrameHeader> {
    loop {
      let (header, mut body) = self.read_raw_frame().await?;

      if header.stream == EVENT_STREAM_ID {
        if header.opcode != Opcode::Event {
          return Err(Error::Protocol(format!(
            "unexpected {:?} on the event stream id",
            header.opcode
          )));
        }
        self.events.push_back(Event::parse(&mut body)?);
        continue;
      }

      if header.opcode == Opcode::Event {
        return Err(Error::Protocol(format!(
          "event frame with stream id {} instead of -1",
          header.stream
        )));
      }
      if header.stream != self.stream_id {
        return Err(Error::Protocol(format!(
          "response for stream id {} while {} was pending",
          header.stream, self.stream_id
        )));
      }

      self.body = body;
      return Ok(header);
    }
  }

  // A registered connection only ever receives event frames.
  async fn read_event_frame(&mut self) -> Result<Event> {
    let (header, mut body) = self.read_raw_frame().await?;
    if header.stream != EVENT_STREAM_ID || header.opcode != Opcode::Event {
      return Err(Error::Protocol(format!(
        "unexpected {:?} frame on a registered connection",
        header.opcode
      )));
    }
    Event::parse(&mut body)
  }

  async fn read_raw_frame(&mut self) -> Result<(FrameHeader, Bytes)> {
    match self.options.read_timeout {
      Some(read_timeout) => tokio::time::timeout(read_timeout, self.read_raw_frame_inner())
        .await
        .map_err(|_| Error::Io(io::Error::new(io::ErrorKind::TimedOut, "read timed out")))
        .and_then(|r| r),
      None => self.read_raw_frame_inner().await,
    }
  }

  async fn read_raw_frame_inner(&mut self) -> Result<(FrameHeader, Bytes)> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    self.stream.read_exact(&mut header).await?;
    let header = FrameHeader::parse(header, self.options.version)?;

    let mut body = vec![0; header.length as usize];
    self.stream.read_exact(&mut body).await?;
    let mut body = Bytes::from(body);

    log::trace!("<< {:?} {:?}", header.opcode, WireBytes(&body));

    if header.flags.contains(FrameFlags::COMPRESSED) {
      return Err(Error::Protocol(
        "received a compressed frame but compression was not negotiated".to_string(),
      ));
    }
    if header.flags.contains(FrameFlags::TRACING) {
      // A traced response smuggles the session id in front of the body.
      let session = body.cql_get_uuid()?;
      log::debug!("tracing session {}", session);
    }

    Ok((header, body))
  }

  fn read_error(&mut self) -> Error {
    let mut body = std::mem::take(&mut self.body);
    Error::parse(&mut body)
  }

  fn decode_result(&mut self, header: FrameHeader) -> Result<RawResult> {
    let result = self.decode_result_body(header);
    match &result {
      // The remaining body bytes are the row content, consumed by Rows.
      Ok(RawResult::Rows { .. }) => {}
      _ => self.discard_response_body(),
    }
    result
  }

  fn decode_result_body(&mut self, header: FrameHeader) -> Result<RawResult> {
    match header.opcode {
      Opcode::Error => Err(self.read_error()),
      Opcode::Result => {
        let kind = self.body.cql_get_int()?;
        match kind {
          RESULT_VOID => Ok(RawResult::Void),
          RESULT_ROWS => {
            let columns = Arc::new(parse_metadata(&mut self.body)?);
            let row_count = self.body.cql_get_int()?;
            let row_count =
              u32::try_from(row_count).map_err(|_| Error::Protocol(format!("negative row count {}", row_count)))?;
            Ok(RawResult::Rows { columns, row_count })
          }
          RESULT_SET_KEYSPACE => Ok(RawResult::SetKeyspace(self.body.cql_get_string()?)),
          RESULT_PREPARED => {
            let id = self.body.cql_get_short_bytes()?;
            let columns = parse_metadata(&mut self.body)?;
            Ok(RawResult::Prepared(PreparedStatement {
              id,
              columns,
              consistency: self.options.consistency,
            }))
          }
          RESULT_SCHEMA_CHANGE => Ok(RawResult::SchemaChange {
            change: self.body.cql_get_string()?,
            keyspace: self.body.cql_get_string()?,
            table: self.body.cql_get_string()?,
          }),
          kind => Err(Error::Protocol(format!("unknown result kind {}", kind))),
        }
      }
      opcode => Err(Error::Protocol(format!("unexpected {:?} in reply to a request", opcode))),
    }
  }

  fn finish_result(&mut self, header: FrameHeader) -> Result<QueryResult<'_>> {
    match self.decode_result(header)? {
      RawResult::Void => Ok(QueryResult::Void),
      RawResult::SetKeyspace(keyspace) => {
        // Keep the cache honest even for a hand-written USE statement.
        self.keyspace = Some(keyspace.clone());
        Ok(QueryResult::SetKeyspace(keyspace))
      }
      RawResult::SchemaChange {
        change,
        keyspace,
        table,
      } => Ok(QueryResult::SchemaChange {
        change,
        keyspace,
        table,
      }),
      RawResult::Prepared(statement) => Ok(QueryResult::Prepared(statement)),
      RawResult::Rows { columns, row_count } => Ok(QueryResult::Rows(Rows::new(self, columns, row_count))),
    }
  }

  pub(crate) fn response_body(&mut self) -> &mut Bytes {
    &mut self.body
  }

  pub(crate) fn discard_response_body(&mut self) {
    let n = self.body.remaining();
    if n > 0 {
      log::debug!("discarding {} unread response bytes", n);
      self.body.advance(n);
    }
  }
}

// Owned flavor of QueryResult so response decoding finishes before a Rows
// borrow of the connection starts.
enum RawResult {
  Void,
  Rows { columns: Arc<Vec<ColumnSpec>>, row_count: u32 },
  SetKeyspace(String),
  SchemaChange { change: String, keyspace: String, table: String },
  Prepared(PreparedStatement),
}

/// Server pushes delivered after [`Connection::register`].
#[derive(Debug)]
pub struct EventStream {
  conn: Connection,
}

impl EventStream {
  pub async fn recv(&mut self) -> Result<Event> {
    if let Some(event) = self.conn.events.pop_front() {
      return Ok(event);
    }
    self.conn.read_event_frame().await
  }

  pub async fn close(self) -> Result<()> {
    self.conn.close().await
  }
}

fn query_body(cql: &str, consistency: Consistency) -> Result<Bytes> {
  let mut b = BytesMut::with_capacity(4 + cql.len() + 2);
  b.cql_put_long_string(cql)?;
  b.cql_put_consistency(consistency);
  Ok(b.freeze())
}

fn starts_with_keyword(cql: &str, keyword: &str) -> bool {
  let cql = cql.trim_start();
  cql
    .get(..keyword.len())
    .map(|prefix| prefix.eq_ignore_ascii_case(keyword))
    .unwrap_or(false)
}

// Unquoted names must look like an identifier; quoted names keep their case.
// Returns the name as the server will echo it back.
fn validate_keyspace_name(name: &str) -> Result<&str> {
  let unquoted = name
    .strip_prefix('"')
    .and_then(|n| n.strip_suffix('"'))
    .unwrap_or(name);

  let mut chars = unquoted.chars();
  let valid = match chars.next() {
    Some(c) if c.is_ascii_alphabetic() => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
    _ => false,
  };
  if !valid {
    return Err(Error::Invalid(format!("{:?} is not a valid keyspace name", name)));
  }
  Ok(unquoted)
}
