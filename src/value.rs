use bigdecimal::BigDecimal;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use num_bigint::BigInt;
use std::net::IpAddr;
use uuid::Uuid;

use crate::buf_ext::{BufExt, BufMutExt};
use crate::error::{Error, Result};
use crate::query::TypeSpec;

/// A single CQL value, either bound to a statement or decoded from a row.
///
/// `Null` exists for binding only: a null column read from the wire is the
/// `None` of an `Option<Value>` slot, never `Value::Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Ascii(String),
  Bigint(i64),
  Blob(Bytes),
  Boolean(bool),
  Counter(i64),
  Decimal(BigDecimal),
  Double(f64),
  Float(f32),
  Int(i32),
  Text(String),
  Timestamp(DateTime<Utc>),
  Uuid(Uuid),
  Varint(BigInt),
  Inet(IpAddr),
  List(Vec<Value>),
  Map(Vec<(Value, Value)>),
  Set(Vec<Value>),
  Null,
}

impl Value {
  /// Raw encoding, without the `[bytes]` length the protocol wraps around a
  /// bound value or a column.
  pub fn encode(&self, b: &mut BytesMut) -> Result<()> {
    match self {
      Value::Ascii(s) => {
        if !s.is_ascii() {
          return Err(Error::Encode(format!("{:?} is not ascii", s)));
        }
        b.put_slice(s.as_bytes());
      }
      Value::Bigint(v) | Value::Counter(v) => b.put_i64(*v),
      Value::Blob(bytes) => b.put_slice(bytes),
      Value::Boolean(v) => b.put_u8(*v as u8),
      Value::Decimal(d) => {
        let (unscaled, scale) = d.as_bigint_and_exponent();
        let scale = i32::try_from(scale).map_err(|_| Error::Encode(format!("decimal scale {} exceeds an int", scale)))?;
        b.put_i32(scale);
        b.put_slice(&unscaled.to_signed_bytes_be());
      }
      Value::Double(v) => b.put_f64(*v),
      Value::Float(v) => b.put_f32(*v),
      Value::Int(v) => b.put_i32(*v),
      Value::Text(s) => b.put_slice(s.as_bytes()),
      Value::Timestamp(t) => b.put_i64(t.timestamp_millis()),
      Value::Uuid(u) => b.put_slice(u.as_bytes()),
      Value::Varint(v) => b.put_slice(&v.to_signed_bytes_be()),
      Value::Inet(IpAddr::V4(ip)) => b.put_slice(&ip.octets()),
      Value::Inet(IpAddr::V6(ip)) => b.put_slice(&ip.octets()),
      Value::List(items) | Value::Set(items) => {
        put_collection_len(b, items.len())?;
        for item in items {
          put_element(b, item)?;
        }
      }
      Value::Map(pairs) => {
        put_collection_len(b, pairs.len())?;
        for (key, value) in pairs {
          put_element(b, key)?;
          put_element(b, value)?;
        }
      }
      Value::Null => return Err(Error::Encode("null has no raw encoding, bind it as a value".to_string())),
    }
    Ok(())
  }

  /// The `[bytes]` form of a bound value: length-prefixed, -1 for null.
  pub(crate) fn encode_bytes(&self, b: &mut BytesMut) -> Result<()> {
    match self {
      Value::Null => b.cql_put_bytes(None),
      value => {
        let mut raw = BytesMut::new();
        value.encode(&mut raw)?;
        b.cql_put_bytes(Some(&raw))
      }
    }
  }

  /// Decodes a non-null column's bytes according to its declared type.
  pub fn decode(spec: &TypeSpec, b: Bytes) -> Result<Value> {
    let mut b = b;
    let value = match spec {
      TypeSpec::Ascii => Value::Ascii(take_string(&mut b)?),
      TypeSpec::Text | TypeSpec::Varchar => Value::Text(take_string(&mut b)?),
      TypeSpec::Bigint => Value::Bigint(take_i64(&mut b, "bigint")?),
      TypeSpec::Counter => Value::Counter(take_i64(&mut b, "counter")?),
      TypeSpec::Blob | TypeSpec::Custom(_) => {
        let len = b.remaining();
        Value::Blob(b.copy_to_bytes(len))
      }
      TypeSpec::Boolean => {
        expect_len(&b, 1, "boolean")?;
        Value::Boolean(b.get_u8() != 0)
      }
      TypeSpec::Decimal => {
        if b.remaining() < 5 {
          return Err(Error::Decode(format!("decimal expects at least 5 bytes, got {}", b.remaining())));
        }
        let scale = b.get_i32();
        let unscaled = BigInt::from_signed_bytes_be(&b);
        b.advance(b.remaining());
        Value::Decimal(BigDecimal::new(unscaled, scale as i64))
      }
      TypeSpec::Double => {
        expect_len(&b, 8, "double")?;
        Value::Double(b.get_f64())
      }
      TypeSpec::Float => {
        expect_len(&b, 4, "float")?;
        Value::Float(b.get_f32())
      }
      TypeSpec::Int => {
        expect_len(&b, 4, "int")?;
        Value::Int(b.get_i32())
      }
      TypeSpec::Timestamp => {
        let millis = take_i64(&mut b, "timestamp")?;
        let timestamp = Utc
          .timestamp_millis_opt(millis)
          .single()
          .ok_or_else(|| Error::Decode(format!("timestamp {} is out of range", millis)))?;
        Value::Timestamp(timestamp)
      }
      TypeSpec::Uuid | TypeSpec::Timeuuid => {
        expect_len(&b, 16, "uuid")?;
        let mut raw = [0u8; 16];
        b.copy_to_slice(&mut raw);
        Value::Uuid(Uuid::from_bytes(raw))
      }
      TypeSpec::Varint => {
        if b.is_empty() {
          return Err(Error::Decode("varint expects at least one byte".to_string()));
        }
        let v = BigInt::from_signed_bytes_be(&b);
        b.advance(b.remaining());
        Value::Varint(v)
      }
      TypeSpec::Inet => match b.remaining() {
        4 => {
          let mut raw = [0u8; 4];
          b.copy_to_slice(&mut raw);
          Value::Inet(IpAddr::from(raw))
        }
        16 => {
          let mut raw = [0u8; 16];
          b.copy_to_slice(&mut raw);
          Value::Inet(IpAddr::from(raw))
        }
        len => return Err(Error::Decode(format!("inet expects 4 or 16 bytes, got {}", len))),
      },
      TypeSpec::List(inner) => Value::List(take_collection(&mut b, inner)?),
      TypeSpec::Set(inner) => Value::Set(take_collection(&mut b, inner)?),
      TypeSpec::Map(key_spec, value_spec) => {
        let n = b.cql_get_short().map_err(as_decode)?;
        let mut pairs = Vec::with_capacity(n as usize);
        for _ in 0..n {
          let key = b.cql_get_short_bytes().map_err(as_decode)?;
          let value = b.cql_get_short_bytes().map_err(as_decode)?;
          pairs.push((Value::decode(key_spec, key)?, Value::decode(value_spec, value)?));
        }
        Value::Map(pairs)
      }
    };

    if b.has_remaining() {
      return Err(Error::Decode(format!("{} bytes left over after decoding", b.remaining())));
    }
    Ok(value)
  }
}

// Collection elements are [short bytes], so each element encoding must fit a short.
fn put_element(b: &mut BytesMut, value: &Value) -> Result<()> {
  let mut element = BytesMut::new();
  value.encode(&mut element)?;
  b.cql_put_short_bytes(&element)
}

fn put_collection_len(b: &mut BytesMut, len: usize) -> Result<()> {
  let n = u16::try_from(len).map_err(|_| Error::Encode(format!("collection of {} elements exceeds a short", len)))?;
  b.put_u16(n);
  Ok(())
}

fn take_collection(b: &mut Bytes, inner: &TypeSpec) -> Result<Vec<Value>> {
  let n = b.cql_get_short().map_err(as_decode)?;
  let mut items = Vec::with_capacity(n as usize);
  for _ in 0..n {
    let element = b.cql_get_short_bytes().map_err(as_decode)?;
    items.push(Value::decode(inner, element)?);
  }
  Ok(items)
}

fn expect_len(b: &Bytes, len: usize, what: &str) -> Result<()> {
  if b.remaining() != len {
    return Err(Error::Decode(format!("{} expects {} bytes, got {}", what, len, b.remaining())));
  }
  Ok(())
}

fn take_i64(b: &mut Bytes, what: &str) -> Result<i64> {
  expect_len(b, 8, what)?;
  Ok(b.get_i64())
}

fn take_string(b: &mut Bytes) -> Result<String> {
  let len = b.remaining();
  String::from_utf8(b.copy_to_bytes(len).to_vec()).map_err(|_| Error::Decode("string column is not valid utf-8".to_string()))
}

// Truncation inside a single column's bytes is a decoding failure, not a
// frame-level protocol error.
fn as_decode(err: Error) -> Error {
  match err {
    Error::Protocol(message) => Error::Decode(message),
    err => err,
  }
}

/// Conversion out of a decoded column slot; `None` is a wire null.
pub trait FromValue: Sized {
  fn from_value(value: Option<Value>) -> Result<Self>;
}

fn mismatch(expected: &str, value: &Value) -> Error {
  Error::Decode(format!("cannot read {:?} as {}", value, expected))
}

fn unexpected_null(expected: &str) -> Error {
  Error::Decode(format!("unexpected null for a non-optional {}", expected))
}

impl<T: FromValue> FromValue for Option<T> {
  fn from_value(value: Option<Value>) -> Result<Self> {
    match value {
      None => Ok(None),
      value => T::from_value(value).map(Some),
    }
  }
}

impl FromValue for Value {
  fn from_value(value: Option<Value>) -> Result<Self> {
    Ok(value.unwrap_or(Value::Null))
  }
}

macro_rules! impl_from_value {
  ($t:ty, $expected:expr, $($pat:pat => $out:expr),+) => {
    impl FromValue for $t {
      fn from_value(value: Option<Value>) -> Result<Self> {
        match value {
          $(Some($pat) => Ok($out),)+
          Some(value) => Err(mismatch($expected, &value)),
          None => Err(unexpected_null($expected)),
        }
      }
    }
  };
}

impl_from_value!(String, "string", Value::Ascii(s) => s, Value::Text(s) => s);
impl_from_value!(i64, "i64", Value::Bigint(v) => v, Value::Counter(v) => v);
impl_from_value!(i32, "i32", Value::Int(v) => v);
impl_from_value!(bool, "bool", Value::Boolean(v) => v);
impl_from_value!(f32, "f32", Value::Float(v) => v);
impl_from_value!(f64, "f64", Value::Double(v) => v);
impl_from_value!(Bytes, "blob", Value::Blob(v) => v);
impl_from_value!(Vec<u8>, "blob", Value::Blob(v) => v.to_vec());
impl_from_value!(Uuid, "uuid", Value::Uuid(v) => v);
impl_from_value!(IpAddr, "inet", Value::Inet(v) => v);
impl_from_value!(BigInt, "varint", Value::Varint(v) => v);
impl_from_value!(BigDecimal, "decimal", Value::Decimal(v) => v);
impl_from_value!(DateTime<Utc>, "timestamp", Value::Timestamp(v) => v);
impl_from_value!(Vec<Value>, "collection", Value::List(v) => v, Value::Set(v) => v);

impl From<i32> for Value {
  fn from(v: i32) -> Self {
    Value::Int(v)
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self {
    Value::Bigint(v)
  }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self {
    Value::Boolean(v)
  }
}

impl From<f32> for Value {
  fn from(v: f32) -> Self {
    Value::Float(v)
  }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self {
    Value::Double(v)
  }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self {
    Value::Text(v.to_string())
  }
}

impl From<String> for Value {
  fn from(v: String) -> Self {
    Value::Text(v)
  }
}

impl From<Vec<u8>> for Value {
  fn from(v: Vec<u8>) -> Self {
    Value::Blob(Bytes::from(v))
  }
}

impl From<Bytes> for Value {
  fn from(v: Bytes) -> Self {
    Value::Blob(v)
  }
}

impl From<Uuid> for Value {
  fn from(v: Uuid) -> Self {
    Value::Uuid(v)
  }
}

impl From<IpAddr> for Value {
  fn from(v: IpAddr) -> Self {
    Value::Inet(v)
  }
}

impl From<BigInt> for Value {
  fn from(v: BigInt) -> Self {
    Value::Varint(v)
  }
}

impl From<BigDecimal> for Value {
  fn from(v: BigDecimal) -> Self {
    Value::Decimal(v)
  }
}

impl From<DateTime<Utc>> for Value {
  fn from(v: DateTime<Utc>) -> Self {
    Value::Timestamp(v)
  }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self {
    match v {
      Some(v) => v.into(),
      None => Value::Null,
    }
  }
}
