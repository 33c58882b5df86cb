use bigdecimal::BigDecimal;
use bytes::{Bytes, BytesMut};
use chrono::{TimeZone, Utc};
use num_bigint::BigInt;

use cql::{Error, FromValue, TypeSpec, Value};

fn encoded(value: &Value) -> Bytes {
  let mut b = BytesMut::new();
  value.encode(&mut b).unwrap();
  b.freeze()
}

#[test]
fn every_scalar_type_round_trips() {
  let timestamp = Utc.timestamp_millis_opt(1378218642000).unwrap();
  let cases = vec![
    (TypeSpec::Ascii, Value::Ascii("ok".to_string())),
    (TypeSpec::Bigint, Value::Bigint(-1)),
    (TypeSpec::Blob, Value::Blob(Bytes::from_static(b"\x00\xff"))),
    (TypeSpec::Boolean, Value::Boolean(true)),
    (TypeSpec::Counter, Value::Counter(99)),
    (TypeSpec::Decimal, Value::Decimal(BigDecimal::new(BigInt::from(-1234), 3))),
    (TypeSpec::Double, Value::Double(6.02214076e23)),
    (TypeSpec::Float, Value::Float(-0.5)),
    (TypeSpec::Int, Value::Int(i32::MIN)),
    (TypeSpec::Text, Value::Text("héllo".to_string())),
    (TypeSpec::Timestamp, Value::Timestamp(timestamp)),
    (TypeSpec::Uuid, Value::Uuid(uuid::Uuid::from_bytes([7; 16]))),
    (
      TypeSpec::Varint,
      Value::Varint("1267650600228229401496703205376".parse::<BigInt>().unwrap()),
    ),
    (TypeSpec::Inet, Value::Inet("2001:db8::1".parse().unwrap())),
  ];

  for (spec, value) in cases {
    assert_eq!(value, Value::decode(&spec, encoded(&value)).unwrap(), "{:?}", spec);
  }
}

#[test]
fn nested_collections_round_trip() {
  let spec = TypeSpec::Map(
    Box::new(TypeSpec::Text),
    Box::new(TypeSpec::List(Box::new(TypeSpec::Int))),
  );
  let value = Value::Map(vec![
    (
      Value::Text("a".to_string()),
      Value::List(vec![Value::Int(1), Value::Int(2)]),
    ),
    (Value::Text("b".to_string()), Value::List(Vec::new())),
  ]);

  assert_eq!(value, Value::decode(&spec, encoded(&value)).unwrap());
}

#[test]
fn decoding_with_the_wrong_type_fails() {
  let err = Value::decode(&TypeSpec::Bigint, encoded(&Value::Int(1))).unwrap_err();
  assert!(matches!(err, Error::Decode(_)));
}

#[test]
fn conversions_cover_binding_and_reading() {
  // Host value -> bound value.
  assert_eq!(Value::Bigint(7), Value::from(7i64));
  assert_eq!(Value::Null, Value::from(Option::<String>::None));

  // Column slot -> host value.
  assert_eq!(7i64, i64::from_value(Some(Value::Bigint(7))).unwrap());
  assert_eq!(None, Option::<String>::from_value(None).unwrap());
  assert!(i64::from_value(None).is_err());
}

#[test]
fn errors_render_their_payload() {
  let err = Error::Unavailable {
    consistency: cql::Consistency::Quorum,
    required: 3,
    alive: 1,
  };
  let rendered = err.to_string();
  assert!(rendered.contains("Quorum"));
  assert!(rendered.contains('3'));
  assert!(rendered.contains('1'));
}
