use bytes::Bytes;
use std::sync::Arc;

use crate::buf_ext::BufExt;
use crate::conn::Connection;
use crate::error::{Error, Result};
use crate::protocol::Consistency;
use crate::value::{FromValue, Value};

// Result metadata flag: keyspace and table appear once instead of per column.
const GLOBAL_TABLES_SPEC: i32 = 0x0001;

/// Declared type of a result column, nested for collection types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSpec {
  Custom(String),
  Ascii,
  Bigint,
  Blob,
  Boolean,
  Counter,
  Decimal,
  Double,
  Float,
  Int,
  Text,
  Timestamp,
  Uuid,
  Varchar,
  Varint,
  Timeuuid,
  Inet,
  List(Box<TypeSpec>),
  Map(Box<TypeSpec>, Box<TypeSpec>),
  Set(Box<TypeSpec>),
}

impl TypeSpec {
  pub(crate) fn parse(b: &mut Bytes) -> Result<TypeSpec> {
    let spec = match b.cql_get_short()? {
      0x0000 => TypeSpec::Custom(b.cql_get_string()?),
      0x0001 => TypeSpec::Ascii,
      0x0002 => TypeSpec::Bigint,
      0x0003 => TypeSpec::Blob,
      0x0004 => TypeSpec::Boolean,
      0x0005 => TypeSpec::Counter,
      0x0006 => TypeSpec::Decimal,
      0x0007 => TypeSpec::Double,
      0x0008 => TypeSpec::Float,
      0x0009 => TypeSpec::Int,
      0x000A => TypeSpec::Text,
      0x000B => TypeSpec::Timestamp,
      0x000C => TypeSpec::Uuid,
      0x000D => TypeSpec::Varchar,
      0x000E => TypeSpec::Varint,
      0x000F => TypeSpec::Timeuuid,
      0x0010 => TypeSpec::Inet,
      0x0020 => TypeSpec::List(Box::new(TypeSpec::parse(b)?)),
      0x0021 => TypeSpec::Map(Box::new(TypeSpec::parse(b)?), Box::new(TypeSpec::parse(b)?)),
      0x0022 => TypeSpec::Set(Box::new(TypeSpec::parse(b)?)),
      code => return Err(Error::Protocol(format!("unknown column type code 0x{:04x}", code))),
    };
    Ok(spec)
  }
}

/// Metadata for one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
  pub keyspace: String,
  pub table: String,
  pub name: String,
  pub type_spec: TypeSpec,
}

// Shared by rows results and prepared results.
pub(crate) fn parse_metadata(b: &mut Bytes) -> Result<Vec<ColumnSpec>> {
  let flags = b.cql_get_int()?;
  let column_count = b.cql_get_int()?;
  let column_count =
    u32::try_from(column_count).map_err(|_| Error::Protocol(format!("negative column count {}", column_count)))?;

  let global = if flags & GLOBAL_TABLES_SPEC != 0 {
    Some((b.cql_get_string()?, b.cql_get_string()?))
  } else {
    None
  };

  let mut columns = Vec::with_capacity(column_count as usize);
  for _ in 0..column_count {
    let (keyspace, table) = match &global {
      Some((keyspace, table)) => (keyspace.clone(), table.clone()),
      None => (b.cql_get_string()?, b.cql_get_string()?),
    };
    let name = b.cql_get_string()?;
    let type_spec = TypeSpec::parse(b)?;
    columns.push(ColumnSpec {
      keyspace,
      table,
      name,
      type_spec,
    });
  }
  Ok(columns)
}

/// Server-side parsed statement, referenced by its opaque id on EXECUTE.
/// Valid until the server evicts it, which surfaces as [`Error::Unprepared`].
#[derive(Debug, Clone)]
pub struct PreparedStatement {
  pub id: Bytes,
  pub columns: Vec<ColumnSpec>,
  pub consistency: Consistency,
}

/// A decoded RESULT frame.
#[derive(Debug)]
pub enum QueryResult<'c> {
  Void,
  Rows(Rows<'c>),
  SetKeyspace(String),
  SchemaChange {
    change: String,
    keyspace: String,
    table: String,
  },
  Prepared(PreparedStatement),
}

/// Lazy, single-pass iterator over the rows of a result.
///
/// Holds the connection mutably borrowed until dropped, so no other request
/// can be issued while rows are pending; dropping it discards whatever was
/// not consumed.
#[derive(Debug)]
pub struct Rows<'c> {
  conn: &'c mut Connection,
  columns: Arc<Vec<ColumnSpec>>,
  row_count: u32,
  read: u32,
}

impl<'c> Rows<'c> {
  pub(crate) fn new(conn: &'c mut Connection, columns: Arc<Vec<ColumnSpec>>, row_count: u32) -> Self {
    Self {
      conn,
      columns,
      row_count,
      read: 0,
    }
  }

  pub fn columns(&self) -> &[ColumnSpec] {
    &self.columns
  }

  pub fn row_count(&self) -> u32 {
    self.row_count
  }

  fn decode_row(&mut self) -> Result<Row> {
    let body = self.conn.response_body();
    let mut values = Vec::with_capacity(self.columns.len());
    for column in self.columns.iter() {
      let value = match body.cql_get_bytes()? {
        Some(bytes) => Some(Value::decode(&column.type_spec, bytes)?),
        None => None,
      };
      values.push(value);
    }
    Ok(Row {
      columns: self.columns.clone(),
      values,
    })
  }
}

impl Iterator for Rows<'_> {
  type Item = Result<Row>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.read == self.row_count {
      return None;
    }
    self.read += 1;
    match self.decode_row() {
      Ok(row) => Some(Ok(row)),
      Err(err) => {
        // The stream position is unreliable after a bad row; stop iterating
        // and let Drop discard the rest.
        self.read = self.row_count;
        Some(Err(err))
      }
    }
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let left = (self.row_count - self.read) as usize;
    (left, Some(left))
  }
}

impl Drop for Rows<'_> {
  fn drop(&mut self) {
    self.conn.discard_response_body();
  }
}

/// One decoded row; a `None` slot is a wire null.
#[derive(Debug, Clone)]
pub struct Row {
  columns: Arc<Vec<ColumnSpec>>,
  values: Vec<Option<Value>>,
}

impl Row {
  pub fn columns(&self) -> &[ColumnSpec] {
    &self.columns
  }

  pub fn values(&self) -> &[Option<Value>] {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn get<T: FromValue>(&self, index: usize) -> Result<T> {
    match self.values.get(index) {
      Some(value) => T::from_value(value.clone()),
      None => Err(Error::Decode(format!(
        "row has {} columns, no index {}",
        self.values.len(),
        index
      ))),
    }
  }

  /// Like [`Row::get`], but a missing column binds to the target's default.
  /// A column that is present still fails on a type mismatch.
  pub fn get_or_default<T: FromValue + Default>(&self, index: usize) -> Result<T> {
    match self.values.get(index) {
      Some(value) => T::from_value(value.clone()),
      None => Ok(T::default()),
    }
  }

  pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
    match self.columns.iter().position(|column| column.name == name) {
      Some(index) => self.get(index),
      None => Err(Error::Decode(format!("row has no column named {:?}", name))),
    }
  }

  pub fn bind<T: FromRow>(&self) -> Result<T> {
    T::from_row(self)
  }
}

/// Positional binding of a row to a host record; tuples are provided up to
/// eight columns. Extra trailing columns are ignored and missing trailing
/// columns bind to the field type's default.
pub trait FromRow: Sized {
  fn from_row(row: &Row) -> Result<Self>;
}

macro_rules! impl_from_row_for_tuple {
  ($($idx:tt $t:ident),+) => {
    impl<$($t: FromValue + Default),+> FromRow for ($($t,)+) {
      fn from_row(row: &Row) -> Result<Self> {
        Ok(($(row.get_or_default::<$t>($idx)?,)+))
      }
    }
  };
}

impl_from_row_for_tuple!(0 T0);
impl_from_row_for_tuple!(0 T0, 1 T1);
impl_from_row_for_tuple!(0 T0, 1 T1, 2 T2);
impl_from_row_for_tuple!(0 T0, 1 T1, 2 T2, 3 T3);
impl_from_row_for_tuple!(0 T0, 1 T1, 2 T2, 3 T3, 4 T4);
impl_from_row_for_tuple!(0 T0, 1 T1, 2 T2, 3 T3, 4 T4, 5 T5);
impl_from_row_for_tuple!(0 T0, 1 T1, 2 T2, 3 T3, 4 T4, 5 T5, 6 T6);
impl_from_row_for_tuple!(0 T0, 1 T1, 2 T2, 3 T3, 4 T4, 5 T5, 6 T6, 7 T7);

#[cfg(test)]
mod test {
  use bytes::{BufMut, BytesMut};
  use std::sync::Arc;

  use super::{parse_metadata, ColumnSpec, Row, TypeSpec};
  use crate::buf_ext::BufMutExt;
  use crate::error::Error;
  use crate::value::Value;

  fn spec(name: &str, type_spec: TypeSpec) -> ColumnSpec {
    ColumnSpec {
      keyspace: "ks".to_string(),
      table: "t".to_string(),
      name: name.to_string(),
      type_spec,
    }
  }

  #[test]
  fn parses_metadata_with_the_global_tables_spec() {
    let mut b = BytesMut::new();
    b.put_i32(0x0001);
    b.put_i32(2);
    b.cql_put_string("ks").unwrap();
    b.cql_put_string("users").unwrap();
    b.cql_put_string("user_name").unwrap();
    b.put_u16(0x000D);
    b.cql_put_string("birth_year").unwrap();
    b.put_u16(0x0002);

    let columns = parse_metadata(&mut b.freeze()).unwrap();
    assert_eq!(2, columns.len());
    assert_eq!("ks", columns[0].keyspace);
    assert_eq!("users", columns[0].table);
    assert_eq!("user_name", columns[0].name);
    assert_eq!(TypeSpec::Varchar, columns[0].type_spec);
    assert_eq!("birth_year", columns[1].name);
    assert_eq!(TypeSpec::Bigint, columns[1].type_spec);
  }

  #[test]
  fn parses_metadata_with_per_column_tables() {
    let mut b = BytesMut::new();
    b.put_i32(0x0000);
    b.put_i32(1);
    b.cql_put_string("ks2").unwrap();
    b.cql_put_string("events").unwrap();
    b.cql_put_string("id").unwrap();
    b.put_u16(0x000C);

    let columns = parse_metadata(&mut b.freeze()).unwrap();
    assert_eq!("ks2", columns[0].keyspace);
    assert_eq!("events", columns[0].table);
    assert_eq!(TypeSpec::Uuid, columns[0].type_spec);
  }

  #[test]
  fn parses_nested_collection_type_specs() {
    let mut b = BytesMut::new();
    b.put_u16(0x0020); // list
    b.put_u16(0x0021); // of map
    b.put_u16(0x000C); // uuid keys
    b.put_u16(0x000A); // text values

    let spec = TypeSpec::parse(&mut b.freeze()).unwrap();
    assert_eq!(
      TypeSpec::List(Box::new(TypeSpec::Map(Box::new(TypeSpec::Uuid), Box::new(TypeSpec::Text)))),
      spec
    );
  }

  #[test]
  fn parses_a_custom_type_class_name() {
    let mut b = BytesMut::new();
    b.put_u16(0x0000);
    b.cql_put_string("org.apache.cassandra.db.marshal.DynamicCompositeType").unwrap();

    let spec = TypeSpec::parse(&mut b.freeze()).unwrap();
    assert_eq!(
      TypeSpec::Custom("org.apache.cassandra.db.marshal.DynamicCompositeType".to_string()),
      spec
    );
  }

  #[test]
  fn rejects_an_unknown_type_code() {
    let mut b = BytesMut::new();
    b.put_u16(0x0030);
    assert!(matches!(TypeSpec::parse(&mut b.freeze()), Err(Error::Protocol(_))));
  }

  fn sample_row() -> Row {
    Row {
      columns: Arc::new(vec![
        spec("user_name", TypeSpec::Varchar),
        spec("birth_year", TypeSpec::Bigint),
        spec("nickname", TypeSpec::Varchar),
      ]),
      values: vec![
        Some(Value::Text("jsmith".to_string())),
        Some(Value::Bigint(1378218642)),
        None,
      ],
    }
  }

  #[test]
  fn typed_getters_by_position_and_name() {
    let row = sample_row();
    assert_eq!("jsmith", row.get::<String>(0).unwrap());
    assert_eq!(1378218642i64, row.get_by_name::<i64>("birth_year").unwrap());
    assert_eq!(None, row.get::<Option<String>>(2).unwrap());
  }

  #[test]
  fn getters_reject_type_mismatch_and_unknown_columns() {
    let row = sample_row();
    assert!(matches!(row.get::<i32>(1), Err(Error::Decode(_))));
    assert!(matches!(row.get::<String>(9), Err(Error::Decode(_))));
    assert!(matches!(row.get_by_name::<String>("missing"), Err(Error::Decode(_))));
  }

  #[test]
  fn binds_a_tuple_positionally_ignoring_extra_columns() {
    let row = sample_row();
    let (user_name, birth_year) = row.bind::<(String, i64)>().unwrap();
    assert_eq!("jsmith", user_name);
    assert_eq!(1378218642, birth_year);

    // A null slot must be asked for as an Option.
    assert!(row.bind::<(String, i64, String)>().is_err());
    let (_, _, nickname) = row.bind::<(String, i64, Option<String>)>().unwrap();
    assert_eq!(None, nickname);
  }

  #[test]
  fn missing_trailing_columns_bind_to_defaults() {
    let row = sample_row();
    let (user_name, _, _, followers, last_seen) = row
      .bind::<(String, i64, Option<String>, i64, Option<String>)>()
      .unwrap();
    assert_eq!("jsmith", user_name);
    assert_eq!(0, followers);
    assert_eq!(None, last_seen);

    // Columns that are present still have to match the target type.
    assert!(row.bind::<(i64, i64)>().is_err());
    assert_eq!(0, row.get_or_default::<i64>(9).unwrap());
  }
}
