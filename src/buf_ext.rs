use bytes::{Buf, BufMut, Bytes};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::Consistency;

// Readers for the protocol's notational types ([string], [bytes], ...), all
// big-endian. Every reader checks `remaining()` up front so a truncated or
// lying frame body surfaces as a protocol error instead of a panic.
pub(crate) trait BufExt: Buf {
  fn cql_check(&self, len: usize) -> Result<()> {
    if self.remaining() < len {
      return Err(Error::Protocol(format!(
        "frame body ended early: {} more bytes expected, {} left",
        len,
        self.remaining()
      )));
    }
    Ok(())
  }

  fn cql_get_byte(&mut self) -> Result<u8> {
    self.cql_check(1)?;
    Ok(self.get_u8())
  }

  fn cql_get_short(&mut self) -> Result<u16> {
    self.cql_check(2)?;
    Ok(self.get_u16())
  }

  fn cql_get_int(&mut self) -> Result<i32> {
    self.cql_check(4)?;
    Ok(self.get_i32())
  }

  fn cql_get_string(&mut self) -> Result<String> {
    let len = self.cql_get_short()? as usize;
    self.cql_check(len)?;
    let mut buf = vec![0; len];
    self.copy_to_slice(&mut buf);
    String::from_utf8(buf).map_err(|_| Error::Protocol("string is not valid utf-8".to_string()))
  }

  fn cql_get_long_string(&mut self) -> Result<String> {
    let len = self.cql_get_int()?;
    let len = usize::try_from(len).map_err(|_| Error::Protocol(format!("negative long string length {}", len)))?;
    self.cql_check(len)?;
    let mut buf = vec![0; len];
    self.copy_to_slice(&mut buf);
    String::from_utf8(buf).map_err(|_| Error::Protocol("long string is not valid utf-8".to_string()))
  }

  fn cql_get_string_list(&mut self) -> Result<Vec<String>> {
    let n = self.cql_get_short()?;
    let mut items = Vec::with_capacity(n as usize);
    for _ in 0..n {
      items.push(self.cql_get_string()?);
    }
    Ok(items)
  }

  // [bytes]: length -1 means null.
  fn cql_get_bytes(&mut self) -> Result<Option<Bytes>> {
    let len = self.cql_get_int()?;
    if len < 0 {
      return Ok(None);
    }
    let len = len as usize;
    self.cql_check(len)?;
    Ok(Some(self.copy_to_bytes(len)))
  }

  // [short bytes] has no null sentinel.
  fn cql_get_short_bytes(&mut self) -> Result<Bytes> {
    let len = self.cql_get_short()? as usize;
    self.cql_check(len)?;
    Ok(self.copy_to_bytes(len))
  }

  fn cql_get_string_map(&mut self) -> Result<BTreeMap<String, String>> {
    let n = self.cql_get_short()?;
    let mut map = BTreeMap::new();
    for _ in 0..n {
      let key = self.cql_get_string()?;
      let value = self.cql_get_string()?;
      map.insert(key, value);
    }
    Ok(map)
  }

  fn cql_get_string_multimap(&mut self) -> Result<BTreeMap<String, Vec<String>>> {
    let n = self.cql_get_short()?;
    let mut map = BTreeMap::new();
    for _ in 0..n {
      let key = self.cql_get_string()?;
      let values = self.cql_get_string_list()?;
      map.insert(key, values);
    }
    Ok(map)
  }

  fn cql_get_uuid(&mut self) -> Result<Uuid> {
    self.cql_check(16)?;
    let mut raw = [0u8; 16];
    self.copy_to_slice(&mut raw);
    Ok(Uuid::from_bytes(raw))
  }

  fn cql_get_inet(&mut self) -> Result<SocketAddr> {
    let ip = match self.cql_get_byte()? {
      4 => {
        self.cql_check(4)?;
        let mut raw = [0u8; 4];
        self.copy_to_slice(&mut raw);
        IpAddr::from(raw)
      }
      16 => {
        self.cql_check(16)?;
        let mut raw = [0u8; 16];
        self.copy_to_slice(&mut raw);
        IpAddr::from(raw)
      }
      size => return Err(Error::Protocol(format!("inet address size must be 4 or 16, got {}", size))),
    };
    let port = self.cql_get_int()?;
    let port = u16::try_from(port).map_err(|_| Error::Protocol(format!("{} is not a valid port", port)))?;
    Ok(SocketAddr::new(ip, port))
  }

  fn cql_get_consistency(&mut self) -> Result<Consistency> {
    Consistency::try_from(self.cql_get_short()?)
  }
}

pub(crate) trait BufMutExt: BufMut {
  fn cql_put_string(&mut self, s: &str) -> Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| Error::Encode(format!("string of {} bytes exceeds a short", s.len())))?;
    self.put_u16(len);
    self.put_slice(s.as_bytes());
    Ok(())
  }

  fn cql_put_long_string(&mut self, s: &str) -> Result<()> {
    let len = i32::try_from(s.len()).map_err(|_| Error::Encode(format!("string of {} bytes exceeds an int", s.len())))?;
    self.put_i32(len);
    self.put_slice(s.as_bytes());
    Ok(())
  }

  fn cql_put_string_list(&mut self, items: &[&str]) -> Result<()> {
    let n = u16::try_from(items.len()).map_err(|_| Error::Encode(format!("{} strings exceed a short", items.len())))?;
    self.put_u16(n);
    for item in items {
      self.cql_put_string(item)?;
    }
    Ok(())
  }

  fn cql_put_bytes(&mut self, b: Option<&[u8]>) -> Result<()> {
    match b {
      None => self.put_i32(-1),
      Some(b) => {
        let len = i32::try_from(b.len()).map_err(|_| Error::Encode(format!("value of {} bytes exceeds an int", b.len())))?;
        self.put_i32(len);
        self.put_slice(b);
      }
    }
    Ok(())
  }

  fn cql_put_short_bytes(&mut self, b: &[u8]) -> Result<()> {
    let len = u16::try_from(b.len()).map_err(|_| Error::Encode(format!("value of {} bytes exceeds a short", b.len())))?;
    self.put_u16(len);
    self.put_slice(b);
    Ok(())
  }

  fn cql_put_string_map(&mut self, pairs: &[(&str, &str)]) -> Result<()> {
    let n = u16::try_from(pairs.len()).map_err(|_| Error::Encode(format!("{} pairs exceed a short", pairs.len())))?;
    self.put_u16(n);
    for (key, value) in pairs {
      self.cql_put_string(key)?;
      self.cql_put_string(value)?;
    }
    Ok(())
  }

  fn cql_put_consistency(&mut self, consistency: Consistency) {
    self.put_u16(consistency as u16);
  }
}

// Blanket implementations
impl<T> BufExt for T where T: Buf {}
impl<T> BufMutExt for T where T: BufMut {}
