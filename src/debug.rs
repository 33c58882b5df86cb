use std::fmt::{self, Debug};

// Frames can carry whole result sets; keep trace lines bounded.
const MAX_TRACED_BYTES: usize = 64;

pub(crate) struct WireBytes<'a>(pub &'a [u8]);

impl Debug for WireBytes<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, b) in self.0.iter().take(MAX_TRACED_BYTES).enumerate() {
      if i > 0 {
        write!(f, " ")?;
      }
      write!(f, "{:02x}", b)?;
    }
    if self.0.len() > MAX_TRACED_BYTES {
      write!(f, " .. ({} bytes total)", self.0.len())?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::WireBytes;

  #[test]
  fn formats_spaced_hex() {
    assert_eq!("01 80 ff", format!("{:?}", WireBytes(&[0x01, 0x80, 0xff])));
  }

  #[test]
  fn truncates_long_dumps() {
    let bytes = vec![0u8; 100];
    assert!(format!("{:?}", WireBytes(&bytes)).ends_with(".. (100 bytes total)"));
  }
}
