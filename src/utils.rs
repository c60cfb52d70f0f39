use std::{fmt, str::FromStr};

use serde_derive::Deserialize;

/// Granularity of the reported limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Unit {
  Byte,
  Kilobyte,
  Megabyte,
}

impl Unit {
  pub fn bytes(self) -> u64 {
    match self {
      Unit::Byte => 1,
      Unit::Kilobyte => 1024,
      Unit::Megabyte => 1024 * 1024,
    }
  }

  /// convert a byte count into this unit, truncating
  pub fn from_bytes(self, bytes: u64) -> u64 {
    bytes / self.bytes()
  }
}

impl Default for Unit {
  fn default() -> Self {
    Unit::Byte
  }
}

impl FromStr for Unit {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "b" | "B" => Ok(Unit::Byte),
      "k" | "K" => Ok(Unit::Kilobyte),
      "m" | "M" => Ok(Unit::Megabyte),
      _ => Err(format!("unit must be B, K or M, not {s}")),
    }
  }
}

impl TryFrom<String> for Unit {
  type Error = String;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl fmt::Display for Unit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Unit::Byte => write!(f, "B"),
      Unit::Kilobyte => write!(f, "K"),
      Unit::Megabyte => write!(f, "M"),
    }
  }
}

/// Round `value` up to the next multiple of `unit`.
///
/// `unit` must be a power of two. Saturates to [`u64::MAX`] when the
/// multiple is not representable.
pub fn round_up(value: u64, unit: u64) -> u64 {
  debug_assert!(unit.is_power_of_two());
  if value == 0 {
    return 0;
  }
  ((value - 1) | (unit - 1)).checked_add(1).unwrap_or(u64::MAX)
}

/// System page size in bytes
pub fn page_size() -> std::io::Result<u64> {
  let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
  if size < 0 {
    Err(std::io::Error::last_os_error())
  } else {
    Ok(size as u64)
  }
}

/// Granularity of the search: a page, or the reporting unit if coarser
pub fn search_step(unit: Unit) -> std::io::Result<u64> {
  Ok(page_size()?.max(unit.bytes()))
}
