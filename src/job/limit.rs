use std::io;

use rlimit::{getrlimit, setrlimit, Resource, INFINITY};

/// Widest virtual address space user programs can map on this platform
#[cfg(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64"))]
pub const ADDRESS_SPACE_CEILING: u64 = 1 << 48;
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
pub const ADDRESS_SPACE_CEILING: u64 = INFINITY;

/// Use `setrlimit` to cap the address space of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpace(pub u64);

impl AddressSpace {
  /// The largest limit worth probing: the hard limit of this process,
  /// clamped to what the platform can actually map
  pub fn ceiling() -> io::Result<u64> {
    let (_, hard) = getrlimit(Resource::AS)?;
    Ok(hard.min(INFINITY).min(ADDRESS_SPACE_CEILING))
  }

  /// Apply as both soft and hard limit to the calling process.
  ///
  /// Only async-signal-safe calls, so this can run between fork and exec.
  pub fn apply(&self) -> io::Result<()> {
    setrlimit(Resource::AS, self.0, self.0)
  }
}

#[cfg(test)]
mod test {
  use super::{AddressSpace, ADDRESS_SPACE_CEILING};

  #[test]
  fn ceiling_test() {
    let ceiling = AddressSpace::ceiling().unwrap();
    assert!(ceiling > 1);
    assert!(ceiling <= ADDRESS_SPACE_CEILING);
  }
}
