use std::{
  fs::{File, OpenOptions},
  io,
};

use crate::replica::Replica;

const NULL_DEVICE: &str = "/dev/null";

/// Where every probe reads its standard input from
#[derive(Debug)]
pub enum InputSource {
  /// the shared null device
  Null,
  Replica(Replica),
}

/// Descriptors shared by all probes
///
/// A single null device is opened once and serves both as the empty input
/// and as the discard sink for stdout and stderr.
#[derive(Debug)]
pub struct ProbeIo {
  null: File,
  input: InputSource,
  discard_output: bool,
}

impl ProbeIo {
  pub fn open(input: InputSource, discard_output: bool) -> io::Result<Self> {
    let null = OpenOptions::new().read(true).write(true).open(NULL_DEVICE)?;
    Ok(Self {
      null,
      input,
      discard_output,
    })
  }

  /// Rewind the captured input so the next probe sees all of it
  pub fn rewind(&mut self) -> io::Result<()> {
    match &mut self.input {
      InputSource::Null => Ok(()),
      InputSource::Replica(replica) => replica.rewind(),
    }
  }

  pub fn input(&self) -> &File {
    match &self.input {
      InputSource::Null => &self.null,
      InputSource::Replica(replica) => replica.file(),
    }
  }

  /// `None` when the target should inherit our stdout and stderr
  pub fn output(&self) -> Option<&File> {
    match self.discard_output {
      true => Some(&self.null),
      false => None,
    }
  }
}

/// Make sure descriptors 0, 1 and 2 are open, so nothing we open later
/// ends up posing as a standard stream.
pub fn ensure_std_fds() -> io::Result<()> {
  for fd in 0..=2 {
    if unsafe { libc::fcntl(fd, libc::F_GETFD) } != -1 {
      continue;
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::EBADF) {
      return Err(err);
    }
    // lowest free descriptor, so this lands on `fd`
    let opened = unsafe { libc::open(b"/dev/null\0".as_ptr() as *const libc::c_char, libc::O_RDWR) };
    if opened == -1 {
      return Err(io::Error::last_os_error());
    }
  }
  Ok(())
}
