use std::{
  fs::{self, File},
  io::{self, Read, Seek, SeekFrom, Write},
  path::{Path, PathBuf},
};

use log::debug;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReplicaError {
  #[error("{}: {err}", path.display())]
  Create { path: PathBuf, err: io::Error },
  #[error("/dev/stdin: {0}")]
  Read(io::Error),
  #[error("{}: {err}", path.display())]
  Write { path: PathBuf, err: io::Error },
  #[error("{}: short write", path.display())]
  ShortWrite { path: PathBuf },
  #[error("{}: {err}", path.display())]
  Unlink { path: PathBuf, err: io::Error },
}

/// Copy `input` to `out` until end of input. Any short write is fatal.
fn copy(mut input: impl Read, mut out: impl Write, path: &Path) -> Result<u64, ReplicaError> {
  let mut buffer = [0u8; 8192];
  let mut len = 0u64;
  loop {
    let read = match input.read(&mut buffer) {
      Ok(0) => return Ok(len),
      Ok(read) => read,
      Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
      Err(e) => return Err(ReplicaError::Read(e)),
    };
    let written = out.write(&buffer[..read]).map_err(|err| ReplicaError::Write {
      path: path.to_owned(),
      err,
    })?;
    if written != read {
      return Err(ReplicaError::ShortWrite {
        path: path.to_owned(),
      });
    }
    len += read as u64;
  }
}

/// A rewindable snapshot of an input stream
///
/// The backing file is unlinked right after creation, so it disappears
/// together with the last open descriptor.
#[derive(Debug)]
pub struct Replica {
  file: File,
  len: u64,
}

impl Replica {
  /// Copy everything from `input` into an anonymous file under `dir`
  pub fn capture(input: impl Read, dir: &Path) -> Result<Self, ReplicaError> {
    let path = dir.join(format!("recidivm.{}", Uuid::new_v4()));
    let mut file = fs::OpenOptions::new()
      .read(true)
      .write(true)
      .create_new(true)
      .open(&path)
      .map_err(|err| ReplicaError::Create {
        path: path.clone(),
        err,
      })?;
    // unlink before copying, so nothing is left behind if we get killed
    fs::remove_file(&path).map_err(|err| ReplicaError::Unlink {
      path: path.clone(),
      err,
    })?;

    let len = copy(input, &mut file, &path)?;
    debug!("captured {len} bytes of stdin into {path:?}");

    Ok(Self { file, len })
  }

  /// Seek back to the first byte
  pub fn rewind(&mut self) -> io::Result<()> {
    self.file.seek(SeekFrom::Start(0)).map(|_| ())
  }

  pub fn len(&self) -> u64 {
    self.len
  }

  pub fn file(&self) -> &File {
    &self.file
  }
}
