use std::{io, mem};

use super::status::ProbeOutcome;

/// The Wait struct
///
/// The struct hold the termination status and resource usage of a sub-process
#[derive(Debug)]
pub struct Wait {
  rusage: Rusage,
  status: i32,
}

impl Wait {
  /// Block until `pid` terminates, retrying when interrupted
  pub fn wait_for(pid: libc::pid_t) -> io::Result<Wait> {
    let mut status: i32 = 0;
    let mut rusage = mem::MaybeUninit::<libc::rusage>::uninit();
    loop {
      let code = unsafe { libc::wait4(pid, &mut status, 0, rusage.as_mut_ptr()) };
      if code >= 0 {
        break;
      }
      let err = io::Error::last_os_error();
      if err.kind() != io::ErrorKind::Interrupted {
        return Err(err);
      }
    }
    let rusage = unsafe { rusage.assume_init() };
    let wait = Wait {
      rusage: Rusage::from(rusage),
      status,
    };
    // wait4 without WUNTRACED only reports terminated children
    if !wait.is_exited() && !wait.is_signal() {
      return Err(io::Error::new(
        io::ErrorKind::Other,
        format!("unexpected wait status {status:#x}"),
      ));
    }
    Ok(wait)
  }

  pub fn is_signal(&self) -> bool {
    libc::WIFSIGNALED(self.status)
  }

  pub fn is_exited(&self) -> bool {
    libc::WIFEXITED(self.status)
  }

  pub fn exit_code(&self) -> Option<i32> {
    match self.is_exited() {
      true => Some(libc::WEXITSTATUS(self.status)),
      false => None,
    }
  }

  pub fn outcome(&self) -> ProbeOutcome {
    match self.exit_code() {
      Some(0) => ProbeOutcome::Success,
      Some(code) => ProbeOutcome::Exited(code),
      None => ProbeOutcome::Signaled(libc::WTERMSIG(self.status)),
    }
  }

  /// peak resident set size in bytes
  pub fn memory(&self) -> u64 {
    self.rusage.memory()
  }
}

#[derive(Debug)]
pub struct Rusage(libc::rusage);

impl Rusage {
  /// get max memory usage in bytes
  pub fn memory(&self) -> u64 {
    self.0.ru_maxrss.max(0) as u64 * 1024
  }
}

impl From<libc::rusage> for Rusage {
  fn from(a: libc::rusage) -> Self {
    Rusage(a)
  }
}
