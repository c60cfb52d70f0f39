use std::{ffi::CStr, fmt, io};

/// How a single probe ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
  Success,
  /// exited with a non-zero status
  Exited(i32),
  /// terminated by a signal
  Signaled(i32),
  /// `execvp` failed under the limit, carries the errno
  ExecFailed(i32),
}

impl ProbeOutcome {
  pub fn is_success(&self) -> bool {
    matches!(self, ProbeOutcome::Success)
  }
}

impl fmt::Display for ProbeOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      ProbeOutcome::Success => write!(f, "ok"),
      ProbeOutcome::Exited(code) => write!(f, "exit status {code}"),
      ProbeOutcome::Signaled(sig) => match signal_name(sig) {
        Some(name) => write!(f, "{name}"),
        None => write!(f, "signal {sig} ({})", signal_description(sig)),
      },
      ProbeOutcome::ExecFailed(errno) => {
        write!(f, "exec failed: {}", io::Error::from_raw_os_error(errno))
      }
    }
  }
}

/// Symbolic name of the POSIX.1-1990 and SUSv2 signals
pub fn signal_name(sig: i32) -> Option<&'static str> {
  let name = match sig {
    libc::SIGHUP => "SIGHUP",
    libc::SIGINT => "SIGINT",
    libc::SIGQUIT => "SIGQUIT",
    libc::SIGILL => "SIGILL",
    libc::SIGABRT => "SIGABRT",
    libc::SIGFPE => "SIGFPE",
    libc::SIGKILL => "SIGKILL",
    libc::SIGSEGV => "SIGSEGV",
    libc::SIGPIPE => "SIGPIPE",
    libc::SIGALRM => "SIGALRM",
    libc::SIGTERM => "SIGTERM",
    libc::SIGUSR1 => "SIGUSR1",
    libc::SIGUSR2 => "SIGUSR2",
    libc::SIGCHLD => "SIGCHLD",
    libc::SIGCONT => "SIGCONT",
    libc::SIGSTOP => "SIGSTOP",
    libc::SIGTSTP => "SIGTSTP",
    libc::SIGTTIN => "SIGTTIN",
    libc::SIGTTOU => "SIGTTOU",
    libc::SIGBUS => "SIGBUS",
    #[cfg(any(target_os = "linux", target_os = "android"))]
    libc::SIGPOLL => "SIGPOLL",
    libc::SIGPROF => "SIGPROF",
    libc::SIGSYS => "SIGSYS",
    libc::SIGTRAP => "SIGTRAP",
    libc::SIGURG => "SIGURG",
    libc::SIGVTALRM => "SIGVTALRM",
    libc::SIGXCPU => "SIGXCPU",
    libc::SIGXFSZ => "SIGXFSZ",
    _ => return None,
  };
  Some(name)
}

fn signal_description(sig: i32) -> String {
  let description = unsafe { libc::strsignal(sig) };
  if description.is_null() {
    return String::from("unknown signal");
  }
  unsafe { CStr::from_ptr(description) }
    .to_string_lossy()
    .into_owned()
}
