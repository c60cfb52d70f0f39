use std::io::{self, Write};

use thiserror::Error;

use crate::job::status::ProbeOutcome;

#[derive(Debug, Error)]
#[error("/dev/stdout: {0}")]
pub struct ReportError(io::Error);

/// Formats per-probe diagnostics for the user
///
/// Diagnostics are best effort; a broken stderr never aborts the search.
pub struct Reporter<W: Write> {
  sink: W,
  verbose: bool,
}

impl<W: Write> Reporter<W> {
  pub fn new(sink: W, verbose: bool) -> Self {
    Self { sink, verbose }
  }

  /// Announce a candidate before spawning, so a hanging target shows which
  /// limit it hangs under
  pub fn started(&mut self, limit: u64) {
    if self.verbose {
      let _ = write!(self.sink, "recidivm: {limit} -> ");
      let _ = self.sink.flush();
    }
  }

  pub fn finished(&mut self, outcome: &ProbeOutcome) {
    if self.verbose {
      let _ = writeln!(self.sink, "{outcome}");
    }
  }

  pub fn into_inner(self) -> W {
    self.sink
  }
}

/// Print the final value and make sure it actually reached stdout
pub fn print_result(mut out: impl Write, value: u64) -> Result<(), ReportError> {
  writeln!(out, "{value}").map_err(ReportError)?;
  out.flush().map_err(ReportError)
}

#[cfg(test)]
mod test {
  use std::io::{self, Write};

  use super::{print_result, Reporter};
  use crate::job::status::ProbeOutcome;

  #[test]
  fn verbose_lines() {
    let mut reporter = Reporter::new(Vec::new(), true);
    reporter.started(4096);
    reporter.finished(&ProbeOutcome::Success);
    reporter.started(2048);
    reporter.finished(&ProbeOutcome::Exited(1));
    reporter.started(1024);
    reporter.finished(&ProbeOutcome::Signaled(libc::SIGKILL));
    let text = String::from_utf8(reporter.into_inner()).unwrap();
    assert_eq!(
      text,
      "recidivm: 4096 -> ok\nrecidivm: 2048 -> exit status 1\nrecidivm: 1024 -> SIGKILL\n"
    );
  }

  #[test]
  fn quiet_reporter_writes_nothing() {
    let mut reporter = Reporter::new(Vec::new(), false);
    reporter.started(1);
    reporter.finished(&ProbeOutcome::Success);
    assert!(reporter.into_inner().is_empty());
  }

  struct Full;

  impl Write for Full {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
      Err(io::Error::from_raw_os_error(libc::ENOSPC))
    }
    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  #[test]
  fn result_line() {
    let mut out = Vec::new();
    print_result(&mut out, 42).unwrap();
    assert_eq!(out, b"42\n");
    let err = print_result(Full, 42).unwrap_err();
    assert!(err.to_string().starts_with("/dev/stdout: "));
  }
}
