use std::{ffi::OsString, io::Write};

use thiserror::Error;

use crate::{
  io::ProbeIo,
  job::{limit::AddressSpace, status::ProbeOutcome, Job, JobError},
  report::Reporter,
  search::Probe,
};

#[derive(Debug, Error)]
pub enum ProbeError {
  #[error("captured stdin: {0}")]
  Rewind(std::io::Error),
  #[error(transparent)]
  Job(#[from] JobError),
}

/// Probes a real command, one child process per candidate
pub struct CommandProbe<W: Write> {
  program: OsString,
  args: Vec<OsString>,
  io: ProbeIo,
  reporter: Reporter<W>,
}

impl<W: Write> CommandProbe<W> {
  /// `argv[0]` is the program, looked up in `PATH` like `execvp` does
  pub fn new(argv: &[OsString], io: ProbeIo, reporter: Reporter<W>) -> Self {
    let (program, args) = match argv.split_first() {
      Some((program, args)) => (program.clone(), args.to_vec()),
      None => (OsString::new(), Vec::new()),
    };
    Self {
      program,
      args,
      io,
      reporter,
    }
  }
}

impl<W: Write> Probe for CommandProbe<W> {
  type Error = ProbeError;

  fn probe(&mut self, limit: u64) -> Result<ProbeOutcome, ProbeError> {
    // parent and child share the offset, so rewinding here is enough
    self.io.rewind().map_err(ProbeError::Rewind)?;
    self.reporter.started(limit);

    let mut job = Job::new(&self.program)
      .args(&self.args)
      .limit(AddressSpace(limit))
      .stdin(self.io.input());
    if let Some(output) = self.io.output() {
      job = job.stdout(output);
    }

    let outcome = job.status()?;
    self.reporter.finished(&outcome);
    Ok(outcome)
  }
}
