pub mod limit;
pub mod status;
pub mod wait;

use std::{
  ffi::OsString,
  fmt,
  fs::File,
  io::{self, Read},
  os::unix::{
    io::{AsRawFd, FromRawFd, RawFd},
    process::CommandExt,
  },
  process::Command,
};

use log::debug;
use thiserror::Error;

use self::{limit::AddressSpace, status::ProbeOutcome, wait::Wait};

/// Written to the report pipe right before `execvp`
const EXEC_MARKER: u8 = 0;

/// Child-side setup performed between fork and exec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
  Limit,
  Stdin,
  Stdout,
  Stderr,
}

impl SetupStep {
  fn tag(self) -> u8 {
    match self {
      SetupStep::Limit => 1,
      SetupStep::Stdin => 2,
      SetupStep::Stdout => 3,
      SetupStep::Stderr => 4,
    }
  }

  fn from_tag(tag: u8) -> Option<Self> {
    match tag {
      1 => Some(SetupStep::Limit),
      2 => Some(SetupStep::Stdin),
      3 => Some(SetupStep::Stdout),
      4 => Some(SetupStep::Stderr),
      _ => None,
    }
  }
}

impl fmt::Display for SetupStep {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SetupStep::Limit => write!(f, "setrlimit(RLIMIT_AS)"),
      SetupStep::Stdin => write!(f, "dup2(stdin)"),
      SetupStep::Stdout => write!(f, "dup2(stdout)"),
      SetupStep::Stderr => write!(f, "dup2(stderr)"),
    }
  }
}

#[derive(Debug, Error)]
pub enum JobError {
  #[error("pipe(): {0}")]
  Pipe(io::Error),
  #[error("fork(): {0}")]
  Spawn(io::Error),
  /// the harness itself broke inside the child, the probe result is meaningless
  #[error("child setup failed: {step}: {err}")]
  Setup { step: SetupStep, err: io::Error },
  #[error("{}: {err}", program.to_string_lossy())]
  Launch { program: OsString, err: io::Error },
  #[error("wait(): {0}")]
  Wait(io::Error),
}

/// What the report pipe told us about a failed spawn
#[derive(Debug, PartialEq, Eq)]
enum Report {
  /// the child never ran its setup
  Silent,
  /// setup finished, `execvp` itself failed
  Exec,
  Setup(SetupStep, i32),
  Garbled,
}

impl Report {
  fn decode(record: &[u8]) -> Self {
    match record {
      [] => Report::Silent,
      [EXEC_MARKER] => Report::Exec,
      [tag, errno @ ..] => match (SetupStep::from_tag(*tag), <[u8; 4]>::try_from(errno)) {
        (Some(step), Ok(errno)) => Report::Setup(step, i32::from_ne_bytes(errno)),
        _ => Report::Garbled,
      },
    }
  }
}

/// Everything the child does before exec. Kept `Copy` and allocation free.
#[derive(Debug, Clone, Copy)]
struct ChildSetup {
  limit: Option<AddressSpace>,
  stdin: Option<RawFd>,
  stdout: Option<RawFd>,
  report: RawFd,
}

impl ChildSetup {
  fn run(&self) -> io::Result<()> {
    if let Some(limit) = self.limit {
      self.step(SetupStep::Limit, limit.apply())?;
    }
    if let Some(fd) = self.stdin {
      self.step(SetupStep::Stdin, dup2(fd, libc::STDIN_FILENO))?;
    }
    if let Some(fd) = self.stdout {
      self.step(SetupStep::Stdout, dup2(fd, libc::STDOUT_FILENO))?;
      self.step(SetupStep::Stderr, dup2(fd, libc::STDERR_FILENO))?;
    }
    send(self.report, &[EXEC_MARKER]);
    Ok(())
  }

  fn step(&self, step: SetupStep, result: io::Result<()>) -> io::Result<()> {
    if let Err(err) = &result {
      let errno = err.raw_os_error().unwrap_or(0).to_ne_bytes();
      let record = [step.tag(), errno[0], errno[1], errno[2], errno[3]];
      send(self.report, &record);
    }
    result
  }
}

fn dup2(from: RawFd, to: RawFd) -> io::Result<()> {
  if unsafe { libc::dup2(from, to) } == -1 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}

/// Records are shorter than PIPE_BUF, so the write is atomic
fn send(fd: RawFd, record: &[u8]) {
  unsafe {
    libc::write(fd, record.as_ptr() as *const libc::c_void, record.len());
  }
}

fn report_pipe() -> io::Result<(File, File)> {
  let mut fds: [RawFd; 2] = [-1; 2];
  if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } == -1 {
    return Err(io::Error::last_os_error());
  }
  Ok(unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) })
}

/// Result of starting a job
#[derive(Debug, PartialEq, Eq)]
pub enum Launch {
  Running(libc::pid_t),
  /// the target could not be exec'd under the limit
  ExecFailed(i32),
}

/// Run the program with an address space limit
///
/// The descriptors handed to the builder must stay open until the job has
/// been spawned.
pub struct Job {
  program: OsString,
  args: Vec<OsString>,

  stdin: Option<RawFd>,
  stdout: Option<RawFd>,

  limit: Option<AddressSpace>,
}

impl Job {
  /// create a new job without any limitation or redirection
  pub fn new(program: impl Into<OsString>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      stdin: None,
      stdout: None,
      limit: None,
    }
  }
}

// builder
impl Job {
  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }
  pub fn stdin(mut self, stdin: &impl AsRawFd) -> Self {
    self.stdin = Some(stdin.as_raw_fd());
    self
  }
  /// redirect both stdout and stderr
  pub fn stdout(mut self, stdout: &impl AsRawFd) -> Self {
    self.stdout = Some(stdout.as_raw_fd());
    self
  }
  pub fn limit(mut self, limit: AddressSpace) -> Self {
    self.limit = Some(limit);
    self
  }
}

impl Job {
  fn command(&self, report: RawFd) -> Command {
    let mut command = Command::new(&self.program);
    command.args(&self.args);
    let setup = ChildSetup {
      limit: self.limit,
      stdin: self.stdin,
      stdout: self.stdout,
      report,
    };
    unsafe {
      command.pre_exec(move || setup.run());
    }
    command
  }

  /// Fork and exec the job without waiting for it
  pub fn spawn(&self) -> Result<Launch, JobError> {
    let (mut reader, writer) = report_pipe().map_err(JobError::Pipe)?;
    let spawned = self.command(writer.as_raw_fd()).spawn();
    // only the child's copy may keep the pipe open now
    drop(writer);

    let err = match spawned {
      Ok(child) => return Ok(Launch::Running(child.id() as libc::pid_t)),
      Err(err) => err,
    };

    let mut record = Vec::new();
    reader.read_to_end(&mut record).map_err(JobError::Pipe)?;
    match Report::decode(&record) {
      Report::Silent | Report::Garbled => Err(JobError::Spawn(err)),
      Report::Setup(step, errno) => Err(JobError::Setup {
        step,
        err: io::Error::from_raw_os_error(errno),
      }),
      Report::Exec => match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => Err(JobError::Launch {
          program: self.program.clone(),
          err,
        }),
        _ => Ok(Launch::ExecFailed(err.raw_os_error().unwrap_or(0))),
      },
    }
  }

  /// Execute the job and classify how it ended
  pub fn status(&self) -> Result<ProbeOutcome, JobError> {
    match self.spawn()? {
      Launch::Running(pid) => {
        let wait = Wait::wait_for(pid).map_err(JobError::Wait)?;
        debug!("pid {pid}: {:?}, peak rss {} bytes", wait.outcome(), wait.memory());
        Ok(wait.outcome())
      }
      Launch::ExecFailed(errno) => Ok(ProbeOutcome::ExecFailed(errno)),
    }
  }
}
