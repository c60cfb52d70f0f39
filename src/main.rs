mod config;
mod io;
mod job;
mod probe;
mod replica;
mod report;
mod search;
mod utils;

use std::{ffi::OsString, io::Write, path::PathBuf, process::exit};

use anyhow::{bail, Context};
use clap::{AppSettings, Parser};
use log::{debug, info};

use crate::{
  config::Config,
  io::{InputSource, ProbeIo},
  job::limit::AddressSpace,
  probe::CommandProbe,
  replica::Replica,
  report::{print_result, Reporter},
  search::{ProbeRange, Search},
  utils::{search_step, Unit},
};

/// Find the minimum address space limit a command needs to succeed
#[derive(Parser, Debug)]
#[clap(author, version, about, setting = AppSettings::TrailingVarArg)]
struct CliArgs {
  /// Capture stdin and replay it to every run of the command
  #[clap(short, long, action)]
  capture_stdin: bool,

  /// Don't redirect the command's stdout and stderr to /dev/null
  #[clap(short, long, action)]
  print: bool,

  /// Reporting unit: B (byte, default), K (kilobyte) or M (megabyte)
  #[clap(short, long, value_name = "B|K|M", value_parser = parse_unit)]
  unit: Option<Unit>,

  /// Be verbose
  #[clap(short, long, action)]
  verbose: bool,

  /// Read defaults from this TOML file
  #[clap(long, value_name = "FILE", value_parser)]
  config: Option<PathBuf>,

  /// The command to measure and its arguments
  #[clap(required = true, value_parser)]
  command: Vec<OsString>,
}

fn parse_unit(s: &str) -> Result<Unit, String> {
  s.parse()
}

/// Settings after merging the command line over the config file
#[derive(Debug, PartialEq, Eq)]
struct Options {
  capture_stdin: bool,
  print: bool,
  verbose: bool,
  unit: Unit,
  tmp_dir: PathBuf,
}

impl Options {
  fn merge(args: &CliArgs, config: &Config) -> Self {
    Self {
      capture_stdin: args.capture_stdin || config.capture_stdin,
      print: args.print || config.print,
      verbose: args.verbose || config.verbose,
      unit: args.unit.or(config.unit).unwrap_or_default(),
      tmp_dir: config.tmp_dir(),
    }
  }
}

fn main() {
  // before anything opens a descriptor of its own
  if let Err(e) = crate::io::ensure_std_fds().context("/dev/null") {
    fatal(std::io::stderr(), &e);
  }
  let args = CliArgs::parse();
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
    .format_timestamp(None)
    .init();

  if let Err(e) = run(&args) {
    fatal(std::io::stderr(), &e);
  }
}

fn fatal(sink: impl Write, e: &anyhow::Error) -> ! {
  print_fatal(sink, e);
  exit(1);
}

/// Best effort: stderr may be the very descriptor that is broken
fn print_fatal(mut sink: impl Write, e: &anyhow::Error) {
  let _ = writeln!(sink, "recidivm: {e:#}");
}

fn run(args: &CliArgs) -> anyhow::Result<()> {
  let config = Config::load(args.config.as_deref())?;
  let options = Options::merge(args, &config);
  debug!("{options:?}");

  let input = if options.capture_stdin {
    let replica = Replica::capture(std::io::stdin().lock(), &options.tmp_dir)?;
    info!("captured {} bytes of stdin", replica.len());
    InputSource::Replica(replica)
  } else {
    InputSource::Null
  };
  let io = ProbeIo::open(input, !options.print).context("/dev/null")?;

  let ceiling = AddressSpace::ceiling().context("getrlimit()")?;
  if ceiling <= 1 {
    bail!("address space hard limit is too low: {ceiling}");
  }
  let step = search_step(options.unit).context("sysconf(_SC_PAGESIZE)")?;

  let reporter = Reporter::new(std::io::stderr(), options.verbose);
  let mut probe = CommandProbe::new(&args.command, io, reporter);
  let result = Search::new(ProbeRange::new(1, ceiling), step).run(&mut probe)?;
  info!(
    "converged to {} bytes after {} probes",
    result.limit, result.probes
  );

  print_result(std::io::stdout().lock(), options.unit.from_bytes(result.limit))?;
  Ok(())
}

#[cfg(test)]
mod test {
  use std::{
    io::{self, Write},
    path::PathBuf,
  };

  use anyhow::Context;
  use clap::Parser;

  use super::{print_fatal, CliArgs, Options};
  use crate::{config::Config, utils::Unit};

  #[test]
  fn trailing_command_is_untouched() {
    let args = CliArgs::try_parse_from(["recidivm", "-v", "-u", "m", "ls", "-l", "--all"]).unwrap();
    assert!(args.verbose);
    assert_eq!(args.unit, Some(Unit::Megabyte));
    assert_eq!(args.command, ["ls", "-l", "--all"]);

    let args = CliArgs::try_parse_from(["recidivm", "--", "-weird", "-c"]).unwrap();
    assert!(!args.capture_stdin);
    assert_eq!(args.command, ["-weird", "-c"]);

    let args = CliArgs::try_parse_from(["recidivm", "-v", "true"]).unwrap();
    assert!(args.verbose);
    assert_eq!(args.command, ["true"]);

    let args = CliArgs::try_parse_from(["recidivm", "-cp", "--config", "x.toml", "env", "-i"]).unwrap();
    assert!(args.capture_stdin && args.print);
    assert_eq!(args.config, Some(PathBuf::from("x.toml")));
    assert_eq!(args.command, ["env", "-i"]);
  }

  #[test]
  fn bad_usage() {
    assert!(CliArgs::try_parse_from(["recidivm", "-v"]).is_err());
    assert!(CliArgs::try_parse_from(["recidivm", "-u", "G", "true"]).is_err());
    assert!(CliArgs::try_parse_from(["recidivm", "--bogus", "true"]).is_err());
  }

  #[test]
  fn flags_override_config() {
    let config = Config {
      unit: Some(Unit::Kilobyte),
      print: true,
      tmp_dir: Some(PathBuf::from("/var/tmp")),
      ..Config::default()
    };
    let args = CliArgs::try_parse_from(["recidivm", "-c", "-u", "M", "true"]).unwrap();
    let options = Options::merge(&args, &config);
    assert_eq!(
      options,
      Options {
        capture_stdin: true,
        print: true,
        verbose: false,
        unit: Unit::Megabyte,
        tmp_dir: PathBuf::from("/var/tmp"),
      }
    );

    let args = CliArgs::try_parse_from(["recidivm", "true"]).unwrap();
    assert_eq!(Options::merge(&args, &Config::default()).unit, Unit::Byte);
  }

  struct Closed;

  impl Write for Closed {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
      Err(io::Error::from_raw_os_error(libc::EBADF))
    }
    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  #[test]
  fn fatal_line() {
    let err = Err::<(), _>(io::Error::from_raw_os_error(libc::EMFILE))
      .context("/dev/null")
      .unwrap_err();
    let mut out = Vec::new();
    print_fatal(&mut out, &err);
    assert_eq!(
      String::from_utf8(out).unwrap(),
      "recidivm: /dev/null: Too many open files (os error 24)\n"
    );
    print_fatal(Closed, &err);
  }
}
