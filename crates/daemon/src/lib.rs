#![deny(unsafe_code)]

//! # Overview
//!
//! `daemon` is the server frontend: it parses the `fcpd` command line,
//! binds the nasty datagram socket, and hands the endpoint to one
//! [`engine::Receiver`] that serves sessions until the process is killed.
//!
//! # Exit codes
//!
//! - `1`: usage error (including an unusable target directory);
//! - `4`: unrecoverable socket error, at bind time or mid-serve.
//!
//! There is no success exit; a healthy server runs forever.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;

use clap::{Arg, ArgAction, Command, value_parser};
use engine::{Receiver, ReceiverConfig};
use logging::VerbosityConfig;
use logging::audit::AuditLog;
use nasty::{Nastiness, NastyDgmSocket, NastyFs};
use protocol::DEFAULT_PORT;

/// How a server run ended, before conversion to a process exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    /// Help or version output; nothing was served.
    Success,
    /// The command line was unusable.
    Usage,
    /// The socket failed, at bind time or while serving.
    Socket,
}

impl ExitStatus {
    /// The documented process exit code for this status.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Usage => 1,
            Self::Socket => 4,
        }
    }
}

/// Maps a run status onto the documented process exit codes.
#[must_use]
pub fn exit_code_from(status: ExitStatus) -> std::process::ExitCode {
    std::process::ExitCode::from(status.code())
}

fn command() -> Command {
    Command::new("fcpd")
        .about("Receives fcp transfers into a target directory, forever")
        .arg(
            Arg::new("network-nastiness")
                .value_name("NETWORK_NASTINESS")
                .required(true)
                .value_parser(value_parser!(u32))
                .help("Fault level for the datagram socket (0 = clean)"),
        )
        .arg(
            Arg::new("file-nastiness")
                .value_name("FILE_NASTINESS")
                .required(true)
                .value_parser(value_parser!(u32))
                .help("Fault level for staging-file I/O (0 = clean)"),
        )
        .arg(
            Arg::new("target-dir")
                .value_name("TARGET_DIR")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Directory received files are promoted into"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .default_value("41500")
                .help("UDP port to listen on"),
        )
        .arg(
            Arg::new("grading-log")
                .long("grading-log")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Append grading audit events to this file"),
        )
        .arg(
            Arg::new("debug-log")
                .long("debug-log")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Append diagnostic messages to this file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Increase diagnostic verbosity (repeatable)"),
        )
}

fn verbosity_for(level: u8) -> VerbosityConfig {
    match level {
        0 => VerbosityConfig::default(),
        1 => VerbosityConfig::all(1),
        _ => VerbosityConfig::all(2),
    }
}

/// Parses arguments and serves until the socket dies.
pub fn run<I, T, Out, Err>(args: I, stdout: &mut Out, stderr: &mut Err) -> ExitStatus
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    Out: Write,
    Err: Write,
{
    let matches = match command().try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(err) if err.kind() == clap::error::ErrorKind::DisplayHelp
            || err.kind() == clap::error::ErrorKind::DisplayVersion =>
        {
            let _ = write!(stdout, "{err}");
            return ExitStatus::Success;
        }
        Err(err) => {
            let _ = write!(stderr, "{err}");
            return ExitStatus::Usage;
        }
    };

    let network = match Nastiness::new(*matches.get_one::<u32>("network-nastiness").unwrap_or(&0))
    {
        Ok(level) => level,
        Err(err) => {
            let _ = writeln!(stderr, "fcpd: {err}");
            return ExitStatus::Usage;
        }
    };
    let file = match Nastiness::new(*matches.get_one::<u32>("file-nastiness").unwrap_or(&0)) {
        Ok(level) => level,
        Err(err) => {
            let _ = writeln!(stderr, "fcpd: {err}");
            return ExitStatus::Usage;
        }
    };
    let Some(target) = matches.get_one::<PathBuf>("target-dir").cloned() else {
        return ExitStatus::Usage;
    };
    let port = *matches.get_one::<u16>("port").unwrap_or(&DEFAULT_PORT);

    logging::init(verbosity_for(matches.get_count("verbose")));
    if let Some(path) = matches.get_one::<PathBuf>("debug-log") {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => logging::attach_sink(Box::new(file)),
            Err(err) => {
                let _ = writeln!(
                    stderr,
                    "fcpd: cannot open debug log {}: {err}",
                    path.display()
                );
                return ExitStatus::Usage;
            }
        }
    }

    if !target.is_dir() {
        let _ = writeln!(
            stderr,
            "fcpd: target directory {} is missing or not a directory",
            target.display()
        );
        return ExitStatus::Usage;
    }

    let audit = match matches.get_one::<PathBuf>("grading-log") {
        None => AuditLog::disabled(),
        Some(path) => match AuditLog::to_file(path) {
            Ok(log) => log,
            Err(err) => {
                let _ = writeln!(
                    stderr,
                    "fcpd: cannot open grading log {}: {err}",
                    path.display()
                );
                return ExitStatus::Usage;
            }
        },
    };

    let socket = match NastyDgmSocket::bind(port, network) {
        Ok(socket) => socket,
        Err(err) => {
            let _ = writeln!(stderr, "fcpd: cannot bind UDP port {port}: {err}");
            return ExitStatus::Socket;
        }
    };
    let _ = writeln!(stdout, "fcpd: listening on port {port}, writing into {}", target.display());

    let fs = NastyFs::new(file);
    let mut receiver = Receiver::new(socket, fs, target, audit, ReceiverConfig::default());
    match receiver.run() {
        Ok(()) => ExitStatus::Success,
        Err(err) => {
            let _ = writeln!(stderr, "fcpd: {err}");
            ExitStatus::Socket
        }
    }
}
