#![deny(unsafe_code)]

//! # Overview
//!
//! `cli` is the client frontend: it parses the `fcp` command line, sets up
//! the nasty socket and file handles at the requested nastiness levels, and
//! drives one [`engine::Sender`] session per file in the source directory.
//! Every file is attempted; per-file failures are reported and the run
//! continues, so the exit code reflects how the run itself went, not any
//! single file.
//!
//! # Exit codes
//!
//! - `0`: normal completion, every file attempted;
//! - `1`: usage error;
//! - `4`: the datagram transport failed beyond recovery;
//! - `8`: the source directory is missing or not a directory.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;

use clap::{Arg, ArgAction, Command, value_parser};
use engine::{Sender, SenderConfig, TransferOutcome};
use logging::audit::AuditLog;
use logging::{VerbosityConfig, info_log};
use nasty::{Nastiness, NastyDgmSocket, NastyFs};
use protocol::DEFAULT_PORT;

/// How a client run ended, before conversion to a process exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    /// Every file was attempted.
    Success,
    /// The command line was unusable.
    Usage,
    /// The transport failed beyond recovery mid-run.
    Fatal,
    /// The source directory is missing or not a directory.
    BadSourceDir,
}

impl ExitStatus {
    /// The documented process exit code for this status.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Usage => 1,
            Self::Fatal => 4,
            Self::BadSourceDir => 8,
        }
    }
}

/// Maps a run status onto the documented process exit codes.
#[must_use]
pub fn exit_code_from(status: ExitStatus) -> std::process::ExitCode {
    std::process::ExitCode::from(status.code())
}

fn command() -> Command {
    Command::new("fcp")
        .about("Copies every file in a directory to an fcp server, byte-exact")
        .arg(
            Arg::new("server")
                .value_name("SERVER")
                .required(true)
                .help("Server host, or host:port to override the default port"),
        )
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
                .help("Fault level for source-file reads (0 = clean)"),
        )
        .arg(
            Arg::new("source-dir")
                .value_name("SOURCE_DIR")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Directory whose regular files are copied"),
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
        1 => {
            let mut config = VerbosityConfig::default();
            config.info.set_all(1);
            config
        }
        2 => VerbosityConfig::all(1),
        _ => VerbosityConfig::all(2),
    }
}

/// Parses arguments and runs the transfer loop.
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
            let _ = writeln!(stderr, "fcp: {err}");
            return ExitStatus::Usage;
        }
    };
    let file = match Nastiness::new(*matches.get_one::<u32>("file-nastiness").unwrap_or(&0)) {
        Ok(level) => level,
        Err(err) => {
            let _ = writeln!(stderr, "fcp: {err}");
            return ExitStatus::Usage;
        }
    };
    let Some(server) = matches.get_one::<String>("server") else {
        return ExitStatus::Usage;
    };
    let Some(source_dir) = matches.get_one::<PathBuf>("source-dir") else {
        return ExitStatus::Usage;
    };

    logging::init(verbosity_for(matches.get_count("verbose")));
    if let Some(path) = matches.get_one::<PathBuf>("debug-log") {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => logging::attach_sink(Box::new(file)),
            Err(err) => {
                let _ = writeln!(stderr, "fcp: cannot open debug log {}: {err}", path.display());
                return ExitStatus::Usage;
            }
        }
    }

    // The source directory is validated before any socket exists, matching
    // the documented exit-code contract.
    let files = match walk::source_files(source_dir) {
        Ok(files) => files,
        Err(err) => {
            let _ = writeln!(stderr, "fcp: {err}");
            return ExitStatus::BadSourceDir;
        }
    };

    let audit = match matches.get_one::<PathBuf>("grading-log") {
        None => AuditLog::disabled(),
        Some(path) => match AuditLog::to_file(path) {
            Ok(log) => log,
            Err(err) => {
                let _ = writeln!(stderr, "fcp: cannot open grading log {}: {err}", path.display());
                return ExitStatus::Fatal;
            }
        },
    };

    let address = if server.contains(':') {
        server.clone()
    } else {
        format!("{server}:{DEFAULT_PORT}")
    };
    let mut socket = match NastyDgmSocket::connect(address.as_str(), network) {
        Ok(socket) => socket,
        Err(err) => {
            let _ = writeln!(stderr, "fcp: cannot reach {address}: {err}");
            return ExitStatus::Fatal;
        }
    };

    let fs = NastyFs::new(file);
    let mut sender = Sender::new(&mut socket, &fs, &audit, SenderConfig::default());

    let total = files.len();
    let mut delivered = 0usize;
    for file in &files {
        info_log!(Name, 1, "{}", file.name);
        match sender.send_file(&file.path, &file.name) {
            Ok(TransferOutcome::Delivered) => {
                delivered += 1;
                let _ = writeln!(stdout, "File: {} passed end-to-end check", file.name);
            }
            Ok(TransferOutcome::Rejected) => {
                let _ = writeln!(stdout, "File: {} failed end-to-end check", file.name);
            }
            Err(err) if err.is_fatal() => {
                let _ = writeln!(stderr, "fcp: {err}");
                return ExitStatus::Fatal;
            }
            Err(err) => {
                let _ = writeln!(stderr, "fcp: {}: {err}", file.name);
            }
        }
    }

    info_log!(Stats, 1, "{delivered}/{total} files delivered");
    let _ = writeln!(stdout, "{delivered} of {total} files delivered");
    ExitStatus::Success
}
