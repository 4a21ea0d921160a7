//! Process-wide verbosity state and the diagnostic event queue.

use std::io::Write;
use std::sync::{Mutex, OnceLock};

/// Debug message categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DebugFlag {
    /// Sender state machine: bursts, retransmits, phase changes.
    Send,
    /// Receiver state machine: commits, reconciliation, session changes.
    Recv,
    /// Session lifecycle on either peer.
    Session,
    /// File I/O, including verified-write retries.
    Io,
    /// Datagram traffic: frames written, read, and dropped.
    Net,
}

/// Info message categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InfoFlag {
    /// Per-file progress lines.
    Name,
    /// Transfer statistics.
    Stats,
}

/// Per-category debug levels. Zero silences a category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DebugLevels {
    /// Level for [`DebugFlag::Send`].
    pub send: u8,
    /// Level for [`DebugFlag::Recv`].
    pub recv: u8,
    /// Level for [`DebugFlag::Session`].
    pub session: u8,
    /// Level for [`DebugFlag::Io`].
    pub io: u8,
    /// Level for [`DebugFlag::Net`].
    pub net: u8,
}

impl DebugLevels {
    /// Sets every category to `level`.
    pub fn set_all(&mut self, level: u8) {
        *self = Self {
            send: level,
            recv: level,
            session: level,
            io: level,
            net: level,
        };
    }

    fn level(&self, flag: DebugFlag) -> u8 {
        match flag {
            DebugFlag::Send => self.send,
            DebugFlag::Recv => self.recv,
            DebugFlag::Session => self.session,
            DebugFlag::Io => self.io,
            DebugFlag::Net => self.net,
        }
    }
}

/// Per-category info levels. Zero silences a category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InfoLevels {
    /// Level for [`InfoFlag::Name`].
    pub name: u8,
    /// Level for [`InfoFlag::Stats`].
    pub stats: u8,
}

impl InfoLevels {
    /// Sets every category to `level`.
    pub fn set_all(&mut self, level: u8) {
        *self = Self {
            name: level,
            stats: level,
        };
    }

    fn level(&self, flag: InfoFlag) -> u8 {
        match flag {
            InfoFlag::Name => self.name,
            InfoFlag::Stats => self.stats,
        }
    }
}

/// Complete verbosity configuration installed by [`init`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerbosityConfig {
    /// Debug levels.
    pub debug: DebugLevels,
    /// Info levels.
    pub info: InfoLevels,
}

impl VerbosityConfig {
    /// A configuration with every debug and info category at `level`.
    #[must_use]
    pub fn all(level: u8) -> Self {
        let mut config = Self::default();
        config.debug.set_all(level);
        config.info.set_all(level);
        config
    }
}

/// One logged message, as held in the drainable queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticEvent {
    /// A message logged through [`crate::debug_log!`].
    Debug {
        /// Category the message was logged under.
        flag: DebugFlag,
        /// Level the message was logged at.
        level: u8,
        /// Rendered message text.
        message: String,
    },
    /// A message logged through [`crate::info_log!`].
    Info {
        /// Category the message was logged under.
        flag: InfoFlag,
        /// Level the message was logged at.
        level: u8,
        /// Rendered message text.
        message: String,
    },
}

impl DiagnosticEvent {
    fn render(&self) -> String {
        match self {
            Self::Debug {
                flag,
                level,
                message,
            } => format!("debug[{flag:?}/{level}]: {message}"),
            Self::Info {
                flag,
                level,
                message,
            } => format!("info[{flag:?}/{level}]: {message}"),
        }
    }
}

struct Logger {
    config: VerbosityConfig,
    events: Vec<DiagnosticEvent>,
    sink: Option<Box<dyn Write + Send>>,
}

fn logger() -> &'static Mutex<Logger> {
    static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();
    LOGGER.get_or_init(|| {
        Mutex::new(Logger {
            config: VerbosityConfig::default(),
            events: Vec::new(),
            sink: None,
        })
    })
}

/// Installs a verbosity configuration, replacing the previous one.
pub fn init(config: VerbosityConfig) {
    if let Ok(mut logger) = logger().lock() {
        logger.config = config;
    }
}

/// Attaches a line sink; each emitted event is also written there.
pub fn attach_sink(sink: Box<dyn Write + Send>) {
    if let Ok(mut logger) = logger().lock() {
        logger.sink = Some(sink);
    }
}

/// Whether a debug message at `level` under `flag` would be emitted.
#[must_use]
pub fn would_log_debug(flag: DebugFlag, level: u8) -> bool {
    logger()
        .lock()
        .map(|logger| logger.config.debug.level(flag) >= level)
        .unwrap_or(false)
}

/// Whether an info message at `level` under `flag` would be emitted.
#[must_use]
pub fn would_log_info(flag: InfoFlag, level: u8) -> bool {
    logger()
        .lock()
        .map(|logger| logger.config.info.level(flag) >= level)
        .unwrap_or(false)
}

/// Queues an event and writes it to the attached sink, if any.
pub fn emit(event: DiagnosticEvent) {
    if let Ok(mut logger) = logger().lock() {
        if let Some(sink) = logger.sink.as_mut() {
            let _ = writeln!(sink, "{}", event.render());
        }
        logger.events.push(event);
    }
}

/// Removes and returns every queued event.
pub fn drain_events() -> Vec<DiagnosticEvent> {
    logger()
        .lock()
        .map(|mut logger| std::mem::take(&mut logger.events))
        .unwrap_or_default()
}
