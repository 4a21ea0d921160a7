#![deny(unsafe_code)]

//! # Overview
//!
//! `logging` is the diagnostic and audit layer of the fcp workspace. It has
//! two halves:
//!
//! - a verbosity-flag system: independent debug and info levels per
//!   category, driven through the [`debug_log!`] and [`info_log!`] macros,
//!   with a drainable in-process event queue so tests can assert on exactly
//!   what was logged;
//! - the [`audit`] module, which renders the grading events the protocol
//!   requires at defined state transitions and appends them to a log sink.
//!
//! # Design
//!
//! A single process-wide logger holds the active [`VerbosityConfig`], the
//! event queue, and an optional line sink (the on-disk debug log). [`init`]
//! replaces the whole configuration; callers that never call it get the
//! default of everything silent. Macros evaluate their format arguments only
//! when the category's level is high enough.

mod logger;

pub mod audit;

pub use logger::{
    DebugFlag, DebugLevels, DiagnosticEvent, InfoFlag, InfoLevels, VerbosityConfig, attach_sink,
    drain_events, emit, init, would_log_debug, would_log_info,
};

/// Logs a debug message under a [`DebugFlag`] category.
///
/// The message is emitted only when the configured level for the flag is at
/// least `level`. Format arguments are not evaluated otherwise.
#[macro_export]
macro_rules! debug_log {
    ($flag:ident, $level:expr, $($arg:tt)*) => {
        if $crate::would_log_debug($crate::DebugFlag::$flag, $level) {
            $crate::emit($crate::DiagnosticEvent::Debug {
                flag: $crate::DebugFlag::$flag,
                level: $level,
                message: format!($($arg)*),
            });
        }
    };
}

/// Logs an info message under an [`InfoFlag`] category.
#[macro_export]
macro_rules! info_log {
    ($flag:ident, $level:expr, $($arg:tt)*) => {
        if $crate::would_log_info($crate::InfoFlag::$flag, $level) {
            $crate::emit($crate::DiagnosticEvent::Info {
                flag: $crate::InfoFlag::$flag,
                level: $level,
                message: format!($($arg)*),
            });
        }
    };
}
