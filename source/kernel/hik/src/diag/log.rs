// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Structured logging with a runtime verbosity threshold
//! OWNERS: @kernel-team
//! PUBLIC API: log_* macros, emit(level,target,args), set_max_level, max_level
//! DEPENDS_ON: uart::KernelUart
//! INVARIANTS: Single-line emission; lines carry a monotonic sequence number; the threshold
//!             is set once from the command line and read lock-free on every emission

use core::fmt::{Arguments, Write};
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Logging severity used by the kernel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    const fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn rank(self) -> u8 {
        match self {
            Level::Error => 0,
            Level::Warn => 1,
            Level::Info => 2,
            Level::Debug => 3,
            Level::Trace => 4,
        }
    }

    const fn from_rank(rank: u8) -> Self {
        match rank {
            0 => Level::Error,
            1 => Level::Warn,
            2 => Level::Info,
            3 => Level::Debug,
            _ => Level::Trace,
        }
    }
}

// Release images default to Info; debug images open the taps. `quiet` and
// `debug` on the command line override either way at boot.
const DEFAULT_MAX_RANK: u8 = if cfg!(debug_assertions) {
    Level::Trace.rank()
} else {
    Level::Info.rank()
};

static MAX_RANK: AtomicU8 = AtomicU8::new(DEFAULT_MAX_RANK);

// Wrapping line counter so the external drain can spot dropped output.
static SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Raises or lowers the emission threshold.
pub fn set_max_level(level: Level) {
    MAX_RANK.store(level.rank(), Ordering::Relaxed);
}

/// Currently effective threshold.
pub fn max_level() -> Level {
    Level::from_rank(MAX_RANK.load(Ordering::Relaxed))
}

/// True when a record at `level` would be written.
pub fn enabled(level: Level) -> bool {
    level.rank() <= MAX_RANK.load(Ordering::Relaxed)
}

/// Emits one sequence-stamped log line if `level` clears the threshold.
pub fn emit(level: Level, target: &'static str, args: Arguments<'_>) {
    if !enabled(level) {
        return;
    }

    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let mut uart = crate::uart::KernelUart::lock();
    let mut writer = &mut *uart;
    let _ = Write::write_fmt(
        &mut writer,
        format_args!("{:06} [{} {}] ", seq, level.tag(), target),
    );
    let _ = Write::write_fmt(&mut writer, args);
    let _ = Write::write_char(&mut writer, '\n');
}

#[macro_export]
macro_rules! log_error {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Error, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Error, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_warn {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Warn, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Warn, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_info {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Info, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Info, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_debug {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Debug, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Debug, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_trace {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Trace, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Trace, module_path!(), format_args!($($arg)+));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    // The threshold itself is a process-wide atomic that boot-path tests
    // adjust, so these stick to race-free properties.
    #[test]
    fn ranks_round_trip_in_severity_order() {
        let levels = [Level::Error, Level::Warn, Level::Info, Level::Debug, Level::Trace];
        for pair in levels.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
        for level in levels {
            assert_eq!(Level::from_rank(level.rank()), level);
        }
    }

    #[test]
    fn errors_always_clear_the_threshold() {
        assert!(enabled(Level::Error));
    }
}
