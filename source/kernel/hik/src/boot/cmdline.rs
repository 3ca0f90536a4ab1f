// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel command-line parsing
//! OWNERS: @kernel-team
//! PUBLIC API: CmdlineOptions::parse, ConsoleTarget
//! DEPENDS_ON: diag::log (unknown-token warnings)
//! INVARIANTS: Parsing never fails; unknown tokens are logged and ignored

/// Where the console should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleTarget {
    /// Platform default.
    Default,
    /// The video terminal.
    Tty0,
    /// A legacy serial port.
    Serial {
        /// Port base address.
        port: u16,
        /// Line speed in baud.
        baud: u32,
    },
}

// Port bases of ttyS0..ttyS3.
const SERIAL_BASES: [u16; 4] = [0x3F8, 0x2F8, 0x3E8, 0x2E8];
const DEFAULT_BAUD: u32 = 115_200;

/// Decoded command-line options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdlineOptions {
    /// Verbose diagnostics requested.
    pub debug: bool,
    /// Suppress non-error console output.
    pub quiet: bool,
    /// Boot the recovery environment.
    pub recovery: bool,
    /// Keep the local interrupt controller disabled.
    pub noapic: bool,
    /// Boot a single CPU.
    pub nosmp: bool,
    /// CPU count ceiling.
    pub max_cpus: Option<u32>,
    /// Clamp on usable physical memory, in bytes.
    pub mem_limit: Option<u64>,
    /// Console routing.
    pub console: ConsoleTarget,
}

impl Default for CmdlineOptions {
    fn default() -> Self {
        Self {
            debug: false,
            quiet: false,
            recovery: false,
            noapic: false,
            nosmp: false,
            max_cpus: None,
            mem_limit: None,
            console: ConsoleTarget::Default,
        }
    }
}

impl CmdlineOptions {
    /// Parses a space-separated token list. Unknown or malformed tokens are
    /// logged and ignored; parsing itself cannot fail.
    pub fn parse(cmdline: &str) -> Self {
        let mut options = Self::default();
        for token in cmdline.split_ascii_whitespace() {
            match token {
                "debug" => options.debug = true,
                "quiet" => options.quiet = true,
                "recovery" => options.recovery = true,
                "noapic" => options.noapic = true,
                "nosmp" => options.nosmp = true,
                _ => {
                    if let Some(value) = token.strip_prefix("maxcpus=") {
                        match value.parse::<u32>() {
                            Ok(count) if count > 0 => options.max_cpus = Some(count),
                            _ => log_warn!(target: "boot", "ignoring malformed token '{}'", token),
                        }
                    } else if let Some(value) = token.strip_prefix("mem=") {
                        match parse_mem(value) {
                            Some(bytes) => options.mem_limit = Some(bytes),
                            None => {
                                log_warn!(target: "boot", "ignoring malformed token '{}'", token)
                            }
                        }
                    } else if let Some(value) = token.strip_prefix("console=") {
                        match parse_console(value) {
                            Some(target) => options.console = target,
                            None => {
                                log_warn!(target: "boot", "ignoring malformed token '{}'", token)
                            }
                        }
                    } else {
                        log_warn!(target: "boot", "ignoring unknown token '{}'", token);
                    }
                }
            }
        }
        options
    }
}

fn parse_mem(value: &str) -> Option<u64> {
    let (digits, multiplier) = match value.as_bytes().last()? {
        b'M' | b'm' => (&value[..value.len() - 1], 1u64 << 20),
        b'G' | b'g' => (&value[..value.len() - 1], 1u64 << 30),
        _ => (value, 1),
    };
    let number: u64 = digits.parse().ok()?;
    number.checked_mul(multiplier).filter(|bytes| *bytes > 0)
}

fn parse_console(value: &str) -> Option<ConsoleTarget> {
    if value == "tty0" {
        return Some(ConsoleTarget::Tty0);
    }
    let rest = value.strip_prefix("ttyS")?;
    let (index_str, baud) = match rest.split_once(',') {
        Some((index_str, baud_str)) => (index_str, baud_str.parse().ok()?),
        None => (rest, DEFAULT_BAUD),
    };
    let index: usize = index_str.parse().ok()?;
    let port = *SERIAL_BASES.get(index)?;
    Some(ConsoleTarget::Serial { port, baud })
}
