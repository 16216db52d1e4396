//! Kernel argument collections.
//!
//! [`BootArgs`] is what the boot loader accumulates for the installed
//! system. [`KernelArguments`] is a parsed command line, used to inspect how
//! the installer itself was booted (e.g. whether `fips=1` was requested).

use std::fmt;
use std::fs;

use camino::Utf8Path;

/// Insertion-ordered set of kernel arguments for the installed system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootArgs {
    args: Vec<String>,
}

impl BootArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `arg` unless it is already present. Returns true if it was added.
    pub fn add(&mut self, arg: impl Into<String>) -> bool {
        let arg = arg.into();
        if arg.is_empty() || self.contains(&arg) {
            return false;
        }
        self.args.push(arg);
        true
    }

    /// Adds every argument of `args`, keeping the first occurrence of duplicates.
    pub fn update<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self.add(arg);
        }
    }

    pub fn contains(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(String::as_str)
    }
}

impl fmt::Display for BootArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

/// A parsed kernel command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelArguments {
    entries: Vec<(String, Option<String>)>,
}

impl KernelArguments {
    /// Parses a whitespace-separated command line of `key` and `key=value` items.
    pub fn parse(cmdline: &str) -> Self {
        let entries = cmdline
            .split_whitespace()
            .map(|item| match item.split_once('=') {
                Some((key, value)) => (key.to_string(), Some(value.to_string())),
                None => (item.to_string(), None),
            })
            .collect();
        Self { entries }
    }

    /// Reads and parses a command line file such as `/proc/cmdline`.
    ///
    /// A missing or unreadable file yields an empty argument list.
    pub fn from_file(path: &Utf8Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                tracing::debug!("cannot read kernel command line {}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Returns true if `key` appears on the command line, with or without a value.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Returns the value of the last occurrence of `key`.
    ///
    /// Bare flags have no value and return `None`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
    }
}
