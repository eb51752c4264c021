// Copyright (C) 2019-2020  Pierre Krieger
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Implements the `log` facade by printing logs to stdout.

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::borrow::Cow;

#[cfg(test)]
mod tests;

/// Logger printing every record to stdout.
pub struct StdoutLogger {
    /// Records less severe than this are discarded.
    level: LevelFilter,
    /// If true, enable terminal colors when printing the log messages.
    enable_colors: bool,
}

impl StdoutLogger {
    /// Initializes a logger. Colors are enabled if stdout is a terminal.
    pub fn new(level: LevelFilter) -> Self {
        StdoutLogger {
            level,
            enable_colors: atty::is(atty::Stream::Stdout),
        }
    }

    fn format(&self, record: &Record) -> String {
        let message = record.args().to_string();
        let mut header_style = ansi_term::Style::default();
        if self.enable_colors {
            header_style.is_dimmed = true;
        }
        format!(
            "{}[{}] [{}]{} {}",
            header_style.prefix(),
            record.target(),
            level_tag(record.level()),
            header_style.suffix(),
            strip_control(&message)
        )
    }
}

impl Log for StdoutLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("{}", self.format(record));
        }
    }

    fn flush(&self) {}
}

/// Installs a [`StdoutLogger`] as the global logger.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(StdoutLogger::new(level)))?;
    log::set_max_level(level);
    Ok(())
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERR ",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBG",
        Level::Trace => "TRCE",
    }
}

/// Removes any control character from a log message, in order to prevent it from polluting the
/// terminal.
fn strip_control(message: &str) -> Cow<str> {
    if message.chars().any(|c| c.is_control()) {
        Cow::Owned(message.chars().filter(|c| !c.is_control()).collect())
    } else {
        Cow::Borrowed(message)
    }
}
