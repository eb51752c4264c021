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

use super::{strip_control, StdoutLogger};
use log::{Level, LevelFilter, Log as _, Record};
use std::borrow::Cow;

#[test]
fn control_characters_removed() {
    assert_eq!(strip_control("hello"), Cow::Borrowed("hello"));
    assert_eq!(strip_control("he\x1b[2Jllo\n"), "he[2Jllo");
}

#[test]
fn format_without_colors() {
    let logger = StdoutLogger {
        level: LevelFilter::Debug,
        enable_colors: false,
    };
    let line = logger.format(
        &Record::builder()
            .args(format_args!("datagram {} dropped", 5))
            .level(Level::Warn)
            .target("fwip_core::interface")
            .build(),
    );
    assert_eq!(line, "[fwip_core::interface] [WARN] datagram 5 dropped");
}

#[test]
fn level_filtering() {
    let logger = StdoutLogger {
        level: LevelFilter::Info,
        enable_colors: false,
    };
    let enabled = |level| {
        logger.enabled(
            &log::Metadata::builder()
                .level(level)
                .target("test")
                .build(),
        )
    };
    assert!(enabled(Level::Error));
    assert!(enabled(Level::Info));
    assert!(!enabled(Level::Debug));
}
