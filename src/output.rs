// Copyright (c) The difftester Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::ValueEnum;
use serde::Serialize;
use std::{fmt, io};

/// Output formats for `difftester list`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Plain,
    Json,
    JsonPretty,
}

impl OutputFormat {
    /// Writes `value` in this format. Only meaningful for the serializable
    /// formats.
    pub fn write_serializable(
        self,
        value: &impl Serialize,
        mut writer: impl io::Write,
    ) -> io::Result<()> {
        match self {
            OutputFormat::Plain => {
                unreachable!("plain output is written by the caller")
            }
            OutputFormat::Json => serde_json::to_writer(&mut writer, value)?,
            OutputFormat::JsonPretty => serde_json::to_writer_pretty(&mut writer, value)?,
        }
        writeln!(writer)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Plain => write!(f, "plain"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonPretty => write!(f, "json-pretty"),
        }
    }
}
