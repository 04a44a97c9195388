// Copyright (c) The difftester Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by difftester.

use crate::process::StageResult;
use camino::Utf8PathBuf;
use thiserror::Error;

/// The subject compiler could not be built.
///
/// This is the only run-level error: nothing can be tested without the
/// subject artifact, so the run is finalized with zero attempted cases and a
/// fatal flag. All per-case failures are contained to their case instead.
#[derive(Debug, Error)]
#[error("subject compiler build failed: {message}")]
pub struct RunFatalError {
    /// What went wrong, including captured compiler diagnostics.
    pub message: String,

    /// The stage result that caused the failure, if a process was involved.
    pub stage: Option<StageResult>,
}

impl RunFatalError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stage: None,
        }
    }

    pub(crate) fn from_stage(stage: StageResult) -> Self {
        let mut message = stage.failure_summary();
        if !stage.stderr.is_empty() {
            message.push('\n');
            message.push_str(stage.stderr.trim_end());
        }
        Self {
            message,
            stage: Some(stage),
        }
    }
}

/// An error that occurred while loading the harness configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at `{path}`")]
    Read {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("failed to parse config at `{path}`")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },

    #[error("failed to parse subject project config at `{path}`")]
    SubjectProject {
        path: Utf8PathBuf,
        #[source]
        err: serde_json::Error,
    },

    #[error("unsupported subject language `{language}` (supported: java, c, cpp)")]
    UnsupportedLanguage { language: String },
}

/// An error that occurred while scanning test libraries.
#[derive(Debug, Error)]
pub enum TestListError {
    #[error("test directory `{path}` does not exist")]
    MissingRoot { path: Utf8PathBuf },

    #[error("failed to read test directory `{path}`")]
    ReadDir {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
}

/// The reference pipeline failed to produce an expected output.
///
/// This is deliberately not a verdict: a broken reference toolchain must be
/// distinguishable from a subject-compiler bug, so it maps to ERROR and never
/// to FAIL.
#[derive(Clone, Debug, Error)]
pub enum OracleFailure {
    #[error("failed to read test case `{path}`: {message}")]
    CaseRead { path: Utf8PathBuf, message: String },

    #[error("reference pipeline failed: {}", .stage.failure_summary())]
    Stage { stage: StageResult },

    #[error("failed to prepare reference scratch directory: {message}")]
    Scratch { message: String },
}
