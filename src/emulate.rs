// Copyright (c) The difftester Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The emulation stage: translate a case with the subject compiler, then run
//! the generated target code on the emulator.
//!
//! Each case gets an exclusive scratch directory, so concurrent workers never
//! clobber each other's `testfile.txt`/`mips.txt`. The directory is removed
//! when the case finishes.

use crate::{
    compile::SubjectArtifact,
    config::RunConfiguration,
    process::{run_stage, StageCommand, StageResult, StageStatus},
    test_list::TestCase,
};
use camino_tempfile::Builder;
use std::fs;

/// Fixed filenames of the subject compiler's contract: it reads `testfile.txt`
/// from its working directory and writes target assembly to `mips.txt`.
const SOURCE_FILE: &str = "testfile.txt";
const TARGET_FILE: &str = "mips.txt";

/// A completed emulation pipeline: both sub-stages ran to completion.
#[derive(Clone, Debug)]
pub struct EmulationRun {
    /// The emulator's stdout; the "actual" side of the diff.
    pub actual: String,
    pub stages: Vec<StageResult>,
}

/// The pipeline stopped before producing an actual output.
#[derive(Clone, Debug)]
pub struct EmulationFailure {
    pub message: String,
    pub stages: Vec<StageResult>,
}

/// Runs the two ordered sub-stages for one case.
///
/// If translation fails, the emulator is not invoked and the failure carries
/// the translation diagnostics.
pub fn execute(
    artifact: &SubjectArtifact,
    case: &TestCase,
    config: &RunConfiguration,
) -> Result<EmulationRun, EmulationFailure> {
    let scratch = Builder::new()
        .prefix("difftester-case-")
        .tempdir()
        .map_err(|err| EmulationFailure {
            message: format!("failed to create scratch directory: {err}"),
            stages: Vec::new(),
        })?;

    let source = fs::read_to_string(&case.source).map_err(|err| EmulationFailure {
        message: format!("failed to read `{}`: {err}", case.source),
        stages: Vec::new(),
    })?;
    // The subject compiler reads the fixed filename, with unix line endings.
    fs::write(scratch.path().join(SOURCE_FILE), source.replace("\r\n", "\n")).map_err(
        |err| EmulationFailure {
            message: format!("failed to stage `{SOURCE_FILE}`: {err}"),
            stages: Vec::new(),
        },
    )?;

    // Sub-stage 1: source -> target assembly.
    let translate = match artifact {
        SubjectArtifact::Jar(jar) => {
            StageCommand::new("translate", config.tools.java(), config.timeouts.translate)
                .arg("-jar")
                .arg(jar.as_str())
        }
        SubjectArtifact::Executable(exe) => {
            StageCommand::new("translate", exe.as_str(), config.timeouts.translate)
        }
    };
    let translate = run_stage(&translate.cwd(scratch.path().to_owned()));
    if !translate.status.success() {
        let message = translate.failure_summary();
        return Err(EmulationFailure {
            message,
            stages: vec![translate],
        });
    }
    let target = scratch.path().join(TARGET_FILE);
    if !target.is_file() {
        return Err(EmulationFailure {
            message: format!("subject compiler exited 0 but produced no `{TARGET_FILE}`"),
            stages: vec![translate],
        });
    }

    // Sub-stage 2: run the target code on the emulator.
    let mut emulate = StageCommand::new("emulate", config.tools.java(), config.timeouts.emulate)
        .arg("-jar")
        .arg(config.emulator_jar.as_str())
        .arg("nc")
        .arg(TARGET_FILE)
        .cwd(scratch.path().to_owned());
    if let Some(input_path) = &case.input {
        let input = fs::read_to_string(input_path).map_err(|err| EmulationFailure {
            message: format!("failed to read `{input_path}`: {err}"),
            stages: vec![translate.clone()],
        })?;
        emulate = emulate.stdin(input);
    }
    let emulate = run_stage(&emulate);

    // The emulated program's exit code mirrors its main() return value, so
    // any completed run counts; only timeout/crash/missing-tool stop the
    // pipeline.
    match emulate.status {
        StageStatus::Exited { .. } => Ok(EmulationRun {
            actual: emulate.stdout.clone(),
            stages: vec![translate, emulate],
        }),
        _ => {
            let message = emulate.failure_summary();
            Err(EmulationFailure {
                message,
                stages: vec![translate, emulate],
            })
        }
    }
}
