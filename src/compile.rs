// Copyright (c) The difftester Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The compilation stage: builds the subject compiler once per run.
//!
//! Java subjects are compiled with `javac` and packaged into an executable
//! jar; C/C++ subjects are compiled with the reference compiler into a single
//! executable. A failure here is fatal to the run: no case can proceed
//! without the artifact.

use crate::{
    config::{RunConfiguration, SubjectLanguage},
    errors::RunFatalError,
    process::{run_stage, StageCommand},
};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// The built subject compiler, ready to translate cases.
#[derive(Clone, Debug)]
pub enum SubjectArtifact {
    /// An executable jar, run as `java -jar <path>`.
    Jar(Utf8PathBuf),

    /// A native executable, run directly.
    Executable(Utf8PathBuf),
}

/// Builds the subject compiler into `build_dir`.
pub fn build_subject(
    config: &RunConfiguration,
    build_dir: &Utf8Path,
) -> Result<SubjectArtifact, RunFatalError> {
    let src_dir = config.project_src_dir();
    if !src_dir.is_dir() {
        return Err(RunFatalError::new(format!(
            "subject source directory `{src_dir}` does not exist"
        )));
    }
    fs::create_dir_all(build_dir).map_err(|err| {
        RunFatalError::new(format!("failed to create build dir `{build_dir}`: {err}"))
    })?;
    // The artifact path must survive a cwd change: translation runs in a
    // per-case scratch directory.
    let build_dir = build_dir.canonicalize_utf8().map_err(|err| {
        RunFatalError::new(format!("failed to resolve build dir `{build_dir}`: {err}"))
    })?;
    let build_dir = build_dir.as_path();

    match config.subject.language {
        SubjectLanguage::Java => build_java(config, &src_dir, build_dir),
        SubjectLanguage::C | SubjectLanguage::Cpp => build_native(config, &src_dir, build_dir),
    }
}

fn build_java(
    config: &RunConfiguration,
    src_dir: &Utf8Path,
    build_dir: &Utf8Path,
) -> Result<SubjectArtifact, RunFatalError> {
    let sources = collect_sources(src_dir, &["java"])
        .map_err(|err| RunFatalError::new(format!("failed to scan `{src_dir}`: {err}")))?;
    if sources.is_empty() {
        return Err(RunFatalError::new(format!(
            "no .java sources under `{src_dir}`"
        )));
    }

    let classes_dir = build_dir.join("classes");
    fs::create_dir_all(&classes_dir).map_err(|err| {
        RunFatalError::new(format!("failed to create `{classes_dir}`: {err}"))
    })?;

    tracing::info!("compiling {} java sources", sources.len());
    let javac = run_stage(
        &StageCommand::new(
            "subject-build",
            config.tools.javac(),
            config.timeouts.subject_build,
        )
        .args(["-encoding", "UTF-8", "-d"])
        .arg(classes_dir.as_str())
        .args(sources.iter().map(|source| source.as_str())),
    );
    if !javac.status.success() {
        return Err(RunFatalError::from_stage(javac));
    }

    // The subject project's entry point is its `Compiler` class.
    let manifest = build_dir.join("MANIFEST.MF");
    fs::write(&manifest, "Main-Class: Compiler\n").map_err(|err| {
        RunFatalError::new(format!("failed to write `{manifest}`: {err}"))
    })?;

    let jar_path = build_dir.join("Compiler.jar");
    let jar = run_stage(
        &StageCommand::new(
            "subject-build",
            config.tools.jar(),
            config.timeouts.subject_build,
        )
        .arg("cfm")
        .arg(jar_path.as_str())
        .arg(manifest.as_str())
        .arg("-C")
        .arg(classes_dir.as_str())
        .arg("."),
    );
    if !jar.status.success() {
        return Err(RunFatalError::from_stage(jar));
    }

    Ok(SubjectArtifact::Jar(jar_path))
}

fn build_native(
    config: &RunConfiguration,
    src_dir: &Utf8Path,
    build_dir: &Utf8Path,
) -> Result<SubjectArtifact, RunFatalError> {
    let extensions: &[&str] = match config.subject.language {
        SubjectLanguage::C => &["c"],
        // C++ projects routinely mix in C sources.
        SubjectLanguage::Cpp => &["cpp", "c"],
        SubjectLanguage::Java => unreachable!("native build is only for c/cpp"),
    };
    let sources = collect_sources(src_dir, extensions)
        .map_err(|err| RunFatalError::new(format!("failed to scan `{src_dir}`: {err}")))?;
    if sources.is_empty() {
        return Err(RunFatalError::new(format!(
            "no {} sources under `{src_dir}`",
            config.subject.language
        )));
    }

    let exe_path = build_dir.join("Compiler");
    let mut command = StageCommand::new(
        "subject-build",
        config.tools.gcc(),
        config.timeouts.subject_build,
    );
    if config.subject.language == SubjectLanguage::Cpp {
        command = command.arg("-std=c++17");
    }
    tracing::info!(
        "compiling {} {} sources",
        sources.len(),
        config.subject.language
    );
    let gcc = run_stage(
        &command
            .arg("-o")
            .arg(exe_path.as_str())
            .args(sources.iter().map(|source| source.as_str())),
    );
    if !gcc.status.success() {
        return Err(RunFatalError::from_stage(gcc));
    }

    Ok(SubjectArtifact::Executable(exe_path))
}

/// Collects files with the given extensions under `dir`, recursively, in
/// sorted order so repeated builds see identical command lines.
fn collect_sources(dir: &Utf8Path, extensions: &[&str]) -> std::io::Result<Vec<Utf8PathBuf>> {
    let mut sources = Vec::new();
    collect_into(dir, extensions, &mut sources)?;
    sources.sort();
    Ok(sources)
}

fn collect_into(
    dir: &Utf8Path,
    extensions: &[&str],
    sources: &mut Vec<Utf8PathBuf>,
) -> std::io::Result<()> {
    for entry in dir.read_dir_utf8()? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_into(path, extensions, sources)?;
        } else if path
            .extension()
            .is_some_and(|ext| extensions.contains(&ext))
        {
            sources.push(path.to_owned());
        }
    }
    Ok(())
}
