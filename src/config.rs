// Copyright (c) The difftester Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Harness configuration: tool locations, per-stage time budgets, and the
//! subject project's own settings.
//!
//! `difftester.toml` is optional; every field has a default that assumes the
//! toolchain is on PATH. The subject project additionally carries a
//! `config.json` declaring its implementation language and object-code
//! target, which selects the driver invocation sequence.

use crate::{diff::DiffPolicy, errors::ConfigError};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::{ffi::OsString, fmt, fs, io, time::Duration};

/// The resolved `difftester.toml`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Number of concurrent workers. Defaults to the available parallelism,
    /// capped because every worker drives several external processes.
    #[serde(default)]
    pub workers: Option<usize>,

    /// Path to the emulator jar. Relative paths are resolved against the
    /// config file's directory.
    #[serde(default)]
    pub emulator_jar: Option<Utf8PathBuf>,

    /// Prelude prepended to each case's source before the reference compile,
    /// e.g. declarations for the subject language's builtin I/O functions.
    #[serde(default)]
    pub c_header: String,

    #[serde(default)]
    pub diff: DiffPolicy,
}

impl HarnessConfig {
    /// Loads the config from `path`, or from `difftester.toml` in the current
    /// directory. A missing file is not an error: the defaults apply.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| Utf8Path::new("difftester.toml"));
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("no config at `{path}`, using defaults");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.to_owned(),
                    err,
                });
            }
        };
        let mut config: HarnessConfig =
            toml::from_str(&contents).map_err(|err| ConfigError::Parse {
                path: path.to_owned(),
                err,
            })?;
        // Anchor the emulator jar to the config file, not the cwd.
        if let (Some(jar), Some(parent)) = (&config.emulator_jar, path.parent()) {
            if jar.is_relative() {
                config.emulator_jar = Some(parent.join(jar));
            }
        }
        Ok(config)
    }
}

/// External tool locations. Empty fields fall back to PATH lookup.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ToolsConfig {
    /// JDK installation directory; `java`, `javac` and `jar` are taken from
    /// its `bin/` if set.
    #[serde(default)]
    pub jdk_home: Option<Utf8PathBuf>,

    /// The reference C/C++ compiler.
    #[serde(default)]
    pub gcc: Option<Utf8PathBuf>,
}

impl ToolsConfig {
    pub fn java(&self) -> OsString {
        self.jdk_tool("java")
    }

    pub fn javac(&self) -> OsString {
        self.jdk_tool("javac")
    }

    pub fn jar(&self) -> OsString {
        self.jdk_tool("jar")
    }

    pub fn gcc(&self) -> OsString {
        match &self.gcc {
            Some(path) => path.as_str().into(),
            None => "g++".into(),
        }
    }

    fn jdk_tool(&self, name: &str) -> OsString {
        match &self.jdk_home {
            Some(home) => home.join("bin").join(name).as_str().into(),
            None => name.into(),
        }
    }
}

/// Per-stage time budgets.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TimeoutsConfig {
    /// Building the subject compiler itself (javac+jar, or gcc).
    #[serde(with = "humantime_serde", default = "default_subject_build")]
    pub subject_build: Duration,

    /// One subject-compiler invocation translating a case to target code.
    #[serde(with = "humantime_serde", default = "default_translate")]
    pub translate: Duration,

    /// One emulator run over the generated target code.
    #[serde(with = "humantime_serde", default = "default_emulate")]
    pub emulate: Duration,

    /// One reference-toolchain compile.
    #[serde(with = "humantime_serde", default = "default_reference_compile")]
    pub reference_compile: Duration,

    /// One reference-binary run.
    #[serde(with = "humantime_serde", default = "default_reference_run")]
    pub reference_run: Duration,
}

fn default_subject_build() -> Duration {
    Duration::from_secs(120)
}
fn default_translate() -> Duration {
    Duration::from_secs(60)
}
fn default_emulate() -> Duration {
    Duration::from_secs(10)
}
fn default_reference_compile() -> Duration {
    Duration::from_secs(30)
}
fn default_reference_run() -> Duration {
    Duration::from_secs(120)
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            subject_build: default_subject_build(),
            translate: default_translate(),
            emulate: default_emulate(),
            reference_compile: default_reference_compile(),
            reference_run: default_reference_run(),
        }
    }
}

/// The language the subject compiler is written in. Closed set: the driver
/// invocation sequence is fixed per variant.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SubjectLanguage {
    Java,
    C,
    Cpp,
}

impl SubjectLanguage {
    fn parse(language: &str) -> Result<Self, ConfigError> {
        match language.to_lowercase().as_str() {
            "java" => Ok(SubjectLanguage::Java),
            "c" => Ok(SubjectLanguage::C),
            "cpp" | "c++" => Ok(SubjectLanguage::Cpp),
            other => Err(ConfigError::UnsupportedLanguage {
                language: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for SubjectLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectLanguage::Java => write!(f, "java"),
            SubjectLanguage::C => write!(f, "c"),
            SubjectLanguage::Cpp => write!(f, "cpp"),
        }
    }
}

/// The subject project's own `config.json`.
#[derive(Clone, Debug, Deserialize)]
struct SubjectProjectFile {
    #[serde(rename = "programming language", default = "default_language")]
    language: String,

    #[serde(rename = "object code", default = "default_object_code")]
    object_code: String,
}

fn default_language() -> String {
    "java".to_owned()
}
fn default_object_code() -> String {
    "mips".to_owned()
}

/// The subject project's declared language and object-code target.
#[derive(Clone, Debug)]
pub struct SubjectProject {
    pub language: SubjectLanguage,
    pub object_code: String,
}

impl SubjectProject {
    /// Reads `<project>/src/config.json`, falling back to
    /// `<project>/config.json`, falling back to a Java/mips default.
    pub fn detect(project_dir: &Utf8Path) -> Result<Self, ConfigError> {
        let candidates = [
            project_dir.join("src").join("config.json"),
            project_dir.join("config.json"),
        ];
        for path in candidates {
            let Ok(contents) = fs::read_to_string(&path) else {
                continue;
            };
            let file: SubjectProjectFile =
                serde_json::from_str(&contents).map_err(|err| ConfigError::SubjectProject {
                    path: path.clone(),
                    err,
                })?;
            return Ok(Self {
                language: SubjectLanguage::parse(&file.language)?,
                object_code: file.object_code.to_lowercase(),
            });
        }

        tracing::warn!("no config.json in `{project_dir}`, assuming a Java subject");
        Ok(Self {
            language: SubjectLanguage::Java,
            object_code: default_object_code(),
        })
    }
}

/// Everything a run needs, fully resolved. Immutable for the duration of the
/// run and owned by the scheduler.
#[derive(Clone, Debug)]
pub struct RunConfiguration {
    /// The subject compiler project directory.
    pub project_dir: Utf8PathBuf,

    /// The subject project's language and target.
    pub subject: SubjectProject,

    pub tools: ToolsConfig,
    pub timeouts: TimeoutsConfig,

    /// Bounded worker count for the scheduler.
    pub workers: usize,

    /// Resolved path to the emulator jar.
    pub emulator_jar: Utf8PathBuf,

    /// Reference-compile prelude.
    pub c_header: String,

    /// Diff leniency policy.
    pub diff: DiffPolicy,
}

impl RunConfiguration {
    pub fn new(
        project_dir: Utf8PathBuf,
        subject: SubjectProject,
        config: &HarnessConfig,
        jobs: Option<usize>,
    ) -> Self {
        let workers = jobs
            .or(config.workers)
            .unwrap_or_else(default_workers)
            .max(1);
        let emulator_jar = config
            .emulator_jar
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from("Mars.jar"));
        Self {
            project_dir,
            subject,
            tools: config.tools.clone(),
            timeouts: config.timeouts.clone(),
            workers,
            emulator_jar: absolutize(emulator_jar),
            c_header: config.c_header.clone(),
            diff: config.diff,
        }
    }

    /// The directory containing the subject compiler's sources.
    pub fn project_src_dir(&self) -> Utf8PathBuf {
        let src = self.project_dir.join("src");
        if src.is_dir() {
            src
        } else {
            self.project_dir.clone()
        }
    }
}

/// Default worker count: the physical parallelism, capped because each worker
/// holds several emulator/toolchain processes alive at once.
fn default_workers() -> usize {
    num_cpus::get().clamp(1, 8)
}

/// Anchors a relative path to the current directory. The emulator is invoked
/// from a per-case scratch directory, so a relative jar path would not
/// resolve there.
fn absolutize(path: Utf8PathBuf) -> Utf8PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir().map(Utf8PathBuf::from_path_buf) {
        Ok(Ok(cwd)) => cwd.join(path),
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{NewlinePolicy, TrailingPolicy};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn config_defaults() {
        let config: HarnessConfig = toml::from_str("").expect("empty config is valid");
        assert_eq!(config.workers, None);
        assert_eq!(config.timeouts.emulate, Duration::from_secs(10));
        assert_eq!(config.diff.trailing, TrailingPolicy::Exact);
        assert_eq!(config.diff.newline, NewlinePolicy::Exact);
        assert_eq!(config.tools.gcc(), OsString::from("g++"));
        assert_eq!(config.tools.javac(), OsString::from("javac"));
    }

    #[test]
    fn config_parses_durations_and_tools() {
        let config: HarnessConfig = toml::from_str(indoc! {r##"
            workers = 6
            emulator-jar = "vendor/Mars.jar"
            c-header = "#include <stdio.h>"

            [tools]
            jdk-home = "/opt/jdk-17"
            gcc = "/usr/bin/g++-12"

            [timeouts]
            emulate = "500ms"
            subject-build = "3m"

            [diff]
            trailing = "ignore-trailing-blank"
            newline = "normalize-crlf"
        "##})
        .expect("config is valid");

        assert_eq!(config.workers, Some(6));
        assert_eq!(config.timeouts.emulate, Duration::from_millis(500));
        assert_eq!(config.timeouts.subject_build, Duration::from_secs(180));
        // Unset timeouts keep their defaults.
        assert_eq!(config.timeouts.translate, Duration::from_secs(60));
        assert_eq!(config.tools.java(), OsString::from("/opt/jdk-17/bin/java"));
        assert_eq!(config.tools.gcc(), OsString::from("/usr/bin/g++-12"));
        assert_eq!(config.diff.trailing, TrailingPolicy::IgnoreTrailingBlank);
        assert_eq!(config.diff.newline, NewlinePolicy::NormalizeCrlf);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = toml::from_str::<HarnessConfig>("max-workers = 4").unwrap_err();
        assert!(
            err.to_string().contains("max-workers"),
            "misspelled keys are reported, got: {err}"
        );
    }

    #[test]
    fn subject_language_parse() {
        assert_eq!(
            SubjectLanguage::parse("Java").unwrap(),
            SubjectLanguage::Java
        );
        assert_eq!(SubjectLanguage::parse("CPP").unwrap(), SubjectLanguage::Cpp);
        assert!(SubjectLanguage::parse("rust").is_err());
    }

    #[test]
    fn subject_project_file_keys() {
        let file: SubjectProjectFile =
            serde_json::from_str(r#"{"programming language": "c", "object code": "MIPS"}"#)
                .expect("valid project config");
        assert_eq!(SubjectLanguage::parse(&file.language).unwrap(), SubjectLanguage::C);
        assert_eq!(file.object_code.to_lowercase(), "mips");
    }

    #[test]
    fn run_configuration_worker_resolution() {
        let config = HarnessConfig {
            workers: Some(3),
            ..HarnessConfig::default()
        };
        let subject = SubjectProject {
            language: SubjectLanguage::Java,
            object_code: "mips".to_owned(),
        };
        let run = RunConfiguration::new("proj".into(), subject.clone(), &config, None);
        assert_eq!(run.workers, 3, "config value applies");

        let run = RunConfiguration::new("proj".into(), subject.clone(), &config, Some(5));
        assert_eq!(run.workers, 5, "--jobs overrides the config");

        let run = RunConfiguration::new("proj".into(), subject, &config, Some(0));
        assert_eq!(run.workers, 1, "worker count is at least one");
    }
}
