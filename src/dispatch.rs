// Copyright (c) The difftester Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command dispatch for the difftester CLI.

use crate::{
    aggregator::RunSummary,
    compile,
    config::{HarnessConfig, RunConfiguration, SubjectProject},
    oracle::ReferenceOracle,
    output::OutputFormat,
    reporter::{Color, ReporterOpts, TestReporter},
    runner::TestRunner,
    test_list::{CaseFilter, TestList},
};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use std::{
    io::{self, IsTerminal},
    time::Instant,
};
use termcolor::StandardStream;

/// Differential tester for student compilers.
#[derive(Debug, Parser)]
#[command(version, rename_all = "kebab-case")]
pub struct Opts {
    /// Coloring: always, auto, never
    #[arg(long, value_enum, default_value_t, global = true)]
    color: Color,

    #[command(subcommand)]
    command: Command,
}

impl Opts {
    /// Executes the command, returning the process exit code.
    pub fn exec(self) -> Result<i32> {
        match self.command {
            Command::List {
                shared,
                output_format,
            } => {
                let test_list = scan(&shared)?;
                let writer = StandardStream::stdout(
                    self.color.color_choice(io::stdout().is_terminal()),
                );
                test_list
                    .write(output_format, writer.lock())
                    .wrap_err("failed to write test list")?;
                Ok(0)
            }
            Command::Run {
                shared,
                project_dir,
                jobs,
                reporter_opts,
            } => run(shared, project_dir, jobs, reporter_opts, self.color),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List test cases without running them
    List {
        #[command(flatten)]
        shared: SharedOpts,

        /// Output format
        #[arg(long, value_enum, default_value_t)]
        output_format: OutputFormat,
    },

    /// Build the subject compiler and run every test case
    Run {
        /// Path to the subject compiler project
        project_dir: Utf8PathBuf,

        #[command(flatten)]
        shared: SharedOpts,

        /// Number of concurrent case workers
        #[arg(long, short = 'j')]
        jobs: Option<usize>,

        #[command(flatten)]
        reporter_opts: ReporterOpts,
    },
}

#[derive(Debug, Args)]
#[command(rename_all = "kebab-case")]
struct SharedOpts {
    /// Directory scanned for test libraries
    #[arg(long, short = 't', default_value = "testcases")]
    tests: Utf8PathBuf,

    /// Run only cases whose name contains this substring (repeatable)
    #[arg(long = "match", short = 'm', value_name = "PATTERN")]
    matches: Vec<String>,

    /// Path to difftester.toml
    #[arg(long)]
    config: Option<Utf8PathBuf>,
}

fn scan(shared: &SharedOpts) -> Result<TestList> {
    let filter = CaseFilter::new(shared.matches.iter().cloned());
    TestList::scan(&shared.tests, &filter)
        .wrap_err_with(|| format!("failed to scan `{}`", shared.tests))
}

fn run(
    shared: SharedOpts,
    project_dir: Utf8PathBuf,
    jobs: Option<usize>,
    reporter_opts: ReporterOpts,
    color: Color,
) -> Result<i32> {
    let start_time = Instant::now();

    let harness_config = HarnessConfig::load(shared.config.as_deref())?;
    let subject = SubjectProject::detect(&project_dir)?;
    tracing::debug!(
        "subject language {} targeting {}",
        subject.language,
        subject.object_code
    );
    let config = RunConfiguration::new(project_dir, subject, &harness_config, jobs);

    let test_list = scan(&shared)?;
    let reporter = TestReporter::new(&test_list, color, reporter_opts);

    let build_dir = config.project_dir.join(".difftester");
    let summary = match compile::build_subject(&config, &build_dir) {
        Ok(artifact) => {
            let oracle = ReferenceOracle::new(&config);
            let runner = TestRunner::new(&config, &test_list, &artifact, &oracle);
            runner
                .try_execute(|event| reporter.report_event(event))
                .wrap_err("failed to report results")?
        }
        Err(fatal) => {
            // Nothing can be diffed without the subject artifact.
            tracing::error!("{fatal}");
            RunSummary::fatal(fatal.to_string(), start_time.elapsed())
        }
    };

    Ok(if summary.fatal.is_none() && summary.stats.is_success() {
        0
    } else {
        1
    })
}
