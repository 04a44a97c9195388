// Copyright (c) The difftester Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reports run events to the terminal.

use crate::{
    aggregator::{CaseOutcome, RunStats, Verdict},
    diff::DiffReport,
    process::StageStatus,
    runner::{CancelReason, RunEvent},
    test_list::{TestCase, TestList},
};
use clap::{Args, ValueEnum};
use std::{
    fmt,
    io::{self, IsTerminal},
};
use termcolor::{BufferWriter, ColorChoice, ColorSpec, WriteColor};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum Color {
    Always,
    #[default]
    Auto,
    Never,
}

impl Color {
    pub(crate) fn color_choice(self, stream_is_terminal: bool) -> ColorChoice {
        match self {
            Color::Always => ColorChoice::Always,
            Color::Auto => {
                if stream_is_terminal {
                    ColorChoice::Auto
                } else {
                    ColorChoice::Never
                }
            }
            Color::Never => ColorChoice::Never,
        }
    }
}

/// When to print the detailed diagnostics of a non-passing case.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum FailureOutput {
    #[default]
    Immediate,
    Never,
}

#[derive(Debug, Default, Args)]
#[command(rename_all = "kebab-case")]
pub struct ReporterOpts {
    /// Print diff and diagnostics for failing cases
    #[arg(long, value_enum, default_value_t)]
    failure_output: FailureOutput,
}

/// Writes run events to stdout, one buffered print per event so concurrent
/// completions never interleave mid-line.
pub struct TestReporter {
    stdout: BufferWriter,
    opts: ReporterOpts,
    name_width: usize,
}

impl TestReporter {
    pub fn new(test_list: &TestList, color: Color, opts: ReporterOpts) -> Self {
        let stdout = BufferWriter::stdout(color.color_choice(io::stdout().is_terminal()));
        let name_width = test_list
            .iter_cases()
            .map(|case| case.display_name().len())
            .max()
            .unwrap_or_default();
        Self {
            stdout,
            opts,
            name_width,
        }
    }

    /// Report a run event.
    pub fn report_event(&self, event: RunEvent<'_>) -> io::Result<()> {
        let mut buffer = self.stdout.buffer();
        self.write_event(event, &mut buffer)?;
        self.stdout.print(&buffer)
    }

    // ---
    // Helper methods
    // ---

    fn write_event(&self, event: RunEvent<'_>, mut writer: impl WriteColor) -> io::Result<()> {
        match event {
            RunEvent::RunStarted { test_list } => {
                writer.set_color(&pass_spec())?;
                write!(writer, "{:>12} ", "Starting")?;
                writer.reset()?;

                let count_spec = count_spec();

                writer.set_color(&count_spec)?;
                write!(writer, "{}", test_list.run_count())?;
                writer.reset()?;
                write!(writer, " cases across ")?;
                writer.set_color(&count_spec)?;
                write!(writer, "{}", test_list.library_count())?;
                writer.reset()?;
                write!(writer, " libraries")?;

                let skip_count = test_list.skip_count();
                if skip_count > 0 {
                    write!(writer, " (")?;
                    writer.set_color(&count_spec)?;
                    write!(writer, "{skip_count}")?;
                    writer.reset()?;
                    write!(writer, " skipped)")?;
                }

                writeln!(writer)?;
            }
            RunEvent::CaseStarted { .. } => {}
            RunEvent::CaseFinished { case, outcome } => {
                self.write_verdict_line(case, &outcome, &mut writer)?;

                if outcome.verdict != Verdict::Pass
                    && self.opts.failure_output == FailureOutput::Immediate
                {
                    self.write_failure_detail(&outcome, &mut writer)?;
                }
            }
            RunEvent::CaseSkipped { case } => {
                writer.set_color(&skip_spec())?;
                write!(writer, "{:>12} ", "SKIP")?;
                writer.reset()?;
                // Same spacing as "[   0.034s] ".
                write!(writer, "[         ] ")?;
                self.write_case_name(case, &mut writer)?;
                writeln!(writer)?;
            }
            RunEvent::CaseCancelled { case } => {
                writer.set_color(&skip_spec())?;
                write!(writer, "{:>12} ", "CANCELLED")?;
                writer.reset()?;
                write!(writer, "[         ] ")?;
                self.write_case_name(case, &mut writer)?;
                writeln!(writer)?;
            }
            RunEvent::RunBeginCancel { running, reason } => {
                writer.set_color(&fail_spec())?;
                write!(writer, "{:>12} ", "Canceling")?;
                writer.reset()?;
                write!(writer, "due to ")?;

                writer.set_color(&count_spec())?;
                match reason {
                    CancelReason::Signal => write!(writer, "signal")?,
                    CancelReason::ReportError => write!(writer, "error")?,
                }
                writer.reset()?;
                write!(writer, ", ")?;

                writer.set_color(&count_spec())?;
                write!(writer, "{running}")?;
                writer.reset()?;
                writeln!(writer, " cases still running")?;
            }
            RunEvent::RunFinished { stats, duration } => {
                self.write_summary(stats, duration.as_secs_f64(), &mut writer)?;
            }
        }
        Ok(())
    }

    fn write_verdict_line(
        &self,
        case: &TestCase,
        outcome: &CaseOutcome,
        mut writer: impl WriteColor,
    ) -> io::Result<()> {
        match outcome.verdict {
            Verdict::Pass => writer.set_color(&pass_spec())?,
            Verdict::Fail | Verdict::Error => writer.set_color(&fail_spec())?,
        }
        write!(writer, "{:>12} ", outcome.verdict)?;
        writer.reset()?;

        write!(writer, "[{:>8.3?}s] ", outcome.time_taken.as_secs_f64())?;
        self.write_case_name(case, &mut writer)?;
        writeln!(writer)
    }

    fn write_failure_detail(
        &self,
        outcome: &CaseOutcome,
        mut writer: impl WriteColor,
    ) -> io::Result<()> {
        if let Some(message) = &outcome.message {
            writer.set_color(&fail_output_spec())?;
            writeln!(writer, "    {message}")?;
            writer.reset()?;
        }
        if let Some(diff) = &outcome.diff {
            self.write_diff(diff, &mut writer)?;
        }
        // Surface the diagnostics of the stage that went wrong.
        if let Some(stage) = outcome
            .stages
            .iter()
            .find(|stage| !matches!(stage.status, StageStatus::Exited { code: 0 }))
        {
            if !stage.stderr.trim().is_empty() {
                writer.set_color(&fail_spec())?;
                writeln!(writer, "    --- {} stderr ---", stage.stage)?;
                writer.set_color(&fail_output_spec())?;
                for line in stage.stderr.lines() {
                    writeln!(writer, "    {line}")?;
                }
                writer.reset()?;
            }
        }
        Ok(())
    }

    fn write_diff(&self, diff: &DiffReport, mut writer: impl WriteColor) -> io::Result<()> {
        writer.set_color(&fail_output_spec())?;
        writeln!(
            writer,
            "    output differs: {} actual lines vs {} expected",
            diff.actual_line_count, diff.expected_line_count
        )?;
        writer.reset()?;
        for entry in &diff.mismatches {
            writer.set_color(&count_spec())?;
            write!(writer, "    line {}: ", entry.line)?;
            writer.reset()?;
            writer.set_color(&fail_output_spec())?;
            write!(writer, "actual `{}`", entry.actual)?;
            writer.reset()?;
            writer.set_color(&pass_output_spec())?;
            writeln!(writer, " expected `{}`", entry.expected)?;
            writer.reset()?;
        }
        Ok(())
    }

    fn write_case_name(&self, case: &TestCase, mut writer: impl WriteColor) -> io::Result<()> {
        writer.set_color(&case_name_spec())?;
        write!(
            writer,
            "{:<width$}",
            case.display_name(),
            width = self.name_width
        )?;
        writer.reset()
    }

    fn write_summary(
        &self,
        stats: RunStats,
        elapsed_secs: f64,
        mut writer: impl WriteColor,
    ) -> io::Result<()> {
        let summary_spec = if stats.failed > 0 || stats.errored > 0 {
            fail_spec()
        } else {
            pass_spec()
        };
        writer.set_color(&summary_spec)?;
        write!(writer, "{:>12} ", "Summary")?;
        writer.reset()?;

        write!(writer, "[{elapsed_secs:>8.3}s] ")?;

        let count_spec = count_spec();

        writer.set_color(&count_spec)?;
        write!(writer, "{}", stats.final_run_count)?;
        if stats.final_run_count != stats.initial_run_count {
            write!(writer, "/{}", stats.initial_run_count)?;
        }
        writer.reset()?;
        write!(writer, " cases run: ")?;

        writer.set_color(&count_spec)?;
        write!(writer, "{}", stats.passed)?;
        writer.set_color(&pass_spec())?;
        write!(writer, " passed")?;
        writer.reset()?;

        if stats.failed > 0 {
            write!(writer, ", ")?;
            writer.set_color(&count_spec)?;
            write!(writer, "{}", stats.failed)?;
            writer.set_color(&fail_spec())?;
            write!(writer, " failed")?;
            writer.reset()?;
        }

        if stats.errored > 0 {
            write!(writer, ", ")?;
            writer.set_color(&count_spec)?;
            write!(writer, "{}", stats.errored)?;
            writer.set_color(&fail_spec())?;
            write!(writer, " errored")?;
            writer.reset()?;
        }

        write!(writer, ", ")?;
        writer.set_color(&count_spec)?;
        write!(writer, "{}", stats.skipped)?;
        writer.set_color(&skip_spec())?;
        write!(writer, " skipped")?;
        writer.reset()?;

        if stats.cancelled > 0 {
            write!(writer, ", ")?;
            writer.set_color(&count_spec)?;
            write!(writer, "{}", stats.cancelled)?;
            writer.set_color(&skip_spec())?;
            write!(writer, " cancelled")?;
            writer.reset()?;
        }

        writeln!(writer)
    }
}

impl fmt::Debug for TestReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestReporter")
            .field("stdout", &"BufferWriter { .. }")
            .finish_non_exhaustive()
    }
}

fn count_spec() -> ColorSpec {
    let mut color_spec = ColorSpec::new();
    color_spec.set_bold(true);
    color_spec
}

fn pass_spec() -> ColorSpec {
    let mut color_spec = ColorSpec::new();
    color_spec
        .set_fg(Some(termcolor::Color::Green))
        .set_bold(true);
    color_spec
}

fn pass_output_spec() -> ColorSpec {
    let mut color_spec = ColorSpec::new();
    color_spec.set_fg(Some(termcolor::Color::Green));
    color_spec
}

fn fail_spec() -> ColorSpec {
    let mut color_spec = ColorSpec::new();
    color_spec
        .set_fg(Some(termcolor::Color::Red))
        .set_bold(true);
    color_spec
}

fn fail_output_spec() -> ColorSpec {
    let mut color_spec = ColorSpec::new();
    color_spec.set_fg(Some(termcolor::Color::Red));
    color_spec
}

fn case_name_spec() -> ColorSpec {
    let mut color_spec = ColorSpec::new();
    color_spec
        .set_fg(Some(termcolor::Color::Blue))
        .set_bold(true);
    color_spec
}

fn skip_spec() -> ColorSpec {
    let mut color_spec = ColorSpec::new();
    color_spec
        .set_fg(Some(termcolor::Color::Yellow))
        .set_bold(true);
    color_spec
}
