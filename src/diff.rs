// Copyright (c) The difftester Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Line-exact comparison of actual (emulator) and expected (reference)
//! output.
//!
//! Equality is exact per line: no trimming, no numeric tolerance. The
//! reference and subject outputs are expected to be line-for-line identical
//! text, so a whitespace difference is a real bug to surface, not to hide.
//! Every leniency is an explicit [`DiffPolicy`] knob, off by default.

use serde::{Deserialize, Serialize};

/// What to do with trailing blank lines before comparing.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrailingPolicy {
    /// Compare exactly as produced.
    #[default]
    Exact,

    /// Drop trailing blank (empty or whitespace-only) lines from both sides
    /// before the walk.
    IgnoreTrailingBlank,
}

/// How line endings are treated.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NewlinePolicy {
    /// A CR is output like any other byte; `"1\r\n"` and `"1\n"` differ.
    #[default]
    Exact,

    /// Strip a CR preceding each line break before comparing.
    NormalizeCrlf,
}

/// The leniencies in force for a comparison. The default is fully exact.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DiffPolicy {
    #[serde(default)]
    pub trailing: TrailingPolicy,

    #[serde(default)]
    pub newline: NewlinePolicy,
}

/// A single differing line.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MismatchEntry {
    /// 1-based line number.
    pub line: usize,
    pub actual: String,
    pub expected: String,
}

/// The structured result of comparing two outputs.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiffReport {
    pub actual_line_count: usize,
    pub expected_line_count: usize,

    /// Mismatches in line order. A line present on only one side, blank or
    /// not, is reported against an empty counterpart.
    pub mismatches: Vec<MismatchEntry>,
}

impl DiffReport {
    /// Returns true if the outputs were identical under the policy in force.
    pub fn is_match(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Compares two outputs line by line.
///
/// Walks indices `0..max(actual_lines, expected_lines)`. An index where
/// exactly one side is in range is always a mismatch, even if the present
/// line is blank; the absent side is reported as the empty string.
/// `compare(a, a)` always yields an empty mismatch list, and the result
/// depends only on the inputs.
pub fn compare(actual: &str, expected: &str, policy: DiffPolicy) -> DiffReport {
    let mut actual_lines = split_lines(actual, policy.newline);
    let mut expected_lines = split_lines(expected, policy.newline);
    if policy.trailing == TrailingPolicy::IgnoreTrailingBlank {
        drop_trailing_blank(&mut actual_lines);
        drop_trailing_blank(&mut expected_lines);
    }

    let mut mismatches = Vec::new();
    for index in 0..actual_lines.len().max(expected_lines.len()) {
        let actual_line = actual_lines.get(index).copied();
        let expected_line = expected_lines.get(index).copied();
        // One-sided lines never match: a trailing blank line the other side
        // does not have is still an extra line.
        let one_sided = actual_line.is_none() || expected_line.is_none();
        if one_sided || actual_line != expected_line {
            mismatches.push(MismatchEntry {
                line: index + 1,
                actual: actual_line.unwrap_or("").to_owned(),
                expected: expected_line.unwrap_or("").to_owned(),
            });
        }
    }

    DiffReport {
        actual_line_count: actual_lines.len(),
        expected_line_count: expected_lines.len(),
        mismatches,
    }
}

/// Splits into lines.
///
/// A final newline does not introduce a trailing empty line, so `"1\n"` and
/// `"1"` both have one line. An entirely empty text has zero lines.
fn split_lines(text: &str, newline: NewlinePolicy) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let text = text.strip_suffix('\n').unwrap_or(text);
    text.split('\n')
        .map(|line| match newline {
            NewlinePolicy::Exact => line,
            NewlinePolicy::NormalizeCrlf => line.strip_suffix('\r').unwrap_or(line),
        })
        .collect()
}

fn drop_trailing_blank(lines: &mut Vec<&str>) {
    while lines
        .last()
        .is_some_and(|line| line.trim().is_empty())
    {
        lines.pop();
    }
}
