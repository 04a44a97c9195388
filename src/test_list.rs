// Copyright (c) The difftester Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test case repository: libraries of `testfile<N>`/`input<N>` pairs
//! discovered by scanning a directory tree.

use crate::{errors::TestListError, output::OutputFormat};
use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::io;
use termcolor::{ColorSpec, WriteColor};

/// A filter over case display names, matched as case-insensitive substrings.
///
/// An empty filter matches everything.
#[derive(Clone, Debug, Default)]
pub struct CaseFilter {
    patterns: Vec<String>,
}

impl CaseFilter {
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_match(&self, display_name: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let lowered = display_name.to_lowercase();
        self.patterns.iter().any(|p| lowered.contains(p))
    }
}

/// A single test case: subject-language source plus optional program input.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestCase {
    /// Name of the owning library (relative directory path).
    pub library: String,

    /// Numeric suffix shared by the source and input files.
    pub id: u32,

    /// Path to the subject-language source file.
    pub source: Utf8PathBuf,

    /// Path to the input file, if one exists. Absent means no stdin.
    pub input: Option<Utf8PathBuf>,

    /// Whether this case matched the run's filter. Non-matching cases are
    /// reported as skipped rather than executed.
    pub filter_match: bool,
}

impl TestCase {
    /// The name this case is reported under, e.g. `pretest/A/testfile3`.
    pub fn display_name(&self) -> String {
        if self.library.is_empty() {
            format!("testfile{}", self.id)
        } else {
            format!("{}/testfile{}", self.library, self.id)
        }
    }
}

/// A directory of test cases, ordered by case id.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestLibrary {
    /// Library name, derived from the directory path relative to the scan
    /// root. The root itself is the library with the empty name.
    pub name: String,
    pub cases: Vec<TestCase>,
}

/// All test libraries discovered under a scan root. Immutable during a run.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestList {
    test_count: usize,
    libraries: Vec<TestLibrary>,
    // Computed on first access.
    #[serde(skip)]
    skip_count: OnceCell<usize>,
}

impl TestList {
    /// Scans `root` recursively for `testfile<N>`/`input<N>` pairs.
    ///
    /// Libraries are visited in sorted path order and cases in id order, so
    /// the submission order of a run is stable across repeated scans.
    pub fn scan(root: &Utf8Path, filter: &CaseFilter) -> Result<Self, TestListError> {
        if !root.is_dir() {
            return Err(TestListError::MissingRoot {
                path: root.to_owned(),
            });
        }

        let mut libraries = Vec::new();
        scan_dir(root, root, filter, &mut libraries)?;

        let test_count = libraries.iter().map(|lib| lib.cases.len()).sum();
        Ok(Self {
            test_count,
            libraries,
            skip_count: OnceCell::new(),
        })
    }

    /// Builds a list from pre-assembled libraries; used by tests.
    pub fn new_with_libraries(libraries: Vec<TestLibrary>) -> Self {
        let test_count = libraries.iter().map(|lib| lib.cases.len()).sum();
        Self {
            test_count,
            libraries,
            skip_count: OnceCell::new(),
        }
    }

    /// Total number of cases, including filtered-out ones.
    pub fn test_count(&self) -> usize {
        self.test_count
    }

    /// Number of cases that will be skipped due to the filter.
    pub fn skip_count(&self) -> usize {
        *self.skip_count.get_or_init(|| {
            self.iter_cases().filter(|case| !case.filter_match).count()
        })
    }

    /// Number of cases that will actually run.
    ///
    /// It is always the case that `run_count + skip_count == test_count`.
    pub fn run_count(&self) -> usize {
        self.test_count - self.skip_count()
    }

    pub fn library_count(&self) -> usize {
        self.libraries.len()
    }

    /// Iterates over libraries in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &TestLibrary> + '_ {
        self.libraries.iter()
    }

    /// Iterates over all cases in submission order.
    pub fn iter_cases(&self) -> impl Iterator<Item = &TestCase> + '_ {
        self.libraries.iter().flat_map(|lib| lib.cases.iter())
    }

    /// Outputs this list to the given writer.
    pub fn write(
        &self,
        output_format: OutputFormat,
        writer: impl WriteColor,
    ) -> io::Result<()> {
        match output_format {
            OutputFormat::Plain => self.write_plain(writer),
            OutputFormat::Json | OutputFormat::JsonPretty => {
                output_format.write_serializable(self, writer)
            }
        }
    }

    fn write_plain(&self, mut writer: impl WriteColor) -> io::Result<()> {
        for library in &self.libraries {
            writer.set_color(&library_spec())?;
            if library.name.is_empty() {
                write!(writer, ".")?;
            } else {
                write!(writer, "{}", library.name)?;
            }
            writer.reset()?;
            writeln!(writer, ":")?;

            for case in &library.cases {
                writer.set_color(&case_spec())?;
                write!(writer, "    testfile{}", case.id)?;
                writer.reset()?;
                if case.input.is_some() {
                    write!(writer, " (with input)")?;
                }
                if !case.filter_match {
                    write!(writer, " (skipped)")?;
                }
                writeln!(writer)?;
            }
        }
        Ok(())
    }
}

fn scan_dir(
    root: &Utf8Path,
    dir: &Utf8Path,
    filter: &CaseFilter,
    libraries: &mut Vec<TestLibrary>,
) -> Result<(), TestListError> {
    let mut subdirs = Vec::new();
    let mut sources = Vec::new();
    let mut inputs = Vec::new();

    let entries = dir.read_dir_utf8().map_err(|err| TestListError::ReadDir {
        path: dir.to_owned(),
        err,
    })?;
    for entry in entries {
        let entry = entry.map_err(|err| TestListError::ReadDir {
            path: dir.to_owned(),
            err,
        })?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|err| TestListError::ReadDir {
            path: dir.to_owned(),
            err,
        })?;
        if file_type.is_dir() {
            // Scratch directories are never test libraries.
            if !path.file_name().is_some_and(|name| name.starts_with('.')) {
                subdirs.push(path.to_owned());
            }
        } else if let Some(name) = path.file_name() {
            if let Some(id) = parse_case_id(name, "testfile") {
                sources.push((id, path.to_owned()));
            } else if let Some(id) = parse_case_id(name, "input") {
                inputs.push((id, path.to_owned()));
            }
        }
    }

    if !sources.is_empty() {
        let library_name = dir
            .strip_prefix(root)
            .unwrap_or(Utf8Path::new(""))
            .as_str()
            .to_owned();
        sources.sort_by_key(|(id, _)| *id);
        let cases = sources
            .into_iter()
            .map(|(id, source)| {
                let input = inputs
                    .iter()
                    .find(|(input_id, _)| *input_id == id)
                    .map(|(_, path)| path.clone());
                let mut case = TestCase {
                    library: library_name.clone(),
                    id,
                    source,
                    input,
                    filter_match: false,
                };
                case.filter_match = filter.is_match(&case.display_name());
                case
            })
            .collect();
        libraries.push(TestLibrary {
            name: library_name,
            cases,
        });
    }

    subdirs.sort();
    for subdir in subdirs {
        scan_dir(root, &subdir, filter, libraries)?;
    }
    Ok(())
}

/// Parses `<prefix><N>` or `<prefix><N>.txt` into `N`.
fn parse_case_id(file_name: &str, prefix: &str) -> Option<u32> {
    let rest = file_name.strip_prefix(prefix)?;
    let digits = rest.strip_suffix(".txt").unwrap_or(rest);
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

fn library_spec() -> ColorSpec {
    let mut color_spec = ColorSpec::new();
    color_spec
        .set_fg(Some(termcolor::Color::Magenta))
        .set_bold(true);
    color_spec
}

fn case_spec() -> ColorSpec {
    let mut color_spec = ColorSpec::new();
    color_spec
        .set_fg(Some(termcolor::Color::Blue))
        .set_bold(true);
    color_spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn parse_case_ids() {
        assert_eq!(parse_case_id("testfile1", "testfile"), Some(1));
        assert_eq!(parse_case_id("testfile12.txt", "testfile"), Some(12));
        assert_eq!(parse_case_id("input3", "input"), Some(3));
        assert_eq!(parse_case_id("testfile", "testfile"), None);
        assert_eq!(parse_case_id("testfileA", "testfile"), None);
        assert_eq!(parse_case_id("mips.txt", "testfile"), None);
    }

    #[test]
    fn scan_pairs_sources_with_inputs() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let lib = dir.path().join("A");
        fs::create_dir(&lib).unwrap();
        fs::write(lib.join("testfile1.txt"), "int main() { return 0; }").unwrap();
        fs::write(lib.join("input1.txt"), "4 2").unwrap();
        fs::write(lib.join("testfile2.txt"), "int main() { return 1; }").unwrap();
        // Stray files are ignored.
        fs::write(lib.join("notes.md"), "scratch").unwrap();

        let list = TestList::scan(dir.path(), &CaseFilter::default()).expect("scan succeeded");
        assert_eq!(list.test_count(), 2);
        assert_eq!(list.library_count(), 1);

        let cases: Vec<_> = list.iter_cases().collect();
        assert_eq!(cases[0].id, 1);
        assert_eq!(cases[0].display_name(), "A/testfile1");
        assert!(cases[0].input.is_some());
        assert_eq!(cases[1].id, 2);
        assert_eq!(cases[1].input, None);
    }

    #[test]
    fn scan_orders_cases_numerically() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        for id in [10, 2, 1] {
            fs::write(dir.path().join(format!("testfile{}.txt", id)), "x").unwrap();
        }
        let list = TestList::scan(dir.path(), &CaseFilter::default()).expect("scan succeeded");
        let ids: Vec<_> = list.iter_cases().map(|case| case.id).collect();
        assert_eq!(ids, vec![1, 2, 10], "numeric, not lexicographic, order");
    }

    #[test]
    fn filter_marks_skipped_cases() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        for name in ["A", "B"] {
            let lib = dir.path().join(name);
            fs::create_dir(&lib).unwrap();
            fs::write(lib.join("testfile1.txt"), "x").unwrap();
        }

        let filter = CaseFilter::new(["a/"]);
        let list = TestList::scan(dir.path(), &filter).expect("scan succeeded");
        assert_eq!(list.test_count(), 2);
        assert_eq!(list.run_count(), 1);
        assert_eq!(list.skip_count(), 1);
    }

    #[test]
    fn empty_filter_matches_all() {
        let filter = CaseFilter::new(Vec::<String>::new());
        assert!(filter.is_match("anything"));
        let filter = CaseFilter::new(["", "B"]);
        assert!(filter.is_match("b/testfile1"), "matching is case-insensitive");
        assert!(!filter.is_match("a/testfile1"));
    }
}
