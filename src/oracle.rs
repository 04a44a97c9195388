// Copyright (c) The difftester Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The reference oracle: computes trusted expected outputs by compiling and
//! running each case with the native reference toolchain, caching results by
//! content fingerprint.

use crate::{
    config::RunConfiguration,
    errors::OracleFailure,
    process::{run_stage, StageCommand, StageStatus},
    test_list::TestCase,
};
use camino_tempfile::Builder;
use once_cell::sync::OnceCell;
use std::{
    collections::HashMap,
    fs,
    sync::{Arc, Mutex},
};
use xxhash_rust::xxh3::Xxh3;

/// Content fingerprint of a test case.
///
/// Covers the source and the input: the expected output depends on both, so
/// an edit to either must invalidate the cached entry. Two cases with
/// identical content hash to the same fingerprint and share one computation.
pub fn fingerprint(source: &str, input: Option<&str>) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(source.as_bytes());
    // Separator so ("ab", "") and ("a", "b") differ.
    hasher.update(&[0]);
    if let Some(input) = input {
        hasher.update(input.as_bytes());
    }
    hasher.digest()
}

/// Expected-output cache with per-key compute-once semantics.
///
/// Each fingerprint owns a `OnceCell`; concurrent workers asking for the same
/// fingerprint block on one computation instead of racing duplicate native
/// compiles. Failures are not stored, so a transiently broken toolchain does
/// not poison the cache.
#[derive(Debug, Default)]
pub struct ExpectedCache {
    entries: Mutex<HashMap<u64, Arc<OnceCell<Arc<str>>>>>,
}

impl ExpectedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `fingerprint`, computing it at most once
    /// across all threads.
    pub fn get_or_compute(
        &self,
        fingerprint: u64,
        compute: impl FnOnce() -> Result<Arc<str>, OracleFailure>,
    ) -> Result<Arc<str>, OracleFailure> {
        let cell = {
            let mut entries = self.entries.lock().expect("cache lock poisoned");
            Arc::clone(entries.entry(fingerprint).or_default())
        };
        // The entry lock is held only for the map access; the (possibly slow)
        // computation serializes per cell, not across the whole cache.
        cell.get_or_try_init(compute).cloned()
    }

    /// Number of cached entries; used by tests.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .values()
            .filter(|cell| cell.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Computes expected outputs with the reference toolchain.
pub struct ReferenceOracle {
    cache: ExpectedCache,
    gcc: std::ffi::OsString,
    c_header: String,
    compile_timeout: std::time::Duration,
    run_timeout: std::time::Duration,
}

impl ReferenceOracle {
    pub fn new(config: &RunConfiguration) -> Self {
        Self {
            cache: ExpectedCache::new(),
            gcc: config.tools.gcc(),
            c_header: config.c_header.clone(),
            compile_timeout: config.timeouts.reference_compile,
            run_timeout: config.timeouts.reference_run,
        }
    }

    /// Returns the expected output for `case`.
    ///
    /// On a cache hit this performs zero process invocations. On a miss it
    /// compiles the case's source with the reference compiler and runs the
    /// resulting binary with the case's input.
    pub fn expected_output(&self, case: &TestCase) -> Result<Arc<str>, OracleFailure> {
        let source = read_case_file(&case.source)?;
        let input = match &case.input {
            Some(path) => Some(read_case_file(path)?),
            None => None,
        };
        let fp = fingerprint(&source, input.as_deref());
        self.cache
            .get_or_compute(fp, || self.compute(&source, input.as_deref()))
    }

    fn compute(&self, source: &str, input: Option<&str>) -> Result<Arc<str>, OracleFailure> {
        let scratch = Builder::new()
            .prefix("difftester-ref-")
            .tempdir()
            .map_err(|err| OracleFailure::Scratch {
                message: err.to_string(),
            })?;

        let ref_source = scratch.path().join("ref.c");
        let ref_binary = scratch.path().join("ref");
        let mut full_source = self.c_header.clone();
        if !full_source.is_empty() && !full_source.ends_with('\n') {
            full_source.push('\n');
        }
        full_source.push_str(source);
        fs::write(&ref_source, &full_source).map_err(|err| OracleFailure::Scratch {
            message: err.to_string(),
        })?;

        let compile = run_stage(
            &StageCommand::new("reference-compile", &self.gcc, self.compile_timeout)
                .arg(ref_source.as_str())
                .arg("-o")
                .arg(ref_binary.as_str()),
        );
        if !compile.status.success() {
            return Err(OracleFailure::Stage { stage: compile });
        }

        let mut run = StageCommand::new("reference-run", ref_binary.as_str(), self.run_timeout);
        if let Some(input) = input {
            run = run.stdin(input);
        }
        let run = run_stage(&run);
        // The subject language's main returns an int, so a nonzero exit code
        // is a legitimate program result; only an incomplete run is a
        // failure.
        match run.status {
            StageStatus::Exited { .. } => Ok(Arc::from(run.stdout.as_str())),
            _ => Err(OracleFailure::Stage { stage: run }),
        }
    }
}

impl std::fmt::Debug for ReferenceOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceOracle")
            .field("cache", &self.cache)
            .field("gcc", &self.gcc)
            .finish_non_exhaustive()
    }
}

fn read_case_file(path: &camino::Utf8Path) -> Result<String, OracleFailure> {
    fs::read_to_string(path).map_err(|err| OracleFailure::CaseRead {
        path: path.to_owned(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fingerprint_covers_source_and_input() {
        let base = fingerprint("int main() {}", None);
        assert_eq!(base, fingerprint("int main() {}", None), "deterministic");
        assert_ne!(base, fingerprint("int main() { }", None), "source edits invalidate");
        assert_ne!(base, fingerprint("int main() {}", Some("1")), "input edits invalidate");
        assert_ne!(
            fingerprint("ab", None),
            fingerprint("a", Some("b")),
            "source/input boundary is part of the hash"
        );
    }

    #[test]
    fn cache_computes_once_per_fingerprint() {
        let cache = ExpectedCache::new();
        let invocations = AtomicUsize::new(0);

        let first = cache
            .get_or_compute(7, || {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::from("42\n"))
            })
            .unwrap();
        let second = cache
            .get_or_compute(7, || {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::from("should not run"))
            })
            .unwrap();

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(&*first, "42\n");
        assert_eq!(first, second);
    }

    #[test]
    fn cache_computes_once_across_threads() {
        let cache = Arc::new(ExpectedCache::new());
        let invocations = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let invocations = Arc::clone(&invocations);
                std::thread::spawn(move || {
                    cache
                        .get_or_compute(99, || {
                            invocations.fetch_add(1, Ordering::SeqCst);
                            // Widen the race window.
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(Arc::from("out"))
                        })
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(&*handle.join().unwrap(), "out");
        }
        assert_eq!(
            invocations.load(Ordering::SeqCst),
            1,
            "concurrent lookups share one computation"
        );
    }

    #[test]
    fn distinct_fingerprints_compute_separately() {
        let cache = ExpectedCache::new();
        let invocations = AtomicUsize::new(0);
        for fp in [1, 2] {
            cache
                .get_or_compute(fp, || {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::from(format!("{fp}").as_str()))
                })
                .unwrap();
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn failures_are_not_cached() {
        let cache = ExpectedCache::new();
        let result = cache.get_or_compute(5, || {
            Err(OracleFailure::Scratch {
                message: "disk full".to_owned(),
            })
        });
        assert!(result.is_err());

        // A later attempt recomputes and can succeed.
        let result = cache.get_or_compute(5, || Ok(Arc::from("ok")));
        assert_eq!(&*result.unwrap(), "ok");
    }
}
