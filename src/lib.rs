// Copyright (c) The difftester Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Differential testing harness for student-written compilers.
//!
//! The harness builds the subject compiler once, then drives every discovered
//! test case through two independent pipelines: the subject pipeline
//! (translate the case to target code, run it on the emulator) and the
//! reference pipeline (compile the case with a trusted native toolchain, run
//! the binary). The two outputs are compared line by line; identical outputs
//! are a PASS, divergent outputs a FAIL, and any pipeline breakdown an ERROR.
//!
//! Cases run concurrently on a bounded worker pool; outcomes funnel through a
//! single aggregator so summaries come out in deterministic submission order.

pub mod aggregator;
pub mod compile;
pub mod config;
pub mod diff;
pub mod dispatch;
pub mod emulate;
pub mod errors;
pub mod oracle;
pub mod output;
pub mod process;
pub mod reporter;
pub mod runner;
pub mod test_list;
