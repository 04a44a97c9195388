// Copyright (c) The difftester Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker pool scheduler: fans test cases out across a bounded set of
//! workers, funnels their outcomes through one event loop, and honors
//! cooperative cancellation.
//!
//! Each worker owns one case end-to-end: translate, emulate, fetch the
//! expected output, diff, report. The only state shared between workers is
//! the result aggregator and the oracle's cache. A case failure of any kind
//! is converted into a `CaseOutcome` at the worker boundary and never aborts
//! the rest of the run.

use crate::{
    aggregator::{CaseOutcome, RunAggregator, RunStats, RunSummary, Verdict},
    compile::SubjectArtifact,
    config::RunConfiguration,
    diff,
    emulate,
    errors::OracleFailure,
    oracle::ReferenceOracle,
    test_list::{TestCase, TestList},
};
use crossbeam_channel::Sender;
use rayon::{ThreadPool, ThreadPoolBuilder};
use signal_hook::{iterator::Handle, low_level::emulate_default_handler};
use std::{
    convert::Infallible,
    marker::PhantomData,
    os::raw::c_int,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

/// Context for running tests.
pub struct TestRunner<'run> {
    config: &'run RunConfiguration,
    test_list: &'run TestList,
    artifact: &'run SubjectArtifact,
    oracle: &'run ReferenceOracle,
    aggregator: Arc<RunAggregator>,
    run_pool: ThreadPool,
}

impl<'run> TestRunner<'run> {
    pub fn new(
        config: &'run RunConfiguration,
        test_list: &'run TestList,
        artifact: &'run SubjectArtifact,
        oracle: &'run ReferenceOracle,
    ) -> Self {
        let case_names = test_list
            .iter_cases()
            .map(TestCase::display_name)
            .collect();
        let aggregator = Arc::new(RunAggregator::new(case_names, test_list.run_count()));
        Self {
            config,
            test_list,
            artifact,
            oracle,
            aggregator,
            run_pool: ThreadPoolBuilder::new()
                // The event-loop closure needs its own thread, so at most
                // `workers` cases are ever running at once.
                .num_threads(config.workers + 1)
                .thread_name(|idx| format!("difftester-run-{idx}"))
                .build()
                .expect("run pool built"),
        }
    }

    /// A live handle for mid-run snapshots.
    pub fn aggregator(&self) -> Arc<RunAggregator> {
        Arc::clone(&self.aggregator)
    }

    /// Executes all listed cases, invoking the callback with each event.
    pub fn execute<F>(&self, mut callback: F) -> RunSummary
    where
        F: FnMut(RunEvent<'run>) + Send,
    {
        self.try_execute::<Infallible, _>(|event| {
            callback(event);
            Ok(())
        })
        .expect("Err branch is infallible")
    }

    /// Executes all listed cases. If the callback returns an error, the run
    /// is cancelled and the first error is propagated once the in-flight
    /// cases have drained.
    pub fn try_execute<E, F>(&self, callback: F) -> Result<RunSummary, E>
    where
        F: FnMut(RunEvent<'run>) -> Result<(), E> + Send,
        E: Send,
    {
        let (run_sender, run_receiver) = crossbeam_channel::unbounded();

        let canceled = AtomicBool::new(false);
        let canceled_ref = &canceled;

        // ---
        // Spawn the signal handler thread.
        // ---
        let (srp_sender, srp_receiver) = crossbeam_channel::bounded(1);
        let (signal_sender, signal_receiver) = crossbeam_channel::unbounded();
        spawn_signal_thread(signal_sender, srp_sender);

        let start_time = Instant::now();
        let mut ctx = CallbackContext::new(callback, &self.aggregator);
        ctx.run_started(self.test_list)?;

        // Stores the first error that occurred. This error is propagated up.
        let mut first_error = None;

        let ctx_mut = &mut ctx;
        let first_error_mut = &mut first_error;

        // ---
        // Spawn the case workers.
        // ---
        self.run_pool.scope(move |run_scope| {
            // Block until signal handling is set up.
            let _ = srp_receiver.recv();

            for (index, case) in self.test_list.iter_cases().enumerate() {
                let this_run_sender = run_sender.clone();
                run_scope.spawn(move |_| {
                    // Failure to send on any of these paths means the
                    // receiver was dropped; nothing to do about it.
                    if !case.filter_match {
                        let _ = this_run_sender.send(InternalTestEvent::Skipped { index, case });
                        return;
                    }
                    if canceled_ref.load(Ordering::Acquire) {
                        // Queued case observed the cancellation flag before
                        // starting; skip it rather than executing it.
                        let _ =
                            this_run_sender.send(InternalTestEvent::Cancelled { index, case });
                        return;
                    }

                    let _ = this_run_sender.send(InternalTestEvent::Started { case });
                    let outcome = self.run_case(case);
                    let _ = this_run_sender.send(InternalTestEvent::Finished {
                        index,
                        case,
                        outcome,
                    });
                });
            }

            drop(run_sender);

            loop {
                let internal_event = crossbeam_channel::select! {
                    recv(run_receiver) -> internal_event => {
                        match internal_event {
                            Ok(event) => InternalEvent::Test(event),
                            Err(_) => {
                                // All workers have finished.
                                break;
                            }
                        }
                    },
                    recv(signal_receiver) -> internal_event => {
                        match internal_event {
                            Ok(event) => InternalEvent::Signal(event),
                            Err(_) => {
                                // Ignore the signal thread going away.
                                continue;
                            }
                        }
                    },
                };

                match ctx_mut.handle_event(internal_event) {
                    Ok(()) => {}
                    Err(err) => {
                        // Either the callback failed or a cancellation
                        // notice was received; in both cases stop handing
                        // out new cases.
                        canceled_ref.store(true, Ordering::Release);

                        match err {
                            InternalError::Error(err) => {
                                if first_error_mut.is_none() {
                                    *first_error_mut = Some(err);
                                }
                                let _ = ctx_mut.error_cancel();
                            }
                            InternalError::SignalCanceled(Some(err)) => {
                                if first_error_mut.is_none() {
                                    *first_error_mut = Some(err);
                                }
                            }
                            InternalError::SignalCanceled(None) => {
                                // Keep handling events while in-flight cases
                                // drain.
                            }
                        }
                    }
                }
            }
        });

        let summary = self.aggregator.finalize(start_time.elapsed());
        match ctx.run_finished(&summary) {
            Ok(()) => {}
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            None => Ok(summary),
            Some(err) => Err(err),
        }
    }

    // ---
    // Helper methods
    // ---

    /// Runs one case end-to-end. Never panics outward: a panicking pipeline
    /// is converted into an ERROR outcome so it cannot take down the
    /// scheduler.
    fn run_case(&self, case: &TestCase) -> CaseOutcome {
        let start_time = Instant::now();
        match catch_unwind(AssertUnwindSafe(|| self.run_case_inner(case))) {
            Ok(mut outcome) => {
                outcome.time_taken = start_time.elapsed();
                outcome
            }
            Err(_) => CaseOutcome {
                name: case.display_name(),
                verdict: Verdict::Error,
                stages: Vec::new(),
                diff: None,
                message: Some("case worker panicked".to_owned()),
                time_taken: start_time.elapsed(),
            },
        }
    }

    fn run_case_inner(&self, case: &TestCase) -> CaseOutcome {
        let name = case.display_name();

        // Subject pipeline: translate, then emulate.
        let run = match emulate::execute(self.artifact, case, self.config) {
            Ok(run) => run,
            Err(failure) => {
                return CaseOutcome {
                    name,
                    verdict: Verdict::Error,
                    stages: failure.stages,
                    diff: None,
                    message: Some(failure.message),
                    time_taken: Default::default(),
                };
            }
        };

        // Reference pipeline, shared through the oracle's cache.
        let expected = match self.oracle.expected_output(case) {
            Ok(expected) => expected,
            Err(failure) => {
                let message = failure.to_string();
                let mut stages = run.stages;
                if let OracleFailure::Stage { stage } = failure {
                    stages.push(stage);
                }
                return CaseOutcome {
                    name,
                    verdict: Verdict::Error,
                    stages,
                    diff: None,
                    message: Some(message),
                    time_taken: Default::default(),
                };
            }
        };

        let report = diff::compare(&run.actual, &expected, self.config.diff);
        if report.is_match() {
            CaseOutcome {
                name,
                verdict: Verdict::Pass,
                stages: run.stages,
                diff: None,
                message: None,
                time_taken: Default::default(),
            }
        } else {
            CaseOutcome {
                name,
                verdict: Verdict::Fail,
                stages: run.stages,
                diff: Some(report),
                message: None,
                time_taken: Default::default(),
            }
        }
    }
}

fn spawn_signal_thread(sender: Sender<InternalSignalEvent>, srp_sender: Sender<()>) {
    std::thread::spawn(move || {
        use signal_hook::{
            consts::*,
            iterator::{exfiltrator::SignalOnly, SignalsInfo},
        };

        let mut signals =
            SignalsInfo::<SignalOnly>::new(TERM_SIGNALS).expect("SignalsInfo created");
        let _ = sender.send(InternalSignalEvent::Handle {
            handle: signals.handle(),
        });
        // Let the run pool know that signal handling is ready.
        let _ = srp_sender.send(());

        let mut term_once = false;

        for signal in &mut signals {
            if term_once {
                let _ = emulate_default_handler(signal);
            } else {
                term_once = true;
                let _ = sender.send(InternalSignalEvent::Canceled { signal });
            }
        }
    });
}

struct CallbackContext<'agg, F, E> {
    callback: F,
    aggregator: &'agg RunAggregator,
    running: usize,
    signal_handle: Option<Handle>,
    cancel_state: CancelState,
    phantom: PhantomData<E>,
}

impl<'agg, 'run, F, E> CallbackContext<'agg, F, E>
where
    F: FnMut(RunEvent<'run>) -> Result<(), E> + Send,
{
    fn new(callback: F, aggregator: &'agg RunAggregator) -> Self {
        Self {
            callback,
            aggregator,
            running: 0,
            signal_handle: None,
            cancel_state: CancelState::None,
            phantom: PhantomData,
        }
    }

    fn run_started(&mut self, test_list: &'run TestList) -> Result<(), E> {
        (self.callback)(RunEvent::RunStarted { test_list })
    }

    fn handle_event(&mut self, event: InternalEvent<'run>) -> Result<(), InternalError<E>> {
        match event {
            InternalEvent::Signal(InternalSignalEvent::Handle { handle }) => {
                self.signal_handle = Some(handle);
                Ok(())
            }
            InternalEvent::Test(InternalTestEvent::Started { case }) => {
                self.running += 1;
                (self.callback)(RunEvent::CaseStarted { case }).map_err(InternalError::Error)
            }
            InternalEvent::Test(InternalTestEvent::Finished {
                index,
                case,
                outcome,
            }) => {
                self.running -= 1;
                self.aggregator.record(index, outcome.clone());
                (self.callback)(RunEvent::CaseFinished { case, outcome })
                    .map_err(InternalError::Error)
            }
            InternalEvent::Test(InternalTestEvent::Skipped { index, case }) => {
                self.aggregator.record_skipped(index);
                (self.callback)(RunEvent::CaseSkipped { case }).map_err(InternalError::Error)
            }
            InternalEvent::Test(InternalTestEvent::Cancelled { index, case }) => {
                self.aggregator.record_cancelled(index);
                (self.callback)(RunEvent::CaseCancelled { case }).map_err(InternalError::Error)
            }
            InternalEvent::Signal(InternalSignalEvent::Canceled { signal: _signal }) => {
                debug_assert_ne!(
                    self.cancel_state,
                    CancelState::SignalCanceled,
                    "can't receive signal-canceled twice"
                );

                self.cancel_state = CancelState::SignalCanceled;
                // Keep the signal handle open: a second ctrl-c gets the
                // default handler.

                match (self.callback)(RunEvent::RunBeginCancel {
                    running: self.running,
                    reason: CancelReason::Signal,
                }) {
                    Ok(()) => Err(InternalError::SignalCanceled(None)),
                    Err(err) => Err(InternalError::SignalCanceled(Some(err))),
                }
            }
        }
    }

    fn error_cancel(&mut self) -> Result<(), E> {
        if self.cancel_state == CancelState::None {
            self.cancel_state = CancelState::ErrorCanceled;
        }
        (self.callback)(RunEvent::RunBeginCancel {
            running: self.running,
            reason: CancelReason::ReportError,
        })
    }

    fn run_finished(&mut self, summary: &RunSummary) -> Result<(), E> {
        (self.callback)(RunEvent::RunFinished {
            stats: summary.stats,
            duration: summary.duration,
        })
    }
}

/// Events delivered to the run callback.
#[derive(Debug)]
pub enum RunEvent<'a> {
    /// The run started.
    RunStarted { test_list: &'a TestList },

    /// A case started executing on a worker.
    CaseStarted { case: &'a TestCase },

    /// A case finished; its outcome has been recorded.
    CaseFinished {
        case: &'a TestCase,
        outcome: CaseOutcome,
    },

    /// A case did not match the filter.
    CaseSkipped { case: &'a TestCase },

    /// A queued case was abandoned because the run was cancelled.
    CaseCancelled { case: &'a TestCase },

    /// A cancellation notice was received.
    RunBeginCancel {
        /// The number of cases still running.
        running: usize,
        reason: CancelReason,
    },

    /// The run finished.
    RunFinished {
        stats: RunStats,
        duration: std::time::Duration,
    },
}

/// The reason a run is being cancelled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CancelReason {
    /// An error occurred while reporting results.
    ReportError,

    /// A termination signal was received.
    Signal,
}

#[derive(Debug)]
enum InternalEvent<'a> {
    Test(InternalTestEvent<'a>),
    Signal(InternalSignalEvent),
}

#[derive(Debug)]
enum InternalTestEvent<'a> {
    Started {
        case: &'a TestCase,
    },
    Finished {
        index: usize,
        case: &'a TestCase,
        outcome: CaseOutcome,
    },
    Skipped {
        index: usize,
        case: &'a TestCase,
    },
    Cancelled {
        index: usize,
        case: &'a TestCase,
    },
}

#[derive(Debug)]
enum InternalSignalEvent {
    Handle { handle: Handle },
    Canceled { signal: c_int },
}

#[derive(Debug)]
enum InternalError<E> {
    Error(E),
    SignalCanceled(Option<E>),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum CancelState {
    None,
    ErrorCanceled,
    SignalCanceled,
}
