use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, trace};

use crate::app::{ParallelEngine, SuperstepApp};
use crate::config::WCCConfig;
use crate::error::{Result, WCCError};
use crate::fragment::{FragmentId, PartitionView};
use crate::message::{message_bus, ParallelMessageManager, RoundReport};

/// Lifecycle of one worker.
///
/// `Init` runs once. Workers then alternate between `Propagating` and
/// `AwaitingMessages` until the driver observes a round in which no fragment
/// has pending work, and moves every worker to `Converged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Init,
    Propagating,
    AwaitingMessages,
    Converged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Continue,
    Converged,
    Abort,
}

#[derive(Debug)]
enum WorkerEvent {
    Report(RoundReport),
    Failed(FragmentId),
}

/// Outcome of a complete run.
///
/// # Fields
///
/// * `contexts` - Final context of every fragment, indexed by fragment id.
/// * `supersteps` - Incremental supersteps executed after initialisation.
/// * `messages` - Label messages sent across fragments over the whole run.
#[derive(Debug)]
pub struct RunSummary<C> {
    pub contexts: Vec<C>,
    pub supersteps: u64,
    pub messages: u64,
}

/// Bulk-synchronous driver running one worker thread per fragment.
///
/// Every worker flushes its outgoing messages before reporting the end of a
/// superstep, and the coordinator only issues the next command once all
/// reports have arrived. So all messages of round N are queued before round
/// N + 1 starts anywhere.
pub struct BSPDriver {
    thread_num: usize,
    max_supersteps: Option<u64>,
    redundant_delivery: bool,
}

impl BSPDriver {
    pub fn new(config: &WCCConfig) -> Self {
        Self {
            thread_num: config.thread_num,
            max_supersteps: config.max_supersteps,
            redundant_delivery: false,
        }
    }

    /// Delivers every message batch twice.
    pub fn with_redundant_delivery(mut self, redundant: bool) -> Self {
        self.redundant_delivery = redundant;
        self
    }

    pub fn run<A, F>(&self, app: &A, fragments: &[F]) -> Result<RunSummary<A::Context>>
    where
        A: SuperstepApp,
        F: PartitionView,
    {
        self.run_with_observer(app, fragments, |_, _, _| {})
    }

    /// Like [`BSPDriver::run`], calling `observer(superstep, frag, ctx)` on each
    /// worker after each of its supersteps. Superstep 0 is the initialisation.
    pub fn run_with_observer<A, F, O>(
        &self,
        app: &A,
        fragments: &[F],
        observer: O,
    ) -> Result<RunSummary<A::Context>>
    where
        A: SuperstepApp,
        F: PartitionView,
        O: Fn(u64, &F, &A::Context) + Sync,
    {
        let fnum = fragments.len();
        if fnum == 0 {
            return Err(WCCError::InvalidArgument {
                message: "no fragment to run on".to_string(),
            });
        }
        // Message routing addresses peers by fragment id.
        for (index, frag) in fragments.iter().enumerate() {
            if frag.fid() as usize != index || frag.fnum() as usize != fnum {
                return Err(WCCError::InvalidArgument {
                    message: format!(
                        "fragment {} of {} given at position {index} of {fnum}",
                        frag.fid(),
                        frag.fnum()
                    ),
                });
            }
        }
        let mut bus = message_bus(fnum as u32);
        for manager in bus.iter_mut() {
            manager.set_redundant_delivery(self.redundant_delivery);
        }
        info!(fnum, thread_num = self.thread_num, "BSP run started");

        let (report_tx, report_rx) = unbounded::<WorkerEvent>();
        let observer = &observer;

        thread::scope(|scope| {
            let mut command_txs = Vec::with_capacity(fnum);
            let mut handles = Vec::with_capacity(fnum);
            for (frag, messages) in fragments.iter().zip(bus) {
                let (command_tx, command_rx) = unbounded::<Command>();
                command_txs.push(command_tx);
                let reports = report_tx.clone();
                let thread_num = self.thread_num;
                handles.push(scope.spawn(move || {
                    let fid = frag.fid();
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        run_worker(app, frag, messages, thread_num, &reports, &command_rx, observer)
                    }));
                    match outcome {
                        Ok(Ok(ctx)) => Ok(ctx),
                        Ok(Err(e)) => {
                            let _ = reports.send(WorkerEvent::Failed(fid));
                            Err(e)
                        }
                        Err(_) => {
                            let _ = reports.send(WorkerEvent::Failed(fid));
                            Err(WCCError::WorkerPanicked { fid })
                        }
                    }
                }));
            }
            drop(report_tx);

            let (supersteps, messages, limit_hit) =
                self.coordinate(fnum, &report_rx, &command_txs);

            let mut contexts = Vec::with_capacity(fnum);
            let mut first_error = None;
            for (fid, handle) in handles.into_iter().enumerate() {
                let result = handle
                    .join()
                    .unwrap_or(Err(WCCError::WorkerPanicked { fid: fid as FragmentId }));
                match result {
                    Ok(ctx) => contexts.push(ctx),
                    // A closed channel is the echo of another worker's failure.
                    Err(e @ WCCError::ChannelClosed { .. }) => {
                        first_error.get_or_insert(e);
                    }
                    Err(e) => {
                        if matches!(first_error, None | Some(WCCError::ChannelClosed { .. })) {
                            first_error = Some(e);
                        }
                    }
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
            if let Some(limit) = limit_hit {
                return Err(WCCError::SuperstepLimit { limit });
            }
            info!(supersteps, messages, "BSP run converged");
            Ok(RunSummary { contexts, supersteps, messages })
        })
    }

    /// Collects one report per worker per round and decides what comes next.
    /// Returns the number of incremental supersteps, the message total and
    /// the superstep limit if it stopped the run.
    fn coordinate(
        &self,
        fnum: usize,
        report_rx: &Receiver<WorkerEvent>,
        command_txs: &[Sender<Command>],
    ) -> (u64, u64, Option<u64>) {
        let mut superstep = 0u64;
        let mut total_messages = 0u64;
        loop {
            let mut pending = false;
            let mut failed = false;
            let mut round_messages = 0u64;
            for _ in 0..fnum {
                match report_rx.recv() {
                    Ok(WorkerEvent::Report(report)) => {
                        trace!(fid = report.fid, sent = report.messages_sent, force = report.force_continue, "report");
                        pending |= report.has_pending_work();
                        round_messages += report.messages_sent as u64;
                    }
                    Ok(WorkerEvent::Failed(fid)) => {
                        debug!(fid, "worker failed");
                        failed = true;
                    }
                    Err(_) => {
                        failed = true;
                        break;
                    }
                }
            }
            total_messages += round_messages;
            debug!(superstep, messages = round_messages, pending, "superstep finished");

            let mut limit_hit = None;
            let command = if failed {
                Command::Abort
            } else if !pending {
                Command::Converged
            } else {
                match self.max_supersteps {
                    Some(limit) if superstep >= limit => {
                        limit_hit = Some(limit);
                        Command::Abort
                    }
                    _ => Command::Continue,
                }
            };
            for command_tx in command_txs {
                let _ = command_tx.send(command);
            }
            if command != Command::Continue {
                return (superstep, total_messages, limit_hit);
            }
            superstep += 1;
        }
    }
}

fn run_worker<A, F, O>(
    app: &A,
    frag: &F,
    mut messages: ParallelMessageManager,
    thread_num: usize,
    reports: &Sender<WorkerEvent>,
    commands: &Receiver<Command>,
    observer: &O,
) -> Result<A::Context>
where
    A: SuperstepApp,
    F: PartitionView,
    O: Fn(u64, &F, &A::Context) + Sync,
{
    let fid = frag.fid();
    let engine = ParallelEngine::new(thread_num)?;
    let mut ctx = app.create_context(frag);
    let mut state = WorkerState::Init;
    trace!(fid, ?state, "worker started");

    app.initialize_and_propagate(&engine, frag, &mut ctx, &mut messages);
    observer(0, frag, &ctx);

    let mut superstep = 0u64;
    loop {
        let report = messages.finish_round()?;
        state = WorkerState::AwaitingMessages;
        trace!(fid, superstep, ?state, sent = report.messages_sent, "superstep flushed");
        reports
            .send(WorkerEvent::Report(report))
            .map_err(|_| WCCError::ChannelClosed {
                message: format!("fragment {fid} lost the coordinator"),
            })?;

        match commands.recv() {
            Ok(Command::Continue) => {
                superstep += 1;
                state = WorkerState::Propagating;
                let received = messages.start_round(frag)?;
                trace!(fid, superstep, ?state, received, "superstep started");
                app.incremental_superstep(&engine, frag, &mut ctx, &mut messages);
                observer(superstep, frag, &ctx);
            }
            Ok(Command::Converged) => {
                state = WorkerState::Converged;
                trace!(fid, superstep, ?state, "worker finished");
                return Ok(ctx);
            }
            Ok(Command::Abort) => {
                trace!(fid, superstep, "worker aborted");
                return Ok(ctx);
            }
            Err(_) => {
                return Err(WCCError::ChannelClosed {
                    message: format!("fragment {fid} lost the coordinator"),
                });
            }
        }
    }
}
