use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use rayon::prelude::*;
use tracing::info;

use crate::app::{ParallelEngine, SuperstepApp};
use crate::atomic::atomic_min;
use crate::config::WCCConfig;
use crate::context::WCCContext;
use crate::driver::{BSPDriver, RunSummary};
use crate::error::Result;
use crate::fragment::{Fragment, PartitionView};
use crate::message::MessageChannel;
use crate::types::CSRGraph;

/// Weakly connected components by label propagation, pushing labels.
///
/// Every vertex starts with its own global id as label. In each superstep the
/// vertices whose label changed push it to their neighbors, which keep the
/// minimum. Changes reaching an outer mirror are sent to the mirror's owner.
/// Labels only decrease and are bounded below, so the computation reaches a
/// fixpoint where each vertex holds the smallest global id of its component.
///
/// Only meaningful on symmetrised fragments, which is what
/// [`Fragment::build_fragments`] produces.
#[derive(Debug, Clone, Copy, Default)]
pub struct WCCApp;

impl WCCApp {
    /// Pushes the labels of the modified inner vertices to their neighbors
    /// and sends every changed outer mirror to its owner.
    fn propagate_label_push<F, M>(
        &self,
        engine: &ParallelEngine,
        frag: &F,
        ctx: &WCCContext,
        messages: &M,
    ) where
        F: PartitionView,
        M: MessageChannel,
    {
        engine.for_each_in_set(&ctx.curr_modified, frag.inner_vertices(), |_, v| {
            let cid = ctx.label(v);
            for &u in frag.outgoing_neighbors(v) {
                if ctx.label(u) > cid {
                    atomic_min(&ctx.comp_id[u.index()], cid);
                    ctx.next_modified.insert(u);
                }
            }
        });

        // The only place messages are produced.
        engine.for_each_in_set(&ctx.next_modified, frag.outer_vertices(), |tid, v| {
            messages.sync_state_on_outer_vertex(frag, v, ctx.label(v), tid);
        });
    }

    /// Requests another superstep if an inner vertex changed, then hands the
    /// freshly built frontier over for reading.
    fn finish_superstep<F, M>(&self, frag: &F, ctx: &mut WCCContext, messages: &M)
    where
        F: PartitionView,
        M: MessageChannel,
    {
        let inner = frag.inner_vertices();
        if !ctx.next_modified.partial_empty(inner.begin, inner.end) {
            messages.force_continue();
        }
        ctx.curr_modified.swap(&mut ctx.next_modified);
    }
}

impl SuperstepApp for WCCApp {
    type Context = WCCContext;

    fn create_context<F: PartitionView>(&self, frag: &F) -> WCCContext {
        WCCContext::new(frag)
    }

    fn initialize_and_propagate<F, M>(
        &self,
        engine: &ParallelEngine,
        frag: &F,
        ctx: &mut WCCContext,
        messages: &mut M,
    ) where
        F: PartitionView,
        M: MessageChannel,
    {
        messages.init_channels(engine.thread_num());

        // Assign the initial component id with the global id.
        let state = &*ctx;
        engine.for_each_vertex(frag.inner_vertices(), |_, v| {
            state.set_label(v, frag.inner_gid(v));
            state.curr_modified.insert(v);
        });
        engine.for_each_vertex(frag.outer_vertices(), |_, v| {
            state.set_label(v, frag.outer_gid(v));
        });

        self.propagate_label_push(engine, frag, ctx, messages);
        self.finish_superstep(frag, ctx, messages);
    }

    fn incremental_superstep<F, M>(
        &self,
        engine: &ParallelEngine,
        frag: &F,
        ctx: &mut WCCContext,
        messages: &mut M,
    ) where
        F: PartitionView,
        M: MessageChannel,
    {
        engine.clear_set(&ctx.next_modified);

        // Received labels go to the current frontier, so they are pushed on
        // in this very superstep.
        let state = &*ctx;
        messages.parallel_process(engine, |_, u, msg| {
            if state.label(u) > msg {
                atomic_min(&state.comp_id[u.index()], msg);
                state.curr_modified.insert(u);
            }
        });

        self.propagate_label_push(engine, frag, ctx, messages);
        self.finish_superstep(frag, ctx, messages);
    }
}

/// Final labels of a run, keyed by global id.
///
/// # Fields
///
/// * `labels` - Component label (the smallest global id of the component) of
///   every vertex.
/// * `supersteps` - Incremental supersteps executed after initialisation.
/// * `messages` - Cross-fragment label messages sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WCCResult {
    pub labels: BTreeMap<u64, u64>,
    pub supersteps: u64,
    pub messages: u64,
}

impl WCCResult {
    /// Gathers the inner labels of every fragment.
    pub fn from_summary(fragments: &[Fragment], summary: &RunSummary<WCCContext>) -> Self {
        let labels = fragments
            .par_iter()
            .zip(summary.contexts.par_iter())
            .flat_map_iter(|(frag, ctx)| ctx.inner_labels(frag))
            .collect::<BTreeMap<_, _>>();
        Self {
            labels,
            supersteps: summary.supersteps,
            messages: summary.messages,
        }
    }

    /// Groups vertices by label. Members are sorted, and components are
    /// ordered by their label.
    pub fn components(&self) -> Vec<Vec<u64>> {
        let groups = DashMap::<u64, Vec<u64>>::new();
        self.labels.par_iter().for_each(|(&gid, &label)| {
            groups.entry(label).or_default().push(gid);
        });
        let mut components = groups
            .into_iter()
            .map(|(label, mut members)| {
                members.sort_unstable();
                (label, members)
            })
            .collect::<Vec<_>>();
        components.sort_unstable_by_key(|(label, _)| *label);
        components.into_iter().map(|(_, members)| members).collect()
    }

    pub fn component_count(&self) -> usize {
        let mut roots = self.labels.values().copied().collect::<Vec<_>>();
        roots.sort_unstable();
        roots.dedup();
        roots.len()
    }
}

/// Trait for computing Weakly Connected Components (WCC) in a graph.
///
/// # Methods
///
/// * `count_wcc` - Returns the total number of weakly connected components.
/// * `wcc` - Returns all weakly connected components as vectors of vertex ids.
pub trait WCC<T> {
    fn count_wcc(&self, wcc_config: &WCCConfig) -> Result<T>;
    fn wcc(&self, wcc_config: &WCCConfig) -> Result<Vec<Vec<T>>>;
}

/// Controller for Weakly Connected Components (WCC) operations.
///
/// Partitions the graph as configured, runs [`WCCApp`] under the
/// [`BSPDriver`] and collects the labels.
pub struct WCCController {
    graph: Arc<CSRGraph>,
}

impl WCCController {
    pub fn new(graph: Arc<CSRGraph>) -> Self {
        Self { graph }
    }

    /// Runs the computation and returns the label of every vertex.
    pub fn labels(&self, wcc_config: &WCCConfig) -> Result<WCCResult> {
        wcc_config.validate()?;
        let fragments = Fragment::build_fragments(
            &self.graph,
            wcc_config.partitioner,
            wcc_config.fragment_num,
        )?;
        let driver = BSPDriver::new(wcc_config);
        let result = run_wcc(&driver, &fragments)?;
        info!(
            vertices = result.labels.len(),
            supersteps = result.supersteps,
            messages = result.messages,
            "WCC finished"
        );
        Ok(result)
    }
}

/// Runs [`WCCApp`] on already built fragments.
pub fn run_wcc(driver: &BSPDriver, fragments: &[Fragment]) -> Result<WCCResult> {
    let summary = driver.run(&WCCApp, fragments)?;
    Ok(WCCResult::from_summary(fragments, &summary))
}

impl WCC<u64> for WCCController {
    fn count_wcc(&self, wcc_config: &WCCConfig) -> Result<u64> {
        Ok(self.labels(wcc_config)?.component_count() as u64)
    }

    fn wcc(&self, wcc_config: &WCCConfig) -> Result<Vec<Vec<u64>>> {
        Ok(self.labels(wcc_config)?.components())
    }
}
