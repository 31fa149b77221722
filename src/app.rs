use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::Result;
use crate::fragment::{PartitionView, Vertex, VertexRange};
use crate::message::MessageChannel;
use crate::vertex_set::DenseVertexSet;

/// A fixed-size thread pool running the parallel loops of one fragment.
///
/// Every closure receives the index of the pool thread executing it, so that
/// callers can keep per-thread buffers without contention.
pub struct ParallelEngine {
    pool: ThreadPool,
    thread_num: usize,
}

#[inline(always)]
fn thread_id() -> usize {
    rayon::current_thread_index().unwrap_or(0)
}

impl ParallelEngine {
    pub fn new(thread_num: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new().num_threads(thread_num).build()?;
        Ok(Self { pool, thread_num })
    }

    pub fn thread_num(&self) -> usize {
        self.thread_num
    }

    /// Calls `f(tid, v)` for every vertex of `range`.
    pub fn for_each_vertex<F>(&self, range: VertexRange, f: F)
    where
        F: Fn(usize, Vertex) + Sync + Send,
    {
        self.pool.install(|| range.par_iter().for_each(|v| f(thread_id(), v)));
    }

    /// Calls `f(tid, v)` for every member of `set` inside `range`.
    pub fn for_each_in_set<F>(&self, set: &DenseVertexSet, range: VertexRange, f: F)
    where
        F: Fn(usize, Vertex) + Sync + Send,
    {
        self.pool.install(|| set.par_for_each_in(range, |v| f(thread_id(), v)));
    }

    /// Calls `f(tid, item)` for every element of `items`.
    pub fn for_each_item<T, F>(&self, items: &[T], f: F)
    where
        T: Sync,
        F: Fn(usize, &T) + Sync + Send,
    {
        self.pool.install(|| items.par_iter().for_each(|item| f(thread_id(), item)));
    }

    pub fn clear_set(&self, set: &DenseVertexSet) {
        self.pool.install(|| set.parallel_clear());
    }
}

/// A vertex program driven superstep by superstep by the BSP driver.
///
/// The driver calls [`SuperstepApp::initialize_and_propagate`] once on every
/// fragment, then [`SuperstepApp::incremental_superstep`] on every fragment per
/// round, until no fragment sent a message or asked to continue.
/// Both entry points are infallible: they only touch in-memory state.
pub trait SuperstepApp: Sync {
    /// Partition-local state owned by one worker for the whole computation.
    type Context: Send;

    fn create_context<F: PartitionView>(&self, frag: &F) -> Self::Context;

    fn initialize_and_propagate<F, M>(
        &self,
        engine: &ParallelEngine,
        frag: &F,
        ctx: &mut Self::Context,
        messages: &mut M,
    ) where
        F: PartitionView,
        M: MessageChannel;

    fn incremental_superstep<F, M>(
        &self,
        engine: &ParallelEngine,
        frag: &F,
        ctx: &mut Self::Context,
        messages: &mut M,
    ) where
        F: PartitionView,
        M: MessageChannel;
}

#[cfg(test)]
mod test_engine {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_thread_ids_stay_below_thread_num() {
        let engine = ParallelEngine::new(3).unwrap();
        let visited = AtomicUsize::new(0);
        engine.for_each_vertex(VertexRange::new(0, 1000), |tid, _| {
            assert!(tid < 3);
            visited.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(visited.load(Ordering::Relaxed), 1000);
    }

    #[test]
    fn test_for_each_in_set_visits_members_only() {
        let engine = ParallelEngine::new(2).unwrap();
        let set = DenseVertexSet::new(100);
        set.insert(Vertex(5));
        set.insert(Vertex(77));
        let sum = AtomicUsize::new(0);
        engine.for_each_in_set(&set, VertexRange::new(0, 100), |_, v| {
            sum.fetch_add(v.index(), Ordering::Relaxed);
        });
        assert_eq!(sum.load(Ordering::Relaxed), 82);

        engine.clear_set(&set);
        assert!(set.empty());
    }
}
