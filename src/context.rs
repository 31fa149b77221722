use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::fragment::{PartitionView, Vertex};
use crate::vertex_set::DenseVertexSet;

/// Per-fragment state of the WCC computation.
///
/// `comp_id` covers inner and outer vertices. Initialisation stores each
/// vertex's global id; after that entries only ever decrease, and every write
/// goes through [`crate::atomic::atomic_min`]. The two frontiers
/// swap roles at the end of each superstep: `curr_modified` is read while
/// `next_modified` is built.
#[derive(Debug)]
pub struct WCCContext {
    pub comp_id: Vec<AtomicU64>,
    pub curr_modified: DenseVertexSet,
    pub next_modified: DenseVertexSet,
}

impl WCCContext {
    /// Allocates an empty context sized for `frag`. Labels start at
    /// `u64::MAX` until initialisation assigns the global ids.
    pub fn new<F: PartitionView>(frag: &F) -> Self {
        let capacity = frag.vertices_num();
        Self {
            comp_id: (0..capacity).map(|_| AtomicU64::new(u64::MAX)).collect(),
            curr_modified: DenseVertexSet::new(capacity),
            next_modified: DenseVertexSet::new(capacity),
        }
    }

    #[inline]
    pub fn label(&self, v: Vertex) -> u64 {
        self.comp_id[v.index()].load(Ordering::Relaxed)
    }

    /// Plain store, only valid while no other thread touches `v`.
    #[inline]
    pub(crate) fn set_label(&self, v: Vertex, value: u64) {
        self.comp_id[v.index()].store(value, Ordering::Relaxed);
    }

    /// `(gid, label)` of every inner vertex, in handle order.
    pub fn inner_labels<F: PartitionView>(&self, frag: &F) -> Vec<(u64, u64)> {
        frag.inner_vertices()
            .iter()
            .map(|v| (frag.inner_gid(v), self.label(v)))
            .collect()
    }

    /// Writes one `gid label` line per inner vertex.
    pub fn output<F: PartitionView, W: Write>(&self, frag: &F, writer: &mut W) -> Result<()> {
        for v in frag.inner_vertices().iter() {
            writeln!(writer, "{} {}", frag.inner_gid(v), self.label(v))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test_context {
    use super::*;
    use crate::fragment::{Fragment, Partitioner};
    use crate::types::CSRGraph;

    #[test]
    fn test_output_lists_inner_vertices() {
        let graph = CSRGraph::from_edges(4, &[(0, 1), (1, 2), (2, 3)]).unwrap();
        let fragments = Fragment::build_fragments(&graph, Partitioner::Segmented, 2).unwrap();
        let frag = &fragments[1];
        let ctx = WCCContext::new(frag);
        assert_eq!(ctx.comp_id.len(), 3);
        for v in frag.inner_vertices().iter().chain(frag.outer_vertices().iter()) {
            assert_eq!(ctx.label(v), u64::MAX);
            ctx.set_label(v, frag.gid(v));
        }

        let mut buffer = Vec::new();
        ctx.output(frag, &mut buffer).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "2 2\n3 3\n");
        assert_eq!(ctx.inner_labels(frag), vec![(2, 2), (3, 3)]);
    }
}
