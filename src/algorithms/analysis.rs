use rayon::prelude::*;

use crate::fragment::{Fragment, PartitionView};

/// Size of the cut produced by a partitioning.
///
/// # Fields
///
/// * `outer_vertices` - Mirrors summed over all fragments. Every mirror is a
///   potential message target in each superstep.
/// * `cut_edges` - Edges from an inner vertex to a mirror, summed over all
///   fragments. Each undirected cut edge is counted once per side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundaryStats {
    pub outer_vertices: u64,
    pub cut_edges: u64,
}

/// Measures how much of the graph lies on fragment boundaries.
pub fn boundary_analysis(fragments: &[Fragment]) -> BoundaryStats {
    fragments
        .par_iter()
        .map(|frag| BoundaryStats {
            outer_vertices: frag.outer_vertices_num() as u64,
            cut_edges: frag.cut_edge_count() as u64,
        })
        .reduce(BoundaryStats::default, |a, b| BoundaryStats {
            outer_vertices: a.outer_vertices + b.outer_vertices,
            cut_edges: a.cut_edges + b.cut_edges,
        })
}

#[cfg(test)]
mod test_analysis {
    use super::*;
    use crate::fragment::Partitioner;
    use crate::types::CSRGraph;

    #[test]
    fn test_single_fragment_has_no_boundary() {
        let graph = CSRGraph::random(30, 60, 1).unwrap();
        let fragments = Fragment::build_fragments(&graph, Partitioner::Hash, 1).unwrap();
        assert_eq!(boundary_analysis(&fragments), BoundaryStats::default());
    }

    #[test]
    fn test_path_cut_in_two() {
        let graph = CSRGraph::from_edges(4, &[(0, 1), (1, 2), (2, 3)]).unwrap();
        let fragments = Fragment::build_fragments(&graph, Partitioner::Segmented, 2).unwrap();
        let stats = boundary_analysis(&fragments);
        assert_eq!(stats.outer_vertices, 2);
        assert_eq!(stats.cut_edges, 2);
    }
}
