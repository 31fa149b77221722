use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WCCError};
use crate::types::graph_query::GraphQuery;
use crate::types::CSRGraph;

/// Identifier of a fragment (one worker's share of the graph).
pub type FragmentId = u32;

/// Local handle of a vertex inside one fragment.
///
/// Inner vertices occupy `0..ivnum`, outer (mirror) vertices occupy
/// `ivnum..ivnum + ovnum`. Handles are meaningless outside their fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vertex(pub u32);

impl Vertex {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A half-open range `[begin, end)` of vertex handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexRange {
    pub begin: u32,
    pub end: u32,
}

impl VertexRange {
    pub fn new(begin: u32, end: u32) -> Self {
        Self { begin, end: end.max(begin) }
    }

    pub fn len(&self) -> usize {
        (self.end - self.begin) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    #[inline(always)]
    pub fn contains(&self, v: Vertex) -> bool {
        self.begin <= v.0 && v.0 < self.end
    }

    pub fn iter(&self) -> impl Iterator<Item = Vertex> {
        (self.begin..self.end).map(Vertex)
    }

    pub fn par_iter(&self) -> impl IndexedParallelIterator<Item = Vertex> {
        (self.begin..self.end).into_par_iter().map(Vertex)
    }
}

/// Read-only view of one fragment, as consumed by the propagation engine.
///
/// Adjacency is only stored for inner vertices. An edge to a vertex owned by
/// another fragment points at a local outer mirror of it.
pub trait PartitionView: Sync {
    fn fid(&self) -> FragmentId;

    fn fnum(&self) -> u32;

    fn inner_vertices(&self) -> VertexRange;

    fn outer_vertices(&self) -> VertexRange;

    /// Outgoing neighbors of an inner vertex. Outer vertices have none.
    fn outgoing_neighbors(&self, v: Vertex) -> &[Vertex];

    fn inner_gid(&self, v: Vertex) -> u64;

    fn outer_gid(&self, v: Vertex) -> u64;

    /// Resolves a global id to the local handle (inner or outer), if present.
    fn gid_to_vertex(&self, gid: u64) -> Option<Vertex>;

    /// Fragment owning an outer vertex.
    fn outer_owner(&self, v: Vertex) -> FragmentId;

    fn gid(&self, v: Vertex) -> u64 {
        if self.is_inner(v) {
            self.inner_gid(v)
        } else {
            self.outer_gid(v)
        }
    }

    fn is_inner(&self, v: Vertex) -> bool {
        self.inner_vertices().contains(v)
    }

    fn is_outer(&self, v: Vertex) -> bool {
        self.outer_vertices().contains(v)
    }

    fn inner_vertices_num(&self) -> usize {
        self.inner_vertices().len()
    }

    fn outer_vertices_num(&self) -> usize {
        self.outer_vertices().len()
    }

    /// Number of local handles, inner and outer.
    fn vertices_num(&self) -> usize {
        self.inner_vertices_num() + self.outer_vertices_num()
    }
}

/// Strategy deciding which fragment owns a vertex.
///
/// # Variants
/// * `Hash` - `gid % fnum`.
/// * `Segmented` - contiguous gid ranges of equal size.
/// * `Community` - the community column of the graph file, `% fnum`.
///   Vertices without a community fall back to `Hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partitioner {
    #[default]
    Hash,
    Segmented,
    Community,
}

impl Partitioner {
    /// Returns the fragment owning `gid`. `fnum` must be positive.
    pub fn owner(&self, graph: &CSRGraph, gid: u64, fnum: u32) -> FragmentId {
        let fnum = fnum as u64;
        let fid = match self {
            Partitioner::Hash => gid % fnum,
            Partitioner::Segmented => {
                let chunk = graph.vertex_count.div_ceil(fnum).max(1);
                (gid / chunk).min(fnum - 1)
            }
            Partitioner::Community => match graph.community_index.get(&gid) {
                Some(&community_id) => community_id as u64 % fnum,
                None => gid % fnum,
            },
        };
        fid as FragmentId
    }
}

impl FromStr for Partitioner {
    type Err = WCCError;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "hash" => Ok(Partitioner::Hash),
            "segmented" | "range" => Ok(Partitioner::Segmented),
            "community" => Ok(Partitioner::Community),
            _ => Err(WCCError::UnknownPartitioner { name: name.to_string() }),
        }
    }
}

impl fmt::Display for Partitioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Partitioner::Hash => "hash",
            Partitioner::Segmented => "segmented",
            Partitioner::Community => "community",
        };
        write!(f, "{name}")
    }
}

/// One fragment of a partitioned graph, stored as a local CSR.
#[derive(Debug, Clone)]
pub struct Fragment {
    fid: FragmentId,
    fnum: u32,
    /// Global ids of inner vertices, indexed by handle.
    inner_gids: Vec<u64>,
    /// Global ids of outer vertices, indexed by `handle - ivnum`.
    outer_gids: Vec<u64>,
    /// Owner fragment of each outer vertex.
    outer_owner: Vec<FragmentId>,
    /// Neighbors of inner vertex i live in edges[offsets[i]..offsets[i + 1]].
    offsets: Vec<usize>,
    edges: Vec<Vertex>,
    gid_index: FxHashMap<u64, Vertex>,
}

impl Fragment {
    /// Cuts `graph` into `fnum` fragments.
    ///
    /// Edges are symmetrised first: weak connectivity ignores direction, and
    /// every cross-fragment edge needs a mirror on both sides so that labels
    /// can travel either way.
    pub fn build_fragments(
        graph: &CSRGraph,
        partitioner: Partitioner,
        fnum: u32,
    ) -> Result<Vec<Fragment>> {
        if fnum == 0 {
            return Err(WCCError::InvalidArgument {
                message: "cannot partition into zero fragments".to_string(),
            });
        }
        let undirected = graph.symmetrize();
        let owners = (0..graph.vertex_count as usize)
            .into_par_iter()
            .map(|gid| partitioner.owner(graph, gid as u64, fnum))
            .collect::<Vec<_>>();

        let fragments = (0..fnum)
            .into_par_iter()
            .map(|fid| Fragment::build(&undirected, &owners, fid, fnum))
            .collect::<Result<Vec<_>>>()?;

        for fragment in &fragments {
            debug!(
                fid = fragment.fid,
                inner = fragment.inner_vertices_num(),
                outer = fragment.outer_vertices_num(),
                edges = fragment.edges.len(),
                "fragment built"
            );
        }
        Ok(fragments)
    }

    /// Builds fragment `fid` from an already symmetrised graph.
    fn build(
        graph: &CSRGraph,
        owners: &[FragmentId],
        fid: FragmentId,
        fnum: u32,
    ) -> Result<Fragment> {
        let inner_gids = owners
            .iter()
            .enumerate()
            .filter(|&(_, &owner)| owner == fid)
            .map(|(gid, _)| gid as u64)
            .collect::<Vec<_>>();
        let ivnum = inner_gids.len();

        let mut gid_index = FxHashMap::<u64, Vertex>::default();
        for (local, &gid) in inner_gids.iter().enumerate() {
            gid_index.insert(gid, Vertex(local as u32));
        }

        let mut outer_gids = Vec::<u64>::new();
        let mut outer_owner = Vec::<FragmentId>::new();
        let mut offsets = Vec::with_capacity(ivnum + 1);
        let mut edges = Vec::<Vertex>::new();
        offsets.push(0);

        for &gid in &inner_gids {
            for &neighbor in graph.read_neighbor(gid) {
                let handle = match gid_index.get(&neighbor) {
                    Some(&handle) => handle,
                    None => {
                        // First edge to a remote vertex allocates its mirror.
                        let handle = Vertex((ivnum + outer_gids.len()) as u32);
                        outer_gids.push(neighbor);
                        outer_owner.push(owners[neighbor as usize]);
                        gid_index.insert(neighbor, handle);
                        handle
                    }
                };
                edges.push(handle);
            }
            offsets.push(edges.len());
        }

        if ivnum + outer_gids.len() > u32::MAX as usize {
            return Err(WCCError::InvalidArgument {
                message: format!("fragment {fid} has more vertices than local handles"),
            });
        }

        Ok(Fragment {
            fid,
            fnum,
            inner_gids,
            outer_gids,
            outer_owner,
            offsets,
            edges,
            gid_index,
        })
    }

    /// Number of edges from an inner vertex to an outer mirror.
    pub fn cut_edge_count(&self) -> usize {
        let outer = self.outer_vertices();
        self.edges.iter().filter(|&&v| outer.contains(v)).count()
    }
}

impl PartitionView for Fragment {
    fn fid(&self) -> FragmentId {
        self.fid
    }

    fn fnum(&self) -> u32 {
        self.fnum
    }

    fn inner_vertices(&self) -> VertexRange {
        VertexRange::new(0, self.inner_gids.len() as u32)
    }

    fn outer_vertices(&self) -> VertexRange {
        let ivnum = self.inner_gids.len() as u32;
        VertexRange::new(ivnum, ivnum + self.outer_gids.len() as u32)
    }

    #[inline]
    fn outgoing_neighbors(&self, v: Vertex) -> &[Vertex] {
        if v.index() >= self.inner_gids.len() {
            return &[];
        }
        &self.edges[self.offsets[v.index()]..self.offsets[v.index() + 1]]
    }

    #[inline]
    fn inner_gid(&self, v: Vertex) -> u64 {
        self.inner_gids[v.index()]
    }

    #[inline]
    fn outer_gid(&self, v: Vertex) -> u64 {
        self.outer_gids[v.index() - self.inner_gids.len()]
    }

    fn gid_to_vertex(&self, gid: u64) -> Option<Vertex> {
        self.gid_index.get(&gid).copied()
    }

    fn outer_owner(&self, v: Vertex) -> FragmentId {
        self.outer_owner[v.index() - self.inner_gids.len()]
    }
}

#[cfg(test)]
mod test_fragment {
    use super::*;

    fn path_graph() -> CSRGraph {
        // 0 - 1 - 2 - 3 - 4 - 5, stored in one direction only.
        CSRGraph::from_edges(6, &[(0, 1), (1, 2), (2, 3), (3, 4), (4, 5)]).unwrap()
    }

    #[test]
    fn test_every_vertex_owned_once() {
        let graph = CSRGraph::random(50, 120, 3).unwrap();
        for partitioner in [Partitioner::Hash, Partitioner::Segmented, Partitioner::Community] {
            let fragments = Fragment::build_fragments(&graph, partitioner, 4).unwrap();
            let mut owned = fragments
                .iter()
                .flat_map(|frag| frag.inner_vertices().iter().map(|v| frag.inner_gid(v)).collect::<Vec<_>>())
                .collect::<Vec<_>>();
            owned.sort();
            assert_eq!(owned, (0..50).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_segmented_ranges() {
        let fragments = Fragment::build_fragments(&path_graph(), Partitioner::Segmented, 2).unwrap();
        let gids = |frag: &Fragment| frag.inner_vertices().iter().map(|v| frag.inner_gid(v)).collect::<Vec<_>>();
        assert_eq!(gids(&fragments[0]), vec![0, 1, 2]);
        assert_eq!(gids(&fragments[1]), vec![3, 4, 5]);

        // The only cut edge is 2 - 3, mirrored on both sides.
        assert_eq!(fragments[0].outer_vertices_num(), 1);
        assert_eq!(fragments[1].outer_vertices_num(), 1);
        let mirror = fragments[0].outer_vertices().iter().next().unwrap();
        assert_eq!(fragments[0].outer_gid(mirror), 3);
        assert_eq!(fragments[0].outer_owner(mirror), 1);
        assert_eq!(fragments[0].cut_edge_count(), 1);
    }

    #[test]
    fn test_edges_symmetrised_inside_fragment() {
        let fragments = Fragment::build_fragments(&path_graph(), Partitioner::Hash, 1).unwrap();
        let frag = &fragments[0];
        let v1 = frag.gid_to_vertex(1).unwrap();
        let mut neighbors = frag
            .outgoing_neighbors(v1)
            .iter()
            .map(|&u| frag.gid(u))
            .collect::<Vec<_>>();
        neighbors.sort();
        assert_eq!(neighbors, vec![0, 2]);
        assert_eq!(frag.outer_vertices_num(), 0);
    }

    #[test]
    fn test_mirrors_are_symmetric_across_fragments() {
        let graph = CSRGraph::random(40, 80, 11).unwrap();
        let fragments = Fragment::build_fragments(&graph, Partitioner::Hash, 3).unwrap();
        for frag in &fragments {
            for outer in frag.outer_vertices().iter() {
                let owner = &fragments[frag.outer_owner(outer) as usize];
                let remote = owner.gid_to_vertex(frag.outer_gid(outer)).unwrap();
                assert!(owner.is_inner(remote));
                assert_ne!(owner.fid(), frag.fid());
            }
        }
    }

    #[test]
    fn test_community_partitioner_uses_column() {
        let mut graph = path_graph();
        graph.community_index.insert(0, 5);
        graph.community_index.insert(5, 5);
        assert_eq!(Partitioner::Community.owner(&graph, 0, 2), 1);
        assert_eq!(Partitioner::Community.owner(&graph, 5, 2), 1);
        assert_eq!(Partitioner::Community.owner(&graph, 2, 2), 0);
    }

    #[test]
    fn test_partitioner_from_str() {
        assert_eq!("Hash".parse::<Partitioner>().unwrap(), Partitioner::Hash);
        assert_eq!("range".parse::<Partitioner>().unwrap(), Partitioner::Segmented);
        assert!(matches!(
            "metis".parse::<Partitioner>(),
            Err(WCCError::UnknownPartitioner { .. })
        ));
    }

    #[test]
    fn test_zero_fragments_rejected() {
        let result = Fragment::build_fragments(&path_graph(), Partitioner::Hash, 0);
        assert!(matches!(result, Err(WCCError::InvalidArgument { .. })));
    }
}
