/// Query operations over a whole, unpartitioned graph.
///
/// Vertex identifiers are global ids. The partitioner walks the input graph
/// through this trait when it cuts it into fragments.
pub trait GraphQuery {
    /// Returns the out-neighbors of a vertex, or an empty slice when the vertex
    /// does not exist.
    fn read_neighbor(&self, vertex_id: u64) -> &[u64];

    /// Checks if a specific vertex exists in the graph.
    fn has_vertex(&self, vertex_id: u64) -> bool;

    /// Number of directed edges, counting multi-edges.
    fn edge_count(&self) -> u64;
}
