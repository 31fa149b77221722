use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{EDGE_RESERVE_LIMIT, MAX_VERTEX_COUNT, READ_BUFFER_SIZE};
use crate::error::{Result, WCCError};
use crate::types::graph_query::GraphQuery;

pub mod graph_query;

/// A CSR (Compressed Sparse Row) representation of a whole graph.
///
/// This is the input handed to the partitioner. Vertex ids are the global ids
/// of the computation and are continuous integers `0..vertex_count`.
///
/// The text format read by [`CSRGraph::from_graph_file`] is line based:
///
/// ```text
/// t <vertex_count> <edge_count>
/// v <vertex_id> <label> [community_id]
/// e <src_id> <dst_id>
/// ```
#[derive(Debug, Clone, Default)]
pub struct CSRGraph {
    /// Total number of vertices in the graph
    pub vertex_count: u64,

    /// For each vertex i, its neighbors are stored in
    /// neighbor_list[offsets[i]..offsets[i + 1]]. Holds vertex_count + 1 entries.
    pub offsets: Vec<u64>,

    /// Flattened adjacency list segmented by `offsets`
    pub neighbor_list: Vec<u64>,

    /// Optional community assignment read from the vertex lines.
    /// Used by the community partitioner.
    pub community_index: BTreeMap<u64, u32>,
}

impl GraphQuery for CSRGraph {
    fn read_neighbor(&self, vertex_id: u64) -> &[u64] {
        if !self.has_vertex(vertex_id) {
            return &[];
        }
        let start = self.offsets[vertex_id as usize] as usize;
        let end = self.offsets[vertex_id as usize + 1] as usize;
        &self.neighbor_list[start..end]
    }

    fn has_vertex(&self, vertex_id: u64) -> bool {
        vertex_id < self.vertex_count
    }

    fn edge_count(&self) -> u64 {
        self.neighbor_list.len() as u64
    }
}

fn parse_token<T: FromStr>(token: &str, line: usize, what: &str) -> Result<T> {
    token.parse::<T>().map_err(|_| WCCError::GraphFormat {
        line,
        message: format!("cannot parse {what} from '{token}'"),
    })
}

impl CSRGraph {
    /// Builds a graph from an edge list. Edges are directed; multi-edges and
    /// self-loops are kept as given.
    pub fn from_edges(vertex_count: u64, edges: &[(u64, u64)]) -> Result<CSRGraph> {
        if vertex_count > MAX_VERTEX_COUNT {
            return Err(WCCError::InvalidArgument {
                message: format!("{vertex_count} vertices exceed the limit of {MAX_VERTEX_COUNT}"),
            });
        }
        let n = vertex_count as usize;
        let mut degrees = vec![0u64; n];
        for &(src, dst) in edges {
            if src >= vertex_count || dst >= vertex_count {
                return Err(WCCError::InvalidArgument {
                    message: format!(
                        "edge ({src}, {dst}) out of range for {vertex_count} vertices"
                    ),
                });
            }
            degrees[src as usize] += 1;
        }

        // Prefix sums of the degrees give the CSR offsets.
        let mut offsets = vec![0u64; n + 1];
        for v in 0..n {
            offsets[v + 1] = offsets[v] + degrees[v];
        }

        let mut cursor = offsets.clone();
        let mut neighbor_list = vec![0u64; edges.len()];
        for &(src, dst) in edges {
            let slot = &mut cursor[src as usize];
            neighbor_list[*slot as usize] = dst;
            *slot += 1;
        }

        Ok(Self {
            vertex_count,
            offsets,
            neighbor_list,
            community_index: BTreeMap::new(),
        })
    }

    /// Loads a graph from the line based text format.
    pub fn from_graph_file<P: AsRef<Path>>(file_path: P) -> Result<CSRGraph> {
        let path = file_path.as_ref();
        if !path.exists() {
            return Err(WCCError::NotFound { path: path.to_path_buf() });
        }
        let graph_file = File::open(path)?;
        let mut graph_reader = BufReader::with_capacity(READ_BUFFER_SIZE, graph_file);

        // Parse the header: t <vertex_count> <edge_count>
        let mut first_line = String::new();
        graph_reader.read_line(&mut first_line)?;
        let header: Vec<&str> = first_line.split_whitespace().collect();
        if header.len() != 3 || header[0] != "t" {
            return Err(WCCError::GraphFormat {
                line: 1,
                message: "expected header 't <vertex_count> <edge_count>'".to_string(),
            });
        }
        let vertex_count = parse_token::<u64>(header[1], 1, "vertex count")?;
        let edge_count = parse_token::<u64>(header[2], 1, "edge count")?;
        if vertex_count > MAX_VERTEX_COUNT {
            return Err(WCCError::GraphFormat {
                line: 1,
                message: format!("vertex count {vertex_count} exceeds the limit of {MAX_VERTEX_COUNT}"),
            });
        }
        let total_records = vertex_count.checked_add(edge_count).ok_or_else(|| WCCError::GraphFormat {
            line: 1,
            message: format!("record count {vertex_count} + {edge_count} overflows"),
        })?;

        // The header is only a hint, the edge lines decide the final size.
        let reserve = usize::try_from(edge_count).unwrap_or(usize::MAX).min(EDGE_RESERVE_LIMIT);
        let mut edges = Vec::with_capacity(reserve);
        let mut community_index = BTreeMap::<u64, u32>::new();

        let pb = ProgressBar::new(total_records);
        pb.set_style(ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"));
        pb.set_message("Graph Loading.");

        for (line_idx, line) in graph_reader.lines().enumerate() {
            let line = line?;
            let line_no = line_idx + 2;
            let tokens: Vec<&str> = line.split_whitespace().collect();

            match tokens.first() {
                None => continue,
                Some(&"v") => {
                    if tokens.len() < 2 {
                        return Err(WCCError::GraphFormat {
                            line: line_no,
                            message: "vertex line without id".to_string(),
                        });
                    }
                    let vid = parse_token::<u64>(tokens[1], line_no, "vertex id")?;
                    if vid >= vertex_count {
                        return Err(WCCError::GraphFormat {
                            line: line_no,
                            message: format!("vertex {vid} exceeds vertex count {vertex_count}"),
                        });
                    }
                    // Community information lives in the fourth column.
                    if tokens.len() >= 4 {
                        let community_id = parse_token::<u32>(tokens[3], line_no, "community id")?;
                        community_index.insert(vid, community_id);
                    }
                }
                Some(&"e") => {
                    if tokens.len() < 3 {
                        return Err(WCCError::GraphFormat {
                            line: line_no,
                            message: "edge line needs a source and a destination".to_string(),
                        });
                    }
                    let src = parse_token::<u64>(tokens[1], line_no, "source id")?;
                    let dst = parse_token::<u64>(tokens[2], line_no, "destination id")?;
                    if src >= vertex_count || dst >= vertex_count {
                        return Err(WCCError::GraphFormat {
                            line: line_no,
                            message: format!("edge ({src}, {dst}) exceeds vertex count {vertex_count}"),
                        });
                    }
                    edges.push((src, dst));
                }
                Some(other) if other.starts_with('#') => continue,
                Some(other) => {
                    return Err(WCCError::GraphFormat {
                        line: line_no,
                        message: format!("unknown record type '{other}'"),
                    });
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        let mut graph = Self::from_edges(vertex_count, &edges)?;
        graph.community_index = community_index;
        Ok(graph)
    }

    /// Writes the graph in the format read by [`CSRGraph::from_graph_file`].
    pub fn write_graph_file<P: AsRef<Path>>(&self, file_path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(file_path)?);
        writeln!(writer, "t {} {}", self.vertex_count, self.edge_count())?;
        for vertex_id in 0..self.vertex_count {
            match self.community_index.get(&vertex_id) {
                Some(community_id) => writeln!(writer, "v {vertex_id} 0 {community_id}")?,
                None => writeln!(writer, "v {vertex_id} 0")?,
            }
        }
        for src in 0..self.vertex_count {
            for dst in self.read_neighbor(src) {
                writeln!(writer, "e {src} {dst}")?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Returns a copy where every edge also exists in the reverse direction.
    /// Self-loops are kept once.
    pub fn symmetrize(&self) -> CSRGraph {
        let mut edges = Vec::with_capacity(self.neighbor_list.len() * 2);
        for src in 0..self.vertex_count {
            for &dst in self.read_neighbor(src) {
                edges.push((src, dst));
                if src != dst {
                    edges.push((dst, src));
                }
            }
        }
        let mut graph = Self::from_edges(self.vertex_count, &edges)
            .unwrap_or_else(|_| unreachable!("endpoints come from a valid graph"));
        graph.community_index = self.community_index.clone();
        graph
    }

    /// Generates a random directed multigraph with a fixed seed.
    pub fn random(vertex_count: u64, edge_count: usize, seed: u64) -> Result<CSRGraph> {
        if vertex_count > MAX_VERTEX_COUNT {
            return Err(WCCError::InvalidArgument {
                message: format!("{vertex_count} vertices exceed the limit of {MAX_VERTEX_COUNT}"),
            });
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let edges = if vertex_count == 0 {
            vec![]
        } else {
            (0..edge_count)
                .map(|_| (rng.gen_range(0..vertex_count), rng.gen_range(0..vertex_count)))
                .collect::<Vec<_>>()
        };
        Self::from_edges(vertex_count, &edges)
    }
}

#[cfg(test)]
mod test_type {
    use super::*;

    #[test]
    fn test_from_edges_builds_csr() {
        let graph = CSRGraph::from_edges(4, &[(2, 3), (0, 1), (0, 2), (0, 1)]).unwrap();
        assert_eq!(graph.offsets, vec![0, 3, 3, 4, 4]);
        assert_eq!(graph.read_neighbor(0), &[1, 2, 1]);
        assert_eq!(graph.read_neighbor(2), &[3]);
        assert!(graph.read_neighbor(1).is_empty());
        assert!(graph.read_neighbor(9).is_empty());
        assert!(graph.read_neighbor(0).contains(&2));
        assert!(!graph.read_neighbor(2).contains(&0));
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn test_out_of_range_edge_rejected() {
        let result = CSRGraph::from_edges(2, &[(0, 2)]);
        assert!(matches!(result, Err(WCCError::InvalidArgument { .. })));
    }

    #[test]
    fn test_symmetrize_keeps_self_loops_once() {
        let graph = CSRGraph::from_edges(3, &[(0, 1), (2, 2)]).unwrap().symmetrize();
        assert!(graph.read_neighbor(0).contains(&1));
        assert!(graph.read_neighbor(1).contains(&0));
        assert_eq!(graph.read_neighbor(2), &[2]);
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn test_example_graph_file() {
        let graph = CSRGraph::from_graph_file("data/example.graph").unwrap();
        assert_eq!(graph.vertex_count, 12);
        assert_eq!(graph.edge_count(), 10);
        assert_eq!(graph.community_index.get(&0), Some(&0));
        assert_eq!(graph.community_index.get(&11), Some(&2));
        assert!(graph.read_neighbor(0).contains(&1));
    }

    #[test]
    fn test_write_then_load() {
        let path = std::env::temp_dir().join(format!("fragwcc_write_{}.graph", std::process::id()));
        let mut graph = CSRGraph::random(20, 40, 7).unwrap();
        graph.community_index.insert(3, 1);
        graph.write_graph_file(&path).unwrap();

        let loaded = CSRGraph::from_graph_file(&path).unwrap();
        assert_eq!(loaded.offsets, graph.offsets);
        assert_eq!(loaded.neighbor_list, graph.neighbor_list);
        assert_eq!(loaded.community_index, graph.community_index);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let path = std::env::temp_dir().join(format!("fragwcc_bad_{}.graph", std::process::id()));
        std::fs::write(&path, "t 2 1\nv 0 0\nv 1 0\ne 0 x\n").unwrap();
        match CSRGraph::from_graph_file(&path) {
            Err(WCCError::GraphFormat { line, .. }) => assert_eq!(line, 4),
            other => panic!("unexpected result: {other:?}"),
        }
        let _ = std::fs::remove_file(&path);
    }

    fn load_header(name: &str, header: &str) -> Result<CSRGraph> {
        let path = std::env::temp_dir().join(format!("fragwcc_{name}_{}.graph", std::process::id()));
        std::fs::write(&path, format!("{header}\n")).unwrap();
        let result = CSRGraph::from_graph_file(&path);
        let _ = std::fs::remove_file(&path);
        result
    }

    #[test]
    fn test_huge_edge_count_in_header() {
        let result = load_header("huge_edges", "t 1 18446744073709551615");
        assert!(matches!(result, Err(WCCError::GraphFormat { line: 1, .. })));

        // A large but representable count only bounds the reservation.
        let graph = load_header("large_edges", "t 1 1099511627776").unwrap();
        assert_eq!(graph.vertex_count, 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_huge_vertex_count_in_header() {
        let result = load_header("huge_vertices", "t 18446744073709551615 1");
        assert!(matches!(result, Err(WCCError::GraphFormat { line: 1, .. })));
        let result = CSRGraph::from_edges(u64::MAX, &[]);
        assert!(matches!(result, Err(WCCError::InvalidArgument { .. })));
        assert!(CSRGraph::random(u64::MAX, 0, 0).is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = CSRGraph::from_graph_file("data/does_not_exist.graph");
        assert!(matches!(result, Err(WCCError::NotFound { .. })));
    }
}
