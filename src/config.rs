use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WCCError};
use crate::fragment::Partitioner;

/// Buffer size of the reader used when loading graph files.
pub const READ_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Largest vertex count a graph may declare. Local vertex handles are `u32`.
pub const MAX_VERTEX_COUNT: u64 = u32::MAX as u64;

/// Upper bound on the edges reserved up front from a file header.
pub const EDGE_RESERVE_LIMIT: usize = 1 << 24;

/// Default number of threads in each fragment's pool.
pub const DEFAULT_THREAD_NUM: usize = 4;

/// Default number of fragments the graph is split into.
pub const DEFAULT_FRAGMENT_NUM: u32 = 2;

/// Number of vertices tracked by one word of a dense vertex set.
pub const WORD_BITS: usize = u64::BITS as usize;

/// Configuration of one WCC run.
///
/// Every field has a default, so a YAML file only needs the keys it wants to
/// change:
///
/// ```yaml
/// thread_num: 8
/// fragment_num: 4
/// partitioner: segmented
/// ```
///
/// # Fields
///
/// * `thread_num` - Threads in each fragment's pool.
/// * `fragment_num` - Number of fragments (workers) the graph is split into.
/// * `partitioner` - Strategy assigning vertices to fragments.
/// * `max_supersteps` - Optional guard on incremental supersteps. `None` runs
///   until convergence. Hitting the guard is an error, never a truncated result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WCCConfig {
    pub thread_num: usize,
    pub fragment_num: u32,
    pub partitioner: Partitioner,
    pub max_supersteps: Option<u64>,
}

impl Default for WCCConfig {
    fn default() -> Self {
        Self {
            thread_num: DEFAULT_THREAD_NUM,
            fragment_num: DEFAULT_FRAGMENT_NUM,
            partitioner: Partitioner::Hash,
            max_supersteps: None,
        }
    }
}

impl WCCConfig {
    /// Loads a configuration from a YAML file and validates it.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Parses a configuration from YAML text and validates it.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: WCCConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations no run can satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.thread_num == 0 {
            return Err(WCCError::InvalidArgument {
                message: "thread_num must be at least 1".to_string(),
            });
        }
        if self.fragment_num == 0 {
            return Err(WCCError::InvalidArgument {
                message: "fragment_num must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
