//! Translation of media-server paths to host paths
//!
//! The media server usually runs in a container and reports paths like
//! `/data/movies/...`, while the host sees the same file under
//! `/mnt/user/movies/...`. Mappings are applied by longest matching prefix.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    /// Prefix as reported by the media server
    pub server: PathBuf,
    /// Prefix as seen on this host
    pub host: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    mappings: Vec<PathMapping>,
}

impl PathMapper {
    pub fn new(mut mappings: Vec<PathMapping>) -> Self {
        // Longest prefix first so nested mappings win
        mappings.sort_by(|a, b| {
            b.server
                .components()
                .count()
                .cmp(&a.server.components().count())
        });
        Self { mappings }
    }

    /// Map a server path to its host path; unmapped paths are returned as-is.
    pub fn to_host(&self, server_path: &Path) -> PathBuf {
        for mapping in &self.mappings {
            if let Ok(rest) = server_path.strip_prefix(&mapping.server) {
                return mapping.host.join(rest);
            }
        }
        server_path.to_path_buf()
    }
}
