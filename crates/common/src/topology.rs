//! Mount topology detection
//!
//! Decides whether the source, server-visible and cache roots live on one
//! filesystem ("unified", hard links possible) or on separate mounts
//! ("split", symbolic links or copies required).

use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::LinkKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    Unified,
    Split,
}

/// Observed storage layout. Constructed by [`detect`] at startup, or directly
/// in tests to inject a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub kind: TopologyKind,
    /// Whether symbolic links can be created next to source files
    pub symlinks_allowed: bool,
    /// Whether the source root sits on a network filesystem
    pub source_is_network: bool,
}

impl Topology {
    pub fn unified() -> Self {
        Self {
            kind: TopologyKind::Unified,
            symlinks_allowed: true,
            source_is_network: false,
        }
    }

    pub fn split(symlinks_allowed: bool) -> Self {
        Self {
            kind: TopologyKind::Split,
            symlinks_allowed,
            source_is_network: false,
        }
    }

    /// Link technique this layout supports when nothing forces a copy.
    pub fn preferred_link_kind(&self) -> LinkKind {
        match (self.kind, self.symlinks_allowed) {
            (TopologyKind::Unified, _) => LinkKind::Hardlink,
            (TopologyKind::Split, true) => LinkKind::Symlink,
            (TopologyKind::Split, false) => LinkKind::Copy,
        }
    }
}

/// The three configured roots compared during detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRoots {
    pub source_root: PathBuf,
    pub server_root: PathBuf,
    pub cache_root: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Inspect the roots and classify the layout.
///
/// Symlink support is probed by creating (and removing) a throwaway link in
/// the source root. `force_network` marks the source as network-mounted even
/// when the filesystem magic does not say so.
pub fn detect(roots: &MountRoots, force_network: bool) -> Result<Topology, TopologyError> {
    let source_dev = device_id(&roots.source_root)?;
    let server_dev = device_id(&roots.server_root)?;
    let cache_dev = device_id(&roots.cache_root)?;

    let kind = if source_dev == server_dev && source_dev == cache_dev {
        TopologyKind::Unified
    } else {
        TopologyKind::Split
    };

    let symlinks_allowed = probe_symlink(&roots.source_root);
    let source_is_network = force_network || is_network_filesystem(&roots.source_root);

    let topology = Topology {
        kind,
        symlinks_allowed,
        source_is_network,
    };

    if topology.preferred_link_kind() == LinkKind::Copy {
        tracing::warn!(
            source = %roots.source_root.display(),
            cache = %roots.cache_root.display(),
            "split topology without symlink support: falling back to COPY mode; \
             cached copies will diverge if source files change and will not be \
             re-promoted automatically"
        );
    } else {
        tracing::info!(?topology, "detected mount topology");
    }

    Ok(topology)
}

fn device_id(path: &Path) -> Result<u64, TopologyError> {
    std::fs::metadata(path)
        .map(|m| m.dev())
        .map_err(|source| TopologyError::Stat {
            path: path.to_path_buf(),
            source,
        })
}

fn probe_symlink(dir: &Path) -> bool {
    let probe = dir.join(format!(".tiercache-probe-{}", std::process::id()));
    let _ = std::fs::remove_file(&probe);
    match std::os::unix::fs::symlink(dir, &probe) {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "symlink probe failed");
            false
        }
    }
}

#[cfg(target_os = "linux")]
fn is_network_filesystem(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    const NFS_SUPER_MAGIC: u32 = 0x6969;
    const SMB_SUPER_MAGIC: u32 = 0x517b;
    const CIFS_MAGIC_NUMBER: u32 = 0xff53_4d42;
    const SMB2_MAGIC_NUMBER: u32 = 0xfe53_4d42;
    const FUSE_SUPER_MAGIC: u32 = 0x6573_5546;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: `stat` is a plain C struct for which all-zero is a valid value,
    // and `c_path` is a valid NUL-terminated string for the duration of the call.
    let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return false;
    }

    let magic = stat.f_type as u64 as u32;
    matches!(
        magic,
        NFS_SUPER_MAGIC | SMB_SUPER_MAGIC | CIFS_MAGIC_NUMBER | SMB2_MAGIC_NUMBER | FUSE_SUPER_MAGIC
    )
}

#[cfg(not(target_os = "linux"))]
fn is_network_filesystem(_path: &Path) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferred_link_kind() {
        assert_eq!(Topology::unified().preferred_link_kind(), LinkKind::Hardlink);
        assert_eq!(Topology::split(true).preferred_link_kind(), LinkKind::Symlink);
        assert_eq!(Topology::split(false).preferred_link_kind(), LinkKind::Copy);
    }

    #[test]
    fn test_detect_same_filesystem_is_unified() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("media");
        let cache = temp.path().join("cache");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::create_dir_all(&cache).unwrap();

        let roots = MountRoots {
            source_root: source.clone(),
            server_root: source,
            cache_root: cache,
        };
        let topology = detect(&roots, false).unwrap();
        assert_eq!(topology.kind, TopologyKind::Unified);
        assert!(topology.symlinks_allowed);
    }

    #[test]
    fn test_detect_missing_root_fails() {
        let temp = tempfile::tempdir().unwrap();
        let roots = MountRoots {
            source_root: temp.path().join("missing"),
            server_root: temp.path().to_path_buf(),
            cache_root: temp.path().to_path_buf(),
        };
        assert!(matches!(
            detect(&roots, false),
            Err(TopologyError::Stat { .. })
        ));
    }

    #[test]
    fn test_force_network_flag() {
        let temp = tempfile::tempdir().unwrap();
        let roots = MountRoots {
            source_root: temp.path().to_path_buf(),
            server_root: temp.path().to_path_buf(),
            cache_root: temp.path().to_path_buf(),
        };
        assert!(detect(&roots, true).unwrap().source_is_network);
    }
}
