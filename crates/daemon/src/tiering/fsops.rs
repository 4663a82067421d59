//! Blocking filesystem primitives used by the tiering protocols
//!
//! Everything here runs inside `spawn_blocking`. Temporary artifacts use
//! fixed names next to their final location so crash recovery can find and
//! classify them:
//!
//! - `<cached>.tiercache-partial`: an in-progress copy into the cache
//! - `<name>.tiercache-backup`: the original file during a promote
//! - `.<name>.tiercache-link`: a link staged before being renamed into place
//! - `.<name>.tiercache-restore`: bytes staged during a demote

use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use common::types::LinkKind;

pub const PARTIAL_SUFFIX: &str = ".tiercache-partial";
pub const BACKUP_SUFFIX: &str = ".tiercache-backup";
pub const LINK_SUFFIX: &str = ".tiercache-link";
pub const RESTORE_SUFFIX: &str = ".tiercache-restore";

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn hidden_sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(".");
    if let Some(file_name) = path.file_name() {
        name.push(file_name);
    }
    name.push(suffix);
    path.with_file_name(name)
}

pub fn partial_path(cached: &Path) -> PathBuf {
    with_suffix(cached, PARTIAL_SUFFIX)
}

pub fn backup_path(canonical: &Path) -> PathBuf {
    with_suffix(canonical, BACKUP_SUFFIX)
}

pub fn staging_link_path(canonical: &Path) -> PathBuf {
    hidden_sibling(canonical, LINK_SUFFIX)
}

pub fn restore_path(canonical: &Path) -> PathBuf {
    hidden_sibling(canonical, RESTORE_SUFFIX)
}

/// Kind of temporary artifact a file name denotes, with the path it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Partial { cached: PathBuf },
    Backup { canonical: PathBuf },
    StagedLink { canonical: PathBuf },
    Restore { canonical: PathBuf },
}

pub fn classify_artifact(path: &Path) -> Option<Artifact> {
    let name = path.file_name()?.to_str()?;

    if let Some(stem) = name.strip_suffix(PARTIAL_SUFFIX) {
        return Some(Artifact::Partial {
            cached: path.with_file_name(stem),
        });
    }
    if let Some(stem) = name.strip_suffix(BACKUP_SUFFIX) {
        return Some(Artifact::Backup {
            canonical: path.with_file_name(stem),
        });
    }
    let hidden = name.strip_prefix('.')?;
    if let Some(stem) = hidden.strip_suffix(LINK_SUFFIX) {
        return Some(Artifact::StagedLink {
            canonical: path.with_file_name(stem),
        });
    }
    if let Some(stem) = hidden.strip_suffix(RESTORE_SUFFIX) {
        return Some(Artifact::Restore {
            canonical: path.with_file_name(stem),
        });
    }
    None
}

pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Whether anything (including a dangling symlink) exists at `path`.
pub fn exists_no_follow(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Copy `src` to `dest` through a partial file, then rename into place.
/// Returns the number of bytes copied.
pub fn copy_into_place(src: &Path, dest: &Path) -> io::Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = partial_path(dest);
    let result = (|| -> io::Result<u64> {
        let copied = fs::copy(src, &partial)?;
        File::open(&partial)?.sync_all()?;
        fs::rename(&partial, dest)?;
        Ok(copied)
    })();
    if result.is_err() {
        let _ = remove_if_exists(&partial);
    }
    result
}

/// Preserve `canonical` at its backup name without moving it. A hard link is
/// preferred; a byte copy is used where the directory refuses links.
pub fn preserve_backup(canonical: &Path) -> io::Result<PathBuf> {
    let backup = backup_path(canonical);
    remove_if_exists(&backup)?;
    if let Err(err) = fs::hard_link(canonical, &backup) {
        tracing::debug!(path = %canonical.display(), %err, "hard link backup refused, copying");
        fs::copy(canonical, &backup)?;
    }
    Ok(backup)
}

/// Atomically replace `canonical` with a link of `kind` to `cached`.
pub fn swap_in_link(canonical: &Path, cached: &Path, kind: LinkKind) -> io::Result<()> {
    let staging = staging_link_path(canonical);
    remove_if_exists(&staging)?;
    let result = (|| -> io::Result<()> {
        match kind {
            LinkKind::Hardlink => fs::hard_link(cached, &staging)?,
            LinkKind::Symlink => std::os::unix::fs::symlink(cached, &staging)?,
            LinkKind::Copy => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "copy entries keep the canonical file in place",
                ))
            }
        }
        fs::rename(&staging, canonical)
    })();
    if result.is_err() {
        let _ = remove_if_exists(&staging);
    }
    result
}

/// Whether `canonical` currently resolves through a link to `cached`.
pub fn is_link_to(canonical: &Path, cached: &Path) -> io::Result<Option<LinkKind>> {
    let meta = fs::symlink_metadata(canonical)?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(canonical)?;
        return Ok((target == cached).then_some(LinkKind::Symlink));
    }
    match fs::symlink_metadata(cached) {
        Ok(cached_meta) if same_inode(&meta, &cached_meta) => Ok(Some(LinkKind::Hardlink)),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
    Ok(same_inode(&fs::symlink_metadata(a)?, &fs::symlink_metadata(b)?))
}

fn same_inode(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    a.dev() == b.dev() && a.ino() == b.ino()
}

/// Files and symlinks below `root`; directories are descended without
/// following symlinks.
pub fn walk_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}
