//! Cheap content signatures for verifying tier transitions
//!
//! Media files are large, so a signature is the file size plus BLAKE3 digests
//! of the first and last [`SAMPLE_BYTES`]. Files smaller than two samples are
//! hashed whole.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

pub const SAMPLE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSignature {
    pub size: u64,
    head: blake3::Hash,
    tail: blake3::Hash,
}

impl ContentSignature {
    /// Compute the signature of the file at `path`, following symlinks.
    pub fn compute(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();

        if size <= SAMPLE_BYTES * 2 {
            let mut hasher = blake3::Hasher::new();
            io::copy(&mut file, &mut hasher)?;
            let digest = hasher.finalize();
            return Ok(Self {
                size,
                head: digest,
                tail: digest,
            });
        }

        let head = hash_range(&mut file, 0, SAMPLE_BYTES)?;
        let tail = hash_range(&mut file, size - SAMPLE_BYTES, SAMPLE_BYTES)?;
        Ok(Self { size, head, tail })
    }
}

fn hash_range(file: &mut File, offset: u64, len: u64) -> io::Result<blake3::Hash> {
    file.seek(SeekFrom::Start(offset))?;
    let mut hasher = blake3::Hasher::new();
    let copied = io::copy(&mut file.take(len), &mut hasher)?;
    if copied != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes at offset {}, read {}", len, offset, copied),
        ));
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_files_match() {
        let temp = tempfile::tempdir().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();
        assert_eq!(
            ContentSignature::compute(&a).unwrap(),
            ContentSignature::compute(&b).unwrap()
        );
    }

    #[test]
    fn test_different_content_differs() {
        let temp = tempfile::tempdir().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytez").unwrap();
        assert_ne!(
            ContentSignature::compute(&a).unwrap(),
            ContentSignature::compute(&b).unwrap()
        );
    }

    #[test]
    fn test_large_file_tail_change_is_detected() {
        let temp = tempfile::tempdir().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        let mut data = vec![7u8; (SAMPLE_BYTES * 3) as usize];
        std::fs::write(&a, &data).unwrap();
        let last = data.len() - 1;
        data[last] = 8;
        std::fs::write(&b, &data).unwrap();

        let sig_a = ContentSignature::compute(&a).unwrap();
        let sig_b = ContentSignature::compute(&b).unwrap();
        assert_eq!(sig_a.size, sig_b.size);
        assert_ne!(sig_a, sig_b);
    }

    #[test]
    fn test_signature_follows_symlinks() {
        let temp = tempfile::tempdir().unwrap();
        let a = temp.path().join("a");
        let link = temp.path().join("link");
        std::fs::write(&a, b"payload").unwrap();
        std::os::unix::fs::symlink(&a, &link).unwrap();
        assert_eq!(
            ContentSignature::compute(&a).unwrap(),
            ContentSignature::compute(&link).unwrap()
        );
    }
}
