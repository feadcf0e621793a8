//! Input fingerprinting for cache keys

use crate::core::Job;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Produces a digest of a job's declared inputs
pub trait InputFingerprinter: Send + Sync {
    /// `None` leaves the job without a fingerprint
    fn fingerprint(&self, job: &Job) -> Option<String>;
}

/// Hashes declared input paths relative to a root directory
///
/// Files are hashed by content, directories recursively in sorted order.
/// Symlinks to directories contribute their target path.
pub struct FileFingerprinter {
    root: PathBuf,
}

impl FileFingerprinter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn hash_path(&self, hasher: &mut Sha256, path: &Path) -> io::Result<()> {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);

        // A symlinked directory is identified by its target, never walked,
        // so links back into the tree cannot recurse
        let link = fs::symlink_metadata(path)?;
        if link.file_type().is_symlink() && path.is_dir() {
            hasher.update(b"link:");
            hasher.update(fs::read_link(path)?.to_string_lossy().as_bytes());
            hasher.update([0u8]);
        } else if link.is_dir() {
            let mut children: Vec<PathBuf> = fs::read_dir(path)?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<io::Result<_>>()?;
            children.sort();
            for child in children {
                self.hash_path(hasher, &child)?;
            }
        } else {
            hasher.update(fs::read(path)?);
            hasher.update([0u8]);
        }
        Ok(())
    }
}

impl InputFingerprinter for FileFingerprinter {
    fn fingerprint(&self, job: &Job) -> Option<String> {
        if job.inputs.is_empty() {
            return None;
        }

        let mut hasher = Sha256::new();
        for input in &job.inputs {
            let path = self.root.join(input);
            if let Err(e) = self.hash_path(&mut hasher, &path) {
                warn!(
                    "Cannot fingerprint input '{}' of {}: {}",
                    input, job.id, e
                );
                return None;
            }
        }

        let digest = hex::encode(hasher.finalize());
        debug!("Fingerprinted {} input(s) of {}: {}", job.inputs.len(), job.id, digest);
        Some(digest)
    }
}
