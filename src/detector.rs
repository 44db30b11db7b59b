//! Change detector (§4.B)
//!
//! Periodic full scan of the watched directory, diffed against the
//! previous scan to produce a stream of events. Unchanged files are
//! recognized by `(size, mtime)` alone so the detector does not rehash
//! content that has not moved; only new or touched paths pay for an
//! MD5 pass.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};
use tokio::sync::mpsc;

use crate::logging::*;
use crate::types::FileDescriptor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorEvent {
	FileCreate { path: PathBuf, descriptor: FileDescriptor },
	FileModify { path: PathBuf, descriptor: FileDescriptor },
	FileDelete { path: PathBuf, descriptor: FileDescriptor },
	DirectoryCreate { path: PathBuf },
	DirectoryDelete { path: PathBuf },
}

#[derive(Clone)]
struct CacheEntry {
	size: u64,
	mtime: SystemTime,
	descriptor: FileDescriptor,
}

/// The sidecar extension used for in-progress loaders (§6 "Persisted
/// state"); the detector must never treat one as a real file.
const SIDECAR_SUFFIX: &str = ".bitbox-part";

pub struct Detector {
	root: PathBuf,
	files: HashMap<PathBuf, CacheEntry>,
	directories: std::collections::HashSet<PathBuf>,
}

impl Detector {
	pub fn new(root: impl Into<PathBuf>) -> Detector {
		Detector { root: root.into(), files: HashMap::new(), directories: Default::default() }
	}

	/// Runs one scan cycle, sending events on `events` as they are
	/// found (duplicate events within the same cycle are impossible by
	/// construction: each path is visited once per scan).
	pub async fn scan_once(&mut self, events: &mpsc::UnboundedSender<DetectorEvent>) {
		let mut seen_files = HashMap::new();
		let mut seen_dirs = std::collections::HashSet::new();

		if let Err(e) = self.walk(&self.root.clone(), Path::new(""), &mut seen_files, &mut seen_dirs).await {
			warn!("scan of {:?} failed: {}", self.root, e);
			return;
		}

		for (path, entry) in &seen_files {
			match self.files.get(path) {
				None => {
					let _ = events.send(DetectorEvent::FileCreate { path: path.clone(), descriptor: entry.descriptor.clone() });
				}
				Some(previous) if previous.descriptor.md5 != entry.descriptor.md5 => {
					let _ = events.send(DetectorEvent::FileModify { path: path.clone(), descriptor: entry.descriptor.clone() });
				}
				Some(_) => {}
			}
		}
		for (path, previous) in &self.files {
			if !seen_files.contains_key(path) {
				let _ = events.send(DetectorEvent::FileDelete { path: path.clone(), descriptor: previous.descriptor.clone() });
			}
		}
		for path in &seen_dirs {
			if !self.directories.contains(path) {
				let _ = events.send(DetectorEvent::DirectoryCreate { path: path.clone() });
			}
		}
		for path in &self.directories {
			if !seen_dirs.contains(path) {
				let _ = events.send(DetectorEvent::DirectoryDelete { path: path.clone() });
			}
		}

		self.files = seen_files;
		self.directories = seen_dirs;
	}

	fn walk<'a>(
		&'a self,
		absolute: &'a Path,
		relative: &'a Path,
		seen_files: &'a mut HashMap<PathBuf, CacheEntry>,
		seen_dirs: &'a mut std::collections::HashSet<PathBuf>,
	) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + 'a>> {
		Box::pin(async move {
			let mut read_dir = tokio::fs::read_dir(absolute).await?;
			while let Some(entry) = read_dir.next_entry().await? {
				let file_type = entry.file_type().await?;
				let name = entry.file_name();
				if name.to_string_lossy().ends_with(SIDECAR_SUFFIX) {
					continue;
				}
				let child_relative = relative.join(&name);
				let child_absolute = entry.path();

				if file_type.is_dir() {
					seen_dirs.insert(child_relative.clone());
					self.walk(&child_absolute, &child_relative, seen_files, seen_dirs).await?;
				} else if file_type.is_file() {
					let metadata = entry.metadata().await?;
					let mtime = metadata.modified().unwrap_or(UNIX_EPOCH);
					let size = metadata.len();

					let descriptor = match self.files.get(&child_relative) {
						Some(cached) if cached.size == size && cached.mtime == mtime => cached.descriptor.clone(),
						_ => {
							let content = tokio::fs::read(&child_absolute).await?;
							let digest = hex::encode(Md5::digest(&content));
							FileDescriptor {
								md5: digest,
								last_modified: mtime
									.duration_since(UNIX_EPOCH)
									.map(|d| d.as_secs() as i64)
									.unwrap_or(0),
								file_size: size,
							}
						}
					};
					seen_files.insert(child_relative, CacheEntry { size, mtime, descriptor });
				}
			}
			Ok(())
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn first_scan_emits_creates() {
		let dir = tempfile::tempdir().unwrap();
		tokio::fs::write(dir.path().join("a.txt"), b"hello").await.unwrap();
		tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();

		let mut detector = Detector::new(dir.path());
		let (tx, mut rx) = mpsc::unbounded_channel();
		detector.scan_once(&tx).await;
		drop(tx);

		let mut events = Vec::new();
		while let Some(e) = rx.recv().await {
			events.push(e);
		}
		assert!(events.iter().any(|e| matches!(e, DetectorEvent::FileCreate { path, .. } if path == Path::new("a.txt"))));
		assert!(events.iter().any(|e| matches!(e, DetectorEvent::DirectoryCreate { path } if path == Path::new("sub"))));
	}

	#[tokio::test]
	async fn second_scan_is_quiet_when_nothing_changed() {
		let dir = tempfile::tempdir().unwrap();
		tokio::fs::write(dir.path().join("a.txt"), b"hello").await.unwrap();

		let mut detector = Detector::new(dir.path());
		let (tx, mut rx) = mpsc::unbounded_channel();
		detector.scan_once(&tx).await;
		while rx.try_recv().is_ok() {}

		detector.scan_once(&tx).await;
		drop(tx);
		assert!(rx.recv().await.is_none());
	}

	#[tokio::test]
	async fn delete_is_detected() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("a.txt");
		tokio::fs::write(&path, b"hello").await.unwrap();

		let mut detector = Detector::new(dir.path());
		let (tx, mut rx) = mpsc::unbounded_channel();
		detector.scan_once(&tx).await;
		while rx.try_recv().is_ok() {}

		tokio::fs::remove_file(&path).await.unwrap();
		detector.scan_once(&tx).await;
		drop(tx);

		let events: Vec<_> = {
			let mut v = Vec::new();
			let mut rx = rx;
			while let Some(e) = rx.recv().await {
				v.push(e);
			}
			v
		};
		assert!(events.iter().any(|e| matches!(e, DetectorEvent::FileDelete { path, .. } if path == Path::new("a.txt"))));
	}

	#[tokio::test]
	async fn sidecar_files_are_ignored() {
		let dir = tempfile::tempdir().unwrap();
		tokio::fs::write(dir.path().join("f.txt.bitbox-part"), b"partial").await.unwrap();

		let mut detector = Detector::new(dir.path());
		let (tx, mut rx) = mpsc::unbounded_channel();
		detector.scan_once(&tx).await;
		drop(tx);
		assert!(rx.recv().await.is_none());
	}
}

// vim: ts=4
