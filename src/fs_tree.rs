//! File-tree model (§3, §4.A)
//!
//! Indexed view of the watched directory: a map from relative path to
//! either a `FileEntry` (descriptor + loader state) or a directory
//! marker, guarded by per-path locks so that readers of one path never
//! block writers of another (§5).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use md5::{Digest, Md5};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};

use crate::error::FsError;
use crate::types::FileDescriptor;
use crate::validation::path::validate_pathname;

/// Opaque handle to an in-progress loader, scoped to the file-tree that
/// issued it (§3 FileEntry.loading.tempHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderHandle(u64);

/// Loader state for a `FileEntry` (§3)
#[derive(Debug, Clone)]
enum LoaderState {
	Present,
	Loading {
		handle: LoaderHandle,
		temp_path: PathBuf,
		bytes_received: u64,
		expected: u64,
		/// Descriptor the path carried before this loader started; `None`
		/// for a create. Restored on cancellation.
		previous: Option<FileDescriptor>,
	},
}

#[derive(Debug, Clone)]
struct FileEntry {
	descriptor: FileDescriptor,
	state: LoaderState,
}

#[derive(Debug, Clone)]
enum TreeNode {
	File(FileEntry),
	Directory,
}

/// Indexed view of the watched directory, rooted at `root`.
pub struct FileTree {
	root: PathBuf,
	nodes: RwLock<HashMap<PathBuf, Arc<Mutex<TreeNode>>>>,
	next_handle: AtomicU64,
}

impl FileTree {
	pub fn new(root: impl Into<PathBuf>) -> FileTree {
		FileTree { root: root.into(), nodes: RwLock::new(HashMap::new()), next_handle: AtomicU64::new(1) }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn absolute(&self, path: &Path) -> PathBuf {
		self.root.join(path)
	}

	fn sidecar(&self, path: &Path) -> PathBuf {
		let mut name = path.file_name().unwrap_or_default().to_os_string();
		name.push(".bitbox-part");
		self.absolute(path).with_file_name(name)
	}

	async fn parent_exists(&self, path: &Path, nodes: &HashMap<PathBuf, Arc<Mutex<TreeNode>>>) -> bool {
		match path.parent() {
			None => true,
			Some(p) if p.as_os_str().is_empty() => true,
			Some(p) => match nodes.get(p) {
				Some(node) => matches!(&*node.lock().await, TreeNode::Directory),
				None => false,
			},
		}
	}

	/// Registers the descriptor of a file the detector found already
	/// present on disk at startup or after a scan; does not touch disk.
	pub async fn observe_file(&self, path: &Path, descriptor: FileDescriptor) {
		let mut nodes = self.nodes.write().await;
		nodes.insert(
			path.to_path_buf(),
			Arc::new(Mutex::new(TreeNode::File(FileEntry { descriptor, state: LoaderState::Present }))),
		);
	}

	/// Registers a directory the detector found already present on disk.
	pub async fn observe_directory(&self, path: &Path) {
		let mut nodes = self.nodes.write().await;
		nodes.insert(path.to_path_buf(), Arc::new(Mutex::new(TreeNode::Directory)));
	}

	/// Drops the tracked entry for a path the detector found already
	/// gone from disk; unlike `delete_file`/`delete_directory`, this
	/// does not touch disk itself.
	pub async fn forget(&self, path: &Path) {
		let mut nodes = self.nodes.write().await;
		nodes.remove(path);
	}

	/// Looks up the descriptor currently on record for `path`, if any and present.
	pub async fn descriptor_of(&self, path: &Path) -> Option<FileDescriptor> {
		let nodes = self.nodes.read().await;
		let node = nodes.get(path)?.clone();
		drop(nodes);
		let result = match &*node.lock().await {
			TreeNode::File(entry) if matches!(entry.state, LoaderState::Present) => {
				Some(entry.descriptor.clone())
			}
			_ => None,
		};
		result
	}

	/// `checkShortcut(descriptor) -> bool` (§4.A): if content with this
	/// digest already exists at another settled path, copy it locally to
	/// `target` and record it as present, avoiding a byte-range transfer.
	pub async fn check_shortcut(
		&self,
		target: &Path,
		descriptor: &FileDescriptor,
	) -> Result<bool, FsError> {
		validate_pathname(target)?;
		let source_path = {
			let nodes = self.nodes.read().await;
			let mut found = None;
			for (path, node) in nodes.iter() {
				if path == target {
					continue;
				}
				if let TreeNode::File(entry) = &*node.lock().await {
					if matches!(entry.state, LoaderState::Present) && entry.descriptor.md5 == descriptor.md5
					{
						found = Some(path.clone());
						break;
					}
				}
			}
			found
		};
		let Some(source_path) = source_path else {
			return Ok(false);
		};

		if let Some(parent) = target.parent() {
			let nodes = self.nodes.read().await;
			if !self.parent_exists(target, &nodes).await {
				return Err(FsError::ParentDoesNotExist { path: parent.display().to_string() });
			}
		}

		fs::copy(self.absolute(&source_path), self.absolute(target)).await?;
		let mut nodes = self.nodes.write().await;
		nodes.insert(
			target.to_path_buf(),
			Arc::new(Mutex::new(TreeNode::File(FileEntry {
				descriptor: descriptor.clone(),
				state: LoaderState::Present,
			}))),
		);
		Ok(true)
	}

	/// `createFileLoader(path, descriptor) -> handle|error` (§4.A)
	pub async fn create_file_loader(
		&self,
		path: &Path,
		descriptor: FileDescriptor,
	) -> Result<LoaderHandle, FsError> {
		validate_pathname(path)?;
		let mut nodes = self.nodes.write().await;
		if !self.parent_exists(path, &nodes).await {
			return Err(FsError::ParentDoesNotExist { path: path.display().to_string() });
		}
		if let Some(existing) = nodes.get(path) {
			return match &*existing.lock().await {
				TreeNode::Directory => {
					Err(FsError::PathNameAlreadyInUse { path: path.display().to_string() })
				}
				TreeNode::File(_) => Err(FsError::FileAlreadyExists { path: path.display().to_string() }),
			};
		}

		let handle = LoaderHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
		let temp_path = self.sidecar(path);
		let expected = descriptor.file_size;
		nodes.insert(
			path.to_path_buf(),
			Arc::new(Mutex::new(TreeNode::File(FileEntry {
				descriptor,
				state: LoaderState::Loading {
					handle,
					temp_path,
					bytes_received: 0,
					expected,
					previous: None,
				},
			}))),
		);
		Ok(handle)
	}

	/// `modifyFileLoader(path, descriptor) -> handle|error` (§4.A):
	/// allocated only when the existing descriptor differs and the
	/// incoming `lastModified` is not older than the one on record.
	pub async fn modify_file_loader(
		&self,
		path: &Path,
		descriptor: FileDescriptor,
	) -> Result<LoaderHandle, FsError> {
		validate_pathname(path)?;
		let nodes = self.nodes.read().await;
		let Some(existing) = nodes.get(path) else {
			return Err(FsError::FileDoesNotExist { path: path.display().to_string() });
		};
		let existing = existing.clone();
		drop(nodes);

		let mut guard = existing.lock().await;
		match &*guard {
			TreeNode::Directory => {
				return Err(FsError::PathNameAlreadyInUse { path: path.display().to_string() })
			}
			TreeNode::File(entry) => {
				if !matches!(entry.state, LoaderState::Present) {
					return Err(FsError::FileDoesNotExist { path: path.display().to_string() });
				}
				if entry.descriptor.md5 == descriptor.md5
					|| descriptor.last_modified < entry.descriptor.last_modified
					|| (descriptor.last_modified == entry.descriptor.last_modified
						&& descriptor.md5 <= entry.descriptor.md5)
				{
					return Err(FsError::FileAlreadyExists { path: path.display().to_string() });
				}
				let previous = Some(entry.descriptor.clone());
				let handle = LoaderHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
				let temp_path = self.sidecar(path);
				let expected = descriptor.file_size;
				*guard = TreeNode::File(FileEntry {
					descriptor,
					state: LoaderState::Loading { handle, temp_path, bytes_received: 0, expected, previous },
				});
				Ok(handle)
			}
		}
	}

	fn find_loading<'a>(entry: &'a FileEntry, handle: LoaderHandle) -> Result<&'a PathBuf, FsError> {
		match &entry.state {
			LoaderState::Loading { handle: h, temp_path, .. } if *h == handle => Ok(temp_path),
			_ => Err(FsError::Io("loader handle does not match an in-progress loader".to_string())),
		}
	}

	/// `writeFileBlock(handle, offset, bytes) -> ok|error` (§4.A)
	pub async fn write_file_block(
		&self,
		path: &Path,
		handle: LoaderHandle,
		offset: u64,
		bytes: &[u8],
	) -> Result<(), FsError> {
		let node = {
			let nodes = self.nodes.read().await;
			nodes.get(path).cloned().ok_or_else(|| FsError::FileDoesNotExist { path: path.display().to_string() })?
		};
		let mut guard = node.lock().await;
		let TreeNode::File(entry) = &mut *guard else {
			return Err(FsError::PathNameAlreadyInUse { path: path.display().to_string() });
		};
		let temp_path = Self::find_loading(entry, handle)?.clone();

		let mut file = fs::OpenOptions::new().create(true).write(true).open(&temp_path).await?;
		file.seek(std::io::SeekFrom::Start(offset)).await?;
		file.write_all(bytes).await?;

		if let LoaderState::Loading { bytes_received, .. } = &mut entry.state {
			*bytes_received = (*bytes_received).max(offset + bytes.len() as u64);
		}
		Ok(())
	}

	/// Reads `length` bytes at `position` from the settled content at
	/// `path`, for serving a peer's `FILE_BYTES_REQUEST`. Returns `None`
	/// if the on-disk digest no longer matches `expected_md5` (§4.F).
	pub async fn read_range(
		&self,
		path: &Path,
		expected_md5: &str,
		position: u64,
		length: u32,
	) -> Result<Option<Vec<u8>>, FsError> {
		use tokio::io::AsyncReadExt;

		let current = self.descriptor_of(path).await;
		if current.as_ref().map(|d| d.md5.as_str()) != Some(expected_md5) {
			return Ok(None);
		}
		let mut file = fs::File::open(self.absolute(path)).await?;
		file.seek(std::io::SeekFrom::Start(position)).await?;
		let mut buf = vec![0u8; length as usize];
		let mut total = 0;
		while total < buf.len() {
			let n = file.read(&mut buf[total..]).await?;
			if n == 0 {
				break;
			}
			total += n;
		}
		buf.truncate(total);
		Ok(Some(buf))
	}

	/// Verifies the sidecar's digest against the loader's descriptor and,
	/// on match, renames it into place and transitions the entry to
	/// `present`; on mismatch, cancels the loader.
	pub async fn finalize_loader(&self, path: &Path, handle: LoaderHandle) -> Result<bool, FsError> {
		let node = {
			let nodes = self.nodes.read().await;
			nodes.get(path).cloned().ok_or_else(|| FsError::FileDoesNotExist { path: path.display().to_string() })?
		};
		let mut guard = node.lock().await;
		let TreeNode::File(entry) = &mut *guard else {
			return Err(FsError::PathNameAlreadyInUse { path: path.display().to_string() });
		};
		let temp_path = Self::find_loading(entry, handle)?.clone();

		let content = fs::read(&temp_path).await?;
		let digest = hex::encode(Md5::digest(&content));
		if digest != entry.descriptor.md5 {
			let _ = fs::remove_file(&temp_path).await;
			drop(guard);
			self.cancel_file_loader(path, handle).await?;
			return Ok(false);
		}

		if let Some(parent) = self.absolute(path).parent() {
			fs::create_dir_all(parent).await.ok();
		}
		fs::rename(&temp_path, self.absolute(path)).await?;
		entry.state = LoaderState::Present;
		Ok(true)
	}

	/// `cancelFileLoader(handle)` (§4.A): discards the sidecar and
	/// restores the entry to its pre-loader state (absent for a create,
	/// present-with-previous-descriptor for a modify).
	pub async fn cancel_file_loader(&self, path: &Path, handle: LoaderHandle) -> Result<(), FsError> {
		let mut nodes = self.nodes.write().await;
		let Some(node) = nodes.get(path).cloned() else {
			return Ok(());
		};
		let mut guard = node.lock().await;
		let TreeNode::File(entry) = &*guard else {
			return Ok(());
		};
		let (temp_path, previous) = match &entry.state {
			LoaderState::Loading { handle: h, temp_path, previous, .. } if *h == handle => {
				(temp_path.clone(), previous.clone())
			}
			_ => return Ok(()),
		};
		let _ = fs::remove_file(&temp_path).await;
		match previous {
			Some(descriptor) => {
				*guard = TreeNode::File(FileEntry { descriptor, state: LoaderState::Present });
			}
			None => {
				drop(guard);
				nodes.remove(path);
			}
		}
		Ok(())
	}

	/// `deleteFile(path, descriptor)` (§4.F delete policy): deletes only
	/// if the local descriptor matches the incoming one, or the incoming
	/// `lastModified` is strictly newer.
	pub async fn delete_file(&self, path: &Path, descriptor: &FileDescriptor) -> Result<(), FsError> {
		validate_pathname(path)?;
		let mut nodes = self.nodes.write().await;
		let Some(node) = nodes.get(path).cloned() else {
			return Err(FsError::FileDoesNotExist { path: path.display().to_string() });
		};
		let guard = node.lock().await;
		let TreeNode::File(entry) = &*guard else {
			return Err(FsError::FileDoesNotExist { path: path.display().to_string() });
		};
		if !matches!(entry.state, LoaderState::Present) {
			return Err(FsError::FileDoesNotExist { path: path.display().to_string() });
		}
		let may_delete =
			entry.descriptor == *descriptor || descriptor.last_modified > entry.descriptor.last_modified;
		if !may_delete {
			return Err(FsError::NewerFileExists { path: path.display().to_string() });
		}
		drop(guard);
		fs::remove_file(self.absolute(path)).await?;
		nodes.remove(path);
		Ok(())
	}

	/// `makeDirectory(path)` (§4.A). Per the preserved source behavior
	/// (§9 open questions), this responds with an error when the
	/// directory already exists rather than treating it as success.
	pub async fn make_directory(&self, path: &Path) -> Result<(), FsError> {
		validate_pathname(path)?;
		let mut nodes = self.nodes.write().await;
		if !self.parent_exists(path, &nodes).await {
			return Err(FsError::ParentDoesNotExist { path: path.display().to_string() });
		}
		if nodes.contains_key(path) {
			return Err(FsError::PathNameAlreadyInUse { path: path.display().to_string() });
		}
		fs::create_dir(self.absolute(path)).await?;
		nodes.insert(path.to_path_buf(), Arc::new(Mutex::new(TreeNode::Directory)));
		Ok(())
	}

	/// `deleteDirectory(path)` (§4.A): requires an empty directory.
	pub async fn delete_directory(&self, path: &Path) -> Result<(), FsError> {
		validate_pathname(path)?;
		let mut nodes = self.nodes.write().await;
		match nodes.get(path) {
			None => return Err(FsError::FileDoesNotExist { path: path.display().to_string() }),
			Some(node) => {
				if !matches!(&*node.lock().await, TreeNode::Directory) {
					return Err(FsError::PathNameAlreadyInUse { path: path.display().to_string() });
				}
			}
		}
		let has_children = nodes.keys().any(|p| p != path && p.starts_with(path));
		if has_children {
			return Err(FsError::DirectoryNotEmpty { path: path.display().to_string() });
		}
		fs::remove_dir(self.absolute(path)).await?;
		nodes.remove(path);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn descriptor(md5: &str, last_modified: i64, file_size: u64) -> FileDescriptor {
		FileDescriptor { md5: md5.to_string(), last_modified, file_size }
	}

	#[tokio::test]
	async fn create_write_finalize_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let tree = FileTree::new(dir.path());
		let content = b"hello world";
		let digest = hex::encode(Md5::digest(content));
		let desc = descriptor(&digest, 1000, content.len() as u64);

		let handle = tree.create_file_loader(Path::new("f.txt"), desc.clone()).await.unwrap();
		tree.write_file_block(Path::new("f.txt"), handle, 0, content).await.unwrap();
		let ok = tree.finalize_loader(Path::new("f.txt"), handle).await.unwrap();
		assert!(ok);
		assert_eq!(tree.descriptor_of(Path::new("f.txt")).await, Some(desc));
		assert_eq!(tokio::fs::read(dir.path().join("f.txt")).await.unwrap(), content);
	}

	#[tokio::test]
	async fn digest_mismatch_cancels_loader() {
		let dir = tempfile::tempdir().unwrap();
		let tree = FileTree::new(dir.path());
		let desc = descriptor("deadbeef00000000000000000000000", 1000, 5);

		let handle = tree.create_file_loader(Path::new("f.txt"), desc).await.unwrap();
		tree.write_file_block(Path::new("f.txt"), handle, 0, b"wrong").await.unwrap();
		let ok = tree.finalize_loader(Path::new("f.txt"), handle).await.unwrap();
		assert!(!ok);
		assert_eq!(tree.descriptor_of(Path::new("f.txt")).await, None);
	}

	#[tokio::test]
	async fn create_rejects_duplicate_path() {
		let dir = tempfile::tempdir().unwrap();
		let tree = FileTree::new(dir.path());
		let desc = descriptor("a", 1, 0);
		tree.create_file_loader(Path::new("f.txt"), desc.clone()).await.unwrap();
		let err = tree.create_file_loader(Path::new("f.txt"), desc).await.unwrap_err();
		assert!(matches!(err, FsError::FileAlreadyExists { .. }));
	}

	#[tokio::test]
	async fn unsafe_pathname_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let tree = FileTree::new(dir.path());
		let err = tree.create_file_loader(Path::new("../escape"), descriptor("a", 1, 0)).await.unwrap_err();
		assert!(matches!(err, FsError::UnsafePathname { .. }));
	}

	#[tokio::test]
	async fn delete_rejects_when_local_is_newer() {
		let dir = tempfile::tempdir().unwrap();
		let tree = FileTree::new(dir.path());
		let local = descriptor("aaa", 2000, 0);
		tree.observe_file(Path::new("g"), local).await;
		tokio::fs::write(dir.path().join("g"), b"").await.unwrap();

		let incoming = descriptor("bbb", 1500, 0);
		let err = tree.delete_file(Path::new("g"), &incoming).await.unwrap_err();
		assert!(matches!(err, FsError::NewerFileExists { .. }));
	}

	#[tokio::test]
	async fn make_directory_rejects_existing() {
		let dir = tempfile::tempdir().unwrap();
		let tree = FileTree::new(dir.path());
		tree.make_directory(Path::new("sub")).await.unwrap();
		let err = tree.make_directory(Path::new("sub")).await.unwrap_err();
		assert!(matches!(err, FsError::PathNameAlreadyInUse { .. }));
	}

	#[tokio::test]
	async fn delete_directory_rejects_non_empty() {
		let dir = tempfile::tempdir().unwrap();
		let tree = FileTree::new(dir.path());
		tree.make_directory(Path::new("sub")).await.unwrap();
		tree.observe_file(Path::new("sub/f.txt"), descriptor("a", 1, 0)).await;
		let err = tree.delete_directory(Path::new("sub")).await.unwrap_err();
		assert!(matches!(err, FsError::DirectoryNotEmpty { .. }));
	}
}

// vim: ts=4
