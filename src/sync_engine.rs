//! Sync engine — the core protocol (§4.F)
//!
//! Owns the file-transfer sub-protocols: maps local change-detector
//! events onto outbound requests, and applies inbound requests and
//! byte-range responses against the file-tree model.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::ConfigWatch;
use crate::detector::DetectorEvent;
use crate::error::FsError;
use crate::fs_tree::{FileTree, LoaderHandle};
use crate::logging::*;
use crate::peer::{InboundHandler, OutboundQueue, PeerRegistry};
use crate::protocol::Message;
use crate::types::FileDescriptor;

/// `{ path, descriptor, cursor, blockSize, deadline }` (§3 PendingTransfer)
struct PendingTransfer {
	path: PathBuf,
	descriptor: FileDescriptor,
	cursor: u64,
	handle: LoaderHandle,
	deadline: Instant,
}

type TransferKey = (PathBuf, String);

pub struct SyncEngine {
	tree: Arc<FileTree>,
	registry: Arc<PeerRegistry>,
	config: ConfigWatch,
	pending: Mutex<HashMap<TransferKey, PendingTransfer>>,
}

impl SyncEngine {
	pub fn new(tree: Arc<FileTree>, registry: Arc<PeerRegistry>, config: ConfigWatch) -> Arc<SyncEngine> {
		Arc::new(SyncEngine { tree, registry, config, pending: Mutex::new(HashMap::new()) })
	}

	fn block_size(&self) -> u64 {
		self.config.borrow().block_size
	}

	fn transfer_deadline(&self) -> Instant {
		Instant::now() + Duration::from_secs(self.config.borrow().sync_interval * 4)
	}

	/// Maps one local change-detector event onto the corresponding
	/// request, fanned out to every `ACTIVE` peer.
	pub async fn broadcast_event(&self, event: DetectorEvent) {
		let message = match event {
			DetectorEvent::FileCreate { path, descriptor } => Message::FileCreateRequest {
				path_name: path_name(&path),
				descriptor,
			},
			DetectorEvent::FileModify { path, descriptor } => Message::FileModifyRequest {
				path_name: path_name(&path),
				descriptor,
			},
			DetectorEvent::FileDelete { path, descriptor } => Message::FileDeleteRequest {
				path_name: path_name(&path),
				descriptor,
			},
			DetectorEvent::DirectoryCreate { path } => {
				Message::DirectoryCreateRequest { path_name: path_name(&path) }
			}
			DetectorEvent::DirectoryDelete { path } => {
				Message::DirectoryDeleteRequest { path_name: path_name(&path) }
			}
		};
		for peer in self.registry.get_active() {
			peer.outbound.push(message.clone());
		}
	}

	async fn begin_pull(&self, outbound: &OutboundQueue, path: PathBuf, descriptor: FileDescriptor, handle: LoaderHandle) {
		let length = descriptor.file_size.min(self.block_size());
		let key = (path.clone(), descriptor.md5.clone());
		self.pending.lock().await.insert(
			key,
			PendingTransfer { path: path.clone(), descriptor: descriptor.clone(), cursor: 0, handle, deadline: self.transfer_deadline() },
		);
		outbound.push(Message::FileBytesRequest {
			path_name: path_name(&path),
			descriptor,
			position: 0,
			length: length as u32,
		});
	}

	async fn handle_create_or_modify(
		&self,
		is_create: bool,
		path_name_str: String,
		descriptor: FileDescriptor,
		outbound: &OutboundQueue,
	) {
		let path = PathBuf::from(&path_name_str);
		let response = |status: bool, message: &str, descriptor: FileDescriptor| {
			if is_create {
				Message::FileCreateResponse { path_name: path_name_str.clone(), descriptor, status, message: message.to_string() }
			} else {
				Message::FileModifyResponse { path_name: path_name_str.clone(), descriptor, status, message: message.to_string() }
			}
		};

		match self.tree.check_shortcut(&path, &descriptor).await {
			Ok(true) => {
				outbound.push(response(true, "file loader ready", descriptor));
				return;
			}
			Ok(false) => {}
			Err(e) => {
				outbound.push(response(false, &e.to_string(), descriptor));
				return;
			}
		}

		let allocated = if is_create {
			self.tree.create_file_loader(&path, descriptor.clone()).await
		} else {
			self.tree.modify_file_loader(&path, descriptor.clone()).await
		};

		match allocated {
			Ok(handle) => {
				outbound.push(response(true, "file loader ready", descriptor.clone()));
				self.begin_pull(outbound, path, descriptor, handle).await;
			}
			Err(e) => outbound.push(response(false, &e.to_string(), descriptor)),
		}
	}

	async fn handle_delete(&self, path_name_str: String, descriptor: FileDescriptor, outbound: &OutboundQueue) {
		let path = PathBuf::from(&path_name_str);
		match self.tree.delete_file(&path, &descriptor).await {
			Ok(()) => outbound.push(Message::FileDeleteResponse {
				path_name: path_name_str,
				descriptor,
				status: true,
				message: "deleted".to_string(),
			}),
			Err(e) => outbound.push(Message::FileDeleteResponse {
				path_name: path_name_str,
				descriptor,
				status: false,
				message: e.to_string(),
			}),
		}
	}

	async fn handle_bytes_request(
		&self,
		path_name_str: String,
		descriptor: FileDescriptor,
		position: u64,
		length: u32,
		outbound: &OutboundQueue,
	) {
		let path = PathBuf::from(&path_name_str);
		let result = self.tree.read_range(&path, &descriptor.md5, position, length).await;
		let (status, content, message) = match result {
			Ok(Some(bytes)) => (true, BASE64.encode(bytes), "ok".to_string()),
			Ok(None) => (false, String::new(), "content changed since scan".to_string()),
			Err(e) => (false, String::new(), e.to_string()),
		};
		outbound.push(Message::FileBytesResponse { path_name: path_name_str, descriptor, position, content, status, message });
	}

	async fn handle_bytes_response(
		&self,
		path_name_str: String,
		descriptor: FileDescriptor,
		position: u64,
		content: String,
		status: bool,
		outbound: &OutboundQueue,
	) {
		let key = (PathBuf::from(&path_name_str), descriptor.md5.clone());
		let mut pending = self.pending.lock().await;
		let Some(transfer) = pending.get_mut(&key) else {
			return;
		};

		if !status {
			let transfer = pending.remove(&key).expect("checked above");
			drop(pending);
			let _ = self.tree.cancel_file_loader(&transfer.path, transfer.handle).await;
			return;
		}

		let bytes = match BASE64.decode(content.as_bytes()) {
			Ok(b) => b,
			Err(e) => {
				warn!("peer sent unparseable base64 for {}: {}", path_name_str, e);
				return;
			}
		};
		let handle = transfer.handle;
		let path = transfer.path.clone();
		if let Err(e) = self.tree.write_file_block(&path, handle, position, &bytes).await {
			warn!("writing block for {}: {}", path_name_str, e);
			pending.remove(&key);
			drop(pending);
			let _ = self.tree.cancel_file_loader(&path, handle).await;
			return;
		}
		transfer.cursor += bytes.len() as u64;

		if transfer.cursor < transfer.descriptor.file_size {
			let next_length = (transfer.descriptor.file_size - transfer.cursor).min(self.block_size());
			let next_position = transfer.cursor;
			let descriptor = transfer.descriptor.clone();
			drop(pending);
			outbound.push(Message::FileBytesRequest {
				path_name: path_name_str,
				descriptor,
				position: next_position,
				length: next_length as u32,
			});
		} else {
			pending.remove(&key);
			drop(pending);
			match self.tree.finalize_loader(&path, handle).await {
				Ok(true) => info!("transfer of {} complete", path_name_str),
				Ok(false) => warn!("transfer of {}: digest mismatch, discarded", path_name_str),
				Err(e) => warn!("finalizing {}: {}", path_name_str, e),
			}
		}
	}

	async fn handle_directory_create(&self, path_name_str: String, outbound: &OutboundQueue) {
		let path = PathBuf::from(&path_name_str);
		match self.tree.make_directory(&path).await {
			Ok(()) => outbound.push(Message::DirectoryCreateResponse {
				path_name: path_name_str,
				status: true,
				message: "created".to_string(),
			}),
			Err(FsError::PathNameAlreadyInUse { .. }) => outbound.push(Message::DirectoryCreateResponse {
				path_name: path_name_str,
				status: false,
				message: "pathname already exists".to_string(),
			}),
			Err(e) => outbound.push(Message::DirectoryCreateResponse {
				path_name: path_name_str,
				status: false,
				message: e.to_string(),
			}),
		}
	}

	async fn handle_directory_delete(&self, path_name_str: String, outbound: &OutboundQueue) {
		let path = PathBuf::from(&path_name_str);
		match self.tree.delete_directory(&path).await {
			Ok(()) => outbound.push(Message::DirectoryDeleteResponse {
				path_name: path_name_str,
				status: true,
				message: "deleted".to_string(),
			}),
			Err(e) => outbound.push(Message::DirectoryDeleteResponse {
				path_name: path_name_str,
				status: false,
				message: e.to_string(),
			}),
		}
	}

	/// Cancels any transfer past its deadline (§5 cancellation rule).
	pub async fn expire_stale_transfers(&self) {
		let mut pending = self.pending.lock().await;
		let now = Instant::now();
		let expired: Vec<TransferKey> =
			pending.iter().filter(|(_, t)| now >= t.deadline).map(|(k, _)| k.clone()).collect();
		for key in expired {
			if let Some(transfer) = pending.remove(&key) {
				let _ = self.tree.cancel_file_loader(&transfer.path, transfer.handle).await;
			}
		}
	}
}

fn path_name(path: &std::path::Path) -> String {
	path.to_string_lossy().replace('\\', "/")
}

#[async_trait]
impl InboundHandler for SyncEngine {
	async fn handle(&self, _remote: &crate::types::HostPort, message: Message, outbound: &OutboundQueue) {
		match message {
			Message::FileCreateRequest { path_name, descriptor } => {
				self.handle_create_or_modify(true, path_name, descriptor, outbound).await
			}
			Message::FileModifyRequest { path_name, descriptor } => {
				self.handle_create_or_modify(false, path_name, descriptor, outbound).await
			}
			Message::FileDeleteRequest { path_name, descriptor } => {
				self.handle_delete(path_name, descriptor, outbound).await
			}
			Message::FileBytesRequest { path_name, descriptor, position, length } => {
				self.handle_bytes_request(path_name, descriptor, position, length, outbound).await
			}
			Message::FileBytesResponse { path_name, descriptor, position, content, status, .. } => {
				self.handle_bytes_response(path_name, descriptor, position, content, status, outbound).await
			}
			Message::DirectoryCreateRequest { path_name } => self.handle_directory_create(path_name, outbound).await,
			Message::DirectoryDeleteRequest { path_name } => self.handle_directory_delete(path_name, outbound).await,
			Message::FileCreateResponse { path_name, status, message, .. }
			| Message::FileModifyResponse { path_name, status, message, .. }
			| Message::FileDeleteResponse { path_name, status, message, .. } => {
				if !status {
					debug!("{}: peer rejected request: {}", path_name, message);
				}
			}
			Message::DirectoryCreateResponse { path_name, status, message }
			| Message::DirectoryDeleteResponse { path_name, status, message } => {
				if !status {
					debug!("{}: peer rejected directory request: {}", path_name, message);
				}
			}
			Message::HandshakeRequest { .. }
			| Message::HandshakeResponse { .. }
			| Message::ConnectionRefused { .. }
			| Message::InvalidProtocol { .. }
			| Message::KeepAlive => {
				// Consumed by the peer connection state machine before reaching here.
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::peer::OutboundQueue;
	use md5::Digest;
	use std::path::Path;
	use tokio::sync::watch;

	fn descriptor(md5: &str, last_modified: i64, size: u64) -> FileDescriptor {
		FileDescriptor { md5: md5.to_string(), last_modified, file_size: size }
	}

	fn engine_for(dir: &std::path::Path) -> Arc<SyncEngine> {
		let tree = Arc::new(FileTree::new(dir));
		let registry = Arc::new(PeerRegistry::new(8));
		let (_tx, rx) = watch::channel(crate::config::Config::default());
		SyncEngine::new(tree, registry, rx)
	}

	#[tokio::test]
	async fn create_request_allocates_loader_and_requests_bytes() {
		let dir = tempfile::tempdir().unwrap();
		let engine = engine_for(dir.path());
		let outbound = OutboundQueue::new();
		let descriptor = descriptor("abc", 1000, 5);

		engine.handle_create_or_modify(true, "f.txt".to_string(), descriptor.clone(), &outbound).await;

		let first = outbound.take().await.unwrap();
		assert!(matches!(first, Message::FileCreateResponse { status: true, .. }));
		let second = outbound.take().await.unwrap();
		assert!(matches!(second, Message::FileBytesRequest { position: 0, length: 5, .. }));
	}

	#[tokio::test]
	async fn bytes_response_completes_transfer_on_digest_match() {
		let dir = tempfile::tempdir().unwrap();
		let engine = engine_for(dir.path());
		let outbound = OutboundQueue::new();
		let content = b"hello";
		let digest = hex::encode(md5::Md5::digest(content));
		let descriptor = descriptor(&digest, 1000, content.len() as u64);

		engine.handle_create_or_modify(true, "f.txt".to_string(), descriptor.clone(), &outbound).await;
		outbound.take().await; // response
		outbound.take().await; // bytes request

		engine
			.handle_bytes_response(
				"f.txt".to_string(),
				descriptor,
				0,
				base64::engine::general_purpose::STANDARD.encode(content),
				true,
				&outbound,
			)
			.await;

		assert_eq!(tokio::fs::read(dir.path().join("f.txt")).await.unwrap(), content);
	}

	#[tokio::test]
	async fn directory_create_rejects_existing() {
		let dir = tempfile::tempdir().unwrap();
		let engine = engine_for(dir.path());
		let outbound = OutboundQueue::new();

		engine.handle_directory_create("sub".to_string(), &outbound).await;
		let first = outbound.take().await.unwrap();
		assert!(matches!(first, Message::DirectoryCreateResponse { status: true, .. }));

		engine.handle_directory_create("sub".to_string(), &outbound).await;
		let second = outbound.take().await.unwrap();
		assert!(matches!(second, Message::DirectoryCreateResponse { status: false, .. }));
		let _ = Path::new("sub");
	}
}

// vim: ts=4
