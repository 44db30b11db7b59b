//! End-to-end scenarios driving two in-process nodes' `SyncEngine`s
//! against each other directly (no sockets): one engine's outbound
//! messages are fed straight into the other's `InboundHandler::handle`,
//! standing in for the peer connection's transport.

use std::sync::Arc;

use bitbox::client::handle_connection;
use bitbox::config::Config;
use bitbox::peer::{InboundHandler, OutboundQueue, PeerRegistry};
use bitbox::protocol::Message;
use bitbox::types::{FileDescriptor, HostPort};
use bitbox::{FileTree, SyncEngine};
use md5::Digest;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

fn descriptor_for(content: &[u8], last_modified: i64) -> FileDescriptor {
	FileDescriptor { md5: hex::encode(md5::Md5::digest(content)), last_modified, file_size: content.len() as u64 }
}

fn engine_with_tree(tree: Arc<FileTree>) -> Arc<SyncEngine> {
	let (_tx, rx) = watch::channel(Config::default());
	let registry = Arc::new(PeerRegistry::new(16));
	SyncEngine::new(tree, registry, rx)
}

/// Drains every message currently queued in `from` and feeds each to `to`.
async fn relay(from: &OutboundQueue, to: &Arc<SyncEngine>, remote: &HostPort, reply_into: &OutboundQueue) {
	while let Ok(Some(message)) = tokio::time::timeout(std::time::Duration::from_millis(50), from.take()).await {
		to.handle(remote, message, reply_into).await;
	}
}

#[tokio::test]
async fn scenario_1_create_and_pull_completes_with_matching_digest() {
	let dir_a = tempfile::tempdir().unwrap();
	let dir_b = tempfile::tempdir().unwrap();
	let content = b"hello";
	tokio::fs::write(dir_a.path().join("f"), content).await.unwrap();

	let descriptor = descriptor_for(content, 1000);
	let tree_a = Arc::new(FileTree::new(dir_a.path()));
	tree_a.observe_file(std::path::Path::new("f"), descriptor.clone()).await;
	let a = engine_with_tree(tree_a);
	let b = engine_with_tree(Arc::new(FileTree::new(dir_b.path())));

	let remote_a = HostPort::new("a", 1);
	let remote_b = HostPort::new("b", 2);
	let to_a = OutboundQueue::new();
	let to_b = OutboundQueue::new();

	// A's scan emits FILE_CREATE_REQUEST, handled directly by B.
	b.handle(
		&remote_a,
		Message::FileCreateRequest { path_name: "f".to_string(), descriptor: descriptor.clone() },
		&to_a,
	)
	.await;

	for _ in 0..8 {
		relay(&to_a, &a, &remote_b, &to_b).await;
		relay(&to_b, &b, &remote_a, &to_a).await;
	}

	let stored = tokio::fs::read(dir_b.path().join("f")).await.unwrap();
	assert_eq!(stored, content);
}

#[tokio::test]
async fn scenario_2_delete_with_older_descriptor_is_rejected() {
	let dir_a = tempfile::tempdir().unwrap();
	tokio::fs::write(dir_a.path().join("g"), b"").await.unwrap();

	let current = descriptor_for(b"", 2000);
	let tree_a = Arc::new(FileTree::new(dir_a.path()));
	tree_a.observe_file(std::path::Path::new("g"), current).await;
	let a = engine_with_tree(tree_a);

	let stale = descriptor_for(b"x", 1500);
	let remote_b = HostPort::new("b", 2);
	let outbound = OutboundQueue::new();
	a.handle(&remote_b, Message::FileDeleteRequest { path_name: "g".to_string(), descriptor: stale }, &outbound).await;

	let response = outbound.take().await.unwrap();
	match response {
		Message::FileDeleteResponse { status, message, .. } => {
			assert!(!status);
			assert!(message.contains("newer"));
		}
		other => panic!("unexpected response: {:?}", other.command()),
	}
	assert!(dir_a.path().join("g").exists());
}

#[tokio::test]
async fn scenario_3_fallback_dials_the_only_peer_not_already_tried() {
	let registry = PeerRegistry::new(0);
	assert!(!registry.has_room_for_incoming());

	let x = HostPort::new("x", 1);
	let y = HostPort::new("y", 2);
	let peer_list_from_refusal = vec![x.clone()];

	let candidate = registry.next_fallback_candidate(&peer_list_from_refusal);
	assert_eq!(candidate, Some(x.clone()));
	assert_ne!(candidate, Some(y));

	// The dial to X fails; a later refusal naming only X yields no
	// further candidate since X has already been tried this session.
	registry.record_fallback_result(x.clone(), false);
	assert_eq!(registry.next_fallback_candidate(&[x]), None);
}

#[tokio::test]
async fn scenario_4_failed_auth_blocks_all_later_commands_on_the_same_connection() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();

	let registry = Arc::new(PeerRegistry::new(16));
	let (_tx, config_rx) = watch::channel(Config::default());
	let (dial_tx, _dial_rx) = tokio::sync::mpsc::unbounded_channel();

	tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		handle_connection(stream, registry, config_rx, dial_tx).await;
	});

	let stream = TcpStream::connect(addr).await.unwrap();
	let (read_half, mut write_half) = stream.into_split();
	let mut reader = BufReader::new(read_half);

	write_half
		.write_all(b"{\"command\":\"AUTH_REQUEST\",\"identity\":\"nobody\"}\n")
		.await
		.unwrap();
	let mut line = String::new();
	reader.read_line(&mut line).await.unwrap();
	let response: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
	assert_eq!(response["status"], false);

	// The server closes the connection after a failed AUTH_REQUEST; a
	// further command on the same socket sees EOF, never a response.
	write_half.write_all(b"{\"command\":\"LIST_PEERS_REQUEST\"}\n").await.ok();
	let mut trailing = String::new();
	let n = reader.read_line(&mut trailing).await.unwrap();
	assert_eq!(n, 0, "connection should have been closed after failed AUTH_REQUEST");
}
