//! Server root (§4.I)
//!
//! Wires the file-tree model, change detector, sync engine, peer
//! registry, and client channel together; owns the event loop.
//!
//! UDP support (`mode = "udp"`) covers outbound dials in full; a
//! single shared listening socket that demultiplexes inbound
//! handshakes by source address is out of scope for this build (see
//! `DESIGN.md`) — inbound peers should use the TCP transport.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};

use crate::client::{self, DialRequest};
use crate::config::{Config, ConfigWatch};
use crate::detector::{Detector, DetectorEvent};
use crate::error::BitBoxError;
use crate::fs_tree::FileTree;
use crate::logging::*;
use crate::peer::{self, PeerRegistry};
use crate::sync_engine::SyncEngine;
use crate::transport::{DatagramTransport, StreamTransport, Transport};
use crate::types::HostPort;

pub struct Server {
	config_rx: ConfigWatch,
	tree: Arc<FileTree>,
	registry: Arc<PeerRegistry>,
	engine: Arc<SyncEngine>,
	dial_tx: mpsc::UnboundedSender<DialRequest>,
	dial_rx: Option<mpsc::UnboundedReceiver<DialRequest>>,
}

impl Server {
	pub async fn new(config_path: PathBuf, watched_dir: PathBuf) -> Result<Server, BitBoxError> {
		let initial = Config::load(&config_path).await?;
		let (config_tx, config_rx) = watch::channel(initial.clone());
		let poll_interval = Duration::from_secs(initial.sync_interval.max(1));
		tokio::spawn(crate::config::watch_file(config_path, config_tx, poll_interval));

		let tree = Arc::new(FileTree::new(watched_dir));
		let registry = Arc::new(PeerRegistry::new(initial.maximum_incoming_connections));
		let engine = SyncEngine::new(tree.clone(), registry.clone(), config_rx.clone());
		let (dial_tx, dial_rx) = mpsc::unbounded_channel();

		Ok(Server { config_rx, tree, registry, engine, dial_tx, dial_rx: Some(dial_rx) })
	}

	fn advertised(&self) -> HostPort {
		let cfg = self.config_rx.borrow();
		HostPort::new(cfg.advertised_name.clone(), cfg.port)
	}

	/// Dials `target` and registers the resulting peer.
	async fn dial(&self, target: HostPort) {
		if self.registry.contains(&target) {
			return;
		}
		let mode = self.config_rx.borrow().mode;
		let advertised = self.advertised();
		let transport: Box<dyn Transport> = match mode {
			crate::config::TransportMode::Tcp => {
				match TcpStream::connect(format!("{}:{}", target.host, target.port)).await {
					Ok(stream) => Box::new(StreamTransport::new(stream)),
					Err(e) => {
						warn!("dialing {}: {}", target, e);
						return;
					}
				}
			}
			crate::config::TransportMode::Udp => {
				let socket = match UdpSocket::bind("0.0.0.0:0").await {
					Ok(s) => s,
					Err(e) => {
						warn!("binding UDP socket for {}: {}", target, e);
						return;
					}
				};
				if let Err(e) = socket.connect(format!("{}:{}", target.host, target.port)).await {
					warn!("connecting UDP socket to {}: {}", target, e);
					return;
				}
				Box::new(DatagramTransport::new(socket))
			}
		};

		let (peer_handle, fallback_rx) = peer::connection::spawn(
			transport,
			target.clone(),
			advertised,
			true,
			self.registry.clone(),
			self.engine.clone(),
			self.config_rx.clone(),
		);
		self.registry.add_outgoing(peer_handle);
		self.spawn_fallback_watcher(target, fallback_rx);
	}

	fn spawn_fallback_watcher(&self, dialed: HostPort, fallback_rx: tokio::sync::oneshot::Receiver<Vec<HostPort>>) {
		let dial_tx = self.dial_tx.clone();
		let registry = self.registry.clone();
		tokio::spawn(async move {
			if let Ok(peers) = fallback_rx.await {
				registry.record_fallback_result(dialed, false);
				if let Some(candidate) = registry.next_fallback_candidate(&peers) {
					let _ = dial_tx.send(DialRequest { target: candidate });
				}
			}
		});
	}

	async fn accept_peers(&self, listener: TcpListener) {
		loop {
			let (stream, addr) = match listener.accept().await {
				Ok(v) => v,
				Err(e) => {
					warn!("accept on peer port failed: {}", e);
					continue;
				}
			};
			let remote = HostPort::new(addr.ip().to_string(), addr.port());
			let transport: Box<dyn Transport> = Box::new(StreamTransport::new(stream));
			let (peer_handle, _fallback_rx) = peer::connection::spawn(
				transport,
				remote,
				self.advertised(),
				false,
				self.registry.clone(),
				self.engine.clone(),
				self.config_rx.clone(),
			);
			self.registry.add_incoming(peer_handle);
		}
	}

	async fn accept_clients(&self, listener: TcpListener, dial_tx: mpsc::UnboundedSender<DialRequest>) {
		loop {
			let (stream, addr) = match listener.accept().await {
				Ok(v) => v,
				Err(e) => {
					warn!("accept on client port failed: {}", e);
					continue;
				}
			};
			debug!("client channel connection from {}", addr);
			let registry = self.registry.clone();
			let config = self.config_rx.clone();
			let dial_tx = dial_tx.clone();
			tokio::spawn(client::handle_connection(stream, registry, config, dial_tx));
		}
	}

	async fn run_detector(&self) {
		let mut detector = Detector::new(self.tree.root().to_path_buf());
		loop {
			let interval = self.config_rx.borrow().sync_interval.max(1);
			tokio::time::sleep(Duration::from_secs(interval)).await;

			let (tx, mut rx) = mpsc::unbounded_channel();
			detector.scan_once(&tx).await;
			drop(tx);
			while let Some(event) = rx.recv().await {
				self.apply_local(&event).await;
				self.engine.broadcast_event(event).await;
			}
			self.engine.expire_stale_transfers().await;
		}
	}

	async fn apply_local(&self, event: &DetectorEvent) {
		match event {
			DetectorEvent::FileCreate { path, descriptor } | DetectorEvent::FileModify { path, descriptor } => {
				self.tree.observe_file(path, descriptor.clone()).await;
			}
			DetectorEvent::FileDelete { path, .. } => self.tree.forget(path).await,
			DetectorEvent::DirectoryCreate { path } => self.tree.observe_directory(path).await,
			DetectorEvent::DirectoryDelete { path } => self.tree.forget(path).await,
		}
	}

	/// Binds listeners, dials configured peers, and runs until a
	/// shutdown signal arrives; closes every peer with no further I/O
	/// before returning (§4.I).
	pub async fn run(mut self) -> Result<(), BitBoxError> {
		let cfg = self.config_rx.borrow().clone();
		let peer_addr: SocketAddr = format!("0.0.0.0:{}", cfg.port)
			.parse()
			.map_err(|e: std::net::AddrParseError| BitBoxError::Other { message: e.to_string() })?;
		let client_addr: SocketAddr = format!("0.0.0.0:{}", cfg.client_port)
			.parse()
			.map_err(|e: std::net::AddrParseError| BitBoxError::Other { message: e.to_string() })?;

		let peer_listener = TcpListener::bind(peer_addr).await?;
		let client_listener = TcpListener::bind(client_addr).await?;
		info!("bitbox node '{}' listening: peers={} clients={}", cfg.advertised_name, peer_addr, client_addr);

		for target in &cfg.peers {
			self.dial(target.clone()).await;
		}

		let mut dial_rx = self.dial_rx.take().expect("run() called once");
		let dial_tx_for_clients = self.dial_tx.clone();

		let server = Arc::new(self);
		{
			let server = server.clone();
			tokio::spawn(async move { server.accept_peers(peer_listener).await });
		}
		{
			let server = server.clone();
			tokio::spawn(async move { server.accept_clients(client_listener, dial_tx_for_clients).await });
		}
		{
			let server = server.clone();
			tokio::spawn(async move { server.run_detector().await });
		}
		{
			let server = server.clone();
			tokio::spawn(async move {
				while let Some(request) = dial_rx.recv().await {
					server.dial(request.target).await;
				}
			});
		}

		tokio::signal::ctrl_c().await.ok();
		info!("shutdown requested, closing peers");
		for peer in server.registry.get_active() {
			peer.close();
		}
		Ok(())
	}
}

// vim: ts=4
