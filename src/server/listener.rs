//! Data server listeners
//!
//! Binds the enabled TCP, Unix and UDP listeners and spawns one task per
//! accepted stream connection.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket, UnixListener};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::broker::{BrokerConfig, DetachReason, Sink, StreamBroker};
use crate::buffer::StreamSocket;
use crate::builtin;
use crate::error::Result;
use crate::registry::ServiceRegistry;
use crate::rpc::MethodTable;
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::server::datagram::serve_datagrams;
use crate::server::dispatch::Dispatcher;

/// Data server
///
/// Owns the service registry, the broker and the method table. Services
/// and methods may be registered before or after [`start`](Self::start).
pub struct DataServer {
    config: ServerConfig,
    registry: Arc<ServiceRegistry>,
    broker: Arc<StreamBroker>,
    methods: Arc<MethodTable>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl DataServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self::with_broker_config(config, BrokerConfig::default())
    }

    /// Create a new server with custom broker configuration
    pub fn with_broker_config(config: ServerConfig, broker_config: BrokerConfig) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let registry = Arc::new(ServiceRegistry::new());
        if let Err(e) = builtin::register_defaults(&registry) {
            tracing::error!(error = %e, "Failed to register built-in services");
        }

        Self {
            config,
            broker: Arc::new(StreamBroker::with_config(Arc::clone(&registry), broker_config)),
            registry,
            methods: Arc::new(MethodTable::new()),
            connection_semaphore,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn broker(&self) -> &Arc<StreamBroker> {
        &self.broker
    }

    pub fn methods(&self) -> &Arc<MethodTable> {
        &self.methods
    }

    /// Bind every enabled listener and start serving
    pub async fn start(&self) -> Result<RunningServer> {
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.broker),
            Arc::clone(&self.methods),
        ));
        let acceptor = Arc::new(Acceptor {
            dispatcher: Arc::clone(&dispatcher),
            semaphore: self.connection_semaphore.clone(),
            read_buffer_size: self.config.read_buffer_size,
            max_message_size: self.config.max_message_size,
        });

        // Dropping `running` on an early return stops whatever was spawned
        let mut running = RunningServer {
            tcp_addr: None,
            udp_addr: None,
            unix_path: None,
            broker: Arc::clone(&self.broker),
            tasks: Vec::new(),
        };

        if let Some(addr) = self.config.tcp_addr {
            let listener = TcpListener::bind(addr).await?;
            let local = listener.local_addr()?;
            tracing::info!(addr = %local, "TCP listener started");
            running.tcp_addr = Some(local);
            running.tasks.push(tokio::spawn(accept_tcp(
                listener,
                Arc::clone(&acceptor),
                self.config.tcp_nodelay,
            )));
        }

        if let Some(path) = &self.config.unix_path {
            remove_stale_socket(path)?;
            let listener = UnixListener::bind(path)?;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(self.config.unix_mode))?;
            tracing::info!(
                path = %path.display(),
                mode = %format!("{:o}", self.config.unix_mode),
                "Unix listener started"
            );
            running.unix_path = Some(path.clone());
            running.tasks.push(tokio::spawn(accept_unix(
                listener,
                Arc::clone(&acceptor),
                path.clone(),
            )));
        }

        if let Some(addr) = self.config.udp_addr {
            let socket = Arc::new(UdpSocket::bind(addr).await?);
            let local = socket.local_addr()?;
            tracing::info!(addr = %local, "UDP listener started");
            running.udp_addr = Some(local);
            running.tasks.push(tokio::spawn(serve_datagrams(
                socket,
                Arc::clone(&dispatcher),
                self.config.max_message_size,
            )));
        }

        running.tasks.push(self.broker.spawn_sweeper());
        running.tasks.extend(self.broker.spawn_senders());

        Ok(running)
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let running = self.start().await?;
        shutdown.await;
        tracing::info!("Shutdown signal received");
        running.shutdown().await;
        Ok(())
    }
}

/// Handle to a started server
///
/// Dropping the handle stops the listeners without detaching clients;
/// call [`shutdown`](Self::shutdown) for an orderly stop.
pub struct RunningServer {
    tcp_addr: Option<SocketAddr>,
    udp_addr: Option<SocketAddr>,
    unix_path: Option<PathBuf>,
    broker: Arc<StreamBroker>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningServer {
    /// Bound TCP address, with the actual port when 0 was requested
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp_addr
    }

    pub fn unix_path(&self) -> Option<&Path> {
        self.unix_path.as_deref()
    }

    /// Stop the listeners and workers, then detach every client
    pub async fn shutdown(mut self) {
        let tasks = std::mem::take(&mut self.tasks);
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }

        self.broker.detach_all(DetachReason::Shutdown);

        if let Some(path) = &self.unix_path {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::debug!(path = %path.display(), error = %e, "Failed to remove socket file");
            }
        }
        tracing::info!("Server stopped");
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Shared state for spawning stream connections
struct Acceptor {
    dispatcher: Arc<Dispatcher>,
    semaphore: Option<Arc<Semaphore>>,
    read_buffer_size: usize,
    max_message_size: usize,
}

impl Acceptor {
    fn spawn<S: StreamSocket>(&self, socket: S, sink: fn(Arc<S>) -> Sink, peer: String) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let socket = Arc::new(socket);
        let broker = self.dispatcher.broker();
        let client = match broker.attach(sink(Arc::clone(&socket)), peer.as_str()) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Connection rejected");
                return;
            }
        };

        tracing::debug!(
            client = %client.id(),
            transport = %client.transport(),
            peer = %peer,
            "New connection"
        );

        let connection = Connection::new(
            socket,
            client,
            Arc::clone(&self.dispatcher),
            self.read_buffer_size,
            self.max_message_size,
        );
        tokio::spawn(async move {
            let _permit = permit;
            connection.run().await;
        });
    }
}

async fn accept_tcp(listener: TcpListener, acceptor: Arc<Acceptor>, nodelay: bool) {
    loop {
        match listener.accept().await {
            Ok((socket, peer_addr)) => {
                if nodelay {
                    if let Err(e) = socket.set_nodelay(true) {
                        tracing::error!(error = %e, "Failed to configure socket");
                        continue;
                    }
                }
                acceptor.spawn(socket, Sink::Tcp, peer_addr.to_string());
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

async fn accept_unix(listener: UnixListener, acceptor: Arc<Acceptor>, path: PathBuf) {
    loop {
        match listener.accept().await {
            Ok((socket, _)) => {
                acceptor.spawn(socket, Sink::Unix, format!("unix:{}", path.display()));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

/// Remove a socket file left behind by an earlier run
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            tracing::debug!(path = %path.display(), "Removing stale socket file");
            std::fs::remove_file(path)
        }
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
