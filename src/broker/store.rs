//! Stream broker implementation
//!
//! Tracks every attached client stream, which service each is subscribed
//! to, and fans published buffers out to the subscribers' queues.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::client::{ClientId, ClientStream, DetachReason, Enqueued, Sink, Transport};
use super::config::BrokerConfig;
use super::packet::Packet;
use crate::buffer::Buffer;
use crate::error::BrokerError;
use crate::registry::{RegistryError, Service, ServiceRegistry};
use crate::stats::BrokerStats;

/// Client and subscription tables, guarded by one lock
#[derive(Default)]
struct Tables {
    clients: HashMap<ClientId, Arc<ClientStream>>,
    subscribers: HashMap<String, Vec<ClientId>>,
    datagram_peers: HashMap<SocketAddr, ClientId>,
}

impl Tables {
    fn remove_subscriber(&mut self, service: &str, id: ClientId) {
        if let Some(ids) = self.subscribers.get_mut(service) {
            ids.retain(|c| *c != id);
            if ids.is_empty() {
                self.subscribers.remove(service);
            }
        }
    }
}

/// Outcome of offering a packet to one client
enum Offer {
    Queued,
    Dropped,
    Disconnect,
}

/// Publish/subscribe broker
///
/// Publishers never block on consumers: `publish` only duplicates the
/// buffer into bounded per-client queues and wakes the sender pool.
/// Service callbacks always run after the table lock is released.
pub struct StreamBroker {
    config: BrokerConfig,
    registry: Arc<ServiceRegistry>,
    tables: RwLock<Tables>,
    next_client_id: AtomicU64,
    pub(super) ready_tx: mpsc::UnboundedSender<ClientId>,
    pub(super) ready_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ClientId>>>,
    stats: BrokerStats,
}

impl StreamBroker {
    /// Create a broker with default configuration
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self::with_config(registry, BrokerConfig::default())
    }

    /// Create a broker with custom configuration
    pub fn with_config(registry: Arc<ServiceRegistry>, config: BrokerConfig) -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        Self {
            config,
            registry,
            tables: RwLock::new(Tables::default()),
            next_client_id: AtomicU64::new(1),
            ready_tx,
            ready_rx: Arc::new(tokio::sync::Mutex::new(ready_rx)),
            stats: BrokerStats::new(),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &BrokerStats {
        &self.stats
    }

    /// Attach a new client stream
    pub fn attach(
        &self,
        sink: Sink,
        peer: impl Into<String>,
    ) -> Result<Arc<ClientStream>, BrokerError> {
        let mut tables = self.tables.write();
        self.insert_client(&mut tables, sink, peer.into())
    }

    /// Client stream for a datagram peer, created on first contact
    pub fn attach_datagram(
        &self,
        socket: &Arc<UdpSocket>,
        peer: SocketAddr,
    ) -> Result<Arc<ClientStream>, BrokerError> {
        let mut tables = self.tables.write();

        if let Some(client) = tables
            .datagram_peers
            .get(&peer)
            .and_then(|id| tables.clients.get(id))
        {
            return Ok(Arc::clone(client));
        }

        let sink = Sink::Datagram {
            socket: Arc::clone(socket),
            peer,
        };
        let client = self.insert_client(&mut tables, sink, peer.to_string())?;
        tables.datagram_peers.insert(peer, client.id());
        Ok(client)
    }

    fn insert_client(
        &self,
        tables: &mut Tables,
        sink: Sink,
        peer: String,
    ) -> Result<Arc<ClientStream>, BrokerError> {
        let max = self.config.max_clients;
        if max > 0 && tables.clients.len() >= max {
            tracing::warn!(peer = %peer, max = max, "Client rejected: limit reached");
            return Err(BrokerError::TooManyClients(max));
        }

        let id = ClientId(self.next_client_id.fetch_add(1, Ordering::Relaxed));
        let client = Arc::new(ClientStream::new(id, peer, sink));
        tables.clients.insert(id, Arc::clone(&client));
        self.stats.record_attach();

        tracing::debug!(
            client = %id,
            transport = %client.transport(),
            peer = %client.peer(),
            "Client attached"
        );

        Ok(client)
    }

    pub fn client(&self, id: ClientId) -> Option<Arc<ClientStream>> {
        self.tables.read().clients.get(&id).cloned()
    }

    /// Subscribe a client to a service
    ///
    /// A client follows one service at a time; subscribing elsewhere first
    /// leaves the previous service. The service's connect callback runs
    /// before this returns.
    pub fn subscribe(&self, id: ClientId, service_id: &str) -> Result<Arc<Service>, BrokerError> {
        let service = self
            .registry
            .lookup(service_id)
            .ok_or_else(|| BrokerError::UnknownService(service_id.to_string()))?;

        let previous = {
            let mut tables = self.tables.write();
            let client = tables
                .clients
                .get(&id)
                .cloned()
                .ok_or(BrokerError::UnknownClient(id))?;

            if client.transport() == Transport::Datagram {
                return Err(BrokerError::SubscribeUnsupported(id));
            }

            if client
                .service()
                .is_some_and(|current| Arc::ptr_eq(&current, &service))
            {
                return Ok(service);
            }

            let previous = client.replace_service(Some(Arc::clone(&service)));
            if let Some(prev) = &previous {
                tables.remove_subscriber(prev.id(), id);
            }
            tables
                .subscribers
                .entry(service.id().to_string())
                .or_default()
                .push(id);
            client.touch();
            previous
        };

        if let Some(prev) = previous {
            self.fire_disconnect(&prev, id);
        }

        tracing::info!(
            service = %service.id(),
            client = %id,
            subscribers = self.client_count(service.id()),
            "Client subscribed"
        );

        self.fire_connect(&service, id);
        Ok(service)
    }

    /// Leave the current subscription; `false` if there was none
    pub fn unsubscribe(&self, id: ClientId) -> Result<bool, BrokerError> {
        let previous = {
            let mut tables = self.tables.write();
            let client = tables
                .clients
                .get(&id)
                .cloned()
                .ok_or(BrokerError::UnknownClient(id))?;

            let previous = client.replace_service(None);
            if let Some(prev) = &previous {
                tables.remove_subscriber(prev.id(), id);
            }
            previous
        };

        match previous {
            Some(service) => {
                tracing::info!(service = %service.id(), client = %id, "Client unsubscribed");
                self.fire_disconnect(&service, id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Tear down a client stream
    ///
    /// Releases queued packets immediately and wakes the connection task
    /// waiting on [`ClientStream::closed`]. Returns `false` if the client
    /// was already gone.
    pub fn detach(&self, id: ClientId, reason: DetachReason) -> bool {
        let client = {
            let mut tables = self.tables.write();
            let Some(client) = tables.clients.remove(&id) else {
                return false;
            };
            if let Some(service) = client.service() {
                tables.remove_subscriber(service.id(), id);
            }
            if let Some(peer) = client.datagram_peer() {
                tables.datagram_peers.remove(&peer);
            }
            client
        };

        let service = client.replace_service(None);
        let released = client.close();
        self.stats.record_detach(reason, released);

        tracing::info!(
            client = %id,
            transport = %client.transport(),
            service = service.as_ref().map(|s| s.id()).unwrap_or("-"),
            reason = %reason,
            released = released,
            "Client detached"
        );

        if let Some(service) = service {
            self.fire_disconnect(&service, id);
        }
        true
    }

    /// Detach every client
    pub fn detach_all(&self, reason: DetachReason) {
        let ids: Vec<ClientId> = self.tables.read().clients.keys().copied().collect();
        for id in ids {
            self.detach(id, reason);
        }
    }

    /// Refresh a client's last-activity timestamp
    pub fn touch(&self, id: ClientId) -> Result<(), BrokerError> {
        let tables = self.tables.read();
        let client = tables.clients.get(&id).ok_or(BrokerError::UnknownClient(id))?;
        client.touch();
        Ok(())
    }

    /// Publish a buffer to every subscriber of `service`
    ///
    /// Each subscriber queues its own duplicate. Returns the number of
    /// clients the packet was queued for.
    pub fn publish(&self, service: &str, timestamp_us: u64, buffer: &Buffer) -> usize {
        self.stats.record_publish();

        let name: Arc<str> = Arc::from(service);
        let mut queued = 0;
        let mut overflowed = Vec::new();
        {
            let tables = self.tables.read();
            let Some(ids) = tables.subscribers.get(service) else {
                if !self.registry.contains(service) {
                    tracing::warn!(service = %service, "Publish to unknown service");
                }
                return 0;
            };

            for id in ids {
                let Some(client) = tables.clients.get(id) else {
                    continue;
                };
                let packet = Packet::new(Arc::clone(&name), timestamp_us, buffer.duplicate());
                match self.offer(client, packet) {
                    Offer::Queued => queued += 1,
                    Offer::Dropped => {}
                    Offer::Disconnect => overflowed.push(*id),
                }
            }
        }

        for id in overflowed {
            self.detach(id, DetachReason::Overflow);
        }

        queued
    }

    /// Publish a buffer to one client only
    ///
    /// The client need not be subscribed to `service`; this is how services
    /// answer requests.
    pub fn publish_to_client(
        &self,
        service: &str,
        id: ClientId,
        timestamp_us: u64,
        buffer: &Buffer,
    ) -> Result<(), BrokerError> {
        if !self.registry.contains(service) {
            return Err(BrokerError::UnknownService(service.to_string()));
        }

        let client = self.client(id).ok_or(BrokerError::UnknownClient(id))?;
        let packet = Packet::new(Arc::from(service), timestamp_us, buffer.duplicate());
        if let Offer::Disconnect = self.offer(&client, packet) {
            self.detach(id, DetachReason::Overflow);
        }
        Ok(())
    }

    fn offer(&self, client: &Arc<ClientStream>, packet: Packet) -> Offer {
        let bytes = packet.len();
        let service = Arc::clone(&packet.service);

        match client.enqueue(packet, self.config.queue_depth, self.config.overflow_policy) {
            Enqueued::Queued => {
                self.stats.record_queued();
                self.schedule(client);
                Offer::Queued
            }
            Enqueued::EvictedOldest => {
                self.stats.record_queued();
                self.stats.record_evicted();
                tracing::info!(
                    service = %service,
                    client = %client.id(),
                    depth = self.config.queue_depth,
                    "Queue full, evicted oldest packet"
                );
                self.schedule(client);
                Offer::Queued
            }
            Enqueued::DroppedNewest => {
                self.stats.record_dropped();
                tracing::info!(
                    service = %service,
                    client = %client.id(),
                    bytes = bytes,
                    "Queue full, dropped packet"
                );
                Offer::Dropped
            }
            Enqueued::Overflow => Offer::Disconnect,
            Enqueued::Closed => Offer::Dropped,
        }
    }

    fn schedule(&self, client: &ClientStream) {
        if client.try_schedule() {
            // The receiver lives as long as the broker
            let _ = self.ready_tx.send(client.id());
        }
    }

    /// Hand client-originated data to the service's callback
    pub fn client_data(
        &self,
        id: ClientId,
        service_id: &str,
        timestamp_us: u64,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        self.touch(id)?;
        let service = self
            .registry
            .lookup(service_id)
            .ok_or_else(|| BrokerError::UnknownService(service_id.to_string()))?;

        match service.handler() {
            Some(handler) => handler.on_client_data(self, &service, id, timestamp_us, payload),
            None => tracing::debug!(
                service = %service_id,
                client = %id,
                bytes = payload.len(),
                "Client data for service without handler"
            ),
        }
        Ok(())
    }

    /// Number of clients subscribed to `service`
    pub fn client_count(&self, service: &str) -> usize {
        self.tables
            .read()
            .subscribers
            .get(service)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of attached clients, subscribed or not
    pub fn total_clients(&self) -> usize {
        self.tables.read().clients.len()
    }

    /// Unregister a service and drop its subscriptions
    pub fn unregister_service(&self, id: &str) -> Result<Arc<Service>, RegistryError> {
        let service = self.registry.unregister(id)?;

        let ids = {
            let mut tables = self.tables.write();
            let ids = tables.subscribers.remove(id).unwrap_or_default();
            for cid in &ids {
                if let Some(client) = tables.clients.get(cid) {
                    client.replace_service(None);
                }
            }
            ids
        };

        for cid in ids {
            self.fire_disconnect(&service, cid);
        }
        Ok(service)
    }

    /// Detach clients idle for longer than the client timeout as of `now`
    pub fn sweep_at(&self, now: Instant) -> Vec<ClientId> {
        let timeout = self.config.client_timeout;
        let expired: Vec<ClientId> = self
            .tables
            .read()
            .clients
            .values()
            .filter(|c| c.idle_for(now) > timeout)
            .map(|c| c.id())
            .collect();

        for id in &expired {
            self.detach(*id, DetachReason::Timeout);
        }
        expired
    }

    /// Run the liveness sweep once
    pub fn sweep(&self) -> Vec<ClientId> {
        self.sweep_at(Instant::now())
    }

    /// Spawn the background liveness sweep
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let broker = Arc::clone(self);
        let interval = broker.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                broker.sweep();
            }
        })
    }

    fn fire_connect(&self, service: &Service, id: ClientId) {
        if let Some(handler) = service.handler() {
            handler.on_connect(self, service, id);
        }
    }

    fn fire_disconnect(&self, service: &Service, id: ClientId) {
        if let Some(handler) = service.handler() {
            handler.on_disconnect(self, service, id);
        }
    }
}
