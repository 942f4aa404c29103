//! Stream Server - Publishes a counter and a text service
//!
//! Run with: cargo run --example stream_server -- [tcp_port]
//!
//! Then watch a service with any client, e.g. the bundled observer:
//!
//! ```text
//! let mut client = ServiceClient::connect_tcp("127.0.0.1:10001").await?;
//! client.subscribe("counter").await?;
//! ```
//!
//! This example demonstrates:
//! - Registering services with a `ServiceHandler`
//! - Publishing from a plain thread, outside the tokio runtime
//! - Forwarding the process log to the `log` service
//! - Registering a method on the server's method table
//!
//! # Services
//!
//! ```text
//!   counter   TXT  incrementing integer, every 100 ms
//!   banner    TXT  greeting with the subscriber count, every second
//!   log       TXT  this process's log output
//!   __list    XML  built-in
//!   __alive   RAW  built-in
//!   __echo    RAW  built-in
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use svcstream::builtin::{register_log, LogService};
use svcstream::registry::format;
use svcstream::{
    timestamp_micros, Buffer, ClientId, DataServer, ServerConfig, Service, ServiceDescriptor,
    ServiceHandler, StreamBroker, Value,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Counts subscribers and greets each one
#[derive(Default)]
struct BannerHandler {
    viewers: AtomicU64,
}

impl ServiceHandler for BannerHandler {
    fn on_connect(&self, broker: &StreamBroker, service: &Service, client: ClientId) {
        self.viewers.fetch_add(1, Ordering::Relaxed);
        if let Ok(buffer) = Buffer::from_slice(b"welcome\n") {
            let _ = broker.publish_to_client(service.id(), client, timestamp_micros(), &buffer);
        }
    }

    fn on_disconnect(&self, _broker: &StreamBroker, _service: &Service, _client: ClientId) {
        self.viewers.fetch_sub(1, Ordering::Relaxed);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let port: u16 = match args.get(1) {
        Some(p) => p.parse()?,
        None => 10001,
    };

    // Initialize logging; the log service receives the same events
    let log = LogService::new();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("svcstream=info".parse()?)
                .add_directive("stream_server=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(log.layer())
        .init();

    let config = ServerConfig::default().tcp(SocketAddr::from(([0, 0, 0, 0], port)));
    let server = DataServer::new(config);

    let banner = Arc::new(BannerHandler::default());
    server.registry().register(
        ServiceDescriptor::new("counter", "Counter", format::TXT)
            .description("Increments every 100 ms"),
    )?;
    server.registry().register(
        ServiceDescriptor::new("banner", "Banner", format::TXT)
            .description("Greets subscribers")
            .handler(Arc::clone(&banner) as Arc<dyn ServiceHandler>),
    )?;
    register_log(server.registry(), &log)?;

    server.methods().register("add", "i:ii", "Sum of two integers", |args| match args {
        [Value::Integer(a), Value::Integer(b)] => a
            .checked_add(*b)
            .map(Value::Integer)
            .ok_or_else(|| "overflow".to_string()),
        _ => Err("expected two integers".into()),
    })?;

    let running = server.start().await?;
    let forwarder = log.attach(server.broker());
    tracing::info!(tcp = ?running.tcp_addr(), udp = ?running.udp_addr(), "Stream server ready");

    // The counter publishes from a plain thread
    let broker = Arc::clone(server.broker());
    std::thread::spawn(move || {
        let mut n: u64 = 0;
        loop {
            n += 1;
            match Buffer::from_slice(format!("{}\n", n).as_bytes()) {
                Ok(buffer) => {
                    broker.publish("counter", timestamp_micros(), &buffer);
                }
                Err(e) => tracing::error!(error = %e, "Counter buffer failed"),
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    });

    let broker = Arc::clone(server.broker());
    let banner_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let line = format!(
                "hello to {} viewer(s)\n",
                banner.viewers.load(Ordering::Relaxed)
            );
            if let Ok(buffer) = Buffer::from_slice(line.as_bytes()) {
                broker.publish("banner", timestamp_micros(), &buffer);
            }
        }
    });

    let stats_broker = Arc::clone(server.broker());
    let stats_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            let stats = stats_broker.stats().snapshot();
            tracing::info!(
                clients = stats.clients_connected,
                delivered = stats.packets_delivered,
                evicted = stats.packets_evicted,
                rate = stats.delivered_rate(),
                "Stats"
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    banner_task.abort();
    stats_task.abort();
    forwarder.abort();
    running.shutdown().await;
    Ok(())
}
