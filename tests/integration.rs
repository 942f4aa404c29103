//! End-to-end tests against a running server on ephemeral ports

use std::time::Duration;

use bytes::Bytes;
use svcstream::broker::MAX_DATAGRAM_SIZE;
use svcstream::builtin::ECHO_SERVICE;
use svcstream::registry::format;
use svcstream::wire::constants::CMD_HEARTBEAT;
use svcstream::{
    timestamp_micros, BrokerConfig, Buffer, DataServer, Error, Message, MessageKind, ParseState,
    RunningServer, ServerConfig, ServiceClient, ServiceDescriptor, Value,
};
use tokio::net::UdpSocket;

const WAIT: Duration = Duration::from_secs(2);

async fn start(config: ServerConfig, broker: BrokerConfig) -> (DataServer, RunningServer) {
    let server = DataServer::with_broker_config(config, broker);
    server
        .registry()
        .register(ServiceDescriptor::new("imu", "IMU samples", format::CSV))
        .unwrap();
    let running = server.start().await.unwrap();
    (server, running)
}

fn local() -> std::net::SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[tokio::test]
async fn test_tcp_subscribe_and_receive() {
    let (server, running) = start(ServerConfig::none().tcp(local()), BrokerConfig::default()).await;
    let addr = running.tcp_addr().unwrap();

    let mut a = ServiceClient::connect_tcp(addr).await.unwrap();
    let mut b = ServiceClient::connect_tcp(addr).await.unwrap();
    a.subscribe("imu").await.unwrap();
    b.subscribe("imu").await.unwrap();
    assert_eq!(server.broker().client_count("imu"), 2);

    for i in 0..3u64 {
        let buffer = Buffer::from_slice(format!("{},0.0,9.81\n", i).as_bytes()).unwrap();
        assert_eq!(server.broker().publish("imu", 1_000 + i, &buffer), 2);
    }

    for client in [&mut a, &mut b] {
        for i in 0..3u64 {
            let event = client.next_event_timeout(WAIT).await.unwrap();
            assert_eq!(event.service, "imu");
            assert_eq!(event.timestamp_us, 1_000 + i);
            assert_eq!(event.payload, Bytes::from(format!("{},0.0,9.81\n", i)));
        }
    }

    running.shutdown().await;
}

#[tokio::test]
async fn test_tcp_large_buffer() {
    let (server, running) = start(ServerConfig::none().tcp(local()), BrokerConfig::default()).await;
    let stream = tokio::net::TcpStream::connect(running.tcp_addr().unwrap()).await.unwrap();
    let mut client = ServiceClient::with_max_message_size(stream, 1 << 20);
    client.subscribe("imu").await.unwrap();

    let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
    let buffer = Buffer::from_slice(&payload).unwrap();
    server.broker().publish("imu", timestamp_micros(), &buffer);

    let event = client.next_event_timeout(WAIT).await.unwrap();
    assert_eq!(event.payload.len(), payload.len());
    assert_eq!(&event.payload[..], &payload[..]);

    running.shutdown().await;
}

#[tokio::test]
async fn test_unix_list_echo_and_methods() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("svc.sock");
    let (server, running) = start(ServerConfig::none().unix(&path), BrokerConfig::default()).await;
    server
        .methods()
        .register("scale", "d:di", "Multiply", |args| match args {
            [Value::Double(x), Value::Integer(k)] => Ok(Value::Double(x * f64::from(*k))),
            _ => Err("bad arguments".into()),
        })
        .unwrap();

    let mut client = ServiceClient::connect_unix(&path).await.unwrap();

    let xml = client.list().await.unwrap();
    assert!(xml.contains("<service id=\"imu\" name=\"IMU samples\" format=\"CSV\">"));
    assert!(xml.contains("id=\"__echo\""));

    client
        .send_client_data(ECHO_SERVICE, 5, Bytes::from_static(b"ping"))
        .await
        .unwrap();
    let echo = client.next_event_timeout(WAIT).await.unwrap();
    assert_eq!(echo.service, ECHO_SERVICE);
    assert_eq!(echo.payload, Bytes::from_static(b"ping"));

    let value = client.call("scale", vec![1.5.into(), 4.into()]).await.unwrap();
    assert_eq!(value, Value::Double(6.0));

    match client.call("scale", vec![1.5.into()]).await {
        Err(Error::Remote(_)) => {}
        other => panic!("expected remote error, got {:?}", other),
    }

    client.goodbye().await.unwrap();
    running.shutdown().await;
    assert!(!path.exists());
}

#[tokio::test]
async fn test_udp_heartbeat_and_echo() {
    let (_server, running) =
        start(ServerConfig::none().udp(local()), BrokerConfig::default()).await;

    let peer = UdpSocket::bind(local()).await.unwrap();
    peer.connect(running.udp_addr().unwrap()).await.unwrap();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    peer.send(&Message::call(CMD_HEARTBEAT, vec![]).encode().unwrap())
        .await
        .unwrap();
    let n = tokio::time::timeout(WAIT, peer.recv(&mut buf)).await.unwrap().unwrap();
    let mut parser = ParseState::new();
    parser.feed(&buf[..n]);
    let reply = parser.next_message().unwrap().unwrap();
    assert_eq!(reply.kind, MessageKind::Return);

    let event = Message::event(ECHO_SERVICE, 1, Bytes::from_static(b"over udp"));
    peer.send(&event.encode().unwrap()).await.unwrap();
    let n = tokio::time::timeout(WAIT, peer.recv(&mut buf)).await.unwrap().unwrap();
    let mut parser = ParseState::new();
    parser.feed(&buf[..n]);
    let echo = parser.next_message().unwrap().unwrap();
    let (_, payload) = echo.as_event().unwrap();
    assert_eq!(&payload[..], b"over udp");

    running.shutdown().await;
}

#[tokio::test]
async fn test_idle_client_is_evicted() {
    let broker = BrokerConfig::default()
        .client_timeout(Duration::from_millis(150))
        .sweep_interval(Duration::from_millis(25));
    let (server, running) = start(ServerConfig::none().tcp(local()), broker).await;

    let mut client = ServiceClient::connect_tcp(running.tcp_addr().unwrap())
        .await
        .unwrap()
        .keepalive(None);
    client.subscribe("imu").await.unwrap();
    assert_eq!(server.broker().client_count("imu"), 1);

    let result = client.next_event_timeout(WAIT).await;
    assert!(matches!(result, Err(Error::ConnectionClosed)), "{:?}", result.err());
    assert_eq!(server.broker().client_count("imu"), 0);
    assert_eq!(server.broker().stats().snapshot().clients_timed_out, 1);

    running.shutdown().await;
}

#[tokio::test]
async fn test_heartbeats_keep_client_alive() {
    let broker = BrokerConfig::default()
        .client_timeout(Duration::from_millis(200))
        .sweep_interval(Duration::from_millis(25));
    let (server, running) = start(ServerConfig::none().tcp(local()), broker).await;

    let mut client = ServiceClient::connect_tcp(running.tcp_addr().unwrap()).await.unwrap();
    client.subscribe("imu").await.unwrap();
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.heartbeat().await.unwrap();
    }
    assert_eq!(server.broker().client_count("imu"), 1);

    running.shutdown().await;
}

#[tokio::test]
async fn test_receive_only_subscriber_outlives_timeout() {
    let timeout = Duration::from_millis(300);
    let broker = BrokerConfig::default()
        .client_timeout(timeout)
        .sweep_interval(Duration::from_millis(25));
    let (server, running) = start(ServerConfig::none().tcp(local()), broker).await;

    let mut client = ServiceClient::connect_tcp(running.tcp_addr().unwrap())
        .await
        .unwrap()
        .keepalive(Some(Duration::from_millis(100)));
    client.subscribe("imu").await.unwrap();

    let publisher = {
        let broker = server.broker().clone();
        tokio::spawn(async move {
            for i in 0..12u64 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                let buffer = Buffer::from_slice(format!("{}\n", i).as_bytes()).unwrap();
                broker.publish("imu", timestamp_micros(), &buffer);
            }
        })
    };

    // Only receives, for four times the client timeout
    for _ in 0..12 {
        client.next_event_timeout(WAIT).await.unwrap();
    }
    publisher.await.unwrap();

    assert_eq!(server.broker().client_count("imu"), 1);
    assert_eq!(server.broker().stats().snapshot().clients_timed_out, 0);

    running.shutdown().await;
}

#[tokio::test]
async fn test_connection_limit() {
    let (server, running) = start(
        ServerConfig::none().tcp(local()).max_connections(1),
        BrokerConfig::default(),
    )
    .await;
    let addr = running.tcp_addr().unwrap();

    let mut first = ServiceClient::connect_tcp(addr).await.unwrap();
    first.heartbeat().await.unwrap();

    let mut second = ServiceClient::connect_tcp(addr).await.unwrap();
    assert!(second.heartbeat().await.is_err());
    assert_eq!(server.broker().total_clients(), 1);

    running.shutdown().await;
}
