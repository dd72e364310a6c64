//! End-to-end tests driving the ingress manager and the administrative
//! channel over real sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thermogate::buffer::FanOut;
use thermogate::clients::ClientTable;
use thermogate::connection::encode_frame;
use thermogate::db::Db;
use thermogate::logging::Logger;
use thermogate::server::{self, IngressConfig};
use thermogate::{admin, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

struct TestGateway {
    addr: SocketAddr,
    fanout: FanOut,
    table: Arc<ClientTable>,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<()>>,
}

impl TestGateway {
    async fn start(idle_timeout: Duration, max_connections_per_ip: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let fanout = FanOut::new(15);
        let table = Arc::new(ClientTable::new());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(server::run(
            listener,
            fanout.clone(),
            Arc::clone(&table),
            Logger::disabled(),
            IngressConfig {
                idle_timeout,
                max_connections_per_ip,
            },
            async {
                let _ = stop_rx.await;
            },
        ));

        Self {
            addr,
            fanout,
            table,
            stop: Some(stop_tx),
            handle,
        }
    }

    async fn shutdown(mut self) -> Result<()> {
        let _ = self.stop.take().unwrap().send(());
        timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("ingress did not shut down in time")
            .expect("ingress task panicked")
    }
}

async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

#[tokio::test]
async fn frames_reach_both_consumers_and_the_database() {
    let gw = TestGateway::start(Duration::from_secs(5), 5).await;

    let mut sensor = connect(gw.addr).await;
    for value in [20.0, 21.0, 22.0] {
        sensor.write_all(&encode_frame(7, value)).await.unwrap();
        sleep(Duration::from_millis(20)).await;
    }

    // Storage path: persist what the buffer yields and check the rows.
    let db = Db::connect("sqlite::memory:", "SensorData").await.unwrap();
    let storage = gw.fanout.storage_buffer();
    for _ in 0..3 {
        let reading = timeout(Duration::from_secs(2), storage.remove())
            .await
            .expect("reading did not arrive")
            .unwrap();
        assert_eq!(reading.sensor_id, 7);
        db.insert_reading(&reading).await.unwrap();
    }
    assert_eq!(db.reading_count().await.unwrap(), 3);
    assert_eq!(db.sensor_ids_in_order().await.unwrap(), vec![7, 7, 7]);

    // Analytics path independently sees the same three readings in FIFO
    // order.
    let analytics = gw.fanout.analytics_buffer();
    for expected in [20.0, 21.0, 22.0] {
        let reading = timeout(Duration::from_secs(2), analytics.remove())
            .await
            .expect("reading did not arrive")
            .unwrap();
        assert_eq!(reading.value, expected);
    }

    drop(sensor);
    gw.shutdown().await.unwrap();
}

#[tokio::test]
async fn third_connection_from_one_ip_is_rejected() {
    let gw = TestGateway::start(Duration::from_secs(5), 2).await;

    let mut first = connect(gw.addr).await;
    first.write_all(&encode_frame(1, 20.0)).await.unwrap();
    let mut second = connect(gw.addr).await;
    second.write_all(&encode_frame(2, 20.0)).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(gw.table.active_count(), 2);

    // The third connection is accepted at the TCP level, then dropped
    // without being registered; the peer observes EOF.
    let mut third = connect(gw.addr).await;
    let mut buf = [0u8; 1];
    let n = timeout(Duration::from_secs(2), third.read(&mut buf))
        .await
        .expect("gateway did not close the connection")
        .unwrap();
    assert_eq!(n, 0);
    assert_eq!(gw.table.active_count(), 2);

    // The surviving connections still deliver readings.
    first.write_all(&encode_frame(1, 21.0)).await.unwrap();
    let storage = gw.fanout.storage_buffer();
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(
            timeout(Duration::from_secs(2), storage.remove())
                .await
                .unwrap()
                .unwrap()
                .sensor_id,
        );
    }
    assert!(seen.contains(&1));
    assert!(seen.contains(&2));

    gw.shutdown().await.unwrap();
}

#[tokio::test]
async fn idle_connections_are_closed_by_the_gateway() {
    let gw = TestGateway::start(Duration::from_millis(200), 5).await;

    let mut sensor = connect(gw.addr).await;
    sensor.write_all(&encode_frame(1, 22.0)).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(gw.table.active_count(), 1);

    // Stay silent past the idle timeout; the gateway hangs up.
    let mut buf = [0u8; 1];
    let n = timeout(Duration::from_secs(2), sensor.read(&mut buf))
        .await
        .expect("gateway did not time the connection out")
        .unwrap();
    assert_eq!(n, 0);

    sleep(Duration::from_millis(50)).await;
    assert_eq!(gw.table.active_count(), 0);

    gw.shutdown().await.unwrap();
}

#[tokio::test]
async fn sensor_id_changes_are_tracked() {
    let gw = TestGateway::start(Duration::from_secs(5), 5).await;

    let mut sensor = connect(gw.addr).await;
    sensor.write_all(&encode_frame(7, 20.0)).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    let snapshot = gw.table.snapshot();
    assert!(snapshot.contains("Sensor ID: 7"));

    sensor.write_all(&encode_frame(9, 20.0)).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    let snapshot = gw.table.snapshot();
    assert!(snapshot.contains("Sensor ID: 9"));

    gw.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_stops_accepting_and_drains_handlers() {
    let gw = TestGateway::start(Duration::from_secs(5), 5).await;
    let addr = gw.addr;

    let mut sensor = connect(addr).await;
    sensor.write_all(&encode_frame(3, 25.0)).await.unwrap();
    sleep(Duration::from_millis(50)).await;

    gw.shutdown().await.unwrap();

    // The listener is gone: new connections fail outright or are closed
    // without ever being served.
    match timeout(Duration::from_secs(1), TcpStream::connect(addr)).await {
        Ok(Ok(mut stream)) => {
            let mut buf = [0u8; 1];
            let n = timeout(Duration::from_secs(1), stream.read(&mut buf))
                .await
                .expect("post-shutdown connection was serviced")
                .unwrap_or(0);
            assert_eq!(n, 0);
        }
        Ok(Err(_)) | Err(_) => {}
    }
}

#[tokio::test]
async fn admin_channel_answers_status_and_stats() {
    let socket_path = std::env::temp_dir().join(format!(
        "thermogate-admin-test-{}.sock",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&socket_path);

    let table = Arc::new(ClientTable::new());
    let token = table
        .try_register("127.0.0.1:40000".parse().unwrap(), 5)
        .unwrap();
    table.observe_sensor(token, 12);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let admin_handle = {
        let path = socket_path.clone();
        let table = Arc::clone(&table);
        tokio::spawn(async move {
            admin::run(&path, table, Logger::disabled(), async {
                let _ = stop_rx.await;
            })
            .await
        })
    };

    // Wait for the socket file to appear.
    for _ in 0..50 {
        if socket_path.exists() {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }

    let query = |command: &'static str| {
        let path = socket_path.clone();
        async move {
            let mut stream = UnixStream::connect(&path).await.unwrap();
            stream.write_all(command.as_bytes()).await.unwrap();
            stream.write_all(b"\n").await.unwrap();
            stream.shutdown().await.unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();
            response
        }
    };

    let status = query("status").await;
    assert!(status.contains("Active Connections: 1"));
    assert!(status.contains("CPU Usage:"));
    assert!(status.contains("RAM Usage:"));
    assert!(status.ends_with('\n'));

    let stats = query("stats").await;
    assert!(stats.starts_with("--- Active Connections (1) ---"));
    assert!(stats.contains("Sensor ID: 12"));

    let error = query("bogus").await;
    assert!(error.starts_with("ERROR: Unknown command 'bogus'"));
    assert!(error.ends_with('\n'));

    let _ = stop_tx.send(());
    timeout(Duration::from_secs(5), admin_handle)
        .await
        .expect("admin channel did not shut down")
        .unwrap()
        .unwrap();
    // The socket file is removed on the way out.
    assert!(!socket_path.exists());
}
