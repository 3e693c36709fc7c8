#![allow(dead_code)]

use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;
use tlschat::config::ServerConfig;
use tlschat::console::ConsoleSink;
use tlschat::protocol::{read_frame, write_frame, FrameError};
use tlschat::server::{Server, ServerError, ServerState};
use tlschat::session::SessionRegistry;
use tlschat::style::Style;
use tlschat::tls::{load_client_config, server_name};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A throwaway CA plus a server certificate for `localhost`/`127.0.0.1`.
pub struct Certs {
    _dir: tempfile::TempDir,
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

pub fn generate_certs() -> Certs {
    use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};

    let dir = tempfile::tempdir().unwrap();

    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_key = KeyPair::generate().unwrap();
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let leaf_params =
        CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()]).unwrap();
    let leaf_key = KeyPair::generate().unwrap();
    let leaf_cert = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

    let ca = dir.path().join("ca.pem");
    let cert = dir.path().join("cert.pem");
    let key = dir.path().join("key.pem");
    std::fs::write(&ca, ca_cert.pem()).unwrap();
    std::fs::write(&cert, leaf_cert.pem()).unwrap();
    std::fs::write(&key, leaf_key.serialize_pem()).unwrap();

    Certs { _dir: dir, ca, cert, key }
}

pub fn server_config(certs: &Certs, filter: Option<Vec<String>>) -> ServerConfig {
    ServerConfig {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        cert: certs.cert.clone(),
        key: certs.key.clone(),
        banner: None,
        filter,
        log_file: None,
        style: Style::plain(),
    }
}

/// A running server with its operator console driven from the test.
pub struct TestServer {
    pub certs: Certs,
    pub addr: SocketAddr,
    pub registry: SessionRegistry,
    pub operator: mpsc::Sender<String>,
    pub console: Arc<Mutex<Vec<String>>>,
    pub state: watch::Receiver<ServerState>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<Result<(), ServerError>>,
}

pub async fn start_server() -> TestServer {
    start_server_with_filter(None).await
}

pub async fn start_server_with_filter(filter: Option<Vec<String>>) -> TestServer {
    let certs = generate_certs();
    let (sink, console) = ConsoleSink::buffered();
    let server = Server::bind(&server_config(&certs, filter), sink).await.unwrap();
    let addr = server.local_addr().unwrap();
    let registry = server.registry();
    let state = server.subscribe_state();
    let shutdown = server.shutdown_token();
    let (operator, lines) = mpsc::channel(16);
    let handle = tokio::spawn(server.run(lines));

    TestServer {
        certs,
        addr,
        registry,
        operator,
        console,
        state,
        shutdown,
        handle,
    }
}

impl TestServer {
    /// Connect a raw frame-level client and consume the greeting.
    pub async fn connect(&self) -> TestClient {
        let tcp = TcpStream::connect(self.addr).await.unwrap();
        let mut client = self.handshake(tcp).await;
        assert_eq!(client.recv().await, tlschat::dispatch::DEFAULT_GREETING);
        client
    }

    /// Complete the TLS handshake on an already-accepted TCP connection.
    pub async fn handshake(&self, tcp: TcpStream) -> TestClient {
        let connector = load_client_config(&self.certs.ca).unwrap();
        let stream = tokio::time::timeout(
            TIMEOUT,
            connector.connect(server_name("127.0.0.1").unwrap(), tcp),
        )
        .await
        .expect("handshake timed out")
        .expect("handshake failed");
        TestClient { stream }
    }

    /// Wait until the console has a line starting with `prefix`.
    pub async fn wait_for_console(&self, prefix: &str) {
        let console = self.console.clone();
        let prefix = prefix.to_string();
        tokio::time::timeout(TIMEOUT, async move {
            while !console.lock().iter().any(|l| l.starts_with(&prefix)) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("console line never appeared");
    }

    /// Connect and join as `name`, returning once the server has registered
    /// the name.
    pub async fn join(&self, name: &str) -> TestClient {
        let mut client = self.connect().await;
        client.send(&format!("##{}", name)).await;
        self.wait_for_name(name).await;
        client
    }

    pub async fn wait_for_name(&self, name: &str) {
        let registry = self.registry.clone();
        let name = name.to_string();
        tokio::time::timeout(TIMEOUT, async move {
            while !registry.list_active_names().contains(&name) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("name was never registered");
    }

    pub async fn operator(&self, line: &str) {
        self.operator.send(line.to_string()).await.unwrap();
    }

    pub fn console_has(&self, line: &str) -> bool {
        self.console.lock().iter().any(|l| l == line)
    }
}

pub struct TestClient {
    stream: TlsStream<TcpStream>,
}

impl TestClient {
    pub async fn send(&mut self, text: &str) {
        write_frame(&mut self.stream, text).await.unwrap();
    }

    pub async fn recv(&mut self) -> String {
        tokio::time::timeout(TIMEOUT, read_frame(&mut self.stream))
            .await
            .expect("timed out waiting for frame")
            .expect("frame")
    }

    /// Assert the server has closed the channel.
    pub async fn expect_closed(&mut self) {
        let result = tokio::time::timeout(TIMEOUT, read_frame(&mut self.stream))
            .await
            .expect("timed out waiting for close");
        match result {
            Err(e) => assert!(e.is_disconnect(), "unexpected error: {:?}", e),
            Ok(frame) => panic!("expected close, got frame {:?}", frame),
        }
    }

    pub async fn try_recv(&mut self) -> Result<String, FrameError> {
        tokio::time::timeout(TIMEOUT, read_frame(&mut self.stream))
            .await
            .expect("timed out waiting for frame")
    }
}
