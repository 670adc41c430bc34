//! Common test utilities shared across integration tests.
#![allow(dead_code, missing_docs)]

use std::sync::{Arc, Mutex};

use sessionkit_core::{
    storage::{CredentialStore, InMemoryCredentialStore},
    ClientConfig, Navigator, SessionClient,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::oneshot,
};

/// Navigator that records redirects and reports a configurable route.
#[derive(Default)]
pub struct RecordingNavigator {
    route: Mutex<Option<String>>,
    redirects: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn on_route(route: &str) -> Self {
        Self {
            route: Mutex::new(Some(route.to_string())),
            redirects: Mutex::new(Vec::new()),
        }
    }

    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn current_route(&self) -> Option<String> {
        self.route.lock().unwrap().clone()
    }

    fn redirect_to_sign_in(&self, entry: String) {
        self.redirects.lock().unwrap().push(entry);
    }
}

pub struct TestClient {
    pub client: SessionClient,
    pub navigator: Arc<RecordingNavigator>,
    pub store: Arc<dyn CredentialStore>,
}

pub fn client(base_url: &str) -> TestClient {
    client_with(ClientConfig::new(base_url), RecordingNavigator::on_route("/dashboard"))
}

pub fn client_with(config: ClientConfig, navigator: RecordingNavigator) -> TestClient {
    let navigator = Arc::new(navigator);
    let store: Arc<dyn CredentialStore> = Arc::new(InMemoryCredentialStore::new());
    let client = SessionClient::new(config, store.clone(), navigator.clone()).unwrap();
    TestClient {
        client,
        navigator,
        store,
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sessionkit_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Backend on a separate origin whose first answer is a 401 held back until
/// `release` fires. Every later connection gets `200 ok`.
pub struct HeldUnauthorized {
    pub url: String,
    pub received: oneshot::Receiver<()>,
    pub release: oneshot::Sender<()>,
}

pub async fn held_unauthorized() -> HeldUnauthorized {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let (received_tx, received) = oneshot::channel();
    let (release, release_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let (mut first, _) = listener.accept().await.unwrap();
        read_request_head(&mut first).await;
        let _ = received_tx.send(());
        let _ = release_rx.await;
        let _ = first
            .write_all(
                b"HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
            )
            .await;
        drop(first);

        while let Ok((mut socket, _)) = listener.accept().await {
            read_request_head(&mut socket).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                .await;
        }
    });

    HeldUnauthorized {
        url,
        received,
        release,
    }
}

async fn read_request_head(socket: &mut TcpStream) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            return;
        }
        head.extend_from_slice(&buf[..n]);
    }
}
