#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use baton::registry::NoBase;
use baton::{
    Actions, ActionRegistry, Controller, Dispatcher, Error, ListenerHandle, Request, Response,
    Router, Server, TrackedListener,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Answers with a fixed generation tag so tests can tell instances apart.
pub struct Public {
    pub generation: &'static str,
    pub hits: AtomicUsize,
}

impl Controller for Public {
    fn actions(actions: &mut Actions<Self>) {
        actions
            .action("index", Self::index)
            .action("star_map", |c: Arc<Self>, _req| async move {
                c.hits.fetch_add(1, Ordering::SeqCst);
                Response::html(format!("stars from {}", c.generation))
            });
    }
}

impl Public {
    async fn index(self: Arc<Self>, _req: Request) -> Response {
        self.hits.fetch_add(1, Ordering::SeqCst);
        Response::html(format!("index from {}", self.generation))
    }
}

pub fn router(generation: &'static str) -> Router {
    let registry = ActionRegistry::builder(NoBase)
        .controller("public", Public { generation, hits: AtomicUsize::new(0) })
        .build()
        .unwrap();
    Router::new().mount(Dispatcher::new(registry), Some("/public/index"))
}

pub struct Running {
    pub addr: SocketAddr,
    pub handle: ListenerHandle,
    pub task: JoinHandle<Result<(), Error>>,
}

pub async fn start(listener: TrackedListener, router: Router) -> Running {
    let server = Server::new(listener)
        .header_read_timeout(Duration::from_secs(2))
        .drain_on_signal(false);
    let handle = server.handle();
    let addr = handle.local_addr();
    let task = tokio::spawn(server.serve(router));
    Running { addr, handle, task }
}

/// A parsed HTTP/1.1 response.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// One keep-alive client connection speaking raw HTTP/1.1.
pub struct Client {
    stream: BufReader<TcpStream>,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = timeout(TIMEOUT, TcpStream::connect(addr)).await.unwrap().unwrap();
        Self { stream: BufReader::new(stream) }
    }

    pub async fn send(&mut self, method: &str, path: &str) -> Reply {
        let head = format!("{method} {path} HTTP/1.1\r\nhost: localhost\r\ncontent-length: 0\r\n\r\n");
        self.stream.get_mut().write_all(head.as_bytes()).await.unwrap();
        timeout(TIMEOUT, self.read_reply()).await.unwrap()
    }

    async fn read_reply(&mut self) -> Reply {
        let mut line = String::new();
        self.stream.read_line(&mut line).await.unwrap();
        let status = line.split_whitespace().nth(1).unwrap().parse().unwrap();

        let mut headers = Vec::new();
        loop {
            line.clear();
            self.stream.read_line(&mut line).await.unwrap();
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                break;
            }
            let (name, value) = trimmed.split_once(':').unwrap();
            headers.push((name.to_ascii_lowercase(), value.trim().to_owned()));
        }

        let len: usize = headers.iter()
            .find(|(name, _)| name == "content-length")
            .map(|(_, v)| v.parse().unwrap())
            .unwrap_or(0);
        let mut body = vec![0; len];
        self.stream.read_exact(&mut body).await.unwrap();

        Reply { status, headers, body: String::from_utf8(body).unwrap() }
    }
}

/// Sends one request on a fresh connection.
pub async fn get(addr: SocketAddr, path: &str) -> Reply {
    Client::connect(addr).await.send("GET", path).await
}
