//! Minimal loopback HTTP/1.1 server for transfer tests.

#![allow(dead_code)]

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone, Copy, Debug)]
pub enum Behavior {
    /// Sends the whole body with a Content-Length header.
    Full,
    /// Sends the whole body without announcing its length.
    Unsized,
    /// Announces the full length, sends half, then stalls.
    Stall,
}

pub struct Response {
    pub status: &'static str,
    pub body: Vec<u8>,
    pub behavior: Behavior,
}

impl Response {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: "200 OK",
            body,
            behavior: Behavior::Full,
        }
    }

    pub fn status(status: &'static str) -> Self {
        Self {
            status,
            body: b"error".to_vec(),
            behavior: Behavior::Full,
        }
    }

    pub fn behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }
}

/// Serves `response` to every connection. Returns the archive URL.
pub async fn serve(response: Response) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let status = response.status;
    let behavior = response.behavior;
    let body = std::sync::Arc::new(response.body);

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            let body = body.clone();
            tokio::spawn(async move {
                let _ = respond(socket, status, &body, behavior).await;
            });
        }
    });

    format!("http://{}/files/Demo.ipa", addr)
}

async fn respond(
    mut socket: TcpStream,
    status: &str,
    body: &[u8],
    behavior: Behavior,
) -> std::io::Result<()> {
    read_request_head(&mut socket).await?;

    let head = match behavior {
        Behavior::Unsized => format!("HTTP/1.1 {}\r\nConnection: close\r\n\r\n", status),
        _ => format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            body.len()
        ),
    };
    socket.write_all(head.as_bytes()).await?;

    match behavior {
        Behavior::Stall => {
            socket.write_all(&body[..body.len() / 2]).await?;
            socket.flush().await?;
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        _ => {
            socket.write_all(body).await?;
            socket.shutdown().await?;
        }
    }
    Ok(())
}

async fn read_request_head(socket: &mut TcpStream) -> std::io::Result<()> {
    let mut buf = [0u8; 2048];
    let mut seen = Vec::new();
    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        seen.extend_from_slice(&buf[..n]);
        if seen.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(());
        }
    }
}
