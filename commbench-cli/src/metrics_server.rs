// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Minimal `GET /metrics` endpoint over a raw TCP listener.

use std::sync::Arc;

use commbench_core::PrometheusSink;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Serve the sink's registry on `port` until `cancel` fires.
pub async fn start(
    sink: Arc<PrometheusSink>,
    port: u16,
    cancel: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Metrics server listening on {}", addr);

    Ok(tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = cancel.cancelled() => break,
            };
            match accepted {
                Ok((socket, _)) => {
                    let sink = Arc::clone(&sink);
                    tokio::spawn(async move {
                        if let Err(e) = respond(socket, &sink).await {
                            tracing::debug!(error = %e, "Metrics request failed");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "Failed to accept metrics connection"),
            }
        }
        tracing::debug!("Metrics server stopped");
    }))
}

async fn respond(mut socket: TcpStream, sink: &PrometheusSink) -> std::io::Result<()> {
    let mut request = [0u8; 1024];
    let n = socket.read(&mut request).await?;
    let request = String::from_utf8_lossy(&request[..n]);

    let response = if request.starts_with("GET /metrics") {
        let body = sink.encode();
        format!(
            "HTTP/1.0 200 OK\r\nConnection: close\r\nContent-Length: {}\r\nContent-Type: text/plain; version=0.0.4\r\n\r\n{}",
            body.len(),
            body
        )
    } else {
        "HTTP/1.0 404 Not Found\r\nConnection: close\r\nContent-Length: 0\r\n\r\n".to_string()
    };

    socket.write_all(response.as_bytes()).await?;
    socket.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use commbench_core::{BackendKind, MetricObservation, MetricsSink};

    #[tokio::test]
    async fn test_serves_turnaround_histogram() {
        let sink = Arc::new(PrometheusSink::new().unwrap());
        sink.observe(MetricObservation::turnaround("default", BackendKind::Redis, 0.02));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn({
            let sink = Arc::clone(&sink);
            async move {
                let (socket, _) = listener.accept().await.unwrap();
                respond(socket, &sink).await.unwrap();
            }
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET /metrics HTTP/1.0\r\n\r\n").await.unwrap();
        let mut body = String::new();
        client.read_to_string(&mut body).await.unwrap();
        server.await.unwrap();

        assert!(body.starts_with("HTTP/1.0 200 OK"));
        assert!(body.contains("queue_turnaround_duration_seconds"));
    }
}
