//! TCP line listener.
//!
//! Newline-delimited text, no handshake, no acknowledgement. Each accepted
//! connection is read on its own task; every complete line becomes a
//! [`ControlMessage::IngestLine`].

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::IngestError;
use crate::control::{ControlMessage, ControlSender};

pub struct LineListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl LineListener {
    pub async fn bind(addr: &str) -> Result<Self, IngestError> {
        let bind_err = |source| IngestError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        info!(addr = %local_addr, "listening");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until cancelled, then wait for every connection
    /// task to finish.
    pub async fn run(self, tx: ControlSender, cancel: CancellationToken) {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "connection accepted");
                        connections.spawn(read_lines(stream, peer, tx.clone(), cancel.clone()));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                Some(done) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = done {
                        warn!(error = %e, "connection task failed");
                    }
                }
            }
        }

        drop(tx);
        let open = connections.len();
        while let Some(done) = connections.join_next().await {
            if let Err(e) = done {
                warn!(error = %e, "connection task failed");
            }
        }
        debug!(connections = open, "listener stopped");
    }
}

/// Forward every newline-terminated line from `stream`. A trailing fragment
/// without a newline at EOF is discarded.
async fn read_lines<R>(stream: R, peer: SocketAddr, tx: ControlSender, cancel: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut lines = 0usize;
    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) if buf.last() != Some(&b'\n') => {
                debug!(peer = %peer, bytes = buf.len(), "discarding unterminated fragment");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(peer = %peer, error = %e, "read failed");
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf).into_owned();
        lines += 1;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = tx.send(ControlMessage::IngestLine(line)) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    debug!(peer = %peer, lines, "connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::control_channel;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn forwards_complete_lines_only() {
        let listener = LineListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();
        let (tx, mut rx) = control_channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(listener.run(tx, cancel.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"kill|1|1700000000|a|b\nkill|1|1700000001|c|d\npartial")
            .await
            .unwrap();
        client.shutdown().await.unwrap();
        drop(client);

        let mut lines = Vec::new();
        for _ in 0..2 {
            match rx.recv().await.unwrap() {
                ControlMessage::IngestLine(line) => lines.push(line),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(lines[0], "kill|1|1700000000|a|b\n");
        assert_eq!(lines[1], "kill|1|1700000001|c|d\n");

        cancel.cancel();
        task.await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn bind_failure_names_address() {
        let first = LineListener::bind("127.0.0.1:0").await.unwrap();
        let addr = first.local_addr().to_string();
        match LineListener::bind(&addr).await {
            Err(IngestError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("second bind succeeded"),
        }
    }
}
