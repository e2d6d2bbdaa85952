//! Handle to one live client connection
//!
//! The socket itself is owned by its writer task; everything else talks to it
//! through a bounded channel. Dropping the last handle closes the socket.
//!
//! Frames sent with [`ConnectionHandle::send_confirmed`] carry a one-shot
//! acknowledgement that the writer fires only after the frame reached the
//! socket. Frames still buffered when the writer stops are dropped with their
//! acknowledgement, which the sender sees as a closed connection.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::protocol::ServerMessage;

/// How long a send may wait on a full outbound buffer
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a confirmed send waits for the socket write
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// The connection is closed or too slow to accept more frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionClosed;

impl std::fmt::Display for ConnectionClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("connection closed")
    }
}

impl std::error::Error for ConnectionClosed {}

/// One outbound frame, optionally awaiting a write acknowledgement
#[derive(Debug)]
pub struct Frame {
    message: ServerMessage,
    written: Option<oneshot::Sender<()>>,
}

impl Frame {
    pub fn message(&self) -> &ServerMessage {
        &self.message
    }

    /// Report the frame as written to the socket
    pub fn confirm(self) -> ServerMessage {
        if let Some(written) = self.written {
            let _ = written.send(());
        }
        self.message
    }
}

/// Receiving end of a connection's outbound channel
#[derive(Debug)]
pub struct FrameReceiver {
    rx: mpsc::Receiver<Frame>,
}

impl FrameReceiver {
    /// Next frame, left unconfirmed for the writer to settle
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Next message, confirmed as written on receipt
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await.map(Frame::confirm)
    }

    /// Stop accepting frames; buffered ones can still be drained
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::Sender<Frame>,
}

impl ConnectionHandle {
    /// Handle plus the receiving end a writer task drains
    pub fn channel(buffer: usize) -> (Self, FrameReceiver) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = ConnectionHandle {
            id: Uuid::new_v4(),
            tx,
        };
        (handle, FrameReceiver { rx })
    }

    /// Distinguishes successive connections of the same session
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn enqueue(&self, frame: Frame) -> Result<(), ConnectionClosed> {
        match tokio::time::timeout(SEND_TIMEOUT, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(ConnectionClosed),
        }
    }

    /// Queue a frame for the writer task
    pub async fn send(&self, msg: ServerMessage) -> Result<(), ConnectionClosed> {
        self.enqueue(Frame {
            message: msg,
            written: None,
        })
        .await
    }

    /// Queue a frame and wait until the writer has put it on the socket
    pub async fn send_confirmed(&self, msg: ServerMessage) -> Result<(), ConnectionClosed> {
        let (written, confirmed) = oneshot::channel();
        self.enqueue(Frame {
            message: msg,
            written: Some(written),
        })
        .await?;
        match tokio::time::timeout(WRITE_TIMEOUT, confirmed).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(ConnectionClosed),
        }
    }
}
