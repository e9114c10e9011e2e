//! In-memory sockets for tests (feature: testing).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::traits::{RelaySocket, SendError};

/// How a [`RecordingSocket`] answers sends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SocketMode {
    /// Record the frame.
    #[default]
    Open,
    /// Fail every send with [`SendError::Closed`].
    Closed,
    /// Fail every send with [`SendError::Transport`].
    Broken,
}

#[derive(Default)]
struct Inner {
    sent: Vec<String>,
    closes: Vec<(u16, String)>,
    mode: SocketMode,
}

/// Socket that records everything sent to it.
#[derive(Clone, Default)]
pub struct RecordingSocket {
    inner: Arc<Mutex<Inner>>,
}

impl RecordingSocket {
    /// Create an open socket.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change how sends behave.
    pub fn set_mode(&self, mode: SocketMode) {
        self.lock().mode = mode;
    }

    /// Frames sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    /// Frames sent so far, parsed as JSON.
    #[must_use]
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .filter_map(|s| serde_json::from_str(s).ok())
            .collect()
    }

    /// Close calls received so far.
    #[must_use]
    pub fn closes(&self) -> Vec<(u16, String)> {
        self.lock().closes.clone()
    }
}

#[async_trait]
impl RelaySocket for RecordingSocket {
    async fn send_text(&self, text: String) -> Result<(), SendError> {
        let mut inner = self.lock();
        match inner.mode {
            SocketMode::Open => {
                inner.sent.push(text);
                Ok(())
            }
            SocketMode::Closed => Err(SendError::Closed),
            SocketMode::Broken => Err(SendError::Transport("broken pipe".to_string())),
        }
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), SendError> {
        let mut inner = self.lock();
        inner.closes.push((code, reason.to_string()));
        if inner.mode == SocketMode::Open {
            inner.mode = SocketMode::Closed;
            Ok(())
        } else {
            Err(SendError::Closed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_closes() {
        let socket = RecordingSocket::new();
        tokio_test::assert_ok!(socket.send_text("a".to_string()).await);
        tokio_test::assert_ok!(socket.close(1000, "bye").await);
        assert_eq!(socket.sent(), vec!["a".to_string()]);
        assert_eq!(socket.closes(), vec![(1000, "bye".to_string())]);
        assert_eq!(socket.send_text("b".to_string()).await, Err(SendError::Closed));
    }

    #[tokio::test]
    async fn test_broken_mode() {
        let socket = RecordingSocket::new();
        socket.set_mode(SocketMode::Broken);
        assert!(matches!(
            socket.send_text("x".to_string()).await,
            Err(SendError::Transport(_))
        ));
        assert!(socket.sent().is_empty());
    }
}
