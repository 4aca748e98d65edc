use std::fmt;
use thiserror::Error;

/// Contract violations on a [`crate::ByteRing`]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    #[error("write of {requested} bytes exceeds free capacity {free}")]
    CapacityExceeded { requested: usize, free: usize },
    #[error("read of {requested} bytes exceeds available data {available}")]
    InsufficientData { requested: usize, available: usize },
}

/// Failures while turning frames into messages or back.
///
/// Every variant is fatal to the connection that produced the frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unsupported message type {0}")]
    UnsupportedMessageType(String),
    #[error("malformed {tag} frame: {reason}")]
    Malformed { tag: String, reason: String },
    #[error("frame of {length} bytes can never fit a {capacity} byte buffer")]
    FrameTooLarge { length: usize, capacity: usize },
    #[error("text payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("binary payload: {0}")]
    Binary(#[from] bincode::Error),
    #[error(transparent)]
    Ring(#[from] RingError),
}

impl ProtocolError {
    pub fn malformed(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        ProtocolError::Malformed {
            tag: tag.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("operation not allowed while {0:?}")]
    InvalidState(crate::connection::ConnectionState),
    #[error("connection is not established")]
    NotConnected,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Returned by [`crate::BoundedQueue::enqueue`] once the queue is closed.
///
/// Hands the rejected item back to the caller.
#[derive(Error, PartialEq, Eq)]
#[error("queue is closed")]
pub struct QueueClosed<T>(pub T);

impl<T> fmt::Debug for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueClosed(..)")
    }
}

/// Returned by [`crate::BoundedQueue::try_enqueue`], handing the item back
#[derive(Error, PartialEq, Eq)]
pub enum TryEnqueueError<T> {
    #[error("queue is full")]
    Full(T),
    #[error("queue is closed")]
    Closed(T),
}

impl<T> fmt::Debug for TryEnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryEnqueueError::Full(_) => f.write_str("Full(..)"),
            TryEnqueueError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}
