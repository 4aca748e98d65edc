//! # Shared Messaging Library
//!
//! Types and primitives used by both the routing server and the screens.
//!
//! ## Module Organization
//!
//! ### Message Module (`message`)
//! The typed messages exchanged on the wire: object introductions, screen
//! changes, pops and balloon metadata replication.
//!
//! ### Ring Module (`ring`)
//! A fixed-capacity byte ring with independent read/write cursors that
//! accumulates partial network reads until whole frames are available.
//!
//! ### Queue Module (`queue`)
//! A bounded queue over a crossbeam channel, decoupling connection threads
//! from the threads that process their messages. Full queues block
//! producers; the router alone uses the non-blocking `try_enqueue`.
//!
//! ### Codec Module (`codec`)
//! Newline-delimited text and length-prefixed binary encodings sharing one
//! positional field layout per message type.
//!
//! ### Connection Module (`connection`)
//! The connection actor: one TCP socket, one receive thread, observer
//! callbacks and a blocking send.

pub mod codec;
pub mod connection;
pub mod error;
pub mod message;
pub mod queue;
pub mod ring;

pub use codec::{BinaryCodec, FrameCodec, TextCodec, WireFormat};
pub use connection::{ConnectionActor, ConnectionObserver, ConnectionOptions, ConnectionState};
pub use error::{ConnectionError, ProtocolError, QueueClosed, RingError, TryEnqueueError};
pub use message::{
    BalloonContent, BalloonState, ChangeScreen, Direction, Message, MessageType, NewObject,
    ObjectId, ObjectKind, ScreenId, Vector2,
};
pub use queue::BoundedQueue;
pub use ring::ByteRing;

pub const DEFAULT_PORT: u16 = 4567;
/// Receive ring size per connection
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
