//! Connection actor owning one TCP socket
//!
//! Each actor runs its receive loop on a dedicated OS thread that drives an
//! async read through the tokio runtime handle it was given: bytes land
//! directly in the free region of a [`ByteRing`], every complete frame is
//! decoded and handed to the [`ConnectionObserver`], and only then is the
//! next receive issued. Observer callbacks therefore run on the actor's own
//! thread and may block (for instance on a full [`crate::BoundedQueue`])
//! without stalling any other connection.
//!
//! Lifecycle: `Idle -> Connecting -> Connected -> Receiving -> Disconnected`.
//! A failed connect returns the actor to `Idle` so the caller may retry.
//! `Disconnected` is terminal and is reported exactly once.
//!
//! Writes are synchronous from the caller's point of view and follow a
//! single-writer discipline: one thread sends on a given actor.

use crate::codec::{FrameCodec, WireFormat};
use crate::error::{ConnectionError, ProtocolError};
use crate::message::Message;
use crate::ring::ByteRing;
use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Receiving,
    Disconnected,
}

/// Receives the events of one connection, on that connection's thread.
///
/// Implementations must return promptly from everything except
/// `on_message`, which is allowed to apply backpressure.
pub trait ConnectionObserver: Send + Sync + 'static {
    fn on_connected(&self) {}

    fn on_connect_failed(&self, _error: &io::Error) {}

    fn on_message(&self, message: Message);

    fn on_disconnected(&self) {}
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    pub format: WireFormat,
    /// Size of the receive ring, bounds the largest frame accepted
    pub buffer_capacity: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            format: WireFormat::default(),
            buffer_capacity: crate::DEFAULT_BUFFER_CAPACITY,
        }
    }
}

#[derive(Clone)]
pub struct ConnectionActor {
    inner: Arc<ActorInner>,
}

struct ActorInner {
    runtime: Handle,
    options: ConnectionOptions,
    observer: Arc<dyn ConnectionObserver>,
    state: Mutex<ConnectionState>,
    peer: Mutex<Option<SocketAddr>>,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    shutdown: Notify,
    /// Flips to `true` on dispose; aborts a write stuck on a peer that
    /// stopped reading
    closed: watch::Sender<bool>,
}

impl ConnectionActor {
    pub fn new(
        runtime: Handle,
        options: ConnectionOptions,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(ActorInner {
                runtime,
                options,
                observer,
                state: Mutex::new(ConnectionState::Idle),
                peer: Mutex::new(None),
                reader: Mutex::new(None),
                writer: tokio::sync::Mutex::new(None),
                shutdown: Notify::new(),
                closed: watch::channel(false).0,
            }),
        }
    }

    /// Wraps a socket accepted by a listener, already `Connected`
    pub fn from_stream(
        runtime: Handle,
        stream: TcpStream,
        options: ConnectionOptions,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        let peer = stream.peer_addr().ok();
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {:?}: {}", peer, e);
        }
        let (reader, writer) = stream.into_split();

        Self {
            inner: Arc::new(ActorInner {
                runtime,
                options,
                observer,
                state: Mutex::new(ConnectionState::Connected),
                peer: Mutex::new(peer),
                reader: Mutex::new(Some(reader)),
                writer: tokio::sync::Mutex::new(Some(writer)),
                shutdown: Notify::new(),
                closed: watch::channel(false).0,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *lock(&self.inner.peer)
    }

    pub fn options(&self) -> ConnectionOptions {
        self.inner.options
    }

    /// Starts connecting without blocking the caller.
    ///
    /// Completion is reported through `on_connected` or `on_connect_failed`.
    /// A successful connection starts receiving on the same thread.
    pub fn connect(&self, addr: SocketAddr) -> Result<(), ConnectionError> {
        self.inner
            .transition(ConnectionState::Idle, ConnectionState::Connecting)?;

        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(format!("connection-{}", addr))
            .spawn(move || {
                let connected = inner.runtime.block_on(inner.establish(addr));
                match connected {
                    Ok(()) => {
                        info!("Connected to {}", addr);
                        inner.observer.on_connected();
                        if inner
                            .transition(ConnectionState::Connected, ConnectionState::Receiving)
                            .is_ok()
                        {
                            inner.run_receive_loop();
                        }
                    }
                    Err(e) => {
                        lock(&inner.reader).take();
                        if inner
                            .transition(ConnectionState::Connecting, ConnectionState::Idle)
                            .is_ok()
                        {
                            warn!("Failed to connect to {}: {}", addr, e);
                            inner.observer.on_connect_failed(&e);
                        } else {
                            // Disposed mid-connect, `finish` already reported it
                            debug!("Connection to {} abandoned", addr);
                            inner.runtime.block_on(async {
                                inner.writer.lock().await.take();
                            });
                        }
                    }
                }
            });

        if let Err(e) = spawned {
            self.inner.set_state(ConnectionState::Idle);
            return Err(e.into());
        }
        Ok(())
    }

    /// Begins the receive loop of a `Connected` actor on its own thread
    pub fn start_receiving(&self) -> Result<(), ConnectionError> {
        self.inner
            .transition(ConnectionState::Connected, ConnectionState::Receiving)?;

        let inner = Arc::clone(&self.inner);
        let name = match self.peer_addr() {
            Some(peer) => format!("connection-{}", peer),
            None => "connection".to_string(),
        };
        let spawned = thread::Builder::new()
            .name(name)
            .spawn(move || inner.run_receive_loop());

        if let Err(e) = spawned {
            self.inner.finish();
            return Err(e.into());
        }
        Ok(())
    }

    /// Encodes and sends `message`, blocking until it is written.
    ///
    /// Must be called from outside the async runtime; async callers use
    /// [`ConnectionActor::send`].
    pub fn send_message(&self, message: &Message) -> Result<(), ConnectionError> {
        self.inner.runtime.block_on(self.send(message))
    }

    pub async fn send(&self, message: &Message) -> Result<(), ConnectionError> {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Receiving => {}
            _ => return Err(ConnectionError::NotConnected),
        }

        let bytes = self.inner.options.format.encode(message)?;
        let mut closed = self.inner.closed.subscribe();
        if *closed.borrow() {
            return Err(ConnectionError::NotConnected);
        }

        let mut writer = self.inner.writer.lock().await;
        let writer = writer.as_mut().ok_or(ConnectionError::NotConnected)?;
        tokio::select! {
            written = writer.write_all(&bytes) => written?,
            _ = closed.changed() => return Err(ConnectionError::NotConnected),
        }
        Ok(())
    }

    /// Closes the socket; a running receive loop wakes up and reports
    /// `on_disconnected`, and a pending send fails with `NotConnected`
    pub fn dispose(&self) {
        self.inner.closed.send_replace(true);
        match self.state() {
            ConnectionState::Disconnected => {}
            ConnectionState::Receiving => self.inner.shutdown.notify_one(),
            _ => {
                // A receive loop that starts concurrently still sees the permit
                self.inner.shutdown.notify_one();
                lock(&self.inner.reader).take();
                self.inner.finish();
            }
        }
    }
}

impl ActorInner {
    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), ConnectionError> {
        let mut state = lock(&self.state);
        if *state != from {
            return Err(ConnectionError::InvalidState(*state));
        }
        *state = to;
        Ok(())
    }

    async fn establish(&self, addr: SocketAddr) -> io::Result<()> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        *lock(&self.peer) = Some(addr);
        *lock(&self.reader) = Some(reader);
        *self.writer.lock().await = Some(writer);

        // Disposed while connecting: the halves are released by `finish`
        self.transition(ConnectionState::Connecting, ConnectionState::Connected)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }

    fn run_receive_loop(self: Arc<Self>) {
        let reader = lock(&self.reader).take();
        let peer = *lock(&self.peer);

        if let Some(mut reader) = reader {
            let mut ring = ByteRing::new(self.options.buffer_capacity);
            match self.runtime.block_on(self.receive(&mut reader, &mut ring)) {
                Ok(()) => debug!("Receive loop for {:?} finished", peer),
                Err(e) => error!("Connection {:?} failed: {}", peer, e),
            }
        }

        self.finish();
    }

    async fn receive(
        &self,
        reader: &mut OwnedReadHalf,
        ring: &mut ByteRing,
    ) -> Result<(), ConnectionError> {
        loop {
            if ring.forward_capacity() == 0 {
                // The codecs reject frames that cannot fit, so a saturated
                // ring always holds at least one complete frame
                return Err(ProtocolError::FrameTooLarge {
                    length: ring.available(),
                    capacity: ring.capacity(),
                }
                .into());
            }

            let received = tokio::select! {
                result = reader.read(ring.writable_slice()) => result,
                _ = self.shutdown.notified() => return Ok(()),
            };

            let count = match received {
                Ok(0) => return Ok(()),
                Ok(count) => count,
                Err(e) if is_disconnect(&e) => {
                    debug!("Socket closed by peer: {}", e);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            ring.skip_write(count).map_err(ProtocolError::from)?;
            while let Some(message) = self.options.format.try_decode(ring)? {
                self.observer.on_message(message);
            }
        }
    }

    /// Moves to `Disconnected`, releases the socket and notifies the
    /// observer, once
    fn finish(self: &Arc<Self>) {
        let previous = std::mem::replace(&mut *lock(&self.state), ConnectionState::Disconnected);
        if previous == ConnectionState::Disconnected {
            return;
        }

        // Dropping the write half shuts the socket down for writing
        self.closed.send_replace(true);
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            inner.writer.lock().await.take();
        });

        self.observer.on_disconnected();
    }
}

fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChangeScreen, Direction, Vector2};
    use crate::queue::BoundedQueue;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[derive(Debug, PartialEq)]
    enum Event {
        Connected,
        ConnectFailed,
        Message(Message),
        Disconnected,
    }

    struct Recorder {
        events: BoundedQueue<Event>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: BoundedQueue::new(64),
            })
        }

        fn next(&self) -> Option<Event> {
            self.events.dequeue_timeout(Duration::from_secs(5))
        }
    }

    impl ConnectionObserver for Recorder {
        fn on_connected(&self) {
            let _ = self.events.enqueue(Event::Connected);
        }

        fn on_connect_failed(&self, _error: &io::Error) {
            let _ = self.events.enqueue(Event::ConnectFailed);
        }

        fn on_message(&self, message: Message) {
            let _ = self.events.enqueue(Event::Message(message));
        }

        fn on_disconnected(&self) {
            let _ = self.events.enqueue(Event::Disconnected);
        }
    }

    fn change(id: u32) -> Message {
        Message::ChangeScreen(ChangeScreen {
            id,
            direction: Direction::Right,
            y: 0.4,
            velocity: Vector2::new(2.0, 0.0),
            time: 0.0,
        })
    }

    async fn accept_pair(
        options: ConnectionOptions,
    ) -> (ConnectionActor, Arc<Recorder>, ConnectionActor, Arc<Recorder>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_events = Recorder::new();
        let client = ConnectionActor::new(Handle::current(), options, client_events.clone());
        client.connect(addr).unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let server_events = Recorder::new();
        let server =
            ConnectionActor::from_stream(Handle::current(), stream, options, server_events.clone());

        (client, client_events, server, server_events)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_messages_arrive_in_order() {
        let options = ConnectionOptions {
            format: WireFormat::Binary,
            buffer_capacity: 64,
        };
        let (client, client_events, server, server_events) = accept_pair(options).await;
        assert_eq!(server.state(), ConnectionState::Connected);
        server.start_receiving().unwrap();

        let sender = client.clone();
        tokio::task::spawn_blocking(move || {
            assert_eq!(client_events.next(), Some(Event::Connected));
            for id in 0..20 {
                sender.send_message(&change(id)).unwrap();
            }
        })
        .await
        .unwrap();

        let received = tokio::task::spawn_blocking(move || {
            (0..20).map(|_| server_events.next()).collect::<Vec<_>>()
        })
        .await
        .unwrap();

        let expected: Vec<_> = (0..20).map(|id| Some(Event::Message(change(id)))).collect();
        assert_eq!(received, expected);
        client.dispose();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_peer_close_reports_disconnect_once() {
        let (client, client_events, server, server_events) =
            accept_pair(ConnectionOptions::default()).await;
        server.start_receiving().unwrap();

        let events = tokio::task::spawn_blocking(move || {
            assert_eq!(client_events.next(), Some(Event::Connected));
            client.dispose();
            let client_closed = client_events.next();
            let server_closed = server_events.next();
            let extra = server_events.events.dequeue_timeout(Duration::from_millis(100));
            (client_closed, server_closed, extra)
        })
        .await
        .unwrap();

        assert_eq!(events.0, Some(Event::Disconnected));
        assert_eq!(events.1, Some(Event::Disconnected));
        assert_eq!(events.2, None);
        assert_eq!(server.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_connect_failure_returns_to_idle() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let events = Recorder::new();
        let actor = ConnectionActor::new(
            Handle::current(),
            ConnectionOptions::default(),
            events.clone(),
        );
        actor.connect(addr).unwrap();

        let event = tokio::task::spawn_blocking(move || events.next())
            .await
            .unwrap();
        assert_eq!(event, Some(Event::ConnectFailed));
        assert_eq!(actor.state(), ConnectionState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_protocol_error_closes_connection() {
        let options = ConnectionOptions {
            format: WireFormat::Text,
            buffer_capacity: 64,
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut raw = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let events = Recorder::new();
        let actor =
            ConnectionActor::from_stream(Handle::current(), stream, options, events.clone());
        actor.start_receiving().unwrap();

        raw.write_all(b"pop-object [3]\nnew-zeppelin [1]\n").await.unwrap();

        let received = tokio::task::spawn_blocking(move || (events.next(), events.next()))
            .await
            .unwrap();
        assert_eq!(received.0, Some(Event::Message(Message::PopObject { id: 3 })));
        assert_eq!(received.1, Some(Event::Disconnected));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispose_while_connecting_reports_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Races dispose against every stage of the connect thread
        for _ in 0..10 {
            let events = Recorder::new();
            let actor = ConnectionActor::new(
                Handle::current(),
                ConnectionOptions::default(),
                events.clone(),
            );
            actor.connect(addr).unwrap();
            actor.dispose();

            let seen = tokio::task::spawn_blocking(move || {
                let mut seen = Vec::new();
                while let Some(event) = events.events.dequeue_timeout(Duration::from_millis(100)) {
                    seen.push(event);
                }
                seen
            })
            .await
            .unwrap();

            assert!(!seen.contains(&Event::ConnectFailed), "events: {:?}", seen);
            let disconnects = seen.iter().filter(|e| **e == Event::Disconnected).count();
            assert_eq!(disconnects, 1, "events: {:?}", seen);
            assert_eq!(actor.state(), ConnectionState::Disconnected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_line_longer_than_buffer_closes_connection() {
        let options = ConnectionOptions {
            format: WireFormat::Text,
            buffer_capacity: 16,
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut raw = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let events = Recorder::new();
        let actor =
            ConnectionActor::from_stream(Handle::current(), stream, options, events.clone());
        actor.start_receiving().unwrap();

        // 15 bytes fit the ring; the run of 32 without a newline never does
        raw.write_all(b"pop-object [3]\n").await.unwrap();
        raw.write_all(&[b'x'; 32]).await.unwrap();

        let received = tokio::task::spawn_blocking(move || (events.next(), events.next()))
            .await
            .unwrap();
        assert_eq!(received.0, Some(Event::Message(Message::PopObject { id: 3 })));
        assert_eq!(received.1, Some(Event::Disconnected));
        assert_eq!(actor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispose_aborts_stuck_send() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // The peer never reads, so the socket buffers eventually fill up
        let _silent = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let actor = ConnectionActor::from_stream(
            Handle::current(),
            stream,
            ConnectionOptions::default(),
            Recorder::new(),
        );

        let content = crate::message::BalloonContent {
            label: "x".repeat(60_000),
            ..Default::default()
        };
        let message = Message::ContentUpdate { id: 1, content };
        let sender = actor.clone();
        let writer = tokio::task::spawn_blocking(move || loop {
            if let Err(e) = sender.send_message(&message) {
                return e;
            }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        actor.dispose();

        let error = tokio::time::timeout(Duration::from_secs(5), writer)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(error, ConnectionError::NotConnected));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invalid_transitions() {
        let actor = ConnectionActor::new(
            Handle::current(),
            ConnectionOptions::default(),
            Recorder::new(),
        );

        assert!(matches!(
            actor.start_receiving(),
            Err(ConnectionError::InvalidState(ConnectionState::Idle))
        ));
        assert!(matches!(
            actor.send(&Message::GetState { id: 1 }).await,
            Err(ConnectionError::NotConnected)
        ));

        actor.dispose();
        assert_eq!(actor.state(), ConnectionState::Disconnected);
        assert!(actor.connect("127.0.0.1:9".parse().unwrap()).is_err());
    }
}
