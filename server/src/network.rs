//! Server network layer accepting screens and wiring them to the router

use crate::config::ServerConfig;
use crate::feed::{run_feed, ContentFeed};
use crate::router::{self, Router, ScreenLinker, ServerEvent, Source};
use log::{debug, error, info, warn};
use shared::{
    BoundedQueue, ConnectionActor, ConnectionError, ConnectionObserver, ConnectionOptions,
    Message, ScreenId,
};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::Notify;

/// An accepted socket the router has not given an identity yet
#[derive(Debug)]
pub struct PendingScreen {
    pub stream: TcpStream,
    pub addr: SocketAddr,
}

pub type ServerInbox = router::ServerInbox<PendingScreen>;

/// Events flowing from a connection's receive thread to its forwarder
#[derive(Debug)]
enum LinkEvent {
    Message(Message),
    Closed,
}

/// Receive-side observer of one screen connection.
///
/// Runs on the connection thread; a full per-connection inbox stalls only
/// this connection.
struct LinkObserver {
    screen: ScreenId,
    inbox: Arc<BoundedQueue<LinkEvent>>,
}

impl ConnectionObserver for LinkObserver {
    fn on_message(&self, message: Message) {
        if self.inbox.enqueue(LinkEvent::Message(message)).is_err() {
            debug!("Screen {} inbox closed, dropping message", self.screen);
        }
    }

    fn on_disconnected(&self) {
        let _ = self.inbox.enqueue(LinkEvent::Closed);
    }
}

/// Starts the worker threads of each accepted screen
pub struct NetworkLinker {
    runtime: Handle,
    server_inbox: Arc<ServerInbox>,
    options: ConnectionOptions,
    inbox_capacity: usize,
    actors: HashMap<ScreenId, ConnectionActor>,
}

impl NetworkLinker {
    pub fn new(runtime: Handle, server_inbox: Arc<ServerInbox>, config: &ServerConfig) -> Self {
        Self {
            runtime,
            server_inbox,
            options: config.connection_options(),
            inbox_capacity: config.inbox_capacity,
            actors: HashMap::new(),
        }
    }

    /// Moves one screen's messages, tagged with its ID, into the server inbox
    fn spawn_forwarder(
        &self,
        screen: ScreenId,
        inbox: Arc<BoundedQueue<LinkEvent>>,
    ) -> io::Result<()> {
        let server_inbox = Arc::clone(&self.server_inbox);

        thread::Builder::new()
            .name(format!("screen-{}-inbox", screen))
            .spawn(move || {
                while let Some(event) = inbox.dequeue() {
                    let event = match event {
                        LinkEvent::Message(message) => ServerEvent::Message {
                            from: Source::Screen(screen),
                            message,
                        },
                        LinkEvent::Closed => ServerEvent::Disconnected(screen),
                    };
                    let closed = matches!(event, ServerEvent::Disconnected(_));

                    if server_inbox.enqueue(event).is_err() || closed {
                        break;
                    }
                }

                // Unblock the receive thread if it is still producing
                inbox.close();
                debug!("Forwarder for screen {} stopped", screen);
            })?;
        Ok(())
    }

    /// Writes everything the router queues for a screen to its socket
    fn spawn_writer(
        &self,
        screen: ScreenId,
        actor: ConnectionActor,
        outbox: Arc<BoundedQueue<Message>>,
    ) -> io::Result<()> {
        thread::Builder::new()
            .name(format!("screen-{}-outbox", screen))
            .spawn(move || {
                while let Some(message) = outbox.dequeue() {
                    if let Err(e) = actor.send_message(&message) {
                        warn!("Failed to send to screen {}: {}", screen, e);
                        outbox.close();
                        break;
                    }
                }

                actor.dispose();
                debug!("Writer for screen {} stopped", screen);
            })?;
        Ok(())
    }
}

impl ScreenLinker for NetworkLinker {
    type Connection = PendingScreen;

    fn link(
        &mut self,
        id: ScreenId,
        connection: PendingScreen,
        outbox: Arc<BoundedQueue<Message>>,
    ) -> Result<String, ConnectionError> {
        let inbox = Arc::new(BoundedQueue::new(self.inbox_capacity));
        let observer = Arc::new(LinkObserver {
            screen: id,
            inbox: Arc::clone(&inbox),
        });
        let actor = ConnectionActor::from_stream(
            self.runtime.clone(),
            connection.stream,
            self.options,
            observer,
        );

        self.spawn_forwarder(id, Arc::clone(&inbox))?;
        if let Err(e) = self.spawn_writer(id, actor.clone(), outbox) {
            inbox.close();
            return Err(e.into());
        }
        actor.start_receiving()?;
        self.actors.insert(id, actor);

        Ok(connection.addr.to_string())
    }

    fn sever(&mut self, id: ScreenId) {
        if let Some(actor) = self.actors.remove(&id) {
            debug!("Closing connection of screen {}", id);
            actor.dispose();
        }
    }
}

/// Handle for feeding and stopping a running [`Server`]
#[derive(Clone)]
pub struct ServerHandle {
    inbox: Arc<ServerInbox>,
    shutdown: Arc<Notify>,
}

impl ServerHandle {
    /// Routes `message` as if it came from a content feed.
    ///
    /// Blocks while the server inbox is full; returns false once the
    /// server has stopped.
    pub fn inject(&self, message: Message) -> bool {
        self.inbox
            .enqueue(ServerEvent::Message {
                from: Source::Feed,
                message,
            })
            .is_ok()
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

/// Main server accepting screens and running the router
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    inbox: Arc<ServerInbox>,
    shutdown: Arc<Notify>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_address()).await?;
        info!(
            "Server listening on {} ({} encoding)",
            listener.local_addr()?,
            config.format
        );

        Ok(Self {
            listener,
            inbox: Arc::new(BoundedQueue::new(config.server_inbox_capacity)),
            config,
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            inbox: Arc::clone(&self.inbox),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Spawns the router on its own thread
    fn spawn_router(&self) -> io::Result<thread::JoinHandle<()>> {
        let linker = NetworkLinker::new(Handle::current(), Arc::clone(&self.inbox), &self.config);
        let mut router = Router::new(linker, &self.config);
        let inbox = Arc::clone(&self.inbox);

        thread::Builder::new()
            .name("router".to_string())
            .spawn(move || router.run(&inbox))
    }

    /// Accepts screens until [`ServerHandle::shutdown`] is called
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let router = self.spawn_router()?;

        if let Some(interval) = self.config.feed_interval {
            let feed = ContentFeed::new(self.config.rng_seed);
            tokio::spawn(run_feed(self.handle(), interval, feed));
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            info!("Screen connecting from {}", addr);
                            let inbox = Arc::clone(&self.inbox);
                            let event = ServerEvent::Connected(PendingScreen { stream, addr });
                            let queued =
                                tokio::task::spawn_blocking(move || inbox.enqueue(event).is_ok())
                                    .await?;
                            if !queued {
                                break;
                            }
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                },

                _ = self.shutdown.notified() => {
                    info!("Server shutting down");
                    break;
                },
            }
        }

        self.inbox.close();
        tokio::task::spawn_blocking(move || router.join())
            .await?
            .map_err(|_| "router thread panicked")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Direction, NewObject, ObjectKind, Vector2};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio_test::assert_ok;

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            rng_seed: Some(3),
            ..ServerConfig::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bind_any_port() {
        let server = Server::bind(test_config()).await.unwrap();
        let addr = server.local_addr().unwrap();

        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_stops_run() {
        let server = Server::bind(test_config()).await.unwrap();
        let handle = server.handle();
        let running = tokio::spawn(server.run());

        handle.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert_ok!(result);

        let message = Message::PopObject { id: 1 };
        assert!(!tokio::task::spawn_blocking(move || handle.inject(message))
            .await
            .unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_injected_object_reaches_screen() {
        let server = Server::bind(test_config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.handle();
        tokio::spawn(server.run());

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut lines = BufReader::new(stream).lines();

        // The screen is linked asynchronously; an orphan is adopted on arrival
        let injector = handle.clone();
        tokio::task::spawn_blocking(move || {
            injector.inject(Message::NewObject(NewObject {
                id: 42,
                kind: ObjectKind::Balloon,
                direction: Direction::Any,
                y: 0.25,
                velocity: Vector2::new(0.1, 0.0),
            }))
        })
        .await
        .unwrap();

        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(line.starts_with("new-balloon [42,"), "unexpected line {}", line);

        handle.shutdown();
    }
}
