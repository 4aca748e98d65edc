use crate::config::ClientConfig;
use crate::sky::Sky;
use log::{debug, error, info, warn};
use shared::{
    BoundedQueue, ConnectionActor, ConnectionError, ConnectionObserver, Message, ObjectId,
};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// What the connection thread reports to the tick loop
#[derive(Debug, PartialEq)]
pub enum ClientEvent {
    Connected,
    ConnectFailed(String),
    Message(Message),
    Disconnected,
}

struct EventObserver {
    events: Arc<BoundedQueue<ClientEvent>>,
}

impl ConnectionObserver for EventObserver {
    fn on_connected(&self) {
        let _ = self.events.enqueue(ClientEvent::Connected);
    }

    fn on_connect_failed(&self, error: &io::Error) {
        let _ = self.events.enqueue(ClientEvent::ConnectFailed(error.to_string()));
    }

    fn on_message(&self, message: Message) {
        let _ = self.events.enqueue(ClientEvent::Message(message));
    }

    fn on_disconnected(&self) {
        let _ = self.events.enqueue(ClientEvent::Disconnected);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Connecting,
    Running,
    Closed,
}

/// A headless screen: owns a connection and a local sky
pub struct ScreenClient {
    config: ClientConfig,
    actor: ConnectionActor,
    events: Arc<BoundedQueue<ClientEvent>>,
    sky: Sky,
    status: Status,
    failed_attempts: u32,
}

impl ScreenClient {
    /// Must be called from within a tokio runtime
    pub fn new(config: ClientConfig) -> Self {
        let events = Arc::new(BoundedQueue::new(config.inbox_capacity));
        let observer = Arc::new(EventObserver {
            events: Arc::clone(&events),
        });
        let actor = ConnectionActor::new(Handle::current(), config.connection_options(), observer);

        Self {
            sky: Sky::new(config.rng_seed),
            config,
            actor,
            events,
            status: Status::Connecting,
            failed_attempts: 0,
        }
    }

    pub fn sky(&self) -> &Sky {
        &self.sky
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn connect(&self) -> Result<(), ConnectionError> {
        info!("Connecting to {}...", self.config.server_addr);
        self.actor.connect(self.config.server_addr)
    }

    /// Drains pending events, advances the sky by `dt` seconds and sends
    /// whatever that produced
    pub async fn tick(
        &mut self,
        dt: f32,
    ) -> Result<Status, Box<dyn std::error::Error + Send + Sync>> {
        let mut outgoing = Vec::new();

        for event in self.events.dequeue_all() {
            match event {
                ClientEvent::Connected => {
                    info!("Connected to {}", self.config.server_addr);
                    self.status = Status::Running;
                    self.failed_attempts = 0;
                }
                ClientEvent::ConnectFailed(reason) => {
                    self.failed_attempts += 1;
                    if self.failed_attempts > self.config.connect_retries {
                        error!("Giving up after {} attempts", self.failed_attempts);
                        self.status = Status::Closed;
                        return Err(reason.into());
                    }

                    warn!(
                        "Connection attempt {} failed: {}, retrying",
                        self.failed_attempts, reason
                    );
                    sleep(self.config.retry_delay).await;
                    self.connect()?;
                }
                ClientEvent::Message(message) => {
                    debug!("Received {}", message.message_type());
                    outgoing.extend(self.sky.apply(message));
                }
                ClientEvent::Disconnected => {
                    info!("Disconnected from {}", self.config.server_addr);
                    self.status = Status::Closed;
                }
            }
        }

        if self.status == Status::Running {
            outgoing.extend(self.sky.update(dt));
            for message in &outgoing {
                if let Err(e) = self.actor.send(message).await {
                    warn!("Failed to send {}: {}", message.message_type(), e);
                }
            }
        }

        Ok(self.status)
    }

    /// Pops an object locally and tells the server
    pub async fn pop(&mut self, id: ObjectId) -> Result<bool, ConnectionError> {
        match self.sky.pop(id) {
            Some(message) => {
                self.actor.send(&message).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Connects and ticks at the configured rate until the server goes away
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.connect()?;

        let mut ticker = interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        loop {
            ticker.tick().await;

            let now = Instant::now();
            let dt = now.duration_since(last_tick).as_secs_f32();
            last_tick = now;

            if self.tick(dt).await? == Status::Closed {
                return Ok(());
            }
        }
    }
}

impl Drop for ScreenClient {
    fn drop(&mut self) {
        // Nobody drains the events any more
        self.events.close();
        self.actor.dispose();
    }
}
