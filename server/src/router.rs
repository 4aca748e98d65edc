//! Routing state machine: the single authority over object ownership
//!
//! The router runs on exactly one thread and pulls one [`ServerEvent`] at a
//! time from the server inbox. It alone reads and mutates the screen ring
//! and the ownership map, so every ownership change is linearizable without
//! further locking. Connection threads only ever enqueue events; the router
//! answers by filling the outboxes of specific screens.
//!
//! Stale references (a screen reporting an object it no longer owns, a
//! message from a screen that already left) are expected while objects are
//! in flight and are logged and dropped rather than treated as errors.
//!
//! The router never waits on an outbox. A screen whose outbox is full is
//! cut off once the current event is handled, and its objects are re-homed
//! exactly as if its connection had dropped.

use crate::config::ServerConfig;
use crate::screen::{Delivery, Screen, ScreenRing};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    BalloonContent, BalloonState, BoundedQueue, ChangeScreen, ConnectionError, Direction,
    Message, NewObject, ObjectId, ObjectKind, ScreenId, Vector2,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Where a routed message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Screen(ScreenId),
    /// Content feeds and other non-screen producers
    Feed,
}

/// Everything the router reacts to
#[derive(Debug)]
pub enum ServerEvent<C> {
    /// A freshly accepted connection waiting for a screen identity
    Connected(C),
    Disconnected(ScreenId),
    Message { from: Source, message: Message },
}

pub type ServerInbox<C> = BoundedQueue<ServerEvent<C>>;

/// Turns an accepted connection into a live screen.
///
/// Implementations start whatever threads move messages between the
/// connection, the server inbox and the given outbox, and return a display
/// name for the screen.
pub trait ScreenLinker {
    type Connection;

    fn link(
        &mut self,
        id: ScreenId,
        connection: Self::Connection,
        outbox: Arc<BoundedQueue<Message>>,
    ) -> Result<String, ConnectionError>;

    /// Tears down whatever `link` started for `id`.
    ///
    /// Called once the router has dropped the screen, whether its connection
    /// closed or it stopped keeping up. Must not block.
    fn sever(&mut self, id: ScreenId);
}

/// Router-side knowledge about one object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    /// `None` while orphaned
    pub owner: Option<ScreenId>,
    pub kind: ObjectKind,
    /// Last known normalized height
    pub y: f32,
    /// Last known velocity
    pub velocity: Vector2,
    pub content: Option<BalloonContent>,
    pub state: Option<BalloonState>,
}

impl ObjectRecord {
    fn introduce(&self, id: ObjectId, direction: Direction) -> Message {
        Message::NewObject(NewObject {
            id,
            kind: self.kind,
            direction,
            y: self.y,
            velocity: self.velocity,
        })
    }
}

pub struct Router<L: ScreenLinker> {
    ring: ScreenRing,
    objects: HashMap<ObjectId, ObjectRecord>,
    linker: L,
    rng: StdRng,
    outbox_capacity: usize,
    /// Screens whose outbox overflowed during the current event
    stalled: Vec<ScreenId>,
}

impl<L: ScreenLinker> Router<L> {
    pub fn new(linker: L, config: &ServerConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            ring: ScreenRing::new(),
            objects: HashMap::new(),
            linker,
            rng,
            outbox_capacity: config.outbox_capacity,
            stalled: Vec::new(),
        }
    }

    /// Processes events until the inbox is closed and drained
    pub fn run(&mut self, inbox: &ServerInbox<L::Connection>) {
        info!("Router started");
        while let Some(event) = inbox.dequeue() {
            self.handle_event(event);
        }

        for screen in self.ring.iter() {
            screen.outbox.close();
        }
        info!("Router stopped with {} objects tracked", self.objects.len());
    }

    pub fn handle_event(&mut self, event: ServerEvent<L::Connection>) {
        match event {
            ServerEvent::Connected(connection) => self.handle_connected(connection),
            ServerEvent::Disconnected(screen) => self.handle_disconnected(screen),
            ServerEvent::Message { from, message } => self.handle_message(from, message),
        }

        // Dropping one screen re-homes onto others, which may stall in turn
        while let Some(screen) = self.stalled.pop() {
            self.handle_disconnected(screen);
        }
    }

    pub fn linker(&self) -> &L {
        &self.linker
    }

    pub fn screen_ids(&self) -> Vec<ScreenId> {
        self.ring.ids()
    }

    /// `None` for untracked objects, `Some(None)` for orphans
    pub fn owner_of(&self, id: ObjectId) -> Option<Option<ScreenId>> {
        self.objects.get(&id).map(|record| record.owner)
    }

    pub fn object(&self, id: ObjectId) -> Option<&ObjectRecord> {
        self.objects.get(&id)
    }

    pub fn objects_of(&self, screen: ScreenId) -> Vec<ObjectId> {
        self.ring
            .get(screen)
            .map(|screen| screen.objects.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn outbox_of(&self, screen: ScreenId) -> Option<Arc<BoundedQueue<Message>>> {
        self.ring.get(screen).map(|screen| Arc::clone(&screen.outbox))
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn handle_connected(&mut self, connection: L::Connection) {
        let id = self.ring.allocate_id();
        let outbox = Arc::new(BoundedQueue::new(self.outbox_capacity));

        let name = match self.linker.link(id, connection, Arc::clone(&outbox)) {
            Ok(name) => name,
            Err(e) => {
                error!("Failed to bring up screen {}: {}", id, e);
                outbox.close();
                return;
            }
        };

        let first = self.ring.is_empty();
        self.ring.push(Screen::new(id, name, outbox));

        if first {
            self.adopt_orphans(id);
        }
    }

    /// Hands every orphaned object to `screen`
    fn adopt_orphans(&mut self, screen: ScreenId) {
        let mut orphans: Vec<ObjectId> = self
            .objects
            .iter()
            .filter(|(_, record)| record.owner.is_none())
            .map(|(id, _)| *id)
            .collect();
        orphans.sort_unstable();

        for id in orphans {
            let introduction = match self.objects.get(&id) {
                Some(record) => record.introduce(id, Direction::Any),
                None => continue,
            };
            info!("Orphaned object {} adopted by screen {}", id, screen);
            self.assign(id, Some(screen));
            self.send_to(screen, introduction);
        }
    }

    fn handle_disconnected(&mut self, id: ScreenId) {
        let previous = self.ring.neighbor(id, Direction::Left);
        let next = self.ring.neighbor(id, Direction::Right);

        let Some(screen) = self.ring.remove(id) else {
            debug!("Disconnect for screen {} which already left", id);
            return;
        };
        screen.outbox.close();
        self.linker.sever(id);

        for object in screen.objects {
            if self.ring.is_empty() {
                info!("Object {} orphaned, no screens left", object);
                if let Some(record) = self.objects.get_mut(&object) {
                    record.owner = None;
                }
                continue;
            }

            // Leave through a random edge of the vanished screen
            let (target, entry) = if self.rng.gen_bool(0.5) {
                (previous, Direction::Right)
            } else {
                (next, Direction::Left)
            };
            let Some(record) = self.objects.get_mut(&object) else {
                continue;
            };
            record.owner = None;
            let Some(target) = target else {
                warn!("Object {} orphaned, screen {} had no neighbor", object, id);
                continue;
            };
            record.velocity.x = match entry {
                Direction::Right => -record.velocity.x.abs(),
                _ => record.velocity.x.abs(),
            };
            let introduction = record.introduce(object, entry);

            info!("Object {} re-homed from screen {} to {}", object, id, target);
            self.assign(object, Some(target));
            self.send_to(target, introduction);
        }
    }

    fn handle_message(&mut self, from: Source, message: Message) {
        if let Source::Screen(screen) = from {
            if !self.ring.contains(screen) {
                warn!(
                    "Dropping {} from screen {} which already left",
                    message.message_type(),
                    screen
                );
                return;
            }
        }
        debug!(
            "Routing {} for object {} from {:?}",
            message.message_type(),
            message.object_id(),
            from
        );

        match message {
            Message::NewObject(new) => self.handle_new_object(new),
            Message::ChangeScreen(change) => self.handle_change_screen(from, change),
            Message::PopObject { id } => self.handle_pop(from, id),
            Message::ContentUpdate { id, content } => {
                let Some(record) = self.objects.get_mut(&id) else {
                    warn!("Content update for unknown object {}", id);
                    return;
                };
                record.content = Some(content.clone());
                let owner = record.owner;
                self.forward_to_owner(from, owner, Message::ContentUpdate { id, content });
            }
            Message::StateUpdate { id, state } => {
                let Some(record) = self.objects.get_mut(&id) else {
                    warn!("State update for unknown object {}", id);
                    return;
                };
                record.state = Some(state);
                let owner = record.owner;
                self.forward_to_owner(from, owner, Message::StateUpdate { id, state });
            }
            Message::GetContent { id } => {
                let reply = self
                    .objects
                    .get(&id)
                    .and_then(|record| record.content.clone())
                    .map(|content| Message::ContentUpdate { id, content });
                self.reply(from, id, reply);
            }
            Message::GetState { id } => {
                let reply = self
                    .objects
                    .get(&id)
                    .and_then(|record| record.state)
                    .map(|state| Message::StateUpdate { id, state });
                self.reply(from, id, reply);
            }
        }
    }

    fn handle_new_object(&mut self, new: NewObject) {
        if self.objects.contains_key(&new.id) {
            debug!("Object {} already tracked, ignoring introduction", new.id);
            return;
        }

        let owner = self.ring.random(&mut self.rng);
        self.objects.insert(
            new.id,
            ObjectRecord {
                owner: None,
                kind: new.kind,
                y: new.y,
                velocity: new.velocity,
                content: None,
                state: None,
            },
        );

        match owner {
            Some(screen) => {
                info!("Object {} assigned to screen {}", new.id, screen);
                self.assign(new.id, Some(screen));
                self.send_to(screen, Message::NewObject(new));
            }
            None => info!("Object {} orphaned, no screens connected", new.id),
        }
    }

    fn handle_change_screen(&mut self, from: Source, change: ChangeScreen) {
        let Source::Screen(sender) = from else {
            warn!("Ignoring change-screen for object {} from a feed", change.id);
            return;
        };

        match self.objects.get(&change.id) {
            Some(record) if record.owner == Some(sender) => {}
            Some(record) => {
                warn!(
                    "Screen {} moved object {} owned by {:?}, ignoring",
                    sender, change.id, record.owner
                );
                return;
            }
            None => {
                warn!("Screen {} moved unknown object {}", sender, change.id);
                return;
            }
        }

        let (target, entry) = match change.direction {
            Direction::Any => (self.random_neighbor(sender), Direction::Any),
            exit => (self.ring.neighbor(sender, exit), exit.reversed()),
        };
        let Some(target) = target else {
            return;
        };

        let Some(record) = self.objects.get_mut(&change.id) else {
            return;
        };
        record.y = change.y;
        record.velocity = change.velocity;
        if let ObjectKind::Plane { time, .. } = &mut record.kind {
            *time = change.time;
        }
        let introduction = record.introduce(change.id, entry);

        debug!("Object {} migrates from screen {} to {}", change.id, sender, target);
        self.assign(change.id, Some(target));
        self.send_to(target, introduction);
    }

    fn handle_pop(&mut self, from: Source, id: ObjectId) {
        let Some(record) = self.objects.remove(&id) else {
            debug!("Pop for unknown object {}", id);
            return;
        };

        let Some(owner) = record.owner else {
            info!("Orphaned object {} popped", id);
            return;
        };
        if let Some(screen) = self.ring.get_mut(owner) {
            screen.objects.remove(&id);
        }

        info!("Object {} popped", id);
        if from != Source::Screen(owner) {
            self.send_to(owner, Message::PopObject { id });
        }
    }

    /// Moves `id` between screen object sets and records the new owner
    fn assign(&mut self, id: ObjectId, owner: Option<ScreenId>) {
        let Some(record) = self.objects.get_mut(&id) else {
            return;
        };

        if let Some(previous) = record.owner.take() {
            if let Some(screen) = self.ring.get_mut(previous) {
                screen.objects.remove(&id);
            }
        }
        if let Some(next) = owner {
            if let Some(screen) = self.ring.get_mut(next) {
                screen.objects.insert(id);
            }
        }
        record.owner = owner;
    }

    fn random_neighbor(&mut self, screen: ScreenId) -> Option<ScreenId> {
        let direction = if self.rng.gen_bool(0.5) {
            Direction::Left
        } else {
            Direction::Right
        };
        self.ring.neighbor(screen, direction)
    }

    fn forward_to_owner(&mut self, from: Source, owner: Option<ScreenId>, message: Message) {
        match owner {
            Some(owner) if from != Source::Screen(owner) => self.send_to(owner, message),
            _ => {}
        }
    }

    fn reply(&mut self, from: Source, id: ObjectId, reply: Option<Message>) {
        let Source::Screen(screen) = from else {
            return;
        };
        match reply {
            Some(message) => self.send_to(screen, message),
            None => debug!("Nothing cached for object {}", id),
        }
    }

    fn send_to(&mut self, screen: ScreenId, message: Message) {
        let Some(target) = self.ring.get(screen) else {
            warn!("No screen {} to deliver {}", screen, message.message_type());
            return;
        };

        if target.send(message) == Delivery::Stalled && !self.stalled.contains(&screen) {
            warn!("Screen {} is not keeping up with its outbox, dropping it", screen);
            target.outbox.close();
            self.stalled.push(screen);
        }
    }
}
