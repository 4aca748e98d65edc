//! Connected screens and the ring they form
//!
//! This module tracks the server-side view of every connected screen:
//! - Screen identity assignment in order of arrival
//! - The set of objects each screen currently owns
//! - The outbox the router fills with messages for that screen
//! - The circular neighbour relation used for migration and re-homing
//!
//! The ring is owned by the router thread; nothing here locks.

use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{BoundedQueue, Direction, Message, ObjectId, ScreenId, TryEnqueueError};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A connected screen as seen by the router
///
/// Each screen maintains:
/// - Identity (server-assigned ID and a human readable name)
/// - The outbox drained by its connection's writer thread
/// - The objects it is currently responsible for
#[derive(Debug)]
pub struct Screen {
    /// Unique screen identifier assigned by the server
    pub id: ScreenId,
    /// Peer address or configured name, for logs
    pub name: String,
    /// Messages waiting to be written to this screen
    pub outbox: Arc<BoundedQueue<Message>>,
    /// Objects currently owned by this screen
    pub objects: BTreeSet<ObjectId>,
}

impl Screen {
    pub fn new(id: ScreenId, name: String, outbox: Arc<BoundedQueue<Message>>) -> Self {
        Self {
            id,
            name,
            outbox,
            objects: BTreeSet::new(),
        }
    }

    /// Queues a message for this screen without waiting.
    ///
    /// A full outbox means the screen is not reading fast enough; the
    /// router then drops it. A closed outbox belongs to a screen whose
    /// connection already died and whose `Disconnected` is still in flight.
    pub fn send(&self, message: Message) -> Delivery {
        match self.outbox.try_enqueue(message) {
            Ok(()) => Delivery::Queued,
            Err(TryEnqueueError::Full(_)) => Delivery::Stalled,
            Err(TryEnqueueError::Closed(_)) => {
                warn!("Dropping message for closed screen {}", self.id);
                Delivery::Gone
            }
        }
    }
}

/// Outcome of [`Screen::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The outbox is full
    Stalled,
    /// The outbox is closed
    Gone,
}

/// Connected screens in ring order
///
/// Screens are kept in order of arrival; the screen after the last one is
/// the first one again. `Direction::Left` walks to the previous screen and
/// `Direction::Right` to the next.
pub struct ScreenRing {
    /// Connected screens in ring order
    screens: Vec<Screen>,
    /// Next available screen ID for new connections
    next_screen_id: ScreenId,
}

impl ScreenRing {
    /// Creates an empty ring; screen IDs start from 1
    pub fn new() -> Self {
        Self {
            screens: Vec::new(),
            next_screen_id: 1,
        }
    }

    pub fn allocate_id(&mut self) -> ScreenId {
        let id = self.next_screen_id;
        self.next_screen_id += 1;
        id
    }

    /// Inserts a screen at the tail of the ring
    pub fn push(&mut self, screen: Screen) {
        info!(
            "Screen {} ({}) joined the ring at position {}",
            screen.id,
            screen.name,
            self.screens.len()
        );
        self.screens.push(screen);
    }

    /// Removes a screen, closing the gap between its neighbours
    pub fn remove(&mut self, id: ScreenId) -> Option<Screen> {
        let index = self.position(id)?;
        let screen = self.screens.remove(index);
        info!("Screen {} ({}) left the ring", screen.id, screen.name);
        Some(screen)
    }

    /// The screen next to `id` in the given direction
    ///
    /// A lone screen is its own neighbour. `Direction::Any` has no fixed
    /// neighbour and yields `None`, as does an unknown screen.
    pub fn neighbor(&self, id: ScreenId, direction: Direction) -> Option<ScreenId> {
        let index = self.position(id)?;
        let len = self.screens.len();
        let neighbor = match direction {
            Direction::Left => (index + len - 1) % len,
            Direction::Right => (index + 1) % len,
            Direction::Any => return None,
        };
        Some(self.screens[neighbor].id)
    }

    /// A uniformly random connected screen
    pub fn random<R: Rng>(&self, rng: &mut R) -> Option<ScreenId> {
        self.screens.choose(rng).map(|screen| screen.id)
    }

    pub fn get(&self, id: ScreenId) -> Option<&Screen> {
        self.screens.iter().find(|screen| screen.id == id)
    }

    pub fn get_mut(&mut self, id: ScreenId) -> Option<&mut Screen> {
        self.screens.iter_mut().find(|screen| screen.id == id)
    }

    pub fn contains(&self, id: ScreenId) -> bool {
        self.position(id).is_some()
    }

    /// Screen IDs in ring order
    pub fn ids(&self) -> Vec<ScreenId> {
        self.screens.iter().map(|screen| screen.id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Screen> {
        self.screens.iter()
    }

    pub fn len(&self) -> usize {
        self.screens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.screens.is_empty()
    }

    fn position(&self, id: ScreenId) -> Option<usize> {
        self.screens.iter().position(|screen| screen.id == id)
    }
}

impl Default for ScreenRing {
    fn default() -> Self {
        Self::new()
    }
}
