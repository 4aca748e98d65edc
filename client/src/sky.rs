//! Local view of the objects a screen currently owns
//!
//! Coordinates are normalized: `x` runs from the left edge (0.0) to the
//! right edge (1.0) and `y` from top to bottom. Velocities are in screen
//! widths and heights per second.

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    BalloonContent, BalloonState, ChangeScreen, Direction, Message, NewObject, ObjectId,
    ObjectKind, Vector2,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct SkyObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub x: f32,
    pub y: f32,
    pub velocity: Vector2,
    pub content: Option<BalloonContent>,
    pub state: Option<BalloonState>,
}

impl SkyObject {
    /// Seconds a plane has been flying; zero for balloons
    pub fn flight_time(&self) -> f32 {
        match self.kind {
            ObjectKind::Plane { time, .. } => time,
            ObjectKind::Balloon => 0.0,
        }
    }
}

pub struct Sky {
    objects: BTreeMap<ObjectId, SkyObject>,
    rng: StdRng,
}

impl Sky {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            objects: BTreeMap::new(),
            rng,
        }
    }

    pub fn get(&self, id: ObjectId) -> Option<&SkyObject> {
        self.objects.get(&id)
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.objects.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Applies one message from the server and returns any replies
    pub fn apply(&mut self, message: Message) -> Vec<Message> {
        match message {
            Message::NewObject(new) => self.enter(new),
            Message::PopObject { id } => {
                if self.objects.remove(&id).is_some() {
                    info!("Object {} popped", id);
                }
                Vec::new()
            }
            Message::ContentUpdate { id, content } => {
                match self.objects.get_mut(&id) {
                    Some(object) => object.content = Some(content),
                    None => debug!("Content for object {} which is not here", id),
                }
                Vec::new()
            }
            Message::StateUpdate { id, state } => {
                match self.objects.get_mut(&id) {
                    Some(object) => object.state = Some(state),
                    None => debug!("State for object {} which is not here", id),
                }
                Vec::new()
            }
            Message::GetContent { id } => self
                .objects
                .get(&id)
                .and_then(|object| object.content.clone())
                .map(|content| vec![Message::ContentUpdate { id, content }])
                .unwrap_or_default(),
            Message::GetState { id } => self
                .objects
                .get(&id)
                .and_then(|object| object.state)
                .map(|state| vec![Message::StateUpdate { id, state }])
                .unwrap_or_default(),
            Message::ChangeScreen(change) => {
                warn!("Server sent change-screen for object {}", change.id);
                Vec::new()
            }
        }
    }

    fn enter(&mut self, new: NewObject) -> Vec<Message> {
        let x = match new.direction {
            Direction::Left => 0.0,
            Direction::Right => 1.0,
            Direction::Any => self.rng.gen_range(0.0..1.0),
        };
        debug!("Object {} enters from {} at x={:.2}", new.id, new.direction, x);

        self.objects.insert(
            new.id,
            SkyObject {
                id: new.id,
                kind: new.kind,
                x,
                y: new.y,
                velocity: new.velocity,
                content: None,
                state: None,
            },
        );

        // Metadata stays with the server while the object travels
        match new.kind {
            ObjectKind::Balloon => vec![
                Message::GetContent { id: new.id },
                Message::GetState { id: new.id },
            ],
            ObjectKind::Plane { .. } => Vec::new(),
        }
    }

    /// Advances every object by `dt` seconds.
    ///
    /// Objects crossing the left or right edge leave this screen and are
    /// reported with a change-screen message.
    pub fn update(&mut self, dt: f32) -> Vec<Message> {
        let mut exits = Vec::new();

        for object in self.objects.values_mut() {
            object.x += object.velocity.x * dt;
            object.y = (object.y + object.velocity.y * dt).clamp(0.0, 1.0);
            if let ObjectKind::Plane { time, .. } = &mut object.kind {
                *time += dt;
            }

            if object.x > 1.0 {
                exits.push((object.id, Direction::Right));
            } else if object.x < 0.0 {
                exits.push((object.id, Direction::Left));
            }
        }

        exits
            .into_iter()
            .filter_map(|(id, direction)| {
                let object = self.objects.remove(&id)?;
                debug!("Object {} leaves through the {} edge", id, direction);
                Some(Message::ChangeScreen(ChangeScreen {
                    id,
                    direction,
                    y: object.y,
                    velocity: object.velocity,
                    time: object.flight_time(),
                }))
            })
            .collect()
    }

    /// Pops an object on behalf of the user
    pub fn pop(&mut self, id: ObjectId) -> Option<Message> {
        self.objects.remove(&id)?;
        info!("Popped object {}", id);
        Some(Message::PopObject { id })
    }
}
