//! Built-in content feed introducing new objects at a fixed interval

use crate::network::ServerHandle;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use shared::{BalloonContent, Direction, Message, NewObject, ObjectId, ObjectKind, Vector2};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

const GREETINGS: [(&str, &str); 4] = [
    ("Hello", "Welcome aboard"),
    ("News", "A new screen joined the sky"),
    ("Tip", "Pop a balloon to read it"),
    ("Weather", "Clear skies all day"),
];

/// Share of new objects that are planes rather than balloons
const PLANE_RATIO: f64 = 0.2;
const PLANE_TYPES: u32 = 3;

pub struct ContentFeed {
    next_id: ObjectId,
    rng: StdRng,
}

impl ContentFeed {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        Self { next_id: 1, rng }
    }

    /// Produces the messages introducing the next object.
    ///
    /// Balloons are followed by their content so screens can show it
    /// without asking.
    pub fn next_object(&mut self) -> Vec<Message> {
        let id = self.next_id;
        self.next_id += 1;

        let speed: f32 = self.rng.gen_range(0.05..=0.2);
        let sign = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        let kind = if self.rng.gen_bool(PLANE_RATIO) {
            ObjectKind::Plane {
                plane_type: self.rng.gen_range(0..PLANE_TYPES),
                time: 0.0,
            }
        } else {
            ObjectKind::Balloon
        };

        let mut messages = vec![Message::NewObject(NewObject {
            id,
            kind,
            direction: Direction::Any,
            y: self.rng.gen_range(0.1..=0.9),
            velocity: Vector2::new(sign * speed, 0.0),
        })];

        if kind == ObjectKind::Balloon {
            let (label, content) = GREETINGS
                .choose(&mut self.rng)
                .copied()
                .unwrap_or(GREETINGS[0]);
            messages.push(Message::ContentUpdate {
                id,
                content: BalloonContent {
                    content_type: 0,
                    label: label.to_string(),
                    content: content.to_string(),
                    url: String::new(),
                },
            });
        }
        messages
    }
}

/// Injects one object per tick until the server stops
pub async fn run_feed(handle: ServerHandle, period: Duration, mut feed: ContentFeed) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Content feed started, one object every {:?}", period);

    loop {
        ticker.tick().await;

        let messages = feed.next_object();
        debug!("Feeding object {}", messages[0].object_id());
        let handle = handle.clone();
        let delivered =
            tokio::task::spawn_blocking(move || messages.into_iter().all(|m| handle.inject(m)))
                .await;

        if !matches!(delivered, Ok(true)) {
            break;
        }
    }
    info!("Content feed stopped");
}
