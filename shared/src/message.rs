//! Typed messages exchanged between screens and the routing server

use serde::{Deserialize, Serialize};
use std::fmt;

/// Globally unique identity of a balloon or plane
pub type ObjectId = u32;

/// Server-assigned identity of a connected screen
pub type ScreenId = u32;

/// Horizontal edge of a screen.
///
/// In a `NewObject` this is the edge the object enters from; in a
/// `ChangeScreen` it is the edge the object left through.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Any,
}

impl Direction {
    /// Edge on the neighbouring screen that matches this one
    pub fn reversed(self) -> Self {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
            Direction::Any => Direction::Any,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Any => "any",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub enum ObjectKind {
    Balloon,
    Plane { plane_type: u32, time: f32 },
}

/// Introduces an object to a screen at a given edge, height and velocity
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct NewObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub direction: Direction,
    /// Height in `[0, 1]` relative to the screen
    pub y: f32,
    pub velocity: Vector2,
}

/// Sent by a screen when one of its objects crosses an edge
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct ChangeScreen {
    pub id: ObjectId,
    pub direction: Direction,
    pub y: f32,
    pub velocity: Vector2,
    pub time: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct BalloonContent {
    pub content_type: u32,
    pub label: String,
    pub content: String,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct BalloonState {
    pub overlay_type: u32,
    pub background_color: [u8; 4],
    pub votes: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Message {
    NewObject(NewObject),
    ChangeScreen(ChangeScreen),
    PopObject { id: ObjectId },
    ContentUpdate { id: ObjectId, content: BalloonContent },
    StateUpdate { id: ObjectId, state: BalloonState },
    GetContent { id: ObjectId },
    GetState { id: ObjectId },
}

impl Message {
    /// Every wire message refers to exactly one object
    pub fn object_id(&self) -> ObjectId {
        match self {
            Message::NewObject(new) => new.id,
            Message::ChangeScreen(change) => change.id,
            Message::PopObject { id }
            | Message::ContentUpdate { id, .. }
            | Message::StateUpdate { id, .. }
            | Message::GetContent { id }
            | Message::GetState { id } => *id,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::NewObject(NewObject {
                kind: ObjectKind::Balloon,
                ..
            }) => MessageType::NewBalloon,
            Message::NewObject(NewObject {
                kind: ObjectKind::Plane { .. },
                ..
            }) => MessageType::NewPlane,
            Message::ChangeScreen(_) => MessageType::ChangeScreen,
            Message::PopObject { .. } => MessageType::PopObject,
            Message::ContentUpdate { .. } => MessageType::ContentUpdate,
            Message::StateUpdate { .. } => MessageType::StateUpdate,
            Message::GetContent { .. } => MessageType::GetContent,
            Message::GetState { .. } => MessageType::GetState,
        }
    }
}

/// Wire discriminant shared by both encodings.
///
/// The text encoding uses [`MessageType::name`] as the line tag, the binary
/// encoding uses [`MessageType::tag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    NewBalloon,
    NewPlane,
    ChangeScreen,
    PopObject,
    ContentUpdate,
    StateUpdate,
    GetContent,
    GetState,
}

impl MessageType {
    pub const ALL: [MessageType; 8] = [
        MessageType::NewBalloon,
        MessageType::NewPlane,
        MessageType::ChangeScreen,
        MessageType::PopObject,
        MessageType::ContentUpdate,
        MessageType::StateUpdate,
        MessageType::GetContent,
        MessageType::GetState,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MessageType::NewBalloon => "new-balloon",
            MessageType::NewPlane => "new-plane",
            MessageType::ChangeScreen => "change-screen",
            MessageType::PopObject => "pop-object",
            MessageType::ContentUpdate => "balloon-content-update",
            MessageType::StateUpdate => "balloon-state-update",
            MessageType::GetContent => "get-balloon-content",
            MessageType::GetState => "get-balloon-state",
        }
    }

    pub fn tag(self) -> u32 {
        match self {
            MessageType::NewBalloon => 1,
            MessageType::NewPlane => 2,
            MessageType::ChangeScreen => 3,
            MessageType::PopObject => 4,
            MessageType::ContentUpdate => 5,
            MessageType::StateUpdate => 6,
            MessageType::GetContent => 7,
            MessageType::GetState => 8,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.name() == name)
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.tag() == tag)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
