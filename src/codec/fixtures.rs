//! Sample object graphs for codec tests.

use crate::core::{ByteBuffer, StreamableType};

use super::error::CodecResult;
use super::reader::ObjectReader;
use super::registry::TypeRegistry;
use super::writer::ObjectWriter;

#[derive(Debug, Clone, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl StreamableType for Vec2 {
    const TYPE_NAME: &'static str = "game.math.Vec2";

    fn write_fields(&self, _: &mut ObjectWriter, buf: &mut ByteBuffer) -> CodecResult<()> {
        buf.put_f32(self.x);
        buf.put_f32(self.y);
        Ok(())
    }

    fn read_fields(_: &mut ObjectReader, buf: &mut ByteBuffer) -> CodecResult<Self> {
        Ok(Vec2 {
            x: buf.get_f32()?,
            y: buf.get_f32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub name: String,
    pub health: i32,
    pub position: Vec2,
    pub velocity: Option<Vec2>,
}

impl Player {
    pub fn new(name: &str, health: i32) -> Self {
        Self {
            name: name.to_owned(),
            health,
            position: Vec2 { x: 1.0, y: -2.5 },
            velocity: None,
        }
    }
}

impl StreamableType for Player {
    const TYPE_NAME: &'static str = "game.entity.Player";

    fn write_fields(&self, writer: &mut ObjectWriter, buf: &mut ByteBuffer) -> CodecResult<()> {
        buf.put_str(&self.name)?;
        buf.put_i32(self.health);
        writer.write_value(Some(&self.position), buf)?;
        writer.write_value(self.velocity.as_ref(), buf)
    }

    fn read_fields(reader: &mut ObjectReader, buf: &mut ByteBuffer) -> CodecResult<Self> {
        Ok(Player {
            name: buf.get_string()?,
            health: buf.get_i32()?,
            position: reader.read_required::<Vec2>(buf)?,
            velocity: reader.read_value::<Vec2>(buf)?,
        })
    }
}

/// Singly linked list, to exercise recursion through one type.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub value: i64,
    pub next: Option<Box<Node>>,
}

impl Node {
    pub fn chain(values: &[i64]) -> Option<Node> {
        values.iter().rev().fold(None, |next, &value| {
            Some(Node {
                value,
                next: next.map(Box::new),
            })
        })
    }
}

impl StreamableType for Node {
    const TYPE_NAME: &'static str = "game.util.Node";

    fn write_fields(&self, writer: &mut ObjectWriter, buf: &mut ByteBuffer) -> CodecResult<()> {
        buf.put_i64(self.value);
        writer.write_value(self.next.as_deref(), buf)
    }

    fn read_fields(reader: &mut ObjectReader, buf: &mut ByteBuffer) -> CodecResult<Self> {
        Ok(Node {
            value: buf.get_i64()?,
            next: reader.read_value::<Node>(buf)?.map(Box::new),
        })
    }
}

pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register::<Vec2>().unwrap();
    registry.register::<Player>().unwrap();
    registry.register::<Node>().unwrap();
    registry
}
