use std::io::{Read, Seek};

use swcore::hash::Accumulator;

use crate::error::{ArcError, Result};
use crate::field::{Encoding, Field};
use crate::sink::Sink;

#[derive(Debug, Clone)]
pub enum Node {
    Field(Field),
    Record(Record),
}

impl Node {
    pub fn size(&self) -> u64 {
        match self {
            Node::Field(f) => f.size(),
            Node::Record(r) => r.size(),
        }
    }

    pub fn position(&self) -> Option<u64> {
        match self {
            Node::Field(f) => f.position(),
            Node::Record(r) => r.position(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        match self {
            Node::Field(f) => f.is_dirty(),
            Node::Record(r) => r.is_dirty(),
        }
    }

    pub fn resize(&mut self, len: u64) -> Result<()> {
        match self {
            Node::Field(f) => f.resize(len),
            Node::Record(r) => r.resize(len),
        }
    }

    pub fn layout(&mut self, cursor: u64) -> u64 {
        match self {
            Node::Field(f) => f.layout(cursor),
            Node::Record(r) => r.layout(cursor),
        }
    }

    pub fn place(&mut self, position: u64) -> u64 {
        match self {
            Node::Field(f) => f.place(position),
            Node::Record(r) => r.place(position),
        }
    }

    pub fn commit<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        match self {
            Node::Field(f) => f.commit(sink),
            Node::Record(r) => r.commit(sink),
        }
    }

    pub fn digest<S: Read + Seek + ?Sized>(&self, sink: &mut S, acc: &mut Accumulator) -> Result<()> {
        match self {
            Node::Field(f) => f.digest(sink, acc),
            Node::Record(r) => r.digest(sink, acc),
        }
    }

    pub fn load<R: Read + Seek + ?Sized>(&mut self, source: &mut R) -> Result<()> {
        match self {
            Node::Field(f) => f.load(source),
            Node::Record(r) => r.load(source),
        }
    }

    fn check_committed<R: Read + Seek + ?Sized>(&self, source: &mut R, path: &str) -> Result<()> {
        match self {
            Node::Record(r) => r.check_at(source, path),
            Node::Field(f) if f.encoding() == Encoding::Opaque => Ok(()),
            Node::Field(f) => {
                let on_disk = f.read_back(source)?;
                if on_disk == f.encode() {
                    Ok(())
                } else {
                    Err(ArcError::LayoutCorruption {
                        field: path.to_string(),
                        position: f.position().unwrap_or(0),
                    })
                }
            }
        }
    }
}

/// Ordered, name keyed aggregate of fields and records.
///
/// Size, position and dirtiness are all derived from the children.
#[derive(Debug, Clone, Default)]
pub struct Record {
    children: Vec<(String, Node)>,
}

impl Record {
    pub fn new() -> Record {
        Record::default()
    }

    pub fn with_field(mut self, name: &str, field: Field) -> Record {
        self.push(name, Node::Field(field));
        self
    }

    pub fn with_record(mut self, name: &str, record: Record) -> Record {
        self.push(name, Node::Record(record));
        self
    }

    pub fn push(&mut self, name: &str, node: Node) {
        self.children.push((name.to_string(), node));
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn size(&self) -> u64 {
        self.children.iter().map(|(_, n)| n.size()).sum()
    }

    pub fn position(&self) -> Option<u64> {
        self.children.first().and_then(|(_, n)| n.position())
    }

    pub fn is_dirty(&self) -> bool {
        self.children.iter().any(|(_, n)| n.is_dirty())
    }

    pub fn set_position(&mut self, _position: u64) -> Result<()> {
        Err(ArcError::Layout("position of a record is derived from its first child".to_string()))
    }

    pub fn resize(&mut self, _len: u64) -> Result<()> {
        Err(ArcError::Layout("size of a record is derived from its children".to_string()))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.children.iter().map(|(k, n)| (k.as_str(), n))
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = (&str, &mut Node)> {
        self.children.iter_mut().map(|(k, n)| (k.as_str(), n))
    }

    pub fn node(&self, name: &str) -> Result<&Node> {
        self.children
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, n)| n)
            .ok_or_else(|| ArcError::MissingField(name.to_string()))
    }

    pub fn node_mut(&mut self, name: &str) -> Result<&mut Node> {
        self.children
            .iter_mut()
            .find(|(k, _)| k == name)
            .map(|(_, n)| n)
            .ok_or_else(|| ArcError::MissingField(name.to_string()))
    }

    pub fn field(&self, name: &str) -> Result<&Field> {
        match self.node(name)? {
            Node::Field(f) => Ok(f),
            Node::Record(_) => Err(ArcError::MissingField(name.to_string())),
        }
    }

    pub fn field_mut(&mut self, name: &str) -> Result<&mut Field> {
        match self.node_mut(name)? {
            Node::Field(f) => Ok(f),
            Node::Record(_) => Err(ArcError::MissingField(name.to_string())),
        }
    }

    pub fn record(&self, name: &str) -> Result<&Record> {
        match self.node(name)? {
            Node::Record(r) => Ok(r),
            Node::Field(_) => Err(ArcError::MissingField(name.to_string())),
        }
    }

    pub fn record_mut(&mut self, name: &str) -> Result<&mut Record> {
        match self.node_mut(name)? {
            Node::Record(r) => Ok(r),
            Node::Field(_) => Err(ArcError::MissingField(name.to_string())),
        }
    }

    pub fn uint(&self, name: &str) -> Result<u64> {
        let field = self.field(name)?;
        field.as_uint().ok_or(ArcError::EncodingMismatch {
            value: name.to_string(),
            encoding: field.encoding().name(),
        })
    }

    pub fn set_uint(&mut self, name: &str, value: u64) -> Result<()> {
        self.field_mut(name)?.set_uint(value)
    }

    /// Lay out every child after `cursor`, already placed children keep their position.
    pub fn layout(&mut self, cursor: u64) -> u64 {
        self.children
            .iter_mut()
            .fold(cursor, |cursor, (_, n)| n.layout(cursor))
    }

    /// Move the whole record to `position`, children are packed back to back.
    pub fn place(&mut self, position: u64) -> u64 {
        self.children
            .iter_mut()
            .fold(position, |cursor, (_, n)| n.place(cursor))
    }

    pub fn commit<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        self.commit_all_but(sink, &[])
    }

    pub fn commit_all_but<S: Sink + ?Sized>(&mut self, sink: &mut S, excluded: &[&str]) -> Result<()> {
        for (name, node) in self.children.iter_mut() {
            if !excluded.contains(&name.as_str()) {
                node.commit(sink)?;
            }
        }
        Ok(())
    }

    /// Commit children up to and including `last`.
    pub fn commit_until<S: Sink + ?Sized>(&mut self, sink: &mut S, last: &str) -> Result<()> {
        let end = self.index_of(last)?;
        for (_, node) in self.children[..=end].iter_mut() {
            node.commit(sink)?;
        }
        Ok(())
    }

    pub fn digest<S: Read + Seek + ?Sized>(&self, sink: &mut S, acc: &mut Accumulator) -> Result<()> {
        self.digest_all_but(sink, acc, &[])
    }

    pub fn digest_all_but<S: Read + Seek + ?Sized>(
        &self,
        sink: &mut S,
        acc: &mut Accumulator,
        excluded: &[&str],
    ) -> Result<()> {
        for (name, node) in self.children.iter() {
            if !excluded.contains(&name.as_str()) {
                node.digest(sink, acc)?;
            }
        }
        Ok(())
    }

    /// Digest children up to and including `last`.
    pub fn digest_until<S: Read + Seek + ?Sized>(
        &self,
        sink: &mut S,
        acc: &mut Accumulator,
        last: &str,
    ) -> Result<()> {
        let end = self.index_of(last)?;
        for (_, node) in self.children[..=end].iter() {
            node.digest(sink, acc)?;
        }
        Ok(())
    }

    /// Refresh every child from the source at its current position.
    pub fn load<R: Read + Seek + ?Sized>(&mut self, source: &mut R) -> Result<()> {
        for (_, node) in self.children.iter_mut() {
            node.load(source)?;
        }
        Ok(())
    }

    /// Read every committed field back and compare it to the in-memory value.
    pub fn check_committed<R: Read + Seek + ?Sized>(&self, source: &mut R) -> Result<()> {
        self.check_at(source, "")
    }

    fn check_at<R: Read + Seek + ?Sized>(&self, source: &mut R, prefix: &str) -> Result<()> {
        for (name, node) in self.children.iter() {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", prefix, name)
            };
            node.check_committed(source, &path)?;
        }
        Ok(())
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.children
            .iter()
            .position(|(k, _)| k == name)
            .ok_or_else(|| ArcError::MissingField(name.to_string()))
    }
}

#[cfg(test)]
mod test_record_layout {
    use super::*;

    fn header() -> Record {
        Record::new()
            .with_field("A", Field::u64())
            .with_field("B", Field::u16())
            .with_field("SIG", Field::bytes(vec![0; 4]))
    }

    #[test]
    fn derived_size_and_position() {
        let mut rec = header();

        assert_eq!(rec.size(), 14);
        assert_eq!(rec.position(), None);
        assert_eq!(rec.layout(6), 20);
        assert_eq!(rec.position(), Some(6));
        assert_eq!(rec.field("B").unwrap().position(), Some(14));
    }

    #[test]
    fn layout_does_not_move_placed_children() {
        let mut rec = header();
        rec.layout(0);

        assert_eq!(rec.layout(100), 14);
        assert_eq!(rec.place(100), 114);
        assert_eq!(rec.field("SIG").unwrap().position(), Some(110));
    }

    #[test]
    fn nested_records() {
        let mut rec = Record::new()
            .with_field("HEAD", Field::u32())
            .with_record("BODY", header());

        assert_eq!(rec.size(), 18);
        rec.layout(0);
        assert_eq!(rec.record("BODY").unwrap().position(), Some(4));
    }

    #[test]
    fn derived_attributes_are_read_only() {
        let mut rec = header();

        assert!(matches!(rec.set_position(3), Err(ArcError::Layout(_))));
        assert!(matches!(rec.resize(3), Err(ArcError::Layout(_))));
        assert!(matches!(Node::Record(header()).resize(1), Err(ArcError::Layout(_))));
    }

    #[test]
    fn missing_names() {
        let mut rec = header();

        assert!(matches!(rec.field("C"), Err(ArcError::MissingField(_))));
        assert!(matches!(rec.set_uint("C", 1), Err(ArcError::MissingField(_))));
        assert!(matches!(rec.record("A"), Err(ArcError::MissingField(_))));
    }
}
