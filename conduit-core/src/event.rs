//! The event model flowing through every pipeline edge.
//!
//! Events are immutable once emitted and cheaply cloneable (an `Rc` clone),
//! so shared ownership across Streams/Sessions is safe without introducing
//! cycles: an `Event` never holds a handle back to anything that holds it.

use std::rc::Rc;

use crate::buffer::Data;
use crate::error::StreamErrorKind;

/// Opaque property bag attached to `MessageStart`/`MessageEnd`, standing in
/// for the scripting host's object model (out of scope for this crate; we
/// only need a place to carry head/tail metadata through the pipeline).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBag {
    entries: Vec<(Rc<str>, PropertyValue)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Bytes(Data),
}

impl PropertyBag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<Rc<str>>, value: PropertyValue) {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.iter().find(|(k, _)| &**k == key).map(|(_, v)| v)
    }
}

/// A tagged event flowing along a pipeline edge.
///
/// A well-formed logical message is exactly one `MessageStart`, zero or
/// more `Data`, one `MessageEnd`. `StreamEnd` may appear at any point and
/// implicitly terminates any open message.
#[derive(Debug, Clone)]
pub enum Event {
    MessageStart(Rc<MessageStartInfo>),
    Data(Data),
    MessageEnd(Rc<MessageEndInfo>),
    StreamEnd(StreamErrorKind),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageStartInfo {
    pub head: Option<PropertyBag>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageEndInfo {
    pub tail: Option<PropertyBag>,
    pub payload: Option<PropertyBag>,
}

impl Event {
    #[must_use]
    pub fn message_start() -> Self {
        Event::MessageStart(Rc::new(MessageStartInfo::default()))
    }

    #[must_use]
    pub fn message_start_with_head(head: PropertyBag) -> Self {
        Event::MessageStart(Rc::new(MessageStartInfo { head: Some(head) }))
    }

    #[must_use]
    pub fn data(data: Data) -> Self {
        Event::Data(data)
    }

    #[must_use]
    pub fn message_end() -> Self {
        Event::MessageEnd(Rc::new(MessageEndInfo::default()))
    }

    #[must_use]
    pub fn stream_end(kind: StreamErrorKind) -> Self {
        Event::StreamEnd(kind)
    }

    #[must_use]
    pub const fn is_message_start(&self) -> bool {
        matches!(self, Event::MessageStart(_))
    }

    #[must_use]
    pub const fn is_message_end(&self) -> bool {
        matches!(self, Event::MessageEnd(_))
    }

    #[must_use]
    pub const fn is_stream_end(&self) -> bool {
        matches!(self, Event::StreamEnd(_))
    }

    /// Clone the `Data` payload out of this event, if it is a `Data` event.
    #[must_use]
    pub fn as_data(&self) -> Option<&Data> {
        match self {
            Event::Data(d) => Some(d),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_bag_overwrites_existing_key() {
        let mut bag = PropertyBag::new();
        bag.set("a", PropertyValue::Number(1.0));
        bag.set("a", PropertyValue::Number(2.0));
        assert_eq!(bag.get("a"), Some(&PropertyValue::Number(2.0)));
        assert_eq!(bag.entries.len(), 1);
    }

    #[test]
    fn event_predicates() {
        assert!(Event::message_start().is_message_start());
        assert!(Event::message_end().is_message_end());
        assert!(Event::stream_end(StreamErrorKind::Graceful).is_stream_end());
    }
}
