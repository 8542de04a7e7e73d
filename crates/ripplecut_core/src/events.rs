use crate::types::{ObjectId, StreamKind, TimeNs, TrackId};
use std::fmt;

/// Discriminant of [`TimelineEvent`], used by subscribers to filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ObjectAdded,
    ObjectRemoved,
    StartChanged,
    DurationChanged,
    InPointChanged,
    PriorityChanged,
    TransitionAdded,
    TransitionRemoved,
    TrackAdded,
    TrackRemoved,
    KeyframesChanged,
}

/// Change notification emitted by tracks and the timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEvent {
    ObjectAdded {
        track: TrackId,
        object: ObjectId,
        stream: StreamKind,
        priority: u32,
    },
    ObjectRemoved {
        track: TrackId,
        object: ObjectId,
    },
    StartChanged {
        object: ObjectId,
        old: TimeNs,
        new: TimeNs,
    },
    DurationChanged {
        object: ObjectId,
        old: TimeNs,
        new: TimeNs,
    },
    InPointChanged {
        object: ObjectId,
        old: TimeNs,
        new: TimeNs,
    },
    PriorityChanged {
        object: ObjectId,
        old: u32,
        new: u32,
    },
    TransitionAdded {
        track: TrackId,
        a: ObjectId,
        b: ObjectId,
    },
    TransitionRemoved {
        track: TrackId,
        a: ObjectId,
        b: ObjectId,
    },
    TrackAdded {
        track: TrackId,
        stream: StreamKind,
    },
    TrackRemoved {
        track: TrackId,
    },
    KeyframesChanged {
        object: ObjectId,
        property: String,
    },
}

impl TimelineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TimelineEvent::ObjectAdded { .. } => EventKind::ObjectAdded,
            TimelineEvent::ObjectRemoved { .. } => EventKind::ObjectRemoved,
            TimelineEvent::StartChanged { .. } => EventKind::StartChanged,
            TimelineEvent::DurationChanged { .. } => EventKind::DurationChanged,
            TimelineEvent::InPointChanged { .. } => EventKind::InPointChanged,
            TimelineEvent::PriorityChanged { .. } => EventKind::PriorityChanged,
            TimelineEvent::TransitionAdded { .. } => EventKind::TransitionAdded,
            TimelineEvent::TransitionRemoved { .. } => EventKind::TransitionRemoved,
            TimelineEvent::TrackAdded { .. } => EventKind::TrackAdded,
            TimelineEvent::TrackRemoved { .. } => EventKind::TrackRemoved,
            TimelineEvent::KeyframesChanged { .. } => EventKind::KeyframesChanged,
        }
    }

    /// The track object this event is about, if any.
    pub fn object(&self) -> Option<ObjectId> {
        match self {
            TimelineEvent::ObjectAdded { object, .. }
            | TimelineEvent::ObjectRemoved { object, .. }
            | TimelineEvent::StartChanged { object, .. }
            | TimelineEvent::DurationChanged { object, .. }
            | TimelineEvent::InPointChanged { object, .. }
            | TimelineEvent::PriorityChanged { object, .. }
            | TimelineEvent::KeyframesChanged { object, .. } => Some(*object),
            TimelineEvent::TransitionAdded { .. }
            | TimelineEvent::TransitionRemoved { .. }
            | TimelineEvent::TrackAdded { .. }
            | TimelineEvent::TrackRemoved { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(&TimelineEvent)>;

struct Subscriber {
    id: SubscriptionId,
    kinds: Option<Vec<EventKind>>,
    callback: Callback,
}

/// Fan-out of timeline events to typed observers.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event.
    pub fn subscribe(&mut self, callback: impl FnMut(&TimelineEvent) + 'static) -> SubscriptionId {
        self.insert(None, Box::new(callback))
    }

    /// Receive only events whose kind is in `kinds`.
    pub fn subscribe_kinds(
        &mut self,
        kinds: &[EventKind],
        callback: impl FnMut(&TimelineEvent) + 'static,
    ) -> SubscriptionId {
        self.insert(Some(kinds.to_vec()), Box::new(callback))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn dispatch(&mut self, events: &[TimelineEvent]) {
        for event in events {
            let kind = event.kind();
            for subscriber in &mut self.subscribers {
                let wanted = subscriber
                    .kinds
                    .as_ref()
                    .map_or(true, |kinds| kinds.contains(&kind));
                if wanted {
                    (subscriber.callback)(event);
                }
            }
        }
    }

    fn insert(&mut self, kinds: Option<Vec<EventKind>>, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push(Subscriber {
            id,
            kinds,
            callback,
        });
        id
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
