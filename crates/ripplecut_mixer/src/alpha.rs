use ripplecut_core::types::ObjectId;
use serde::Serialize;
use std::collections::BTreeSet;

/// A change in whether a video lane needs an alpha-capable graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlphaTransition {
    Enabled,
    Disabled,
}

/// Counts the inputs of one video lane that need an alpha channel.
///
/// An input counts while its alpha curve has a keyframe below 1.0, and every
/// active transition counts once. Reports are tracked as sets, so repeated or
/// unmatched reports cannot push the count below zero.
#[derive(Debug, Clone, Default)]
pub struct AlphaCompositingPolicy {
    keyframed: BTreeSet<ObjectId>,
    transitions: BTreeSet<(ObjectId, ObjectId)>,
}

impl AlphaCompositingPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alpha_count(&self) -> usize {
        self.keyframed.len() + self.transitions.len()
    }

    pub fn needs_alpha(&self) -> bool {
        self.alpha_count() > 0
    }

    pub fn set_object_alpha(&mut self, object: ObjectId, required: bool) -> Option<AlphaTransition> {
        self.update(|policy| {
            if required {
                policy.keyframed.insert(object);
            } else {
                policy.keyframed.remove(&object);
            }
        })
    }

    pub fn transition_activated(&mut self, a: ObjectId, b: ObjectId) -> Option<AlphaTransition> {
        self.update(|policy| {
            policy.transitions.insert(ordered(a, b));
        })
    }

    pub fn transition_deactivated(&mut self, a: ObjectId, b: ObjectId) -> Option<AlphaTransition> {
        self.update(|policy| {
            policy.transitions.remove(&ordered(a, b));
        })
    }

    /// Drop everything `object` contributed.
    pub fn object_removed(&mut self, object: ObjectId) -> Option<AlphaTransition> {
        self.update(|policy| {
            policy.keyframed.remove(&object);
            policy
                .transitions
                .retain(|(a, b)| *a != object && *b != object);
        })
    }

    fn update(&mut self, f: impl FnOnce(&mut Self)) -> Option<AlphaTransition> {
        let before = self.needs_alpha();
        f(self);
        match (before, self.needs_alpha()) {
            (false, true) => Some(AlphaTransition::Enabled),
            (true, false) => Some(AlphaTransition::Disabled),
            _ => None,
        }
    }
}

fn ordered(a: ObjectId, b: ObjectId) -> (ObjectId, ObjectId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ObjectId = ObjectId(1);
    const B: ObjectId = ObjectId(2);

    #[test]
    fn first_and_last_requirement_flip_state() {
        let mut policy = AlphaCompositingPolicy::new();
        assert_eq!(policy.set_object_alpha(A, true), Some(AlphaTransition::Enabled));
        assert_eq!(policy.transition_activated(A, B), None);
        assert_eq!(policy.alpha_count(), 2);
        assert_eq!(policy.set_object_alpha(A, false), None);
        assert_eq!(policy.transition_deactivated(B, A), Some(AlphaTransition::Disabled));
        assert_eq!(policy.alpha_count(), 0);
    }

    #[test]
    fn unmatched_reports_never_go_negative() {
        let mut policy = AlphaCompositingPolicy::new();
        assert_eq!(policy.set_object_alpha(A, false), None);
        assert_eq!(policy.transition_deactivated(A, B), None);
        assert_eq!(policy.object_removed(B), None);
        assert_eq!(policy.alpha_count(), 0);

        assert_eq!(policy.set_object_alpha(A, true), Some(AlphaTransition::Enabled));
        assert_eq!(policy.set_object_alpha(A, true), None);
        assert_eq!(policy.alpha_count(), 1);
    }

    #[test]
    fn removing_object_clears_its_transitions() {
        let mut policy = AlphaCompositingPolicy::new();
        policy.transition_activated(A, B);
        policy.transition_activated(B, ObjectId(3));
        assert_eq!(policy.object_removed(ObjectId(4)), None);
        assert_eq!(policy.object_removed(B), Some(AlphaTransition::Disabled));
        assert!(!policy.needs_alpha());
    }
}
