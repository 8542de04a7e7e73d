use crate::error::{CoreError, Result};
use crate::timeline::Timeline;
use crate::types::*;
use std::cell::RefCell;
use std::collections::BTreeMap;
use tracing::debug;

/// A command that can be executed, undone, and described.
pub trait Command: std::fmt::Debug {
    fn execute(&self, timeline: &mut Timeline) -> Result<()>;
    fn undo(&self, timeline: &mut Timeline) -> Result<()>;
    fn description(&self) -> &str;
}

/// Undo/redo history stack.
pub struct History {
    undo_stack: Vec<Box<dyn Command>>,
    redo_stack: Vec<Box<dyn Command>>,
    max_size: usize,
}

impl History {
    pub fn new(max_size: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_size,
        }
    }

    /// Execute a command and push it onto the undo stack. Clears redo stack.
    pub fn execute(&mut self, cmd: Box<dyn Command>, timeline: &mut Timeline) -> Result<()> {
        cmd.execute(timeline)?;
        self.push(cmd);
        Ok(())
    }

    /// Record a command whose effect is already applied, such as a committed
    /// editing context.
    pub fn push(&mut self, cmd: Box<dyn Command>) {
        debug!(description = cmd.description(), "history push");
        self.redo_stack.clear();
        self.undo_stack.push(cmd);
        if self.undo_stack.len() > self.max_size {
            self.undo_stack.remove(0);
        }
    }

    /// Undo the last command.
    pub fn undo(&mut self, timeline: &mut Timeline) -> Result<()> {
        let cmd = self.undo_stack.pop().ok_or(CoreError::NothingToUndo)?;
        cmd.undo(timeline)?;
        self.redo_stack.push(cmd);
        Ok(())
    }

    /// Redo the last undone command.
    pub fn redo(&mut self, timeline: &mut Timeline) -> Result<()> {
        let cmd = self.redo_stack.pop().ok_or(CoreError::NothingToRedo)?;
        cmd.execute(timeline)?;
        self.undo_stack.push(cmd);
        Ok(())
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.last().map(|cmd| cmd.description())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.last().map(|cmd| cmd.description())
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// An open, named group of clip changes. Holds the state each clip had
/// before it was first touched.
#[derive(Debug, Clone)]
pub struct Transaction {
    name: String,
    before: BTreeMap<ClipId, ClipState>,
}

impl Transaction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            before: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn before(&self) -> &BTreeMap<ClipId, ClipState> {
        &self.before
    }

    /// Keep the first captured state; later writes are part of the same edit.
    pub fn capture(&mut self, clip: ClipId, state: ClipState) {
        self.before.entry(clip).or_insert(state);
    }

    pub fn forget(&mut self, clip: ClipId) {
        self.before.remove(&clip);
    }
}

// ---------------------------------------------------------------------------
// EditCommand
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipChange {
    pub clip: ClipId,
    pub before: ClipState,
    pub after: ClipState,
}

/// A committed transaction: re-applies the after states, or restores the
/// before states.
#[derive(Debug, Clone)]
pub struct EditCommand {
    description: String,
    changes: Vec<ClipChange>,
}

impl EditCommand {
    pub fn new(description: impl Into<String>, changes: Vec<ClipChange>) -> Self {
        Self {
            description: description.into(),
            changes,
        }
    }

    pub fn changes(&self) -> &[ClipChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl Command for EditCommand {
    fn execute(&self, timeline: &mut Timeline) -> Result<()> {
        let states: Vec<_> = self.changes.iter().map(|c| (c.clip, c.after)).collect();
        timeline.apply_clip_states(&states)
    }

    fn undo(&self, timeline: &mut Timeline) -> Result<()> {
        let states: Vec<_> = self.changes.iter().map(|c| (c.clip, c.before)).collect();
        timeline.apply_clip_states(&states)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

// ---------------------------------------------------------------------------
// SplitCommand
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SplitCommand {
    at: TimeNs,
    selection: Option<Vec<ClipId>>,
    /// (original clip, its state before the split, right-hand clip)
    splits: RefCell<Vec<(ClipId, ClipState, ClipId)>>,
}

impl SplitCommand {
    pub fn new(at: TimeNs, selection: Option<Vec<ClipId>>) -> Self {
        Self {
            at,
            selection,
            splits: RefCell::new(Vec::new()),
        }
    }

    /// Right-hand clips created by the last execution.
    pub fn created(&self) -> Vec<ClipId> {
        self.splits.borrow().iter().map(|(_, _, right)| *right).collect()
    }
}

impl Command for SplitCommand {
    fn execute(&self, timeline: &mut Timeline) -> Result<()> {
        let before: BTreeMap<ClipId, ClipState> =
            timeline.clips().map(|c| (c.id(), c.state())).collect();
        let pairs = timeline.split(self.at, self.selection.as_deref())?;
        *self.splits.borrow_mut() = pairs
            .into_iter()
            .filter_map(|(left, right)| before.get(&left).map(|state| (left, *state, right)))
            .collect();
        Ok(())
    }

    fn undo(&self, timeline: &mut Timeline) -> Result<()> {
        let splits = std::mem::take(&mut *self.splits.borrow_mut());
        let mut restore = Vec::with_capacity(splits.len());
        for (left, state, right) in splits {
            timeline.remove_clip(right)?;
            restore.push((left, state));
        }
        timeline.apply_clip_states(&restore)
    }

    fn description(&self) -> &str {
        "Split clips"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
