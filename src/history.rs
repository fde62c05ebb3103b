use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::layer::{Layer, LayerId};
use crate::layers::LayerStack;
use crate::mask::AlphaMaskStore;

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Immutable copy of all editable state.
///
/// Layer buffers are copy-on-write `TiledImage`s, so capturing only bumps
/// chunk reference counts, and later edits to the live stack never reach
/// the snapshot.
#[derive(Clone, Debug)]
pub struct HistorySnapshot {
    pub label: String,
    pub layers: Vec<Layer>,
    pub masks: AlphaMaskStore,
    pub active: Option<LayerId>,
    pub selected: Vec<LayerId>,
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Degrees clockwise, one of 0/90/180/270.
    pub canvas_rotation: u32,
}

impl HistorySnapshot {
    pub fn capture(
        label: impl Into<String>,
        stack: &LayerStack,
        canvas_width: u32,
        canvas_height: u32,
        canvas_rotation: u32,
    ) -> Self {
        Self {
            label: label.into(),
            layers: stack.layers().to_vec(),
            masks: stack.masks().clone(),
            active: stack.active(),
            selected: stack.selected().to_vec(),
            canvas_width,
            canvas_height,
            canvas_rotation,
        }
    }

    /// Overwrite `stack` with this snapshot's layers, masks and ids.
    pub fn restore_into(&self, stack: &mut LayerStack) {
        stack.restore(
            self.layers.clone(),
            self.masks.clone(),
            self.active,
            self.selected.clone(),
        );
    }

    pub fn memory_bytes(&self) -> usize {
        self.memory_bytes_since(None)
    }

    /// Bytes this snapshot adds on top of `prev`. Pixel chunks still shared
    /// with the same layer in `prev` are not charged again.
    pub fn memory_bytes_since(&self, prev: Option<&HistorySnapshot>) -> usize {
        self.layers
            .iter()
            .map(|l| {
                let base = prev
                    .and_then(|p| p.layers.iter().find(|o| o.id == l.id))
                    .map(|o| &o.pixels);
                l.pixels.unshared_bytes(base) + l.name.len()
            })
            .sum::<usize>()
            + self.masks.memory_bytes()
    }
}

#[derive(Debug)]
struct Entry {
    snapshot: Arc<HistorySnapshot>,
    /// Charge against the memory cap, relative to the entry before it.
    bytes: usize,
}

// ============================================================================
// HISTORY MANAGER – bounded linear undo/redo
// ============================================================================

/// Linear history of snapshots with a cursor on the current state.
///
/// Entry 0 is the oldest retained state. `undo` steps the cursor back and
/// hands out the snapshot there; a push after an undo drops the redo tail.
#[derive(Debug)]
pub struct HistoryManager {
    entries: VecDeque<Entry>,
    cursor: usize,
    max_entries: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running sum of every entry's charge.
    total_memory: usize,
}

impl HistoryManager {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: 0,
            max_entries: max_entries.max(1),
            max_memory_bytes: Some(512 * 1024 * 1024),
            total_memory: 0,
        }
    }

    pub fn with_memory_limit(mut self, max_memory_bytes: Option<usize>) -> Self {
        self.max_memory_bytes = max_memory_bytes;
        self
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Record a new current state, discarding anything redoable.
    pub fn push(&mut self, snapshot: HistorySnapshot) {
        if !self.entries.is_empty() {
            for dropped in self.entries.drain(self.cursor + 1..) {
                self.total_memory = self.total_memory.saturating_sub(dropped.bytes);
            }
        }
        debug!(label = %snapshot.label, "history push");
        let bytes = snapshot.memory_bytes_since(self.entries.back().map(|e| e.snapshot.as_ref()));
        self.total_memory += bytes;
        self.entries.push_back(Entry {
            snapshot: Arc::new(snapshot),
            bytes,
        });
        self.cursor = self.entries.len() - 1;
        self.prune();
    }

    fn prune(&mut self) {
        while self.entries.len() > self.max_entries {
            self.pop_oldest();
        }
        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.cursor > 0 {
                self.pop_oldest();
            }
        }
    }

    /// Drop the oldest entry. Chunks it shared with the next entry are now
    /// held by that entry alone, so its charge becomes its full size.
    fn pop_oldest(&mut self) {
        let Some(removed) = self.entries.pop_front() else {
            return;
        };
        self.total_memory = self.total_memory.saturating_sub(removed.bytes);
        self.cursor = self.cursor.saturating_sub(1);
        if let Some(front) = self.entries.front_mut() {
            let full = front.snapshot.memory_bytes();
            self.total_memory = self.total_memory - front.bytes + full;
            front.bytes = full;
        }
    }

    /// Step back. `None` (cursor unchanged) at the oldest entry.
    pub fn undo(&mut self) -> Option<Arc<HistorySnapshot>> {
        if !self.can_undo() {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).map(|e| e.snapshot.clone())
    }

    /// Step forward. `None` (cursor unchanged) at the newest entry.
    pub fn redo(&mut self) -> Option<Arc<HistorySnapshot>> {
        if !self.can_redo() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor).map(|e| e.snapshot.clone())
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0 && !self.entries.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    pub fn current(&self) -> Option<&Arc<HistorySnapshot>> {
        self.entries.get(self.cursor).map(|e| &e.snapshot)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels oldest first.
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.snapshot.label.as_str()).collect()
    }

    /// Label of the action an `undo` would revert.
    pub fn undo_label(&self) -> Option<&str> {
        self.can_undo()
            .then(|| self.entries.get(self.cursor).map(|e| e.snapshot.label.as_str()))
            .flatten()
    }

    /// Label of the action a `redo` would re-apply.
    pub fn redo_label(&self) -> Option<&str> {
        self.entries.get(self.cursor + 1).map(|e| e.snapshot.label.as_str())
    }

    /// Cached; pixel chunks shared between neighbouring entries count once.
    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
        self.total_memory = 0;
    }

    /// Forget everything and start over from `base`.
    pub fn reset_with(&mut self, base: HistorySnapshot) {
        self.clear();
        self.push(base);
    }
}
