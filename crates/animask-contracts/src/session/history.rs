use std::collections::VecDeque;

use crate::data_url::DataUrl;

pub const HISTORY_CAPACITY: usize = 5;

/// An archived session: the original upload and every result produced for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryItem {
    pub original: DataUrl,
    pub mime_type: String,
    pub processed: Vec<DataUrl>,
}

/// Most-recent-first list of archived sessions, bounded at
/// [`HISTORY_CAPACITY`]. Eviction happens inside `push_front`, so the list
/// is never observable above capacity.
#[derive(Debug, Clone, Default)]
pub struct History {
    items: VecDeque<HistoryItem>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_front(&mut self, item: HistoryItem) {
        self.items.push_front(item);
        self.items.truncate(HISTORY_CAPACITY);
    }

    /// Removes the item at `index`, preserving the order of the rest.
    pub fn take(&mut self, index: usize) -> Option<HistoryItem> {
        self.items.remove(index)
    }

    pub fn get(&self, index: usize) -> Option<&HistoryItem> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryItem> {
        self.items.iter()
    }
}
