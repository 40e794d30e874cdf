//! Bounded least-recently-used memo of model completions.

use crate::models::{ChatMessage, Role};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Key over everything that shapes a completion, prior turns included.
pub fn response_key(
    question: &str,
    context_text: &str,
    history: &[ChatMessage],
    thinking_mode: bool,
) -> String {
    let mut hasher = Sha256::new();
    update_framed(&mut hasher, question.as_bytes());
    update_framed(&mut hasher, context_text.as_bytes());
    hasher.update((history.len() as u64).to_le_bytes());
    for message in history {
        hasher.update([match message.role {
            Role::User => 0u8,
            Role::Assistant => 1u8,
        }]);
        update_framed(&mut hasher, message.content.as_bytes());
    }
    hasher.update([u8::from(thinking_mode)]);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug)]
struct LruState {
    entries: HashMap<String, String>,
    // Front is least recently used.
    order: VecDeque<String>,
}

impl LruState {
    // Linear in the number of entries; capacity is a few hundred at most.
    fn touch(&mut self, key: &str) {
        if let Some(position) = self.order.iter().position(|existing| existing == key) {
            if let Some(entry) = self.order.remove(position) {
                self.order.push_back(entry);
            }
        }
    }
}

#[derive(Debug)]
pub struct ResponseCache {
    capacity: usize,
    state: Mutex<LruState>,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LruState {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let value = state.entries.get(key).cloned()?;
        state.touch(key);
        Some(value)
    }

    pub fn put(&self, key: String, value: String) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if state.entries.insert(key.clone(), value).is_some() {
            state.touch(&key);
            return;
        }

        state.order.push_back(key);
        while state.order.len() > self.capacity {
            if let Some(evicted) = state.order.pop_front() {
                state.entries.remove(&evicted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
