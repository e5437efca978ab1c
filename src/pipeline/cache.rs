use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Id -> translated text for one batch.
pub type BatchTranslation = HashMap<String, String>;

#[derive(Serialize)]
struct KeyItem<'a> {
    id: &'a str,
    text: &'a str,
}

/// Content address of a batch: engine, model, temperature, language and the
/// minimal `{id, text}` projection of the request.
pub fn cache_key(
    engine: &str,
    model: &str,
    temperature: f32,
    target_lang: &str,
    items: &[(&str, &str)],
) -> String {
    let projection: Vec<KeyItem<'_>> = items
        .iter()
        .map(|(id, text)| KeyItem { id, text })
        .collect();
    let packed = serde_json::to_string(&projection).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(engine.as_bytes());
    hasher.update(b"|");
    hasher.update(model.as_bytes());
    hasher.update(b"|");
    hasher.update(temperature.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(target_lang.as_bytes());
    hasher.update(b"|");
    hasher.update(packed.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Default)]
struct Entries {
    map: HashMap<String, BatchTranslation>,
    order: VecDeque<String>,
}

/// Bounded batch cache. When full, the oldest inserted entry is evicted;
/// reads do not refresh an entry.
pub struct TranslationCache {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl TranslationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(Entries::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<BatchTranslation> {
        self.entries.lock().map.get(key).cloned()
    }

    pub fn insert(&self, key: String, value: BatchTranslation) {
        if self.capacity == 0 {
            return;
        }
        let mut e = self.entries.lock();
        if e.map.insert(key.clone(), value).is_some() {
            return;
        }
        e.order.push_back(key);
        while e.order.len() > self.capacity {
            if let Some(old) = e.order.pop_front() {
                e.map.remove(&old);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
