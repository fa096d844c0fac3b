//! Memoization of loaded volumes keyed on archive content.
//!
//! The loader itself stays a pure function of bytes; callers that want to
//! avoid re-parsing on every interaction hand a [`VolumeCache`] to
//! [`VolumeLoader::load_cached`](crate::volume_loader::VolumeLoader::load_cached).

use crate::volume::Volume;

use std::{
    collections::{HashMap, VecDeque},
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
};

/// Identity of an uploaded archive: content hash plus byte length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArchiveKey {
    hash: u64,
    len: usize,
}

impl ArchiveKey {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        Self {
            hash: hasher.finish(),
            len: bytes.len(),
        }
    }
}

pub trait VolumeCache {
    fn get(&self, key: &ArchiveKey) -> Option<Arc<Volume>>;
    fn insert(&mut self, key: ArchiveKey, volume: Arc<Volume>);
}

/// Bounded cache evicting the oldest insertion first.
///
/// The default capacity of one matches a single-upload session: loading a
/// new archive replaces the previous volume.
#[derive(Debug)]
pub struct InMemoryVolumeCache {
    capacity: usize,
    entries: HashMap<ArchiveKey, Arc<Volume>>,
    order: VecDeque<ArchiveKey>,
}

impl Default for InMemoryVolumeCache {
    fn default() -> Self {
        Self::with_capacity(1)
    }
}

impl InMemoryVolumeCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

impl VolumeCache for InMemoryVolumeCache {
    fn get(&self, key: &ArchiveKey) -> Option<Arc<Volume>> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: ArchiveKey, volume: Arc<Volume>) {
        if self.entries.insert(key, volume).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}
