use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// Identifiers shared by every VU of every scenario in a run.
///
/// Mutations take the write lock, so concurrent inserts are never lost and `size()` never
/// sees a half-applied insert. `sample()` does not remove anything.
#[derive(Debug, Clone, Default)]
pub struct SharedPool {
    inner: Arc<RwLock<PoolInner>>,
}

#[derive(Debug, Default)]
struct PoolInner {
    members: Vec<String>,
    index: HashMap<String, usize>,
}

impl SharedPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if `id` was already a member.
    pub fn insert(&self, id: impl Into<String>) -> bool {
        let id = id.into();
        let mut inner = self.inner.write();
        if inner.index.contains_key(&id) {
            return false;
        }

        let slot = inner.members.len();
        inner.index.insert(id.clone(), slot);
        inner.members.push(id);
        true
    }

    /// A member drawn uniformly at random, or `None` while the pool is empty.
    pub fn sample(&self) -> Option<String> {
        self.sample_with(&mut rand::thread_rng())
    }

    pub fn sample_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<String> {
        let inner = self.inner.read();
        if inner.members.is_empty() {
            None
        } else {
            let idx = rng.gen_range(0..inner.members.len());
            Some(inner.members[idx].clone())
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().index.contains_key(id)
    }

    pub fn size(&self) -> usize {
        self.inner.read().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}
