//! Striped per-entity locks.
//!
//! Any read-decide-write on an entity runs while holding its stripe, so two
//! units of work touching the same entity never interleave. Entities on
//! different stripes proceed in parallel. Stripes are always taken in
//! ascending index order.

use fieldsync_protocol::EntityReference;
use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub(crate) struct EntityLocks {
    stripes: Vec<Mutex<()>>,
}

impl EntityLocks {
    pub(crate) fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe_of(&self, entity: &EntityReference) -> usize {
        let mut hasher = DefaultHasher::new();
        entity.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Locks every stripe covering `entities`, in ascending order.
    pub(crate) fn lock_all<'e>(
        &self,
        entities: impl IntoIterator<Item = &'e EntityReference>,
    ) -> Vec<MutexGuard<'_, ()>> {
        let mut indices: Vec<usize> = entities.into_iter().map(|e| self.stripe_of(e)).collect();
        indices.sort_unstable();
        indices.dedup();
        indices.into_iter().map(|i| self.stripes[i].lock()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.stripes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use uuid::Uuid;

    fn entity() -> EntityReference {
        EntityReference::new("zone", Uuid::new_v4())
    }

    #[test]
    fn zero_stripes_rounds_up() {
        assert_eq!(EntityLocks::new(0).len(), 1);
    }

    #[test]
    fn duplicate_entities_lock_once() {
        let locks = EntityLocks::new(4);
        let e = entity();
        let guards = locks.lock_all([&e, &e, &e]);
        assert_eq!(guards.len(), 1);
    }

    #[test]
    fn single_stripe_serializes_everything() {
        let locks = Arc::new(EntityLocks::new(1));
        let counter = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let locks = Arc::clone(&locks);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    let e = entity();
                    let _guards = locks.lock_all([&e]);
                    counter.lock().push(i);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.lock().len(), 4);
    }
}
