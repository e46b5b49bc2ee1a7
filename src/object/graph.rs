use std::collections::{BTreeMap, BTreeSet};

use super::{Object, ObjectId};

/// Longest chain of reference-to-reference hops `resolve` follows
const MAX_RESOLVE_HOPS: usize = 32;

/// Arena of indirect objects keyed by id
///
/// Cycles are allowed (page → parent → kids → page). Traversals carry an
/// explicit visited set so they always terminate.
#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    objects: BTreeMap<ObjectId, Object>,
    max_number: u32,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Reserve a fresh id without storing anything under it yet
    pub fn allocate(&mut self) -> ObjectId {
        self.max_number += 1;
        ObjectId::new(self.max_number, 0)
    }

    /// Store an object under a fresh id
    pub fn insert(&mut self, object: impl Into<Object>) -> ObjectId {
        let id = self.allocate();
        self.objects.insert(id, object.into());
        id
    }

    /// Store an object under a known id, returning what was there before
    pub fn insert_at(&mut self, id: ObjectId, object: impl Into<Object>) -> Option<Object> {
        self.max_number = self.max_number.max(id.number);
        self.objects.insert(id, object.into())
    }

    /// Swap the object stored under an existing id
    ///
    /// Returns `None` and stores nothing if `id` is not present.
    pub fn replace(&mut self, id: ObjectId, object: impl Into<Object>) -> Option<Object> {
        let slot = self.objects.get_mut(&id)?;
        Some(std::mem::replace(slot, object.into()))
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        self.objects.get_mut(&id)
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<Object> {
        self.objects.remove(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &Object)> {
        self.objects.iter().map(|(id, object)| (*id, object))
    }

    /// Follow references until a direct value is found
    ///
    /// Returns `None` for dangling references and for reference loops.
    pub fn resolve<'a>(&'a self, object: &'a Object) -> Option<&'a Object> {
        let mut current = object;
        for _ in 0..MAX_RESOLVE_HOPS {
            match current {
                Object::Reference(id) => current = self.objects.get(id)?,
                direct => return Some(direct),
            }
        }
        None
    }

    /// Move the object at `old` to `new` and point every reference at `new`
    ///
    /// Returns false and changes nothing when `old` is absent or `new` is
    /// already taken.
    pub fn remap(&mut self, old: ObjectId, new: ObjectId) -> bool {
        if old == new {
            return self.contains(old);
        }
        if !self.contains(old) || self.contains(new) {
            return false;
        }
        if let Some(object) = self.objects.remove(&old) {
            self.insert_at(new, object);
        }
        for object in self.objects.values_mut() {
            object.map_references(&mut |id| {
                Object::Reference(if id == old { new } else { id })
            });
        }
        true
    }

    /// Every id reachable from `roots`, roots included when present
    pub fn reachable_from(&self, roots: &[ObjectId]) -> BTreeSet<ObjectId> {
        let mut visited = BTreeSet::new();
        let mut stack: Vec<ObjectId> = roots.to_vec();
        let mut refs = Vec::new();

        while let Some(id) = stack.pop() {
            let Some(object) = self.objects.get(&id) else {
                continue;
            };
            if !visited.insert(id) {
                continue;
            }
            refs.clear();
            object.collect_references(&mut refs);
            stack.extend(refs.iter().filter(|r| !visited.contains(r)));
        }

        visited
    }

    /// Reachable `(holder, target)` pairs whose target is not stored
    pub fn dangling_references(&self, roots: &[ObjectId]) -> Vec<(ObjectId, ObjectId)> {
        let mut dangling = Vec::new();
        let mut refs = Vec::new();
        for id in self.reachable_from(roots) {
            if let Some(object) = self.objects.get(&id) {
                refs.clear();
                object.collect_references(&mut refs);
                dangling.extend(
                    refs.iter()
                        .filter(|target| !self.contains(**target))
                        .map(|target| (id, *target)),
                );
            }
        }
        dangling
    }
}
