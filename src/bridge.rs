//! Object/property bridge: the value-marshalling contract at the host
//! boundary.
//!
//! This is an external collaborator of the arbitration core, specified
//! by interface only: build a host object from key/value pairs, and
//! enumerate an object's own enumerable string keys. A real host binding
//! implements [`ObjectBridge`] against the host's object model; the
//! [`InMemoryBridge`] here is the stand-in the test suite runs against.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// A property key as the host sees it. Symbolic keys exist on host
/// objects but are excluded from own-property enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    String(String),
    Symbol(String),
}

impl PropertyKey {
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    pub fn symbol(s: impl Into<String>) -> Self {
        Self::Symbol(s.into())
    }
}

/// A marshalled property value. Buffers cross the boundary as backing
/// ids, never as addresses; everything else is plain data.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Undefined,
    Bool(bool),
    Number(f64),
    String(String),
    Buffer(crate::heap::BackingId),
}

/// Reference to a host object created through the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(u64);

/// The marshalling operations the core may be asked to support.
pub trait ObjectBridge {
    /// Construct a host object from key/value pairs. Insertion order is
    /// irrelevant to callers; duplicate keys overwrite.
    fn make_object(&self, pairs: &[(PropertyKey, PropertyValue)]) -> ObjectRef;

    /// The object's own enumerable keys, excluding symbolic keys.
    fn own_property_keys(&self, object: ObjectRef) -> Vec<String>;

    /// Look up a single property. Test convenience; a host binding may
    /// implement this however its object model requires.
    fn get(&self, object: ObjectRef, key: &PropertyKey) -> Option<PropertyValue>;
}

/// In-memory bridge implementation backing the test suite.
#[derive(Default)]
pub struct InMemoryBridge {
    objects: Mutex<HashMap<ObjectRef, Vec<(PropertyKey, PropertyValue)>>>,
    next_id: AtomicU64,
}

impl InMemoryBridge {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectBridge for InMemoryBridge {
    fn make_object(&self, pairs: &[(PropertyKey, PropertyValue)]) -> ObjectRef {
        let mut props: Vec<(PropertyKey, PropertyValue)> = Vec::with_capacity(pairs.len());

        for (key, value) in pairs {
            match props.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value.clone(),
                None => props.push((key.clone(), value.clone())),
            }
        }

        let object = ObjectRef(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.objects.lock().insert(object, props);
        object
    }

    fn own_property_keys(&self, object: ObjectRef) -> Vec<String> {
        self.objects
            .lock()
            .get(&object)
            .map(|props| {
                props
                    .iter()
                    .filter_map(|(key, _)| match key {
                        PropertyKey::String(s) => Some(s.clone()),
                        PropertyKey::Symbol(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn get(&self, object: ObjectRef, key: &PropertyKey) -> Option<PropertyValue> {
        self.objects
            .lock()
            .get(&object)?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}
