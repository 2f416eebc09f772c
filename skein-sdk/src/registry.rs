//! Arena of connections addressed by refnum.
//!
//! A refnum is reused after its connection is deleted, so handles carry the
//! slot's generation as well. A handle from before the delete no longer
//! resolves, even once the refnum belongs to a new connection.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerRef {
    pub refnum: u32,
    pub generation: u32,
}

impl fmt::Display for ServerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.refnum)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

#[derive(Debug)]
pub struct Registry<T> {
    slots: Vec<Slot<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value built from its own handle, reusing the lowest free
    /// refnum.
    pub fn insert_with(&mut self, build: impl FnOnce(ServerRef) -> T) -> ServerRef {
        let refnum = match self.slots.iter().position(|s| s.value.is_none()) {
            Some(i) => i,
            None => {
                self.slots.push(Slot { generation: 0, value: None });
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[refnum];
        slot.generation = slot.generation.wrapping_add(1);
        let handle = ServerRef {
            refnum: refnum as u32,
            generation: slot.generation,
        };
        slot.value = Some(build(handle));
        handle
    }

    pub fn get(&self, r: ServerRef) -> Option<&T> {
        self.slots
            .get(r.refnum as usize)
            .filter(|s| s.generation == r.generation)
            .and_then(|s| s.value.as_ref())
    }

    pub fn get_mut(&mut self, r: ServerRef) -> Option<&mut T> {
        self.slots
            .get_mut(r.refnum as usize)
            .filter(|s| s.generation == r.generation)
            .and_then(|s| s.value.as_mut())
    }

    pub fn contains(&self, r: ServerRef) -> bool {
        self.get(r).is_some()
    }

    pub fn remove(&mut self, r: ServerRef) -> Option<T> {
        self.slots
            .get_mut(r.refnum as usize)
            .filter(|s| s.generation == r.generation)
            .and_then(|s| s.value.take())
    }

    /// The live handle for a bare refnum.
    pub fn lookup(&self, refnum: u32) -> Option<ServerRef> {
        let slot = self.slots.get(refnum as usize)?;
        slot.value.as_ref().map(|_| ServerRef {
            refnum,
            generation: slot.generation,
        })
    }

    /// Handles of every live entry, in refnum order.
    pub fn refs(&self) -> Vec<ServerRef> {
        self.iter().map(|(r, _)| r).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ServerRef, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.value.as_ref().map(|v| {
                (
                    ServerRef {
                        refnum: i as u32,
                        generation: s.generation,
                    },
                    v,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ServerRef, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| {
            let generation = s.generation;
            s.value.as_mut().map(|v| {
                (
                    ServerRef {
                        refnum: i as u32,
                        generation,
                    },
                    v,
                )
            })
        })
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
