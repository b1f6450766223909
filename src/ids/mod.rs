//! Bounded identifier allocation
//!
//! Peers hand out small integer ids for windows, surfaces, shared-memory
//! pools and buffers. Each class gets its own [`IdAllocator`] with a
//! rotating cursor over `[low, high)` and a reverse table `id -> object`.
//!
//! Id `0` is reserved as "none" and is never handed out.
//!
//! The table is the only per-peer structure routinely touched from
//! protocol worker threads, so it sits behind a mutex that also records
//! the thread currently holding it (useful when chasing lock-order bugs).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::thread::{self, ThreadId};
use thiserror::Error;
use tracing::{trace, warn};

/// Identifier allocation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The requested range is empty or includes the reserved id 0
    #[error("Invalid id range [{low}, {high})")]
    InvalidRange {
        /// Inclusive lower bound
        low: u32,
        /// Exclusive upper bound
        high: u32,
    },

    /// Every id in the range is in use
    #[error("{name} id space exhausted ({capacity} ids in use)")]
    Exhausted {
        /// Allocator name
        name: &'static str,
        /// Number of ids in the range
        capacity: u64,
    },
}

/// Result type for id allocation
pub type Result<T> = std::result::Result<T, IdError>;

struct IdTable<T> {
    cursor: u32,
    objects: HashMap<u32, T>,
}

/// Thread-safe allocator of bounded integer ids
pub struct IdAllocator<T> {
    name: &'static str,
    low: u32,
    high: u32,
    table: Mutex<IdTable<T>>,
    /// Kept outside `table` so it can be read while the table is held
    holder: Mutex<Option<ThreadId>>,
}

impl<T: Clone> IdAllocator<T> {
    /// Create an allocator handing out ids in `[low, high)`
    pub fn new(name: &'static str, low: u32, high: u32) -> Result<Self> {
        if low == 0 || low >= high {
            return Err(IdError::InvalidRange { low, high });
        }

        Ok(Self {
            name,
            low,
            high,
            table: Mutex::new(IdTable {
                cursor: low,
                objects: HashMap::new(),
            }),
            holder: Mutex::new(None),
        })
    }

    /// Number of ids the range can hold
    pub fn capacity(&self) -> u64 {
        u64::from(self.high - self.low)
    }

    /// Number of ids currently allocated
    pub fn len(&self) -> usize {
        self.with_table(|t| t.objects.len())
    }

    /// Whether no id is allocated
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate the next free id for `object`
    ///
    /// The cursor advances past the returned id, so a freed id is only
    /// reused after every other id in the range has been tried.
    pub fn allocate(&self, object: T) -> Result<u32> {
        let capacity = self.capacity();
        let (low, high, name) = (self.low, self.high, self.name);

        self.with_table(move |t| {
            if t.objects.len() as u64 >= capacity {
                warn!("{} id space exhausted", name);
                return Err(IdError::Exhausted { name, capacity });
            }

            loop {
                let candidate = t.cursor;
                t.cursor = if candidate + 1 >= high {
                    low
                } else {
                    candidate + 1
                };

                if let std::collections::hash_map::Entry::Vacant(slot) =
                    t.objects.entry(candidate)
                {
                    slot.insert(object);
                    trace!("{} id {:#x} allocated", name, candidate);
                    return Ok(candidate);
                }
            }
        })
    }

    /// Release `id`, returning the object it referred to
    pub fn free(&self, id: u32) -> Option<T> {
        let removed = self.with_table(|t| t.objects.remove(&id));
        if removed.is_none() {
            warn!("{} id {:#x} freed but not allocated", self.name, id);
        }
        removed
    }

    /// Object registered under `id`
    pub fn lookup(&self, id: u32) -> Option<T> {
        if id == 0 {
            return None;
        }
        self.with_table(|t| t.objects.get(&id).cloned())
    }

    /// Visit every allocated id in ascending order
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(u32, &T),
    {
        // Snapshot first so `f` may call back into the allocator.
        let mut entries: Vec<(u32, T)> = self.with_table(|t| {
            t.objects
                .iter()
                .map(|(id, obj)| (*id, obj.clone()))
                .collect()
        });
        entries.sort_by_key(|(id, _)| *id);
        for (id, obj) in &entries {
            f(*id, obj);
        }
    }

    /// Drop every allocation
    pub fn clear(&self) {
        self.with_table(|t| t.objects.clear());
    }

    /// Thread currently inside the table lock, if any
    pub fn holder(&self) -> Option<ThreadId> {
        *self.holder.lock()
    }

    fn with_table<R>(&self, f: impl FnOnce(&mut IdTable<T>) -> R) -> R {
        let mut table = self.table.lock();
        *self.holder.lock() = Some(thread::current().id());
        let result = f(&mut table);
        *self.holder.lock() = None;
        result
    }
}

impl<T> std::fmt::Debug for IdAllocator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdAllocator")
            .field("name", &self.name)
            .field("low", &self.low)
            .field("high", &self.high)
            .finish()
    }
}
