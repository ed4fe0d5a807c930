//! Memory accounting for geometry storage
//!
//! A `MemoryCounter` is handed to the buffers that should be accounted for.
//! Nothing is tracked globally; buffers built without a counter are free.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Shared handle to a byte counter
#[derive(Debug, Clone, Default)]
pub struct MemoryCounter {
    allocated: Arc<AtomicI64>,
}

impl MemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently accounted to this counter
    pub fn allocated(&self) -> i64 {
        self.allocated.load(Ordering::Relaxed)
    }

    fn add(&self, bytes: usize) {
        self.allocated.fetch_add(bytes as i64, Ordering::Relaxed);
    }

    fn sub(&self, bytes: usize) {
        self.allocated.fetch_sub(bytes as i64, Ordering::Relaxed);
    }

    /// True when both handles update the same counter
    pub fn same_as(&self, other: &MemoryCounter) -> bool {
        Arc::ptr_eq(&self.allocated, &other.allocated)
    }
}

/// Byte storage that reports its length to an optional counter
#[derive(Default)]
pub struct TrackedBytes {
    bytes: Vec<u8>,
    counter: Option<MemoryCounter>,
}

impl TrackedBytes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_counter(counter: Option<MemoryCounter>) -> Self {
        Self {
            bytes: Vec::new(),
            counter,
        }
    }

    pub fn from_vec(bytes: Vec<u8>, counter: Option<MemoryCounter>) -> Self {
        if let Some(counter) = &counter {
            counter.add(bytes.len());
        }
        Self { bytes, counter }
    }

    pub fn counter(&self) -> Option<&MemoryCounter> {
        self.counter.as_ref()
    }

    /// Move the accounted bytes to another counter
    pub fn set_counter(&mut self, counter: Option<MemoryCounter>) {
        if let Some(old) = &self.counter {
            old.sub(self.bytes.len());
        }
        if let Some(new) = &counter {
            new.add(self.bytes.len());
        }
        self.counter = counter;
    }

    pub fn resize(&mut self, len: usize, value: u8) {
        let old_len = self.bytes.len();
        self.bytes.resize(len, value);
        if let Some(counter) = &self.counter {
            if len > old_len {
                counter.add(len - old_len);
            } else {
                counter.sub(old_len - len);
            }
        }
    }

    pub fn clear(&mut self) {
        self.resize(0, 0);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Deref for TrackedBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for TrackedBytes {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Clone for TrackedBytes {
    fn clone(&self) -> Self {
        Self::from_vec(self.bytes.clone(), self.counter.clone())
    }
}

impl Drop for TrackedBytes {
    fn drop(&mut self) {
        if let Some(counter) = &self.counter {
            counter.sub(self.bytes.len());
        }
    }
}

impl PartialEq for TrackedBytes {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl fmt::Debug for TrackedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrackedBytes({} bytes)", self.bytes.len())
    }
}

impl Serialize for TrackedBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bytes.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TrackedBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        Ok(Self::from_vec(bytes, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_follows_resize_and_drop() {
        let counter = MemoryCounter::new();
        {
            let mut bytes = TrackedBytes::with_counter(Some(counter.clone()));
            bytes.resize(128, 0);
            assert_eq!(counter.allocated(), 128);
            bytes.resize(32, 0);
            assert_eq!(counter.allocated(), 32);

            let copy = bytes.clone();
            assert_eq!(counter.allocated(), 64);
            drop(copy);
            assert_eq!(counter.allocated(), 32);
        }
        assert_eq!(counter.allocated(), 0);
    }

    #[test]
    fn test_set_counter_moves_accounting() {
        let first = MemoryCounter::new();
        let second = MemoryCounter::new();
        let mut bytes = TrackedBytes::from_vec(vec![1, 2, 3, 4], Some(first.clone()));
        assert_eq!(first.allocated(), 4);

        bytes.set_counter(Some(second.clone()));
        assert_eq!(first.allocated(), 0);
        assert_eq!(second.allocated(), 4);
        assert!(bytes.counter().map(|c| c.same_as(&second)).unwrap_or(false));
    }

    #[test]
    fn test_untracked_bytes() {
        let mut bytes = TrackedBytes::new();
        bytes.resize(10, 7);
        assert_eq!(bytes.as_slice(), &[7u8; 10]);
        assert!(bytes.counter().is_none());
    }
}
