//! Double-buffered queue between many producers and one consumer
//!
//! Producers always push into the write side. The consumer swaps the sides
//! under a short critical section and then drains the read side without
//! holding the write lock, so producers never wait on a drain.

use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct DoubleBufferQueue<T> {
    write: Mutex<Vec<T>>,
    read: Mutex<Vec<T>>,
}

impl<T> DoubleBufferQueue<T> {
    pub fn new() -> Self {
        Self {
            write: Mutex::new(Vec::new()),
            read: Mutex::new(Vec::new()),
        }
    }

    /// Append to the write side
    pub fn push(&self, item: T) {
        lock(&self.write).push(item);
    }

    /// Append several items under one lock, so a swap sees all or none of them
    pub fn push_many(&self, items: impl IntoIterator<Item = T>) {
        lock(&self.write).extend(items);
    }

    /// Exchange sides. Returns the number of items now readable.
    ///
    /// Anything left unread on the read side is kept ahead of the newly
    /// swapped items.
    pub fn swap(&self) -> usize {
        let mut read = lock(&self.read);
        let mut write = lock(&self.write);
        if read.is_empty() {
            std::mem::swap(&mut *read, &mut *write);
        } else {
            read.append(&mut write);
        }
        read.len()
    }

    /// Take everything on the read side
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *lock(&self.read))
    }

    /// Swap, then drain
    pub fn swap_and_drain(&self) -> Vec<T> {
        self.swap();
        self.drain()
    }

    /// Items waiting on the write side
    pub fn pending(&self) -> usize {
        lock(&self.write).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.write).is_empty() && lock(&self.read).is_empty()
    }
}

impl<T> Default for DoubleBufferQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
