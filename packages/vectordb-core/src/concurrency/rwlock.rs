//! A fair, writer-preferring asynchronous reader/writer lock guarding an
//! owned value of type `T`.
//!
//! Policy: a reader waits while any writer is active *or* queued; a writer
//! waits until no readers and no other writer are active. This prevents
//! writer starvation under read-heavy load while still allowing many
//! concurrent readers. Acquisitions are scoped guards released on drop,
//! including on cancellation of the holding task.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Default)]
struct Counters {
    readers: u32,
    writer_active: bool,
    pending_writers: u32,
}

/// Fair async reader/writer lock wrapping `T`. See module docs for the
/// fairness policy.
pub struct ReaderWriterLock<T> {
    counters: Mutex<Counters>,
    read_ready: Notify,
    write_ready: Notify,
    data: UnsafeCell<T>,
}

// Invariant: `data` is only reachable through a `ReadGuard`/`WriteGuard`
// whose existence implies the corresponding counter state in `counters`,
// which is itself behind a `parking_lot::Mutex`. Shared access is only ever
// handed out while `writer_active` is false; exclusive access only while
// `readers == 0 && !writer_active`.
unsafe impl<T: Send> Send for ReaderWriterLock<T> {}
unsafe impl<T: Send> Sync for ReaderWriterLock<T> {}

impl<T> ReaderWriterLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            read_ready: Notify::new(),
            write_ready: Notify::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquire a shared read guard. Blocks while a writer holds or is queued.
    pub async fn read(&self) -> ReadGuard<'_, T> {
        loop {
            let notified = {
                let mut st = self.counters.lock();
                if !st.writer_active && st.pending_writers == 0 {
                    st.readers += 1;
                    return ReadGuard { lock: self };
                }
                self.read_ready.notified()
            };
            notified.await;
        }
    }

    /// Acquire the exclusive write guard. Blocks until all readers and any
    /// other writer have released.
    pub async fn write(&self) -> WriteGuard<'_, T> {
        {
            self.counters.lock().pending_writers += 1;
        }
        loop {
            let notified = {
                let mut st = self.counters.lock();
                if !st.writer_active && st.readers == 0 {
                    st.writer_active = true;
                    st.pending_writers -= 1;
                    return WriteGuard { lock: self };
                }
                self.write_ready.notified()
            };
            notified.await;
        }
    }

    fn release_read(&self) {
        let last_reader = {
            let mut st = self.counters.lock();
            st.readers -= 1;
            st.readers == 0
        };
        if last_reader {
            self.write_ready.notify_one();
        }
    }

    fn release_write(&self) {
        {
            self.counters.lock().writer_active = false;
        }
        self.read_ready.notify_waiters();
        self.write_ready.notify_one();
    }
}

/// Scoped shared-read acquisition. Releases on drop.
pub struct ReadGuard<'a, T> {
    lock: &'a ReaderWriterLock<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding a `ReadGuard` implies `writer_active == false` for
        // the lifetime of the guard, so no `&mut T` can coexist with this `&T`.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

/// Scoped exclusive-write acquisition. Releases on drop.
pub struct WriteGuard<'a, T> {
    lock: &'a ReaderWriterLock<T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: see `WriteGuard::deref_mut`.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding a `WriteGuard` implies `readers == 0` and no other
        // `WriteGuard` is live for the lifetime of this guard.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

/// `Arc`-owning counterpart of [`ReaderWriterLock`], used where a guard must
/// be stored alongside guards for other resources (the
/// [`crate::concurrency::LockManager`]'s hierarchical acquisition holds a mix
/// of these for arbitrarily many distinct locks).
pub struct OwnedReaderWriterLock<T>(Arc<ReaderWriterLock<T>>);

impl<T> OwnedReaderWriterLock<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(ReaderWriterLock::new(value)))
    }

    pub fn from_arc(inner: Arc<ReaderWriterLock<T>>) -> Self {
        Self(inner)
    }

    pub async fn read_owned(&self) -> OwnedReadGuard<T> {
        loop {
            let notified = {
                let mut st = self.0.counters.lock();
                if !st.writer_active && st.pending_writers == 0 {
                    st.readers += 1;
                    return OwnedReadGuard { lock: self.0.clone() };
                }
                self.0.read_ready.notified()
            };
            notified.await;
        }
    }

    pub async fn write_owned(&self) -> OwnedWriteGuard<T> {
        {
            self.0.counters.lock().pending_writers += 1;
        }
        loop {
            let notified = {
                let mut st = self.0.counters.lock();
                if !st.writer_active && st.readers == 0 {
                    st.writer_active = true;
                    st.pending_writers -= 1;
                    return OwnedWriteGuard { lock: self.0.clone() };
                }
                self.0.write_ready.notified()
            };
            notified.await;
        }
    }
}

/// Owned shared-read acquisition. Releases on drop.
pub struct OwnedReadGuard<T> {
    lock: Arc<ReaderWriterLock<T>>,
}

impl<T> Deref for OwnedReadGuard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for OwnedReadGuard<T> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

/// Owned exclusive-write acquisition. Releases on drop.
pub struct OwnedWriteGuard<T> {
    lock: Arc<ReaderWriterLock<T>>,
}

impl<T> Deref for OwnedWriteGuard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for OwnedWriteGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for OwnedWriteGuard<T> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::time::Duration;

    // ═══ Mutual Exclusion Tests ═══

    #[tokio::test]
    async fn many_readers_hold_concurrently() {
        let lock = ReaderWriterLock::new(0i32);
        let g1 = lock.read().await;
        let g2 = lock.read().await;
        assert_eq!(*g1, 0);
        assert_eq!(*g2, 0);
    }

    #[tokio::test]
    async fn writer_excludes_readers() {
        let lock = Arc::new(ReaderWriterLock::new(0i32));
        let observed = Arc::new(AtomicI32::new(-1));

        let mut w = lock.write().await;
        *w = 7;
        let lock2 = lock.clone();
        let observed2 = observed.clone();
        let reader = tokio::spawn(async move {
            let g = lock2.read().await;
            observed2.store(*g, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(observed.load(Ordering::SeqCst), -1, "reader must not proceed while writer holds");
        drop(w);
        reader.await.unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), 7);
    }

    // ═══ Writer Preference Tests ═══

    #[tokio::test]
    async fn queued_writer_blocks_new_readers() {
        let lock = Arc::new(ReaderWriterLock::new(Vec::<&'static str>::new()));

        let first_reader = lock.read().await;

        let lock2 = lock.clone();
        let writer = tokio::spawn(async move {
            let mut g = lock2.write().await;
            g.push("writer");
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let lock3 = lock.clone();
        let second_reader = tokio::spawn(async move {
            let g = lock3.read().await;
            g.clone()
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(first_reader);
        writer.await.unwrap();
        let seen = second_reader.await.unwrap();

        assert_eq!(seen, vec!["writer"]);
    }
}
