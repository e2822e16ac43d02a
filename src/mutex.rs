use core::{
    cell::UnsafeCell,
    sync::atomic::AtomicBool,
    sync::atomic::Ordering::*,
    future::poll_fn,
    task::Poll,
    ops::{Deref, DerefMut},
    };

/**
    mutex acquired by busy polling, usable from both async tasks and blocking threads

    critical sections protected by this mutex are expected to be short: waiters keep polling instead of sleeping
*/
pub struct BusyMutex<T> {
    value: UnsafeCell<T>,
    locked: AtomicBool,
}
// SAFETY: the value is only reachable through a guard, and at most one guard exists at a time
unsafe impl<T: Send> Send for BusyMutex<T> {}
unsafe impl<T: Send> Sync for BusyMutex<T> {}

impl<T> BusyMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
            locked: AtomicBool::new(false),
        }
    }
    pub fn try_lock(&self) -> Option<BusyMutexGuard<'_, T>> {
        BusyMutexGuard::try_new(self)
    }
    /// busy polling future until lock is acquired
    pub async fn lock(&self) -> BusyMutexGuard<'_, T> {
        poll_fn(|context| match BusyMutexGuard::try_new(self) {
            Some(guard) => Poll::Ready(guard),
            None => {
                // no one will wake us when the lock is released, so ask to be polled again
                context.waker().wake_by_ref();
                Poll::Pending
                },
            }).await
    }
    /// busy wait until lock is acquired
    #[cfg(feature = "std")]
    pub fn blocking_lock(&self) -> BusyMutexGuard<'_, T> {
        let mut attempts = 0u32;
        loop {
            if let Some(guard) = BusyMutexGuard::try_new(self)
                {break guard}
            attempts = attempts.saturating_add(1);
            if attempts < 64
                {core::hint::spin_loop()}
            else
                // nothing else to do, leave resources to the kernel
                {std::thread::yield_now()}
        }
    }
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}
impl<T> From<T> for BusyMutex<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}
impl<T: Default> Default for BusyMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct BusyMutexGuard<'m, T> {
    mutex: &'m BusyMutex<T>,
}
impl<'m, T> BusyMutexGuard<'m, T> {
    fn try_new(mutex: &'m BusyMutex<T>) -> Option<Self> {
        if mutex.locked.compare_exchange(false, true, Acquire, Relaxed).is_ok()
            {Some(Self {mutex})}
        else
            {None}
    }
}
impl<T> Deref for BusyMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock
        unsafe {& *self.mutex.value.get()}
    }
}
impl<T> DerefMut for BusyMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock
        unsafe {&mut *self.mutex.value.get()}
    }
}
impl<T> Drop for BusyMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Release);
    }
}


#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use std::{sync::Arc, thread, vec::Vec};

    #[test]
    fn exclusive() {
        let mutex = BusyMutex::new(0);
        let guard = mutex.try_lock().unwrap();
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn no_lost_update() {
        let mutex = Arc::new(BusyMutex::new((0u32, 0u32)));
        let threads = (0 .. 8).map(|_| {
            let mutex = mutex.clone();
            thread::spawn(move || {
                for _ in 0 .. 1000 {
                    let mut guard = mutex.blocking_lock();
                    // both fields must always move together
                    assert_eq!(guard.0, guard.1);
                    guard.0 += 1;
                    guard.1 += 1;
                }
            })
        }).collect::<Vec<_>>();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(*mutex.blocking_lock(), (8000, 8000));
    }
}
