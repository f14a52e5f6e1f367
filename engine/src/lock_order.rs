//! Ordered reader/writer locks
//!
//! Every lock carries a rank. A thread may only acquire a lock whose rank is
//! not lower than any lock it already holds. Debug builds track held locks
//! per thread and panic on order inversion, shared-to-unique upgrade, and
//! re-entry; release builds compile down to the bare `parking_lot` lock.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Shared,
    Unique,
}

#[cfg(debug_assertions)]
mod tracking {
    use super::Mode;
    use std::cell::RefCell;

    #[derive(Debug, Clone, Copy)]
    struct Held {
        rank: u8,
        name: &'static str,
        mode: Mode,
    }

    thread_local! {
        static HELD: RefCell<Vec<Held>> = const { RefCell::new(Vec::new()) };
    }

    /// Find why acquiring `(rank, mode)` would break the ordering, if it does.
    fn violation(held: &[Held], rank: u8, name: &'static str, mode: Mode) -> Option<String> {
        for h in held {
            if h.rank == rank {
                return Some(match (h.mode, mode) {
                    (Mode::Unique, _) => format!("lock order: unique reentry into {}", name),
                    (Mode::Shared, Mode::Unique) => {
                        format!("lock order: shared to unique upgrade on {}", name)
                    }
                    (Mode::Shared, Mode::Shared) => format!("lock order: shared reentry into {}", name),
                });
            }
            if h.rank > rank {
                return Some(format!(
                    "lock order: acquiring {} (rank {}) while holding {} (rank {})",
                    name, rank, h.name, h.rank
                ));
            }
        }
        None
    }

    pub fn acquire(rank: u8, name: &'static str, mode: Mode) {
        let problem = HELD.with(|held| violation(&held.borrow(), rank, name, mode));
        if let Some(message) = problem {
            panic!("{}", message);
        }
        HELD.with(|held| held.borrow_mut().push(Held { rank, name, mode }));
    }

    pub fn release(rank: u8, mode: Mode) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|h| h.rank == rank && h.mode == mode) {
                held.remove(pos);
            }
        });
    }
}

/// A `parking_lot::RwLock` tagged with its position in the lock order.
#[derive(Debug)]
pub struct OrderedRwLock<T> {
    rank: u8,
    name: &'static str,
    inner: RwLock<T>,
}

impl<T> OrderedRwLock<T> {
    pub fn new(rank: u8, name: &'static str, value: T) -> Self {
        Self {
            rank,
            name,
            inner: RwLock::new(value),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn read(&self) -> OrderedReadGuard<'_, T> {
        #[cfg(debug_assertions)]
        tracking::acquire(self.rank, self.name, Mode::Shared);
        OrderedReadGuard {
            rank: self.rank,
            guard: self.inner.read(),
        }
    }

    pub fn write(&self) -> OrderedWriteGuard<'_, T> {
        #[cfg(debug_assertions)]
        tracking::acquire(self.rank, self.name, Mode::Unique);
        OrderedWriteGuard {
            rank: self.rank,
            guard: self.inner.write(),
        }
    }
}

pub struct OrderedReadGuard<'a, T> {
    #[cfg_attr(not(debug_assertions), allow(dead_code))]
    rank: u8,
    guard: RwLockReadGuard<'a, T>,
}

pub struct OrderedWriteGuard<'a, T> {
    #[cfg_attr(not(debug_assertions), allow(dead_code))]
    rank: u8,
    guard: RwLockWriteGuard<'a, T>,
}

impl<T> Deref for OrderedReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> Deref for OrderedWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for OrderedWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for OrderedReadGuard<'_, T> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        tracking::release(self.rank, Mode::Shared);
    }
}

impl<T> Drop for OrderedWriteGuard<'_, T> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        tracking::release(self.rank, Mode::Unique);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (OrderedRwLock<u32>, OrderedRwLock<u32>) {
        (
            OrderedRwLock::new(1, "population", 0),
            OrderedRwLock::new(2, "timers", 0),
        )
    }

    #[test]
    fn test_forward_order_is_allowed() {
        let (a, b) = pair();
        let mut ga = a.write();
        let mut gb = b.write();
        *ga += 1;
        *gb += 1;
        drop(gb);
        drop(ga);
        // Released locks can be taken again in any order
        assert_eq!(*b.read(), 1);
        assert_eq!(*a.read(), 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "lock order: acquiring population")]
    fn test_inversion_is_rejected() {
        let (a, b) = pair();
        let _gb = b.write();
        let _ga = a.read();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "shared to unique upgrade")]
    fn test_upgrade_is_rejected() {
        let (a, _) = pair();
        let _r = a.read();
        let _w = a.write();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "unique reentry")]
    fn test_unique_reentry_is_rejected() {
        let (a, _) = pair();
        let _w = a.write();
        let _w2 = a.write();
    }

    #[test]
    fn test_out_of_order_release_keeps_tracking_consistent() {
        let (a, b) = pair();
        let ga = a.read();
        let gb = b.read();
        drop(ga);
        drop(gb);
        let _ga = a.write();
        let _gb = b.write();
    }
}
