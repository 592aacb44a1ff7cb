//! Lock helpers.
//!
//! Whenever two entities of the same kind must be locked together, they are
//! locked in ascending key order. Resources use their original id as key,
//! list id arrays use their allocation sequence number.

use parking_lot::{Mutex, MutexGuard};

/// Guards for two mutexes acquired in key order.
///
/// If both keys are equal the mutexes are the same object and only one
/// guard is held; `first` and `second` then refer to the same data.
pub(crate) struct PairGuard<'a, T> {
    first: MutexGuard<'a, T>,
    second: Option<MutexGuard<'a, T>>,
    swapped: bool,
}

impl<'a, T> PairGuard<'a, T> {
    /// Data behind the first mutex passed to [`lock_pair`].
    pub(crate) fn first(&self) -> &T {
        match (&self.second, self.swapped) {
            (Some(second), true) => &**second,
            _ => &*self.first,
        }
    }

    /// Data behind the second mutex passed to [`lock_pair`].
    pub(crate) fn second(&self) -> &T {
        match (&self.second, self.swapped) {
            (Some(second), false) => &**second,
            _ => &*self.first,
        }
    }

    /// Both sides mutably, in argument order. None if they alias.
    pub(crate) fn both_mut(&mut self) -> Option<(&mut T, &mut T)> {
        let second = self.second.as_mut()?;
        if self.swapped {
            Some((&mut **second, &mut *self.first))
        } else {
            Some((&mut *self.first, &mut **second))
        }
    }
}

/// Lock `a` and `b` together, lower key first.
pub(crate) fn lock_pair<'a, T>(
    a: &'a Mutex<T>,
    a_key: u64,
    b: &'a Mutex<T>,
    b_key: u64,
) -> PairGuard<'a, T> {
    if std::ptr::eq(a, b) {
        return PairGuard { first: a.lock(), second: None, swapped: false };
    }
    debug_assert_ne!(a_key, b_key, "distinct mutexes must have distinct lock keys");
    if a_key <= b_key {
        let first = a.lock();
        let second = b.lock();
        PairGuard { first, second: Some(second), swapped: false }
    } else {
        let first = b.lock();
        let second = a.lock();
        PairGuard { first, second: Some(second), swapped: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_pair_argument_order_preserved() {
        let a = Mutex::new(1);
        let b = Mutex::new(2);
        let mut guard = lock_pair(&a, 9, &b, 3);
        assert_eq!(*guard.first(), 1);
        assert_eq!(*guard.second(), 2);
        let (x, y) = guard.both_mut().unwrap();
        *x += 10;
        *y += 20;
        drop(guard);
        assert_eq!(*a.lock(), 11);
        assert_eq!(*b.lock(), 22);
    }

    #[test]
    fn test_aliased_pair() {
        let a = Mutex::new(5);
        let mut guard = lock_pair(&a, 1, &a, 1);
        assert_eq!(*guard.first(), 5);
        assert_eq!(*guard.second(), 5);
        assert!(guard.both_mut().is_none());
    }

    #[test]
    fn test_opposite_orders_do_not_deadlock() {
        let a = Arc::new(Mutex::new(0u64));
        let b = Arc::new(Mutex::new(0u64));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let (a, b) = (a.clone(), b.clone());
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let mut g = if i % 2 == 0 {
                            lock_pair(&a, 1, &b, 2)
                        } else {
                            lock_pair(&b, 2, &a, 1)
                        };
                        let (x, y) = g.both_mut().unwrap();
                        *x += 1;
                        *y += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*a.lock(), 4000);
        assert_eq!(*b.lock(), 4000);
    }
}
