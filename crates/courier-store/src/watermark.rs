//! Synchronization cursor.

use std::sync::atomic::{AtomicI64, Ordering};

/// Highest message id already delivered.
///
/// Only moves forward: [`Watermark::advance`] is a `fetch_max`, so racing
/// updates can never pull it back below a value another caller stored.
#[derive(Debug, Default)]
pub struct Watermark {
    value: AtomicI64,
}

impl Watermark {
    pub fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
        }
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Raise the watermark to `to` if it is higher; returns the value now held.
    pub fn advance(&self, to: i64) -> i64 {
        let previous = self.value.fetch_max(to, Ordering::AcqRel);
        previous.max(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_never_decreases() {
        let wm = Watermark::new(5);
        assert_eq!(wm.advance(9), 9);
        assert_eq!(wm.advance(3), 9);
        assert_eq!(wm.get(), 9);
    }

    #[test]
    fn test_concurrent_advances_keep_maximum() {
        let wm = Arc::new(Watermark::new(0));
        let handles: Vec<_> = (1..=8)
            .map(|t| {
                let wm = wm.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        wm.advance(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(wm.get(), 8999);
    }
}
