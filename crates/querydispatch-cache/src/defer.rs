/// Executes a callback when the container is dropped.
///
/// The callback must not panic under any circumstance. Since it is called
/// while dropping an item, this might result in aborting program execution.
pub struct CallOnDrop {
    f: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl CallOnDrop {
    /// Creates a new `CallOnDrop`.
    pub fn new<F: FnOnce() + Send + 'static>(f: F) -> CallOnDrop {
        CallOnDrop {
            f: Some(Box::new(f)),
        }
    }
}

impl Drop for CallOnDrop {
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            f();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_runs_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let guard = CallOnDrop::new({
            let calls = Arc::clone(&calls);
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(guard);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
