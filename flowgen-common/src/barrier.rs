use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Control-plane synchronization point that all worker cores pass before
/// their loops start.
///
/// This is the only place in the crate where threads block on each other;
/// it runs strictly before any data-path work begins. Cloning yields another
/// handle to the same barrier.
#[derive(Debug, Clone)]
pub struct StartBarrier {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    lock: Mutex<usize>,
    cvar: Condvar,
    parties: usize,
}

impl StartBarrier {
    /// Creates a barrier for `parties` participants.
    pub fn new(parties: usize) -> Self {
        assert!(parties > 0, "barrier needs at least one party");
        Self { inner: Arc::new(Inner { lock: Mutex::new(0), cvar: Condvar::new(), parties }) }
    }

    /// Blocks until all parties have arrived. The last arrival wakes the
    /// rest.
    pub fn wait(&self) {
        let mut arrived = self.inner.lock.lock();
        *arrived += 1;
        if *arrived >= self.inner.parties {
            self.inner.cvar.notify_all();
        } else {
            while *arrived < self.inner.parties {
                self.inner.cvar.wait(&mut arrived);
            }
        }
    }
}
