//! Idle rendezvous barrier
//!
//! Lets a request handler block until any plugin connection reports that it
//! has finished its work. There is no correlation between a wait and the
//! signal that ends it: any `idle` from any connection releases every
//! outstanding waiter.
//!
//! The barrier is a generation counter. Arming captures the current
//! generation, firing bumps it, and a wait completes once the generation has
//! moved past the one it armed on. Bumping is the re-arm: a wait armed after
//! a fire starts from the new generation and does not see that fire.

use tokio::sync::watch;

/// Re-armable broadcast wake-up shared by all connections
#[derive(Debug)]
pub struct IdleBarrier {
    generation: watch::Sender<u64>,
}

impl IdleBarrier {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self { generation }
    }

    /// Arm a wait on the current generation.
    ///
    /// Fires that happen after this call release the returned handle, even if
    /// they happen before [`IdleWait::wait`] is polled.
    pub fn arm(&self) -> IdleWait {
        IdleWait {
            rx: self.generation.subscribe(),
        }
    }

    /// Release every armed waiter and start a fresh generation.
    ///
    /// Never blocks; with no waiters the fire is simply not observed by anyone.
    pub fn fire(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    /// Number of fires so far
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }
}

impl Default for IdleBarrier {
    fn default() -> Self {
        Self::new()
    }
}

/// A wait armed on one generation of an [`IdleBarrier`]
#[derive(Debug)]
pub struct IdleWait {
    rx: watch::Receiver<u64>,
}

impl IdleWait {
    /// Resolve on the first fire after arming
    pub async fn wait(mut self) {
        // A dropped barrier also counts as released
        let _ = self.rx.changed().await;
    }
}
