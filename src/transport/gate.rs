//! Bounded Concurrency Gate
//!
//! Counting admission primitive that caps in-flight work. Permits are granted
//! in strict FIFO arrival order: a released permit goes straight to the
//! longest-waiting caller. Backed by tokio's fair semaphore.

use crate::error::{Error, OpResult, OperationError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

// =============================================================================
// Gate Permit
// =============================================================================

/// One unit of admission. Dropping the permit releases it.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    /// Release the permit explicitly
    pub fn release(self) {
        drop(self);
    }
}

// =============================================================================
// Concurrency Gate
// =============================================================================

/// Fixed-capacity FIFO admission gate
///
/// Cloning yields another handle to the same gate.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `capacity` concurrent holders
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Configuration(
                "Concurrency gate capacity must be positive".into(),
            ));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(Error::Configuration(format!(
                "Concurrency gate capacity {} exceeds maximum {}",
                capacity,
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    /// Create a gate with `capacity` clamped into the supported range
    pub fn clamped(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a permit
    ///
    /// Cancel-safe: dropping the pending future leaves the queue without
    /// consuming a permit. Fails fast once the gate is closed.
    pub async fn acquire(&self) -> OpResult<GatePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map(|permit| GatePermit { _permit: permit })
            .map_err(|_| OperationError::closed("Concurrency gate closed"))
    }

    /// Take a permit only if one is free right now
    pub fn try_acquire(&self) -> OpResult<Option<GatePermit>> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(Some(GatePermit { _permit: permit })),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => {
                Err(OperationError::closed("Concurrency gate closed"))
            }
        }
    }

    /// Run a future while holding a permit
    pub async fn run<F>(&self, fut: F) -> OpResult<F::Output>
    where
        F: Future,
    {
        let _permit = self.acquire().await?;
        Ok(fut.await)
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits free right now
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Close the gate; pending and future acquisitions fail
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(ConcurrencyGate::new(0).is_err());
        assert!(ConcurrencyGate::new(1).is_ok());
    }

    #[tokio::test]
    async fn test_capacity_never_exceeded() {
        let gate = ConcurrencyGate::new(3).unwrap();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let gate = gate.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.available(), 3);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_fifo_handoff() {
        let gate = ConcurrencyGate::new(1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let held = gate.acquire().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..5 {
            let gate = gate.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                order.lock().push(i);
            }));
            // Let the waiter enqueue before spawning the next one
            tokio::task::yield_now().await;
        }

        held.release();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_waiter_woken_on_release() {
        let gate = ConcurrencyGate::new(1).unwrap();
        let held = gate.try_acquire().unwrap().unwrap();

        let mut waiter = tokio_test::task::spawn(gate.acquire());
        tokio_test::assert_pending!(waiter.poll());

        drop(held);
        assert!(waiter.is_woken());
        let _permit = tokio_test::assert_ready_ok!(waiter.poll());
        assert_eq!(gate.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_acquire_does_not_leak() {
        let gate = ConcurrencyGate::new(1).unwrap();
        let held = gate.acquire().await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(10), gate.acquire()).await;
        assert!(waited.is_err());

        drop(held);
        assert_eq!(gate.available(), 1);
        assert!(gate.try_acquire().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_run_holds_permit() {
        let gate = ConcurrencyGate::new(2).unwrap();
        let observed = gate
            .run(async { gate.in_flight() })
            .await
            .unwrap();
        assert_eq!(observed, 1);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_closed_gate_fails_fast() {
        let gate = ConcurrencyGate::new(1).unwrap();
        let held = gate.acquire().await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|_| ()) })
        };
        tokio::task::yield_now().await;

        gate.close();
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Closed);
        assert!(gate.is_closed());

        drop(held);
        assert!(gate.try_acquire().is_err());
    }
}
