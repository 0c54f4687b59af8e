//! The admission gate: a counting semaphore that also keeps track of how many
//! permits are currently held and the highest number ever held at once.

use crate::config::validate_concurrency_limit;
use crate::error::{GateClosed, RunnerError};

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::trace;

/// A counting admission gate with a fixed capacity.
///
/// Holders never exceed `capacity`. Waiting in [`AdmissionGate::acquire`]
/// suspends the calling task without occupying a runtime worker thread.
pub struct AdmissionGate {
  capacity: usize,
  semaphore: Arc<Semaphore>,
  counters: Arc<GateCounters>,
}

#[derive(Debug, Default)]
struct GateCounters {
  in_flight: AtomicUsize,
  peak: AtomicUsize,
  admitted: AtomicUsize,
}

impl GateCounters {
  fn admit(&self) -> usize {
    let current = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
    self.peak.fetch_max(current, Ordering::AcqRel);
    self.admitted.fetch_add(1, Ordering::Relaxed);
    current
  }
}

impl AdmissionGate {
  /// Largest capacity the underlying semaphore supports.
  pub const MAX_CAPACITY: usize = Semaphore::MAX_PERMITS;

  /// Creates a gate with `capacity` permits.
  ///
  /// Fails with [`RunnerError::InvalidConcurrencyLimit`] for zero and with
  /// [`RunnerError::ConcurrencyLimitTooLarge`] above [`AdmissionGate::MAX_CAPACITY`].
  pub fn new(capacity: usize) -> Result<Self, RunnerError> {
    validate_concurrency_limit(capacity)?;
    Ok(Self::with_valid_capacity(capacity))
  }

  /// `capacity` must already have passed `validate_concurrency_limit`.
  pub(crate) fn with_valid_capacity(capacity: usize) -> Self {
    Self {
      capacity,
      semaphore: Arc::new(Semaphore::new(capacity)),
      counters: Arc::new(GateCounters::default()),
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Waits for a permit. Returns `Err(GateClosed)` if the gate is closed before
  /// or while waiting; no permit is held in that case.
  pub async fn acquire(&self) -> Result<GatePermit, GateClosed> {
    let permit = self.semaphore.clone().acquire_owned().await.map_err(|_| GateClosed)?;
    Ok(self.admit(permit))
  }

  /// Takes a permit only if one is free right now.
  pub fn try_acquire(&self) -> Result<Option<GatePermit>, GateClosed> {
    match self.semaphore.clone().try_acquire_owned() {
      Ok(permit) => Ok(Some(self.admit(permit))),
      Err(TryAcquireError::NoPermits) => Ok(None),
      Err(TryAcquireError::Closed) => Err(GateClosed),
    }
  }

  /// Closes the gate. Every pending and future `acquire` fails with
  /// [`GateClosed`]; permits already held stay valid until dropped.
  pub fn close(&self) {
    self.semaphore.close();
  }

  pub fn is_closed(&self) -> bool {
    self.semaphore.is_closed()
  }

  pub fn available_permits(&self) -> usize {
    self.semaphore.available_permits()
  }

  /// Number of permits held at this instant.
  pub fn in_flight(&self) -> usize {
    self.counters.in_flight.load(Ordering::Acquire)
  }

  /// Highest number of permits ever held simultaneously.
  pub fn peak_in_flight(&self) -> usize {
    self.counters.peak.load(Ordering::Acquire)
  }

  /// Number of permits handed out over the gate's lifetime.
  pub fn total_admitted(&self) -> usize {
    self.counters.admitted.load(Ordering::Relaxed)
  }

  fn admit(&self, permit: OwnedSemaphorePermit) -> GatePermit {
    let in_flight = self.counters.admit();
    trace!(in_flight, available = self.semaphore.available_permits(), "Gate permit acquired.");
    GatePermit {
      in_flight,
      counters: self.counters.clone(),
      _permit: permit,
    }
  }
}

impl fmt::Debug for AdmissionGate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AdmissionGate")
      .field("capacity", &self.capacity)
      .field("in_flight", &self.in_flight())
      .field("peak_in_flight", &self.peak_in_flight())
      .field("closed", &self.is_closed())
      .finish()
  }
}

/// A held gate permit. Dropping it releases the permit.
///
/// The in-flight counter is decremented before the semaphore permit goes back,
/// so `in_flight() <= capacity()` holds at every instant.
pub struct GatePermit {
  in_flight: usize,
  counters: Arc<GateCounters>,
  _permit: OwnedSemaphorePermit,
}

impl GatePermit {
  /// The in-flight count observed right after this permit was granted.
  pub fn in_flight_at_admission(&self) -> usize {
    self.in_flight
  }
}

impl fmt::Debug for GatePermit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GatePermit")
      .field("in_flight_at_admission", &self.in_flight)
      .finish_non_exhaustive()
  }
}

impl Drop for GatePermit {
  fn drop(&mut self) {
    self.counters.in_flight.fetch_sub(1, Ordering::AcqRel);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn test_acquire_and_release_updates_counters() {
    let gate = AdmissionGate::new(2).unwrap();
    assert_eq!(gate.available_permits(), 2);

    let first = gate.acquire().await.unwrap();
    let second = gate.acquire().await.unwrap();
    assert_eq!(first.in_flight_at_admission(), 1);
    assert_eq!(second.in_flight_at_admission(), 2);
    assert_eq!(gate.in_flight(), 2);
    assert_eq!(gate.available_permits(), 0);

    drop(first);
    assert_eq!(gate.in_flight(), 1);
    assert_eq!(gate.available_permits(), 1);

    drop(second);
    assert_eq!(gate.in_flight(), 0);
    assert_eq!(gate.peak_in_flight(), 2);
    assert_eq!(gate.total_admitted(), 2);
  }

  #[tokio::test]
  async fn test_acquire_waits_while_full() {
    let gate = Arc::new(AdmissionGate::new(1).unwrap());
    let held = gate.acquire().await.unwrap();

    let waiter = {
      let gate = gate.clone();
      tokio::spawn(async move { gate.acquire().await.map(|p| p.in_flight_at_admission()) })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished(), "Acquire should block while the gate is full.");

    drop(held);
    let admitted_at = tokio::time::timeout(Duration::from_millis(200), waiter)
      .await
      .expect("Waiter was not admitted after release.")
      .unwrap()
      .unwrap();
    assert_eq!(admitted_at, 1);
  }

  #[tokio::test]
  async fn test_try_acquire_reports_no_permits() {
    let gate = AdmissionGate::new(1).unwrap();
    let held = gate.try_acquire().unwrap();
    assert!(held.is_some());
    assert!(gate.try_acquire().unwrap().is_none());
    drop(held);
    assert!(gate.try_acquire().unwrap().is_some());
  }

  #[tokio::test]
  async fn test_close_fails_pending_acquire() {
    let gate = Arc::new(AdmissionGate::new(1).unwrap());
    let held = gate.acquire().await.unwrap();

    let waiter = {
      let gate = gate.clone();
      tokio::spawn(async move { gate.acquire().await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    gate.close();
    assert_eq!(waiter.await.unwrap(), Err(GateClosed));
    assert!(matches!(gate.try_acquire(), Err(GateClosed)));

    // The permit held across close is still counted until dropped.
    assert_eq!(gate.in_flight(), 1);
    drop(held);
    assert_eq!(gate.in_flight(), 0);
  }

  #[test]
  fn test_out_of_range_capacity_is_rejected() {
    assert_eq!(AdmissionGate::new(0).unwrap_err(), RunnerError::InvalidConcurrencyLimit);
    assert_eq!(
      AdmissionGate::new(usize::MAX).unwrap_err(),
      RunnerError::ConcurrencyLimitTooLarge {
        limit: usize::MAX,
        max: AdmissionGate::MAX_CAPACITY,
      }
    );
    assert_eq!(
      AdmissionGate::new(AdmissionGate::MAX_CAPACITY).unwrap().capacity(),
      AdmissionGate::MAX_CAPACITY
    );
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_holders_never_exceed_capacity() {
    let gate = Arc::new(AdmissionGate::new(3).unwrap());
    let mut handles = Vec::new();
    for _ in 0..50 {
      let gate = gate.clone();
      handles.push(tokio::spawn(async move {
        let permit = gate.acquire().await.unwrap();
        assert!(gate.in_flight() <= 3);
        tokio::time::sleep(Duration::from_millis(2)).await;
        drop(permit);
      }));
    }
    for handle in handles {
      handle.await.unwrap();
    }
    assert!(gate.peak_in_flight() <= 3);
    assert_eq!(gate.total_admitted(), 50);
    assert_eq!(gate.available_permits(), 3);
  }
}
