// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Admission controller: turns the non-blocking ledger claim into an async wait.
//!
//! ```text
//! acquire_or_wait(run, step, keys)
//!   ├─ drop keys with no limit (unconstrained)
//!   ├─ enqueue one ticket on the wait queue of every remaining key
//!   └─ loop
//!        ├─ head of every queue? ── claim ── ok ──► dequeue, wake next heads, SlotHandle
//!        │                              └─ full ─┐
//!        └─ not head ────────────────────────────┴─► park on own Notify
//! ```
//!
//! ## Invariants
//! - FIFO per key: only the head of a key's queue may claim on that key.
//! - Tickets come from one counter and are enqueued on all keys under one lock,
//!   so two multi-key waiters are ordered the same way on every queue they share.
//! - Every free wakes each waiter queued on the freed keys. `Notify` stores the
//!   permit, so a wake-up that lands before the waiter parks is not lost.
//! - Dropping the future removes its ticket from every queue and wakes the next heads.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

use crate::concurrency::ConcurrencyStore;
use crate::errors::ConcurrencyError;
use crate::observability::messages::concurrency::{
    SlotClaimDeferred, SlotReleaseFailed, SlotsClaimed, SlotsFreed, WaiterAbandoned,
};
use crate::observability::messages::StructuredLog;

struct Waiter {
    ticket: u64,
    notify: Arc<Notify>,
}

type WaitQueues = HashMap<String, VecDeque<Waiter>>;

pub struct AdmissionController {
    store: Arc<dyn ConcurrencyStore>,
    queues: Mutex<WaitQueues>,
    next_ticket: AtomicU64,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn ConcurrencyStore>) -> Self {
        Self {
            store,
            queues: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn ConcurrencyStore> {
        &self.store
    }

    fn lock_queues(&self) -> MutexGuard<'_, WaitQueues> {
        self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Waits until the step holds a slot on every limited key in `keys`.
    ///
    /// Keys without a limit are not claimed. Cancel-safe: dropping the returned
    /// future before it resolves leaves no queue entry and no slot behind.
    pub async fn acquire_or_wait(
        self: &Arc<Self>,
        run_id: &str,
        step_key: &str,
        keys: &[String],
    ) -> Result<SlotHandle, ConcurrencyError> {
        let limited = self.store.get_concurrency_limited_keys();
        let mut keys: Vec<String> = keys
            .iter()
            .filter(|k| limited.contains(k.as_str()))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();

        if keys.is_empty() {
            return Ok(SlotHandle::new(self.clone(), run_id, step_key, Vec::new()));
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let notify = Arc::new(Notify::new());
        {
            let mut queues = self.lock_queues();
            for key in &keys {
                queues.entry(key.clone()).or_default().push_back(Waiter {
                    ticket,
                    notify: notify.clone(),
                });
            }
        }

        let mut registration = Registration {
            controller: self,
            run_id,
            step_key,
            ticket,
            keys: &keys,
            active: true,
        };
        let mut deferred = false;

        loop {
            match self.try_claim_as_head(ticket, &keys, run_id, step_key) {
                Ok(Some(true)) => {
                    registration.active = false;
                    SlotsClaimed {
                        run_id,
                        step_key,
                        keys: &keys,
                    }
                    .log();
                    return Ok(SlotHandle::new(self.clone(), run_id, step_key, keys.clone()));
                }
                Ok(_) => {}
                Err(err) => {
                    registration.active = false;
                    return Err(err);
                }
            }

            if !deferred {
                SlotClaimDeferred {
                    run_id,
                    step_key,
                    keys: &keys,
                    ticket,
                }
                .log();
                deferred = true;
            }
            notify.notified().await;
        }
    }

    /// `None` when the ticket is not at the head of every queue, otherwise the claim result.
    ///
    /// A successful claim dequeues the ticket before the queue lock is released.
    fn try_claim_as_head(
        &self,
        ticket: u64,
        keys: &[String],
        run_id: &str,
        step_key: &str,
    ) -> Result<Option<bool>, ConcurrencyError> {
        let mut queues = self.lock_queues();
        let is_head = keys.iter().all(|key| {
            queues
                .get(key)
                .and_then(|q| q.front())
                .map_or(false, |w| w.ticket == ticket)
        });
        if !is_head {
            return Ok(None);
        }

        // A key whose limit was cleared while waiting no longer constrains the claim.
        let limited = self.store.get_concurrency_limited_keys();
        let claimable: Vec<String> = keys
            .iter()
            .filter(|k| limited.contains(k.as_str()))
            .cloned()
            .collect();
        let attempt = if claimable.is_empty() {
            Ok(true)
        } else {
            self.store.claim_concurrency_slots(&claimable, run_id, step_key)
        };
        let claimed = match attempt {
            Ok(claimed) => claimed,
            Err(err) => {
                remove_ticket(&mut queues, ticket, keys);
                return Err(err);
            }
        };
        if claimed {
            remove_ticket(&mut queues, ticket, keys);
        }
        Ok(Some(claimed))
    }

    /// Sets the limit of `key` and wakes its waiters so a raised or cleared limit admits them.
    pub fn set_concurrency_limit(&self, key: &str, limit: i64) -> Result<(), ConcurrencyError> {
        self.store.set_concurrency_limit(key, limit)?;
        let queues = self.lock_queues();
        if let Some(queue) = queues.get(key) {
            for waiter in queue {
                waiter.notify.notify_one();
            }
        }
        Ok(())
    }

    /// Frees the slots of one step and wakes waiters on the freed keys.
    pub fn free_step(&self, run_id: &str, step_key: &str) -> Result<Vec<String>, ConcurrencyError> {
        let freed = self.store.free_concurrency_slots(run_id, Some(step_key))?;
        self.after_free(run_id, Some(step_key), &freed);
        Ok(freed)
    }

    /// Frees every slot held by the run and wakes waiters on the freed keys.
    pub fn free_run(&self, run_id: &str) -> Result<Vec<String>, ConcurrencyError> {
        let freed = self.store.free_concurrency_slots(run_id, None)?;
        self.after_free(run_id, None, &freed);
        Ok(freed)
    }

    fn after_free(&self, run_id: &str, step_key: Option<&str>, freed: &[String]) {
        if freed.is_empty() {
            return;
        }
        SlotsFreed {
            run_id,
            step_key,
            keys: freed,
        }
        .log();

        let queues = self.lock_queues();
        for key in freed {
            if let Some(queue) = queues.get(key) {
                for waiter in queue {
                    waiter.notify.notify_one();
                }
            }
        }
    }

    /// Number of waiters queued on `key`.
    pub fn waiting(&self, key: &str) -> usize {
        self.lock_queues().get(key).map_or(0, VecDeque::len)
    }

    fn abandon(&self, ticket: u64, keys: &[String]) {
        let mut queues = self.lock_queues();
        remove_ticket(&mut queues, ticket, keys);
    }
}

/// Removes `ticket` from the given queues and wakes whoever is now at the head.
fn remove_ticket(queues: &mut WaitQueues, ticket: u64, keys: &[String]) {
    for key in keys {
        let Some(queue) = queues.get_mut(key) else {
            continue;
        };
        queue.retain(|w| w.ticket != ticket);
        match queue.front() {
            Some(head) => head.notify.notify_one(),
            None => {
                queues.remove(key);
            }
        }
    }
}

/// Queue membership of one pending `acquire_or_wait` call.
struct Registration<'a> {
    controller: &'a AdmissionController,
    run_id: &'a str,
    step_key: &'a str,
    ticket: u64,
    keys: &'a [String],
    active: bool,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.controller.abandon(self.ticket, self.keys);
        WaiterAbandoned {
            run_id: self.run_id,
            step_key: self.step_key,
            ticket: self.ticket,
        }
        .log();
    }
}

/// Slots held by one step. Released explicitly or on drop.
pub struct SlotHandle {
    controller: Arc<AdmissionController>,
    run_id: String,
    step_key: String,
    keys: Vec<String>,
    released: bool,
}

impl SlotHandle {
    fn new(controller: Arc<AdmissionController>, run_id: &str, step_key: &str, keys: Vec<String>) -> Self {
        Self {
            controller,
            run_id: run_id.to_string(),
            step_key: step_key.to_string(),
            keys,
            released: false,
        }
    }

    /// Limited keys this handle holds a slot on.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn release(mut self) -> Result<Vec<String>, ConcurrencyError> {
        self.released = true;
        if self.keys.is_empty() {
            return Ok(Vec::new());
        }
        self.controller.free_step(&self.run_id, &self.step_key)
    }
}

impl Drop for SlotHandle {
    fn drop(&mut self) {
        if self.released || self.keys.is_empty() {
            return;
        }
        if let Err(error) = self.controller.free_step(&self.run_id, &self.step_key) {
            SlotReleaseFailed {
                run_id: &self.run_id,
                step_key: Some(&self.step_key),
                error: &error,
            }
            .log();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::ConcurrencyLedger;
    use std::time::Duration;

    fn controller(limits: &[(&str, i64)]) -> Arc<AdmissionController> {
        let ledger = ConcurrencyLedger::in_memory();
        for (key, limit) in limits {
            ledger.set_concurrency_limit(key, *limit).unwrap();
        }
        Arc::new(AdmissionController::new(Arc::new(ledger)))
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn unlimited_keys_are_not_claimed() {
        let c = controller(&[]);
        let handle = c.acquire_or_wait("r1", "s1", &keys(&["free"])).await.unwrap();
        assert!(handle.keys().is_empty());
        assert!(c.store().get_concurrency_info("free").is_empty());
    }

    #[tokio::test]
    async fn waiter_proceeds_after_release() {
        let c = controller(&[("foo", 1)]);
        let first = c.acquire_or_wait("r1", "a", &keys(&["foo"])).await.unwrap();

        let waiter = {
            let c = c.clone();
            tokio::spawn(async move { c.acquire_or_wait("r2", "a", &keys(&["foo"])).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(c.waiting("foo"), 1);
        assert!(!waiter.is_finished());

        assert_eq!(first.release().unwrap(), vec!["foo"]);
        let second = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(second.keys(), ["foo".to_string()]);
        assert_eq!(c.waiting("foo"), 0);
    }

    #[tokio::test]
    async fn dropping_a_handle_frees_its_slot() {
        let c = controller(&[("foo", 1)]);
        {
            let _held = c.acquire_or_wait("r1", "a", &keys(&["foo"])).await.unwrap();
            assert_eq!(c.store().get_concurrency_info("foo").len(), 1);
        }
        let info = c.store().get_concurrency_info("foo");
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].run_id, None);
        assert_eq!(info[0].count, 1);
    }

    #[tokio::test]
    async fn timed_out_waiter_leaves_no_queue_entry() {
        let c = controller(&[("foo", 1)]);
        let held = c.acquire_or_wait("r1", "a", &keys(&["foo"])).await.unwrap();

        let res = tokio::time::timeout(
            Duration::from_millis(20),
            c.acquire_or_wait("r2", "a", &keys(&["foo"])),
        )
        .await;
        assert!(res.is_err());
        assert_eq!(c.waiting("foo"), 0);

        held.release().unwrap();
        let again = c.acquire_or_wait("r3", "a", &keys(&["foo"])).await.unwrap();
        assert_eq!(again.keys().len(), 1);
    }
}
