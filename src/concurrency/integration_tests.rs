// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::concurrency::{AdmissionController, ConcurrencyLedger, ConcurrencyStore, SlotInfo};

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn num_active(rows: &[SlotInfo]) -> usize {
    rows.iter().filter(|r| r.run_id.is_some()).map(|r| r.count).sum()
}

fn active_run_ids(rows: &[SlotInfo]) -> Vec<String> {
    let mut ids: Vec<String> = rows.iter().filter_map(|r| r.run_id.clone()).collect();
    ids.sort();
    ids.dedup();
    ids
}

#[test]
fn limit_change_while_slot_is_held() {
    let ledger = ConcurrencyLedger::in_memory();
    ledger.set_concurrency_limit("foo", 10).unwrap();
    assert!(ledger
        .claim_concurrency_slots(&keys(&["foo"]), "run1", "step1")
        .unwrap());

    let info = ledger.get_concurrency_info("foo");
    assert_eq!(num_active(&info), 1);
    assert_eq!(active_run_ids(&info), vec!["run1"]);
    assert_eq!(info.iter().map(|r| r.count).sum::<usize>(), 10);

    ledger.set_concurrency_limit("foo", 5).unwrap();
    let info = ledger.get_concurrency_info("foo");
    assert_eq!(num_active(&info), 1);
    assert_eq!(info.iter().map(|r| r.count).sum::<usize>(), 5);

    ledger.free_concurrency_slots("run1", None).unwrap();
    let info = ledger.get_concurrency_info("foo");
    assert_eq!(num_active(&info), 0);
    assert!(active_run_ids(&info).is_empty());
}

#[test]
fn persisted_ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("concurrency.json");

    {
        let ledger = ConcurrencyLedger::open(&path).unwrap();
        ledger.set_concurrency_limit("foo", 2).unwrap();
        ledger.set_concurrency_limit("bar", 1).unwrap();
        assert!(ledger
            .claim_concurrency_slots(&keys(&["foo", "bar"]), "run1", "a")
            .unwrap());
    }

    let reopened = ConcurrencyLedger::open(&path).unwrap();
    assert_eq!(reopened.get_concurrency_limit("foo"), 2);
    assert_eq!(
        reopened.get_concurrency_limited_keys().into_iter().collect::<Vec<_>>(),
        vec!["bar", "foo"]
    );
    assert!(!reopened
        .claim_concurrency_slots(&keys(&["bar"]), "run2", "a")
        .unwrap());

    reopened.free_concurrency_slots("run1", Some("a")).unwrap();
    let again = ConcurrencyLedger::open(&path).unwrap();
    assert_eq!(num_active(&again.get_concurrency_info("bar")), 0);
}

#[test]
fn missing_file_opens_empty() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = ConcurrencyLedger::open(dir.path().join("absent.json")).unwrap();
    assert!(ledger.get_concurrency_limited_keys().is_empty());
}

#[tokio::test]
async fn waiters_are_admitted_in_fifo_order() {
    let ledger = ConcurrencyLedger::in_memory();
    ledger.set_concurrency_limit("foo", 1).unwrap();
    let controller = Arc::new(AdmissionController::new(Arc::new(ledger)));

    let first = controller
        .acquire_or_wait("holder", "s", &keys(&["foo"]))
        .await
        .unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut tasks = Vec::new();
    for i in 0..4 {
        let controller = controller.clone();
        let order = order.clone();
        tasks.push(tokio::spawn(async move {
            let run_id = format!("run{i}");
            let handle = controller
                .acquire_or_wait(&run_id, "s", &keys(&["foo"]))
                .await
                .unwrap();
            order.lock().await.push(i);
            tokio::time::sleep(Duration::from_millis(5)).await;
            handle.release().unwrap();
        }));
        // let each waiter enqueue before the next one is spawned
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(controller.waiting("foo"), 4);

    first.release().unwrap();
    for task in tasks {
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(*order.lock().await, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn limit_is_never_exceeded_under_contention() {
    let ledger = Arc::new(ConcurrencyLedger::in_memory());
    ledger.set_concurrency_limit("foo", 2).unwrap();
    let controller = Arc::new(AdmissionController::new(ledger.clone()));

    let mut tasks = Vec::new();
    for i in 0..12 {
        let controller = controller.clone();
        let ledger = ledger.clone();
        tasks.push(tokio::spawn(async move {
            let handle = controller
                .acquire_or_wait(&format!("run{i}"), "s", &keys(&["foo"]))
                .await
                .unwrap();
            let held = num_active(&ledger.get_concurrency_info("foo"));
            tokio::time::sleep(Duration::from_millis(2)).await;
            handle.release().unwrap();
            held
        }));
    }

    for task in tasks {
        let held = task.await.unwrap();
        assert!(held <= 2, "observed {held} holders");
    }
    assert_eq!(num_active(&ledger.get_concurrency_info("foo")), 0);
}

#[tokio::test]
async fn multi_key_waiters_do_not_deadlock() {
    let ledger = ConcurrencyLedger::in_memory();
    ledger.set_concurrency_limit("a", 1).unwrap();
    ledger.set_concurrency_limit("b", 1).unwrap();
    let controller = Arc::new(AdmissionController::new(Arc::new(ledger)));

    let mut tasks = Vec::new();
    for (i, wanted) in [vec!["a", "b"], vec!["b", "a"], vec!["a"], vec!["b"]]
        .into_iter()
        .enumerate()
    {
        let controller = controller.clone();
        tasks.push(tokio::spawn(async move {
            let handle = controller
                .acquire_or_wait(&format!("run{i}"), "s", &keys(&wanted))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(3)).await;
            handle.release().unwrap();
        }));
    }

    for task in tasks {
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(controller.waiting("a"), 0);
    assert_eq!(controller.waiting("b"), 0);
}

#[tokio::test]
async fn free_run_wakes_waiters_of_every_key() {
    let ledger = ConcurrencyLedger::in_memory();
    ledger.set_concurrency_limit("foo", 1).unwrap();
    let controller = Arc::new(AdmissionController::new(Arc::new(ledger)));

    assert!(controller
        .store()
        .claim_concurrency_slots(&keys(&["foo"]), "run1", "s")
        .unwrap());

    let waiter = {
        let controller = controller.clone();
        tokio::spawn(async move {
            controller
                .acquire_or_wait("run2", "s", &keys(&["foo"]))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(controller.free_run("run1").unwrap(), vec!["foo"]);

    let handle = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(handle.keys().len(), 1);
}

#[tokio::test]
async fn raising_a_limit_admits_waiters() {
    let ledger = ConcurrencyLedger::in_memory();
    ledger.set_concurrency_limit("foo", 1).unwrap();
    let controller = Arc::new(AdmissionController::new(Arc::new(ledger)));

    let _held = controller
        .acquire_or_wait("run1", "s", &keys(&["foo"]))
        .await
        .unwrap();
    let waiter = {
        let controller = controller.clone();
        tokio::spawn(async move {
            controller
                .acquire_or_wait("run2", "s", &keys(&["foo"]))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(controller.waiting("foo"), 1);

    controller.set_concurrency_limit("foo", 2).unwrap();
    let handle = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(handle.keys(), ["foo".to_string()]);
    assert_eq!(controller.waiting("foo"), 0);
}
