// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Concurrency slot ledger.
//!
//! The ledger records a limit per concurrency key and the slots currently held
//! against each key by `(run_id, step_key)` holders. All operations run under a
//! single mutex, so claims and frees are linearizable.
//!
//! # Rules
//! - A claim is all-or-nothing across the keys it names.
//! - A holder owns at most one slot per key; claiming again is a successful no-op.
//! - Lowering a limit never evicts holders. New claims on the key fail until the
//!   held count drains below the new limit.
//! - A limit of 0 clears the key.
//!
//! # Persistence
//! [`ConcurrencyLedger::open`] backs the ledger with a JSON file. Each mutation
//! writes the next state to a temporary file and renames it over the original
//! before the in-memory state is replaced, so a failed write leaves both
//! unchanged.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::errors::ConcurrencyError;
use crate::observability::messages::concurrency::ConcurrencyLimitSet;
use crate::observability::messages::StructuredLog;

/// One row of [`ConcurrencyStore::get_concurrency_info`].
///
/// A row with `run_id: None` carries the free capacity of the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub run_id: Option<String>,
    pub count: usize,
}

/// Storage seam for concurrency limits and held slots.
pub trait ConcurrencyStore: Send + Sync {
    /// Negative limits are rejected; 0 clears the limit.
    fn set_concurrency_limit(&self, key: &str, limit: i64) -> Result<(), ConcurrencyError>;

    /// 0 when the key has no limit.
    fn get_concurrency_limit(&self, key: &str) -> usize;

    /// Claims one slot per key for the holder, or nothing at all.
    ///
    /// Returns `Ok(false)` when any key is at capacity. Never blocks.
    fn claim_concurrency_slots(
        &self,
        keys: &[String],
        run_id: &str,
        step_key: &str,
    ) -> Result<bool, ConcurrencyError>;

    /// Frees every slot of the run, or only those of `step_key`. Returns the keys that lost a holder.
    fn free_concurrency_slots(
        &self,
        run_id: &str,
        step_key: Option<&str>,
    ) -> Result<Vec<String>, ConcurrencyError>;

    fn get_concurrency_info(&self, key: &str) -> Vec<SlotInfo>;

    fn get_concurrency_limited_keys(&self) -> BTreeSet<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SlotHolder {
    run_id: String,
    step_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerState {
    #[serde(default)]
    limits: BTreeMap<String, usize>,
    #[serde(default)]
    slots: BTreeMap<String, Vec<SlotHolder>>,
}

pub struct ConcurrencyLedger {
    state: Mutex<LedgerState>,
    path: Option<PathBuf>,
}

impl ConcurrencyLedger {
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            path: None,
        }
    }

    /// Opens a file-backed ledger. A missing file yields an empty ledger.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConcurrencyError> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                LedgerState::default()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            LedgerState::default()
        };

        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn commit(&self, state: &mut LedgerState, next: LedgerState) -> Result<(), ConcurrencyError> {
        if let Some(path) = &self.path {
            write_snapshot(path, &next)?;
        }
        *state = next;
        Ok(())
    }
}

impl Default for ConcurrencyLedger {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn write_snapshot(path: &Path, state: &LedgerState) -> Result<(), ConcurrencyError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl ConcurrencyStore for ConcurrencyLedger {
    fn set_concurrency_limit(&self, key: &str, limit: i64) -> Result<(), ConcurrencyError> {
        if limit < 0 {
            return Err(ConcurrencyError::InvalidLimit {
                key: key.to_string(),
                limit,
            });
        }
        let limit = limit as usize;

        let mut state = self.lock();
        let mut next = state.clone();
        if limit == 0 {
            next.limits.remove(key);
        } else {
            next.limits.insert(key.to_string(), limit);
        }
        self.commit(&mut state, next)?;

        ConcurrencyLimitSet { key, limit }.log();
        Ok(())
    }

    fn get_concurrency_limit(&self, key: &str) -> usize {
        self.lock().limits.get(key).copied().unwrap_or(0)
    }

    fn claim_concurrency_slots(
        &self,
        keys: &[String],
        run_id: &str,
        step_key: &str,
    ) -> Result<bool, ConcurrencyError> {
        let wanted: BTreeSet<&str> = keys.iter().map(String::as_str).collect();
        let mut state = self.lock();

        let mut to_claim = Vec::new();
        for key in &wanted {
            let limit = *state
                .limits
                .get(*key)
                .ok_or_else(|| ConcurrencyError::UnsetKey {
                    key: key.to_string(),
                })?;
            let holders = state.slots.get(*key).map(Vec::as_slice).unwrap_or(&[]);
            if holders
                .iter()
                .any(|h| h.run_id == run_id && h.step_key == step_key)
            {
                continue;
            }
            if holders.len() >= limit {
                return Ok(false);
            }
            to_claim.push(*key);
        }

        if to_claim.is_empty() {
            return Ok(true);
        }

        let mut next = state.clone();
        for key in to_claim {
            next.slots
                .entry(key.to_string())
                .or_default()
                .push(SlotHolder {
                    run_id: run_id.to_string(),
                    step_key: step_key.to_string(),
                });
        }
        self.commit(&mut state, next)?;
        Ok(true)
    }

    fn free_concurrency_slots(
        &self,
        run_id: &str,
        step_key: Option<&str>,
    ) -> Result<Vec<String>, ConcurrencyError> {
        let mut state = self.lock();
        let mut next = state.clone();
        let mut freed = Vec::new();

        for (key, holders) in next.slots.iter_mut() {
            let before = holders.len();
            holders.retain(|h| {
                !(h.run_id == run_id && step_key.map_or(true, |s| h.step_key == s))
            });
            if holders.len() != before {
                freed.push(key.clone());
            }
        }

        if freed.is_empty() {
            return Ok(freed);
        }
        next.slots.retain(|_, holders| !holders.is_empty());
        self.commit(&mut state, next)?;
        Ok(freed)
    }

    fn get_concurrency_info(&self, key: &str) -> Vec<SlotInfo> {
        let state = self.lock();
        let limit = state.limits.get(key).copied().unwrap_or(0);
        let holders = state.slots.get(key).map(Vec::as_slice).unwrap_or(&[]);

        let mut per_run: Vec<SlotInfo> = Vec::new();
        for holder in holders {
            match per_run
                .iter_mut()
                .find(|row| row.run_id.as_deref() == Some(holder.run_id.as_str()))
            {
                Some(row) => row.count += 1,
                None => per_run.push(SlotInfo {
                    run_id: Some(holder.run_id.clone()),
                    count: 1,
                }),
            }
        }

        let free = limit.saturating_sub(holders.len());
        let mut rows = Vec::with_capacity(per_run.len() + 1);
        if free > 0 {
            rows.push(SlotInfo {
                run_id: None,
                count: free,
            });
        }
        rows.extend(per_run);
        rows
    }

    fn get_concurrency_limited_keys(&self) -> BTreeSet<String> {
        self.lock().limits.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn held(ledger: &ConcurrencyLedger, key: &str) -> usize {
        ledger
            .get_concurrency_info(key)
            .iter()
            .filter(|r| r.run_id.is_some())
            .map(|r| r.count)
            .sum()
    }

    #[test]
    fn limit_lifecycle() {
        let ledger = ConcurrencyLedger::in_memory();
        assert_eq!(ledger.get_concurrency_limit("foo"), 0);

        ledger.set_concurrency_limit("foo", 10).unwrap();
        assert_eq!(ledger.get_concurrency_limit("foo"), 10);
        assert!(ledger.get_concurrency_limited_keys().contains("foo"));

        ledger.set_concurrency_limit("foo", 0).unwrap();
        assert!(ledger.get_concurrency_limited_keys().is_empty());

        let err = ledger.set_concurrency_limit("foo", -1).unwrap_err();
        assert!(matches!(err, ConcurrencyError::InvalidLimit { limit: -1, .. }));
    }

    #[test]
    fn claim_is_all_or_nothing() {
        let ledger = ConcurrencyLedger::in_memory();
        ledger.set_concurrency_limit("a", 2).unwrap();
        ledger.set_concurrency_limit("b", 1).unwrap();

        assert!(ledger.claim_concurrency_slots(&keys(&["b"]), "r1", "s1").unwrap());
        assert!(!ledger
            .claim_concurrency_slots(&keys(&["a", "b"]), "r2", "s1")
            .unwrap());
        assert_eq!(held(&ledger, "a"), 0);
        assert_eq!(held(&ledger, "b"), 1);
    }

    #[test]
    fn unset_key_is_a_structural_error() {
        let ledger = ConcurrencyLedger::in_memory();
        let err = ledger
            .claim_concurrency_slots(&keys(&["nope"]), "r1", "s1")
            .unwrap_err();
        assert!(matches!(err, ConcurrencyError::UnsetKey { .. }));
    }

    #[test]
    fn repeated_claim_by_same_holder_is_idempotent() {
        let ledger = ConcurrencyLedger::in_memory();
        ledger.set_concurrency_limit("foo", 1).unwrap();
        assert!(ledger.claim_concurrency_slots(&keys(&["foo"]), "r1", "s1").unwrap());
        assert!(ledger.claim_concurrency_slots(&keys(&["foo"]), "r1", "s1").unwrap());
        assert_eq!(held(&ledger, "foo"), 1);
    }

    #[test]
    fn free_then_reclaim_and_double_free() {
        let ledger = ConcurrencyLedger::in_memory();
        ledger.set_concurrency_limit("foo", 1).unwrap();
        assert!(ledger.claim_concurrency_slots(&keys(&["foo"]), "r1", "s1").unwrap());
        assert!(!ledger.claim_concurrency_slots(&keys(&["foo"]), "r2", "s1").unwrap());

        assert_eq!(ledger.free_concurrency_slots("r1", None).unwrap(), vec!["foo"]);
        assert!(ledger.free_concurrency_slots("r1", None).unwrap().is_empty());
        assert!(ledger.claim_concurrency_slots(&keys(&["foo"]), "r2", "s1").unwrap());
    }

    #[test]
    fn free_by_step_leaves_sibling_steps() {
        let ledger = ConcurrencyLedger::in_memory();
        ledger.set_concurrency_limit("foo", 3).unwrap();
        ledger.claim_concurrency_slots(&keys(&["foo"]), "r1", "a").unwrap();
        ledger.claim_concurrency_slots(&keys(&["foo"]), "r1", "b").unwrap();

        ledger.free_concurrency_slots("r1", Some("a")).unwrap();
        assert_eq!(
            ledger.get_concurrency_info("foo"),
            vec![
                SlotInfo { run_id: None, count: 2 },
                SlotInfo { run_id: Some("r1".into()), count: 1 },
            ]
        );
    }

    #[test]
    fn lowering_limit_keeps_holders_and_blocks_new_claims() {
        let ledger = ConcurrencyLedger::in_memory();
        ledger.set_concurrency_limit("foo", 3).unwrap();
        for step in ["a", "b", "c"] {
            assert!(ledger.claim_concurrency_slots(&keys(&["foo"]), "r1", step).unwrap());
        }

        ledger.set_concurrency_limit("foo", 1).unwrap();
        assert_eq!(held(&ledger, "foo"), 3);
        assert!(!ledger.claim_concurrency_slots(&keys(&["foo"]), "r2", "x").unwrap());

        ledger.free_concurrency_slots("r1", Some("a")).unwrap();
        ledger.free_concurrency_slots("r1", Some("b")).unwrap();
        assert!(!ledger.claim_concurrency_slots(&keys(&["foo"]), "r2", "x").unwrap());

        ledger.free_concurrency_slots("r1", Some("c")).unwrap();
        assert!(ledger.claim_concurrency_slots(&keys(&["foo"]), "r2", "x").unwrap());
    }
}
