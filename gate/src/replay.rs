//! Bounded, TTL-pruned replay store: at-most-once `execute` per
//! authorization. The in-memory reference implementation is a FIFO-by-
//! insertion-order map behind a single mutex — correct and cheap enough to
//! run on every hot-path request, per spec §4.6/§5.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use nooterra_pay_core::{RequestBindingMode, ResponseAttestation};

#[derive(Debug, Clone)]
pub struct ReplayRow {
    pub expires_at_ms: i64,
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub body_bytes: Vec<u8>,
    pub signature: ResponseAttestation,
    pub request_binding_mode: RequestBindingMode,
    pub request_binding_sha256: Option<String>,
}

/// Pluggable contract: `get`/`set`/`prune` MUST linearize per key under
/// concurrent access. Alternative stores (e.g. a persistent KV) MUST
/// present the same contract.
pub trait ReplayStore: Send + Sync {
    fn get(&self, key: &str, now_ms: i64) -> Option<ReplayRow>;
    fn set(&self, key: &str, row: ReplayRow, now_ms: i64);
    fn prune(&self, now_ms: i64);
}

struct State {
    rows: HashMap<String, ReplayRow>,
    order: VecDeque<String>,
}

/// The in-memory reference implementation: bounded by `max_keys`, oldest
/// insertion evicted first once over capacity.
pub struct InMemoryReplayStore {
    max_keys: usize,
    state: Mutex<State>,
}

impl InMemoryReplayStore {
    pub fn new(max_keys: usize) -> Self {
        InMemoryReplayStore {
            max_keys,
            state: Mutex::new(State {
                rows: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    fn prune_locked(state: &mut State, max_keys: usize, now_ms: i64) {
        state.rows.retain(|_, row| row.expires_at_ms > now_ms);
        state.order.retain(|k| state.rows.contains_key(k));
        while state.order.len() > max_keys {
            if let Some(oldest) = state.order.pop_front() {
                state.rows.remove(&oldest);
            } else {
                break;
            }
        }
    }
}

impl ReplayStore for InMemoryReplayStore {
    fn get(&self, key: &str, now_ms: i64) -> Option<ReplayRow> {
        let mut state = self.state.lock().expect("replay store mutex poisoned");
        Self::prune_locked(&mut state, self.max_keys, now_ms);
        state.rows.get(key).cloned()
    }

    fn set(&self, key: &str, row: ReplayRow, now_ms: i64) {
        let mut state = self.state.lock().expect("replay store mutex poisoned");
        if !state.rows.contains_key(key) {
            state.order.push_back(key.to_string());
        }
        state.rows.insert(key.to_string(), row);
        Self::prune_locked(&mut state, self.max_keys, now_ms);
    }

    fn prune(&self, now_ms: i64) {
        let mut state = self.state.lock().expect("replay store mutex poisoned");
        Self::prune_locked(&mut state, self.max_keys, now_ms);
    }
}
