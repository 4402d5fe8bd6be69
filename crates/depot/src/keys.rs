// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{watch, Mutex};

use crate::response::ResponseOrigin;
use crate::StoreKey;

/// Barrier status for a key. While a write is in flight the barrier is
/// blocked and reader emissions are suppressed; when the write lands the
/// barrier reopens carrying the writer's origin so the re-emitted value can
/// be attributed.
#[derive(Clone, Debug)]
pub(crate) enum BarrierState {
    Allow { version: u64, origin: ResponseOrigin },
    Blocked { version: u64 },
}

impl BarrierState {
    pub(crate) fn version(&self) -> u64 {
        match self {
            BarrierState::Allow { version, .. } | BarrierState::Blocked { version } => *version,
        }
    }
}

/// A queued origin push that has not been acknowledged yet.
#[derive(Clone, Debug)]
pub(crate) struct QueuedWrite<V> {
    /// Enqueue-order stamp; coalescing drops strictly smaller sequences.
    pub(crate) seq: u64,
    pub(crate) value: V,
}

/// Coordination block for a single key.
pub(crate) struct KeyState<V> {
    /// Monotonic write version, incremented by every barrier write.
    pub(crate) version: AtomicU64,
    /// Read/write barrier for source-of-truth access.
    pub(crate) barrier: watch::Sender<BarrierState>,
    /// Serializes source-of-truth writes for the key.
    pub(crate) sot_lock: Mutex<()>,
    /// FIFO of origin pushes awaiting acknowledgement.
    pub(crate) write_queue: Mutex<VecDeque<QueuedWrite<V>>>,
    /// Serializes origin pushes (direct writes and gate replays).
    pub(crate) drive_lock: Mutex<()>,
    /// Source for [`QueuedWrite::seq`]; only advanced under `write_queue`.
    pub(crate) write_seq: AtomicU64,
}

impl<V> KeyState<V> {
    fn new() -> Self {
        let (barrier, _) = watch::channel(BarrierState::Allow {
            version: 0,
            origin: ResponseOrigin::SourceOfTruth,
        });
        Self {
            version: AtomicU64::new(0),
            barrier,
            sot_lock: Mutex::new(()),
            write_queue: Mutex::new(VecDeque::new()),
            drive_lock: Mutex::new(()),
            write_seq: AtomicU64::new(0),
        }
    }
}

/// Lazily-populated map from key to its coordination block.
///
/// Blocks are inserted on first reference and never removed while the engine
/// is alive, so a looked-up block cannot be destroyed under a concurrent
/// task.
pub(crate) struct KeyStates<K, V> {
    states: DashMap<K, Arc<KeyState<V>>>,
}

impl<K: StoreKey, V> KeyStates<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    pub(crate) fn state(&self, key: &K) -> Arc<KeyState<V>> {
        self.states
            .entry(key.clone())
            .or_insert_with(|| Arc::new(KeyState::new()))
            .clone()
    }

    /// All blocks referenced so far, for whole-store operations.
    pub(crate) fn snapshot(&self) -> Vec<Arc<KeyState<V>>> {
        self.states.iter().map(|entry| entry.value().clone()).collect()
    }
}
