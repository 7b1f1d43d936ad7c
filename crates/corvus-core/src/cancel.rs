// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// A single cancellation signal for one agent run. Cheap to clone --
/// clones share the same underlying flag. Cancelling a token also cancels
/// every token linked to it via [`CancelToken::link_child`], which is how a
/// parent's cancellation propagates down through `sub_agent` delegation
/// without either side polling the other.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    flag: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<CancelToken>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                notify: Notify::new(),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Mark this token cancelled and cascade to every linked child.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        let children = self.inner.children.lock().expect("cancel token mutex poisoned");
        for child in children.iter() {
            child.cancel();
        }
    }

    /// Resolves immediately if already cancelled; otherwise waits for
    /// [`Self::cancel`].
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.notify.notified().await;
    }

    /// Register `child` so a future call to `cancel()` on `self` also
    /// cancels `child`. Used when spawning a delegated sub-agent.
    pub fn link_child(&self, child: CancelToken) {
        if self.is_cancelled() {
            child.cancel();
            return;
        }
        self.inner.children.lock().expect("cancel token mutex poisoned").push(child);
    }
}
