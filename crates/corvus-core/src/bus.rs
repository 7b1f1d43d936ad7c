// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::session_manager::AgentState;

/// The payload half of an [`Event`]. Deliberately flatter than the teacher's
/// old text/thinking-delta renderer feed -- this is a session lifecycle
/// stream for observers (logging, a TUI, a test harness), not a token-level
/// rendering protocol.
#[derive(Debug, Clone)]
pub enum EventType {
    StateChanged(AgentState),
    ToolCallStarted { call_id: String, tool_name: String },
    ToolCallFinished { call_id: String, tool_name: String, is_error: bool },
    DelegationStarted { child_session_id: String },
    DelegationEnded { child_session_id: String },
    AssistantText(String),
    UserInput(String),
}

#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

/// What a dropped subscriber receives in place of the events it missed, so
/// it can tell "nothing happened" apart from "I fell behind and must
/// resubscribe to recover".
#[derive(Debug, Clone)]
pub enum BusMessage {
    Event(Event),
    Overflow,
}

/// Best-effort fan-out to every subscriber, each with its own bounded queue.
/// A subscriber that cannot keep up is dropped after one `Overflow` notice
/// rather than slowing down -- or blocking -- publication for everyone else.
/// Publication is synchronous (`try_send` only); the bus never awaits.
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::Sender<BusMessage>>>,
    queue_capacity: usize,
}

impl EventBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self { subscribers: Mutex::new(Vec::new()), queue_capacity }
    }

    pub fn subscribe(&self) -> mpsc::Receiver<BusMessage> {
        let (tx, rx) = mpsc::channel(self.queue_capacity.max(1));
        self.subscribers.lock().expect("event bus mutex poisoned").push(tx);
        rx
    }

    pub fn publish(&self, event: Event) {
        let mut subs = self.subscribers.lock().expect("event bus mutex poisoned");
        subs.retain(|tx| match tx.try_send(BusMessage::Event(event.clone())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = tx.try_send(BusMessage::Overflow);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("event bus mutex poisoned").len()
    }
}
