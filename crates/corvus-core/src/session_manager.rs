// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use corvus_config::RuntimeMode;
use uuid::Uuid;

use crate::bus::{Event, EventBus, EventType};
use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Thinking,
    ExecutingTools,
    WaitingForChild,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub parent_id: Option<String>,
    pub mode: RuntimeMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: AgentState,
}

/// Owns the session hierarchy and the [`EventBus`] every session publishes
/// to. Enforces the one structural rule the Tool Registry's mode filter
/// already enforces functionally (a child never sees `sub_agent`): no
/// session may have a parent that is itself a child. This is defence in
/// depth, not the primary mechanism -- a bug in registry filtering should
/// not be the only thing standing between this runtime and a grandchild
/// session.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    children: Mutex<HashMap<String, Vec<String>>>,
    bus: EventBus,
}

impl SessionManager {
    pub fn new(event_queue_capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            children: Mutex::new(HashMap::new()),
            bus: EventBus::new(event_queue_capacity),
        }
    }

    pub fn create(&self, parent_id: Option<&str>, mode: RuntimeMode, now: DateTime<Utc>) -> Result<Session, AgentError> {
        if let Some(parent_id) = parent_id {
            let sessions = self.sessions.lock().expect("session map poisoned");
            match sessions.get(parent_id) {
                Some(parent) if parent.parent_id.is_some() => {
                    return Err(AgentError::Invariant(
                        "a child session cannot itself delegate a grandchild session".into(),
                    ));
                }
                Some(_) => {}
                None => {
                    return Err(AgentError::Invariant(format!("unknown parent session {parent_id}")));
                }
            }
        }

        let session = Session {
            id: Uuid::new_v4().to_string(),
            parent_id: parent_id.map(str::to_string),
            mode,
            created_at: now,
            updated_at: now,
            state: AgentState::Idle,
        };

        self.sessions
            .lock()
            .expect("session map poisoned")
            .insert(session.id.clone(), session.clone());
        if let Some(parent_id) = parent_id {
            self.children
                .lock()
                .expect("children map poisoned")
                .entry(parent_id.to_string())
                .or_default()
                .push(session.id.clone());
        }
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.lock().expect("session map poisoned").get(id).cloned()
    }

    pub fn update_state(&self, id: &str, state: AgentState, now: DateTime<Utc>) {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        if let Some(session) = sessions.get_mut(id) {
            session.state = state;
            session.updated_at = now;
        }
        drop(sessions);
        self.bus.publish(Event {
            event_type: EventType::StateChanged(state),
            session_id: id.to_string(),
            timestamp: now,
        });
    }

    pub fn children_of(&self, id: &str) -> Vec<Session> {
        let children = self.children.lock().expect("children map poisoned");
        let sessions = self.sessions.lock().expect("session map poisoned");
        children
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|cid| sessions.get(cid).cloned())
            .collect()
    }

    pub fn publish(&self, event: Event) {
        self.bus.publish(event);
    }

    pub fn subscribe(&self) -> tokio::sync::mpsc::Receiver<crate::bus::BusMessage> {
        self.bus.subscribe()
    }
}
