use core::fmt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::cookies::Cookie;
use crate::macros::locked;
use crate::requests::HttpRequest;
use crate::response::HttpResponse;

const SESSION_ID_LEN: usize = 24;

/// Values stored for one client session.
///
/// Clones share the same underlying values, so writes made through any handle
/// (including one held by test code) are seen by the next request.
#[derive(Clone)]
pub struct SessionState {
    id: String,
    values: Arc<Mutex<Map<String, Value>>>,
}

impl SessionState {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: Arc::new(Mutex::new(Map::new())),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<Value> {
        locked!(self.values).get(key).cloned()
    }

    /// Reads a value, returning `None` when it is absent or has another shape.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_value(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn set<T: Serialize>(&self, key: &str, value: T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        locked!(self.values).insert(String::from(key), value);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        locked!(self.values).remove(key)
    }

    pub fn clear(&self) {
        locked!(self.values).clear();
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        locked!(self.values).keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        locked!(self.values).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        locked!(self.values).is_empty()
    }

    /// Whether both handles refer to the same stored session.
    #[must_use]
    pub fn same_session(&self, other: &SessionState) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("id", &self.id)
            .field("values", &*locked!(self.values))
            .finish()
    }
}

/// In-memory session store keyed by the session cookie.
pub struct SessionStore {
    cookie_name: String,
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl SessionStore {
    #[must_use]
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Returns the session named by the request's session cookie, or a new,
    /// not yet stored one. A new session is only kept once something has been
    /// written to it; see [`SessionStore::release`].
    pub fn acquire(&self, request: &HttpRequest) -> SessionState {
        let sessions = locked!(self.sessions);
        if let Some(existing) = request
            .cookies()
            .value(&self.cookie_name)
            .and_then(|id| sessions.get(id))
        {
            return existing.clone();
        }
        SessionState::new(new_session_id())
    }

    /// Stores a new session that now holds values and issues its cookie.
    /// Sessions that were never written to are dropped with the request.
    pub fn release(&self, session: &SessionState, response: &HttpResponse) {
        if session.is_empty() {
            return;
        }
        let mut sessions = locked!(self.sessions);
        if sessions.contains_key(session.id()) {
            return;
        }

        tracing::debug!("SessionStore: starting session {}", session.id());
        sessions.insert(String::from(session.id()), session.clone());
        response.append_cookie(
            Cookie::new(self.cookie_name.clone(), session.id())
                .with_path("/")
                .http_only(),
        );
    }

    pub fn abandon(&self, id: &str) -> Option<SessionState> {
        locked!(self.sessions).remove(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        locked!(self.sessions).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        locked!(self.sessions).is_empty()
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("cookie_name", &self.cookie_name)
            .field("sessions", &self.len())
            .finish()
    }
}

fn new_session_id() -> String {
    std::iter::repeat_with(fastrand::alphanumeric)
        .take(SESSION_ID_LEN)
        .collect::<String>()
        .to_ascii_lowercase()
}
