//! Cookie parsing and signed server-side sessions.
//!
//! # Data Flow
//! ```text
//! Cookie header
//!     → cookie_parser (Cookies extension, signature checks against the secret)
//!     → session_middleware
//!         signed "sid" cookie → existing record in SessionStore
//!         otherwise           → fresh uuid session
//!     → handler (Extension<Session>)
//!     → Set-Cookie for new sessions that stored data
//! ```
//!
//! # Design Decisions
//! - Cookie value is `<id>.<hex hmac-sha256(id)>`
//! - Sessions that never store anything are not persisted
//! - Expired records are dropped when looked up and when new sessions start

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use cookie::Cookie;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;

use crate::config::SessionConfig;

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str) -> Option<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes()).ok()
}

/// `value.signature`, or `None` if no MAC could be keyed.
pub fn sign(value: &str, secret: &str) -> Option<String> {
    let mut mac = mac(secret)?;
    mac.update(value.as_bytes());
    Some(format!("{value}.{}", hex::encode(mac.finalize().into_bytes())))
}

/// The value of a signed cookie if its signature checks out.
pub fn unsign<'a>(signed: &'a str, secret: &str) -> Option<&'a str> {
    let (value, signature) = signed.rsplit_once('.')?;
    let signature = hex::decode(signature).ok()?;
    let mut mac = mac(secret)?;
    mac.update(value.as_bytes());
    mac.verify_slice(&signature).ok()?;
    Some(value)
}

/// Request cookies.
#[derive(Debug, Clone, Default)]
pub struct Cookies {
    values: HashMap<String, String>,
    secret: Option<Arc<str>>,
}

impl Cookies {
    pub fn from_headers(headers: &HeaderMap, secret: Option<Arc<str>>) -> Self {
        let mut values = HashMap::new();
        let cookies = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|header| header.to_str().ok())
            .flat_map(Cookie::split_parse_encoded)
            .filter_map(Result::ok);
        for cookie in cookies {
            values
                .entry(cookie.name().to_string())
                .or_insert_with(|| cookie.value_trimmed().to_string());
        }
        Self { values, secret }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// A cookie's value after verifying its signature.
    pub fn signed(&self, name: &str) -> Option<&str> {
        let secret = self.secret.as_deref()?;
        unsign(self.get(name)?, secret)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Parse the `Cookie` header into a `Cookies` extension.
pub async fn cookie_parser(State(secret): State<Option<Arc<str>>>, mut request: Request, next: Next) -> Response {
    let cookies = Cookies::from_headers(request.headers(), secret);
    request.extensions_mut().insert(cookies);
    next.run(request).await
}

#[derive(Debug)]
struct SessionRecord {
    data: HashMap<String, Value>,
    expires_at: Instant,
}

/// In-memory session storage.
#[derive(Debug, Clone)]
pub struct SessionStore {
    records: Arc<DashMap<String, SessionRecord>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            ttl,
        }
    }

    fn exists(&self, id: &str) -> bool {
        let expired = match self.records.get(id) {
            Some(record) => record.expires_at <= Instant::now(),
            None => return false,
        };
        if expired {
            self.records.remove(id);
        }
        !expired
    }

    fn touch(&self, id: &str) {
        if let Some(mut record) = self.records.get_mut(id) {
            record.expires_at = Instant::now() + self.ttl;
        }
    }

    /// Drop every expired record.
    pub fn purge_expired(&self) -> usize {
        let before = self.records.len();
        let now = Instant::now();
        self.records.retain(|_, record| record.expires_at > now);
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The current request's session.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    store: SessionStore,
    is_new: bool,
    modified: Arc<AtomicBool>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let record = self.store.records.get(&self.id)?;
        let value = record.data.get(key)?.clone();
        serde_json::from_value(value).ok()
    }

    pub fn insert<T: Serialize>(&self, key: &str, value: T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        let ttl = self.store.ttl;
        self.store
            .records
            .entry(self.id.clone())
            .or_insert_with(|| SessionRecord {
                data: HashMap::new(),
                expires_at: Instant::now() + ttl,
            })
            .data
            .insert(key.to_string(), value);
        self.modified.store(true, Ordering::Release);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = self.store.records.get_mut(&self.id)?.data.remove(key);
        self.modified.store(true, Ordering::Release);
        removed
    }

    /// Delete the session and all its data.
    pub fn destroy(&self) {
        self.store.records.remove(&self.id);
    }
}

/// Everything the session middleware needs.
#[derive(Debug, Clone)]
pub struct SessionState {
    store: SessionStore,
    secret: Arc<str>,
    cookie_name: String,
    max_age: Duration,
}

impl SessionState {
    pub fn new(config: &SessionConfig) -> Self {
        let max_age = Duration::from_secs(config.max_age_secs);
        Self {
            store: SessionStore::new(max_age),
            secret: Arc::from(config.secret.as_str()),
            cookie_name: config.cookie_name.clone(),
            max_age,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    fn session_for(&self, request: &Request) -> Session {
        let parsed;
        let cookies = match request.extensions().get::<Cookies>() {
            Some(cookies) => cookies,
            None => {
                parsed = Cookies::from_headers(request.headers(), None);
                &parsed
            }
        };
        let existing = cookies
            .get(&self.cookie_name)
            .and_then(|raw| unsign(raw, &self.secret))
            .filter(|id| self.store.exists(id));

        match existing {
            Some(id) => {
                self.store.touch(id);
                Session {
                    id: id.to_string(),
                    store: self.store.clone(),
                    is_new: false,
                    modified: Arc::new(AtomicBool::new(false)),
                }
            }
            None => {
                let purged = self.store.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Expired sessions removed");
                }
                Session {
                    id: uuid::Uuid::new_v4().simple().to_string(),
                    store: self.store.clone(),
                    is_new: true,
                    modified: Arc::new(AtomicBool::new(false)),
                }
            }
        }
    }

    fn set_cookie(&self, id: &str) -> Option<HeaderValue> {
        let value = sign(id, &self.secret)?;
        let max_age = i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX);
        let cookie = Cookie::build((self.cookie_name.as_str(), value))
            .path("/")
            .http_only(true)
            .max_age(cookie::time::Duration::seconds(max_age))
            .build();
        HeaderValue::from_str(&cookie.encoded().to_string()).ok()
    }
}

/// Attach a `Session` to every request.
pub async fn session_middleware(State(state): State<Arc<SessionState>>, mut request: Request, next: Next) -> Response {
    let session = state.session_for(&request);
    request.extensions_mut().insert(session.clone());

    let mut response = next.run(request).await;

    let persisted = session.modified.load(Ordering::Acquire) && state.store.records.contains_key(&session.id);
    if session.is_new && persisted {
        if let Some(cookie) = state.set_cookie(&session.id) {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
    }
    response
}
