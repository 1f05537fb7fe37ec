//! HTTP transport for the hosted real-time database.
//!
//! The remote exposes a REST surface where each collection is a JSON map
//! of record id → record:
//!
//! ```text
//! GET    {database_url}/{project}/challenges.json?auth={key}
//! PUT    {database_url}/{project}/challenges.json?auth={key}
//! PUT    {database_url}/{project}/challenges/{id}.json?auth={key}
//! DELETE {database_url}/{project}/challenges/{id}.json?auth={key}
//! PUT    {database_url}/{project}/sessions/{id}.json?auth={key}
//! ```
//!
//! Subscriptions use the same endpoints with `Accept: text/event-stream`:
//! the server sends an initial `put` of the whole collection, then
//! incremental `put`/`patch` frames as records change. The subscription
//! task mirrors those frames into a cached map and hands the full
//! collection to the callback after every change.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::sse::{SseEvent, SseParser};
use super::{RemoteStore, SnapshotCallback, SubscriptionHandle};
use crate::models::{Challenge, Session};

const CHALLENGES_PATH: &str = "challenges";
const SESSIONS_PATH: &str = "sessions";

pub struct HttpRemote {
    client: reqwest::Client,
    /// `{database_url}/{project_id}`, no trailing slash.
    base_url: String,
    api_key: String,
    reconnect_delay: Duration,
}

impl HttpRemote {
    pub fn new(
        database_url: &str,
        project_id: &str,
        api_key: &str,
        reconnect_delay: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: format!("{}/{}", database_url.trim_end_matches('/'), project_id),
            api_key: api_key.to_string(),
            reconnect_delay,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json?auth={}", self.base_url, path, self.api_key)
    }

    fn record_path(collection: &str, id: &str) -> String {
        format!("{}/{}", collection, urlencoding::encode(id))
    }

    async fn fetch_collection<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        let map: Option<HashMap<String, T>> = self
            .client
            .get(self.url(collection))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("unexpected {collection} payload"))?;
        Ok(map.map(|m| m.into_values().collect()).unwrap_or_default())
    }

    async fn put_value<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> Result<()> {
        self.client
            .put(self.url(path))
            .json(value)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete_path(&self, path: &str) -> Result<()> {
        self.client
            .delete(self.url(path))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn spawn_subscription<T>(
        &self,
        collection: &'static str,
        callback: SnapshotCallback<T>,
    ) -> SubscriptionHandle
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let client = self.client.clone();
        let url = self.url(collection);
        let reconnect_delay = self.reconnect_delay;

        let task = tokio::spawn(async move {
            loop {
                if let Err(e) = stream_once(&client, &url, &callback).await {
                    tracing::warn!("{collection} subscription dropped: {e}");
                }
                tokio::time::sleep(reconnect_delay).await;
            }
        });
        SubscriptionHandle::new(task)
    }
}

/// One streaming connection: runs until the server closes it or a frame
/// cannot be applied (the caller reconnects, getting a fresh full `put`).
async fn stream_once<T>(
    client: &reqwest::Client,
    url: &str,
    callback: &SnapshotCallback<T>,
) -> Result<()>
where
    T: DeserializeOwned + Clone,
{
    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await?
        .error_for_status()?;

    let mut cache: HashMap<String, T> = HashMap::new();
    let mut parser = SseParser::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("stream read failed")?;
        for event in parser.push(&String::from_utf8_lossy(&chunk)) {
            if apply_stream_event(&mut cache, &event)? {
                callback(cache.values().cloned().collect());
            }
        }
    }
    bail!("stream ended")
}

/// The JSON payload inside `put`/`patch` frames.
#[derive(Deserialize)]
struct StreamPayload {
    path: String,
    data: serde_json::Value,
}

/// Mirror one stream frame into the cached collection map. Returns
/// whether the cache changed; errors force a reconnect.
fn apply_stream_event<T>(cache: &mut HashMap<String, T>, event: &SseEvent) -> Result<bool>
where
    T: DeserializeOwned,
{
    match event.event.as_str() {
        "put" | "patch" => {}
        "keep-alive" => return Ok(false),
        "cancel" | "auth_revoked" => bail!("server revoked the stream ({})", event.event),
        other => {
            tracing::debug!("ignoring stream event {other}");
            return Ok(false);
        }
    }

    let payload: StreamPayload =
        serde_json::from_str(&event.data).context("malformed stream payload")?;

    if payload.path == "/" {
        if event.event == "put" {
            *cache = decode_map(payload.data)?;
        } else {
            for (id, value) in decode_map(payload.data)? {
                cache.insert(id, value);
            }
        }
        return Ok(true);
    }

    // "/{id}" — a single-record update
    let id = payload.path.trim_start_matches('/');
    if id.is_empty() || id.contains('/') {
        // A sub-record path cannot be applied to a whole-record cache;
        // reconnecting yields a fresh full snapshot.
        bail!("unsupported stream path {:?}", payload.path);
    }
    if payload.data.is_null() {
        Ok(cache.remove(id).is_some())
    } else {
        let record: T = serde_json::from_value(payload.data).context("malformed stream record")?;
        cache.insert(id.to_string(), record);
        Ok(true)
    }
}

fn decode_map<T: DeserializeOwned>(data: serde_json::Value) -> Result<HashMap<String, T>> {
    if data.is_null() {
        return Ok(HashMap::new());
    }
    serde_json::from_value(data).context("malformed collection payload")
}

#[async_trait]
impl RemoteStore for HttpRemote {
    fn backend_name(&self) -> &str {
        "http"
    }

    async fn fetch_challenges(&self) -> Result<Vec<Challenge>> {
        self.fetch_collection(CHALLENGES_PATH).await
    }

    async fn fetch_sessions(&self) -> Result<Vec<Session>> {
        self.fetch_collection(SESSIONS_PATH).await
    }

    async fn put_challenges(&self, challenges: &[Challenge]) -> Result<()> {
        let map: HashMap<&str, &Challenge> =
            challenges.iter().map(|c| (c.id.as_str(), c)).collect();
        self.put_value(CHALLENGES_PATH, &map).await
    }

    async fn put_challenge(&self, challenge: &Challenge) -> Result<()> {
        self.put_value(&Self::record_path(CHALLENGES_PATH, &challenge.id), challenge)
            .await
    }

    async fn delete_challenge(&self, id: &str) -> Result<()> {
        self.delete_path(&Self::record_path(CHALLENGES_PATH, id)).await
    }

    async fn put_sessions(&self, sessions: &[Session]) -> Result<()> {
        let map: HashMap<&str, &Session> = sessions.iter().map(|s| (s.id.as_str(), s)).collect();
        self.put_value(SESSIONS_PATH, &map).await
    }

    async fn put_session(&self, session: &Session) -> Result<()> {
        self.put_value(&Self::record_path(SESSIONS_PATH, &session.id), session)
            .await
    }

    fn subscribe_challenges(&self, callback: SnapshotCallback<Challenge>) -> SubscriptionHandle {
        self.spawn_subscription(CHALLENGES_PATH, callback)
    }

    fn subscribe_sessions(&self, callback: SnapshotCallback<Session>) -> SubscriptionHandle {
        self.spawn_subscription(SESSIONS_PATH, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_event(path: &str, data: &str) -> SseEvent {
        SseEvent {
            event: "put".to_string(),
            data: format!(r#"{{"path":"{path}","data":{data}}}"#),
        }
    }

    #[test]
    fn test_apply_initial_full_put() {
        let mut cache: HashMap<String, u32> = HashMap::new();
        let changed =
            apply_stream_event(&mut cache, &put_event("/", r#"{"a": 1, "b": 2}"#)).unwrap();
        assert!(changed);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache["a"], 1);
    }

    #[test]
    fn test_apply_full_put_null_clears() {
        let mut cache: HashMap<String, u32> = HashMap::from([("a".to_string(), 1)]);
        let changed = apply_stream_event(&mut cache, &put_event("/", "null")).unwrap();
        assert!(changed);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_apply_single_record_put_and_delete() {
        let mut cache: HashMap<String, u32> = HashMap::new();
        assert!(apply_stream_event(&mut cache, &put_event("/c1", "7")).unwrap());
        assert_eq!(cache["c1"], 7);

        assert!(apply_stream_event(&mut cache, &put_event("/c1", "null")).unwrap());
        assert!(cache.is_empty());

        // Deleting an id we never had is not a change
        assert!(!apply_stream_event(&mut cache, &put_event("/ghost", "null")).unwrap());
    }

    #[test]
    fn test_apply_patch_merges() {
        let mut cache: HashMap<String, u32> = HashMap::from([("a".to_string(), 1)]);
        let event = SseEvent {
            event: "patch".to_string(),
            data: r#"{"path":"/","data":{"b": 2}}"#.to_string(),
        };
        assert!(apply_stream_event(&mut cache, &event).unwrap());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache["a"], 1);
    }

    #[test]
    fn test_keep_alive_is_not_a_change() {
        let mut cache: HashMap<String, u32> = HashMap::new();
        let event = SseEvent {
            event: "keep-alive".to_string(),
            data: "null".to_string(),
        };
        assert!(!apply_stream_event(&mut cache, &event).unwrap());
    }

    #[test]
    fn test_revocation_errors_out() {
        let mut cache: HashMap<String, u32> = HashMap::new();
        let event = SseEvent {
            event: "auth_revoked".to_string(),
            data: "null".to_string(),
        };
        assert!(apply_stream_event(&mut cache, &event).is_err());
    }

    #[test]
    fn test_nested_path_forces_reconnect() {
        let mut cache: HashMap<String, u32> = HashMap::new();
        assert!(apply_stream_event(&mut cache, &put_event("/c1/field", "1")).is_err());
    }

    #[test]
    fn test_challenge_records_decode_from_stream() {
        let mut cache: HashMap<String, Challenge> = HashMap::new();
        let data = r#"{
            "c1": {"id": "c1", "text": "Make your bed", "iconUrl": "🛏️",
                   "createdAt": "2024-01-15T08:00:00Z", "order": 1}
        }"#;
        assert!(apply_stream_event(&mut cache, &put_event("/", data)).unwrap());
        assert_eq!(cache["c1"].text, "Make your bed");
    }

    #[test]
    fn test_url_shape() {
        let remote =
            HttpRemote::new("https://db.example.com/", "stride-prod", "k3y", Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            remote.url("challenges"),
            "https://db.example.com/stride-prod/challenges.json?auth=k3y"
        );
        assert_eq!(
            remote.url(&HttpRemote::record_path("sessions", "s 1")),
            "https://db.example.com/stride-prod/sessions/s%201.json?auth=k3y"
        );
    }
}
