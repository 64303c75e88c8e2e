use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use timekeep_core::{
    EntityId, NewTimeEntry, Project, RunningTimer, StartTimerRequest, Task, TimeEntry,
    TimeEntryChanges, TimerStatus,
};

use super::{GatewayError, RemoteGateway, StopOutcome, TimeEntryFilter};

/// Longest server message kept in an error.
const MAX_MESSAGE_LEN: usize = 512;

/// List endpoints answer with a bare array or a paginated envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListBody<T> {
    Bare(Vec<T>),
    Envelope {
        #[serde(alias = "items", alias = "time_entries", alias = "projects", alias = "tasks")]
        data: Vec<T>,
    },
}

impl<T> ListBody<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ListBody::Bare(items) | ListBody::Envelope { data: items } => items,
        }
    }
}

/// `reqwest` implementation of [`RemoteGateway`].
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpGateway {
    /// `api_url` is the server root, `prefix` the versioned path (e.g. `/api/v1`).
    pub fn new(
        api_url: &str,
        prefix: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to build HTTP client: {e}")))?;

        let prefix = prefix.trim_matches('/');
        let root = api_url.trim_end_matches('/');
        let base_url = if prefix.is_empty() {
            root.to_string()
        } else {
            format!("{root}/{prefix}")
        };

        Ok(Self {
            client,
            base_url,
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_error)
    }

    /// Send, require a success status, decode the JSON body.
    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let response = self.send(request).await?;
        let response = ensure_success(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| if e.is_timeout() { GatewayError::Timeout } else { GatewayError::Decode(e.to_string()) })
    }

    async fn fetch_list<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Vec<T>, GatewayError> {
        self.fetch::<ListBody<T>>(request).await.map(ListBody::into_vec)
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Network(err.to_string())
    }
}

async fn ensure_success(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify(status, &body))
}

/// Map a non-success status onto the failure taxonomy.
fn classify(status: StatusCode, body: &str) -> GatewayError {
    let message = error_message(body);
    match status {
        StatusCode::UNAUTHORIZED => GatewayError::Unauthorized,
        StatusCode::NOT_FOUND => GatewayError::NotFound,
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            GatewayError::Validation(message)
        }
        s if s.is_server_error() => GatewayError::Server {
            status: s.as_u16(),
            message,
        },
        s => GatewayError::Unexpected {
            status: s.as_u16(),
            message,
        },
    }
}

/// Pull a human-readable message out of an error body.
fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        ["error", "message", "detail"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
    });

    let mut message = from_json.unwrap_or_else(|| body.trim().to_string());
    if message.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    message
}

/// The finished entry from a stop response, wherever the server put it.
fn stopped_entry(body: &Value) -> Option<TimeEntry> {
    std::iter::once(body)
        .chain(["time_entry", "entry", "data"].iter().filter_map(|key| body.get(*key)))
        .find_map(|candidate| serde_json::from_value(candidate.clone()).ok())
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn timer_status(&self) -> Result<TimerStatus, GatewayError> {
        self.fetch(self.client.get(self.url("timer/status"))).await
    }

    async fn start_timer(&self, request: &StartTimerRequest) -> Result<RunningTimer, GatewayError> {
        self.fetch(self.client.post(self.url("timer/start")).json(request))
            .await
    }

    async fn stop_timer(&self) -> Result<StopOutcome, GatewayError> {
        let response = self.send(self.client.post(self.url("timer/stop"))).await?;
        let status = response.status();

        if status.is_success() {
            let body = response.text().await.map_err(transport_error)?;
            let entry = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|value| stopped_entry(&value));
            return Ok(StopOutcome::Stopped(entry));
        }

        let body = response.text().await.unwrap_or_default();
        match classify(status, &body) {
            GatewayError::NotFound => Ok(StopOutcome::AlreadyStopped),
            GatewayError::Validation(message)
                if status == StatusCode::CONFLICT
                    || message.to_ascii_lowercase().contains("no active timer") =>
            {
                Ok(StopOutcome::AlreadyStopped)
            }
            other => Err(other),
        }
    }

    async fn list_time_entries(&self, filter: &TimeEntryFilter) -> Result<Vec<TimeEntry>, GatewayError> {
        let request = self
            .client
            .get(self.url("time-entries"))
            .query(&filter.query_pairs());
        self.fetch_list(request).await
    }

    async fn get_time_entry(&self, id: EntityId) -> Result<TimeEntry, GatewayError> {
        self.fetch(self.client.get(self.url(&format!("time-entries/{id}"))))
            .await
    }

    async fn create_time_entry(&self, entry: &NewTimeEntry) -> Result<TimeEntry, GatewayError> {
        self.fetch(self.client.post(self.url("time-entries")).json(entry))
            .await
    }

    async fn update_time_entry(
        &self,
        id: EntityId,
        changes: &TimeEntryChanges,
    ) -> Result<TimeEntry, GatewayError> {
        self.fetch(
            self.client
                .put(self.url(&format!("time-entries/{id}")))
                .json(changes),
        )
        .await
    }

    async fn delete_time_entry(&self, id: EntityId) -> Result<(), GatewayError> {
        let response = self
            .send(self.client.delete(self.url(&format!("time-entries/{id}"))))
            .await?;
        ensure_success(response).await.map(|_| ())
    }

    async fn list_projects(&self, status: Option<&str>) -> Result<Vec<Project>, GatewayError> {
        let mut request = self.client.get(self.url("projects"));
        if let Some(status) = status {
            request = request.query(&[("status", status)]);
        }
        self.fetch_list(request).await
    }

    async fn list_tasks(
        &self,
        project_id: Option<EntityId>,
        status: Option<&str>,
    ) -> Result<Vec<Task>, GatewayError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(project_id) = project_id {
            query.push(("project_id", project_id.to_string()));
        }
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }
        self.fetch_list(self.client.get(self.url("tasks")).query(&query))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_joins_root_and_prefix() {
        let gw = HttpGateway::new("http://localhost:8080/", "/api/v1/", "t", Duration::from_secs(1)).unwrap();
        assert_eq!(gw.base_url(), "http://localhost:8080/api/v1");
        assert_eq!(gw.url("/timer/status"), "http://localhost:8080/api/v1/timer/status");

        let bare = HttpGateway::new("http://localhost:8080", "", "t", Duration::from_secs(1)).unwrap();
        assert_eq!(bare.url("projects"), "http://localhost:8080/projects");
    }

    #[test]
    fn classify_covers_the_taxonomy() {
        assert_eq!(classify(StatusCode::UNAUTHORIZED, ""), GatewayError::Unauthorized);
        assert_eq!(classify(StatusCode::NOT_FOUND, ""), GatewayError::NotFound);
        assert_eq!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, r#"{"error":"end before start"}"#),
            GatewayError::Validation("end before start".into())
        );
        assert_eq!(
            classify(StatusCode::BAD_GATEWAY, "upstream down"),
            GatewayError::Server {
                status: 502,
                message: "upstream down".into()
            }
        );
        assert!(matches!(
            classify(StatusCode::IM_A_TEAPOT, ""),
            GatewayError::Unexpected { status: 418, .. }
        ));
    }

    #[test]
    fn long_messages_are_truncated_on_char_boundaries() {
        let body = "é".repeat(MAX_MESSAGE_LEN);
        let message = error_message(&body);
        assert!(message.len() <= MAX_MESSAGE_LEN);
        assert!(message.chars().all(|c| c == 'é'));
    }

    #[test]
    fn stopped_entry_is_found_in_envelopes() {
        let entry = serde_json::json!({
            "id": 5, "project_id": 7, "start_time": "2026-03-02T09:00:00Z",
            "end_time": "2026-03-02T10:00:00Z", "duration_seconds": 3600
        });
        assert!(stopped_entry(&entry).is_some());
        assert!(stopped_entry(&serde_json::json!({"message": "ok", "time_entry": entry})).is_some());
        assert!(stopped_entry(&serde_json::json!({"message": "ok"})).is_none());
    }

    #[test]
    fn list_bodies_accept_bare_and_enveloped_arrays() {
        let bare: ListBody<Project> =
            serde_json::from_str(r#"[{"id":1,"name":"A"}]"#).unwrap();
        assert_eq!(bare.into_vec().len(), 1);

        let wrapped: ListBody<Project> =
            serde_json::from_str(r#"{"items":[{"id":1,"name":"A"},{"id":2,"name":"B"}],"page":1}"#).unwrap();
        assert_eq!(wrapped.into_vec().len(), 2);
    }
}
