use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::attendance::domain::attendance_backend::{AttendanceBackend, BackendError};
use crate::attendance::domain::attendance_record::{AttendancePayload, AttendanceRecord};
use crate::session::domain::session_state::{SessionState, StopReason};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct StopBody {
    reason: StopReason,
}

/// Attendance backend over JSON/HTTP, bound to one session.
///
/// Endpoints, relative to `{base_url}/sessions/{session_id}`:
/// `POST /attendance` (submit), `GET /attendance` (roster),
/// `POST /heartbeat`, `POST /stop`.
pub struct HttpAttendanceBackend {
    client: Client,
    session_url: String,
    access_token: Option<String>,
}

impl HttpAttendanceBackend {
    pub fn new(
        base_url: &str,
        session_id: &str,
        access_token: Option<String>,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            session_url: format!("{}/sessions/{}", base_url.trim_end_matches('/'), session_id),
            access_token,
        })
    }

    /// Binds to the session described by `state`, authenticating with its
    /// access token when one is set.
    pub fn for_session(base_url: &str, state: &SessionState) -> Result<Self, BackendError> {
        Self::new(base_url, &state.session_id, state.access_token.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.session_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<String, BackendError> {
        let url = self.url(path);
        let body = serde_json::to_vec(body)?;
        let request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        self.send(url, request)
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let url = self.url(path);
        let request = self.client.get(&url);
        let text = self.send(url, request)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn send(&self, url: String, request: RequestBuilder) -> Result<String, BackendError> {
        let response = self
            .authorized(request)
            .send()
            .map_err(|e| BackendError::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().map_err(|e| BackendError::Transport {
            url: url.clone(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(BackendError::Status {
                url,
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

impl AttendanceBackend for HttpAttendanceBackend {
    fn submit(&self, payload: &AttendancePayload) -> Result<AttendanceRecord, BackendError> {
        let text = self.post("attendance", payload)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn fetch_roster(&self) -> Result<Vec<AttendanceRecord>, BackendError> {
        self.get("attendance")
    }

    fn notify_stop(&self, reason: StopReason) -> Result<(), BackendError> {
        self.post("stop", &StopBody { reason }).map(|_| ())
    }

    fn heartbeat(&self) -> Result<(), BackendError> {
        self.post("heartbeat", &serde_json::json!({})).map(|_| ())
    }
}
