// mock_webhook: HTTP double for outbound alert and active-users calls,
// backed by wiremock. Every request is answered with a canned status and
// body and recorded for assertions.

use wiremock::matchers::any;
use wiremock::{Mock, MockServer, ResponseTemplate};

/// One captured HTTP request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

impl RecordedRequest {
    fn from_wiremock(request: &wiremock::Request) -> Self {
        RecordedRequest {
            method: request.method.to_string(),
            path: request.url.path().to_owned(),
            headers: request
                .headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_owned(),
                        value.to_str().unwrap_or_default().to_owned(),
                    )
                })
                .collect(),
            body: serde_json::from_slice(&request.body).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Alert sink double: records every request and answers with a fixed
/// status (200 by default, configurable to exercise failure paths) and
/// body (configurable for active-users shape tests).
///
/// The underlying server shuts down on drop, freeing the port for
/// cache-fallback tests.
pub struct MockWebhookSink {
    server: MockServer,
}

impl MockWebhookSink {
    pub async fn start() -> Self {
        Self::start_with_response(200, r#"{"ok":true}"#.to_owned()).await
    }

    pub async fn start_with_status(status: u16) -> Self {
        Self::start_with_response(status, r#"{"ok":true}"#.to_owned()).await
    }

    /// Fixed status + body for every request, regardless of path.
    pub async fn start_with_response(status: u16, body: String) -> Self {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(status).set_body_raw(body, "application/json"))
            .mount(&server)
            .await;
        MockWebhookSink { server }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.uri(), path)
    }

    /// Captured requests, in arrival order.
    pub async fn received(&self) -> Vec<RecordedRequest> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(RecordedRequest::from_wiremock)
            .collect()
    }

    pub async fn request_count(&self) -> usize {
        self.received().await.len()
    }
}
