// relay-test-utils: test doubles for the relay integration suites.
//
// MockUpstreamServer plays the upstream event source over a real
// WebSocket; MockWebhookSink captures outbound alert HTTP. Both bind
// 127.0.0.1:0 so every test gets an isolated instance.

pub mod fixtures;
pub mod mock_upstream;
pub mod mock_webhook;

pub use mock_upstream::{MockUpstreamServer, UpstreamServerOptions};
pub use mock_webhook::{MockWebhookSink, RecordedRequest};
