use chrono::Utc;
use portalwatch::error::DeliveryError;
use portalwatch::models::{Record, RecordId};
use portalwatch::services::{NotificationSink, WebhookSink};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record() -> Record {
    Record::new(
        "Bank",
        "Your code is 4821",
        Some("09:00".into()),
        Utc::now(),
        RecordId::from_parts(["Bank", "Your code is 4821", "09:00"]),
        "tabular",
    )
}

#[tokio::test]
async fn webhook_receives_rendered_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_partial_json(serde_json::json!({
            "recipient": "1001",
            "text": "Bank: Your code is 4821",
            "record": { "sender": "Bank", "strategy": "tabular" }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let sink = WebhookSink::new(&format!("{}/hook", server.uri()), "{sender}: {body}", 5).unwrap();
    sink.send("1001", &record()).await.expect("delivered");
}

#[tokio::test]
async fn webhook_error_status_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let sink = WebhookSink::new(&format!("{}/hook", server.uri()), "{body}", 5).unwrap();
    let error = sink.send("1001", &record()).await.unwrap_err();
    assert!(matches!(error, DeliveryError::Rejected(_)), "{error:?}");
}

#[test]
fn webhook_rejects_invalid_url() {
    assert!(WebhookSink::new("not a url", "{body}", 5).is_err());
}
