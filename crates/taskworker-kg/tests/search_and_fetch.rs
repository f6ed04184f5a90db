use std::time::Duration;

use taskworker_envelope::{Envelope, RetryPolicy};
use taskworker_kg::KgClient;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(base_url: String, server_uri: &str) -> KgClient {
    let envelope = Envelope::new(
        reqwest::Client::new(),
        RetryPolicy::new(2, 0.01),
        Duration::from_secs(5),
        5,
        Duration::from_secs(60),
    );
    KgClient::new(
        envelope,
        base_url,
        format!("{server_uri}/sparql"),
        format!("{server_uri}/pageviews"),
        "taskworker/0.1 (test)",
        "en",
    )
}

#[tokio::test]
async fn search_returns_candidate_ids() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("action", "wbsearchentities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "search": [{"id": "Q42"}, {"id": "Q1"}]
        })))
        .mount(&server)
        .await;

    let client = client(server.uri(), &server.uri());
    let ids = client.search("Douglas Adams", 5).await.unwrap();
    assert_eq!(ids, vec!["Q42".to_string(), "Q1".to_string()]);
}

#[tokio::test]
async fn fetch_batch_parses_instance_of() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("action", "wbgetentities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "entities": {
                "Q42": {
                    "labels": {"en": {"value": "Douglas Adams"}},
                    "descriptions": {"en": {"value": "writer"}},
                    "claims": {
                        "P31": [{"mainsnak": {"datavalue": {"value": {"id": "Q5"}}}}]
                    },
                    "sitelinks": {"enwiki": {}}
                }
            }
        })))
        .mount(&server)
        .await;

    let client = client(server.uri(), &server.uri());
    let entities = client.fetch_batch(&["Q42".to_string()]).await.unwrap();
    let entity = entities.get("Q42").unwrap();
    assert_eq!(entity.label, "Douglas Adams");
    assert_eq!(entity.instance_of, vec!["Q5".to_string()]);
}

#[tokio::test]
async fn inbound_links_defaults_to_zero_on_failure() {
    let server = MockServer::start().await;
    // No mock mounted for /sparql: the request 404s, and inbound_links must
    // swallow it rather than propagate.
    let client = client(server.uri(), &server.uri());
    assert_eq!(client.inbound_links("Q42").await, 0);
}
