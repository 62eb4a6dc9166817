use reelindex::config::PipelineConfig;
use reelindex::dag::TaskState;
use reelindex::pinecone::{PineconeSettings, PineconeStore};
use reelindex::pipeline;
use reelindex::vector_store::{IndexSpec, Metric, QueryRequest, StoreError, VectorStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "test-key";

fn store_for(server: &MockServer) -> PineconeStore {
    store_with_ready_timeout(server, Duration::from_secs(2))
}

fn store_with_ready_timeout(server: &MockServer, ready_timeout: Duration) -> PineconeStore {
    PineconeStore::new(PineconeSettings {
        api_key: API_KEY.to_string(),
        controller_url: format!("{}/", server.uri()),
        cloud: "aws".to_string(),
        region: "us-east-1".to_string(),
        timeout: Duration::from_secs(5),
        ready_timeout,
        ready_poll: Duration::from_millis(10),
    })
    .unwrap()
}

async fn mount_ready_index(server: &MockServer, name: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/indexes/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": name,
            "dimension": 2,
            "host": server.uri(),
            "status": { "ready": true, "state": "Ready" }
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn create_sends_dimension_and_waits_for_ready() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes"))
        .and(header("Api-Key", API_KEY))
        .and(body_partial_json(json!({
            "name": "movies",
            "dimension": 2,
            "metric": "cosine",
            "spec": { "serverless": { "cloud": "aws", "region": "us-east-1" } }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "name": "movies" })))
        .expect(1)
        .mount(&server)
        .await;
    mount_ready_index(&server, "movies").await;

    let store = store_for(&server);
    store
        .create_index(&IndexSpec {
            name: "movies".into(),
            dimension: 2,
            metric: Metric::Cosine,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn index_that_never_becomes_ready_is_deleted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "name": "movies" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/indexes/movies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "movies",
            "dimension": 2,
            "status": { "ready": false, "state": "Initializing" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/indexes/movies"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let err = store_with_ready_timeout(&server, Duration::from_millis(100))
        .create_index(&IndexSpec {
            name: "movies".into(),
            dimension: 2,
            metric: Metric::Cosine,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotReady(name) if name == "movies"));
}

#[tokio::test]
async fn conflict_maps_to_index_exists() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes"))
        .respond_with(ResponseTemplate::new(409).set_body_string("already exists"))
        .mount(&server)
        .await;

    let err = store_for(&server)
        .create_index(&IndexSpec {
            name: "movies".into(),
            dimension: 2,
            metric: Metric::Cosine,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::IndexExists(name) if name == "movies"));
}

#[tokio::test]
async fn query_uses_data_plane_host() {
    let server = MockServer::start().await;
    mount_ready_index(&server, "movies").await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(body_partial_json(json!({ "topK": 3, "includeValues": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "matches": [
                { "id": "a", "score": 0.99 },
                { "id": "b", "score": 0.5 }
            ],
            "namespace": ""
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = store_for(&server)
        .query(
            "movies",
            &QueryRequest {
                vector: vec![1.0, 0.0],
                top_k: 3,
                include_values: false,
                include_metadata: false,
            },
        )
        .await
        .unwrap();
    let ids: Vec<_> = response.matches.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(response.matches[0].values, None);
}

#[tokio::test]
async fn error_status_carries_body() {
    let server = MockServer::start().await;
    mount_ready_index(&server, "movies").await;
    Mock::given(method("POST"))
        .and(path("/vectors/upsert"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let err = store_for(&server)
        .upsert("movies", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Status { status: 429, ref body } if body == "slow down"));
}

#[tokio::test]
async fn pipeline_deletes_hosted_index_after_failed_upsert() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "name": "testindex" })))
        .expect(1)
        .mount(&server)
        .await;
    mount_ready_index(&server, "testindex").await;
    Mock::given(method("POST"))
        .and(path("/vectors/upsert"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "matches": [] })))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/indexes/testindex"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("moviedata.txt");
    std::fs::write(
        &input,
        "1:::Movie One (2001):::Drama:::A man finds a box.\n2:::Movie Two (2002):::Drama:::A dog finds a bone.\n",
    )
    .unwrap();

    let settings = PipelineConfig {
        input_path: input,
        index_name: "testindex".into(),
        top_k: 10,
        include_values: true,
        include_metadata: true,
        upsert_batch_size: 100,
        metric: Metric::Cosine,
    };
    let report = pipeline::run(settings, Arc::new(store_for(&server)))
        .await
        .unwrap();

    let delete = report.tasks.last().unwrap();
    assert_eq!(delete.id, pipeline::DELETE_INDEX);
    assert_eq!(delete.state, TaskState::Success);
    assert!(!report.succeeded());
}

#[tokio::test]
async fn pipeline_releases_index_that_never_becomes_ready() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "name": "testindex" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/indexes/testindex"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "testindex",
            "status": { "ready": false }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/vectors/upsert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "upsertedCount": 0 })))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/indexes/testindex"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("moviedata.txt");
    std::fs::write(&input, "1:::Movie One (2001):::Drama:::A man finds a box.\n").unwrap();

    let settings = PipelineConfig {
        input_path: input,
        index_name: "testindex".into(),
        top_k: 10,
        include_values: true,
        include_metadata: true,
        upsert_batch_size: 100,
        metric: Metric::Cosine,
    };
    let store = store_with_ready_timeout(&server, Duration::from_millis(100));
    let report = pipeline::run(settings, Arc::new(store)).await.unwrap();

    assert!(matches!(
        report.tasks.iter().find(|t| t.id == pipeline::CREATE_INDEX).map(|t| &t.state),
        Some(TaskState::Failed(_))
    ));
    // The store released the index itself, so the graph teardown never fires.
    let delete = report.tasks.last().unwrap();
    assert_eq!(delete.state, TaskState::Skipped);
}
