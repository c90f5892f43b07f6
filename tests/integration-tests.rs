use axum::body::Body;
use axum::routing::get;
use axum::{Json, Router};
use http_body_util::BodyExt;
use hyper::{body::Incoming, Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use serde_json::{json, Value};
use sqlx::postgres::PgConnectOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{core::WaitFor, runners::AsyncRunner, ContainerAsync, GenericImage, ImageExt};

use template_catalog::store::{CatalogStore, PgStore};
use template_catalog::upstream::UpstreamClient;
use template_catalog::{create_app, AppState};

const DB_NAME: &str = "postgres";
const DB_USER: &str = "postgres";
const DB_PASSWORD: &str = "postgres";

type TestClient = hyper_util::client::legacy::Client<HttpConnector, Body>;

/// The container needs to stay alive for the duration of the test.
/// We will return the container along with the connection details.
async fn setup_postgres_test_container() -> (ContainerAsync<GenericImage>, String, u16) {
    println!("        \x1b[93mSetup:\x1b[0m Spinning up test Postgres database.");

    let container = GenericImage::new("postgres", "16.3")
        .with_wait_for(WaitFor::message_on_stdout(
            "database system is ready to accept connections",
        ))
        .with_wait_for(WaitFor::seconds(1))
        .with_env_var("POSTGRES_DB".to_string(), DB_NAME)
        .with_env_var("POSTGRES_USER".to_string(), DB_USER)
        .with_env_var("POSTGRES_PASSWORD".to_string(), DB_PASSWORD)
        .start()
        .await
        .expect("Failed to start Postgres");

    println!("        \x1b[93mSetup:\x1b[0m Postgres container created and ready.");

    let host = container.get_host().await.expect("Get postgres host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Get mapped postgres port");

    (container, host.to_string(), port)
}

/// Stands in for the remote catalog. Template "201" has details; "202" only
/// exists in the listing, so refreshing it has to fall back.
async fn spawn_fake_upstream() -> SocketAddr {
    let app = Router::new()
        .route(
            "/subspecialty",
            get(|| async {
                Json(json!({"SUCCESS": true, "DATA": [
                    {"code": "CA", "shortName": "Cardiac", "name": "Cardiac Imaging"},
                    {"code": "CH", "shortName": "Chest", "name": "Chest Radiology"},
                    {"code": "CT", "shortName": "CT", "name": "Computed Tomography"}
                ]}))
            }),
        )
        .route(
            "/templates",
            get(|| async {
                Json(json!({"SUCCESS": true, "DATA": [
                    {"template_id": "201", "template_version": "1", "title": "Coronary CTA",
                     "specialty": "Cardiac CT", "specCode": "CA,CT", "views": 900, "downloads": 40,
                     "created": "2014-02-11 08:00:00"},
                    {"template_id": "202", "template_version": "3", "title": "Chest CT",
                     "specialty": "Chest CT", "specCode": "CH, CT ,ZZ", "views": "450",
                     "author": "William Brown", "firstname": "William", "lastname": "Brown"},
                    {"template_id": "203", "title": "Lung Screening", "specialty": "Chest",
                     "specCode": "CH", "views": 10}
                ]}))
            }),
        )
        .route(
            "/templates/201/details",
            get(|| async {
                Json(json!({"SUCCESS": true, "DATA": {
                    "templateData": "<html>coronary</html>",
                    "description": "Coronary CT angiography"
                }}))
            }),
        );

    let listener = tokio::net::TcpListener::bind("localhost:0").await.unwrap();
    let addr = listener.local_addr().expect("Get fake upstream address");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("start fake upstream") });
    addr
}

async fn create_test_instance() -> (ContainerAsync<GenericImage>, SocketAddr, PgStore) {
    let (pg_instance, host, port) = setup_postgres_test_container().await;

    let connect_settings = PgConnectOptions::new()
        .host(&host)
        .port(port)
        .username(DB_USER)
        .password(DB_PASSWORD)
        .database(DB_NAME);

    let pool = sqlx::PgPool::connect_with(connect_settings)
        .await
        .expect("Get postgres pool");

    println!("        \x1b[93mSetup:\x1b[0m Migrating database.");
    sqlx::migrate!().run(&pool).await.expect("Migrate database"); // defaults to "./migrations"

    let upstream_addr = spawn_fake_upstream().await;
    let upstream = UpstreamClient::new(&format!("http://{upstream_addr}"), Duration::from_secs(5))
        .expect("Build upstream client");

    let store = PgStore::new(pool);
    let mut state = AppState::new(Arc::new(store.clone()), Arc::new(upstream));
    state.refresh_policy.retry_delay = Duration::from_millis(10);
    state.refresh_policy.batch_pause = Duration::ZERO;
    state.generate_policy.batch_pause = Duration::ZERO;

    let app = create_app(state).await;
    let listener = tokio::net::TcpListener::bind(&"localhost:0").await.unwrap();
    let addr = listener.local_addr().expect("Get test app address");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("start axum server") });

    (pg_instance, addr, store) // Return the container and address
}

#[tokio::test]
async fn integration_tests() {
    let (_pg_container, addr, store) = create_test_instance().await;

    let client =
        hyper_util::client::legacy::Builder::new(hyper_util::rt::TokioExecutor::new()).build_http();

    print!("\n  \x1b[93mIntegration:\x1b[0m Check heartbeat ... ");
    let (status, _) = request(&client, &addr, "GET", "/heartbeat").await;
    assert_eq!(status, StatusCode::OK);
    println!("ok");

    print!("  \x1b[93mIntegration:\x1b[0m Querying empty catalog ... ");
    let (status, body) = request(&client, &addr, "GET", "/subspecialties").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
    assert_eq!(body["pagination"]["has_more"], false);
    println!("ok");

    full_sync(&client, &addr).await;
    // A second run must leave the same state behind.
    full_sync(&client, &addr).await;
    check_links_and_counts(&client, &addr, &store).await;
    refresh_with_details_and_fallback(&client, &addr, &store).await;
    generate_remaining(&client, &addr, &store).await;
    subspecialty_only_sync(&client, &addr).await;

    // _pg_container goes out of scope here, therefore invoking Drop()
    println!("\n        \x1b[93mSetup:\x1b[0m Destroying Postgres container.\n");
}

async fn convert_body_to_json(body: Response<Incoming>) -> Value {
    let bytes = body
        .into_body()
        .collect()
        .await
        .expect("Collect bytes from incoming")
        .to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("Parse body as json")
}

async fn request(
    client: &TestClient,
    address: &SocketAddr,
    method: &str,
    path: &str,
) -> (StatusCode, Value) {
    let response = client
        .request(
            Request::builder()
                .method(method)
                .uri(format!("http://{address}{path}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    (status, convert_body_to_json(response).await)
}

async fn full_sync(client: &TestClient, address: &SocketAddr) {
    print!("  \x1b[93mIntegration:\x1b[0m Full sync ... ");
    let (status, body) = request(client, address, "POST", "/sync").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["subspecialties_processed"], 3);
    assert_eq!(body["data"]["templates_processed"], 3);
    assert_eq!(body["data"]["relationships_created"], 5);
    assert_eq!(body["data"]["errors"], json!([]));
    println!("ok");
}

async fn check_links_and_counts(client: &TestClient, address: &SocketAddr, store: &PgStore) {
    print!("  \x1b[93mIntegration:\x1b[0m Check links and counts ... ");
    let (_, body) = request(client, address, "GET", "/subspecialties").await;
    let counts: Vec<(String, i64)> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| (s["code"].as_str().unwrap().to_string(), s["count"].as_i64().unwrap()))
        .collect();
    assert_eq!(
        counts,
        vec![
            ("CA".to_string(), 1),
            ("CH".to_string(), 2),
            ("CT".to_string(), 2)
        ]
    );

    let (status, body) = request(client, address, "GET", "/templates/202").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["subspecialty_codes"], json!(["CH", "CT"]));
    assert_eq!(body["data"]["views"], 450);

    let (_, body) = request(client, address, "GET", "/subspecialties/CH/templates?limit=1").await;
    assert_eq!(body["data"]["templates"][0]["template_id"], "202");
    assert_eq!(body["pagination"]["total"], 2);
    assert_eq!(body["pagination"]["has_more"], true);

    let links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subspecialty_templates")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(links, 5);

    let (status, _) = request(client, address, "GET", "/subspecialties/ZZ").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    println!("ok");
}

async fn refresh_with_details_and_fallback(
    client: &TestClient,
    address: &SocketAddr,
    store: &PgStore,
) {
    print!("  \x1b[93mIntegration:\x1b[0m Refresh template with details ... ");
    let (status, body) = request(client, address, "POST", "/templates/201/refresh").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({"success": true, "fallback": false}));
    let stored = store.find_template("201").await.unwrap().unwrap();
    assert_eq!(stored.template_data.as_deref(), Some("<html>coronary</html>"));
    assert_eq!(stored.description.as_deref(), Some("Coronary CT angiography"));
    println!("ok");

    print!("  \x1b[93mIntegration:\x1b[0m Refresh template through fallback ... ");
    let (status, body) = request(client, address, "POST", "/templates/202/refresh").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["fallback"], true);
    let stored = store.find_template("202").await.unwrap().unwrap();
    assert_eq!(stored.template_data, None);
    assert_eq!(stored.author.as_deref(), Some("William Brown"));
    println!("ok");
}

async fn generate_remaining(client: &TestClient, address: &SocketAddr, store: &PgStore) {
    print!("  \x1b[93mIntegration:\x1b[0m Generate missing template data ... ");
    let (status, body) = request(client, address, "POST", "/templates/generate").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["updated"], 2);

    assert!(store.templates_missing_data().await.unwrap().is_empty());
    let stored = store.find_template("202").await.unwrap().unwrap();
    let firstname = stored.firstname.unwrap();
    let lastname = stored.lastname.unwrap();
    assert_eq!(stored.author.unwrap(), format!("{firstname} {lastname}"));
    println!("ok");
}

async fn subspecialty_only_sync(client: &TestClient, address: &SocketAddr) {
    print!("  \x1b[93mIntegration:\x1b[0m Subspecialty-only sync ... ");
    let (status, body) = request(client, address, "POST", "/sync/subspecialties").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["relationships_created"], 0);

    let (_, body) = request(client, address, "GET", "/subspecialties/CH").await;
    assert_eq!(body["data"]["count"], 0);

    let (_, body) = request(client, address, "GET", "/templates/201").await;
    assert_eq!(body["data"]["template_data"], "<html>coronary</html>");
    println!("ok");
}
