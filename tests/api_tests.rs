/// HTTP API tests
///
/// Runs the router on an ephemeral port with a stubbed profile source.
mod common;

use common::StubProfiles;
use iam_sync::{
    config::{
        AdminConfig, CacheBackend, IamConfig, LoggingConfig, ServerConfig, ServiceConfig,
        StorageConfig,
    },
    context::AppContext,
    db,
    error::ProfileFetchError,
    server::build_router,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

const ADMIN_TOKEN: &str = "admin-secret";

fn test_config(admin_token: Option<&str>) -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "127.0.0.1".to_string(),
            port: 0,
        },
        storage: StorageConfig {
            database: PathBuf::from(":memory:"),
            cache_backend: CacheBackend::Sqlite,
        },
        iam: IamConfig {
            profile_api_url: "http://iam.invalid".to_string(),
            ..IamConfig::default()
        },
        admin: AdminConfig {
            token: admin_token.map(str::to_string),
        },
        logging: LoggingConfig {
            level: "info".to_string(),
            json: false,
        },
    }
}

async fn spawn_app(admin_token: Option<&str>) -> (String, Arc<StubProfiles>) {
    let pool = db::memory_pool().await.unwrap();
    let profiles = Arc::new(StubProfiles::default());
    let ctx = AppContext::with_profile_source(test_config(admin_token), pool, profiles.clone()).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(ctx)).await.unwrap();
    });

    (format!("http://{}", addr), profiles)
}

async fn admin_setup(client: &reqwest::Client, base: &str) {
    let resp = client
        .post(format!("{}/v1/admin/group-mappings", base))
        .bearer_auth(ADMIN_TOKEN)
        .json(&json!({ "group_id": 10, "iam_group_name": "iam_group" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = client
        .put(format!("{}/v1/admin/identity-links/2", base))
        .bearer_auth(ADMIN_TOKEN)
        .json(&json!({ "iam_uid": "ad|Mozilla-LDAP|user" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
}

#[tokio::test]
async fn test_health() {
    let (base, _) = spawn_app(None).await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_membership_query() {
    let (base, profiles) = spawn_app(Some(ADMIN_TOKEN)).await;
    let client = reqwest::Client::new();
    admin_setup(&client, &base).await;
    profiles.stub("ad|Mozilla-LDAP|user", &["iam_group"]);

    let body: Value = client
        .get(format!("{}/v1/users/2/groups/10/membership", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "user_id": 2, "group_id": 10, "member": true }));

    // Cached now; a second query makes no remote call
    let body: Value = client
        .get(format!("{}/v1/users/2/groups", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["groups"], json!([10]));
    assert_eq!(profiles.calls(), 1);

    // Unlinked user
    let body: Value = client
        .get(format!("{}/v1/users/3/groups/10/membership", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["member"], false);
}

#[tokio::test]
async fn test_profile_failure_is_bad_gateway() {
    let (base, profiles) = spawn_app(Some(ADMIN_TOKEN)).await;
    let client = reqwest::Client::new();
    admin_setup(&client, &base).await;
    profiles.fail("ad|Mozilla-LDAP|user", ProfileFetchError::Status(500));

    let resp = client
        .get(format!("{}/v1/users/2/groups/10/membership", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "ProfileFetchFailed");
}

#[tokio::test]
async fn test_admin_requires_token() {
    let (base, _) = spawn_app(Some(ADMIN_TOKEN)).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/v1/admin/group-mappings", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{}/v1/admin/group-mappings", base))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // No token configured: admin API is closed
    let (base, _) = spawn_app(None).await;
    let resp = client
        .get(format!("{}/v1/admin/group-mappings", base))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_group_mapping_admin() {
    let (base, _) = spawn_app(Some(ADMIN_TOKEN)).await;
    let client = reqwest::Client::new();
    admin_setup(&client, &base).await;

    // Duplicate IAM group name
    let resp = client
        .post(format!("{}/v1/admin/group-mappings", base))
        .bearer_auth(ADMIN_TOKEN)
        .json(&json!({ "group_id": 11, "iam_group_name": "iam_group" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let body: Value = client
        .get(format!("{}/v1/admin/group-mappings", base))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["mappings"].as_array().unwrap().len(), 1);
    assert_eq!(body["mappings"][0]["iam_group_name"], "iam_group");

    let resp = client
        .delete(format!("{}/v1/admin/group-mappings/10", base))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = client
        .delete(format!("{}/v1/admin/group-mappings/10", base))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_unknown_route() {
    let (base, _) = spawn_app(None).await;
    let resp = reqwest::get(format!("{}/nope", base)).await.unwrap();
    assert_eq!(resp.status(), 404);
}
