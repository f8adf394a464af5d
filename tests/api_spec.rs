use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use release_cms::api::create_router;
use release_cms::catalog::TranslationKeyWithVariants;
use release_cms::db::Database;
use release_cms::models::*;
use serde_json::{json, Value};
use uuid::Uuid;

fn setup() -> TestServer {
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    let app = create_router(db);
    TestServer::new(app).expect("Failed to create test server")
}

fn release_header(id: Uuid) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-release-id"),
        HeaderValue::from_str(&id.to_string()).expect("Invalid header value"),
    )
}

async fn create_release(server: &TestServer, name: &str) -> Release {
    server
        .post("/api/v1/releases")
        .json(&CreateReleaseInput {
            name: name.to_string(),
            description: None,
        })
        .await
        .json::<Release>()
}

async fn ship(server: &TestServer, release: &Release) -> Release {
    server
        .post(&format!("/api/v1/releases/{}/close", release.id))
        .await
        .assert_status_ok();
    server
        .post(&format!("/api/v1/releases/{}/deploy", release.id))
        .await
        .json::<Release>()
}

async fn create_key(server: &TestServer, slug: &str, value: &str) -> EntityRecord {
    server
        .post("/api/v1/entities/translation_key")
        .json(&json!({"slug": slug, "value": value}))
        .await
        .json::<EntityRecord>()
}

mod health {
    use super::*;

    #[tokio::test]
    async fn reports_ok() {
        let server = setup();
        let body: Value = server.get("/api/v1/health").await.json();
        assert_eq!(body["status"], "ok");
    }
}

mod releases {
    use super::*;

    #[tokio::test]
    async fn creates_and_lists_releases() {
        let server = setup();

        let response = server
            .post("/api/v1/releases")
            .add_header(
                HeaderName::from_static("x-user-id"),
                HeaderValue::from_static("alice"),
            )
            .json(&CreateReleaseInput {
                name: "Spring campaign".to_string(),
                description: Some("Seasonal copy".to_string()),
            })
            .await;
        response.assert_status(StatusCode::CREATED);
        let release: Release = response.json();
        assert_eq!(release.status, ReleaseStatus::Open);
        assert_eq!(release.created_by, "alice");

        let releases: Vec<Release> = server.get("/api/v1/releases").await.json();
        assert_eq!(releases.len(), 1);
    }

    #[tokio::test]
    async fn rejects_an_empty_name() {
        let server = setup();
        server
            .post("/api/v1/releases")
            .json(&json!({"name": ""}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn returns_404_for_unknown_release() {
        let server = setup();
        server
            .get(&format!("/api/v1/releases/{}", Uuid::new_v4()))
            .await
            .assert_status_not_found();
        server
            .post(&format!("/api/v1/releases/{}/deploy", Uuid::new_v4()))
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn returns_404_when_nothing_is_deployed() {
        let server = setup();
        server
            .get("/api/v1/releases/current")
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn refuses_to_deploy_an_open_release() {
        let server = setup();
        let release = create_release(&server, "R1").await;

        server
            .post(&format!("/api/v1/releases/{}/deploy", release.id))
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn deploys_and_rolls_back() {
        let server = setup();
        let r1 = ship(&server, &create_release(&server, "R1").await).await;
        let r2 = ship(&server, &create_release(&server, "R2").await).await;
        assert_eq!(r2.base_release_id, Some(r1.id));

        let current: Release = server.get("/api/v1/releases/current").await.json();
        assert_eq!(current.id, r2.id);

        let response = server
            .post(&format!("/api/v1/releases/{}/rollback", r1.id))
            .await;
        response.assert_status_ok();
        let restored: Release = response.json();
        assert_eq!(restored.deploy_seq, Some(3));

        let previous: Release = server
            .get(&format!("/api/v1/releases/{}", r2.id))
            .await
            .json();
        assert_eq!(previous.status, ReleaseStatus::RolledBack);
    }

    #[tokio::test]
    async fn updates_name_and_status() {
        let server = setup();
        let release = create_release(&server, "R1").await;

        let response = server
            .put(&format!("/api/v1/releases/{}", release.id))
            .json(&json!({"name": "Renamed", "status": "CLOSED"}))
            .await;
        response.assert_status_ok();
        let updated: Release = response.json();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.status, ReleaseStatus::Closed);
    }
}

mod entities {
    use super::*;

    #[tokio::test]
    async fn creates_and_reads_an_entity() {
        let server = setup();
        create_release(&server, "R1").await;

        let response = server
            .post("/api/v1/entities/translation_key")
            .json(&json!({"slug": "app.title", "value": "Hello", "note": "header"}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let key: EntityRecord = response.json();
        assert_eq!(key.field_str("note"), Some("header"));

        let found: EntityRecord = server
            .get(&format!("/api/v1/entities/translation_key/{}", key.id))
            .await
            .json();
        assert_eq!(found.field_str("value"), Some("Hello"));
    }

    #[tokio::test]
    async fn returns_404_for_unknown_entity_type() {
        let server = setup();
        server
            .get("/api/v1/entities/spaceship")
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn returns_409_for_duplicates() {
        let server = setup();
        create_release(&server, "R1").await;
        create_key(&server, "app.title", "Hello").await;

        server
            .post("/api/v1/entities/translation_key")
            .json(&json!({"slug": "app.title"}))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn returns_400_for_invalid_drafts() {
        let server = setup();
        create_release(&server, "R1").await;

        server
            .post("/api/v1/entities/translation_key")
            .json(&json!({"value": "no slug"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        server
            .post("/api/v1/entities/translation_key")
            .json(&json!(["not", "an", "object"]))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn returns_412_when_no_release_is_open() {
        let server = setup();
        server
            .post("/api/v1/entities/translation_key")
            .json(&json!({"slug": "app.title"}))
            .await
            .assert_status(StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn scopes_reads_with_header_and_query() {
        let server = setup();
        let r1 = create_release(&server, "R1").await;
        let key = create_key(&server, "app.title", "Hello").await;
        ship(&server, &r1).await;
        let r2 = create_release(&server, "R2").await;

        let (name, value) = release_header(r2.id);
        server
            .patch(&format!("/api/v1/entities/translation_key/{}", key.id))
            .add_header(name, value)
            .json(&json!({"value": "Hi"}))
            .await
            .assert_status_ok();

        let production: EntityRecord = server
            .get(&format!("/api/v1/entities/translation_key/{}", key.id))
            .await
            .json();
        assert_eq!(production.field_str("value"), Some("Hello"));

        let (name, value) = release_header(r2.id);
        let preview: EntityRecord = server
            .get(&format!("/api/v1/entities/translation_key/{}", key.id))
            .add_header(name, value)
            .await
            .json();
        assert_eq!(preview.field_str("value"), Some("Hi"));

        let listed: Vec<EntityRecord> = server
            .get("/api/v1/entities/translation_key")
            .add_query_param("release", r2.id)
            .add_query_param("value", "Hi")
            .await
            .json();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn filters_payload_numbers_from_the_query_string() {
        let server = setup();
        create_release(&server, "R1").await;
        for (slug, priority) in [("a", 3), ("b", 1)] {
            server
                .post("/api/v1/entities/translation_key")
                .json(&json!({"slug": slug, "priority": priority}))
                .await
                .assert_status(StatusCode::CREATED);
        }

        let listed: Vec<EntityRecord> = server
            .get("/api/v1/entities/translation_key")
            .add_query_param("priority", 3)
            .await
            .json();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].field_str("slug"), Some("a"));
    }

    #[tokio::test]
    async fn rejects_a_malformed_release_header() {
        let server = setup();
        server
            .get("/api/v1/entities/translation_key")
            .add_header(
                HeaderName::from_static("x-release-id"),
                HeaderValue::from_static("not-a-uuid"),
            )
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn removes_an_entity() {
        let server = setup();
        create_release(&server, "R1").await;
        let key = create_key(&server, "app.title", "Hello").await;

        server
            .delete(&format!("/api/v1/entities/translation_key/{}", key.id))
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .get(&format!("/api/v1/entities/translation_key/{}", key.id))
            .await
            .assert_status_not_found();
        server
            .delete(&format!("/api/v1/entities/translation_key/{}", key.id))
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn returns_history() {
        let server = setup();
        create_release(&server, "R1").await;
        let key = create_key(&server, "app.title", "Hello").await;

        let history: EntityHistory = server
            .get(&format!("/api/v1/entities/translation_key/{}/history", key.id))
            .await
            .json();
        assert_eq!(history.versions.len(), 1);
        assert_eq!(history.versions[0].change_type, ChangeType::Create);
    }

    #[tokio::test]
    async fn creates_translation_keys_with_variants() {
        let server = setup();
        create_release(&server, "R1").await;

        let response = server
            .post("/api/v1/translation-keys")
            .json(&json!({
                "key": {"slug": "app.title", "value": "Hello"},
                "variants": [{"locale_id": "de", "value": "Hallo"}]
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: TranslationKeyWithVariants = response.json();
        let parent = created.key.id.to_string();
        assert_eq!(created.variants[0].field_str("parent_id"), Some(parent.as_str()));
    }
}

mod reports {
    use super::*;

    #[tokio::test]
    async fn previews_diff_conflicts_and_stats() {
        let server = setup();
        let r1 = create_release(&server, "R1").await;
        let key = create_key(&server, "app.title", "Hello").await;
        ship(&server, &r1).await;
        let r2 = create_release(&server, "R2").await;
        server
            .patch(&format!("/api/v1/entities/translation_key/{}", key.id))
            .json(&json!({"value": "Hi"}))
            .await
            .assert_status_ok();

        let diff: ReleaseDiff = server
            .get(&format!("/api/v1/releases/{}/diff/{}", r1.id, r2.id))
            .await
            .json();
        assert_eq!(diff.summary.modified, 1);

        let conflicts: ConflictReport = server
            .get(&format!("/api/v1/releases/{}/conflicts", r2.id))
            .await
            .json();
        assert!(!conflicts.has_conflicts());

        let stats: ReleaseStats = server
            .get(&format!("/api/v1/releases/{}/stats", r2.id))
            .await
            .json();
        assert_eq!(stats.updated, 1);
    }

    #[tokio::test]
    async fn resolves_the_write_context() {
        let server = setup();
        let r1 = create_release(&server, "R1").await;

        let context: Value = server
            .get("/api/v1/context")
            .add_query_param("intent", "write")
            .await
            .json();
        assert_eq!(context["release_id"], json!(r1.id));
        assert_eq!(context["is_preview"], json!(true));
        assert_eq!(context["release"]["name"], "R1");
    }
}
