use std::fs;

use chrono::TimeZone;
use serde_json::{json, Value};
use tempfile::tempdir;

use declaration_publisher_core::contract::{FailureSignal, MockHostingProvider};
use declaration_publisher_core::declaration::{render_document, Declaration, Selector, Selectors, TermsDeclaration};
use declaration_publisher_core::destination::PublicationTarget;
use declaration_publisher_core::error::PublishError;
use declaration_publisher_core::history::{save_declaration, LocalStore, ValidUntil};

fn terms(fetch: &str, select: &str) -> TermsDeclaration {
    TermsDeclaration {
        fetch: fetch.to_string(),
        select: Some(Selectors::One(Selector::Css(select.to_string()))),
        remove: None,
        execute_client_scripts: None,
        extract: None,
        combine: None,
    }
}

fn write_json(path: &std::path::Path, value: &Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, render_document(value).unwrap()).unwrap();
}

fn read_json(path: &std::path::Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn repo() -> PublicationTarget {
    PublicationTarget {
        organization: "OpenTermsArchive".into(),
        repository: "demo-declarations".into(),
    }
}

#[tokio::test]
async fn test_save_prepends_superseded_block_to_history() {
    let dir = tempdir().unwrap();
    let store = LocalStore::new(dir.path());

    let x = json!({ "fetch": "https://acme.example/terms", "select": ["main"] });
    let privacy = json!({ "fetch": "https://acme.example/privacy" });
    let y = json!({ "fetch": "https://acme.example/terms-2023", "validUntil": "2023-06-01T00:00:00+00:00" });
    let z = json!({ "fetch": "https://acme.example/terms-2022", "validUntil": "to-be-determined" });
    write_json(
        &store.declaration_file("Acme"),
        &json!({ "name": "Acme", "terms": { "Privacy Policy": privacy, "Terms of Service": x } }),
    );
    write_json(
        &store.history_file("Acme"),
        &json!({ "Privacy Policy": [], "Terms of Service": [y, z] }),
    );

    let date = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let declaration = Declaration::single("Acme", "Terms of Service", terms("https://acme.example/new-terms", "article"));
    let report = store
        .save(&declaration, None, &ValidUntil::Date(date))
        .await
        .expect("save should succeed");

    assert_eq!(report.document_type, "Terms of Service");
    assert_eq!(report.history_path, Some(store.history_file("Acme")));

    let history = read_json(&store.history_file("Acme"));
    let entries = history["Terms of Service"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(
        entries[0],
        json!({ "fetch": "https://acme.example/terms", "select": ["main"], "validUntil": "2024-03-01T12:00:00+00:00" })
    );
    assert_eq!(entries[1], y);
    assert_eq!(entries[2], z);
    assert_eq!(history["Privacy Policy"], json!([]));

    let saved = read_json(&store.declaration_file("Acme"));
    assert_eq!(saved["terms"]["Terms of Service"], json!({ "fetch": "https://acme.example/new-terms", "select": ["article"] }));
    assert_eq!(saved["terms"]["Privacy Policy"], privacy);
    assert!(fs::read_to_string(&store.declaration_file("Acme")).unwrap().ends_with("}\n"));
}

#[tokio::test]
async fn test_first_save_writes_verbatim_without_history() {
    let dir = tempdir().unwrap();
    let store = LocalStore::new(dir.path());

    let declaration = Declaration::single("Café & Co", "Privacy Policy", terms(" https://cafe.example/privacy ", "main"));
    let report = store
        .save(&declaration, None, &ValidUntil::ToBeDetermined)
        .await
        .unwrap();

    assert_eq!(report.history_path, None);
    assert_eq!(report.declaration_path, store.declaration_file("Cafe  Co"));
    assert!(!store.history_file("Cafe  Co").exists());
    assert_eq!(
        read_json(&report.declaration_path),
        json!({ "name": "Café & Co", "terms": { "Privacy Policy": { "fetch": "https://cafe.example/privacy", "select": ["main"] } } })
    );
}

#[tokio::test]
async fn test_new_type_on_existing_declaration_leaves_history_untouched() {
    let dir = tempdir().unwrap();
    let store = LocalStore::new(dir.path());
    write_json(
        &store.declaration_file("Acme"),
        &json!({ "name": "Acme", "terms": { "Privacy Policy": { "fetch": "https://acme.example/privacy" } } }),
    );

    let declaration = Declaration::single("Acme", "Terms of Service", terms("https://acme.example/terms", "main"));
    let report = store.save(&declaration, None, &ValidUntil::ToBeDetermined).await.unwrap();

    assert_eq!(report.history_path, None);
    assert!(!store.history_file("Acme").exists());
    let saved = read_json(&store.declaration_file("Acme"));
    let keys: Vec<&String> = saved["terms"].as_object().unwrap().keys().collect();
    assert_eq!(keys, ["Privacy Policy", "Terms of Service"]);
}

#[tokio::test]
async fn test_history_file_is_created_on_first_supersession() {
    let dir = tempdir().unwrap();
    let store = LocalStore::new(dir.path());
    write_json(
        &store.declaration_file("Acme"),
        &json!({ "name": "Acme", "terms": { "Terms of Service": { "fetch": "https://acme.example/terms" } } }),
    );

    let mut provider = MockHostingProvider::new();
    provider
        .expect_last_failure()
        .times(1)
        .returning(|_, _, _| Err(PublishError::provider(Some(502), "bad gateway")));

    let declaration = Declaration::single("Acme", "Terms of Service", terms("https://acme.example/terms-v2", "main"));
    save_declaration(&store, &provider, &repo(), &declaration, None)
        .await
        .unwrap();

    let history = read_json(&store.history_file("Acme"));
    assert_eq!(
        history,
        json!({ "Terms of Service": [{ "fetch": "https://acme.example/terms", "validUntil": "to-be-determined" }] })
    );
}

#[tokio::test]
async fn test_known_failure_dates_the_superseded_block() {
    let dir = tempdir().unwrap();
    let store = LocalStore::new(dir.path());
    write_json(
        &store.declaration_file("Acme"),
        &json!({ "name": "Acme", "terms": { "Terms of Service": { "fetch": "https://acme.example/terms" } } }),
    );

    let mut provider = MockHostingProvider::new();
    provider
        .expect_last_failure()
        .withf(|repo, service, document_type| {
            repo.path() == "OpenTermsArchive/demo-declarations" && service == "Acme" && document_type == "Terms of Service"
        })
        .returning(|_, _, _| {
            Ok(Some(FailureSignal {
                date: chrono::Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap(),
                issue_number: Some(3),
            }))
        });

    let declaration = Declaration::single("Acme", "Terms of Service", terms("https://acme.example/terms-v2", "main"));
    save_declaration(&store, &provider, &repo(), &declaration, Some("Terms of Service"))
        .await
        .unwrap();

    let history = read_json(&store.history_file("Acme"));
    assert_eq!(history["Terms of Service"][0]["validUntil"], "2024-01-15T08:30:00+00:00");
}

#[tokio::test]
async fn test_failed_save_leaves_both_files_untouched_and_retry_prepends_once() {
    let dir = tempdir().unwrap();
    let store = LocalStore::new(dir.path());
    let original = json!({ "name": "Acme", "terms": { "Terms of Service": { "fetch": "https://acme.example/terms" } } });
    write_json(&store.declaration_file("Acme"), &original);

    // A directory where the staged history file would go makes that write fail.
    let blocker = dir.path().join("declarations/Acme.history.json.staged");
    fs::create_dir_all(&blocker).unwrap();

    let declaration = Declaration::single("Acme", "Terms of Service", terms("https://acme.example/terms-v2", "main"));
    let result = store.save(&declaration, None, &ValidUntil::ToBeDetermined).await;
    assert!(result.is_err(), "save should fail while the history cannot be staged");
    assert_eq!(read_json(&store.declaration_file("Acme")), original);
    assert!(!store.history_file("Acme").exists());
    assert!(!dir.path().join("declarations/Acme.json.staged").exists());

    fs::remove_dir(&blocker).unwrap();
    store.save(&declaration, None, &ValidUntil::ToBeDetermined).await.unwrap();

    let history = read_json(&store.history_file("Acme"));
    assert_eq!(
        history,
        json!({ "Terms of Service": [{ "fetch": "https://acme.example/terms", "validUntil": "to-be-determined" }] })
    );
    assert_eq!(
        read_json(&store.declaration_file("Acme"))["terms"]["Terms of Service"]["fetch"],
        "https://acme.example/terms-v2"
    );
}
