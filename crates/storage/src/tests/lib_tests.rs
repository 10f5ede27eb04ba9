use super::*;

#[test]
fn password_digest_is_lowercase_hex_sha256() {
    assert_eq!(
        password_digest("password"),
        "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
    );
}

#[test]
fn sqlite_path_ignores_memory_urls() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(
        sqlite_path("sqlite://data/ballot.db?mode=rwc"),
        Some(PathBuf::from("data/ballot.db"))
    );
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn verifies_matching_credentials_only() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .upsert_voter("admin", "s3cret", Role::Admin)
        .await
        .expect("admin");
    storage
        .upsert_voter("voter1", "pw", Role::User)
        .await
        .expect("voter");

    assert_eq!(
        storage.verify_credentials("admin", "s3cret").await.expect("query"),
        Some(Role::Admin)
    );
    assert_eq!(
        storage.verify_credentials("voter1", "pw").await.expect("query"),
        Some(Role::User)
    );
    assert_eq!(storage.verify_credentials("admin", "pw").await.expect("query"), None);
    assert_eq!(storage.verify_credentials("nobody", "pw").await.expect("query"), None);
}

#[tokio::test]
async fn upsert_replaces_password_and_role() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.upsert_voter("v", "old", Role::User).await.expect("insert");
    storage.upsert_voter("v", "new", Role::Admin).await.expect("update");

    assert_eq!(storage.verify_credentials("v", "old").await.expect("query"), None);
    assert_eq!(
        storage.verify_credentials("v", "new").await.expect("query"),
        Some(Role::Admin)
    );
}

#[tokio::test]
async fn rejects_blank_voter_id() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    assert!(storage.upsert_voter("  ", "pw", Role::User).await.is_err());
}

#[tokio::test]
async fn set_role_reports_missing_voter() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.upsert_voter("v", "pw", Role::User).await.expect("insert");

    assert!(storage.set_role("v", Role::Admin).await.expect("update"));
    assert!(!storage.set_role("ghost", Role::Admin).await.expect("update"));

    let voter = storage.find_voter("v").await.expect("query").expect("exists");
    assert_eq!(voter.role, Role::Admin);
    assert!(storage.find_voter("ghost").await.expect("query").is_none());
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("ballot_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("voters.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}

#[tokio::test]
async fn voter_ids_are_matched_without_surrounding_whitespace() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .upsert_voter(" alice ", "pw", Role::User)
        .await
        .expect("insert");

    assert_eq!(
        storage.verify_credentials(" alice ", "pw").await.expect("query"),
        Some(Role::User)
    );
    assert_eq!(
        storage.verify_credentials("alice", "pw").await.expect("query"),
        Some(Role::User)
    );
    assert!(storage.set_role(" alice ", Role::Admin).await.expect("update"));
    let voter = storage.find_voter("alice\t").await.expect("query").expect("exists");
    assert_eq!(voter.voter_id, "alice");
    assert_eq!(voter.role, Role::Admin);
}
