use std::{collections::BTreeMap, sync::RwLock};

use serde_json::{json, Value};

use super::{
    record_deleted, record_owner, token_hash, Data, JsonObject,
    ListOptions, Service, StoreOutcome, StoreTokenRequest, UpdateMode,
    TOKEN_OWNERS_KEY,
};
use crate::{
    service::{authz, globals, validation},
    Config, Error, Result,
};

/// In-memory stand-in for the storage seam. There is no cache to bypass
/// here, so the refresh flag is irrelevant.
struct TestData {
    storage: RwLock<BTreeMap<String, JsonObject>>,
}

impl TestData {
    fn new() -> Self {
        Self {
            storage: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Data for TestData {
    fn fetch(&self, key: &str, _refresh: bool) -> Result<Option<JsonObject>> {
        Ok(self
            .storage
            .read()
            .expect("lock should not be poisoned")
            .get(key)
            .cloned())
    }

    fn store(&self, key: &str, value: &JsonObject) -> Result<()> {
        self.storage
            .write()
            .expect("lock should not be poisoned")
            .insert(key.to_owned(), value.clone());

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.storage
            .write()
            .expect("lock should not be poisoned")
            .remove(key);

        Ok(())
    }

    fn keys<'a>(&'a self) -> Box<dyn Iterator<Item = Result<String>> + 'a> {
        let keys: Vec<_> = self
            .storage
            .read()
            .expect("lock should not be poisoned")
            .keys()
            .cloned()
            .collect();

        Box::new(keys.into_iter().map(Ok))
    }
}

struct Fixture {
    service: Service,
    globals: globals::Service,
}

fn fixture(overrides: &str) -> Fixture {
    let config: Config =
        toml::from_str(overrides).expect("test config should parse");

    let db: &'static TestData = Box::leak(Box::new(TestData::new()));
    let authz = authz::Service::load(&config);
    let validator = validation::Service::load(&config);
    let service = Service::load(db, &config, authz, validator);
    let globals = globals::Service::load(config);

    Fixture {
        service,
        globals,
    }
}

fn request(token: &str, user: &str, body: &Value) -> StoreTokenRequest {
    StoreTokenRequest {
        token: token.to_owned(),
        body: body
            .as_object()
            .expect("test body should be an object")
            .clone(),
        authenticated_user: user.to_owned(),
        if_match: None,
        update_mode: UpdateMode::Normal,
        request_host: None,
    }
}

fn basic_body(user: &str, cpus: u64) -> Value {
    json!({
        "cmd": "run",
        "cpus": cpus,
        "mem": 512,
        "run-as-user": user,
        "version": "v1",
    })
}

async fn store(
    fixture: &Fixture,
    request: &StoreTokenRequest,
) -> Result<StoreOutcome> {
    fixture.service.validate_store_request(request)?;

    let lock = fixture.globals.lock_registry().await;
    fixture.service.store_token(request, &lock)
}

async fn delete(
    fixture: &Fixture,
    token: &str,
    user: &str,
    if_match: Option<&str>,
    hard: bool,
) -> Result<super::DeleteOutcome> {
    let lock = fixture.globals.lock_registry().await;
    fixture.service.delete_token(token, user, if_match, hard, &lock)
}

fn history_depth(record: &JsonObject) -> usize {
    let mut depth = 0;
    let mut cursor = record.get("previous");

    while let Some(Value::Object(previous)) = cursor {
        depth += 1;
        cursor = previous.get("previous");
    }

    depth
}

fn assert_index_coherent(fixture: &Fixture, token: &str) {
    let record = fixture
        .service
        .token(token, true)
        .expect("fetch should succeed")
        .expect("token should exist");

    let owner = record_owner(&record)
        .expect("token should have an owner")
        .to_owned();

    let entries = fixture
        .service
        .list_index_entries_for_owner(&owner, true)
        .expect("listing index entries should succeed");

    let (_, entry) = entries
        .iter()
        .find(|(name, _)| name == token)
        .expect("token should be indexed under its owner");

    assert_eq!(
        entry.hash,
        token_hash(&record),
        "index hash should match the record"
    );
    assert_eq!(
        entry.deleted,
        record_deleted(&record),
        "index tombstone should mirror the record"
    );
}

#[test]
fn hash_ignores_unknown_keys_nulls_and_history() {
    let base: JsonObject = json!({
        "cmd": "run",
        "cpus": 1,
        "owner": "alice",
    })
    .as_object()
    .expect("literal should be an object")
    .clone();

    let mut noisy = base.clone();
    noisy.insert("wat".to_owned(), json!("unknown"));
    noisy.insert("mem".to_owned(), Value::Null);
    noisy.insert("previous".to_owned(), json!({ "cmd": "old" }));

    assert_eq!(token_hash(&base), token_hash(&noisy));
}

#[test]
fn hash_is_invariant_under_insertion_order() {
    let mut forward = JsonObject::new();
    forward.insert("cmd".to_owned(), json!("run"));
    forward.insert("cpus".to_owned(), json!(2));
    forward.insert("owner".to_owned(), json!("alice"));

    let mut backward = JsonObject::new();
    backward.insert("owner".to_owned(), json!("alice"));
    backward.insert("cpus".to_owned(), json!(2));
    backward.insert("cmd".to_owned(), json!("run"));

    assert_eq!(token_hash(&forward), token_hash(&backward));
}

#[test]
fn hash_distinguishes_different_payloads() {
    let one: JsonObject = json!({ "cmd": "run", "cpus": 1 })
        .as_object()
        .expect("literal should be an object")
        .clone();
    let two: JsonObject = json!({ "cmd": "run", "cpus": 2 })
        .as_object()
        .expect("literal should be an object")
        .clone();

    assert_ne!(token_hash(&one), token_hash(&two));
}

#[tokio::test]
async fn create_then_fetch_round_trips() {
    let fixture = fixture("");

    let outcome = store(&fixture, &request("t1", "alice", &basic_body("alice", 1)))
        .await
        .expect("create should succeed");

    assert_eq!(outcome.message, "Successfully created t1");
    assert!(!outcome.no_changes);

    let record = fixture
        .service
        .token("t1", false)
        .expect("fetch should succeed")
        .expect("token should exist");

    assert_eq!(record.get("cmd"), Some(&json!("run")));
    assert_eq!(record_owner(&record), Some("alice"));
    assert_eq!(outcome.hash, token_hash(&record));

    assert_index_coherent(&fixture, "t1");
}

#[tokio::test]
async fn identical_repost_detects_no_changes() {
    let fixture = fixture("");
    let body = basic_body("alice", 1);

    let first = store(&fixture, &request("t1", "alice", &body))
        .await
        .expect("create should succeed");

    let second = store(&fixture, &request("t1", "alice", &body))
        .await
        .expect("repost should succeed");

    assert!(second.no_changes);
    assert_eq!(second.message, "No changes detected for t1");
    assert_eq!(second.hash, first.hash);
}

#[tokio::test]
async fn stale_version_hash_is_rejected() {
    let fixture = fixture("");

    let first = store(&fixture, &request("t1", "alice", &basic_body("alice", 1)))
        .await
        .expect("create should succeed");

    // An update without a version hash is allowed in normal mode
    let second = store(&fixture, &request("t1", "alice", &basic_body("alice", 2)))
        .await
        .expect("unconditional update should succeed");
    assert_ne!(second.hash, first.hash);

    // The first hash is now stale
    let mut stale = request("t1", "alice", &basic_body("alice", 3));
    stale.if_match = Some(first.hash.clone());
    let error = store(&fixture, &stale)
        .await
        .expect_err("stale hash should be rejected");
    assert!(matches!(error, Error::PreconditionFailed(_)));

    // The current hash still works
    let mut current = request("t1", "alice", &basic_body("alice", 3));
    current.if_match = Some(second.hash.clone());
    store(&fixture, &current)
        .await
        .expect("matching hash should succeed");
}

#[tokio::test]
async fn admin_mode_requires_version_hash_for_existing_tokens() {
    let fixture = fixture(r#"admins = ["root-admin"]"#);

    let created = store(&fixture, &request("t1", "alice", &basic_body("alice", 1)))
        .await
        .expect("create should succeed");

    let mut admin_update = request("t1", "root-admin", &basic_body("alice", 2));
    admin_update.update_mode = UpdateMode::Admin;
    let error = store(&fixture, &admin_update)
        .await
        .expect_err("admin update without a hash should be rejected");
    assert!(matches!(error, Error::BadRequest(_)));

    let mut admin_update = request("t1", "root-admin", &basic_body("alice", 2));
    admin_update.update_mode = UpdateMode::Admin;
    admin_update.if_match = Some(created.hash.clone());
    store(&fixture, &admin_update)
        .await
        .expect("admin update with the current hash should succeed");
}

#[tokio::test]
async fn admin_mode_is_gated_on_the_administer_capability() {
    let fixture = fixture("");

    let mut admin_create = request("t1", "alice", &basic_body("alice", 1));
    admin_create.update_mode = UpdateMode::Admin;

    let error = store(&fixture, &admin_create)
        .await
        .expect_err("non-administrators cannot use admin mode");
    assert!(matches!(error, Error::Forbidden(_)));
}

#[tokio::test]
async fn system_metadata_is_admin_only() {
    let fixture = fixture(r#"admins = ["root-admin"]"#);

    let mut body = basic_body("alice", 1);
    body.as_object_mut()
        .expect("literal should be an object")
        .insert("root".to_owned(), json!("other-cluster"));

    let error = store(&fixture, &request("t1", "alice", &body))
        .await
        .expect_err("system metadata should be rejected in normal mode");
    assert!(matches!(error, Error::BadRequest(_)));

    let mut admin_create = request("t1", "root-admin", &body);
    admin_create.update_mode = UpdateMode::Admin;
    store(&fixture, &admin_create)
        .await
        .expect("admin mode may set system metadata");

    let record = fixture
        .service
        .token("t1", false)
        .expect("fetch should succeed")
        .expect("token should exist");
    assert_eq!(record.get("root"), Some(&json!("other-cluster")));
}

#[tokio::test]
async fn unknown_keys_are_rejected() {
    let fixture = fixture("");

    let error = store(
        &fixture,
        &request("t1", "alice", &json!({ "cmd": "run", "wat": true })),
    )
    .await
    .expect_err("unknown keys should be rejected");
    assert!(matches!(error, Error::BadRequest(_)));
}

#[tokio::test]
async fn token_names_are_validated() {
    let fixture = fixture(r#"hostnames = ["registry.example.net"]"#);

    for name in ["", "  ", "9starts-with-digit", "has space", "^caret"] {
        let error = store(&fixture, &request(name, "alice", &basic_body("alice", 1)))
            .await
            .expect_err("invalid names should be rejected");
        assert!(matches!(error, Error::BadRequest(_)), "name {name:?}");
    }

    let error = store(
        &fixture,
        &request("registry.example.net", "alice", &basic_body("alice", 1)),
    )
    .await
    .expect_err("reserved hostnames cannot be token names");
    assert!(matches!(error, Error::BadRequest(_)));
}

#[tokio::test]
async fn disabled_authentication_requires_open_permitted_user() {
    let fixture = fixture("");

    let mut body = basic_body("alice", 1);
    body.as_object_mut()
        .expect("literal should be an object")
        .insert("authentication".to_owned(), json!("disabled"));

    let error = store(&fixture, &request("t1", "alice", &body))
        .await
        .expect_err("disabled authentication requires permitted-user *");
    assert!(matches!(error, Error::BadRequest(_)));

    body.as_object_mut()
        .expect("literal should be an object")
        .insert("permitted-user".to_owned(), json!("*"));
    store(&fixture, &request("t1", "alice", &body))
        .await
        .expect("a complete open token should be accepted");
}

#[tokio::test]
async fn run_as_another_user_requires_the_capability() {
    let fixture = fixture("");

    let error = store(&fixture, &request("t1", "bob", &basic_body("alice", 1)))
        .await
        .expect_err("bob cannot run services as alice");
    assert!(matches!(error, Error::Forbidden(_)));

    // A wildcard run-as user is not a specific identity and passes
    store(&fixture, &request("t1", "bob", &basic_body("*", 1)))
        .await
        .expect("wildcard run-as should be accepted");
}

#[tokio::test]
async fn history_chain_is_bounded() {
    let fixture = fixture("history_length = 2");

    for cpus in 1..=6 {
        store(&fixture, &request("t1", "alice", &basic_body("alice", cpus)))
            .await
            .expect("update should succeed");
    }

    let record = fixture
        .service
        .token("t1", false)
        .expect("fetch should succeed")
        .expect("token should exist");

    assert!(
        history_depth(&record) <= 2,
        "revision chain should be clamped to the configured bound"
    );
}

#[tokio::test]
async fn quota_bounds_live_tokens_per_owner() {
    let fixture = fixture(
        r#"
            owner_token_limit = 2
            admins = ["root-admin"]
        "#,
    );

    store(&fixture, &request("t1", "alice", &basic_body("alice", 1)))
        .await
        .expect("first create should succeed");
    store(&fixture, &request("t2", "alice", &basic_body("alice", 1)))
        .await
        .expect("second create should succeed");

    let error = store(&fixture, &request("t3", "alice", &basic_body("alice", 1)))
        .await
        .expect_err("third create should hit the quota");
    assert!(matches!(error, Error::QuotaExceeded(_)));

    // Soft-deleting one frees a slot
    delete(&fixture, "t1", "alice", None, false)
        .await
        .expect("soft delete should succeed");
    store(&fixture, &request("t3", "alice", &basic_body("alice", 1)))
        .await
        .expect("create should succeed after freeing a slot");

    // Administrative updates bypass the check entirely
    let mut body = basic_body("alice", 1);
    body.as_object_mut()
        .expect("literal should be an object")
        .insert("owner".to_owned(), json!("alice"));
    let mut admin_create = request("t4", "root-admin", &body);
    admin_create.update_mode = UpdateMode::Admin;
    store(&fixture, &admin_create)
        .await
        .expect("admin mode should bypass the quota");
}

#[tokio::test]
async fn updating_an_existing_token_does_not_count_against_quota() {
    let fixture = fixture("owner_token_limit = 1");

    store(&fixture, &request("t1", "alice", &basic_body("alice", 1)))
        .await
        .expect("create should succeed");

    store(&fixture, &request("t1", "alice", &basic_body("alice", 2)))
        .await
        .expect("updating the only token should not trip the quota");
}

#[tokio::test]
async fn ownership_transfer_moves_the_shard_entry() {
    let fixture = fixture("");

    store(&fixture, &request("t1", "alice", &basic_body("alice", 1)))
        .await
        .expect("create should succeed");

    let mut body = basic_body("alice", 1);
    body.as_object_mut()
        .expect("literal should be an object")
        .insert("owner".to_owned(), json!("bob"));
    store(&fixture, &request("t1", "alice", &body))
        .await
        .expect("transfer should succeed");

    let alice_entries = fixture
        .service
        .list_index_entries_for_owner("alice", true)
        .expect("listing should succeed");
    assert!(
        !alice_entries.iter().any(|(name, _)| name == "t1"),
        "the old owner's shard should no longer contain the token"
    );

    let bob_entries = fixture
        .service
        .list_index_entries_for_owner("bob", true)
        .expect("listing should succeed");
    assert!(
        bob_entries.iter().any(|(name, _)| name == "t1"),
        "the new owner's shard should contain the token"
    );

    let mut options = ListOptions::default();
    options.owners.insert("alice".to_owned());
    let listed = fixture
        .service
        .list_tokens(&options)
        .expect("listing should succeed");
    assert!(
        listed.iter().all(|item| item.get("token") != Some(&json!("t1"))),
        "listing under the old owner should exclude the token"
    );

    assert_index_coherent(&fixture, "t1");
}

#[tokio::test]
async fn soft_delete_tombstones_and_hard_delete_removes() {
    let fixture = fixture(r#"admins = ["root-admin"]"#);

    let created = store(&fixture, &request("t1", "alice", &basic_body("alice", 1)))
        .await
        .expect("create should succeed");

    // A non-manager cannot delete
    let error = delete(&fixture, "t1", "mallory", None, false)
        .await
        .expect_err("only the owner or an admin may delete");
    assert!(matches!(error, Error::Forbidden(_)));

    // Hard deleting a live token requires a version hash
    let error = delete(&fixture, "t1", "root-admin", None, true)
        .await
        .expect_err("hard delete of a live token needs If-Match");
    assert!(matches!(error, Error::BadRequest(_)));

    // Hard delete is admin-only even with the right hash
    let error =
        delete(&fixture, "t1", "alice", Some(created.hash.as_str()), true)
            .await
            .expect_err("hard delete requires the administer capability");
    assert!(matches!(error, Error::Forbidden(_)));

    // Soft delete keeps the record and the shard entry, tombstoned
    delete(&fixture, "t1", "alice", None, false)
        .await
        .expect("soft delete should succeed");

    let record = fixture
        .service
        .token("t1", true)
        .expect("fetch should succeed")
        .expect("soft-deleted record should remain");
    assert!(record_deleted(&record));

    let listed = fixture
        .service
        .list_tokens(&ListOptions::default())
        .expect("listing should succeed");
    assert!(
        listed.is_empty(),
        "default listing should exclude tombstoned tokens"
    );

    let mut options = ListOptions {
        include_deleted: true,
        show_metadata: true,
        ..ListOptions::default()
    };
    options.owners.insert("alice".to_owned());
    let listed = fixture
        .service
        .list_tokens(&options)
        .expect("listing should succeed");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("deleted"), Some(&json!(true)));

    assert_index_coherent(&fixture, "t1");

    // Already tombstoned, so the hard delete no longer needs a hash
    delete(&fixture, "t1", "root-admin", None, true)
        .await
        .expect("hard delete of a tombstoned token should succeed");

    assert!(
        fixture
            .service
            .token("t1", true)
            .expect("fetch should succeed")
            .is_none(),
        "hard delete should leave no record"
    );
    assert!(
        fixture
            .service
            .list_index_entries_for_owner("alice", true)
            .expect("listing should succeed")
            .is_empty(),
        "hard delete should leave no shard entry"
    );
}

#[tokio::test]
async fn hard_delete_of_a_live_token_with_current_hash_succeeds() {
    let fixture = fixture(r#"admins = ["root-admin"]"#);

    let created = store(&fixture, &request("t1", "alice", &basic_body("alice", 1)))
        .await
        .expect("create should succeed");

    delete(
        &fixture,
        "t1",
        "root-admin",
        Some(created.hash.as_str()),
        true,
    )
    .await
    .expect("hard delete with the current hash should succeed");

    assert!(fixture
        .service
        .token("t1", true)
        .expect("fetch should succeed")
        .is_none());
}

#[tokio::test]
async fn reposting_over_a_tombstone_resurrects_the_token() {
    let fixture = fixture("");
    let body = basic_body("alice", 1);

    store(&fixture, &request("t1", "alice", &body))
        .await
        .expect("create should succeed");
    delete(&fixture, "t1", "alice", None, false)
        .await
        .expect("soft delete should succeed");

    let outcome = store(&fixture, &request("t1", "alice", &body))
        .await
        .expect("repost over a tombstone should succeed");
    assert!(
        !outcome.no_changes,
        "a tombstoned record must not short-circuit as unchanged"
    );

    let record = fixture
        .service
        .token("t1", true)
        .expect("fetch should succeed")
        .expect("token should exist");
    assert!(!record_deleted(&record));

    assert_index_coherent(&fixture, "t1");
}

#[tokio::test]
async fn transfer_with_a_lost_directory_entry_is_a_storage_fault() {
    let fixture = fixture("");

    store(&fixture, &request("t1", "alice", &basic_body("alice", 1)))
        .await
        .expect("create should succeed");

    // Simulate a corrupted directory that lost the current owner's entry
    fixture
        .service
        .db
        .store(TOKEN_OWNERS_KEY, &JsonObject::new())
        .expect("store should succeed");

    let mut body = basic_body("alice", 1);
    body.as_object_mut()
        .expect("literal should be an object")
        .insert("owner".to_owned(), json!("bob"));

    let error = store(&fixture, &request("t1", "alice", &body))
        .await
        .expect_err("a missing shard key for a known owner is a fault");
    assert!(matches!(error, Error::BadDatabase(_)));
}

#[tokio::test]
async fn hard_delete_with_a_lost_directory_entry_is_a_storage_fault() {
    let fixture = fixture(r#"admins = ["root-admin"]"#);

    let created = store(&fixture, &request("t1", "alice", &basic_body("alice", 1)))
        .await
        .expect("create should succeed");

    fixture
        .service
        .db
        .store(TOKEN_OWNERS_KEY, &JsonObject::new())
        .expect("store should succeed");

    let error = delete(
        &fixture,
        "t1",
        "root-admin",
        Some(created.hash.as_str()),
        true,
    )
    .await
    .expect_err("a missing shard key for a known owner is a fault");
    assert!(matches!(error, Error::BadDatabase(_)));
}

#[tokio::test]
async fn deleting_an_absent_token_is_not_found() {
    let fixture = fixture("");

    let error = delete(&fixture, "ghost", "alice", None, false)
        .await
        .expect_err("deleting an absent token should fail");
    assert!(matches!(error, Error::NotFound(_)));
}

#[tokio::test]
async fn reindex_rebuilds_without_reusing_shard_keys() {
    let fixture = fixture("");

    store(&fixture, &request("t1", "alice", &basic_body("alice", 1)))
        .await
        .expect("create should succeed");
    store(&fixture, &request("t2", "bob", &basic_body("bob", 1)))
        .await
        .expect("create should succeed");

    let old_directory = fixture
        .service
        .owners_map()
        .expect("directory should be readable");

    let token_names = fixture
        .service
        .all_token_names()
        .expect("token enumeration should succeed");
    assert_eq!(token_names, ["t1", "t2"]);

    let lock = fixture.globals.lock_registry().await;
    let indexed = fixture
        .service
        .reindex(&token_names, &lock)
        .expect("re-index should succeed");
    drop(lock);
    assert_eq!(indexed, 2);

    let new_directory = fixture
        .service
        .owners_map()
        .expect("directory should be readable");

    assert_eq!(
        new_directory.keys().map(String::as_str).collect::<Vec<_>>(),
        ["alice", "bob"],
        "both owners should survive the rebuild"
    );
    for (owner, old_key) in &old_directory {
        assert_ne!(
            new_directory.get(owner),
            Some(old_key),
            "shard keys must never be reused across rebuilds"
        );

        let old_key =
            old_key.as_str().expect("directory values should be strings");
        assert!(
            fixture
                .service
                .db
                .fetch(old_key, true)
                .expect("fetch should succeed")
                .is_none(),
            "stale shards should be deleted"
        );
    }

    for token in ["t1", "t2"] {
        assert_index_coherent(&fixture, token);
    }
}

#[tokio::test]
async fn owner_directory_is_not_pruned_on_soft_delete() {
    let fixture = fixture("");

    store(&fixture, &request("t1", "alice", &basic_body("alice", 1)))
        .await
        .expect("create should succeed");
    delete(&fixture, "t1", "alice", None, false)
        .await
        .expect("soft delete should succeed");

    let owners =
        fixture.service.list_owners().expect("owners should be readable");
    assert_eq!(owners, ["alice"]);
}

#[tokio::test]
async fn one_shard_key_per_owner() {
    let fixture = fixture("");

    store(&fixture, &request("t1", "alice", &basic_body("alice", 1)))
        .await
        .expect("create should succeed");

    let directory = fixture
        .service
        .owners_map()
        .expect("directory should be readable");
    let first_key = directory.get("alice").cloned();

    store(&fixture, &request("t2", "alice", &basic_body("alice", 1)))
        .await
        .expect("create should succeed");

    let directory = fixture
        .service
        .owners_map()
        .expect("directory should be readable");
    assert_eq!(
        directory.get("alice").cloned(),
        first_key,
        "an existing owner keeps its shard key"
    );
    assert_eq!(directory.len(), 1);

    let entries = fixture
        .service
        .list_index_entries_for_owner("alice", true)
        .expect("listing should succeed");
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn listing_filters_on_parameter_values() {
    let fixture = fixture("");

    store(&fixture, &request("t1", "alice", &basic_body("alice", 1)))
        .await
        .expect("create should succeed");
    store(&fixture, &request("t2", "alice", &basic_body("alice", 2)))
        .await
        .expect("create should succeed");

    let mut options = ListOptions::default();
    options
        .parameter_filters
        .push(("cpus".to_owned(), ["2".to_owned()].into_iter().collect()));

    let listed = fixture
        .service
        .list_tokens(&options)
        .expect("listing should succeed");

    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("token"), Some(&json!("t2")));
}

#[tokio::test]
async fn listing_can_be_scoped_to_manageable_tokens() {
    let fixture = fixture("");

    store(&fixture, &request("t1", "alice", &basic_body("alice", 1)))
        .await
        .expect("create should succeed");
    store(&fixture, &request("t2", "bob", &basic_body("bob", 1)))
        .await
        .expect("create should succeed");

    let options = ListOptions {
        can_manage_as: Some("bob".to_owned()),
        ..ListOptions::default()
    };
    let listed = fixture
        .service
        .list_tokens(&options)
        .expect("listing should succeed");

    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("token"), Some(&json!("t2")));
}
