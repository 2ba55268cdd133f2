//! The token registry: records, the owner index, and the mutation pipelines

mod data;
#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashSet};

pub(crate) use data::Data;
use once_cell::sync::Lazy;
use phf::phf_set;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{
    config::ClusterConfig,
    service::{authz, sending::RefreshRequest, validation},
    utils::{self, named_locks::LockToken},
    Config, Error, Result,
};

/// Fixed registry key of the owner directory.
pub(crate) const TOKEN_OWNERS_KEY: &str = "^TOKEN_OWNERS";

/// Prefix of minted owner-shard keys.
const OWNER_SHARD_PREFIX: &str = "^TOKEN_OWNERS_";

/// Keys describing the service a token resolves to.
pub(crate) static SERVICE_PARAMETER_KEYS: phf::Set<&'static str> = phf_set! {
    "authentication",
    "backend-proto",
    "cmd",
    "cmd-type",
    "concurrency-level",
    "cpus",
    "env",
    "health-check-url",
    "idle-timeout-mins",
    "interstitial-secs",
    "mem",
    "metadata",
    "metric-group",
    "name",
    "permitted-user",
    "ports",
    "run-as-user",
    "version",
};

/// Parameters a schedulable service description cannot do without. Only
/// consulted by the conditional-completeness rules below.
static REQUIRED_PARAMETER_KEYS: phf::Set<&'static str> = phf_set! {
    "cmd",
    "cpus",
    "mem",
    "run-as-user",
    "version",
};

/// Metadata users may set on their own tokens.
static USER_METADATA_KEYS: phf::Set<&'static str> = phf_set! {
    "cluster",
    "owner",
};

/// Metadata the registry maintains itself. Only administrative updates may
/// supply these.
static SYSTEM_METADATA_KEYS: phf::Set<&'static str> = phf_set! {
    "deleted",
    "last-update-time",
    "last-update-user",
    "previous",
    "root",
};

static TOKEN_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9\-_$.]*$")
        .expect("hardcoded regex is valid")
});

/// Hash a client presents when it expects the token to be absent (or
/// tombstoned).
static EMPTY_HASH: Lazy<String> =
    Lazy::new(|| token_hash(&JsonObject::new()));

/// The canonical in-memory form of registry values. `serde_json::Map` is
/// BTreeMap-backed, so serialization is key-ordered and hashing is stable
/// under reordered input.
pub(crate) type JsonObject = serde_json::Map<String, Value>;

pub(crate) fn is_token_data_key(key: &str) -> bool {
    SERVICE_PARAMETER_KEYS.contains(key)
        || USER_METADATA_KEYS.contains(key)
        || SYSTEM_METADATA_KEYS.contains(key)
}

/// One owner-shard slot: enough to list and filter without fetching the
/// token record itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct IndexEntry {
    pub(crate) hash: String,
    pub(crate) deleted: bool,
    #[serde(rename = "last-update-time")]
    pub(crate) last_update_time: u64,
}

pub(crate) fn make_index_entry(record: &JsonObject) -> IndexEntry {
    IndexEntry {
        hash: token_hash(record),
        deleted: record_deleted(record),
        last_update_time: record_last_update_time(record),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum UpdateMode {
    Normal,
    Admin,
}

pub(crate) struct StoreTokenRequest {
    pub(crate) token: String,
    /// Parameters plus metadata, with any `token` key already stripped.
    pub(crate) body: JsonObject,
    pub(crate) authenticated_user: String,
    pub(crate) if_match: Option<String>,
    pub(crate) update_mode: UpdateMode,
    /// `Host` header of the originating request, input to the cluster
    /// calculator.
    pub(crate) request_host: Option<String>,
}

#[derive(Debug)]
pub(crate) struct StoreOutcome {
    pub(crate) message: String,
    pub(crate) hash: String,
    pub(crate) description: JsonObject,
    pub(crate) owner: String,
    pub(crate) no_changes: bool,
}

#[derive(Debug)]
pub(crate) struct DeleteOutcome {
    pub(crate) message: String,
    pub(crate) owner: Option<String>,
    pub(crate) hard: bool,
}

#[derive(Default)]
pub(crate) struct ListOptions {
    /// Restrict to these owners; empty means all owners in the directory.
    pub(crate) owners: HashSet<String>,
    pub(crate) include_deleted: bool,
    pub(crate) show_metadata: bool,
    /// Keep only tokens this principal could manage.
    pub(crate) can_manage_as: Option<String>,
    /// Parameter name → accepted stringified values.
    pub(crate) parameter_filters: Vec<(String, HashSet<String>)>,
}

pub(crate) struct Service {
    pub(crate) db: &'static dyn Data,
    authz: authz::Service,
    validator: validation::Service,
    cluster: ClusterConfig,
    root: String,
    hostnames: HashSet<String>,
    history_length: usize,
    owner_token_limit: Option<usize>,
}

impl Service {
    pub(crate) fn load(
        db: &'static dyn Data,
        config: &Config,
        authz: authz::Service,
        validator: validation::Service,
    ) -> Self {
        Self {
            db,
            authz,
            validator,
            cluster: config.cluster.clone(),
            root: config.token_root().to_owned(),
            hostnames: config.hostnames.iter().cloned().collect(),
            history_length: config.history_length,
            owner_token_limit: config.owner_token_limit,
        }
    }

    /// Raw token record, revision chain included.
    pub(crate) fn token(
        &self,
        name: &str,
        refresh: bool,
    ) -> Result<Option<JsonObject>> {
        self.db.fetch(name, refresh)
    }

    fn directory(&self, refresh: bool) -> Result<JsonObject> {
        Ok(self.db.fetch(TOKEN_OWNERS_KEY, refresh)?.unwrap_or_default())
    }

    fn shard(&self, key: &str, refresh: bool) -> Result<JsonObject> {
        Ok(self.db.fetch(key, refresh)?.unwrap_or_default())
    }

    /// The raw owner directory, for operator inspection.
    pub(crate) fn owners_map(&self) -> Result<JsonObject> {
        self.directory(false)
    }

    pub(crate) fn list_owners(&self) -> Result<Vec<String>> {
        Ok(self.directory(false)?.keys().cloned().collect())
    }

    /// Every token name currently stored, feeding re-index.
    pub(crate) fn all_token_names(&self) -> Result<Vec<String>> {
        self.db
            .keys()
            .filter(|key| {
                key.as_ref().map_or(true, |key| !key.starts_with('^'))
            })
            .collect()
    }

    pub(crate) fn list_index_entries_for_owner(
        &self,
        owner: &str,
        refresh: bool,
    ) -> Result<Vec<(String, IndexEntry)>> {
        let directory = self.directory(refresh)?;

        let Some(key) = owner_shard_key(&directory, owner)? else {
            return Ok(Vec::new());
        };

        decode_shard(&self.shard(&key, refresh)?)
    }

    /// Returns the owner's shard key, minting one and persisting the updated
    /// directory if the owner is new. Callers must hold the registry lock.
    fn ensure_owner_key(
        &self,
        directory: &mut JsonObject,
        owner: &str,
    ) -> Result<String> {
        if owner.trim().is_empty() {
            return Err(Error::bad_request("Owner must not be blank"));
        }

        if let Some(existing) = owner_shard_key(directory, owner)? {
            return Ok(existing);
        }

        let key = new_owner_shard_key();
        directory.insert(owner.to_owned(), Value::String(key.clone()));
        self.db.store(TOKEN_OWNERS_KEY, directory)?;

        Ok(key)
    }

    fn validate_token_name(&self, token: &str) -> Result<()> {
        if token.trim().is_empty() {
            return Err(Error::bad_request("Token name must not be blank"));
        }

        if self.hostnames.contains(token) {
            return Err(Error::BadRequest(format!(
                "Token name {token} is reserved"
            )));
        }

        if !TOKEN_NAME_RE.is_match(token) {
            return Err(Error::BadRequest(format!(
                "Token name {token} is invalid; names must start with a \
                 letter and may only contain letters, digits, and -_$."
            )));
        }

        Ok(())
    }

    /// Everything that can be rejected without consulting registry state.
    /// Runs before the registry lock is taken.
    pub(crate) fn validate_store_request(
        &self,
        request: &StoreTokenRequest,
    ) -> Result<()> {
        self.validate_token_name(&request.token)?;

        let admin_mode = request.update_mode == UpdateMode::Admin;
        let body = &request.body;

        let mut user_editable = false;
        let mut admin_only: Vec<&str> = Vec::new();

        for key in body.keys() {
            if !is_token_data_key(key) {
                return Err(Error::BadRequest(format!(
                    "Unsupported key {key} in request body"
                )));
            }

            if SERVICE_PARAMETER_KEYS.contains(key.as_str())
                || USER_METADATA_KEYS.contains(key.as_str())
            {
                user_editable = true;
            }

            if !admin_mode && SYSTEM_METADATA_KEYS.contains(key.as_str()) {
                admin_only.push(key.as_str());
            }
        }

        if !admin_only.is_empty() {
            admin_only.sort_unstable();
            return Err(Error::BadRequest(format!(
                "The following fields may only be set with \
                 update-mode=admin: {}",
                admin_only.join(", ")
            )));
        }

        if !user_editable {
            return Err(Error::bad_request(
                "Request body contains no user-editable fields",
            ));
        }

        validate_metadata_shape(body)?;
        validate_conditional_completeness(body)?;
        self.validator.validate_service_description(body)?;

        Ok(())
    }

    /// The create/update pipeline. `validate_store_request` must have
    /// accepted the request already, and the registry lock must be held.
    #[tracing::instrument(
        skip(self, request, _lock),
        fields(token = %request.token),
    )]
    pub(crate) fn store_token(
        &self,
        request: &StoreTokenRequest,
        _lock: &LockToken,
    ) -> Result<StoreOutcome> {
        let token = &request.token;
        let user = &request.authenticated_user;
        let admin_mode = request.update_mode == UpdateMode::Admin;

        let existing = self.db.fetch(token, true)?;
        let existing_owner = existing
            .as_ref()
            .and_then(record_owner)
            .map(ToOwned::to_owned);

        let mut body_params = JsonObject::new();
        let mut body_metadata = JsonObject::new();
        for (key, value) in &request.body {
            if SERVICE_PARAMETER_KEYS.contains(key.as_str()) {
                body_params.insert(key.clone(), value.clone());
            } else {
                body_metadata.insert(key.clone(), value.clone());
            }
        }

        let proposed_owner = body_metadata
            .get("owner")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .or_else(|| existing_owner.clone())
            .unwrap_or_else(|| user.clone());

        match request.update_mode {
            UpdateMode::Admin => {
                if !self.authz.can_administer_token(user, token) {
                    return Err(Error::Forbidden(format!(
                        "{user} is not allowed to administer {token}"
                    )));
                }

                if existing.is_some() && request.if_match.is_none() {
                    return Err(Error::bad_request(
                        "An If-Match header is required to update an \
                         existing token in admin mode",
                    ));
                }
            }
            UpdateMode::Normal => {
                if let Some(run_as_user) =
                    body_params.get("run-as-user").and_then(Value::as_str)
                {
                    if run_as_user != "*"
                        && !self.authz.can_run_as(user, run_as_user)
                    {
                        return Err(Error::Forbidden(format!(
                            "{user} is not allowed to run services as \
                             {run_as_user}"
                        )));
                    }
                }

                match &existing_owner {
                    Some(current) if *current != proposed_owner => {
                        if !self
                            .authz
                            .can_manage_token(user, token, Some(current))
                        {
                            return Err(Error::Forbidden(format!(
                                "{user} is not allowed to manage {token}"
                            )));
                        }
                    }
                    Some(_) => {}
                    None => {
                        if !self.authz.can_run_as(user, &proposed_owner) {
                            return Err(Error::Forbidden(format!(
                                "{user} is not allowed to create tokens \
                                 owned by {proposed_owner}"
                            )));
                        }
                    }
                }
            }
        }

        if proposed_owner.trim().is_empty() {
            return Err(Error::bad_request("Owner must not be blank"));
        }

        // Body assembly: defaults first, then the request's metadata on top
        let now = utils::millis_since_unix_epoch();
        let root = existing
            .as_ref()
            .and_then(|record| record.get("root"))
            .and_then(Value::as_str)
            .unwrap_or(&self.root)
            .to_owned();

        let mut new_record = body_params;
        new_record.insert(
            "cluster".to_owned(),
            Value::String(
                self.cluster.calculate(request.request_host.as_deref()),
            ),
        );
        new_record.insert("last-update-time".to_owned(), now.into());
        new_record
            .insert("last-update-user".to_owned(), user.clone().into());
        new_record.insert("owner".to_owned(), proposed_owner.clone().into());
        new_record.insert("root".to_owned(), root.into());
        for (key, value) in body_metadata {
            new_record.insert(key, value);
        }

        if let Some(value) = new_record.get_mut("last-update-time") {
            if let Some(text) = value.as_str() {
                let Some(millis) = utils::iso8601_to_millis(text) else {
                    return Err(Error::bad_request(
                        "last-update-time was not a valid ISO-8601 \
                         timestamp",
                    ));
                };
                *value = millis.into();
            }
        }

        // Optimistic concurrency: a tombstoned or absent record presents as
        // the hash of the empty object
        let existing_hash = existing
            .as_ref()
            .filter(|record| !record_deleted(record))
            .map_or_else(|| EMPTY_HASH.clone(), token_hash);
        if let Some(expected) = &request.if_match {
            if *expected != existing_hash {
                return Err(Error::PreconditionFailed(format!(
                    "Stale token version for {token}"
                )));
            }
        }

        // Idempotence short-circuit. Tombstoned records never match, a
        // repost of identical parameters must resurrect them.
        if !admin_mode {
            if let Some(existing) =
                existing.as_ref().filter(|record| !record_deleted(record))
            {
                if user_projection(&new_record) == user_projection(existing)
                {
                    return Ok(StoreOutcome {
                        message: format!("No changes detected for {token}"),
                        hash: token_hash(existing),
                        description: user_projection(existing),
                        owner: proposed_owner,
                        no_changes: true,
                    });
                }
            }
        }

        let mut directory = self.directory(true)?;

        // Quota, administrative writes bypass it
        if !admin_mode {
            if let Some(limit) = self.owner_token_limit {
                if let Some(shard_key) =
                    owner_shard_key(&directory, &proposed_owner)?
                {
                    let live = decode_shard(&self.shard(&shard_key, true)?)?
                        .iter()
                        .filter(|(name, entry)| {
                            name != token && !entry.deleted
                        })
                        .count();

                    if live >= limit {
                        return Err(Error::QuotaExceeded(format!(
                            "Owner {proposed_owner} is already at the \
                             limit of {limit} tokens"
                        )));
                    }
                }
            }
        }

        // Token record first: a reader that sees the new shard entry can
        // always fetch the new record
        let mut stored = new_record;
        if !stored.contains_key("previous") {
            if let Some(existing_raw) = &existing {
                stored.insert(
                    "previous".to_owned(),
                    Value::Object(existing_raw.clone()),
                );
            }
        }
        truncate_history(&mut stored, self.history_length);
        self.db.store(token, &stored)?;

        // New shard entry second
        let shard_key =
            self.ensure_owner_key(&mut directory, &proposed_owner)?;
        let mut shard = self.shard(&shard_key, true)?;
        let entry = make_index_entry(&stored);
        let hash = entry.hash.clone();
        shard.insert(token.clone(), serde_json::to_value(entry)?);
        self.db.store(&shard_key, &shard)?;

        // Old-owner removal last: the token is never missing from both
        // shards, though it may transiently appear in both
        if let Some(previous_owner) = existing_owner
            .as_ref()
            .filter(|previous| **previous != proposed_owner)
        {
            if previous_owner.trim().is_empty() {
                warn!(
                    %token,
                    "Existing record had a blank owner, skipping index \
                     removal"
                );
            } else {
                // A non-blank owner of a stored record always has a shard
                // key; its absence is a storage fault
                let Some(old_key) =
                    owner_shard_key(&directory, previous_owner)?
                else {
                    return Err(Error::bad_database(
                        "Owner directory is missing the previous owner's \
                         shard key.",
                    ));
                };

                let mut old_shard = self.shard(&old_key, true)?;
                if old_shard.remove(token.as_str()).is_some() {
                    self.db.store(&old_key, &old_shard)?;
                }
            }
        }

        let message = if existing.is_some() {
            format!("Successfully updated {token}")
        } else {
            format!("Successfully created {token}")
        };

        Ok(StoreOutcome {
            message,
            hash,
            description: user_projection(&stored),
            owner: proposed_owner,
            no_changes: false,
        })
    }

    /// The delete pipeline. The registry lock must be held.
    #[tracing::instrument(skip(self, _lock))]
    pub(crate) fn delete_token(
        &self,
        token: &str,
        user: &str,
        if_match: Option<&str>,
        hard: bool,
        _lock: &LockToken,
    ) -> Result<DeleteOutcome> {
        let Some(existing) = self
            .db
            .fetch(token, true)?
            .filter(|record| !is_empty_shell(record))
        else {
            return Err(Error::NotFound(format!(
                "Couldn't find token {token}"
            )));
        };

        let existing_hash = if record_deleted(&existing) {
            EMPTY_HASH.clone()
        } else {
            token_hash(&existing)
        };
        if let Some(expected) = if_match {
            if expected != existing_hash {
                return Err(Error::PreconditionFailed(format!(
                    "Stale token version for {token}"
                )));
            }
        }

        let owner = record_owner(&existing).map(ToOwned::to_owned);

        if hard {
            if !self.authz.can_administer_token(user, token) {
                return Err(Error::Forbidden(format!(
                    "{user} is not allowed to administer {token}"
                )));
            }

            if !record_deleted(&existing) && if_match.is_none() {
                return Err(Error::bad_request(
                    "Hard deleting a live token requires an If-Match \
                     header",
                ));
            }

            self.db.remove(token)?;

            let directory = self.directory(true)?;
            match owner.as_deref().filter(|owner| !owner.trim().is_empty())
            {
                Some(owner) => {
                    // A non-blank owner of a stored record always has a
                    // shard key; its absence is a storage fault
                    let Some(shard_key) =
                        owner_shard_key(&directory, owner)?
                    else {
                        return Err(Error::bad_database(
                            "Owner directory is missing the owner's shard \
                             key.",
                        ));
                    };

                    let mut shard = self.shard(&shard_key, true)?;
                    if shard.remove(token).is_some() {
                        self.db.store(&shard_key, &shard)?;
                    }
                }
                None => warn!(
                    %token,
                    "Deleted token had no owner, skipping index update"
                ),
            }

            return Ok(DeleteOutcome {
                message: format!("Successfully deleted {token}"),
                owner,
                hard: true,
            });
        }

        if !self.authz.can_manage_token(user, token, owner.as_deref()) {
            return Err(Error::Forbidden(format!(
                "{user} is not allowed to manage {token}"
            )));
        }

        let now = utils::millis_since_unix_epoch();
        let mut stored = existing.clone();
        stored.insert("deleted".to_owned(), Value::Bool(true));
        stored.insert("last-update-time".to_owned(), now.into());
        stored.insert("last-update-user".to_owned(), user.to_owned().into());
        stored.insert("previous".to_owned(), Value::Object(existing));
        truncate_history(&mut stored, self.history_length);
        self.db.store(token, &stored)?;

        let mut directory = self.directory(true)?;
        match owner.as_deref().filter(|owner| !owner.trim().is_empty()) {
            Some(owner) => {
                let shard_key =
                    self.ensure_owner_key(&mut directory, owner)?;
                let mut shard = self.shard(&shard_key, true)?;
                shard.insert(
                    token.to_owned(),
                    serde_json::to_value(make_index_entry(&stored))?,
                );
                self.db.store(&shard_key, &shard)?;
            }
            None => warn!(
                %token,
                "Deleted token had no owner, skipping index update"
            ),
        }

        Ok(DeleteOutcome {
            message: format!("Successfully deleted {token}"),
            owner,
            hard: false,
        })
    }

    /// Rebuilds the owner directory and every shard from the given token
    /// names. A concurrent reader sees either the old directory pointing at
    /// still-intact old shards or the new directory pointing at
    /// already-written new shards; never an empty window. The registry lock
    /// must be held.
    #[tracing::instrument(skip_all, fields(tokens = token_names.len()))]
    pub(crate) fn reindex(
        &self,
        token_names: &[String],
        _lock: &LockToken,
    ) -> Result<usize> {
        let old_directory = self.directory(true)?;

        let mut shards: BTreeMap<String, JsonObject> = BTreeMap::new();
        let mut indexed = 0;

        for name in token_names {
            let Some(record) = self.db.fetch(name, true)? else {
                continue;
            };

            let Some(owner) = record_owner(&record)
                .filter(|owner| !owner.trim().is_empty())
                .map(ToOwned::to_owned)
            else {
                warn!(
                    token = %name,
                    "Skipping token without an owner during re-index"
                );
                continue;
            };

            shards.entry(owner).or_default().insert(
                name.clone(),
                serde_json::to_value(make_index_entry(&record))?,
            );
            indexed += 1;
        }

        // All new shards must exist before the directory points at them
        let mut new_directory = JsonObject::new();
        for (owner, shard) in &shards {
            let key = new_owner_shard_key();
            self.db.store(&key, shard)?;
            new_directory.insert(owner.clone(), Value::String(key));
        }

        self.db.store(TOKEN_OWNERS_KEY, &new_directory)?;

        let new_keys: HashSet<&str> =
            new_directory.values().filter_map(Value::as_str).collect();
        for old_key in old_directory.values().filter_map(Value::as_str) {
            if !new_keys.contains(old_key) {
                self.db.remove(old_key)?;
            }
        }

        Ok(indexed)
    }

    /// Applies a peer's `tokens/refresh` request: re-reads the named
    /// records from authoritative state, dropping any cached copies.
    #[tracing::instrument(skip(self))]
    pub(crate) fn refresh(&self, request: &RefreshRequest) -> Result<()> {
        if request.index {
            let directory = self.directory(true)?;
            for key in directory.values().filter_map(Value::as_str) {
                self.db.fetch(key, true)?;
            }
        }

        if let Some(token) = &request.token {
            self.db.fetch(token, true)?;

            if let Some(owner) = &request.owner {
                let directory = self.directory(true)?;
                if let Some(key) = owner_shard_key(&directory, owner)? {
                    self.db.fetch(&key, true)?;
                }
            }
        }

        Ok(())
    }

    /// Owner-scoped enumeration with predicate filters.
    pub(crate) fn list_tokens(
        &self,
        options: &ListOptions,
    ) -> Result<Vec<JsonObject>> {
        let directory = self.directory(false)?;
        let mut results = Vec::new();

        for (owner, shard_key) in &directory {
            if !options.owners.is_empty() && !options.owners.contains(owner)
            {
                continue;
            }

            let shard_key = shard_key.as_str().ok_or_else(|| {
                Error::bad_database(
                    "Owner directory entry is not a usable shard key.",
                )
            })?;

            for (token, entry) in
                decode_shard(&self.shard(shard_key, false)?)?
            {
                if entry.deleted && !options.include_deleted {
                    continue;
                }

                if let Some(manager) = &options.can_manage_as {
                    if !self.authz.can_manage_token(
                        manager,
                        &token,
                        Some(owner),
                    ) {
                        continue;
                    }
                }

                if !options.parameter_filters.is_empty() {
                    let Some(record) = self.db.fetch(&token, false)? else {
                        continue;
                    };
                    if !matches_parameter_filters(
                        &record,
                        &options.parameter_filters,
                    ) {
                        continue;
                    }
                }

                let mut item = JsonObject::new();
                item.insert("token".to_owned(), token.into());
                item.insert("owner".to_owned(), owner.clone().into());
                if options.show_metadata {
                    item.insert("deleted".to_owned(), entry.deleted.into());
                    item.insert("etag".to_owned(), entry.hash.into());
                    item.insert(
                        "last-update-time".to_owned(),
                        utils::millis_to_iso8601(entry.last_update_time)
                            .map_or_else(
                                || entry.last_update_time.into(),
                                Value::String,
                            ),
                    );
                }
                results.push(item);
            }
        }

        Ok(results)
    }
}

/// Restricts a record to the known token-data keys, dropping nulls and the
/// revision chain. This is exactly what the content hash covers.
pub(crate) fn sanitize(record: &JsonObject) -> JsonObject {
    record
        .iter()
        .filter(|(key, value)| {
            is_token_data_key(key) && *key != "previous" && !value.is_null()
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Content hash of a record: SHA-256 over the canonical serialization of
/// its sanitized form. Doubles as the ETag.
pub(crate) fn token_hash(record: &JsonObject) -> String {
    let bytes = serde_json::to_vec(&sanitize(record))
        .expect("maps of JSON values always serialize");
    utils::calculate_hash(&bytes)
}

/// The stored service description as a client sees it: parameters plus
/// user-settable metadata.
pub(crate) fn user_projection(record: &JsonObject) -> JsonObject {
    record
        .iter()
        .filter(|(key, value)| {
            (SERVICE_PARAMETER_KEYS.contains(key.as_str())
                || USER_METADATA_KEYS.contains(key.as_str()))
                && !value.is_null()
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Renders a record for a `GET /token` response.
pub(crate) fn describe(
    record: &JsonObject,
    include_metadata: bool,
) -> JsonObject {
    let mut body = user_projection(record);

    if include_metadata {
        for key in ["deleted", "last-update-user", "root"] {
            if let Some(value) = record.get(key).filter(|v| !v.is_null()) {
                body.insert(key.to_owned(), value.clone());
            }
        }

        if let Some(millis) =
            record.get("last-update-time").and_then(Value::as_u64)
        {
            body.insert(
                "last-update-time".to_owned(),
                utils::millis_to_iso8601(millis)
                    .map_or_else(|| millis.into(), Value::String),
            );
        }
    }

    body
}

pub(crate) fn record_owner(record: &JsonObject) -> Option<&str> {
    record.get("owner").and_then(Value::as_str)
}

pub(crate) fn record_deleted(record: &JsonObject) -> bool {
    record.get("deleted").and_then(Value::as_bool).unwrap_or(false)
}

fn record_last_update_time(record: &JsonObject) -> u64 {
    record.get("last-update-time").and_then(Value::as_u64).unwrap_or(0)
}

/// A record with no parameters and no user metadata is treated as absent.
fn is_empty_shell(record: &JsonObject) -> bool {
    !record.keys().any(|key| {
        SERVICE_PARAMETER_KEYS.contains(key.as_str())
            || USER_METADATA_KEYS.contains(key.as_str())
    })
}

fn new_owner_shard_key() -> String {
    format!("{OWNER_SHARD_PREFIX}{}", uuid::Uuid::new_v4())
}

/// Looks an owner up in the directory. `Ok(None)` means the owner has no
/// shard; a present but unusable entry is a storage-level fault.
fn owner_shard_key(
    directory: &JsonObject,
    owner: &str,
) -> Result<Option<String>> {
    match directory.get(owner) {
        None => Ok(None),
        Some(Value::String(key)) if !key.is_empty() => Ok(Some(key.clone())),
        Some(_) => Err(Error::bad_database(
            "Owner directory entry is not a usable shard key.",
        )),
    }
}

fn decode_shard(shard: &JsonObject) -> Result<Vec<(String, IndexEntry)>> {
    shard
        .iter()
        .map(|(token, entry)| {
            serde_json::from_value(entry.clone())
                .map(|entry| (token.clone(), entry))
                .map_err(|_| {
                    Error::bad_database("Owner shard entry is malformed.")
                })
        })
        .collect()
}

/// Clamps the embedded revision chain to at most `limit` revisions,
/// dropping the oldest. The chain is flattened to a sequence, clamped, and
/// re-nested, rather than walked as a pointer graph.
fn truncate_history(record: &mut JsonObject, limit: usize) {
    let mut revisions = Vec::new();

    let mut current = record.remove("previous");
    while let Some(Value::Object(mut previous)) = current {
        current = previous.remove("previous");
        revisions.push(previous);

        if revisions.len() == limit {
            break;
        }
    }

    // Re-nest from the oldest kept revision outward
    let mut tail: Option<JsonObject> = None;
    for mut revision in revisions.into_iter().rev() {
        if let Some(older) = tail {
            revision.insert("previous".to_owned(), Value::Object(older));
        }
        tail = Some(revision);
    }

    if let Some(chain) = tail {
        record.insert("previous".to_owned(), Value::Object(chain));
    }
}

fn matches_parameter_filters(
    record: &JsonObject,
    filters: &[(String, HashSet<String>)],
) -> bool {
    filters.iter().all(|(name, values)| {
        record.get(name).is_some_and(|value| {
            let text = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            values.contains(&text)
        })
    })
}

fn validate_metadata_shape(body: &JsonObject) -> Result<()> {
    for (key, value) in body {
        let ok = match key.as_str() {
            "owner" => {
                value.as_str().is_some_and(|owner| !owner.trim().is_empty())
            }
            "cluster" | "root" | "last-update-user" => value.is_string(),
            "deleted" => value.is_boolean(),
            "last-update-time" => {
                value.is_string() || value.as_u64().is_some()
            }
            "previous" => value.is_object(),
            _ => true,
        };

        if !ok {
            return Err(Error::BadRequest(format!(
                "Invalid value for {key}"
            )));
        }
    }

    Ok(())
}

fn validate_conditional_completeness(body: &JsonObject) -> Result<()> {
    if body.get("authentication").and_then(Value::as_str)
        == Some("disabled")
    {
        if body.get("permitted-user").and_then(Value::as_str) != Some("*") {
            return Err(Error::bad_request(
                "Tokens with authentication disabled must specify \
                 permitted-user as *",
            ));
        }
        require_all_required_parameters(body, "authentication is disabled")?;
    }

    if body.contains_key("interstitial-secs") {
        require_all_required_parameters(
            body,
            "interstitial-secs is specified",
        )?;
    }

    Ok(())
}

fn require_all_required_parameters(
    body: &JsonObject,
    reason: &str,
) -> Result<()> {
    let mut missing: Vec<&str> = REQUIRED_PARAMETER_KEYS
        .iter()
        .filter(|key| !body.contains_key(**key))
        .copied()
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    missing.sort_unstable();
    Err(Error::BadRequest(format!(
        "Because {reason}, all required parameters must be specified; \
         missing: {}",
        missing.join(", ")
    )))
}

