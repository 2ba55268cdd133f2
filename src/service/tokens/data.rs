use super::JsonObject;
use crate::Result;

/// Storage seam for the token registry: an opaque string key to JSON object
/// store.
///
/// Reads are eventually consistent across replicas; a write made here is
/// visible to subsequent reads on the same replica. Passing `refresh` forces
/// a read of authoritative state, bypassing (and repopulating) any
/// read-through cache the implementation keeps.
pub(crate) trait Data: Send + Sync {
    fn fetch(&self, key: &str, refresh: bool) -> Result<Option<JsonObject>>;

    fn store(&self, key: &str, value: &JsonObject) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// All stored keys, token names and index keys alike.
    fn keys<'a>(&'a self) -> Box<dyn Iterator<Item = Result<String>> + 'a>;
}
