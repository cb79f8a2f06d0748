//! Get-or-create and versioned save on top of a DocumentStore

use crate::storage::traits::{DocumentStore, StoreError, StoreResult};
use crate::storage::Document;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Reads a document, creating an empty zero-version one if it is missing
///
/// Losing a creation race to a concurrent caller is not an error: the
/// loser re-reads and continues with the winner's document.
pub async fn get_or_create<S>(
    store: &dyn DocumentStore,
    collection: &str,
    kind: &str,
    name: &str,
) -> StoreResult<Document<S>>
where
    S: Serialize + DeserializeOwned + Default,
{
    match store.read_one(collection, kind, name).await {
        Ok(raw) => return raw.decode(),
        Err(StoreError::NotFound) => {}
        Err(e) => return Err(e),
    }

    let document = Document::new(kind, name, S::default());

    match store.create(collection, &document.to_raw()?).await {
        Ok(()) => {
            tracing::debug!(collection, kind, name, "Created document");
            Ok(document)
        }
        Err(StoreError::AlreadyExists) => {
            tracing::debug!(collection, kind, name, "Lost creation race, re-reading");
            store.read_one(collection, kind, name).await?.decode()
        }
        Err(e) => Err(e),
    }
}

/// Saves a document if nobody else has saved it since it was read
///
/// The in-memory version is bumped before the write and the pre-increment
/// value is sent as the expected version. On failure the in-memory version
/// is restored.
pub async fn save<S: Serialize>(
    store: &dyn DocumentStore,
    collection: &str,
    document: &mut Document<S>,
) -> StoreResult<()> {
    let expected = document.meta.version;
    document.meta.version += 1;

    let result = match document.to_raw() {
        Ok(raw) => {
            store
                .update_if_version(
                    collection,
                    &document.meta.kind,
                    &document.meta.name,
                    expected,
                    &raw,
                )
                .await
        }
        Err(e) => Err(e),
    };

    if result.is_err() {
        document.meta.version = expected;
    }

    result
}
