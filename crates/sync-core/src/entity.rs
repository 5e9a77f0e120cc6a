use doc_store::{Document, Snapshot};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::Live;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to decode document {id}: {source}")]
    Decode {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("expected a single document, got a query result")]
    UnexpectedShape,
}

/// Typed view of a store document. Each entity validates its own shape once, where the
/// snapshot enters the process.
pub trait FromDocument: Sized {
    fn from_document(doc: &Document) -> Result<Self, ProjectionError>;
}

impl FromDocument for Document {
    fn from_document(doc: &Document) -> Result<Self, ProjectionError> {
        Ok(doc.clone())
    }
}

/// Deserialize the document fields into `T`, exposing the document id as an `id` field
/// unless the document already carries one.
pub fn decode_fields<T: DeserializeOwned>(doc: &Document) -> Result<T, ProjectionError> {
    let mut fields = doc.fields.clone();
    fields
        .entry("id")
        .or_insert_with(|| Value::String(doc.id.clone()));
    serde_json::from_value(Value::Object(fields)).map_err(|source| ProjectionError::Decode {
        id: doc.id.clone(),
        source,
    })
}

/// Project a single-document snapshot. Documents that fail validation surface as `Absent`.
pub fn project_live<T: FromDocument>(live: &Live<Snapshot>) -> Live<T> {
    let result = match live {
        Live::Loading => return Live::Loading,
        Live::Absent | Live::Ready(Snapshot::Absent) => return Live::Absent,
        Live::Ready(Snapshot::Document(doc)) => T::from_document(doc),
        Live::Ready(Snapshot::Documents(_)) => Err(ProjectionError::UnexpectedShape),
    };
    match result {
        Ok(value) => Live::Ready(value),
        Err(err) => {
            warn!(target = "sync.entity", error = %err, "dropping document that failed projection");
            Live::Absent
        }
    }
}
