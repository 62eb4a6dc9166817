use crate::ingest::ParsedRecord;
use crate::vector_store::StoreEntry;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub struct VectorizedRecord {
    pub record: ParsedRecord,
    pub vector: Option<Vec<f32>>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MissingVector,
    EmptyVector,
    /// Cosine similarity is undefined for it and hosted stores reject it.
    ZeroVector,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DroppedRecord {
    pub id: String,
    pub reason: DropReason,
}

#[derive(Debug, Default, Clone)]
pub struct Conversion {
    pub entries: Vec<StoreEntry>,
    pub dropped: Vec<DroppedRecord>,
}

/// Pairs records with the vectors produced for them, in order.
pub fn attach_vectors(records: Vec<ParsedRecord>, vectors: Vec<Vec<f32>>) -> Vec<VectorizedRecord> {
    let mut vectors = vectors.into_iter();
    records
        .into_iter()
        .map(|record| VectorizedRecord {
            record,
            vector: vectors.next(),
        })
        .collect()
}

/// Keeps only the id and values of each record.
pub fn to_store_entries(records: Vec<VectorizedRecord>) -> Conversion {
    let mut conversion = Conversion::default();
    for VectorizedRecord { record, vector } in records {
        let id = record.id.to_string();
        let reason = match vector {
            None => DropReason::MissingVector,
            Some(v) if v.is_empty() => DropReason::EmptyVector,
            Some(v) if v.iter().all(|x| *x == 0.0) => DropReason::ZeroVector,
            Some(values) => {
                conversion.entries.push(StoreEntry { id, values });
                continue;
            }
        };
        conversion.dropped.push(DroppedRecord { id, reason });
    }
    conversion
}
