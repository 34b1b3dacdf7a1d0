use super::*;

#[test]
fn embedding_record_structure() {
    let record = EmbeddingRecord::new(
        "42",
        vec![0.1, 0.2, 0.3],
        VectorMetadata {
            document_id: Some(7),
            owner_id: Some(1),
            position: Some(0),
        },
    );

    assert_eq!(record.id, "42");
    assert_eq!(record.vector.len(), 3);
    assert_eq!(record.metadata.document_id, Some(7));
}

#[test]
fn embedding_record_serialization() {
    let record = EmbeddingRecord::new("9", vec![1.0], VectorMetadata::default());
    let json = serde_json::to_string(&record).expect("can serialize json");
    let deserialized: EmbeddingRecord = serde_json::from_str(&json).expect("can parse json");
    assert_eq!(record, deserialized);
}

#[test]
fn literals_are_quoted_and_escaped() {
    assert_eq!(quote_literal("12"), "'12'");
    assert_eq!(quote_literal("it's"), "'it''s'");
}
