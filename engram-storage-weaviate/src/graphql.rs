//! GraphQL query construction and response parsing

use engram_core::storage::{Collection, SearchFilter, SearchHit};
use serde_json::Value;
use uuid::Uuid;

/// Properties requested per collection. Keeping the field list explicit
/// catches schema drift as a query error instead of silent nulls.
pub fn properties(collection: Collection) -> &'static [&'static str] {
    match collection {
        Collection::Raw => &[
            "content",
            "content_hash",
            "user_id",
            "source_type",
            "source_id",
            "agent",
            "privacy_level",
            "tags",
            "cost_usd",
            "usage_count",
            "cost_savings",
            "created_at",
        ],
        Collection::Knowledge => &[
            "canonical_query",
            "answer_summary",
            "topic_cluster",
            "primary_intent",
            "related_topics",
            "extraction_confidence",
            "user_id",
            "created_at",
        ],
        Collection::Topics => &[
            "topic_slug",
            "summary_text",
            "user_id",
            "entity_map",
            "knowledge_depth",
            "knowledge_gaps",
            "source_entry_ids",
            "created_at",
        ],
        Collection::Domains => &[
            "domain_name",
            "user_id",
            "topology",
            "cross_topic_relationships",
            "strengths",
            "gaps",
            "emerging_themes",
            "source_topic_ids",
            "created_at",
        ],
        Collection::Insights => &[
            "insight_text",
            "insight_summary",
            "source",
            "insight_type",
            "user_id",
            "privacy_level",
            "confidence_score",
            "created_at",
        ],
    }
}

/// Build a near-vector Get query with an optional where filter.
pub fn near_vector_query(
    collection: Collection,
    vector: &[f32],
    limit: usize,
    filter: Option<&SearchFilter>,
) -> String {
    let vector_literal: String = {
        let mut out = String::with_capacity(vector.len() * 12);
        out.push('[');
        for (i, v) in vector.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&format!("{v}"));
        }
        out.push(']');
        out
    };

    let where_clause = filter
        .filter(|f| !f.equals.is_empty())
        .map(|f| {
            let operands: Vec<String> = f
                .equals
                .iter()
                .map(|(key, value)| {
                    let text = value.as_str().map_or_else(|| value.to_string(), String::from);
                    format!(
                        r#"{{path: ["{key}"], operator: Equal, valueText: {}}}"#,
                        Value::String(text)
                    )
                })
                .collect();
            format!(", where: {{operator: And, operands: [{}]}}", operands.join(", "))
        })
        .unwrap_or_default();

    format!(
        "{{ Get {{ {class}(nearVector: {{vector: {vector_literal}}}, limit: {limit}{where_clause}) \
         {{ {fields} _additional {{ id distance }} }} }} }}",
        class = collection.name(),
        fields = properties(collection).join(" "),
    )
}

/// Build an aggregate count query.
pub fn count_query(collection: Collection) -> String {
    format!("{{ Aggregate {{ {} {{ meta {{ count }} }} }} }}", collection.name())
}

/// Parse Get results into hits. Unparseable entries are skipped.
pub fn parse_hits(response: &Value, collection: Collection) -> Vec<SearchHit> {
    response["data"]["Get"][collection.name()]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let additional = &entry["_additional"];
                    let id = additional["id"]
                        .as_str()
                        .and_then(|s| Uuid::parse_str(s).ok())?;
                    let distance = additional["distance"].as_f64()? as f32;

                    let mut properties = entry.clone();
                    if let Some(map) = properties.as_object_mut() {
                        map.remove("_additional");
                    }
                    Some(SearchHit { id, distance, properties })
                })
                .collect()
        })
        .unwrap_or_default()
}
