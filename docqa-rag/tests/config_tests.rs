//! Configuration defaults, validation and environment parsing.

use std::collections::HashMap;
use std::time::Duration;

use docqa_rag::config::{ChunkUnit, ProviderConfig, RagConfig};
use docqa_rag::error::RagError;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> =
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_match_documented_values() {
    let config = RagConfig::default();
    assert_eq!(config.chunk_size, 1000);
    assert_eq!(config.chunk_overlap, 200);
    assert_eq!(config.chunk_unit, ChunkUnit::Characters);
    assert_eq!(config.top_k, 10);
    assert!((config.similarity_threshold - 0.3).abs() < f32::EPSILON);
    assert!((config.lexical_threshold_scale - 0.5).abs() < f32::EPSILON);
    assert_eq!(config.max_document_bytes, 50 * 1024 * 1024);
    assert_eq!(config.request_deadline(), Duration::from_secs(120));
    assert_eq!(config.retry.max_retries, 3);
}

#[test]
fn builder_rejects_overlap_not_below_size() {
    let err = RagConfig::builder().chunk_size(100).chunk_overlap(100).build().unwrap_err();
    assert!(matches!(err, RagError::ConfigError(_)));
}

#[test]
fn builder_rejects_out_of_range_threshold() {
    let err = RagConfig::builder().similarity_threshold(1.5).build().unwrap_err();
    assert!(matches!(err, RagError::ConfigError(_)));
}

#[test]
fn builder_rejects_context_budget_smaller_than_a_chunk() {
    let err = RagConfig::builder().chunk_size(500).max_context_chars(100).build().unwrap_err();
    assert!(matches!(err, RagError::ConfigError(_)));
}

#[test]
fn word_chunks_are_budgeted_in_words() {
    let config = RagConfig::builder().chunk_unit(ChunkUnit::Words).build().unwrap();
    assert_eq!(config.context_budget(), config.max_context_words);
    assert!(config.context_budget() >= config.chunk_size);

    let err = RagConfig::builder()
        .chunk_unit(ChunkUnit::Words)
        .chunk_size(800)
        .max_context_words(500)
        .build()
        .unwrap_err();
    match err {
        RagError::ConfigError(message) => assert!(message.contains("max_context_words")),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn builder_rejects_invalid_lexical_scale() {
    for scale in [0.0, -0.5, 1.5, f32::NAN, f32::INFINITY] {
        let err = RagConfig::builder().lexical_threshold_scale(scale).build().unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)), "scale {scale} was accepted");
    }
    assert!(RagConfig::builder().lexical_threshold_scale(1.0).build().is_ok());
}

#[test]
fn oversized_document_limit_is_a_config_error() {
    let err = RagConfig::from_lookup(lookup(&[("DOCQA_MAX_DOC_SIZE_MB", "18446744073709551615")]))
        .unwrap_err();
    match err {
        RagError::ConfigError(message) => assert!(message.contains("DOCQA_MAX_DOC_SIZE_MB")),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn env_overrides_defaults() {
    let config = RagConfig::from_lookup(lookup(&[
        ("DOCQA_CHUNK_SIZE", "300"),
        ("DOCQA_CHUNK_OVERLAP", "30"),
        ("DOCQA_CHUNK_UNIT", "words"),
        ("DOCQA_TOP_K", "3"),
        ("DOCQA_MAX_DOC_SIZE_MB", "2"),
        ("DOCQA_MAX_RETRIES", "5"),
    ]))
    .unwrap();

    assert_eq!(config.chunk_size, 300);
    assert_eq!(config.chunk_overlap, 30);
    assert_eq!(config.chunk_unit, ChunkUnit::Words);
    assert_eq!(config.top_k, 3);
    assert_eq!(config.max_document_bytes, 2 * 1024 * 1024);
    assert_eq!(config.retry.max_retries, 5);
}

#[test]
fn unparsable_env_value_names_the_variable() {
    let err = RagConfig::from_lookup(lookup(&[("DOCQA_TOP_K", "many")])).unwrap_err();
    match err {
        RagError::ConfigError(message) => assert!(message.contains("DOCQA_TOP_K")),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn provider_requires_api_key() {
    let err = ProviderConfig::from_lookup(lookup(&[])).unwrap_err();
    assert!(matches!(err, RagError::ConfigError(_)));
}

#[test]
fn openrouter_keys_select_openrouter() {
    let config = ProviderConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-or-v1-abc")])).unwrap();
    assert_eq!(config.base_url, "https://openrouter.ai/api/v1");
    assert_eq!(config.chat_model, "openai/gpt-4o-mini");

    let config = ProviderConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-proj-abc")])).unwrap();
    assert_eq!(config.base_url, "https://api.openai.com/v1");
    assert!(config.remote_embeddings);
}

#[test]
fn provider_overrides_and_lexical_mode() {
    let config = ProviderConfig::from_lookup(lookup(&[
        ("OPENAI_API_KEY", "sk-test"),
        ("OPENAI_BASE_URL", "http://localhost:8080/v1/"),
        ("DOCQA_CHAT_MODEL", "local-model"),
        ("DOCQA_EMBEDDINGS", "lexical"),
    ]))
    .unwrap();

    assert_eq!(config.base_url, "http://localhost:8080/v1");
    assert_eq!(config.chat_model, "local-model");
    assert!(!config.remote_embeddings);
}
