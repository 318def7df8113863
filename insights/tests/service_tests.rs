mod support;

use insights::detectors::RULE_BASED;
use insights::error::InsightsError;
use insights::model::{
    FeatureConfigUpdate, FeatureKind, NewFeatureConfig, QuestionType, Recommendation,
    SurveyOverrideUpsert,
};
use insights::providers::{ModelProvider, ProviderFactory};
use insights::service::InsightsService;
use serde_json::json;
use std::sync::Arc;
use support::{answer, dropout_input, quality_input, sentiment_input, MemoryStorage, MockProvider};

fn new_config(kind: FeatureKind, name: &str) -> NewFeatureConfig {
    NewFeatureConfig {
        feature: kind,
        name: name.to_string(),
        enabled: true,
        is_global: true,
        provider_config_id: None,
        model_name: None,
        settings: json!({}),
        confidence_threshold: 0.5,
        batch_size: 25,
        timeout_secs: 30,
    }
}

fn service(storage: Arc<MemoryStorage>) -> InsightsService {
    InsightsService::new(
        storage.clone(),
        storage,
        Arc::new(ProviderFactory::with_defaults()),
        4,
    )
}

fn service_with_mock(
    storage: Arc<MemoryStorage>,
    provider: Arc<MockProvider>,
) -> InsightsService {
    let factory = ProviderFactory::with_defaults();
    factory.register("mock", move |_config| {
        Ok(provider.clone() as Arc<dyn ModelProvider>)
    });
    InsightsService::new(storage.clone(), storage, Arc::new(factory), 4)
}

fn clean_quality_input() -> insights::model::QualityInput {
    quality_input(
        vec![
            answer(1, QuestionType::SingleChoice, "a"),
            answer(2, QuestionType::SingleChoice, "b"),
            answer(3, QuestionType::SingleChoice, "c"),
            answer(4, QuestionType::Scale, "3"),
            answer(5, QuestionType::Scale, "7"),
            answer(6, QuestionType::Scale, "9"),
        ],
        150.0,
    )
}

#[tokio::test]
async fn scoring_without_any_config_reports_feature_disabled() {
    let storage = Arc::new(MemoryStorage::new());
    let service = service(storage);

    let result = service.assess_quality(&clean_quality_input(), None).await;
    assert!(matches!(result, Err(InsightsError::FeatureDisabled(_))));
}

#[tokio::test]
async fn scoring_persists_a_record_and_feeds_stats() {
    let storage = Arc::new(MemoryStorage::new());
    let service = service(storage.clone());
    service
        .create_config(&new_config(FeatureKind::ResponseQuality, "default"))
        .await
        .unwrap();

    let scored = service
        .assess_quality(&clean_quality_input(), None)
        .await
        .unwrap();
    assert!(scored.record_id.is_some());
    assert_eq!(scored.result.recommendation, Recommendation::Accept);
    assert_eq!(storage.quality_record_count(), 1);

    let stats = service.quality_stats(7).await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.mean_score, scored.result.score);
    assert_eq!(stats.recommendations.get("accept"), Some(&1));
}

#[tokio::test]
async fn provider_failure_degrades_to_rules_without_failing_the_call() {
    let storage = Arc::new(MemoryStorage::new());
    let provider_id = storage.add_provider_config("mock", true);
    let service = service_with_mock(storage.clone(), Arc::new(MockProvider::failing()));

    let mut config = new_config(FeatureKind::ResponseQuality, "with-model");
    config.provider_config_id = Some(provider_id);
    config.model_name = Some("quality-v1".to_string());
    service.create_config(&config).await.unwrap();

    let scored = service
        .assess_quality(&clean_quality_input(), None)
        .await
        .unwrap();
    assert_eq!(scored.result.model_version, RULE_BASED);
    assert!(scored.record_id.is_some());
    assert!((0.0..=100.0).contains(&scored.result.score));
}

#[tokio::test]
async fn ready_provider_owns_the_score() {
    let storage = Arc::new(MemoryStorage::new());
    let provider_id = storage.add_provider_config("mock", true);
    let service = service_with_mock(
        storage.clone(),
        Arc::new(MockProvider::ready_with(json!(42.0))),
    );

    let mut config = new_config(FeatureKind::ResponseQuality, "with-model");
    config.provider_config_id = Some(provider_id);
    config.model_name = Some("quality-v1".to_string());
    service.create_config(&config).await.unwrap();

    let scored = service
        .assess_quality(&clean_quality_input(), None)
        .await
        .unwrap();
    assert_eq!(scored.result.model_version, "quality-v1");
    assert_eq!(scored.result.score, 42.0);
    assert_eq!(scored.result.recommendation, Recommendation::Review);

    let record = storage.last_quality_record().unwrap();
    assert_eq!(record.model_version, "quality-v1");
}

#[tokio::test]
async fn disabled_override_blocks_the_survey_but_not_an_explicit_config() {
    let storage = Arc::new(MemoryStorage::new());
    let service = service(storage);
    let config = service
        .create_config(&new_config(FeatureKind::ResponseQuality, "default"))
        .await
        .unwrap();
    service
        .upsert_override(
            config.id,
            7,
            &SurveyOverrideUpsert {
                enabled: false,
                settings_patch: json!({}),
            },
        )
        .await
        .unwrap();

    let blocked = service.assess_quality(&clean_quality_input(), None).await;
    assert!(matches!(blocked, Err(InsightsError::FeatureDisabled(_))));

    let bypassed = service
        .assess_quality(&clean_quality_input(), Some(config.id))
        .await
        .unwrap();
    assert!(bypassed.record_id.is_some());
}

#[tokio::test]
async fn override_read_back_and_missing_override_is_not_found() {
    let storage = Arc::new(MemoryStorage::new());
    let service = service(storage);
    let config = service
        .create_config(&new_config(FeatureKind::ResponseQuality, "default"))
        .await
        .unwrap();
    service
        .upsert_override(
            config.id,
            7,
            &SurveyOverrideUpsert {
                enabled: true,
                settings_patch: json!({"accept_threshold": 90.0}),
            },
        )
        .await
        .unwrap();

    let fetched = service.get_override(config.id, 7).await.unwrap();
    assert!(fetched.enabled);
    assert_eq!(fetched.settings_patch["accept_threshold"], json!(90.0));

    let missing = service.get_override(config.id, 8).await;
    assert!(matches!(missing, Err(InsightsError::NotFound(_))));
}

#[tokio::test]
async fn config_update_rebuilds_the_cached_detector() {
    let storage = Arc::new(MemoryStorage::new());
    let service = service(storage);
    let config = service
        .create_config(&new_config(FeatureKind::ResponseQuality, "default"))
        .await
        .unwrap();

    let before = service
        .assess_quality(&clean_quality_input(), None)
        .await
        .unwrap();
    assert_eq!(before.result.recommendation, Recommendation::Accept);

    // nothing can reach an accept threshold above 100
    service
        .update_config(
            config.id,
            &FeatureConfigUpdate {
                settings: Some(json!({"accept_threshold": 101.0})),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let after = service
        .assess_quality(&clean_quality_input(), None)
        .await
        .unwrap();
    assert_eq!(after.result.recommendation, Recommendation::Review);
}

#[tokio::test]
async fn duplicate_config_names_per_feature_are_rejected() {
    let storage = Arc::new(MemoryStorage::new());
    let service = service(storage);
    service
        .create_config(&new_config(FeatureKind::SentimentAnalysis, "default"))
        .await
        .unwrap();

    let duplicate = service
        .create_config(&new_config(FeatureKind::SentimentAnalysis, "default"))
        .await;
    assert!(matches!(duplicate, Err(InsightsError::Config(_))));

    // same name under another feature type is fine
    service
        .create_config(&new_config(FeatureKind::ResponseQuality, "default"))
        .await
        .unwrap();
}

#[tokio::test]
async fn malformed_settings_bags_are_rejected_up_front() {
    let storage = Arc::new(MemoryStorage::new());
    let service = service(storage);

    let mut config = new_config(FeatureKind::ResponseQuality, "broken");
    config.settings = json!({"accept_threshold": "very high"});
    assert!(matches!(
        service.create_config(&config).await,
        Err(InsightsError::Config(_))
    ));
}

#[tokio::test]
async fn sentiment_batch_respects_the_configured_size_limit() {
    let storage = Arc::new(MemoryStorage::new());
    let service = service(storage.clone());
    let mut config = new_config(FeatureKind::SentimentAnalysis, "default");
    config.batch_size = 2;
    service.create_config(&config).await.unwrap();

    let too_many = vec![
        sentiment_input("good"),
        sentiment_input("bad"),
        sentiment_input("fine"),
    ];
    assert!(matches!(
        service.analyze_sentiment_batch(&too_many, None).await,
        Err(InsightsError::Validation(_))
    ));

    let batch = service
        .analyze_sentiment_batch(&too_many[..2], None)
        .await
        .unwrap();
    assert_eq!(batch.results.len(), 2);
    assert!(batch.results.iter().all(|r| r.is_ok()));
    assert_eq!(storage.sentiment_record_count(), 2);
}

#[tokio::test]
async fn batch_records_carry_their_share_of_the_batch_latency() {
    let storage = Arc::new(MemoryStorage::new());
    let service = service(storage.clone());
    service
        .create_config(&new_config(FeatureKind::SentimentAnalysis, "default"))
        .await
        .unwrap();

    let inputs = vec![
        sentiment_input("really great"),
        sentiment_input("absolutely terrible"),
        sentiment_input("fine I suppose"),
    ];
    let batch = service.analyze_sentiment_batch(&inputs, None).await.unwrap();

    let records = storage.sentiment_records();
    assert_eq!(records.len(), 3);
    for record in records {
        assert!(record.processing_ms <= batch.processing_ms / inputs.len() as i64);
    }
}

#[tokio::test]
async fn intervention_shown_is_the_only_mutation_on_predictions() {
    let storage = Arc::new(MemoryStorage::new());
    let service = service(storage.clone());
    service
        .create_config(&new_config(FeatureKind::DropoutPrediction, "default"))
        .await
        .unwrap();

    let scored = service.predict_dropout(&dropout_input(), None).await.unwrap();
    let prediction_id = scored.record_id.expect("prediction persisted");

    service.mark_intervention_shown(prediction_id).await.unwrap();
    let stats = service.dropout_stats(7).await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.interventions_shown, 1);
    assert_eq!(stats.per_page.len(), 1);
    assert_eq!(stats.per_page[0].page, 2);

    assert!(matches!(
        service.mark_intervention_shown(9999).await,
        Err(InsightsError::NotFound(_))
    ));
}

#[tokio::test]
async fn deleting_a_config_disables_its_feature() {
    let storage = Arc::new(MemoryStorage::new());
    let service = service(storage);
    let config = service
        .create_config(&new_config(FeatureKind::DropoutPrediction, "default"))
        .await
        .unwrap();

    service.predict_dropout(&dropout_input(), None).await.unwrap();
    service.delete_config(config.id).await.unwrap();

    let result = service.predict_dropout(&dropout_input(), None).await;
    assert!(matches!(result, Err(InsightsError::FeatureDisabled(_))));
}

#[tokio::test]
async fn clearing_caches_keeps_scoring_working() {
    let storage = Arc::new(MemoryStorage::new());
    let service = service(storage);
    service
        .create_config(&new_config(FeatureKind::SentimentAnalysis, "default"))
        .await
        .unwrap();

    let first = service
        .analyze_sentiment(&sentiment_input("really great"), None)
        .await
        .unwrap();
    service.clear_caches();
    let second = service
        .analyze_sentiment(&sentiment_input("really great"), None)
        .await
        .unwrap();
    assert_eq!(first.result.sentiment, second.result.sentiment);
    assert_eq!(first.result.score, second.result.score);
}
