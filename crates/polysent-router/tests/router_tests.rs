//! End-to-end router tests against mock engines


use mock_engines::MockFactory;
use polysent_router::{
    BatchSentimentRouter, EngineFailureKind, EngineSource, Error, FailurePolicy, FnDetector,
    LanguageDetector, LanguageTag, ModelBinding, ModelId, ModelOverrides, RouterBuilder, RouterConfig,
    SentimentResult,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn test_binding() -> ModelBinding {
    ModelBinding::new()
        .with_override(LanguageTag::English, "en-model")
        .with_override(LanguageTag::German, "en-model")
        .with_override(LanguageTag::Finnish, "fi-model")
        .with_override(LanguageTag::Swedish, "sv-model")
}

fn builder(factory: &Arc<MockFactory>) -> RouterBuilder {
    BatchSentimentRouter::builder()
        .engine_factory(factory.clone())
        .base_binding(test_binding())
        .warm_language(None)
}

fn tagged(pairs: &[(&str, LanguageTag)]) -> Vec<(String, LanguageTag)> {
    pairs
        .iter()
        .map(|(text, tag)| (text.to_string(), *tag))
        .collect()
}

fn keyword_detector() -> Arc<dyn LanguageDetector> {
    fn detect(text: &str) -> polysent_router::Result<LanguageTag> {
        if text.contains("boom") {
            Err(Error::detection("detector crashed"))
        } else if text.contains("iloinen") {
            Ok(LanguageTag::Finnish)
        } else if text.contains("glad") {
            Ok(LanguageTag::Swedish)
        } else if text.contains("happy") {
            Ok(LanguageTag::English)
        } else {
            Ok(LanguageTag::Unknown)
        }
    }
    Arc::new(FnDetector::new(detect))
}

#[tokio::test]
async fn test_three_message_scenario() -> anyhow::Result<()> {
    init_tracing();
    let factory = Arc::new(MockFactory::new().with_label("fi-model", "NEGATIVE"));
    let tracker = factory.tracker();
    let router = builder(&factory).build()?;

    let messages = tagged(&[
        ("I'm happy", LanguageTag::English),
        ("Olen iloinen", LanguageTag::Finnish),
        ("??unresolvable??", LanguageTag::Unknown),
    ]);
    let results = router.process_batches(&messages, None).await?;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0], SentimentResult::new("positive", 0.9));
    assert_eq!(results[1], SentimentResult::new("negative", 0.9));
    assert_eq!(results[2].label, "none");
    assert_eq!(results[2].score, 0.0);

    assert_eq!(tracker.calls_to("en-model"), vec![vec!["I'm happy".to_string()]]);
    assert_eq!(tracker.calls_to("fi-model"), vec![vec!["Olen iloinen".to_string()]]);
    assert_eq!(tracker.calls().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_sentiment_detects_languages() -> anyhow::Result<()> {
    init_tracing();
    let factory = Arc::new(MockFactory::new().with_label("fi-model", "Neutral"));
    let router = builder(&factory).detector(keyword_detector()).build()?;

    let results = router
        .sentiment(&["I'm happy", "Olen iloinen", "??unresolvable??"], None)
        .await?;

    assert_eq!(results[0].label, "positive");
    assert_eq!(results[1].label, "neutral");
    assert!(results[2].is_none());
    Ok(())
}

#[tokio::test]
async fn test_same_language_single_acquisition() -> anyhow::Result<()> {
    let factory = Arc::new(MockFactory::new());
    let tracker = factory.tracker();
    let router = builder(&factory).build()?;

    let messages = tagged(&[
        ("first happy", LanguageTag::English),
        ("second happy", LanguageTag::English),
    ]);
    let outcome = router.process_batches_with_report(&messages, None).await?;

    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.report.acquisitions, 1);
    assert_eq!(tracker.loads(), vec!["en-model"]);
    assert_eq!(
        tracker.calls(),
        vec![(
            "en-model".to_string(),
            vec!["first happy".to_string(), "second happy".to_string()]
        )]
    );
    Ok(())
}

#[tokio::test]
async fn test_languages_sharing_a_model_form_one_group() -> anyhow::Result<()> {
    let factory = Arc::new(MockFactory::new());
    let tracker = factory.tracker();
    let router = builder(&factory).build()?;

    let messages = tagged(&[
        ("a", LanguageTag::English),
        ("b", LanguageTag::Finnish),
        ("c", LanguageTag::German),
        ("d", LanguageTag::English),
    ]);
    let outcome = router.process_batches_with_report(&messages, None).await?;

    assert_eq!(outcome.report.acquisitions, 2);
    assert_eq!(tracker.loads_of("en-model"), 1);
    assert_eq!(
        tracker.calls_to("en-model"),
        vec![vec!["a".to_string(), "c".to_string(), "d".to_string()]]
    );
    assert_eq!(outcome.results.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_empty_input() -> anyhow::Result<()> {
    let factory = Arc::new(MockFactory::new());
    let tracker = factory.tracker();
    let router = builder(&factory).detector(keyword_detector()).build()?;

    let outcome = router.sentiment_with_report::<&str>(&[], None).await?;

    assert!(outcome.results.is_empty());
    assert_eq!(outcome.report.acquisitions, 0);
    assert!(tracker.loads().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_all_unbound_needs_no_engine() -> anyhow::Result<()> {
    let factory = Arc::new(MockFactory::new());
    let tracker = factory.tracker();
    let router = builder(&factory).build()?;

    let messages = tagged(&[("privet", LanguageTag::Russian), ("???", LanguageTag::Unknown)]);
    let outcome = router.process_batches_with_report(&messages, None).await?;

    assert!(outcome.results.iter().all(|r| *r == SentimentResult::none()));
    assert_eq!(outcome.report.unclassifiable, 2);
    assert!(tracker.loads().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_results_are_deterministic() -> anyhow::Result<()> {
    let factory = Arc::new(
        MockFactory::new()
            .with_label("fi-model", "NEGATIVE")
            .with_label("sv-model", "NEUTRAL"),
    );
    let router = builder(&factory).max_concurrent_engines(3).build()?;

    let messages = tagged(&[
        ("a", LanguageTag::Swedish),
        ("b", LanguageTag::Finnish),
        ("c", LanguageTag::Unknown),
        ("d", LanguageTag::English),
        ("e", LanguageTag::Swedish),
        ("f", LanguageTag::Finnish),
    ]);

    let first = router.process_batches(&messages, None).await?;
    let second = router.process_batches(&messages, None).await?;

    assert_eq!(first, second);
    let labels: Vec<&str> = first.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["neutral", "negative", "none", "positive", "neutral", "negative"]);
    Ok(())
}

#[tokio::test]
async fn test_call_overrides_apply_to_one_call() -> anyhow::Result<()> {
    let factory = Arc::new(MockFactory::new());
    let tracker = factory.tracker();
    let router = builder(&factory).build()?;
    let messages = tagged(&[("hello", LanguageTag::English), ("privet", LanguageTag::Russian)]);

    let overrides = ModelOverrides::from([
        (LanguageTag::English, ModelId::new("en-alt")),
        (LanguageTag::Russian, ModelId::new("ru-model")),
    ]);
    let overridden = router.process_batches(&messages, Some(&overrides)).await?;
    assert!(!overridden[1].is_none());

    let plain = router.process_batches(&messages, None).await?;
    assert!(plain[1].is_none());

    assert_eq!(tracker.loads_of("en-alt"), 1);
    assert_eq!(tracker.loads_of("ru-model"), 1);
    assert_eq!(tracker.loads_of("en-model"), 1);
    Ok(())
}

#[tokio::test]
async fn test_acquisitions_match_distinct_models() -> anyhow::Result<()> {
    let factory = Arc::new(MockFactory::new());
    let tracker = factory.tracker();
    let router = builder(&factory).build()?;

    let messages = tagged(&[
        ("a", LanguageTag::Finnish),
        ("b", LanguageTag::Swedish),
        ("c", LanguageTag::English),
        ("d", LanguageTag::Finnish),
        ("e", LanguageTag::Swedish),
    ]);
    let outcome = router.process_batches_with_report(&messages, None).await?;

    assert_eq!(outcome.report.acquisitions, 3);
    assert_eq!(outcome.report.engine_loads(), 3);
    for model in ["fi-model", "sv-model", "en-model"] {
        assert_eq!(tracker.loads_of(model), 1);
        assert_eq!(tracker.calls_to(model).len(), 1);
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_one_engine_live_at_a_time() -> anyhow::Result<()> {
    let factory = Arc::new(
        MockFactory::new()
            .with_load_latency(Duration::from_millis(20))
            .with_classify_latency(Duration::from_millis(20)),
    );
    let tracker = factory.tracker();
    let router = builder(&factory).build()?;

    let messages = tagged(&[
        ("a", LanguageTag::Finnish),
        ("b", LanguageTag::Swedish),
        ("c", LanguageTag::English),
    ]);
    router.process_batches(&messages, None).await?;

    assert_eq!(tracker.loads().len(), 3);
    assert_eq!(tracker.max_live(), 1);
    assert_eq!(tracker.live(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_bounded_engine_concurrency() -> anyhow::Result<()> {
    let factory = Arc::new(
        MockFactory::new()
            .with_load_latency(Duration::from_millis(20))
            .with_classify_latency(Duration::from_millis(20)),
    );
    let tracker = factory.tracker();
    let binding = test_binding().with_override(LanguageTag::Norwegian, "no-model");
    let router = builder(&factory)
        .base_binding(binding)
        .max_concurrent_engines(2)
        .build()?;

    let messages = tagged(&[
        ("a", LanguageTag::Finnish),
        ("b", LanguageTag::Swedish),
        ("c", LanguageTag::English),
        ("d", LanguageTag::Norwegian),
    ]);
    let results = router.process_batches(&messages, None).await?;

    assert_eq!(results.len(), 4);
    assert_eq!(tracker.max_live(), 2);
    assert_eq!(tracker.live(), 0);
    Ok(())
}

#[tokio::test]
async fn test_abort_policy_names_model_and_indices() -> anyhow::Result<()> {
    let factory = Arc::new(MockFactory::new().failing_load("fi-model"));
    let router = builder(&factory).build()?;

    let messages = tagged(&[
        ("a", LanguageTag::English),
        ("b", LanguageTag::Finnish),
        ("c", LanguageTag::Finnish),
    ]);
    let err = router.process_batches(&messages, None).await.unwrap_err();

    match err {
        Error::Engine {
            model,
            indices,
            kind,
            message,
        } => {
            assert_eq!(model.as_str(), "fi-model");
            assert_eq!(indices, vec![1, 2]);
            assert_eq!(kind, EngineFailureKind::Load);
            assert!(message.contains("not found"));
        }
        other => panic!("expected engine error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_fallback_policy_marks_failed_group() -> anyhow::Result<()> {
    let factory = Arc::new(MockFactory::new().failing_classify("fi-model"));
    let tracker = factory.tracker();
    let router = builder(&factory)
        .failure_policy(FailurePolicy::Fallback)
        .build()?;

    let messages = tagged(&[
        ("a", LanguageTag::Finnish),
        ("b", LanguageTag::English),
        ("c", LanguageTag::Finnish),
        ("d", LanguageTag::Unknown),
    ]);
    let outcome = router.process_batches_with_report(&messages, None).await?;

    assert!(outcome.results[0].is_error());
    assert_eq!(outcome.results[1].label, "positive");
    assert!(outcome.results[2].is_error());
    assert!(outcome.results[3].is_none());

    assert!(!outcome.report.is_complete());
    assert_eq!(outcome.report.failures.len(), 1);
    let failure = &outcome.report.failures[0];
    assert_eq!(failure.model.as_str(), "fi-model");
    assert_eq!(failure.indices, vec![0, 2]);
    assert_eq!(failure.kind, EngineFailureKind::Invocation);
    assert_eq!(tracker.live(), 0);
    Ok(())
}

#[tokio::test]
async fn test_wrong_result_count_is_invocation_failure() -> anyhow::Result<()> {
    let factory = Arc::new(MockFactory::new().short_output("en-model"));
    let router = builder(&factory).build()?;

    let messages = tagged(&[("a", LanguageTag::English), ("b", LanguageTag::English)]);
    let err = router.process_batches(&messages, None).await.unwrap_err();

    assert_eq!(err.engine_kind(), Some(EngineFailureKind::Invocation));
    assert_eq!(err.affected_indices(), &[0, 1]);
    Ok(())
}

#[tokio::test]
async fn test_detector_errors_become_sentinels() -> anyhow::Result<()> {
    init_tracing();
    let factory = Arc::new(MockFactory::new());
    let router = builder(&factory).detector(keyword_detector()).build()?;

    let results = router.sentiment(&["boom", "so happy"], None).await?;

    assert_eq!(results[0], SentimentResult::none());
    assert_eq!(results[1].label, "positive");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_classify_timeout() -> anyhow::Result<()> {
    let factory = Arc::new(MockFactory::new().with_classify_latency(Duration::from_secs(60)));
    let tracker = factory.tracker();
    let config = RouterConfig::from_yaml("warm_language: null\ntimeouts:\n  classify_ms: 100\n")?;
    let router = BatchSentimentRouter::builder()
        .config(config)
        .engine_factory(factory.clone())
        .base_binding(test_binding())
        .build()?;

    let messages = tagged(&[("a", LanguageTag::Swedish)]);
    let err = router.process_batches(&messages, None).await.unwrap_err();

    assert_eq!(err.engine_kind(), Some(EngineFailureKind::Timeout));
    assert_eq!(tracker.live(), 0);
    Ok(())
}

#[tokio::test]
async fn test_blocking_classify_times_out() -> anyhow::Result<()> {
    let factory = Arc::new(MockFactory::new().with_blocking_classify(Duration::from_millis(400)));
    let tracker = factory.tracker();
    let config = RouterConfig::from_yaml("warm_language: null\ntimeouts:\n  classify_ms: 50\n")?;
    let router = BatchSentimentRouter::builder()
        .config(config)
        .engine_factory(factory.clone())
        .base_binding(test_binding())
        .build()?;

    let start = Instant::now();
    let err = router
        .process_batches(&tagged(&[("a", LanguageTag::English), ("b", LanguageTag::English)]), None)
        .await
        .unwrap_err();

    assert!(start.elapsed() < Duration::from_millis(400));
    assert_eq!(err.engine_kind(), Some(EngineFailureKind::Timeout));
    assert_eq!(err.affected_indices(), &[0, 1]);
    assert_eq!(tracker.live(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_load_timeout() -> anyhow::Result<()> {
    let factory = Arc::new(MockFactory::new().with_load_latency(Duration::from_secs(60)));
    let tracker = factory.tracker();
    let config = RouterConfig::from_yaml("warm_language: null\ntimeouts:\n  load_ms: 100\n")?;
    let router = BatchSentimentRouter::builder()
        .config(config)
        .engine_factory(factory.clone())
        .base_binding(test_binding())
        .build()?;

    let messages = tagged(&[
        ("a", LanguageTag::English),
        ("b", LanguageTag::Swedish),
        ("c", LanguageTag::Swedish),
    ]);
    let err = router.process_batches(&messages[1..], None).await.unwrap_err();

    assert_eq!(err.engine_kind(), Some(EngineFailureKind::Timeout));
    assert_eq!(err.affected_indices(), &[0, 1]);
    assert!(tracker.calls().is_empty());
    assert_eq!(tracker.live(), 0);

    let err = router.process_batches(&messages, None).await.unwrap_err();
    assert_eq!(err.engine_kind(), Some(EngineFailureKind::Timeout));
    assert_eq!(err.affected_indices(), &[0]);
    assert_eq!(tracker.live(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_warm_load_timeout_leaves_pool_empty() -> anyhow::Result<()> {
    let factory = Arc::new(MockFactory::new().with_load_latency(Duration::from_secs(60)));
    let tracker = factory.tracker();
    let config = RouterConfig::from_yaml("timeouts:\n  load_ms: 100\n")?;
    let router = BatchSentimentRouter::builder()
        .config(config)
        .engine_factory(factory.clone())
        .base_binding(test_binding())
        .warm_language(Some(LanguageTag::Finnish))
        .build()?;
    let messages = tagged(&[("a", LanguageTag::Finnish)]);

    for attempt in 1..=2 {
        let err = router.process_batches(&messages, None).await.unwrap_err();

        assert_eq!(err.engine_kind(), Some(EngineFailureKind::Timeout));
        assert_eq!(err.affected_indices(), &[0]);
        assert!(!router.warm_pool().is_loaded());
        assert_eq!(tracker.loads_of("fi-model"), attempt);
        assert_eq!(tracker.live(), 0);
    }
    Ok(())
}

#[tokio::test]
async fn test_warm_engine_loaded_once_across_calls() -> anyhow::Result<()> {
    let factory = Arc::new(MockFactory::new());
    let tracker = factory.tracker();
    let router = builder(&factory)
        .warm_language(Some(LanguageTag::Finnish))
        .build()?;
    let messages = tagged(&[("a", LanguageTag::Finnish), ("b", LanguageTag::English)]);

    assert!(!router.warm_pool().is_loaded());
    let first = router.process_batches_with_report(&messages, None).await?;
    let second = router.clone().process_batches_with_report(&messages, None).await?;

    assert!(router.warm_pool().is_loaded());
    assert_eq!(tracker.loads_of("fi-model"), 1);
    assert_eq!(tracker.loads_of("en-model"), 2);
    for outcome in [&first, &second] {
        assert_eq!(outcome.report.acquisitions, 2);
        assert_eq!(outcome.report.engine_loads(), 1);
        let warm = outcome
            .report
            .groups
            .iter()
            .find(|g| g.model.as_str() == "fi-model")
            .map(|g| g.source);
        assert_eq!(warm, Some(EngineSource::Warm));
    }
    assert_eq!(tracker.live(), 1);
    Ok(())
}

#[tokio::test]
async fn test_warm_up_preloads_engine() -> anyhow::Result<()> {
    let factory = Arc::new(MockFactory::new());
    let tracker = factory.tracker();
    let router = builder(&factory)
        .warm_language(Some(LanguageTag::Finnish))
        .build()?;

    assert!(router.warm_up().await?);
    assert_eq!(tracker.loads(), vec!["fi-model"]);

    router
        .process_batches(&tagged(&[("a", LanguageTag::Finnish)]), None)
        .await?;
    assert_eq!(tracker.loads(), vec!["fi-model"]);
    Ok(())
}

#[tokio::test]
async fn test_override_of_warm_language_bypasses_warm_engine() -> anyhow::Result<()> {
    let factory = Arc::new(MockFactory::new());
    let tracker = factory.tracker();
    let router = builder(&factory)
        .warm_language(Some(LanguageTag::Finnish))
        .build()?;

    let overrides = ModelOverrides::from([(LanguageTag::Finnish, ModelId::new("fi-alt"))]);
    let outcome = router
        .process_batches_with_report(&tagged(&[("a", LanguageTag::Finnish)]), Some(&overrides))
        .await?;

    assert_eq!(outcome.report.engine_loads(), 1);
    assert_eq!(tracker.loads(), vec!["fi-alt"]);
    assert!(!router.warm_pool().is_loaded());
    Ok(())
}

#[tokio::test]
async fn test_router_from_yaml_config() -> anyhow::Result<()> {
    let yaml = r#"
base_models:
  english: en-model
  finnish: fi-model
models:
  swedish: sv-custom
failure_policy: fallback
warm_language: null
"#;
    let factory = Arc::new(MockFactory::new().failing_load("fi-model"));
    let tracker = factory.tracker();
    let router = BatchSentimentRouter::builder()
        .config(RouterConfig::from_yaml(yaml)?)
        .engine_factory(factory.clone())
        .build()?;

    let messages = tagged(&[
        ("a", LanguageTag::Swedish),
        ("b", LanguageTag::Finnish),
        ("c", LanguageTag::German),
    ]);
    let results = router.process_batches(&messages, None).await?;

    assert_eq!(results[0].label, "positive");
    assert!(results[1].is_error());
    assert!(results[2].is_none());
    assert_eq!(tracker.loads(), vec!["sv-custom"]);
    Ok(())
}
