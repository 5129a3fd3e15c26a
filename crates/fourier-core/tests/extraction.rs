//! Extractor behaviour across strategies, including model-assisted repair.

use std::sync::Arc;

use fourier_core::extract::REPAIR_INPUT_LIMIT;
use fourier_core::fakes::{CallKind, ScriptedGateway};
use fourier_core::{
    DefaultPrompts, Extractor, GatewayError, ParseStrategy, RepairModel, ResponseShape,
    TranslationMode,
};
use serde_json::json;

fn repairing(gateway: &Arc<ScriptedGateway>) -> Extractor {
    Extractor::with_repair(RepairModel {
        gateway: gateway.clone(),
        prompts: Arc::new(DefaultPrompts),
        model: "repair-model".to_string(),
        max_tokens: 2048,
    })
}

#[tokio::test]
async fn test_fenced_value_with_trailing_commas_recovers() {
    let value = json!({
        "original_function": "def f(t):\n    return np.sin(t)",
        "coefficients": {"a0": 0.0, "an": [0.0, 0.5], "bn": [1.0, -0.25]}
    });
    let pretty = serde_json::to_string_pretty(&value).expect("serialize");
    let damaged = pretty.replace("\n  }", ",\n  }").replace("\n}", ",\n}");
    let raw = format!("```json\n{damaged}\n```");

    let out = Extractor::new()
        .extract(&raw, &ResponseShape::translation(TranslationMode::Coefficients))
        .await
        .expect("parse");
    assert!(matches!(
        out.strategy,
        ParseStrategy::CleanedJson | ParseStrategy::CodeblockExtraction
    ));
    assert_eq!(out.value, value);
    assert!(out.warnings.is_empty());
}

#[tokio::test]
async fn test_no_network_without_repair_model() {
    let gateway = Arc::new(ScriptedGateway::new().with_completion(r#"{"a": 1}"#));
    let err = Extractor::new()
        .extract("garbage", &ResponseShape::any())
        .await
        .unwrap_err();
    assert_eq!(err.attempts.len(), 4);
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn test_model_repair_is_last_resort() {
    let gateway = Arc::new(
        ScriptedGateway::new().with_completion("```json\n{\"error_category\": \"unknown\",}\n```"),
    );
    let out = repairing(&gateway)
        .extract("error_category: unknown", &ResponseShape::analysis())
        .await
        .expect("repaired");

    assert_eq!(out.strategy, ParseStrategy::AiRepair);
    assert_eq!(out.attempts.len(), 5);
    assert!(out.attempts[..4].iter().all(|a| !a.success));
    assert_eq!(out.value["error_category"], "unknown");

    let calls = gateway.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, CallKind::Complete);
    assert_eq!(calls[0].1.model, "repair-model");
    assert_eq!(calls[0].1.max_tokens, 2048);
}

#[tokio::test]
async fn test_repair_not_called_when_earlier_strategy_wins() {
    let gateway = Arc::new(ScriptedGateway::new());
    let out = repairing(&gateway)
        .extract(r#"{"a": 1,}"#, &ResponseShape::any())
        .await
        .expect("parse");
    assert_eq!(out.strategy, ParseStrategy::CleanedJson);
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn test_repair_input_is_truncated() {
    let gateway = Arc::new(ScriptedGateway::new().with_completion(r#"{"ok": true}"#));
    let raw = "x".repeat(REPAIR_INPUT_LIMIT * 2);
    repairing(&gateway)
        .extract(&raw, &ResponseShape::any())
        .await
        .expect("repaired");

    let prompt = &gateway.calls()[0].1.prompt;
    let xs = prompt.chars().filter(|c| *c == 'x').count();
    assert!(xs <= REPAIR_INPUT_LIMIT + 16, "{xs}");
}

#[tokio::test]
async fn test_repair_failure_is_recorded() {
    let gateway =
        Arc::new(ScriptedGateway::new().with_completion_error(GatewayError::Transport(
            "timeout".to_string(),
        )));
    let err = repairing(&gateway)
        .extract("still garbage", &ResponseShape::any())
        .await
        .unwrap_err();
    let last = err.attempts.last().expect("attempt");
    assert_eq!(last.strategy, ParseStrategy::AiRepair);
    assert!(last.error.contains("timeout"));
    assert!(err.to_string().contains("ai_repair"));
}
