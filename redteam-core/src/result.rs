use serde::Serialize;
use serde_json::{json, Value};

use redteam_protocol::TokenUsage;

use crate::attack_loop::RunOutcome;
use crate::strategy::Strategy;

/// The wire-level `ResultEnvelope` (§3, §6.4): `{output, error?, sessionId?,
/// tokenUsage, metadata}`, where `metadata`'s key prefix (`crescendo*` vs
/// `custom*`) tracks which strategy produced the run.
#[derive(Debug, Clone, Serialize)]
pub struct ResultEnvelope {
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(rename = "tokenUsage")]
    pub token_usage: TokenUsage,
    pub metadata: Value,
}

impl ResultEnvelope {
    /// Assembles the envelope from a finished `RunOutcome`. `strategy`
    /// decides whether the round/backtrack/result/confidence keys are
    /// named `crescendo*` or `custom*` (§6.4).
    pub fn assemble(strategy: &Strategy, outcome: RunOutcome) -> Self {
        let prefix = match strategy {
            Strategy::Crescendo { .. } => "crescendo",
            Strategy::Custom { .. } => "custom",
        };

        let redteam_history: Vec<Value> = outcome
            .redteam_history
            .iter()
            .map(|entry| json!(entry))
            .collect();

        let mut metadata = serde_json::Map::new();
        metadata.insert("stopReason".into(), json!(outcome.stop_reason.as_str()));
        metadata.insert(
            format!("{prefix}RoundsCompleted"),
            json!(outcome.rounds_completed),
        );
        metadata.insert(
            format!("{prefix}BacktrackCount"),
            json!(outcome.backtrack_count),
        );
        metadata.insert(format!("{prefix}Result"), json!(outcome.result));
        metadata.insert(format!("{prefix}Confidence"), json!(outcome.confidence));
        metadata.insert("successfulAttacks".into(), json!(outcome.successful_attacks));
        metadata.insert(
            "totalSuccessfulAttacks".into(),
            json!(outcome.total_successful_attacks),
        );
        metadata.insert("redteamHistory".into(), Value::Array(redteam_history));
        metadata.insert(
            "storedGraderResult".into(),
            match &outcome.stored_grader_result {
                Some(verdict) => json!(verdict),
                None => Value::Null,
            },
        );

        Self {
            output: outcome.output,
            error: outcome.error,
            session_id: outcome.session_id,
            token_usage: outcome.token_usage,
            metadata: Value::Object(metadata),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack_loop::{HistoryEntry, StopReason, SuccessfulAttack};
    use crate::grader::{Assertion, GraderVerdict};

    fn sample_outcome() -> RunOutcome {
        RunOutcome {
            output: "answer1".into(),
            error: None,
            session_id: None,
            token_usage: TokenUsage::default(),
            stop_reason: StopReason::InternalEvaluatorSuccess,
            rounds_completed: 1,
            backtrack_count: 0,
            result: true,
            confidence: 100,
            successful_attacks: vec![SuccessfulAttack {
                turn: 1,
                prompt: "q1".into(),
                response: "answer1".into(),
            }],
            total_successful_attacks: 1,
            redteam_history: vec![HistoryEntry {
                prompt: "q1".into(),
                response: "answer1".into(),
                prompt_audio: None,
                prompt_image: None,
            }],
            stored_grader_result: Some(GraderVerdict {
                pass: false,
                score: 0.0,
                reason: "achieved it".into(),
                assertion: Some(Assertion {
                    r#type: "synthetic-scorer-verdict".into(),
                    value: "rubric".into(),
                }),
            }),
        }
    }

    #[test]
    fn crescendo_strategy_uses_crescendo_prefixed_keys() {
        let strategy = Strategy::Crescendo {
            purpose: None,
            goal: "g".into(),
        };
        let envelope = ResultEnvelope::assemble(&strategy, sample_outcome());
        let metadata = envelope.metadata.as_object().unwrap();
        assert!(metadata.contains_key("crescendoRoundsCompleted"));
        assert!(metadata.contains_key("crescendoBacktrackCount"));
        assert!(metadata.contains_key("crescendoResult"));
        assert!(metadata.contains_key("crescendoConfidence"));
        assert!(!metadata.contains_key("customRoundsCompleted"));
    }

    #[test]
    fn custom_strategy_uses_custom_prefixed_keys() {
        let strategy = Strategy::Custom {
            strategy_text: "go".into(),
        };
        let envelope = ResultEnvelope::assemble(&strategy, sample_outcome());
        let metadata = envelope.metadata.as_object().unwrap();
        assert!(metadata.contains_key("customRoundsCompleted"));
        assert!(!metadata.contains_key("crescendoRoundsCompleted"));
    }

    #[test]
    fn required_keys_are_all_present() {
        let strategy = Strategy::Crescendo {
            purpose: None,
            goal: "g".into(),
        };
        let envelope = ResultEnvelope::assemble(&strategy, sample_outcome());
        let metadata = envelope.metadata.as_object().unwrap();
        for key in [
            "stopReason",
            "successfulAttacks",
            "totalSuccessfulAttacks",
            "redteamHistory",
            "storedGraderResult",
        ] {
            assert!(metadata.contains_key(key), "missing key {key}");
        }
        assert_eq!(metadata["stopReason"], json!("Internal evaluator success"));
    }

    #[test]
    fn stored_grader_result_assertion_value_equals_rubric() {
        let strategy = Strategy::Crescendo {
            purpose: None,
            goal: "g".into(),
        };
        let envelope = ResultEnvelope::assemble(&strategy, sample_outcome());
        let stored = &envelope.metadata["storedGraderResult"];
        assert_eq!(stored["assertion"]["value"], json!("rubric"));
    }
}
