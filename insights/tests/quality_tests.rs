mod support;

use insights::detectors::{QualityDetector, RULE_BASED};
use insights::model::{FlagKind, QuestionType, Recommendation, Severity};
use insights::settings::QualitySettings;
use support::{answer, quality_input};

fn detector() -> QualityDetector {
    QualityDetector::new(QualitySettings::default())
}

#[tokio::test]
async fn clean_response_is_accepted_without_flags() {
    let input = quality_input(
        vec![
            answer(1, QuestionType::SingleChoice, "option_a"),
            answer(2, QuestionType::SingleChoice, "option_c"),
            answer(3, QuestionType::SingleChoice, "option_b"),
            answer(4, QuestionType::Scale, "2"),
            answer(5, QuestionType::Scale, "5"),
            answer(6, QuestionType::Scale, "8"),
            answer(7, QuestionType::Text, "The checkout flow was confusing at first"),
        ],
        180.0,
    );
    let assessment = detector().assess(&input).await;
    assert_eq!(assessment.score, 100.0);
    assert!(assessment.flags.is_empty());
    assert_eq!(assessment.recommendation, Recommendation::Accept);
    assert_eq!(assessment.model_version, RULE_BASED);
}

#[tokio::test]
async fn straight_lining_every_choice_sinks_the_score() {
    let answers = (1..=10)
        .map(|i| answer(i, QuestionType::SingleChoice, "4"))
        .collect();
    // plenty of time, so only the answer pattern is at fault
    let input = quality_input(answers, 300.0);
    let assessment = detector().assess(&input).await;

    assert!(
        assessment.score <= 30.0,
        "expected a rejectable score, got {}",
        assessment.score
    );
    assert_eq!(assessment.recommendation, Recommendation::Reject);
    let straight = assessment
        .flags
        .iter()
        .find(|f| f.kind == FlagKind::StraightLining)
        .expect("straight-lining flag");
    assert_eq!(straight.severity, Severity::High);
}

#[tokio::test]
async fn blatant_speeding_is_flagged_high() {
    let answers = (1..=20)
        .map(|i| answer(i, QuestionType::SingleChoice, &format!("option_{i}")))
        .collect();
    let input = quality_input(answers, 5.0);
    let assessment = detector().assess(&input).await;

    let speeding = assessment
        .flags
        .iter()
        .find(|f| f.kind == FlagKind::Speeding)
        .expect("speeding flag");
    assert_eq!(speeding.severity, Severity::High);
    assert!(assessment.score < 80.0);
    assert_ne!(assessment.recommendation, Recommendation::Accept);
}

#[tokio::test]
async fn gibberish_free_text_is_flagged() {
    let input = quality_input(
        vec![
            answer(1, QuestionType::Text, "asdfasdf qwerty"),
            answer(2, QuestionType::Text, "jkjkjkjkjkjk"),
            answer(3, QuestionType::SingleChoice, "option_a"),
        ],
        120.0,
    );
    let assessment = detector().assess(&input).await;
    assert!(assessment
        .flags
        .iter()
        .any(|f| f.kind == FlagKind::Gibberish));
}

#[tokio::test]
async fn repeated_character_mash_is_flagged() {
    let input = quality_input(
        vec![
            answer(1, QuestionType::Text, "aaaaaaaaaa"),
            answer(2, QuestionType::Text, "noooooo wayyyyy"),
        ],
        120.0,
    );
    let assessment = detector().assess(&input).await;
    assert!(assessment
        .flags
        .iter()
        .any(|f| f.kind == FlagKind::Gibberish));
}

#[tokio::test]
async fn scores_stay_within_bounds_and_are_deterministic() {
    // adversarial input triggering several checks at once
    let answers = (1..=12)
        .map(|i| answer(i, QuestionType::SingleChoice, "1"))
        .collect::<Vec<_>>();
    let input = quality_input(answers, 2.0);

    let first = detector().assess(&input).await;
    let second = detector().assess(&input).await;

    assert!((0.0..=100.0).contains(&first.score));
    assert_eq!(first.score, second.score);
    assert_eq!(first.recommendation, second.recommendation);
    assert_eq!(first.flags.len(), second.flags.len());
}

#[tokio::test]
async fn accept_threshold_is_inclusive() {
    let mut settings = QualitySettings::default();
    settings.accept_threshold = 100.0;
    let detector = QualityDetector::new(settings);

    let input = quality_input(
        vec![
            answer(1, QuestionType::SingleChoice, "a"),
            answer(2, QuestionType::SingleChoice, "b"),
            answer(3, QuestionType::SingleChoice, "c"),
        ],
        90.0,
    );
    let assessment = detector.assess(&input).await;
    assert_eq!(assessment.score, 100.0);
    assert_eq!(assessment.recommendation, Recommendation::Accept);
}

#[tokio::test]
async fn cycling_answers_are_detected_as_a_pattern() {
    let values = ["1", "2", "3", "1", "2", "3", "1", "2", "3"];
    let answers = values
        .iter()
        .enumerate()
        .map(|(i, v)| answer(i as i64 + 1, QuestionType::Scale, v))
        .collect();
    let input = quality_input(answers, 200.0);
    let assessment = detector().assess(&input).await;
    assert!(assessment
        .flags
        .iter()
        .any(|f| f.kind == FlagKind::PatternDetected));
}
