//! Hybrid scorer: synchronous rule-based axes blended with the latest model evaluation.

use super::model_based::ModelEstimator;
use super::rule_based::RuleBasedEstimator;
use super::scores::{
    round1, AssessmentResult, Axis, ComponentScores, PartialScores, ScoreMapping, ScoreSource,
    NEUTRAL_SCORE,
};
use crate::integration::config::ScoringConfig;
use crate::messages::{Role, Utterance};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Share of the rule-based value for axes both estimators score.
/// Axes missing here are model-only.
pub fn rule_weight(axis: Axis) -> Option<f64> {
    match axis {
        Axis::Vocabulary | Axis::Grammar => Some(0.6),
        Axis::Fluency => Some(0.7),
        Axis::Comprehension | Axis::Coherence | Axis::PronunciationProxy => None,
    }
}

/// Combine estimator outputs into all six axes. Missing values use the neutral default.
pub fn blend(rule: &PartialScores, model: Option<&PartialScores>) -> ComponentScores {
    let mut components = ComponentScores::default();
    for axis in Axis::ALL {
        let model_value = model.and_then(|m| m.get(axis)).unwrap_or(NEUTRAL_SCORE);
        let value = match rule_weight(axis) {
            Some(w) => {
                let rule_value = rule.get(axis).unwrap_or(NEUTRAL_SCORE);
                rule_value * w + model_value * (1.0 - w)
            }
            None => model_value,
        };
        components.set(axis, round1(value));
    }
    components
}

#[derive(Debug, Clone)]
pub struct ScorerSettings {
    /// Refresh each time the user utterance count reaches a multiple of this.
    pub model_every_utterances: usize,
    /// Before the first multiple, refresh once the learner has been quiet this long.
    pub model_every: Duration,
    /// No refresh before this many user utterances exist.
    pub model_min_utterances: usize,
}

impl Default for ScorerSettings {
    fn default() -> Self {
        Self {
            model_every_utterances: 10,
            model_every: Duration::from_secs(120),
            model_min_utterances: 3,
        }
    }
}

impl From<&ScoringConfig> for ScorerSettings {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            model_every_utterances: config.model_every_utterances,
            model_every: config.model_interval(),
            model_min_utterances: config.model_min_utterances,
        }
    }
}

/// Single-slot cell holding the freshest completed model evaluation.
#[derive(Debug, Default)]
struct ModelSlot {
    version: u64,
    scores: Option<PartialScores>,
    failed_version: u64,
}

impl ModelSlot {
    /// Replace only with a strictly newer evaluation.
    fn offer(&mut self, version: u64, scores: PartialScores) -> bool {
        if version <= self.version {
            return false;
        }
        self.version = version;
        self.scores = Some(scores);
        true
    }

    fn fail(&mut self, version: u64) {
        self.failed_version = self.failed_version.max(version);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// The user count entered a new multiple of `model_every_utterances`.
    Count(usize),
    /// No new user utterance for `model_every` before the count trigger can fire.
    Quiet,
}

/// One tick's output.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreUpdate {
    pub result: AssessmentResult,
    pub mapping: ScoreMapping,
    /// A refresh is in flight or the newest attempt failed, so an older model value is in use.
    pub stale: bool,
    /// Version of the model evaluation blended in, if any has landed.
    pub model_version: Option<u64>,
    pub refresh_attempts: u64,
    /// This tick started a model refresh.
    pub refresh_triggered: bool,
}

pub struct HybridScorer {
    rule: RuleBasedEstimator,
    model: Option<Arc<dyn ModelEstimator>>,
    settings: ScorerSettings,
    slot: Arc<Mutex<ModelSlot>>,
    in_flight: Arc<AtomicUsize>,
    tasks: JoinSet<()>,
    attempts: u64,
    count_bucket: usize,
    evaluated_count: usize,
    seen_count: usize,
    last_growth_at: Duration,
    history: Vec<AssessmentResult>,
}

impl HybridScorer {
    pub fn new(settings: ScorerSettings, model: Option<Arc<dyn ModelEstimator>>) -> Self {
        Self {
            rule: RuleBasedEstimator::new(),
            model,
            settings,
            slot: Arc::new(Mutex::new(ModelSlot::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            tasks: JoinSet::new(),
            attempts: 0,
            count_bucket: 0,
            evaluated_count: 0,
            seen_count: 0,
            last_growth_at: Duration::ZERO,
            history: Vec::new(),
        }
    }

    pub fn refresh_attempts(&self) -> u64 {
        self.attempts
    }

    pub fn history(&self) -> &[AssessmentResult] {
        &self.history
    }

    pub fn latest(&self) -> AssessmentResult {
        self.history.last().cloned().unwrap_or_default()
    }

    fn note_growth(&mut self, user_count: usize, elapsed: Duration) {
        if user_count != self.seen_count {
            self.seen_count = user_count;
            self.last_growth_at = elapsed;
        }
    }

    /// Count buckets are fixed multiples; the quiet trigger never moves them.
    fn due_trigger(&self, user_count: usize, elapsed: Duration) -> Option<Trigger> {
        if self.model.is_none() || user_count < self.settings.model_min_utterances {
            return None;
        }
        let every = self.settings.model_every_utterances;
        if every > 0 {
            let bucket = user_count / every;
            if bucket > self.count_bucket {
                return Some(Trigger::Count(bucket));
            }
        }
        let before_first_multiple = every == 0 || user_count < every;
        let quiet_for = elapsed.saturating_sub(self.last_growth_at);
        (before_first_multiple && user_count > self.evaluated_count && quiet_for >= self.settings.model_every)
            .then_some(Trigger::Quiet)
    }

    fn spawn_refresh(&mut self, transcript: &[Utterance], user_count: usize, trigger: Trigger) {
        let Some(model) = self.model.clone() else {
            return;
        };
        self.attempts += 1;
        self.evaluated_count = user_count;
        if let Trigger::Count(bucket) = trigger {
            self.count_bucket = bucket;
        }

        let version = self.attempts;
        let transcript: Vec<Utterance> = transcript
            .iter()
            .filter(|u| !u.text.trim().is_empty())
            .cloned()
            .collect();
        let slot = self.slot.clone();
        let in_flight = self.in_flight.clone();
        in_flight.fetch_add(1, Ordering::SeqCst);
        info!(version, utterances = user_count, ?trigger, "model evaluation triggered");

        self.tasks.spawn(async move {
            match model.evaluate(&transcript).await {
                Ok(scores) => {
                    if slot.lock().offer(version, scores) {
                        info!(version, "model evaluation stored");
                    } else {
                        debug!(version, "discarding superseded model evaluation");
                    }
                }
                Err(e) => {
                    warn!(version, error = %e, "model evaluation failed");
                    slot.lock().fail(version);
                }
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Start a model refresh if the utterance or quiet trigger is due.
    ///
    /// Called on every new utterance so the count trigger fires at exact
    /// multiples regardless of how ticks line up.
    pub fn observe(&mut self, transcript: &[Utterance], elapsed: Duration) -> bool {
        let user_count = transcript.iter().filter(|u| u.role == Role::User).count();
        self.note_growth(user_count, elapsed);
        let Some(trigger) = self.due_trigger(user_count, elapsed) else {
            return false;
        };
        self.spawn_refresh(transcript, user_count, trigger);
        true
    }

    /// Score the transcript so far. Never waits for the model; needs a tokio runtime
    /// when a model estimator is configured.
    pub fn update(&mut self, transcript: &[Utterance], elapsed: Duration) -> ScoreUpdate {
        self.score(transcript, elapsed, true)
    }

    /// Score once more at session end without starting a refresh.
    pub fn final_update(&mut self, transcript: &[Utterance], elapsed: Duration) -> ScoreUpdate {
        self.score(transcript, elapsed, false)
    }

    fn score(&mut self, transcript: &[Utterance], elapsed: Duration, allow_refresh: bool) -> ScoreUpdate {
        while self.tasks.try_join_next().is_some() {}

        let user_text: Vec<&str> = transcript
            .iter()
            .filter(|u| u.role == Role::User)
            .map(|u| u.text.as_str())
            .collect();

        let secs = elapsed.as_secs_f64();
        let rule_scores = self
            .rule
            .evaluate(&user_text.join(" "), (secs > 0.0).then_some(secs));

        let refresh_triggered = allow_refresh && self.observe(transcript, elapsed);

        let (model_scores, model_version, failed) = {
            let slot = self.slot.lock();
            (slot.scores, (slot.version > 0).then_some(slot.version), slot.failed_version > slot.version)
        };
        let stale = self.in_flight.load(Ordering::SeqCst) > 0 || failed;

        let result = AssessmentResult::new(blend(&rule_scores, model_scores.as_ref()), ScoreSource::Hybrid);
        self.history.push(result.clone());

        ScoreUpdate {
            mapping: ScoreMapping::for_score(result.overall),
            result,
            stale,
            model_version,
            refresh_attempts: self.attempts,
            refresh_triggered,
        }
    }

    /// Wait for every in-flight model evaluation to finish.
    pub async fn settle(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }

    /// Abort in-flight model evaluations.
    pub fn shutdown(&mut self) {
        self.tasks.abort_all();
    }
}

impl std::fmt::Debug for HybridScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridScorer")
            .field("settings", &self.settings)
            .field("attempts", &self.attempts)
            .field("has_model", &self.model.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Result, TutorError};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    fn user(text: &str) -> Utterance {
        Utterance::new(Role::User, text)
    }

    struct FixedModel(PartialScores);

    #[async_trait]
    impl ModelEstimator for FixedModel {
        async fn evaluate(&self, _transcript: &[Utterance]) -> Result<PartialScores> {
            Ok(self.0)
        }
    }

    struct FailingModel;

    #[async_trait]
    impl ModelEstimator for FailingModel {
        async fn evaluate(&self, _transcript: &[Utterance]) -> Result<PartialScores> {
            Err(TutorError::ScorerError("offline".into()))
        }
    }

    /// Blocks until released, then answers with the grammar score for the transcript length.
    struct GatedModel {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl ModelEstimator for GatedModel {
        async fn evaluate(&self, transcript: &[Utterance]) -> Result<PartialScores> {
            self.gate.notified().await;
            Ok(PartialScores::new().with(Axis::Comprehension, transcript.len() as f64))
        }
    }

    #[test]
    fn test_blend_without_model_uses_neutral_complement() {
        let rule = PartialScores::new()
            .with(Axis::Vocabulary, 80.0)
            .with(Axis::Grammar, 70.0)
            .with(Axis::Fluency, 90.0);
        let blended = blend(&rule, None);
        assert_eq!(blended.vocabulary, 80.0 * 0.6 + 50.0 * 0.4);
        assert_eq!(blended.grammar, 70.0 * 0.6 + 50.0 * 0.4);
        assert_eq!(blended.fluency, 90.0 * 0.7 + 50.0 * 0.3);
        assert_eq!(blended.comprehension, NEUTRAL_SCORE);
        assert_eq!(blended.pronunciation_proxy, NEUTRAL_SCORE);
    }

    #[test]
    fn test_blend_with_model() {
        let rule = PartialScores::new().with(Axis::Vocabulary, 80.0);
        let model = PartialScores::new()
            .with(Axis::Vocabulary, 30.0)
            .with(Axis::Coherence, 77.0);
        let blended = blend(&rule, Some(&model));
        assert_eq!(blended.vocabulary, 60.0);
        assert_eq!(blended.coherence, 77.0);
        assert_eq!(blended.comprehension, NEUTRAL_SCORE);
    }

    #[test]
    fn test_slot_never_goes_backwards() {
        let mut slot = ModelSlot::default();
        assert!(slot.offer(2, PartialScores::new().with(Axis::Coherence, 60.0)));
        assert!(!slot.offer(1, PartialScores::new().with(Axis::Coherence, 10.0)));
        assert_eq!(slot.scores.unwrap().get(Axis::Coherence), Some(60.0));
        assert!(!slot.offer(2, PartialScores::new()));
    }

    #[test]
    fn test_no_model_no_refresh() {
        let mut scorer = HybridScorer::new(ScorerSettings::default(), None);
        let transcript: Vec<_> = (0..20).map(|i| user(&format!("sentence number {}", i))).collect();
        let update = scorer.update(&transcript, Duration::from_secs(600));
        assert_eq!(update.refresh_attempts, 0);
        assert!(!update.stale);
        assert_eq!(update.model_version, None);
    }

    #[test]
    fn test_empty_session_is_neutral() {
        let mut scorer = HybridScorer::new(ScorerSettings::default(), None);
        let update = scorer.update(&[], Duration::ZERO);
        assert_eq!(update.result.overall, NEUTRAL_SCORE);
        assert_eq!(update.mapping.level, crate::conversation::ProficiencyLevel::Intermediate);
    }

    #[tokio::test]
    async fn test_model_value_lands_and_persists() {
        let model = PartialScores::new().with(Axis::Comprehension, 90.0);
        let settings = ScorerSettings {
            model_every_utterances: 3,
            ..Default::default()
        };
        let mut scorer = HybridScorer::new(settings, Some(Arc::new(FixedModel(model))));
        let transcript: Vec<_> = ["I like tea.", "I live in Osaka.", "I work in a bank."]
            .iter()
            .map(|t| user(t))
            .collect();

        let first = scorer.update(&transcript, Duration::from_secs(5));
        assert!(first.refresh_triggered);
        assert_eq!(first.result.components.comprehension, NEUTRAL_SCORE);

        scorer.settle().await;
        let second = scorer.update(&transcript, Duration::from_secs(8));
        assert!(!second.refresh_triggered);
        assert!(!second.stale);
        assert_eq!(second.model_version, Some(1));
        assert_eq!(second.result.components.comprehension, 90.0);
    }

    #[tokio::test]
    async fn test_failed_refresh_marks_stale() {
        let settings = ScorerSettings {
            model_every_utterances: 3,
            ..Default::default()
        };
        let mut scorer = HybridScorer::new(settings, Some(Arc::new(FailingModel)));
        let transcript: Vec<_> = (0..3).map(|i| user(&format!("line {}", i))).collect();
        scorer.update(&transcript, Duration::from_secs(1));
        scorer.settle().await;

        let update = scorer.update(&transcript, Duration::from_secs(2));
        assert!(update.stale);
        assert_eq!(update.result.components.coherence, NEUTRAL_SCORE);
    }

    #[tokio::test]
    async fn test_in_flight_refresh_does_not_block_tick() {
        let gate = Arc::new(Notify::new());
        let settings = ScorerSettings {
            model_every_utterances: 3,
            ..Default::default()
        };
        let mut scorer = HybridScorer::new(settings, Some(Arc::new(GatedModel { gate: gate.clone() })));
        let transcript: Vec<_> = (0..3).map(|i| user(&format!("line {}", i))).collect();

        assert!(scorer.update(&transcript, Duration::from_secs(1)).refresh_triggered);
        let during = scorer.update(&transcript, Duration::from_secs(2));
        assert!(during.stale);
        assert_eq!(during.model_version, None);

        gate.notify_one();
        scorer.settle().await;
        let after = scorer.update(&transcript, Duration::from_secs(3));
        assert!(!after.stale);
        assert_eq!(after.result.components.comprehension, 3.0);
    }

    #[tokio::test]
    async fn test_quiet_trigger_before_first_multiple() {
        let mut scorer = HybridScorer::new(
            ScorerSettings::default(),
            Some(Arc::new(FixedModel(PartialScores::new().with(Axis::Coherence, 70.0)))),
        );
        let mut transcript: Vec<_> = (0..4).map(|i| user(&format!("line {}", i))).collect();
        assert!(!scorer.update(&transcript, Duration::from_secs(10)).refresh_triggered);
        assert!(!scorer.update(&transcript, Duration::from_secs(129)).refresh_triggered);
        assert!(scorer.update(&transcript, Duration::from_secs(130)).refresh_triggered);
        // Nothing new to evaluate
        assert!(!scorer.update(&transcript, Duration::from_secs(400)).refresh_triggered);

        transcript.push(user("line 4"));
        assert!(!scorer.update(&transcript, Duration::from_secs(410)).refresh_triggered);
        assert!(scorer.update(&transcript, Duration::from_secs(530)).refresh_triggered);

        // The count trigger still fires at the first multiple
        for i in 5..10 {
            transcript.push(user(&format!("line {}", i)));
        }
        assert!(scorer.update(&transcript, Duration::from_secs(540)).refresh_triggered);

        // From then on only multiples trigger, however long the learner is quiet
        assert!(!scorer.update(&transcript, Duration::from_secs(2_000)).refresh_triggered);
        transcript.push(user("line 10"));
        assert!(!scorer.update(&transcript, Duration::from_secs(3_000)).refresh_triggered);
        assert_eq!(scorer.refresh_attempts(), 3);
    }

    #[tokio::test]
    async fn test_assistant_utterances_do_not_count() {
        let mut scorer = HybridScorer::new(
            ScorerSettings::default(),
            Some(Arc::new(FixedModel(PartialScores::new()))),
        );
        let transcript: Vec<_> = (0..30)
            .map(|i| Utterance::new(Role::Assistant, format!("question {}", i)))
            .collect();
        assert!(!scorer.update(&transcript, Duration::from_secs(1)).refresh_triggered);
    }

    #[tokio::test]
    async fn test_observe_fires_at_each_multiple() {
        let mut scorer = HybridScorer::new(
            ScorerSettings::default(),
            Some(Arc::new(FixedModel(PartialScores::new()))),
        );
        let mut transcript = Vec::new();
        let mut fired_at = Vec::new();
        for i in 1..=61 {
            transcript.push(user(&format!("answer {}", i)));
            if scorer.observe(&transcript, Duration::from_millis(i as u64 * 100)) {
                fired_at.push(i);
            }
        }
        assert_eq!(fired_at, vec![10, 20, 30, 40, 50, 60]);
        assert_eq!(scorer.refresh_attempts(), 6);
    }

    #[tokio::test]
    async fn test_slow_session_still_fires_at_each_multiple() {
        let mut scorer = HybridScorer::new(
            ScorerSettings::default(),
            Some(Arc::new(FixedModel(PartialScores::new()))),
        );
        let mut transcript = Vec::new();
        let mut fired_at = Vec::new();
        for i in 1..=61u64 {
            transcript.push(user(&format!("answer {}", i)));
            let arrived = Duration::from_secs(i * 20);
            if scorer.observe(&transcript, arrived) {
                fired_at.push(i);
            }
            // Score ticks every 3 s until the next answer
            for tick in 1..=6 {
                if scorer.update(&transcript, arrived + Duration::from_secs(tick * 3)).refresh_triggered {
                    fired_at.push(i);
                }
            }
        }
        assert_eq!(fired_at, vec![10, 20, 30, 40, 50, 60]);
        assert_eq!(scorer.refresh_attempts(), 6);
    }
}
