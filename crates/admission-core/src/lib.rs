use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const MIN_CONFIDENCE: f32 = 0.25;
pub const SUGGESTION_GAP: f32 = 0.08;
pub const SUGGESTION_FLOOR: f32 = 0.10;

const EMPTY_INPUT_PROMPT: &str = "Please ask me something about admissions.";

const GREETING_RESPONSE: &str = "Hello! I'm your admission assistant. I can help you \
     with information about admission requirements, deadlines, fees, application \
     process, and required documents. What would you like to know?";

const NO_MATCH_RESPONSE: &str = "I'm sorry, I didn't find specific information about \
     that. Please ask about admission requirements, deadlines, application fees, \
     application process, or required documents.";

const GREETING_PHRASES: [&str; 5] = ["hello", "hi", "hey", "good morning", "good afternoon"];

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
#[error("classifier inference failed: {0}")]
pub struct ClassifierError(pub String);

/// One FAQ entry as loaded from the FAQ source. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaqRecord {
    pub question: String,
    pub answer: String,
    pub category: String,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
}

impl FaqRecord {
    /// Terms used by the legacy keyword fallback: the curated keyword list when
    /// present, otherwise the set of alphabetic tokens of the question.
    #[must_use]
    pub fn match_terms(&self) -> Vec<String> {
        match &self.keywords {
            Some(keywords) if !keywords.is_empty() => {
                keywords.iter().map(|keyword| keyword.to_lowercase()).collect()
            }
            _ => {
                let tokens: BTreeSet<String> = self
                    .question
                    .split(|ch: char| !ch.is_alphabetic())
                    .filter(|token| !token.is_empty())
                    .map(str::to_lowercase)
                    .collect();
                tokens.into_iter().collect()
            }
        }
    }
}

/// Category-to-answer map built from FAQ records, first record per category wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryCatalog {
    answers: BTreeMap<String, String>,
}

impl CategoryCatalog {
    #[must_use]
    pub fn from_records(records: &[FaqRecord]) -> Self {
        let mut answers = BTreeMap::new();
        for record in records {
            answers
                .entry(record.category.clone())
                .or_insert_with(|| record.answer.clone());
        }
        Self { answers }
    }

    #[must_use]
    pub fn answer_for(&self, category: &str) -> Option<&str> {
        self.answers.get(category).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.answers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.answers.keys().map(String::as_str)
    }
}

/// One curated rule: a category and the trigger phrases that select it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleEntry {
    pub category: String,
    pub triggers: Vec<String>,
}

/// Static keyword-rule table. Independently curated; it may reference
/// categories that are absent from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct RuleKeywordTable {
    entries: Vec<RuleEntry>,
}

impl RuleKeywordTable {
    #[must_use]
    pub fn new(entries: Vec<RuleEntry>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[RuleEntry] {
        &self.entries
    }

    /// Deterministic rule matching over normalized text. Counts trigger-phrase
    /// substring hits per category and answers only when a single category leads
    /// strictly. An ambiguous top count defers to the classifier, by policy.
    #[must_use]
    pub fn match_category(&self, normalized_text: &str) -> Option<&str> {
        let mut top_hits = 0usize;
        let mut runner_up_hits = 0usize;
        let mut top_category: Option<&str> = None;

        for entry in &self.entries {
            let hits = entry
                .triggers
                .iter()
                .filter(|trigger| normalized_text.contains(trigger.to_lowercase().as_str()))
                .count();
            if hits > top_hits {
                runner_up_hits = top_hits;
                top_hits = hits;
                top_category = Some(entry.category.as_str());
            } else if hits > runner_up_hits {
                runner_up_hits = hits;
            }
        }

        if top_hits > 0 && top_hits > runner_up_hits {
            top_category
        } else {
            None
        }
    }
}

impl Default for RuleKeywordTable {
    fn default() -> Self {
        let entry = |category: &str, triggers: &[&str]| RuleEntry {
            category: category.to_string(),
            triggers: triggers.iter().map(ToString::to_string).collect(),
        };
        Self::new(vec![
            entry("requirements", &["requirement", "eligibility", "criteria"]),
            entry("deadline", &["deadline", "last date", "timeline"]),
            entry("fee", &["fee", "cost", "payment", "charge"]),
            entry("process", &["apply", "application", "process", "online"]),
            entry("documents", &["document", "documents", "papers", "certificates"]),
            entry("financial_aid", &["scholarship", "financial aid", "loan"]),
        ])
    }
}

/// Capability interface over any pre-trained intent classifier backend.
///
/// `predict_distribution` may return `Ok(None)` when the backend only exposes a
/// hard label; the adapter then synthesizes a one-hot result from `predict_top`.
pub trait IntentClassifier {
    fn labels(&self) -> &[String];

    /// # Errors
    /// Returns [`ClassifierError`] when inference fails; callers treat any error
    /// as "no classification" and fall back.
    fn predict_top(&self, text: &str) -> Result<usize, ClassifierError>;

    /// # Errors
    /// Returns [`ClassifierError`] when inference fails.
    fn predict_distribution(&self, text: &str) -> Result<Option<Vec<f32>>, ClassifierError>;
}

/// Ranked classifier output. `ranked` is sorted by probability descending with
/// ties keeping the original label order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationResult {
    pub label: String,
    pub confidence: f32,
    pub ranked: Vec<(String, f32)>,
}

impl ClassificationResult {
    /// Synthetic result for a rule hit: single entry, confidence 1.0.
    #[must_use]
    pub fn rule_hit(category: &str) -> Self {
        Self {
            label: category.to_string(),
            confidence: 1.0,
            ranked: vec![(category.to_string(), 1.0)],
        }
    }
}

/// Run the classifier once over normalized text, best-effort. Any backend error
/// or shape mismatch yields `None` so the caller can degrade to the fallback.
#[must_use]
pub fn classify(classifier: &dyn IntentClassifier, normalized_text: &str) -> Option<ClassificationResult> {
    let labels = classifier.labels();
    if labels.is_empty() {
        return None;
    }

    let probabilities = match classifier.predict_distribution(normalized_text) {
        Ok(Some(probabilities)) if probabilities.len() == labels.len() => probabilities,
        Ok(Some(_)) | Err(_) => return None,
        Ok(None) => {
            let top = classifier.predict_top(normalized_text).ok()?;
            if top >= labels.len() {
                return None;
            }
            let mut one_hot = vec![0.0f32; labels.len()];
            one_hot[top] = 1.0;
            one_hot
        }
    };

    let mut ranked: Vec<(String, f32)> = labels.iter().cloned().zip(probabilities).collect();
    // sort_by is stable, so equal probabilities keep label order
    ranked.sort_by(|lhs, rhs| rhs.1.total_cmp(&lhs.1));
    let (label, confidence) = ranked.first().cloned()?;
    Some(ClassificationResult { label, confidence, ranked })
}

/// Legacy keyword-overlap fallback: the record with the strictly highest nonzero
/// overlap count; first-seen wins exact ties.
#[must_use]
pub fn fallback_best<'a>(records: &'a [FaqRecord], normalized_text: &str) -> Option<&'a FaqRecord> {
    let mut best: Option<(&FaqRecord, usize)> = None;
    for record in records {
        let overlap = record
            .match_terms()
            .iter()
            .filter(|term| normalized_text.contains(term.as_str()))
            .count();
        if overlap == 0 {
            continue;
        }
        let replaces = best.map_or(true, |(_, current)| overlap > current);
        if replaces {
            best = Some((record, overlap));
        }
    }
    best.map(|(record, _)| record)
}

/// Fallback answer for a query with no classifier loaded; the no-overlap case
/// is the default response.
#[must_use]
pub fn fallback_match(records: &[FaqRecord], normalized_text: &str) -> String {
    fallback_best(records, normalized_text)
        .map_or_else(|| default_response(normalized_text), |record| record.answer.clone())
}

/// Fixed greeting or "no specific information" message, chosen by greeting-phrase
/// presence. Stateless.
#[must_use]
pub fn default_response(normalized_text: &str) -> String {
    if GREETING_PHRASES.iter().any(|phrase| normalized_text.contains(phrase)) {
        GREETING_RESPONSE.to_string()
    } else {
        NO_MATCH_RESPONSE.to_string()
    }
}

/// Lower-case and collapse whitespace.
#[must_use]
pub fn normalize_query(raw: &str) -> String {
    raw.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Terminal state of one `process_query` call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    EmptyInput,
    RuleHit,
    ClassifierHitConfident,
    ClassifierHitLowConfidence,
    NoClassifierFallback,
    Default,
}

impl ResolutionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmptyInput => "empty_input",
            Self::RuleHit => "rule_hit",
            Self::ClassifierHitConfident => "classifier_hit_confident",
            Self::ClassifierHitLowConfidence => "classifier_hit_low_confidence",
            Self::NoClassifierFallback => "no_classifier_fallback",
            Self::Default => "default",
        }
    }
}

impl Display for ResolutionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of resolving one query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resolution {
    pub state: ResolutionState,
    pub response: String,
    pub intent: Option<String>,
    pub confidence: Option<f32>,
    /// Humanized runner-up label when the "did you mean" suggestion fired.
    pub suggestion: Option<String>,
}

/// One conversation-log record. Created when a query arrives; `response`,
/// `intent` and `confidence` are filled exactly once before the call returns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationLogEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub user_query: String,
    pub response: Option<String>,
    pub intent: Option<String>,
    pub confidence: Option<f32>,
}

/// Session-scoped, append-only conversation log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ConversationLog {
    entries: Vec<ConversationLogEntry>,
}

impl ConversationLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> &[ConversationLogEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// # Errors
    /// Returns a serialization error if an entry cannot be encoded, which does
    /// not happen for entries produced by the resolver.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.entries)
    }

    fn begin(&mut self, user_query: &str) -> usize {
        self.entries.push(ConversationLogEntry {
            timestamp: OffsetDateTime::now_utc(),
            user_query: user_query.to_string(),
            response: None,
            intent: None,
            confidence: None,
        });
        self.entries.len() - 1
    }

    fn finalize(&mut self, index: usize, resolution: &Resolution) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.response = Some(resolution.response.clone());
            entry.intent = resolution.intent.clone();
            entry.confidence = resolution.confidence;
        }
    }
}

/// Confidence thresholds for the orchestrator, passed in at construction so
/// tests can override them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolverConfig {
    pub min_confidence: f32,
    pub suggestion_gap: f32,
    pub suggestion_floor: f32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_confidence: MIN_CONFIDENCE,
            suggestion_gap: SUGGESTION_GAP,
            suggestion_floor: SUGGESTION_FLOOR,
        }
    }
}

/// The resolution orchestrator. Read-only after construction; per-session
/// mutable state lives in the [`ConversationLog`] passed to `process_query`,
/// so one resolver can serve many sessions.
pub struct Resolver {
    records: Vec<FaqRecord>,
    catalog: CategoryCatalog,
    rules: RuleKeywordTable,
    classifier: Option<Box<dyn IntentClassifier + Send + Sync>>,
    config: ResolverConfig,
}

impl Resolver {
    #[must_use]
    pub fn new(
        records: Vec<FaqRecord>,
        rules: RuleKeywordTable,
        classifier: Option<Box<dyn IntentClassifier + Send + Sync>>,
        config: ResolverConfig,
    ) -> Self {
        let catalog = CategoryCatalog::from_records(&records);
        Self { records, catalog, rules, classifier, config }
    }

    #[must_use]
    pub fn catalog(&self) -> &CategoryCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    /// Resolve one query and append its log entry. Never fails; the worst
    /// outcome is a generic response.
    pub fn process_query(&self, log: &mut ConversationLog, raw_input: &str) -> Resolution {
        let index = log.begin(raw_input);

        let trimmed = raw_input.trim();
        if trimmed.is_empty() {
            let resolution = Resolution {
                state: ResolutionState::EmptyInput,
                response: EMPTY_INPUT_PROMPT.to_string(),
                intent: None,
                confidence: None,
                suggestion: None,
            };
            log.finalize(index, &resolution);
            return resolution;
        }

        let normalized = normalize_query(trimmed);

        // A rule hit always bypasses the classifier.
        let (classification, via_rule) = match self.rules.match_category(&normalized) {
            Some(category) => (Some(ClassificationResult::rule_hit(category)), true),
            None => {
                let result = self
                    .classifier
                    .as_deref()
                    .and_then(|classifier| classify(classifier, &normalized));
                (result, false)
            }
        };

        let resolution = match classification {
            Some(result) => self.resolve_classified(&normalized, &result, via_rule),
            None => self.resolve_legacy(&normalized),
        };
        log.finalize(index, &resolution);
        resolution
    }

    fn resolve_classified(
        &self,
        normalized: &str,
        result: &ClassificationResult,
        via_rule: bool,
    ) -> Resolution {
        let Some(answer) = self.catalog.answer_for(&result.label) else {
            return self.low_confidence(normalized, result);
        };
        if result.confidence < self.config.min_confidence {
            return self.low_confidence(normalized, result);
        }

        let suggestion = self.runner_up_suggestion(result);
        let response = match &suggestion {
            Some(topic) => format!(
                "{answer} (If you were asking about {topic}, please re-ask with a bit more detail.)"
            ),
            None => answer.to_string(),
        };
        Resolution {
            state: if via_rule {
                ResolutionState::RuleHit
            } else {
                ResolutionState::ClassifierHitConfident
            },
            response,
            intent: Some(result.label.clone()),
            confidence: Some(result.confidence),
            suggestion,
        }
    }

    fn low_confidence(&self, normalized: &str, result: &ClassificationResult) -> Resolution {
        Resolution {
            state: ResolutionState::ClassifierHitLowConfidence,
            response: default_response(normalized),
            intent: None,
            confidence: Some(result.confidence),
            suggestion: None,
        }
    }

    fn resolve_legacy(&self, normalized: &str) -> Resolution {
        match fallback_best(&self.records, normalized) {
            Some(record) => Resolution {
                state: ResolutionState::NoClassifierFallback,
                response: record.answer.clone(),
                intent: Some(record.category.clone()),
                confidence: None,
                suggestion: None,
            },
            None => Resolution {
                state: ResolutionState::Default,
                response: default_response(normalized),
                intent: None,
                confidence: None,
                suggestion: None,
            },
        }
    }

    /// The advisory "did you mean" topic: fires when the runner-up is close
    /// behind the winner and above the floor. Never changes the answer.
    fn runner_up_suggestion(&self, result: &ClassificationResult) -> Option<String> {
        let (second_label, second_confidence) = result.ranked.get(1)?;
        let gap = result.confidence - second_confidence;
        if gap < self.config.suggestion_gap && *second_confidence > self.config.suggestion_floor {
            Some(second_label.replace('_', " "))
        } else {
            None
        }
    }
}

/// Backend preference for speech-to-text listen attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SttBackend {
    Primary,
    Offline,
}

/// Opaque listen parameters passed through to the audio collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenParams {
    pub timeout_secs: f32,
    pub phrase_time_limit_secs: f32,
    pub backend: SttBackend,
    pub retries: u32,
}

/// Text-to-speech tuning passed through to the audio collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakConfig {
    pub rate: u16,
    pub volume: f32,
    pub voice_selector: Option<String>,
    pub slow: bool,
}

/// Narrow audio boundary: both calls are best-effort. A failed listen is
/// `None`; a failed speak is swallowed by the implementation.
pub trait AudioIo {
    fn listen(&mut self, params: &ListenParams) -> Option<String>;
    fn speak(&mut self, text: &str, config: &SpeakConfig);
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn mk_record(category: &str, answer: &str, keywords: &[&str]) -> FaqRecord {
        FaqRecord {
            question: format!("What about {category}?"),
            answer: answer.to_string(),
            category: category.to_string(),
            keywords: if keywords.is_empty() {
                None
            } else {
                Some(keywords.iter().map(ToString::to_string).collect())
            },
        }
    }

    fn sample_records() -> Vec<FaqRecord> {
        vec![
            mk_record("fee", "The application fee is $50.", &["fee", "cost", "payment"]),
            mk_record("deadline", "The deadline is March 31st.", &["deadline", "last date"]),
            mk_record("documents", "You need transcripts and ID proof.", &["document", "papers"]),
        ]
    }

    struct FixedClassifier {
        labels: Vec<String>,
        distribution: Option<Vec<f32>>,
        fail: bool,
    }

    impl FixedClassifier {
        fn ranked(pairs: &[(&str, f32)]) -> Self {
            Self {
                labels: pairs.iter().map(|(label, _)| (*label).to_string()).collect(),
                distribution: Some(pairs.iter().map(|(_, p)| *p).collect()),
                fail: false,
            }
        }

        fn hard_label(labels: &[&str]) -> Self {
            Self {
                labels: labels.iter().map(ToString::to_string).collect(),
                distribution: None,
                fail: false,
            }
        }

        fn failing() -> Self {
            Self { labels: vec!["fee".to_string()], distribution: None, fail: true }
        }
    }

    impl IntentClassifier for FixedClassifier {
        fn labels(&self) -> &[String] {
            &self.labels
        }

        fn predict_top(&self, _text: &str) -> Result<usize, ClassifierError> {
            if self.fail {
                return Err(ClassifierError("simulated failure".to_string()));
            }
            Ok(0)
        }

        fn predict_distribution(&self, _text: &str) -> Result<Option<Vec<f32>>, ClassifierError> {
            if self.fail {
                return Err(ClassifierError("simulated failure".to_string()));
            }
            Ok(self.distribution.clone())
        }
    }

    fn resolver_with(classifier: Option<Box<dyn IntentClassifier + Send + Sync>>) -> Resolver {
        Resolver::new(
            sample_records(),
            RuleKeywordTable::default(),
            classifier,
            ResolverConfig::default(),
        )
    }

    #[test]
    fn catalog_is_first_wins_per_category() {
        let records =
            vec![mk_record("fee", "A1", &["fee"]), mk_record("fee", "A2", &["fee", "cost"])];
        let catalog = CategoryCatalog::from_records(&records);
        assert_eq!(catalog.answer_for("fee"), Some("A1"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn rule_matcher_selects_unique_hit() {
        let table = RuleKeywordTable::default();
        assert_eq!(table.match_category("what is the deadline"), Some("deadline"));
        assert_eq!(table.match_category("nothing relevant here"), None);
    }

    #[test]
    fn rule_matcher_defers_on_tied_top_counts() {
        let table = RuleKeywordTable::default();
        // one "deadline" trigger and one "fee" trigger: tie, no decision
        assert_eq!(table.match_category("deadline and cost"), None);
    }

    #[test]
    fn rule_matcher_requires_strict_lead() {
        let table = RuleKeywordTable::new(vec![
            RuleEntry {
                category: "a".to_string(),
                triggers: vec!["alpha".to_string(), "beta".to_string()],
            },
            RuleEntry {
                category: "b".to_string(),
                triggers: vec!["gamma".to_string()],
            },
        ]);
        // a: 2 hits, b: 1 hit -> strict lead, a wins
        assert_eq!(table.match_category("alpha beta gamma"), Some("a"));
        // a: 1 hit, b: 1 hit -> tie
        assert_eq!(table.match_category("alpha gamma"), None);
    }

    #[test]
    fn rule_hit_returns_catalog_answer_with_full_confidence() {
        let resolver = resolver_with(None);
        let mut log = ConversationLog::new();
        let resolution = resolver.process_query(&mut log, "what is the deadline");
        assert_eq!(resolution.state, ResolutionState::RuleHit);
        assert_eq!(resolution.response, "The deadline is March 31st.");
        assert_eq!(resolution.intent.as_deref(), Some("deadline"));
        assert_eq!(resolution.confidence, Some(1.0));
        assert_eq!(log.entries()[0].intent.as_deref(), Some("deadline"));
        assert_eq!(log.entries()[0].confidence, Some(1.0));
    }

    #[test]
    fn empty_and_whitespace_input_prompts_for_input() {
        let resolver = resolver_with(None);
        let mut log = ConversationLog::new();
        for raw in ["", "   ", "\t\n"] {
            let resolution = resolver.process_query(&mut log, raw);
            assert_eq!(resolution.state, ResolutionState::EmptyInput);
            assert_eq!(resolution.response, EMPTY_INPUT_PROMPT);
            assert_eq!(resolution.intent, None);
            assert_eq!(resolution.confidence, None);
        }
        assert_eq!(log.len(), 3);
        assert!(log.entries().iter().all(|entry| entry.intent.is_none()));
    }

    #[test]
    fn low_confidence_classification_falls_back_to_default_response() {
        let classifier = FixedClassifier::ranked(&[("fee", 0.2), ("deadline", 0.1)]);
        let resolver = resolver_with(Some(Box::new(classifier)));
        let mut log = ConversationLog::new();
        // no rule trigger words, so the classifier path runs
        let resolution = resolver.process_query(&mut log, "how much do I owe");
        assert_eq!(resolution.state, ResolutionState::ClassifierHitLowConfidence);
        assert_eq!(resolution.response, NO_MATCH_RESPONSE);
        assert_eq!(resolution.intent, None);
        assert_eq!(resolution.confidence, Some(0.2));
    }

    #[test]
    fn unknown_category_falls_back_even_when_confident() {
        let classifier = FixedClassifier::ranked(&[("hostel", 0.9), ("fee", 0.05)]);
        let resolver = resolver_with(Some(Box::new(classifier)));
        let mut log = ConversationLog::new();
        let resolution = resolver.process_query(&mut log, "where do students sleep");
        assert_eq!(resolution.state, ResolutionState::ClassifierHitLowConfidence);
        assert_eq!(resolution.response, NO_MATCH_RESPONSE);
    }

    #[test]
    fn close_runner_up_adds_did_you_mean_suggestion() {
        let classifier = FixedClassifier::ranked(&[("fee", 0.40), ("financial_aid", 0.35)]);
        let records = vec![
            mk_record("fee", "The application fee is $50.", &["fee"]),
            mk_record("financial_aid", "Scholarships are available.", &["scholarship"]),
        ];
        let resolver = Resolver::new(
            records,
            RuleKeywordTable::new(vec![]),
            Some(Box::new(classifier)),
            ResolverConfig::default(),
        );
        let mut log = ConversationLog::new();
        let resolution = resolver.process_query(&mut log, "how much money will I need");
        assert_eq!(resolution.state, ResolutionState::ClassifierHitConfident);
        assert!(resolution.response.starts_with("The application fee is $50."));
        assert!(resolution.response.contains("financial aid"));
        assert_eq!(resolution.suggestion.as_deref(), Some("financial aid"));
    }

    #[test]
    fn wide_gap_or_low_runner_up_suppresses_suggestion() {
        let records = vec![
            mk_record("fee", "The application fee is $50.", &["fee"]),
            mk_record("deadline", "The deadline is March 31st.", &["deadline"]),
        ];
        for pairs in [
            [("fee", 0.60f32), ("deadline", 0.30f32)],
            [("fee", 0.15f32), ("deadline", 0.09f32)],
        ] {
            let classifier = FixedClassifier::ranked(&pairs);
            let resolver = Resolver::new(
                records.clone(),
                RuleKeywordTable::new(vec![]),
                Some(Box::new(classifier)),
                ResolverConfig::default(),
            );
            let mut log = ConversationLog::new();
            let resolution = resolver.process_query(&mut log, "something vague");
            assert_eq!(resolution.suggestion, None);
        }
    }

    #[test]
    fn classifier_failure_degrades_to_legacy_path() {
        // empty rule table so the query reaches the (failing) classifier
        let resolver = Resolver::new(
            sample_records(),
            RuleKeywordTable::new(vec![]),
            Some(Box::new(FixedClassifier::failing())),
            ResolverConfig::default(),
        );
        let mut log = ConversationLog::new();
        let resolution = resolver.process_query(&mut log, "what papers should I bring");
        assert_eq!(resolution.state, ResolutionState::NoClassifierFallback);
        assert_eq!(resolution.response, "You need transcripts and ID proof.");
        assert_eq!(resolution.intent.as_deref(), Some("documents"));
        assert_eq!(resolution.confidence, None);
    }

    #[test]
    fn hard_label_backend_becomes_one_hot_result() {
        let classifier = FixedClassifier::hard_label(&["fee", "deadline"]);
        let result = match classify(&classifier, "anything") {
            Some(result) => result,
            None => panic!("hard-label classifier should produce a result"),
        };
        assert_eq!(result.label, "fee");
        assert!((result.confidence - 1.0).abs() < f32::EPSILON);
        assert_eq!(result.ranked.len(), 2);
        assert_eq!(result.ranked[1].1, 0.0);
    }

    #[test]
    fn classify_keeps_label_order_on_probability_ties() {
        let classifier = FixedClassifier::ranked(&[("fee", 0.4), ("deadline", 0.4), ("process", 0.2)]);
        let result = match classify(&classifier, "anything") {
            Some(result) => result,
            None => panic!("classifier should produce a result"),
        };
        assert_eq!(result.label, "fee");
        assert_eq!(result.ranked[1].0, "deadline");
    }

    #[test]
    fn legacy_fallback_prefers_highest_overlap_first_seen_on_tie() {
        let records = vec![
            mk_record("fee", "fee answer", &["fee", "cost"]),
            mk_record("deadline", "deadline answer", &["deadline", "date"]),
        ];
        // one keyword from each record: tie, first record wins
        let best = fallback_best(&records, "fee and deadline");
        assert_eq!(best.map(|record| record.category.as_str()), Some("fee"));
        // two deadline keywords beat one fee keyword
        let best = fallback_best(&records, "fee deadline date");
        assert_eq!(best.map(|record| record.category.as_str()), Some("deadline"));
    }

    #[test]
    fn legacy_fallback_without_overlap_yields_default_response() {
        let resolver = resolver_with(None);
        let mut log = ConversationLog::new();
        let resolution = resolver.process_query(&mut log, "xyzzy quux");
        assert_eq!(resolution.state, ResolutionState::Default);
        assert_eq!(resolution.response, NO_MATCH_RESPONSE);
        assert_eq!(resolution.intent, None);
    }

    #[test]
    fn fallback_uses_question_tokens_when_keywords_absent() {
        let records = vec![FaqRecord {
            question: "Which scholarships exist?".to_string(),
            answer: "Merit scholarships exist.".to_string(),
            category: "financial_aid".to_string(),
            keywords: None,
        }];
        let best = fallback_best(&records, "tell me about scholarships");
        assert_eq!(best.map(|record| record.category.as_str()), Some("financial_aid"));
    }

    #[test]
    fn greeting_without_any_match_returns_greeting_overview() {
        let resolver = Resolver::new(
            vec![],
            RuleKeywordTable::new(vec![]),
            None,
            ResolverConfig::default(),
        );
        let mut log = ConversationLog::new();
        let resolution = resolver.process_query(&mut log, "good morning");
        assert_eq!(resolution.state, ResolutionState::Default);
        assert_eq!(resolution.response, GREETING_RESPONSE);
    }

    #[test]
    fn log_entries_preserve_order_and_original_query() {
        let resolver = resolver_with(None);
        let mut log = ConversationLog::new();
        resolver.process_query(&mut log, "  What Is The Deadline?  ");
        resolver.process_query(&mut log, "");
        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].user_query, "  What Is The Deadline?  ");
        assert_eq!(entries[1].user_query, "");
        assert!(entries.iter().all(|entry| entry.response.is_some()));
    }

    #[test]
    fn log_serializes_all_fields_with_nulls_preserved() {
        let resolver = resolver_with(None);
        let mut log = ConversationLog::new();
        resolver.process_query(&mut log, "");
        let json = match serde_json::to_value(&log) {
            Ok(value) => value,
            Err(err) => panic!("log should serialize: {err}"),
        };
        let entry = &json[0];
        for field in ["timestamp", "user_query", "response", "intent", "confidence"] {
            assert!(entry.get(field).is_some(), "missing field {field}");
        }
        assert!(entry["intent"].is_null());
        assert!(entry["confidence"].is_null());

        let parsed: ConversationLog = match serde_json::from_value(json) {
            Ok(parsed) => parsed,
            Err(err) => panic!("log should round-trip: {err}"),
        };
        assert_eq!(parsed, log);
    }

    #[test]
    fn rule_hit_on_category_missing_from_catalog_gives_default_response() {
        let resolver = Resolver::new(
            vec![mk_record("fee", "fee answer", &["fee"])],
            RuleKeywordTable::default(),
            None,
            ResolverConfig::default(),
        );
        let mut log = ConversationLog::new();
        // "papers" is a documents-rule trigger but the catalog only holds "fee"
        let resolution = resolver.process_query(&mut log, "what papers do you want");
        assert_eq!(resolution.state, ResolutionState::ClassifierHitLowConfidence);
        assert_eq!(resolution.response, NO_MATCH_RESPONSE);
    }

    #[test]
    fn normalize_lowercases_and_collapses_whitespace() {
        assert_eq!(normalize_query("  What   IS\tthe FEE? "), "what is the fee?");
    }

    proptest! {
        #[test]
        fn property_process_query_always_appends_exactly_one_entry(input in ".{0,80}") {
            let resolver = Resolver::new(
                sample_records(),
                RuleKeywordTable::default(),
                None,
                ResolverConfig::default(),
            );
            let mut log = ConversationLog::new();
            let before = log.len();
            let resolution = resolver.process_query(&mut log, &input);
            prop_assert_eq!(log.len(), before + 1);
            prop_assert!(!resolution.response.is_empty());
            prop_assert_eq!(log.entries()[before].user_query.as_str(), input.as_str());
        }
    }

    proptest! {
        #[test]
        fn property_resolution_is_deterministic(input in ".{0,80}") {
            let resolver = Resolver::new(
                sample_records(),
                RuleKeywordTable::default(),
                None,
                ResolverConfig::default(),
            );
            let mut log_a = ConversationLog::new();
            let mut log_b = ConversationLog::new();
            let first = resolver.process_query(&mut log_a, &input);
            let second = resolver.process_query(&mut log_b, &input);
            prop_assert_eq!(first.state, second.state);
            prop_assert_eq!(first.response, second.response);
            prop_assert_eq!(first.intent, second.intent);
        }
    }
}
