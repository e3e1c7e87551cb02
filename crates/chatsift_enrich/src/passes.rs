//! The four enrichment passes. Pass 1 is a deterministic regex scan; the
//! later passes are model calls with typed, schema-constrained responses.

use crate::ollama::{ChatModel, GenerateOptions};
use crate::pipeline::EnrichmentContext;
use chatsift_core::LabelTaxonomy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::LazyLock;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassType {
    Entities,
    Structure,
    Psychology,
    Relationships,
}

impl PassType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassType::Entities => "entities",
            PassType::Structure => "structure",
            PassType::Psychology => "psychology",
            PassType::Relationships => "relationships",
        }
    }
}

/// Outcome of one pass over one chunk. A failed pass carries empty labels,
/// zero confidence and populated `validation_errors`; later passes still
/// run.
#[derive(Debug, Clone)]
pub struct PassResult {
    pub pass_type: PassType,
    pub labels: Vec<String>,
    pub confidence: f64,
    pub duration_ms: u64,
    pub metadata: Value,
    pub validation_errors: Vec<String>,
}

impl PassResult {
    fn failed(pass_type: PassType, started: Instant, error: String) -> Self {
        Self {
            pass_type,
            labels: Vec::new(),
            confidence: 0.0,
            duration_ms: started.elapsed().as_millis() as u64,
            metadata: json!({}),
            validation_errors: vec![error],
        }
    }
}

// ============================================================================
// Pass 1: entity scan (no model call)
// ============================================================================

static TEMPORAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(?:yesterday|today|tomorrow|weekend|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
        r"\b(?:morning|afternoon|evening|night|dawn|dusk)\b",
        r"\b(?:january|february|march|april|may|june|july|august|september|october|november|december)\b",
        r"\b\d{1,2}:\d{2}(?:\s?[ap]m)?\b",
    ])
});

static EMOTIONAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(?:love|hate|angry|sad|happy|excited|worried|stressed|anxious|calm|peaceful)\b",
        r"\b(?:feeling|felt|emotions?|mood)\b",
        r"\b(?:cry|crying|laugh|laughing|smile|smiling)\b",
    ])
});

static RELATIONSHIP_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(?:we|us|our|together|relationship|partner|couple|dating|married)\b",
        r"\b(?:family|parents?|mother|father|mom|dad|sister|brother|sibling)\b",
        r"\b(?:friend|friendship|buddy|bestie)\b",
    ])
});

static CONFLICT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(?:fight|fighting|argue|argument|disagree|conflict|issue|problem)\b",
        r"\b(?:upset|frustrated|annoyed|irritated|bothered|mad)\b",
        r"\b(?:sorry|apologize|mistake|wrong|fault|blame)\b",
    ])
});

static SUPPORT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(?:help|helping|support|care|caring|comfort|reassure)\b",
        r"\b(?:understanding|listen|hear|acknowledge|validate)\b",
        r"\b(?:there for|here for|count on|rely on|depend on)\b",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
        .collect()
}

pub struct EntityScanner<'a> {
    taxonomy: &'a LabelTaxonomy,
}

impl<'a> EntityScanner<'a> {
    pub fn new(taxonomy: &'a LabelTaxonomy) -> Self {
        Self { taxonomy }
    }

    /// Emit the categories whose hit count > 0, with per-category counts in
    /// metadata. Base confidence 0.8.
    pub fn extract(&self, text: &str, context: &mut EnrichmentContext) -> PassResult {
        let started = Instant::now();
        let categories: [(&str, &LazyLock<Vec<Regex>>); 5] = [
            ("temporal", &TEMPORAL_PATTERNS),
            ("emotional", &EMOTIONAL_PATTERNS),
            ("relationship", &RELATIONSHIP_PATTERNS),
            ("conflict", &CONFLICT_PATTERNS),
            ("support", &SUPPORT_PATTERNS),
        ];

        let mut labels = Vec::new();
        let mut metadata = serde_json::Map::new();

        for (category, patterns) in categories {
            let mut count = 0usize;
            for regex in patterns.iter() {
                for m in regex.find_iter(text) {
                    count += 1;
                    context.entities_found.insert(m.as_str().to_lowercase());
                }
            }
            if count > 0 {
                labels.push(self.taxonomy.normalize(category));
                metadata.insert(format!("{category}_count"), json!(count));
            }
        }

        PassResult {
            pass_type: PassType::Entities,
            labels,
            confidence: 0.8,
            duration_ms: started.elapsed().as_millis() as u64,
            metadata: Value::Object(metadata),
            validation_errors: Vec::new(),
        }
    }
}

// ============================================================================
// Pass 2: structure
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct StructureResponse {
    #[serde(default)]
    speech_acts: Vec<String>,
    #[serde(default)]
    communication_style: Option<String>,
    #[serde(default)]
    turn_pattern: Option<String>,
    #[serde(default)]
    boundary_signals: Vec<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

fn structure_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "speech_acts": {"type": "array", "items": {"type": "string"}},
            "communication_style": {"type": "string", "enum": ["direct", "indirect", "mixed"]},
            "turn_pattern": {"type": "string", "enum": ["initiating", "responding", "maintaining", "closing"]},
            "boundary_signals": {"type": "array", "items": {"type": "string", "enum": ["none", "setting", "testing", "crossing"]}},
            "confidence": {"type": "number"}
        },
        "required": ["speech_acts", "confidence"]
    })
}

pub struct StructuralAnalyzer<'a> {
    taxonomy: &'a LabelTaxonomy,
}

impl<'a> StructuralAnalyzer<'a> {
    pub fn new(taxonomy: &'a LabelTaxonomy) -> Self {
        Self { taxonomy }
    }

    pub fn prompt(text: &str, entities: &PassResult) -> String {
        let entity_context = if entities.labels.is_empty() {
            "none".to_string()
        } else {
            entities.labels.join(", ")
        };
        format!(
            "Analyze the communication structure and speech acts in this conversation chunk.\n\n\
             Detected entities from the first pass: {entity_context}\n\n\
             Text to analyze:\n\"{text}\"\n\n\
             Identify speech acts (informing, requesting, questioning, suggesting, agreeing, \
             disagreeing, apologizing, thanking, complaining, praising, criticizing), the \
             communication style, the turn pattern, and any boundary signals.\n\n\
             Respond with JSON: {{\"speech_acts\": [..], \"communication_style\": \
             \"direct|indirect|mixed\", \"turn_pattern\": \
             \"initiating|responding|maintaining|closing\", \"boundary_signals\": \
             [\"none|setting|testing|crossing\"], \"confidence\": 0.0-1.0}}"
        )
    }

    pub async fn analyze(
        &self,
        model: &dyn ChatModel,
        text: &str,
        entities: &PassResult,
    ) -> PassResult {
        let started = Instant::now();
        let prompt = Self::prompt(text, entities);

        let raw = match model
            .generate(
                &prompt,
                Some(structure_schema()),
                GenerateOptions {
                    temperature: 0.1,
                    num_predict: 300,
                },
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => return PassResult::failed(PassType::Structure, started, e.to_string()),
        };

        let parsed: StructureResponse = match serde_json::from_str(raw.trim()) {
            Ok(parsed) => parsed,
            Err(e) => {
                return PassResult::failed(
                    PassType::Structure,
                    started,
                    format!("response parse error: {e}"),
                )
            }
        };

        let mut labels: Vec<String> = parsed.speech_acts.clone();
        if let Some(style) = &parsed.communication_style {
            labels.push(format!("communication_{style}"));
        }
        if let Some(turn) = &parsed.turn_pattern {
            labels.push(format!("turn_{turn}"));
        }
        for signal in &parsed.boundary_signals {
            if signal != "none" {
                labels.push(format!("boundary_{signal}"));
            }
        }
        let labels = labels.iter().map(|l| self.taxonomy.normalize(l)).collect();

        PassResult {
            pass_type: PassType::Structure,
            labels,
            confidence: parsed.confidence.unwrap_or(0.7),
            duration_ms: started.elapsed().as_millis() as u64,
            metadata: json!({
                "speech_acts": parsed.speech_acts,
                "communication_style": parsed.communication_style,
                "turn_pattern": parsed.turn_pattern,
                "boundary_signals": parsed.boundary_signals,
            }),
            validation_errors: Vec::new(),
        }
    }
}

// ============================================================================
// Pass 3: psychology
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct PsychologicalNeeds {
    #[serde(default)]
    autonomy: f64,
    #[serde(default)]
    competence: f64,
    #[serde(default)]
    relatedness: f64,
}

#[derive(Debug, Default, Deserialize)]
struct PsychologyResponse {
    #[serde(default)]
    coarse_labels: Vec<String>,
    #[serde(default)]
    fine_labels_local: Vec<String>,
    #[serde(default)]
    emotion_primary: Option<String>,
    #[serde(default)]
    emotion_confidence: Option<f64>,
    #[serde(default)]
    attachment_style: Option<String>,
    #[serde(default)]
    intimacy_level: Option<u8>,
    #[serde(default)]
    psychological_needs: Option<PsychologicalNeeds>,
    #[serde(default)]
    defense_mechanisms: Vec<String>,
    #[serde(default)]
    relational_power: Option<f64>,
    #[serde(default)]
    confidence: Option<f64>,
}

fn psychology_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "coarse_labels": {"type": "array", "items": {"type": "string"}},
            "fine_labels_local": {"type": "array", "items": {"type": "string"}},
            "emotion_primary": {"type": "string", "enum": ["joy", "anger", "fear", "sadness", "disgust", "surprise", "neutral"]},
            "emotion_confidence": {"type": "number"},
            "attachment_style": {"type": "string", "enum": ["secure", "anxious", "avoidant", "disorganized"]},
            "intimacy_level": {"type": "integer", "minimum": 1, "maximum": 5},
            "psychological_needs": {
                "type": "object",
                "properties": {
                    "autonomy": {"type": "number"},
                    "competence": {"type": "number"},
                    "relatedness": {"type": "number"}
                }
            },
            "defense_mechanisms": {"type": "array", "items": {"type": "string"}},
            "relational_power": {"type": "number"},
            "confidence": {"type": "number"}
        },
        "required": ["coarse_labels", "confidence"]
    })
}

pub struct PsychologyAnalyzer<'a> {
    taxonomy: &'a LabelTaxonomy,
}

impl<'a> PsychologyAnalyzer<'a> {
    pub fn new(taxonomy: &'a LabelTaxonomy) -> Self {
        Self { taxonomy }
    }

    pub fn prompt(text: &str, previous: &[PassResult]) -> String {
        let previous_labels: Vec<String> = previous
            .iter()
            .flat_map(|r| r.labels.iter().cloned())
            .collect();
        let previous_context = if previous_labels.is_empty() {
            "none".to_string()
        } else {
            previous_labels.join(", ")
        };
        format!(
            "Perform a deep psychological analysis of this conversation chunk.\n\n\
             Previous analysis labels: {previous_context}\n\n\
             Text to analyze:\n\"{text}\"\n\n\
             Cover emotional state (primary emotion and regulation), attachment and intimacy, \
             psychological needs (autonomy, competence, relatedness in [-1, 1]), defense \
             mechanisms, and the relational power balance in [-1, 1]. Separate cloud-safe \
             coarse labels from local-only fine labels.\n\n\
             Respond with JSON: {{\"coarse_labels\": [..], \"fine_labels_local\": [..], \
             \"emotion_primary\": \"joy|anger|fear|sadness|disgust|surprise|neutral\", \
             \"emotion_confidence\": 0.0-1.0, \"attachment_style\": \
             \"secure|anxious|avoidant|disorganized\", \"intimacy_level\": 1-5, \
             \"psychological_needs\": {{\"autonomy\": -1.0-1.0, \"competence\": -1.0-1.0, \
             \"relatedness\": -1.0-1.0}}, \"defense_mechanisms\": [..], \
             \"relational_power\": -1.0-1.0, \"confidence\": 0.0-1.0}}"
        )
    }

    pub async fn analyze(
        &self,
        model: &dyn ChatModel,
        text: &str,
        previous: &[PassResult],
    ) -> PassResult {
        let started = Instant::now();
        let prompt = Self::prompt(text, previous);

        let raw = match model
            .generate(
                &prompt,
                Some(psychology_schema()),
                GenerateOptions {
                    temperature: 0.15,
                    num_predict: 500,
                },
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => return PassResult::failed(PassType::Psychology, started, e.to_string()),
        };

        let parsed: PsychologyResponse = match serde_json::from_str(raw.trim()) {
            Ok(parsed) => parsed,
            Err(e) => {
                return PassResult::failed(
                    PassType::Psychology,
                    started,
                    format!("response parse error: {e}"),
                )
            }
        };

        // Validate against the taxonomy (unknown labels dropped), then
        // expand with co-occurrence rules.
        let mut proposed = parsed.coarse_labels.clone();
        proposed.extend(parsed.fine_labels_local.clone());
        let (coarse_valid, fine_valid) = self.taxonomy.validate(&proposed);
        let mut all_valid = coarse_valid;
        all_valid.extend(fine_valid);
        let enhanced = self.taxonomy.apply_co_occurrence(&all_valid);
        let (coarse_final, fine_final) = self.taxonomy.validate(&enhanced);

        let needs = parsed.psychological_needs.unwrap_or_default();
        let metadata = json!({
            "coarse_labels": coarse_final,
            "fine_labels_local": fine_final,
            "emotion_primary": parsed.emotion_primary,
            "emotion_confidence": parsed.emotion_confidence,
            "attachment_style": parsed.attachment_style,
            "intimacy_level": parsed.intimacy_level,
            "psychological_needs": {
                "autonomy": needs.autonomy.clamp(-1.0, 1.0),
                "competence": needs.competence.clamp(-1.0, 1.0),
                "relatedness": needs.relatedness.clamp(-1.0, 1.0),
            },
            "defense_mechanisms": parsed.defense_mechanisms,
            "relational_power": parsed.relational_power.map(|p| p.clamp(-1.0, 1.0)),
            "labels_enhanced": enhanced.len() > all_valid.len(),
        });

        PassResult {
            pass_type: PassType::Psychology,
            labels: enhanced,
            confidence: parsed.confidence.unwrap_or(0.75),
            duration_ms: started.elapsed().as_millis() as u64,
            metadata,
            validation_errors: Vec::new(),
        }
    }
}

// ============================================================================
// Pass 4: relationships
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct RelationshipResponse {
    #[serde(default)]
    relationship_stage: Option<String>,
    #[serde(default)]
    interaction_quality: Option<String>,
    #[serde(default)]
    trust_level: Option<u8>,
    #[serde(default)]
    conflict_style: Option<String>,
    #[serde(default)]
    temporal_flow: Option<String>,
    #[serde(default)]
    emotional_trajectory: Option<String>,
    #[serde(default)]
    attachment_behaviors: Vec<String>,
    #[serde(default)]
    longitudinal_labels: Vec<String>,
    #[serde(default)]
    relationship_labels: Vec<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

fn relationship_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "relationship_stage": {"type": "string", "enum": ["forming", "storming", "norming", "performing", "mourning"]},
            "interaction_quality": {"type": "string", "enum": ["harmonious", "tense", "neutral", "improving", "deteriorating"]},
            "trust_level": {"type": "integer", "minimum": 1, "maximum": 5},
            "conflict_style": {"type": "string", "enum": ["constructive", "destructive", "avoidant", "accommodating"]},
            "temporal_flow": {"type": "string", "enum": ["natural", "forced", "interrupted", "resumed"]},
            "emotional_trajectory": {"type": "string", "enum": ["escalating", "de_escalating", "stable", "volatile"]},
            "attachment_behaviors": {"type": "array", "items": {"type": "string"}},
            "longitudinal_labels": {"type": "array", "items": {"type": "string"}},
            "relationship_labels": {"type": "array", "items": {"type": "string"}},
            "confidence": {"type": "number"}
        },
        "required": ["confidence"]
    })
}

pub struct RelationshipAnalyzer<'a> {
    taxonomy: &'a LabelTaxonomy,
}

impl<'a> RelationshipAnalyzer<'a> {
    pub fn new(taxonomy: &'a LabelTaxonomy) -> Self {
        Self { taxonomy }
    }

    pub fn prompt(text: &str, previous: &[PassResult], history_len: usize) -> String {
        let by_pass = |pass: PassType| -> String {
            previous
                .iter()
                .filter(|r| r.pass_type == pass)
                .flat_map(|r| r.labels.iter().cloned())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let temporal_context = if history_len == 0 {
            "No previous chunks available".to_string()
        } else {
            format!("Recent conversation flow: {history_len} previous chunks analyzed")
        };
        format!(
            "Analyze interpersonal relationship dynamics and temporal patterns in this \
             conversation.\n\n\
             CONTEXT FROM PREVIOUS PASSES:\n\
             - Entities/Patterns: {}\n\
             - Communication Structure: {}\n\
             - Psychology: {}\n\n\
             TEMPORAL CONTEXT: {temporal_context}\n\n\
             TEXT TO ANALYZE:\n\"{text}\"\n\n\
             Classify the relationship stage, interaction quality, trust level (1-5), conflict \
             style, temporal flow, emotional trajectory, attachment behaviors and longitudinal \
             labels.\n\n\
             Respond with JSON: {{\"relationship_stage\": \
             \"forming|storming|norming|performing|mourning\", \"interaction_quality\": \
             \"harmonious|tense|neutral|improving|deteriorating\", \"trust_level\": 1-5, \
             \"conflict_style\": \"constructive|destructive|avoidant|accommodating\", \
             \"temporal_flow\": \"natural|forced|interrupted|resumed\", \
             \"emotional_trajectory\": \"escalating|de_escalating|stable|volatile\", \
             \"attachment_behaviors\": [..], \"longitudinal_labels\": [..], \
             \"relationship_labels\": [..], \"confidence\": 0.0-1.0}}",
            if by_pass(PassType::Entities).is_empty() { "none".to_string() } else { by_pass(PassType::Entities) },
            if by_pass(PassType::Structure).is_empty() { "none".to_string() } else { by_pass(PassType::Structure) },
            if by_pass(PassType::Psychology).is_empty() { "none".to_string() } else { by_pass(PassType::Psychology) },
        )
    }

    pub async fn analyze(
        &self,
        model: &dyn ChatModel,
        text: &str,
        previous: &[PassResult],
        history_len: usize,
    ) -> PassResult {
        let started = Instant::now();
        let prompt = Self::prompt(text, previous, history_len);

        let raw = match model
            .generate(
                &prompt,
                Some(relationship_schema()),
                GenerateOptions {
                    temperature: 0.2,
                    num_predict: 400,
                },
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => return PassResult::failed(PassType::Relationships, started, e.to_string()),
        };

        let parsed: RelationshipResponse = match serde_json::from_str(raw.trim()) {
            Ok(parsed) => parsed,
            Err(e) => {
                return PassResult::failed(
                    PassType::Relationships,
                    started,
                    format!("response parse error: {e}"),
                )
            }
        };

        let mut labels = Vec::new();
        if let Some(stage) = &parsed.relationship_stage {
            labels.push(format!("relationship_{stage}"));
        }
        if let Some(quality) = &parsed.interaction_quality {
            labels.push(format!("interaction_{quality}"));
        }
        if let Some(style) = &parsed.conflict_style {
            labels.push(format!("conflict_{style}"));
        }
        if let Some(flow) = &parsed.temporal_flow {
            labels.push(format!("temporal_{flow}"));
        }
        if let Some(trajectory) = &parsed.emotional_trajectory {
            labels.push(format!("emotional_{trajectory}"));
        }
        for behavior in &parsed.attachment_behaviors {
            labels.push(format!("attachment_{behavior}"));
        }
        labels.extend(parsed.longitudinal_labels.clone());
        labels.extend(parsed.relationship_labels.clone());

        let normalized: Vec<String> = labels.iter().map(|l| self.taxonomy.normalize(l)).collect();
        let enhanced = self.taxonomy.apply_co_occurrence(&normalized);

        let metadata = json!({
            "relationship_stage": parsed.relationship_stage,
            "interaction_quality": parsed.interaction_quality,
            "trust_level": parsed.trust_level.unwrap_or(3),
            "conflict_style": parsed.conflict_style,
            "temporal_flow": parsed.temporal_flow,
            "emotional_trajectory": parsed.emotional_trajectory,
            "attachment_behaviors": parsed.attachment_behaviors,
            "labels_enhanced": enhanced.len() > normalized.len(),
        });

        PassResult {
            pass_type: PassType::Relationships,
            labels: enhanced,
            confidence: parsed.confidence.unwrap_or(0.7),
            duration_ms: started.elapsed().as_millis() as u64,
            metadata,
            validation_errors: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockModel;

    fn context() -> EnrichmentContext {
        EnrichmentContext::new("alex", "conv-1", chatsift_core::PrivacyTier::LocalOnly)
    }

    #[test]
    fn entity_scanner_counts_categories() {
        let taxonomy = LabelTaxonomy::builtin();
        let scanner = EntityScanner::new(&taxonomy);
        let mut ctx = context();
        let result = scanner.extract(
            "I was so angry yesterday, we had a fight but my sister will help me",
            &mut ctx,
        );

        assert_eq!(result.pass_type, PassType::Entities);
        assert!((result.confidence - 0.8).abs() < f64::EPSILON);
        assert!(result.metadata["temporal_count"].as_u64().unwrap() >= 1);
        assert!(result.metadata["emotional_count"].as_u64().unwrap() >= 1);
        assert!(result.metadata["conflict_count"].as_u64().unwrap() >= 1);
        assert!(result.metadata["support_count"].as_u64().unwrap() >= 1);
        assert!(!ctx.entities_found.is_empty());
    }

    #[test]
    fn entity_scanner_is_silent_on_neutral_text() {
        let taxonomy = LabelTaxonomy::builtin();
        let scanner = EntityScanner::new(&taxonomy);
        let mut ctx = context();
        let result = scanner.extract("ok", &mut ctx);
        assert!(result.labels.is_empty());
    }

    #[tokio::test]
    async fn structure_pass_parses_typed_response() {
        let taxonomy = LabelTaxonomy::builtin();
        let analyzer = StructuralAnalyzer::new(&taxonomy);
        let model = MockModel::new();
        model.push_response(
            r#"{"speech_acts": ["apologizing"], "communication_style": "direct",
                "turn_pattern": "responding", "boundary_signals": ["setting"],
                "confidence": 0.85}"#,
        );

        let entities = PassResult {
            pass_type: PassType::Entities,
            labels: vec!["conflict".to_string()],
            confidence: 0.8,
            duration_ms: 1,
            metadata: json!({}),
            validation_errors: vec![],
        };
        let result = analyzer.analyze(&model, "I'm sorry about that", &entities).await;

        assert!(result.validation_errors.is_empty());
        assert!((result.confidence - 0.85).abs() < 1e-9);
        assert!(result.labels.iter().any(|l| l.contains("boundary_setting")));
        // The prompt carried the pass-1 context.
        assert!(model.prompts()[0].contains("conflict"));
    }

    #[tokio::test]
    async fn malformed_response_fails_pass_without_panic() {
        let taxonomy = LabelTaxonomy::builtin();
        let analyzer = StructuralAnalyzer::new(&taxonomy);
        let model = MockModel::new();
        model.push_response("this is not json");

        let entities = PassResult {
            pass_type: PassType::Entities,
            labels: vec![],
            confidence: 0.8,
            duration_ms: 1,
            metadata: json!({}),
            validation_errors: vec![],
        };
        let result = analyzer.analyze(&model, "text", &entities).await;
        assert_eq!(result.confidence, 0.0);
        assert!(result.labels.is_empty());
        assert!(!result.validation_errors.is_empty());
    }

    #[tokio::test]
    async fn psychology_pass_validates_and_expands_labels() {
        let taxonomy = LabelTaxonomy::builtin();
        let analyzer = PsychologyAnalyzer::new(&taxonomy);
        let model = MockModel::new();
        model.push_response(
            r#"{"coarse_labels": ["conflict", "intimacy", "made_up_label"],
                "fine_labels_local": ["substances"],
                "emotion_primary": "anger", "intimacy_level": 3,
                "relational_power": 0.4, "confidence": 0.9}"#,
        );

        let result = analyzer.analyze(&model, "some text", &[]).await;

        // made_up_label dropped; conflict+intimacy implies stress through
        // the co-occurrence rules.
        assert!(result.labels.contains(&"conflict".to_string()));
        assert!(result.labels.contains(&"stress".to_string()));
        assert!(!result.labels.iter().any(|l| l == "made_up_label"));
        assert!(result.metadata["labels_enhanced"].as_bool().unwrap());
        let fine = result.metadata["fine_labels_local"].as_array().unwrap();
        assert!(fine.iter().any(|v| v == "substances"));
    }

    #[tokio::test]
    async fn relationship_pass_emits_typed_labels() {
        let taxonomy = LabelTaxonomy::builtin();
        let analyzer = RelationshipAnalyzer::new(&taxonomy);
        let model = MockModel::new();
        model.push_response(
            r#"{"relationship_stage": "norming", "interaction_quality": "improving",
                "trust_level": 4, "conflict_style": "constructive",
                "temporal_flow": "natural", "emotional_trajectory": "stable",
                "attachment_behaviors": ["secure_base"],
                "relationship_labels": ["trust_building"], "confidence": 0.8}"#,
        );

        let result = analyzer.analyze(&model, "text", &[], 3).await;
        assert!(result.labels.contains(&"relationship_norming".to_string()));
        assert!(result.labels.contains(&"trust_building".to_string()));
        assert_eq!(result.metadata["trust_level"], 4);
        assert!(model.prompts()[0].contains("3 previous chunks"));
    }
}
