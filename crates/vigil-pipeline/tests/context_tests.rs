use indexmap::IndexMap;
use proptest::prelude::*;
use std::collections::BTreeMap;
use vigil_pipeline::types::{ProjectContext, QualityMetrics};
use vigil_pipeline::{ContextField, Phase, PipelineContext};

fn any_phase() -> impl Strategy<Value = Phase> {
    prop_oneof![
        Just(Phase::PreAnalysis),
        Just(Phase::Triage),
        Just(Phase::Analysis),
        Just(Phase::Classification),
        Just(Phase::Validation),
        Just(Phase::Fortification),
        Just(Phase::Cleaning),
    ]
}

const ALL_FIELDS: [ContextField; 13] = [
    ContextField::ProjectContext,
    ContextField::FileContexts,
    ContextField::TriageDecisions,
    ContextField::QualityMetrics,
    ContextField::Hotspots,
    ContextField::SelectedFrames,
    ContextField::SuppressionRules,
    ContextField::FramePriorities,
    ContextField::ClassificationReasoning,
    ContextField::FrameResults,
    ContextField::Findings,
    ContextField::Fortifications,
    ContextField::CleaningSuggestions,
];

/// Set `field` to an empty value
fn set_empty(ctx: &mut PipelineContext, field: ContextField) {
    match field {
        ContextField::ProjectContext => ctx.project_context = Some(ProjectContext::default()),
        ContextField::FileContexts => ctx.file_contexts = Some(BTreeMap::new()),
        ContextField::TriageDecisions => ctx.triage_decisions = Some(BTreeMap::new()),
        ContextField::QualityMetrics => ctx.quality_metrics = Some(QualityMetrics::default()),
        ContextField::Hotspots => ctx.hotspots = Some(Vec::new()),
        ContextField::SelectedFrames => ctx.selected_frames = Some(Vec::new()),
        ContextField::SuppressionRules => ctx.suppression_rules = Some(Vec::new()),
        ContextField::FramePriorities => ctx.frame_priorities = Some(BTreeMap::new()),
        ContextField::ClassificationReasoning => ctx.classification_reasoning = Some(String::new()),
        ContextField::FrameResults => ctx.frame_results = Some(IndexMap::new()),
        ContextField::Findings => ctx.findings = Some(Vec::new()),
        ContextField::Fortifications => ctx.fortifications = Some(Vec::new()),
        ContextField::CleaningSuggestions => ctx.cleaning_suggestions = Some(Vec::new()),
    }
}

proptest! {
    #[test]
    fn prop_fresh_context_reports_exactly_required(phase in any_phase()) {
        let mut ctx = PipelineContext::new(".", vec![]);
        let violations = ctx.assert_phase_complete(phase);
        prop_assert_eq!(violations, phase.required_fields().to_vec());
    }

    #[test]
    fn prop_violations_are_required_minus_set(
        phase in any_phase(),
        mask in proptest::collection::vec(any::<bool>(), ALL_FIELDS.len()),
    ) {
        let mut ctx = PipelineContext::new(".", vec![]);
        for (field, set) in ALL_FIELDS.iter().zip(&mask) {
            if *set {
                set_empty(&mut ctx, *field);
            }
        }

        let violations = ctx.assert_phase_complete(phase);
        let expected: Vec<ContextField> = phase
            .required_fields()
            .iter()
            .copied()
            .filter(|f| !ctx.is_set(*f))
            .collect();
        prop_assert_eq!(&violations, &expected);
        prop_assert_eq!(ctx.warnings.len(), expected.len());
    }

    #[test]
    fn prop_phase_id_round_trip(phase in any_phase(), lower in any::<bool>()) {
        let id = if lower { phase.as_str().to_lowercase() } else { phase.as_str().to_string() };
        prop_assert_eq!(id.parse::<Phase>(), Ok(phase));
    }
}

#[test]
fn test_every_field_belongs_to_one_phase() {
    let mut owners: BTreeMap<&str, Vec<Phase>> = BTreeMap::new();
    for phase in Phase::ALL {
        for field in phase.required_fields() {
            owners.entry(field.as_str()).or_default().push(phase);
        }
    }
    assert_eq!(owners.len(), ALL_FIELDS.len());
    assert!(owners.values().all(|phases| phases.len() == 1));
}

#[test]
fn test_context_serializes_field_names() {
    let mut ctx = PipelineContext::new(".", vec![]);
    for field in ALL_FIELDS {
        set_empty(&mut ctx, field);
    }
    let json = serde_json::to_value(&ctx).unwrap();
    for field in ALL_FIELDS {
        assert!(json.get(field.as_str()).is_some(), "missing {field}");
    }
}
