//! Intervention merger: picks one winner from a batch of positive outcomes.
//!
//! Ranking is by [`InterventionType::priority`], then strictly higher
//! confidence. Equal confidence keeps the earlier outcome.

use crate::types::{AnalysisOutcome, Intervention, TranscriptEntry};

/// Pick the winning outcome, ignoring those that did not ask to intervene.
pub fn select_winner<'a, I>(outcomes: I) -> Option<&'a AnalysisOutcome>
where
    I: IntoIterator<Item = &'a AnalysisOutcome>,
{
    let mut best: Option<&AnalysisOutcome> = None;
    for candidate in outcomes.into_iter().filter(|o| o.needs_intervention) {
        best = match best {
            None => Some(candidate),
            Some(current) => {
                let (cp, bp) = (
                    candidate.intervention_type.priority(),
                    current.intervention_type.priority(),
                );
                if cp > bp || (cp == bp && candidate.confidence > current.confidence) {
                    Some(candidate)
                } else {
                    Some(current)
                }
            }
        };
    }
    best
}

/// Candidate intervention for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    pub intervention: Intervention,
    /// Built from the recovery fallback rather than an analyzer outcome.
    pub recovered: bool,
}

/// Build the intervention for the winning outcome, or from `fallback` when no
/// outcome asks to intervene, citing the most recent transcript entry.
pub fn merge<'a, I>(
    outcomes: I,
    fallback: Option<&AnalysisOutcome>,
    latest: Option<&TranscriptEntry>,
) -> Option<Merged>
where
    I: IntoIterator<Item = &'a AnalysisOutcome>,
{
    let (source, recovered) = match select_winner(outcomes) {
        Some(winner) => (winner, false),
        None => (fallback?, true),
    };
    let mut intervention = Intervention::from_outcome(source);
    if let Some(entry) = latest {
        intervention.attach_source(entry);
    }
    Some(Merged {
        intervention,
        recovered,
    })
}
