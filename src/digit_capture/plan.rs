//! Multi-step collection plans (spec §4.4 "Multi-step plan").

use serde::{Deserialize, Serialize};

use crate::ids::PlanId;

use super::{Expectation, Profile};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub profile: Profile,
    pub min_len: usize,
    pub max_len: usize,
    pub step_prompt: String,
}

/// An ordered sequence of Expectations composing a multi-step digit
/// capture, e.g. card -> expiry -> cvv. Immutable once installed on a
/// call (spec §3 CollectionPlan entity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionPlan {
    pub plan_id: PlanId,
    pub group_id: String,
    pub steps: Vec<PlanStep>,
    pub completion_message: String,
    pub end_call_on_success: bool,
}

impl CollectionPlan {
    pub fn new(group_id: impl Into<String>, steps: Vec<PlanStep>, completion_message: impl Into<String>) -> Self {
        Self {
            plan_id: PlanId::new(),
            group_id: group_id.into(),
            steps,
            completion_message: completion_message.into(),
            end_call_on_success: false,
        }
    }

    /// Build the Expectation for `step_index`, or `None` past the last step.
    pub fn expectation_for_step(&self, step_index: usize) -> Option<Expectation> {
        let step = self.steps.get(step_index)?;
        let mut expectation = Expectation::new(step.profile, step.min_len, step.max_len, step.step_prompt.clone());
        expectation.plan_id = Some(self.plan_id.clone());
        expectation.plan_step_index = Some(step_index);
        expectation.end_call_on_success = step_index + 1 == self.steps.len() && self.end_call_on_success;
        Some(expectation)
    }

    pub fn is_last_step(&self, step_index: usize) -> bool {
        step_index + 1 >= self.steps.len()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_through_card_expiry_cvv_steps() {
        let plan = CollectionPlan::new(
            "card_capture",
            vec![
                PlanStep { profile: Profile::Card, min_len: 16, max_len: 16, step_prompt: "card number".into() },
                PlanStep { profile: Profile::Generic, min_len: 4, max_len: 4, step_prompt: "expiry MMYY".into() },
                PlanStep { profile: Profile::Cvv, min_len: 3, max_len: 4, step_prompt: "cvv".into() },
            ],
            "Thanks, all set.",
        );
        assert_eq!(plan.len(), 3);
        assert!(plan.expectation_for_step(0).is_some());
        assert!(plan.expectation_for_step(3).is_none());
        assert!(plan.is_last_step(2));
    }
}
