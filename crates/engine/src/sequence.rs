//! Sequence model: ordered steps of a workflow
//!
//! All edits go through functions that validate the whole sequence and
//! renumber it, so step numbers stay contiguous from 1.

use std::collections::HashSet;

use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::model::{SequenceStep, StepAction};

/// Assign step numbers 1..=n in slice order
pub fn renumber(steps: &mut [SequenceStep]) {
    for (idx, step) in steps.iter_mut().enumerate() {
        step.step_number = idx as u32 + 1;
    }
}

/// Build a numbered sequence from step configurations
pub fn build(actions: Vec<StepAction>) -> Result<Vec<SequenceStep>> {
    let steps: Vec<SequenceStep> = actions
        .into_iter()
        .enumerate()
        .map(|(idx, action)| SequenceStep::new(idx as u32 + 1, action))
        .collect();
    validate(&steps)?;
    Ok(steps)
}

/// Check a sequence as a whole
///
/// Step numbers must be unique and contiguous from 1, ids unique, every step
/// configuration valid, and every branch target must name a step of this
/// sequence other than the condition step itself.
pub fn validate(steps: &[SequenceStep]) -> Result<()> {
    let mut numbers = HashSet::new();
    let mut ids = HashSet::new();
    for step in steps {
        if !numbers.insert(step.step_number) {
            return Err(EngineError::validation(format!(
                "duplicate step number {}",
                step.step_number
            )));
        }
        if !ids.insert(step.id) {
            return Err(EngineError::validation(format!("duplicate step id {}", step.id)));
        }
        step.action.validate()?;
    }
    for (idx, step) in steps.iter().enumerate() {
        if step.step_number != idx as u32 + 1 {
            return Err(EngineError::validation(format!(
                "step numbers must be contiguous from 1; found {} at position {}",
                step.step_number,
                idx + 1
            )));
        }
        for target in step.action.branch_targets() {
            if target == step.id {
                return Err(EngineError::validation(format!(
                    "step {} cannot branch to itself",
                    step.step_number
                )));
            }
            if !ids.contains(&target) {
                return Err(EngineError::validation(format!(
                    "step {} branches to unknown step {target}",
                    step.step_number
                )));
            }
        }
    }
    Ok(())
}

/// Append a step at the end; returns the new step
pub fn append(steps: &mut Vec<SequenceStep>, action: StepAction) -> Result<SequenceStep> {
    action.validate()?;
    let step = SequenceStep::new(steps.len() as u32 + 1, action);
    steps.push(step.clone());
    if let Err(err) = validate(steps) {
        steps.pop();
        return Err(err);
    }
    Ok(step)
}

/// Reorder to match `ordered_ids`, which must be a permutation of the current ids
pub fn reorder(steps: &mut Vec<SequenceStep>, ordered_ids: &[Uuid]) -> Result<()> {
    if ordered_ids.len() != steps.len() {
        return Err(EngineError::validation(format!(
            "reorder expects {} step ids, got {}",
            steps.len(),
            ordered_ids.len()
        )));
    }
    let mut reordered = Vec::with_capacity(steps.len());
    let mut seen = HashSet::new();
    for id in ordered_ids {
        if !seen.insert(*id) {
            return Err(EngineError::validation(format!(
                "step id {id} appears more than once"
            )));
        }
        let step = steps
            .iter()
            .find(|s| s.id == *id)
            .ok_or_else(|| EngineError::validation(format!("unknown step id {id}")))?;
        reordered.push(step.clone());
    }
    renumber(&mut reordered);
    validate(&reordered)?;
    *steps = reordered;
    Ok(())
}

/// Remove a step and renumber the rest
pub fn remove(steps: &mut Vec<SequenceStep>, step_id: Uuid) -> Result<SequenceStep> {
    let idx = steps
        .iter()
        .position(|s| s.id == step_id)
        .ok_or_else(|| EngineError::validation(format!("unknown step id {step_id}")))?;
    if let Some(referrer) = steps
        .iter()
        .find(|s| s.action.branch_targets().any(|t| t == step_id))
    {
        return Err(EngineError::validation(format!(
            "step {} is a branch target of step {}",
            steps[idx].step_number, referrer.step_number
        )));
    }
    let removed = steps.remove(idx);
    renumber(steps);
    Ok(removed)
}

/// Replace a step's configuration in place; its id and position are kept
pub fn replace(
    steps: &mut [SequenceStep],
    step_id: Uuid,
    action: StepAction,
) -> Result<SequenceStep> {
    let idx = steps
        .iter()
        .position(|s| s.id == step_id)
        .ok_or_else(|| EngineError::validation(format!("unknown step id {step_id}")))?;
    let previous = std::mem::replace(&mut steps[idx].action, action);
    if let Err(err) = validate(steps) {
        steps[idx].action = previous;
        return Err(err);
    }
    Ok(steps[idx].clone())
}

/// Step number after `current` in sequence order, if any
pub fn next_step_number(steps: &[SequenceStep], current: u32) -> Option<u32> {
    let next = current + 1;
    steps.iter().any(|s| s.step_number == next).then_some(next)
}

/// Step number for a branch target id
pub fn step_number_of(steps: &[SequenceStep], step_id: Uuid) -> Option<u32> {
    steps.iter().find(|s| s.id == step_id).map(|s| s.step_number)
}
