use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::cohorts::cohort_models::{CohortExpression, CohortId, CohortNode, CohortPropertyType};
use crate::properties::property_matching::{match_property, FlagMatchingError};
use crate::properties::property_models::{PropertyFilter, PropertyType};

/// Resolve a `cohort`-typed flag filter against the downloaded cohort map.
///
/// Cohorts may reference other cohorts; the definitions form a DAG and any
/// cycle is reported as inconclusive rather than looping. Negation at any
/// level only flips a definitive answer: an inconclusive sub-condition stays
/// inconclusive, because "not unknown" is still unknown.
pub fn match_cohort(
    filter: &PropertyFilter,
    properties: &HashMap<String, Value>,
    cohorts: &HashMap<CohortId, CohortExpression>,
    now: DateTime<Utc>,
) -> Result<bool, FlagMatchingError> {
    let cohort_id = filter.cohort_id().ok_or_else(|| {
        FlagMatchingError::ValidationError("cohort filter without a numeric id".to_string())
    })?;

    let mut in_progress = HashSet::new();
    let is_member = evaluate_cohort(cohort_id, properties, cohorts, &mut in_progress, now)?;
    if filter.is_negated() {
        Ok(!is_member)
    } else {
        Ok(is_member)
    }
}

fn evaluate_cohort(
    cohort_id: CohortId,
    properties: &HashMap<String, Value>,
    cohorts: &HashMap<CohortId, CohortExpression>,
    in_progress: &mut HashSet<CohortId>,
    now: DateTime<Utc>,
) -> Result<bool, FlagMatchingError> {
    if !in_progress.insert(cohort_id) {
        tracing::warn!("cycle while evaluating cohort {cohort_id}");
        return Err(FlagMatchingError::CohortDependencyCycle(cohort_id));
    }

    let result = match cohorts.get(&cohort_id) {
        Some(expression) => evaluate_expression(expression, properties, cohorts, in_progress, now),
        None => Err(FlagMatchingError::MissingCohort(cohort_id)),
    };

    in_progress.remove(&cohort_id);
    result
}

fn evaluate_expression(
    expression: &CohortExpression,
    properties: &HashMap<String, Value>,
    cohorts: &HashMap<CohortId, CohortExpression>,
    in_progress: &mut HashSet<CohortId>,
    now: DateTime<Utc>,
) -> Result<bool, FlagMatchingError> {
    let results = expression
        .values
        .iter()
        .map(|node| evaluate_node(node, properties, cohorts, in_progress, now));

    let combined = match expression.prop_type {
        CohortPropertyType::And => combine_and(results),
        CohortPropertyType::Or => combine_or(results),
    }?;

    if expression.negation.unwrap_or(false) {
        Ok(!combined)
    } else {
        Ok(combined)
    }
}

fn evaluate_node(
    node: &CohortNode,
    properties: &HashMap<String, Value>,
    cohorts: &HashMap<CohortId, CohortExpression>,
    in_progress: &mut HashSet<CohortId>,
    now: DateTime<Utc>,
) -> Result<bool, FlagMatchingError> {
    match node {
        CohortNode::Group(group) => {
            evaluate_expression(group, properties, cohorts, in_progress, now)
        }
        CohortNode::Filter(filter) if filter.prop_type == PropertyType::Cohort => {
            let nested_id = filter.cohort_id().ok_or_else(|| {
                FlagMatchingError::ValidationError(
                    "cohort filter without a numeric id".to_string(),
                )
            })?;
            let is_member = evaluate_cohort(nested_id, properties, cohorts, in_progress, now)?;
            if filter.is_negated() {
                Ok(!is_member)
            } else {
                Ok(is_member)
            }
        }
        CohortNode::Filter(filter) => {
            let matched = match_property(filter, properties, now);
            if filter.is_negated() {
                // A negated filter on a property we never saw can't be proven
                // false, so the Err passes through untouched
                matched.map(|m| !m)
            } else {
                matched
            }
        }
    }
}

// AND: one definitive false decides, regardless of inconclusive siblings.
fn combine_and(
    results: impl Iterator<Item = Result<bool, FlagMatchingError>>,
) -> Result<bool, FlagMatchingError> {
    let mut first_error = None;
    for result in results {
        match result {
            Ok(false) => return Ok(false),
            Ok(true) => {}
            Err(e) => first_error = first_error.or(Some(e)),
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(true),
    }
}

// OR: one definitive true decides, regardless of inconclusive siblings.
fn combine_or(
    results: impl Iterator<Item = Result<bool, FlagMatchingError>>,
) -> Result<bool, FlagMatchingError> {
    let mut first_error = None;
    for result in results {
        match result {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => first_error = first_error.or(Some(e)),
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(false),
    }
}
