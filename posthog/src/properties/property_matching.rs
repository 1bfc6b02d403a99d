use std::collections::HashMap;

use crate::properties::property_models::{OperatorType, PropertyFilter};
use crate::properties::relative_date;
use chrono::{DateTime, Utc};
use dateparser::parse as parse_date;
use regex::Regex;
use serde_json::Value;

/// Signals raised while matching a single filter. Every variant means the
/// local evaluator cannot produce a definitive answer for the enclosing flag
/// and has to hand the decision to the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagMatchingError {
    ValidationError(String),
    MissingProperty(String),
    InconclusiveOperatorMatch,
    MissingCohort(i64),
    CohortDependencyCycle(i64),
    MissingDependencyChain(String),
    ExperienceContinuityRequired,
}

pub fn to_string_representation(value: &Value) -> String {
    if value.is_string() {
        return value
            .as_str()
            .expect("string slice should always exist for string value")
            .to_string();
    }
    value.to_string()
}

pub fn to_f64_representation(value: &Value) -> Option<f64> {
    if value.is_number() {
        return value.as_f64();
    }
    to_string_representation(value).parse::<f64>().ok()
}

/// Match one property filter against a bag of known property values.
///
/// The bag only holds properties the caller actually supplied, so absence is
/// not proof of anything: a missing property is inconclusive for most
/// operators. The negated operators `is_not`, `not_icontains` and `not_regex`
/// are vacuously true on a missing property. `is_not_set` can never be
/// proven locally and is always inconclusive unless the property is present.
///
/// `now` anchors relative date filter values like "-30d".
pub fn match_property(
    property: &PropertyFilter,
    matching_property_values: &HashMap<String, Value>,
    now: DateTime<Utc>,
) -> Result<bool, FlagMatchingError> {
    let key = &property.key;
    let operator = property.operator.unwrap_or(OperatorType::Exact);

    // Presence tests don't need a filter value
    match operator {
        OperatorType::IsSet => return Ok(matching_property_values.contains_key(key)),
        OperatorType::IsNotSet => {
            return if matching_property_values.contains_key(key) {
                Ok(false)
            } else {
                Err(FlagMatchingError::InconclusiveOperatorMatch)
            }
        }
        _ => {}
    }

    if !matching_property_values.contains_key(key) {
        return match operator {
            // Vacuous truth: we can't disprove inequality for a property we
            // never saw, and the other SDKs admit these.
            OperatorType::IsNot | OperatorType::NotIcontains | OperatorType::NotRegex => Ok(true),
            _ => Err(FlagMatchingError::MissingProperty(format!(
                "can't match properties without a value. Missing property: {key}"
            ))),
        };
    }

    let match_value = matching_property_values
        .get(key)
        .expect("checked for membership above");

    // For all remaining operators a filter value is required
    let value = match &property.value {
        Some(v) => v,
        None => return Ok(false),
    };

    match operator {
        OperatorType::Exact | OperatorType::IsNot => {
            let is_match = compute_exact_match(value, match_value);
            if operator == OperatorType::Exact {
                Ok(is_match)
            } else {
                Ok(!is_match)
            }
        }
        OperatorType::Icontains | OperatorType::NotIcontains => {
            // ASCII case folding is all the product promises, and it's cheaper
            // than full Unicode lowercasing
            let is_contained = to_string_representation(match_value)
                .to_ascii_lowercase()
                .contains(&to_string_representation(value).to_ascii_lowercase());

            if operator == OperatorType::Icontains {
                Ok(is_contained)
            } else {
                Ok(!is_contained)
            }
        }
        OperatorType::Regex | OperatorType::NotRegex => {
            let pattern = match Regex::new(&to_string_representation(value)) {
                Ok(pattern) => pattern,
                Err(_) => {
                    // An unparsable pattern matches nothing; a decisive no
                    // rather than a fallback to the remote endpoint
                    return Ok(operator == OperatorType::NotRegex);
                }
            };
            let haystack = to_string_representation(match_value);
            let found = pattern.find(&haystack).is_some();

            if operator == OperatorType::Regex {
                Ok(found)
            } else {
                Ok(!found)
            }
        }
        OperatorType::Gt | OperatorType::Gte | OperatorType::Lt | OperatorType::Lte => {
            // Numeric when both sides parse as numbers, lexicographic on the
            // string renderings otherwise
            let ordering = match (to_f64_representation(match_value), to_f64_representation(value))
            {
                (Some(lhs), Some(rhs)) => lhs.partial_cmp(&rhs),
                _ => Some(
                    to_string_representation(match_value).cmp(&to_string_representation(value)),
                ),
            };
            let Some(ordering) = ordering else {
                // NaN comparisons are undecidable
                return Err(FlagMatchingError::InconclusiveOperatorMatch);
            };
            Ok(match operator {
                OperatorType::Gt => ordering.is_gt(),
                OperatorType::Gte => ordering.is_ge(),
                OperatorType::Lt => ordering.is_lt(),
                OperatorType::Lte => ordering.is_le(),
                _ => unreachable!("checked by outer match"),
            })
        }
        OperatorType::IsDateExact | OperatorType::IsDateAfter | OperatorType::IsDateBefore => {
            let Some(parsed_date) = determine_parsed_date_for_property_matching(match_value) else {
                // The property is present but not a date we understand
                return Err(FlagMatchingError::InconclusiveOperatorMatch);
            };

            let Some(filter_value) = value.as_str() else {
                return Err(FlagMatchingError::InconclusiveOperatorMatch);
            };
            let Some(filter_date) = parse_date_string(filter_value, now) else {
                return Err(FlagMatchingError::InconclusiveOperatorMatch);
            };

            match operator {
                OperatorType::IsDateBefore => Ok(parsed_date < filter_date),
                OperatorType::IsDateAfter => Ok(parsed_date > filter_date),
                OperatorType::IsDateExact => Ok(parsed_date == filter_date),
                _ => unreachable!("checked by outer match"),
            }
        }
        // NB: In/NotIn operators are only for cohorts and are decomposed by
        // the cohort matching code before properties are compared
        OperatorType::In | OperatorType::NotIn => Err(FlagMatchingError::ValidationError(
            "in/not_in operators should be handled by cohort matching".to_string(),
        )),
        OperatorType::FlagEvaluatesTo => Err(FlagMatchingError::ValidationError(
            "flag_evaluates_to operator should be handled by flag dependency matching".to_string(),
        )),
        OperatorType::IsSet | OperatorType::IsNotSet => {
            unreachable!("handled before the value checks")
        }
    }
}

/// Case-insensitive equality after rendering both sides to strings, with two
/// wrinkles: "true"/"True"/true are all equal, and a list filter value
/// matches if any element matches.
fn compute_exact_match(value: &Value, override_value: &Value) -> bool {
    if is_truthy_or_falsy_property_value(value) {
        let (truthy_value, truthy_override_value) = (
            is_truthy_property_value(value),
            is_truthy_property_value(override_value),
        );
        return truthy_override_value == truthy_value;
    }

    if value.is_array() {
        return value
            .as_array()
            .expect("expected array value")
            .iter()
            .any(|v| {
                to_string_representation(v).to_lowercase()
                    == to_string_representation(override_value).to_lowercase()
            });
    }
    to_string_representation(value).to_lowercase()
        == to_string_representation(override_value).to_lowercase()
}

fn is_truthy_or_falsy_property_value(value: &Value) -> bool {
    if value.is_boolean() {
        return true;
    }

    if value.is_string() {
        let parsed_value = value
            .as_str()
            .expect("expected string value")
            .to_lowercase();
        return parsed_value == "true" || parsed_value == "false";
    }

    if value.is_array() {
        return value
            .as_array()
            .expect("expected array value")
            .iter()
            .all(is_truthy_or_falsy_property_value);
    }

    false
}

fn is_truthy_property_value(value: &Value) -> bool {
    if value.is_boolean() {
        return value.as_bool().expect("expected boolean value");
    }

    if value.is_string() {
        let parsed_value = value
            .as_str()
            .expect("expected string value")
            .to_lowercase();
        return parsed_value == "true";
    }

    if value.is_array() {
        return value
            .as_array()
            .expect("expected array value")
            .iter()
            .all(is_truthy_property_value);
    }

    false
}

fn parse_date_string(date_str: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(date) = relative_date::parse_relative_date(date_str, now) {
        return Some(date);
    }
    parse_date(date_str).ok()
}

fn determine_parsed_date_for_property_matching(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(date_str) = value.as_str() {
        // A numeric string is a unix timestamp, possibly fractional
        if let Ok(num) = date_str.parse::<f64>() {
            return parse_float_timestamp(num);
        }
        return parse_date(date_str).ok();
    }

    if let Some(num) = value.as_number() {
        // Unix timestamps are seconds since epoch
        let seconds_f = num.as_f64()?;
        return parse_float_timestamp(seconds_f);
    }

    None
}

fn parse_float_timestamp(value: f64) -> Option<DateTime<Utc>> {
    let whole_seconds = value.floor() as i64;
    let nanos = ((value % 1.0) * 1_000_000_000.0).round() as u32;
    DateTime::from_timestamp(whole_seconds, nanos)
}
