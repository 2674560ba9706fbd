//! Filter predicates for `list` and `prune`.
//!
//! Filters arrive as a map from key to values. Parsing validates every key
//! and value up front, so a bad request fails before anything is listed or
//! removed. Distinct keys are ANDed; several values for one key are ORed,
//! except `label` and `until`, whose values must all hold.

use std::collections::HashMap;
use std::str::FromStr;

use berth_common::error::{BerthError, Result};
use berth_common::types::ContainerState;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;

use crate::container::ContainerRecord;

/// Filter request: key to accepted values.
pub type Filters = HashMap<String, Vec<String>>;

/// Keys accepted by `list`.
pub const LIST_FILTER_KEYS: &[&str] = &[
    "id", "name", "label", "status", "exited", "pod", "volume", "since", "before", "until",
];

/// Keys accepted by `prune`.
pub const PRUNE_FILTER_KEYS: &[&str] = &["until", "label"];

#[derive(Debug, Clone)]
struct LabelFilter {
    key: String,
    value: Option<String>,
}

impl LabelFilter {
    fn parse(raw: &str) -> Self {
        match raw.split_once('=') {
            Some((key, value)) => Self {
                key: key.to_string(),
                value: Some(value.to_string()),
            },
            None => Self {
                key: raw.to_string(),
                value: None,
            },
        }
    }

    fn matches(&self, record: &ContainerRecord) -> bool {
        record
            .labels
            .get(&self.key)
            .is_some_and(|v| self.value.as_ref().is_none_or(|want| want == v))
    }
}

#[derive(Debug, Clone)]
enum Predicate {
    Id(Vec<String>),
    Name(Vec<Regex>),
    Label(Vec<LabelFilter>),
    Status(Vec<ContainerState>),
    Exited(Vec<i32>),
    Pod(Vec<String>),
    Volume(Vec<String>),
    CreatedAfter(DateTime<Utc>),
    CreatedBefore(DateTime<Utc>),
}

/// Context a predicate may need beyond the record itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterContext<'a> {
    /// Name of the container's pod, when it has one that still exists.
    pub pod_name: Option<&'a str>,
}

/// A validated conjunction of predicates.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    predicates: Vec<Predicate>,
}

fn parse_all<T>(values: &[String], parse: impl Fn(&str) -> Result<T>) -> Result<Vec<T>> {
    values.iter().map(|v| parse(v)).collect()
}

/// Parses an `until` value: Unix seconds (optionally fractional), an
/// RFC 3339 timestamp, or a duration such as `10m` meaning that long ago.
///
/// # Errors
///
/// Returns an invalid-argument error for anything else.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<i64>() {
        return Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| BerthError::invalid_argument(format!("timestamp {value} is out of range")));
    }
    if let Some((secs, frac)) = value.split_once('.') {
        if let (Ok(secs), true) = (secs.parse::<i64>(), frac.chars().all(|c| c.is_ascii_digit())) {
            let nanos = format!("{frac:0<9}")
                .get(..9)
                .and_then(|n| n.parse::<u32>().ok())
                .unwrap_or(0);
            return Utc.timestamp_opt(secs, nanos).single().ok_or_else(|| {
                BerthError::invalid_argument(format!("timestamp {value} is out of range"))
            });
        }
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    if let Ok(ago) = humantime::parse_duration(value) {
        let ago = chrono::Duration::from_std(ago)
            .map_err(|_| BerthError::invalid_argument(format!("duration {value} is too large")))?;
        return Ok(Utc::now() - ago);
    }
    Err(BerthError::invalid_argument(format!(
        "{value:?} is not a timestamp or duration"
    )))
}

impl FilterSet {
    /// Validates `filters` against `allowed` keys and builds the
    /// predicates. `resolve_created` maps a container reference to its
    /// creation time for `since` and `before`.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error for a key outside `allowed` or a
    /// malformed value, and the resolver's error for an unknown reference.
    pub fn parse(
        filters: &Filters,
        allowed: &[&str],
        resolve_created: impl Fn(&str) -> Result<DateTime<Utc>>,
    ) -> Result<Self> {
        let mut keys: Vec<&String> = filters.keys().collect();
        keys.sort();

        let mut predicates = Vec::new();
        for key in keys {
            if !allowed.contains(&key.as_str()) {
                return Err(BerthError::invalid_argument(format!(
                    "invalid filter {key:?}"
                )));
            }
            let values = &filters[key];
            if values.is_empty() {
                continue;
            }
            match key.as_str() {
                "id" => predicates.push(Predicate::Id(values.clone())),
                "name" => predicates.push(Predicate::Name(parse_all(values, |v| {
                    Regex::new(v).map_err(|e| {
                        BerthError::invalid_argument(format!("invalid name filter {v:?}: {e}"))
                    })
                })?)),
                "label" => predicates.push(Predicate::Label(
                    values.iter().map(|v| LabelFilter::parse(v)).collect(),
                )),
                "status" => predicates.push(Predicate::Status(parse_all(
                    values,
                    ContainerState::from_str,
                )?)),
                "exited" => predicates.push(Predicate::Exited(parse_all(values, |v| {
                    v.parse::<i32>().map_err(|_| {
                        BerthError::invalid_argument(format!("invalid exit code {v:?}"))
                    })
                })?)),
                "pod" => predicates.push(Predicate::Pod(values.clone())),
                "volume" => predicates.push(Predicate::Volume(values.clone())),
                "since" => {
                    let times = parse_all(values, &resolve_created)?;
                    if let Some(earliest) = times.into_iter().min() {
                        predicates.push(Predicate::CreatedAfter(earliest));
                    }
                }
                "before" => {
                    let times = parse_all(values, &resolve_created)?;
                    if let Some(latest) = times.into_iter().max() {
                        predicates.push(Predicate::CreatedBefore(latest));
                    }
                }
                "until" => {
                    for at in parse_all(values, parse_timestamp)? {
                        predicates.push(Predicate::CreatedBefore(at));
                    }
                }
                other => {
                    return Err(BerthError::invalid_argument(format!(
                        "invalid filter {other:?}"
                    )));
                }
            }
        }
        Ok(Self { predicates })
    }

    /// Returns true when the record satisfies every predicate.
    #[must_use]
    pub fn matches(&self, record: &ContainerRecord, context: FilterContext<'_>) -> bool {
        self.predicates.iter().all(|p| match p {
            Predicate::Id(prefixes) => prefixes
                .iter()
                .any(|prefix| record.id.as_str().starts_with(prefix.as_str())),
            Predicate::Name(patterns) => patterns.iter().any(|re| re.is_match(&record.name)),
            Predicate::Label(labels) => labels.iter().all(|label| label.matches(record)),
            Predicate::Status(states) => states.contains(&record.state),
            Predicate::Exited(codes) => record.has_exited() && codes.contains(&record.exit_code),
            Predicate::Pod(pods) => record.pod.as_ref().is_some_and(|pod_id| {
                pods.iter().any(|want| {
                    Some(want.as_str()) == context.pod_name || pod_id.as_str().starts_with(want.as_str())
                })
            }),
            Predicate::Volume(volumes) => volumes.iter().any(|v| record.uses_volume(v)),
            Predicate::CreatedAfter(at) => record.created_at > *at,
            Predicate::CreatedBefore(at) => record.created_at < *at,
        })
    }

    /// Returns true when no predicate was given.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}
