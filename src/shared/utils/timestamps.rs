use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::infrastructure::http::middleware::error::{ApiError, ApiResult};

/// Encode a timestamp for a TEXT column.
///
/// Fixed-width microsecond precision with a `Z` suffix, so lexical order in
/// SQL matches chronological order.
pub fn to_db_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Drop the sub-microsecond part that a TEXT column cannot hold, so an
/// instant carried in a job payload compares equal to its stored copy.
pub fn at_storage_precision(value: DateTime<Utc>) -> DateTime<Utc> {
    value.trunc_subsecs(6)
}

pub fn to_db_timestamp_opt(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(to_db_timestamp)
}

/// Decode a timestamp stored by [`to_db_timestamp`] (any RFC 3339 value is accepted).
pub fn parse_db_timestamp(value: &str) -> ApiResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ApiError::Internal(format!("Corrupt timestamp '{}': {}", value, e)))
}

pub fn parse_db_timestamp_opt(value: Option<String>) -> ApiResult<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_db_timestamp).transpose()
}
