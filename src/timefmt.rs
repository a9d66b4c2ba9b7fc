//! Serde helpers that render `SystemTime` as RFC 3339 UTC strings.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serializer;
use std::time::SystemTime;

pub fn rfc3339(ts: SystemTime) -> String {
    DateTime::<Utc>::from(ts).to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn serialize<S: Serializer>(ts: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&rfc3339(*ts))
}

pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        ts: &Option<SystemTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serializer.serialize_some(&rfc3339(*ts)),
            None => serializer.serialize_none(),
        }
    }
}
