//! Public protocol structs for the content server's HTTP endpoints (serde ready).
//! Lessons, modules and metadata go over the wire as the domain types; only
//! the envelopes live here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthOut {
    pub ok: bool,
    pub lessons: usize,
    pub modules: usize,
    #[serde(rename = "lastUpdatedTimestamp")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorOut {
    pub error: String,
}

/// `GET /api/v1/lessons?ids=a,b,c` narrows the listing; unknown ids are left out.
#[derive(Debug, Default, Deserialize)]
pub struct LessonsQuery {
    #[serde(default)]
    pub ids: Option<String>,
}

impl LessonsQuery {
    pub fn id_list(&self) -> Option<Vec<String>> {
        self.ids.as_ref().map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}
