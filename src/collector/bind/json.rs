//! Server statistics model and the `/json/v1` decoder.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::probe::ProbeResult;
use crate::probe::http::HttpResponse;

/// Counters reported by one statistics fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerStats {
    #[serde(default)]
    pub nsstats: BTreeMap<String, i64>,
    #[serde(default)]
    pub opcodes: BTreeMap<String, i64>,
    #[serde(default)]
    pub qtypes: BTreeMap<String, i64>,
    #[serde(default)]
    pub sockstats: BTreeMap<String, i64>,
    #[serde(default)]
    pub views: BTreeMap<String, View>,
}

/// Per-view counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct View {
    #[serde(default)]
    pub resolver: Resolver,
}

/// Resolver counters of one view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Resolver {
    #[serde(default)]
    pub stats: BTreeMap<String, i64>,
    #[serde(default)]
    pub qtypes: BTreeMap<String, i64>,
    #[serde(default)]
    pub cachestats: BTreeMap<String, i64>,
}

pub(super) fn parse(resp: &HttpResponse) -> ProbeResult<ServerStats> {
    resp.json()
}
