use std::sync::OnceLock;

use crate::chart::{Chart, ChartTemplate, ChartType, Dim};
use crate::collector::registry::DEFAULT_PRIORITY;

const PRIO_REQUESTS: u32 = DEFAULT_PRIORITY;
const PRIO_QUERIES: u32 = DEFAULT_PRIORITY + 1;
const PRIO_RECURSIVE_CLIENTS: u32 = DEFAULT_PRIORITY + 2;
const PRIO_OPCODES: u32 = DEFAULT_PRIORITY + 3;
const PRIO_QTYPES: u32 = DEFAULT_PRIORITY + 4;
const PRIO_VIEW: u32 = DEFAULT_PRIORITY + 10;

pub(super) const OPCODES_CHART: &str = "incoming_opcodes";
pub(super) const QTYPES_CHART: &str = "incoming_queries";

/// Name-server counters charted on the queries chart, with display names.
pub(super) const QUERY_RESULTS: [(&str, &str); 8] = [
    ("QrySuccess", "success"),
    ("QryReferral", "referral"),
    ("QryNxrrset", "nxrrset"),
    ("QryNXDOMAIN", "nxdomain"),
    ("QryRecursion", "recursion"),
    ("QryFailure", "failure"),
    ("QryDuplicate", "duplicate"),
    ("QryDropped", "dropped"),
];

/// Resolver counters charted per view.
pub(super) const RESOLVER_STATS: [(&str, &str); 6] = [
    ("Queryv4", "queries_v4"),
    ("Queryv6", "queries_v6"),
    ("Responsev4", "responses_v4"),
    ("Responsev6", "responses_v6"),
    ("NXDOMAIN", "nxdomain"),
    ("SERVFAIL", "servfail"),
];

/// Charts present from init onwards.
pub(super) fn base_charts() -> Vec<Chart> {
    let mut queries = Chart::new(
        "queries",
        "Query Results",
        "queries/s",
        "queries",
        "bind.queries",
    )
    .with_type(ChartType::Stacked)
    .with_priority(PRIO_QUERIES);
    for (id, name) in QUERY_RESULTS {
        queries = queries.with_dim(Dim::new(id).with_name(name).incremental());
    }

    vec![
        Chart::new(
            "received_requests",
            "Received Requests",
            "requests/s",
            "requests",
            "bind.requests",
        )
        .with_type(ChartType::Stacked)
        .with_priority(PRIO_REQUESTS)
        .with_dim(Dim::new("Requestv4").with_name("IPv4").incremental())
        .with_dim(Dim::new("Requestv6").with_name("IPv6").incremental()),
        queries,
        Chart::new(
            "recursive_clients",
            "Recursive Clients",
            "clients",
            "clients",
            "bind.recursive_clients",
        )
        .with_priority(PRIO_RECURSIVE_CLIENTS)
        .with_dim(Dim::new("RecursClients").with_name("clients")),
    ]
}

/// Opcodes chart without dimensions; they are added as opcodes show up.
pub(super) fn opcodes_chart() -> Chart {
    Chart::new(
        OPCODES_CHART,
        "Incoming Requests by OpCode",
        "requests/s",
        "requests",
        "bind.opcodes",
    )
    .with_type(ChartType::Stacked)
    .with_priority(PRIO_OPCODES)
}

/// Query-type chart without dimensions.
pub(super) fn qtypes_chart() -> Chart {
    Chart::new(
        QTYPES_CHART,
        "Incoming Queries by Type",
        "queries/s",
        "queries",
        "bind.qtypes",
    )
    .with_type(ChartType::Stacked)
    .with_priority(PRIO_QTYPES)
}

pub(super) fn opcode_dim(opcode: &str) -> Dim {
    Dim::new(format!("opcode_{opcode}")).with_name(opcode).incremental()
}

pub(super) fn qtype_dim(qtype: &str) -> Dim {
    Dim::new(format!("qtype_{qtype}")).with_name(qtype).incremental()
}

fn view_stats_template() -> &'static ChartTemplate {
    static TMPL: OnceLock<ChartTemplate> = OnceLock::new();
    TMPL.get_or_init(|| {
        let mut chart = Chart::new(
            "{view}_resolver_stats",
            "Resolver Statistics",
            "events/s",
            "view {view}",
            "bind.resolver_stats",
        )
        .with_priority(PRIO_VIEW)
        .with_label("view", "{view}");
        for (id, name) in RESOLVER_STATS {
            chart = chart.with_dim(Dim::new(format!("{{view}}_{id}")).with_name(name).incremental());
        }
        ChartTemplate::new(chart)
    })
}

fn view_cache_template() -> &'static ChartTemplate {
    static TMPL: OnceLock<ChartTemplate> = OnceLock::new();
    TMPL.get_or_init(|| {
        ChartTemplate::new(
            Chart::new(
                "{view}_cache_hits",
                "Resolver Cache Hits",
                "operations/s",
                "view {view}",
                "bind.resolver_cache",
            )
            .with_type(ChartType::Area)
            .with_priority(PRIO_VIEW + 1)
            .with_label("view", "{view}")
            .with_dim(Dim::new("{view}_CacheHits").with_name("hits").incremental())
            .with_dim(Dim::new("{view}_CacheMisses").with_name("misses").incremental()),
        )
    })
}

fn view_qtypes_template() -> &'static ChartTemplate {
    static TMPL: OnceLock<ChartTemplate> = OnceLock::new();
    TMPL.get_or_init(|| {
        ChartTemplate::new(
            Chart::new(
                "{view}_resolver_qtypes",
                "Resolver Outgoing Queries by Type",
                "queries/s",
                "view {view}",
                "bind.resolver_qtypes",
            )
            .with_type(ChartType::Stacked)
            .with_priority(PRIO_VIEW + 2)
            .with_label("view", "{view}"),
        )
    })
}

/// Fixed-dimension charts of one view.
pub(super) fn view_charts(view: &str) -> Vec<Chart> {
    let subs = [("view", view)];
    vec![
        view_stats_template().instantiate(&subs),
        view_cache_template().instantiate(&subs),
    ]
}

/// Per-view query-type chart without dimensions.
pub(super) fn view_qtypes_chart(view: &str) -> Chart {
    view_qtypes_template().instantiate(&[("view", view)])
}

pub(super) fn view_qtype_dim(view: &str, qtype: &str) -> Dim {
    Dim::new(format!("{view}_qtype_{qtype}")).with_name(qtype).incremental()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_charts_are_valid() {
        let charts = base_charts();
        assert_eq!(charts.len(), 3);
        for chart in &charts {
            chart.validate().unwrap();
        }
        assert_eq!(charts[1].dims.len(), QUERY_RESULTS.len());
    }

    #[test]
    fn test_view_charts_substitute_view_name() {
        let charts = view_charts("_default");
        assert_eq!(charts[0].id, "_default_resolver_stats");
        assert_eq!(charts[0].dims[0].id, "_default_Queryv4");
        assert_eq!(charts[1].id, "_default_cache_hits");
        assert_eq!(charts[1].labels[0].value, "_default");

        let qtypes = view_qtypes_chart("my-view");
        assert_eq!(qtypes.id, "my_view_resolver_qtypes");
        assert!(qtypes.dims.is_empty());
        assert_eq!(view_qtype_dim("my-view", "A").id, "my-view_qtype_A");
    }
}
