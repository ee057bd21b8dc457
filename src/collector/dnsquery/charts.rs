use std::sync::OnceLock;

use crate::chart::{Chart, ChartTemplate, ChartType, Dim};
use crate::collector::registry::DEFAULT_PRIORITY;

const PRIO_QUERY_STATUS: u32 = DEFAULT_PRIORITY;
const PRIO_QUERY_TIME: u32 = DEFAULT_PRIORITY + 1;

fn status_template() -> &'static ChartTemplate {
    static TMPL: OnceLock<ChartTemplate> = OnceLock::new();
    TMPL.get_or_init(|| {
        ChartTemplate::new(
            Chart::new(
                "server_{server}_record_{rtype}_query_status",
                "DNS Query Status",
                "status",
                "query status",
                "dns_query.query_status",
            )
            .with_type(ChartType::Line)
            .with_priority(PRIO_QUERY_STATUS)
            .with_label("server", "{server}")
            .with_label("network", "{network}")
            .with_label("record_type", "{rtype}")
            .with_dim(Dim::new("server_{server}_record_{rtype}_query_status_success").with_name("success"))
            .with_dim(
                Dim::new("server_{server}_record_{rtype}_query_status_network_error")
                    .with_name("network_error"),
            )
            .with_dim(
                Dim::new("server_{server}_record_{rtype}_query_status_dns_error")
                    .with_name("dns_error"),
            ),
        )
    })
}

fn time_template() -> &'static ChartTemplate {
    static TMPL: OnceLock<ChartTemplate> = OnceLock::new();
    TMPL.get_or_init(|| {
        ChartTemplate::new(
            Chart::new(
                "server_{server}_record_{rtype}_query_time",
                "DNS Query Time",
                "seconds",
                "query time",
                "dns_query.query_time",
            )
            .with_type(ChartType::Line)
            .with_priority(PRIO_QUERY_TIME)
            .with_label("server", "{server}")
            .with_label("network", "{network}")
            .with_label("record_type", "{rtype}")
            .with_dim(
                Dim::new("server_{server}_record_{rtype}_query_time")
                    .with_name("query_time")
                    .with_div(1_000_000_000),
            ),
        )
    })
}

/// Status and time charts for one server and record type.
pub fn server_charts(server: &str, network: &str, rtype: &str) -> Vec<Chart> {
    let subs = [("server", server), ("network", network), ("rtype", rtype)];
    vec![
        status_template().instantiate(&subs),
        time_template().instantiate(&subs),
    ]
}

/// Dimension ID of an outcome on the status chart.
pub(super) fn status_dim_id(server: &str, rtype: &str, outcome: &str) -> String {
    format!("server_{server}_record_{rtype}_query_status_{outcome}")
}

/// Dimension ID on the time chart.
pub(super) fn time_dim_id(server: &str, rtype: &str) -> String {
    format!("server_{server}_record_{rtype}_query_time")
}
