//! `/xml/v3` decoder.
//!
//! Only `<counters type="..."><counter name="...">N</counter></counters>`
//! groups are read, from the `<server>` element and from each
//! `<view name="...">`.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use super::json::{ServerStats, View};
use crate::probe::{ProbeError, ProbeResult};

fn section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<server>(.*?)</server>").expect("valid regex"))
}

fn view_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<view\s+name="([^"]*)"\s*>(.*?)</view>"#).expect("valid regex")
    })
}

fn counters_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<counters\s+type="([^"]*)"\s*>(.*?)</counters>"#).expect("valid regex")
    })
}

fn counter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<counter\s+name="([^"]*)"\s*>\s*(-?\d+)\s*</counter>"#).expect("valid regex")
    })
}

fn counter_groups(text: &str) -> ProbeResult<BTreeMap<String, BTreeMap<String, i64>>> {
    let mut groups: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
    for caps in counters_re().captures_iter(text) {
        let group = groups.entry(caps[1].to_string()).or_default();
        for counter in counter_re().captures_iter(&caps[2]) {
            let value = counter[2].parse::<i64>().map_err(|e| {
                ProbeError::protocol(format!("bad counter value for '{}'", &counter[1]))
                    .with_source(e)
            })?;
            group.insert(counter[1].to_string(), value);
        }
    }
    Ok(groups)
}

pub(super) fn parse(body: &str) -> ProbeResult<ServerStats> {
    if !body.contains("<statistics") {
        return Err(ProbeError::protocol("response is not a bind statistics document"));
    }

    let mut stats = ServerStats::default();
    if let Some(server) = section_re().captures(body) {
        let mut groups = counter_groups(&server[1])?;
        stats.opcodes = groups.remove("opcode").unwrap_or_default();
        stats.qtypes = groups.remove("qtype").unwrap_or_default();
        stats.nsstats = groups.remove("nsstat").unwrap_or_default();
        stats.sockstats = groups.remove("sockstat").unwrap_or_default();
    }

    for caps in view_re().captures_iter(body) {
        let mut groups = counter_groups(&caps[2])?;
        let mut view = View::default();
        view.resolver.stats = groups.remove("resstats").unwrap_or_default();
        view.resolver.qtypes = groups.remove("resqtype").unwrap_or_default();
        view.resolver.cachestats = groups.remove("cachestats").unwrap_or_default();
        stats.views.insert(caps[1].to_string(), view);
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<statistics version="3.11">
  <server>
    <counters type="opcode">
      <counter name="QUERY">120</counter>
      <counter name="NOTIFY">3</counter>
    </counters>
    <counters type="qtype">
      <counter name="A">80</counter>
      <counter name="AAAA">40</counter>
    </counters>
    <counters type="nsstat">
      <counter name="Requestv4">123</counter>
      <counter name="QrySuccess">110</counter>
    </counters>
  </server>
  <views>
    <view name="_default">
      <counters type="resqtype">
        <counter name="A">9</counter>
      </counters>
      <counters type="resstats">
        <counter name="Queryv4">12</counter>
      </counters>
      <counters type="cachestats">
        <counter name="CacheHits">70</counter>
        <counter name="CacheMisses">7</counter>
      </counters>
    </view>
    <view name="_bind">
      <counters type="resstats"></counters>
    </view>
  </views>
</statistics>"#;

    #[test]
    fn test_parse_server_counters() {
        let stats = parse(DOC).unwrap();
        assert_eq!(stats.opcodes["QUERY"], 120);
        assert_eq!(stats.qtypes["AAAA"], 40);
        assert_eq!(stats.nsstats["Requestv4"], 123);
        assert!(stats.sockstats.is_empty());
    }

    #[test]
    fn test_parse_views() {
        let stats = parse(DOC).unwrap();
        assert_eq!(stats.views.len(), 2);
        let default = &stats.views["_default"].resolver;
        assert_eq!(default.qtypes["A"], 9);
        assert_eq!(default.stats["Queryv4"], 12);
        assert_eq!(default.cachestats["CacheMisses"], 7);
        assert!(stats.views["_bind"].resolver.stats.is_empty());
    }

    #[test]
    fn test_parse_rejects_other_documents() {
        assert!(parse("<html>nope</html>").is_err());
    }
}
