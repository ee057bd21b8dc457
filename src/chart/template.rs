//! Chart templates and ID helpers.

use super::types::Chart;

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
pub fn canonicalize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Join parts with `_`, canonicalizing each.
///
/// `canonical_id(&["server", "8.8.8.8", "record", "A"])` yields
/// `server_8_8_8_8_record_A`.
pub fn canonical_id(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| canonicalize(p))
        .collect::<Vec<_>>()
        .join("_")
}

/// Immutable chart blueprint.
///
/// Placeholders of the form `{key}` are substituted on instantiation. In
/// the chart ID, the substituted value is canonicalized; in dimension IDs
/// and label values, the raw value is used. The template itself is never
/// mutated.
#[derive(Debug, Clone)]
pub struct ChartTemplate {
    chart: Chart,
}

impl ChartTemplate {
    pub fn new(chart: Chart) -> Self {
        Self { chart }
    }

    /// The untouched template chart.
    pub fn chart(&self) -> &Chart {
        &self.chart
    }

    /// Deep-copy the template with placeholders substituted.
    pub fn instantiate(&self, subs: &[(&str, &str)]) -> Chart {
        let mut chart = self.chart.clone();
        chart.id = substitute(&chart.id, subs, true);
        chart.title = substitute(&chart.title, subs, false);
        chart.family = substitute(&chart.family, subs, false);
        for dim in &mut chart.dims {
            dim.id = substitute(&dim.id, subs, false);
            dim.name = substitute(&dim.name, subs, false);
        }
        for label in &mut chart.labels {
            label.value = substitute(&label.value, subs, false);
        }
        for var in &mut chart.vars {
            var.id = substitute(&var.id, subs, false);
        }
        chart
    }
}

fn substitute(text: &str, subs: &[(&str, &str)], canonical: bool) -> String {
    if !text.contains('{') {
        return text.to_string();
    }
    let mut out = text.to_string();
    for (key, value) in subs {
        let placeholder = format!("{{{key}}}");
        if canonical {
            out = out.replace(&placeholder, &canonicalize(value));
        } else {
            out = out.replace(&placeholder, value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::Dim;

    fn template() -> ChartTemplate {
        ChartTemplate::new(
            Chart::new(
                "server_{server}_record_{rtype}_query_status",
                "DNS Query Status",
                "status",
                "query status",
                "dns_query.query_status",
            )
            .with_label("server", "{server}")
            .with_dim(Dim::new("{server}_{rtype}_query_status_success").with_name("success")),
        )
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize("8.8.8.8"), "8_8_8_8");
        assert_eq!(canonicalize("2001:db8::1"), "2001_db8__1");
        assert_eq!(canonicalize("already_ok_1"), "already_ok_1");
    }

    #[test]
    fn test_canonical_id() {
        assert_eq!(
            canonical_id(&["server", "8.8.8.8", "record", "A"]),
            "server_8_8_8_8_record_A"
        );
    }

    #[test]
    fn test_instantiate_substitutes() {
        let chart = template().instantiate(&[("server", "8.8.8.8"), ("rtype", "A")]);

        assert_eq!(chart.id, "server_8_8_8_8_record_A_query_status");
        assert_eq!(chart.dims[0].id, "8.8.8.8_A_query_status_success");
        assert_eq!(chart.dims[0].name, "success");
        assert_eq!(chart.labels[0].value, "8.8.8.8");
    }

    #[test]
    fn test_template_not_mutated() {
        let tmpl = template();
        let before = tmpl.chart().clone();

        let mut chart = tmpl.instantiate(&[("server", "1.1.1.1"), ("rtype", "AAAA")]);
        chart.dims.push(Dim::new("extra"));
        chart.title.push_str(" changed");

        assert_eq!(tmpl.chart(), &before);
        assert_eq!(tmpl.chart().id, "server_{server}_record_{rtype}_query_status");
    }
}
