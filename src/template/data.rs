//! Typed template data resolved from an advisory view.
//!
//! Advisory records arrive with generations of renamed and missing fields.
//! All fallback policy lives here, in one place: scalar chains go through
//! [`first_present`], collections get their documented defaults, and
//! indicator values are sanitized before they can reach markup. By the time
//! a `TemplateData` exists, rendering is pure formatting.

use crate::advisory::{AdvisoryView, IndicatorKind};

/// Resolve the first present, non-empty field of an ordered fallback chain.
///
/// "Present" means `Some` with non-whitespace content after trimming. This
/// is the single unit implementing every `a <- b <- default` chain in the
/// renderer.
pub(crate) fn first_present<'a>(fields: &[&'a Option<String>], default: &'a str) -> &'a str {
    fields
        .iter()
        .filter_map(|field| field.as_deref())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or(default)
}

/// Strip characters that would break out of an HTML attribute or element
/// context: `<`, `>`, `"`, `;`. Indicator values are attacker-adjacent data
/// (domains, hashes seen in the wild) and get this treatment on top of the
/// regular escaping.
pub(crate) fn sanitize_indicator(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | ';'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Indicator values grouped for display, sanitized.
#[derive(Debug, Default)]
pub(crate) struct IndicatorGroups {
    pub ipv4: Vec<String>,
    pub domains: Vec<String>,
    pub md5: Vec<String>,
    pub sha1: Vec<String>,
    pub sha256: Vec<String>,
}

impl IndicatorGroups {
    pub fn is_empty(&self) -> bool {
        self.ipv4.is_empty()
            && self.domains.is_empty()
            && self.md5.is_empty()
            && self.sha1.is_empty()
            && self.sha256.is_empty()
    }
}

/// Fully resolved inputs for the skeleton fill.
#[derive(Debug)]
pub(crate) struct TemplateData {
    pub title: String,
    /// Uppercased severity label (severity <- criticality <- "MEDIUM").
    pub severity: String,
    pub severity_color: &'static str,
    pub tlp: String,
    pub threat_type: String,
    pub vendor: String,
    pub advisory_id: String,
    pub category: Option<String>,
    pub author: Option<String>,
    pub published: Option<String>,
    pub cvss: Option<String>,
    pub summary_paragraphs: Vec<String>,
    pub cves: Vec<String>,
    pub affected_products: String,
    pub sectors: String,
    pub regions: String,
    pub mitre_rows: Vec<Vec<String>>,
    pub indicators: IndicatorGroups,
    pub recommendations: Vec<String>,
    pub patch_steps: Vec<String>,
    pub references: Vec<String>,
    pub tags: Vec<String>,
    pub operator_message: Option<String>,
}

fn severity_color(severity: &str) -> &'static str {
    match severity.to_ascii_lowercase().as_str() {
        "critical" => "#dc2626",
        "high" => "#ea580c",
        "medium" => "#d97706",
        "low" => "#16a34a",
        _ => "#0ea5e9",
    }
}

fn non_empty(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn joined_or(values: &[String], default: &str) -> String {
    let values = non_empty(values);
    if values.is_empty() {
        default.to_string()
    } else {
        values.join(", ")
    }
}

impl TemplateData {
    pub fn build(advisory: &AdvisoryView, operator_message: Option<&str>) -> Self {
        let title = first_present(&[&advisory.title, &advisory.display_title], "Advisory");
        let severity =
            first_present(&[&advisory.severity, &advisory.criticality], "MEDIUM").to_uppercase();

        // Summary: split into paragraphs on blank lines.
        let summary = first_present(
            &[
                &advisory.executive_summary,
                &advisory.summary,
                &advisory.description,
            ],
            "",
        );
        let mut summary_paragraphs: Vec<String> = summary
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        if summary_paragraphs.is_empty() {
            summary_paragraphs.push("No summary available".to_string());
        }

        // CVE identifiers, dropping "No CVE" marker strings some feeds emit.
        let cves: Vec<String> = non_empty(&advisory.cve_ids)
            .into_iter()
            .filter(|c| !c.contains("No CVE"))
            .collect();

        let mitre_rows: Vec<Vec<String>> = advisory
            .mitre_tactics
            .iter()
            .filter(|t| {
                t.tactic.is_some() || t.technique_id.is_some() || t.technique.is_some()
            })
            .map(|t| {
                vec![
                    first_present(&[&t.tactic], "N/A").to_string(),
                    first_present(&[&t.technique_id], "N/A").to_string(),
                    first_present(&[&t.technique], "N/A").to_string(),
                ]
            })
            .collect();

        let mut indicators = IndicatorGroups::default();
        for indicator in &advisory.indicators {
            let value = sanitize_indicator(&indicator.value);
            if value.is_empty() {
                continue;
            }
            match indicator.kind {
                IndicatorKind::Ipv4 => indicators.ipv4.push(value),
                IndicatorKind::Domain => indicators.domains.push(value),
                IndicatorKind::Md5 => indicators.md5.push(value),
                IndicatorKind::Sha1 => indicators.sha1.push(value),
                IndicatorKind::Sha256 => indicators.sha256.push(value),
                // Unlabelled hashes are classified by length.
                IndicatorKind::Hash => match value.len() {
                    32 => indicators.md5.push(value),
                    40 => indicators.sha1.push(value),
                    64 => indicators.sha256.push(value),
                    _ => {}
                },
            }
        }

        let mut recommendations = non_empty(&advisory.recommendations);
        if recommendations.is_empty() {
            recommendations = vec![
                "Apply all available security patches immediately".to_string(),
                "Monitor network traffic for suspicious activities".to_string(),
                "Implement defense-in-depth security controls".to_string(),
            ];
        }

        let operator_message = operator_message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);

        Self {
            title: title.to_string(),
            severity_color: severity_color(&severity),
            severity,
            tlp: first_present(&[&advisory.tlp], "CLEAR").to_uppercase(),
            threat_type: first_present(&[&advisory.threat_type], "Unknown").to_string(),
            vendor: first_present(&[&advisory.vendor], "Unknown").to_string(),
            advisory_id: advisory.id.clone(),
            category: advisory
                .category
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            author: advisory
                .author
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            published: advisory
                .published_at
                .map(|at| at.format("%B %d, %Y").to_string()),
            cvss: advisory.cvss_score.map(|score| format!("{}", score)),
            summary_paragraphs,
            cves,
            affected_products: joined_or(&advisory.affected_products, "Not specified"),
            sectors: joined_or(&advisory.sectors, "Not specified"),
            regions: joined_or(&advisory.regions, "Not specified"),
            mitre_rows,
            indicators,
            recommendations,
            patch_steps: non_empty(&advisory.patch_steps),
            references: non_empty(&advisory.references),
            tags: non_empty(&advisory.tags),
            operator_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::{Indicator, MitreTactic};

    #[test]
    fn first_present_walks_the_chain() {
        let a = None;
        let b = Some("  ".to_string());
        let c = Some("value".to_string());
        assert_eq!(first_present(&[&a, &b, &c], "default"), "value");
        assert_eq!(first_present(&[&a, &b], "default"), "default");
        assert_eq!(first_present(&[], "default"), "default");
    }

    #[test]
    fn sanitize_indicator_strips_breaking_chars() {
        assert_eq!(
            sanitize_indicator("evil.example\"><img src=x>"),
            "evil.exampleimg src=x"
        );
        assert_eq!(sanitize_indicator("1.2.3.4;"), "1.2.3.4");
        assert_eq!(sanitize_indicator("  plain.example  "), "plain.example");
    }

    #[test]
    fn empty_advisory_gets_all_defaults() {
        let data = TemplateData::build(&AdvisoryView::new("adv-1"), None);
        assert_eq!(data.title, "Advisory");
        assert_eq!(data.severity, "MEDIUM");
        assert_eq!(data.tlp, "CLEAR");
        assert_eq!(data.summary_paragraphs, vec!["No summary available"]);
        assert_eq!(data.affected_products, "Not specified");
        assert_eq!(data.sectors, "Not specified");
        assert!(data.cves.is_empty());
        assert_eq!(data.recommendations.len(), 3);
        assert!(data.indicators.is_empty());
    }

    #[test]
    fn severity_falls_back_to_criticality() {
        let mut advisory = AdvisoryView::new("adv-1");
        advisory.criticality = Some("high".into());
        let data = TemplateData::build(&advisory, None);
        assert_eq!(data.severity, "HIGH");
        assert_eq!(data.severity_color, "#ea580c");
    }

    #[test]
    fn title_prefers_title_over_display_title() {
        let mut advisory = AdvisoryView::new("adv-1");
        advisory.title = Some("New name".into());
        advisory.display_title = Some("Old name".into());
        assert_eq!(TemplateData::build(&advisory, None).title, "New name");

        advisory.title = None;
        assert_eq!(TemplateData::build(&advisory, None).title, "Old name");
    }

    #[test]
    fn unlabelled_hashes_classified_by_length() {
        let mut advisory = AdvisoryView::new("adv-1");
        advisory.indicators = vec![
            Indicator::new(IndicatorKind::Hash, "a".repeat(32)),
            Indicator::new(IndicatorKind::Hash, "b".repeat(40)),
            Indicator::new(IndicatorKind::Hash, "c".repeat(64)),
            Indicator::new(IndicatorKind::Hash, "short"),
        ];
        let data = TemplateData::build(&advisory, None);
        assert_eq!(data.indicators.md5.len(), 1);
        assert_eq!(data.indicators.sha1.len(), 1);
        assert_eq!(data.indicators.sha256.len(), 1);
    }

    #[test]
    fn no_cve_marker_strings_are_dropped() {
        let mut advisory = AdvisoryView::new("adv-1");
        advisory.cve_ids = vec!["No CVE identified".into(), "CVE-2024-1".into(), " ".into()];
        let data = TemplateData::build(&advisory, None);
        assert_eq!(data.cves, vec!["CVE-2024-1"]);
    }

    #[test]
    fn mitre_rows_skip_fully_empty_entries() {
        let mut advisory = AdvisoryView::new("adv-1");
        advisory.mitre_tactics = vec![
            MitreTactic::default(),
            MitreTactic {
                tactic: Some("Initial Access".into()),
                technique_id: Some("T1566".into()),
                technique: None,
            },
        ];
        let data = TemplateData::build(&advisory, None);
        assert_eq!(data.mitre_rows.len(), 1);
        assert_eq!(data.mitre_rows[0], vec!["Initial Access", "T1566", "N/A"]);
    }

    #[test]
    fn blank_operator_message_is_dropped() {
        let data = TemplateData::build(&AdvisoryView::new("adv-1"), Some("   "));
        assert!(data.operator_message.is_none());
    }
}
