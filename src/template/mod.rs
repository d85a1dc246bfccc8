//! Advisory email rendering.
//!
//! Rendering is a pure function of (advisory view, operator message,
//! tracking handles) to an HTML document. It is total: any advisory, however
//! sparse, produces a complete document, and any internal failure degrades
//! to [`fallback_document`] rather than aborting the send pipeline.
//!
//! The pipeline has three stages:
//! 1. [`data::TemplateData`] resolves every fallback chain and collection
//!    default, and sanitizes indicator values.
//! 2. Typed fragment builders render each named block (loops and
//!    conditionals live here, in plain Rust).
//! 3. [`html::fill`] substitutes the fragments into a static skeleton and
//!    guarantees no placeholder syntax survives.

mod data;
mod html;

use crate::advisory::AdvisoryView;
use crate::error::HeraldError;
use crate::tracking::TrackingHandles;

use data::TemplateData;
use html::{bullet_list, escape, section, table_rows, Fragments};

pub(crate) use data::first_present;

/// Static document skeleton. Named slots only - all control flow is
/// resolved before filling.
const SKELETON: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{{title}}</title>
</head>
<body style="margin: 0; padding: 0; background-color: #f4f4f4; font-family: Arial, Helvetica, sans-serif; color: #333;">
<div style="max-width: 680px; margin: 0 auto; background-color: #ffffff;">
<div style="background: #1e293b; color: #ffffff; padding: 28px 30px; text-align: center;">
<h1 style="margin: 0; font-size: 22px;">THREAT ADVISORY</h1>
<h2 style="margin: 12px 0 0 0; font-size: 18px; font-weight: 600;">{{title}}</h2>
<div style="margin-top: 14px;">
<span style="display: inline-block; background: {{severity_color}}; color: #ffffff; padding: 6px 14px; border-radius: 4px; font-size: 12px; font-weight: bold; letter-spacing: 1px;">{{severity}}</span>
<span style="display: inline-block; margin-left: 8px; background: #475569; color: #ffffff; padding: 6px 14px; border-radius: 4px; font-size: 12px;">TLP:{{tlp}}</span>
</div>
</div>
<div style="padding: 26px 30px;">
{{operator_message}}
<div style="background: #f8fafc; border: 1px solid #e2e8f0; border-radius: 6px; padding: 14px 16px; margin-bottom: 10px; font-size: 14px;">
{{meta}}
</div>
{{summary}}
{{cves}}
{{affected}}
{{mitre}}
{{indicators}}
{{recommendations}}
{{patch}}
{{references}}
{{tags}}
</div>
<div style="background: #f8fafc; border-top: 1px solid #e2e8f0; padding: 18px 30px; text-align: center; font-size: 12px; color: #64748b;">
<p style="margin: 0;">This is an automated security advisory. Please do not reply to this email.</p>
</div>
</div>
</body>
</html>
"#;

/// Render the advisory notification document.
///
/// `operator_message`, when present, is shown in a highlighted block ahead
/// of the advisory content. `tracking`, when present, contributes the open
/// beacon and rewrites outbound reference links, each gated by the
/// identifier's tracking options.
///
/// Errors indicate a defect (an unbound slot); callers on the send path use
/// [`render_or_fallback`], which never fails.
pub fn render(
    advisory: &AdvisoryView,
    operator_message: Option<&str>,
    tracking: Option<&TrackingHandles>,
) -> Result<String, HeraldError> {
    let data = TemplateData::build(advisory, operator_message);
    let fragments = build_fragments(&data, tracking);
    let document = html::fill(SKELETON, &fragments)?;

    Ok(match tracking.and_then(TrackingHandles::beacon_url) {
        Some(beacon) => inject_beacon(&document, &beacon),
        None => document,
    })
}

/// Render, degrading to the minimal fallback document on any error.
///
/// This is the send-path entry point: rendering problems are logged and
/// absorbed, never surfaced as delivery failures.
pub fn render_or_fallback(
    advisory: &AdvisoryView,
    operator_message: Option<&str>,
    tracking: Option<&TrackingHandles>,
) -> String {
    match render(advisory, operator_message, tracking) {
        Ok(document) => document,
        Err(error) => {
            tracing::warn!(advisory = %advisory.id, error = %error, "Advisory rendering degraded to fallback document");
            fallback_document(advisory, &error)
        }
    }
}

/// Minimal fixed document: title, summary, and the rendering error.
pub fn fallback_document(advisory: &AdvisoryView, error: &HeraldError) -> String {
    let title = first_present(&[&advisory.title, &advisory.display_title], "Advisory");
    let summary = first_present(
        &[
            &advisory.executive_summary,
            &advisory.summary,
            &advisory.description,
        ],
        "Advisory details could not be rendered.",
    );
    format!(
        "<html><body style=\"font-family: Arial, sans-serif;\">\n\
         <h1>{}</h1>\n\
         <p>{}</p>\n\
         <p style=\"color: #999; font-size: 12px;\">Rendering degraded: {}</p>\n\
         </body></html>",
        escape(title),
        escape(summary),
        escape(&error.to_string())
    )
}

/// Insert the open beacon immediately before the closing body tag, or
/// append it when no such marker exists.
fn inject_beacon(document: &str, beacon_url: &str) -> String {
    let beacon = format!(
        "<img src=\"{}\" width=\"1\" height=\"1\" style=\"display: none !important; max-height: 0; max-width: 0;\" alt=\"\" />",
        escape(beacon_url)
    );
    match document.rfind("</body>") {
        Some(index) => {
            let mut out = String::with_capacity(document.len() + beacon.len());
            out.push_str(&document[..index]);
            out.push_str(&beacon);
            out.push_str(&document[index..]);
            out
        }
        None => format!("{}{}", document, beacon),
    }
}

fn meta_row(label: &str, value: &str) -> String {
    format!(
        "<div style=\"margin: 4px 0;\"><strong>{}:</strong> {}</div>\n",
        escape(label),
        escape(value)
    )
}

fn chip_list(items: &[String], background: &str) -> String {
    let mut out = String::new();
    for item in items {
        out.push_str(&format!(
            "<span style=\"display: inline-block; background: {}; color: #ffffff; padding: 3px 8px; margin: 2px; border-radius: 3px; font-size: 12px;\">{}</span>\n",
            background,
            escape(item)
        ));
    }
    out
}

fn indicator_group(label: &str, values: &[String]) -> String {
    if values.is_empty() {
        return String::new();
    }
    let mut body = format!(
        "<div style=\"margin: 8px 0 4px 0; font-weight: bold; font-size: 13px;\">{}</div>\n<ul style=\"margin: 0 0 0 20px; padding: 0; font-family: monospace; font-size: 13px; color: #b91c1c;\">\n",
        escape(label)
    );
    for value in values {
        body.push_str("<li>");
        body.push_str(&escape(value));
        body.push_str("</li>\n");
    }
    body.push_str("</ul>\n");
    body
}

fn build_fragments(data: &TemplateData, tracking: Option<&TrackingHandles>) -> Fragments {
    let mut fragments = Fragments::new();

    fragments.set("title", escape(&data.title));
    fragments.set("severity", escape(&data.severity));
    fragments.set("severity_color", data.severity_color);
    fragments.set("tlp", escape(&data.tlp));

    // Operator message, ahead of everything else when present.
    fragments.set(
        "operator_message",
        match data.operator_message {
            Some(ref message) => format!(
                "<div style=\"background: #eff6ff; border-left: 4px solid #2563eb; padding: 14px 16px; margin-bottom: 20px;\">\n\
                 <strong>Message from Security Team:</strong>\n\
                 <p style=\"margin: 8px 0 0 0;\">{}</p>\n\
                 </div>",
                escape(message).replace('\n', "<br>")
            ),
            None => String::new(),
        },
    );

    // Metadata grid: fixed rows first, optional rows only when present.
    let mut meta = String::new();
    meta.push_str(&meta_row("Advisory ID", &data.advisory_id));
    meta.push_str(&meta_row("Threat Type", &data.threat_type));
    meta.push_str(&meta_row("Vendor", &data.vendor));
    meta.push_str(&meta_row(
        "CVSS",
        data.cvss.as_deref().unwrap_or("N/A"),
    ));
    if let Some(ref category) = data.category {
        meta.push_str(&meta_row("Category", category));
    }
    if let Some(ref author) = data.author {
        meta.push_str(&meta_row("Author", author));
    }
    if let Some(ref published) = data.published {
        meta.push_str(&meta_row("Published", published));
    }
    fragments.set("meta", meta);

    let mut summary = String::new();
    for paragraph in &data.summary_paragraphs {
        summary.push_str(&format!(
            "<p style=\"line-height: 1.6; margin: 12px 0;\">{}</p>\n",
            escape(paragraph)
        ));
    }
    fragments.set("summary", section("Executive Summary", &summary));

    fragments.set(
        "cves",
        section(
            "CVE Identifiers",
            &if data.cves.is_empty() {
                "<p style=\"color: #64748b; margin: 0;\">Not Available</p>".to_string()
            } else {
                chip_list(&data.cves, "#374151")
            },
        ),
    );

    let affected = format!(
        "{}{}{}",
        meta_row("Affected Products", &data.affected_products),
        meta_row("Target Sectors", &data.sectors),
        meta_row("Affected Regions", &data.regions),
    );
    fragments.set("affected", section("Scope", &affected));

    // MITRE table always renders; an empty mapping gets its fallback row.
    let mitre_body = if data.mitre_rows.is_empty() {
        "<tr><td colspan=\"3\" style=\"padding: 10px; border-bottom: 1px solid #d7dee8;\">No mapping available</td></tr>".to_string()
    } else {
        table_rows(&data.mitre_rows)
    };
    fragments.set(
        "mitre",
        section(
            "MITRE ATT&CK Mapping",
            &format!(
                "<table style=\"width: 100%; border-collapse: collapse;\">\n\
                 <tr style=\"background: #1e293b; color: #ffffff;\">\
                 <th style=\"padding: 8px; text-align: left; font-size: 13px;\">Tactic</th>\
                 <th style=\"padding: 8px; text-align: left; font-size: 13px;\">Technique ID</th>\
                 <th style=\"padding: 8px; text-align: left; font-size: 13px;\">Technique</th></tr>\n\
                 {}\n</table>",
                mitre_body
            ),
        ),
    );

    // The indicators panel is omitted entirely when no values exist.
    fragments.set(
        "indicators",
        if data.indicators.is_empty() {
            String::new()
        } else {
            let body = format!(
                "<div style=\"background: #fef2f2; border-left: 4px solid #dc2626; border-radius: 4px; padding: 12px;\">\n{}{}{}{}{}</div>",
                indicator_group("IPv4 Addresses", &data.indicators.ipv4),
                indicator_group("Domains", &data.indicators.domains),
                indicator_group("MD5 Hashes", &data.indicators.md5),
                indicator_group("SHA-1 Hashes", &data.indicators.sha1),
                indicator_group("SHA-256 Hashes", &data.indicators.sha256),
            );
            section("Indicators of Compromise", &body)
        },
    );

    fragments.set(
        "recommendations",
        section("Recommended Actions", &bullet_list(&data.recommendations)),
    );

    fragments.set(
        "patch",
        section(
            "Patch Details",
            &if data.patch_steps.is_empty() {
                "<p style=\"color: #64748b; margin: 0;\">No patch details provided.</p>".to_string()
            } else {
                bullet_list(&data.patch_steps)
            },
        ),
    );

    // References become tracked links when a rewriter is available.
    let references_body = if data.references.is_empty() {
        "<p style=\"color: #64748b; margin: 0;\">No references available</p>".to_string()
    } else {
        let mut out =
            String::from("<ul style=\"margin: 0 0 0 20px; padding: 0; line-height: 1.7;\">\n");
        for (index, reference) in data.references.iter().enumerate() {
            let href = match tracking {
                Some(handles) => handles.rewrite_link(reference, Some(&format!("ref_{}", index))),
                None => reference.clone(),
            };
            out.push_str(&format!(
                "<li style=\"margin-bottom: 8px;\"><a href=\"{}\" style=\"color: #2563eb; text-decoration: none;\">{}</a></li>\n",
                escape(&href),
                escape(reference)
            ));
        }
        out.push_str("</ul>");
        out
    };
    fragments.set("references", section("References", &references_body));

    fragments.set(
        "tags",
        if data.tags.is_empty() {
            String::new()
        } else {
            section("Tags", &chip_list(&data.tags, "#6b7280"))
        },
    );

    fragments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::{Indicator, IndicatorKind};

    #[test]
    fn beacon_inserted_before_closing_body() {
        let document = "<html><body><p>x</p></body></html>";
        let out = inject_beacon(document, "https://h.example/track/pixel?t=et_1");
        let beacon_at = out.find("track/pixel").unwrap();
        let body_close_at = out.rfind("</body>").unwrap();
        assert!(beacon_at < body_close_at);
    }

    #[test]
    fn beacon_appended_without_body_marker() {
        let out = inject_beacon("<p>bare fragment</p>", "https://h.example/t");
        assert!(out.ends_with("/>"));
        assert!(out.contains("h.example/t"));
    }

    #[test]
    fn render_is_total_for_empty_advisory() {
        let advisory = AdvisoryView::new("adv-1");
        let html = render(&advisory, None, None).unwrap();
        assert!(!html.is_empty());
        assert!(html.contains("Advisory"));
        assert!(html.contains("MEDIUM"));
        assert!(html.contains("Not Available"));
        assert!(html.contains("Not specified"));
        assert!(!html.contains("{{"));
        // No indicator values, so the panel is omitted entirely.
        assert!(!html.contains("Indicators of Compromise"));
    }

    #[test]
    fn indicators_panel_present_and_sanitized() {
        let mut advisory = AdvisoryView::new("adv-1");
        advisory.indicators = vec![Indicator::new(
            IndicatorKind::Domain,
            "bad\"><script>.example",
        )];
        let html = render(&advisory, None, None).unwrap();
        assert!(html.contains("Indicators of Compromise"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn operator_message_block_conditional() {
        let advisory = AdvisoryView::new("adv-1");
        let without = render(&advisory, None, None).unwrap();
        assert!(!without.contains("Message from Security Team"));

        let with = render(&advisory, Some("Patch now.\nThen verify."), None).unwrap();
        assert!(with.contains("Message from Security Team"));
        assert!(with.contains("Patch now.<br>Then verify."));
    }

    #[test]
    fn fallback_document_contains_title_summary_and_error() {
        let mut advisory = AdvisoryView::new("adv-1");
        advisory.title = Some("Broken advisory".into());
        advisory.summary = Some("Something bad".into());

        let error = HeraldError::Template("no fragment bound for slot 'x'".into());
        let html = fallback_document(&advisory, &error);
        assert!(html.contains("Broken advisory"));
        assert!(html.contains("Something bad"));
        assert!(html.contains("Rendering degraded"));
    }

    #[test]
    fn render_escapes_advisory_text() {
        let mut advisory = AdvisoryView::new("adv-1");
        advisory.title = Some("<img src=x onerror=alert(1)>".into());
        let html = render(&advisory, None, None).unwrap();
        assert!(!html.contains("<img src=x"));
        assert!(html.contains("&lt;img src=x"));
    }
}
