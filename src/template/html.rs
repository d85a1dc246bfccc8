//! Minimal slot renderer for the advisory skeleton.
//!
//! The skeleton is a static HTML document with `{{name}}` slots. Loops and
//! conditionals never appear in the skeleton; they are resolved in typed
//! code (`data.rs`) that renders each named block to a finished fragment.
//! Filling is a single left-to-right pass, so there is no nested-structure
//! matching and no way for a slot to survive into the output unnoticed.

use std::collections::BTreeMap;

use crate::error::HeraldError;

/// Named, pre-rendered HTML fragments keyed by slot name.
#[derive(Debug, Default)]
pub(crate) struct Fragments {
    map: BTreeMap<&'static str, String>,
}

impl Fragments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a slot to a rendered fragment. An empty fragment is how a
    /// conditional section gets omitted.
    pub fn set(&mut self, slot: &'static str, fragment: impl Into<String>) {
        self.map.insert(slot, fragment.into());
    }

    fn get(&self, slot: &str) -> Option<&str> {
        self.map.get(slot).map(String::as_str)
    }
}

/// Substitute every `{{name}}` slot in `skeleton` with its bound fragment.
///
/// Unknown slots and unterminated markers are errors, never emitted: the
/// output of a successful fill contains no placeholder syntax.
pub(crate) fn fill(skeleton: &str, fragments: &Fragments) -> Result<String, HeraldError> {
    let mut out = String::with_capacity(skeleton.len());
    let mut rest = skeleton;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            HeraldError::Template("unterminated slot marker in skeleton".into())
        })?;
        let name = after[..end].trim();
        let fragment = fragments.get(name).ok_or_else(|| {
            HeraldError::Template(format!("no fragment bound for slot '{}'", name))
        })?;
        out.push_str(fragment);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Escape text for interpolation into HTML content or attribute values.
pub(crate) fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render a `<ul>` of escaped items.
pub(crate) fn bullet_list(items: &[String]) -> String {
    let mut out = String::from("<ul style=\"margin: 0 0 0 20px; padding: 0; line-height: 1.7;\">\n");
    for item in items {
        out.push_str("<li style=\"margin-bottom: 8px;\">");
        out.push_str(&escape(item));
        out.push_str("</li>\n");
    }
    out.push_str("</ul>");
    out
}

/// Render table rows with alternating backgrounds, one `<td>` per cell.
pub(crate) fn table_rows(rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    for (index, row) in rows.iter().enumerate() {
        let bg = if index % 2 == 0 { "#ffffff" } else { "#f7fafd" };
        out.push_str(&format!("<tr style=\"background-color: {};\">\n", bg));
        for cell in row {
            out.push_str(
                "<td style=\"padding: 10px; border-bottom: 1px solid #d7dee8; font-size: 14px;\">",
            );
            out.push_str(&escape(cell));
            out.push_str("</td>\n");
        }
        out.push_str("</tr>\n");
    }
    out
}

/// Wrap a pre-rendered body in a titled section. Callers omit the section
/// entirely (empty fragment) when there is nothing to show.
pub(crate) fn section(title: &str, body: &str) -> String {
    format!(
        "<div style=\"margin: 25px 0;\">\n\
         <h3 style=\"color: #0b2233; margin: 0 0 10px 0; padding-bottom: 8px; border-bottom: 2px solid #e5e7eb;\">{}</h3>\n\
         {}\n\
         </div>",
        escape(title),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_substitutes_all_slots() {
        let mut fragments = Fragments::new();
        fragments.set("title", "Advisory");
        fragments.set("body", "<p>hello</p>");

        let out = fill("<h1>{{title}}</h1>{{ body }}", &fragments).unwrap();
        assert_eq!(out, "<h1>Advisory</h1><p>hello</p>");
    }

    #[test]
    fn fill_errors_on_unbound_slot() {
        let fragments = Fragments::new();
        let err = fill("{{missing}}", &fragments).unwrap_err();
        assert!(matches!(err, HeraldError::Template(_)));
    }

    #[test]
    fn fill_errors_on_unterminated_marker() {
        let fragments = Fragments::new();
        assert!(fill("{{oops", &fragments).is_err());
    }

    #[test]
    fn fill_leaves_no_placeholder_syntax() {
        let mut fragments = Fragments::new();
        fragments.set("a", "x");
        let out = fill("{{a}} and {{a}}", &fragments).unwrap();
        assert!(!out.contains("{{"));
    }

    #[test]
    fn escape_neutralizes_markup() {
        assert_eq!(
            escape(r#"<script>alert("x")</script>"#),
            "&lt;script&gt;alert(&quot;x&quot;)&lt;/script&gt;"
        );
    }

    #[test]
    fn bullet_list_escapes_items() {
        let html = bullet_list(&["a<b".to_string()]);
        assert!(html.contains("a&lt;b"));
        assert!(!html.contains("a<b"));
    }

    #[test]
    fn table_rows_alternate_backgrounds() {
        let rows = vec![
            vec!["a".to_string()],
            vec!["b".to_string()],
        ];
        let html = table_rows(&rows);
        assert!(html.contains("#ffffff"));
        assert!(html.contains("#f7fafd"));
    }
}
