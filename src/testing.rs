//! Testing utilities and assertion helpers.
//!
//! Assertion functions over [`LocalMailer`] for verifying what the
//! scheduler actually sent.
//!
//! # Example
//!
//! ```rust,ignore
//! use herald::providers::LocalMailer;
//! use herald::testing::*;
//!
//! #[tokio::test]
//! async fn test_delivery_flow() {
//!     let mailer = LocalMailer::new();
//!
//!     // ... run the scheduler against the mailer ...
//!
//!     assert_email_sent(&mailer);
//!     assert_email_to(&mailer, "soc@example.com");
//!     assert_email_subject_contains(&mailer, "THREAT");
//!     assert_email_html_matches(&mailer, r"<h1>.*</h1>");
//! }
//! ```

use regex::Regex;

use crate::providers::LocalMailer;
use crate::providers::local::CapturedEmail;

/// Format a list of emails for error messages.
fn format_email_summary(emails: &[CapturedEmail]) -> String {
    if emails.is_empty() {
        return "  (no emails sent)".to_string();
    }

    emails
        .iter()
        .enumerate()
        .map(|(i, captured)| {
            let e = &captured.email;
            let to = e
                .to
                .iter()
                .map(|a| a.email.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            format!("  {}. To: [{}], Subject: \"{}\"", i + 1, to, e.subject)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Assert that at least one email was sent.
///
/// # Panics
///
/// Panics if no emails were sent.
pub fn assert_email_sent(mailer: &LocalMailer) {
    assert!(
        mailer.has_emails(),
        "Expected at least one email to be sent, but none were sent"
    );
}

/// Assert that no emails were sent.
pub fn assert_no_emails_sent(mailer: &LocalMailer) {
    let emails = mailer.emails();
    assert!(
        emails.is_empty(),
        "Expected no emails to be sent, but {} were sent.\n\nEmails sent:\n{}",
        emails.len(),
        format_email_summary(&emails)
    );
}

/// Assert that exactly `count` emails were sent.
pub fn assert_email_count(mailer: &LocalMailer, count: usize) {
    let emails = mailer.emails();
    assert!(
        emails.len() == count,
        "Expected exactly {} email(s) to be sent, but {} were sent.\n\nEmails sent:\n{}",
        count,
        emails.len(),
        format_email_summary(&emails)
    );
}

/// Assert that some email was sent to the given address.
pub fn assert_email_to(mailer: &LocalMailer, address: &str) {
    let emails = mailer.emails();
    let found = emails
        .iter()
        .any(|e| e.email.all_recipients().any(|a| a.email == address));
    assert!(
        found,
        "Expected an email to {}, but none matched.\n\nEmails sent:\n{}",
        address,
        format_email_summary(&emails)
    );
}

/// Assert that no email was sent to the given address.
pub fn refute_email_to(mailer: &LocalMailer, address: &str) {
    let emails = mailer.emails();
    let found = emails
        .iter()
        .any(|e| e.email.all_recipients().any(|a| a.email == address));
    assert!(
        !found,
        "Expected no email to {}, but at least one matched.\n\nEmails sent:\n{}",
        address,
        format_email_summary(&emails)
    );
}

/// Assert that some email's subject contains the given substring.
pub fn assert_email_subject_contains(mailer: &LocalMailer, substring: &str) {
    let emails = mailer.emails();
    let found = emails.iter().any(|e| e.email.subject.contains(substring));
    assert!(
        found,
        "Expected an email whose subject contains \"{}\".\n\nEmails sent:\n{}",
        substring,
        format_email_summary(&emails)
    );
}

/// Assert that some email's subject matches the given regex.
pub fn assert_email_subject_matches(mailer: &LocalMailer, pattern: &str) {
    let re = Regex::new(pattern).expect("invalid regex pattern");
    let emails = mailer.emails();
    let found = emails.iter().any(|e| re.is_match(&e.email.subject));
    assert!(
        found,
        "Expected an email whose subject matches /{}/.\n\nEmails sent:\n{}",
        pattern,
        format_email_summary(&emails)
    );
}

/// Assert that some email's HTML body contains the given substring.
pub fn assert_email_html_contains(mailer: &LocalMailer, substring: &str) {
    let emails = mailer.emails();
    let found = emails.iter().any(|e| {
        e.email
            .html_body
            .as_deref()
            .is_some_and(|html| html.contains(substring))
    });
    assert!(
        found,
        "Expected an email whose HTML body contains \"{}\".\n\nEmails sent:\n{}",
        substring,
        format_email_summary(&emails)
    );
}

/// Assert that some email's HTML body matches the given regex.
pub fn assert_email_html_matches(mailer: &LocalMailer, pattern: &str) {
    let re = Regex::new(pattern).expect("invalid regex pattern");
    let emails = mailer.emails();
    let found = emails.iter().any(|e| {
        e.email
            .html_body
            .as_deref()
            .is_some_and(|html| re.is_match(html))
    });
    assert!(
        found,
        "Expected an email whose HTML body matches /{}/.\n\nEmails sent:\n{}",
        pattern,
        format_email_summary(&emails)
    );
}
