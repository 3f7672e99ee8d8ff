use chrono::{DateTime, Utc};
use serde::Serialize;

use super::lifecycle::TransitionKind;

/// A rendered transactional email ready for a [`super::mailer::Mailer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub template: &'static str,
}

/// Values substituted into every template.
#[derive(Debug, Clone)]
pub struct EmailContext<'a> {
    pub event_name: &'a str,
    pub first_name: &'a str,
}

/// Subject and bodies for a notice, before the recipient is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTemplate {
    pub template: &'static str,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

impl RenderedTemplate {
    pub fn addressed_to(self, to: impl Into<String>) -> EmailMessage {
        EmailMessage {
            to: to.into(),
            subject: self.subject,
            text_body: self.text_body,
            html_body: self.html_body,
            template: self.template,
        }
    }
}

/// Render the notice for a transition, or `None` for transitions that send nothing.
pub fn render(kind: &TransitionKind, context: &EmailContext<'_>) -> Option<RenderedTemplate> {
    match kind {
        TransitionKind::Submitted => Some(submitted(context)),
        TransitionKind::Approved {
            confirmation_deadline,
        } => Some(approved(context, *confirmation_deadline)),
        TransitionKind::Rejected => Some(rejected(context)),
        TransitionKind::Confirmed => Some(confirmed(context)),
        TransitionKind::Declined | TransitionKind::CheckedIn { .. } => None,
    }
}

pub fn submitted(context: &EmailContext<'_>) -> RenderedTemplate {
    let EmailContext {
        event_name,
        first_name,
    } = context;
    let paragraphs = [
        format!("Hi {first_name},"),
        format!("Thanks for applying to {event_name}! We received your application and will let you know once it has been reviewed."),
        format!("The {event_name} Team"),
    ];
    build(
        "submitted",
        format!("We received your {event_name} application"),
        &paragraphs,
    )
}

pub fn approved(context: &EmailContext<'_>, confirmation_deadline: DateTime<Utc>) -> RenderedTemplate {
    let EmailContext {
        event_name,
        first_name,
    } = context;
    let deadline = confirmation_deadline.format("%B %-d, %Y at %-I:%M %p UTC");
    let paragraphs = [
        format!("Hi {first_name},"),
        format!("Congratulations, your application to {event_name} has been approved!"),
        format!("Please confirm your spot by {deadline}. Spots that are not confirmed by the deadline may be given to other applicants."),
        format!("The {event_name} Team"),
    ];
    build(
        "approved",
        format!("Your {event_name} application has been approved!"),
        &paragraphs,
    )
}

pub fn rejected(context: &EmailContext<'_>) -> RenderedTemplate {
    let EmailContext {
        event_name,
        first_name,
    } = context;
    let paragraphs = [
        format!("Hi {first_name},"),
        format!("Thank you for your interest in {event_name}. Unfortunately we are unable to offer you a spot this year."),
        format!("The {event_name} Team"),
    ];
    build(
        "rejected",
        format!("Regarding your {event_name} application"),
        &paragraphs,
    )
}

pub fn confirmed(context: &EmailContext<'_>) -> RenderedTemplate {
    let EmailContext {
        event_name,
        first_name,
    } = context;
    let paragraphs = [
        format!("Hi {first_name},"),
        format!("Your spot at {event_name} is confirmed. Link your Discord account from your status page to check in at the event."),
        format!("The {event_name} Team"),
    ];
    build(
        "confirmed",
        format!("You're confirmed for {event_name}!"),
        &paragraphs,
    )
}

fn build(template: &'static str, subject: String, paragraphs: &[String]) -> RenderedTemplate {
    let text_body = paragraphs.join("\n\n");
    let html_body = paragraphs
        .iter()
        .map(|paragraph| format!("<p>{}</p>", escape_html(paragraph)))
        .collect::<Vec<_>>()
        .join("\n");
    RenderedTemplate {
        template,
        subject,
        text_body,
        html_body,
    }
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
