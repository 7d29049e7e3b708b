//! HTML fragments for the chat view. Every dynamic string is escaped.

use crate::types::{AnalysisSummary, ChatMessage, MessageBody};

pub const NO_RED_FLAGS_TEXT: &str = "No red-flag clauses were found.";

pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn summary_html(summary: &AnalysisSummary) -> String {
    let mut html = format!(
        r#"<div class="analysis"><p class="analysis-title">Red-flag clauses in <strong>{}</strong></p>"#,
        html_escape(&summary.document)
    );
    if summary.red_flags.is_empty() {
        html.push_str(&format!("<p>{NO_RED_FLAGS_TEXT}</p>"));
    } else {
        html.push_str("<ol class=\"red-flags\">");
        for clause in &summary.red_flags {
            html.push_str(&format!(
                r#"<li class="risk-{level}"><strong>{label}</strong> <span class="risk">{pct}</span><blockquote>{excerpt}</blockquote></li>"#,
                level = clause.risk_level.to_string().to_ascii_lowercase(),
                label = html_escape(&clause.label),
                pct = html_escape(&clause.risk_percent),
                excerpt = html_escape(&clause.excerpt),
            ));
        }
        html.push_str("</ol>");
    }
    html.push_str("</div>");
    html
}

pub fn message_html(message: &ChatMessage) -> String {
    match &message.body {
        MessageBody::Text { text } => format!("<p>{}</p>", html_escape(text)),
        MessageBody::Progress { phrase } => {
            format!(r#"<p class="thinking">{}</p>"#, html_escape(phrase))
        },
        MessageBody::Analysis { summary } => summary_html(summary),
        MessageBody::Error { text } => format!(r#"<p class="error">{}</p>"#, html_escape(text)),
    }
}
