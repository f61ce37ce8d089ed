//! Text rendering for admin prompts, acknowledgements and publication.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::approval::{ApprovalRequest, ApprovalState, WorkflowStats};
use crate::error::DecisionError;

/// Telegram caps a message at 4096 chars; leave room for the prompt frame.
const EXCERPT_CHARS: usize = 3000;
/// Whole published post, frame included.
const MAX_POST_CHARS: usize = 4000;

fn local(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string()
}

fn excerpt(text: &str) -> String {
    truncate(text, EXCERPT_CHARS)
}

/// First `max` chars of `text`, plus `…` when something was cut.
fn truncate(text: &str, max: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

/// Prompt sent to every authorized admin for a new pending request.
pub fn approval_prompt(request: &ApprovalRequest, tz: Tz) -> String {
    let c = &request.classification;
    let category = c
        .category
        .map(|cat| format!("{} {}", cat.emoji(), cat.label()))
        .unwrap_or_else(|| "❔ Uncategorized".to_string());
    let evidence = c.evidence().join(", ");

    format!(
        "🔔 News awaiting approval [{id}]\n\
         📡 Source: {source}\n\
         {category}\n\
         📊 Score: {score:.1}\n\
         🔑 Matches: {evidence}\n\
         ⏳ Expires: {deadline} ({tz})\n\
         \n\
         {text}\n\
         \n\
         ✅ /approve_{id}\n\
         🚫 /reject_{id}",
        id = request.id,
        source = request.channel_title,
        score = c.score,
        deadline = local(request.deadline, tz),
        tz = tz.name(),
        text = excerpt(&request.message_text),
    )
}

fn is_link_or_tag(token: &str) -> bool {
    let lower = token.to_lowercase();
    token.starts_with('@')
        || token.starts_with('#')
        || lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with("www.")
        || lower.starts_with("t.me/")
        || lower.starts_with("telegram.me/")
}

/// Strip Telegram handles, links and hashtags; collapse blank lines.
pub fn clean_text(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let kept: Vec<&str> = line
            .split_whitespace()
            .filter(|token| !is_link_or_tag(token))
            .collect();
        if kept.is_empty() {
            if lines.last().is_some_and(|l| !l.is_empty()) {
                lines.push(String::new());
            }
            continue;
        }
        lines.push(kept.join(" "));
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Post published to the target channel once a request is approved.
///
/// The body is cut so that the whole post stays within `MAX_POST_CHARS`.
pub fn publication_text(request: &ApprovalRequest, attribution: &str, tz: Tz) -> String {
    let mut out = String::new();
    if let Some(category) = request.classification.category {
        out.push_str(category.emoji());
        out.push(' ');
    }

    let mut footer = String::from("\n\n");
    if !attribution.trim().is_empty() {
        footer.push_str(attribution.trim());
        footer.push('\n');
    }
    let published_at = request.decided_at.unwrap_or(request.created_at);
    footer.push_str(&format!("🕐 {}", local(published_at, tz)));

    // One char is reserved for the ellipsis.
    let budget = MAX_POST_CHARS
        .saturating_sub(out.chars().count() + footer.chars().count())
        .saturating_sub(1);
    out.push_str(&truncate(&clean_text(&request.message_text), budget));
    out.push_str(&footer);
    out
}

/// Reply to the admin who sent a decision command.
pub fn decision_ack(result: &Result<ApprovalRequest, DecisionError>) -> String {
    match result {
        Ok(r) => match r.state {
            ApprovalState::Approved => format!("✅ [{}] approved and queued for publication.", r.id),
            ApprovalState::Rejected => format!("🚫 [{}] rejected.", r.id),
            state => format!("{} [{}] is {state}.", state.emoji(), r.id),
        },
        Err(DecisionError::Late { request_id, state }) => {
            let emoji = state.emoji();
            format!("{emoji} [{request_id}] was already {state}; your decision was ignored.")
        }
        Err(DecisionError::Unauthorized { .. }) => {
            "⛔ You are not authorized to review news.".to_string()
        }
        Err(DecisionError::UnknownRequest(id)) => format!("❔ No request with id [{id}]."),
    }
}

/// Notice sent to admins when nobody answered before the deadline.
pub fn expiry_notice(request: &ApprovalRequest) -> String {
    format!(
        "⌛ [{}] from {} expired without a decision.",
        request.id, request.channel_title
    )
}

pub fn pending_list(pending: &[ApprovalRequest], tz: Tz) -> String {
    if pending.is_empty() {
        return "📭 No news awaiting approval.".to_string();
    }
    let mut out = format!("⏳ {} item(s) awaiting approval:\n", pending.len());
    for r in pending {
        let preview: String = r.message_text.chars().take(80).collect();
        out.push_str(&format!(
            "\n[{}] {} · score {:.1} · expires {}\n{}\n/approve_{} · /reject_{}\n",
            r.id,
            r.channel_title,
            r.classification.score,
            local(r.deadline, tz),
            preview.replace('\n', " "),
            r.id,
            r.id,
        ));
    }
    out
}

pub fn stats_report(stats: &WorkflowStats) -> String {
    format!("📊 Approval statistics\n\n{stats}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{ClassificationResult, TopicCategory, Verdict};

    fn approved(text: &str) -> ApprovalRequest {
        let at = DateTime::from_timestamp(1_750_060_000, 0).unwrap();
        ApprovalRequest {
            id: "ab12cd34ef".into(),
            message_key: "-100:1".into(),
            channel_title: "Frontline".into(),
            message_text: text.into(),
            classification: ClassificationResult {
                message_id: 1,
                score: 6.0,
                matched_terms: Vec::new(),
                verdict: Verdict::Relevant,
                category: Some(TopicCategory::War),
            },
            state: ApprovalState::Approved,
            created_at: at,
            deadline: at,
            decided_at: Some(at),
            decided_by: Some(42),
            decision_reason: None,
        }
    }

    #[test]
    fn clean_text_strips_handles_links_and_tags() {
        let raw = "Breaking: airstrike near the port @frontline_news\n\
                   \n\
                   \n\
                   More at https://example.com/a t.me/frontline #war #breaking\n\
                   Stay safe";
        assert_eq!(
            clean_text(raw),
            "Breaking: airstrike near the port\n\nMore at\nStay safe"
        );
    }

    #[test]
    fn clean_text_keeps_persian() {
        assert_eq!(clean_text("حمله هوایی به بندر @channel"), "حمله هوایی به بندر");
    }

    #[test]
    fn excerpt_truncates_long_text() {
        let long = "x".repeat(EXCERPT_CHARS + 10);
        let e = excerpt(&long);
        assert_eq!(e.chars().count(), EXCERPT_CHARS + 1);
        assert!(e.ends_with('…'));
        assert_eq!(excerpt("short"), "short");
    }

    #[test]
    fn publication_keeps_short_posts_whole() {
        let post = publication_text(
            &approved("Airstrike near the port @frontline"),
            "📡 @news_out",
            chrono_tz::Asia::Tehran,
        );
        assert!(post.starts_with(TopicCategory::War.emoji()));
        assert!(post.contains("Airstrike near the port\n\n📡 @news_out\n🕐 "));
        assert!(!post.contains('…'));
    }

    #[test]
    fn publication_of_long_post_fits_telegram_limit() {
        let body = "ب".repeat(5000);
        let post = publication_text(&approved(&body), "📡 @news_out", chrono_tz::Asia::Tehran);
        assert_eq!(post.chars().count(), MAX_POST_CHARS);
        assert!(post.contains("ب…\n\n📡 @news_out\n🕐 "));
        assert!(post.ends_with(&local(approved("").created_at, chrono_tz::Asia::Tehran)));
    }

    #[test]
    fn unauthorized_ack_does_not_leak_request_state() {
        let ack = decision_ack(&Err(DecisionError::Unauthorized {
            request_id: "abc".into(),
            admin_id: 7,
        }));
        assert!(!ack.contains("abc"));
    }
}
