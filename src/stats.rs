use crate::db::models::ChatStatRow;
use crate::i18n::{tr, Lang, Msg};
use crate::styles::transform::escape_html;

pub const LEADERBOARD_SIZE: i64 = 10;
const BAR_WIDTH: usize = 20;

fn bar(count: i64, max: i64) -> String {
    if max <= 0 || count <= 0 {
        return String::new();
    }
    let filled = ((count as f64 / max as f64) * BAR_WIDTH as f64).round() as usize;
    "█".repeat(filled.clamp(1, BAR_WIDTH))
}

/// HTML leaderboard with a proportional bar per member.
pub fn render_leaderboard(rows: &[ChatStatRow], lang: Lang) -> String {
    if rows.is_empty() {
        return tr(lang, Msg::NoStats).to_string();
    }

    let max = rows.iter().map(|row| row.message_count).max().unwrap_or(0);
    let mut lines = vec![format!("<b>{}</b>", tr(lang, Msg::StatsHeader))];
    for (place, row) in rows.iter().enumerate() {
        let name = row
            .display_name
            .clone()
            .unwrap_or_else(|| row.user_id.to_string());
        lines.push(format!(
            "{}. {} — {}\n<code>{}</code>",
            place + 1,
            escape_html(&name),
            row.message_count,
            bar(row.message_count, max)
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(user_id: i64, name: &str, count: i64) -> ChatStatRow {
        ChatStatRow {
            chat_id: -1,
            user_id,
            display_name: Some(name.to_string()),
            message_count: count,
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn bars_scale_to_the_leader() {
        assert_eq!(bar(10, 10).chars().count(), BAR_WIDTH);
        assert_eq!(bar(5, 10).chars().count(), BAR_WIDTH / 2);
        assert_eq!(bar(1, 1000).chars().count(), 1);
        assert_eq!(bar(0, 10), "");
    }

    #[test]
    fn leaderboard_lists_members_in_order_and_escapes_names() {
        let text = render_leaderboard(&[row(1, "<ann>", 8), row(2, "bob", 4)], Lang::En);
        assert!(text.starts_with("<b>📊 Most active members:</b>"));
        assert!(text.contains("1. &lt;ann&gt; — 8"));
        assert!(text.contains("2. bob — 4"));
    }

    #[test]
    fn empty_leaderboard_says_so() {
        assert_eq!(render_leaderboard(&[], Lang::En), "No statistics yet.");
    }
}
