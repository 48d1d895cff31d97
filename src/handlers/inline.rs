use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{
    InlineQueryResult, InlineQueryResultArticle, InputMessageContent, InputMessageContentText,
    ParseMode,
};
use tracing::debug;

use crate::handlers::{text_or_sample, user_lang};
use crate::i18n::Lang;
use crate::state::AppState;
use crate::styles::{StyleKind, StyleRegistry};

const INLINE_STYLES: [&str; 4] = ["bold", "italic", "fire", "zalgo"];

pub fn inline_results(registry: &StyleRegistry, query: &str, lang: Lang) -> Vec<InlineQueryResult> {
    let text = text_or_sample(query, lang);
    INLINE_STYLES
        .iter()
        .filter_map(|name| registry.get(StyleKind::Style, name))
        .map(|style| {
            let content = InputMessageContent::Text(
                InputMessageContentText::new(style.render(&text)).parse_mode(ParseMode::Html),
            );
            InlineQueryResult::Article(
                InlineQueryResultArticle::new(style.name.to_string(), style.label(lang), content)
                    .description(text.clone()),
            )
        })
        .collect()
}

pub async fn inline_query_handler(bot: Bot, state: AppState, query: InlineQuery) -> Result<()> {
    let lang = user_lang(&state, Some(&query.from)).await;
    let results = inline_results(&state.registry, &query.query, lang);
    debug!("Inline query from {} -> {} results", query.from.id, results.len());
    bot.answer_inline_query(query.id.clone(), results)
        .cache_time(0)
        .await?;
    Ok(())
}
