pub mod transform;

use std::collections::HashSet;
use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::i18n::Lang;
use transform::escape_html;

pub type Transform = fn(&str) -> String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StyleKind {
    Style,
    Preset,
}

impl StyleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StyleKind::Style => "style",
            StyleKind::Preset => "preset",
        }
    }

    pub fn parse(value: &str) -> Option<StyleKind> {
        match value {
            "style" => Some(StyleKind::Style),
            "preset" => Some(StyleKind::Preset),
            _ => None,
        }
    }
}

impl fmt::Display for StyleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a transform's output becomes Telegram HTML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Render {
    /// Wraps HTML tags around already-escaped input. The transform must not
    /// touch the characters of its input.
    Markup,
    /// Rewrites characters of the raw input; the result is escaped.
    Plain,
    /// Like `Plain`, then wrapped in `<pre>`.
    Preformatted,
}

#[derive(Clone)]
pub struct Style {
    pub name: &'static str,
    label_ru: &'static str,
    label_en: &'static str,
    transform: Transform,
    mode: Render,
}

impl Style {
    fn new(
        name: &'static str,
        label_ru: &'static str,
        label_en: &'static str,
        transform: Transform,
        mode: Render,
    ) -> Self {
        Style {
            name,
            label_ru,
            label_en,
            transform,
            mode,
        }
    }

    pub fn label(&self, lang: Lang) -> &'static str {
        match lang {
            Lang::Ru => self.label_ru,
            Lang::En => self.label_en,
        }
    }

    /// Output ready to be sent with HTML parse mode.
    pub fn render(&self, text: &str) -> String {
        match self.mode {
            Render::Markup => (self.transform)(&escape_html(text)),
            Render::Plain => escape_html(&(self.transform)(text)),
            Render::Preformatted => format!("<pre>{}</pre>", escape_html(&(self.transform)(text))),
        }
    }
}

impl fmt::Debug for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Style")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerTarget {
    pub kind: StyleKind,
    pub name: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct Trigger {
    pub keyword: &'static str,
    pub target: TriggerTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoFormat {
    pub kind: StyleKind,
    pub name: &'static str,
    pub output: String,
    /// Set when a keyword, not a group template, selected the format.
    pub keyword: Option<&'static str>,
}

#[derive(Debug)]
pub struct StyleRegistry {
    styles: Vec<Style>,
    presets: Vec<Style>,
    triggers: Vec<Trigger>,
}

const fn trigger(keyword: &'static str, kind: StyleKind, name: &'static str) -> Trigger {
    Trigger {
        keyword,
        target: TriggerTarget { kind, name },
    }
}

impl StyleRegistry {
    pub fn builtin() -> Self {
        use transform::*;

        let styles = vec![
            Style::new("bold", "Жирный", "Bold", bold, Render::Markup),
            Style::new("italic", "Курсив", "Italic", italic, Render::Markup),
            Style::new("mono", "Моно", "Mono", mono, Render::Markup),
            Style::new("strike", "Зачёркнутый", "Strike", strike, Render::Markup),
            Style::new("link", "Ссылка", "Link", link, Render::Markup),
            Style::new("cursive", "Рукописный", "Cursive", cursive, Render::Plain),
            Style::new("box", "Рамка", "Box", boxed, Render::Plain),
            Style::new("monospace", "Моноширинный", "Monospace", monospace_flag, Render::Plain),
            Style::new("star", "Звезда", "Star", star, Render::Plain),
            Style::new("fire", "Огонь", "Fire", fire, Render::Plain),
            Style::new("circle", "Круг", "Circle", circle, Render::Plain),
            Style::new("important", "Важно", "Important", important_style, Render::Plain),
            Style::new("zalgo", "Залго", "Zalgo", zalgo, Render::Plain),
            Style::new("mirror", "Зеркало", "Mirror", mirror, Render::Plain),
            Style::new("ascii", "ASCII", "ASCII", ascii_banner, Render::Preformatted),
        ];

        let presets = vec![
            Style::new("header", "Заголовок", "Header", header, Render::Markup),
            Style::new("announcement", "Объявление", "Announcement", announcement, Render::Markup),
            Style::new("meme", "Мем", "Meme", meme, Render::Plain),
            Style::new("quote", "Цитата", "Quote", quote, Render::Markup),
            Style::new("alert", "Тревога", "Alert", alert, Render::Markup),
            Style::new("holiday", "Праздник", "Holiday", holiday, Render::Markup),
            Style::new("joke", "Шутка", "Joke", joke, Render::Markup),
            Style::new("important", "Важное", "Important", important_preset, Render::Markup),
        ];

        let triggers = vec![
            trigger("важно", StyleKind::Preset, "important"),
            trigger("срочно", StyleKind::Preset, "alert"),
            trigger("праздник", StyleKind::Preset, "holiday"),
            trigger("шутка", StyleKind::Preset, "joke"),
            trigger("огонь", StyleKind::Style, "fire"),
            trigger("important", StyleKind::Preset, "important"),
            trigger("urgent", StyleKind::Preset, "alert"),
            trigger("holiday", StyleKind::Preset, "holiday"),
            trigger("joke", StyleKind::Preset, "joke"),
            trigger("fire", StyleKind::Style, "fire"),
        ];

        StyleRegistry {
            styles,
            presets,
            triggers,
        }
    }

    fn table(&self, kind: StyleKind) -> &[Style] {
        match kind {
            StyleKind::Style => &self.styles,
            StyleKind::Preset => &self.presets,
        }
    }

    pub fn get(&self, kind: StyleKind, name: &str) -> Option<&Style> {
        self.table(kind).iter().find(|style| style.name == name)
    }

    pub fn all(&self, kind: StyleKind) -> &[Style] {
        self.table(kind)
    }

    pub fn apply(&self, kind: StyleKind, name: &str, text: &str) -> Option<String> {
        self.get(kind, name).map(|style| style.render(text))
    }

    pub fn random_style<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Style> {
        self.styles.choose(rng)
    }

    pub fn match_trigger(&self, text: &str) -> Option<&Trigger> {
        let lowered = text.to_lowercase();
        self.triggers
            .iter()
            .find(|trigger| lowered.contains(trigger.keyword))
    }

    /// Group template wins over keyword triggers. A trigger pointing at a
    /// style restricted for the sender produces nothing.
    pub fn resolve_auto_format(
        &self,
        group_template: Option<&str>,
        text: &str,
        restricted: &HashSet<String>,
    ) -> Option<AutoFormat> {
        if let Some(template) = group_template {
            if let Some(style) = self.get(StyleKind::Preset, template) {
                return Some(AutoFormat {
                    kind: StyleKind::Preset,
                    name: style.name,
                    output: style.render(text),
                    keyword: None,
                });
            }
        }

        let trigger = self.match_trigger(text)?;
        let target = trigger.target;
        if target.kind == StyleKind::Style && restricted.contains(target.name) {
            return None;
        }
        let style = self.get(target.kind, target.name)?;
        Some(AutoFormat {
            kind: target.kind,
            name: style.name,
            output: style.render(text),
            keyword: Some(trigger.keyword),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn no_restrictions() -> HashSet<String> {
        HashSet::new()
    }

    #[test]
    fn unknown_names_are_not_found() {
        let registry = StyleRegistry::builtin();
        assert!(registry.get(StyleKind::Style, "nope").is_none());
        assert!(registry.apply(StyleKind::Preset, "bold", "x").is_none());
        assert!(registry.get(StyleKind::Style, "alert").is_none());
    }

    #[test]
    fn every_trigger_points_at_a_known_entry() {
        let registry = StyleRegistry::builtin();
        for trigger in &registry.triggers {
            assert!(
                registry
                    .get(trigger.target.kind, trigger.target.name)
                    .is_some(),
                "dangling trigger {}",
                trigger.keyword
            );
        }
    }

    #[test]
    fn markup_styles_escape_user_input() {
        let registry = StyleRegistry::builtin();
        assert_eq!(
            registry.apply(StyleKind::Style, "bold", "<script>").as_deref(),
            Some("<b>&lt;script&gt;</b>")
        );
        assert_eq!(
            registry.apply(StyleKind::Style, "mirror", "<ab").as_deref(),
            Some("ba&lt;")
        );
    }

    #[test]
    fn uppercasing_formats_escape_after_transforming() {
        let registry = StyleRegistry::builtin();
        assert_eq!(
            registry.apply(StyleKind::Preset, "meme", "tom & jerry <3").as_deref(),
            Some("😂 TOM &amp; JERRY &lt;3 😂")
        );
        assert_eq!(
            registry.apply(StyleKind::Style, "ascii", "a&b").as_deref(),
            Some("<pre>╔═════╗\n║ A&amp;B ║\n╚═════╝</pre>")
        );
    }

    #[test]
    fn trigger_keyword_applies_bound_preset() {
        let registry = StyleRegistry::builtin();
        let result = registry
            .resolve_auto_format(None, "Это СРОЧНО всем", &no_restrictions())
            .expect("trigger should fire");
        assert_eq!(result.kind, StyleKind::Preset);
        assert_eq!(result.name, "alert");
        assert_eq!(result.keyword, Some("срочно"));
        assert_eq!(result.output, "🚨 <b>Это СРОЧНО всем</b> 🚨");
    }

    #[test]
    fn no_keyword_and_no_template_means_no_response() {
        let registry = StyleRegistry::builtin();
        assert!(registry
            .resolve_auto_format(None, "just chatting", &no_restrictions())
            .is_none());
    }

    #[test]
    fn group_template_takes_precedence_over_triggers() {
        let registry = StyleRegistry::builtin();
        let result = registry
            .resolve_auto_format(Some("quote"), "a joke here", &no_restrictions())
            .expect("template applies");
        assert_eq!(result.name, "quote");
        assert_eq!(result.keyword, None);
    }

    #[test]
    fn unknown_group_template_falls_back_to_triggers() {
        let registry = StyleRegistry::builtin();
        let result = registry
            .resolve_auto_format(Some("gone"), "holiday soon", &no_restrictions())
            .expect("trigger applies");
        assert_eq!(result.name, "holiday");
    }

    #[test]
    fn restricted_trigger_style_produces_nothing() {
        let registry = StyleRegistry::builtin();
        let mut restricted = HashSet::new();
        restricted.insert("fire".to_string());
        assert!(registry
            .resolve_auto_format(None, "fire in the hole", &restricted)
            .is_none());
    }

    #[test]
    fn random_style_comes_from_style_table() {
        let registry = StyleRegistry::builtin();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let style = registry.random_style(&mut rng).unwrap();
            assert!(registry.get(StyleKind::Style, style.name).is_some());
        }
    }
}
