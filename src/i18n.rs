use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    Ru,
    En,
}

impl Lang {
    /// Accepts stored codes ("ru") and IETF tags from Telegram ("en-US").
    pub fn parse(code: &str) -> Option<Lang> {
        let primary = code.split(['-', '_']).next()?.trim().to_lowercase();
        match primary.as_str() {
            "ru" | "uk" | "be" => Some(Lang::Ru),
            "en" => Some(Lang::En),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Lang::Ru => "ru",
            Lang::En => "en",
        }
    }

    pub fn resolve(stored: Option<&str>, telegram_code: Option<&str>, default: &str) -> Lang {
        stored
            .and_then(Lang::parse)
            .or_else(|| telegram_code.and_then(Lang::parse))
            .or_else(|| Lang::parse(default))
            .unwrap_or(Lang::Ru)
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Msg {
    Welcome,
    Help,
    AddToGroup,
    HelpButton,
    StyleMenu,
    PresetMenu,
    EnterText,
    StyleRestricted,
    UnknownStyle,
    History,
    NoHistory,
    AutoFormatted,
    SampleText,
    PdfExported,
    NothingToExport,
    ExportButton,
    EditButton,
    AdminMenu,
    AccessDenied,
    GroupsOnly,
    SetGroupTemplate,
    GroupTemplateSet,
    GroupTemplateCleared,
    BroadcastUsage,
    BroadcastSent,
    RecentUsers,
    NoUsers,
    StyleRestrictedSet,
    StyleRestrictionLifted,
    RestrictUsage,
    ChooseTone,
    AiError,
    LanguageSet,
    LanguageUsage,
    QuoteUnavailable,
    JokeUnavailable,
    TranslateUsage,
    TranslateFailed,
    RemindUsage,
    ReminderSet,
    ReminderFired,
    CaptchaPrompt,
    CaptchaMathPrompt,
    CaptchaTextPrompt,
    CaptchaButton,
    CaptchaPassed,
    CaptchaFailed,
    CaptchaNotYours,
    CaptchaExpired,
    CaptchaUsage,
    CaptchaState,
    CaptchaModeUsage,
    CaptchaModeSet,
    CaptchaTextSet,
    WelcomeSet,
    SpamDeleted,
    SpamFilterUsage,
    SpamFilterState,
    StatsHeader,
    NoStats,
    StatusHeader,
    StatusDatabase,
    StatusDbOk,
    StatusDbError,
    StatusScheduled,
    StatusCaptchas,
    StatusGigachat,
    StatusClassifier,
    StatusSpamPolicy,
    StatusDashboard,
    Configured,
    NotConfigured,
    Disabled,
    ActionFailed,
    On,
    Off,
    RateLimited,
}

pub fn tr(lang: Lang, msg: Msg) -> &'static str {
    match lang {
        Lang::Ru => ru(msg),
        Lang::En => en(msg),
    }
}

fn ru(msg: Msg) -> &'static str {
    match msg {
        Msg::Welcome => "Добро пожаловать в TextStyler Pro! Используйте /style для стилизации текста, /preset для шаблонов или попробуйте инлайн-режим с @{}",
        Msg::Help => "Команды: /style, /preset, /random, /history, /clear, /export_pdf, /gigachadify, /make_post, /rewrite, /smartreply, /quote, /joke, /translate, /remind, /stats, /language. Инлайн-режим: @{}",
        Msg::AddToGroup => "➕ Добавить в группу",
        Msg::HelpButton => "📘 Помощь",
        Msg::StyleMenu => "Выберите стиль:",
        Msg::PresetMenu => "Выберите шаблон:",
        Msg::EnterText => "Введите текст для стилизации в {}:",
        Msg::StyleRestricted => "Стиль '{}' ограничен для вас.",
        Msg::UnknownStyle => "Неизвестный стиль '{}'.",
        Msg::History => "Ваши стилизации:\n{}",
        Msg::NoHistory => "Пока нет стилизаций.",
        Msg::AutoFormatted => "Текст автоматически отформатирован по ключевому слову '{}'.",
        Msg::SampleText => "Пример текста",
        Msg::PdfExported => "Текст экспортирован в PDF!",
        Msg::NothingToExport => "Нет текста для экспорта.",
        Msg::ExportButton => "📄 Экспорт в PDF",
        Msg::EditButton => "✏️ Редактировать",
        Msg::AdminMenu => "Админ-панель:\n- /users: Список пользователей\n- /broadcast: Рассылка всем\n- /set_group_template: Установить шаблон группы\n- /clear_group_template: Сбросить шаблон группы\n- /restrict_style, /unrestrict_style: Ограничения стилей\n- /captcha, /captcha_mode, /captcha_text, /welcome: Капча\n- /spamfilter: Спам-фильтр\n- /status: Состояние бота",
        Msg::AccessDenied => "Доступ запрещён",
        Msg::GroupsOnly => "Эта команда доступна только в группах.",
        Msg::SetGroupTemplate => "Выберите шаблон для этой группы:",
        Msg::GroupTemplateSet => "Шаблон '{}' установлен для этой группы.",
        Msg::GroupTemplateCleared => "Шаблон группы сброшен.",
        Msg::BroadcastUsage => "Укажите сообщение для рассылки.",
        Msg::BroadcastSent => "Рассылка отправлена {} пользователям (ошибок: {}).",
        Msg::RecentUsers => "Недавние пользователи:",
        Msg::NoUsers => "Пользователи не найдены.",
        Msg::StyleRestrictedSet => "Стиль '{}' ограничен для пользователя {}.",
        Msg::StyleRestrictionLifted => "Ограничение стиля '{}' снято для пользователя {}.",
        Msg::RestrictUsage => "Использование: /{} <user_id> <стиль>",
        Msg::ChooseTone => "Выберите тон для умного ответа:",
        Msg::AiError => "Ошибка API GigaChat, используется запасной вариант: {}",
        Msg::LanguageSet => "Язык переключён на русский.",
        Msg::LanguageUsage => "Использование: /language ru|en",
        Msg::QuoteUnavailable => "«Лучший способ предсказать будущее — создать его.» — Питер Друкер",
        Msg::JokeUnavailable => "Шутки закончились, но вы держитесь! 😜",
        Msg::TranslateUsage => "Использование: /translate <язык> <текст>",
        Msg::TranslateFailed => "Не удалось перевести текст.",
        Msg::RemindUsage => "Использование: /remind <минуты> <текст>",
        Msg::ReminderSet => "Напомню через {} мин.",
        Msg::ReminderFired => "⏰ Напоминание: {}",
        Msg::CaptchaPrompt => "{}, подтвердите, что вы не бот.",
        Msg::CaptchaMathPrompt => "{}, решите пример: {} + {} = ?",
        Msg::CaptchaTextPrompt => "{}, нажмите на слово «{}».",
        Msg::CaptchaButton => "✅ Я не бот",
        Msg::CaptchaPassed => "✅ {} прошёл проверку.",
        Msg::CaptchaFailed => "❌ {} не прошёл проверку и будет удалён из чата.",
        Msg::CaptchaNotYours => "Эта проверка не для вас.",
        Msg::CaptchaExpired => "Проверка больше не активна.",
        Msg::CaptchaUsage => "Использование: /captcha on|off",
        Msg::CaptchaState => "Капча: {}",
        Msg::CaptchaModeUsage => "Использование: /captcha_mode button|math|text",
        Msg::CaptchaModeSet => "Режим капчи: {}",
        Msg::CaptchaTextSet => "Текст проверки обновлён.",
        Msg::WelcomeSet => "Приветственное сообщение обновлено.",
        Msg::SpamDeleted => "🚫 Сообщение от {} удалено как спам.",
        Msg::SpamFilterUsage => "Использование: /spamfilter on|off",
        Msg::SpamFilterState => "Спам-фильтр: {}",
        Msg::StatsHeader => "📊 Самые активные участники:",
        Msg::NoStats => "Статистики пока нет.",
        Msg::StatusHeader => "Состояние TextStyler",
        Msg::StatusDatabase => "база данных: {}",
        Msg::StatusDbOk => "в порядке",
        Msg::StatusDbError => "ошибка ({})",
        Msg::StatusScheduled => "запланированных задач: {}",
        Msg::StatusCaptchas => "ожидающих проверок: {}",
        Msg::StatusGigachat => "GigaChat: {}",
        Msg::StatusClassifier => "классификатор спама: {}",
        Msg::StatusSpamPolicy => "правило спама: метка={} порог={}",
        Msg::StatusDashboard => "панель: {}",
        Msg::Configured => "настроен",
        Msg::NotConfigured => "не настроен",
        Msg::Disabled => "отключена",
        Msg::ActionFailed => "Не удалось выполнить действие. Попробуйте позже.",
        Msg::On => "включена",
        Msg::Off => "выключена",
        Msg::RateLimited => "Слишком часто. Попробуйте чуть позже.",
    }
}

fn en(msg: Msg) -> &'static str {
    match msg {
        Msg::Welcome => "Welcome to TextStyler Pro! Use /style to style text, /preset for templates, or try inline mode with @{}",
        Msg::Help => "Commands: /style, /preset, /random, /history, /clear, /export_pdf, /gigachadify, /make_post, /rewrite, /smartreply, /quote, /joke, /translate, /remind, /stats, /language. Inline mode: @{}",
        Msg::AddToGroup => "➕ Add to group",
        Msg::HelpButton => "📘 Help",
        Msg::StyleMenu => "Choose a style:",
        Msg::PresetMenu => "Choose a preset:",
        Msg::EnterText => "Send the text to style as {}:",
        Msg::StyleRestricted => "Style '{}' is restricted for you.",
        Msg::UnknownStyle => "Unknown style '{}'.",
        Msg::History => "Your stylizations:\n{}",
        Msg::NoHistory => "No stylizations yet.",
        Msg::AutoFormatted => "Text auto-formatted by keyword '{}'.",
        Msg::SampleText => "Sample text",
        Msg::PdfExported => "Text exported to PDF!",
        Msg::NothingToExport => "Nothing to export.",
        Msg::ExportButton => "📄 Export to PDF",
        Msg::EditButton => "✏️ Edit",
        Msg::AdminMenu => "Admin panel:\n- /users: List users\n- /broadcast: Message everyone\n- /set_group_template: Set group template\n- /clear_group_template: Clear group template\n- /restrict_style, /unrestrict_style: Style restrictions\n- /captcha, /captcha_mode, /captcha_text, /welcome: CAPTCHA\n- /spamfilter: Spam filter\n- /status: Bot status",
        Msg::AccessDenied => "Access denied",
        Msg::GroupsOnly => "This command is only available in groups.",
        Msg::SetGroupTemplate => "Choose a template for this group:",
        Msg::GroupTemplateSet => "Template '{}' set for this group.",
        Msg::GroupTemplateCleared => "Group template cleared.",
        Msg::BroadcastUsage => "Provide a message to broadcast.",
        Msg::BroadcastSent => "Broadcast sent to {} users (failed: {}).",
        Msg::RecentUsers => "Recent users:",
        Msg::NoUsers => "No users found.",
        Msg::StyleRestrictedSet => "Style '{}' restricted for user {}.",
        Msg::StyleRestrictionLifted => "Style '{}' unrestricted for user {}.",
        Msg::RestrictUsage => "Usage: /{} <user_id> <style>",
        Msg::ChooseTone => "Choose a tone for the smart reply:",
        Msg::AiError => "GigaChat API error, using fallback: {}",
        Msg::LanguageSet => "Language switched to English.",
        Msg::LanguageUsage => "Usage: /language ru|en",
        Msg::QuoteUnavailable => "\"The best way to predict the future is to create it.\" — Peter Drucker",
        Msg::JokeUnavailable => "We ran out of jokes, hang in there! 😜",
        Msg::TranslateUsage => "Usage: /translate <lang> <text>",
        Msg::TranslateFailed => "Could not translate the text.",
        Msg::RemindUsage => "Usage: /remind <minutes> <text>",
        Msg::ReminderSet => "I will remind you in {} min.",
        Msg::ReminderFired => "⏰ Reminder: {}",
        Msg::CaptchaPrompt => "{}, please confirm you are not a bot.",
        Msg::CaptchaMathPrompt => "{}, solve: {} + {} = ?",
        Msg::CaptchaTextPrompt => "{}, tap the word \"{}\".",
        Msg::CaptchaButton => "✅ I am not a bot",
        Msg::CaptchaPassed => "✅ {} passed the check.",
        Msg::CaptchaFailed => "❌ {} failed the check and will be removed from the chat.",
        Msg::CaptchaNotYours => "This check is not for you.",
        Msg::CaptchaExpired => "This check is no longer active.",
        Msg::CaptchaUsage => "Usage: /captcha on|off",
        Msg::CaptchaState => "CAPTCHA: {}",
        Msg::CaptchaModeUsage => "Usage: /captcha_mode button|math|text",
        Msg::CaptchaModeSet => "CAPTCHA mode: {}",
        Msg::CaptchaTextSet => "Challenge text updated.",
        Msg::WelcomeSet => "Welcome message updated.",
        Msg::SpamDeleted => "🚫 Message from {} was removed as spam.",
        Msg::SpamFilterUsage => "Usage: /spamfilter on|off",
        Msg::SpamFilterState => "Spam filter: {}",
        Msg::StatsHeader => "📊 Most active members:",
        Msg::NoStats => "No statistics yet.",
        Msg::StatusHeader => "TextStyler status",
        Msg::StatusDatabase => "database: {}",
        Msg::StatusDbOk => "ok",
        Msg::StatusDbError => "error ({})",
        Msg::StatusScheduled => "scheduled tasks: {}",
        Msg::StatusCaptchas => "pending captchas: {}",
        Msg::StatusGigachat => "GigaChat: {}",
        Msg::StatusClassifier => "spam classifier: {}",
        Msg::StatusSpamPolicy => "spam policy: label={} threshold={}",
        Msg::StatusDashboard => "dashboard: {}",
        Msg::Configured => "configured",
        Msg::NotConfigured => "not configured",
        Msg::Disabled => "disabled",
        Msg::ActionFailed => "Something went wrong. Try again later.",
        Msg::On => "on",
        Msg::Off => "off",
        Msg::RateLimited => "Too fast. Try again in a moment.",
    }
}

/// Substitutes `{}` placeholders left to right. Extra placeholders stay as-is.
pub fn fill(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut args = args.iter();
    while let Some(pos) = rest.find("{}") {
        let Some(arg) = args.next() else {
            break;
        };
        out.push_str(&rest[..pos]);
        out.push_str(arg);
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

pub fn trf(lang: Lang, msg: Msg, args: &[&str]) -> String {
    fill(tr(lang, msg), args)
}

pub fn on_off(lang: Lang, value: bool) -> &'static str {
    if value {
        tr(lang, Msg::On)
    } else {
        tr(lang, Msg::Off)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_replaces_placeholders_in_order() {
        assert_eq!(fill("{} + {} = ?", &["2", "3"]), "2 + 3 = ?");
    }

    #[test]
    fn fill_keeps_unmatched_placeholders() {
        assert_eq!(fill("a {} b {}", &["x"]), "a x b {}");
        assert_eq!(fill("no slots", &["x"]), "no slots");
    }

    #[test]
    fn resolves_language_with_fallbacks() {
        assert_eq!(Lang::resolve(Some("en"), Some("ru"), "ru"), Lang::En);
        assert_eq!(Lang::resolve(None, Some("en-US"), "ru"), Lang::En);
        assert_eq!(Lang::resolve(None, Some("de"), "ru"), Lang::Ru);
        assert_eq!(Lang::resolve(Some("xx"), None, "zz"), Lang::Ru);
    }
}
