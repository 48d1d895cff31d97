use rand::Rng;

const ZALGO_MIN_MARKS: usize = 1;
const ZALGO_MAX_MARKS: usize = 4;
const COMBINING_START: u32 = 0x0300;
const COMBINING_END: u32 = 0x036F;
const BOLD_SCRIPT_UPPER_A: u32 = 0x1D4D0;
const BOLD_SCRIPT_LOWER_A: u32 = 0x1D4EA;

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

pub fn bold(text: &str) -> String {
    format!("<b>{text}</b>")
}

pub fn italic(text: &str) -> String {
    format!("<i>{text}</i>")
}

pub fn mono(text: &str) -> String {
    format!("<code>{text}</code>")
}

pub fn strike(text: &str) -> String {
    format!("<s>{text}</s>")
}

pub fn link(text: &str) -> String {
    format!("<a href='https://example.com'>{text}</a>")
}

pub fn cursive(text: &str) -> String {
    text.chars()
        .map(|ch| {
            let base = if ch.is_ascii_lowercase() {
                BOLD_SCRIPT_LOWER_A + (ch as u32 - 'a' as u32)
            } else if ch.is_ascii_uppercase() {
                BOLD_SCRIPT_UPPER_A + (ch as u32 - 'A' as u32)
            } else {
                return ch;
            };
            char::from_u32(base).unwrap_or(ch)
        })
        .collect()
}

pub fn boxed(text: &str) -> String {
    format!("🅱 {text} 🅾")
}

pub fn monospace_flag(text: &str) -> String {
    format!("🇲🇴🇳🇴🇸🇵🇦🇨🇪 {text}")
}

pub fn star(text: &str) -> String {
    format!("★ {text} ★")
}

pub fn fire(text: &str) -> String {
    format!("🔥 {text} 🔥")
}

pub fn circle(text: &str) -> String {
    format!("◉ {text} ◉")
}

pub fn important_style(text: &str) -> String {
    format!("💥 ВАЖНО: {text} 💥")
}

pub fn zalgo(text: &str) -> String {
    zalgo_with(&mut rand::thread_rng(), text)
}

pub fn zalgo_with<R: Rng + ?Sized>(rng: &mut R, text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 4);
    for ch in text.chars() {
        out.push(ch);
        if ch.is_whitespace() {
            continue;
        }
        let marks = rng.gen_range(ZALGO_MIN_MARKS..=ZALGO_MAX_MARKS);
        for _ in 0..marks {
            let code = rng.gen_range(COMBINING_START..=COMBINING_END);
            if let Some(mark) = char::from_u32(code) {
                out.push(mark);
            }
        }
    }
    out
}

pub fn strip_zalgo(text: &str) -> String {
    text.chars()
        .filter(|ch| !(COMBINING_START..=COMBINING_END).contains(&(*ch as u32)))
        .collect()
}

pub fn mirror(text: &str) -> String {
    text.chars().rev().collect()
}

pub fn ascii_banner(text: &str) -> String {
    let lines: Vec<String> = text.lines().map(|line| line.to_uppercase()).collect();
    let lines = if lines.is_empty() {
        vec![String::new()]
    } else {
        lines
    };
    let width = lines
        .iter()
        .map(|line| line.chars().count())
        .max()
        .unwrap_or(0);

    let mut banner = String::from("╔");
    banner.push_str(&"═".repeat(width + 2));
    banner.push_str("╗\n");
    for line in &lines {
        let pad = width - line.chars().count();
        banner.push_str("║ ");
        banner.push_str(line);
        banner.push_str(&" ".repeat(pad));
        banner.push_str(" ║\n");
    }
    banner.push('╚');
    banner.push_str(&"═".repeat(width + 2));
    banner.push('╝');
    banner
}

pub fn header(text: &str) -> String {
    format!("<b>✨ {text} ✨</b>")
}

pub fn announcement(text: &str) -> String {
    format!("📢 <b>{text}</b> 📢")
}

pub fn meme(text: &str) -> String {
    format!("😂 {} 😂", text.to_uppercase())
}

pub fn quote(text: &str) -> String {
    format!("💬 <i>{text}</i> 💬")
}

pub fn alert(text: &str) -> String {
    format!("🚨 <b>{text}</b> 🚨")
}

pub fn holiday(text: &str) -> String {
    format!("🎉 {text} 🎉")
}

pub fn joke(text: &str) -> String {
    format!("😜 {text} 😜")
}

pub fn important_preset(text: &str) -> String {
    format!("💥 <b>{text}</b> 💥")
}

/// Removes HTML tags, backticks and `* _ ~` markers.
pub fn clear_formatting(text: &str) -> String {
    use once_cell::sync::Lazy;
    use regex::Regex;

    static MARKUP_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"<[^>]+>|`{1,3}|[\*_~]").expect("valid markup regex"));
    MARKUP_RE.replace_all(text, "").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn mirror_is_an_involution() {
        for text in ["", "abc", "Привет, мир!", "🔥 fire 🔥", "a\nb"] {
            assert_eq!(mirror(&mirror(text)), text);
        }
    }

    #[test]
    fn wrapping_styles_accumulate_markers() {
        assert_eq!(bold(&bold("x")), "<b><b>x</b></b>");
        assert_ne!(italic(&italic("x")), italic("x"));
        assert_ne!(fire(&fire("x")), fire("x"));
        assert_ne!(star(&star("x")), star("x"));
        assert_ne!(header(&header("x")), header("x"));
    }

    #[test]
    fn meme_uppercases_and_is_stable_on_inner_text() {
        assert_eq!(meme("hello"), "😂 HELLO 😂");
        assert_eq!(meme("HELLO"), meme("hello"));
    }

    #[test]
    fn cursive_maps_ascii_letters_only() {
        let styled = cursive("aZ 1я");
        let chars: Vec<char> = styled.chars().collect();
        assert_eq!(chars[0] as u32, BOLD_SCRIPT_LOWER_A);
        assert_eq!(chars[1] as u32, BOLD_SCRIPT_UPPER_A + 25);
        assert_eq!(&styled[styled.len() - 4..], " 1я");
    }

    #[test]
    fn cursive_is_idempotent_once_applied() {
        let once = cursive("hello");
        assert_eq!(cursive(&once), once);
    }

    #[test]
    fn zalgo_keeps_base_text_recoverable() {
        let mut rng = StdRng::seed_from_u64(7);
        let noisy = zalgo_with(&mut rng, "hi there");
        assert_ne!(noisy, "hi there");
        assert_eq!(strip_zalgo(&noisy), "hi there");
    }

    #[test]
    fn ascii_banner_frames_every_line_to_equal_width() {
        let banner = ascii_banner("ab\nlonger");
        let widths: Vec<usize> = banner.lines().map(|line| line.chars().count()).collect();
        assert_eq!(widths.len(), 4);
        assert!(widths.iter().all(|w| *w == widths[0]));
        assert!(banner.contains("║ AB     ║"));
    }

    #[test]
    fn clear_formatting_strips_markup() {
        assert_eq!(clear_formatting("<b>hi</b> `code` *x* _y_ ~z~"), "hi code x y z");
    }

    #[test]
    fn escape_html_escapes_specials() {
        assert_eq!(escape_html("<a & 'b'>"), "&lt;a &amp; &#39;b&#39;&gt;");
    }
}
