use regex::Regex;
use scraper::{Html, Node};
use std::sync::LazyLock;

static EXTERNAL_SENDER_BANNER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)You don['’]t often get email from .*?\.\nLearn why this is important")
        .expect("banner pattern is valid")
});

/// Reduce a message body (HTML or plain text) to trimmed, non-empty lines of text.
pub fn clean_html(html: &str) -> String {
    let document = Html::parse_fragment(html);

    let mut chunks: Vec<&str> = Vec::new();
    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name()))
            .is_some_and(|name| name == "script" || name == "style");
        if !hidden {
            chunks.push(text);
        }
    }

    let joined = chunks.join("\n");
    let cleaned = joined
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    EXTERNAL_SENDER_BANNER
        .replace_all(&cleaned, "")
        .trim()
        .to_string()
}

/// Clean every message body and join them into one email-chain text.
pub fn combine_bodies<'a>(bodies: impl IntoIterator<Item = &'a str>) -> String {
    let mut combined = String::new();
    for body in bodies {
        combined.push_str(&clean_html(body));
        combined.push_str("\n\n");
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_html_strips_markup_and_blank_lines() {
        let html = "<html><body><p>Hello team,</p>\n\n<div>  I am applying for <b>logic design</b>.  </div><br><br></body></html>";
        let text = clean_html(html);
        assert_eq!(text, "Hello team,\nI am applying for\nlogic design\n.");
    }

    #[test]
    fn test_clean_html_drops_style_and_script() {
        let html = "<style>p { color: red; }</style><p>Resume attached</p><script>track()</script>";
        assert_eq!(clean_html(html), "Resume attached");
    }

    #[test]
    fn test_clean_html_removes_external_sender_banner() {
        let html = "<p>You don't often get email from jane@x.com.</p><p>Learn why this is important</p><p>Hi, please find my CV.</p>";
        assert_eq!(clean_html(html), "Hi, please find my CV.");
    }

    #[test]
    fn test_clean_html_decodes_entities() {
        assert_eq!(clean_html("<p>R&amp;D &lt;team&gt;</p>"), "R&D <team>");
    }

    #[test]
    fn test_combine_bodies_separates_messages() {
        let combined = combine_bodies(["<p>first</p>", "second"]);
        assert_eq!(combined, "first\n\nsecond\n\n");
    }
}
