//! Markup rendering seam.
//!
//! Full markdown rendering lives outside this crate. The indexer only needs
//! rendered HTML to find outbound links, which [`LinkRenderer`] provides.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Base URL relative links are expected to resolve against.
    pub base_url: Option<String>,
}

pub trait Renderer: Send + Sync {
    fn render(&self, raw: &str, options: &RenderOptions) -> anyhow::Result<String>;
}

/// Passes HTML through and turns markdown inline links (`[text](url)`) and
/// autolinks (`<https://...>`) into anchors. Images are left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkRenderer;

static INLINE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(!?)\[([^\]]*)\]\(\s*<?([^)\s>]+)>?(?:\s+"[^"]*")?\s*\)"#).expect("link regex")
});
static AUTOLINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<((?:https?|ftp)://[^>\s]+)>").expect("autolink regex"));

impl Renderer for LinkRenderer {
    fn render(&self, raw: &str, _options: &RenderOptions) -> anyhow::Result<String> {
        let linked = INLINE_LINK.replace_all(raw, |caps: &Captures| {
            if &caps[1] == "!" {
                caps[0].to_string()
            } else {
                format!(r#"<a href="{}">{}</a>"#, escape_attr(&caps[3]), &caps[2])
            }
        });
        let linked = AUTOLINK.replace_all(&linked, |caps: &Captures| {
            format!(r#"<a href="{0}">{0}</a>"#, escape_attr(&caps[1]))
        });
        Ok(linked.into_owned())
    }
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_links_become_anchors() {
        let html = LinkRenderer
            .render(
                "See [this](/x \"title\") and <https://y.example/a?b=1&c=2>. ![img](/p.png)",
                &RenderOptions::default(),
            )
            .unwrap();
        assert!(html.contains(r#"<a href="/x">this</a>"#));
        assert!(html.contains(r#"<a href="https://y.example/a?b=1&amp;c=2">"#));
        assert!(html.contains("![img](/p.png)"));
    }

    #[test]
    fn html_passes_through() {
        let raw = r#"<p><a href="/z">z</a></p>"#;
        assert_eq!(LinkRenderer.render(raw, &RenderOptions::default()).unwrap(), raw);
    }
}
