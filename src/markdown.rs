//! Markdown-to-HTML conversion. The renderer itself is
//! [`pulldown_cmark`]; this module only fixes the option set and demotes
//! headings so they nest correctly under the site and post titles.

use pulldown_cmark::{html, Event, Options, Parser, Tag};

/// Converts Markdown to HTML, appending the result to `out`. Identical
/// input always produces identical output; there is no failure mode.
pub fn to_html(out: &mut String, markdown: &str) {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_SMART_PUNCTUATION);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);

    html::push_html(
        out,
        Parser::new_ext(markdown, options).map(demote_headings),
    );
}

// The headings in the post itself need to be demoted twice to be
// subordinate to both the site title (h1) and the post title (h2), so
// `#` becomes h3 instead of h1.
fn demote_headings(ev: Event) -> Event {
    match ev {
        Event::Start(Tag::Heading(size)) => {
            Event::Start(Tag::Heading(size + 2))
        }
        Event::End(Tag::Heading(size)) => Event::End(Tag::Heading(size + 2)),
        _ => ev,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(markdown: &str) -> String {
        let mut out = String::new();
        to_html(&mut out, markdown);
        out
    }

    #[test]
    fn test_heading_demotion() {
        assert_eq!(render("# Title"), "<h3>Title</h3>\n");
        assert_eq!(render("## Sub"), "<h4>Sub</h4>\n");
    }

    #[test]
    fn test_basic_paragraph() {
        assert_eq!(render("hello *world*"), "<p>hello <em>world</em></p>\n");
    }

    #[test]
    fn test_deterministic() {
        let md = "# A\n\nsome `code` and a [link](https://example.org)\n";
        assert_eq!(render(md), render(md));
    }
}
