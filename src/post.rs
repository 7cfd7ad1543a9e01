//! Defines the [`Post`] type: one content unit, parsed from a source
//! file, owned by the build for its whole lifetime. Bodies stay raw
//! Markdown until the render stage so the cross-reference resolver can
//! rewrite markers in source form.

use crate::tag::Tag;
use chrono::NaiveDateTime;
use gtmpl::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use url::Url;

/// The marker separating a post's summary from the rest of its body.
/// Text above the fold is what index pages show.
pub const FOLD_MARKER: &str = "<!-- more -->";

/// A single post. The `slug` is unique across the whole collection
/// (drafts included) and immutable once assigned; everything else is
/// plain data for the later stages.
#[derive(Clone, Debug)]
pub struct Post {
    /// Path-derived identifier, e.g. `dotnet/options-pattern`. Forms
    /// the output path and is the target of cross-references.
    pub slug: String,

    pub title: String,

    /// Publication timestamp used for all chronological ordering.
    pub published_at: NaiveDateTime,

    /// Draft posts are excluded from output unless the build says
    /// otherwise, but still occupy their slug.
    pub draft: bool,

    /// Optional series name as written by the author.
    pub series: Option<String>,

    pub tags: BTreeSet<Tag>,

    /// Raw Markdown body. Rewritten in place by the cross-reference
    /// resolver, converted to HTML only at render time.
    pub body: String,

    /// The source file, kept for diagnostics.
    pub source_path: PathBuf,

    /// Absolute URL of the rendered page, from the site base URL.
    pub url: Url,
}

impl Post {
    /// The site-root-relative href for a post page, shared between the
    /// reference resolver and the writer so links and files can't drift
    /// apart.
    pub fn page_href(slug: &str) -> String {
        format!("/posts/{}.html", slug)
    }

    /// The output path for a post page, relative to the output root.
    pub fn page_path(&self) -> PathBuf {
        PathBuf::from("posts").join(format!("{}.html", self.slug))
    }

    /// Splits the body at the fold marker. Returns the summary text and
    /// whether the post was actually summarized (so templates can show
    /// a "read more" link only when there is more to read).
    pub fn summary(&self) -> (&str, bool) {
        match self.body.find(FOLD_MARKER) {
            Some(i) => (&self.body[..i], true),
            None => (&self.body, false),
        }
    }

    /// The date as shown to readers.
    pub fn date_display(&self) -> String {
        self.published_at.format("%Y-%m-%d").to_string()
    }

    /// The template fields shared by post pages and index summaries:
    /// `title`, `url`, `date`, `draft`, `tags`, and `series` (the
    /// series name or nil).
    pub fn base_value(&self) -> HashMap<String, Value> {
        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert("title".to_owned(), Value::String(self.title.clone()));
        m.insert("url".to_owned(), Value::String(self.url.to_string()));
        m.insert("date".to_owned(), Value::String(self.date_display()));
        m.insert("draft".to_owned(), Value::Bool(self.draft));
        m.insert(
            "tags".to_owned(),
            Value::Array(self.tags.iter().map(Value::from).collect()),
        );
        m.insert(
            "series".to_owned(),
            match &self.series {
                Some(name) => Value::String(name.clone()),
                None => Value::Nil,
            },
        );
        m
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::post;
    use super::*;

    #[test]
    fn test_summary_with_fold() {
        let mut p = post("a", "2021-01-01");
        p.body = format!("above {} below", FOLD_MARKER);
        let (summary, summarized) = p.summary();
        assert_eq!(summary, "above ");
        assert!(summarized);
    }

    #[test]
    fn test_summary_without_fold() {
        let mut p = post("a", "2021-01-01");
        p.body = "whole body".to_owned();
        let (summary, summarized) = p.summary();
        assert_eq!(summary, "whole body");
        assert!(!summarized);
    }

    #[test]
    fn test_page_href_matches_page_path() {
        let p = post("dotnet/options", "2021-01-01");
        assert_eq!(Post::page_href(&p.slug), "/posts/dotnet/options.html");
        assert_eq!(
            p.page_path(),
            PathBuf::from("posts/dotnet/options.html")
        );
    }
}
