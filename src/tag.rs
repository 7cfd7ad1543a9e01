//! Defines the [`Tag`] type, which represents a [`crate::post::Post`] tag.

use gtmpl::Value;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use url::Url;

/// Represents a [`crate::post::Post`] tag. The `name` is the slugified
/// form used for URLs and index keys so that e.g. `macOS` and `MacOS`
/// resolve to the same tag; `label` preserves the author's original
/// spelling for display.
#[derive(Clone, Debug)]
pub struct Tag {
    /// The slugified tag name, e.g. `design-patterns`.
    pub name: String,

    /// The tag as written in the front matter, e.g. `Design Patterns`.
    pub label: String,

    /// The URL for the tag's first index page, i.e.
    /// `{base_url}/tags/{name}/index.html`.
    pub url: Url,
}

impl Tag {
    /// Builds a tag from its front-matter spelling. Fails only if the
    /// slugified name cannot be joined onto `base_url`.
    pub fn new(label: &str, base_url: &Url) -> Result<Tag, url::ParseError> {
        let name = slug::slugify(label);
        let url = base_url.join(&format!("tags/{}/index.html", name))?;
        Ok(Tag {
            name,
            label: label.to_owned(),
            url,
        })
    }
}

impl Hash for Tag {
    /// Implements [`Hash`] for [`Tag`] by delegating directly to the
    /// `name` field.
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state)
    }
}

impl PartialEq for Tag {
    /// Implements [`PartialEq`] and [`Eq`] for [`Tag`] by delegating
    /// directly to the `name` field.
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for Tag {}

impl PartialOrd for Tag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tag {
    /// Orders tags by `name` so tag sets iterate deterministically.
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl From<&Tag> for Value {
    /// Converts [`Tag`]s into [`Value`]s for templating.
    fn from(t: &Tag) -> Value {
        use std::collections::HashMap;
        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert("name".to_owned(), Value::String(t.name.clone()));
        m.insert("label".to_owned(), Value::String(t.label.clone()));
        m.insert("url".to_owned(), Value::String(t.url.to_string()));
        Value::Object(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_slugifies_label() -> Result<(), url::ParseError> {
        let base = Url::parse("https://example.org/")?;
        let tag = Tag::new("Design Patterns", &base)?;
        assert_eq!(tag.name, "design-patterns");
        assert_eq!(tag.label, "Design Patterns");
        assert_eq!(
            tag.url.as_str(),
            "https://example.org/tags/design-patterns/index.html"
        );
        Ok(())
    }

    #[test]
    fn test_equality_ignores_label() -> Result<(), url::ParseError> {
        let base = Url::parse("https://example.org/")?;
        assert_eq!(Tag::new("macOS", &base)?, Tag::new("MacOS", &base)?);
        Ok(())
    }
}
