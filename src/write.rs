//! The render pipeline: turns the resolved post graph into HTML files.
//! Responsible for templating, pagination, and deterministic output
//! paths. Writing happens against whatever root it is given; the build
//! passes a staging directory and publishes it atomically afterwards,
//! so a failed render never leaves a half-updated site.

use crate::config::Author;
use crate::graph::{ContentGraph, SeriesGroup, TagBucket};
use crate::markdown;
use crate::post::Post;
use gtmpl::{Template, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use url::Url;

/// Responsible for indexing, templating, and writing HTML pages to disk
/// from the resolved [`ContentGraph`].
pub struct Writer<'a> {
    /// The template for post pages.
    pub posts_template: &'a Template,

    /// The template for index pages (main, per-tag, and per-series).
    pub index_template: &'a Template,

    /// The number of post summaries per index page.
    pub page_size: usize,

    /// The site title, available to every template.
    pub site_title: &'a str,

    /// The site author, available to every template.
    pub author: Option<&'a Author>,

    /// The site root URL; page URLs are joined onto this.
    pub base_url: &'a Url,

    /// In strict mode a single page's render failure aborts the build;
    /// otherwise the page is skipped and reported as a warning.
    pub strict: bool,
}

impl Writer<'_> {
    /// Renders every output document into `out_root` and returns the
    /// warnings accumulated in permissive mode. Output is a pure
    /// function of the graph: pages derive from sorted structures only,
    /// so two runs over identical input write byte-identical trees.
    pub fn write_site(
        &self,
        graph: &ContentGraph,
        out_root: &Path,
    ) -> Result<Vec<String>> {
        let site = self.site_context()?;
        let pages = self.pages(graph)?;

        let mut warnings = Vec::new();
        let mut seen_dirs: HashSet<PathBuf> = HashSet::new();
        for page in &pages {
            match render_page(page, &site) {
                Ok(bytes) => {
                    let path = out_root.join(&page.file_path);
                    // there should always be a parent dir
                    if let Some(dir) = path.parent() {
                        if seen_dirs.insert(dir.to_owned()) {
                            fs::create_dir_all(dir)?;
                        }
                    }
                    fs::write(&path, bytes)?;
                }
                Err(message) => {
                    if self.strict {
                        return Err(Error::Render {
                            path: page.file_path.clone(),
                            message,
                        });
                    }
                    warnings.push(format!(
                        "skipping `{}`: {}",
                        page.file_path.display(),
                        message
                    ));
                }
            }
        }
        Ok(warnings)
    }

    /// Creates all output [`Page`]s: one per post, the paginated main
    /// index, one paginated index per tag, and one single-page index
    /// per series.
    fn pages(&self, graph: &ContentGraph) -> Result<Vec<Page<'_>>> {
        let mut pages = self.post_pages(graph)?;
        pages.extend(self.index_pages(
            graph,
            "index",
            None,
            PathBuf::new(),
            self.base_url.clone(),
            &graph.order,
            self.page_size,
        )?);
        for (name, bucket) in &graph.tags {
            pages.extend(self.tag_pages(graph, name, bucket)?);
        }
        for group in graph.series.values() {
            pages.extend(self.series_pages(graph, group)?);
        }
        Ok(pages)
    }

    fn post_pages(&self, graph: &ContentGraph) -> Result<Vec<Page<'_>>> {
        let mut pages = Vec::with_capacity(graph.order.len());
        for (i, slug) in graph.order.iter().enumerate() {
            let post = match graph.post(slug) {
                Some(post) => post,
                None => continue, // order only holds included slugs
            };
            pages.push(Page {
                item: self.post_value(graph, post),
                file_path: post.page_path(),
                prev: match i {
                    0 => None,
                    _ => adjacent_url(graph, &graph.order[i - 1]),
                },
                next: match graph.order.get(i + 1) {
                    Some(next) => adjacent_url(graph, next),
                    None => None,
                },
                kind: "post",
                heading: None,
                template: self.posts_template,
            });
        }
        Ok(pages)
    }

    fn tag_pages(
        &self,
        graph: &ContentGraph,
        name: &str,
        bucket: &TagBucket,
    ) -> Result<Vec<Page<'_>>> {
        self.index_pages(
            graph,
            "tag",
            Some(bucket.label.clone()),
            PathBuf::from("tags").join(name),
            self.base_url.join(&format!("tags/{}/", name))?,
            &bucket.members,
            self.page_size,
        )
    }

    fn series_pages(
        &self,
        graph: &ContentGraph,
        group: &SeriesGroup,
    ) -> Result<Vec<Page<'_>>> {
        // A series is read front-to-back; it gets one page in authored
        // order rather than a recent-first pagination.
        self.index_pages(
            graph,
            "series",
            Some(group.name.clone()),
            PathBuf::from("series").join(&group.slug),
            self.base_url.join(&format!("series/{}/", group.slug))?,
            &group.members,
            group.members.len().max(1),
        )
    }

    /// Converts one ordered member list into paginated index pages,
    /// named `index.html`, `1.html`, `2.html`, … with prev/next links
    /// between them.
    fn index_pages(
        &self,
        graph: &ContentGraph,
        kind: &'static str,
        heading: Option<String>,
        dir: PathBuf,
        dir_url: Url,
        members: &[String],
        page_size: usize,
    ) -> Result<Vec<Page<'_>>> {
        let total_pages = match members.len() % page_size {
            0 => members.len() / page_size,
            _ => members.len() / page_size + 1,
        };

        let mut pages = Vec::with_capacity(total_pages);
        for (i, chunk) in members.chunks(page_size).enumerate() {
            let file_name = match i {
                0 => String::from("index.html"),
                _ => format!("{}.html", i),
            };
            pages.push(Page {
                item: Value::Array(
                    chunk
                        .iter()
                        .filter_map(|slug| graph.post(slug))
                        .map(|post| self.summary_value(post))
                        .collect(),
                ),
                file_path: dir.join(&file_name),
                prev: match i {
                    0 => None,
                    1 => Some(dir_url.join("index.html")?.to_string()),
                    _ => Some(
                        dir_url.join(&format!("{}.html", i - 1))?.to_string(),
                    ),
                },
                next: match i + 1 < total_pages {
                    true => Some(
                        dir_url.join(&format!("{}.html", i + 1))?.to_string(),
                    ),
                    false => None,
                },
                kind,
                heading: heading.clone(),
                template: self.index_template,
            });
        }
        Ok(pages)
    }

    /// The full template value for a post page: the shared fields plus
    /// the rendered body and, for series members, a `series_nav` object
    /// with the series index URL and the neighboring parts.
    fn post_value(&self, graph: &ContentGraph, post: &Post) -> Value {
        let mut m = post.base_value();

        let mut body = String::new();
        markdown::to_html(&mut body, &post.body);
        m.insert("body".to_owned(), Value::String(body));

        if let Some(nav) = self.series_nav(graph, post) {
            m.insert("series_nav".to_owned(), nav);
        }
        Value::Object(m)
    }

    fn series_nav(&self, graph: &ContentGraph, post: &Post) -> Option<Value> {
        let name = post.series.as_ref()?;
        let group = graph.series.get(&slug::slugify(name))?;
        let position =
            group.members.iter().position(|slug| slug == &post.slug)?;

        let neighbor = |index: Option<usize>| -> Value {
            index
                .and_then(|i| group.members.get(i))
                .and_then(|slug| adjacent_url(graph, slug))
                .map(Value::String)
                .unwrap_or(Value::Nil)
        };

        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert("name".to_owned(), Value::String(group.name.clone()));
        m.insert(
            "url".to_owned(),
            match self
                .base_url
                .join(&format!("series/{}/index.html", group.slug))
            {
                Ok(url) => Value::String(url.to_string()),
                Err(_) => Value::Nil,
            },
        );
        m.insert("prev".to_owned(), neighbor(position.checked_sub(1)));
        m.insert("next".to_owned(), neighbor(Some(position + 1)));
        Some(Value::Object(m))
    }

    /// The template value for a post's entry on an index page: the
    /// shared fields plus the summary (the body above the fold) and
    /// whether there is more to read.
    fn summary_value(&self, post: &Post) -> Value {
        let mut m = post.base_value();
        let (summary, summarized) = post.summary();

        let mut html = String::new();
        markdown::to_html(&mut html, summary);
        m.insert("summary".to_owned(), Value::String(html));
        m.insert("summarized".to_owned(), Value::Bool(summarized));
        Value::Object(m)
    }

    fn site_context(&self) -> Result<SiteContext> {
        Ok(SiteContext {
            site_title: self.site_title.to_owned(),
            home_page: self.base_url.to_string(),
            static_url: self.base_url.join("static/")?.to_string(),
            author: match self.author {
                Some(author) => {
                    let mut m: HashMap<String, Value> = HashMap::new();
                    m.insert(
                        "name".to_owned(),
                        Value::String(author.name.clone()),
                    );
                    m.insert(
                        "email".to_owned(),
                        match &author.email {
                            Some(email) => Value::String(email.clone()),
                            None => Value::Nil,
                        },
                    );
                    Value::Object(m)
                }
                None => Value::Nil,
            },
        })
    }
}

fn adjacent_url(graph: &ContentGraph, slug: &str) -> Option<String> {
    graph.post(slug).map(|post| post.url.to_string())
}

/// Site-wide template fields injected into every page.
struct SiteContext {
    site_title: String,
    home_page: String,
    static_url: String,
    author: Value,
}

/// An object representing one output HTML file.
struct Page<'a> {
    /// The main item for the page: a post object for post pages, an
    /// array of post summaries for index pages.
    item: Value,

    /// The target location on disk, relative to the output root.
    file_path: PathBuf,

    /// The URL for the previous page, if any.
    prev: Option<String>,

    /// The URL for the next page, if any.
    next: Option<String>,

    /// `post`, `index`, `tag`, or `series`; lets a single index
    /// template adjust its chrome.
    kind: &'static str,

    /// The tag label or series name for taxonomy pages.
    heading: Option<String>,

    /// The template with which the page will be rendered.
    template: &'a Template,
}

impl Page<'_> {
    /// Converts a [`Page`] into a [`Value`] for templating. The result
    /// has fields `item`, `prev`, `next`, `kind`, `heading`, plus the
    /// site-wide `site_title`, `home_page`, `static_url`, and `author`.
    fn to_value(&self, site: &SiteContext) -> Value {
        let option_to_value = |opt: &Option<String>| match opt {
            Some(s) => Value::String(s.clone()),
            None => Value::Nil,
        };

        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert("item".to_owned(), self.item.clone());
        m.insert("prev".to_owned(), option_to_value(&self.prev));
        m.insert("next".to_owned(), option_to_value(&self.next));
        m.insert("kind".to_owned(), Value::String(self.kind.to_owned()));
        m.insert("heading".to_owned(), option_to_value(&self.heading));
        m.insert(
            "site_title".to_owned(),
            Value::String(site.site_title.clone()),
        );
        m.insert(
            "home_page".to_owned(),
            Value::String(site.home_page.clone()),
        );
        m.insert(
            "static_url".to_owned(),
            Value::String(site.static_url.clone()),
        );
        m.insert("author".to_owned(), site.author.clone());
        Value::Object(m)
    }
}

// Renders into memory first so a template failure never leaves a
// truncated file behind.
fn render_page(
    page: &Page,
    site: &SiteContext,
) -> std::result::Result<Vec<u8>, String> {
    let mut buf = Vec::new();
    let context = gtmpl::Context::from(page.to_value(site))?;
    page.template.execute(&mut buf, &context)?;
    Ok(buf)
}

/// The result of a fallible page-writing operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error in a page-writing operation.
#[derive(Debug)]
pub enum Error {
    /// A single page failed to render. Fatal only in strict mode.
    Render { path: PathBuf, message: String },

    /// An error writing the output files.
    Io(io::Error),

    /// An error building page URLs.
    Url(url::ParseError),
}

impl From<io::Error> for Error {
    /// Converts an [`io::Error`] into an [`Error`]. This allows us to
    /// use the `?` operator for fallible I/O operations.
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<url::ParseError> for Error {
    /// Converts a [`url::ParseError`] into an [`Error`]. This allows us
    /// to use the `?` operator when joining page URLs.
    fn from(err: url::ParseError) -> Error {
        Error::Url(err)
    }
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as presentable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Render { path, message } => {
                write!(f, "rendering `{}`: {}", path.display(), message)
            }
            Error::Io(err) => err.fmt(f),
            Error::Url(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Render { .. } => None,
            Error::Io(err) => Some(err),
            Error::Url(err) => Some(err),
        }
    }
}
