//! The front-matter parser: the first pipeline stage. Walks the content
//! directory, splits each file's `+++`-fenced TOML metadata block from
//! its Markdown body, validates the required fields, and produces
//! immutable [`Post`] values. Parsing is pure per file and runs on a
//! worker pool; all malformed files are collected and reported in a
//! single invocation rather than stopping at the first.

use crate::config::Config;
use crate::post::Post;
use crate::tag::Tag;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

/// The front-matter fence. Hugo-style TOML blocks:
///
/// ```md
/// +++
/// title = "Hello, world!"
/// date = 2021-04-16
/// tags = ["greet"]
/// +++
/// # Hello
///
/// World
/// ```
const FENCE: &str = "+++";

const MARKDOWN_EXTENSION: &str = "md";

/// Parses [`Post`] objects from source files.
pub struct Parser<'a> {
    config: &'a Config,
}

impl<'a> Parser<'a> {
    pub fn new(config: &'a Config) -> Parser<'a> {
        Parser { config }
    }

    /// Walks the content directory for `.md` files and parses every one
    /// of them, in parallel. On failure the error list covers *all*
    /// malformed files, so an author fixing a batch of posts gets one
    /// report instead of one per invocation.
    ///
    /// The returned posts are sorted by date descending (tie-break:
    /// slug ascending) so downstream stages never observe filesystem
    /// enumeration order.
    pub fn parse_posts(&self) -> std::result::Result<Vec<Post>, Vec<Error>> {
        let mut files = Vec::new();
        for result in walkdir::WalkDir::new(&self.config.content_dir)
            .sort_by_file_name()
        {
            match result {
                Ok(entry) => {
                    let is_markdown = entry.file_type().is_file()
                        && entry.path().extension()
                            == Some(std::ffi::OsStr::new(MARKDOWN_EXTENSION));
                    if is_markdown {
                        files.push(entry.into_path());
                    }
                }
                Err(err) => return Err(vec![Error::WalkDir(err)]),
            }
        }

        let results: Vec<Result<Post>> = files
            .par_iter()
            .map(|path| self.parse_post(path))
            .collect();

        let mut posts = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(post) => posts.push(post),
                Err(err) => errors.push(err),
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        posts.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| a.slug.cmp(&b.slug))
        });
        Ok(posts)
    }

    /// Parses a single post file, annotating any error with the source
    /// path so multi-file reports stay readable.
    pub fn parse_post(&self, path: &Path) -> Result<Post> {
        match self.parse_post_inner(path) {
            Ok(post) => Ok(post),
            Err(e) => Err(Error::Annotated(
                format!("parsing post `{}`", path.display()),
                Box::new(e),
            )),
        }
    }

    fn parse_post_inner(&self, path: &Path) -> Result<Post> {
        let contents = fs::read_to_string(path)?;
        let (block, body) = split_frontmatter(&contents)?;

        // Two-step deserialization keeps the error classes apart: a TOML
        // syntax error names the offending line, while a wrong-typed or
        // missing field is a metadata validation failure.
        let table: toml::Table = toml::from_str(block).map_err(Error::Toml)?;
        let raw: RawFrontmatter = toml::Value::Table(table)
            .try_into()
            .map_err(Error::Metadata)?;

        let title = raw.title.ok_or(Error::MissingField("title"))?;
        // TOML has a native datetime type, so `date = 2021-04-16` and
        // `date = "2021-04-16"` both occur in the wild. Accept either.
        let published_at = match raw.date.ok_or(Error::MissingField("date"))? {
            toml::Value::Datetime(dt) => parse_timestamp(&dt.to_string())?,
            toml::Value::String(s) => parse_timestamp(&s)?,
            other => return Err(Error::InvalidDate(other.to_string())),
        };

        let slug = derive_slug(
            &self.config.content_dir,
            path,
            raw.slug.as_deref(),
        );

        let mut tags = BTreeSet::new();
        for label in &raw.tags {
            tags.insert(Tag::new(label, &self.config.base_url)?);
        }

        Ok(Post {
            url: self
                .config
                .base_url
                .join(&format!("posts/{}.html", slug))?,
            slug,
            title,
            published_at,
            draft: raw.draft,
            series: raw.series,
            tags,
            body: body.to_owned(),
            source_path: path.to_owned(),
        })
    }
}

#[derive(Deserialize)]
struct RawFrontmatter {
    /// The title of the post. Required.
    title: Option<String>,

    /// The publication date. Required. Accepts a TOML date/datetime or
    /// a `YYYY-MM-DD` / RFC 3339 string.
    date: Option<toml::Value>,

    /// Draft posts are excluded from output by default.
    #[serde(default)]
    draft: bool,

    /// Optional series this post belongs to.
    #[serde(default)]
    series: Option<String>,

    /// The tags associated with the post.
    #[serde(default)]
    tags: Vec<String>,

    /// Overrides the final slug component; the directory-derived prefix
    /// is kept.
    #[serde(default)]
    slug: Option<String>,
}

/// Splits the fenced front-matter block from the body text.
fn split_frontmatter(input: &str) -> Result<(&str, &str)> {
    let rest = input.strip_prefix(FENCE).ok_or(Error::MissingStartFence)?;
    match rest.find(&format!("\n{}", FENCE)) {
        None => Err(Error::UnterminatedFrontmatter {
            line: input.lines().count(),
        }),
        Some(offset) => {
            let block = &rest[..offset];
            let body = &rest[offset + 1 + FENCE.len()..];
            let body = body
                .strip_prefix("\r\n")
                .or_else(|| body.strip_prefix('\n'))
                .unwrap_or(body);
            Ok((block, body))
        }
    }
}

/// Derives the slug from the file path relative to the content
/// directory: each component is slugified, the extension is dropped,
/// and components are joined with `/` (so `dotnet/My Post.md` becomes
/// `dotnet/my-post`). A front-matter override replaces only the final
/// component.
fn derive_slug(
    content_dir: &Path,
    path: &Path,
    override_slug: Option<&str>,
) -> String {
    let relative = path.strip_prefix(content_dir).unwrap_or(path);
    let mut components: Vec<String> = relative
        .with_extension("")
        .components()
        .map(|c| slug::slugify(c.as_os_str().to_string_lossy()))
        .collect();

    if let Some(explicit) = override_slug {
        let slugified = slug::slugify(explicit);
        match components.last_mut() {
            Some(last) => *last = slugified,
            None => components.push(slugified),
        }
    }
    components.join("/")
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    Err(Error::InvalidDate(raw.to_owned()))
}

/// Represents the result of a [`Post`]-parse operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error parsing a [`Post`] object. The first three
/// variants are parse failures (malformed metadata block); the
/// following three are validation failures (well-formed block, bad
/// content).
#[derive(Debug)]
pub enum Error {
    /// Returned when a post source file is missing its starting
    /// front-matter fence (`+++`).
    MissingStartFence,

    /// Returned when the starting fence was found but the closing one
    /// was missing.
    UnterminatedFrontmatter { line: usize },

    /// Returned when the metadata block is not valid TOML.
    Toml(toml::de::Error),

    /// Returned when a metadata field has the wrong shape (e.g. a
    /// string where a list is expected).
    Metadata(toml::de::Error),

    /// Returned when a required metadata field is absent.
    MissingField(&'static str),

    /// Returned when the `date` field cannot be understood.
    InvalidDate(String),

    /// Returned when there is a problem building URLs.
    UrlParse(url::ParseError),

    /// Returned for WalkDir I/O errors.
    WalkDir(walkdir::Error),

    /// Returned for other I/O errors.
    Io(std::io::Error),

    /// An error with an annotation.
    Annotated(String, Box<Error>),
}

impl Error {
    /// Strips annotation layers; useful when callers want to inspect
    /// the underlying failure.
    pub fn root(&self) -> &Error {
        match self {
            Error::Annotated(_, inner) => inner.root(),
            other => other,
        }
    }
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::MissingStartFence => {
                write!(f, "post must begin with `{}` (line 1)", FENCE)
            }
            Error::UnterminatedFrontmatter { line } => write!(
                f,
                "missing closing `{}` (reached end of file at line {})",
                FENCE, line
            ),
            Error::Toml(err) => write!(f, "front matter: {}", err),
            Error::Metadata(err) => {
                write!(f, "front matter field: {}", err)
            }
            Error::MissingField(field) => {
                write!(f, "missing required field `{}`", field)
            }
            Error::InvalidDate(value) => write!(
                f,
                "invalid date `{}` (expected YYYY-MM-DD or RFC 3339)",
                value
            ),
            Error::UrlParse(err) => err.fmt(f),
            Error::WalkDir(err) => err.fmt(f),
            Error::Io(err) => err.fmt(f),
            Error::Annotated(annotation, err) => {
                write!(f, "{}: {}", &annotation, err)
            }
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::MissingStartFence => None,
            Error::UnterminatedFrontmatter { .. } => None,
            Error::Toml(err) => Some(err),
            Error::Metadata(err) => Some(err),
            Error::MissingField(_) => None,
            Error::InvalidDate(_) => None,
            Error::UrlParse(err) => Some(err),
            Error::WalkDir(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Annotated(_, err) => Some(err),
        }
    }
}

impl From<url::ParseError> for Error {
    /// Converts a [`url::ParseError`] into an [`Error`]. It allows us to
    /// use the `?` operator for URL parsing and joining functions.
    fn from(err: url::ParseError) -> Error {
        Error::UrlParse(err)
    }
}

impl From<walkdir::Error> for Error {
    /// Converts a [`walkdir::Error`] into an [`Error`]. It allows us to
    /// use the `?` operator for fallible I/O functions.
    fn from(err: walkdir::Error) -> Error {
        Error::WalkDir(err)
    }
}

impl From<std::io::Error> for Error {
    /// Converts a [`std::io::Error`] into an [`Error`]. It allows us to
    /// use the `?` operator for fallible I/O functions.
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}
