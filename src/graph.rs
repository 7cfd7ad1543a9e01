//! The content graph builder: the synchronization barrier between
//! parsing and everything downstream. Consumes the full set of parsed
//! posts and produces the slug map, series groups, and tag index that
//! the resolver and writer read without further coordination. All maps
//! are ordered so iteration never leaks nondeterminism into output.

use crate::post::Post;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// An author-declared ordered grouping of posts, read front-to-back:
/// members are ordered by publication date ascending.
pub struct SeriesGroup {
    /// The series name as written by the author.
    pub name: String,

    /// Slugified name, used for the index page URL and output path.
    pub slug: String,

    /// Member slugs, date ascending (tie-break: slug).
    pub members: Vec<String>,
}

/// One tag's bucket in the tag index, read as "recent first": members
/// are ordered by publication date descending.
pub struct TagBucket {
    /// The tag as first written by an author.
    pub label: String,

    /// Member slugs, date descending (tie-break: slug).
    pub members: Vec<String>,
}

/// The immutable post graph for one build. Constructed once, read by
/// the resolver and writer, discarded at process exit.
pub struct ContentGraph {
    /// Every included post, keyed by slug.
    pub posts: BTreeMap<String, Post>,

    /// Included slugs in main-index order: date descending.
    pub order: Vec<String>,

    /// Series groups keyed by series slug.
    pub series: BTreeMap<String, SeriesGroup>,

    /// Tag buckets keyed by tag name (slugified).
    pub tags: BTreeMap<String, TagBucket>,

    /// Slugs of posts that were parsed but excluded as drafts. The
    /// resolver uses this to tell a typo from a draft reference.
    pub draft_slugs: BTreeSet<String>,
}

impl ContentGraph {
    /// Aggregates parsed posts into the graph. Duplicate slugs are
    /// fatal immediately: two posts resolving to the same slug would
    /// also resolve to the same output file, and there is no valid
    /// recovery. Returns the graph plus lint warnings (currently:
    /// duplicate `(title, series)` pairs).
    pub fn build(
        parsed: Vec<Post>,
        include_drafts: bool,
    ) -> Result<(ContentGraph, Vec<String>)> {
        // Slug uniqueness is enforced across the entire collection,
        // drafts included: a draft still occupies its output location.
        let mut sources: BTreeMap<String, PathBuf> = BTreeMap::new();
        for post in &parsed {
            if let Some(first) = sources.get(&post.slug) {
                return Err(Error::DuplicateSlug {
                    slug: post.slug.clone(),
                    first: first.clone(),
                    second: post.source_path.clone(),
                });
            }
            sources.insert(post.slug.clone(), post.source_path.clone());
        }

        let warnings = lint_duplicate_titles(&parsed);

        let mut posts = BTreeMap::new();
        let mut draft_slugs = BTreeSet::new();
        let mut ordered: Vec<(NaiveDateTime, String)> = Vec::new();
        let mut series_acc: BTreeMap<String, SeriesAccumulator> =
            BTreeMap::new();
        let mut tags_acc: BTreeMap<String, TagAccumulator> = BTreeMap::new();

        for post in parsed {
            if post.draft && !include_drafts {
                draft_slugs.insert(post.slug);
                continue;
            }

            ordered.push((post.published_at, post.slug.clone()));

            if let Some(name) = &post.series {
                let key = slug::slugify(name);
                series_acc
                    .entry(key)
                    .or_insert_with(|| SeriesAccumulator {
                        name: name.clone(),
                        members: Vec::new(),
                    })
                    .members
                    .push((post.published_at, post.slug.clone()));
            }

            for tag in &post.tags {
                tags_acc
                    .entry(tag.name.clone())
                    .or_insert_with(|| TagAccumulator {
                        label: tag.label.clone(),
                        members: Vec::new(),
                    })
                    .members
                    .push((post.published_at, post.slug.clone()));
            }

            posts.insert(post.slug.clone(), post);
        }

        // Series are read in authored order: oldest first. Tag listings
        // and the main index are read as "recent first". Slug breaks
        // ties in both so the result is a pure function of the posts.
        ordered.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let series = series_acc
            .into_iter()
            .map(|(slug, mut acc)| {
                acc.members
                    .sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
                let group = SeriesGroup {
                    name: acc.name,
                    slug: slug.clone(),
                    members: strip_dates(acc.members),
                };
                (slug, group)
            })
            .collect();

        let tags = tags_acc
            .into_iter()
            .map(|(name, mut acc)| {
                acc.members
                    .sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
                let bucket = TagBucket {
                    label: acc.label,
                    members: strip_dates(acc.members),
                };
                (name, bucket)
            })
            .collect();

        Ok((
            ContentGraph {
                posts,
                order: strip_dates(ordered),
                series,
                tags,
                draft_slugs,
            },
            warnings,
        ))
    }

    /// Looks up an included post by slug.
    pub fn post(&self, slug: &str) -> Option<&Post> {
        self.posts.get(slug)
    }
}

struct SeriesAccumulator {
    name: String,
    members: Vec<(NaiveDateTime, String)>,
}

struct TagAccumulator {
    label: String,
    members: Vec<(NaiveDateTime, String)>,
}

fn strip_dates(members: Vec<(NaiveDateTime, String)>) -> Vec<String> {
    members.into_iter().map(|(_, slug)| slug).collect()
}

// Near-identical copies of a post (same title, same series) are usually
// an accident of staged revisions; surface them without failing the
// build.
fn lint_duplicate_titles(posts: &[Post]) -> Vec<String> {
    let mut seen: BTreeMap<(String, String), &PathBuf> = BTreeMap::new();
    let mut warnings = Vec::new();
    for post in posts {
        let key = (
            post.title.clone(),
            post.series.clone().unwrap_or_default(),
        );
        match seen.get(&key) {
            Some(first) => warnings.push(format!(
                "duplicate title `{}`{}: `{}` and `{}`",
                post.title,
                match &post.series {
                    Some(series) => format!(" in series `{}`", series),
                    None => String::new(),
                },
                first.display(),
                post.source_path.display(),
            )),
            None => {
                seen.insert(key, &post.source_path);
            }
        }
    }
    warnings
}

/// The result of building the content graph.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a fatal aggregation error.
#[derive(Debug)]
pub enum Error {
    /// Two source files resolve to the same slug, and therefore to the
    /// same output location.
    DuplicateSlug {
        slug: String,
        first: PathBuf,
        second: PathBuf,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::DuplicateSlug {
                slug,
                first,
                second,
            } => write!(
                f,
                "duplicate slug `{}`: `{}` and `{}` resolve to the same output location",
                slug,
                first.display(),
                second.display(),
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
