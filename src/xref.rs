//! The cross-reference resolver. Posts link to each other with
//! `{{< ref "target" >}}` markers; this stage rewrites every marker
//! into a site-root-relative link once the whole slug map exists.
//! Resolution is order-independent by construction: it only ever reads
//! the completed, immutable [`ContentGraph`], so any post may reference
//! any other regardless of parse order.

use crate::graph::ContentGraph;
use crate::post::Post;
use rayon::prelude::*;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// What a marker degrades to in permissive mode when it cannot be
/// resolved: a link that goes nowhere instead of a broken one.
pub const INERT_HREF: &str = "#";

/// The reference-marker grammar. The target must be double-quoted; a
/// `{{< ref` opener that fails this pattern is reported as malformed
/// rather than silently passed through.
const MARKER: &str = r#"\{\{<\s*ref\s+"([^"]*)"\s*>\}\}"#;

/// Openers that look like a ref marker. Other `{{<` spans (e.g. foreign
/// shortcodes quoted in code samples) are left alone as literal text.
const OPENER: &str = r#"\{\{<\s*ref\b"#;

/// Resolves reference markers against a finished content graph.
pub struct Resolver<'a> {
    graph: &'a ContentGraph,

    /// Final slug component -> full slugs, for short references like
    /// `{{< ref "options-pattern" >}}` to `dotnet/options-pattern`.
    basenames: BTreeMap<&'a str, Vec<&'a str>>,

    marker: Regex,
    opener: Regex,
}

/// The outcome of resolving one post: the rewritten body plus whatever
/// went wrong. The caller decides whether issues are fatal.
pub struct Resolution {
    pub slug: String,
    pub body: String,
    pub issues: Vec<Issue>,
}

impl<'a> Resolver<'a> {
    pub fn new(graph: &'a ContentGraph) -> Resolver<'a> {
        let mut basenames: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for slug in graph.posts.keys() {
            let base = slug.rsplit('/').next().unwrap_or(slug.as_str());
            basenames.entry(base).or_default().push(slug.as_str());
        }
        Resolver {
            graph,
            basenames,
            // Both patterns are compile-time constants; they can't fail
            // to compile at runtime.
            marker: Regex::new(MARKER).unwrap(),
            opener: Regex::new(OPENER).unwrap(),
        }
    }

    /// Resolves every included post in parallel. The slug map is only
    /// read, and each post's rewrite lands in its own [`Resolution`],
    /// so no synchronization is needed. Results come back in slug
    /// order.
    pub fn resolve_all(&self) -> Vec<Resolution> {
        self.graph
            .posts
            .par_iter()
            .map(|(_, post)| self.resolve(post))
            .collect()
    }

    /// Rewrites one post's markers. Unresolvable markers become
    /// [`INERT_HREF`] in the rewritten body; the caller promotes the
    /// accompanying issues to errors in strict mode.
    pub fn resolve(&self, post: &Post) -> Resolution {
        let body = &post.body;
        let mut out = String::with_capacity(body.len());
        let mut issues = Vec::new();
        let mut matched: Vec<(usize, usize)> = Vec::new();
        let mut last = 0;

        for caps in self.marker.captures_iter(body) {
            let span = match caps.get(0) {
                Some(m) => m,
                None => continue, // group 0 always exists
            };
            matched.push((span.start(), span.end()));
            out.push_str(&body[last..span.start()]);

            let target = &caps[1];
            match self.lookup(target) {
                Lookup::Found(slug) => {
                    out.push_str(&Post::page_href(&slug))
                }
                Lookup::Draft(slug) => {
                    issues.push(Issue {
                        source: post.source_path.clone(),
                        kind: IssueKind::DraftTarget {
                            target: target.to_owned(),
                            slug: slug.to_owned(),
                        },
                    });
                    out.push_str(INERT_HREF);
                }
                Lookup::Ambiguous(candidates) => {
                    issues.push(Issue {
                        source: post.source_path.clone(),
                        kind: IssueKind::Ambiguous {
                            target: target.to_owned(),
                            candidates,
                        },
                    });
                    out.push_str(INERT_HREF);
                }
                Lookup::Missing => {
                    issues.push(Issue {
                        source: post.source_path.clone(),
                        kind: IssueKind::Unresolved {
                            target: target.to_owned(),
                        },
                    });
                    out.push_str(INERT_HREF);
                }
            }
            last = span.end();
        }
        out.push_str(&body[last..]);

        // A ref-shaped opener that the grammar didn't match is a typo in
        // the marker itself (unclosed quote, missing `>}}`), which would
        // otherwise ship as literal text.
        for m in self.opener.find_iter(body) {
            let in_marker = matched
                .iter()
                .any(|&(start, end)| m.start() >= start && m.start() < end);
            if !in_marker {
                issues.push(Issue {
                    source: post.source_path.clone(),
                    kind: IssueKind::MalformedMarker {
                        line: line_of(body, m.start()),
                    },
                });
            }
        }

        Resolution {
            slug: post.slug.clone(),
            body: out,
            issues,
        }
    }

    fn lookup(&self, target: &str) -> Lookup {
        let normalized = normalize_target(target);

        if self.graph.posts.contains_key(&normalized) {
            return Lookup::Found(normalized);
        }
        if self.graph.draft_slugs.contains(&normalized) {
            return Lookup::Draft(normalized);
        }

        // Short form: match on the final path segment when unambiguous.
        if !normalized.contains('/') {
            if let Some(slugs) = self.basenames.get(normalized.as_str()) {
                return match slugs.as_slice() {
                    [only] => Lookup::Found((*only).to_owned()),
                    many => Lookup::Ambiguous(
                        many.iter().map(|s| (*s).to_owned()).collect(),
                    ),
                };
            }
            if let Some(draft) = self
                .graph
                .draft_slugs
                .iter()
                .find(|s| s.rsplit('/').next() == Some(normalized.as_str()))
            {
                return Lookup::Draft(draft.clone());
            }
        }
        Lookup::Missing
    }
}

enum Lookup {
    Found(String),
    Draft(String),
    Ambiguous(Vec<String>),
    Missing,
}

/// Reduces a marker target to slug form: relative-path noise and the
/// `.md` extension are dropped, then each component is slugified the
/// same way the parser slugifies file paths.
fn normalize_target(target: &str) -> String {
    let target = target.trim();
    let target = target.strip_prefix("./").unwrap_or(target);
    let target = target.strip_prefix('/').unwrap_or(target);
    let target = target.strip_suffix(".md").unwrap_or(target);
    target
        .split('/')
        .filter(|part| !part.is_empty())
        .map(slug::slugify)
        .collect::<Vec<_>>()
        .join("/")
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

/// One problem found while resolving a single post.
#[derive(Debug)]
pub struct Issue {
    /// The post the marker appears in.
    pub source: PathBuf,
    pub kind: IssueKind,
}

#[derive(Debug)]
pub enum IssueKind {
    /// The target matches no post in the build.
    Unresolved { target: String },

    /// The target is a draft excluded from this build. Distinguished
    /// from [`IssueKind::Unresolved`] so the author can tell policy
    /// from typo.
    DraftTarget { target: String, slug: String },

    /// The short-form target matches more than one post.
    Ambiguous {
        target: String,
        candidates: Vec<String>,
    },

    /// A `{{< ref` opener that doesn't parse as a marker.
    MalformedMarker { line: usize },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            IssueKind::Unresolved { target } => write!(
                f,
                "`{}`: reference `{}` does not match any post",
                self.source.display(),
                target
            ),
            IssueKind::DraftTarget { target, slug } => write!(
                f,
                "`{}`: reference `{}` resolves to draft `{}`, which is excluded from this build",
                self.source.display(),
                target,
                slug
            ),
            IssueKind::Ambiguous { target, candidates } => write!(
                f,
                "`{}`: reference `{}` is ambiguous (candidates: {})",
                self.source.display(),
                target,
                candidates.join(", ")
            ),
            IssueKind::MalformedMarker { line } => write!(
                f,
                "`{}`: malformed reference marker at line {}",
                self.source.display(),
                line
            ),
        }
    }
}

/// The fatal form of reference issues, produced in strict mode. Carries
/// every issue found in the pass so one invocation reports them all.
#[derive(Debug)]
pub struct Error(pub Vec<Issue>);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{} unresolved reference(s):", self.0.len())?;
        for issue in &self.0 {
            writeln!(f, "  {}", issue)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::testutil::post;

    fn graph_of(posts: Vec<crate::post::Post>, drafts: bool) -> ContentGraph {
        let (graph, _) = ContentGraph::build(posts, drafts).unwrap();
        graph
    }

    fn resolve_one(graph: &ContentGraph, slug: &str) -> Resolution {
        let resolver = Resolver::new(graph);
        resolver.resolve(graph.post(slug).unwrap())
    }

    #[test]
    fn test_resolves_exact_slug() {
        let mut a = post("a", "2021-01-01");
        a.body = r#"see [b]({{< ref "b" >}})"#.to_owned();
        let graph = graph_of(vec![a, post("b", "2020-01-01")], false);

        let resolution = resolve_one(&graph, "a");
        assert_eq!(resolution.body, "see [b](/posts/b.html)");
        assert!(resolution.issues.is_empty());
    }

    #[test]
    fn test_resolves_path_with_extension() {
        let mut a = post("a", "2021-01-01");
        a.body = r#"[x]({{< ref "./dotnet/Options Pattern.md" >}})"#.to_owned();
        let graph = graph_of(
            vec![a, post("dotnet/options-pattern", "2020-01-01")],
            false,
        );

        let resolution = resolve_one(&graph, "a");
        assert_eq!(
            resolution.body,
            "[x](/posts/dotnet/options-pattern.html)"
        );
        assert!(resolution.issues.is_empty());
    }

    #[test]
    fn test_resolves_unique_basename() {
        let mut a = post("a", "2021-01-01");
        a.body = r#"{{< ref "options-pattern" >}}"#.to_owned();
        let graph = graph_of(
            vec![a, post("dotnet/options-pattern", "2020-01-01")],
            false,
        );

        let resolution = resolve_one(&graph, "a");
        assert_eq!(resolution.body, "/posts/dotnet/options-pattern.html");
    }

    #[test]
    fn test_ambiguous_basename() {
        let mut a = post("a", "2021-01-01");
        a.body = r#"{{< ref "intro" >}}"#.to_owned();
        let graph = graph_of(
            vec![
                a,
                post("dotnet/intro", "2020-01-01"),
                post("caching/intro", "2020-02-01"),
            ],
            false,
        );

        let resolution = resolve_one(&graph, "a");
        assert_eq!(resolution.body, INERT_HREF);
        assert!(matches!(
            resolution.issues[0].kind,
            IssueKind::Ambiguous { .. }
        ));
    }

    #[test]
    fn test_broken_reference_becomes_inert_with_issue() {
        let mut a = post("a", "2021-01-01");
        a.body = r#"[gone]({{< ref "no-such-post" >}})"#.to_owned();
        let graph = graph_of(vec![a], false);

        let resolution = resolve_one(&graph, "a");
        assert_eq!(resolution.body, format!("[gone]({})", INERT_HREF));
        match &resolution.issues[0].kind {
            IssueKind::Unresolved { target } => {
                assert_eq!(target, "no-such-post")
            }
            other => panic!("expected Unresolved, got {:?}", other),
        }
        // The issue names the source file for the author.
        assert_eq!(
            resolution.issues[0].source,
            std::path::PathBuf::from("posts/a.md")
        );
    }

    #[test]
    fn test_reference_to_excluded_draft() {
        let mut a = post("a", "2021-01-01");
        a.body = r#"{{< ref "wip" >}}"#.to_owned();
        let mut draft = post("wip", "2020-01-01");
        draft.draft = true;
        let graph = graph_of(vec![a, draft], false);

        let resolution = resolve_one(&graph, "a");
        assert_eq!(resolution.body, INERT_HREF);
        assert!(matches!(
            resolution.issues[0].kind,
            IssueKind::DraftTarget { .. }
        ));
    }

    #[test]
    fn test_reference_to_included_draft_resolves() {
        let mut a = post("a", "2021-01-01");
        a.body = r#"{{< ref "wip" >}}"#.to_owned();
        let mut draft = post("wip", "2020-01-01");
        draft.draft = true;
        let graph = graph_of(vec![a, draft], true);

        let resolution = resolve_one(&graph, "a");
        assert_eq!(resolution.body, "/posts/wip.html");
        assert!(resolution.issues.is_empty());
    }

    #[test]
    fn test_malformed_marker() {
        let mut a = post("a", "2021-01-01");
        a.body = "line one\n{{< ref \"broken\" >}\n".to_owned();
        let graph = graph_of(vec![a], false);

        let resolution = resolve_one(&graph, "a");
        match &resolution.issues[0].kind {
            IssueKind::MalformedMarker { line } => assert_eq!(*line, 2),
            other => panic!("expected MalformedMarker, got {:?}", other),
        }
    }

    #[test]
    fn test_foreign_shortcode_left_alone() {
        let mut a = post("a", "2021-01-01");
        a.body = "{{< youtube abc123 >}}".to_owned();
        let graph = graph_of(vec![a], false);

        let resolution = resolve_one(&graph, "a");
        assert_eq!(resolution.body, "{{< youtube abc123 >}}");
        assert!(resolution.issues.is_empty());
    }

    #[test]
    fn test_resolve_all_in_slug_order() {
        let mut a = post("a", "2021-01-01");
        a.body = r#"{{< ref "b" >}}"#.to_owned();
        let b = post("b", "2020-01-01");
        let graph = graph_of(vec![a, b], false);

        let resolutions = Resolver::new(&graph).resolve_all();
        let slugs: Vec<&str> =
            resolutions.iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(slugs, vec!["a", "b"]);
        assert_eq!(resolutions[0].body, "/posts/b.html");
    }
}
