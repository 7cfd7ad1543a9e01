//! Exports the [`build_site`] function which stitches together the
//! pipeline stages: parsing posts ([`crate::parser`]), aggregating the
//! content graph ([`crate::graph`]), resolving cross-references
//! ([`crate::xref`]), and rendering pages ([`crate::write`]). The two
//! stage barriers live here: the graph is built only after every file
//! has parsed, and resolution/rendering start only after the graph is
//! complete and immutable.
//!
//! Output is written to a staging directory beside the configured
//! output directory and atomically renamed into place on full success,
//! so a failed or cancelled build never leaves a half-updated site
//! live.

use crate::config::{self, Config};
use crate::graph::{self, ContentGraph};
use crate::parser::{self, Parser as PostParser};
use crate::report;
use crate::write::{self, Writer};
use crate::xref::{self, Resolver};
use gtmpl::Template;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Builds the site from a [`Config`] object. This calls into
/// [`PostParser::parse_posts`], [`ContentGraph::build`],
/// [`Resolver::resolve_all`], and [`Writer::write_site`] which do the
/// heavy lifting; this function owns stage ordering, warning output,
/// and the atomic publish.
pub fn build_site(config: &Config) -> Result<()> {
    let theme = config.load_theme()?;
    let posts_template = parse_template(
        theme.post_template.iter().map(|p| config.theme_dir.join(p)),
    )?;
    let index_template = parse_template(
        theme.index_template.iter().map(|p| config.theme_dir.join(p)),
    )?;

    // Stage 1: parse every source file (parallel per file). All
    // malformed files are reported together.
    let posts = PostParser::new(config)
        .parse_posts()
        .map_err(Error::Parse)?;
    report::info("parse", format!("{} posts", posts.len()));

    // Stage 2: the aggregation barrier. Duplicate slugs abort here;
    // everything downstream reads the finished graph immutably.
    let (mut graph, lints) = ContentGraph::build(posts, config.mode.drafts)?;
    for lint in &lints {
        report::warn(lint);
    }

    // Stage 3: resolve references (parallel per post). The resolver
    // only borrows the graph; bodies are swapped in afterwards.
    let resolutions = Resolver::new(&graph).resolve_all();
    let mut issues = Vec::new();
    for resolution in resolutions {
        issues.extend(resolution.issues);
        if let Some(post) = graph.posts.get_mut(&resolution.slug) {
            post.body = resolution.body;
        }
    }
    if !issues.is_empty() {
        if config.mode.strict {
            return Err(Error::Reference(xref::Error(issues)));
        }
        for issue in &issues {
            report::warn(issue);
        }
    }

    // Stage 4: render into staging, then publish.
    let staging = staging_dir(&config.output_dir)?;
    let writer = Writer {
        posts_template: &posts_template,
        index_template: &index_template,
        page_size: config.page_size,
        site_title: &config.site_title,
        author: config.author.as_ref(),
        base_url: &config.base_url,
        strict: config.mode.strict,
    };
    let warnings = writer.write_site(&graph, staging.path())?;
    for warning in &warnings {
        report::warn(warning);
    }
    report::info(
        "render",
        format!("{} posts, {} tags, {} series", graph.order.len(), graph.tags.len(), graph.series.len()),
    );

    let static_source = config.theme_dir.join("static");
    if static_source.is_dir() {
        copy_dir(&static_source, &staging.path().join("static"))?;
    }

    publish(staging, &config.output_dir)?;
    report::info(
        "build",
        format!("site published to `{}`", config.output_dir.display()),
    );
    Ok(())
}

// Loads the template file contents, concatenates them, and parses the
// result into a template.
fn parse_template<P: AsRef<Path>>(
    template_files: impl Iterator<Item = P>,
) -> Result<Template> {
    let mut contents = String::new();
    for template_file in template_files {
        let template_file = template_file.as_ref();
        contents.push_str(&fs::read_to_string(template_file).map_err(
            |err| Error::OpenTemplateFile {
                path: template_file.to_owned(),
                err,
            },
        )?);
        contents.push(' ');
    }

    let mut template = Template::default();
    template.parse(&contents).map_err(Error::ParseTemplate)?;
    Ok(template)
}

// The staging directory must live beside the output directory so the
// final rename stays on one filesystem.
fn staging_dir(output_dir: &Path) -> Result<tempfile::TempDir> {
    let parent = match output_dir.parent() {
        Some(p) if p != Path::new("") => p.to_owned(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;
    let staging = tempfile::Builder::new()
        .prefix(".stela-staging-")
        .tempdir_in(parent)?;
    Ok(staging)
}

fn publish(staging: tempfile::TempDir, output_dir: &Path) -> Result<()> {
    if output_dir.exists() {
        fs::remove_dir_all(output_dir).map_err(|err| Error::Clean {
            path: output_dir.to_owned(),
            err,
        })?;
    }
    // Detach the handle so the directory survives the rename.
    let staged = staging.into_path();
    fs::rename(&staged, output_dir)?;
    Ok(())
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &dst.join(entry.file_name()))?;
        } else {
            fs::copy(entry.path(), dst.join(entry.file_name()))?;
        }
    }
    Ok(())
}

type Result<T> = std::result::Result<T, Error>;

/// The error type for building a site. Each stage's failure keeps its
/// own variant so the binary can map error classes to exit codes.
#[derive(Debug)]
pub enum Error {
    /// Returned for configuration and theme-manifest problems.
    Config(config::Error),

    /// Returned when one or more source files fail to parse or
    /// validate. Carries every failure from the pass.
    Parse(Vec<parser::Error>),

    /// Returned for fatal aggregation errors (duplicate slugs).
    Graph(graph::Error),

    /// Returned in strict mode when references fail to resolve.
    Reference(xref::Error),

    /// Returned for errors while rendering and writing pages.
    Write(write::Error),

    /// Returned for I/O problems while opening template files.
    OpenTemplateFile { path: PathBuf, err: std::io::Error },

    /// Returned for errors parsing template files.
    ParseTemplate(String),

    /// Returned for I/O problems while replacing the previous output
    /// directory.
    Clean { path: PathBuf, err: std::io::Error },

    /// Returned for other I/O errors.
    Io(std::io::Error),
}

impl Error {
    /// The process exit code for this error class, stable for
    /// scripting: 2 parse/validation, 3 duplicate slug, 4 broken
    /// reference, 5 render failure, 1 anything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Parse(_) => 2,
            Error::Graph(graph::Error::DuplicateSlug { .. }) => 3,
            Error::Reference(_) => 4,
            Error::Write(write::Error::Render { .. }) => 5,
            _ => 1,
        }
    }
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Config(err) => err.fmt(f),
            Error::Parse(errors) => {
                writeln!(f, "{} file(s) failed to parse:", errors.len())?;
                for err in errors {
                    writeln!(f, "  {}", err)?;
                }
                Ok(())
            }
            Error::Graph(err) => err.fmt(f),
            Error::Reference(err) => err.fmt(f),
            Error::Write(err) => err.fmt(f),
            Error::OpenTemplateFile { path, err } => {
                write!(f, "opening template file `{}`: {}", path.display(), err)
            }
            Error::ParseTemplate(err) => err.fmt(f),
            Error::Clean { path, err } => {
                write!(f, "cleaning directory `{}`: {}", path.display(), err)
            }
            Error::Io(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(err) => Some(err),
            Error::Parse(_) => None,
            Error::Graph(err) => Some(err),
            Error::Reference(err) => Some(err),
            Error::Write(err) => Some(err),
            Error::OpenTemplateFile { path: _, err } => Some(err),
            Error::ParseTemplate(_) => None,
            Error::Clean { path: _, err } => Some(err),
            Error::Io(err) => Some(err),
        }
    }
}

impl From<config::Error> for Error {
    /// Converts [`config::Error`]s into [`Error`]. This allows us to
    /// use the `?` operator.
    fn from(err: config::Error) -> Error {
        Error::Config(err)
    }
}

impl From<graph::Error> for Error {
    /// Converts [`graph::Error`]s into [`Error`]. This allows us to use
    /// the `?` operator.
    fn from(err: graph::Error) -> Error {
        Error::Graph(err)
    }
}

impl From<write::Error> for Error {
    /// Converts [`write::Error`]s into [`Error`]. This allows us to use
    /// the `?` operator.
    fn from(err: write::Error) -> Error {
        Error::Write(err)
    }
}

impl From<std::io::Error> for Error {
    /// Converts [`std::io::Error`]s into [`Error`]. This allows us to
    /// use the `?` operator.
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;

    const POST_TEMPLATE: &str = "{{.item.title}}|{{.item.body}}";
    const INDEX_TEMPLATE: &str = "{{range .item}}{{.title}},{{end}}";

    fn scaffold(root: &Path) {
        fs::write(
            root.join("stela.toml"),
            "[site]\ntitle = \"Test Blog\"\nbase_url = \"https://example.org\"\n",
        )
        .unwrap();
        let theme = root.join("theme");
        fs::create_dir_all(&theme).unwrap();
        fs::write(
            theme.join("theme.toml"),
            "post_template = [\"post.html\"]\nindex_template = [\"index.html\"]\n",
        )
        .unwrap();
        fs::write(theme.join("post.html"), POST_TEMPLATE).unwrap();
        fs::write(theme.join("index.html"), INDEX_TEMPLATE).unwrap();
        fs::create_dir_all(root.join("posts")).unwrap();
    }

    fn add_post(root: &Path, rel: &str, frontmatter: &str, body: &str) {
        let path = root.join("posts").join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("+++\n{}+++\n{}", frontmatter, body))
            .unwrap();
    }

    fn load(root: &Path, mode: Mode) -> Config {
        Config::from_project_file(&root.join("stela.toml"), None, mode)
            .unwrap()
    }

    #[test]
    fn test_end_to_end_build() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        scaffold(root);
        add_post(
            root,
            "alpha.md",
            "title = \"Alpha\"\ndate = 2021-01-01\ntags = [\"Caching\"]\n",
            "see [beta]({{< ref \"beta\" >}})\n",
        );
        add_post(
            root,
            "beta.md",
            "title = \"Beta\"\ndate = 2020-01-01\ntags = [\"Caching\"]\n",
            "beta body\n",
        );
        add_post(
            root,
            "wip.md",
            "title = \"WIP\"\ndate = 2022-01-01\ndraft = true\n",
            "unfinished\n",
        );

        build_site(&load(root, Mode::default()))?;

        let out = root.join("public");
        let alpha = fs::read_to_string(out.join("posts/alpha.html")).unwrap();
        assert!(alpha.starts_with("Alpha|"));
        // The reference resolved to the target's page path.
        assert!(alpha.contains("/posts/beta.html"));
        // Draft posts never appear in default-mode output.
        assert!(!out.join("posts/wip.html").exists());

        let index = fs::read_to_string(out.join("index.html")).unwrap();
        assert_eq!(index, "Alpha,Beta,");
        let tag = fs::read_to_string(
            out.join("tags/caching/index.html"),
        )
        .unwrap();
        assert_eq!(tag, "Alpha,Beta,");

        // No staging residue beside the output directory.
        let residue = fs::read_dir(root)
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| {
                e.file_name().to_string_lossy().starts_with(".stela-staging-")
            });
        assert!(!residue);
        Ok(())
    }

    #[test]
    fn test_drafts_flag_includes_drafts() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        scaffold(root);
        add_post(
            root,
            "wip.md",
            "title = \"WIP\"\ndate = 2022-01-01\ndraft = true\ntags = [\"Caching\"]\n",
            "unfinished\n",
        );

        let mode = Mode {
            strict: false,
            drafts: true,
        };
        build_site(&load(root, mode))?;

        let out = root.join("public");
        assert!(out.join("posts/wip.html").exists());
        // Included drafts are reachable via the same indexing rules.
        let tag =
            fs::read_to_string(out.join("tags/caching/index.html")).unwrap();
        assert!(tag.contains("WIP"));
        Ok(())
    }

    #[test]
    fn test_broken_reference_strict_vs_permissive() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        scaffold(root);
        add_post(
            root,
            "alpha.md",
            "title = \"Alpha\"\ndate = 2021-01-01\n",
            "[gone]({{< ref \"no-such-post\" >}})\n",
        );

        let strict = Mode {
            strict: true,
            drafts: false,
        };
        let err = build_site(&load(root, strict)).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("no-such-post"));
        // A strict failure must not publish anything.
        assert!(!root.join("public").exists());

        build_site(&load(root, Mode::default())).unwrap();
        let alpha = fs::read_to_string(
            root.join("public/posts/alpha.html"),
        )
        .unwrap();
        assert!(alpha.contains("href=\"#\""));
    }

    #[test]
    fn test_duplicate_slug_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        scaffold(root);
        add_post(
            root,
            "alpha.md",
            "title = \"Alpha\"\ndate = 2021-01-01\n",
            "one\n",
        );
        add_post(
            root,
            "beta.md",
            "title = \"Beta\"\ndate = 2020-01-01\nslug = \"alpha\"\n",
            "two\n",
        );

        let err = build_site(&load(root, Mode::default())).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("alpha"));
    }

    #[test]
    fn test_parse_errors_exit_code_and_collection() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        scaffold(root);
        add_post(root, "bad-1.md", "date = 2021-01-01\n", "body\n");
        fs::write(root.join("posts/bad-2.md"), "no front matter\n").unwrap();

        let err = build_site(&load(root, Mode::default())).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        // Both failures show up in one report.
        let message = err.to_string();
        assert!(message.contains("bad-1.md"));
        assert!(message.contains("bad-2.md"));
    }

    #[test]
    fn test_rebuild_is_deterministic_and_replaces_output() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        scaffold(root);
        add_post(
            root,
            "alpha.md",
            "title = \"Alpha\"\ndate = 2021-01-01\n",
            "body *text*\n",
        );

        build_site(&load(root, Mode::default()))?;
        let first =
            fs::read(root.join("public/posts/alpha.html")).unwrap();
        build_site(&load(root, Mode::default()))?;
        let second =
            fs::read(root.join("public/posts/alpha.html")).unwrap();
        assert_eq!(first, second);
        Ok(())
    }
}
