//! Project configuration. A site is rooted wherever a `stela.toml` file
//! lives; [`Config::from_directory`] walks up from the invocation
//! directory until it finds one, so the tool can be run from anywhere
//! inside a project tree.

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// The project file name searched for by [`Config::from_directory`].
pub const PROJECT_FILE: &str = "stela.toml";

/// The manifest file expected inside the theme directory.
pub const THEME_FILE: &str = "theme.toml";

#[derive(Deserialize)]
struct ProjectFile {
    site: SiteSection,

    #[serde(default)]
    build: BuildSection,
}

#[derive(Deserialize)]
struct SiteSection {
    title: String,
    base_url: String,

    #[serde(default)]
    author: Option<Author>,
}

/// The site author, made available to templates.
#[derive(Deserialize, Clone, Debug)]
pub struct Author {
    pub name: String,

    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Deserialize)]
#[serde(default)]
struct BuildSection {
    content: PathBuf,
    output: PathBuf,
    theme: PathBuf,
    page_size: usize,
}

impl Default for BuildSection {
    fn default() -> Self {
        BuildSection {
            content: PathBuf::from("posts"),
            output: PathBuf::from("public"),
            theme: PathBuf::from("theme"),
            page_size: 10,
        }
    }
}

/// The theme manifest. Each template is a stack of files which are
/// concatenated in order and parsed as a single template, so themes can
/// share a base layout between the post and index templates.
#[derive(Deserialize)]
pub struct Theme {
    pub post_template: Vec<PathBuf>,
    pub index_template: Vec<PathBuf>,
}

/// Build-mode switches set from the command line.
#[derive(Clone, Copy, Default)]
pub struct Mode {
    /// Promote broken references, malformed markers, and render
    /// failures from warnings to fatal errors.
    pub strict: bool,

    /// Include posts marked `draft = true` in the output.
    pub drafts: bool,
}

/// Fully-resolved build configuration. All paths are absolute or
/// relative to the invocation directory, never to the project file.
pub struct Config {
    pub site_title: String,
    pub author: Option<Author>,

    /// The site root URL. Always ends with a trailing slash so that
    /// [`Url::join`] treats it as a directory.
    pub base_url: Url,

    pub content_dir: PathBuf,
    pub output_dir: PathBuf,
    pub theme_dir: PathBuf,

    /// Posts per index page.
    pub page_size: usize,

    pub mode: Mode,
}

impl Config {
    /// Searches `dir` and its ancestors for a [`PROJECT_FILE`] and loads
    /// it. `output_override` replaces the configured output directory
    /// (the CLI's `--out`).
    pub fn from_directory(
        dir: &Path,
        output_override: Option<PathBuf>,
        mode: Mode,
    ) -> Result<Config> {
        let path = dir.join(PROJECT_FILE);
        if path.is_file() {
            Config::from_project_file(&path, output_override, mode)
        } else {
            match dir.parent() {
                Some(parent) => {
                    Config::from_directory(parent, output_override, mode)
                }
                None => Err(Error::ProjectFileNotFound),
            }
        }
    }

    /// Loads configuration from a specific project file path.
    pub fn from_project_file(
        path: &Path,
        output_override: Option<PathBuf>,
        mode: Mode,
    ) -> Result<Config> {
        let raw = fs::read_to_string(path).map_err(|err| Error::Io {
            path: path.to_owned(),
            err,
        })?;
        let project: ProjectFile =
            toml::from_str(&raw).map_err(|err| Error::Toml {
                path: path.to_owned(),
                err,
            })?;
        let root = path
            .parent()
            .ok_or_else(|| Error::NoProjectRoot(path.to_owned()))?;

        Ok(Config {
            site_title: project.site.title,
            author: project.site.author,
            base_url: parse_base_url(&project.site.base_url)?,
            content_dir: root.join(project.build.content),
            output_dir: output_override
                .unwrap_or_else(|| root.join(&project.build.output)),
            theme_dir: root.join(project.build.theme),
            page_size: project.build.page_size.max(1),
            mode,
        })
    }

    /// Loads the theme manifest from `{theme_dir}/theme.toml`.
    pub fn load_theme(&self) -> Result<Theme> {
        let path = self.theme_dir.join(THEME_FILE);
        let raw = fs::read_to_string(&path).map_err(|err| Error::Io {
            path: path.clone(),
            err,
        })?;
        let theme: Theme =
            toml::from_str(&raw).map_err(|err| Error::Toml { path, err })?;
        Ok(theme)
    }
}

// `Url::join` treats a base without a trailing slash as a file and
// replaces its last segment, so the slash is not cosmetic.
fn parse_base_url(raw: &str) -> Result<Url> {
    let mut normalized = raw.to_owned();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized).map_err(Error::BaseUrl)
}

/// The result of a configuration-loading operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error loading project configuration.
#[derive(Debug)]
pub enum Error {
    /// Returned when no `stela.toml` exists in the invocation directory
    /// or any of its ancestors.
    ProjectFileNotFound,

    /// Returned when the project file path has no parent directory.
    NoProjectRoot(PathBuf),

    /// Returned for I/O problems reading a configuration file.
    Io { path: PathBuf, err: std::io::Error },

    /// Returned when a configuration file is not valid TOML or is
    /// missing required keys.
    Toml {
        path: PathBuf,
        err: toml::de::Error,
    },

    /// Returned when `site.base_url` is not a valid absolute URL.
    BaseUrl(url::ParseError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ProjectFileNotFound => write!(
                f,
                "could not find `{}` in any parent directory",
                PROJECT_FILE
            ),
            Error::NoProjectRoot(path) => write!(
                f,
                "can't determine project root for `{}`",
                path.display()
            ),
            Error::Io { path, err } => {
                write!(f, "reading `{}`: {}", path.display(), err)
            }
            Error::Toml { path, err } => {
                write!(f, "parsing `{}`: {}", path.display(), err)
            }
            Error::BaseUrl(err) => write!(f, "invalid site.base_url: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ProjectFileNotFound => None,
            Error::NoProjectRoot(_) => None,
            Error::Io { path: _, err } => Some(err),
            Error::Toml { path: _, err } => Some(err),
            Error::BaseUrl(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = r#"
        [site]
        title = "Example"
        base_url = "https://example.org/blog"

        [build]
        page_size = 5
    "#;

    #[test]
    fn test_from_project_file() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROJECT_FILE);
        fs::write(&path, PROJECT).unwrap();

        let config = Config::from_project_file(&path, None, Mode::default())?;
        assert_eq!(config.site_title, "Example");
        // The missing trailing slash must be restored; otherwise join()
        // would drop the `blog` segment.
        assert_eq!(config.base_url.as_str(), "https://example.org/blog/");
        assert_eq!(config.page_size, 5);
        assert_eq!(config.content_dir, dir.path().join("posts"));
        assert_eq!(config.output_dir, dir.path().join("public"));
        Ok(())
    }

    #[test]
    fn test_from_directory_walks_up() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PROJECT_FILE), PROJECT).unwrap();
        let nested = dir.path().join("posts").join("dotnet");
        fs::create_dir_all(&nested).unwrap();

        let config = Config::from_directory(&nested, None, Mode::default())?;
        assert_eq!(config.site_title, "Example");
        Ok(())
    }

    #[test]
    fn test_output_override() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROJECT_FILE);
        fs::write(&path, PROJECT).unwrap();

        let config = Config::from_project_file(
            &path,
            Some(PathBuf::from("/tmp/site-out")),
            Mode::default(),
        )?;
        assert_eq!(config.output_dir, PathBuf::from("/tmp/site-out"));
        Ok(())
    }

    #[test]
    fn test_missing_site_section_is_toml_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROJECT_FILE);
        fs::write(&path, "[build]\npage_size = 3\n").unwrap();

        match Config::from_project_file(&path, None, Mode::default()) {
            Err(Error::Toml { .. }) => {}
            Err(other) => panic!("expected Toml error, got {}", other),
            Ok(_) => panic!("expected Toml error, got Ok"),
        }
    }
}
