//! Registry resolving a tag and observed length to a description.
//!
//! Registration happens on a [`RegistryBuilder`], which is consumed into an
//! immutable [`HandlerRegistry`]. The registry is cheap to clone and can be shared
//! between threads; nothing can be registered once it is built.

use std::{
    ffi::OsStr,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use indexmap::IndexMap;
use libloading::Library;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::{
    cursor::ByteCursor,
    description::Program,
    error::{Error, Result},
    handler::{DescriptionHandler, TreHandler},
    provider::{
        is_shared_library, CatalogProvider, HandlerProvider, LibraryProvider, CATALOG_EXTENSION,
    },
    read::ParseOptions,
    tre::Tre,
};

/// Environment variable naming a directory of handler modules
pub const PLUGIN_PATH_VAR: &str = "NITF_PLUGIN_PATH";

/// Data length a description applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpectedLength {
    Exact(usize),

    /// Used when no exact length matches
    Any,
}

impl fmt::Display for ExpectedLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedLength::Exact(n) => write!(f, "{n}"),
            ExpectedLength::Any => write!(f, "*"),
        }
    }
}

/// One description registered for a tag
#[derive(Debug, Clone)]
pub struct Candidate {
    pub program: Arc<Program>,
    pub length: ExpectedLength,
}

#[derive(Debug, Clone)]
struct Registration {
    candidates: Vec<Candidate>,
    handler: Arc<dyn TreHandler>,
}

impl Default for Registration {
    fn default() -> Self {
        Self {
            candidates: Vec::new(),
            handler: Arc::new(DescriptionHandler),
        }
    }
}

/// Outcome of loading a directory of handler modules
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Modules loaded, with the tags each registered
    pub loaded: Vec<(PathBuf, Vec<String>)>,

    /// Files that are neither catalogs nor shared libraries
    pub skipped: Vec<PathBuf>,

    /// Modules that failed; none of their tags were registered
    pub failed: Vec<(PathBuf, Error)>,
}

/// Mutable registration phase of a [`HandlerRegistry`]
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registrations: IndexMap<String, Registration>,
    libraries: Vec<(PathBuf, Library)>,
    options: ParseOptions,
}

fn add_candidate(
    registrations: &mut IndexMap<String, Registration>,
    tag: &str,
    candidate: Candidate,
) -> Result<()> {
    let registration = registrations.entry(tag.to_owned()).or_default();
    if registration
        .candidates
        .iter()
        .any(|c| c.length == candidate.length)
    {
        return Err(Error::DuplicateCandidate {
            tag: tag.to_owned(),
            length: candidate.length.to_string(),
        });
    }
    debug!(
        "registered {tag} description {} for length {}",
        candidate.program.name(),
        candidate.length
    );
    registration.candidates.push(candidate);
    Ok(())
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options the built registry parses with
    pub fn options(&mut self, options: ParseOptions) -> &mut Self {
        self.options = options;
        self
    }

    /// Add a description for `tag`
    ///
    /// A tag may have any number of descriptions with distinct exact lengths and at
    /// most one [`ExpectedLength::Any`].
    pub fn register(
        &mut self,
        tag: &str,
        program: impl Into<Arc<Program>>,
        length: ExpectedLength,
    ) -> Result<&mut Self> {
        add_candidate(
            &mut self.registrations,
            tag,
            Candidate {
                program: program.into(),
                length,
            },
        )?;
        Ok(self)
    }

    /// Replace the read/write entry points used for `tag`
    pub fn register_handler(&mut self, tag: &str, handler: Arc<dyn TreHandler>) -> &mut Self {
        self.registrations.entry(tag.to_owned()).or_default().handler = handler;
        self
    }

    /// Register everything a provider offers, or nothing if any part conflicts
    #[instrument(skip_all, fields(provider = provider.name()), err)]
    pub fn register_provider(&mut self, provider: &dyn HandlerProvider) -> Result<Vec<String>> {
        let provided = provider.provide()?;

        let mut staged = self.registrations.clone();
        let mut tags = Vec::with_capacity(provided.len());
        for handler in provided {
            for candidate in handler.candidates {
                add_candidate(&mut staged, &handler.tag, candidate)?;
            }
            if let Some(custom) = handler.handler {
                staged.entry(handler.tag.clone()).or_default().handler = custom;
            }
            tags.push(handler.tag);
        }

        self.registrations = staged;
        Ok(tags)
    }

    /// Register the descriptions in catalog text
    pub fn load_catalog(&mut self, source: &str, text: &str) -> Result<Vec<String>> {
        self.register_provider(&CatalogProvider::new(source, text))
    }

    /// Load one `.catalog` file or shared library
    #[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
    pub fn load_module(&mut self, path: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = path.as_ref();
        if path.extension() == Some(OsStr::new(CATALOG_EXTENSION)) {
            return self.register_provider(&CatalogProvider::from_file(path)?);
        }
        if is_shared_library(path) {
            let provider = LibraryProvider::open(path)?;
            let tags = self.register_provider(&provider)?;
            self.libraries.push(provider.into_parts());
            return Ok(tags);
        }
        Err(Error::ModuleLoad {
            path: path.to_path_buf(),
            reason: "not a catalog or shared library".into(),
        })
    }

    /// Load every module in a directory
    ///
    /// A module that fails to load is logged and recorded in the report, and loading
    /// continues with the next one.
    #[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
    pub fn load_directory(&mut self, path: impl AsRef<Path>) -> Result<LoadReport> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(Error::ModuleLoad {
                path: path.to_path_buf(),
                reason: "not a directory".into(),
            });
        }

        let mut report = LoadReport::default();
        for entry in WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let failed = e.path().unwrap_or(path).to_path_buf();
                    warn!("unable to read {}: {e}", failed.display());
                    report.failed.push((
                        failed.clone(),
                        Error::ModuleLoad {
                            path: failed,
                            reason: e.to_string(),
                        },
                    ));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let file = entry.path();
            let is_module = file.extension() == Some(OsStr::new(CATALOG_EXTENSION))
                || is_shared_library(file);
            if !is_module {
                debug!("skipping {}", file.display());
                report.skipped.push(file.to_path_buf());
                continue;
            }

            match self.load_module(file) {
                Ok(tags) => {
                    info!("loaded {} ({})", file.display(), tags.join(", "));
                    report.loaded.push((file.to_path_buf(), tags));
                }
                Err(e) => {
                    warn!("skipping module {}: {e}", file.display());
                    report.failed.push((file.to_path_buf(), e));
                }
            }
        }

        Ok(report)
    }

    /// Load the directory named by `NITF_PLUGIN_PATH`, if it is set
    pub fn load_env_plugin_path(&mut self) -> Result<Option<LoadReport>> {
        match std::env::var_os(PLUGIN_PATH_VAR) {
            Some(dir) if !dir.is_empty() => self.load_directory(PathBuf::from(dir)).map(Some),
            _ => {
                debug!("{PLUGIN_PATH_VAR} is not set");
                Ok(None)
            }
        }
    }

    /// Freeze the registrations
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            shared: Arc::new(Shared {
                registrations: self.registrations,
                options: self.options,
                libraries: self.libraries,
            }),
        }
    }
}

#[derive(Debug)]
struct Shared {
    registrations: IndexMap<String, Registration>,
    options: ParseOptions,
    // kept loaded for as long as the registry lives
    libraries: Vec<(PathBuf, Library)>,
}

/// Read-only mapping of tags to descriptions and handlers
///
/// ```
/// # fn doit() -> nitf_tre::error::Result<()> {
/// use std::io::Cursor;
/// use nitf_tre::HandlerRegistry;
///
/// let mut builder = HandlerRegistry::builder();
/// builder.load_catalog(
///     "inline",
///     r#"@tre BGDIM
///        {NITF_BCS_N, 5, "Width", "BGWIDTH"},
///        {NITF_BCS_N, 5, "Height", "BGHEIGHT"},
///        {NITF_END, 0, NULL, NULL}"#,
/// )?;
/// let registry = builder.build();
///
/// let tre = registry.read_tre("BGDIM", 10, &mut Cursor::new(b"0102400768"))?;
/// assert_eq!(tre.get("BGWIDTH").and_then(|f| f.to_integer()), Some(1024));
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct HandlerRegistry {
    shared: Arc<Shared>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        RegistryBuilder::new().build()
    }
}

impl HandlerRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn options(&self) -> &ParseOptions {
        &self.shared.options
    }

    /// Number of registered tags
    pub fn len(&self) -> usize {
        self.shared.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.shared.registrations.keys().map(String::as_str)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.shared.registrations.contains_key(tag)
    }

    /// Shared libraries held open by this registry
    pub fn modules(&self) -> impl Iterator<Item = &Path> {
        self.shared.libraries.iter().map(|(path, _)| path.as_path())
    }

    pub fn candidates(&self, tag: &str) -> Option<&[Candidate]> {
        self.shared
            .registrations
            .get(tag)
            .map(|r| r.candidates.as_slice())
    }

    /// Handler for `tag`, the description interpreter unless one was registered
    pub fn handler(&self, tag: &str) -> Arc<dyn TreHandler> {
        self.shared
            .registrations
            .get(tag)
            .map(|r| r.handler.clone())
            .unwrap_or_else(|| Arc::new(DescriptionHandler))
    }

    /// Pick the description for `tag` given the length of its data
    ///
    /// An exact length match wins, then the candidate registered for any length.
    pub fn resolve(&self, tag: &str, observed_length: usize) -> Result<Arc<Program>> {
        let candidates = self.candidates(tag).unwrap_or_default();
        candidates
            .iter()
            .find(|c| c.length == ExpectedLength::Exact(observed_length))
            .or_else(|| candidates.iter().find(|c| c.length == ExpectedLength::Any))
            .map(|c| c.program.clone())
            .ok_or_else(|| Error::UnknownTre {
                tag: tag.to_owned(),
                length: observed_length,
            })
    }

    /// Description for `tag` by name, or its first description
    pub fn description(&self, tag: &str, name: Option<&str>) -> Result<Arc<Program>> {
        let candidates = self.candidates(tag).unwrap_or_default();
        candidates
            .iter()
            .find(|c| name.map_or(true, |name| c.program.name() == name))
            .map(|c| c.program.clone())
            .ok_or_else(|| {
                Error::CustomError(match name {
                    Some(name) => format!("{tag} has no description named {name}"),
                    None => format!("{tag} has no descriptions"),
                })
            })
    }

    /// Parse `length` bytes of `tag` data at the cursor
    ///
    /// On success the cursor is at the end of the data. An unknown tag leaves the
    /// cursor untouched.
    #[instrument(skip(self, cursor), err)]
    pub fn read_tre(&self, tag: &str, length: usize, cursor: &mut dyn ByteCursor) -> Result<Tre> {
        let program = self.resolve(tag, length)?;
        let handler = self.handler(tag);
        let outcome = handler.read(&program, tag, cursor, length, self.options())?;
        Ok(Tre::from_parts(tag, program, handler, outcome.fields))
    }

    /// Start an empty TRE for `tag` against a named or default description
    pub fn new_tre(&self, tag: &str, description: Option<&str>) -> Result<Tre> {
        let program = self.description(tag, description)?;
        Ok(Tre::from_parts(
            tag,
            program,
            self.handler(tag),
            Default::default(),
        ))
    }
}
