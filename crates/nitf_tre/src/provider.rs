//! Sources of handlers: catalog text and dynamically loaded modules.

use std::{
    ffi::{c_char, CStr, OsStr},
    path::{Path, PathBuf},
    sync::Arc,
};

use libloading::{Library, Symbol};
use tracing::debug;

use crate::{
    catalog,
    error::{Error, Result},
    handler::TreHandler,
    registry::Candidate,
};

/// File extension of catalog text files in a handler directory
pub const CATALOG_EXTENSION: &str = "catalog";

/// Everything a provider contributes for one tag
#[derive(Debug, Clone)]
pub struct ProvidedHandler {
    pub tag: String,
    pub candidates: Vec<Candidate>,

    /// Replaces the description interpreter for this tag when set
    pub handler: Option<Arc<dyn TreHandler>>,
}

/// A discovered source of handlers
pub trait HandlerProvider {
    /// Name used in logs and errors
    fn name(&self) -> String;

    fn provide(&self) -> Result<Vec<ProvidedHandler>>;
}

fn from_catalogs(catalogs: Vec<catalog::TreCatalog>) -> Vec<ProvidedHandler> {
    catalogs
        .into_iter()
        .map(|c| ProvidedHandler {
            tag: c.tag,
            candidates: c.candidates,
            handler: None,
        })
        .collect()
}

/// Provider backed by catalog text
#[derive(Debug, Clone)]
pub struct CatalogProvider {
    source: String,
    text: String,
}

impl CatalogProvider {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::ModuleLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(path.display().to_string(), text))
    }
}

impl HandlerProvider for CatalogProvider {
    fn name(&self) -> String {
        self.source.clone()
    }

    fn provide(&self) -> Result<Vec<ProvidedHandler>> {
        catalog::parse(&self.source, &self.text).map(from_catalogs)
    }
}

type InitFn = unsafe extern "C" fn() -> *const c_char;

/// Whether `path` looks like a shared library for this platform
pub fn is_shared_library(path: &Path) -> bool {
    path.extension() == Some(OsStr::new(std::env::consts::DLL_EXTENSION))
}

/// Provider backed by a shared library
///
/// A module named `libACFTA.so` (or `ACFTA.dll`) exports
/// `extern "C" fn ACFTA_init() -> *const c_char`, returning NUL-terminated catalog
/// text that stays valid while the library is loaded.
#[derive(Debug)]
pub struct LibraryProvider {
    path: PathBuf,
    library: Library,
}

impl LibraryProvider {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        // SAFETY: loading runs the library's initializers; handler directories are
        // trusted configuration.
        let library = unsafe { Library::new(&path) }.map_err(|e| Error::ModuleLoad {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        debug!("opened {}", path.display());
        Ok(Self { path, library })
    }

    /// Name of the exported initialization function
    pub fn init_symbol(&self) -> String {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default();
        let stem = stem.strip_prefix("lib").unwrap_or(&stem);
        format!("{stem}_init")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, reason: impl ToString) -> Error {
        Error::ModuleLoad {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn catalog_text(&self) -> Result<String> {
        let symbol = self.init_symbol();
        // SAFETY: the init function takes no arguments and returns either null or a
        // pointer to a NUL-terminated string owned by the library.
        unsafe {
            let init: Symbol<InitFn> = self
                .library
                .get(symbol.as_bytes())
                .map_err(|e| self.error(format!("{symbol} not found: {e}")))?;
            let text = init();
            if text.is_null() {
                return Err(self.error(format!("{symbol} returned no catalog")));
            }
            Ok(CStr::from_ptr(text).to_string_lossy().into_owned())
        }
    }

    pub(crate) fn into_parts(self) -> (PathBuf, Library) {
        (self.path, self.library)
    }
}

impl HandlerProvider for LibraryProvider {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn provide(&self) -> Result<Vec<ProvidedHandler>> {
        let text = self.catalog_text()?;
        catalog::parse(&self.name(), &text).map(from_catalogs)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn catalog_provider_yields_handlers() -> Result<()> {
        let provider = CatalogProvider::new(
            "inline",
            r#"@tre NOTE
               {NITF_BCS_A, NITF_TRE_GOBBLE, "Text", "TEXT"},
               {NITF_END, 0, NULL, NULL}"#,
        );
        let handlers = provider.provide()?;
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].tag, "NOTE");
        assert!(handlers[0].handler.is_none());
        Ok(())
    }

    #[test]
    fn missing_library_is_a_load_error() {
        let result = LibraryProvider::open("/nonexistent/libNOPE.so");
        assert!(matches!(result, Err(Error::ModuleLoad { .. })));
    }

    #[test]
    fn recognizes_shared_libraries() {
        let name = format!("libACFTA.{}", std::env::consts::DLL_EXTENSION);
        assert!(is_shared_library(Path::new(&name)));
        assert!(!is_shared_library(Path::new("ACFTA.catalog")));
    }
}
