//! The `Fetcher` collaborator contract (component §6): resolves the URL on an
//! `xsl:include`/`xsl:import`/`document()` reference to its text content. Blocking, not
//! async -- the transform driver is single-threaded and cooperative only at these
//! points, so there's nothing for an executor to schedule around a synchronous read.

use crate::error::{XsltError, XsltResult};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub trait Fetcher {
    fn fetch(&self, url: &str) -> XsltResult<String>;

    /// Resolves `url` against the document that referenced it (`base`, that document's
    /// own URL) into the URL to actually fetch and cache by. The default treats `url`
    /// as already absolute and leaves it untouched; `FileFetcher` overrides this to
    /// join a relative `url` onto `base`'s own directory rather than a single
    /// process-wide base, so a chain of includes across subdirectories each resolves
    /// against its own referencing document.
    fn resolve(&self, base: Option<&str>, url: &str) -> String {
        let _ = base;
        url.to_string()
    }
}

/// Resolves URLs as filesystem paths relative to `base_dir`, the directory of the
/// stylesheet or document that referenced them. This is the only `Fetcher` the driver
/// ships; embedding hosts that need HTTP or a virtual filesystem provide their own.
pub struct FileFetcher {
    pub base_dir: PathBuf,
}

impl FileFetcher {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        FileFetcher {
            base_dir: base_dir.into(),
        }
    }

    /// `base` is the referencing document's own resolved URL, not a fixed directory --
    /// passing `None` falls back to `base_dir`, the behavior a top-level fetch wants.
    fn resolve_path(&self, base: Option<&str>, url: &str) -> PathBuf {
        let stripped = url.strip_prefix("file://").unwrap_or(url);
        let path = Path::new(stripped);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        let dir = base
            .and_then(|b| {
                let b_stripped = b.strip_prefix("file://").unwrap_or(b);
                Path::new(b_stripped).parent().map(|p| p.to_path_buf())
            })
            .unwrap_or_else(|| self.base_dir.clone());
        dir.join(path)
    }
}

impl Fetcher for FileFetcher {
    fn fetch(&self, url: &str) -> XsltResult<String> {
        let path = self.resolve_path(None, url);
        std::fs::read_to_string(&path).map_err(|e| XsltError::fetch(url, e))
    }

    fn resolve(&self, base: Option<&str>, url: &str) -> String {
        self.resolve_path(base, url).to_string_lossy().into_owned()
    }
}

/// Caches fetched text by URL for the duration of one run, per the fetch contract's
/// "cached by URL for one run" clause -- a stylesheet that `xsl:include`s the same file
/// from two branches only reads it once.
pub struct CachingFetcher<'f> {
    inner: &'f dyn Fetcher,
    cache: RefCell<HashMap<String, String>>,
}

impl<'f> CachingFetcher<'f> {
    pub fn new(inner: &'f dyn Fetcher) -> Self {
        CachingFetcher {
            inner,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn fetch(&self, url: &str) -> XsltResult<String> {
        if let Some(cached) = self.cache.borrow().get(url) {
            return Ok(cached.clone());
        }
        let text = self.inner.fetch(url)?;
        self.cache.borrow_mut().insert(url.to_string(), text.clone());
        Ok(text)
    }

    /// Resolves `url` against `base` first, then fetches/caches keyed by the resolved
    /// URL rather than the raw `href` -- two different documents' relative hrefs of the
    /// same text (e.g. both `"common.xsl"`) resolve to different absolute paths and must
    /// not collide in the cache. Returns the resolved URL alongside the text so the
    /// caller can use it as the base for that document's own nested includes.
    pub fn fetch_relative(&self, base: Option<&str>, url: &str) -> XsltResult<(String, String)> {
        let resolved = self.inner.resolve(base, url);
        if let Some(cached) = self.cache.borrow().get(&resolved) {
            return Ok((resolved, cached.clone()));
        }
        let text = self.inner.fetch(&resolved)?;
        self.cache.borrow_mut().insert(resolved.clone(), text.clone());
        Ok((resolved, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_fetcher_reads_relative_to_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("included.xsl"), "<a/>").unwrap();
        let fetcher = FileFetcher::new(dir.path());
        assert_eq!(fetcher.fetch("included.xsl").unwrap(), "<a/>");
    }

    #[test]
    fn file_fetcher_reports_missing_file_as_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FileFetcher::new(dir.path());
        let err = fetcher.fetch("missing.xsl").unwrap_err();
        assert!(matches!(err, XsltError::Fetch { .. }));
    }

    #[test]
    fn caching_fetcher_only_reads_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.xsl"), "<a/>").unwrap();
        let fetcher = FileFetcher::new(dir.path());
        let caching = CachingFetcher::new(&fetcher);
        assert_eq!(caching.fetch("a.xsl").unwrap(), "<a/>");
        std::fs::remove_file(dir.path().join("a.xsl")).unwrap();
        // Still served from cache even though the file is now gone.
        assert_eq!(caching.fetch("a.xsl").unwrap(), "<a/>");
    }
}
