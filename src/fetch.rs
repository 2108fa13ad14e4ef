//! Fetchers used by the binary: over HTTP, or from a site directory on disk.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use pagekit_core_types::{FetchResponse, Fetcher, PageError};
use tracing::debug;
use url::Url;

/// Fetches over HTTP. With a base, every request keeps its path and query
/// but goes to the base origin instead.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base: Option<Url>,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base: None,
        }
    }

    pub fn with_base(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }

    fn target(&self, url: &str) -> Result<Url, PageError> {
        let requested = Url::parse(url).map_err(|err| PageError::fetch(url, err.to_string()))?;
        match &self.base {
            None => Ok(requested),
            Some(base) => rebase(base, &requested).map_err(|reason| PageError::fetch(url, reason)),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn rebase(base: &Url, requested: &Url) -> Result<Url, String> {
    let mut target = base.join(requested.path()).map_err(|err| err.to_string())?;
    target.set_query(requested.query());
    Ok(target)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, PageError> {
        let target = self.target(url)?;
        debug!(url = %target, "http fetch");
        let response = self
            .client
            .get(target.clone())
            .send()
            .await
            .map_err(|err| PageError::fetch(target.as_str(), err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| PageError::fetch(target.as_str(), err.to_string()))?;
        Ok(FetchResponse::new(target.as_str(), status, body.to_vec()))
    }
}

/// Serves URL paths from files under `root`. Missing files are 404s;
/// paths escaping the root are 403s.
#[derive(Clone, Debug)]
pub struct DirFetcher {
    root: PathBuf,
}

impl DirFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, url: &str) -> Option<PathBuf> {
        let path = match Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
        };
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl Fetcher for DirFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, PageError> {
        let Some(path) = self.resolve(url) else {
            return Ok(FetchResponse::new(url, 403, Vec::new()));
        };
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(FetchResponse::new(url, 404, Vec::new())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(FetchResponse::new(url, 404, Vec::new()));
            }
            Err(err) => return Err(PageError::fetch(url, err.to_string())),
        }
        let body = tokio::fs::read(&path)
            .await
            .map_err(|err| PageError::fetch(url, err.to_string()))?;
        Ok(FetchResponse::new(url, 200, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebase_keeps_path_and_query() {
        let base = Url::parse("http://localhost:3000/").unwrap();
        let requested = Url::parse("https://www.example.com/blocks/hero/hero.js?v=2").unwrap();
        assert_eq!(
            rebase(&base, &requested).unwrap().as_str(),
            "http://localhost:3000/blocks/hero/hero.js?v=2"
        );
    }

    #[tokio::test]
    async fn dir_fetcher_maps_paths_to_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("blocks/hero")).unwrap();
        std::fs::write(dir.path().join("blocks/hero/hero.css"), "h1{}").unwrap();
        let fetcher = DirFetcher::new(dir.path());

        let found = fetcher
            .fetch("https://example.com/blocks/hero/hero.css")
            .await
            .unwrap();
        assert!(found.ok());
        assert_eq!(found.text(), "h1{}");

        let missing = fetcher.fetch("https://example.com/nope.json").await.unwrap();
        assert_eq!(missing.status, 404);

        let dir_hit = fetcher.fetch("https://example.com/blocks").await.unwrap();
        assert!(!dir_hit.ok());
    }

    #[tokio::test]
    async fn dir_fetcher_refuses_to_leave_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = DirFetcher::new(dir.path());
        let escaped = fetcher.fetch("../../etc/passwd").await.unwrap();
        assert_eq!(escaped.status, 403);
    }
}
