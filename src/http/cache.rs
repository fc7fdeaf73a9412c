//! A process-lifetime cache of prebuilt response bytes keyed by URL, with
//! optional per-entry TTL, plus the static-content loader that fills it from
//! a directory tree. Alongside the forward map the cache keeps a reverse
//! index keyed by a SHA-1 fingerprint of the stored bytes: identical content
//! cached under several URLs shares one byte block and can be looked up by
//! content. Lookups take the read lock only; updates replace the shared
//! byte block so readers already holding one are unaffected.

use sha1::{Digest, Sha1};
use {
    std::collections::{HashMap, HashSet},
    std::path::{Path, PathBuf},
    std::sync::{Arc, RwLock},
    std::time::{Duration, Instant, SystemTime},
};

use crate::error::Result;
use crate::http::response::HttpResponse;

type Fingerprint = [u8; 20];

fn content_fingerprint(data: &[u8]) -> Fingerprint {
    let mut digest = Sha1::new();
    digest.update(data);
    digest.finalize().into()
}

#[derive(Clone)]
struct CacheEntry {
    data: Arc<Vec<u8>>,
    fingerprint: Fingerprint,
    expires: Option<Instant>,
}

#[derive(Default)]
struct CacheIndex {
    entries: HashMap<String, CacheEntry>,
    by_content: HashMap<Fingerprint, HashSet<String>>,
}

impl CacheIndex {
    fn unlink(&mut self, url: &str, fingerprint: Fingerprint) {
        if let Some(urls) = self.by_content.get_mut(&fingerprint) {
            urls.remove(url);
            if urls.is_empty() {
                self.by_content.remove(&fingerprint);
            }
        }
    }
}

#[derive(Default)]
pub struct ResponseCache {
    index: RwLock<CacheIndex>,
}

impl ResponseCache {
    pub fn new() -> ResponseCache {
        ResponseCache::default()
    }

    /// Cache the complete wire image of `response` under `url`.
    pub fn insert(&self, url: impl Into<String>, response: &HttpResponse, ttl: Option<Duration>) {
        self.insert_raw(url, response.cache().to_vec(), ttl);
    }

    pub fn insert_raw(&self, url: impl Into<String>, data: Vec<u8>, ttl: Option<Duration>) {
        let url = url.into();
        let fingerprint = content_fingerprint(&data);
        let mut index = self.index.write().unwrap();
        // Identical content already cached elsewhere shares one block.
        let data = index
            .by_content
            .get(&fingerprint)
            .and_then(|urls| urls.iter().next())
            .and_then(|existing| index.entries.get(existing))
            .filter(|entry| *entry.data == data)
            .map(|entry| entry.data.clone())
            .unwrap_or_else(|| Arc::new(data));
        let entry = CacheEntry {
            data,
            fingerprint,
            expires: ttl.map(|ttl| Instant::now() + ttl),
        };
        if let Some(replaced) = index.entries.insert(url.clone(), entry) {
            if replaced.fingerprint != fingerprint {
                index.unlink(&url, replaced.fingerprint);
            }
        }
        index
            .by_content
            .entry(fingerprint)
            .or_insert_with(HashSet::new)
            .insert(url);
    }

    /// The cached bytes for `url`, unless absent or expired.
    pub fn find(&self, url: &str) -> Option<Arc<Vec<u8>>> {
        let index = self.index.read().unwrap();
        let entry = index.entries.get(url)?;
        if let Some(expires) = entry.expires {
            if Instant::now() >= expires {
                return None;
            }
        }
        Some(entry.data.clone())
    }

    /// Every URL whose cached bytes equal `data`, via the content
    /// fingerprint reverse index.
    pub fn find_urls_by_content(&self, data: &[u8]) -> Vec<String> {
        let fingerprint = content_fingerprint(data);
        let index = self.index.read().unwrap();
        index
            .by_content
            .get(&fingerprint)
            .map(|urls| urls.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove(&self, url: &str) -> bool {
        let mut index = self.index.write().unwrap();
        match index.entries.remove(url) {
            Some(entry) => {
                index.unlink(url, entry.fingerprint);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut index = self.index.write().unwrap();
        index.entries.clear();
        index.by_content.clear();
    }

    pub fn len(&self) -> usize {
        self.index.read().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().unwrap().entries.is_empty()
    }
}

/// One directory tree served from the cache, with the modification-time
/// index used to detect changed files between rescans.
pub(crate) struct StaticRoot {
    root: PathBuf,
    prefix: String,
    ttl: Option<Duration>,
    files: HashMap<PathBuf, SystemTime>,
}

impl StaticRoot {
    pub fn new(root: PathBuf, prefix: String, ttl: Option<Duration>) -> StaticRoot {
        StaticRoot {
            root,
            prefix,
            ttl,
            files: HashMap::new(),
        }
    }

    /// Load new and changed files into `cache` and evict entries whose file
    /// disappeared. Called at registration and then periodically.
    pub fn refresh(&mut self, cache: &ResponseCache) -> Result<()> {
        let mut seen = Vec::new();
        let mut paths = Vec::new();
        collect_files(&self.root, &mut paths)?;
        for path in paths {
            let modified = std::fs::metadata(&path)
                .and_then(|metadata| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let changed = self.files.get(&path) != Some(&modified);
            if changed {
                let contents = std::fs::read(&path)?;
                let response = file_response(&path, contents);
                cache.insert(self.url_for(&path), &response, self.ttl);
                self.files.insert(path.clone(), modified);
            }
            seen.push(path);
        }
        let removed: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|known| !seen.contains(known))
            .cloned()
            .collect();
        for path in removed {
            cache.remove(&self.url_for(&path));
            self.files.remove(&path);
        }
        Ok(())
    }

    fn url_for(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let mut url = self.prefix.trim_end_matches('/').to_string();
        for component in relative.components() {
            url.push('/');
            url.push_str(&component.as_os_str().to_string_lossy());
        }
        url
    }
}

fn collect_files(directory: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(directory)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn file_response(path: &Path, contents: Vec<u8>) -> HttpResponse {
    let mut response = HttpResponse::new();
    response.set_begin(200);
    response.set_header("Content-Type", content_type_for(path));
    response.set_body(&contents);
    response
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|extension| extension.to_str())
        .unwrap_or_default()
    {
        "html" | "htm" => "text/html; charset=UTF-8",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain; charset=UTF-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_find_remove() {
        let cache = ResponseCache::new();
        let response = HttpResponse::make_ok_response(b"hi", None);
        cache.insert("/hello", &response, None);

        let found = cache.find("/hello").expect("cached entry");
        assert_eq!(&*found, response.cache());
        assert!(cache.find("/missing").is_none());

        assert!(cache.remove("/hello"));
        assert!(cache.find("/hello").is_none());
        assert!(cache.find_urls_by_content(response.cache()).is_empty());
    }

    #[test]
    fn expired_entries_are_not_served() {
        let cache = ResponseCache::new();
        let response = HttpResponse::make_ok_response(b"hi", None);
        cache.insert("/ttl", &response, Some(Duration::from_secs(0)));
        assert!(cache.find("/ttl").is_none());
    }

    #[test]
    fn reverse_index_tracks_content() {
        let cache = ResponseCache::new();
        let response = HttpResponse::make_ok_response(b"shared", None);
        cache.insert("/a", &response, None);
        cache.insert("/b", &response, None);

        let mut urls = cache.find_urls_by_content(response.cache());
        urls.sort();
        assert_eq!(urls, vec!["/a".to_string(), "/b".to_string()]);

        // Identical content is stored once and shared.
        let a = cache.find("/a").expect("cached entry");
        let b = cache.find("/b").expect("cached entry");
        assert!(Arc::ptr_eq(&a, &b));

        cache.remove("/a");
        assert_eq!(
            cache.find_urls_by_content(response.cache()),
            vec!["/b".to_string()]
        );
    }

    #[test]
    fn replacing_content_moves_the_reverse_mapping() {
        let cache = ResponseCache::new();
        let first = HttpResponse::make_ok_response(b"one", None);
        let second = HttpResponse::make_ok_response(b"two", None);
        cache.insert("/page", &first, None);
        cache.insert("/page", &second, None);

        assert!(cache.find_urls_by_content(first.cache()).is_empty());
        assert_eq!(
            cache.find_urls_by_content(second.cache()),
            vec!["/page".to_string()]
        );
    }

    #[test]
    fn static_root_loads_and_refreshes() {
        let directory = std::env::temp_dir().join(format!(
            "zeekabel-cache-test-{}",
            crate::id::EndpointId::random()
        ));
        std::fs::create_dir_all(directory.join("sub")).unwrap();
        std::fs::write(directory.join("index.html"), b"<html></html>").unwrap();
        std::fs::write(directory.join("sub/data.json"), b"{}").unwrap();

        let cache = ResponseCache::new();
        let mut root = StaticRoot::new(directory.clone(), "/static".to_string(), None);
        root.refresh(&cache).unwrap();

        assert!(cache.find("/static/index.html").is_some());
        assert!(cache.find("/static/sub/data.json").is_some());

        std::fs::remove_file(directory.join("sub/data.json")).unwrap();
        root.refresh(&cache).unwrap();
        assert!(cache.find("/static/sub/data.json").is_none());

        std::fs::remove_dir_all(&directory).unwrap();
    }
}
