//! Byte sources for the reference backend.

use std::{fs, sync::Arc};

use shared::domain::PartId;
use tracing::debug;
use url::Url;

use crate::{error::MediaError, sync_bridge::SyncBridge};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadedFrom {
    Memory,
    Disk,
    Network,
}

#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub bytes: Vec<u8>,
    pub loaded_from: LoadedFrom,
}

/// Synchronous byte fetcher. Backends call it from worker threads, so it may
/// block.
pub trait ResourceFetcher: Send + Sync {
    fn can_handle(&self, url: &Url) -> bool;
    fn fetch(&self, url: &Url) -> Result<FetchedContent, MediaError>;
}

/// Serves message part URIs (`<scheme>:///messages/<id>/parts/<index>`) out of
/// the content store, downloading through the sync bridge when the part is not
/// resident yet.
pub struct PartRequestHandler {
    scheme: String,
    bridge: SyncBridge,
}

impl PartRequestHandler {
    pub fn new(scheme: impl Into<String>, bridge: SyncBridge) -> Self {
        Self {
            scheme: scheme.into(),
            bridge,
        }
    }
}

impl ResourceFetcher for PartRequestHandler {
    fn can_handle(&self, url: &Url) -> bool {
        if url.scheme() != self.scheme {
            return false;
        }
        let Some(segments) = url.path_segments() else {
            return false;
        };
        let segments: Vec<&str> = segments.collect();
        segments.len() == 4 && segments[0] == "messages" && segments[2] == "parts"
    }

    fn fetch(&self, url: &Url) -> Result<FetchedContent, MediaError> {
        let part = PartId::new(url.as_str());
        if self.bridge.store().is_ready(&part) {
            return Ok(FetchedContent {
                bytes: self.bridge.store().read(&part)?,
                loaded_from: LoadedFrom::Memory,
            });
        }

        debug!(%part, "content: part not resident, downloading");
        Ok(FetchedContent {
            bytes: self.bridge.fetch(&part)?,
            loaded_from: LoadedFrom::Network,
        })
    }
}

/// Reads `file://` urls from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileFetcher;

impl ResourceFetcher for FileFetcher {
    fn can_handle(&self, url: &Url) -> bool {
        url.scheme() == "file"
    }

    fn fetch(&self, url: &Url) -> Result<FetchedContent, MediaError> {
        let path = url
            .to_file_path()
            .map_err(|()| MediaError::UnsupportedUrl(url.to_string()))?;
        let bytes = fs::read(&path)
            .map_err(|err| MediaError::Content(format!("{}: {err}", path.display())))?;
        Ok(FetchedContent {
            bytes,
            loaded_from: LoadedFrom::Disk,
        })
    }
}

/// Picks the first fetcher that accepts a url.
#[derive(Clone, Default)]
pub struct FetcherChain {
    fetchers: Vec<Arc<dyn ResourceFetcher>>,
}

impl FetcherChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetchers.push(fetcher);
        self
    }

    pub fn fetch(&self, raw_url: &str) -> Result<FetchedContent, MediaError> {
        let url = Url::parse(raw_url).map_err(|_| MediaError::UnsupportedUrl(raw_url.into()))?;
        self.fetchers
            .iter()
            .find(|fetcher| fetcher.can_handle(&url))
            .ok_or_else(|| MediaError::UnsupportedUrl(raw_url.into()))?
            .fetch(&url)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::MemoryContentStore;

    fn handler(store: Arc<MemoryContentStore>) -> PartRequestHandler {
        PartRequestHandler::new(
            "content",
            SyncBridge::new(store, Duration::from_millis(50)),
        )
    }

    #[test]
    fn accepts_only_part_uris_of_its_scheme() {
        let handler = handler(MemoryContentStore::new());
        let ok = Url::parse("content:///messages/abc/parts/1").expect("url");
        assert!(handler.can_handle(&ok));

        for raw in [
            "other:///messages/abc/parts/1",
            "content:///messages/abc/blobs/1",
            "content:///messages/abc/parts",
            "https://example.test/messages/abc/parts/1",
        ] {
            let url = Url::parse(raw).expect("url");
            assert!(!handler.can_handle(&url), "{raw}");
        }
    }

    #[test]
    fn resident_parts_load_from_memory_and_others_through_the_bridge() {
        let store = MemoryContentStore::new();
        let resident = PartId::from("content:///messages/m/parts/0");
        let remote = PartId::from("content:///messages/m/parts/1");
        store.insert_ready(&resident, vec![1]);
        store.insert_remote(&remote, vec![2]);
        store.complete_immediately(&remote);
        let handler = handler(store.clone());

        let fetched = handler
            .fetch(&Url::parse(resident.as_str()).expect("url"))
            .expect("resident");
        assert_eq!(fetched.loaded_from, LoadedFrom::Memory);

        let fetched = handler
            .fetch(&Url::parse(remote.as_str()).expect("url"))
            .expect("remote");
        assert_eq!(fetched.loaded_from, LoadedFrom::Network);
        assert_eq!(fetched.bytes, vec![2]);
    }

    #[test]
    fn chain_rejects_unhandled_urls() {
        let chain = FetcherChain::new().with(Arc::new(FileFetcher));
        assert!(matches!(
            chain.fetch("https://example.test/a.png"),
            Err(MediaError::UnsupportedUrl(_))
        ));
        assert!(matches!(
            chain.fetch("not a url"),
            Err(MediaError::UnsupportedUrl(_))
        ));
    }
}
