//! [`ImageBackend`] that fetches, decodes and shapes images on tokio's
//! blocking pool.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use image::{imageops::FilterType, DynamicImage};
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::{
    backend::{Fit, ImageBackend, LoadRequest},
    config::MediaSettings,
    content::{FetcherChain, LoadedFrom},
    error::LoadFailure,
    handle::{DecodedImage, HandleId},
    lock_recovering,
};

/// Rendered results keyed by [`LoadRequest::cache_key`]. Oldest entry goes
/// first once full.
struct MemoryCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, DecodedImage>,
}

impl MemoryCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn get(&self, key: &str) -> Option<DecodedImage> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: String, image: DecodedImage) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key.clone(), image).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }
}

pub struct TaskBackend {
    runtime: Handle,
    fetchers: FetcherChain,
    cache: Arc<Mutex<MemoryCache>>,
    // Latest generation issued per handle. Work whose generation is no longer
    // here answers `Cancelled`.
    in_flight: Arc<Mutex<HashMap<HandleId, u64>>>,
}

impl TaskBackend {
    pub fn new(runtime: Handle, fetchers: FetcherChain, settings: &MediaSettings) -> Self {
        Self {
            runtime,
            fetchers,
            cache: Arc::new(Mutex::new(MemoryCache::new(settings.memory_cache_entries))),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cached_len(&self) -> usize {
        lock_recovering(&self.cache).entries.len()
    }

    pub fn in_flight_len(&self) -> usize {
        lock_recovering(&self.in_flight).len()
    }
}

impl ImageBackend for TaskBackend {
    fn load(&self, request: LoadRequest) {
        let key = request.cache_key();
        if let Some(image) = lock_recovering(&self.cache).get(&key) {
            trace!(handle = %request.token.handle, "backend: memory cache hit");
            request.respond(Ok(image));
            return;
        }

        lock_recovering(&self.in_flight).insert(request.token.handle, request.token.generation);
        let fetchers = self.fetchers.clone();
        let cache = Arc::clone(&self.cache);
        let in_flight = Arc::clone(&self.in_flight);

        self.runtime.spawn_blocking(move || {
            let is_current = || {
                lock_recovering(&in_flight).get(&request.token.handle)
                    == Some(&request.token.generation)
            };

            let outcome = if is_current() {
                render(&fetchers, &request)
            } else {
                Err(LoadFailure::Cancelled)
            };
            if let Ok(image) = &outcome {
                lock_recovering(&cache).insert(key, Arc::clone(image));
            }

            let outcome = match outcome {
                Ok(_) if !is_current() => Err(LoadFailure::Cancelled),
                other => other,
            };
            {
                let mut in_flight = lock_recovering(&in_flight);
                if in_flight.get(&request.token.handle) == Some(&request.token.generation) {
                    in_flight.remove(&request.token.handle);
                }
            }

            match &outcome {
                Err(LoadFailure::Cancelled) => {
                    trace!(handle = %request.token.handle, "backend: request cancelled")
                }
                Err(err) => warn!(url = %request.url, "backend: load failed: {err}"),
                Ok(_) => {}
            }
            request.respond(outcome);
        });
    }

    fn cancel(&self, handle: HandleId) {
        lock_recovering(&self.in_flight).remove(&handle);
    }
}

fn render(fetchers: &FetcherChain, request: &LoadRequest) -> Result<DecodedImage, LoadFailure> {
    let fetched = fetchers.fetch(&request.url)?;
    let decoded = image::load_from_memory(&fetched.bytes)
        .map_err(|err| LoadFailure::Decode(err.to_string()))?;

    let upright = rotate(decoded, request.rotation_degrees);
    let (width, height) = (request.width.max(1), request.height.max(1));
    let sized = match request.fit {
        Fit::CenterCrop => upright.resize_to_fill(width, height, FilterType::Triangle),
        Fit::CenterInside => upright.resize(width, height, FilterType::Triangle),
    };
    let shaped = request.transform.apply(sized.to_rgba8());

    if fetched.loaded_from != LoadedFrom::Memory {
        debug!(
            url = %request.url,
            from = ?fetched.loaded_from,
            width = shaped.width(),
            height = shaped.height(),
            "backend: rendered image"
        );
    }
    Ok(Arc::new(shaped))
}

fn rotate(image: DynamicImage, degrees: i16) -> DynamicImage {
    match degrees.rem_euclid(360) {
        90 => image.rotate90(),
        180 => image.rotate180(),
        270 => image.rotate270(),
        _ => image,
    }
}
