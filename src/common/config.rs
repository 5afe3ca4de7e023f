use std::time::Duration;

/// Bytes per page, including the slot bitmap header.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of pages the cache may keep resident.
pub const DEFAULT_CACHE_CAPACITY: usize = 50;

/// Default period of the background deadlock detector.
pub const DEFAULT_DETECTION_INTERVAL: Duration = Duration::from_secs(1);

/// Engine-wide configuration, constructed once at startup and passed to every
/// component that needs it. Tests override the page size to work with small
/// pages and the detector interval to shorten abort latency.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub page_size: usize,
    pub cache_capacity: usize,
    pub detection_interval: Duration,
}

impl EngineConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    pub fn with_detection_interval(mut self, interval: Duration) -> Self {
        self.detection_interval = interval;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            detection_interval: DEFAULT_DETECTION_INTERVAL,
        }
    }
}
