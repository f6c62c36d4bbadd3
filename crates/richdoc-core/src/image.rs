//! Images, smileys and the asynchronous image loading hand-off.
//!
//! Image sections hold an `Arc<SecImage>` value object. Loading the actual bitmap is delegated to
//! an injected [`ImageLoader`] that runs on a worker thread; results travel back over a
//! `crossbeam` channel and are applied on the editor thread by polling [`ImageLoadQueue`].

use crossbeam::channel::{Receiver, Sender, unbounded};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;

/// Image value object: source reference plus its declared size in pixels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecImage {
    source: String,
    width: u32,
    height: u32,
    smiley: Option<String>,
}

impl SecImage {
    /// Create an image. A zero width or height means "unknown until loaded".
    pub fn new(source: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            source: source.into(),
            width,
            height,
            smiley: None,
        }
    }

    /// Create a smiley: an image that was typed as a textual code (e.g. `:)`).
    pub fn smiley(code: impl Into<String>, source: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            source: source.into(),
            width,
            height,
            smiley: Some(code.into()),
        }
    }

    /// Image location (URL or path). Never interpreted by the kernel.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Declared width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Declared height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Smiley code when this image represents a smiley.
    pub fn smiley_code(&self) -> Option<&str> {
        self.smiley.as_deref()
    }

    /// Whether this image is a smiley.
    pub fn is_smiley(&self) -> bool {
        self.smiley.is_some()
    }
}

/// Fetches image dimensions for a source. Implementations may block; they run off the editor
/// thread.
pub trait ImageLoader: Send + Sync + 'static {
    /// Load `source` and report its pixel size.
    fn load(&self, source: &str) -> Result<(u32, u32), String>;
}

/// Outcome of one background load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLoaded {
    /// The requested source.
    pub source: String,
    /// Pixel size on success, a message on failure.
    pub result: Result<(u32, u32), String>,
}

/// Dispatches loads to worker threads and collects their results.
pub struct ImageLoadQueue {
    loader: Arc<dyn ImageLoader>,
    sender: Sender<ImageLoaded>,
    receiver: Receiver<ImageLoaded>,
    pending: HashSet<String>,
}

impl ImageLoadQueue {
    /// Create a queue backed by `loader`.
    pub fn new(loader: Arc<dyn ImageLoader>) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            loader,
            sender,
            receiver,
            pending: HashSet::new(),
        }
    }

    /// Start loading `source` unless a load for it is already in flight.
    pub fn request(&mut self, source: &str) -> bool {
        if !self.pending.insert(source.to_string()) {
            return false;
        }
        let loader = Arc::clone(&self.loader);
        let sender = self.sender.clone();
        let source = source.to_string();
        thread::spawn(move || {
            let result = loader.load(&source);
            // The receiving side may be gone if the editor was dropped; nothing to do then.
            let _ = sender.send(ImageLoaded { source, result });
        });
        true
    }

    /// Number of loads still in flight.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Collect every result that has arrived so far without blocking.
    pub fn drain(&mut self) -> Vec<ImageLoaded> {
        let mut out = Vec::new();
        while let Ok(loaded) = self.receiver.try_recv() {
            self.pending.remove(&loaded.source);
            out.push(loaded);
        }
        out
    }

    /// Block until the next result arrives (or all senders are gone).
    pub fn wait_one(&mut self) -> Option<ImageLoaded> {
        if self.pending.is_empty() {
            return None;
        }
        let loaded = self.receiver.recv().ok()?;
        self.pending.remove(&loaded.source);
        Some(loaded)
    }
}

/// Loaded sizes by source. Consulted by layout before falling back to the declared size.
#[derive(Debug, Default, Clone)]
pub struct ImageCache {
    sizes: HashMap<String, (u32, u32)>,
    failed: HashSet<String>,
}

impl ImageCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a load result.
    pub fn apply(&mut self, loaded: &ImageLoaded) {
        match &loaded.result {
            Ok(size) => {
                self.failed.remove(&loaded.source);
                self.sizes.insert(loaded.source.clone(), *size);
            }
            Err(message) => {
                tracing::warn!(source = %loaded.source, %message, "image load failed");
                self.failed.insert(loaded.source.clone());
            }
        }
    }

    /// Loaded size for `source`, if known.
    pub fn size(&self, source: &str) -> Option<(u32, u32)> {
        self.sizes.get(source).copied()
    }

    /// Whether loading `source` failed.
    pub fn is_failed(&self, source: &str) -> bool {
        self.failed.contains(source)
    }

    /// Size to lay out `image` with: loaded size, then declared size, then `placeholder`.
    pub fn layout_size(&self, image: &SecImage, placeholder: (u32, u32)) -> (u32, u32) {
        if let Some(size) = self.size(image.source()) {
            return size;
        }
        if image.width() > 0 && image.height() > 0 {
            return (image.width(), image.height());
        }
        placeholder
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.sizes.clear();
        self.failed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLoader;

    impl ImageLoader for FixedLoader {
        fn load(&self, source: &str) -> Result<(u32, u32), String> {
            if source.ends_with(".png") {
                Ok((32, 16))
            } else {
                Err(format!("unsupported: {source}"))
            }
        }
    }

    #[test]
    fn test_queue_hands_results_back() {
        let mut queue = ImageLoadQueue::new(Arc::new(FixedLoader));
        assert!(queue.request("a.png"));
        assert!(!queue.request("a.png"));
        assert!(queue.request("b.gif"));

        let mut cache = ImageCache::new();
        while let Some(loaded) = queue.wait_one() {
            cache.apply(&loaded);
        }
        assert_eq!(queue.pending(), 0);
        assert_eq!(cache.size("a.png"), Some((32, 16)));
        assert!(cache.is_failed("b.gif"));
    }

    #[test]
    fn test_layout_size_fallbacks() {
        let cache = ImageCache::new();
        let declared = SecImage::new("x.png", 10, 20);
        let unknown = SecImage::new("y.png", 0, 0);
        assert_eq!(cache.layout_size(&declared, (16, 16)), (10, 20));
        assert_eq!(cache.layout_size(&unknown, (16, 16)), (16, 16));
    }
}
