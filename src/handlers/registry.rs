//! Handler registry and dispatch
//!
//! Holds the ordered list of registered URL handlers. Dispatch walks the
//! list and hands the URL to the first handler that claims it; registration
//! order is the priority order. A handler whose prerequisites are missing
//! (yt-dlp binary absent, for instance) is skipped at build time with a
//! warning rather than failing startup.

use super::http::HttpHandler;
use super::media::MediaHandler;
use super::traits::UrlHandler;
use crate::config::HandlersConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn UrlHandler>>,
}

impl HandlerRegistry {
    /// Build the production registry from configuration.
    ///
    /// The media handler is registered first so that known streaming sites
    /// never reach the HTTP catch-all; the HTTP handler closes the list.
    pub async fn build(config: &HandlersConfig) -> Self {
        let mut handlers: Vec<Arc<dyn UrlHandler>> = Vec::new();

        if config.media_enabled {
            if MediaHandler::binary_available(&config.ytdlp_bin).await {
                handlers.push(Arc::new(MediaHandler::new(config.ytdlp_bin.clone())));
            } else {
                warn!(
                    bin = %config.ytdlp_bin,
                    "yt-dlp unavailable, media handler disabled"
                );
            }
        }

        handlers.push(Arc::new(HttpHandler::new(Duration::from_millis(
            config.probe_timeout_ms,
        ))));

        let names: Vec<&str> = handlers.iter().map(|h| h.name()).collect();
        info!(?names, "Handler registry built");

        Self { handlers }
    }

    /// Registry over an explicit handler list, in priority order.
    pub fn from_handlers(handlers: Vec<Arc<dyn UrlHandler>>) -> Self {
        Self { handlers }
    }

    /// First handler that claims the URL, if any.
    pub async fn dispatch(&self, url: &str) -> Option<Arc<dyn UrlHandler>> {
        for handler in &self.handlers {
            if handler.can_handle(url).await {
                return Some(handler.clone());
            }
        }
        None
    }

    pub fn list(&self) -> &[Arc<dyn UrlHandler>] {
        &self.handlers
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
