use core::{fmt, time::Duration};

mod puppeteer;

pub use puppeteer::{DetailTab, Puppeteer, content, first_tab, inner_text, navigate_to, puppeteer, wait_for_async};

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// The browser operations a harvest needs.
///
/// [`Puppeteer`] drives a real Chrome through `headless_chrome`; tests plug in
/// an in-memory page store.
pub trait Session {
    /// Loads `url` in the long-lived listing tab, waits until `selector`
    /// matches at least once (bounded by `limit`) and returns the document HTML.
    fn listing(
        &self,
        url: &str,
        selector: &str,
        limit: Duration,
    ) -> impl Future<Output = anyhow::Result<String>>;

    /// Loads `url` in a fresh tab and returns the visible text of its body.
    /// The tab is gone when the future resolves, whatever the outcome.
    fn body_text(&self, url: &str) -> impl Future<Output = anyhow::Result<String>>;
}

#[derive(Debug)]
pub struct PageLoadError {
    pub url: String,
    pub source: anyhow::Error,
}

impl fmt::Display for PageLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.url, self.source)
    }
}

impl std::error::Error for PageLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
