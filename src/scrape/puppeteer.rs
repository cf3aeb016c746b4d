use core::{ops::Deref, time::Duration};
use std::{borrow::Cow, ffi::OsStr, sync::Arc, time::Instant};

use anyhow::Context as _;
use headless_chrome::{Browser, LaunchOptions, Tab, browser::tab::NoElementFound};
use serde_json::Value;
use tokio::{
    task::spawn_blocking,
    time::{sleep, timeout},
};

use super::Session;

/// Upper bound on waiting for a detail page's DOM to finish parsing.
pub const DOM_TIMEOUT: Duration = Duration::from_secs(20);

const PERIOD: Duration = Duration::from_millis(1832 / 4);

const DOM_READY: &str = r#"location.href !== "about:blank" && document.readyState !== "loading""#;

pub fn puppeteer(headless: bool, proxy: Option<&str>) -> anyhow::Result<Browser> {
    Browser::new(LaunchOptions {
        args: vec![
            OsStr::new("--disable-setuid-sandbox"),
            OsStr::new("--disable-blink-features=AutomationControlled"),
        ],
        headless,
        sandbox: false,
        proxy_server: proxy,
        idle_browser_timeout: Duration::from_secs(300),
        ..LaunchOptions::default()
    })
}

#[allow(clippy::significant_drop_tightening)]
pub fn first_tab(browser: &Browser) -> anyhow::Result<Arc<Tab>> {
    let tab = browser.new_tab()?;

    {
        let tabs_guard = browser
            .get_tabs()
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        for remain in &*tabs_guard {
            if !Arc::ptr_eq(&tab, remain) {
                remain.close(true)?;
            }
        }
    }

    Ok(tab)
}

pub async fn navigate_to(tab: &Arc<Tab>, url: Cow<'static, str>) -> anyhow::Result<()> {
    let tab = Arc::clone(tab);

    spawn_blocking(move || tab.navigate_to(&url).map(|_| ())).await?
}

async fn find_count(tab: &Arc<Tab>, selector: Cow<'static, str>) -> anyhow::Result<usize> {
    let tab = Arc::clone(tab);

    spawn_blocking(move || tab.find_elements(&selector).map(|found| found.len())).await?
}

/// Polls until `selector` matches something, returning the number of matches.
/// Gives up with an error once `limit` has passed.
pub async fn wait_for_async(
    tab: &Arc<Tab>,
    selector: Cow<'static, str>,
    limit: Duration,
) -> anyhow::Result<usize> {
    let poll = async {
        loop {
            match find_count(tab, selector.clone()).await {
                Ok(n) if n > 0 => break Ok(n),
                Ok(_) => (),
                Err(err) => {
                    if !err.is::<NoElementFound>() {
                        break Err(err);
                    }
                }
            }

            sleep(PERIOD).await;
        }
    };

    within(limit, &selector, poll).await
}

async fn within<T>(
    limit: Duration,
    selector: &str,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    timeout(limit, fut)
        .await
        .with_context(|| format!("TimeoutError: no `{selector}` within {limit:?}"))?
}

fn is_true(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::Bool(true)))
}

/// Blocks until the tab has left `about:blank` and its DOM is parsed.
/// Subresources and network idle are not waited for.
pub fn wait_for_dom(tab: &Tab, limit: Duration) -> anyhow::Result<()> {
    let deadline = Instant::now() + limit;

    loop {
        let last = match tab.evaluate(DOM_READY, false) {
            Ok(ret) if is_true(ret.value.as_ref()) => return Ok(()),
            Ok(_) => None,
            // the execution context is torn down while the navigation commits
            Err(e) => Some(e),
        };

        if Instant::now() >= deadline {
            let err = last.unwrap_or_else(|| anyhow::anyhow!("document still loading"));
            return Err(err.context(format!("TimeoutError: DOM not ready within {limit:?}")));
        }

        std::thread::sleep(PERIOD);
    }
}

pub async fn content(tab: &Arc<Tab>) -> anyhow::Result<String> {
    let tab = Arc::clone(tab);

    spawn_blocking(move || tab.get_content()).await?
}

pub fn inner_text(tab: &Tab) -> anyhow::Result<String> {
    let ret = tab.evaluate("document.body.innerText", false)?;

    match ret.value {
        Some(Value::String(s)) => Ok(s),
        Some(value) => anyhow::bail!("not a string: {value}"),
        None => anyhow::bail!("returned nothing"),
    }
}

/// A secondary tab that closes itself when dropped.
pub struct DetailTab(Arc<Tab>);

impl DetailTab {
    pub fn open(browser: &Browser, user_agent: &str) -> anyhow::Result<Self> {
        let tab = Self(browser.new_tab()?);
        tab.0.set_user_agent(user_agent, None, None)?;
        Ok(tab)
    }
}

impl Deref for DetailTab {
    type Target = Tab;

    fn deref(&self) -> &Tab {
        &self.0
    }
}

impl Drop for DetailTab {
    fn drop(&mut self) {
        if let Err(e) = self.0.close(true) {
            tracing::warn!(target: "detail", "closing tab failed: {e}");
        }
    }
}

pub struct Puppeteer {
    browser: Browser,
    listing: Arc<Tab>,
    user_agent: Arc<str>,
}

impl Puppeteer {
    /// Starts Chrome and prepares the listing tab. Failure here is fatal to a run.
    pub fn launch(headless: bool, proxy: Option<&str>, user_agent: &str) -> anyhow::Result<Self> {
        let browser = puppeteer(headless, proxy).context("launching browser")?;
        let listing = first_tab(&browser)?;
        listing.set_user_agent(user_agent, None, None)?;

        Ok(Self {
            browser,
            listing,
            user_agent: Arc::from(user_agent),
        })
    }
}

impl Session for Puppeteer {
    async fn listing(&self, url: &str, selector: &str, limit: Duration) -> anyhow::Result<String> {
        navigate_to(&self.listing, Cow::Owned(url.to_owned())).await?;
        let n = wait_for_async(&self.listing, Cow::Owned(selector.to_owned()), limit).await?;
        tracing::debug!(target: "listing", "{n} `{selector}` present on {url}");
        content(&self.listing).await
    }

    async fn body_text(&self, url: &str) -> anyhow::Result<String> {
        let browser = self.browser.clone();
        let user_agent = Arc::clone(&self.user_agent);
        let url = url.to_owned();

        spawn_blocking(move || -> anyhow::Result<String> {
            let tab = DetailTab::open(&browser, &user_agent)?;
            tab.navigate_to(&url)?;
            wait_for_dom(&tab, DOM_TIMEOUT)?;
            inner_text(&tab)
        })
        .await?
    }
}
