use core::{ops::RangeInclusive, time::Duration};

use hashbrown::HashSet;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use snjobs::scrape::{PageLoadError, Session};

pub const ORIGIN: &str = "https://careers.servicenow.com";
pub const SEL_CARD: &str = "div.card.card-job";

const NONE: &str = "NONE";
const NOT_MENTIONED: &str = "not mentioned";

pub struct Context {
    pub timeout: Duration,
    pub reg_experience: Regex,
    pub sel_card: Selector,
    pub sel_title: Selector,
    pub sel_location: Selector,
    pub sel_link: Selector,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    #[serde(rename = "Job")]
    pub job: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Experience")]
    pub experience: String,
    #[serde(rename = "Job Description")]
    pub job_description: String,
    #[serde(rename = "ServiceNow Page")]
    pub page: u32,
}

/// Fields read straight off a listing card.
#[derive(Debug, PartialEq, Eq)]
pub struct Card {
    pub job: String,
    pub location: String,
    pub link: Option<String>,
}

pub fn listing_url(page: u32) -> String {
    format!("{ORIGIN}/jobs/?page={page}#results")
}

fn text_or_none(element: Option<ElementRef>) -> String {
    element.map_or_else(
        || NONE.to_owned(),
        |e| e.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" "),
    )
}

impl Context {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            reg_experience: Regex::new(
                r"(?i)\b(?:at least\s*\d+\+?\s*years?|minimum\s*\d+\+?\s*years?|\d+\+?\s*years?|one year|two years?|three years?|four years?|five years?|six years?|seven years?|eight years?|nine years?|ten years?)\b",
            )
            .unwrap(),
            sel_card: Selector::parse(SEL_CARD).unwrap(),
            sel_title: Selector::parse("h2.card-title").unwrap(),
            sel_location: Selector::parse("li.list-inline-item").unwrap(),
            sel_link: Selector::parse("a[href]").unwrap(),
        }
    }

    /// Every job card in the document, in DOM order.
    pub fn cards(&self, html: &str) -> Vec<Card> {
        let document = Html::parse_document(html);
        document
            .select(&self.sel_card)
            .map(|card| Card {
                job: text_or_none(card.select(&self.sel_title).next()),
                location: text_or_none(card.select(&self.sel_location).next()),
                link: card
                    .select(&self.sel_link)
                    .next()
                    .and_then(|a| a.attr("href"))
                    .map(|href| format!("{ORIGIN}{href}")),
            })
            .collect()
    }

    /// Distinct experience phrases in `text`, joined by `", "`.
    pub fn experience(&self, text: &str) -> String {
        let mut seen = HashSet::new();
        let found = self
            .reg_experience
            .find_iter(text)
            .map(|m| m.as_str())
            .filter(|m| seen.insert(*m))
            .collect::<Vec<_>>();

        if found.is_empty() {
            NOT_MENTIONED.to_owned()
        } else {
            found.join(", ")
        }
    }
}

/// Harvests one listing page into `out`, returning how many detail pages failed.
pub async fn work<S: Session>(
    page: u32,
    session: &S,
    ctx: &Context,
    out: &mut Vec<JobRecord>,
) -> Result<usize, PageLoadError> {
    tracing::info!(target: "listing", "[Page #{page}] start");

    let url = listing_url(page);
    let html = match session.listing(&url, SEL_CARD, ctx.timeout).await {
        Ok(html) => html,
        Err(source) => return Err(PageLoadError { url, source }),
    };

    let cards = ctx.cards(&html);
    tracing::info!(target: "listing", "[Page #{page}] {} cards", cards.len());

    let mut failed = 0;
    for Card { job, location, link } in cards {
        let (experience, job_description) = match link {
            Some(link) => {
                let fetched = session.body_text(&link).await;
                match fetched {
                    Ok(text) => (ctx.experience(&text), link),
                    Err(e) => {
                        tracing::warn!(target: "detail", "Error reading job page {link}: {e:#}");
                        failed += 1;
                        (NOT_MENTIONED.to_owned(), NOT_MENTIONED.to_owned())
                    }
                }
            }
            None => (NOT_MENTIONED.to_owned(), NOT_MENTIONED.to_owned()),
        };

        tracing::debug!(target: "detail", "[Page #{page}] {job:?} -> {experience:?}");
        out.push(JobRecord {
            job,
            location,
            experience,
            job_description,
            page,
        });
    }

    Ok(failed)
}

pub async fn run<S: Session>(session: &S, ctx: &Context, pages: RangeInclusive<u32>) -> Vec<JobRecord> {
    let mut jobs = Vec::new();
    let mut failed = 0;

    for page in pages {
        match work(page, session, ctx, &mut jobs).await {
            Ok(n) => {
                failed += n;
                tracing::info!(target: "listing", "\x1b[36mScraped page {page}\x1b[0m");
            }
            Err(e) => tracing::error!(target: "listing", "\x1b[31mFailed on page {page}: {e}\x1b[0m"),
        }
    }

    if failed > 0 {
        tracing::warn!(target: "detail", "{failed} detail pages could not be read");
    }

    jobs
}

#[cfg(test)]
mod tests {
    use core::cell::RefCell;
    use std::collections::HashMap;

    use super::*;

    const LISTING: &str = r#"<!DOCTYPE html>
<html><body><div id="results">
  <div class="card card-job">
    <h2 class="card-title">
      Senior Software Engineer
    </h2>
    <ul class="list-inline">
      <li class="list-inline-item">Santa Clara, California</li>
      <li class="list-inline-item">Full time</li>
    </ul>
    <a class="stretched-link" href="/jobs/744000012345/senior-software-engineer/">View</a>
  </div>
  <div class="card card-job">
    <ul class="list-inline"><li class="list-inline-item">Dublin, Ireland</li></ul>
  </div>
  <div class="card card-job">
    <h2 class="card-title">Product <em>Manager</em></h2>
    <a>no link</a>
    <a href="/jobs/744000067890/product-manager/">View</a>
  </div>
  <div class="card">
    <h2 class="card-title">Not a job card</h2>
  </div>
</div></body></html>"#;

    const SENIOR: &str = "https://careers.servicenow.com/jobs/744000012345/senior-software-engineer/";
    const PRODUCT: &str = "https://careers.servicenow.com/jobs/744000067890/product-manager/";

    #[derive(Default)]
    struct Pages {
        listings: HashMap<String, Result<String, String>>,
        bodies: HashMap<String, Result<String, String>>,
        visited: RefCell<Vec<String>>,
    }

    impl Pages {
        fn with_listing(mut self, page: u32, html: Result<&str, &str>) -> Self {
            self.listings
                .insert(listing_url(page), html.map(ToOwned::to_owned).map_err(ToOwned::to_owned));
            self
        }

        fn with_body(mut self, url: &str, text: Result<&str, &str>) -> Self {
            self.bodies
                .insert(url.to_owned(), text.map(ToOwned::to_owned).map_err(ToOwned::to_owned));
            self
        }
    }

    impl Session for Pages {
        async fn listing(&self, url: &str, selector: &str, _limit: Duration) -> anyhow::Result<String> {
            self.visited.borrow_mut().push(url.to_owned());
            match self.listings.get(url) {
                Some(Ok(html)) if html.contains("card-job") => Ok(html.clone()),
                Some(Ok(_)) | None => anyhow::bail!("TimeoutError: no `{selector}` within 10s"),
                Some(Err(e)) => anyhow::bail!("{e}"),
            }
        }

        async fn body_text(&self, url: &str) -> anyhow::Result<String> {
            self.visited.borrow_mut().push(url.to_owned());
            match self.bodies.get(url) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(e)) => anyhow::bail!("{e}"),
                None => anyhow::bail!("net::ERR_NAME_NOT_RESOLVED"),
            }
        }
    }

    fn ctx() -> Context {
        Context::new(Duration::from_secs(10))
    }

    #[test]
    fn cards_keep_dom_order_and_fill_sentinels() {
        let cards = ctx().cards(LISTING);
        assert_eq!(
            cards,
            [
                Card {
                    job: "Senior Software Engineer".to_owned(),
                    location: "Santa Clara, California".to_owned(),
                    link: Some(SENIOR.to_owned()),
                },
                Card {
                    job: "NONE".to_owned(),
                    location: "Dublin, Ireland".to_owned(),
                    link: None,
                },
                Card {
                    job: "Product Manager".to_owned(),
                    location: "NONE".to_owned(),
                    link: Some(PRODUCT.to_owned()),
                },
            ]
        );
    }

    #[test]
    fn experience_phrases_are_deduplicated() {
        let ctx = ctx();
        let got = ctx.experience("Requires 5+ years of experience, ideally three years in the field");
        assert!(got == "5+ years, three years" || got == "three years, 5+ years", "{got}");

        assert_eq!(ctx.experience("5+ years of Java. Again: 5+ years of Java."), "5+ years");
        assert_eq!(ctx.experience("We need At Least 3 Years here"), "At Least 3 Years");
        assert_eq!(ctx.experience("minimum 2+ years with ServiceNow"), "minimum 2+ years");
        assert_eq!(ctx.experience("One year of Python, 10 years total"), "One year, 10 years");
        assert_eq!(ctx.experience("Competitive pay and great benefits"), "not mentioned");
    }

    #[tokio::test]
    async fn page_becomes_records_in_card_order() {
        let pages = Pages::default()
            .with_listing(1, Ok(LISTING))
            .with_body(SENIOR, Ok("Qualifications: 8+ years building platforms."))
            .with_body(PRODUCT, Ok("Bring curiosity."));

        let mut out = Vec::new();
        let failed = work(1, &pages, &ctx(), &mut out).await.unwrap();
        assert_eq!(failed, 0);

        let expected = [
            ("Senior Software Engineer", "Santa Clara, California", "8+ years", SENIOR),
            ("NONE", "Dublin, Ireland", "not mentioned", "not mentioned"),
            ("Product Manager", "NONE", "not mentioned", PRODUCT),
        ];
        assert_eq!(out.len(), expected.len());
        for (record, (job, location, experience, description)) in out.iter().zip(expected) {
            assert_eq!(record.job, job);
            assert_eq!(record.location, location);
            assert_eq!(record.experience, experience);
            assert_eq!(record.job_description, description);
            assert_eq!(record.page, 1);
        }
    }

    #[tokio::test]
    async fn card_without_link_makes_no_detail_request() {
        let pages = Pages::default()
            .with_listing(1, Ok(LISTING))
            .with_body(SENIOR, Ok(""))
            .with_body(PRODUCT, Ok(""));

        let mut out = Vec::new();
        work(1, &pages, &ctx(), &mut out).await.unwrap();

        assert_eq!(*pages.visited.borrow(), [listing_url(1), SENIOR.to_owned(), PRODUCT.to_owned()]);
    }

    #[tokio::test]
    async fn detail_failure_only_degrades_its_record() {
        let pages = Pages::default()
            .with_listing(1, Ok(LISTING))
            .with_body(SENIOR, Err("net::ERR_CONNECTION_RESET"))
            .with_body(PRODUCT, Ok("at least 4 years of product work"));

        let mut out = Vec::new();
        let failed = work(1, &pages, &ctx(), &mut out).await.unwrap();

        assert_eq!(failed, 1);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].experience, "not mentioned");
        assert_eq!(out[0].job_description, "not mentioned");
        assert_eq!(out[0].job, "Senior Software Engineer");
        assert_eq!(out[2].experience, "at least 4 years");
        assert_eq!(out[2].job_description, PRODUCT);
    }

    #[tokio::test]
    async fn no_cards_within_timeout_yields_empty_run() {
        let pages = Pages::default().with_listing(1, Ok("<html><body>Loading…</body></html>"));

        let mut out = Vec::new();
        let err = work(1, &pages, &ctx(), &mut out).await.unwrap_err();
        assert_eq!(err.url, listing_url(1));
        assert!(out.is_empty());

        let jobs = run(&pages, &ctx(), 1..=1).await;
        assert!(jobs.is_empty());
        assert_eq!(serde_json::to_string_pretty(&jobs).unwrap(), "[]");
    }

    #[tokio::test]
    async fn failed_page_does_not_stop_later_pages() {
        let pages = Pages::default()
            .with_listing(1, Err("net::ERR_TIMED_OUT"))
            .with_listing(2, Ok(LISTING))
            .with_body(SENIOR, Ok("two years"))
            .with_body(PRODUCT, Err("Navigate failed"));

        let jobs = run(&pages, &ctx(), 1..=2).await;

        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|job| job.page == 2));
        assert_eq!(jobs[0].experience, "two years");
        assert_eq!(jobs[2].experience, "not mentioned");
        assert_eq!(jobs[2].job_description, "not mentioned");
        assert_eq!(jobs[0].job_description, SENIOR);
    }

    #[test]
    fn record_serializes_with_listing_keys() {
        let record = JobRecord {
            job: "Staff Engineer".to_owned(),
            location: "Remote".to_owned(),
            experience: "7+ years".to_owned(),
            job_description: SENIOR.to_owned(),
            page: 1,
        };

        let value = serde_json::to_value([&record]).unwrap();
        let object = value[0].as_object().unwrap();
        assert_eq!(object.len(), 5);
        assert_eq!(object["Job"], "Staff Engineer");
        assert_eq!(object["Location"], "Remote");
        assert_eq!(object["Experience"], "7+ years");
        assert_eq!(object["Job Description"], SENIOR);
        assert_eq!(object["ServiceNow Page"], 1);
    }
}
