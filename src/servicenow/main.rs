mod scrape;

use std::path::PathBuf;

#[derive(clap::Parser)]
#[command(about = "Harvest ServiceNow careers listings into a JSON file")]
struct Args {
    /// First listing page to harvest.
    #[arg(long, default_value_t = 1)]
    first_page: u32,
    /// Last listing page to harvest (inclusive).
    #[arg(long, default_value_t = 1)]
    last_page: u32,
    /// Seconds to wait for job cards to appear on a listing page.
    #[arg(long, value_name = "secs", default_value_t = 10)]
    timeout: u64,
    #[arg(short, long, env = "SERVICENOW_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,
    /// Show the browser window.
    #[arg(long)]
    headful: bool,
    #[arg(long, env = "PROXY_SERVER")]
    proxy: Option<String>,
    #[arg(long, env = "SERVICENOW_USER_AGENT", default_value = snjobs::scrape::USER_AGENT)]
    user_agent: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;
    use snjobs::{scrape::Puppeteer, util};

    util::init_logger();

    let args = Args::parse();
    if args.first_page > args.last_page {
        tracing::warn!(target: "main", "empty page range {}..={}", args.first_page, args.last_page);
    }

    let session = Puppeteer::launch(!args.headful, args.proxy.as_deref(), &args.user_agent)?;
    tracing::info!(target: "main", "browser ready, user-agent \x1b[1;36m{}\x1b[0m", args.user_agent);

    let ctx = scrape::Context::new(core::time::Duration::from_secs(args.timeout));
    let jobs = scrape::run(&session, &ctx, args.first_page..=args.last_page).await;
    drop(session);

    let name = util::output_name(&util::timestamp(chrono::Local::now().naive_local()));
    let path = util::write_json(&args.output_dir, &name, &jobs)?;
    tracing::info!(target: "output", "Saved {} jobs to {}", jobs.len(), path.display());

    Ok(())
}
