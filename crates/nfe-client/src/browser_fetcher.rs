use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use nfe_core::error::AppError;
use nfe_core::traits::Fetcher;

use crate::fetcher::BROWSER_USER_AGENT;

/// Budget for the availability table to appear once navigation finished.
const SELECTOR_WAIT: Duration = Duration::from_secs(10);
const SELECTOR_POLL: Duration = Duration::from_millis(250);

/// Headless-browser fetcher using Chromium via the Chrome DevTools Protocol.
///
/// Every [`Fetcher::fetch`] launches its own Chromium, navigates, checks the
/// status of the main document, waits for the availability table to render
/// and returns the DOM. The browser is closed on every path, success or not.
///
/// # Example
///
/// ```rust,no_run
/// use nfe_client::BrowserFetcher;
/// use nfe_core::traits::Fetcher;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = BrowserFetcher::new("ctl00_ContentPlaceHolder1_gdvDisponibilidade2");
/// let html = fetcher
///     .fetch("https://www.nfe.fazenda.gov.br/portal/disponibilidade.aspx")
///     .await?;
/// println!("{}", &html[..200]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BrowserFetcher {
    table_id: String,
    timeout: Duration,
}

impl BrowserFetcher {
    /// A fetcher with a **30 s** overall timeout.
    pub fn new(table_id: impl Into<String>) -> Self {
        Self::with_timeout(table_id, Duration::from_secs(30))
    }

    pub fn with_timeout(table_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            table_id: table_id.into(),
            timeout,
        }
    }

    fn config() -> Result<BrowserConfig, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .arg(format!("--user-agent={BROWSER_USER_AGENT}"))
            .build()
            .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))
    }

    async fn render(&self, browser: &Browser, url: &str) -> Result<String, AppError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to open tab: {e}")))?;

        let html = async {
            page.goto(url)
                .await
                .map_err(|e| AppError::HttpError(format!("Failed to navigate to {url}: {e}")))?;
            let response = page
                .wait_for_navigation_response()
                .await
                .map_err(|e| AppError::HttpError(format!("Failed to navigate to {url}: {e}")))?;
            let status = response.and_then(|req| req.response.as_ref().map(|r| r.status));
            check_status(status, url)?;

            self.wait_for_table(&page).await?;
            page.content()
                .await
                .map_err(|e| AppError::BrowserError(format!("Failed to read page content: {e}")))
        }
        .await;

        let _ = page.close().await;
        html
    }

    async fn wait_for_table(&self, page: &Page) -> Result<(), AppError> {
        let selector = format!(r#"table[id="{}"]"#, self.table_id);
        let deadline = tokio::time::Instant::now() + SELECTOR_WAIT;
        loop {
            if page.find_element(selector.as_str()).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::ParseError(format!(
                    "Table '{}' did not appear within {}s",
                    self.table_id,
                    SELECTOR_WAIT.as_secs()
                )));
            }
            tokio::time::sleep(SELECTOR_POLL).await;
        }
    }
}

impl Fetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        tracing::info!(url, "Fetching status page with headless browser");

        let (mut browser, mut handler) = Browser::launch(Self::config()?)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        let result = tokio::time::timeout(self.timeout, self.render(&browser, url)).await;

        if let Err(e) = browser.close().await {
            tracing::warn!(error = %e, "Failed to close browser");
        }
        let _ = browser.wait().await;
        handler_task.abort();

        match result {
            Ok(inner) => inner,
            Err(_) => Err(AppError::Timeout(self.timeout.as_secs())),
        }
    }
}

/// Fail on a non-2xx main document. A missing status (served from cache,
/// `about:` pages) is let through.
fn check_status(status: Option<i64>, url: &str) -> Result<(), AppError> {
    match status {
        Some(code) if !(200..300).contains(&code) => {
            Err(AppError::HttpError(format!("HTTP {code} for {url}")))
        }
        Some(_) => Ok(()),
        None => {
            tracing::warn!(url, "No response status for main document");
            Ok(())
        }
    }
}

/// Locate a Chrome/Chromium binary, honouring `CHROME_BIN` first.
///
/// Returns `None` to let `chromiumoxide` do its own lookup.
fn find_chrome_binary() -> Option<PathBuf> {
    const CANDIDATES: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    CANDIDATES.iter().map(PathBuf::from).find(|p| p.exists())
}
