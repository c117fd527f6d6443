pub mod fetcher;
pub mod parser;

#[cfg(feature = "browser")]
pub mod browser_fetcher;

#[cfg(feature = "browser")]
pub use browser_fetcher::BrowserFetcher;
pub use fetcher::ReqwestFetcher;
pub use parser::TableParser;
