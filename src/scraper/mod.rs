mod uex_docs_scraper;

pub use uex_docs_scraper::UexDocsScraper;
