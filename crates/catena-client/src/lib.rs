pub mod fetcher;
pub mod parser;
pub mod proxy_source;

pub use fetcher::{ReqwestFetcher, ReqwestFetcherBuilder};
pub use parser::{collect_links, page_links, summarize_html};
pub use proxy_source::{DEFAULT_PROXY_SOURCES, FileProxySource, HttpProxySource, parse_proxy_list};
