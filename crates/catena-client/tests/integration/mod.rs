mod fetcher_tests;
mod proxy_source_tests;
