mod cancellation_tests;
mod chain_tests;
mod common;
mod proxy_tests;
