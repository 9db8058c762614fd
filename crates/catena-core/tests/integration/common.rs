use std::collections::HashMap;
use std::time::Duration;

use catena_core::{ChainConfig, ChainStep, FetchConfig};
use serde_json::json;

/// Chain config with no backoff delay and no proxies.
pub fn fast_config() -> ChainConfig {
    ChainConfig::default().with_concurrency_limit(4).with_fetch(
        FetchConfig::default()
            .with_timeout(Duration::from_secs(2))
            .with_max_retries(1)
            .with_retry_base_delay(Duration::ZERO)
            .with_max_retry_delay(Duration::ZERO)
            .with_proxy(false),
    )
}

/// A step whose pages link to the URLs listed for them in `site`.
pub fn link_step(name: &str, site: Vec<(&str, Vec<&str>)>) -> ChainStep {
    let site: HashMap<String, Vec<String>> = site
        .into_iter()
        .map(|(page, links)| {
            (
                page.to_string(),
                links.iter().map(|l| l.to_string()).collect(),
            )
        })
        .collect();
    ChainStep::new(name, move |url, _| {
        Ok(json!({ "url": url, "links": site.get(url).cloned().unwrap_or_default() }))
    })
    .with_extractor(|record| {
        record["links"]
            .as_array()
            .map(|links| {
                links
                    .iter()
                    .filter_map(|l| l.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    })
}

/// Terminal step recording the page body.
pub fn detail_step(name: &str) -> ChainStep {
    ChainStep::new(name, |url, body| Ok(json!({ "url": url, "body": body })))
}
