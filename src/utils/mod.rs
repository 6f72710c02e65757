// src/utils/mod.rs
use log::{info, LevelFilter};
use url::Url;

pub fn setup_logging(level: LevelFilter) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}] {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("solana_rbpf", LevelFilter::Warn)
        .level_for("solana_client", LevelFilter::Warn)
        .level_for("solana_rpc_client", LevelFilter::Warn)
        .level_for("reqwest", LevelFilter::Warn)
        .chain(std::io::stdout())
        .apply()?;
    info!("Logging initialized.");
    Ok(())
}

/// Appends `api-key=<key>` to an endpoint URL, keeping any existing query.
pub fn with_api_key(base_url: &str, api_key: Option<&str>) -> Result<String, url::ParseError> {
    let mut url = Url::parse(base_url)?;
    if let Some(key) = api_key {
        url.query_pairs_mut().append_pair("api-key", key);
    }
    Ok(url.to_string())
}

/// Host part of an endpoint URL, safe to log (no path, no query credentials).
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => format!(
            "{}://{}",
            url.scheme(),
            url.host_str().unwrap_or("<no-host>")
        ),
        Err(_) => "<invalid-url>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_api_key_appends_query() {
        let url = with_api_key("https://mainnet.helius-rpc.com/", Some("abc")).unwrap();
        assert_eq!(url, "https://mainnet.helius-rpc.com/?api-key=abc");

        let url = with_api_key("https://rpc.example/?foo=1", Some("k")).unwrap();
        assert_eq!(url, "https://rpc.example/?foo=1&api-key=k");

        let url = with_api_key("https://rpc.example/", None).unwrap();
        assert_eq!(url, "https://rpc.example/");
    }

    #[test]
    fn test_redact_url_drops_credentials() {
        assert_eq!(
            redact_url("https://mainnet.helius-rpc.com/?api-key=secret"),
            "https://mainnet.helius-rpc.com"
        );
        assert_eq!(redact_url("not a url"), "<invalid-url>");
    }
}
