//! URL canonicalization used for frontier uniqueness and politeness keys.

use url::Url;

use crate::error::AppError;

/// Query parameters that only carry tracking state.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "msclkid"];

/// Canonical form of an http(s) URL.
///
/// 1. Parse; reject malformed URLs and non-http(s) schemes
/// 2. Lowercase the host and drop the default port (done by `url`)
/// 3. Remove the fragment
/// 4. Strip the trailing slash except for the root path
/// 5. Drop tracking parameters (`utm_*`, click ids) and sort the rest
pub fn normalize_url(raw: &str) -> Result<Url, AppError> {
    let mut url = Url::parse(raw.trim()).map_err(|e| AppError::InvalidUrl(format!("{raw}: {e}")))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(AppError::InvalidUrl(format!(
            "{raw}: unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(AppError::InvalidUrl(format!("{raw}: missing host")));
    }

    url.set_fragment(None);

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        let trimmed = if trimmed.is_empty() { "/" } else { trimmed }.to_string();
        url.set_path(&trimmed);
    }

    if url.query().is_some() {
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !is_tracking_param(k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params.sort();

        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Politeness key: lowercase host plus any non-default port.
pub fn extract_domain(url: &Url) -> Result<String, AppError> {
    let host = url
        .host_str()
        .ok_or_else(|| AppError::InvalidUrl(format!("{url}: missing host")))?
        .to_lowercase();
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}

/// `scheme://domain/robots.txt` for the URL's origin.
pub fn robots_url(url: &Url) -> Result<String, AppError> {
    Ok(format!("{}://{}/robots.txt", url.scheme(), extract_domain(url)?))
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
