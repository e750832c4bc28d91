use crate::{ResolveError, SiteConfig};
use std::time::Duration;
use url::Url;

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}

pub fn validate_url(url: &str) -> Result<Url, ResolveError> {
    let parsed = Url::parse(url).map_err(|e| ResolveError::InvalidLink(format!("{url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(ResolveError::InvalidLink(format!(
            "{url}: unsupported scheme {scheme}"
        ))),
    }
}

/// Turns user input into an absolute link on the configured site.
///
/// Site-relative paths (`/p/abc/`) are joined onto the domain. Absolute links
/// must be http(s) and point at the same host.
pub fn normalize_link(link: &str, site: &SiteConfig) -> Result<String, ResolveError> {
    let link = link.trim();
    if link.is_empty() {
        return Err(ResolveError::InvalidLink("empty link".to_string()));
    }

    if link.starts_with('/') && !link.starts_with("//") {
        return Ok(site.absolute(link));
    }

    let parsed = validate_url(link)?;
    if !is_same_site(&parsed, &site.domain) {
        return Err(ResolveError::InvalidLink(format!(
            "{link} is not on {}",
            site.domain
        )));
    }

    Ok(parsed.to_string())
}

fn is_same_site(link: &Url, domain: &str) -> bool {
    let Ok(domain) = Url::parse(domain) else {
        return false;
    };

    match (link.host_str(), domain.host_str()) {
        (Some(link_host), Some(site_host)) => {
            let bare = |host: &str| host.trim_start_matches("www.").to_ascii_lowercase();
            bare(link_host) == bare(site_host)
        }
        _ => false,
    }
}
