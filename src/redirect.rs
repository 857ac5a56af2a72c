//! Redirect following for the outbound client.
//!
//! At most ten requests go out per inbound request. 301, 302 and 303 re-issue
//! non-GET/HEAD methods as GET without a body; 307 and 308 keep method and
//! body, and are handed back unchanged when the body has already been
//! streamed out and cannot be sent again.

use crate::error::ProxyError;
use hyper::header::{
    HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, COOKIE, HOST, REFERER, TRANSFER_ENCODING,
    WWW_AUTHENTICATE,
};
use hyper::{Method, StatusCode, Uri};
use url::Url;

pub const MAX_REDIRECTS: usize = 10;

/// Request line and headers of one outbound attempt.
#[derive(Debug, Clone)]
pub struct Hop {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub with_body: bool,
}

/// Decide what to send after `status` answered `current`. `None` means the
/// response is final and goes back to the caller.
pub fn next_hop(
    origin: &Hop,
    current: &Hop,
    status: StatusCode,
    location: Option<&HeaderValue>,
    body_replayable: bool,
) -> Result<Option<Hop>, ProxyError> {
    let (method, with_body) = match status {
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER => {
            let method = if current.method == Method::GET || current.method == Method::HEAD {
                current.method.clone()
            } else {
                Method::GET
            };
            (method, false)
        }
        StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => {
            if current.with_body && !body_replayable {
                return Ok(None);
            }
            (current.method.clone(), current.with_body)
        }
        _ => return Ok(None),
    };

    let Some(location) = location else {
        return Ok(None);
    };

    let uri = resolve_location(&current.uri, location)?;

    let mut headers = current.headers.clone();
    if !with_body {
        headers.remove(CONTENT_LENGTH);
        headers.remove(TRANSFER_ENCODING);
    }

    if let Some(authority) = uri.authority() {
        let host = HeaderValue::from_str(authority.as_str())
            .map_err(|e| ProxyError::Upstream(format!("invalid redirect host: {}", e)))?;
        headers.insert(HOST, host);
    }

    // Credentials only follow the redirect within the original host and its subdomains.
    if !same_or_subdomain(origin.uri.host(), uri.host()) {
        headers.remove(AUTHORIZATION);
        headers.remove(WWW_AUTHENTICATE);
        headers.remove(COOKIE);
        headers.remove("cookie2");
    }

    let downgrade = current.uri.scheme_str() == Some("https") && uri.scheme_str() == Some("http");
    if downgrade {
        headers.remove(REFERER);
    } else if !origin.headers.contains_key(REFERER) {
        if let Ok(referer) = HeaderValue::from_str(&current.uri.to_string()) {
            headers.insert(REFERER, referer);
        }
    }

    Ok(Some(Hop {
        method,
        uri,
        headers,
        with_body,
    }))
}

fn resolve_location(base: &Uri, location: &HeaderValue) -> Result<Uri, ProxyError> {
    let location = location
        .to_str()
        .map_err(|e| ProxyError::Upstream(format!("failed to parse Location header: {}", e)))?;

    let base = Url::parse(&base.to_string())
        .map_err(|e| ProxyError::Upstream(format!("failed to parse request URL: {}", e)))?;
    let target = base
        .join(location)
        .map_err(|e| ProxyError::Upstream(format!("failed to parse Location header {:?}: {}", location, e)))?;

    target
        .as_str()
        .parse()
        .map_err(|e| ProxyError::Upstream(format!("invalid redirect target {}: {}", target, e)))
}

fn same_or_subdomain(origin: Option<&str>, target: Option<&str>) -> bool {
    match (origin, target) {
        (Some(origin), Some(target)) => {
            let origin = origin.to_lowercase();
            let target = target.to_lowercase();
            target == origin || target.ends_with(&format!(".{}", origin))
        }
        _ => false,
    }
}
