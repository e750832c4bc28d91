//! JavaScript evaluated inside content pages

use crate::error::ResolveError;
use crate::session::HeaderSet;
use serde::Deserialize;
use serde_json::Value;

/// Collects every embedded JSON payload (`<script type="application/json" data-sjs>`)
/// in document order. Payloads that fail to parse are dropped.
pub const SCRIPT_PAYLOADS_SCRIPT: &str = r#"
    (() => Array.from(document.querySelectorAll('script[type="application/json"][data-sjs]'))
        .map(script => {
            try {
                return JSON.parse(script.textContent);
            } catch (_) {
                return null;
            }
        })
        .filter(payload => payload !== null))()
"#;

/// Builds a GET issued from the page itself so the session cookies ride along.
pub fn fetch_json_script(url: &str, headers: &HeaderSet) -> Result<String, ResolveError> {
    let url = serde_json::to_string(url)?;
    let headers = serde_json::to_string(&headers.to_json())?;

    Ok(format!(
        r#"
    (async () => {{
        try {{
            const response = await fetch({url}, {{
                method: 'GET',
                headers: {headers},
                credentials: 'include'
            }});
            const text = await response.text();
            let body = null;
            try {{
                body = JSON.parse(text);
            }} catch (_) {{}}
            return {{ status: response.status, ok: response.ok, body: body, error: null }};
        }} catch (err) {{
            return {{ status: 0, ok: false, body: null, error: String(err) }};
        }}
    }})()
"#
    ))
}

/// What [`fetch_json_script`] hands back to Rust.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchEnvelope {
    pub status: u16,
    pub ok: bool,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl FetchEnvelope {
    pub fn into_json(self, url: &str) -> Result<Value, ResolveError> {
        if let Some(error) = self.error {
            return Err(ResolveError::FetchFailed(format!("{url}: {error}")));
        }

        if !self.ok {
            return Err(ResolveError::HttpStatus {
                status: self.status,
                url: url.to_string(),
            });
        }

        match self.body {
            Some(Value::Null) | None => Err(ResolveError::UnexpectedResponse(format!(
                "{url} returned a non-JSON body"
            ))),
            Some(body) => Ok(body),
        }
    }
}
