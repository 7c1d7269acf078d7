//! Scraping the auth tokens a signed-in web page embeds in `WIZ_global_data`.

use serde_json::{Deserializer, Value};

use crate::error::{Error, Result};

const GLOBAL_DATA_MARKER: &str = "WIZ_global_data";
const XSRF_KEY: &str = "SMqcke";
const USER_ID_KEY: &str = "S06Grb";
const PAGE_KIND_KEY: &str = "qwAQke";
const SIGN_IN_PAGE: &str = "AccountsSignInUi";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTokens {
    pub xsrf_token: String,
    pub user_id: Option<String>,
}

/// Pulls the XSRF token (and user id, when present) out of the world page.
pub fn parse_world_page(html: &str) -> Result<AuthTokens> {
    let data = global_data(html)?;
    if data.get(PAGE_KIND_KEY).and_then(Value::as_str) == Some(SIGN_IN_PAGE) {
        return Err(Error::LoggedOut("world page is the sign-in page".to_string()));
    }
    let xsrf_token = data
        .get(XSRF_KEY)
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| Error::TokenParse(format!("{XSRF_KEY} missing from {GLOBAL_DATA_MARKER}")))?
        .to_string();
    let user_id = data
        .get(USER_ID_KEY)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    Ok(AuthTokens { xsrf_token, user_id })
}

fn global_data(html: &str) -> Result<Value> {
    let marker = html
        .find(GLOBAL_DATA_MARKER)
        .ok_or_else(|| Error::TokenParse(format!("{GLOBAL_DATA_MARKER} not found")))?;
    let rest = &html[marker + GLOBAL_DATA_MARKER.len()..];
    let brace = rest
        .find('{')
        .ok_or_else(|| Error::TokenParse(format!("{GLOBAL_DATA_MARKER} has no object")))?;
    // The object is followed by more script, so only read the first value.
    let value = Deserializer::from_str(&rest[brace..])
        .into_iter::<Value>()
        .next()
        .ok_or_else(|| Error::TokenParse(format!("{GLOBAL_DATA_MARKER} is empty")))?
        .map_err(|err| Error::TokenParse(format!("{GLOBAL_DATA_MARKER} is not JSON: {err}")))?;
    match value {
        Value::Object(_) => Ok(value),
        other => Err(Error::TokenParse(format!(
            "{GLOBAL_DATA_MARKER} is not an object: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(data: &str) -> String {
        format!(
            "<html><script nonce=\"x\">window.WIZ_global_data = {data};window.IJ_values = [];</script></html>"
        )
    }

    #[test_timeout::timeout]
    fn xsrf_and_user_id_are_extracted() {
        let html = page(r#"{"SMqcke":"AOuZoY-token","S06Grb":"1234567890","qwAQke":"DynamiteWebUi","nested":{"a":[1,2]}}"#);
        let tokens = parse_world_page(&html).unwrap();
        assert_eq!(tokens.xsrf_token, "AOuZoY-token");
        assert_eq!(tokens.user_id.as_deref(), Some("1234567890"));
    }

    #[test_timeout::timeout]
    fn sign_in_page_means_logged_out() {
        let html = page(r#"{"qwAQke":"AccountsSignInUi","SMqcke":""}"#);
        assert!(matches!(parse_world_page(&html), Err(Error::LoggedOut(_))));
    }

    #[test_timeout::timeout]
    fn missing_or_malformed_blobs_are_parse_errors() {
        assert!(matches!(parse_world_page("<html></html>"), Err(Error::TokenParse(_))));
        assert!(matches!(
            parse_world_page(&page(r#"{"S06Grb":"1"}"#)),
            Err(Error::TokenParse(_))
        ));
        assert!(matches!(
            parse_world_page("WIZ_global_data = {not json"),
            Err(Error::TokenParse(_))
        ));
    }
}
