use reqwest::Client;

use super::action::{ActionError, ActionFields};
use super::signer::{SIGNATURE_HEADER, sign_payload};

/// Substituted for placeholders that name no public field.
pub const UNKNOWN_PLACEHOLDER: &str = "unknown";

/// Replaces every `{field}` in `template` with the field's value. Braces
/// that do not enclose a plain identifier are left untouched.
pub fn substitute_placeholders(template: &str, fields: &ActionFields) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}');
        match close {
            Some(close) if is_identifier(&after[..close]) => {
                let name = &after[..close];
                out.push_str(fields.get(name).map(String::as_str).unwrap_or(UNKNOWN_PLACEHOLDER));
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub async fn send_webhook(
    client: &Client,
    url_template: &str,
    fields: &ActionFields,
    secret: Option<&[u8]>,
) -> Result<(), ActionError> {
    let url = substitute_placeholders(url_template, fields);
    let body = serde_json::to_vec(fields).map_err(|e| ActionError::Http(e.to_string()))?;

    let mut request = client
        .post(&url)
        .header("Content-Type", "application/json");
    if let Some(secret) = secret {
        request = request.header(SIGNATURE_HEADER, sign_payload(secret, &body)?);
    }

    request.body(body).send().await?.error_for_status()?;
    Ok(())
}
