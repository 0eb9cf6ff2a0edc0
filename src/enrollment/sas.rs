//! Shared access signature tokens for the provisioning service management API.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::prelude::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::ServiceConnectionString;
use crate::error::{ProvisionError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Build a `SharedAccessSignature` authorization value.
///
/// The signature is HMAC-SHA256, keyed with the decoded policy key, over
/// `"<url-encoded resource uri>\n<expiry>"`.
pub fn generate_sas_token(
    resource_uri: &str,
    key: &[u8],
    key_name: Option<&str>,
    expiry: u64,
) -> Result<String> {
    let encoded_uri = url_encode(resource_uri);
    let string_to_sign = format!("{}\n{}", encoded_uri, expiry);

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ProvisionError::invalid_connection_string(format!("Unusable key: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

    let mut token = format!(
        "SharedAccessSignature sr={}&sig={}&se={}",
        encoded_uri,
        url_encode(&signature),
        expiry
    );
    if let Some(name) = key_name {
        token.push_str("&skn=");
        token.push_str(&url_encode(name));
    }

    Ok(token)
}

/// Build a token for the service named in a connection string, valid for `ttl`.
pub fn token_for(credential: &ServiceConnectionString, ttl: Duration) -> Result<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| ProvisionError::invalid_config(format!("System clock before epoch: {}", e)))?;
    let expiry = (now + ttl).as_secs();

    generate_sas_token(
        &credential.host_name,
        &credential.key_bytes()?,
        Some(&credential.shared_access_key_name),
        expiry,
    )
}

fn url_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
