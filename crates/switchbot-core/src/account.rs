//! Encryption key retrieval from a SwitchBot account.
//!
//! Encrypted models (locks) need a key id and a 128-bit key that only the
//! SwitchBot cloud knows. This module performs the one-shot login and key
//! exchange. Failures are never retried.
//!
//! # Example
//!
//! ```no_run
//! use switchbot_core::account::AccountClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = AccountClient::new()?;
//! let key = client
//!     .retrieve_encryption_key("AA:BB:CC:DD:EE:FF", "user@example.com", "hunter2")
//!     .await?;
//! println!("key id {}", key.key_id);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Domain of the SwitchBot app API.
pub const API_BASE_DOMAIN: &str = "api.switchbot.net";

/// OAuth client id of the SwitchBot app.
pub const APP_CLIENT_ID: &str = "5nnwmhmsa9xxskm14hd85lm9bm";

/// Region used when the account does not report one.
pub const DEFAULT_REGION: &str = "us";

const API_SUCCESS: i64 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Key material for an encrypted device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    /// Two hex characters identifying the key.
    pub key_id: String,
    /// 32 hex characters.
    pub encryption_key: String,
}

/// Strip separators from a MAC and upper-case it (`AABBCCDDEEFF`).
pub fn normalize_mac(mac: &str) -> String {
    mac.replace([':', '-'], "").to_uppercase()
}

/// Unwrap the `{statusCode, message, body}` envelope every endpoint returns.
pub fn unwrap_envelope(http_status: u16, response: Value) -> Result<Value> {
    if http_status > 299 {
        return Err(Error::Api {
            status: i64::from(http_status),
            message: "Unexpected status code returned by SwitchBot API".to_string(),
        });
    }
    let status = response
        .get("statusCode")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::InvalidData("missing statusCode in API response".to_string()))?;
    if status != API_SUCCESS {
        return Err(Error::Api {
            status,
            message: response
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    Ok(response.get("body").cloned().unwrap_or(Value::Null))
}

/// Client for the SwitchBot account API.
#[derive(Debug, Clone)]
pub struct AccountClient {
    client: Client,
    base_domain: String,
}

impl AccountClient {
    /// Client for the production API.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::AccountConnection(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    /// Use an existing HTTP client.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            base_domain: API_BASE_DOMAIN.to_string(),
        }
    }

    /// Point at another API domain.
    #[must_use]
    pub fn base_domain(mut self, domain: impl Into<String>) -> Self {
        self.base_domain = domain.into().trim_end_matches('/').to_string();
        self
    }

    /// URL of `path` on `subdomain`.
    pub fn url(&self, subdomain: &str, path: &str) -> String {
        format!("https://{}.{}/{}", subdomain, self.base_domain, path)
    }

    /// POST `data` and return the envelope's body.
    pub async fn api_request(
        &self,
        subdomain: &str,
        path: &str,
        data: &Value,
        authorization: Option<&str>,
    ) -> Result<Value> {
        let url = self.url(subdomain, path);
        debug!(%url, "account API request");
        let mut request = self.client.post(&url).json(data);
        if let Some(token) = authorization {
            request = request.header("authorization", token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::AccountConnection(e.to_string()))?;
        let status = response.status().as_u16();
        let body: Value = if status > 299 {
            Value::Null
        } else {
            response
                .json()
                .await
                .map_err(|e| Error::AccountConnection(e.to_string()))?
        };
        unwrap_envelope(status, body)
    }

    /// Log in and fetch the key for `device_mac`.
    #[tracing::instrument(level = "info", skip(self, password))]
    pub async fn retrieve_encryption_key(
        &self,
        device_mac: &str,
        username: &str,
        password: &str,
    ) -> Result<EncryptionKey> {
        let device_mac = normalize_mac(device_mac);

        let auth = self
            .api_request(
                "account",
                "account/api/v1/user/login",
                &json!({
                    "clientId": APP_CLIENT_ID,
                    "username": username,
                    "password": password,
                    "grantType": "password",
                    "verifyCode": "",
                }),
                None,
            )
            .await
            .map_err(|e| Error::Authentication(e.to_string()))?;
        let token = auth
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Authentication("no access token in login response".into()))?
            .to_string();

        let userinfo = self
            .api_request(
                "account",
                "account/api/v1/user/userinfo",
                &json!({}),
                Some(&token),
            )
            .await
            .map_err(|e| {
                Error::AccountConnection(format!(
                    "Failed to retrieve SwitchBot Account user details: {e}"
                ))
            })?;
        let region = userinfo
            .get("botRegion")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REGION);
        info!(region, "account region");

        let device_info = self
            .api_request(
                &format!("wonderlabs.{region}"),
                "wonder/keys/v1/communicate",
                &json!({
                    "device_mac": device_mac,
                    "keyType": "user",
                }),
                Some(&token),
            )
            .await
            .and_then(|info| parse_communication_key(&info))
            .map_err(|e| {
                Error::AccountConnection(format!(
                    "Failed to retrieve encryption key from SwitchBot Account: {e}"
                ))
            })?;
        Ok(device_info)
    }
}

fn parse_communication_key(body: &Value) -> Result<EncryptionKey> {
    let key = body
        .get("communicationKey")
        .ok_or_else(|| Error::InvalidData("missing communicationKey".to_string()))?;
    let field = |name: &str| {
        key.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidData(format!("missing communicationKey.{name}")))
    };
    Ok(EncryptionKey {
        key_id: field("keyId")?,
        encryption_key: field("key")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mac() {
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee:ff"), "AABBCCDDEEFF");
        assert_eq!(normalize_mac("aa-bb-cc-dd-ee-ff"), "AABBCCDDEEFF");
    }

    #[test]
    fn test_url() {
        let client = AccountClient::with_client(Client::new());
        assert_eq!(
            client.url("account", "account/api/v1/user/login"),
            "https://account.api.switchbot.net/account/api/v1/user/login"
        );
        let client = client.base_domain("example.test/");
        assert_eq!(
            client.url("wonderlabs.eu", "wonder/keys/v1/communicate"),
            "https://wonderlabs.eu.example.test/wonder/keys/v1/communicate"
        );
    }

    #[test]
    fn test_envelope_success() {
        let body = unwrap_envelope(
            200,
            json!({"statusCode": 100, "message": "ok", "body": {"botRegion": "eu"}}),
        )
        .unwrap();
        assert_eq!(body["botRegion"], "eu");
    }

    #[test]
    fn test_envelope_api_error() {
        let err = unwrap_envelope(200, json!({"statusCode": 190, "message": "bad token"}))
            .unwrap_err();
        assert_eq!(err.to_string(), "bad token, status code: 190");
        assert!(err.is_account_error());
    }

    #[test]
    fn test_envelope_http_error() {
        let err = unwrap_envelope(503, Value::Null).unwrap_err();
        assert!(matches!(err, Error::Api { status: 503, .. }));
    }

    #[test]
    fn test_parse_communication_key() {
        let key = parse_communication_key(&json!({
            "communicationKey": {"keyId": "ff", "key": "2b7e151628aed2a6abf7158809cf4f3c"}
        }))
        .unwrap();
        assert_eq!(key.key_id, "ff");
        assert!(parse_communication_key(&json!({})).is_err());
    }
}
