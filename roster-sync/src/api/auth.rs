//! Service account authentication
//!
//! Signs an RS256 JWT with the service account's private key and exchanges it
//! for a short-lived, read-only access token.

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::resilience::RetryPolicy;
use crate::config::ServiceAccountSource;
use crate::error::SourceError;

pub const SHEETS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// The fields of a service account key file that matter here
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, SourceError> {
        let key: Self = serde_json::from_str(json)
            .map_err(|e| SourceError::Credential(format!("not a service account key: {}", e)))?;

        if key.client_email.trim().is_empty() || key.private_key.trim().is_empty() {
            return Err(SourceError::Credential(
                "client_email and private_key must be set".to_string(),
            ));
        }
        Ok(key)
    }

    /// Read an inline or file-based credential
    pub async fn load(source: &ServiceAccountSource) -> Result<Self, SourceError> {
        match source {
            ServiceAccountSource::Inline(json) => Self::from_json(json),
            ServiceAccountSource::File(path) => {
                let json = tokio::fs::read_to_string(path).await.map_err(|e| {
                    SourceError::Credential(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_json(&json)
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn for_key(key: &ServiceAccountKey, now: i64) -> Self {
        Self {
            iss: key.client_email.clone(),
            scope: SHEETS_READONLY_SCOPE.to_string(),
            aud: key.token_uri.clone(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Exchanges a service account key for bearer tokens
pub struct TokenProvider<'a> {
    client: &'a Client,
    retry: &'a RetryPolicy,
}

impl<'a> TokenProvider<'a> {
    pub fn new(client: &'a Client, retry: &'a RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Signed assertion for the token endpoint
    pub fn assertion(key: &ServiceAccountKey) -> Result<String, SourceError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = key.private_key_id.clone();

        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| SourceError::Credential(format!("private_key is not RSA PEM: {}", e)))?;

        let claims = Claims::for_key(key, chrono::Utc::now().timestamp());
        encode(&header, &claims, &signing_key)
            .map_err(|e| SourceError::Credential(format!("failed to sign assertion: {}", e)))
    }

    /// Fetch an access token, retrying transient failures
    pub async fn access_token<R>(
        &self,
        key: &ServiceAccountKey,
        on_retry: R,
    ) -> Result<String, SourceError>
    where
        R: FnMut(u32, &SourceError),
    {
        let assertion = Self::assertion(key)?;
        debug!("requesting access token for {}", key.client_email);

        self.retry
            .execute(
                "token exchange",
                || self.exchange(&key.token_uri, &assertion),
                on_retry,
            )
            .await
    }

    async fn exchange(&self, token_uri: &str, assertion: &str) -> Result<String, SourceError> {
        let response = self
            .client
            .post(token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)])
            .send()
            .await?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {
                let token: TokenResponse = response.json().await?;
                Ok(token.access_token)
            }
            400 | 401 | 403 => Err(SourceError::ServiceAccountRejected { status }),
            _ => Err(SourceError::Status {
                status,
                url: token_uri.to_string(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_JSON: &str = r#"{
        "type": "service_account",
        "client_email": "sync@project.iam.gserviceaccount.com",
        "private_key": "not-a-pem-key",
        "private_key_id": "k1"
    }"#;

    #[test]
    fn test_key_parsing_defaults_token_uri() {
        let key = ServiceAccountKey::from_json(KEY_JSON).unwrap();

        assert_eq!(key.client_email, "sync@project.iam.gserviceaccount.com");
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
        assert_eq!(key.private_key_id.as_deref(), Some("k1"));
    }

    #[test]
    fn test_key_requires_email_and_private_key() {
        let err = ServiceAccountKey::from_json(r#"{"client_email": "", "private_key": "x"}"#)
            .unwrap_err();
        assert!(matches!(err, SourceError::Credential(_)));

        let err = ServiceAccountKey::from_json("not json").unwrap_err();
        assert!(matches!(err, SourceError::Credential(_)));
    }

    #[test]
    fn test_claims_are_read_only_and_short_lived() {
        let key = ServiceAccountKey::from_json(KEY_JSON).unwrap();
        let claims = Claims::for_key(&key, 1_000);

        assert_eq!(claims.scope, SHEETS_READONLY_SCOPE);
        assert_eq!(claims.aud, DEFAULT_TOKEN_URI);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_invalid_pem_is_a_credential_error() {
        let key = ServiceAccountKey::from_json(KEY_JSON).unwrap();
        let err = TokenProvider::assertion(&key).unwrap_err();
        assert!(matches!(err, SourceError::Credential(_)));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let source = ServiceAccountSource::File("/nonexistent/roster-sync/sa.json".into());
        let err = ServiceAccountKey::load(&source).await.unwrap_err();
        assert!(matches!(err, SourceError::Credential(msg) if msg.contains("cannot read")));
    }
}
