//! 試算表 API 的存取權杖
//!
//! 可直接給定 access token，或以服務帳戶金鑰 (JSON) 簽出 RS256 JWT，
//! 再向金鑰中的 `token_uri` 以 jwt-bearer grant 換取權杖。

use crate::utils::error::{EtlError, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::Mutex;

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
// 到期前提早換新
const REFRESH_MARGIN_SECS: i64 = 60;

/// 服務帳戶金鑰檔中用得到的欄位
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: Option<String>,
    pub client_email: String,
    pub private_key: String,
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self> {
        let key: Self = serde_json::from_str(json)?;
        if let Some(kind) = key.key_type.as_deref().filter(|k| *k != "service_account") {
            return Err(EtlError::InvalidConfigValueError {
                field: "sheets.credentials_path".to_string(),
                value: kind.to_string(),
                reason: "expected a service_account key".to_string(),
            });
        }
        Ok(key)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| EtlError::ConfigError {
            message: format!("cannot read credentials file {}: {}", path.display(), e),
        })?;
        Self::from_json(&json)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// 以服務帳戶金鑰換取並快取權杖
pub struct ServiceAccountAuth {
    client: Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scope: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    pub fn new(key: ServiceAccountKey) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            EtlError::InvalidConfigValueError {
                field: "sheets.credentials_path".to_string(),
                value: key.client_email.clone(),
                reason: format!("private_key is not a valid RSA PEM: {}", e),
            }
        })?;

        Ok(Self {
            client: Client::new(),
            key,
            encoding_key,
            scope: SHEETS_SCOPE.to_string(),
            cached: Mutex::new(None),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(ServiceAccountKey::from_file(path)?)
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// 簽出換取權杖用的 JWT
    pub fn signed_assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let iat = now.timestamp();
        let claims = AssertionClaims {
            iss: self.key.client_email.clone(),
            scope: self.scope.clone(),
            aud: self.key.token_uri.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        encode(&header, &claims, &self.encoding_key).map_err(|e| EtlError::ConfigError {
            message: format!("failed to sign token assertion: {}", e),
        })
    }

    async fn exchange(&self, now: DateTime<Utc>) -> Result<CachedToken> {
        let assertion = self.signed_assertion(now)?;
        tracing::debug!("🔑 Exchanging service account assertion for {}", self.key.client_email);

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EtlError::FetchError {
                status: status.as_u16(),
                body,
            });
        }

        let body: TokenResponse = response.json().await?;
        Ok(CachedToken {
            token: body.access_token,
            expires_at: now + Duration::seconds(body.expires_in),
        })
    }

    /// 快取中的權杖快到期時才重新換取
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref() {
            if token.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > now {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.exchange(now).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

/// 試算表請求的授權方式
pub enum SheetsAuth {
    AccessToken(String),
    ServiceAccount(ServiceAccountAuth),
}

impl SheetsAuth {
    pub async fn bearer_token(&self) -> Result<String> {
        match self {
            SheetsAuth::AccessToken(token) => Ok(token.clone()),
            SheetsAuth::ServiceAccount(auth) => auth.access_token().await,
        }
    }
}

impl From<String> for SheetsAuth {
    fn from(token: String) -> Self {
        SheetsAuth::AccessToken(token)
    }
}

impl From<&str> for SheetsAuth {
    fn from(token: &str) -> Self {
        SheetsAuth::AccessToken(token.to_string())
    }
}

impl From<ServiceAccountAuth> for SheetsAuth {
    fn from(auth: ServiceAccountAuth) -> Self {
        SheetsAuth::ServiceAccount(auth)
    }
}
