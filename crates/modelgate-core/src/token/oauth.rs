//! OAuth refresh-token exchange.

use modelgate_types::{AuthData, GatewayError, GatewayResult};
use serde::Deserialize;

/// Token endpoint response. Providers may rotate the refresh token.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

/// POST `grant_type=refresh_token` to the provider's token endpoint.
///
/// `client_secret` is included only when the credential carries one; PKCE
/// public clients refresh with `client_id` alone.
pub async fn refresh_access_token(
    http: &reqwest::Client,
    auth: &AuthData,
) -> GatewayResult<TokenResponse> {
    let token_url = auth
        .token_url
        .as_deref()
        .ok_or_else(|| GatewayError::OAuth("credential has no token_url".to_string()))?;
    let refresh_token = auth
        .refresh_token
        .as_deref()
        .ok_or_else(|| GatewayError::OAuth("credential has no refresh_token".to_string()))?;
    let client_id = auth
        .client_id
        .as_deref()
        .ok_or_else(|| GatewayError::OAuth("credential has no client_id".to_string()))?;

    let mut form: Vec<(&str, &str)> = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", client_id),
    ];
    if let Some(secret) = auth.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }

    let response = http
        .post(token_url)
        .form(&form)
        .send()
        .await
        .map_err(|e| GatewayError::Network(format!("token endpoint: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::OAuth(format!(
            "token endpoint returned {}: {}",
            status, body
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| GatewayError::OAuth(format!("token response parse: {}", e)))
}
