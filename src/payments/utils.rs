use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{Payload, ProviderResponse};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, Method, Url};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, warn};

/// Default provider timeout when none is configured.
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// One outbound provider call, fully described.
#[derive(Debug, Clone)]
pub struct ProviderRequest<'a> {
    pub base_url: &'a str,
    pub endpoint: &'a str,
    pub method: Method,
    pub api_key: &'a str,
    pub public_key: &'a str,
    pub origin: Option<&'a str>,
    pub payload: &'a Payload,
    pub timeout: Duration,
}

/// Attempt-once HTTP client for the mobile-money provider.
///
/// Every call derives a fresh bearer token; nothing is cached between calls.
#[derive(Clone)]
pub struct ProviderHttpClient {
    client: Client,
}

impl ProviderHttpClient {
    pub fn new() -> PaymentResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| PaymentError::NetworkError {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }

    pub async fn request(&self, request: ProviderRequest<'_>) -> PaymentResult<ProviderResponse> {
        let token = bearer_token(request.api_key, request.public_key)?;
        let url = join_url(request.base_url, request.endpoint)?;
        let timeout_ms = request.timeout.as_millis() as u64;

        let mut builder = if request.method == Method::GET {
            self.client.request(Method::GET, with_query(url, request.payload))
        } else {
            self.client.request(request.method.clone(), url)
        };
        builder = builder
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(request.timeout);
        if request.method != Method::GET {
            builder = builder.json(&JsonValue::Object(request.payload.clone()));
        }
        if let Some(origin) = request.origin.filter(|o| !o.trim().is_empty()) {
            builder = builder.header(reqwest::header::ORIGIN, origin);
        }

        // The timer is owned by this future; dropping it on expiry releases it.
        let send = async {
            let response = builder.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let (status, text) = match tokio::time::timeout(request.timeout, send).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) if e.is_timeout() => {
                warn!(endpoint = %request.endpoint, timeout_ms, "provider request timed out");
                return Err(PaymentError::Timeout { timeout_ms });
            }
            Ok(Err(e)) => {
                warn!(endpoint = %request.endpoint, error = %e, "provider request failed");
                return Err(PaymentError::NetworkError {
                    message: format!("provider request failed: {}", e),
                });
            }
            Err(_) => {
                warn!(endpoint = %request.endpoint, timeout_ms, "provider request aborted");
                return Err(PaymentError::Timeout { timeout_ms });
            }
        };

        let data = parse_body(&text);
        debug!(
            endpoint = %request.endpoint,
            status = status.as_u16(),
            body = %data,
            "provider response received"
        );

        Ok(ProviderResponse {
            ok: status.is_success(),
            status: status.as_u16(),
            data,
        })
    }
}

/// Best-effort JSON; anything else comes back as the raw text.
pub fn parse_body(text: &str) -> JsonValue {
    serde_json::from_str(text).unwrap_or_else(|_| JsonValue::String(text.to_string()))
}

/// Encrypts the API key with the provider's RSA public key (PKCS#1 v1.5)
/// and base64-encodes the ciphertext.
pub fn bearer_token(api_key: &str, public_key: &str) -> PaymentResult<String> {
    let key = load_public_key(public_key)?;
    let mut rng = rand::thread_rng();
    let ciphertext = key
        .encrypt(&mut rng, Pkcs1v15Encrypt, api_key.as_bytes())
        .map_err(|e| PaymentError::TokenError {
            message: format!("failed to encrypt api key: {}", e),
        })?;
    Ok(BASE64.encode(ciphertext))
}

/// Accepts a PEM document or the bare base64 body the provider portal hands
/// out, in either SubjectPublicKeyInfo or PKCS#1 form.
pub fn load_public_key(public_key: &str) -> PaymentResult<RsaPublicKey> {
    let trimmed = public_key.trim();
    if trimmed.is_empty() {
        return Err(PaymentError::TokenError {
            message: "public key is empty".to_string(),
        });
    }

    let pem = if trimmed.contains("-----BEGIN") {
        trimmed.replace("\\n", "\n")
    } else {
        wrap_pem(trimmed, "PUBLIC KEY")
    };

    RsaPublicKey::from_public_key_pem(&pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(&pem))
        .or_else(|_| {
            let relabelled = pem
                .replace("BEGIN PUBLIC KEY", "BEGIN RSA PUBLIC KEY")
                .replace("END PUBLIC KEY", "END RSA PUBLIC KEY");
            RsaPublicKey::from_pkcs1_pem(&relabelled)
        })
        .map_err(|e| PaymentError::TokenError {
            message: format!("invalid provider public key: {}", e),
        })
}

fn wrap_pem(body: &str, label: &str) -> String {
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    let lines: Vec<String> = compact
        .as_bytes()
        .chunks(64)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect();
    format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----\n",
        lines.join("\n")
    )
}

fn join_url(base_url: &str, endpoint: &str) -> PaymentResult<Url> {
    let joined = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| PaymentError::ValidationError {
        message: format!("invalid provider url {}: {}", joined, e),
        field: Some("base_url".to_string()),
    })
}

/// Query parameters for GET calls; null and empty values are omitted.
fn with_query(mut url: Url, payload: &Payload) -> Url {
    let params: Vec<(String, String)> = payload
        .iter()
        .filter_map(|(key, value)| {
            let text = match value {
                JsonValue::Null => return None,
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            (!text.is_empty()).then(|| (key.clone(), text))
        })
        .collect();
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn non_json_body_is_returned_as_text() {
        assert_eq!(parse_body("Service Unavailable"), json!("Service Unavailable"));
        assert_eq!(
            parse_body(r#"{"output_ResponseCode":"INS-0"}"#)["output_ResponseCode"],
            "INS-0"
        );
    }

    #[test]
    fn get_query_skips_empty_values() {
        let payload = json!({
            "input_QueryReference": "TX1",
            "input_ThirdPartyReference": "",
            "input_ServiceProviderCode": null,
            "input_Amount": 10
        });
        let url = with_query(
            Url::parse("https://api.example.test/status/").unwrap(),
            payload.as_object().unwrap(),
        );
        let query = url.query().unwrap_or_default().to_string();
        assert!(query.contains("input_QueryReference=TX1"));
        assert!(query.contains("input_Amount=10"));
        assert!(!query.contains("input_ThirdPartyReference"));
        assert!(!query.contains("input_ServiceProviderCode"));
    }

    #[test]
    fn url_join_handles_slashes() {
        let url = join_url("https://api.example.test:18352/", "/ipg/v1x/c2bPayment/").unwrap();
        assert_eq!(url.as_str(), "https://api.example.test:18352/ipg/v1x/c2bPayment/");
    }

    #[test]
    fn empty_public_key_is_rejected() {
        assert!(matches!(
            bearer_token("key", "   "),
            Err(PaymentError::TokenError { .. })
        ));
        assert!(matches!(
            load_public_key("not-base64-at-all"),
            Err(PaymentError::TokenError { .. })
        ));
    }

    #[test]
    fn bare_key_is_wrapped_in_pem_lines() {
        let pem = wrap_pem(&"A".repeat(130), "PUBLIC KEY");
        let lines: Vec<&str> = pem.lines().collect();
        assert_eq!(lines[0], "-----BEGIN PUBLIC KEY-----");
        assert_eq!(lines[1].len(), 64);
        assert_eq!(lines[3].len(), 2);
        assert_eq!(lines[4], "-----END PUBLIC KEY-----");
    }
}
