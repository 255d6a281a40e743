use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};

use super::{EncryptionContext, GeneratedDataKey, KmsClient};
use crate::error::ProviderError;
use crate::keys::SymmetricKey;

/// KMS client that talks to an HTTP endpoint.
///
/// Compatible with:
/// - AWS KMS (`GenerateDataKey` / `Encrypt` / `Decrypt`)
/// - Any KMS that exposes a similar JSON API
///
/// For production AWS use, swap the HTTP calls for the real SDK.
/// This implementation shows the protocol shape, including the
/// `EncryptionContext` map that the service authenticates against the
/// ciphertext.
pub struct HttpKms {
    endpoint: Option<String>,
}

#[derive(Serialize)]
struct GenerateDataKeyRequest<'a> {
    #[serde(rename = "KeyId")]
    key_id: &'a str,
    #[serde(rename = "NumberOfBytes")]
    number_of_bytes: usize,
    #[serde(rename = "EncryptionContext")]
    encryption_context: &'a EncryptionContext,
}

#[derive(Deserialize)]
struct GenerateDataKeyResponse {
    #[serde(rename = "Plaintext")]
    plaintext: String, // base64
    #[serde(rename = "CiphertextBlob")]
    ciphertext_blob: String, // base64
}

#[derive(Serialize)]
struct EncryptRequest<'a> {
    #[serde(rename = "KeyId")]
    key_id: &'a str,
    #[serde(rename = "Plaintext")]
    plaintext: String,
    #[serde(rename = "EncryptionContext")]
    encryption_context: &'a EncryptionContext,
}

#[derive(Deserialize)]
struct EncryptResponse {
    #[serde(rename = "CiphertextBlob")]
    ciphertext_blob: String,
}

#[derive(Serialize)]
struct DecryptRequest<'a> {
    #[serde(rename = "KeyId")]
    key_id: &'a str,
    #[serde(rename = "CiphertextBlob")]
    ciphertext_blob: String,
    #[serde(rename = "EncryptionContext")]
    encryption_context: &'a EncryptionContext,
}

#[derive(Deserialize)]
struct DecryptResponse {
    #[serde(rename = "Plaintext")]
    plaintext: String,
}

impl HttpKms {
    pub fn new(endpoint: Option<String>) -> Self {
        Self { endpoint }
    }

    fn base_url(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or("https://kms.us-east-1.amazonaws.com")
    }

    fn post<T: serde::de::DeserializeOwned>(
        &self,
        target: &str,
        body: impl Serialize,
    ) -> Result<T, ProviderError> {
        let value = serde_json::to_value(&body)
            .map_err(|e| ProviderError::Kms(format!("request encode failed: {e}")))?;
        log::debug!("KMS call {target} via {}", self.base_url());
        ureq::post(self.base_url())
            .set("X-Amz-Target", target)
            .set("Content-Type", "application/x-amz-json-1.1")
            .send_json(value)
            .map_err(|e| ProviderError::Kms(format!("{target} failed: {e}")))?
            .into_json()
            .map_err(|e| ProviderError::Kms(format!("{target} response decode failed: {e}")))
    }
}

impl KmsClient for HttpKms {
    fn generate_data_key(
        &self,
        key_id: &str,
        num_bytes: usize,
        context: &EncryptionContext,
    ) -> Result<GeneratedDataKey, ProviderError> {
        let resp: GenerateDataKeyResponse = self.post(
            "TrentService.GenerateDataKey",
            GenerateDataKeyRequest {
                key_id,
                number_of_bytes: num_bytes,
                encryption_context: context,
            },
        )?;
        let plaintext = decode_field(&resp.plaintext, "Plaintext")?;
        if plaintext.len() != num_bytes {
            return Err(ProviderError::Kms(format!(
                "KMS returned {} byte key, expected {num_bytes}",
                plaintext.len()
            )));
        }
        Ok(GeneratedDataKey {
            plaintext: SymmetricKey::new(plaintext),
            ciphertext: decode_field(&resp.ciphertext_blob, "CiphertextBlob")?,
        })
    }

    fn encrypt(
        &self,
        key_id: &str,
        plaintext: &[u8],
        context: &EncryptionContext,
    ) -> Result<Vec<u8>, ProviderError> {
        let resp: EncryptResponse = self.post(
            "TrentService.Encrypt",
            EncryptRequest {
                key_id,
                plaintext: Base64::encode_string(plaintext),
                encryption_context: context,
            },
        )?;
        decode_field(&resp.ciphertext_blob, "CiphertextBlob")
    }

    fn decrypt(
        &self,
        key_id: &str,
        ciphertext: &[u8],
        context: &EncryptionContext,
    ) -> Result<Vec<u8>, ProviderError> {
        let resp: DecryptResponse = self.post(
            "TrentService.Decrypt",
            DecryptRequest {
                key_id,
                ciphertext_blob: Base64::encode_string(ciphertext),
                encryption_context: context,
            },
        )?;
        decode_field(&resp.plaintext, "Plaintext")
    }
}

fn decode_field(encoded: &str, field: &str) -> Result<Vec<u8>, ProviderError> {
    Base64::decode_vec(encoded)
        .map_err(|e| ProviderError::Kms(format!("{field} is not valid base64: {e}")))
}
