use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Generate a timestamped HMAC-SHA256 payload signature.
///
/// Format: hex(HMAC-SHA256("{timestamp}.{body}", secret))
pub fn generate_signature(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a timestamped HMAC-SHA256 signature using constant-time comparison.
pub fn verify_signature(
    secret: &str,
    timestamp: i64,
    body: &[u8],
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let expected_signature = generate_signature(secret, timestamp, body)?;

    let expected_bytes = expected_signature.as_bytes();
    let signature_bytes = signature.as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(signature_bytes).into())
}

/// Build the `t=<timestamp>,v1=<signature>` header value for a payload.
pub fn signature_header(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, anyhow::Error> {
    Ok(format!(
        "t={},v1={}",
        timestamp,
        generate_signature(secret, timestamp, body)?
    ))
}

/// Parsed `t=<timestamp>,v1=<signature>[,v1=...]` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl SignatureHeader {
    /// Parse a signature header. Unknown keys are ignored; several `v1`
    /// entries are allowed while a secret is being rotated.
    pub fn parse(header: &str) -> Option<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            if let Some((key, value)) = part.trim().split_once('=') {
                match key {
                    "t" => timestamp = value.parse::<i64>().ok(),
                    "v1" if !value.is_empty() => signatures.push(value.to_string()),
                    _ => {}
                }
            }
        }

        match timestamp {
            Some(timestamp) if !signatures.is_empty() => Some(Self {
                timestamp,
                signatures,
            }),
            _ => None,
        }
    }

    /// True when any of the carried signatures matches the payload.
    pub fn matches(&self, secret: &str, body: &[u8]) -> Result<bool, anyhow::Error> {
        for signature in &self.signatures {
            if verify_signature(secret, self.timestamp, body, signature)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
