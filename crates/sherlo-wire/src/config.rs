use sha2::{Digest, Sha256};
use sherlo_types::DeviceConfig;

use crate::WireError;

/// Key mixed into the config digest. The runner provisions
/// `config.sherlo.sig` with the same scheme; a config whose signature
/// does not verify is rejected outright.
pub const CONFIG_SIGNING_KEY: &str = "sherlo-device-config-v1";

/// Hex digest of `payload` under the signing key.
pub fn sign_config(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hasher.update(CONFIG_SIGNING_KEY.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn verify_signature(payload: &str, signature: &str) -> bool {
    // Constant-time comparison is not required here: the signature gates
    // trust in a locally provisioned file, not a network exchange.
    sign_config(payload) == signature.trim()
}

/// Verifies and parses the signed device configuration.
///
/// Both inputs are raw file contents; embedded newlines are stripped
/// before verification, matching how the runner writes the files. A
/// missing or wrong signature is fatal for the session.
pub fn decode_config(config_text: &str, signature_text: &str) -> Result<DeviceConfig, WireError> {
    let payload: String = config_text.chars().filter(|c| *c != '\n').collect();
    let signature: String = signature_text.chars().filter(|c| *c != '\n').collect();

    if !verify_signature(&payload, &signature) {
        return Err(WireError::InvalidConfigSignature);
    }

    facet_json::from_str(&payload).map_err(|error| WireError::MalformedConfig(error.to_string()))
}
