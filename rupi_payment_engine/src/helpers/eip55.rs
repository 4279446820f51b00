//! EVM address validation and checksum normalisation.
use sha3::{Digest, Keccak256};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("'{0}' is not a 0x-prefixed 40-hex-digit address")]
    Malformed(String),
    #[error("Address checksum does not match; re-copy the address exactly as issued")]
    ChecksumMismatch,
}

/// Validate an EVM address and return its EIP-55 checksummed form.
///
/// All-lowercase (or all-uppercase) input carries no checksum and is accepted and normalised. Mixed-case input is
/// asserting a checksum; when it does not verify, the address is rejected rather than silently corrected, so the
/// caller is forced to re-supply the exact address.
pub fn checksum_address(input: &str) -> Result<String, AddressError> {
    let trimmed = input.trim();
    let hex_part = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X"));
    let hex_part = hex_part.ok_or_else(|| AddressError::Malformed(input.to_string()))?;
    if hex_part.len() != 40 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AddressError::Malformed(input.to_string()));
    }

    let lower = hex_part.to_ascii_lowercase();
    let digest = Keccak256::digest(lower.as_bytes());
    let mut checksummed = String::with_capacity(42);
    checksummed.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (digest[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            checksummed.push(c.to_ascii_uppercase());
        } else {
            checksummed.push(c);
        }
    }

    let has_upper = hex_part.bytes().any(|b| b.is_ascii_uppercase());
    let has_lower = hex_part.bytes().any(|b| b.is_ascii_lowercase());
    if has_upper && has_lower && checksummed[2..] != *hex_part {
        return Err(AddressError::ChecksumMismatch);
    }
    Ok(checksummed)
}

#[cfg(test)]
mod test {
    use super::*;

    // Checksummed vectors from the EIP-55 reference.
    const VECTORS: [&str; 4] = [
        "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
        "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
        "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
        "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
    ];

    #[test]
    fn lowercase_is_normalized() {
        for vector in VECTORS {
            let lower = vector.to_ascii_lowercase();
            assert_eq!(checksum_address(&lower).unwrap(), vector);
        }
    }

    #[test]
    fn valid_checksum_is_accepted() {
        for vector in VECTORS {
            assert_eq!(checksum_address(vector).unwrap(), vector);
        }
    }

    #[test]
    fn wrong_case_is_rejected_not_corrected() {
        // Flip the case of one letter in a checksummed address.
        let tampered = "0x5aaeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
        assert_eq!(checksum_address(tampered), Err(AddressError::ChecksumMismatch));
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert!(matches!(checksum_address("deadbeef"), Err(AddressError::Malformed(_))));
        assert!(matches!(checksum_address("0x1234"), Err(AddressError::Malformed(_))));
        assert!(matches!(checksum_address("0xZZaeb6053f3e94c9b9a09f33669435e7ef1beaed"), Err(AddressError::Malformed(_))));
    }
}
