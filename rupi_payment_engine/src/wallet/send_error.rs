//! Classification of payout send failures.
//!
//! A failure is *safe* when the node's error text proves the transaction never entered the network, so refunding
//! the reservation cannot double-spend. Everything else is ambiguous and must freeze the order for the recovery
//! path. The match is on error text because that is all EVM nodes reliably expose; the pattern list is the
//! well-known set of pre-broadcast rejections.
use crate::traits::WalletError;

const SAFE_PATTERNS: [&str; 5] =
    ["insufficient funds", "gas limit", "reverted", "nonce too low", "replacement fee too low"];

/// `true` when the error proves no funds left the wallet.
pub fn is_safe_failure(error: &WalletError) -> bool {
    match error {
        WalletError::TxBroadcasted { .. } => false,
        WalletError::Rpc(message) => {
            let lowered = message.to_ascii_lowercase();
            SAFE_PATTERNS.iter().any(|p| lowered.contains(p))
        },
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_rejections_are_safe() {
        for message in [
            "insufficient funds for gas * price + value",
            "exceeds block gas limit",
            "execution reverted",
            "nonce too low",
            "replacement fee too low",
            "INSUFFICIENT FUNDS",
        ] {
            assert!(is_safe_failure(&WalletError::Rpc(message.into())), "{message} should be safe");
        }
    }

    #[test]
    fn everything_else_is_ambiguous() {
        assert!(!is_safe_failure(&WalletError::Rpc("connection reset by peer".into())));
        assert!(!is_safe_failure(&WalletError::Transport("timeout".into())));
        assert!(!is_safe_failure(&WalletError::TxBroadcasted { tx_hash: "0xdef".into() }));
    }
}
