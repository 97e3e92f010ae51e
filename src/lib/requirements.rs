//! Readiness gate for every privacy-sensitive operation.

/// One prerequisite for decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptionRequirement {
    pub key: &'static str,
    pub label: &'static str,
    pub is_met: bool,
}

/// Aggregate readiness derived from the external signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionRequirements {
    pub can_decrypt: bool,
    pub requirements: Vec<DecryptionRequirement>,
    /// Comma-joined labels of unmet requirements; `None` when ready.
    pub missing_message: Option<String>,
}

pub const WALLET_LABEL: &str = "Wallet connection";
pub const ENGINE_LABEL: &str = "FHE engine";
pub const SIGNER_LABEL: &str = "Signer";

/// Evaluate readiness from the latest signals.
///
/// Ordering of `requirements` and of the labels in `missing_message` is
/// fixed: wallet, engine, signer.
pub fn evaluate(wallet_connected: bool, engine_ready: bool, signer_ready: bool) -> DecryptionRequirements {
    let requirements = vec![
        DecryptionRequirement {
            key: "wallet",
            label: WALLET_LABEL,
            is_met: wallet_connected,
        },
        DecryptionRequirement {
            key: "fhe",
            label: ENGINE_LABEL,
            is_met: engine_ready,
        },
        DecryptionRequirement {
            key: "signer",
            label: SIGNER_LABEL,
            is_met: signer_ready,
        },
    ];

    let missing: Vec<&str> = requirements
        .iter()
        .filter(|r| !r.is_met)
        .map(|r| r.label)
        .collect();

    let can_decrypt = missing.is_empty();
    let missing_message = (!can_decrypt).then(|| missing.join(", "));

    DecryptionRequirements {
        can_decrypt,
        requirements,
        missing_message,
    }
}
