use thiserror::Error;

#[derive(Debug, Error)]
pub enum SottoError {
    // ── Transaction errors ───────────────────────────────────────────────────
    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),

    #[error("malformed address: {0:?}")]
    MalformedAddress(String),

    #[error("bad signature")]
    BadSignature,

    #[error("transaction carries a sender but no signature")]
    MissingSignature,

    #[error("sender address does not match the signer public key")]
    AddressMismatch,

    #[error("coinbase amount must equal the mining reward")]
    InvalidCoinbase,

    #[error("insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: u64, have: u64 },

    #[error("duplicate transaction {0}")]
    DuplicateTransaction(String),

    // ── Block / chain errors ─────────────────────────────────────────────────
    #[error("malformed block: {0}")]
    MalformedBlock(String),

    #[error("duplicate block {0}")]
    DuplicateBlock(String),

    #[error("block {index}: stored hash does not match recomputed hash")]
    HashMismatch { index: u64 },

    #[error("block {index}: hash does not meet difficulty {difficulty}")]
    DifficultyNotMet { index: u64, difficulty: u32 },

    #[error("block {index}: previous_hash does not link to the tip")]
    BrokenLinkage { index: u64 },

    #[error("block {index}: timestamp not strictly after its predecessor")]
    NonMonotonicTimestamp { index: u64 },

    #[error("block {index}: transactions overdraw a sender balance")]
    Overdraw { index: u64 },

    #[error("chain does not begin with the fixed genesis block")]
    BadGenesis,

    #[error("received chain is not longer than the local chain")]
    ChainNotLonger,

    #[error("chain tip moved while the block was being mined")]
    StaleTip,
}
