//! ─── Sotto protocol constants ───────────────────────────────────────────────
//!
//! "A ledger spoken under the breath."
//!
//! Values inherited from the reference deployment. Difficulty is a local
//! chain parameter, never encoded in blocks.

// ── Consensus ────────────────────────────────────────────────────────────────

/// Coinbase amount credited to the miner of every block. Consensus-critical:
/// a block carrying a coinbase with any other amount is invalid.
pub const MINING_REWARD: u64 = 1;

/// `previous_hash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Timestamp of the genesis block (Unix seconds).
pub const GENESIS_TIMESTAMP: u64 = 0;

/// Leading zero hex characters a block hash must carry, unless overridden.
pub const DEFAULT_DIFFICULTY: u32 = 4;

/// Difficulty never adjusts below this floor.
pub const MIN_DIFFICULTY: u32 = 1;

/// Target solve time (seconds) used by the local difficulty policy.
pub const EXPECTED_MINE_SECS: u64 = 10;

/// The mining loop re-checks its cancellation flag every this many hashes.
pub const POW_CANCEL_CHECK_HASHES: u64 = 1 << 14;

// ── Networking defaults ──────────────────────────────────────────────────────

/// Default TCP listen port for the peer wire protocol.
pub const DEFAULT_PORT: u16 = 12345;

/// UDP port used for LAN peer announcements.
pub const BROADCAST_PORT: u16 = 5000;

/// Concurrent peer sessions allowed by default.
pub const DEFAULT_MAX_CONNECTIONS: usize = 5;

/// Seconds between periodic chain sync rounds.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 10;

/// Seconds between UDP presence announcements.
pub const DEFAULT_BROADCAST_INTERVAL_SECS: u64 = 2;
