use std::sync::atomic::{AtomicBool, Ordering};

use sotto_core::block::{hash_meets_difficulty, Block};
use sotto_core::constants::POW_CANCEL_CHECK_HASHES;

/// Search for a nonce giving `block` a hash with `difficulty` leading zero
/// hex characters. Returns the mined block, or `None` once `cancel` is
/// observed set — the flag is re-checked every `POW_CANCEL_CHECK_HASHES`
/// attempts so a shutdown or a superseding tip never stalls on a long search.
///
/// CPU-bound: callers run this on a blocking thread, never on the async
/// runtime.
pub fn mine_block(mut block: Block, difficulty: u32, cancel: &AtomicBool) -> Option<Block> {
    let mut since_check = 0u64;
    loop {
        if hash_meets_difficulty(&block.hash, difficulty) {
            return Some(block);
        }
        since_check += 1;
        if since_check >= POW_CANCEL_CHECK_HASHES {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            since_check = 0;
        }
        block.nonce = block.nonce.wrapping_add(1);
        block.hash = block.compute_hash();
    }
}
