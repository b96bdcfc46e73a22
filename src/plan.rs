//! Incremental planning by remote-stat comparison
//!
//! Before a sync push, every planned destination is stat'd on the remote
//! and entries whose remote copy is already current are flagged to skip.
//! STAT requests are pipelined: a batch of requests goes out back-to-back,
//! then the responses are read in the same order. Batches are bounded so a
//! huge plan cannot wedge both sides in blocking writes.

use crate::error::SyncError;
use crate::protocol::{self, mode};
use crate::session::{Stream, SyncSession};
use crate::walk::TransferRecord;

type Result<T> = std::result::Result<T, SyncError>;

/// Upper bound on in-flight pipelined STAT requests.
pub const STAT_PIPELINE_MAX: usize = 1024;

/// Marks records whose remote copy matches: equal size, and an mtime match
/// under the shared mode bits. Regular files need equal mtimes; symlink
/// mtimes cannot be set remotely, so a remote copy at least as new counts.
pub fn mark_up_to_date<S: Stream>(
    sc: &mut SyncSession<S>,
    records: &mut [TransferRecord],
) -> Result<()> {
    for batch in records.chunks_mut(STAT_PIPELINE_MAX) {
        for record in batch.iter() {
            sc.send_request(protocol::ID_STAT, &record.dst)?;
        }
        for record in batch.iter_mut() {
            let st = sc.read_stat()?;
            if st.size as u64 != record.size {
                continue;
            }
            let shared = record.mode & st.mode;
            if (mode::is_reg(shared) && st.mtime == record.mtime)
                || (mode::is_lnk(shared) && st.mtime >= record.mtime)
            {
                record.skip = true;
            }
        }
    }
    Ok(())
}
