//! Defeating silent filesystem corruption by re-reading until digests agree.

use std::path::Path;

use logging::debug_log;
use nasty::NastyFs;

use crate::EngineError;

/// Writes `data` at `offset` and reads it back until the read-back digest
/// matches, returning the number of attempts spent.
///
/// Each attempt is a full write-seek-read cycle through the nasty handle.
/// Corruption is assumed independent per attempt, so the probability that
/// every attempt up to `cap` fails decays exponentially; a run that does
/// exhaust the cap is reported as [`EngineError::PersistentCorruption`] and
/// the session is abandoned with the staging file left in place.
pub fn verified_write(
    fs: &NastyFs,
    path: &Path,
    offset: u64,
    data: &[u8],
    cap: u32,
) -> Result<u32, EngineError> {
    let want = checksums::sha1_hex(data);
    for attempt in 1..=cap {
        fs.write_at(path, offset, data).map_err(|source| EngineError::File {
            path: path.to_path_buf(),
            source,
        })?;
        let back = fs.read_at(path, offset, data.len()).map_err(|source| {
            EngineError::File {
                path: path.to_path_buf(),
                source,
            }
        })?;
        if back.len() == data.len() && checksums::sha1_hex(&back) == want {
            if attempt > 1 {
                debug_log!(Io, 1, "verified write at offset {offset} took {attempt} attempts");
            }
            return Ok(attempt);
        }
        debug_log!(Io, 2, "read-back mismatch at offset {offset}, attempt {attempt}");
    }
    Err(EngineError::PersistentCorruption {
        path: path.to_path_buf(),
        attempts: cap,
    })
}

/// Reads the whole file until two consecutive reads agree on a digest.
///
/// A single nasty read can silently return flipped bits; two independent
/// reads agreeing on the same SHA-1 makes a surviving corruption as unlikely
/// as a digest collision. Used by the sender to snapshot the source file
/// before building packets and computing the end-to-end claim.
pub fn stable_read(fs: &NastyFs, path: &Path, cap: u32) -> Result<Vec<u8>, EngineError> {
    let mut previous: Option<(String, Vec<u8>)> = None;
    for attempt in 1..=cap {
        let bytes = fs.read_full(path).map_err(|source| EngineError::File {
            path: path.to_path_buf(),
            source,
        })?;
        let digest = checksums::sha1_hex(&bytes);
        match previous {
            Some((ref last, _)) if *last == digest => {
                if attempt > 2 {
                    debug_log!(Io, 1, "stable read of {} took {attempt} attempts", path.display());
                }
                return Ok(bytes);
            }
            _ => previous = Some((digest, bytes)),
        }
    }
    Err(EngineError::PersistentCorruption {
        path: path.to_path_buf(),
        attempts: cap,
    })
}
