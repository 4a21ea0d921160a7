//! The nasty filesystem handle.

use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use logging::debug_log;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::Nastiness;

/// Filesystem access that silently corrupts reads and writes.
///
/// Every operation opens the file, seeks, performs one transfer, and closes
/// the handle again; callers that need certainty pair a write with a
/// read-back comparison. Corruption flips exactly one bit of the bytes in
/// flight: a corrupted write persists the flipped byte, a corrupted read
/// returns it without touching the file. Renames are exempt; the fault
/// model targets data, not directory entries.
pub struct NastyFs {
    nastiness: Nastiness,
    rng: Mutex<StdRng>,
}

impl NastyFs {
    /// A handle with entropy-seeded faults.
    #[must_use]
    pub fn new(nastiness: Nastiness) -> Self {
        Self {
            nastiness,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// A handle whose fault sequence can be replayed.
    #[must_use]
    pub fn with_seed(nastiness: Nastiness, seed: u64) -> Self {
        Self {
            nastiness,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// The configured nastiness level.
    #[must_use]
    pub fn nastiness(&self) -> Nastiness {
        self.nastiness
    }

    fn maybe_corrupt(&self, buf: &mut [u8], operation: &str) {
        if buf.is_empty() {
            return;
        }
        let flipped = {
            let Ok(mut rng) = self.rng.lock() else { return };
            if !rng.gen_bool(self.nastiness.file_corrupt_probability()) {
                return;
            }
            let bit = rng.gen_range(0..buf.len() * 8);
            buf[bit / 8] ^= 1 << (bit % 8);
            bit
        };
        debug_log!(Io, 2, "nasty file flipped bit {flipped} during {operation}");
    }

    /// Writes `data` at `offset`, creating the file if absent.
    pub fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut staged = data.to_vec();
        self.maybe_corrupt(&mut staged, "write");
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&staged)?;
        Ok(())
    }

    /// Reads up to `len` bytes at `offset`; shorter only at end of file.
    pub fn read_at(&self, path: &Path, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut file = OpenOptions::new().read(true).open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        buf.truncate(filled);
        self.maybe_corrupt(&mut buf, "read");
        Ok(buf)
    }

    /// Reads the whole file into memory.
    pub fn read_full(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        OpenOptions::new()
            .read(true)
            .open(path)?
            .read_to_end(&mut buf)?;
        self.maybe_corrupt(&mut buf, "read");
        Ok(buf)
    }

    /// The file's current length in bytes.
    pub fn file_len(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    /// Creates the file empty, truncating whatever was there.
    pub fn create_empty(&self, path: &Path) -> io::Result<()> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(())
    }

    /// Renames `from` to `to`. Never corrupted.
    pub fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }
}
