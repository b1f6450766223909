//! Shared-memory pools
//!
//! In remote-application mode window buffers can be handed to the client
//! through a file under a shared directory instead of the wire. Each pool
//! is a file named by a braced GUID (38 characters), mapped read-write and
//! unlinked again when the pool is dropped.

use memmap2::MmapMut;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Length of a pool name, `{xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx}`
pub const POOL_NAME_LEN: usize = 38;

/// A mapped, named shared-memory file
#[derive(Debug)]
pub struct SharedMemoryPool {
    name: String,
    path: PathBuf,
    size: usize,
    map: Mutex<MmapMut>,
}

impl SharedMemoryPool {
    /// Create and map a `size`-byte pool under `dir`
    pub fn create(dir: &Path, size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "shared memory pool size must be non-zero",
            ));
        }

        let name = Uuid::new_v4().braced().to_string();
        let path = dir.join(&name);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)?;

        // SAFETY: the file was just created with O_EXCL under a random
        // name and is only resized by this pool.
        #[allow(unsafe_code)]
        let mapped = file
            .set_len(size as u64)
            .and_then(|_| unsafe { MmapMut::map_mut(&file) });
        let map = match mapped {
            Ok(map) => map,
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
        };

        debug!("Created shared memory pool {} ({} bytes)", name, size);

        Ok(Self {
            name,
            path,
            size,
            map: Mutex::new(map),
        })
    }

    /// Braced GUID naming the pool file
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path of the pool file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Copy `data` into the pool at `offset`
    pub fn write_at(&self, offset: usize, data: &[u8]) -> io::Result<()> {
        let end = self.checked_end(offset, data.len())?;
        self.map.lock()[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Copy `len` bytes out of the pool at `offset`
    pub fn read_at(&self, offset: usize, len: usize) -> io::Result<Vec<u8>> {
        let end = self.checked_end(offset, len)?;
        Ok(self.map.lock()[offset..end].to_vec())
    }

    fn checked_end(&self, offset: usize, len: usize) -> io::Result<usize> {
        offset
            .checked_add(len)
            .filter(|end| *end <= self.size)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "range {}+{} outside pool of {} bytes",
                        offset, len, self.size
                    ),
                )
            })
    }
}

impl Drop for SharedMemoryPool {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed shared memory pool {}", self.name),
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_name_is_braced_guid() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SharedMemoryPool::create(dir.path(), 4096).unwrap();

        assert_eq!(pool.name().len(), POOL_NAME_LEN);
        assert!(pool.name().starts_with('{') && pool.name().ends_with('}'));
        assert_eq!(pool.path().parent(), Some(dir.path()));
        assert_eq!(std::fs::metadata(pool.path()).unwrap().len(), 4096);
    }

    #[test]
    fn test_write_read_and_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SharedMemoryPool::create(dir.path(), 16).unwrap();

        pool.write_at(4, b"rdp").unwrap();
        assert_eq!(pool.read_at(4, 3).unwrap(), b"rdp");
        assert!(pool.write_at(14, b"abc").is_err());
        assert!(pool.read_at(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_unlinked_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SharedMemoryPool::create(dir.path(), 64).unwrap();
        let path = pool.path().to_path_buf();
        assert!(path.exists());
        drop(pool);
        assert!(!path.exists());
    }

    #[test]
    fn test_zero_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SharedMemoryPool::create(dir.path(), 0).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
