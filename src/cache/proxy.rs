//! Constant-resource proxies
//!
//! A proxy stands in for a serialisable resource during compilation. Small
//! resources stay resident as live values. Larger ones are kept as compressed
//! bytes in memory, or spilled to a temporary file when even the compressed
//! form is above the size threshold. Only the live variant avoids
//! deserialisation: every other `get` rebuilds the value from bytes.

use std::borrow::Cow;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::compression::{Compressor, Packed};
use crate::config::ProxyCacheConfig;
use crate::error::{corrupted_data, ForgeError, ForgeResult};
use crate::serialisation::{read_versioned, write_versioned, Versioned};

/// Where a proxy keeps its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyLocation {
    /// Live value
    Resident,
    /// Serialised bytes in memory
    Memory { size: usize, compressed: bool },
    /// Serialised bytes in a temporary file
    File { path: PathBuf, compressed: bool },
}

/// Source of a resource value
///
/// Callers must assume `get` may deserialise on every call.
pub trait ResourceProxy<R>: Send + Sync + fmt::Debug {
    fn get(&self) -> ForgeResult<Arc<R>>;

    fn location(&self) -> ProxyLocation;
}

/// Proxy over a live value
#[derive(Debug)]
pub struct InMemoryProxy<R> {
    value: Arc<R>,
}

impl<R> InMemoryProxy<R> {
    pub fn new(value: Arc<R>) -> Self {
        Self { value }
    }
}

impl<R: fmt::Debug + Send + Sync> ResourceProxy<R> for InMemoryProxy<R> {
    fn get(&self) -> ForgeResult<Arc<R>> {
        Ok(self.value.clone())
    }

    fn location(&self) -> ProxyLocation {
        ProxyLocation::Resident
    }
}

/// Counters of the temporary file traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyStats {
    pub files_written: u64,
    pub bytes_written: u64,
    pub files_read: u64,
    pub bytes_read: u64,
}

/// Shared state of every proxy created during one compilation
#[derive(Debug)]
pub struct ProxyFileContext {
    enabled: bool,
    min_proxy_file_size: u64,
    max_file_create_attempts: u32,
    temp_dir: PathBuf,
    compressor: Compressor,
    current_file_index: AtomicU64,
    files_written: AtomicU64,
    bytes_written: AtomicU64,
    files_read: AtomicU64,
    bytes_read: AtomicU64,
}

impl ProxyFileContext {
    pub fn new(config: &ProxyCacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            min_proxy_file_size: config.min_proxy_file_size,
            max_file_create_attempts: config.max_file_create_attempts.max(1),
            temp_dir: config.resolved_temp_dir(),
            compressor: Compressor::new(config.compression, config.compression_level),
            // Random start so concurrent processes rarely probe the same names
            current_file_index: AtomicU64::new(rand::random::<u32>() as u64),
            files_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            files_read: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn min_proxy_file_size(&self) -> u64 {
        self.min_proxy_file_size
    }

    pub fn stats(&self) -> ProxyStats {
        ProxyStats {
            files_written: self.files_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            files_read: self.files_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }

    fn next_file_index(&self) -> u64 {
        let mut current = self.current_file_index.load(Ordering::Relaxed);
        loop {
            match self.current_file_index.compare_exchange_weak(
                current,
                current.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(index) => return index,
                Err(actual) => current = actual,
            }
        }
    }

    fn create_temp_file(&self) -> ForgeResult<(PathBuf, File)> {
        let pid = std::process::id();
        for attempt in 0..self.max_file_create_attempts {
            let index = self.next_file_index();
            let path = self.temp_dir.join(format!("mut.temp.{pid}.{index:016x}"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) => {
                    log::warn!(
                        "Failed to create proxy file {} (attempt {}): {}",
                        path.display(),
                        attempt + 1,
                        e
                    );
                }
            }
        }
        Err(ForgeError::TempFileCreation {
            attempts: self.max_file_create_attempts,
            dir: self.temp_dir.clone(),
        })
    }

    /// Write `payload` behind a checksum into a fresh temporary file
    fn write_file(&self, payload: &[u8]) -> ForgeResult<PathBuf> {
        let (path, mut file) = self.create_temp_file()?;
        let checksum = crc32fast::hash(payload);
        let written = file
            .write_all(&checksum.to_le_bytes())
            .and_then(|_| file.write_all(payload))
            .and_then(|_| file.flush());
        if let Err(e) = written {
            let _ = std::fs::remove_file(&path);
            return Err(e.into());
        }
        self.files_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(payload.len() as u64 + 4, Ordering::Relaxed);
        Ok(path)
    }

    fn read_file(&self, path: &Path) -> ForgeResult<Vec<u8>> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        self.files_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(data.len() as u64, Ordering::Relaxed);

        if data.len() < 4 {
            return Err(corrupted_data(format!("Proxy file {} is truncated", path.display())));
        }
        let stored = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let payload = data.split_off(4);
        if crc32fast::hash(&payload) != stored {
            return Err(corrupted_data(format!("Proxy file {} failed its checksum", path.display())));
        }
        Ok(payload)
    }
}

#[derive(Debug)]
enum Stored {
    Memory(Vec<u8>),
    File(PathBuf),
}

/// Proxy over serialised bytes, in memory or in a temporary file
///
/// The temporary file is deleted when the proxy is dropped.
pub struct TempFileProxy<R> {
    stored: Mutex<Stored>,
    compressed: bool,
    compressor: Compressor,
    context: Arc<ProxyFileContext>,
    _resource: PhantomData<fn() -> R>,
}

impl<R> fmt::Debug for TempFileProxy<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempFileProxy")
            .field("stored", &*self.stored.lock())
            .field("compressed", &self.compressed)
            .finish()
    }
}

impl<R: Versioned> TempFileProxy<R> {
    fn in_memory(bytes: Vec<u8>, compressed: bool, context: &Arc<ProxyFileContext>) -> Self {
        Self {
            stored: Mutex::new(Stored::Memory(bytes)),
            compressed,
            compressor: context.compressor,
            context: context.clone(),
            _resource: PhantomData,
        }
    }

    fn spill(bytes: Vec<u8>, compressed: bool, context: &Arc<ProxyFileContext>) -> ForgeResult<Self> {
        let path = context.write_file(&bytes)?;
        log::debug!("Spilled {} bytes to {}", bytes.len(), path.display());
        Ok(Self {
            stored: Mutex::new(Stored::File(path)),
            compressed,
            compressor: context.compressor,
            context: context.clone(),
            _resource: PhantomData,
        })
    }
}

impl<R: Versioned + fmt::Debug> ResourceProxy<R> for TempFileProxy<R> {
    fn get(&self) -> ForgeResult<Arc<R>> {
        let stored = self.stored.lock();
        let bytes: Cow<'_, [u8]> = match &*stored {
            Stored::Memory(bytes) => Cow::Borrowed(bytes.as_slice()),
            Stored::File(path) => Cow::Owned(self.context.read_file(path)?),
        };
        let archive = self.compressor.unpack(bytes, self.compressed)?;
        Ok(Arc::new(read_versioned(&archive)?))
    }

    fn location(&self) -> ProxyLocation {
        match &*self.stored.lock() {
            Stored::Memory(bytes) => ProxyLocation::Memory {
                size: bytes.len(),
                compressed: self.compressed,
            },
            Stored::File(path) => ProxyLocation::File {
                path: path.clone(),
                compressed: self.compressed,
            },
        }
    }
}

impl<R> Drop for TempFileProxy<R> {
    fn drop(&mut self) {
        if let Stored::File(path) = &*self.stored.get_mut() {
            if let Err(e) = std::fs::remove_file(path) {
                log::warn!("Failed to remove proxy file {}: {}", path.display(), e);
            }
        }
    }
}

/// Wrap `value` in the cheapest proxy its serialised size allows
pub fn make_proxy<R>(value: Arc<R>, context: &Arc<ProxyFileContext>) -> ForgeResult<Box<dyn ResourceProxy<R>>>
where
    R: Versioned + fmt::Debug + Send + Sync + 'static,
{
    if !context.enabled {
        return Ok(Box::new(InMemoryProxy::new(value)));
    }

    let archive = write_versioned(&*value)?;
    let threshold = context.min_proxy_file_size as usize;
    if archive.len() <= threshold {
        return Ok(Box::new(InMemoryProxy::new(value)));
    }

    let Packed { bytes, compressed } = context.compressor.pack(archive);

    if bytes.len() <= threshold {
        log::debug!("Keeping {} proxy bytes in memory", bytes.len());
        return Ok(Box::new(TempFileProxy::<R>::in_memory(bytes, compressed, context)));
    }
    Ok(Box::new(TempFileProxy::<R>::spill(bytes, compressed, context)?))
}
