//! Memory tuning for the read-only pool.
//!
//! Small databases are mapped whole. Larger ones are mapped up to the
//! configured ceiling and half of the memory the host reports as available,
//! with the page cache sized to a tenth of the mapping.

use sysinfo::System;

const MIB: u64 = 1024 * 1024;

/// Files below this size are always mapped whole.
pub const WHOLE_FILE_MMAP_LIMIT: u64 = 64 * MIB;

/// Memory budget assumed when the host does not report available memory.
pub const FALLBACK_MEMORY: u64 = 64 * MIB;

/// Smallest page cache handed to a reader.
pub const MIN_CACHE_SIZE: u64 = MIB;

/// `mmap_size` and `cache_size` for reader connections, both in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderTuning {
   pub mmap_size: u64,
   pub cache_size: u64,
}

impl ReaderTuning {
   /// Compute tuning from the database file size, the host's available
   /// memory (`0` when unknown) and the mmap ceiling (`0` for none).
   pub fn compute(file_size: u64, available_memory: u64, ceiling: u64) -> Self {
      let memory_budget = if available_memory == 0 {
         FALLBACK_MEMORY
      } else {
         available_memory / 2
      };

      let mmap_size = if file_size < WHOLE_FILE_MMAP_LIMIT {
         file_size
      } else if ceiling > 0 {
         file_size.min(ceiling).min(memory_budget)
      } else {
         file_size.min(memory_budget)
      };

      let cache_size = if mmap_size < file_size {
         (mmap_size / 10).max(MIN_CACHE_SIZE)
      } else {
         MIN_CACHE_SIZE
      };

      Self {
         mmap_size,
         cache_size,
      }
   }

   /// `PRAGMA cache_size` value: negative means KiB rather than pages.
   pub fn cache_size_pragma(&self) -> String {
      format!("-{}", self.cache_size / 1024)
   }
}

/// Memory the host reports as available, in bytes. `0` when unknown.
pub fn host_available_memory() -> u64 {
   let mut sys = System::new();
   sys.refresh_memory();
   sys.available_memory()
}

/// Number of CPUs usable by this process, at least 1.
pub fn host_cpu_count() -> usize {
   std::thread::available_parallelism().map_or(1, std::num::NonZero::get)
}
