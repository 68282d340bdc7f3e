//! Name-resolution cache
//!
//! Maps `(device, parent inode, name)` to an inode number so that path
//! resolution can skip directory scans for components it has resolved
//! before. The cache is a fixed array of `N` entries guarded by one lock;
//! it never grows. New keys replace slots round-robin, regardless of how
//! often the occupant was hit.
//!
//! Path resolution calls [`NameCache::lookup`] before scanning a directory
//! and [`NameCache::add`] after a successful scan. Unlink, rename and rmdir
//! must call [`NameCache::invalidate`] with the affected inode.
//!
//! Invalidation is shallow: it drops entries for the inode itself and for
//! its direct children only. Entries further down a removed or renamed
//! subtree stay until they are evicted or [`NameCache::clear`] runs, so
//! callers that rename directories must invalidate every level they care
//! about (or clear the cache).

use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;

/// Maximum length of a directory entry name
pub const DIRSIZ: usize = 14;
/// Default number of cache entries
pub const NAMECACHE_SIZE: usize = 32;

#[derive(Clone, Copy)]
struct Entry {
    valid: bool,
    dev: u32,
    parent: u64,
    name: [u8; DIRSIZ],
    inum: u64,
    hits: u64,
}

impl Entry {
    const EMPTY: Entry = Entry {
        valid: false,
        dev: 0,
        parent: 0,
        name: [0; DIRSIZ],
        inum: 0,
        hits: 0,
    };

    fn matches(&self, dev: u32, parent: u64, name: &[u8; DIRSIZ]) -> bool {
        self.valid && self.dev == dev && self.parent == parent && &self.name == name
    }
}

/// Names compare like `strncmp(a, b, DIRSIZ)`: up to the first NUL, at most
/// `DIRSIZ` bytes. Normalising to a zero-padded array makes that a plain
/// array comparison.
fn fixed_name(name: &[u8]) -> [u8; DIRSIZ] {
    let mut fixed = [0u8; DIRSIZ];
    for (dst, &src) in fixed.iter_mut().zip(name.iter().take_while(|&&b| b != 0)) {
        *dst = src;
    }
    fixed
}

fn display_name(name: &[u8; DIRSIZ]) -> String {
    let len = name.iter().position(|&b| b == 0).unwrap_or(DIRSIZ);
    String::from_utf8_lossy(&name[..len]).into_owned()
}

/// Lookup counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NameCacheStats {
    /// Calls to `lookup`
    pub lookups: u64,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that fell through to the directory scan
    pub misses: u64,
}

impl NameCacheStats {
    /// Hit rate in whole percent, `None` before the first lookup
    pub fn hit_rate(&self) -> Option<u64> {
        (self.lookups > 0).then(|| self.hits * 100 / self.lookups)
    }
}

/// One valid cache entry, as seen by diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameCacheEntryInfo {
    /// Position in the entry array
    pub slot: usize,
    /// Device id
    pub dev: u32,
    /// Inode of the containing directory
    pub parent: u64,
    /// Entry name, lossily decoded
    pub name: String,
    /// Resolved inode
    pub inum: u64,
    /// Lookups answered by this entry
    pub hits: u64,
}

/// Diagnostic dump: counters plus every valid entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameCacheReport {
    /// Lookup counters
    pub stats: NameCacheStats,
    /// Valid entries in slot order
    pub entries: Vec<NameCacheEntryInfo>,
}

impl fmt::Display for NameCacheReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Name cache statistics:")?;
        writeln!(f, "  Total lookups: {}", self.stats.lookups)?;
        writeln!(f, "  Cache hits:    {}", self.stats.hits)?;
        writeln!(f, "  Cache misses:  {}", self.stats.misses)?;
        if let Some(rate) = self.stats.hit_rate() {
            writeln!(f, "  Hit rate:      {}%", rate)?;
        }
        writeln!(f, "Active entries:")?;
        for e in &self.entries {
            writeln!(
                f,
                "  [{}] dev={} parent={} name={} inum={} hits={}",
                e.slot, e.dev, e.parent, e.name, e.inum, e.hits
            )?;
        }
        Ok(())
    }
}

struct Slots<const N: usize> {
    entries: [Entry; N],
    next_slot: usize,
    stats: NameCacheStats,
}

/// Fixed-capacity name cache with round-robin replacement
pub struct NameCache<const N: usize = NAMECACHE_SIZE> {
    slots: Mutex<Slots<N>>,
}

impl<const N: usize> Default for NameCache<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> NameCache<N> {
    /// An empty cache
    ///
    /// # Panics
    ///
    /// If `N` is zero.
    pub fn new() -> Self {
        assert!(N > 0, "name cache needs at least one entry");
        Self {
            slots: Mutex::new(Slots {
                entries: [Entry::EMPTY; N],
                next_slot: 0,
                stats: NameCacheStats::default(),
            }),
        }
    }

    /// Number of entries
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Resolve `name` in directory `parent` on `dev`
    pub fn lookup(&self, dev: u32, parent: u64, name: impl AsRef<[u8]>) -> Option<u64> {
        let key = fixed_name(name.as_ref());
        let mut guard = self.slots.lock();
        let slots = &mut *guard;
        slots.stats.lookups += 1;

        match slots.entries.iter_mut().find(|e| e.matches(dev, parent, &key)) {
            Some(entry) => {
                entry.hits += 1;
                slots.stats.hits += 1;
                Some(entry.inum)
            }
            None => {
                slots.stats.misses += 1;
                None
            }
        }
    }

    /// Remember that `name` in `parent` resolves to `inum`.
    ///
    /// An existing entry for the same key is updated in place; otherwise the
    /// slot under the round-robin cursor is overwritten.
    pub fn add(&self, dev: u32, parent: u64, name: impl AsRef<[u8]>, inum: u64) {
        let key = fixed_name(name.as_ref());
        let mut guard = self.slots.lock();
        let slots = &mut *guard;

        if let Some(entry) = slots.entries.iter_mut().find(|e| e.matches(dev, parent, &key)) {
            entry.inum = inum;
            return;
        }

        let slot = slots.next_slot;
        slots.entries[slot] = Entry {
            valid: true,
            dev,
            parent,
            name: key,
            inum,
            hits: 0,
        };
        slots.next_slot = (slot + 1) % N;
    }

    /// Drop every entry on `dev` that is `inum` or a direct child of it
    pub fn invalidate(&self, dev: u32, inum: u64) {
        let mut slots = self.slots.lock();
        let mut dropped = 0;
        for entry in slots.entries.iter_mut() {
            if entry.valid && entry.dev == dev && (entry.inum == inum || entry.parent == inum) {
                entry.valid = false;
                dropped += 1;
            }
        }
        if dropped > 0 {
            log::debug!("namecache: invalidated {} entries for dev {} inode {}", dropped, dev, inum);
        }
    }

    /// Drop every entry and rewind the cursor. Counters are kept.
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        for entry in slots.entries.iter_mut() {
            entry.valid = false;
        }
        slots.next_slot = 0;
    }

    /// Lookup counters
    pub fn stats(&self) -> NameCacheStats {
        self.slots.lock().stats
    }

    /// Valid entries in slot order
    pub fn entries(&self) -> Vec<NameCacheEntryInfo> {
        self.report().entries
    }

    /// Counters and entries captured under one lock acquisition
    pub fn report(&self) -> NameCacheReport {
        let slots = self.slots.lock();
        NameCacheReport {
            stats: slots.stats,
            entries: slots
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.valid)
                .map(|(slot, e)| NameCacheEntryInfo {
                    slot,
                    dev: e.dev,
                    parent: e.parent,
                    name: display_name(&e.name),
                    inum: e.inum,
                    hits: e.hits,
                })
                .collect(),
        }
    }

    /// Emit the diagnostic dump through the logger
    pub fn log_report(&self) {
        log::info!("{}", self.report());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const DEV: u32 = 1;

    #[test]
    fn test_hit_and_miss_counters() {
        let cache: NameCache = NameCache::new();
        cache.add(DEV, 10, "foo", 42);

        assert_eq!(cache.lookup(DEV, 10, "foo"), Some(42));
        assert_eq!(
            cache.stats(),
            NameCacheStats {
                lookups: 1,
                hits: 1,
                misses: 0
            }
        );

        assert_eq!(cache.lookup(DEV, 10, "bar"), None);
        assert_eq!(cache.lookup(DEV, 11, "foo"), None);
        assert_eq!(cache.lookup(DEV + 1, 10, "foo"), None);
        let stats = cache.stats();
        assert_eq!((stats.lookups, stats.hits, stats.misses), (4, 1, 3));
        assert_eq!(stats.hit_rate(), Some(25));
    }

    #[test]
    fn test_readd_updates_in_place() {
        let cache: NameCache<4> = NameCache::new();
        cache.add(DEV, 1, "a", 5);
        cache.add(DEV, 1, "a", 6);

        assert_eq!(cache.lookup(DEV, 1, "a"), Some(6));
        assert_eq!(cache.entries().len(), 1);

        // The cursor did not move, so three more keys still fit.
        cache.add(DEV, 1, "b", 7);
        cache.add(DEV, 1, "c", 8);
        cache.add(DEV, 1, "d", 9);
        assert_eq!(cache.lookup(DEV, 1, "a"), Some(6));
    }

    #[test]
    fn test_round_robin_eviction() {
        let cache: NameCache = NameCache::new();
        for i in 0..=NAMECACHE_SIZE as u64 {
            cache.add(DEV, 1, format!("f{}", i), 100 + i);
        }

        assert_eq!(cache.lookup(DEV, 1, "f0"), None);
        for i in 1..=NAMECACHE_SIZE as u64 {
            assert_eq!(cache.lookup(DEV, 1, format!("f{}", i)), Some(100 + i));
        }
    }

    #[test]
    fn test_eviction_ignores_hit_counts() {
        let cache: NameCache<2> = NameCache::new();
        cache.add(DEV, 1, "hot", 1);
        cache.add(DEV, 1, "cold", 2);
        for _ in 0..10 {
            cache.lookup(DEV, 1, "hot");
        }

        cache.add(DEV, 1, "new", 3);
        assert_eq!(cache.lookup(DEV, 1, "hot"), None);
        assert_eq!(cache.lookup(DEV, 1, "cold"), Some(2));
    }

    #[test]
    fn test_invalidation_scope() {
        let cache: NameCache = NameCache::new();
        cache.add(DEV, 1, "dir", 10); // the directory itself
        cache.add(DEV, 10, "child", 11); // its child
        cache.add(DEV, 11, "grandchild", 12); // below the child
        cache.add(DEV, 1, "other", 20); // unrelated
        cache.add(DEV + 1, 1, "dir", 10); // same numbers, other device

        cache.invalidate(DEV, 10);

        assert_eq!(cache.lookup(DEV, 1, "dir"), None);
        assert_eq!(cache.lookup(DEV, 10, "child"), None);
        assert_eq!(cache.lookup(DEV, 1, "other"), Some(20));
        assert_eq!(cache.lookup(DEV + 1, 1, "dir"), Some(10));
        // Shallow: the grandchild survives until evicted or cleared.
        assert_eq!(cache.lookup(DEV, 11, "grandchild"), Some(12));
    }

    #[test]
    fn test_clear_rewinds_cursor() {
        let cache: NameCache<3> = NameCache::new();
        cache.add(DEV, 1, "a", 1);
        cache.add(DEV, 1, "b", 2);
        cache.lookup(DEV, 1, "a");
        cache.clear();

        assert!(cache.entries().is_empty());
        assert_eq!(cache.lookup(DEV, 1, "a"), None);
        assert_eq!(cache.stats().hits, 1);

        cache.add(DEV, 1, "c", 3);
        assert_eq!(cache.entries()[0].slot, 0);
    }

    #[test]
    fn test_names_compare_up_to_dirsiz() {
        let cache: NameCache = NameCache::new();
        cache.add(DEV, 1, "abcdefghijklmnXYZ", 7);

        assert_eq!(cache.lookup(DEV, 1, "abcdefghijklmn"), Some(7));
        assert_eq!(cache.lookup(DEV, 1, "abcdefghijklmnOTHER"), Some(7));
        assert_eq!(cache.lookup(DEV, 1, "abcdefghijklm"), None);
        assert_eq!(cache.lookup(DEV, 1, b"abcdefghijklmn\0junk"), Some(7));
        assert_eq!(cache.entries()[0].name, "abcdefghijklmn");
    }

    #[test]
    fn test_report_lists_valid_entries() {
        let cache: NameCache<4> = NameCache::new();
        cache.add(DEV, 1, "README", 2);
        cache.add(DEV, 1, "bin", 3);
        cache.invalidate(DEV, 3);
        cache.lookup(DEV, 1, "README");

        let report = cache.report();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].hits, 1);

        let text = report.to_string();
        assert!(text.contains("Hit rate:      100%"));
        assert!(text.contains("name=README inum=2 hits=1"));
        assert!(!text.contains("name=bin"));
    }

    #[test]
    fn test_concurrent_lookups_and_invalidations() {
        let cache: Arc<NameCache<16>> = Arc::new(NameCache::new());
        let threads: Vec<_> = (0..8u64)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..500u64 {
                        let name = format!("t{}f{}", t, i % 4);
                        if cache.lookup(DEV, t, &name).is_none() {
                            cache.add(DEV, t, &name, t * 1000 + i % 4);
                        }
                        if i % 50 == 0 {
                            cache.invalidate(DEV, t);
                        }
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert_eq!(stats.lookups, 8 * 500);
        assert_eq!(stats.hits + stats.misses, stats.lookups);
        for entry in cache.entries() {
            assert_eq!(entry.inum / 1000, entry.parent);
        }
    }
}
