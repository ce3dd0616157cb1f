//! Voter registry - the append-only set of voters who already voted.
//!
//! Implementations must make "check membership, then insert" one atomic step:
//! two concurrent admissions for the same voter can never both succeed.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// Registry storage errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Storage error: {0}")]
    Storage(String),
    
    #[error("Registry lock poisoned")]
    Poisoned,
}

/// Trait for voter registries
///
/// Implementations must be thread-safe. Identifiers are permanent once inserted.
pub trait VoterRegistry: Send + Sync {
    /// Inserts `voter_id` unless present. Returns `true` if it was inserted.
    fn insert_if_absent(&self, voter_id: &str) -> Result<bool, RegistryError>;
    
    /// Check if a voter is registered
    fn contains(&self, voter_id: &str) -> bool;
    
    /// Number of registered voters
    fn len(&self) -> usize;
    
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory registry for a single process lifetime.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    voters: Mutex<HashSet<String>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VoterRegistry for MemoryRegistry {
    fn insert_if_absent(&self, voter_id: &str) -> Result<bool, RegistryError> {
        // Membership check and insert share one critical section
        let mut voters = self.voters.lock().map_err(|_| RegistryError::Poisoned)?;
        Ok(voters.insert(voter_id.to_string()))
    }
    
    fn contains(&self, voter_id: &str) -> bool {
        self.voters
            .lock()
            .map(|voters| voters.contains(voter_id))
            .unwrap_or(false)
    }
    
    fn len(&self) -> usize {
        self.voters.lock().map(|voters| voters.len()).unwrap_or(0)
    }
}

/// Sled-based persistent registry
///
/// Uses an embedded key-value database so admissions survive restarts.
/// Inserts go through compare-and-swap, which makes check-and-insert atomic
/// even across handles to the same database. Clones share the database.
#[derive(Clone)]
pub struct SledRegistry {
    db: sled::Db,
    sync_each_insert: bool,
}

impl SledRegistry {
    /// Open a persistent registry at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let db = sled::open(path)
            .map_err(|e| RegistryError::Storage(format!("Failed to open sled DB: {}", e)))?;
        Ok(Self { db, sync_each_insert: true })
    }
    
    /// Leaves durability to sled's background flusher instead of syncing
    /// every insert (bulk loads, simulation)
    pub fn without_sync(mut self) -> Self {
        self.sync_each_insert = false;
        self
    }
    
    /// Create a temporary registry (for testing)
    #[cfg(test)]
    pub fn open_temp() -> Result<Self, RegistryError> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()
            .map_err(|e| RegistryError::Storage(format!("Failed to open temp DB: {}", e)))?;
        Ok(Self { db, sync_each_insert: true })
    }
}

impl VoterRegistry for SledRegistry {
    fn insert_if_absent(&self, voter_id: &str) -> Result<bool, RegistryError> {
        let swapped = self
            .db
            .compare_and_swap(voter_id.as_bytes(), None::<&[u8]>, Some(&[1u8][..]))
            .map_err(|e| RegistryError::Storage(format!("Insert failed: {}", e)))?;
        
        if swapped.is_err() {
            return Ok(false);
        }
        if self.sync_each_insert {
            self.db.flush()
                .map_err(|e| RegistryError::Storage(format!("Flush failed: {}", e)))?;
        }
        Ok(true)
    }
    
    fn contains(&self, voter_id: &str) -> bool {
        self.db.contains_key(voter_id.as_bytes()).unwrap_or(false)
    }
    
    fn len(&self) -> usize {
        self.db.len()
    }
}
