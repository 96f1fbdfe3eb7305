//! Database abstraction layer
//!
//! Provides a unified interface over embedded key-value backends (sled for
//! persistence, an in-memory map for tests). A settlement commit spans
//! several trees, so the write path is a multi-tree [`WriteBatch`] applied
//! as one atomic unit, with uniqueness-checked inserts evaluated inside the
//! same transaction.

use anyhow::Result;
use std::path::Path;
use thiserror::Error;

use crate::config::StorageBackend;

/// Database abstraction trait
///
/// Provides a unified interface for key-value storage operations
/// that can be implemented by different backends.
pub trait Database: Send + Sync {
    /// Open a named tree
    fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>>;

    /// Apply a multi-tree batch atomically.
    ///
    /// Either every operation in the batch is applied or none is. A failed
    /// uniqueness check surfaces as [`BatchError::Duplicate`] and rolls the
    /// whole batch back.
    fn apply_batch(&self, batch: WriteBatch) -> Result<(), BatchError>;

    /// Flush all pending writes
    fn flush(&self) -> Result<()>;
}

/// Tree abstraction trait
///
/// Represents a named collection of key-value pairs within a database.
pub trait Tree: Send + Sync {
    /// Insert a key-value pair, overwriting any existing value
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Remove a key-value pair
    fn remove(&self, key: &[u8]) -> Result<()>;

    /// Check if a key exists
    fn contains_key(&self, key: &[u8]) -> Result<bool>;

    /// Get number of entries
    fn len(&self) -> Result<usize>;

    /// Check if tree is empty
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Iterate over all key-value pairs
    fn iter(&self) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_>;
}

/// A write batch spanning one or more trees.
///
/// Accumulates puts, uniqueness-checked inserts and deletes against named
/// trees, then commits through [`Database::apply_batch`] in a single
/// transaction. This is the primitive behind the all-or-nothing guarantees
/// of the script-key ledger and the settlement commit.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

#[derive(Debug)]
enum BatchOp {
    Put {
        tree: &'static str,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    InsertUnique {
        tree: &'static str,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        tree: &'static str,
        key: Vec<u8>,
    },
}

impl BatchOp {
    fn tree(&self) -> &'static str {
        match self {
            BatchOp::Put { tree, .. }
            | BatchOp::InsertUnique { tree, .. }
            | BatchOp::Delete { tree, .. } => *tree,
        }
    }
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a key.
    pub fn put(&mut self, tree: &'static str, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            tree,
            key: key.into(),
            value: value.into(),
        });
    }

    /// Insert a key that must not already exist.
    ///
    /// If it does, the whole batch fails with [`BatchError::Duplicate`] and
    /// nothing is applied.
    pub fn insert_unique(
        &mut self,
        tree: &'static str,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) {
        self.ops.push(BatchOp::InsertUnique {
            tree,
            key: key.into(),
            value: value.into(),
        });
    }

    /// Mark a key for deletion.
    pub fn delete(&mut self, tree: &'static str, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete {
            tree,
            key: key.into(),
        });
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Failure applying a [`WriteBatch`]. In both cases nothing was written.
#[derive(Debug, Error)]
pub enum BatchError {
    /// A uniqueness-checked insert hit an existing key.
    #[error("duplicate key in tree '{tree}': {key}")]
    Duplicate { tree: &'static str, key: String },

    /// The backend failed or the batch was interrupted.
    #[error("batch write failed: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Create a database instance based on backend type
pub fn create_database<P: AsRef<Path>>(
    data_dir: P,
    backend: StorageBackend,
) -> Result<Box<dyn Database>> {
    match backend {
        #[cfg(feature = "sled")]
        StorageBackend::Sled => Ok(Box::new(sled_impl::SledDatabase::new(data_dir)?)),
        #[cfg(not(feature = "sled"))]
        StorageBackend::Sled => Err(anyhow::anyhow!(
            "Sled backend not available (feature not enabled)"
        )),
        StorageBackend::Memory => Ok(Box::new(memory_impl::MemoryDatabase::new())),
    }
}

// Sled implementation
#[cfg(feature = "sled")]
mod sled_impl {
    use super::{BatchError, BatchOp, Database, Tree, WriteBatch};
    use anyhow::Result;
    use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
    use sled::{Db, Transactional};
    use std::path::Path;
    use std::sync::Arc;

    pub struct SledDatabase {
        db: Arc<Db>,
    }

    impl SledDatabase {
        pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
            let db = sled::open(data_dir)?;
            Ok(Self { db: Arc::new(db) })
        }
    }

    /// Abort payload carried out of a failed uniqueness check.
    #[derive(Debug)]
    struct DuplicateKey {
        tree: &'static str,
        key: Vec<u8>,
    }

    impl Database for SledDatabase {
        fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>> {
            let tree = self.db.open_tree(name)?;
            Ok(Box::new(SledTree {
                tree: Arc::new(tree),
            }))
        }

        fn apply_batch(&self, batch: WriteBatch) -> Result<(), BatchError> {
            if batch.is_empty() {
                return Ok(());
            }

            // Index each op by the position of its tree in the distinct
            // tree list, which is also the order trees are handed to the
            // transaction.
            let mut names: Vec<&'static str> = Vec::new();
            let mut indexed: Vec<(usize, &BatchOp)> = Vec::with_capacity(batch.ops.len());
            for op in &batch.ops {
                let tree = op.tree();
                let idx = match names.iter().position(|n| *n == tree) {
                    Some(i) => i,
                    None => {
                        names.push(tree);
                        names.len() - 1
                    }
                };
                indexed.push((idx, op));
            }

            let mut trees = Vec::with_capacity(names.len());
            for name in &names {
                let tree = self
                    .db
                    .open_tree(name)
                    .map_err(|e| BatchError::Backend(e.into()))?;
                trees.push(tree);
            }
            let tree_refs: Vec<&sled::Tree> = trees.iter().collect();

            let result = tree_refs.as_slice().transaction(
                |txn_trees: &Vec<TransactionalTree>| {
                    for (idx, op) in &indexed {
                        let t = &txn_trees[*idx];
                        match op {
                            BatchOp::Put { key, value, .. } => {
                                t.insert(key.as_slice(), value.as_slice())?;
                            }
                            BatchOp::InsertUnique { tree, key, value } => {
                                if t.get(key.as_slice())?.is_some() {
                                    return Err(ConflictableTransactionError::Abort(
                                        DuplicateKey {
                                            tree: *tree,
                                            key: key.clone(),
                                        },
                                    ));
                                }
                                t.insert(key.as_slice(), value.as_slice())?;
                            }
                            BatchOp::Delete { key, .. } => {
                                t.remove(key.as_slice())?;
                            }
                        }
                    }
                    Ok(())
                },
            );

            match result {
                Ok(()) => Ok(()),
                Err(TransactionError::Abort(dup)) => Err(BatchError::Duplicate {
                    tree: dup.tree,
                    key: String::from_utf8_lossy(&dup.key).into_owned(),
                }),
                Err(TransactionError::Storage(e)) => Err(BatchError::Backend(e.into())),
            }
        }

        fn flush(&self) -> Result<()> {
            self.db.flush()?;
            Ok(())
        }
    }

    struct SledTree {
        tree: Arc<sled::Tree>,
    }

    impl Tree for SledTree {
        fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
            self.tree.insert(key, value)?;
            Ok(())
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(self.tree.get(key)?.map(|v| v.to_vec()))
        }

        fn remove(&self, key: &[u8]) -> Result<()> {
            self.tree.remove(key)?;
            Ok(())
        }

        fn contains_key(&self, key: &[u8]) -> Result<bool> {
            Ok(self.tree.contains_key(key)?)
        }

        fn len(&self) -> Result<usize> {
            Ok(self.tree.len())
        }

        fn iter(&self) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> {
            Box::new(self.tree.iter().map(|item| {
                item.map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .map_err(|e| anyhow::anyhow!("Sled iteration error: {}", e))
            }))
        }
    }
}

// In-memory implementation, primarily for tests
mod memory_impl {
    use super::{BatchError, BatchOp, Database, Tree, WriteBatch};
    use anyhow::Result;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Arc, Mutex, MutexGuard};

    type Trees = HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>>;

    pub struct MemoryDatabase {
        trees: Arc<Mutex<Trees>>,
    }

    impl MemoryDatabase {
        pub fn new() -> Self {
            Self {
                trees: Arc::new(Mutex::new(HashMap::new())),
            }
        }

        fn lock(trees: &Mutex<Trees>) -> Result<MutexGuard<'_, Trees>> {
            trees
                .lock()
                .map_err(|_| anyhow::anyhow!("memory database lock poisoned"))
        }
    }

    impl Database for MemoryDatabase {
        fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>> {
            let mut guard = Self::lock(&self.trees)?;
            guard.entry(name.to_string()).or_default();
            Ok(Box::new(MemoryTree {
                trees: Arc::clone(&self.trees),
                name: name.to_string(),
            }))
        }

        fn apply_batch(&self, batch: WriteBatch) -> Result<(), BatchError> {
            let mut guard = Self::lock(&self.trees).map_err(BatchError::Backend)?;

            // Stage every write so uniqueness checks see earlier ops in the
            // same batch, then commit only once all checks passed.
            let mut staged: HashMap<(&str, &[u8]), Option<&[u8]>> = HashMap::new();
            for op in &batch.ops {
                match op {
                    BatchOp::Put { tree, key, value } => {
                        staged.insert((tree, key), Some(value));
                    }
                    BatchOp::InsertUnique { tree, key, value } => {
                        let exists = match staged.get(&(*tree, key.as_slice())) {
                            Some(Some(_)) => true,
                            Some(None) => false,
                            None => guard
                                .get(*tree)
                                .map_or(false, |t| t.contains_key(key.as_slice())),
                        };
                        if exists {
                            return Err(BatchError::Duplicate {
                                tree: *tree,
                                key: String::from_utf8_lossy(key).into_owned(),
                            });
                        }
                        staged.insert((tree, key), Some(value));
                    }
                    BatchOp::Delete { tree, key } => {
                        staged.insert((tree, key), None);
                    }
                }
            }

            for ((tree, key), value) in staged {
                let entry = guard.entry(tree.to_string()).or_default();
                match value {
                    Some(v) => {
                        entry.insert(key.to_vec(), v.to_vec());
                    }
                    None => {
                        entry.remove(key);
                    }
                }
            }
            Ok(())
        }

        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    struct MemoryTree {
        trees: Arc<Mutex<Trees>>,
        name: String,
    }

    impl Tree for MemoryTree {
        fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
            let mut guard = MemoryDatabase::lock(&self.trees)?;
            guard
                .entry(self.name.clone())
                .or_default()
                .insert(key.to_vec(), value.to_vec());
            Ok(())
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            let guard = MemoryDatabase::lock(&self.trees)?;
            Ok(guard.get(&self.name).and_then(|t| t.get(key).cloned()))
        }

        fn remove(&self, key: &[u8]) -> Result<()> {
            let mut guard = MemoryDatabase::lock(&self.trees)?;
            if let Some(tree) = guard.get_mut(&self.name) {
                tree.remove(key);
            }
            Ok(())
        }

        fn contains_key(&self, key: &[u8]) -> Result<bool> {
            let guard = MemoryDatabase::lock(&self.trees)?;
            Ok(guard.get(&self.name).map_or(false, |t| t.contains_key(key)))
        }

        fn len(&self) -> Result<usize> {
            let guard = MemoryDatabase::lock(&self.trees)?;
            Ok(guard.get(&self.name).map_or(0, |t| t.len()))
        }

        fn iter(&self) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> {
            let guard = match MemoryDatabase::lock(&self.trees) {
                Ok(g) => g,
                Err(e) => return Box::new(std::iter::once(Err(e))),
            };
            let items: Vec<_> = guard
                .get(&self.name)
                .map(|t| {
                    t.iter()
                        .map(|(k, v)| Ok((k.clone(), v.clone())))
                        .collect()
                })
                .unwrap_or_default();
            Box::new(items.into_iter())
        }
    }
}
