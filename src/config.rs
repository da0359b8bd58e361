//! Configuration for batch writes, join graphs and repositories.
//!
//! Everything here has a conservative [`Default`]; the `*_with_config`
//! variants of the write and build functions take these structs explicitly.

/// Configuration for batch INSERT operations.
///
/// # Default Configuration
///
/// ```rust
/// use rowjoin::BatchConfig;
/// let config = BatchConfig::default();
/// assert_eq!(config.max_batch_size, 1000);
/// assert!(config.enable_chunking);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Largest number of rows bound against one prepared statement before
    /// the batch is split.
    ///
    /// **Default:** `1000`
    pub max_batch_size: usize,

    /// Split batches larger than `max_batch_size` into chunks, in order.
    ///
    /// **Default:** `true`
    pub enable_chunking: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
            enable_chunking: true,
        }
    }
}

/// Configuration for building joined mappers.
///
/// # Default Configuration
///
/// ```rust
/// use rowjoin::JoinConfig;
/// assert_eq!(JoinConfig::default().max_join_depth, 4);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinConfig {
    /// Deepest nesting of joined participants below the primary row.
    ///
    /// **Default:** `4`
    ///
    /// A join directly on the primary row has depth 1; a join declared on a
    /// nested joined participant has depth 2, and so on. Building a graph
    /// deeper than this is a setup error.
    pub max_join_depth: usize,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self { max_join_depth: 4 }
    }
}

/// Configuration carried by repositories.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub batch: BatchConfig,
    pub join: JoinConfig,
}

impl RepositoryConfig {
    pub fn with_batch_size(mut self, max_batch_size: usize) -> Self {
        self.batch.max_batch_size = max_batch_size;
        self
    }
}
