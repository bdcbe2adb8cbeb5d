pub mod types;
pub mod decimal;
pub mod row;
pub mod operators;
pub mod columns;
pub mod filters;
pub mod arithmetic;
pub mod node;
pub mod tree;
pub mod rewrites;
pub mod vectorized;
pub mod wire;
pub mod config;
pub mod request;
pub mod resolver;
pub mod storage;
pub mod chunks;
pub mod cache;
pub mod fdcache;
pub mod iomanager;

pub use types::{
    ColType, CompressionKind, DataType, MAX_LEGACY_PRECISION, MAX_WIDE_PRECISION,
    WIDE_DECIMAL_WIDTH,
};
pub use decimal::{Decimal, DecimalError};
pub use row::{Datum, Row};

// Expression tree re-exports
pub use arithmetic::{derive_arith_type, ArithmeticOperator, ResultCarrier};
pub use columns::{ConstKind, ConstantColumn, ExpressionColumn, ReturnedColumn, SimpleColumn};
pub use filters::{filter_compare_type, ConstantFilter, SimpleFilter};
pub use node::{EvalResult, ExprError, TreeNode};
pub use operators::{LogicOperator, OpType, PredicateOperator};
pub use tree::ParseTree;

// Plan rewrite and transport re-exports
pub use rewrites::{
    check_filters_limit, extract_common_leaf_conjunctions_to_root, semantic_key, FilterKey,
};
pub use vectorized::{execute_simd, simd_enabled, LaneOps};
pub use wire::{deserialize_tree, serialize_tree};

// Block I/O re-exports
pub use cache::{BlockCache, CacheKey, LruBlockCache, NoopBlockCache};
pub use chunks::{ChunkError, ChunkFileHeader, BLOCK_SIZE, CHUNK_BLOCKS, CHUNK_SPAN};
pub use config::IoConfig;
pub use fdcache::{FdCache, FdGuard};
pub use iomanager::IoManager;
pub use request::{FileRequest, RequestQueue, RequestStatus};
pub use resolver::{
    BlockLocation, BlockResolver, BlockVersion, Extent, ExtentMapResolver, RangeLockGuard,
    ResolveError,
};
pub use storage::{LocalStore, SegmentKey, SegmentStore};
