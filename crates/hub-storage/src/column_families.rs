//! Column family definitions for RocksDB.
//!
//! - builds: build-tracking documents, keyed by build id
//! - documents: collection documents, keyed by `{collection}:{id}`

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for build documents
pub const CF_BUILDS: &str = "builds";

/// Column family name for collection documents
pub const CF_DOCUMENTS: &str = "documents";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_BUILDS, CF_DOCUMENTS];

/// Documents are bulky JSON, compress them
fn documents_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_BUILDS, Options::default()),
        ColumnFamilyDescriptor::new(CF_DOCUMENTS, documents_options()),
    ]
}
