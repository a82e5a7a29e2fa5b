//! Fixture helpers shared by the unit tests

use std::path::PathBuf;

/// Path of a file under `testdata/`
pub(crate) fn fixture(rel: &str) -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata")).join(rel)
}
