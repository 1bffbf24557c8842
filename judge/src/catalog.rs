//! This module loads test case catalogs and exposes their immutable
//! metadata.
//!
//! A catalog is a directory holding the test case input files next to an
//! `info` document:
//!
//! ```json
//! {
//!     "special_judge": false,
//!     "test_cases": {
//!         "1": {
//!             "input_name": "1.in",
//!             "answer_checksum": "f4e3…",
//!             "answer_size": 13
//!         }
//!     }
//! }
//! ```
//!
//! The order of the `test_cases` entries in the document is the canonical
//! enumeration order of the suite; verdicts are always returned in this
//! order.
//!

use std::fmt;
use std::fs::File;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::{Error, ErrorKind, Result};

/// File name of the catalog document inside a test case directory.
const CATALOG_FILE_NAME: &str = "info";

/// Metadata of one test case, in the shape it takes inside the catalog
/// document.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CaseEntry {
    input_name: String,
    answer_checksum: String,
    #[serde(default)]
    answer_size: u64,
}

/// Metadata of one test case.
#[derive(Clone, Debug)]
pub struct TestCase {
    /// Identifier of the test case within its catalog.
    pub id: String,

    /// File name of the test case's input, relative to the catalog
    /// directory.
    pub input_name: String,

    /// Lowercase hex checksum of the expected output after trailing
    /// whitespace stripping.
    pub answer_checksum: String,

    /// Size of the expected output in bytes. Only used to size the output
    /// capture cap, never for correctness.
    pub answer_size: u64,
}

/// An immutable test case suite, loaded once per judging session.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestSuite {
    /// Whether answers in this suite are verified by a special judge
    /// instead of checksum comparison. The two verification paths are
    /// mutually exclusive per suite.
    #[serde(default)]
    pub special_judge: bool,

    /// The suite's test cases, in catalog order.
    #[serde(rename = "test_cases", deserialize_with = "deserialize_cases")]
    pub cases: Vec<TestCase>,
}

impl TestSuite {
    /// Load the test suite residing in the given directory.
    ///
    /// Parsing is strict: a missing catalog document fails with
    /// `CatalogNotFound` and any schema violation fails with
    /// `CatalogCorrupt`, before any sandbox resources are consumed.
    pub fn load<P>(test_case_dir: P) -> Result<TestSuite>
        where P: AsRef<Path> {
        let dir = test_case_dir.as_ref();
        let catalog_file = dir.join(CATALOG_FILE_NAME);
        if !catalog_file.exists() {
            return Err(Error::from(ErrorKind::CatalogNotFound(dir.to_owned())));
        }

        let file = File::open(&catalog_file)?;
        let suite: TestSuite = serde_json::from_reader(file)
            .map_err(|e| Error::from(ErrorKind::CatalogCorrupt(e.to_string())))?;

        log::debug!("Loaded test suite with {} cases from {}",
            suite.cases.len(), dir.display());
        Ok(suite)
    }
}

/// Deserialize the `test_cases` map into a vector, preserving document
/// order. A plain map type would lose the order the catalog author chose.
fn deserialize_cases<'de, D>(deserializer: D) -> std::result::Result<Vec<TestCase>, D::Error>
    where D: Deserializer<'de> {
    struct CasesVisitor;

    impl<'de> Visitor<'de> for CasesVisitor {
        type Value = Vec<TestCase>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map from test case id to test case metadata")
        }

        fn visit_map<A>(self, mut access: A) -> std::result::Result<Self::Value, A::Error>
            where A: MapAccess<'de> {
            let mut cases = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((id, entry)) = access.next_entry::<String, CaseEntry>()? {
                cases.push(TestCase {
                    id,
                    input_name: entry.input_name,
                    answer_checksum: entry.answer_checksum,
                    answer_size: entry.answer_size,
                });
            }
            Ok(cases)
        }
    }

    deserializer.deserialize_map(CasesVisitor)
}
