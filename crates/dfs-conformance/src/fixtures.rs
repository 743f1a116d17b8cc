// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Randomized fixture generation and the content-integrity oracle.
//!
//! A fixture's checksum is recorded exactly once, at creation, and is the
//! sole oracle for correctness afterwards: it is never recomputed from the
//! origin content, only compared against reads from the opposite directory.

use std::fs::{self, File};
use std::io::Read;
use std::ops::RangeInclusive;
use std::path::Path;

use blake3::Hasher;
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::info;

use crate::context::RunContext;
use crate::error::{HarnessError, Result};

/// Bulk fixture size range, inclusive of zero so empty files stay a
/// reachable boundary case.
pub const BULK_SIZE_RANGE: RangeInclusive<u64> = 0..=5 * 1024 * 1024;

/// Store-scenario fixture size range, deliberately distinct from the bulk
/// range.
pub const STORE_SIZE_RANGE: RangeInclusive<u64> = 50 * 1024..=500 * 1024;

/// A generated test file: its name and the checksum recorded at creation.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub name: String,
    pub checksum: String,
    pub size: u64,
}

/// Insertion-ordered set of fixtures.
///
/// Order is meaningful and documented: the first entry feeds the fetch and
/// stat scenarios, the last feeds delete.
#[derive(Debug, Default, Clone)]
pub struct FixtureSet {
    entries: Vec<Fixture>,
}

impl FixtureSet {
    pub fn push(&mut self, fixture: Fixture) {
        self.entries.push(fixture);
    }

    pub fn first(&self) -> Option<&Fixture> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&Fixture> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fixture> {
        self.entries.iter()
    }
}

/// What `verify` concluded about a file on the far side of a transfer.
///
/// A read failure (including absence) is a verification failure, not a
/// fault: the verdict is the same as a mismatch, but the diagnostic text
/// distinguishes the two.
#[derive(Debug)]
pub enum Verification {
    Match,
    Mismatch { expected: String, actual: String },
    Unreadable { detail: String },
}

impl Verification {
    pub fn is_match(&self) -> bool {
        matches!(self, Verification::Match)
    }
}

/// Generates fixtures and records their checksums.
pub struct FixtureOracle {
    rng: SmallRng,
}

impl Default for FixtureOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureOracle {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
        }
    }

    /// Deterministic oracle for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Seed `count` run-scoped fixtures into `dir`, drawing each size
    /// uniformly from `sizes`. Returns the ordered set of recorded checksums.
    pub fn generate(
        &mut self,
        ctx: &RunContext,
        dir: &Path,
        count: usize,
        sizes: RangeInclusive<u64>,
    ) -> Result<FixtureSet> {
        info!("creating {count} fixtures in {}", dir.display());
        let mut set = FixtureSet::default();
        for index in 0..count {
            let fixture = self.write_fixture(dir, ctx.bulk_fixture_name(index), sizes.clone())?;
            info!("created {}: {} bytes", fixture.name, fixture.size);
            set.push(fixture);
        }
        Ok(set)
    }

    /// One medium-sized fixture in the client directory, for the store
    /// scenario.
    pub fn generate_store_fixture(&mut self, ctx: &RunContext) -> Result<Fixture> {
        let fixture =
            self.write_fixture(&ctx.client_dir, ctx.store_fixture_name(), STORE_SIZE_RANGE)?;
        info!("created store fixture {}: {} bytes", fixture.name, fixture.size);
        Ok(fixture)
    }

    fn write_fixture(
        &mut self,
        dir: &Path,
        name: String,
        sizes: RangeInclusive<u64>,
    ) -> Result<Fixture> {
        let size = self.rng.gen_range(sizes);
        let mut content = vec![0u8; size as usize];
        self.rng.fill_bytes(&mut content);
        fs::write(dir.join(&name), &content)?;
        let checksum = checksum_bytes(&content);
        Ok(Fixture {
            name,
            checksum,
            size,
        })
    }
}

fn checksum_bytes(content: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content);
    format!("blake3:{}", hasher.finalize().to_hex())
}

/// Streaming digest of the file at `path`.
pub fn checksum_file(path: &Path) -> std::io::Result<String> {
    let mut hasher = Hasher::new();
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; 32 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Re-hash `path` and compare against the checksum recorded at creation.
pub fn verify(path: &Path, expected: &str) -> Verification {
    match checksum_file(path) {
        Ok(actual) if actual == expected => Verification::Match,
        Ok(actual) => Verification::Mismatch {
            expected: expected.to_string(),
            actual,
        },
        Err(err) => Verification::Unreadable {
            detail: err.to_string(),
        },
    }
}

/// `verify` folded into the error taxonomy, for call sites where any
/// verification failure fails the scenario.
pub fn require_match(path: &Path, expected: &str) -> Result<()> {
    match verify(path, expected) {
        Verification::Match => Ok(()),
        Verification::Mismatch { expected, actual } => Err(HarnessError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        }),
        Verification::Unreadable { detail } => Err(HarnessError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual: format!("unreadable ({detail})"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn generated_fixtures_verify_against_recorded_checksums() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());
        fs::create_dir_all(&ctx.server_dir).unwrap();

        let mut oracle = FixtureOracle::with_seed(42);
        let set = oracle.generate(&ctx, &ctx.server_dir, 3, 0..=4096).unwrap();

        assert_eq!(set.len(), 3);
        for fixture in set.iter() {
            let path = ctx.server_dir.join(&fixture.name);
            assert!(verify(&path, &fixture.checksum).is_match());
            assert!(require_match(&path, &fixture.checksum).is_ok());
        }
    }

    #[test]
    fn zero_length_fixture_is_reachable_and_verifies() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());
        fs::create_dir_all(&ctx.server_dir).unwrap();

        let mut oracle = FixtureOracle::with_seed(7);
        let set = oracle.generate(&ctx, &ctx.server_dir, 1, 0..=0).unwrap();
        let fixture = set.first().unwrap();

        assert_eq!(fixture.size, 0);
        let path = ctx.server_dir.join(&fixture.name);
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
        assert!(verify(&path, &fixture.checksum).is_match());
    }

    #[test]
    fn insertion_order_decides_first_and_last() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());
        fs::create_dir_all(&ctx.server_dir).unwrap();

        let mut oracle = FixtureOracle::with_seed(1);
        let set = oracle.generate(&ctx, &ctx.server_dir, 5, 0..=128).unwrap();

        assert_eq!(set.first().unwrap().name, ctx.bulk_fixture_name(0));
        assert_eq!(set.last().unwrap().name, ctx.bulk_fixture_name(4));
    }

    #[test]
    fn corruption_is_a_mismatch_not_a_fault() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());
        fs::create_dir_all(&ctx.server_dir).unwrap();

        let mut oracle = FixtureOracle::with_seed(9);
        let set = oracle.generate(&ctx, &ctx.server_dir, 1, 16..=16).unwrap();
        let fixture = set.first().unwrap();

        let path = ctx.server_dir.join(&fixture.name);
        fs::write(&path, b"corrupted").unwrap();

        match verify(&path, &fixture.checksum) {
            Verification::Mismatch { expected, actual } => {
                assert_eq!(expected, fixture.checksum);
                assert_ne!(actual, fixture.checksum);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn absent_file_is_unreadable_not_a_fault() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never-written.bin");

        match verify(&path, "blake3:00") {
            Verification::Unreadable { detail } => assert!(!detail.is_empty()),
            other => panic!("expected unreadable, got {other:?}"),
        }
        assert!(require_match(&path, "blake3:00").is_err());
    }
}
