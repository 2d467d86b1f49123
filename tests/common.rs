// Common test utilities
#![allow(dead_code)]

use std::path::PathBuf;

use contract_verifier::{Schema, Verifier, Violation};

/// Route `log` output through the test harness
pub fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

/// Path of a fixture module under tests/contracts
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("contracts")
        .join(name)
}

pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("contracts")
}

pub fn ok(src: &str) -> Schema {
    init_logger();
    Verifier::reference()
        .verify_and_extract(src)
        .unwrap_or_else(|v| panic!("expected ok, got:\n{}", v))
}

pub fn rejected(src: &str) -> Violation {
    init_logger();
    match Verifier::reference().verify_and_extract(src) {
        Ok(schema) => panic!("expected rejection, got schema {:?}", schema),
        Err(violation) => violation,
    }
}
