//! Random operation sequences checked against a `BTreeMap`.

mod common;

use std::collections::BTreeMap;

use common::{temp_db, test_config};
use pagedb::{Database, Error};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Insert(u16, usize),
    Delete(u16),
}

fn arb_op() -> impl Strategy<Value = Op> {
    // Small key space so deletes and duplicates hit existing keys.
    prop_oneof![
        3 => (0u16..400, 0usize..200).prop_map(|(k, len)| Op::Insert(k, len)),
        2 => (0u16..400).prop_map(Op::Delete),
    ]
}

fn key_bytes(k: u16) -> Vec<u8> {
    // Vary key length to exercise variable-size entries.
    let mut key = k.to_be_bytes().to_vec();
    key.extend(std::iter::repeat(b'k').take((k % 23) as usize));
    key
}

fn record_bytes(k: u16, len: usize) -> Vec<u8> {
    (0..len).map(|i| (k as usize + i) as u8).collect()
}

fn check(db: &Database, model: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<(), TestCaseError> {
    let entries = db
        .iter()
        .collect::<pagedb::Result<Vec<_>>>()
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
    let expected: Vec<(Vec<u8>, Vec<u8>)> =
        model.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    prop_assert_eq!(entries, expected);

    let summary = db.verify().map_err(|e| TestCaseError::fail(e.to_string()))?;
    prop_assert_eq!(summary.keys, model.len());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_matches_btreemap(ops in prop::collection::vec(arb_op(), 1..600)) {
        let (_dir, path) = temp_db();
        let config = test_config(512);
        let db = Database::open(&path, config.clone()).unwrap();
        let mut model = BTreeMap::new();

        for op in &ops {
            match *op {
                Op::Insert(k, len) => {
                    let key = key_bytes(k);
                    let record = record_bytes(k, len);
                    let result = db.insert(&key, &record);
                    if model.contains_key(&key) {
                        prop_assert!(matches!(result, Err(Error::DuplicateKey)));
                    } else {
                        prop_assert!(result.is_ok());
                        model.insert(key, record);
                    }
                }
                Op::Delete(k) => {
                    let key = key_bytes(k);
                    let result = db.delete(&key);
                    if model.remove(&key).is_some() {
                        prop_assert!(result.is_ok());
                    } else {
                        prop_assert!(matches!(result, Err(Error::KeyNotFound)));
                    }
                }
            }
        }
        check(&db, &model)?;

        // Everything survives a crash.
        drop(db);
        let db = Database::open(&path, config).unwrap();
        check(&db, &model)?;
    }
}
