//! Scenario tests from the design's testable-properties section: S1 (basic
//! get/seek), S2 (bulk insert + reopen), S3 (bulk remove keeps invariants),
//! and S6 (a torn trailing manifest record doesn't affect recovery).

use std::ops::Bound;

use ambertree::{Database, OpenOptions};
use rand::seq::SliceRandom;

fn key(i: u32) -> Vec<u8> {
    i.to_be_bytes().to_vec()
}

#[test]
fn s1_basic_insert_get_and_seek() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db: Database<String> = OpenOptions::new().open(dir.path()).expect("open");

    db.b_insert(&key(1), "one".to_string()).expect("insert 1");
    db.b_insert(&key(2), "two".to_string()).expect("insert 2");

    assert_eq!(db.b_get(&key(1)).expect("get 1"), Some("one".to_string()));
    assert_eq!(db.b_get(&key(3)).expect("get 3"), None);

    let lo = key(0);
    let hi = key(10);
    let got = db.b_seek(Bound::Included(&lo), Bound::Included(&hi), None).expect("seek");
    assert_eq!(got, vec![(key(1), "one".to_string()), (key(2), "two".to_string())]);
}

#[test]
fn s2_bulk_insert_shuffled_then_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut order: Vec<u32> = (0..1000).collect();
    let mut rng = rand::rng();
    order.shuffle(&mut rng);

    {
        let db: Database<u32> = OpenOptions::new().open(dir.path()).expect("open");
        let txn = db.write_transaction();
        for &i in &order {
            ambertree::btree::insert(&txn, &key(i), i).expect("insert");
        }
        txn.commit().expect("commit");
    }

    let db: Database<u32> = OpenOptions::new().open(dir.path()).expect("reopen");
    let lo = 0u32.to_be_bytes();
    let hi = 1000u32.to_be_bytes();
    let all = db.b_seek(Bound::Excluded(&lo[..]), Bound::Included(&hi[..]), None).expect("seek");
    assert_eq!(all.len(), 999);
    for (idx, (k, v)) in all.iter().enumerate() {
        let expected = idx as u32 + 1;
        assert_eq!(k, &key(expected));
        assert_eq!(*v, expected);
    }
    // And the boundary key 0, excluded above, is still independently readable.
    assert_eq!(db.b_get(&key(0)).expect("get 0"), Some(0));
    for i in 0..1000u32 {
        assert_eq!(db.b_get(&key(i)).expect("get"), Some(i));
    }
}

#[test]
fn s3_bulk_remove_across_many_transactions_keeps_invariants() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db: Database<u32> = OpenOptions::new().open(dir.path()).expect("open");
    for i in 0..1000u32 {
        db.b_insert(&key(i), i).expect("insert");
    }

    let mut order: Vec<u32> = (0..1000).collect();
    let mut rng = rand::rng();
    order.shuffle(&mut rng);

    for (removed_so_far, &i) in order.iter().enumerate() {
        db.b_remove(&key(i)).expect("remove");

        // Invariant 3: absence after removal.
        assert_eq!(db.b_get(&key(i)).expect("get"), None);

        // Invariant 1 + 4: ordering and cardinality over the remaining keys.
        let remaining = db.b_seek(Bound::Unbounded, Bound::Unbounded, None).expect("seek");
        assert_eq!(remaining.len(), 1000 - removed_so_far - 1);
        for pair in remaining.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
    }

    let remaining = db.b_seek(Bound::Unbounded, Bound::Unbounded, None).expect("seek");
    assert!(remaining.is_empty());

    // The tree has collapsed down to a single empty leaf; a further no-op
    // remove must not disturb the root id again (§4.8's collapse only
    // fires when the root is a single-child internal node).
    let root_id_after_empty = db.stats().root_id;
    db.b_remove(&key(999)).expect("remove from already-empty tree is a no-op");
    assert_eq!(db.stats().root_id, root_id_after_empty);
}

#[test]
fn s6_torn_trailing_manifest_record_is_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let db: Database<String> = OpenOptions::new().open(dir.path()).expect("open");
        db.b_insert(b"k", "v".to_string()).expect("insert");
        db.close();
    }

    // Torn write: append a partial (< 16 byte) record after the last
    // complete one, simulating a crash mid-append.
    {
        use std::fs::OpenOptions as StdOpenOptions;
        use std::io::Write;
        let manifest_path = dir.path().join("manifest");
        let mut f = StdOpenOptions::new().append(true).open(manifest_path).expect("open manifest");
        f.write_all(&[1, 2, 3, 4, 5]).expect("partial write");
        f.sync_data().expect("sync");
    }

    let db: Database<String> = OpenOptions::new().open(dir.path()).expect("reopen");
    assert_eq!(db.b_get(b"k").expect("get"), Some("v".to_string()));
}
