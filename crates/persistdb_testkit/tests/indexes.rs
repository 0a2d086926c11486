//! Unique and plain indexes seen through saves and queries.

use persistdb_codec::Value;
use persistdb_core::{CoreError, IndexSpec, ObjectRef, Query};
use persistdb_testkit::prelude::*;

fn pair(class: &str, a: i64, c: i64) -> ObjectRef {
    let obj = ObjectRef::new(class);
    obj.set("a", a).set("b", Value::map([("c", Value::from(c))]));
    obj
}

#[test]
fn unique_index_over_nested_paths() {
    let db = TestDatabase::memory();
    let name = db.add_index(IndexSpec::new(["a", "b.c"]).unique()).unwrap();
    assert_eq!(name, "a__b_c__idx");

    let x = pair("A", 1, 1);
    db.save(&x).unwrap();

    let y = pair("A", 1, 1);
    let err = db.save(&y).unwrap_err();
    assert!(matches!(err, CoreError::Uniqueness { ref index } if index == &name));
    assert!(y.is_new());
    assert!(y.is_dirty());
    assert_eq!(db.len(), 1);

    // A differing component is a different tuple.
    db.save(&pair("A", 1, 2)).unwrap();
    assert_eq!(db.len(), 2);
}

#[test]
fn updating_an_object_does_not_conflict_with_itself() {
    let db = TestDatabase::memory();
    db.add_index(IndexSpec::new(["a"]).unique()).unwrap();
    let x = pair("A", 1, 1);
    db.save(&x).unwrap();
    x.set("other", true);
    db.save(&x).unwrap();

    // Moving off a value frees it.
    x.set("a", 2);
    db.save(&x).unwrap();
    db.save(&pair("A", 1, 1)).unwrap();
    assert_eq!(db.len(), 2);
}

#[test]
fn class_scope_only_covers_one_class() {
    let db = TestDatabase::memory();
    db.add_index(IndexSpec::new(["a"]).unique()).unwrap();
    db.save(&pair("A", 1, 0)).unwrap();
    db.save(&pair("B", 1, 0)).unwrap();
    assert!(db.save(&pair("B", 1, 0)).unwrap_err().is_uniqueness());
}

#[test]
fn global_scope_covers_every_class() {
    let db = TestDatabase::memory();
    db.add_index(IndexSpec::new(["a"]).unique().global()).unwrap();
    db.save(&pair("A", 1, 0)).unwrap();
    assert!(db.save(&pair("B", 1, 0)).unwrap_err().is_uniqueness());
    db.save(&pair("B", 2, 0)).unwrap();
}

#[test]
fn objects_without_the_paths_are_not_constrained() {
    let db = TestDatabase::memory();
    db.add_index(IndexSpec::new(["email"]).unique()).unwrap();
    let user = ObjectRef::new("User");
    user.set("email", "ada@example.com");
    db.save(&user).unwrap();

    // Neither the same class nor another one is limited to a single
    // object lacking the path.
    db.save(&ObjectRef::new("Post")).unwrap();
    db.save(&ObjectRef::new("Post")).unwrap();
    db.save(&ObjectRef::new("User")).unwrap();
    db.save(&ObjectRef::new("User")).unwrap();
    assert_eq!(db.len(), 5);

    // Null is a value, so two nulls collide.
    let with_null = ObjectRef::new("User");
    with_null.set("email", ());
    db.save(&with_null).unwrap();
    let again = ObjectRef::new("User");
    again.set("email", ());
    assert!(db.save(&again).unwrap_err().is_uniqueness());
}

#[test]
fn global_index_ignores_objects_without_the_paths() {
    let db = TestDatabase::memory();
    db.add_index(IndexSpec::new(["email"]).unique().global()).unwrap();
    db.save(&ObjectRef::new("Session")).unwrap();
    db.save(&ObjectRef::new("Comment")).unwrap();
    db.save(&ObjectRef::new("Comment")).unwrap();
    assert_eq!(db.len(), 3);
}

#[test]
fn partially_present_tuples_still_collide() {
    let db = TestDatabase::memory();
    db.add_index(IndexSpec::new(["a", "b.c"]).unique()).unwrap();
    let first = ObjectRef::new("A");
    first.set("a", 1);
    db.save(&first).unwrap();
    let second = ObjectRef::new("A");
    second.set("a", 1);
    assert!(db.save(&second).unwrap_err().is_uniqueness());
}

#[test]
fn referenced_object_violation_aborts_the_whole_graph() {
    let db = TestDatabase::memory();
    db.add_index(IndexSpec::new(["a"]).unique()).unwrap();
    db.save(&pair("A", 1, 0)).unwrap();

    let clash = pair("A", 1, 0);
    let holder = ObjectRef::new("B");
    holder.set("ref0", &clash);
    assert!(db.save(&holder).unwrap_err().is_uniqueness());
    assert_eq!(db.len(), 1);
    assert!(holder.is_new());
    assert!(clash.is_new());
}

#[test]
fn declaring_unique_over_duplicates_fails() {
    let db = TestDatabase::memory();
    db.save(&pair("A", 1, 0)).unwrap();
    db.save(&pair("A", 1, 0)).unwrap();
    assert!(db.add_index(IndexSpec::new(["a"]).unique()).is_err());
    assert!(db.indexes().is_empty());
}

#[test]
fn redeclaring_an_index() {
    let db = TestDatabase::memory();
    let name = db.add_index(IndexSpec::new(["a"])).unwrap();
    assert_eq!(db.add_index(IndexSpec::new(["a"])).unwrap(), name);

    let conflict = db.add_index(IndexSpec::new(["b"]).named(name.clone()));
    assert!(matches!(conflict, Err(CoreError::Configuration { .. })));
    assert_eq!(db.indexes().len(), 1);
}

#[test]
fn plain_index_answers_equality_queries() {
    let db = TestDatabase::memory();
    db.add_index(IndexSpec::new(["a"])).unwrap();
    for n in 0..20 {
        db.save(&pair("A", n % 4, n)).unwrap();
    }

    let before = db.stats().store;
    let found = Query::new("A").equal_to("a", 3).find(&db).unwrap();
    let after = db.stats().store;
    assert_eq!(found.len(), 5);
    assert_eq!(after.index_lookups, before.index_lookups + 1);
    assert_eq!(after.scans, before.scans);

    // Plain indexes never reject saves.
    db.save(&pair("A", 3, 3)).unwrap();
}

#[test]
fn unique_index_survives_reopen() {
    let db = TestDatabase::file();
    db.add_index(IndexSpec::new(["a"]).unique()).unwrap();
    db.save(&pair("A", 1, 0)).unwrap();

    let db = db.reopen();
    assert_eq!(db.indexes().len(), 1);
    assert!(db.save(&pair("A", 1, 0)).unwrap_err().is_uniqueness());
}

#[test]
fn racing_savers_leave_one_winner_per_value() {
    let db = TestDatabase::memory();
    db.add_index(IndexSpec::new(["n"]).unique().global()).unwrap();
    let config = StressConfig {
        threads: 6,
        saves_per_thread: 10,
    };
    let result = concurrent_saves(&db, &config, "B", "n", |_, i| (i % 5) as i64);
    assert_eq!(result.successful_ops, 5);
    assert_eq!(result.other_failures, 0);
    assert_eq!(db.len(), 5);
}
