//! Query operators, sorting, pagination and unions.

use chrono::{Duration, Utc};
use persistdb_core::{CoreError, ObjectId, ObjectRef, OrQuery, Query};
use persistdb_testkit::prelude::*;

/// Saves one `A` per value of `foo`, in order.
fn save_foos<V>(db: &TestDatabase, values: impl IntoIterator<Item = V>) -> Vec<ObjectRef>
where
    V: Into<persistdb_core::Attr>,
{
    values
        .into_iter()
        .map(|value| {
            let obj = ObjectRef::new("A");
            obj.set("foo", value);
            db.save(&obj).unwrap();
            obj
        })
        .collect()
}

fn ids(objects: &[ObjectRef]) -> Vec<ObjectId> {
    objects.iter().map(|o| o.id().clone()).collect()
}

fn ids_sorted(objects: &[ObjectRef]) -> Vec<ObjectId> {
    let mut ids = ids(objects);
    ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    ids
}

fn expect(objects: &[&ObjectRef]) -> Vec<ObjectId> {
    let mut ids: Vec<ObjectId> = objects.iter().map(|o| o.id().clone()).collect();
    ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    ids
}

#[test]
fn unscoped_query_finds_everything_in_insertion_order() {
    let db = TestDatabase::memory();
    let a = save_foos(&db, [1, 2]);
    let b = ObjectRef::new("B");
    db.save(&b).unwrap();

    let found = Query::all().find(&db).unwrap();
    assert_eq!(ids(&found), vec![a[0].id().clone(), a[1].id().clone(), b.id().clone()]);

    let scoped = Query::of::<A>().find(&db).unwrap();
    assert_eq!(ids(&scoped), ids(&a));
    assert_eq!(Query::of::<A>().first(&db).unwrap().unwrap().id(), a[0].id());
}

#[test]
fn exists_and_does_not_exist() {
    let db = TestDatabase::memory();
    let a0 = ObjectRef::new("A");
    a0.set("foo", 1);
    let a1 = ObjectRef::new("A");
    a1.set("bar", 1);
    db.save(&a0).unwrap();
    db.save(&a1).unwrap();

    let found = Query::new("A").exists("foo").find(&db).unwrap();
    assert_eq!(ids(&found), vec![a0.id().clone()]);
    let found = Query::new("A").does_not_exist("foo").find(&db).unwrap();
    assert_eq!(ids(&found), vec![a1.id().clone()]);
}

#[test]
fn equal_to_scalars_and_lists() {
    let db = TestDatabase::memory();
    let same = save_foos(&db, [1, 1]);
    let found = Query::new("A").equal_to("foo", 1).find(&db).unwrap();
    assert_eq!(ids_sorted(&found), expect(&[&same[0], &same[1]]));

    let db = TestDatabase::memory();
    let list = ObjectRef::new("A");
    list.set("foo", vec![1, 2, 3]);
    db.save(&list).unwrap();
    let other = save_foos(&db, [2]);

    let found = Query::new("A").equal_to("foo", vec![1, 2, 3]).find(&db).unwrap();
    assert_eq!(ids(&found), vec![list.id().clone()]);
    let found = Query::new("A").not_equal_to("foo", vec![1, 2, 3]).find(&db).unwrap();
    assert_eq!(ids(&found), ids(&other));
}

#[test]
fn not_equal_to_skips_absent_values() {
    let db = TestDatabase::memory();
    let a = save_foos(&db, [1, 2]);
    db.save(&ObjectRef::new("A")).unwrap();

    let found = Query::new("A").not_equal_to("foo", 1).find(&db).unwrap();
    assert_eq!(ids(&found), vec![a[1].id().clone()]);
}

#[test]
fn ordering_comparisons() {
    let db = TestDatabase::memory();
    let a = save_foos(&db, [1, 2, 0]);

    let gt = Query::new("A").greater_than("foo", 1, false).find(&db).unwrap();
    assert_eq!(ids(&gt), vec![a[1].id().clone()]);

    let ge = Query::new("A").greater_than_or_equal_to("foo", 1, false).find(&db).unwrap();
    assert_eq!(ids_sorted(&ge), expect(&[&a[0], &a[1]]));

    let lt = Query::new("A").less_than("foo", 1, false).find(&db).unwrap();
    assert_eq!(ids(&lt), vec![a[2].id().clone()]);

    let le = Query::new("A").less_than_or_equal_to("foo", 1, false).find(&db).unwrap();
    assert_eq!(ids_sorted(&le), expect(&[&a[0], &a[2]]));
}

#[test]
fn floats_compare_and_sort_with_integers() {
    use persistdb_core::Value;

    let db = TestDatabase::memory();
    let a = save_foos(
        &db,
        [Value::Float(1.5), Value::Integer(2), Value::Float(-0.25), Value::Float(2.0)],
    );

    let gt = Query::new("A").greater_than("foo", 1, false).find(&db).unwrap();
    assert_eq!(ids_sorted(&gt), expect(&[&a[0], &a[1], &a[3]]));
    let lt = Query::new("A").less_than("foo", 1.5, false).find(&db).unwrap();
    assert_eq!(ids(&lt), vec![a[2].id().clone()]);

    // 2 and 2.0 are equal to a query.
    let two = Query::new("A").equal_to("foo", 2).find(&db).unwrap();
    assert_eq!(ids_sorted(&two), expect(&[&a[1], &a[3]]));
    let two = Query::new("A").equal_to("foo", 2.0).find(&db).unwrap();
    assert_eq!(ids_sorted(&two), expect(&[&a[1], &a[3]]));

    let asc = Query::new("A").ascending("foo").find(&db).unwrap();
    assert_eq!(
        ids(&asc),
        vec![a[2].id().clone(), a[0].id().clone(), a[1].id().clone(), a[3].id().clone()]
    );
}

#[test]
fn list_comparisons_use_the_length() {
    let db = TestDatabase::memory();
    let three = ObjectRef::new("A");
    three.set("foo", vec![1, 2, 3]);
    db.save(&three).unwrap();
    // A scalar above the bound never matches a length comparison.
    save_foos(&db, [2]);

    let found = Query::new("A").greater_than("foo", 2, true).find(&db).unwrap();
    assert_eq!(ids(&found), vec![three.id().clone()]);

    let db = TestDatabase::memory();
    let lists: Vec<ObjectRef> = [vec![1], vec![1, 2, 3], vec![1, 2], vec![1, 2, 3, 4]]
        .into_iter()
        .map(|items| {
            let obj = ObjectRef::new("A");
            obj.set("foo", items);
            db.save(&obj).unwrap();
            obj
        })
        .collect();

    let ge = Query::new("A").greater_than_or_equal_to("foo", 2, true).find(&db).unwrap();
    assert_eq!(ids_sorted(&ge), expect(&[&lists[1], &lists[2], &lists[3]]));

    let lt = Query::new("A").less_than("foo", 3, true).find(&db).unwrap();
    assert_eq!(ids_sorted(&lt), expect(&[&lists[0], &lists[2]]));

    let le = Query::new("A").less_than_or_equal_to("foo", 3, true).find(&db).unwrap();
    assert_eq!(ids_sorted(&le), expect(&[&lists[0], &lists[1], &lists[2]]));
}

#[test]
fn contained_in_and_not_contained_in() {
    let db = TestDatabase::memory();
    let a = save_foos(&db, [1, 2]);

    let found = Query::new("A").contained_in("foo", [1, 3, 5]).find(&db).unwrap();
    assert_eq!(ids(&found), vec![a[0].id().clone()]);
    let found = Query::new("A").not_contained_in("foo", [1, 3, 5]).find(&db).unwrap();
    assert_eq!(ids(&found), vec![a[1].id().clone()]);
}

#[test]
fn text_operators() {
    let db = TestDatabase::memory();
    let a = save_foos(&db, ["abc", "cde"]);
    let run = |query: Query| ids_sorted(&query.find(&db).unwrap());

    assert_eq!(run(Query::new("A").contains("foo", "c", false)), expect(&[&a[0], &a[1]]));
    assert_eq!(run(Query::new("A").starts_with("foo", "ab", false)), expect(&[&a[0]]));
    assert_eq!(run(Query::new("A").ends_with("foo", "de", false)), expect(&[&a[1]]));

    assert!(run(Query::new("A").contains("foo", "C", false)).is_empty());
    assert_eq!(run(Query::new("A").contains("foo", "C", true)), expect(&[&a[0], &a[1]]));
    assert_eq!(run(Query::new("A").starts_with("foo", "aB", true)), expect(&[&a[0]]));
    assert_eq!(run(Query::new("A").ends_with("foo", "DE", true)), expect(&[&a[1]]));
}

#[test]
fn like_wildcards_are_literal() {
    let db = TestDatabase::memory();
    let a = save_foos(&db, ["50%_off", "500 off"]);
    let found = Query::new("A").starts_with("foo", "50%", false).find(&db).unwrap();
    assert_eq!(ids(&found), vec![a[0].id().clone()]);
}

#[test]
fn regex_matching() {
    let db = TestDatabase::memory();
    let a = save_foos(&db, ["abc", "cde"]);

    let found = Query::new("A").matches("foo", "^a", false).find(&db).unwrap();
    assert_eq!(ids(&found), vec![a[0].id().clone()]);

    let found = Query::new("A").matches("foo", "^CDE$", true).find(&db).unwrap();
    assert_eq!(ids(&found), vec![a[1].id().clone()]);

    // Matching starts at the first character.
    assert_eq!(Query::new("A").matches("foo", "d", false).count(&db).unwrap(), 0);
}

#[test]
fn invalid_regex_fails_at_execution() {
    let db = TestDatabase::memory();
    save_foos(&db, ["abc"]);
    let query = Query::new("A").matches("foo", "(", false);
    assert!(matches!(query.find(&db), Err(CoreError::InvalidQuery { .. })));
}

#[test]
fn sorting_by_one_and_several_paths() {
    let db = TestDatabase::memory();
    let a = save_foos(&db, [1, 2]);

    let asc = Query::new("A").exists("foo").ascending("foo").find(&db).unwrap();
    assert_eq!(ids(&asc), ids(&a));
    let desc = Query::new("A").exists("foo").descending("foo").find(&db).unwrap();
    assert_eq!(ids(&desc), vec![a[1].id().clone(), a[0].id().clone()]);

    let db = TestDatabase::memory();
    let (a0, a1) = (ObjectRef::new("A"), ObjectRef::new("A"));
    a0.set("foo", 1).set("bar", 0);
    a1.set("foo", 1).set("bar", 2);
    db.save(&a0).unwrap();
    db.save(&a1).unwrap();

    let asc = Query::new("A").ascending("foo").ascending("bar").find(&db).unwrap();
    assert_eq!(ids(&asc), vec![a0.id().clone(), a1.id().clone()]);
    let desc = Query::new("A").descending("foo").descending("bar").find(&db).unwrap();
    assert_eq!(ids(&desc), vec![a1.id().clone(), a0.id().clone()]);
}

#[test]
fn skip_and_limit_window_the_sorted_results() {
    let db = TestDatabase::memory();
    let a = save_foos(&db, [1, 2]);
    let found = Query::new("A").exists("foo").descending("foo").skip(1).find(&db).unwrap();
    assert_eq!(ids(&found), vec![a[0].id().clone()]);

    let db = TestDatabase::memory();
    // Saved out of order so the sort does the work.
    let objs = save_foos(&db, [7, 3, 9, 1, 10, 5, 2, 8, 4, 6]);
    let page = Query::new("A").ascending("foo").skip(2).limit(3).find(&db).unwrap();
    let foos: Vec<i64> = page.iter().filter_map(|o| o.value("foo")?.as_integer()).collect();
    assert_eq!(foos, vec![3, 4, 5]);
    assert_eq!(page[0].id(), objs[1].id());
}

#[test]
fn zero_limit_is_rejected() {
    let db = TestDatabase::memory();
    let result = Query::new("A").limit(0).find(&db);
    assert!(matches!(result, Err(CoreError::InvalidQuery { .. })));
}

#[test]
fn count_ignores_the_window() {
    let db = TestDatabase::memory();
    save_foos(&db, [1, 2]);
    assert_eq!(Query::new("A").exists("foo").count(&db).unwrap(), 2);
    assert_eq!(Query::new("A").exists("foo").skip(1).limit(1).count(&db).unwrap(), 2);
    assert_eq!(Query::new("A").exists("bar").count(&db).unwrap(), 0);
}

#[test]
fn finding_nothing_is_empty() {
    let db = TestDatabase::memory();
    save_foos(&db, [1, 2]);
    assert!(Query::new("A").exists("bar").find(&db).unwrap().is_empty());
    assert!(Query::new("A").exists("bar").first(&db).unwrap().is_none());
}

#[test]
fn filters_are_and_ed() {
    let db = TestDatabase::memory();
    let (a0, a1) = (ObjectRef::new("A"), ObjectRef::new("A"));
    a0.set("foo", 1).set("bar", 2);
    a1.set("foo", 1).set("bar", 3);
    db.save(&a0).unwrap();
    db.save(&a1).unwrap();

    let found = Query::new("A")
        .equal_to("foo", 1)
        .greater_than("bar", 2, false)
        .find(&db)
        .unwrap();
    assert_eq!(ids(&found), vec![a1.id().clone()]);
}

#[test]
fn or_query_unions_without_duplicates() {
    let db = TestDatabase::memory();
    let a = save_foos(&db, [1, 2]);
    let a2 = ObjectRef::new("A");
    a2.set("bar", 2);
    db.save(&a2).unwrap();

    let union = OrQuery::new([
        Query::new("A").exists("bar"),
        Query::new("A").equal_to("foo", 1),
        // Overlaps the previous one.
        Query::new("A").less_than("foo", 2, false),
    ]);
    let found = union.find(&db).unwrap();
    assert_eq!(ids_sorted(&found), expect(&[&a[0], &a2]));
    assert_eq!(union.count(&db).unwrap(), 2);
}

#[test]
fn or_query_keeps_each_class_restriction() {
    let db = TestDatabase::memory();
    let a = ObjectRef::new("A");
    a.set("x", 1);
    let b = ObjectRef::new("B");
    b.set("y", 2);
    let decoy = ObjectRef::new("B");
    decoy.set("x", 1);
    for obj in [&a, &b, &decoy] {
        db.save(obj).unwrap();
    }

    let found = OrQuery::new([Query::new("A").equal_to("x", 1)])
        .or(Query::new("B").equal_to("y", 2))
        .find(&db)
        .unwrap();
    assert_eq!(ids_sorted(&found), expect(&[&a, &b]));
}

#[test]
fn or_query_windows_and_empty_union() {
    let db = TestDatabase::memory();
    save_foos(&db, [1, 2, 3, 4]);
    let union = OrQuery::new([
        Query::new("A").less_than("foo", 2, false),
        Query::new("A").greater_than("foo", 2, false),
    ])
    .descending("foo")
    .limit(2);
    let foos: Vec<i64> = union
        .find(&db)
        .unwrap()
        .iter()
        .filter_map(|o| o.value("foo")?.as_integer())
        .collect();
    assert_eq!(foos, vec![4, 3]);

    assert!(OrQuery::default().find(&db).unwrap().is_empty());
}

#[test]
fn equal_to_an_object_compares_ids() {
    let db = TestDatabase::memory();
    let a = ObjectRef::new("A");
    a.set("foo", 1);
    db.save(&a).unwrap();
    let b = ObjectRef::new("B");
    b.set("ref0", &a);
    db.save(&b).unwrap();

    assert_eq!(Query::new("B").equal_to("ref0", &a).count(&db).unwrap(), 1);
    let found = Query::new("B").equal_to("ref0", &a).first(&db).unwrap().unwrap();
    assert_eq!(found.object("ref0").unwrap().id(), a.id());
}

#[test]
fn matches_query_follows_references() {
    let db = TestDatabase::memory();
    let a = ObjectRef::new("A");
    a.set("foo", 1);
    db.save(&a).unwrap();
    let b0 = ObjectRef::new("B");
    b0.set("foo", 2).set("ref0", &a);
    db.save(&b0).unwrap();
    let b1 = ObjectRef::new("B");
    b1.set("foo", 2);
    db.save(&b1).unwrap();

    let qa = Query::new("A").equal_to("foo", 1);
    let found = Query::new("B").matches_query("ref0", qa).find(&db).unwrap();
    assert_eq!(ids(&found), vec![b0.id().clone()]);
}

#[test]
fn does_not_match_query_with_a_union() {
    let db = TestDatabase::memory();
    let a = ObjectRef::new("A");
    a.set("foo", 1);
    db.save(&a).unwrap();
    let a1 = ObjectRef::new("A");
    a1.set("foo", 2);
    db.save(&a1).unwrap();
    let b0 = ObjectRef::new("B");
    b0.set("foo", 2).set("ref0", &a);
    db.save(&b0).unwrap();
    let b1 = ObjectRef::new("B");
    b1.set("foo", 2);
    db.save(&b1).unwrap();

    let qa = Query::new("A").equal_to("foo", 1);
    let union = OrQuery::new([
        Query::new("B").does_not_exist("ref0"),
        Query::new("B").does_not_match_query("ref0", qa),
    ]);
    let found = union.find(&db).unwrap();
    assert_eq!(ids(&found), vec![b1.id().clone()]);
}

#[test]
fn dates_compare_in_time_order() {
    let db = TestDatabase::memory();
    let now = Utc::now();
    let (a0, a1) = (ObjectRef::new("A"), ObjectRef::new("A"));
    a0.set("foo", 1).set("a_date", now - Duration::hours(1));
    a1.set("foo", 2).set("a_date", now - Duration::minutes(61));
    db.save(&a0).unwrap();
    db.save(&a1).unwrap();

    assert_eq!(Query::new("A").less_than("a_date", Utc::now(), false).count(&db).unwrap(), 2);
    let older = Query::new("A")
        .less_than("a_date", now - Duration::minutes(60) - Duration::seconds(30), false)
        .find(&db)
        .unwrap();
    assert_eq!(ids(&older), vec![a1.id().clone()]);

    let by_date = Query::new("A").ascending("a_date").find(&db).unwrap();
    assert_eq!(ids(&by_date), vec![a1.id().clone(), a0.id().clone()]);
}

#[test]
fn nested_key_paths() {
    let db = TestDatabase::memory();
    let obj = ObjectRef::new("A");
    obj.set(
        "b",
        persistdb_codec::Value::map([("c", persistdb_codec::Value::from(5))]),
    );
    db.save(&obj).unwrap();
    save_foos(&db, [5]);

    let found = Query::new("A").equal_to("b.c", 5).find(&db).unwrap();
    assert_eq!(ids(&found), vec![obj.id().clone()]);
}
