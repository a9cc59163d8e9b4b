use pretty_assertions::assert_eq;

use super::*;

#[derive(Clone, Debug, Default, PartialEq)]
struct Entry {
    name: String,
    tags: Vec<String>,
}

#[test]
fn basics() {
    let mut repo = ObjectRepository::new();
    assert!(repo.is_empty());

    let entry = Entry { name: "one".to_owned(), tags: vec![] };
    repo.upsert_by_id("1", &entry);
    repo.upsert_by_id("2", &Entry { name: "two".to_owned(), tags: vec![] });

    assert_eq!(repo.count(), 2);
    assert_eq!(repo.find_by_id("1"), Some(&entry));
    assert_eq!(repo.find_by_id("3"), None);
    assert_eq!(repo.find_all().len(), 2);

    assert!(repo.delete_by_id("1"));
    assert!(!repo.delete_by_id("1"));
    assert_eq!(repo.count(), 1);
}

#[test]
fn upsert_replaces_existing() {
    let mut repo = ObjectRepository::new();
    repo.upsert_by_id("1", &Entry { name: "old".to_owned(), tags: vec![] });
    repo.upsert_by_id("1", &Entry { name: "new".to_owned(), tags: vec![] });

    assert_eq!(repo.count(), 1);
    assert_eq!(repo.find_by_id("1").unwrap().name, "new");
}

#[test]
fn stored_value_is_a_copy() {
    let mut repo = ObjectRepository::new();
    let mut entry = Entry { name: "original".to_owned(), tags: vec!["t1".to_owned()] };
    repo.upsert_by_id("1", &entry);

    entry.name = "mutated".to_owned();
    entry.tags.push("t2".to_owned());

    let stored = repo.find_by_id("1").unwrap();
    assert_eq!(stored.name, "original");
    assert_eq!(stored.tags, vec!["t1".to_owned()]);
}

#[test]
fn to_vec_returns_all_values() {
    let mut repo = ObjectRepository::new();
    repo.upsert_by_id("1", &Entry { name: "one".to_owned(), tags: vec![] });
    repo.upsert_by_id("2", &Entry { name: "two".to_owned(), tags: vec![] });

    let mut names = repo.to_vec().into_iter().map(|e| e.name).collect::<Vec<_>>();
    names.sort();
    assert_eq!(names, vec!["one".to_owned(), "two".to_owned()]);
}
