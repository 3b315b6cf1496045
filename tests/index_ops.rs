//! End-to-end index operations on real store files.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use slabtree::{
    Arena, Key32, MemoryStore, MultiListPointer, OrderedListPointer, SingleMap, SurrogateBytes,
    SurrogateList, SurrogateMultiList, Tree, UnitCursor,
};

type FuzzyTree<'a> = Tree<'a, SingleMap, slabtree::FuzzyPointer>;
type ListTree<'a> = Tree<'a, SingleMap, OrderedListPointer>;

fn open_arena(dir: &tempfile::TempDir) -> Arena<SingleMap> {
    Arena::open(SingleMap::open(dir.path().join("index.slab")).unwrap()).unwrap()
}

#[test]
fn overwrite_keeps_the_slot_until_the_caller_updates() {
    let dir = tempdir().unwrap();
    let arena = open_arena(&dir);
    let mut cursor = UnitCursor::new();
    let tree: FuzzyTree = Tree::open(&arena, &mut cursor).unwrap();

    let key = Key32::digest(b"Test");

    let placed = tree.insert(&key, 99).unwrap();
    assert!(!placed.overwrite);
    assert_eq!(tree.find(&key).unwrap(), Some(99));

    // Re-inserting reports the occupied slot and leaves the old value in
    // place; committing the replacement is the caller's move.
    let placed = tree.insert(&key, 100).unwrap();
    assert!(placed.overwrite);
    assert_eq!(placed.slot.get(), 99);

    placed.slot.set(100);
    assert_eq!(tree.find(&key).unwrap(), Some(100));
}

#[test]
fn ten_thousand_random_keys_recover_exactly() {
    let dir = tempdir().unwrap();
    let arena = open_arena(&dir);
    let mut cursor = UnitCursor::new();
    let tree: FuzzyTree = Tree::open(&arena, &mut cursor).unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let mut expected = hashbrown::HashMap::new();

    while expected.len() < 10_000 {
        let seed: u64 = rng.gen();
        let value = seed | 1;
        let key = Key32::digest(&seed.to_le_bytes());
        if expected.insert(key, value).is_none() {
            tree.insert(&key, value).unwrap();
        }
    }

    for (key, value) in &expected {
        assert_eq!(tree.find(key).unwrap(), Some(*value));
    }

    let (used, capacity) = tree.population().unwrap();
    assert_eq!(used, 10_000);
    // Every allocated page contributes its full slot complement.
    assert_eq!(capacity % 1637, 0);
    assert!(capacity >= used);
    assert_eq!(tree.find(&Key32::digest(b"never inserted")).unwrap(), None);
    assert!(tree.validate().unwrap());
}

#[test]
fn range_scan_matches_a_linear_filter() {
    let dir = tempdir().unwrap();
    let arena = open_arena(&dir);
    let mut cursor = UnitCursor::new();
    let tree: ListTree = Tree::open(&arena, &mut cursor).unwrap();

    let mut rng = StdRng::seed_from_u64(11);
    let mut keys = Vec::new();
    for value in 1..=5_000u64 {
        let key = Key32::digest(&rng.gen::<u64>().to_le_bytes());
        tree.insert(&key, value).unwrap();
        keys.push((key, value));
    }

    let low = Key32::digest(b"low bound");
    let high = Key32::digest(b"high bound");
    let (low, high) = if low.words <= high.words {
        (low, high)
    } else {
        (high, low)
    };

    let mut expected: Vec<u64> = keys
        .iter()
        .filter(|(k, _)| low.words <= k.words && k.words <= high.words)
        .map(|(_, v)| *v)
        .collect();
    expected.sort_unstable();

    let mut seen = Vec::new();
    tree.range_find(&low, &high, &mut |p| seen.push(p)).unwrap();
    seen.sort_unstable();

    assert_eq!(seen, expected);
}

#[test]
fn multi_table_accumulates_values_per_key() {
    let dir = tempdir().unwrap();
    let arena = open_arena(&dir);
    let mut cursor = UnitCursor::new();
    let tree: Tree<_, MultiListPointer> = Tree::open(&arena, &mut cursor).unwrap();

    let shared = Key32::digest(b"order:7731");
    for line in 1..=5u64 {
        tree.insert(&shared, line * 100).unwrap();
    }
    tree.insert(&Key32::digest(b"order:7732"), 1).unwrap();

    let mut seen = Vec::new();
    tree.multi_find(&shared, &mut |p| seen.push(p)).unwrap();

    seen.sort_unstable();
    assert_eq!(seen, vec![100, 200, 300, 400, 500]);
}

#[test]
fn surrogate_keys_search_by_staged_payload() {
    let dir = tempdir().unwrap();
    let arena = open_arena(&dir);
    let mut cursor = UnitCursor::new();
    let tree: Tree<_, SurrogateList> = Tree::open(&arena, &mut cursor).unwrap();

    for (name, value) in [("alpha", 1u64), ("beta", 2), ("gamma", 3)] {
        let offset = arena.set_object(name.as_bytes()).unwrap();
        tree.insert(&SurrogateBytes::committed(offset), value).unwrap();
    }

    // A probe never touches the arena: its payload rides in the staged
    // buffer.
    let probe = SurrogateBytes::staged();
    assert_eq!(tree.find_with(&probe, Some(b"beta")).unwrap(), Some(2));
    assert_eq!(tree.find_with(&probe, Some(b"delta")).unwrap(), None);
}

#[test]
fn surrogate_duplicates_are_found_by_staged_payload() {
    let dir = tempdir().unwrap();
    let arena = open_arena(&dir);
    let mut cursor = UnitCursor::new();
    let tree: Tree<_, SurrogateMultiList> = Tree::open(&arena, &mut cursor).unwrap();

    // Duplicate keys are equal payloads committed at distinct offsets.
    for value in 1..=3u64 {
        let offset = arena.set_object(b"tag:shared").unwrap();
        tree.insert(&SurrogateBytes::committed(offset), value).unwrap();
    }
    let other = arena.set_object(b"tag:other").unwrap();
    tree.insert(&SurrogateBytes::committed(other), 99).unwrap();

    let mut seen = Vec::new();
    tree.multi_find_with(&SurrogateBytes::staged(), Some(b"tag:shared"), &mut |p| {
        seen.push(p)
    })
    .unwrap();

    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2, 3]);
}

#[test]
fn surrogate_range_accepts_a_staged_bound() {
    let dir = tempdir().unwrap();
    let arena = open_arena(&dir);
    let mut cursor = UnitCursor::new();
    let tree: Tree<_, SurrogateList> = Tree::open(&arena, &mut cursor).unwrap();

    let mut offsets = hashbrown::HashMap::new();
    for (name, value) in [("alpha", 1u64), ("beta", 2), ("delta", 3), ("gamma", 4)] {
        let offset = arena.set_object(name.as_bytes()).unwrap();
        offsets.insert(name, offset);
        tree.insert(&SurrogateBytes::committed(offset), value).unwrap();
    }

    // Staged lower bound, committed upper bound: [b.., "delta"].
    let low = SurrogateBytes::staged();
    let high = SurrogateBytes::committed(offsets["delta"]);

    let mut seen = Vec::new();
    tree.range_find_with(&low, &high, Some(b"b"), &mut |p| seen.push(p))
        .unwrap();

    seen.sort_unstable();
    assert_eq!(seen, vec![2, 3]);
}

#[test]
fn snapshot_image_serves_reads_without_a_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.slab");

    {
        let arena = Arena::open(SingleMap::open(&path).unwrap()).unwrap();
        let mut cursor = UnitCursor::new();
        let tree: FuzzyTree = Tree::open(&arena, &mut cursor).unwrap();
        for value in 1..=500u64 {
            tree.insert(&Key32::digest(&value.to_le_bytes()), value).unwrap();
        }
        arena.flush().unwrap();
    }

    let image = std::fs::read(&path).unwrap();
    let arena = Arena::open(MemoryStore::from_image(image).unwrap()).unwrap();
    let mut cursor = UnitCursor::new();
    let tree: Tree<_, slabtree::FuzzyPointer> = Tree::open(&arena, &mut cursor).unwrap();

    for value in 1..=500u64 {
        assert_eq!(
            tree.find(&Key32::digest(&value.to_le_bytes())).unwrap(),
            Some(value)
        );
    }
}

#[test]
fn descriptors_describe_every_table() {
    let dir = tempdir().unwrap();
    let arena = open_arena(&dir);
    let mut cursor = UnitCursor::new();

    let _list: ListTree = Tree::open(&arena, &mut cursor).unwrap();
    let _fuzzy: FuzzyTree = Tree::open(&arena, &mut cursor).unwrap();

    let text = arena.describe().unwrap();
    assert!(text.contains("Type: Sorted List"));
    assert!(text.contains("Type: Fuzzy Hashmap"));
    assert!(text.contains("Key Size: 32"));
}

#[test]
fn reopening_in_table_order_resumes_all_tables() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.slab");

    {
        let arena = Arena::open(SingleMap::open(&path).unwrap()).unwrap();
        let mut cursor = UnitCursor::new();
        let list: Tree<_, OrderedListPointer> = Tree::open(&arena, &mut cursor).unwrap();
        let fuzzy: Tree<_, slabtree::FuzzyPointer> = Tree::open(&arena, &mut cursor).unwrap();

        list.insert(&Key32::digest(b"in list"), 10).unwrap();
        fuzzy.insert(&Key32::digest(b"in fuzzy"), 20).unwrap();
        arena.flush().unwrap();
    }

    let arena = Arena::open(SingleMap::open(&path).unwrap()).unwrap();
    let mut cursor = UnitCursor::new();
    let list: Tree<_, OrderedListPointer> = Tree::open(&arena, &mut cursor).unwrap();
    let fuzzy: Tree<_, slabtree::FuzzyPointer> = Tree::open(&arena, &mut cursor).unwrap();

    assert_eq!(list.find(&Key32::digest(b"in list")).unwrap(), Some(10));
    assert_eq!(fuzzy.find(&Key32::digest(b"in fuzzy")).unwrap(), Some(20));
}
