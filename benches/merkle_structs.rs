use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use dmtree::{Entry, EntryKey, MerkleTree};

const BASIC_TREE_SIZE: u64 = 1_000_000;
const DELETE_TREE_SIZE: u64 = 10_000;
const BATCH_SMALL: u64 = 2_000;
const BATCH_LARGE: u64 = 10_000;

fn entry(i: u64) -> Entry {
    Entry::new(EntryKey::digest_of(i.to_be_bytes()), i.to_le_bytes().to_vec())
}

fn build_tree(size: u64) -> MerkleTree {
    eprintln!("Building tree of size {}...", size);
    let mut tree: MerkleTree = MerkleTree::new();
    tree.insert_batch((0..size).map(entry)).expect("fresh keys");
    eprintln!("Done.");
    tree
}

fn basic_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("dmtree_basic_ops");
    let base_tree = build_tree(BASIC_TREE_SIZE);
    eprintln!("Cloning base tree for insert benchmarks...");
    let mut insert_tree = base_tree.clone();
    eprintln!("Cloning base tree for delete benchmarks...");
    let mut latest_tree = base_tree.clone();
    eprintln!("Cloning base tree for lookup benchmarks...");
    let get_tree = base_tree.clone();
    let root_tree = base_tree;
    eprintln!("All clones complete. Starting benchmarks...");

    group.bench_function("insert_single", |b| {
        let mut next_key = BASIC_TREE_SIZE;
        b.iter(|| {
            next_key += 1;
            black_box(insert_tree.insert(entry(next_key)).expect("fresh key"));
        });
    });

    group.bench_function("delete_latest", |b| {
        let target = entry(BASIC_TREE_SIZE - 1);
        b.iter(|| {
            black_box(latest_tree.delete(&target.key).expect("present"));
            latest_tree.insert(target.clone()).expect("just deleted");
        });
    });

    group.bench_function("get_hit", |b| {
        let target = entry((BASIC_TREE_SIZE - 1) / 2).key;
        b.iter(|| black_box(get_tree.get(&target)));
    });

    group.bench_function("root_hash", |b| {
        b.iter(|| black_box(root_tree.root_hash()));
    });

    group.finish();
}

fn delete_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("dmtree_delete");
    let tree = build_tree(DELETE_TREE_SIZE);

    for (label, position) in [
        ("first", 0),
        ("middle", DELETE_TREE_SIZE / 2),
        ("last", DELETE_TREE_SIZE - 1),
    ] {
        group.bench_function(BenchmarkId::new("delete", label), |b| {
            let target = entry(position).key;
            b.iter_batched(
                || tree.clone(),
                |mut tree| black_box(tree.delete(&target).expect("present")),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn batch_insert_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_insert");

    for (label, size) in [("small", BATCH_SMALL), ("large", BATCH_LARGE)] {
        group.bench_function(BenchmarkId::new("empty_tree", label), |b| {
            b.iter(|| {
                let mut tree: MerkleTree = MerkleTree::new();
                black_box(tree.insert_batch((0..size).map(entry)).expect("fresh keys"));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, basic_benches, delete_benches, batch_insert_benches);
criterion_main!(benches);
