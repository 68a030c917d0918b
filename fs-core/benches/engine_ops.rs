use byzfs::hook::DirtyPages;
use byzfs::layout::PAGE_SIZE;
use byzfs::{ArenaFs, NoopHook, OpContext, PageDigests, Timestamp, ROOT_INO};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn ctx() -> OpContext {
    OpContext::root(Timestamp::new(1, 0))
}

fn benchmark_file_data(c: &mut Criterion) {
    let mut fs = ArenaFs::format(vec![0u8; 4096 * PAGE_SIZE], 32, NoopHook, &ctx()).unwrap();
    let file = fs.create_file(&ctx()).unwrap();
    fs.link(ROOT_INO, b"bench.dat", file, &ctx()).unwrap();

    c.bench_function("arena_write_4kb_unaligned", |b| {
        let data = vec![0x5au8; PAGE_SIZE];
        b.iter(|| {
            fs.write(file, black_box(100 * PAGE_SIZE as u64 + 17), &data, &ctx())
                .unwrap();
        });
    });

    c.bench_function("arena_read_4kb_aligned", |b| {
        b.iter(|| {
            black_box(fs.read(file, black_box(100 * PAGE_SIZE as u64), PAGE_SIZE as u32).len());
        });
    });

    c.bench_function("arena_read_4kb_spanning", |b| {
        b.iter(|| {
            black_box(fs.read(file, black_box(100 * PAGE_SIZE as u64 + 17), PAGE_SIZE as u32).len());
        });
    });
}

fn benchmark_namespace(c: &mut Criterion) {
    let mut fs = ArenaFs::format(vec![0u8; 1024 * PAGE_SIZE], 32, NoopHook, &ctx()).unwrap();
    let file = fs.create_file(&ctx()).unwrap();
    for i in 0..120 {
        fs.link(ROOT_INO, format!("name-{:04}", i).as_bytes(), file, &ctx())
            .unwrap();
    }

    c.bench_function("dir_lookup_last_of_122", |b| {
        b.iter(|| black_box(fs.lookup(ROOT_INO, black_box(b"name-0119")).unwrap()));
    });

    let sub = fs.create_dir(Some(ROOT_INO), &ctx()).unwrap();
    fs.link(ROOT_INO, b"scratch", sub, &ctx()).unwrap();
    c.bench_function("file_create_unlink", |b| {
        b.iter(|| {
            let child = fs.create_file(&ctx()).unwrap();
            fs.link(sub, b"tmp", child, &ctx()).unwrap();
            fs.unlink(sub, b"tmp", false, &ctx()).unwrap();
        });
    });
}

fn benchmark_digests(c: &mut Criterion) {
    let mut fs =
        ArenaFs::format(vec![0u8; 4096 * PAGE_SIZE], 32, DirtyPages::new(), &ctx()).unwrap();
    let file = fs.create_file(&ctx()).unwrap();
    fs.link(ROOT_INO, b"digest.dat", file, &ctx()).unwrap();
    let mut digests = PageDigests::compute(fs.arena().as_bytes());
    fs.hook_mut().take();

    c.bench_function("digest_full_16mb", |b| {
        b.iter(|| black_box(PageDigests::compute(fs.arena().as_bytes()).combined()));
    });

    c.bench_function("digest_refresh_after_write", |b| {
        b.iter(|| {
            fs.write(file, 0, black_box(b"small update"), &ctx()).unwrap();
            let dirty = fs.hook_mut().take();
            digests.refresh(fs.arena().as_bytes(), &dirty);
            black_box(digests.combined());
        });
    });
}

criterion_group!(benches, benchmark_file_data, benchmark_namespace, benchmark_digests);
criterion_main!(benches);
