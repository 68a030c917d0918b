use byzfs::hook::DirtyPages;
use byzfs::layout::PAGE_SIZE;
use byzfs::service::SetAttr;
use byzfs::{
    ArenaFs, EngineConfig, FileService, FsError, Handle, InodeNo, NoopHook, OpContext,
    PageDigests, Timestamp, ROOT_INO,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};

fn init_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}

fn ctx(sec: u32) -> OpContext {
    OpContext::new(Timestamp::new(sec, 0), 500, 500)
}

fn format(pages: usize) -> ArenaFs<DirtyPages> {
    ArenaFs::format(vec![0u8; pages * PAGE_SIZE], 32, DirtyPages::new(), &ctx(1)).unwrap()
}

fn assert_conserved<H: byzfs::MutationHook>(fs: &ArenaFs<H>) {
    let report = fs.check();
    assert!(report.is_clean(), "{:#?}", report.problems);
    assert_eq!(report.free_listed_inodes + report.live_inodes, report.total_inodes);
    assert_eq!(report.free_listed_blocks + report.live_blocks, report.total_blocks);
}

#[test]
fn test_hello_scenario() {
    init_logging();
    let mut fs = format(256);
    assert_eq!(fs.attr(ROOT_INO).size, 2);

    let k = fs.create_file(&ctx(2)).unwrap();
    assert_ne!(k, ROOT_INO);
    fs.link(ROOT_INO, b"a.txt", k, &ctx(3)).unwrap();
    assert_eq!(fs.attr(ROOT_INO).size, 3);

    fs.write(k, 0, b"hello", &ctx(4)).unwrap();
    assert_eq!(&*fs.read(k, 0, 5), b"hello");
    let handle = fs.ref_to_handle(k);

    fs.unlink(ROOT_INO, b"a.txt", false, &ctx(5)).unwrap();
    assert_eq!(fs.attr(ROOT_INO).size, 2);
    assert!(matches!(fs.handle_to_ref(&handle), Err(FsError::Stale)));
    assert_conserved(&fs);
}

#[test]
fn test_random_alloc_free_conserves() {
    init_logging();
    let mut fs = format(128);
    let mut rng = StdRng::seed_from_u64(7);
    let mut inodes: Vec<InodeNo> = Vec::new();
    let mut blocks = Vec::new();
    let total_inodes = fs.geometry().num_inodes;
    let total_blocks = fs.geometry().num_blocks;

    for _ in 0..2_000 {
        match rng.gen_range(0..4) {
            0 => {
                if let Ok(ino) = fs.create_file(&ctx(2)) {
                    inodes.push(ino);
                }
            }
            1 if !inodes.is_empty() => {
                let ino = inodes.swap_remove(rng.gen_range(0..inodes.len()));
                fs.free_inode(ino);
            }
            2 => {
                if let Ok(block) = fs.alloc_block() {
                    blocks.push(block);
                }
            }
            _ if !blocks.is_empty() => {
                let block = blocks.swap_remove(rng.gen_range(0..blocks.len()));
                fs.free_block(block);
            }
            _ => {}
        }
        // Root is the one inode outside the test's bookkeeping
        assert_eq!(fs.free_inode_count() + inodes.len() as u32 + 1, total_inodes);
        assert_eq!(fs.free_block_count() + blocks.len() as u32, total_blocks);
    }
}

#[test]
fn test_stale_after_reuse() {
    let mut fs = format(64);
    let mut handles = Vec::new();
    for round in 0..5u32 {
        let ino = fs.create_file(&ctx(round)).unwrap();
        fs.link(ROOT_INO, b"victim", ino, &ctx(round)).unwrap();
        handles.push(fs.ref_to_handle(ino));
        fs.unlink(ROOT_INO, b"victim", false, &ctx(round)).unwrap();
    }
    // The same inode number was reused every round with a new generation
    assert!(handles.windows(2).all(|w| w[0].ino == w[1].ino));
    assert!(handles.windows(2).all(|w| w[0].generation < w[1].generation));

    let live = fs.create_file(&ctx(9)).unwrap();
    for handle in &handles {
        assert!(matches!(fs.handle_to_ref(handle), Err(FsError::Stale)));
    }
    assert_eq!(fs.handle_to_ref(&fs.ref_to_handle(live)).unwrap(), live);
}

#[test]
fn test_random_unlinks_keep_directory_compact() {
    init_logging();
    let mut fs = format(256);
    let mut rng = StdRng::seed_from_u64(11);
    let file = fs.create_file(&ctx(1)).unwrap();
    let mut expected: BTreeSet<Vec<u8>> = [b".".to_vec(), b"..".to_vec()].into_iter().collect();

    for i in 0..132 {
        let name = format!("entry-{:03}", i).into_bytes();
        fs.link(ROOT_INO, &name, file, &ctx(2)).unwrap();
        expected.insert(name);
    }

    while expected.len() > 2 {
        let victims: Vec<_> = expected
            .iter()
            .filter(|n| n.as_slice() != b"." && n.as_slice() != b"..")
            .cloned()
            .collect();
        let victim = &victims[rng.gen_range(0..victims.len())];
        fs.unlink(ROOT_INO, victim, false, &ctx(3)).unwrap();
        expected.remove(victim);

        let size = fs.attr(ROOT_INO).size as usize;
        assert_eq!(size, expected.len());
        let listed: BTreeSet<Vec<u8>> = (0..size)
            .map(|i| fs.entry_at(ROOT_INO, i).expect("index below size").name)
            .collect();
        assert_eq!(listed, expected);
        assert!(fs.entry_at(ROOT_INO, size).is_none());
    }
    assert_conserved(&fs);
}

#[test]
fn test_random_writes_round_trip() {
    init_logging();
    let mut fs = format(512);
    let mut rng = StdRng::seed_from_u64(23);
    let file = fs.create_file(&ctx(1)).unwrap();
    fs.link(ROOT_INO, b"data", file, &ctx(1)).unwrap();
    let mut model: Vec<u8> = Vec::new();

    for step in 0..300 {
        let offset = rng.gen_range(0..40 * PAGE_SIZE);
        let len = rng.gen_range(1..=PAGE_SIZE);
        let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        fs.write(file, offset as u64, &data, &ctx(step)).unwrap();

        if model.len() < offset + len {
            model.resize(offset + len, 0);
        }
        model[offset..offset + len].copy_from_slice(&data);
        assert_eq!(&*fs.read(file, offset as u64, len as u32), &data[..]);

        if step % 10 == 0 {
            let probe = rng.gen_range(0..model.len());
            let count = rng.gen_range(1..=PAGE_SIZE);
            let end = (probe + count).min(model.len());
            assert_eq!(&*fs.read(file, probe as u64, count as u32), &model[probe..end]);
        }
    }
    assert_eq!(fs.attr(file).size as usize, model.len());
    assert_conserved(&fs);
}

#[test]
fn test_growth_reads_zero() {
    let mut fs = format(128);
    let file = fs.create_file(&ctx(1)).unwrap();
    fs.link(ROOT_INO, b"sparse", file, &ctx(1)).unwrap();

    fs.write(file, 0, &[0xffu8; 50], &ctx(2)).unwrap();
    fs.write(file, 5 * PAGE_SIZE as u64 + 10, b"tail", &ctx(3)).unwrap();
    fs.append_zeros(file, 8 * PAGE_SIZE as u64, &ctx(4)).unwrap();

    let size = fs.attr(file).size;
    let mut offset = 0u64;
    while offset < size {
        let chunk = fs.read(file, offset, PAGE_SIZE as u32).into_owned();
        for (i, byte) in chunk.iter().enumerate() {
            let pos = offset as usize + i;
            let written = pos < 50 || (5 * PAGE_SIZE + 10..5 * PAGE_SIZE + 14).contains(&pos);
            if !written {
                assert_eq!(*byte, 0, "byte {} should read as zero", pos);
            }
        }
        offset += chunk.len() as u64;
    }
}

#[test]
fn test_truncate_to_zero_returns_every_block() {
    let mut fs = format(512);
    let baseline = fs.free_block_count();
    let file = fs.create_file(&ctx(1)).unwrap();
    fs.link(ROOT_INO, b"big", file, &ctx(1)).unwrap();

    for bnum in (0..200).step_by(3) {
        fs.write(file, (bnum * PAGE_SIZE) as u64, &[1u8; 64], &ctx(2)).unwrap();
    }
    assert!(fs.free_block_count() < baseline);
    let owned = fs.owned_blocks(file).len() as u32;
    assert_eq!(fs.free_block_count() + owned, baseline);

    fs.truncate(file, 0, &ctx(3)).unwrap();
    assert_eq!(fs.free_block_count(), baseline);
    assert!(fs.owned_blocks(file).is_empty());
    assert_conserved(&fs);
}

#[test]
fn test_every_write_is_declared() {
    init_logging();
    let fs = format(256);
    let mut digests = PageDigests::compute(fs.arena().as_bytes());
    let mut svc = FileService::new(fs, &EngineConfig::default());
    svc.fs_mut().hook_mut().take();
    let root = svc.root_handle();
    let mut rng = StdRng::seed_from_u64(99);
    // Regular files named directly in the root
    let mut files = BTreeMap::new();

    for step in 0..600u32 {
        let c = ctx(10 + step);
        let picked = if files.is_empty() {
            None
        } else {
            files
                .iter()
                .nth(rng.gen_range(0..files.len()))
                .map(|(name, handle): (&String, &Handle)| (name.clone(), *handle))
        };
        match (rng.gen_range(0..11), picked) {
            (0, _) => {
                let name = format!("f{}", rng.gen_range(0..40));
                if let Ok(reply) = svc.create(&root, name.as_bytes(), &SetAttr::default(), &c) {
                    files.insert(name, reply.handle);
                }
            }
            (1, _) => {
                let name = format!("d{}", rng.gen_range(0..10));
                let _ = svc.mkdir(&root, name.as_bytes(), &SetAttr::default(), &c);
            }
            (2 | 3, Some((_, handle))) => {
                let offset = rng.gen_range(0..150 * PAGE_SIZE) as u64;
                let len = rng.gen_range(1..=PAGE_SIZE);
                let _ = svc.write(&handle, offset, &vec![step as u8; len], &c);
            }
            (4, Some((name, _))) => {
                svc.remove(&root, name.as_bytes(), &c).unwrap();
                files.remove(&name);
            }
            (5, Some((name, handle))) => {
                let to = format!("f{}", rng.gen_range(0..40));
                if svc.rename(&root, name.as_bytes(), &root, to.as_bytes(), &c).is_ok() {
                    files.remove(&name);
                    files.insert(to, handle);
                }
            }
            (6, _) => {
                // Directory renames, within the root or into another directory
                let from = format!("d{}", rng.gen_range(0..10));
                let to = format!("d{}", rng.gen_range(0..10));
                if rng.gen_bool(0.5) {
                    let _ = svc.rename(&root, from.as_bytes(), &root, to.as_bytes(), &c);
                } else if let Ok(target) = svc.lookup(&root, to.as_bytes(), &c) {
                    let _ = svc.rename(&root, from.as_bytes(), &target.handle, b"moved", &c);
                }
            }
            (7, Some((_, handle))) => {
                let name = format!("h{}", rng.gen_range(0..20));
                let _ = svc.link(&handle, &root, name.as_bytes(), &c);
            }
            (8, _) => {
                let name = format!("s{}", rng.gen_range(0..10));
                let _ = svc.symlink(&root, name.as_bytes(), b"f1", &SetAttr::default(), &c);
            }
            (9, Some((_, handle))) => {
                let resize = SetAttr {
                    size: Some(rng.gen_range(0..150 * PAGE_SIZE) as u64),
                    ..SetAttr::default()
                };
                let _ = svc.setattr(&handle, &resize, &c);
            }
            (10, _) => {
                let name = format!("d{}", rng.gen_range(0..10));
                let _ = svc.rmdir(&root, name.as_bytes(), &c);
            }
            _ => {}
        }

        let dirty = svc.fs_mut().hook_mut().take();
        digests.refresh(svc.fs().arena().as_bytes(), &dirty);
        assert_eq!(
            digests,
            PageDigests::compute(svc.fs().arena().as_bytes()),
            "undeclared write at step {}",
            step
        );
    }
    assert_conserved(svc.fs());
}

#[test]
fn test_noop_hook_engine_matches_recording_engine() {
    let mut plain = ArenaFs::format(vec![0u8; 64 * PAGE_SIZE], 32, NoopHook, &ctx(1)).unwrap();
    let mut recorded = format(64);
    for fs_ctx in [ctx(2), ctx(3)] {
        let a = plain.create_file(&fs_ctx).unwrap();
        let b = recorded.create_file(&fs_ctx).unwrap();
        plain.write(a, 3, b"same bytes", &fs_ctx).unwrap();
        recorded.write(b, 3, b"same bytes", &fs_ctx).unwrap();
    }
    assert_eq!(plain.arena().as_bytes(), recorded.arena().as_bytes());
}
