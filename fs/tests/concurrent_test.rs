use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use corefs::CoreFS;
use corefs_api::types::{FType, BSIZE, ROOTDEV};

#[path = "utils.rs"]
mod utils;

const SIZE: u32 = 2048;
const NINODES: u32 = 200;

fn prep(name: &str) -> PathBuf {
    utils::disk_prep_path(&("images-concurrent-".to_string() + name), "img")
}

fn fresh(name: &str) -> Arc<CoreFS> {
    let path = prep(name);
    Arc::new(CoreFS::mkfs(&path, SIZE, NINODES).unwrap())
}

fn teardown(fs: Arc<CoreFS>) {
    let fs = Arc::try_unwrap(fs).ok().expect("outstanding references");
    utils::disk_destruct(fs.unmount());
}

#[test]
fn concurrent_gets_share_one_slot() {
    let fs = fresh("sameslot");
    let barrier = Arc::new(Barrier::new(4));
    let (tx, rx) = mpsc::channel();

    let mut threads = Vec::new();
    for _ in 0..4 {
        let fs = fs.clone();
        let barrier = barrier.clone();
        let tx = tx.clone();
        threads.push(thread::spawn(move || {
            barrier.wait();
            tx.send(fs.iget(ROOTDEV, 9)).unwrap();
        }));
    }
    drop(tx);

    let handles: Vec<_> = rx.iter().collect();
    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(handles.len(), 4);
    for pair in handles.windows(2) {
        assert!(pair[0].is_alias(&pair[1]));
    }
    assert!(handles[0].ref_count() >= 4);
    for ip in handles {
        fs.iput(ip);
    }
    teardown(fs);
}

#[test]
fn writer_waits_for_reader() {
    let fs = fresh("rwlock");
    let ip = fs.ialloc(ROOTDEV, FType::File);
    ip.set_nlink(1);
    fs.iupdate(&ip);
    fs.iunlock(&ip);

    fs.ilock(&ip, false);
    let acquired = Arc::new(AtomicBool::new(false));
    let writer = {
        let fs = fs.clone();
        let ip = fs.idup(&ip);
        let acquired = acquired.clone();
        thread::spawn(move || {
            fs.ilock(&ip, true);
            acquired.store(true, Ordering::SeqCst);
            fs.iunlock(&ip);
            fs.iput(ip);
        })
    };

    // the writer must sit until the reader lets go
    thread::sleep(Duration::from_millis(150));
    assert!(!acquired.load(Ordering::SeqCst));
    fs.iunlock(&ip);
    writer.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));

    fs.iput(ip);
    teardown(fs);
}

#[test]
fn readers_share_the_lock() {
    let fs = fresh("sharedread");
    let ip = fs.ialloc(ROOTDEV, FType::File);
    ip.set_nlink(1);
    fs.iupdate(&ip);
    fs.iunlock(&ip);

    fs.ilock(&ip, false);
    let (tx, rx) = mpsc::channel();
    let second = {
        let fs = fs.clone();
        let ip = fs.idup(&ip);
        thread::spawn(move || {
            fs.ilock(&ip, false);
            tx.send(()).unwrap();
            fs.iunlock(&ip);
            fs.iput(ip);
        })
    };

    // a second reader gets in while the first still holds the lock
    rx.recv_timeout(Duration::from_secs(5))
        .expect("second reader should not block");
    second.join().unwrap();

    fs.iunlock(&ip);
    fs.iput(ip);
    teardown(fs);
}

#[test]
fn reader_waits_for_writer() {
    let fs = fresh("writerexcl");
    let ip = fs.ialloc(ROOTDEV, FType::File);
    ip.set_nlink(1);
    fs.iupdate(&ip);
    // keep holding the write lock from ialloc

    let acquired = Arc::new(AtomicBool::new(false));
    let reader = {
        let fs = fs.clone();
        let ip = fs.idup(&ip);
        let acquired = acquired.clone();
        thread::spawn(move || {
            fs.ilock(&ip, false);
            acquired.store(true, Ordering::SeqCst);
            fs.iunlock(&ip);
            fs.iput(ip);
        })
    };

    thread::sleep(Duration::from_millis(150));
    assert!(!acquired.load(Ordering::SeqCst));
    fs.iunlock(&ip);
    reader.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));

    fs.iput(ip);
    teardown(fs);
}

#[test]
fn distinct_files_get_distinct_blocks() {
    let fs = fresh("distinct");
    let (tx, rx) = mpsc::channel();

    let mut threads = Vec::new();
    for n in 0..4u8 {
        let fs = fs.clone();
        let tx = tx.clone();
        threads.push(thread::spawn(move || {
            let ip = fs.ialloc(ROOTDEV, FType::File);
            ip.set_nlink(1);
            fs.iupdate(&ip);

            let data = vec![n; BSIZE as usize * 3];
            assert_eq!(fs.writei(&ip, &data, 0).unwrap(), data.len());
            let mut back = vec![0u8; data.len()];
            assert_eq!(fs.readi(&ip, &mut back, 0).unwrap(), data.len());
            assert_eq!(back, data);

            let blocks: Vec<u32> = ip.addrs().iter().copied().filter(|&a| a != 0).collect();
            fs.iunlock(&ip);
            tx.send((ip, blocks)).unwrap();
        }));
    }
    drop(tx);

    let results: Vec<_> = rx.iter().collect();
    for t in threads {
        t.join().unwrap();
    }

    // the allocator never handed the same block to two files
    let mut all: Vec<u32> = results.iter().flat_map(|(_, b)| b.clone()).collect();
    let total = all.len();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), total);

    for (ip, _) in results {
        fs.iput(ip);
    }
    teardown(fs);
}

#[test]
fn lookups_race_evictions_safely() {
    let fs = fresh("churn");
    let mut threads = Vec::new();

    // four threads hammer more inums than the cache has slots, so lookups,
    // evictions and reclamation constantly interleave
    for t in 0..4u32 {
        let fs = fs.clone();
        threads.push(thread::spawn(move || {
            for round in 0..200u32 {
                let inum = 1 + (t * 37 + round) % 80;
                let ip = fs.iget(ROOTDEV, inum);
                assert_eq!(ip.inum(), inum);
                fs.ilock(&ip, false);
                let st = fs.stati(&ip);
                assert_eq!(st.ino, inum);
                fs.iunlockput(ip);
            }
        }));
    }
    for t in threads {
        t.join().unwrap();
    }

    // the cache is still coherent afterwards
    let ip = fs.iget(ROOTDEV, 1);
    assert!(fs.is_cached(1));
    fs.iput(ip);
    fs.synchronize();
    teardown(fs);
}

#[test]
fn eviction_respects_pinned_slots() {
    let fs = fresh("pinned");

    // pin one inode, then cycle many others through the cache
    let pinned = fs.iget(ROOTDEV, 3);
    for inum in 10..100u32 {
        let ip = fs.iget(ROOTDEV, inum);
        fs.iput(ip);
    }
    // the pinned slot was never evicted
    assert!(fs.is_cached(3));
    let again = fs.iget(ROOTDEV, 3);
    assert!(again.is_alias(&pinned));
    fs.iput(again);
    fs.iput(pinned);
    teardown(fs);
}
