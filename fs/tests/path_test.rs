use std::path::PathBuf;

use corefs::dir::name_bytes;
use corefs::error::PathError;
use corefs::CoreFS;
use corefs_api::types::{FType, ROOTDEV, ROOTINO};

#[path = "utils.rs"]
mod utils;

const SIZE: u32 = 1024;
const NINODES: u32 = 64;

fn prep(name: &str) -> PathBuf {
    utils::disk_prep_path(&("images-path-".to_string() + name), "img")
}

// Build `/a/b` with `a` a directory and `b` a file, and return their inums.
fn build_tree(fs: &CoreFS) -> (u32, u32) {
    let root = fs.mkroot().unwrap();

    let a = fs.ialloc(ROOTDEV, FType::Dir);
    a.set_nlink(1);
    fs.iupdate(&a);
    let a_inum = a.inum();
    fs.dirlink(&a, ".", a_inum).unwrap();
    fs.dirlink(&a, "..", ROOTINO).unwrap();

    let b = fs.ialloc(ROOTDEV, FType::File);
    b.set_nlink(1);
    fs.iupdate(&b);
    fs.writei(&b, b"contents of b", 0).unwrap();
    let b_inum = b.inum();

    fs.dirlink(&a, "b", b_inum).unwrap();
    fs.iunlockput(b);
    fs.iunlockput(a);

    fs.ilock(&root, true);
    fs.dirlink(&root, "a", a_inum).unwrap();
    fs.iunlockput(root);

    (a_inum, b_inum)
}

fn fresh(name: &str) -> (CoreFS, u32, u32) {
    let path = prep(name);
    let fs = CoreFS::mkfs(&path, SIZE, NINODES).unwrap();
    let (a, b) = build_tree(&fs);
    (fs, a, b)
}

#[test]
fn resolve_and_collapse_slashes() {
    let (fs, _a, b_inum) = fresh("collapse");

    let i1 = fs.namei("/a/b").unwrap();
    assert_eq!(i1.inum(), b_inum);
    assert_eq!(i1.ftype(), FType::File);

    // repeated and trailing slashes do not change the resolution
    let i2 = fs.namei("///a//b").unwrap();
    assert!(i1.is_alias(&i2));
    let i3 = fs.namei("/a/b/").unwrap();
    assert!(i1.is_alias(&i3));

    fs.iput(i1);
    fs.iput(i2);
    fs.iput(i3);
    utils::disk_destruct(fs.unmount());
}

#[test]
fn parent_resolution() {
    let (fs, a_inum, _b) = fresh("parent");

    let (parent, last) = fs.nameiparent("/a/b").unwrap();
    assert_eq!(parent.inum(), a_inum);
    assert_eq!(last, name_bytes("b"));
    fs.iput(parent);

    let (parent, last) = fs.nameiparent("/a").unwrap();
    assert_eq!(parent.inum(), ROOTINO);
    assert_eq!(last, name_bytes("a"));
    fs.iput(parent);

    // the parent of a missing final element still resolves
    let (parent, last) = fs.nameiparent("/a/nothere").unwrap();
    assert_eq!(parent.inum(), a_inum);
    assert_eq!(last, name_bytes("nothere"));
    fs.iput(parent);

    // the root itself has no parent
    assert!(matches!(fs.nameiparent("/"), Err(PathError::NotFound)));

    utils::disk_destruct(fs.unmount());
}

#[test]
fn root_relative_and_dots() {
    let (fs, a_inum, b_inum) = fresh("dots");

    let r = fs.namei("/").unwrap();
    assert_eq!(r.inum(), ROOTINO);
    fs.iput(r);

    // relative paths start at the working directory (the root here)
    let i = fs.namei("a").unwrap();
    assert_eq!(i.inum(), a_inum);
    fs.iput(i);
    let i = fs.namei("a/b").unwrap();
    assert_eq!(i.inum(), b_inum);
    fs.iput(i);

    // the dot entries resolve through the directory encoding itself
    let i = fs.namei("/a/.").unwrap();
    assert_eq!(i.inum(), a_inum);
    fs.iput(i);
    let i = fs.namei("/a/../a/b").unwrap();
    assert_eq!(i.inum(), b_inum);
    fs.iput(i);

    utils::disk_destruct(fs.unmount());
}

#[test]
fn resolution_failures() {
    let (fs, _a, _b) = fresh("fail");

    assert!(matches!(fs.namei("/zz"), Err(PathError::NotFound)));
    assert!(matches!(fs.namei("/a/zz"), Err(PathError::NotFound)));
    // a file in the middle of a path is a type error
    assert!(matches!(fs.namei("/a/b/c"), Err(PathError::NotDir)));

    utils::disk_destruct(fs.unmount());
}

#[test]
fn repeat_lookups_share_the_slot() {
    let (fs, _a, _b) = fresh("ncache");

    // the second walk is served by the name cache; both land on one slot
    let i1 = fs.namei("/a/b").unwrap();
    let i2 = fs.namei("/a/b").unwrap();
    assert!(i1.is_alias(&i2));
    assert!(i1.ref_count() >= 2);
    fs.iput(i1);
    fs.iput(i2);

    utils::disk_destruct(fs.unmount());
}

#[test]
fn cwd_can_move() {
    let (fs, a_inum, b_inum) = fresh("cwd");

    let a = fs.namei("/a").unwrap();
    assert_eq!(a.inum(), a_inum);
    fs.set_cwd(a);

    let i = fs.namei("b").unwrap();
    assert_eq!(i.inum(), b_inum);
    fs.iput(i);
    let i = fs.namei("..").unwrap();
    assert_eq!(i.inum(), ROOTINO);
    fs.iput(i);

    utils::disk_destruct(fs.unmount());
}
