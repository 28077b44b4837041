#![allow(dead_code)]

// Shared disk-image harness for the integration tests. Every test prepares
// its own uniquely named directory, so the suite can run in parallel.

use corefs_api::controller::Device;
use std::fs::{create_dir_all, remove_dir, remove_file};
use std::path::{Path, PathBuf};

// Create the directory `name` under the crate root and return the path of
// an image file inside it, removing a stale image from a previous run.
pub fn disk_prep_path(name: &str, img_name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push(name);
    path.push(img_name);

    if path.exists() {
        remove_file(&path).unwrap();
    }
    create_dir_all(path.parent().unwrap()).unwrap();
    path
}

// Remove the image file and its parent directory.
pub fn disk_unprep_path(path: &Path) {
    remove_file(path).unwrap();
    remove_dir(path.parent().unwrap()).unwrap();
}

// Tear a device down together with its backing image and directory.
pub fn disk_destruct(dev: Device) {
    let path = dev.device_path().to_owned();
    drop(dev);
    disk_unprep_path(&path);
}
