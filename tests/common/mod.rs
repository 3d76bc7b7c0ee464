#![allow(dead_code)]

use std::io::{Cursor, Write};

use camino::Utf8Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use bench_dataset_prep::fs_util::Filesystem;

/// Builds a zip in memory. Names ending in `/` become directory entries.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, content) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

pub fn write_zip(fs: &dyn Filesystem, path: &str, entries: &[(&str, &[u8])]) {
    let path = Utf8Path::new(path);
    if let Some(parent) = path.parent() {
        fs.create_dir_all(parent).unwrap();
    }
    fs.write(path, &zip_bytes(entries)).unwrap();
}

pub fn write_file(fs: &dyn Filesystem, path: &str, content: &[u8]) {
    let path = Utf8Path::new(path);
    if let Some(parent) = path.parent() {
        fs.create_dir_all(parent).unwrap();
    }
    fs.write(path, content).unwrap();
}

pub fn names(fs: &dyn Filesystem, dir: &str) -> Vec<String> {
    fs.read_dir(Utf8Path::new(dir))
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect()
}
