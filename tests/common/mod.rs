//! Synthetic disc image construction for the integration tests.

use std::fs::OpenOptions;
use std::path::Path;

use gcdisc::binio;
use gcdisc::image::layout::{self, Entry};

/// One entry of a test image, in table order.
pub enum Item {
    Dir {
        name: String,
        parent: u32,
        next: u32,
    },
    File {
        name: String,
        start: u64,
        data: Vec<u8>,
    },
}

pub fn dir(name: &str, parent: u32, next: u32) -> Item {
    Item::Dir {
        name: name.to_string(),
        parent,
        next,
    }
}

pub fn file(name: &str, start: u64, data: &[u8]) -> Item {
    Item::File {
        name: name.to_string(),
        start,
        data: data.to_vec(),
    }
}

/// Writes a minimal valid image: header fields, entry table, string table
/// and file data. Names must be ASCII.
pub fn build_image(path: &Path, fs_start: u64, items: &[Item]) {
    let mut f = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .unwrap();

    binio::write_bytes(&mut f, layout::OFF_GAME_CODE, b"GTST").unwrap();
    binio::write_u8(&mut f, layout::OFF_VERSION, 1).unwrap();
    binio::write_u32(&mut f, layout::OFF_MAGIC, layout::DVD_MAGIC).unwrap();
    binio::write_bytes(&mut f, layout::OFF_GAME_NAME, b"Test Game\0").unwrap();
    binio::write_bytes(&mut f, layout::APPLOADER_START, b"APPLDR01\0\0").unwrap();
    binio::write_u32(&mut f, layout::OFF_APPLOADER_SIZE, 0x20).unwrap();
    binio::write_u32(&mut f, layout::OFF_DOL_START, fs_start as u32).unwrap();
    binio::write_u32(&mut f, layout::OFF_FS_START, fs_start as u32).unwrap();

    let mut str_bytes = Vec::new();
    let mut entries = Vec::new();
    for item in items {
        let name_offset = str_bytes.len() as u32;
        match item {
            Item::Dir { name, parent, next } => {
                str_bytes.extend_from_slice(name.as_bytes());
                str_bytes.push(0);
                entries.push(Entry {
                    is_dir: true,
                    name_offset,
                    start: *parent,
                    size: *next,
                });
            }
            Item::File { name, start, data } => {
                str_bytes.extend_from_slice(name.as_bytes());
                str_bytes.push(0);
                entries.push(Entry {
                    is_dir: false,
                    name_offset,
                    start: *start as u32,
                    size: data.len() as u32,
                });
            }
        }
    }
    let n = entries.len() as u32 + 1;
    let fst_size = n as u64 * layout::ENTRY_SIZE + str_bytes.len() as u64;
    binio::write_u32(&mut f, layout::OFF_FST_SIZE, fst_size as u32).unwrap();

    let root = Entry {
        is_dir: true,
        name_offset: 0,
        start: 0,
        size: n,
    };
    binio::write_bytes(&mut f, fs_start, &root.encode()).unwrap();
    for (i, e) in entries.iter().enumerate() {
        binio::write_bytes(
            &mut f,
            fs_start + (i as u64 + 1) * layout::ENTRY_SIZE,
            &e.encode(),
        )
        .unwrap();
    }
    binio::write_bytes(&mut f, fs_start + n as u64 * layout::ENTRY_SIZE, &str_bytes).unwrap();

    for item in items {
        if let Item::File { start, data, .. } = item {
            binio::write_bytes(&mut f, *start, data).unwrap();
        }
    }
}
