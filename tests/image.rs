//! End-to-end tests against synthetic disc images.

mod common;

use std::fs;
use std::path::PathBuf;

use tempfile::tempdir;

use common::{build_image, dir, file};
use gcdisc::image::layout;
use gcdisc::{
    CompressOutcome, Cancelled, CopyController, ExtractItem, ExtractOutcome, FileRef, FsError,
    GcFs, WriteOutcome,
};

const FS_START: u64 = 0x3000;

fn ctl() -> CopyController {
    CopyController::new()
}

#[test]
fn test_load_tree_and_info() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    build_image(
        &img,
        FS_START,
        &[
            file("game.dol", 0x3100, b"dolldata"),
            dir("sound", 0, 4),
            file("bgm.adp", 0x3200, b"music"),
        ],
    );
    let fs = GcFs::open(&img).unwrap();
    assert_eq!(fs.entries().len(), 3);
    assert_eq!(fs.entry_names(), &["game.dol", "sound", "bgm.adp"]);
    let root = fs.tree().root();
    assert!(fs.tree().contains_name(root, "game.dol"));
    let sound = fs.tree().dir_by_path(&["sound"]).unwrap();
    assert!(fs.tree().contains_name(sound, "bgm.adp"));
    assert!(!fs.changed());

    let info = fs.info().unwrap();
    assert_eq!(info.code, "GTST");
    assert_eq!(info.version, 1);
    assert_eq!(info.name, "Test Game");
    assert_eq!(info.apploader_version, "APPLDR01");
}

#[test]
fn test_bad_magic_rejected() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    build_image(&img, FS_START, &[file("a.bin", 0x3100, b"x")]);
    let mut data = fs::read(&img).unwrap();
    data[layout::OFF_MAGIC as usize] ^= 0xff;
    fs::write(&img, &data).unwrap();
    assert!(matches!(GcFs::open(&img), Err(FsError::InvalidDisk(_))));
}

#[test]
fn test_zero_entries_rejected() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    build_image(&img, FS_START, &[file("a.bin", 0x3100, b"x")]);
    let mut data = fs::read(&img).unwrap();
    // The entry count is the root entry's size field.
    data[(FS_START + 0x8) as usize..(FS_START + 0xc) as usize].fill(0);
    fs::write(&img, &data).unwrap();
    assert!(matches!(GcFs::open(&img), Err(FsError::InvalidDisk(_))));
}

#[test]
fn test_dir_with_subtree_end_before_itself_rejected() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    // A directory claiming its subtree ends at table index 0, before the
    // directory itself, must be rejected at load time.
    build_image(
        &img,
        FS_START,
        &[dir("evil", 0, 0), file("a.bin", 0x3100, b"x")],
    );
    assert!(matches!(GcFs::open(&img), Err(FsError::InvalidDisk(_))));
}

#[test]
fn test_read_file_clamps_and_checks() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    build_image(
        &img,
        FS_START,
        &[file("a.bin", 0x3100, b"0123456789"), dir("d", 0, 3)],
    );
    let fs = GcFs::open(&img).unwrap();
    assert_eq!(fs.read_file(0, 0, None).unwrap(), b"0123456789");
    assert_eq!(fs.read_file(0, 4, Some(3)).unwrap(), b"456");
    assert_eq!(fs.read_file(0, 8, Some(100)).unwrap(), b"89");
    assert!(matches!(
        fs.read_file(1, 0, None),
        Err(FsError::EntryIsDirectory(1))
    ));
    assert!(matches!(
        fs.read_file(9, 0, None),
        Err(FsError::NoSuchEntry(9))
    ));
}

#[test]
fn test_extract_file_and_root() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    build_image(
        &img,
        FS_START,
        &[
            file("a.bin", 0x3100, b"alpha"),
            dir("sub", 0, 4),
            file("b.bin", 0x3200, b"beta"),
        ],
    );
    let fs = GcFs::open(&img).unwrap();

    let dest = tmp.path().join("a.out");
    let out = fs
        .extract(&[(ExtractItem::Index(0), dest.clone())], false, &ctl(), None)
        .unwrap();
    assert_eq!(out, ExtractOutcome::Done { failed: vec![] });
    assert_eq!(fs::read(&dest).unwrap(), b"alpha");

    let dest = tmp.path().join("rootdir");
    let out = fs
        .extract(&[(ExtractItem::Root, dest.clone())], false, &ctl(), None)
        .unwrap();
    assert_eq!(out, ExtractOutcome::Done { failed: vec![] });
    assert_eq!(fs::read(dest.join("a.bin")).unwrap(), b"alpha");
    assert_eq!(fs::read(dest.join("sub").join("b.bin")).unwrap(), b"beta");
}

#[test]
fn test_extract_extra_files_appldr_region() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    build_image(&img, FS_START, &[file("a.bin", 0x3100, b"x")]);
    let fs = GcFs::open(&img).unwrap();

    let regions = fs.extra_files().unwrap();
    // The apploader size field was written as 0x20 by the builder.
    assert!(regions.contains(&("appldr.bin".to_string(), layout::APPLOADER_START, 0x20)));

    let dest = tmp.path().join("appldr.bin");
    let out = fs
        .extract_extra_files(
            &[("appldr.bin".to_string(), dest.clone())],
            false,
            &ctl(),
            None,
        )
        .unwrap();
    assert_eq!(out, ExtractOutcome::Done { failed: vec![] });
    let got = fs::read(&dest).unwrap();
    assert_eq!(got.len(), 0x20);
    assert_eq!(&got[..8], b"APPLDR01");
}

#[test]
fn test_write_after_delete_shrinks_table_and_image() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    build_image(
        &img,
        FS_START,
        &[file("A.TXT", 0x3100, b"0123456789"), dir("SUB", 0, 3)],
    );
    let mut fs = GcFs::open(&img).unwrap();
    let root = fs.tree().root();
    fs.tree_mut().remove_file(root, "A.TXT").unwrap();
    assert!(fs.changed());

    let out = fs.write(None, &ctl(), None).unwrap();
    assert_eq!(out, WriteOutcome::Written);
    assert!(!fs.changed());
    assert_eq!(fs.entries().len(), 1);
    assert!(fs.entries()[0].is_dir);
    assert_eq!(fs.entry_names(), &["SUB"]);

    // Table: root + SUB entries plus "SUB\0"; nothing else remains, so the
    // image is truncated to just past the table.
    let fst_size = 2 * layout::ENTRY_SIZE + 4;
    assert_eq!(fs::metadata(&img).unwrap().len(), FS_START + fst_size);

    // A fresh load agrees.
    let fresh = GcFs::open(&img).unwrap();
    assert!(fresh.tree().same_shape(fs.tree()));
}

#[test]
fn test_write_import_too_small_gap_goes_to_end_of_data() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    // After adding "new.bin", the table becomes 3 entries (36 bytes) plus
    // "a.bin\0new.bin\0" (14 bytes): data starts at 0x3032, first aligned
    // offset 0x3034. Placing a.bin at 0x4034 leaves a gap of exactly 4096.
    build_image(&img, FS_START, &[file("a.bin", 0x4034, &[7u8; 64])]);
    let mut fs = GcFs::open(&img).unwrap();

    let src = tmp.path().join("new.bin");
    fs::write(&src, vec![9u8; 5000]).unwrap();
    let root = fs.tree().root();
    fs.tree_mut()
        .add_file(root, "new.bin".into(), FileRef::Imported(src));

    assert_eq!(fs.write(None, &ctl(), None).unwrap(), WriteOutcome::Written);
    let idx = fs.entry_names().iter().position(|n| n == "new.bin").unwrap();
    // 5000 > 4096: placed after the last old file, not in the gap.
    assert_eq!(fs.entries()[idx].start as u64, 0x4074);
    assert_eq!(fs.read_file(idx, 0, None).unwrap(), vec![9u8; 5000]);
    // The old file is untouched.
    let a = fs.entry_names().iter().position(|n| n == "a.bin").unwrap();
    assert_eq!(fs.entries()[a].start as u64, 0x4034);
    assert_eq!(fs.read_file(a, 0, None).unwrap(), vec![7u8; 64]);
}

#[test]
fn test_write_import_fitting_gap_is_packed() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    build_image(&img, FS_START, &[file("a.bin", 0x4034, &[7u8; 64])]);
    let mut fs = GcFs::open(&img).unwrap();

    let src = tmp.path().join("new.bin");
    fs::write(&src, vec![9u8; 4096]).unwrap();
    let root = fs.tree().root();
    fs.tree_mut()
        .add_file(root, "new.bin".into(), FileRef::Imported(src));

    assert_eq!(fs.write(None, &ctl(), None).unwrap(), WriteOutcome::Written);
    let idx = fs.entry_names().iter().position(|n| n == "new.bin").unwrap();
    assert_eq!(fs.entries()[idx].start as u64, 0x3034);
    assert_eq!(fs.read_file(idx, 0, None).unwrap(), vec![9u8; 4096]);
}

#[test]
fn test_write_evacuates_files_under_grown_table() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    // a.bin sits right after the original 30-byte table; adding an entry
    // grows the table over it, forcing evacuation through a temp file.
    build_image(&img, FS_START, &[file("a.bin", 0x3020, b"evacuate me!....")]);
    let mut fs = GcFs::open(&img).unwrap();

    let src = tmp.path().join("bbbbbbbb.bin");
    fs::write(&src, vec![3u8; 32]).unwrap();
    let root = fs.tree().root();
    fs.tree_mut()
        .add_file(root, "bbbbbbbb.bin".into(), FileRef::Imported(src));

    assert_eq!(fs.write(None, &ctl(), None).unwrap(), WriteOutcome::Written);
    let a = fs.entry_names().iter().position(|n| n == "a.bin").unwrap();
    let data_start = FS_START + 3 * layout::ENTRY_SIZE + ("a.bin\0bbbbbbbb.bin\0".len() as u64);
    assert!(fs.entries()[a].start as u64 >= data_start);
    assert_eq!(fs.read_file(a, 0, None).unwrap(), b"evacuate me!....");
    let b = fs
        .entry_names()
        .iter()
        .position(|n| n == "bbbbbbbb.bin")
        .unwrap();
    assert_eq!(fs.read_file(b, 0, None).unwrap(), vec![3u8; 32]);
}

#[test]
fn test_failed_staging_dir_restores_speculative_expansion() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    build_image(
        &img,
        FS_START,
        &[
            file("a.bin", 0x3030, b"evacuate"),
            file("c.bin", 0x3040, b"relocate"),
        ],
    );
    let mut fs = GcFs::open(&img).unwrap();
    let before = fs::read(&img).unwrap();

    // Importing this name grows the table over a.bin, so a staging
    // directory is needed.
    let src = tmp.path().join("dddddddddddd.bin");
    fs::write(&src, vec![5u8; 16]).unwrap();
    let root = fs.tree().root();
    fs.tree_mut()
        .add_file(root, "dddddddddddd.bin".into(), FileRef::Imported(src));
    // Plan an in-image move past the current end of file, so the image is
    // speculatively expanded before staging starts.
    for f in &mut fs.tree_mut().node_mut(root).files {
        if f.name == "c.bin" {
            f.file = FileRef::Relocated {
                index: 1,
                new_start: 0x3050,
            };
        }
    }

    let missing = tmp.path().join("no-such-dir");
    let err = fs.write(Some(&missing), &ctl(), None).unwrap_err();
    assert!(err.is_handled());
    // The expansion was rolled back; the image is byte-for-byte intact.
    assert_eq!(fs::read(&img).unwrap(), before);
}

#[test]
fn test_write_roundtrip_preserves_tree_and_orders_names() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    build_image(&img, FS_START, &[file("zz.bin", 0x3100, b"zz")]);
    let mut fs = GcFs::open(&img).unwrap();

    let mk = |name: &str, data: &[u8]| -> PathBuf {
        let p = tmp.path().join(name);
        fs::write(&p, data).unwrap();
        p
    };
    let root = fs.tree().root();
    let music = fs.tree_mut().add_dir(root, "Music".into());
    fs.tree_mut().add_file(
        music,
        "song.adp".into(),
        FileRef::Imported(mk("song.adp", b"song")),
    );
    fs.tree_mut().add_file(
        root,
        "ZEBRA.bin".into(),
        FileRef::Imported(mk("ZEBRA.bin", b"zebra")),
    );
    fs.tree_mut().add_file(
        root,
        "apple.bin".into(),
        FileRef::Imported(mk("apple.bin", b"apple")),
    );

    assert_eq!(fs.write(None, &ctl(), None).unwrap(), WriteOutcome::Written);
    // Case-insensitive order, directories and files interleaved.
    assert_eq!(
        fs.entry_names(),
        &["apple.bin", "Music", "song.adp", "ZEBRA.bin", "zz.bin"]
    );

    let fresh = GcFs::open(&img).unwrap();
    assert!(fresh.tree().same_shape(fs.tree()));
    let z = fresh
        .entry_names()
        .iter()
        .position(|n| n == "ZEBRA.bin")
        .unwrap();
    assert_eq!(fresh.read_file(z, 0, None).unwrap(), b"zebra");
}

#[test]
fn test_compress_packs_files_and_is_idempotent() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    build_image(
        &img,
        FS_START,
        &[
            file("a.bin", 0x4000, b"aaaaaaaa"),
            file("b.bin", 0x5000, b"bbbbbbbb"),
        ],
    );
    let mut fs = GcFs::open(&img).unwrap();
    let orig_len = fs::metadata(&img).unwrap().len();

    assert_eq!(
        fs.compress(&ctl(), None).unwrap(),
        CompressOutcome::Changed
    );
    let new_len = fs::metadata(&img).unwrap().len();
    assert!(new_len < orig_len);
    // Data is packed right after the table: 3 entries + 12 name bytes.
    let data_start = FS_START + 3 * layout::ENTRY_SIZE + 12;
    let starts: Vec<u64> = fs.entries().iter().map(|e| e.start as u64).collect();
    assert!(starts.contains(&data_start));
    let a = fs.entry_names().iter().position(|n| n == "a.bin").unwrap();
    let b = fs.entry_names().iter().position(|n| n == "b.bin").unwrap();
    assert_eq!(fs.read_file(a, 0, None).unwrap(), b"aaaaaaaa");
    assert_eq!(fs.read_file(b, 0, None).unwrap(), b"bbbbbbbb");

    // Nothing left to reclaim.
    assert_eq!(
        fs.compress(&ctl(), None).unwrap(),
        CompressOutcome::NoChanges
    );
    assert_eq!(fs::metadata(&img).unwrap().len(), new_len);
}

#[test]
fn test_cancel_during_clean_phase_leaves_image_untouched() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    build_image(&img, FS_START, &[file("a.bin", 0x3100, b"original")]);
    let mut fs = GcFs::open(&img).unwrap();
    let before = fs::read(&img).unwrap();

    let src = tmp.path().join("new.bin");
    fs::write(&src, vec![1u8; 256]).unwrap();
    let root = fs.tree().root();
    fs.tree_mut()
        .add_file(root, "new.bin".into(), FileRef::Imported(src));

    let ctl = CopyController::new();
    ctl.request_cancel();
    let out = fs.write(None, &ctl, None).unwrap();
    assert_eq!(out, WriteOutcome::Cancelled(Cancelled::Safe));

    // Byte-for-byte identical, and the edit is still pending.
    assert_eq!(fs::read(&img).unwrap(), before);
    assert!(fs.changed());
}

#[test]
fn test_changed_and_disk_changed() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    build_image(&img, FS_START, &[file("a.bin", 0x3100, b"x")]);
    let mut fs = GcFs::open(&img).unwrap();
    assert!(!fs.changed());
    assert!(!fs.disk_changed().unwrap());

    let root = fs.tree().root();
    fs.tree_mut().add_dir(root, "newdir".into());
    assert!(fs.changed());
    assert!(!fs.disk_changed().unwrap());

    // Another writer changes an entry's size field.
    {
        let mut f = fs::OpenOptions::new().write(true).open(&img).unwrap();
        gcdisc::binio::write_u32(&mut f, FS_START + layout::ENTRY_SIZE + 0x8, 99).unwrap();
    }
    assert!(fs.disk_changed().unwrap());

    fs.update().unwrap();
    assert!(!fs.changed());
    assert!(!fs.disk_changed().unwrap());
}

#[test]
fn test_banner_info() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    let mut bnr = vec![0u8; 0x1960];
    bnr[..4].copy_from_slice(b"BNR1");
    bnr[0x20..0x24].copy_from_slice(&[1, 2, 3, 4]);
    bnr[0x1820..0x1825].copy_from_slice(b"Short");
    bnr[0x1840..0x1843].copy_from_slice(b"Dev");
    bnr[0x1860..0x1869].copy_from_slice(b"Full Name");
    bnr[0x18a0..0x18a8].copy_from_slice(b"Full Dev");
    bnr[0x18e0..0x18e4].copy_from_slice(b"Desc");
    build_image(&img, FS_START, &[file("opening.bnr", 0x4000, &bnr)]);
    let fs = GcFs::open(&img).unwrap();

    let info = fs.banner_info(None).unwrap();
    assert_eq!(info.name, "Short");
    assert_eq!(info.developer, "Dev");
    assert_eq!(info.full_name, "Full Name");
    assert_eq!(info.full_developer, "Full Dev");
    assert_eq!(info.description, "Desc");
    assert_eq!(info.img.len(), 0x1800);
    assert_eq!(&info.img[..4], &[1, 2, 3, 4]);
}

#[test]
fn test_banner_missing_and_invalid() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    build_image(&img, FS_START, &[file("other.bin", 0x3100, b"not a banner")]);
    let fs = GcFs::open(&img).unwrap();
    assert!(matches!(fs.banner_info(None), Err(FsError::BannerMissing)));
    assert!(matches!(fs.banner_info(Some(0)), Err(FsError::BannerInvalid)));
}

#[test]
fn test_decompress_restores_fixed_size() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    build_image(&img, FS_START, &[file("a.bin", 0x3100, b"payload!")]);
    let mut fs = GcFs::open(&img).unwrap();

    assert_eq!(
        fs.decompress(&ctl(), None).unwrap(),
        CompressOutcome::Changed
    );
    assert_eq!(
        fs::metadata(&img).unwrap().len(),
        layout::FULL_IMAGE_SIZE
    );
    let a = fs.entry_names().iter().position(|n| n == "a.bin").unwrap();
    assert_eq!(fs.read_file(a, 0, None).unwrap(), b"payload!");
}

#[test]
fn test_decompress_too_large_is_handled() {
    let tmp = tempdir().unwrap();
    let img = tmp.path().join("disc.iso");
    // An entry claiming more data than the fixed size can hold; even fully
    // compressed it cannot fit.
    build_image(&img, FS_START, &[file("huge.bin", 0x3100, b"")]);
    {
        let mut f = fs::OpenOptions::new().write(true).open(&img).unwrap();
        gcdisc::binio::write_u32(&mut f, FS_START + layout::ENTRY_SIZE + 0x8, 0x6000_0000).unwrap();
    }
    let mut fs = GcFs::open(&img).unwrap();
    let before_len = fs::metadata(&img).unwrap().len();

    let err = fs.decompress(&ctl(), None).unwrap_err();
    assert!(err.is_handled());
    assert!(matches!(err.source_error(), FsError::TooLarge { .. }));
    // Nothing moved and any planned relocation was rolled back.
    assert!(!fs.changed());
    assert_eq!(fs::metadata(&img).unwrap().len(), before_len);
}
