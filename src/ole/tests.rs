//! Container-level tests: the documented scenarios, corruption handling,
//! file-backed access and property tests over random edit sequences.

use super::consts::*;
use super::directory::Placement;
use super::error::{OleError, TableKind};
use super::{EntryType, OleFile, OleOptions, Validation};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, SeekFrom};

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
}

fn lenient() -> OleOptions {
    OleOptions::new().with_validation(Validation::Lenient)
}

/// Foo (big), Other (mini), Last (big, stored at the end of the file)
fn sample_image() -> Vec<u8> {
    let mut ole = OleFile::create_empty().unwrap();
    ole.write_stream("Foo", &pattern(10_000, 1)).unwrap();
    ole.write_stream("Other", &pattern(100, 2)).unwrap();
    ole.write_stream("Last", &pattern(5_000, 3)).unwrap();
    ole.to_bytes().unwrap()
}

fn read_u32(image: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        image[offset],
        image[offset + 1],
        image[offset + 2],
        image[offset + 3],
    ])
}

/// Overwrite the FAT slot of `sector` (first FAT sector only).
fn set_fat_entry(image: &mut [u8], sector: u32, value: u32) {
    let fat_sector = read_u32(image, 0x4C) as usize;
    let offset = (fat_sector + 1) * 512 + sector as usize * 4;
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[test]
fn test_scenario_large_stream() {
    let data = pattern(10_000, 9);
    let mut ole = OleFile::create_empty().unwrap();
    ole.write_stream("Foo", &data).unwrap();

    assert_eq!(ole.read_stream("Foo").unwrap(), data);
    assert_eq!(ole.stream_chain("Foo").unwrap().len(), 20);
    assert_eq!(ole.entry("Foo").unwrap().size(), 10_000);
    ole.check_integrity().unwrap();
}

#[test]
fn test_scenario_small_stream() {
    let mut ole = OleFile::create_empty().unwrap();
    ole.write_stream("Bar", &pattern(50, 1)).unwrap();

    let entry = ole.entry("Bar").unwrap();
    let start = entry.start_sector();
    assert_eq!(ole.get_stream("Bar").unwrap().placement(), Placement::Mini);
    // The start indexes the MiniFAT, whose entry terminates the one-sector chain
    assert_eq!(ole.mini_fat().table().get(start), Some(ENDOFCHAIN));
    assert_eq!(ole.stream_chain("Bar").unwrap(), vec![start]);

    let listing = ole.list_entries("/").unwrap();
    let bar = listing.iter().find(|e| e.name == "Bar").unwrap();
    assert_eq!(bar.entry_type, EntryType::Stream);
    assert_eq!(bar.size, 50);
}

#[test]
fn test_scenario_delete_non_empty_storage() {
    let mut ole = OleFile::create_empty().unwrap();
    ole.create_storage("Dir").unwrap();
    ole.write_stream("Dir/A", &pattern(10, 1)).unwrap();
    ole.write_stream("Dir/B", &pattern(6000, 2)).unwrap();

    assert!(matches!(ole.delete("Dir"), Err(OleError::NotEmpty(_))));
    assert!(ole.exists("Dir/A"));

    ole.delete("Dir/A").unwrap();
    ole.delete("Dir/B").unwrap();
    ole.delete("Dir").unwrap();
    assert!(matches!(ole.find("/", "Dir"), Err(OleError::NotFound(_))));
    assert!(matches!(ole.delete("/"), Err(OleError::InvalidPath(_))));

    // The freed big sectors are reused before the file grows
    let before = ole.sector_count();
    ole.write_stream("Again", &pattern(6000, 3)).unwrap();
    assert_eq!(ole.sector_count(), before);
    ole.check_integrity().unwrap();
}

#[test]
fn test_scenario_bad_magic() {
    let mut image = sample_image();
    image[0] ^= 0xFF;
    assert!(matches!(
        OleFile::open(Cursor::new(image)),
        Err(OleError::InvalidFormat(_))
    ));
}

#[test]
fn test_bad_sector_shift() {
    let mut image = sample_image();
    image[0x1E] = 10;
    assert!(matches!(
        OleFile::open(Cursor::new(image)),
        Err(OleError::InvalidFormat(_))
    ));
}

#[test]
fn test_too_short_for_a_header() {
    assert!(matches!(
        OleFile::open(Cursor::new(vec![0u8; 100])),
        Err(OleError::InvalidFormat(_))
    ));
}

#[test]
fn test_oversized_fat_counts_are_rejected() {
    let image = OleFile::create_empty().unwrap().to_bytes().unwrap();
    for offset in [0x2C, 0x48] {
        let mut damaged = image.clone();
        damaged[offset..offset + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        for options in [OleOptions::new(), lenient()] {
            assert!(matches!(
                OleFile::open_with(Cursor::new(damaged.clone()), options),
                Err(OleError::CorruptContainer(_))
            ));
        }
    }
}

#[test]
fn test_duplicate_names() {
    let mut ole = OleFile::create_empty().unwrap();
    ole.write_stream("Data", b"1").unwrap();
    assert!(matches!(
        ole.create_stream("DATA"),
        Err(OleError::DuplicateName { .. })
    ));
    assert!(matches!(
        ole.create_storage("data"),
        Err(OleError::DuplicateName { .. })
    ));
    // write_stream replaces instead
    ole.write_stream("data", b"2").unwrap();
    assert_eq!(ole.read_stream("Data").unwrap(), b"2");
    assert_eq!(ole.list_entries("/").unwrap().len(), 1);
}

#[test]
fn test_rename() {
    let mut ole = OleFile::create_empty().unwrap();
    ole.write_stream("Old", &pattern(20, 1)).unwrap();
    ole.write_stream("Other", b"x").unwrap();

    assert!(matches!(
        ole.rename("Old", "OTHER"),
        Err(OleError::DuplicateName { .. })
    ));
    assert!(matches!(ole.rename("Old", "a/b"), Err(OleError::InvalidName(_))));
    ole.rename("Old", "New").unwrap();
    assert!(!ole.exists("Old"));
    assert_eq!(ole.read_stream("New").unwrap(), pattern(20, 1));
    ole.check_integrity().unwrap();
}

#[test]
fn test_listing_is_sorted_regardless_of_insertion_order() {
    let mut ole = OleFile::create_empty().unwrap();
    for name in ["WordDocument", "1Table", "Data", "\u{5}SummaryInformation", "ObjectPool"] {
        ole.write_stream(name, b"x").unwrap();
    }
    let names: Vec<String> = ole
        .list_entries("/")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(
        names,
        vec!["Data", "1Table", "ObjectPool", "WordDocument", "\u{5}SummaryInformation"]
    );
}

#[test]
fn test_walk_is_restartable() {
    let mut ole = OleFile::create_empty().unwrap();
    ole.create_storage("B").unwrap();
    ole.write_stream("B/Y", b"y").unwrap();
    ole.write_stream("B/X", b"x").unwrap();
    ole.write_stream("A", b"a").unwrap();

    let names = |ole: &OleFile<Cursor<Vec<u8>>>| -> Vec<String> {
        ole.walk("/").unwrap().map(|e| e.name.clone()).collect()
    };
    assert_eq!(names(&ole), vec!["A", "B", "X", "Y"]);
    assert_eq!(names(&ole), names(&ole));
    assert_eq!(ole.walk("B").unwrap().count(), 2);
}

#[test]
fn test_cycle_is_reported_at_open() {
    let mut image = sample_image();
    let chain = OleFile::open(Cursor::new(image.clone()))
        .unwrap()
        .stream_chain("Foo")
        .unwrap();
    set_fat_entry(&mut image, chain[chain.len() - 1], chain[0]);

    let err = OleFile::open(Cursor::new(image)).unwrap_err();
    match err {
        OleError::CorruptChain {
            table, entry, detail, ..
        } => {
            assert_eq!(table, TableKind::Fat);
            assert_eq!(entry.as_deref(), Some("/Foo"));
            assert!(detail.contains("cycle"));
        },
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_lenient_open_isolates_damaged_stream() {
    let mut image = sample_image();
    let chain = OleFile::open(Cursor::new(image.clone()))
        .unwrap()
        .stream_chain("Foo")
        .unwrap();
    set_fat_entry(&mut image, chain[5], 0x0000_FFFF);

    assert!(OleFile::open(Cursor::new(image.clone())).is_err());

    let ole = OleFile::open_with(Cursor::new(image), lenient()).unwrap();
    let err = ole.read_stream("Foo").unwrap_err();
    assert!(matches!(err, OleError::CorruptChain { .. }));
    assert!(err.to_string().contains("/Foo"));

    // Unrelated streams are still readable
    assert_eq!(ole.read_stream("Other").unwrap(), pattern(100, 2));
    assert_eq!(ole.read_stream("Last").unwrap(), pattern(5_000, 3));
}

#[test]
fn test_truncated_file() {
    let mut image = sample_image();
    // Cut the last three sectors, which belong to the final stream
    image.truncate(image.len() - 3 * 512);

    assert!(matches!(
        OleFile::open(Cursor::new(image.clone())),
        Err(OleError::CorruptChain { .. })
    ));

    let ole = OleFile::open_with(Cursor::new(image), lenient()).unwrap();
    assert!(ole.read_stream("Last").is_err());
    assert_eq!(ole.read_stream("Foo").unwrap(), pattern(10_000, 1));
}

#[test]
fn test_shared_sectors_are_rejected() {
    let mut image = sample_image();
    let ole = OleFile::open(Cursor::new(image.clone())).unwrap();
    let foo_start = ole.entry("Foo").unwrap().start_sector();
    let last = ole.resolve("Last").unwrap() as usize;
    let dir = ole.header().first_dir_sector as usize;

    let offset = (dir + 1) * 512 + last * DIRENTRY_SIZE + 116;
    image[offset..offset + 4].copy_from_slice(&foo_start.to_le_bytes());

    let err = OleFile::open(Cursor::new(image)).unwrap_err();
    assert!(matches!(err, OleError::CorruptContainer(_)));
    assert!(err.to_string().contains("/Last"));
}

#[test]
fn test_check_integrity_detects_double_allocation() {
    let mut ole = OleFile::create_empty().unwrap();
    ole.write_stream("A", &pattern(5000, 1)).unwrap();
    ole.write_stream("B", &pattern(5000, 2)).unwrap();
    ole.check_integrity().unwrap();

    let a_start = ole.entry("A").unwrap().start_sector();
    let b = ole.resolve("B").unwrap();
    if let Some(entry) = ole.directory.get_mut(b) {
        entry.kind = super::EntryKind::Stream {
            start: a_start,
            size: 5000,
            placement: Placement::Big,
        };
    }
    assert!(matches!(
        ole.check_integrity(),
        Err(OleError::CorruptContainer(_))
    ));
}

#[test]
fn test_stream_on_storage_and_storage_on_stream() {
    let mut ole = OleFile::create_empty().unwrap();
    ole.create_storage("S").unwrap();
    ole.write_stream("T", b"t").unwrap();

    assert!(matches!(ole.get_stream("S"), Err(OleError::NotAStream(_))));
    assert!(matches!(ole.write_stream("S", b"x"), Err(OleError::NotAStream(_))));
    assert!(matches!(ole.list_entries("T"), Err(OleError::NotAStorage(_))));
    assert!(matches!(ole.create_storage("T/U"), Err(OleError::NotAStorage(_))));
}

#[test]
fn test_edit_stream_crossing_cutoff() {
    let mut ole = OleFile::create_empty().unwrap();
    ole.write_stream("Grow", &pattern(4000, 1)).unwrap();
    assert_eq!(ole.get_stream("Grow").unwrap().placement(), Placement::Mini);

    {
        let mut writer = ole.edit_stream("Grow").unwrap();
        writer.seek(SeekFrom::End(0)).unwrap();
        std::io::Write::write_all(&mut writer, &pattern(200, 2)).unwrap();
        writer.close().unwrap();
    }

    let mut expected = pattern(4000, 1);
    expected.extend(pattern(200, 2));
    let mut reader = ole.get_stream("Grow").unwrap();
    assert_eq!(reader.placement(), Placement::Big);
    let mut data = Vec::new();
    reader.read_to_end(&mut data).unwrap();
    assert_eq!(data, expected);
    ole.check_integrity().unwrap();
}

#[test]
fn test_save_and_open_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.ole");

    let mut ole = OleFile::create_empty().unwrap();
    ole.write_stream("Contents", &pattern(9000, 4)).unwrap();
    ole.save(&path).unwrap();

    let reopened = OleFile::open_path(&path).unwrap();
    assert_eq!(reopened.read_stream("Contents").unwrap(), pattern(9000, 4));

    assert!(matches!(
        OleFile::open_path(dir.path().join("missing.ole")),
        Err(OleError::Io(_))
    ));
}

#[test]
fn test_save_replaces_target_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.ole");
    std::fs::write(&path, b"previous contents").unwrap();

    let mut ole = OleFile::create_empty().unwrap();
    ole.write_stream("Data", &pattern(700, 2)).unwrap();
    ole.save(&path).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), ole.to_bytes().unwrap());

    // A target that cannot be replaced fails without touching it
    let blocked = dir.path().join("blocked");
    std::fs::create_dir(&blocked).unwrap();
    std::fs::write(blocked.join("keep"), b"x").unwrap();
    assert!(matches!(ole.save(&blocked), Err(OleError::Io(_))));
    assert!(blocked.join("keep").exists());

    // No temporary files are left behind
    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["blocked", "doc.ole"]);
}

#[test]
fn test_write_in_place_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("patched.ole");
    std::fs::write(&path, sample_image()).unwrap();
    let original_len = std::fs::metadata(&path).unwrap().len();

    {
        let mut ole = OleFile::open_path(&path).unwrap();
        ole.write_stream("Other", &pattern(100, 42)).unwrap();
        let mut out = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        ole.write_in_place(&mut out).unwrap();
    }

    assert_eq!(std::fs::metadata(&path).unwrap().len(), original_len);
    let reopened = OleFile::open_path(&path).unwrap();
    assert_eq!(reopened.read_stream("Other").unwrap(), pattern(100, 42));
    assert_eq!(reopened.read_stream("Foo").unwrap(), pattern(10_000, 1));
}

#[test]
fn test_close_returns_medium() {
    let image = sample_image();
    let ole = OleFile::open(Cursor::new(image.clone())).unwrap();
    assert_eq!(ole.close().into_inner(), image);
}

const PATHS: [&str; 6] = [
    "/Alpha",
    "/b",
    "/Storage/Cc",
    "/Storage/dd",
    "/E1",
    "/Storage/Foo",
];

#[derive(Debug, Clone)]
enum Op {
    Write { slot: usize, len: usize, seed: u8 },
    Delete { slot: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..PATHS.len(), 0usize..9000, any::<u8>())
            .prop_map(|(slot, len, seed)| Op::Write { slot, len, seed }),
        1 => (0..PATHS.len()).prop_map(|slot| Op::Delete { slot }),
    ]
}

fn apply(ops: &[Op]) -> (OleFile<Cursor<Vec<u8>>>, BTreeMap<String, Vec<u8>>) {
    let mut ole = OleFile::create_empty().unwrap();
    ole.create_storage("Storage").unwrap();
    let mut model = BTreeMap::new();

    for op in ops {
        match *op {
            Op::Write { slot, len, seed } => {
                let data = pattern(len, seed);
                ole.write_stream(PATHS[slot], &data).unwrap();
                model.insert(PATHS[slot].to_string(), data);
            },
            Op::Delete { slot } => {
                if model.remove(PATHS[slot]).is_some() {
                    ole.delete(PATHS[slot]).unwrap();
                } else {
                    assert!(matches!(ole.delete(PATHS[slot]), Err(OleError::NotFound(_))));
                }
            },
        }
    }
    (ole, model)
}

fn assert_matches_model(ole: &OleFile<Cursor<Vec<u8>>>, model: &BTreeMap<String, Vec<u8>>) {
    ole.check_integrity().unwrap();
    let mut streams = ole.list_streams();
    streams.sort();
    let expected: Vec<String> = model.keys().cloned().collect();
    assert_eq!(streams, expected);
    for (path, data) in model {
        assert_eq!(&ole.read_stream(path).unwrap(), data, "{path}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_edits_keep_container_consistent(ops in prop::collection::vec(op_strategy(), 1..24)) {
        let (ole, model) = apply(&ops);
        assert_matches_model(&ole, &model);
    }

    #[test]
    fn prop_round_trip(ops in prop::collection::vec(op_strategy(), 1..24)) {
        let (ole, model) = apply(&ops);
        let image = ole.to_bytes().unwrap();

        let reopened = OleFile::open(Cursor::new(image.clone())).unwrap();
        assert_matches_model(&reopened, &model);
        prop_assert_eq!(reopened.to_bytes().unwrap(), image);
    }

    #[test]
    fn prop_write_in_place_idempotent(
        ops in prop::collection::vec(op_strategy(), 1..16),
        seed in any::<u8>(),
    ) {
        let (ole, model) = apply(&ops);
        let image = ole.to_bytes().unwrap();
        let mut reopened = OleFile::open(Cursor::new(image.clone())).unwrap();

        // Same-size overwrites never change the sector count
        for (path, data) in &model {
            reopened.write_stream(path, &pattern(data.len(), seed)).unwrap();
        }

        let mut first = Cursor::new(image.clone());
        reopened.write_in_place(&mut first).unwrap();
        let first = first.into_inner();
        let mut second = Cursor::new(first.clone());
        reopened.write_in_place(&mut second).unwrap();
        prop_assert_eq!(&second.into_inner(), &first);

        let patched = OleFile::open(Cursor::new(first)).unwrap();
        patched.check_integrity().unwrap();
        for (path, data) in &model {
            prop_assert_eq!(patched.read_stream(path).unwrap(), pattern(data.len(), seed));
        }
    }
}
