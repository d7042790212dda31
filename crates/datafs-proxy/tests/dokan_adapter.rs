use datafs_core::{attributes, DataStore, StoreOptions, MIN_CHUNK_SIZE};
use datafs_proxy::dokan::{volume_flags, DokanOptions, DokanProxy, NtStatus};
use tempfile::TempDir;

// Dokan CreateDisposition values
const FILE_SUPERSEDE: u32 = 0;
const FILE_OPEN: u32 = 1;
const FILE_CREATE: u32 = 2;
const FILE_OPEN_IF: u32 = 3;
const FILE_OVERWRITE_IF: u32 = 5;

fn proxy(temp: &TempDir) -> DokanProxy<DataStore> {
    proxy_with(temp, DokanOptions::default())
}

fn proxy_with(temp: &TempDir, options: DokanOptions) -> DokanProxy<DataStore> {
    let store = DataStore::open(
        temp.path().join("store"),
        StoreOptions {
            map_size: 64 * 1024 * 1024,
            chunk_size: MIN_CHUNK_SIZE,
            ..Default::default()
        },
    )
    .unwrap();
    DokanProxy::new(store, options)
}

#[test]
fn test_create_write_read_through_handles() {
    let temp = TempDir::new().unwrap();
    let dokan = proxy(&temp);

    let dir = dokan.create_file("\\docs", FILE_CREATE, true, 0).unwrap();
    assert!(dir.is_directory && dir.created);
    dokan.close_file(dir.handle);

    let file = dokan
        .create_file("\\docs\\readme.txt", FILE_CREATE, false, attributes::ARCHIVE)
        .unwrap();
    assert!(!file.is_directory);
    assert_eq!(dokan.write_file(file.handle, 0, b"hello, world", false).unwrap(), 12);
    assert_eq!(dokan.write_file(file.handle, 0, b"!", true).unwrap(), 1);
    assert_eq!(
        dokan.read_file(file.handle, 0, 100).unwrap(),
        b"hello, world!"
    );

    let info = dokan.get_file_information(file.handle).unwrap();
    assert_eq!(info.file_size, 13);
    assert_eq!(info.attributes, attributes::ARCHIVE);
    dokan.close_file(file.handle);
    assert_eq!(dokan.open_handles(), 0);
}

#[test]
fn test_dispositions_map_to_status_codes() {
    let temp = TempDir::new().unwrap();
    let dokan = proxy(&temp);

    assert_eq!(
        dokan.create_file("\\missing", FILE_OPEN, false, 0),
        Err(NtStatus::OBJECT_NAME_NOT_FOUND)
    );
    let first = dokan.create_file("\\f", FILE_OPEN_IF, false, 0).unwrap();
    assert!(first.created);
    assert_eq!(
        dokan.create_file("\\f", FILE_CREATE, false, 0),
        Err(NtStatus::OBJECT_NAME_COLLISION)
    );
    let again = dokan.create_file("\\f", FILE_OPEN_IF, false, 0).unwrap();
    assert!(!again.created);
    assert_ne!(first.handle, again.handle);

    assert_eq!(
        dokan.create_file("\\f", 9, false, 0),
        Err(NtStatus::NOT_SUPPORTED)
    );
    assert_eq!(
        dokan.create_file("\\nowhere\\f", FILE_CREATE, false, 0),
        Err(NtStatus::OBJECT_NAME_NOT_FOUND)
    );
}

#[test]
fn test_overwrite_and_supersede_reset_content() {
    let temp = TempDir::new().unwrap();
    let dokan = proxy(&temp);
    let h = dokan.create_file("\\f", FILE_CREATE, false, 0).unwrap().handle;
    dokan.write_file(h, 0, b"old content", false).unwrap();

    let over = dokan.create_file("\\f", FILE_OVERWRITE_IF, false, 0).unwrap();
    assert_eq!(dokan.get_file_information(over.handle).unwrap().file_size, 0);

    dokan.write_file(h, 0, b"again", false).unwrap();
    let sup = dokan.create_file("\\f", FILE_SUPERSEDE, false, 0).unwrap();
    assert_eq!(dokan.read_file(sup.handle, 0, 10).unwrap(), b"");
}

#[test]
fn test_find_files_with_pattern() {
    let temp = TempDir::new().unwrap();
    let dokan = proxy(&temp);
    for name in ["a.txt", "b.txt", "c.png"] {
        let h = dokan
            .create_file(&format!("\\{name}"), FILE_CREATE, false, 0)
            .unwrap()
            .handle;
        dokan.close_file(h);
    }
    dokan.create_file("\\sub", FILE_CREATE, true, 0).unwrap();

    let mut all = Vec::new();
    dokan.find_files("\\", "", |d| all.push(d.file_name.clone())).unwrap();
    assert_eq!(all, vec!["a.txt", "b.txt", "c.png", "sub"]);

    let mut txt = Vec::new();
    dokan
        .find_files("\\", "*.txt", |d| txt.push(d.file_name.clone()))
        .unwrap();
    assert_eq!(txt, vec!["a.txt", "b.txt"]);

    let mut dirs = Vec::new();
    dokan
        .find_files("\\", "s*", |d| dirs.push(d.attributes))
        .unwrap();
    assert_eq!(dirs, vec![attributes::DIRECTORY]);

    assert_eq!(
        dokan.find_files("\\a.txt", "", |_| {}),
        Err(NtStatus::NOT_A_DIRECTORY)
    );
}

#[test]
fn test_delete_on_close() {
    let temp = TempDir::new().unwrap();
    let dokan = proxy(&temp);
    let dir = dokan.create_file("\\d", FILE_CREATE, true, 0).unwrap().handle;
    let file = dokan.create_file("\\d\\f", FILE_CREATE, false, 0).unwrap().handle;

    assert_eq!(
        dokan.can_delete_directory(dir, true),
        Err(NtStatus::DIRECTORY_NOT_EMPTY)
    );
    assert_eq!(dokan.can_delete_file(dir, true), Err(NtStatus::ACCESS_DENIED));

    dokan.can_delete_file(file, true).unwrap();
    // still there until cleanup
    assert!(dokan.get_file_information(file).is_ok());
    dokan.cleanup(file).unwrap();
    dokan.close_file(file);

    dokan.can_delete_directory(dir, true).unwrap();
    dokan.cleanup(dir).unwrap();
    dokan.close_file(dir);

    assert_eq!(
        dokan.create_file("\\d", FILE_OPEN, true, 0),
        Err(NtStatus::OBJECT_NAME_NOT_FOUND)
    );
}

#[test]
fn test_read_only_attribute_blocks_delete() {
    let temp = TempDir::new().unwrap();
    let dokan = proxy(&temp);
    let h = dokan
        .create_file("\\locked", FILE_CREATE, false, attributes::READ_ONLY)
        .unwrap()
        .handle;
    assert_eq!(dokan.can_delete_file(h, true), Err(NtStatus::CANNOT_DELETE));

    dokan.set_file_attributes(h, attributes::NORMAL).unwrap();
    dokan.can_delete_file(h, true).unwrap();
    // a cancelled delete leaves the file alone
    dokan.can_delete_file(h, false).unwrap();
    dokan.cleanup(h).unwrap();
    assert!(dokan.get_file_information(h).is_ok());
}

#[test]
fn test_move_file_updates_open_handles() {
    let temp = TempDir::new().unwrap();
    let dokan = proxy(&temp);
    let dir = dokan.create_file("\\src", FILE_CREATE, true, 0).unwrap().handle;
    let child = dokan
        .create_file("\\src\\inner.txt", FILE_CREATE, false, 0)
        .unwrap()
        .handle;
    dokan.write_file(child, 0, b"moved", false).unwrap();

    dokan.move_file(dir, "\\dst", false).unwrap();

    assert_eq!(dokan.read_file(child, 0, 5).unwrap(), b"moved");
    let reopened = dokan
        .create_file("\\dst\\inner.txt", FILE_OPEN, false, 0)
        .unwrap();
    assert_eq!(dokan.read_file(reopened.handle, 0, 5).unwrap(), b"moved");
    assert_eq!(
        dokan.create_file("\\src", FILE_OPEN, true, 0),
        Err(NtStatus::OBJECT_NAME_NOT_FOUND)
    );

    let other = dokan.create_file("\\other", FILE_CREATE, false, 0).unwrap().handle;
    assert_eq!(
        dokan.move_file(other, "\\dst\\inner.txt", false),
        Err(NtStatus::OBJECT_NAME_COLLISION)
    );
    dokan.move_file(other, "\\dst\\inner.txt", true).unwrap();
    assert_eq!(dokan.read_file(child, 0, 5).unwrap(), b"");
}

#[test]
fn test_end_of_file_and_allocation() {
    let temp = TempDir::new().unwrap();
    let dokan = proxy(&temp);
    let h = dokan.create_file("\\f", FILE_CREATE, false, 0).unwrap().handle;
    dokan.write_file(h, 0, b"0123456789", false).unwrap();

    dokan.set_allocation_size(h, 100).unwrap();
    assert_eq!(dokan.get_file_information(h).unwrap().file_size, 10);
    dokan.set_allocation_size(h, 4).unwrap();
    assert_eq!(dokan.read_file(h, 0, 100).unwrap(), b"0123");

    dokan.set_end_of_file(h, 6).unwrap();
    assert_eq!(dokan.read_file(h, 0, 100).unwrap(), b"0123\0\0");
}

#[test]
fn test_set_file_time_skips_sentinels() {
    let temp = TempDir::new().unwrap();
    let dokan = proxy(&temp);
    let h = dokan.create_file("\\f", FILE_CREATE, false, 0).unwrap().handle;
    let before = dokan.get_file_information(h).unwrap();

    let write_time = 133_000_000_000_000_000;
    dokan.set_file_time(h, 0, u64::MAX, write_time).unwrap();

    let after = dokan.get_file_information(h).unwrap();
    assert_eq!(after.creation_time, before.creation_time);
    assert_eq!(after.last_access_time, before.last_access_time);
    assert_eq!(after.last_write_time, write_time);
}

#[test]
fn test_read_only_volume() {
    let temp = TempDir::new().unwrap();
    let dokan = proxy_with(
        &temp,
        DokanOptions {
            read_only: true,
            ..Default::default()
        },
    );

    assert_eq!(
        dokan.create_file("\\f", FILE_CREATE, false, 0),
        Err(NtStatus::MEDIA_WRITE_PROTECTED)
    );
    let root = dokan.create_file("\\", FILE_OPEN, true, 0).unwrap();
    assert!(root.is_directory);
    assert_eq!(
        dokan.write_file(root.handle, 0, b"x", false),
        Err(NtStatus::MEDIA_WRITE_PROTECTED)
    );

    let volume = dokan.volume_information();
    assert_ne!(volume.file_system_flags & volume_flags::READ_ONLY_VOLUME, 0);
    assert_ne!(volume.file_system_flags & volume_flags::CASE_SENSITIVE_SEARCH, 0);
}

#[test]
fn test_disk_free_space_tracks_usage() {
    let temp = TempDir::new().unwrap();
    let dokan = proxy_with(
        &temp,
        DokanOptions {
            capacity: 1_000_000,
            ..Default::default()
        },
    );
    let h = dokan.create_file("\\f", FILE_CREATE, false, 0).unwrap().handle;
    dokan.write_file(h, 0, &[1u8; 1000], false).unwrap();

    let space = dokan.disk_free_space().unwrap();
    assert_eq!(space.total_bytes, 1_000_000);
    assert_eq!(space.total_free_bytes, 999_000);
}

#[test]
fn test_invalid_handle() {
    let temp = TempDir::new().unwrap();
    let dokan = proxy(&temp);
    assert_eq!(dokan.read_file(42, 0, 1), Err(NtStatus::INVALID_HANDLE));
    assert_eq!(dokan.cleanup(42), Err(NtStatus::INVALID_HANDLE));
}

#[test]
fn test_concurrent_appends_on_one_handle_all_land() {
    let temp = TempDir::new().unwrap();
    let dokan = proxy(&temp);
    let h = dokan.create_file("\\log", FILE_CREATE, false, 0).unwrap().handle;

    std::thread::scope(|scope| {
        for t in 0..8u8 {
            let dokan = &dokan;
            scope.spawn(move || {
                for _ in 0..50 {
                    assert_eq!(dokan.write_file(h, 0, &[b'a' + t], true).unwrap(), 1);
                }
            });
        }
    });

    let content = dokan.read_file(h, 0, 1000).unwrap();
    assert_eq!(content.len(), 400);
    for t in 0..8u8 {
        assert_eq!(content.iter().filter(|b| **b == b'a' + t).count(), 50);
    }
}

#[test]
fn test_allocation_size_only_shrinks() {
    let temp = TempDir::new().unwrap();
    let dokan = proxy(&temp);
    let h = dokan.create_file("\\f", FILE_CREATE, false, 0).unwrap().handle;
    dokan.write_file(h, 0, b"0123456789", false).unwrap();

    dokan.set_allocation_size(h, 4096).unwrap();
    assert_eq!(dokan.get_file_information(h).unwrap().file_size, 10);
    dokan.set_allocation_size(h, 3).unwrap();
    assert_eq!(dokan.read_file(h, 0, 100).unwrap(), b"012");
}
