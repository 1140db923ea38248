use areafs::{format_full, restore, AreaDesc, FileFlash, RestoreConfig};
use tempfile::NamedTempFile;

#[test]
fn format_then_restore_file_image() {
    let temp_file = NamedTempFile::new().unwrap();
    let image_path = temp_file.path().to_path_buf();
    let descs = AreaDesc::split(0, 2048, 4);

    {
        let mut flash = FileFlash::create(&image_path, 4 * 2048).unwrap();
        format_full(&mut flash, &descs).unwrap();
    }

    let first = {
        let mut flash = FileFlash::open(&image_path).unwrap();
        assert_eq!(flash.size(), 4 * 2048);
        let fs = restore(&mut flash, &descs, &RestoreConfig::default()).unwrap();
        assert_eq!(fs.scratch_area_idx, Some(3));
        assert_eq!(fs.index.inode_count(), 2);
        assert!(fs.lookup(&mut flash, "/lost+found").is_ok());
        fs.summary()
    };

    let mut flash = FileFlash::open(&image_path).unwrap();
    let second = restore(&mut flash, &descs, &RestoreConfig::default()).unwrap();
    assert_eq!(second.summary(), first);
}

#[test]
fn config_file_limits_the_pools() {
    let mut config_file = NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut config_file, br#"{ "max_inodes": 1 }"#).unwrap();
    let config = RestoreConfig::load(config_file.path()).unwrap();
    assert_eq!(config.max_inodes, 1);
    assert_eq!(config.max_blocks, RestoreConfig::default().max_blocks);

    let image = NamedTempFile::new().unwrap();
    let descs = AreaDesc::split(0, 1024, 2);
    let mut flash = FileFlash::create(image.path(), 2048).unwrap();
    format_full(&mut flash, &descs).unwrap();

    // Root fits; lost+found does not.
    let err = restore(&mut flash, &descs, &config).unwrap_err();
    assert!(matches!(err, areafs::FsError::NoMem));
}
