use capzip_archive::{ArchiveWriter, CompressionLevel, UnzipOptions, ZipOptions, unzip, zip};
use capzip_core::ErrorKind;
use std::fs;
use std::io::Cursor;
use std::path::Path;

fn craft(path: &Path, add: impl FnOnce(&mut ArchiveWriter<Cursor<Vec<u8>>>)) {
    let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()));
    add(&mut writer);
    fs::write(path, writer.finish().unwrap().into_inner()).unwrap();
}

#[test]
fn test_zip_slip_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("evil.zip");
    craft(&archive, |w| {
        w.add_file("../../evil", b"pwned", CompressionLevel::Store, None)
            .unwrap();
    });

    let out = dir.path().join("a").join("b").join("out");
    let err = unzip(&archive, &out, &UnzipOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsafeEntryPath);
    assert!(err.to_string().contains("../../evil"));
    assert!(!dir.path().join("a").join("evil").exists());
    assert!(fs::read_dir(&out).unwrap().next().is_none());
}

#[test]
fn test_absolute_and_backslash_names_rejected() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["/tmp/evil", "..\\..\\evil", "C:\\evil", "sub/../../evil"] {
        let archive = dir.path().join("evil.zip");
        craft(&archive, |w| {
            w.add_file(name, b"pwned", CompressionLevel::Store, None)
                .unwrap();
        });
        let err = unzip(&archive, &dir.path().join("out"), &UnzipOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsafeEntryPath, "{name}");
    }
}

#[test]
fn test_failure_stops_at_first_bad_entry() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("mixed.zip");
    craft(&archive, |w| {
        w.add_file("good.txt", b"good", CompressionLevel::Store, None)
            .unwrap();
        w.add_file("../evil", b"pwned", CompressionLevel::Store, None)
            .unwrap();
        w.add_file("after.txt", b"after", CompressionLevel::Store, None)
            .unwrap();
    });

    let out = dir.path().join("out");
    let err = unzip(&archive, &out, &UnzipOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsafeEntryPath);
    assert_eq!(fs::read(out.join("good.txt")).unwrap(), b"good");
    assert!(!out.join("after.txt").exists());
    assert!(!dir.path().join("evil").exists());
}

#[cfg(unix)]
#[test]
fn test_escaping_symlink_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("link.zip");
    craft(&archive, |w| {
        w.add_symlink("link", "../../etc/passwd", None).unwrap();
    });

    let out = dir.path().join("out");
    let err = unzip(&archive, &out, &UnzipOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsafeEntryPath);
    assert!(fs::symlink_metadata(out.join("link")).is_err());
}

#[cfg(unix)]
#[test]
fn test_write_through_archived_symlink_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("link.zip");
    craft(&archive, |w| {
        w.add_directory("real").unwrap();
        w.add_symlink("escape", "real", None).unwrap();
        w.add_file("escape/file.txt", b"through", CompressionLevel::Store, None)
            .unwrap();
    });

    let out = dir.path().join("out");
    let err = unzip(&archive, &out, &UnzipOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsafeEntryPath);
    assert!(!out.join("real").join("file.txt").exists());
}

#[cfg(unix)]
#[test]
fn test_directory_entry_over_existing_symlink_rejected() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let outside = dir.path().join("outside");
    fs::create_dir_all(&outside).unwrap();
    fs::set_permissions(&outside, fs::Permissions::from_mode(0o700)).unwrap();
    let out = dir.path().join("out");
    fs::create_dir_all(&out).unwrap();
    std::os::unix::fs::symlink("../outside", out.join("escape")).unwrap();

    let archive = dir.path().join("dir.zip");
    craft(&archive, |w| w.add_directory("escape").unwrap());

    let err = unzip(&archive, &out, &UnzipOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsafeEntryPath);
    let mode = fs::metadata(&outside).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o700);
}

#[test]
fn test_corrupted_byte_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("data.txt");
    fs::write(&source, b"abcdefghijklmnop").unwrap();
    let archive = dir.path().join("data.zip");
    zip(
        &source,
        &archive,
        &ZipOptions::default().compression(CompressionLevel::Store),
    )
    .unwrap();

    let mut bytes = fs::read(&archive).unwrap();
    // 30-byte fixed header plus the eight-byte name, then four bytes in.
    bytes[30 + 8 + 4] ^= 0xFF;
    fs::write(&archive, &bytes).unwrap();

    let out = dir.path().join("out");
    let err = unzip(&archive, &out, &UnzipOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
    assert!(fs::read_dir(&out).unwrap().next().is_none());
}

#[cfg(feature = "aes-crypto")]
mod encrypted {
    use super::*;

    fn encrypted_docs(dir: &Path) -> std::path::PathBuf {
        let docs = dir.join("docs");
        fs::create_dir_all(docs.join("sub")).unwrap();
        fs::write(docs.join("a.txt"), b"alpha").unwrap();
        fs::write(docs.join("sub").join("b.txt"), b"beta").unwrap();
        let archive = dir.join("secret.zip");
        zip(&docs, &archive, &ZipOptions::default().password("hunter2")).unwrap();
        archive
    }

    #[test]
    fn test_password_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = encrypted_docs(dir.path());

        let out = dir.path().join("out");
        let report = unzip(&archive, &out, &UnzipOptions::default().password("hunter2")).unwrap();
        assert_eq!(report.entries, 3);
        assert!(report.warnings.is_empty());
        assert_eq!(fs::read(out.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(out.join("sub").join("b.txt")).unwrap(), b"beta");
    }

    #[test]
    fn test_password_required() {
        let dir = tempfile::tempdir().unwrap();
        let archive = encrypted_docs(dir.path());

        let out = dir.path().join("out");
        let err = unzip(&archive, &out, &UnzipOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PasswordRequired);
        assert!(!out.join("a.txt").exists());

        // An empty password counts as none.
        let err = unzip(&archive, &out, &UnzipOptions::default().password("")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PasswordRequired);
    }

    #[test]
    fn test_wrong_password() {
        let dir = tempfile::tempdir().unwrap();
        let archive = encrypted_docs(dir.path());

        let out = dir.path().join("out");
        let err = unzip(&archive, &out, &UnzipOptions::default().password("hunter3")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongPassword);
        assert!(!out.join("a.txt").exists());
    }

    #[test]
    fn test_password_is_ignored_for_plain_archives() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("plain.txt");
        fs::write(&source, b"plain").unwrap();
        let archive = dir.path().join("plain.zip");
        zip(&source, &archive, &ZipOptions::default()).unwrap();

        let out = dir.path().join("out");
        unzip(&archive, &out, &UnzipOptions::default().password("unused")).unwrap();
        assert_eq!(fs::read(out.join("plain.txt")).unwrap(), b"plain");
    }
}
