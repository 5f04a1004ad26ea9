use capzip::{ErrorKind, UnzipRequest, ZipRequest};
use std::fs;
use std::path::Path;

fn path(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

#[test]
fn test_requests_decode_from_host_json() -> Result<(), Box<dyn std::error::Error>> {
    let request: ZipRequest = serde_json::from_str(
        r#"{"source":"/data/docs","destination":"/data/docs.zip","password":"pw"}"#,
    )?;
    assert_eq!(
        request,
        ZipRequest::new("/data/docs", "/data/docs.zip").password("pw")
    );

    let request: UnzipRequest = serde_json::from_str(r#"{"source":"/data/docs.zip"}"#)?;
    assert_eq!(request.destination, "");
    assert_eq!(request.password, None);

    let err = capzip::unzip(&request).unwrap_err();
    assert_eq!(err.message(), "Destination path is required");
    assert_eq!(
        serde_json::to_value(&err)?,
        serde_json::json!({"code": "InvalidArgument", "message": "Destination path is required"})
    );
    Ok(())
}

#[test]
fn test_zip_unzip_through_requests() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let docs = dir.path().join("docs");
    fs::create_dir_all(docs.join("sub"))?;
    fs::write(docs.join("a.txt"), b"alpha")?;
    fs::write(docs.join("sub").join("b.txt"), b"beta")?;
    let archive = dir.path().join("docs.zip");
    let out = dir.path().join("out");

    capzip::zip(&ZipRequest::new(path(&docs), path(&archive)))?;
    capzip::unzip(&UnzipRequest::new(
        format!("file://{}", path(&archive)),
        format!("file://{}", path(&out)),
    ))?;
    assert_eq!(fs::read(out.join("a.txt"))?, b"alpha");
    assert_eq!(fs::read(out.join("sub").join("b.txt"))?, b"beta");
    Ok(())
}

#[test]
fn test_missing_sources() {
    let dir = tempfile::tempdir().unwrap();
    let missing = path(&dir.path().join("missing"));
    let out = path(&dir.path().join("out.zip"));

    let err = capzip::zip(&ZipRequest::new(&missing, &out)).unwrap_err();
    assert_eq!(err.message(), "Source path does not exist");
    assert_eq!(err.kind(), Some(ErrorKind::SourceNotFound));

    let err = capzip::unzip(&UnzipRequest::new(&missing, &out)).unwrap_err();
    assert_eq!(err.message(), "Source zip file does not exist");
}

#[test]
fn test_engine_failures_are_prefixed() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let garbage = dir.path().join("garbage.zip");
    fs::write(&garbage, b"definitely not a zip archive")?;

    let err = capzip::unzip(&UnzipRequest::new(
        path(&garbage),
        path(&dir.path().join("out")),
    ))
    .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::MalformedArchive));
    assert!(err.message().starts_with("Failed to extract zip archive: "));
    Ok(())
}

#[test]
fn test_empty_password_means_plain_archive() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("plain.txt");
    fs::write(&source, b"plain")?;
    let archive = dir.path().join("plain.zip");

    capzip::zip(&ZipRequest::new(path(&source), path(&archive)).password(""))?;
    let out = dir.path().join("out");
    capzip::unzip(&UnzipRequest::new(path(&archive), path(&out)))?;
    assert_eq!(fs::read(out.join("plain.txt"))?, b"plain");
    Ok(())
}

#[cfg(feature = "aes-crypto")]
#[test]
fn test_password_flow() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("secret.txt");
    fs::write(&source, b"top secret")?;
    let archive = dir.path().join("secret.zip");
    capzip::zip(&ZipRequest::new(path(&source), path(&archive)).password("hunter2"))?;

    let out = dir.path().join("out");
    let err = capzip::unzip(&UnzipRequest::new(path(&archive), path(&out))).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::PasswordRequired));
    assert!(err.message().starts_with("Failed to extract zip archive: "));

    let err = capzip::unzip(&UnzipRequest::new(path(&archive), path(&out)).password("nope"))
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::WrongPassword));

    capzip::unzip(&UnzipRequest::new(path(&archive), path(&out)).password("hunter2"))?;
    assert_eq!(fs::read(out.join("secret.txt"))?, b"top secret");
    Ok(())
}

#[cfg(not(feature = "aes-crypto"))]
#[test]
fn test_password_refused_without_aes() -> Result<(), Box<dyn std::error::Error>> {
    assert!(!capzip::supports_encryption());
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("secret.txt");
    fs::write(&source, b"top secret")?;
    let archive = dir.path().join("secret.zip");

    let err = capzip::zip(&ZipRequest::new(path(&source), path(&archive)).password("hunter2"))
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::UnsupportedFeature));
    assert!(err.message().starts_with("Failed to create zip archive: "));
    assert!(!archive.exists());
    Ok(())
}

#[test]
fn test_plugin_version_payload() -> Result<(), Box<dyn std::error::Error>> {
    assert_eq!(
        serde_json::to_value(capzip::get_plugin_version())?,
        serde_json::json!({"version": "7.0.2"})
    );
    Ok(())
}
