// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Staging job files and libraries into the sandbox filesystem

use anyhow::Result;
use polyframe_render::vfs::{
    AssetLibraries, FileContent, LibraryRef, MemFs, SandboxFs, Stager, LIBRARY_ROOT,
};
use std::collections::BTreeMap;
use std::io::Write;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

fn library_dir() -> Result<TempDir> {
    let dir = TempDir::new()?;

    // Plain directory library
    let mcad = dir.path().join("MCAD");
    std::fs::create_dir_all(mcad.join("gears"))?;
    std::fs::write(mcad.join("units.scad"), "mm = 1;")?;
    std::fs::write(mcad.join("gears/involute.scad"), "module gear() {}")?;

    // Zipped library with a shared top-level folder
    let file = std::fs::File::create(dir.path().join("BOSL2.zip"))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    zip.start_file("BOSL2-master/std.scad", options)?;
    zip.write_all(b"include <shapes3d.scad>")?;
    zip.start_file("BOSL2-master/shapes3d.scad", options)?;
    zip.write_all(b"module cuboid() {}")?;
    zip.finish()?;

    Ok(dir)
}

#[test]
fn test_traversal_paths_never_reach_the_sandbox() -> Result<()> {
    let mut fs = MemFs::new();
    let mut stager = Stager::new();
    let files: BTreeMap<String, FileContent> = [
        ("../../etc/shadow", "x"),
        ("parts/../../escape.scad", "x"),
        ("C:\\Windows\\system.ini", "x"),
    ]
    .into_iter()
    .map(|(path, text)| (path.to_string(), FileContent::from(text)))
    .collect();

    let report = stager.mount(&mut fs, &files, true)?;

    assert!(report.mounted.is_empty());
    assert_eq!(report.rejected.len(), 3);
    assert!(fs.files().is_empty());
    Ok(())
}

#[test]
fn test_binary_content_is_decoded() -> Result<()> {
    let json = r#"{"logo.png": {"base64": "iVBORw=="}, "main.scad": "import(\"logo.png\");"}"#;
    let files: BTreeMap<String, FileContent> = serde_json::from_str(json)?;

    let mut fs = MemFs::new();
    Stager::new().mount(&mut fs, &files, true)?;

    assert_eq!(fs.read_file("/work/logo.png")?, vec![0x89, b'P', b'N', b'G']);
    assert_eq!(fs.read_file("/work/main.scad")?, b"import(\"logo.png\");".to_vec());
    Ok(())
}

#[test]
fn test_mount_directory_and_zip_libraries() -> Result<()> {
    let dir = library_dir()?;
    let source = AssetLibraries::new(dir.path());
    let mut fs = MemFs::new();
    let mut stager = Stager::new();

    let report = stager.mount_libraries(
        &mut fs,
        &source,
        &[LibraryRef::new("MCAD"), LibraryRef::new("BOSL2"), LibraryRef::new("missing")],
    );

    assert_eq!(report.available, vec!["MCAD".to_string(), "BOSL2".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "missing");

    assert!(fs.exists("/libraries/MCAD/gears/involute.scad"));
    assert!(fs.exists("/libraries/BOSL2/std.scad"));
    assert!(!fs.exists("/libraries/BOSL2/BOSL2-master"));
    assert_eq!(stager.library_count(), 2);
    Ok(())
}

#[test]
fn test_library_mounts_persist_and_self_heal() -> Result<()> {
    let dir = library_dir()?;
    let source = AssetLibraries::new(dir.path());
    let mut fs = MemFs::new();
    let mut stager = Stager::new();
    let mcad = [LibraryRef::new("MCAD")];

    stager.mount_libraries(&mut fs, &source, &mcad);

    // Job-file cleanup leaves libraries alone
    stager.clear_files(&mut fs);
    assert!(fs.exists("/libraries/MCAD/units.scad"));

    // Second mount is a no-op while the tree is intact
    let report = stager.mount_libraries(&mut fs, &source, &mcad);
    assert!(report.repaired.is_empty());

    // Something removed the tree behind our back
    fs.remove_file("/libraries/MCAD/units.scad")?;
    fs.remove_file("/libraries/MCAD/gears/involute.scad")?;
    fs.remove_dir("/libraries/MCAD/gears")?;
    fs.remove_dir("/libraries/MCAD")?;

    let report = stager.mount_libraries(&mut fs, &source, &mcad);
    assert_eq!(report.repaired, vec!["MCAD".to_string()]);
    assert!(fs.exists("/libraries/MCAD/units.scad"));
    Ok(())
}

#[test]
fn test_clear_libraries() -> Result<()> {
    let dir = library_dir()?;
    let source = AssetLibraries::new(dir.path());
    let mut fs = MemFs::new();
    let mut stager = Stager::new();
    stager.mount_libraries(&mut fs, &source, &[LibraryRef::new("BOSL2")]);

    let report = stager.clear_libraries(&mut fs);

    assert_eq!(report.removed, 2);
    assert!(report.failures.is_empty());
    assert!(!fs.exists(LIBRARY_ROOT));
    assert!(!stager.is_library_mounted("BOSL2"));
    Ok(())
}

#[test]
fn test_library_identifier_cannot_escape() {
    let mut fs = MemFs::new();
    let mut stager = Stager::new();
    let source = AssetLibraries::new("/nonexistent");

    let report = stager.mount_libraries(&mut fs, &source, &[LibraryRef::new("../etc")]);
    assert_eq!(report.failed.len(), 1);
    assert!(fs.files().is_empty());
}
