//! Override lookup through to archive contents

use pkgproxy_package::{
    ArchiveCache, Archiver, Compression, Digests, Override, OverrideTable, PackageResolver,
};
use std::fs;
use std::io::Read;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

#[test]
fn test_matched_override_produces_servable_archive() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("storefront");
    let acme = temp.path().join("acme-pkgs");

    write(
        &project,
        "package.json",
        r#"{ "name": "storefront", "dependencies": { "@acme/ui": "^1.0.0", "lodash": "^4.17.0" } }"#,
    );
    write(&acme, "ui/package.json", r#"{ "name": "@acme/ui", "version": "1.0.0" }"#);
    write(&acme, "ui/src/button.js", "export const button = 'ok';");
    write(&acme, "ui/node_modules/left-pad/index.js", "nope");

    let table = OverrideTable::new(vec![
        Override::new("@acme", "https://registry.example.com", &acme).unwrap(),
    ]);
    assert!(table.matching("lodash").is_none());
    let rule = table.matching("@acme/ui").unwrap();

    let resolver = PackageResolver::new(
        &project,
        Archiver::new(ArchiveCache::new(temp.path().join("cache")))
            .with_compression(Compression::Gzip),
    )
    .with_tarball_base("http://127.0.0.1:20001");

    let resolved = resolver.resolve(rule, "@acme/ui").unwrap();
    let version = resolved.document.latest().unwrap();
    assert_eq!(
        version.dist.tarball,
        "http://127.0.0.1:20001/files/acme_ui_1_0_0.tgz"
    );

    let digests = Digests::of_bytes(&fs::read(&resolved.archive).unwrap());
    assert_eq!(digests.integrity, version.dist.integrity);
    assert_eq!(digests.shasum, version.dist.shasum);

    let decoder = flate2::read::GzDecoder::new(fs::File::open(&resolved.archive).unwrap());
    let mut archive = tar::Archive::new(decoder);
    let mut names = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry.path().unwrap().to_string_lossy().into_owned();
        if name == "package/src/button.js" {
            let mut contents = String::new();
            entry.read_to_string(&mut contents).unwrap();
            assert_eq!(contents, "export const button = 'ok';");
        }
        names.push(name);
    }
    names.sort();
    assert_eq!(names, vec!["package/package.json", "package/src/button.js"]);
}

#[test]
fn test_source_edits_are_picked_up_without_restart() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("app");
    let acme = temp.path().join("acme-pkgs");

    write(&project, "package.json", r#"{ "dependencies": { "@acme/ui": "^1.0.0" } }"#);
    write(&acme, "ui/package.json", r#"{ "name": "@acme/ui", "version": "1.0.0" }"#);

    let rule = Override::new("@acme", "https://registry.example.com", &acme).unwrap();
    let resolver = PackageResolver::new(
        &project,
        Archiver::new(ArchiveCache::new(temp.path().join("cache"))),
    );

    let first = resolver.resolve(&rule, "@acme/ui").unwrap();
    assert_eq!(
        first.document.latest().unwrap().dist.tarball,
        "/files/acme_ui_1_0_0.tar"
    );

    write(&acme, "ui/package.json", r#"{ "name": "@acme/ui", "version": "1.1.0" }"#);
    let second = resolver.resolve(&rule, "@acme/ui").unwrap();
    assert_eq!(second.document.dist_tags.latest, "1.1.0");

    write(&acme, "ui/package.json", r#"{ "name": "@acme/ui", "version": "2.0.0" }"#);
    assert!(resolver.resolve(&rule, "@acme/ui").unwrap_err().is_version_drift());
}
