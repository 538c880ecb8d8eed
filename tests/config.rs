use std::io::Write;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use packshift::config::ConfigLoader;
use packshift::error::PackError;
use packshift::versions::DEFAULT_SOURCE_URL;

fn write_config(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file
}

#[test]
fn loads_options_from_file() {
    let file = write_config(
        r#"{"schema_version": 1, "smart_naming": true, "bundle": true, "output_dir": "out"}"#,
    );
    let resolved = ConfigLoader::resolve(file.path().to_str()).unwrap();
    assert!(resolved.options.smart_naming);
    assert!(resolved.options.bundle);
    assert!(!resolved.options.include_snapshots);
    assert_eq!(resolved.output_dir, Utf8PathBuf::from("out"));
    assert_eq!(resolved.source_url, DEFAULT_SOURCE_URL);
}

#[test]
fn blank_source_url_falls_back_to_default() {
    let file = write_config(r#"{"source_url": "   "}"#);
    let resolved = ConfigLoader::resolve(file.path().to_str()).unwrap();
    assert_eq!(resolved.source_url, DEFAULT_SOURCE_URL);
}

#[test]
fn explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.json");
    assert_matches!(
        ConfigLoader::resolve(missing.to_str()),
        Err(PackError::ConfigRead(_))
    );
}

#[test]
fn invalid_json_is_a_parse_error() {
    let file = write_config("{ not json");
    assert_matches!(
        ConfigLoader::resolve(file.path().to_str()),
        Err(PackError::ConfigParse(_))
    );
}
