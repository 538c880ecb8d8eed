use std::cell::RefCell;
use std::sync::Arc;

use assert_matches::assert_matches;

use packshift::archive::{ArchiveBuilder, SourceArchive};
use packshift::domain::{ArchiveEntry, ConversionTarget, VersionEntry};
use packshift::error::PackError;
use packshift::manifest::{self, MANIFEST_PATH};
use packshift::pipeline::{
    ConversionOptions, ConversionRequest, Pipeline, ProgressEvent, ProgressSink, Stage,
};
use packshift::versions::VersionTable;

#[derive(Default)]
struct RecordingSink {
    events: RefCell<Vec<ProgressEvent>>,
}

impl RecordingSink {
    fn stages(&self) -> Vec<Stage> {
        self.events.borrow().iter().map(|event| event.stage).collect()
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.borrow_mut().push(event);
    }
}

fn table() -> Arc<VersionTable> {
    Arc::new(VersionTable::from_entries([
        VersionEntry::release("1.20", 15),
        VersionEntry::release("1.19", 9),
        VersionEntry::release("1.12", 3),
        VersionEntry::release("1.9", 2),
        VersionEntry::release("1.8", 1),
    ]))
}

fn pack_entries() -> Vec<ArchiveEntry> {
    vec![
        ArchiveEntry::file(
            MANIFEST_PATH,
            br#"{"pack":{"pack_format": 4, "description":"x"}}"#.to_vec(),
        ),
        ArchiveEntry::directory("assets/"),
        ArchiveEntry::directory("assets/minecraft/"),
        ArchiveEntry::file("assets/minecraft/sounds.json", b"{\"a\":1}".to_vec()),
        ArchiveEntry::file("pack.png", (0u8..=255).collect()),
    ]
}

fn zip(entries: &[ArchiveEntry]) -> Vec<u8> {
    let mut builder = ArchiveBuilder::new();
    for entry in entries {
        builder.add(entry).unwrap();
    }
    builder.finalize().unwrap()
}

fn read_back(bytes: &[u8]) -> Vec<ArchiveEntry> {
    SourceArchive::open(bytes).unwrap().read_entries().unwrap()
}

#[test]
fn single_target_rewrites_only_the_format_field() {
    let bytes = zip(&pack_entries());
    let sink = RecordingSink::default();
    let request = ConversionRequest {
        filename: "MyPack.zip",
        archive: &bytes,
        target: ConversionTarget::format(15),
        options: ConversionOptions::default(),
    };

    let result = Pipeline::new(table()).run(&request, &sink).unwrap();
    assert_eq!(result.outputs.len(), 1);
    assert!(result.bundle.is_none());
    assert_eq!(result.outputs[0].filename, "MyPack_v15.zip");

    let entries = read_back(&result.outputs[0].bytes);
    for (before, after) in pack_entries().iter().zip(&entries) {
        assert_eq!(before.path, after.path);
        if before.path == MANIFEST_PATH {
            let payload = manifest::decode(after.bytes()).unwrap();
            assert_eq!(payload.format_code(), 15);
            let json = serde_json::Value::Object(payload.as_json().clone());
            assert_eq!(
                json,
                serde_json::json!({"pack": {"pack_format": 15, "description": "x"}})
            );
        } else {
            assert_eq!(before, after);
        }
    }
    assert_eq!(entries.len(), pack_entries().len());
    assert_eq!(sink.stages().last(), Some(&Stage::Ready));
}

#[test]
fn smart_naming_replaces_detected_version() {
    let bytes = zip(&pack_entries());
    let request = ConversionRequest {
        filename: "MyPack_1.19.zip",
        archive: &bytes,
        target: ConversionTarget::labelled(15, "1.20"),
        options: ConversionOptions {
            smart_naming: true,
            ..Default::default()
        },
    };
    let result = Pipeline::new(table())
        .run(&request, &RecordingSink::default())
        .unwrap();
    assert_eq!(result.outputs[0].filename, "MyPack_1.20.zip");
}

#[test]
fn ambiguous_filename_stops_single_run() {
    let bytes = zip(&pack_entries());
    let sink = RecordingSink::default();
    let request = ConversionRequest {
        filename: "MyPack_1.19_and_1.20.zip",
        archive: &bytes,
        target: ConversionTarget::labelled(15, "1.20"),
        options: ConversionOptions {
            smart_naming: true,
            ..Default::default()
        },
    };
    let err = Pipeline::new(table()).run(&request, &sink).unwrap_err();
    assert_matches!(err, PackError::AmbiguousFilenameVersion { ref versions, .. } if versions.len() == 2);
    assert!(!sink.stages().contains(&Stage::Loading));
    assert!(sink.events.borrow().last().unwrap().failed);
}

#[test]
fn range_produces_one_output_per_label_and_a_bundle() {
    let bytes = zip(&pack_entries());
    let sink = RecordingSink::default();
    let request = ConversionRequest {
        filename: "MyPack.zip",
        archive: &bytes,
        target: ConversionTarget::range("1.12", "1.8"),
        options: ConversionOptions {
            bundle: true,
            ..Default::default()
        },
    };
    let result = Pipeline::new(table()).run(&request, &sink).unwrap();

    let names = result
        .outputs
        .iter()
        .map(|output| output.filename.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, ["MyPack_1.12.zip", "MyPack_1.9.zip", "MyPack_1.8.zip"]);

    for (output, code) in result.outputs.iter().zip([3, 2, 1]) {
        let entries = read_back(&output.bytes);
        let manifest_entry = entries
            .iter()
            .find(|entry| entry.path == MANIFEST_PATH)
            .unwrap();
        assert_eq!(
            manifest::decode(manifest_entry.bytes()).unwrap().format_code(),
            code
        );
    }

    let bundle = result.bundle.as_ref().unwrap();
    assert_eq!(bundle.filename, "MyPack_bulk.zip");
    let inner = read_back(&bundle.bytes);
    assert_eq!(inner.len(), 3);
    assert_eq!(inner[0].path, "MyPack_1.12.zip");
    assert_eq!(inner[0].bytes(), result.outputs[0].bytes.as_slice());
    assert_eq!(result.deliverables().len(), 1);

    let stages = sink.stages();
    assert!(stages.contains(&Stage::IteratingVersions));
    assert_eq!(
        stages.iter().filter(|stage| **stage == Stage::Patching).count(),
        3
    );
    assert!(stages.contains(&Stage::Bundling));
}

#[test]
fn range_order_does_not_change_outputs() {
    let bytes = zip(&pack_entries());
    let pipeline = Pipeline::new(table());
    let run = |from: &str, to: &str| {
        let request = ConversionRequest {
            filename: "MyPack.zip",
            archive: &bytes,
            target: ConversionTarget::range(from, to),
            options: ConversionOptions::default(),
        };
        pipeline
            .run(&request, &RecordingSink::default())
            .unwrap()
            .outputs
            .into_iter()
            .map(|output| (output.filename, output.format_code))
            .collect::<Vec<_>>()
    };
    assert_eq!(run("1.12", "1.8"), run("1.8", "1.12"));
}

#[test]
fn missing_manifest_fails_before_any_copy() {
    let entries = vec![
        ArchiveEntry::directory("assets/"),
        ArchiveEntry::file("pack.png", vec![1, 2, 3]),
    ];
    let bytes = zip(&entries);
    let sink = RecordingSink::default();
    let request = ConversionRequest {
        filename: "MyPack.zip",
        archive: &bytes,
        target: ConversionTarget::format(15),
        options: ConversionOptions::default(),
    };
    let err = Pipeline::new(table()).run(&request, &sink).unwrap_err();
    assert_matches!(err, PackError::ManifestEntryNotFound(_));

    let stages = sink.stages();
    assert!(!stages.contains(&Stage::Patching));
    assert!(!stages.contains(&Stage::Finalizing));
    let last = sink.events.borrow().last().cloned().unwrap();
    assert!(last.failed);
    assert_eq!(last.stage, Stage::Loading);
}

#[test]
fn malformed_manifest_is_reported() {
    let bytes = zip(&[ArchiveEntry::file(MANIFEST_PATH, b"{ nope".to_vec())]);
    let request = ConversionRequest {
        filename: "MyPack.zip",
        archive: &bytes,
        target: ConversionTarget::format(3),
        options: ConversionOptions::default(),
    };
    assert_matches!(
        Pipeline::new(table()).run(&request, &RecordingSink::default()),
        Err(PackError::MalformedManifest(_))
    );
}

#[test]
fn range_with_ambiguous_filename_falls_back_to_suffixes() {
    let bytes = zip(&pack_entries());
    let request = ConversionRequest {
        filename: "MyPack_1.19_and_1.20.zip",
        archive: &bytes,
        target: ConversionTarget::range("1.12", "1.8"),
        options: ConversionOptions {
            smart_naming: true,
            bundle: true,
            ..Default::default()
        },
    };
    let result = Pipeline::new(table())
        .run(&request, &RecordingSink::default())
        .unwrap();

    let names = result
        .outputs
        .iter()
        .map(|output| output.filename.as_str())
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        [
            "MyPack_1.19_and_1.20_1.12.zip",
            "MyPack_1.19_and_1.20_1.9.zip",
            "MyPack_1.19_and_1.20_1.8.zip",
        ]
    );
    assert_eq!(
        result.bundle.map(|bundle| bundle.filename).as_deref(),
        Some("MyPack_1.19_and_1.20_bulk.zip")
    );
}
