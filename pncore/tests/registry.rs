use std::{collections::BTreeSet, thread};

use pncore::{
    infection::has_preserve_none,
    registry::{NameSet, RegistryLoader, RegistryWriter},
    utils::conf::RecordPolicy,
};
use pninstr::modules::{Function, Linkage};
use tempfile::tempdir;

#[test]
fn written_names_are_loaded_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("roundtrip.list");

    let mut writer = RegistryWriter::new(&path, RecordPolicy::AllDefinitions);
    for name in ["parse", "lex", "parse", "emit"] {
        writer.record(&Function::definition(name, Linkage::Internal));
    }
    writer.record(&Function::declaration("memcpy", Linkage::External));
    drop(writer);

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content, "parse\nlex\nemit\n");

    let mut loader = RegistryLoader::new(&path);
    let mut lex = Function::definition("lex", Linkage::External);
    let mut other = Function::definition("other", Linkage::Internal);
    let mut memcpy = Function::declaration("memcpy", Linkage::External);

    assert!(loader.apply(&mut lex));
    assert!(has_preserve_none(&lex));
    assert!(!loader.apply(&mut other));
    assert!(!has_preserve_none(&other));
    assert!(!loader.apply(&mut memcpy));
    assert_eq!(loader.names().map(NameSet::len), Some(3));
}

#[test]
fn two_writers_in_one_process_share_the_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("two-writers.list");

    let mut first = RegistryWriter::new(&path, RecordPolicy::AllDefinitions);
    let mut second = RegistryWriter::new(&path, RecordPolicy::AllDefinitions);
    assert!(first.record(&Function::definition("a", Linkage::Internal)));
    assert!(second.record(&Function::definition("b", Linkage::Internal)));
    assert!(first.record(&Function::definition("c", Linkage::Internal)));
    // Deduplication is per writer, the loader absorbs duplicates across writers.
    assert!(second.record(&Function::definition("a", Linkage::Internal)));
    drop((first, second));

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().collect::<Vec<_>>(), vec!["a", "b", "c", "a"]);

    let names = NameSet::load(&path).unwrap();
    assert_eq!(names.iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
}

#[test]
fn concurrent_writers_never_interleave_lines() {
    const WRITERS: usize = 8;
    const NAMES_PER_WRITER: usize = 50;

    let dir = tempdir().unwrap();
    let path = dir.path().join("concurrent.list");

    thread::scope(|scope| {
        for writer_id in 0..WRITERS {
            let path = &path;
            scope.spawn(move || {
                let mut writer = RegistryWriter::new(path, RecordPolicy::AllDefinitions);
                for i in 0..NAMES_PER_WRITER {
                    let name = format!("writer{writer_id}_function_with_a_long_name_{i}");
                    assert!(writer.record(&Function::definition(name, Linkage::Internal)));
                }
            });
        }
    });

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.ends_with('\n'));

    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), WRITERS * NAMES_PER_WRITER);

    let expected: BTreeSet<String> = (0..WRITERS)
        .flat_map(|w| {
            (0..NAMES_PER_WRITER).map(move |i| format!("writer{w}_function_with_a_long_name_{i}"))
        })
        .collect();
    let found: BTreeSet<String> = lines.iter().map(|l| l.to_string()).collect();
    assert_eq!(found, expected);
}

#[test]
fn loader_does_not_see_names_written_after_first_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.list");
    std::fs::write(&path, "early\n").unwrap();

    let mut loader = RegistryLoader::new(&path);
    let mut early = Function::definition("early", Linkage::Internal);
    assert!(loader.apply(&mut early));

    let mut writer = RegistryWriter::new(&path, RecordPolicy::AllDefinitions);
    assert!(writer.record(&Function::definition("late", Linkage::Internal)));

    let mut late = Function::definition("late", Linkage::Internal);
    assert!(!loader.apply(&mut late));
    assert!(!has_preserve_none(&late));
}

#[test]
fn attributed_only_policy_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("attributed.list");

    let mut writer = RegistryWriter::new(&path, RecordPolicy::AttributedOnly);
    let mut hot = Function::definition("hot", Linkage::Internal);
    hot.add_fn_attr("no_callee_saved_registers", "1");
    assert!(writer.record(&hot));
    assert!(!writer.record(&Function::definition("cold", Linkage::Internal)));
    drop(writer);

    let names = NameSet::load(&path).unwrap();
    assert!(names.contains("hot"));
    assert!(!names.contains("cold"));
}
