//! Registry Tests
//!
//! Recency ordering, unloading and multi-entry round trips through a
//! full resolver.
//!
//! # Running Tests
//! ```bash
//! cargo test --test registry_tests
//! ```

mod common;

use common::{dir_entries, open_resolver, write_container, CountingCompiler};
use kiln_loader::UnitLoader;
use std::fs;
use tempfile::TempDir;

// ===== Recency =====

#[test]
fn test_reassigned_name_resolves_new_content() {
    let dir = TempDir::new().unwrap();
    let resolver = open_resolver(&dir, CountingCompiler::new());
    let a = write_container(
        &dir.path().join("a.zip"),
        &[("pkg/Shared.class", b"from-a")],
    );
    let b = write_container(
        &dir.path().join("b.zip"),
        &[("pkg/Shared.class", b"from-b"), ("pkg/OnlyB.class", b"b")],
    );

    let registry = resolver.registry();
    registry.register("a", &a, None).unwrap();
    registry.register("b", &b, None).unwrap();
    assert_eq!(
        resolver.load_class("pkg.Shared").unwrap().bytecode(),
        Some(&b"from-b"[..])
    );

    // A's content under B's name
    registry.register("b", &a, None).unwrap();

    let symbol = resolver.load_class("pkg.Shared").unwrap();
    assert_eq!(symbol.bytecode(), Some(&b"from-a"[..]));
    assert_eq!(symbol.unit(), "b");
    assert_eq!(resolver.unit("b").unwrap().artifact(), a.as_path());
    assert!(resolver.load_class("pkg.OnlyB").is_err());
    assert_eq!(resolver.unit_names(), vec!["a", "b"]);
}

#[test]
fn test_reloaded_jar_moves_to_front() {
    let dir = TempDir::new().unwrap();
    let resolver = open_resolver(&dir, CountingCompiler::new());
    let first = write_container(&dir.path().join("first.zip"), &[("Dup.class", b"first")]);
    let second = write_container(&dir.path().join("second.zip"), &[("Dup.class", b"second")]);

    resolver.load_jar(&first).unwrap();
    resolver.load_jar(&second).unwrap();
    assert_eq!(
        resolver.load_class("Dup").unwrap().bytecode(),
        Some(&b"second"[..])
    );

    resolver.load_jar(&first).unwrap();
    assert_eq!(
        resolver.load_class("Dup").unwrap().bytecode(),
        Some(&b"first"[..])
    );
    assert_eq!(resolver.unit_names().len(), 2);
}

// ===== Unloading =====

#[test]
fn test_unload_clears_state() {
    let dir = TempDir::new().unwrap();
    let resolver = open_resolver(&dir, CountingCompiler::new());
    let jar = write_container(&dir.path().join("lib.zip"), &[("lib/Util.class", b"util")]);

    resolver.load_jar(&jar).unwrap();
    resolver.define_class("gen.Script", b"script").unwrap();
    assert!(resolver.load_class("lib.Util").is_ok());

    resolver.unload_all_dex().unwrap();

    assert!(resolver.registry().is_empty());
    assert!(resolver.load_class("lib.Util").is_err());
    assert!(resolver.load_class("gen.Script").is_err());
    assert_eq!(dir_entries(resolver.cache_dir()), vec!["libs", "staging"]);
    assert!(dir_entries(&resolver.cache_dir().join("staging")).is_empty());
    assert!(dir_entries(resolver.libs_dir()).is_empty());
}

#[test]
fn test_load_after_unload_recompiles() {
    let dir = TempDir::new().unwrap();
    let compiler = CountingCompiler::new();
    let resolver = open_resolver(&dir, compiler.clone());
    let jar = write_container(&dir.path().join("lib.zip"), &[("A.class", b"a")]);

    resolver.load_jar(&jar).unwrap();
    resolver.unload_all_dex().unwrap();
    resolver.load_jar(&jar).unwrap();

    assert_eq!(compiler.invocations(), 2);
    assert!(resolver.load_class("A").is_ok());
}

// ===== Round Trip =====

#[test]
fn test_container_round_trip() {
    let dir = TempDir::new().unwrap();
    let resolver = open_resolver(&dir, CountingCompiler::new());

    let names: Vec<String> = (0..12).map(|i| format!("gen/n{}/Sym{}.class", i % 3, i)).collect();
    let bodies: Vec<Vec<u8>> = (0..12).map(|i| vec![i as u8; i + 1]).collect();
    let entries: Vec<(&str, &[u8])> = names
        .iter()
        .map(String::as_str)
        .zip(bodies.iter().map(Vec::as_slice))
        .collect();
    let mut all = entries.clone();
    all.push(("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"));
    let jar = write_container(&dir.path().join("gen.zip"), &all);

    resolver.load_jar(&jar).unwrap();

    let unit_name = resolver.unit_names().pop().unwrap();
    let unit = resolver.unit(&unit_name).unwrap();
    let mut expected: Vec<String> = (0..12).map(|i| format!("gen.n{}.Sym{}", i % 3, i)).collect();
    expected.sort();
    let mut found = unit.symbol_names();
    found.sort();
    assert_eq!(found, expected);

    for (i, name) in expected.iter().enumerate() {
        let symbol = resolver.load_class(name).unwrap();
        let index: usize = name.rsplit("Sym").next().unwrap().parse().unwrap();
        assert_eq!(symbol.bytecode(), Some(&bodies[index][..]), "entry {}", i);
    }
    assert!(resolver.load_class("gen.n0.Sym12").is_err());
    assert!(resolver.load_class("META-INF.MANIFEST").is_err());
}

#[test]
fn test_load_dex_registers_prebuilt_artifact() {
    let dir = TempDir::new().unwrap();
    let compiler = CountingCompiler::new();
    let resolver = open_resolver(&dir, compiler.clone());
    let dex = write_container(&dir.path().join("prebuilt.dex"), &[("pre/Built.class", b"pb")]);

    let handle = resolver.load_dex(&dex).unwrap();

    assert_eq!(handle.name(), "prebuilt.dex");
    assert!(!handle.is_temporary());
    assert_eq!(compiler.invocations(), 0);
    assert_eq!(
        resolver.load_class("pre.Built").unwrap().bytecode(),
        Some(&b"pb"[..])
    );
    assert!(fs::metadata(&dex).is_ok());
}
