use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use devloop::fs::mock::MockFileSystem;
use devloop::watch::ImportGraphExpander;

fn expand(fs: &MockFileSystem, root: &str, source_root: Option<&str>) -> BTreeSet<PathBuf> {
    let mut out = BTreeSet::new();
    ImportGraphExpander::new(fs, source_root.map(PathBuf::from)).expand(Path::new(root), &mut out);
    out
}

fn set(paths: &[&str]) -> BTreeSet<PathBuf> {
    paths.iter().map(PathBuf::from).collect()
}

#[test]
fn cyclic_imports_reach_a_fixed_point() {
    let fs = MockFileSystem::new();
    fs.add_file("/proj/app/main.go", "package main\n\nimport \"../lib\"\n");
    fs.add_file("/proj/lib/lib.go", "package lib\n\nimport \"../app\"\n");

    assert_eq!(expand(&fs, "/proj/app", None), set(&["/proj/app", "/proj/lib"]));
}

#[test]
fn imports_are_followed_transitively() {
    let fs = MockFileSystem::new();
    fs.add_file(
        "/proj/a/a.go",
        "package a\n\nimport (\n\t\"fmt\"\n\t\"../b\"\n)\n\nfunc A() { fmt.Println() }\n",
    );
    fs.add_file("/proj/b/b.go", "package b\nimport c \"../c\"\nvar _ = c.X\n");
    fs.add_file("/proj/c/c.go", "package c\nconst X = 1\n");

    assert_eq!(
        expand(&fs, "/proj/a", None),
        set(&["/proj/a", "/proj/b", "/proj/c"])
    );
}

#[test]
fn source_root_resolution_finds_library_packages() {
    let fs = MockFileSystem::new();
    fs.add_file(
        "/proj/app/main.go",
        "package main\nimport \"github.com/acme/util\"\n",
    );
    fs.add_file("/gopath/src/github.com/acme/util/util.go", "package util\n");

    assert_eq!(
        expand(&fs, "/proj/app", Some("/gopath")),
        set(&["/proj/app", "/gopath/src/github.com/acme/util"])
    );
    assert_eq!(expand(&fs, "/proj/app", None), set(&["/proj/app"]));
}

#[test]
fn directories_without_parseable_sources_are_not_added() {
    let fs = MockFileSystem::new();
    fs.add_file("/proj/app/main.go", "package main\nimport (\n\"../docs\"\n\"../missing\"\n)\n");
    fs.add_file("/proj/docs/notes.go", "this is not go source\n");
    fs.add_file("/proj/docs/readme.md", "package docs\n");

    assert_eq!(expand(&fs, "/proj/app", None), set(&["/proj/app"]));
}

#[test]
fn each_directory_is_reported_once() {
    let fs = MockFileSystem::new();
    fs.add_file("/proj/app/a.go", "package main\nimport \"../shared\"\n");
    fs.add_file("/proj/app/b.go", "package main\nimport \"../shared\"\n");
    fs.add_file("/proj/shared/s.go", "package shared\n");
    fs.add_file("/proj/shared/t.go", "package shared\nimport \"../app\"\n");

    let out = expand(&fs, "/proj/app", None);
    assert_eq!(out.len(), 2);
    assert_eq!(out, set(&["/proj/app", "/proj/shared"]));
}
