//! End-to-end tests for the archive engine (§4.3-§4.7).

use std::io::Cursor;

use arcquery::archive::{glob_match, AddFileOptions, Archive, ProxyFormat, StreamProxy};

fn roundtrip_archive() -> Archive<Cursor<Vec<u8>>> {
    let mut archive = Archive::create(Cursor::new(Vec::new()));
    archive
        .add_file("hello.txt", &mut &b"hello, world"[..], AddFileOptions::default())
        .unwrap();
    archive
        .add_file("dir/nested.txt", &mut &b"nested contents"[..], AddFileOptions::default())
        .unwrap();
    archive.add_folder("dir/empty").unwrap();
    archive.finalize().unwrap();
    archive
}

#[test]
fn write_then_reopen_preserves_entries() {
    let archive = roundtrip_archive();
    let bytes = archive.into_inner().into_inner();

    let mut reopened = Archive::open(Cursor::new(bytes)).unwrap();
    let names: Vec<&str> = reopened.entries().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["hello.txt", "dir/nested.txt", "dir/empty/"]);

    assert_eq!(reopened.read_entry("hello.txt").unwrap(), b"hello, world");
    assert_eq!(reopened.read_entry("dir/nested.txt").unwrap(), b"nested contents");
}

#[test]
fn remove_entry_compacts_and_keeps_siblings_readable() {
    let mut archive = roundtrip_archive();
    archive.remove_entry("hello.txt").unwrap();
    archive.finalize().unwrap();

    let bytes = archive.into_inner().into_inner();
    let mut reopened = Archive::open(Cursor::new(bytes)).unwrap();
    let names: Vec<&str> = reopened.entries().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["dir/nested.txt", "dir/empty/"]);
    assert_eq!(reopened.read_entry("dir/nested.txt").unwrap(), b"nested contents");
}

#[test]
fn finalize_on_empty_archive_truncates_to_zero() {
    let mut archive = Archive::create(Cursor::new(vec![1, 2, 3, 4]));
    archive.finalize().unwrap();
    assert_eq!(archive.into_inner().into_inner().len(), 0);
}

#[test]
fn glob_match_is_case_insensitive_and_supports_wildcards() {
    assert!(glob_match("*.txt", "readme.TXT"));
    assert!(glob_match("dir/*", "dir/nested.txt"));
    assert!(!glob_match("dir/*", "other/nested.txt"));
    assert!(glob_match("a?c", "ABC"));
    assert!(!glob_match("a?c", "abcd"));
}

#[test]
fn decompress_matching_collects_matched_entries() {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    let mut archive = roundtrip_archive();
    let collected: Rc<RefCell<HashMap<String, Vec<u8>>>> = Rc::new(RefCell::new(HashMap::new()));

    archive
        .decompress_matching(
            "*.txt",
            |name| {
                collected.borrow_mut().insert(name.to_string(), Vec::new());
                Some(Box::new(CollectSink { name: name.to_string(), collected: collected.clone() }) as Box<dyn std::io::Write>)
            },
            |_| arcquery::archive::FeedbackAction::Continue,
        )
        .unwrap();

    let collected = collected.borrow();
    assert_eq!(collected.len(), 2);
    assert_eq!(collected["hello.txt"], b"hello, world");
    assert_eq!(collected["dir/nested.txt"], b"nested contents");
}

struct CollectSink {
    name: String,
    collected: std::rc::Rc<std::cell::RefCell<std::collections::HashMap<String, Vec<u8>>>>,
}

impl std::io::Write for CollectSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.collected.borrow_mut().get_mut(&self.name).unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
#[test]
fn extract_matching_writes_files_folders_and_symlinks() {
    let mut archive = roundtrip_archive();
    archive
        .add_file(
            "dir/link.txt",
            &mut &b""[..],
            AddFileOptions {
                symlink_target: Some("nested.txt".to_string()),
                ..AddFileOptions::default()
            },
        )
        .unwrap();
    archive.finalize().unwrap();

    let tmp = tempfile::tempdir().unwrap();
    archive
        .extract_matching("*", tmp.path(), true, |_| arcquery::archive::FeedbackAction::Continue)
        .unwrap();

    assert_eq!(std::fs::read(tmp.path().join("hello.txt")).unwrap(), b"hello, world");
    assert_eq!(std::fs::read(tmp.path().join("dir/nested.txt")).unwrap(), b"nested contents");
    assert!(tmp.path().join("dir/empty").is_dir());

    let link = tmp.path().join("dir/link.txt");
    let meta = std::fs::symlink_metadata(&link).unwrap();
    assert!(meta.file_type().is_symlink());
    assert_eq!(std::fs::read_link(&link).unwrap(), std::path::Path::new("nested.txt"));
}

#[test]
fn stream_proxy_gzip_round_trip() {
    let payload = b"the quick brown fox jumps over the lazy dog".repeat(4);

    let mut compressed = Vec::new();
    let mut writer = StreamProxy::for_output(ProxyFormat::Gzip, &mut compressed);
    writer.write(&payload, false).unwrap();
    writer.write(&[], true).unwrap();

    let mut reader = StreamProxy::for_input(ProxyFormat::Gzip, Cursor::new(compressed));
    let mut out = Vec::new();
    loop {
        let mut buf = [0u8; 256];
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    assert_eq!(out, payload);
}

#[test]
fn stream_proxy_reset_clears_input_state() {
    let mut compressed = Vec::new();
    let mut writer = StreamProxy::for_output(ProxyFormat::Zlib, &mut compressed);
    writer.write(b"hello", true).unwrap();

    let mut reader = StreamProxy::for_input(ProxyFormat::Zlib, Cursor::new(compressed));
    let mut buf = [0u8; 16];
    let n = reader.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello");
    reader.reset();
    assert_eq!(reader.size_hint(), None);
}
