use delameta::{endpoint, file, File};

#[test]
fn file_endpoint_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.txt");
    let path_str = path.to_str().unwrap();

    let mut writer = endpoint::open(&format!("file://{path_str}?mode=w")).unwrap();
    writer.write(b"first line").unwrap();
    drop(writer);

    let mut appender = endpoint::open(&format!("file://{path_str}?mode=wa")).unwrap();
    appender.write(b" and more").unwrap();
    drop(appender);

    let mut reader = endpoint::open(&format!("file://{path_str}")).unwrap();
    let data = reader.read().unwrap();
    assert_eq!(data, b"first line and more");
}

#[test]
fn unknown_scheme_is_usage_error() {
    let err = endpoint::open("gopher://somewhere").unwrap_err();
    assert_eq!(err.code, -1);
}

#[test]
fn invalid_file_mode_is_usage_error() {
    let err = endpoint::open("file:///tmp/whatever?mode=x").unwrap_err();
    assert_eq!(err.code, -1);
    assert!(err.message.contains("Invalid mode"));
}

#[test]
fn missing_file_reports_errno() {
    let err = endpoint::open("file:///definitely/not/here").unwrap_err();
    assert!(err.code > 0);
}

#[test]
fn file_size_and_into_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blob.bin");
    std::fs::write(&path, vec![0xAB; 5000]).unwrap();

    let file = File::open(file::Args {
        path: path.to_str().unwrap().to_string(),
        mode: String::new(),
    })
    .unwrap();
    assert_eq!(file.file_size().unwrap(), 5000);

    let mut collected = Vec::new();
    file.into_stream().unwrap().drain(|chunk| collected.extend_from_slice(chunk));
    assert_eq!(collected.len(), 5000);
    assert!(collected.iter().all(|&b| b == 0xAB));
}

#[test]
fn read_as_stream_caps_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.bin");
    std::fs::write(&path, vec![0x5A; 4096]).unwrap();

    let desc = endpoint::open(&format!("file://{}", path.to_str().unwrap()))
        .unwrap()
        .into_shared();
    let mut chunks = Vec::new();
    desc.read_as_stream(3000).drain(|chunk| chunks.push(chunk.len()));
    assert_eq!(chunks.iter().sum::<usize>(), 3000);
    assert!(chunks.iter().all(|&n| n <= delameta::MAX_HANDLE_SZ));
}

#[test]
fn tcp_endpoint_to_closed_port_fails() {
    // nothing listens on this port; connect must fail, not hang
    let err = endpoint::open("tcp://127.0.0.1:1?connection-timeout=1").unwrap_err();
    assert!(err.code != 0);
}
