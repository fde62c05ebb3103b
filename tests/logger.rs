use std::io::{self, Write};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn existing_subscriber_receives_the_fallback_warning() {
    let captured = Captured::default();
    let writer = captured.clone();
    tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .init();

    let dir = std::env::temp_dir().join(format!("paintcore-host-log-{}", std::process::id()));
    let path = dir.join("session.log");
    paintcore::logger::init(&path).unwrap();
    assert_eq!(paintcore::logger::log_path(), Some(&path));

    let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("global subscriber already set"), "{output}");
    assert!(output.contains("paintcore session started"));
    let _ = std::fs::remove_dir_all(&dir);
}
