// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::sync::{Arc, Mutex};

use omics_portal_client::{FakePortalApi, PortalApi, PortalConfig, PortalSession, RetryPolicy};
use omics_portal_model::DatasetId;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

struct BufferWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BufferWriter(Arc::clone(&self.0))
    }
}

impl io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "lock poisoned"))?;
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn json_lines(sink: &SharedBuffer) -> Vec<serde_json::Value> {
    let bytes = sink.0.lock().expect("lock output").clone();
    let text = String::from_utf8(bytes).expect("utf8 log output");
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("json log line"))
        .collect()
}

#[tokio::test]
async fn dataset_switch_logs_structured_fields() {
    let sink = SharedBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(sink.clone())
        .json()
        .with_max_level(Level::INFO)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let api: Arc<dyn PortalApi> = Arc::new(FakePortalApi::default());
    let session = PortalSession::new(
        api,
        PortalConfig {
            retry: RetryPolicy::no_retry(),
            apply_dataset_defaults: false,
            ..PortalConfig::default()
        },
    );
    session
        .switch_dataset(Some(DatasetId::parse("pd-2024").expect("dataset")))
        .await
        .expect("switch");

    let lines = json_lines(&sink);
    let switched = lines
        .iter()
        .find(|l| {
            l.pointer("/fields/message").and_then(|v| v.as_str()) == Some("dataset switched")
        })
        .expect("dataset switched line");
    assert_eq!(switched.get("level").and_then(|v| v.as_str()), Some("INFO"));
    let fields = switched.get("fields").expect("fields object");
    assert_eq!(fields.get("from").and_then(|v| v.as_str()), Some("-"));
    assert_eq!(fields.get("to").and_then(|v| v.as_str()), Some("pd-2024"));
    assert!(lines.iter().all(|l| l.get("level").and_then(|v| v.as_str()) != Some("DEBUG")));
}
