mod common;

use std::io;
use std::sync::{Arc, Mutex};

use callhub_call_core::logging::{build_subscriber, LoggingConfig};
use callhub_call_core::prelude::*;
use common::Harness;

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

#[tokio::test]
async fn test_operations_log_inside_their_call_span() {
    let out = Captured::default();
    let writer = out.clone();
    let config = LoggingConfig::default().with_filter("callhub_call_core=debug").without_ansi();
    let subscriber = build_subscriber(&config, move || writer.clone()).unwrap();
    let _default = tracing::subscriber::set_default(subscriber);

    let h = Harness::new();
    let buyer = h.online("buyer");
    let seller = h.online("seller");
    let call = h.ringing_call(&buyer, &seller).await;
    h.orchestrator
        .respond(&call.call_id, &seller.id, CallDecision::Decline)
        .await
        .unwrap();

    let lines = out.lines();
    let initiate = format!("op=\"initiate\" call_id={} participant=buyer", call.call_id);
    let respond = format!("op=\"respond\" call_id={} participant=seller", call.call_id);
    assert!(lines.iter().any(|l| l.contains(&initiate) && l.contains("ringing")), "{lines:#?}");
    assert!(lines.iter().any(|l| l.contains(&respond) && l.contains("Finalized")), "{lines:#?}");

    // Presence changes are not tied to a call
    let connected = lines.iter().find(|l| l.contains("Participant buyer connected")).unwrap();
    assert!(!connected.contains("call{"));
}
