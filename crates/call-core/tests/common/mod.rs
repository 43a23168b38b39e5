#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use callhub_call_core::prelude::*;
use callhub_call_core::signaling::MessageKind;
use callhub_call_core::StaticBlockList;

pub const SAVE_WAIT: Duration = Duration::from_secs(2);

pub struct Harness {
    pub orchestrator: Arc<CallOrchestrator>,
    pub transport: Arc<ChannelTransport>,
    pub records: Arc<InMemoryCallRecords>,
    pub blocks: Arc<StaticBlockList>,
}

pub struct Client {
    pub id: ParticipantId,
    pub handle: ConnectionHandle,
    pub rx: UnboundedReceiver<SignalingMessage>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(CallConfig::default())
    }

    pub fn with_config(config: CallConfig) -> Self {
        let transport = Arc::new(ChannelTransport::new());
        let records = Arc::new(InMemoryCallRecords::new());
        let blocks = Arc::new(StaticBlockList::new());
        let orchestrator = CallOrchestratorBuilder::new()
            .with_config(config)
            .with_transport(transport.clone())
            .with_records(records.clone())
            .with_block_list(blocks.clone())
            .build()
            .expect("orchestrator builds");
        Self {
            orchestrator,
            transport,
            records,
            blocks,
        }
    }

    /// Open a connection for `id` and register it
    pub fn online(&self, id: &str) -> Client {
        let (handle, rx) = self.transport.open();
        let id = ParticipantId::from(id);
        self.orchestrator.connect(&id, handle.clone());
        Client { id, handle, rx }
    }

    pub async fn ringing_call(&self, caller: &Client, callee: &Client) -> CallSession {
        let call = self
            .orchestrator
            .initiate(
                caller.id.clone(),
                callee.id.clone(),
                CallContext::for_product("sku-1"),
                CallCategory::ProductInquiry,
            )
            .await
            .expect("initiate");
        assert_eq!(call.state, CallState::Ringing);
        call
    }

    pub async fn accepted_call(&self, caller: &Client, callee: &Client) -> CallSession {
        let call = self.ringing_call(caller, callee).await;
        self.orchestrator
            .respond(&call.call_id, &callee.id, CallDecision::Accept)
            .await
            .expect("accept")
    }

    /// Ringing, accepted, then one offer/answer round
    pub async fn active_call(&self, caller: &Client, callee: &Client) -> CallSession {
        let call = self.accepted_call(caller, callee).await;
        let offer = self
            .orchestrator
            .relay_signal(&call.call_id, &caller.id, SignalPayload::Offer { sdp: "offer-sdp".into() })
            .await
            .expect("offer");
        assert_eq!(offer, SignalOutcome::Delivered);
        let answer = self
            .orchestrator
            .relay_signal(&call.call_id, &callee.id, SignalPayload::Answer { sdp: "answer-sdp".into() })
            .await
            .expect("answer");
        assert_eq!(answer, SignalOutcome::Delivered);

        let call = self.orchestrator.get_call(&call.call_id).await.expect("live");
        assert_eq!(call.state, CallState::Active);
        call
    }

    /// Wait for the record of `call_id` and check it was saved exactly once
    pub async fn saved_once(&self, call_id: &CallId) -> CallSession {
        let record = self
            .records
            .wait_for(call_id, SAVE_WAIT)
            .await
            .expect("call record saved");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(self.records.count_for(call_id).await, 1);
        assert_eq!(self.records.refused(), 0);
        record
    }
}

impl Client {
    pub fn drain(&mut self) -> Vec<SignalingMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    pub fn drain_kinds(&mut self) -> Vec<MessageKind> {
        self.drain().iter().map(|m| m.kind()).collect()
    }

    /// States of the status updates received so far
    pub fn drain_states(&mut self) -> Vec<CallState> {
        self.drain()
            .into_iter()
            .filter_map(|m| match m.payload {
                SignalPayload::StatusUpdate(update) => Some(update.state),
                _ => None,
            })
            .collect()
    }
}
