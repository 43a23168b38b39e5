//! Call Orchestrator Builder API
//!
//! Wires configuration and collaborators into a [`CallOrchestrator`].

use std::sync::Arc;

use super::coordinator::CallOrchestrator;
use crate::collaborators::{BlockList, CallRecordSink, InMemoryCallRecords, NoBlocking};
use crate::config::CallConfig;
use crate::errors::{CallError, Result};
use crate::presence::PresenceRegistry;
use crate::session::CallSessionStore;
use crate::signaling::{SignalTransport, SignalingRelay};
use crate::state_table::{MasterStateTable, StateMachine, MASTER_TABLE};

/// Builder for a configured CallOrchestrator.
///
/// A transport is required. Without a block list every pair may call; without
/// a record sink finished calls are kept in an [`InMemoryCallRecords`].
pub struct CallOrchestratorBuilder {
    config: CallConfig,
    transport: Option<Arc<dyn SignalTransport>>,
    registry: Option<Arc<PresenceRegistry>>,
    block_list: Option<Arc<dyn BlockList>>,
    records: Option<Arc<dyn CallRecordSink>>,
    table: Option<Arc<MasterStateTable>>,
}

impl CallOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: CallConfig::default(),
            transport: None,
            registry: None,
            block_list: None,
            records: None,
            table: None,
        }
    }

    pub fn with_config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_ring_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ring_timeout_secs = secs;
        self
    }

    pub fn with_negotiation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.negotiation_timeout_secs = secs;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn SignalTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Share an existing presence registry
    pub fn with_registry(mut self, registry: Arc<PresenceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_block_list(mut self, block_list: Arc<dyn BlockList>) -> Self {
        self.block_list = Some(block_list);
        self
    }

    pub fn with_records(mut self, records: Arc<dyn CallRecordSink>) -> Self {
        self.records = Some(records);
        self
    }

    /// Replace the transition table. Rejected at build time if it does not
    /// validate.
    pub fn with_state_table(mut self, table: Arc<MasterStateTable>) -> Self {
        self.table = Some(table);
        self
    }

    pub fn build(self) -> Result<Arc<CallOrchestrator>> {
        self.config.validate()?;

        let transport = self
            .transport
            .ok_or_else(|| CallError::config("a signal transport is required"))?;
        let table = self.table.unwrap_or_else(|| MASTER_TABLE.clone());
        table
            .validate()
            .map_err(|errors| CallError::config(format!("invalid state table: {}", errors.join("; "))))?;

        let registry = self.registry.unwrap_or_default();
        let store = Arc::new(CallSessionStore::new());
        let relay = SignalingRelay::new(registry.clone(), store.clone(), transport);

        Ok(Arc::new(CallOrchestrator::new(
            self.config,
            store,
            registry,
            relay,
            StateMachine::new(table),
            self.block_list.unwrap_or_else(|| Arc::new(NoBlocking)),
            self.records
                .unwrap_or_else(|| Arc::new(InMemoryCallRecords::new())),
        )))
    }
}

impl Default for CallOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CallState;
    use crate::signaling::ChannelTransport;
    use crate::state_table::{CallEvent, Transition};

    #[test]
    fn test_builder_configuration() {
        let builder = CallOrchestratorBuilder::new()
            .with_ring_timeout_secs(30)
            .with_negotiation_timeout_secs(15);
        assert_eq!(builder.config.ring_timeout_secs, 30);
        assert_eq!(builder.config.negotiation_timeout_secs, 15);
        assert_eq!(builder.config.tombstone_ttl_secs, 300);
    }

    #[test]
    fn test_transport_required() {
        assert!(matches!(
            CallOrchestratorBuilder::new().build(),
            Err(CallError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = CallOrchestratorBuilder::new()
            .with_transport(Arc::new(ChannelTransport::new()))
            .with_ring_timeout_secs(0)
            .build();
        assert!(matches!(result, Err(CallError::Config(_))));
    }

    #[test]
    fn test_broken_table_rejected() {
        let mut table = MasterStateTable::new();
        table.insert(CallState::Ended, CallEvent::Accept, Transition::to(CallState::Active));
        let result = CallOrchestratorBuilder::new()
            .with_transport(Arc::new(ChannelTransport::new()))
            .with_state_table(Arc::new(table))
            .build();
        assert!(matches!(result, Err(CallError::Config(_))));
    }

    #[tokio::test]
    async fn test_build_with_defaults() {
        let orchestrator = CallOrchestratorBuilder::new()
            .with_transport(Arc::new(ChannelTransport::new()))
            .build()
            .unwrap();
        assert_eq!(orchestrator.config(), &CallConfig::default());
        assert_eq!(orchestrator.stats().await.online, 0);
    }
}
