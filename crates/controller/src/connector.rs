//! Connector - wires domains, links, queues and workers into one instance

use crate::cleanup::{CleanupOutcome, CleanupWorker};
use crate::evidence_store::{EvidenceStore, InMemoryEvidenceStore};
use crate::evidence_timeout::{EvidenceTimeoutChecker, TimeoutReport};
use crate::processor::{MessageProcessor, ProcessOutcome};
use crate::retry::TransportRetryService;
use crate::router::{InboundMessages, MessageRouter};
use crate::routing::RoutingRule;
use crate::worker::{DispatchOutcome, TransportWorker};
use audit::{AdminAuditLog, AdminEventType, AuditEntry, AuditStats, MessageErrorLog};
use chrono::{DateTime, Utc};
use link::{ActiveLinkPartner, LinkManager, LinkPlugin, PluginInfo, SubmitToConnector};
use queue::{QueueEntryId, QueueSnapshot, QueuedMessage, TransportQueue, TransportQueues};
use scope::{DomainConfigurations, DomainRegistry, DomainScopeStore};
use serde::Serialize;
use serde_json::json;
use shared::{
    BusinessDomainId, ConnectorConfig, ConnectorError, ControllerSettings, LinkConfigName, LinkMode, LinkPartner,
    LinkPartnerName, LinkType, Message, QueueError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Counts of one [`Connector::run_until_idle`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    /// Messages moved from link partners onto the to-connector queue
    pub received: usize,
    pub processed: usize,
    pub delivered: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
    /// Finished messages whose content was released
    pub cleaned: usize,
}

impl RunStats {
    fn is_idle(&self) -> bool {
        *self == RunStats::default()
    }

    fn add(&mut self, other: RunStats) {
        self.received += other.received;
        self.processed += other.processed;
        self.delivered += other.delivered;
        self.requeued += other.requeued;
        self.dead_lettered += other.dead_lettered;
        self.cleaned += other.cleaned;
    }
}

/// Background tasks started by [`Connector::start`]
pub struct ConnectorHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    forwarder: Option<JoinHandle<()>>,
}

impl ConnectorHandle {
    /// Signal the workers to stop and wait for them
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Connector task failed");
            }
        }
        if let Some(forwarder) = self.forwarder {
            forwarder.abort();
        }
        info!("Connector stopped");
    }
}

/// One connector instance.
///
/// Owns the domain registry, the link manager with its plugins, the work
/// queues and the stages between them: messages received from link partners
/// go through the router onto the to-connector queue, the processor routes
/// them onto the to-link queue and the transport worker delivers them.
/// Finished business messages are released by the cleanup worker, and the
/// evidence timeout checker fails outgoing messages the gateway never
/// confirmed.
pub struct Connector {
    settings: ControllerSettings,
    config: ConnectorConfig,
    registry: Arc<DomainRegistry>,
    link_manager: Arc<LinkManager>,
    router: Arc<MessageRouter>,
    inbound: tokio::sync::Mutex<Option<InboundMessages>>,
    queues: TransportQueues,
    evidence_store: Arc<dyn EvidenceStore>,
    errors: Arc<MessageErrorLog>,
    audit: Mutex<AdminAuditLog>,
    processor: Arc<MessageProcessor>,
    worker: Arc<TransportWorker>,
    cleanup: Arc<CleanupWorker>,
    timeouts: Arc<EvidenceTimeoutChecker>,
}

impl Connector {
    /// Connector for `config` with the given plugin catalog, in-memory queues
    /// and an in-memory evidence store
    pub fn new(config: ConnectorConfig, plugins: Vec<Arc<dyn LinkPlugin>>) -> Result<Self, ConnectorError> {
        Self::with_evidence_store(config, plugins, Arc::new(InMemoryEvidenceStore::new()))
    }

    pub fn with_evidence_store(
        config: ConnectorConfig,
        plugins: Vec<Arc<dyn LinkPlugin>>,
        evidence_store: Arc<dyn EvidenceStore>,
    ) -> Result<Self, ConnectorError> {
        config.validate()?;
        let settings = config.controller.clone();

        let registry = Arc::new(DomainRegistry::from_config(&config, Arc::new(DomainScopeStore::new()))?);
        registry.on_configuration_changed(|event| {
            info!(domain = %event.domain, "Business domain configuration changed");
        });

        let configurations = DomainConfigurations::new(Arc::clone(&registry));
        let (router, inbound) = MessageRouter::new(configurations.clone());
        let router = Arc::new(router);
        let submit: Arc<dyn SubmitToConnector> = router.clone();
        let link_manager = Arc::new(LinkManager::new(plugins, submit));

        let queues = TransportQueues::in_memory(&settings.queues);
        let errors = Arc::new(MessageErrorLog::default());
        let retry = Arc::new(TransportRetryService::new(
            Arc::clone(&evidence_store),
            Arc::clone(&link_manager),
        ));
        let processor = Arc::new(MessageProcessor::new(
            Arc::clone(&router),
            Arc::clone(&evidence_store),
            queues.clone(),
            errors.clone(),
        ));
        let worker = Arc::new(TransportWorker::new(
            Arc::clone(&link_manager),
            retry,
            Arc::clone(&evidence_store),
            Arc::clone(&queues.to_link),
            errors.clone(),
            &settings,
        ));
        let cleanup = Arc::new(CleanupWorker::new(
            Arc::clone(&evidence_store),
            Arc::clone(&queues.to_cleanup),
            errors.clone(),
            settings.finished_retention(),
        ));
        let timeouts = Arc::new(EvidenceTimeoutChecker::new(
            configurations,
            Arc::clone(&evidence_store),
            Arc::clone(&processor),
        ));

        Ok(Self {
            settings,
            config,
            registry,
            link_manager,
            router,
            inbound: tokio::sync::Mutex::new(Some(inbound)),
            queues,
            evidence_store,
            errors,
            audit: Mutex::new(AdminAuditLog::default()),
            processor,
            worker,
            cleanup,
            timeouts,
        })
    }

    fn audit(&self) -> MutexGuard<'_, AdminAuditLog> {
        self.audit.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ============== Link Administration ==============

    /// Activate every enabled partner of every enabled domain.
    /// Failures are audited and logged, the remaining partners still start.
    pub fn bootstrap(&self) -> Vec<(LinkPartnerName, Result<(), ConnectorError>)> {
        let active_domains = self.registry.active_domains();
        let partners: Vec<LinkPartner> = self
            .config
            .domains
            .iter()
            .filter(|d| active_domains.contains(&d.id))
            .flat_map(|d| d.link_partners())
            .collect();

        info!(domains = active_domains.len(), partners = partners.len(), "Bootstrapping connector");
        partners
            .into_iter()
            .map(|partner| {
                let name = partner.link_partner_name.clone();
                let result = self.activate_link_partner(partner).map(|_| ());
                if let Err(e) = &result {
                    error!(partner = %name, error = %e, "Link partner could not be activated");
                }
                (name, result)
            })
            .collect()
    }

    /// Activate one partner, starting its link configuration if needed
    pub fn activate_link_partner(&self, partner: LinkPartner) -> Result<Arc<ActiveLinkPartner>, ConnectorError> {
        let domain = partner.domain().clone();
        let name = partner.link_partner_name.clone();
        let config_name = partner.link_configuration.config_name.clone();
        let metadata = json!({
            "configName": config_name.as_str(),
            "linkImpl": partner.link_configuration.link_impl.as_str(),
            "linkType": partner.link_type,
        });
        let link_was_active = self.link_manager.active_link(&domain, &config_name).is_some();

        let result = self.link_manager.activate_link_partner(partner);
        let mut audit = self.audit();
        if !link_was_active && self.link_manager.active_link(&domain, &config_name).is_some() {
            audit.record(AdminEventType::LinkActivated, Some(&domain), config_name.as_str(), Ok(()));
        }
        audit.record_with(
            AdminEventType::PartnerEnabled,
            Some(&domain),
            name.as_str(),
            result.as_ref().map(|_| ()).map_err(|e| e.to_string()),
            Some(metadata),
        );
        Ok(result?)
    }

    pub fn shutdown_link_partner(&self, domain: &BusinessDomainId, name: &LinkPartnerName) -> Result<(), ConnectorError> {
        let result = self.link_manager.shutdown_link_partner(domain, name);
        self.audit().record(
            AdminEventType::PartnerDisabled,
            Some(domain),
            name.as_str(),
            result.as_ref().map_err(|e| e.to_string()).copied(),
        );
        Ok(result?)
    }

    /// Shut down a link configuration with all its partners
    pub fn shutdown_link(&self, domain: &BusinessDomainId, config_name: &LinkConfigName) -> Result<(), ConnectorError> {
        let result = self.link_manager.shutdown_link_configuration(domain, config_name);
        self.audit().record(
            AdminEventType::LinkDeactivated,
            Some(domain),
            config_name.as_str(),
            result.as_ref().map_err(|e| e.to_string()).copied(),
        );
        Ok(result?)
    }

    /// Replace the properties of `domain`. Configuration bound from them is
    /// rebuilt on next use.
    pub fn update_domain_properties(
        &self,
        domain: &BusinessDomainId,
        properties: HashMap<String, String>,
    ) -> Result<(), ConnectorError> {
        Ok(self.registry.update_properties(domain, properties)?)
    }

    /// Pull once from every active partner receiving in PULL mode.
    /// Returns the number of messages handed to the connector.
    pub fn pull_all(&self) -> usize {
        self.link_manager
            .active_link_partners(None)
            .iter()
            .filter(|p| p.link_partner().rcv_link_mode == LinkMode::Pull)
            .map(|p| match self.link_manager.pull_now(p.domain(), p.name()) {
                Ok(count) => count,
                Err(e) => {
                    warn!(partner = %p.name(), error = %e, "Pull failed");
                    0
                }
            })
            .sum()
    }

    /// Hand `message` to the connector as received from `partner`
    pub fn receive(
        &self,
        message: Message,
        domain: &BusinessDomainId,
        partner: &LinkPartnerName,
        link_type: LinkType,
    ) -> Result<(), ConnectorError> {
        self.router.submit_to_connector(message, domain, partner, link_type)
    }

    // ============== Routing Rule Administration ==============

    /// Add or replace a backend routing rule of `domain` at runtime.
    /// Returns the rule it replaced.
    pub fn add_backend_rule(
        &self,
        domain: &BusinessDomainId,
        rule: RoutingRule,
    ) -> Result<Option<RoutingRule>, ConnectorError> {
        let metadata = rule_metadata(&rule);
        let result = self
            .registry
            .properties(domain)
            .map(|_| self.router.add_backend_rule(domain, rule.clone()));
        self.audit().record_with(
            AdminEventType::RoutingRuleAdded,
            Some(domain),
            rule.id.as_str(),
            result.as_ref().map(|_| ()).map_err(|e| e.to_string()),
            Some(metadata),
        );
        Ok(result?)
    }

    /// Remove a runtime backend routing rule. Configured rules stay.
    pub fn remove_backend_rule(
        &self,
        domain: &BusinessDomainId,
        id: &str,
    ) -> Result<Option<RoutingRule>, ConnectorError> {
        let result = self
            .registry
            .properties(domain)
            .map(|_| self.router.remove_backend_rule(domain, id));
        let metadata = match &result {
            Ok(Some(rule)) => Some(rule_metadata(rule)),
            _ => None,
        };
        self.audit().record_with(
            AdminEventType::RoutingRuleRemoved,
            Some(domain),
            id,
            result.as_ref().map(|_| ()).map_err(|e| e.to_string()),
            metadata,
        );
        Ok(result?)
    }

    /// Configured and runtime rules of `domain` in evaluation order
    pub fn backend_rules(&self, domain: &BusinessDomainId) -> Result<Vec<RoutingRule>, ConnectorError> {
        self.router.backend_rules(domain)
    }

    // ============== Queue Administration ==============

    fn queue(&self, name: &str) -> Result<&Arc<dyn TransportQueue>, ConnectorError> {
        self.queues
            .by_name(name)
            .ok_or_else(|| QueueError::UnknownQueue(name.to_string()).into())
    }

    /// Move a message from the DLQ of `queue` back onto the queue
    pub async fn move_dlq_message(&self, queue: &str, id: QueueEntryId) -> Result<QueuedMessage, ConnectorError> {
        let result = self.queue(queue)?.move_msg_from_dlq_to_queue(id).await;
        self.audit().record_with(
            AdminEventType::DlqMessageMoved,
            result.as_ref().ok().map(|m| &m.message.domain),
            format!("{}/{}", queue, id),
            result.as_ref().map(|_| ()).map_err(|e| e.to_string()),
            Some(queue_entry_metadata(queue, id, result.as_ref().ok())),
        );
        Ok(result?)
    }

    /// Delete a message from `queue` or its DLQ
    pub async fn delete_queue_message(&self, queue: &str, id: QueueEntryId) -> Result<QueuedMessage, ConnectorError> {
        let result = self.queue(queue)?.delete_msg(id).await;
        self.audit().record_with(
            AdminEventType::QueueMessageDeleted,
            result.as_ref().ok().map(|m| &m.message.domain),
            format!("{}/{}", queue, id),
            result.as_ref().map(|_| ()).map_err(|e| e.to_string()),
            Some(queue_entry_metadata(queue, id, result.as_ref().ok())),
        );
        Ok(result?)
    }

    pub async fn queue_snapshots(&self) -> Result<Vec<QueueSnapshot>, ConnectorError> {
        let mut snapshots = Vec::new();
        for queue in self.queues.all() {
            snapshots.push(queue.snapshot().await?);
        }
        Ok(snapshots)
    }

    // ============== Processing ==============

    /// Run every stage until no stage has work left. Requires that the
    /// workers have not been started.
    pub async fn run_until_idle(&self) -> Result<RunStats, ConnectorError> {
        let mut total = RunStats::default();
        loop {
            let mut pass = RunStats::default();
            if let Some(inbound) = self.inbound.lock().await.as_mut() {
                pass.received = inbound.drain_into(self.queues.to_connector.as_ref()).await?;
            }
            while let Some(outcome) = self.processor.process_next(Duration::ZERO).await? {
                pass.processed += 1;
                if let ProcessOutcome::DeadLettered { .. } = outcome {
                    pass.dead_lettered += 1;
                }
            }
            while let Some(outcome) = self.worker.process_next(Duration::ZERO).await? {
                match outcome {
                    DispatchOutcome::Delivered { .. } => pass.delivered += 1,
                    DispatchOutcome::Requeued { .. } => pass.requeued += 1,
                    DispatchOutcome::DeadLettered { .. } => pass.dead_lettered += 1,
                }
            }
            while let Some(outcome) = self.cleanup.process_next(Duration::ZERO).await? {
                match outcome {
                    CleanupOutcome::Released(_) => pass.cleaned += 1,
                    CleanupOutcome::Skipped(_) => {}
                    CleanupOutcome::DeadLettered { .. } => pass.dead_lettered += 1,
                }
            }
            if pass.is_idle() {
                return Ok(total);
            }
            total.add(pass);
        }
    }

    /// Check every domain's outgoing messages for missing gateway evidence
    /// at `now`. Started connectors do this periodically.
    pub async fn check_evidence_timeouts(&self, now: DateTime<Utc>) -> TimeoutReport {
        self.timeouts.check(now).await
    }

    /// Remove finished messages past the retention at `now`
    pub fn evict_finished(&self, now: DateTime<Utc>) -> usize {
        self.cleanup.evict_expired(now)
    }

    /// Start the processor, the transport worker, the cleanup worker and the
    /// evidence timeout checker as background tasks
    pub fn start(self: &Arc<Self>) -> ConnectorHandle {
        let (shutdown, watcher) = watch::channel(false);
        let timeout = self.settings.dequeue_timeout();

        let forwarder = match self.inbound.try_lock() {
            Ok(mut inbound) => inbound
                .take()
                .map(|inbound| tokio::spawn(inbound.forward_to(Arc::clone(&self.queues.to_connector)))),
            Err(_) => None,
        };
        if forwarder.is_none() {
            warn!("Inbound messages already taken, connector started without forwarding");
        }

        let check_interval = self.settings.evidence_check_interval();
        let processor = Arc::clone(&self.processor);
        let processor_shutdown = watcher.clone();
        let worker = Arc::clone(&self.worker);
        let worker_shutdown = watcher.clone();
        let cleanup = Arc::clone(&self.cleanup);
        let cleanup_shutdown = watcher.clone();
        let timeouts = Arc::clone(&self.timeouts);
        let workers = vec![
            tokio::spawn(async move { processor.run(timeout, processor_shutdown).await }),
            tokio::spawn(async move { worker.run(timeout, worker_shutdown).await }),
            tokio::spawn(async move { cleanup.run(timeout, cleanup_shutdown).await }),
            tokio::spawn(async move { timeouts.run(check_interval, watcher).await }),
        ];

        info!(timeout_ms = timeout.as_millis() as u64, "Connector started");
        ConnectorHandle {
            shutdown,
            workers,
            forwarder,
        }
    }

    /// Shut down every link
    pub fn shutdown(&self) {
        self.link_manager.shutdown();
    }

    // ============== Introspection ==============

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<DomainRegistry> {
        &self.registry
    }

    pub fn link_manager(&self) -> &Arc<LinkManager> {
        &self.link_manager
    }

    pub fn plugin_infos(&self) -> Vec<PluginInfo> {
        self.link_manager.plugin_infos()
    }

    pub fn queues(&self) -> &TransportQueues {
        &self.queues
    }

    pub fn evidence_store(&self) -> &Arc<dyn EvidenceStore> {
        &self.evidence_store
    }

    pub fn message_errors(&self) -> &Arc<MessageErrorLog> {
        &self.errors
    }

    pub fn transport_worker(&self) -> &Arc<TransportWorker> {
        &self.worker
    }

    pub fn audit_stats(&self) -> AuditStats {
        self.audit().stats()
    }

    pub fn recent_audit_entries(&self, limit: usize) -> Vec<AuditEntry> {
        self.audit().recent(limit).into_iter().cloned().collect()
    }

    pub fn export_audit(&self) -> serde_json::Value {
        self.audit().export_json()
    }
}

fn queue_entry_metadata(queue: &str, id: QueueEntryId, entry: Option<&QueuedMessage>) -> serde_json::Value {
    let mut metadata = json!({ "queue": queue, "entryId": id.to_string() });
    if let Some(entry) = entry {
        metadata["messageId"] = json!(entry.message.connector_message_id.as_str());
    }
    metadata
}

fn rule_metadata(rule: &RoutingRule) -> serde_json::Value {
    json!({
        "linkName": rule.link_name.as_str(),
        "priority": rule.priority,
        "matchClause": rule.match_clause.to_string(),
    })
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("settings", &self.settings)
            .field("queues", &self.queues)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence_store::BusinessMessageState;
    use crate::routing::RoutingExpression;
    use link::{default_plugins, RecordingTransport};
    use shared::{EvidenceType, MessageContent, MessageDetails, MessageDirection, Party, ScopeError};

    fn config() -> ConnectorConfig {
        serde_json::from_value(serde_json::json!({
            "domains": [{
                "id": "tenantA",
                "properties": {
                    "connector.gateway.link-partner-name": "gw",
                    "connector.backend.default-link-partner-name": "backend1"
                },
                "links": [
                    {
                        "configName": "gwpull",
                        "linkImpl": "gwwspullplugin",
                        "properties": { "gw.address": "http://gateway/ws" },
                        "partners": [{
                            "name": "gw",
                            "linkType": "GATEWAY",
                            "rcvLinkMode": "PULL",
                            "pullIntervalSecs": 3600
                        }]
                    },
                    {
                        "configName": "test",
                        "linkImpl": "testbackend",
                        "partners": [{ "name": "backend1", "linkType": "BACKEND" }]
                    }
                ]
            }]
        }))
        .unwrap()
    }

    fn domain() -> BusinessDomainId {
        BusinessDomainId::new("tenantA")
    }

    fn connector() -> (Arc<RecordingTransport>, Connector) {
        let transport = Arc::new(RecordingTransport::new());
        let connector = Connector::new(config(), default_plugins(transport.clone())).unwrap();
        (transport, connector)
    }

    fn from_gateway() -> Message {
        let mut details = MessageDetails::new(MessageDirection::GatewayToBackend, Party::default(), Party::default());
        details.ebms_message_id = Some("ebms-42".to_string());
        Message::business(details, MessageContent::default())
    }

    // ============== Bootstrap Tests ==============

    #[tokio::test]
    async fn test_bootstrap_activates_all_partners() {
        let (_transport, connector) = connector();
        let results = connector.bootstrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert!(connector.link_manager().is_active(&domain(), &LinkPartnerName::new("gw")));
        assert!(connector.link_manager().is_active(&domain(), &LinkPartnerName::new("backend1")));

        // two links activated, two partners enabled
        assert_eq!(connector.audit_stats().total_entries, 4);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config();
        let duplicate = config.domains[0].clone();
        config.domains.push(duplicate);
        let err = Connector::new(config, default_plugins(Arc::new(RecordingTransport::new()))).unwrap_err();
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    // ============== Message Flow Tests ==============

    #[tokio::test]
    async fn test_gateway_message_confirmed_by_backend() {
        let (transport, connector) = connector();
        connector.bootstrap();

        let message = from_gateway();
        let business_id = message.connector_message_id.clone();
        transport.queue_for_pull(&LinkPartnerName::new("gw"), message);
        assert_eq!(connector.pull_all(), 1);

        let stats = connector.run_until_idle().await.unwrap();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.dead_lettered, 0);
        assert_eq!(stats.cleaned, 1);

        // the DELIVERY evidence went back out through the gateway
        let pushed = transport.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].partner, LinkPartnerName::new("gw"));

        let record = connector.evidence_store().record(&business_id).unwrap();
        assert_eq!(record.state, BusinessMessageState::Confirmed);
        assert!(record.message.content.is_none());
        assert!(record.has_evidence(EvidenceType::Delivery));
        assert!(connector.queues().to_cleanup.list_all_messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unconfirmed_outgoing_message_times_out() {
        let (_transport, connector) = connector();
        connector.bootstrap();

        let mut details = MessageDetails::new(MessageDirection::BackendToGateway, Party::default(), Party::default());
        details.backend_message_id = Some("backend-7".to_string());
        let message = Message::business(details, MessageContent::default());
        let business_id = message.connector_message_id.clone();
        connector
            .receive(message, &domain(), &LinkPartnerName::new("backend1"), LinkType::Backend)
            .unwrap();
        let stats = connector.run_until_idle().await.unwrap();
        assert_eq!(stats.delivered, 1);
        assert!(connector.evidence_store().record(&business_id).unwrap().delivered_at.is_some());

        let mut properties = connector.registry().properties(&domain()).unwrap();
        properties.insert("connector.controller.evidence.delivery-timeout-secs".to_string(), "60".to_string());
        connector.update_domain_properties(&domain(), properties).unwrap();

        assert!(connector.check_evidence_timeouts(Utc::now()).await.failed.is_empty());
        let report = connector
            .check_evidence_timeouts(Utc::now() + chrono::Duration::seconds(120))
            .await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].evidence_type, EvidenceType::NonDelivery);
        assert_eq!(report.failed[0].forwarded_to, Some(LinkPartnerName::new("backend1")));

        let stats = connector.run_until_idle().await.unwrap();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.cleaned, 1);
        let record = connector.evidence_store().record(&business_id).unwrap();
        assert_eq!(record.state, BusinessMessageState::Rejected);
    }

    #[tokio::test]
    async fn test_unroutable_message_is_dead_lettered_and_recoverable() {
        let (_transport, connector) = connector();
        connector.bootstrap();

        // bound for the gateway without naming a gateway partner
        let message = Message::business(
            MessageDetails::new(MessageDirection::BackendToGateway, Party::default(), Party::default()),
            MessageContent::default(),
        )
        .in_domain(domain());
        connector.queues().to_link.put_on_queue(message).await.unwrap();

        let stats = connector.run_until_idle().await.unwrap();
        assert_eq!(stats.dead_lettered, 1);

        let snapshots = connector.queue_snapshots().await.unwrap();
        let to_link = snapshots.iter().find(|s| s.name == "toLinkQueue").unwrap();
        assert_eq!(to_link.dead_lettered.len(), 1);
        let id = to_link.dead_lettered[0].id;

        let moved = connector.move_dlq_message("toLinkQueue", id).await.unwrap();
        assert_eq!(moved.id, id);
        connector.delete_queue_message("toLinkQueue", id).await.unwrap();
        assert!(connector.queues().to_link.list_all_messages().await.unwrap().is_empty());

        let entries = connector.recent_audit_entries(2);
        assert_eq!(entries[0].event_type, AdminEventType::QueueMessageDeleted);
        assert_eq!(entries[1].event_type, AdminEventType::DlqMessageMoved);
    }

    #[tokio::test]
    async fn test_unknown_queue() {
        let (_transport, connector) = connector();
        let err = connector
            .delete_queue_message("nope", QueueEntryId::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Queue(QueueError::UnknownQueue(_))));
    }

    #[tokio::test]
    async fn test_started_connector_delivers_in_background() {
        let (transport, connector) = connector();
        let connector = Arc::new(connector);
        connector.bootstrap();
        let handle = connector.start();

        connector
            .receive(from_gateway(), &domain(), &LinkPartnerName::new("gw"), LinkType::Gateway)
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while transport.pushed_to(&LinkPartnerName::new("gw")) == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.stop().await;

        assert_eq!(transport.pushed_to(&LinkPartnerName::new("gw")), 1);
    }

    // ============== Administration Tests ==============

    #[tokio::test]
    async fn test_routing_rule_is_audited_and_applied() {
        let (_transport, connector) = connector();
        connector.bootstrap();

        let rule = RoutingRule::new(
            "forms",
            "backend2",
            RoutingExpression::parse("equals(ServiceName, 'forms')").unwrap(),
        )
        .with_priority(3);
        assert!(connector.add_backend_rule(&domain(), rule).unwrap().is_none());
        assert_eq!(connector.backend_rules(&domain()).unwrap().len(), 1);

        let mut message = from_gateway();
        message.details.service = Some("forms".to_string());
        connector
            .receive(message, &domain(), &LinkPartnerName::new("gw"), LinkType::Gateway)
            .unwrap();
        connector.run_until_idle().await.unwrap();

        // backend2 is not active, the message is parked with its routing
        let parked = connector.queues().to_link.list_all_messages_in_dlq().await.unwrap();
        assert_eq!(parked[0].message.details.connector_backend, Some(LinkPartnerName::new("backend2")));

        let removed = connector.remove_backend_rule(&domain(), "forms").unwrap();
        assert_eq!(removed.map(|r| r.priority), Some(3));
        assert!(connector.backend_rules(&domain()).unwrap().is_empty());

        let entries = connector.recent_audit_entries(2);
        assert_eq!(entries[0].event_type, AdminEventType::RoutingRuleRemoved);
        assert_eq!(entries[1].event_type, AdminEventType::RoutingRuleAdded);
        let metadata = entries[1].metadata.as_ref().unwrap();
        assert_eq!(metadata["linkName"], "backend2");
        assert_eq!(metadata["matchClause"], "equals(ServiceName, 'forms')");
    }

    #[tokio::test]
    async fn test_rule_for_unknown_domain_is_rejected() {
        let (_transport, connector) = connector();
        let rule = RoutingRule::new("x", "backend1", RoutingExpression::parse("equals(Action, 'a')").unwrap());

        let err = connector
            .add_backend_rule(&BusinessDomainId::new("nope"), rule)
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Scope(ScopeError::UnknownDomain(_))));
        assert!(!connector.recent_audit_entries(1)[0].success);
    }

    #[tokio::test]
    async fn test_audit_entries_carry_metadata() {
        let (_transport, connector) = connector();
        connector.bootstrap();

        let entries = connector.recent_audit_entries(1);
        assert_eq!(entries[0].event_type, AdminEventType::PartnerEnabled);
        let metadata = entries[0].metadata.as_ref().unwrap();
        assert_eq!(metadata["configName"], "test");
        assert_eq!(metadata["linkImpl"], "testbackend");

        let message = from_gateway().in_domain(domain());
        let message_id = message.connector_message_id.clone();
        let id = connector.queues().to_link.put_on_queue(message).await.unwrap();
        connector.delete_queue_message("toLinkQueue", id).await.unwrap();

        let entries = connector.recent_audit_entries(1);
        let metadata = entries[0].metadata.as_ref().unwrap();
        assert_eq!(metadata["queue"], "toLinkQueue");
        assert_eq!(metadata["messageId"], message_id.as_str());
    }

    #[tokio::test]
    async fn test_partner_shutdown_is_audited() {
        let (_transport, connector) = connector();
        connector.bootstrap();

        connector.shutdown_link_partner(&domain(), &LinkPartnerName::new("gw")).unwrap();
        assert!(!connector.link_manager().is_active(&domain(), &LinkPartnerName::new("gw")));

        let err = connector.shutdown_link_partner(&domain(), &LinkPartnerName::new("gw"));
        assert!(err.is_err());

        let entries = connector.recent_audit_entries(2);
        assert_eq!(entries[0].event_type, AdminEventType::PartnerDisabled);
        assert!(!entries[0].success);
        assert!(entries[1].success);
    }

    #[tokio::test]
    async fn test_link_shutdown_stops_its_partners() {
        let (_transport, connector) = connector();
        connector.bootstrap();

        connector.shutdown_link(&domain(), &LinkConfigName::new("test")).unwrap();
        assert!(!connector.link_manager().is_active(&domain(), &LinkPartnerName::new("backend1")));
        assert!(connector.link_manager().is_active(&domain(), &LinkPartnerName::new("gw")));

        // idempotent
        connector.shutdown_link(&domain(), &LinkConfigName::new("test")).unwrap();
    }

    #[tokio::test]
    async fn test_changed_default_backend_applies_to_next_message() {
        let (_transport, connector) = connector();
        connector.bootstrap();

        let mut properties = connector.registry().properties(&domain()).unwrap();
        properties.insert("connector.backend.default-link-partner-name".to_string(), "backend2".to_string());
        connector.update_domain_properties(&domain(), properties).unwrap();

        connector
            .receive(from_gateway(), &domain(), &LinkPartnerName::new("gw"), LinkType::Gateway)
            .unwrap();
        let stats = connector.run_until_idle().await.unwrap();

        // backend2 is not active; the message is retried then parked
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.dead_lettered, 1);
        let parked = connector.queues().to_link.list_all_messages_in_dlq().await.unwrap();
        assert_eq!(parked[0].message.details.connector_backend, Some(LinkPartnerName::new("backend2")));
    }
}
