//! MessageRouter - tags incoming messages and resolves their target partner

use crate::routing::{first_match, sort_rules, RoutingExpression, RoutingRule};
use link::SubmitToConnector;
use queue::TransportQueue;
use scope::DomainConfigurations;
use serde::Deserialize;
use shared::{
    BusinessDomainId, ConnectorError, LinkPartnerName, LinkType, Message, MessageDirection, MessageException,
    QueueError,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Routing defaults of a business domain, bound below `connector`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub gateway: GatewayRouting,
    #[serde(default)]
    pub backend: BackendRouting,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayRouting {
    /// Gateway partner used when a message names none
    pub link_partner_name: Option<LinkPartnerName>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendRouting {
    /// Backend partner used when a message names none and no rule matches
    pub default_link_partner_name: Option<LinkPartnerName>,

    /// Routing rules by id, from `connector.backend.rules.<id>.*`
    #[serde(default)]
    pub rules: BTreeMap<String, RuleSection>,
}

/// A routing rule as written in the domain properties
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSection {
    pub link_name: LinkPartnerName,
    #[serde(default)]
    pub priority: i32,
    pub match_clause: RoutingExpression,
}

/// Partner a message is addressed to on its target side
pub fn target_partner(message: &Message) -> Option<&LinkPartnerName> {
    match message.direction().target() {
        LinkType::Gateway => message.details.gateway_name.as_ref(),
        LinkType::Backend => message.details.connector_backend.as_ref(),
    }
}

/// Receiving end of the messages submitted to the connector
#[derive(Debug)]
pub struct InboundMessages {
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl InboundMessages {
    /// Move everything submitted so far onto `queue`
    pub async fn drain_into(&mut self, queue: &dyn TransportQueue) -> Result<usize, QueueError> {
        let mut moved = 0;
        while let Ok(message) = self.receiver.try_recv() {
            queue.put_on_queue(message).await?;
            moved += 1;
        }
        Ok(moved)
    }

    /// Forward submitted messages onto `queue` until every sender is gone
    pub async fn forward_to(mut self, queue: Arc<dyn TransportQueue>) {
        while let Some(message) = self.receiver.recv().await {
            let message_id = message.connector_message_id.clone();
            if let Err(e) = queue.put_on_queue(message).await {
                warn!(message_id = %message_id, error = %e, "Inbound message could not be enqueued");
            }
        }
        debug!(queue = %queue.name(), "Inbound forwarding stopped");
    }
}

/// Entry point for messages received from link partners.
///
/// Tags every message with its business domain and the direction implied by
/// the side it came from, records the partner it came from and hands it to
/// the to-connector queue.
pub struct MessageRouter {
    configurations: DomainConfigurations,
    inbound: mpsc::UnboundedSender<Message>,
    /// Rules added at runtime; they replace configured rules of the same id
    rules: RwLock<HashMap<BusinessDomainId, BTreeMap<String, RoutingRule>>>,
}

impl MessageRouter {
    pub fn new(configurations: DomainConfigurations) -> (Self, InboundMessages) {
        let (inbound, receiver) = mpsc::unbounded_channel();
        (
            Self {
                configurations,
                inbound,
                rules: RwLock::new(HashMap::new()),
            },
            InboundMessages { receiver },
        )
    }

    /// Tag `message` as received from `partner` on the `source` side of `domain`
    pub fn tag(mut message: Message, domain: &BusinessDomainId, partner: &LinkPartnerName, source: LinkType) -> Message {
        message.domain = domain.clone();
        message.details.direction = MessageDirection::from_source(source);
        let origin = match source {
            LinkType::Gateway => &mut message.details.gateway_name,
            LinkType::Backend => &mut message.details.connector_backend,
        };
        if origin.is_none() {
            *origin = Some(partner.clone());
        }
        message
    }

    /// Add or replace a backend routing rule of `domain`.
    /// Returns the runtime rule it replaced.
    pub fn add_backend_rule(&self, domain: &BusinessDomainId, rule: RoutingRule) -> Option<RoutingRule> {
        let mut rules = self.rules.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        info!(domain = %domain, rule = %rule.id, partner = %rule.link_name, "Backend routing rule added");
        rules.entry(domain.clone()).or_default().insert(rule.id.clone(), rule)
    }

    /// Remove a runtime backend routing rule of `domain`
    pub fn remove_backend_rule(&self, domain: &BusinessDomainId, id: &str) -> Option<RoutingRule> {
        let mut rules = self.rules.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let removed = rules.get_mut(domain).and_then(|domain_rules| domain_rules.remove(id));
        if removed.is_some() {
            info!(domain = %domain, rule = id, "Backend routing rule removed");
        }
        removed
    }

    /// Backend routing rules of `domain` in evaluation order: configured
    /// rules overlaid by runtime rules of the same id
    pub fn backend_rules(&self, domain: &BusinessDomainId) -> Result<Vec<RoutingRule>, ConnectorError> {
        let routing = self.configurations.bind_for::<RoutingConfig>(domain, "connector")?;
        Ok(self.merged_rules(domain, &routing))
    }

    fn merged_rules(&self, domain: &BusinessDomainId, routing: &RoutingConfig) -> Vec<RoutingRule> {
        let mut merged: BTreeMap<String, RoutingRule> = routing
            .backend
            .rules
            .iter()
            .map(|(id, section)| {
                let rule = RoutingRule::new(id.clone(), section.link_name.clone(), section.match_clause.clone())
                    .with_priority(section.priority);
                (id.clone(), rule)
            })
            .collect();
        let runtime = self.rules.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(domain_rules) = runtime.get(domain) {
            merged.extend(domain_rules.iter().map(|(id, rule)| (id.clone(), rule.clone())));
        }
        let mut rules: Vec<RoutingRule> = merged.into_values().collect();
        sort_rules(&mut rules);
        rules
    }

    fn backend_partner(&self, message: &Message, routing: &RoutingConfig) -> Option<LinkPartnerName> {
        let rules = self.merged_rules(&message.domain, routing);
        if let Some(rule) = first_match(&rules, message) {
            info!(
                domain = %message.domain,
                rule = %rule.id,
                partner = %rule.link_name,
                message_id = %message.connector_message_id,
                "Backend selected by routing rule"
            );
            return Some(rule.link_name.clone());
        }
        if !rules.is_empty() {
            warn!(domain = %message.domain, message_id = %message.connector_message_id, "No routing rule matched");
        }
        routing.backend.default_link_partner_name.clone()
    }

    /// Resolve the partner `message` goes to and record it on the message.
    ///
    /// A partner already named on the message wins. Otherwise a gateway
    /// target is the domain's gateway partner; a backend target is chosen by
    /// the first matching routing rule, else the domain's default backend.
    pub fn resolve_target(&self, message: &mut Message) -> Result<LinkPartnerName, ConnectorError> {
        if let Some(partner) = target_partner(message) {
            return Ok(partner.clone());
        }

        let routing = self.configurations.bind_for::<RoutingConfig>(&message.domain, "connector")?;
        let target = message.direction().target();
        let resolved = match target {
            LinkType::Gateway => routing.gateway.link_partner_name.clone(),
            LinkType::Backend => self.backend_partner(message, &routing),
        };
        let partner = resolved.ok_or_else(|| {
            MessageException::new(
                Some(message.connector_message_id.clone()),
                format!(
                    "No {:?} link partner for message in domain '{}' and no default configured",
                    target, message.domain
                ),
            )
        })?;
        let slot = match target {
            LinkType::Gateway => &mut message.details.gateway_name,
            LinkType::Backend => &mut message.details.connector_backend,
        };
        *slot = Some(partner.clone());
        debug!(
            domain = %message.domain,
            partner = %partner,
            message_id = %message.connector_message_id,
            "Target resolved"
        );
        Ok(partner)
    }
}

impl SubmitToConnector for MessageRouter {
    fn submit_to_connector(
        &self,
        message: Message,
        domain: &BusinessDomainId,
        partner: &LinkPartnerName,
        link_type: LinkType,
    ) -> Result<(), ConnectorError> {
        let message = Self::tag(message, domain, partner, link_type);
        info!(
            domain = %domain,
            partner = %partner,
            message_id = %message.connector_message_id,
            direction = ?message.details.direction,
            "Message received from link partner"
        );
        self.inbound
            .send(message)
            .map_err(|_| QueueError::Closed("inbound".to_string()).into())
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("configurations", &self.configurations)
            .finish_non_exhaustive()
    }
}
