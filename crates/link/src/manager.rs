//! LinkManager - lifecycle of links and dispatch to link partners

use crate::active::{ActiveLink, ActiveLinkPartner, PartnerState};
use crate::context::LinkContext;
use crate::plugin::{ConfigClass, LinkPlugin, PullFromLinkPartner, SubmitReceipt, SubmitToConnector};
use serde::Serialize;
use shared::{
    BusinessDomainId, ConfigError, LinkConfigName, LinkConfiguration, LinkMode, LinkPartner, LinkPartnerName,
    LinkPluginError, LinkType, Message, PluginFeature,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn};

type LinkKey = (BusinessDomainId, LinkConfigName);
type PartnerKey = (BusinessDomainId, LinkPartnerName);

/// Operator view of a registered plugin
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub name: String,
    pub features: BTreeSet<PluginFeature>,
    pub link_types: BTreeSet<LinkType>,
    pub config_schema: Vec<ConfigClass>,
}

struct PullJob {
    key: String,
    handle: JoinHandle<()>,
}

/// Hosts the link plugins and every link started through them.
///
/// Lifecycle operations are serialized among themselves; they never wait for
/// in-flight submits. A submit racing with a shutdown either completes or
/// fails with a [`LinkPluginError`].
pub struct LinkManager {
    plugins: Vec<Arc<dyn LinkPlugin>>,
    connector: Arc<dyn SubmitToConnector>,
    links: RwLock<HashMap<LinkKey, Arc<ActiveLink>>>,
    partners: RwLock<HashMap<PartnerKey, Arc<ActiveLinkPartner>>>,
    pull_jobs: Mutex<HashMap<PartnerKey, PullJob>>,
    lifecycle: Mutex<()>,
}

impl LinkManager {
    pub fn new(plugins: Vec<Arc<dyn LinkPlugin>>, connector: Arc<dyn SubmitToConnector>) -> Self {
        Self {
            plugins,
            connector,
            links: RwLock::new(HashMap::new()),
            partners: RwLock::new(HashMap::new()),
            pull_jobs: Mutex::new(HashMap::new()),
            lifecycle: Mutex::new(()),
        }
    }

    fn lifecycle_lock(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ============== Plugin Catalog ==============

    pub fn available_plugins(&self) -> &[Arc<dyn LinkPlugin>] {
        &self.plugins
    }

    pub fn plugin_infos(&self) -> Vec<PluginInfo> {
        self.plugins
            .iter()
            .map(|p| PluginInfo {
                name: p.name().to_string(),
                features: p.features(),
                link_types: p.supported_link_types(),
                config_schema: p.config_schema(),
            })
            .collect()
    }

    pub fn plugin_by_name(&self, name: &str) -> Option<Arc<dyn LinkPlugin>> {
        self.plugins.iter().find(|p| p.name() == name).cloned()
    }

    /// The single plugin claiming `implementation`
    pub fn select_plugin(&self, implementation: &str) -> Result<Arc<dyn LinkPlugin>, ConfigError> {
        let mut claiming = self.plugins.iter().filter(|p| p.can_handle(implementation));
        match (claiming.next(), claiming.next()) {
            (Some(plugin), None) => Ok(Arc::clone(plugin)),
            (None, _) => Err(ConfigError::NoPluginForImplementation {
                implementation: implementation.to_string(),
            }),
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousPlugin {
                implementation: implementation.to_string(),
                plugins: self
                    .plugins
                    .iter()
                    .filter(|p| p.can_handle(implementation))
                    .map(|p| p.name().to_string())
                    .collect(),
            }),
        }
    }

    /// Check that `configuration` can be started, without starting it
    pub fn check_configuration(&self, configuration: &LinkConfiguration) -> Result<(), ConfigError> {
        if configuration.link_impl.trim().is_empty() {
            return Err(ConfigError::EmptyImplementation(configuration.config_name.clone()));
        }
        self.select_plugin(&configuration.link_impl).map(|_| ())
    }

    /// Check that `partner` fits the plugin of its configuration
    pub fn check_partner(&self, partner: &LinkPartner) -> Result<(), LinkPluginError> {
        self.check_configuration(&partner.link_configuration)?;
        let plugin = self.select_plugin(&partner.link_configuration.link_impl)?;
        Self::check_partner_against(plugin.as_ref(), partner)
    }

    fn check_partner_against(plugin: &dyn LinkPlugin, partner: &LinkPartner) -> Result<(), LinkPluginError> {
        if !plugin.supported_link_types().contains(&partner.link_type) {
            return Err(ConfigError::Invalid(format!(
                "Plugin '{}' does not support link type {:?} of partner '{}'",
                plugin.name(),
                partner.link_type,
                partner.link_partner_name
            ))
            .into());
        }
        if partner.rcv_link_mode == LinkMode::Pull {
            plugin.require(PluginFeature::RcvPullMode)?;
        }
        Ok(())
    }

    // ============== Lifecycle ==============

    /// Start `configuration` unless it is already active
    pub fn start_link_configuration(&self, configuration: &LinkConfiguration) -> Result<Arc<ActiveLink>, LinkPluginError> {
        let _lifecycle = self.lifecycle_lock();
        self.start_link_locked(configuration)
    }

    fn start_link_locked(&self, configuration: &LinkConfiguration) -> Result<Arc<ActiveLink>, LinkPluginError> {
        let key = (configuration.domain.clone(), configuration.config_name.clone());
        if let Some(link) = self.read_links().get(&key) {
            if link.is_active() {
                return Ok(Arc::clone(link));
            }
        }

        let span = info_span!("link", domain = %configuration.domain, link = %configuration.config_name);
        let _enter = span.enter();

        self.check_configuration(configuration)?;
        let plugin = self.select_plugin(&configuration.link_impl)?;
        let context = LinkContext::new(configuration.clone(), Arc::clone(&self.connector));
        let link = Arc::new(plugin.start_configuration(context)?);

        self.write_links().insert(key, Arc::clone(&link));
        info!(plugin = plugin.name(), "Link configuration started");
        Ok(link)
    }

    /// Start the configuration of `partner` if needed, enable the partner on
    /// it and schedule pulling when the partner receives in PULL mode
    pub fn activate_link_partner(&self, partner: LinkPartner) -> Result<Arc<ActiveLinkPartner>, LinkPluginError> {
        let _lifecycle = self.lifecycle_lock();
        let span = info_span!(
            "link_partner",
            domain = %partner.domain(),
            link = %partner.link_configuration.config_name,
            partner = %partner.link_partner_name
        );
        let _enter = span.enter();

        let key = (partner.domain().clone(), partner.link_partner_name.clone());
        if let Some(existing) = self.read_partners().get(&key) {
            if existing.ensure_usable().is_ok() {
                debug!("Link partner already active");
                return Ok(Arc::clone(existing));
            }
        }

        let link = self.start_link_locked(&partner.link_configuration)?;
        let plugin = self.plugin_of(&link)?;
        Self::check_partner_against(plugin.as_ref(), &partner)?;

        if link.partner_count() > 0
            && !link.partner_names().contains(&partner.link_partner_name)
            && !plugin.supports(PluginFeature::SupportsMultiplePartners)
        {
            return Err(ConfigError::Invalid(format!(
                "Plugin '{}' serves one link partner per link, '{}' already has one",
                plugin.name(),
                link.config_name()
            ))
            .into());
        }

        let active = match plugin.enable_link_partner(partner, &link) {
            Ok(active) => Arc::new(active),
            Err(e) => {
                warn!(error = %e, "Link partner could not be activated");
                return Err(e);
            }
        };

        link.attach_partner(Arc::clone(&active));
        self.write_partners().insert(key.clone(), Arc::clone(&active));

        if active.link_partner().rcv_link_mode == LinkMode::Pull {
            if let Err(e) = self.configure_pull(plugin.as_ref(), &key, &active) {
                error!(error = %e, "Pull could not be configured");
                active.set_state(PartnerState::Unusable(e.to_string()));
                return Err(e);
            }
        }

        info!("Link partner activated");
        Ok(active)
    }

    /// Shut down one active partner
    pub fn shutdown_link_partner(
        &self,
        domain: &BusinessDomainId,
        name: &LinkPartnerName,
    ) -> Result<(), LinkPluginError> {
        let _lifecycle = self.lifecycle_lock();
        let key = (domain.clone(), name.clone());
        let active = self
            .read_partners()
            .get(&key)
            .cloned()
            .ok_or_else(|| LinkPluginError::NoActivePartner {
                domain: domain.clone(),
                partner: name.clone(),
            })?;

        if let Some(link) = active.parent() {
            let plugin = self.plugin_of(&link)?;
            plugin.require(PluginFeature::SupportsLinkPartnerShutdown)?;
        }
        self.shutdown_partner_locked(&key, &active)
    }

    fn shutdown_partner_locked(&self, key: &PartnerKey, active: &Arc<ActiveLinkPartner>) -> Result<(), LinkPluginError> {
        self.unconfigure_pull(key);
        self.write_partners().remove(key);
        active.set_state(PartnerState::Shutdown);

        let Some(link) = active.parent() else {
            return Ok(());
        };
        link.detach_partner(active.name());
        let result = self.plugin_of(&link)?.shutdown_active_link_partner(active);
        match &result {
            Ok(()) => info!(domain = %key.0, partner = %key.1, "Link partner shut down"),
            Err(e) => {
                error!(domain = %key.0, partner = %key.1, error = %e, "Link partner shutdown failed");
                active.set_state(PartnerState::Unusable(e.to_string()));
            }
        }
        result
    }

    /// Shut down a link configuration and all its partners. Shutting down a
    /// configuration that is not active is a no-op.
    pub fn shutdown_link_configuration(
        &self,
        domain: &BusinessDomainId,
        config_name: &LinkConfigName,
    ) -> Result<(), LinkPluginError> {
        let _lifecycle = self.lifecycle_lock();
        let key = (domain.clone(), config_name.clone());
        let Some(link) = self.write_links().remove(&key) else {
            return Ok(());
        };
        self.shutdown_link_locked(&link)
    }

    fn shutdown_link_locked(&self, link: &Arc<ActiveLink>) -> Result<(), LinkPluginError> {
        let plugin = self.plugin_of(link)?;
        for partner in link.detach_all() {
            let key = (partner.domain().clone(), partner.name().clone());
            self.unconfigure_pull(&key);
            self.write_partners().remove(&key);
            partner.set_state(PartnerState::Shutdown);
            if let Err(e) = plugin.shutdown_active_link_partner(&partner) {
                warn!(partner = %key.1, error = %e, "Link partner shutdown failed");
            }
        }

        let result = plugin.shutdown_configuration(link);
        // The context is closed even when the plugin failed to release it
        link.context().close();
        match &result {
            Ok(()) => info!(domain = %link.domain(), link = %link.config_name(), "Link configuration shut down"),
            Err(e) => error!(domain = %link.domain(), link = %link.config_name(), error = %e, "Link shutdown failed"),
        }
        result
    }

    /// Shut down every link of `domain`
    pub fn shutdown_domain(&self, domain: &BusinessDomainId) {
        let _lifecycle = self.lifecycle_lock();
        let links: Vec<_> = {
            let mut links = self.write_links();
            let keys: Vec<_> = links.keys().filter(|(d, _)| d == domain).cloned().collect();
            keys.iter().filter_map(|k| links.remove(k)).collect()
        };
        for link in links {
            // Failures are logged by shutdown_link_locked
            let _ = self.shutdown_link_locked(&link);
        }
    }

    /// Shut down every link. Failures are logged and skipped.
    pub fn shutdown(&self) {
        let _lifecycle = self.lifecycle_lock();
        let links: Vec<_> = self.write_links().drain().map(|(_, link)| link).collect();
        for link in links {
            info!(link = %link.config_name(), domain = %link.domain(), "Invoking shutdown on link configuration");
            let _ = self.shutdown_link_locked(&link);
        }
    }

    fn plugin_of(&self, link: &ActiveLink) -> Result<Arc<dyn LinkPlugin>, LinkPluginError> {
        self.plugin_by_name(link.plugin_name()).ok_or_else(|| {
            LinkPluginError::Lifecycle(format!(
                "Plugin '{}' of link '{}' is not registered",
                link.plugin_name(),
                link.config_name()
            ))
        })
    }

    // ============== Dispatch ==============

    /// Hand `message` to the active partner `name` of `domain`
    pub fn submit_to_link_partner(
        &self,
        domain: &BusinessDomainId,
        name: &LinkPartnerName,
        message: &Message,
    ) -> Result<SubmitReceipt, LinkPluginError> {
        let active = self.active_link_partner(domain, name).ok_or_else(|| LinkPluginError::NoActivePartner {
            domain: domain.clone(),
            partner: name.clone(),
        })?;
        let link = active.ensure_usable()?;
        let plugin = self.plugin_of(&link)?;
        let submit = plugin.submit_capability(&active)?;

        let result = if plugin.supports(PluginFeature::SupportsConcurrentSubmit) {
            submit.submit_to_link(message, name)
        } else {
            let _serialized = active.lock_submit();
            // The partner may have been shut down while waiting
            active.ensure_usable()?;
            submit.submit_to_link(message, name)
        };

        match &result {
            Ok(_) => debug!(
                domain = %domain,
                partner = %name,
                message_id = %message.connector_message_id,
                "Message submitted to link partner"
            ),
            Err(e) if e.is_lifecycle_failure() => {
                warn!(domain = %domain, partner = %name, error = %e, "Link partner marked unusable");
                active.set_state(PartnerState::Unusable(e.to_string()));
            }
            Err(e) => warn!(domain = %domain, partner = %name, error = %e, "Submit to link partner failed"),
        }
        result
    }

    /// Pull capability of the active partner `name` of `domain`
    pub fn pull_from_link_partner(
        &self,
        domain: &BusinessDomainId,
        name: &LinkPartnerName,
    ) -> Result<Option<Arc<dyn PullFromLinkPartner>>, LinkPluginError> {
        let active = self.active_link_partner(domain, name).ok_or_else(|| LinkPluginError::NoActivePartner {
            domain: domain.clone(),
            partner: name.clone(),
        })?;
        let link = active.ensure_usable()?;
        self.plugin_of(&link)?.pull_capability(&active)
    }

    /// Pull once from `name` and hand every message to the connector.
    /// Returns the number of messages handed over.
    pub fn pull_now(&self, domain: &BusinessDomainId, name: &LinkPartnerName) -> Result<usize, LinkPluginError> {
        let active = self.active_link_partner(domain, name).ok_or_else(|| LinkPluginError::NoActivePartner {
            domain: domain.clone(),
            partner: name.clone(),
        })?;
        let pull = self
            .pull_from_link_partner(domain, name)?
            .ok_or_else(|| LinkPluginError::Lifecycle(format!("Link partner '{}' has no pull capability", name)))?;
        Ok(run_pull(pull.as_ref(), self.connector.as_ref(), &active))
    }

    // ============== Pull Scheduling ==============

    fn configure_pull(
        &self,
        plugin: &dyn LinkPlugin,
        key: &PartnerKey,
        active: &Arc<ActiveLinkPartner>,
    ) -> Result<(), LinkPluginError> {
        let Some(pull) = plugin.pull_capability(active)? else {
            warn!("PULL mode configured but the plugin offers no pull capability");
            return Ok(());
        };
        self.unconfigure_pull(key);

        let job_key = format!("pull_from_{}", key.1);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(job = %job_key, "No async runtime, pull job not scheduled");
            return Ok(());
        };

        let interval = active.link_partner().pull_interval();
        let connector = Arc::clone(&self.connector);
        let partner = Arc::downgrade(active);
        let handle = runtime.spawn(pull_loop(interval, pull, connector, partner));

        info!(job = %job_key, interval_secs = interval.as_secs(), "Pull job scheduled");
        self.lock_pull_jobs().insert(key.clone(), PullJob { key: job_key, handle });
        Ok(())
    }

    fn unconfigure_pull(&self, key: &PartnerKey) {
        if let Some(job) = self.lock_pull_jobs().remove(key) {
            job.handle.abort();
            info!(job = %job.key, "Pull job removed");
        }
    }

    fn lock_pull_jobs(&self) -> MutexGuard<'_, HashMap<PartnerKey, PullJob>> {
        self.pull_jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Keys of the scheduled pull jobs
    pub fn scheduled_pull_jobs(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.lock_pull_jobs().values().map(|j| j.key.clone()).collect();
        keys.sort();
        keys
    }

    // ============== Introspection ==============

    fn read_links(&self) -> std::sync::RwLockReadGuard<'_, HashMap<LinkKey, Arc<ActiveLink>>> {
        self.links.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_links(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<LinkKey, Arc<ActiveLink>>> {
        self.links.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_partners(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PartnerKey, Arc<ActiveLinkPartner>>> {
        self.partners.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_partners(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PartnerKey, Arc<ActiveLinkPartner>>> {
        self.partners.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn active_link_partner(&self, domain: &BusinessDomainId, name: &LinkPartnerName) -> Option<Arc<ActiveLinkPartner>> {
        self.read_partners().get(&(domain.clone(), name.clone())).cloned()
    }

    /// Active partners, of one domain or of all domains
    pub fn active_link_partners(&self, domain: Option<&BusinessDomainId>) -> Vec<Arc<ActiveLinkPartner>> {
        let mut partners: Vec<_> = self
            .read_partners()
            .iter()
            .filter(|((d, _), _)| domain.map_or(true, |wanted| d == wanted))
            .map(|(_, p)| Arc::clone(p))
            .collect();
        partners.sort_by(|a, b| (a.domain(), a.name()).cmp(&(b.domain(), b.name())));
        partners
    }

    pub fn active_link(&self, domain: &BusinessDomainId, config_name: &LinkConfigName) -> Option<Arc<ActiveLink>> {
        self.read_links().get(&(domain.clone(), config_name.clone())).cloned()
    }

    pub fn active_links(&self) -> Vec<Arc<ActiveLink>> {
        let mut links: Vec<_> = self.read_links().values().cloned().collect();
        links.sort_by(|a, b| (a.domain(), a.config_name()).cmp(&(b.domain(), b.config_name())));
        links
    }

    pub fn is_active(&self, domain: &BusinessDomainId, name: &LinkPartnerName) -> bool {
        self.active_link_partner(domain, name)
            .is_some_and(|p| p.ensure_usable().is_ok())
    }
}

impl Drop for LinkManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for LinkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkManager")
            .field("plugins", &self.plugins.iter().map(|p| p.name().to_string()).collect::<Vec<_>>())
            .field("links", &self.read_links().len())
            .field("partners", &self.read_partners().len())
            .finish()
    }
}

fn run_pull(pull: &dyn PullFromLinkPartner, connector: &dyn SubmitToConnector, active: &ActiveLinkPartner) -> usize {
    let messages = match pull.pull_from_link_partner(active.name()) {
        Ok(messages) => messages,
        Err(e) => {
            warn!(partner = %active.name(), error = %e, "Pull from link partner failed");
            return 0;
        }
    };

    let mut delivered = 0;
    for message in messages {
        let message_id = message.connector_message_id.clone();
        match connector.submit_to_connector(message, active.domain(), active.name(), active.link_type()) {
            Ok(()) => delivered += 1,
            Err(e) => error!(partner = %active.name(), message_id = %message_id, error = %e, "Pulled message rejected"),
        }
    }
    delivered
}

async fn pull_loop(
    interval: std::time::Duration,
    pull: Arc<dyn PullFromLinkPartner>,
    connector: Arc<dyn SubmitToConnector>,
    partner: Weak<ActiveLinkPartner>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(active) = partner.upgrade() else {
            return;
        };
        if active.ensure_usable().is_err() {
            return;
        }
        run_pull(pull.as_ref(), connector.as_ref(), &active);
    }
}
