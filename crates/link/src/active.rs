//! ActiveLink / ActiveLinkPartner - runtime records of started links

use crate::context::LinkContext;
use crate::plugin::{PullFromLinkPartner, SubmitToLinkPartner};
use shared::{
    BusinessDomainId, LinkConfigName, LinkConfiguration, LinkPartner, LinkPartnerName, LinkPluginError,
    LinkType,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

/// A started link configuration.
///
/// Owns its context and the list of its enabled partners. Owned by the
/// [`LinkManager`](crate::LinkManager).
pub struct ActiveLink {
    plugin_name: String,
    context: Arc<LinkContext>,
    submit: Option<Arc<dyn SubmitToLinkPartner>>,
    partners: RwLock<BTreeMap<LinkPartnerName, Arc<ActiveLinkPartner>>>,
}

impl ActiveLink {
    pub fn new(plugin_name: impl Into<String>, context: LinkContext) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            context: Arc::new(context),
            submit: None,
            partners: RwLock::new(BTreeMap::new()),
        }
    }

    /// Builder: submit capability shared by all partners of the link
    pub fn with_submit(mut self, submit: Arc<dyn SubmitToLinkPartner>) -> Self {
        self.submit = Some(submit);
        self
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn context(&self) -> &Arc<LinkContext> {
        &self.context
    }

    pub fn configuration(&self) -> &LinkConfiguration {
        self.context.configuration()
    }

    pub fn config_name(&self) -> &LinkConfigName {
        self.context.config_name()
    }

    pub fn domain(&self) -> &BusinessDomainId {
        self.context.domain()
    }

    pub fn is_active(&self) -> bool {
        !self.context.is_closed()
    }

    pub fn submit(&self) -> Option<Arc<dyn SubmitToLinkPartner>> {
        self.submit.clone()
    }

    /// Names of the partners currently enabled on this link
    pub fn partner_names(&self) -> Vec<LinkPartnerName> {
        self.read_partners().keys().cloned().collect()
    }

    pub fn partner_count(&self) -> usize {
        self.read_partners().len()
    }

    pub(crate) fn attach_partner(&self, partner: Arc<ActiveLinkPartner>) {
        self.partners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(partner.name().clone(), partner);
    }

    pub(crate) fn detach_partner(&self, name: &LinkPartnerName) -> Option<Arc<ActiveLinkPartner>> {
        self.partners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name)
    }

    pub(crate) fn detach_all(&self) -> Vec<Arc<ActiveLinkPartner>> {
        let mut partners = self.partners.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *partners).into_values().collect()
    }

    fn read_partners(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<LinkPartnerName, Arc<ActiveLinkPartner>>> {
        self.partners.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ActiveLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveLink")
            .field("plugin", &self.plugin_name)
            .field("config_name", self.config_name())
            .field("domain", self.domain())
            .field("active", &self.is_active())
            .field("partners", &self.partner_names())
            .finish()
    }
}

/// Lifecycle state of an enabled partner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartnerState {
    Enabled,
    Shutdown,
    /// A lifecycle failure left the partner unusable
    Unusable(String),
}

/// A link partner enabled on an [`ActiveLink`].
///
/// Refers to its parent through a weak reference; the parent owns the
/// partner, not the other way round.
pub struct ActiveLinkPartner {
    partner: LinkPartner,
    parent: Weak<ActiveLink>,
    submit: Option<Arc<dyn SubmitToLinkPartner>>,
    pull: Option<Arc<dyn PullFromLinkPartner>>,
    state: RwLock<PartnerState>,
    /// Serializes submits for plugins that are not safe for concurrent use
    submit_lock: Mutex<()>,
}

impl ActiveLinkPartner {
    pub fn new(partner: LinkPartner, parent: &Arc<ActiveLink>) -> Self {
        Self {
            partner,
            parent: Arc::downgrade(parent),
            submit: None,
            pull: None,
            state: RwLock::new(PartnerState::Enabled),
            submit_lock: Mutex::new(()),
        }
    }

    /// Builder: partner specific submit capability
    pub fn with_submit(mut self, submit: Arc<dyn SubmitToLinkPartner>) -> Self {
        self.submit = Some(submit);
        self
    }

    /// Builder: partner specific pull capability
    pub fn with_pull(mut self, pull: Arc<dyn PullFromLinkPartner>) -> Self {
        self.pull = Some(pull);
        self
    }

    pub fn link_partner(&self) -> &LinkPartner {
        &self.partner
    }

    pub fn name(&self) -> &LinkPartnerName {
        &self.partner.link_partner_name
    }

    pub fn domain(&self) -> &BusinessDomainId {
        self.partner.domain()
    }

    pub fn link_type(&self) -> LinkType {
        self.partner.link_type
    }

    /// Parent link, if it still exists
    pub fn parent(&self) -> Option<Arc<ActiveLink>> {
        self.parent.upgrade()
    }

    pub fn submit(&self) -> Option<Arc<dyn SubmitToLinkPartner>> {
        self.submit.clone()
    }

    pub fn pull(&self) -> Option<Arc<dyn PullFromLinkPartner>> {
        self.pull.clone()
    }

    pub fn state(&self) -> PartnerState {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub(crate) fn set_state(&self, state: PartnerState) {
        *self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    pub(crate) fn lock_submit(&self) -> MutexGuard<'_, ()> {
        self.submit_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail unless the partner and its parent link can take messages
    pub fn ensure_usable(&self) -> Result<Arc<ActiveLink>, LinkPluginError> {
        match self.state() {
            PartnerState::Enabled => {}
            PartnerState::Shutdown => {
                return Err(LinkPluginError::PartnerShutdown {
                    partner: self.name().clone(),
                })
            }
            PartnerState::Unusable(reason) => {
                return Err(LinkPluginError::PartnerUnusable {
                    partner: self.name().clone(),
                    reason,
                })
            }
        }
        let parent = self.parent().ok_or_else(|| LinkPluginError::PartnerShutdown {
            partner: self.name().clone(),
        })?;
        parent.context().ensure_open()?;
        Ok(parent)
    }
}

impl std::fmt::Debug for ActiveLinkPartner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveLinkPartner")
            .field("name", self.name())
            .field("domain", self.domain())
            .field("link_type", &self.link_type())
            .field("state", &self.state())
            .finish()
    }
}
