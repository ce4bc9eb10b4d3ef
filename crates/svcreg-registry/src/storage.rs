//! In-memory registration store.
//!
//! The authoritative, ordered list of live instances behind one
//! reader/writer lock. `add` and `remove` take the exclusive side, `notify`
//! and `send_required_services` the shared side.
//!
//! Fan-out for a mutation is planned and queued while the exclusive lock is
//! still held. Queueing never blocks, and it pins the delivery order of each
//! dependent to the order of the mutations: a dependent can never receive
//! the removal of an instance before its addition.

use crate::config::DuplicatePolicy;
use crate::delivery::{Dispatcher, FanoutRound, PendingDelivery};
use crate::fanout;
use parking_lot::RwLock;
use svcreg_common::{Error, Patch, Registration, Result};
use tracing::{debug, info};

/// Thread-safe registration storage with change propagation.
///
/// Passed around as `Arc<RegistrationStore>`; there is no process-wide
/// instance, so several independent registries can live in one process.
pub struct RegistrationStore {
    registrations: RwLock<Vec<Registration>>,
    dispatcher: Dispatcher,
    policy: DuplicatePolicy,
}

impl RegistrationStore {
    /// Creates an empty store.
    pub fn new(dispatcher: Dispatcher, policy: DuplicatePolicy) -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            dispatcher,
            policy,
        }
    }

    /// Registers an instance.
    ///
    /// The new instance is primed with every already-registered instance it
    /// requires, and every other dependent of its service name is sent an
    /// "added" patch. Returns once the priming patch was delivered; the
    /// error, if any, is the priming error. The instance stays registered
    /// even when priming fails.
    pub async fn add(&self, registration: Registration) -> Result<FanoutRound> {
        let (priming, round) = {
            let mut registrations = self.registrations.write();

            if self.policy == DuplicatePolicy::Reject
                && registrations
                    .iter()
                    .any(|existing| existing.service_url == registration.service_url)
            {
                return Err(Error::duplicate_registration(&registration.service_url));
            }

            let priming_patch =
                fanout::required_services_patch(&registration, registrations.iter());
            let priming = self
                .dispatcher
                .enqueue(&registration.service_update_url, priming_patch);

            let planned = fanout::plan(&Patch::added(registration.entry()), registrations.iter());
            let round = self.dispatcher.dispatch(planned);

            registrations.push(registration.clone());
            (priming, round)
        };

        info!(
            service = %registration.service_name,
            url = %registration.service_url,
            dependents = round.len(),
            "Added service"
        );

        priming.wait().await?;
        Ok(round)
    }

    /// Deregisters the first instance with `url` and sends a "removed" patch
    /// to every remaining dependent of its service name.
    pub fn remove(&self, url: &str) -> Result<FanoutRound> {
        let (removed, round) = {
            let mut registrations = self.registrations.write();

            let index = registrations
                .iter()
                .position(|existing| existing.service_url == url)
                .ok_or_else(|| Error::registration_not_found(url))?;
            let removed = registrations.remove(index);

            let planned = fanout::plan(&Patch::removed(removed.entry()), registrations.iter());
            let round = self.dispatcher.dispatch(planned);

            if !registrations
                .iter()
                .any(|existing| existing.service_update_url == removed.service_update_url)
            {
                self.dispatcher.retire(&removed.service_update_url);
            }
            (removed, round)
        };

        info!(
            service = %removed.service_name,
            url = %removed.service_url,
            dependents = round.len(),
            "Removed service"
        );
        Ok(round)
    }

    /// Sends every registered dependent the part of `patch` it requires.
    ///
    /// Deliveries are queued, not awaited; join the returned round to wait.
    pub fn notify(&self, patch: &Patch) -> FanoutRound {
        let registrations = self.registrations.read();
        let round = self
            .dispatcher
            .dispatch(fanout::plan(patch, registrations.iter()));
        debug!(dependents = round.len(), "Fanned out patch");
        round
    }

    /// Sends `registration` one patch listing every registered instance it
    /// requires and waits for the delivery.
    pub async fn send_required_services(&self, registration: &Registration) -> Result<()> {
        let pending: PendingDelivery = {
            let registrations = self.registrations.read();
            let patch = fanout::required_services_patch(registration, registrations.iter());
            self.dispatcher
                .enqueue(&registration.service_update_url, patch)
        };
        pending.wait().await
    }

    /// Copy of the current registrations, in registration order.
    pub fn snapshot(&self) -> Vec<Registration> {
        self.registrations.read().clone()
    }

    /// Returns the first registration with `url`.
    pub fn find(&self, url: &str) -> Result<Registration> {
        self.registrations
            .read()
            .iter()
            .find(|existing| existing.service_url == url)
            .cloned()
            .ok_or_else(|| Error::registration_not_found(url))
    }

    pub fn contains(&self, url: &str) -> bool {
        self.registrations
            .read()
            .iter()
            .any(|existing| existing.service_url == url)
    }

    /// Returns the number of registrations.
    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.read().is_empty()
    }
}
