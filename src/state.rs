use std::sync::Arc;

use crate::config::Config;
use crate::services::catalog::CatalogService;
use crate::services::identity::IdentityService;
use crate::services::notify::{Mailer, NotificationDispatcher, RetryPolicy};
use crate::services::payment::PaymentGateway;
use crate::services::registration::RegistrationService;
use crate::services::tickets::TicketLedger;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub identity: Arc<IdentityService>,
    pub catalog: Arc<CatalogService>,
    pub tickets: Arc<TicketLedger>,
    pub registrations: Arc<RegistrationService>,
    pub notifier: NotificationDispatcher,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self::with_retry(config, store, gateway, mailer, RetryPolicy::default())
    }

    pub fn with_retry(
        config: Config,
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
        retry: RetryPolicy,
    ) -> Self {
        let notifier = NotificationDispatcher::new(mailer, config.mail.app_url.clone(), retry);
        let identity = Arc::new(IdentityService::new(store.clone(), &config.auth, notifier.clone()));
        let catalog = Arc::new(CatalogService::new(store.clone()));
        let tickets = Arc::new(TicketLedger::new(store.clone()));
        let registrations = Arc::new(RegistrationService::new(
            store.clone(),
            tickets.clone(),
            gateway,
            notifier.clone(),
            config.payment.currency.clone(),
            config.payment.hold_ttl,
        ));

        Self {
            config: Arc::new(config),
            store,
            identity,
            catalog,
            tickets,
            registrations,
            notifier,
        }
    }
}
