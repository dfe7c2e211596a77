//! Background sweeps. Each task is idempotent, so a missed or repeated tick
//! is harmless.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::config::JobsConfig;
use crate::services::catalog::CatalogService;
use crate::services::notify::NotificationDispatcher;
use crate::state::AppState;
use crate::store::Store;
use crate::utils::error::AppResult;

#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    /// Returns how many records were touched.
    async fn run(&self) -> AppResult<u64>;
}

pub fn start_scheduler(state: &AppState, config: &JobsConfig) -> Vec<JoinHandle<()>> {
    let tasks: Vec<Box<dyn PeriodicTask>> = vec![
        Box::new(HoldExpiryTask {
            store: state.store.clone(),
            every: config.hold_sweep_interval,
        }),
        Box::new(StatusSweepTask {
            catalog: state.catalog.clone(),
            every: config.status_sweep_interval,
        }),
        Box::new(ReminderTask {
            store: state.store.clone(),
            notifier: state.notifier.clone(),
            every: config.reminder_interval,
            window: config.reminder_window,
        }),
    ];

    let handles = tasks
        .into_iter()
        .map(|task| tokio::spawn(run_task(task)))
        .collect();

    tracing::info!("Periodic task scheduler started");
    handles
}

async fn run_task(task: Box<dyn PeriodicTask>) {
    let mut ticker = interval(task.interval());

    loop {
        ticker.tick().await;

        tracing::debug!(task = task.name(), "Running periodic task");
        match task.run().await {
            Ok(0) => {}
            Ok(count) => tracing::info!(task = task.name(), count, "Periodic task completed"),
            Err(e) => tracing::error!(task = task.name(), error = %e, "Periodic task failed"),
        }
    }
}

/// Gives seats held by abandoned payments back to the event.
pub struct HoldExpiryTask {
    pub store: Arc<dyn Store>,
    pub every: Duration,
}

#[async_trait]
impl PeriodicTask for HoldExpiryTask {
    fn name(&self) -> &'static str {
        "hold_expiry"
    }

    fn interval(&self) -> Duration {
        self.every
    }

    async fn run(&self) -> AppResult<u64> {
        Ok(self.store.release_expired_holds(Utc::now()).await?)
    }
}

pub struct StatusSweepTask {
    pub catalog: Arc<CatalogService>,
    pub every: Duration,
}

#[async_trait]
impl PeriodicTask for StatusSweepTask {
    fn name(&self) -> &'static str {
        "event_status_sweep"
    }

    fn interval(&self) -> Duration {
        self.every
    }

    async fn run(&self) -> AppResult<u64> {
        self.catalog.complete_past_events(Utc::now()).await
    }
}

/// Mails each active ticket holder once before their event starts.
pub struct ReminderTask {
    pub store: Arc<dyn Store>,
    pub notifier: NotificationDispatcher,
    pub every: Duration,
    pub window: chrono::Duration,
}

#[async_trait]
impl PeriodicTask for ReminderTask {
    fn name(&self) -> &'static str {
        "event_reminders"
    }

    fn interval(&self) -> Duration {
        self.every
    }

    async fn run(&self) -> AppResult<u64> {
        let now = Utc::now();
        let due = self.store.tickets_due_for_reminder(now, now + self.window).await?;
        let mut sent = 0;

        for ticket in due {
            let (Some(account), Some(event)) = (
                self.store.find_account(ticket.user_id).await?,
                self.store.find_event(ticket.event_id).await?,
            ) else {
                continue;
            };

            match self
                .notifier
                .send_reminder(&account.email, &event, &ticket.ticket_number)
                .await
            {
                Ok(()) => {
                    self.store.mark_reminded(ticket.id, Utc::now()).await?;
                    sent += 1;
                }
                // Left unmarked, so the next sweep tries again.
                Err(e) => tracing::error!(
                    ticket_number = %ticket.ticket_number,
                    error = %e,
                    "Reminder delivery failed"
                ),
            }
        }

        Ok(sent)
    }
}
