//! Budget-aware execution of invalidation batches.

use crate::budget::RequestBudget;
use crate::config::{DispatchMode, PurgerSettings};
use crate::errors::{DispatchError, ValidationError};
use crate::invalidation::{Invalidation, InvalidationTypes, RequestOutcome, StatusPolicy};
use crate::metrics_defs::{
    BUDGET_REMAINING, COOLDOWN_DURATION, INVALIDATIONS_FAILED, INVALIDATIONS_SUCCEEDED,
    REQUEST_DURATION, REQUESTS_ISSUED,
};
use crate::request::{PurgeRequest, RequestBuilder};
use crate::transport::{HttpTransport, Transport};
use shared::{counter, gauge, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Label used when a purger has no name.
pub const DEFAULT_LABEL: &str = "HTTP Purger";

/// Executes batches of invalidations for one purger instance.
///
/// Each invalidation gets exactly one attempt. Requests count against a
/// lifetime budget of `max_requests`; once it is spent every further
/// invalidation fails immediately without touching the network. After a batch
/// that issued at least one request the dispatcher sleeps for the cooldown
/// time before returning.
pub struct Dispatcher {
    settings: PurgerSettings,
    builder: RequestBuilder,
    policy: StatusPolicy,
    transport: Arc<dyn Transport>,
    budget: Arc<RequestBudget>,
}

impl Dispatcher {
    /// Validates `settings` and creates a dispatcher sending over HTTP.
    pub fn new(settings: PurgerSettings, types: InvalidationTypes) -> Result<Self, ValidationError> {
        let mut settings = settings;
        settings.validate(&types)?;
        let transport = Arc::new(HttpTransport::new(&settings)?);
        Self::build(settings, types, transport)
    }

    /// Validates `settings` and creates a dispatcher sending over `transport`.
    pub fn with_transport(
        settings: PurgerSettings,
        types: InvalidationTypes,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ValidationError> {
        let mut settings = settings;
        settings.validate(&types)?;
        Self::build(settings, types, transport)
    }

    fn build(
        settings: PurgerSettings,
        types: InvalidationTypes,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ValidationError> {
        let builder = RequestBuilder::new(&settings, types)?;
        let policy = builder.status_policy();
        let budget = Arc::new(RequestBudget::new(settings.max_requests as u64));

        Ok(Dispatcher {
            settings,
            builder,
            policy,
            transport,
            budget,
        })
    }

    pub fn id(&self) -> &str {
        &self.settings.id
    }

    /// The configured name, or the default label.
    pub fn label(&self) -> &str {
        if self.settings.name.is_empty() {
            DEFAULT_LABEL
        } else {
            &self.settings.name
        }
    }

    /// Invalidation types this purger handles.
    pub fn types(&self) -> Vec<&str> {
        vec![self.settings.invalidation_type.as_str()]
    }

    pub fn cooldown_time(&self) -> f64 {
        self.settings.cooldown_time
    }

    /// Number of requests this purger can make over its lifetime.
    pub fn ideal_conditions_limit(&self) -> u32 {
        self.settings.max_requests
    }

    /// Worst-case seconds a single request may take.
    pub fn time_hint(&self) -> f64 {
        self.settings.time_hint()
    }

    pub fn remaining_budget(&self) -> u64 {
        self.budget.remaining()
    }

    /// Requests issued so far over the lifetime of this dispatcher.
    pub fn requests_issued(&self) -> u64 {
        self.budget.issued()
    }

    pub fn settings(&self) -> &PurgerSettings {
        &self.settings
    }

    /// Runs one batch. Returns one outcome per job, in job order. Never fails
    /// as a whole: every error is captured in the job's outcome.
    pub async fn run_batch(&self, jobs: &[Invalidation]) -> Vec<RequestOutcome> {
        let (outcomes, issued) = match self.settings.mode {
            DispatchMode::Single => self.dispatch_each(jobs).await,
            DispatchMode::Bundled => self.dispatch_bundle(jobs).await,
        };

        self.record(&outcomes, issued);

        if issued > 0 {
            self.cool_down().await;
        }

        outcomes
    }

    /// One request per job. Jobs are built and charged against the budget in
    /// submission order; sends run on up to `concurrency` tasks.
    async fn dispatch_each(&self, jobs: &[Invalidation]) -> (Vec<RequestOutcome>, usize) {
        let mut outcomes: Vec<Option<RequestOutcome>> = vec![None; jobs.len()];
        let mut issued = 0;
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut join_set = JoinSet::new();

        for (index, job) in jobs.iter().enumerate() {
            // A spent budget fails every later job, buildable or not
            if self.budget.is_exhausted() {
                outcomes[index] = Some(RequestOutcome::Failed(DispatchError::BudgetExhausted));
                continue;
            }

            let request = match self.builder.build(job) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(purger = %self.id(), job_type = %job.r#type, target = %job.target, "Could not build request: {e}");
                    outcomes[index] = Some(RequestOutcome::Failed(e.into()));
                    continue;
                }
            };

            // Wait for a free worker before charging the budget
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    outcomes[index] = Some(RequestOutcome::Failed(DispatchError::ConnectionFailed(
                        "dispatcher is shutting down".into(),
                    )));
                    continue;
                }
            };

            if !self.budget.try_acquire() {
                tracing::debug!(purger = %self.id(), target = %job.target, "Request budget exhausted");
                outcomes[index] = Some(RequestOutcome::Failed(DispatchError::BudgetExhausted));
                continue;
            }
            issued += 1;

            let transport = self.transport.clone();
            let policy = self.policy.clone();
            let purger = self.settings.id.clone();
            join_set.spawn(async move {
                let outcome = send(transport.as_ref(), &request, &policy, purger).await;
                drop(permit);
                (index, outcome)
            });
        }

        while let Some(result) = join_set.join_next().await {
            match result {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => tracing::error!("Task panicked: {}", e),
            }
        }

        (finish(outcomes), issued)
    }

    /// One request for all buildable jobs; its outcome applies to each of them.
    async fn dispatch_bundle(&self, jobs: &[Invalidation]) -> (Vec<RequestOutcome>, usize) {
        if self.budget.is_exhausted() {
            let outcome = RequestOutcome::Failed(DispatchError::BudgetExhausted);
            return (vec![outcome; jobs.len()], 0);
        }

        let mut outcomes: Vec<Option<RequestOutcome>> = vec![None; jobs.len()];
        let mut bundled = Vec::new();

        for (index, job) in jobs.iter().enumerate() {
            match self.builder.check_bundled(job) {
                Ok(()) => bundled.push(index),
                Err(e) => {
                    tracing::warn!(purger = %self.id(), job_type = %job.r#type, target = %job.target, "Could not bundle invalidation: {e}");
                    outcomes[index] = Some(RequestOutcome::Failed(e.into()));
                }
            }
        }

        if bundled.is_empty() {
            return (finish(outcomes), 0);
        }

        let bundle_jobs: Vec<&Invalidation> = bundled.iter().map(|&index| &jobs[index]).collect();
        let (outcome, issued) = match self.builder.build_bundle(&bundle_jobs) {
            Err(e) => (RequestOutcome::Failed(e.into()), 0),
            Ok(_) if !self.budget.try_acquire() => {
                (RequestOutcome::Failed(DispatchError::BudgetExhausted), 0)
            }
            Ok(request) => {
                let purger = self.settings.id.clone();
                let outcome = send(self.transport.as_ref(), &request, &self.policy, purger).await;
                (outcome, 1)
            }
        };

        for index in bundled {
            outcomes[index] = Some(outcome.clone());
        }

        (finish(outcomes), issued)
    }

    async fn cool_down(&self) {
        let cooldown = self.settings.cooldown();
        if cooldown.is_zero() {
            return;
        }

        tracing::debug!(purger = %self.id(), seconds = self.settings.cooldown_time, "Cooling down");
        let start = Instant::now();
        tokio::time::sleep(cooldown).await;
        histogram!(COOLDOWN_DURATION, "purger" => self.settings.id.clone())
            .record(start.elapsed().as_secs_f64());
    }

    fn record(&self, outcomes: &[RequestOutcome], issued: usize) {
        let purger = self.settings.id.clone();
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let failed = outcomes.len() - succeeded;

        counter!(REQUESTS_ISSUED, "purger" => purger.clone()).increment(issued as u64);
        counter!(INVALIDATIONS_SUCCEEDED, "purger" => purger.clone()).increment(succeeded as u64);
        for outcome in outcomes {
            if let RequestOutcome::Failed(reason) = outcome {
                counter!(INVALIDATIONS_FAILED, "purger" => purger.clone(), "reason" => reason_tag(reason))
                    .increment(1);
            }
        }
        gauge!(BUDGET_REMAINING, "purger" => purger).set(self.budget.remaining() as f64);

        tracing::info!(
            purger = %self.id(),
            issued,
            succeeded,
            failed,
            total_issued = self.budget.issued(),
            limit = self.budget.limit(),
            "Batch processed"
        );
    }
}

/// Sends one request and maps the result onto an outcome.
async fn send(
    transport: &dyn Transport,
    request: &PurgeRequest,
    policy: &StatusPolicy,
    purger: String,
) -> RequestOutcome {
    let start = Instant::now();
    let result = transport.send(request).await;
    histogram!(REQUEST_DURATION, "purger" => purger).record(start.elapsed().as_secs_f64());

    match result {
        Ok(status) if policy.accepts(status) => {
            tracing::debug!(method = %request.method, url = %request.url, %status, "Invalidation succeeded");
            RequestOutcome::Succeeded
        }
        Ok(status) => {
            tracing::warn!(method = %request.method, url = %request.url, %status, "Unacceptable response");
            RequestOutcome::Failed(DispatchError::UnacceptableResponse(status))
        }
        Err(e) => {
            tracing::warn!(method = %request.method, url = %request.url, "Request failed: {e}");
            RequestOutcome::Failed(e)
        }
    }
}

// A slot is only empty if its send task panicked.
fn finish(outcomes: Vec<Option<RequestOutcome>>) -> Vec<RequestOutcome> {
    outcomes
        .into_iter()
        .map(|outcome| {
            outcome.unwrap_or_else(|| {
                RequestOutcome::Failed(DispatchError::ConnectionFailed("send task aborted".into()))
            })
        })
        .collect()
}

fn reason_tag(reason: &DispatchError) -> &'static str {
    match reason {
        DispatchError::BudgetExhausted => "budget_exhausted",
        DispatchError::Build(_) => "build_error",
        DispatchError::ConnectTimeout => "connect_timeout",
        DispatchError::RequestTimeout => "request_timeout",
        DispatchError::ConnectionFailed(_) => "connection_failed",
        DispatchError::UnacceptableResponse(_) => "unacceptable_response",
    }
}

/// Worst-case wall clock time of a fully sequential batch of `jobs` invalidations.
pub fn batch_time_ceiling(settings: &PurgerSettings, jobs: usize) -> Duration {
    Duration::from_secs_f64(settings.time_hint() * jobs as f64) + settings.cooldown()
}
