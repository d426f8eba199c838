// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One run, end to end: normalize, filter, retrieve, extract, dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info_span, warn, Instrument};

use crate::config::{Config, ConfigError};
use crate::credentials::{CredentialResolver, StaticCredentials};
use crate::delivery::dispatcher::DeliveryDispatcher;
use crate::delivery::signer::{StaticTokenSigner, TokenSigner};
use crate::event::{CiEvent, EventNormalizer};
use crate::extractor::ErrorExtractor;
use crate::filter::{filter_run, FilterConfig};
use crate::http::get_client;
use crate::model::{PipelineRun, Platform, UnitLog, UnitRef};
use crate::monitor::{RunMonitor, RunOutcome, RunReport, TracingMonitor, UnitCounts};
use crate::platform::gitlab::GitLabClient;
use crate::platform::jenkins::JenkinsClient;
use crate::platform::{ActorLookup, BuildMetadataSource};
use crate::reliability::circuit::CircuitRegistry;
use crate::reliability::Reliability;
use crate::retriever::{LogRetriever, LogSource};

/// Everything the relay talks to outside its own process.
#[derive(Clone)]
pub struct Collaborators {
    pub client: reqwest::Client,
    pub log_sources: HashMap<Platform, Arc<dyn LogSource>>,
    pub metadata: Option<Arc<dyn BuildMetadataSource>>,
    pub actors: Option<Arc<dyn ActorLookup>>,
    pub signer: Option<Arc<dyn TokenSigner>>,
    pub monitor: Arc<dyn RunMonitor>,
    pub circuits: Arc<CircuitRegistry>,
}

impl Collaborators {
    /// GitLab and Jenkins clients sharing one HTTP client, the configured delivery token and
    /// a logging monitor.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let client = get_client(config);
        let gitlab = Arc::new(GitLabClient::new(
            client.clone(),
            &config.gitlab_url,
            config.gitlab_token.clone(),
        ));
        let credentials: Arc<dyn CredentialResolver> =
            Arc::new(StaticCredentials::from_config(config));
        let jenkins = Arc::new(JenkinsClient::new(
            client.clone(),
            config.jenkins_url.as_deref(),
            credentials,
        ));

        let mut log_sources: HashMap<Platform, Arc<dyn LogSource>> = HashMap::new();
        log_sources.insert(Platform::Gitlab, Arc::clone(&gitlab) as Arc<dyn LogSource>);
        log_sources.insert(Platform::Jenkins, Arc::clone(&jenkins) as Arc<dyn LogSource>);

        let signer = config
            .delivery_token
            .as_deref()
            .map(|token| Arc::new(StaticTokenSigner::new(token)) as Arc<dyn TokenSigner>);

        Self {
            client,
            log_sources,
            metadata: Some(jenkins),
            actors: Some(gitlab),
            signer,
            monitor: Arc::new(TracingMonitor),
            circuits: CircuitRegistry::global(),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("log_sources", &self.log_sources.keys().collect::<Vec<_>>())
            .field("metadata", &self.metadata.is_some())
            .field("actors", &self.actors.is_some())
            .field("signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct RunProcessor {
    normalizer: EventNormalizer,
    filter: FilterConfig,
    retriever: LogRetriever,
    extractor: Arc<ErrorExtractor>,
    dispatcher: DeliveryDispatcher,
    log_sources: HashMap<Platform, Arc<dyn LogSource>>,
    max_concurrent_units: usize,
}

impl std::fmt::Debug for RunProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunProcessor")
            .field("filter", &self.filter)
            .field("dispatcher", &self.dispatcher)
            .field("max_concurrent_units", &self.max_concurrent_units)
            .finish_non_exhaustive()
    }
}

impl RunProcessor {
    /// Fails only when a configured pattern does not compile.
    pub fn new(config: &Config, collaborators: &Collaborators) -> Result<Self, ConfigError> {
        let reliability =
            Reliability::with_registry(&config.reliability_config(), Arc::clone(&collaborators.circuits));

        Ok(Self {
            normalizer: EventNormalizer::new(
                reliability.clone(),
                collaborators.metadata.clone(),
                collaborators.actors.clone(),
            ),
            filter: config.filter_config(),
            retriever: LogRetriever::new(config.retrieval_config(), reliability.clone()),
            extractor: Arc::new(ErrorExtractor::new(&config.extraction_config())?),
            dispatcher: DeliveryDispatcher::new(
                config.delivery_config(),
                collaborators.client.clone(),
                reliability,
                collaborators.signer.clone(),
            ),
            log_sources: collaborators.log_sources.clone(),
            max_concurrent_units: config.max_concurrent_units.max(1),
        })
    }

    pub async fn process(&self, event: &CiEvent) -> RunReport {
        let run = match self.normalizer.normalize(event).await {
            Ok(run) => run,
            Err(e) => {
                warn!(platform = %event.platform, "NORMALIZER | Rejected event: {}", e);
                return RunReport::rejected(event.platform, e.to_string());
            }
        };

        let span = info_span!("run", platform = %run.platform, run_id = %run.run_id);
        self.process_run(run).instrument(span).await
    }

    async fn process_run(&self, mut run: PipelineRun) -> RunReport {
        let decision = filter_run(&run, &self.filter);
        let mut counts = UnitCounts {
            selected: decision.selected.len(),
            skipped: decision.skipped.len(),
            ..UnitCounts::default()
        };
        if !decision.should_dispatch() {
            debug!(project = %run.project.path, "FILTER | Nothing to dispatch");
            return RunReport::for_run(&run, counts, RunOutcome::Filtered(decision.run_excluded_by));
        }

        let logs = self.retrieve_all(&run, &decision.selected).await;
        {
            let mut leaves = run.leaves_mut();
            for (leaf_index, log) in logs {
                let Some(unit) = leaves.get_mut(leaf_index) else {
                    continue;
                };
                match &log {
                    UnitLog::Fetched(chunk) => {
                        counts.fetched += 1;
                        if self.extractor.should_extract(unit.status) {
                            unit.errors = self.extractor.extract(&unit.name, chunk);
                        }
                    }
                    UnitLog::FetchFailed { .. } => counts.fetch_failed += 1,
                    UnitLog::NotRequested => {}
                }
                unit.log = log;
            }
        }

        let delivery = self.dispatcher.dispatch(&run).await;
        let mut report = RunReport::for_run(&run, counts, RunOutcome::Dispatched(delivery.state));
        report.attempts = delivery.attempts;
        report
    }

    /// Retrieves the selected units, at most `max_concurrent_units` at a time. Results keep
    /// the selection order.
    async fn retrieve_all(&self, run: &PipelineRun, selected: &[UnitRef]) -> Vec<(usize, UnitLog)> {
        let Some(source) = self.log_sources.get(&run.platform) else {
            warn!("RETRIEVER | No log source for platform {}", run.platform);
            return selected
                .iter()
                .map(|unit| {
                    let reason = format!("no log source for {}", run.platform);
                    (unit.leaf_index, UnitLog::FetchFailed { reason })
                })
                .collect();
        };
        let source: &dyn LogSource = source.as_ref();

        let fetches: Vec<_> = selected
            .iter()
            .map(|unit| self.retrieve_one(source, unit))
            .collect();
        stream::iter(fetches)
            .buffered(self.max_concurrent_units)
            .collect()
            .await
    }

    async fn retrieve_one(&self, source: &dyn LogSource, unit: &UnitRef) -> (usize, UnitLog) {
        let log = match self.retriever.retrieve(source, unit, &self.extractor).await {
            Ok(chunk) => UnitLog::Fetched(chunk),
            Err(e) => {
                warn!(unit = %unit.name, "RETRIEVER | {}", e);
                UnitLog::FetchFailed {
                    reason: e.to_string(),
                }
            }
        };
        (unit.leaf_index, log)
    }
}
