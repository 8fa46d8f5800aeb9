//! Per-chain collaborators.
//!
//! # Responsibilities
//! - Assemble deriver, state source, sponsorship client and submitter per chain
//! - Rebuild on config reload while keeping submitters whose relay is unchanged
//!
//! # Design Decisions
//! - A registry is immutable; reloads build a new one and swap it atomically
//! - Keeping the submitter keeps its receipt cache, so handles stay pollable
//! - Sponsorship counters follow the chain id across reloads

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;

use crate::account::{Account, AccountState, AddressDeriver};
use crate::chain::{AccountStateSource, ChainClient, ChainError};
use crate::config::{ChainConfig, RetryConfig, WalletConfig};
use crate::lifecycle::Shutdown;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::relay::{BundlerRpc, RelayService, RelaySubmitter};
use crate::sponsor::{
    PaymasterRpc, SponsorshipClient, SponsorshipPolicy, SponsorshipService, SponsorshipStats,
};
use crate::userop::OperationBuilder;

/// Everything the pipeline needs to operate on one chain.
pub struct ChainContext {
    pub config: ChainConfig,
    pub deriver: AddressDeriver,
    pub state: Arc<dyn AccountStateSource>,
    pub sponsorship: SponsorshipClient,
    pub submitter: Arc<RelaySubmitter>,
}

impl ChainContext {
    /// Wire a chain from explicit collaborators.
    pub fn assemble(
        config: ChainConfig,
        settings: &WalletConfig,
        state: Arc<dyn AccountStateSource>,
        paymaster: Option<Arc<dyn SponsorshipService>>,
        relay: Arc<dyn RelayService>,
    ) -> Self {
        let submitter = Arc::new(RelaySubmitter::new(
            relay,
            config.chain_id,
            config.entry_point,
            Duration::from_secs(settings.relay.timeout_secs),
            settings.relay.drop_after_misses,
        )
        .with_retention(Duration::from_secs(settings.relay.receipt_retention_secs)));
        Self::with_submitter(config, settings, state, paymaster, submitter)
    }

    fn with_submitter(
        config: ChainConfig,
        settings: &WalletConfig,
        state: Arc<dyn AccountStateSource>,
        paymaster: Option<Arc<dyn SponsorshipService>>,
        submitter: Arc<RelaySubmitter>,
    ) -> Self {
        let sponsorship = SponsorshipClient::new(
            paymaster,
            config.chain_id,
            config.entry_point,
            Duration::from_secs(settings.sponsorship.timeout_secs),
        );
        Self {
            deriver: AddressDeriver::from_chain(&config),
            config,
            state,
            sponsorship,
            submitter,
        }
    }

    fn with_stats(mut self, stats: Option<Arc<SponsorshipStats>>) -> Self {
        if let Some(stats) = stats {
            self.sponsorship = self.sponsorship.with_stats(stats);
        }
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Sponsorship policy applied when a request does not specify one.
    pub fn default_sponsorship(&self) -> SponsorshipPolicy {
        if self.config.sponsorship_enabled && self.sponsorship.is_available() {
            SponsorshipPolicy::enabled()
        } else {
            SponsorshipPolicy::disabled()
        }
    }

    /// Fresh nonce and deployment status, plus init-code while undeployed.
    pub async fn account_state(&self, account: &Account) -> PipelineResult<AccountState> {
        let on_chain = self.state.account_state(account.address).await?;
        let init_code = if on_chain.deployed {
            Default::default()
        } else {
            let owner = account
                .owner()
                .ok_or_else(|| PipelineError::Input(format!("account {} has no credentials", account.identity)))?;
            self.deriver.init_code(&owner.public_key, self.chain_id())?
        };
        Ok(AccountState {
            address: Some(account.address),
            nonce: on_chain.nonce,
            deployed: on_chain.deployed,
            init_code,
        })
    }
}

/// The set of configured chains plus pipeline-wide settings.
pub struct ChainRegistry {
    chains: HashMap<u64, Arc<ChainContext>>,
    builder: OperationBuilder,
    retries: RetryConfig,
    ceremony_timeout: Duration,
}

impl ChainRegistry {
    /// An empty registry carrying the pipeline settings of `settings`.
    pub fn new(settings: &WalletConfig) -> Self {
        Self {
            chains: HashMap::new(),
            builder: OperationBuilder::new(settings.gas.clone()),
            retries: settings.retries.clone(),
            ceremony_timeout: Duration::from_secs(settings.authenticator.ceremony_timeout_secs),
        }
    }

    pub fn with_chain(mut self, context: ChainContext) -> Self {
        self.chains.insert(context.chain_id(), Arc::new(context));
        self
    }

    /// Build a registry from configuration, reusing submitters from `previous`
    /// for chains whose bundler endpoint and EntryPoint did not change.
    pub fn from_config(
        config: &WalletConfig,
        previous: Option<&ChainRegistry>,
    ) -> Result<Self, ChainError> {
        let mut registry = Self::new(config);

        for chain in &config.chains {
            let state: Arc<dyn AccountStateSource> = Arc::new(ChainClient::connect(chain)?);
            let paymaster = chain.paymaster_url.as_ref().map(|url| {
                Arc::new(PaymasterRpc::new(
                    url.clone(),
                    Duration::from_secs(config.sponsorship.timeout_secs),
                )) as Arc<dyn SponsorshipService>
            });

            let old = previous.and_then(|p| p.chain(chain.chain_id));
            let stats = old.as_ref().map(|old| old.sponsorship.stats());
            let reusable = old
                .filter(|old| {
                    old.config.bundler_url == chain.bundler_url
                        && old.config.entry_point == chain.entry_point
                })
                .map(|old| old.submitter.clone());

            let context = match reusable {
                Some(submitter) => {
                    tracing::debug!(chain_id = chain.chain_id, "Keeping relay submitter across reload");
                    ChainContext::with_submitter(chain.clone(), config, state, paymaster, submitter)
                }
                None => {
                    let relay = Arc::new(BundlerRpc::new(
                        chain.bundler_url.clone(),
                        Duration::from_secs(config.relay.timeout_secs),
                    ));
                    ChainContext::assemble(chain.clone(), config, state, paymaster, relay)
                }
            }
            .with_stats(stats);

            tracing::info!(
                chain_id = chain.chain_id,
                name = %chain.name,
                sponsorship = context.sponsorship.is_available(),
                "Chain registered"
            );
            registry = registry.with_chain(context);
        }

        Ok(registry)
    }

    pub fn chain(&self, chain_id: u64) -> Option<Arc<ChainContext>> {
        self.chains.get(&chain_id).cloned()
    }

    /// Configured chains ordered by id.
    pub fn chains(&self) -> Vec<Arc<ChainContext>> {
        let mut chains: Vec<_> = self.chains.values().cloned().collect();
        chains.sort_by_key(|c| c.chain_id());
        chains
    }

    pub fn builder(&self) -> &OperationBuilder {
        &self.builder
    }

    pub fn retries(&self) -> &RetryConfig {
        &self.retries
    }

    pub fn ceremony_timeout(&self) -> Duration {
        self.ceremony_timeout
    }
}

/// Rebuild the registry from `config` and swap it in.
pub fn reload(registry: &ArcSwap<ChainRegistry>, config: &WalletConfig) -> Result<(), ChainError> {
    let current = registry.load_full();
    let next = ChainRegistry::from_config(config, Some(&current))?;
    registry.store(Arc::new(next));
    tracing::info!(chains = config.chains.len(), "Chain registry reloaded");
    Ok(())
}

/// Apply validated configuration updates until shutdown.
pub async fn follow_config(
    registry: Arc<ArcSwap<ChainRegistry>>,
    mut updates: mpsc::UnboundedReceiver<WalletConfig>,
    shutdown: Shutdown,
) {
    let mut stop = shutdown.subscribe();
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(config) => {
                    if let Err(e) = reload(&registry, &config) {
                        tracing::error!(error = %e, "Failed to apply config update. Keeping current chains.");
                    }
                }
                None => break,
            },
            _ = stop.recv() => break,
        }
    }
}
