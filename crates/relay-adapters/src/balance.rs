//! Channel balance probing and the periodic sweep.
//!
//! Providers that expose a billing surface are queried for their remaining
//! balance, normalized to USD, and the result is cached on the channel. A
//! channel that runs dry is auto-disabled together with its ability rows so
//! selection stops offering it. DeepSeek reports per-currency amounts, so
//! CNY figures are converted through a periodically refreshed exchange
//! rate.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use relay_core::{ChannelKind, RelayError, RelayResult};
use relay_store::{Channel, ChannelStatus, RelayStore};

use crate::adapter::upstream_error;

/// Deadline for each billing call.
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default source for the USD/CNY rate.
const EXCHANGE_RATE_ENDPOINT: &str = "https://api.api-ninjas.com/v1/exchangerate?pair=USD_CNY";

/// Outcome of probing and persisting one channel's balance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BalanceReport {
    /// Remaining balance in USD
    pub balance: f64,
    /// Whether this probe auto-disabled the channel
    pub disabled: bool,
}

/// Tally of one balance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepOutcome {
    /// Channels probed successfully
    pub probed: usize,
    /// Channels whose probe failed
    pub failed: usize,
    /// Channels without a billing surface
    pub skipped: usize,
    /// Channels auto-disabled by this sweep
    pub disabled: usize,
}

/// Probes provider billing endpoints and applies the results to the store.
pub struct BalanceSweeper {
    store: Arc<dyn RelayStore>,
    rate: Arc<ExchangeRate>,
    http: reqwest::Client,
    probe_pause: Duration,
}

impl BalanceSweeper {
    /// Build a sweeper over the given store.
    ///
    /// `probe_pause` spaces out consecutive probes during a sweep so the
    /// billing endpoints are not hammered.
    pub fn new(
        store: Arc<dyn RelayStore>,
        rate: Arc<ExchangeRate>,
        probe_pause: Duration,
    ) -> RelayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(RelayError::transport)?;
        Ok(Self {
            store,
            rate,
            http,
            probe_pause,
        })
    }

    /// Query the provider's billing surface for the channel's remaining
    /// balance in USD.
    pub async fn probe_balance(&self, channel: &Channel) -> RelayResult<f64> {
        match channel.kind {
            ChannelKind::DeepSeek => self.probe_deepseek(channel).await,
            ChannelKind::OpenAi => self.probe_openai(channel).await,
            ChannelKind::DashScope => Err(RelayError::BalanceUnsupported { kind: channel.kind }),
        }
    }

    /// Probe one channel and persist the result.
    ///
    /// A channel whose balance is exhausted is auto-disabled together with
    /// its ability rows.
    pub async fn update_channel_balance(&self, channel_id: i64) -> RelayResult<BalanceReport> {
        let channel = self
            .store
            .get_channel(channel_id)
            .await?
            .ok_or(RelayError::ChannelGone { channel_id })?;
        let balance = self.probe_balance(&channel).await?;
        self.store.update_channel_balance(channel_id, balance).await?;

        let mut disabled = false;
        if balance <= 0.0 && channel.status == ChannelStatus::Enabled {
            self.store
                .set_channel_status(channel_id, ChannelStatus::AutoDisabled)
                .await?;
            self.store.set_abilities_enabled(channel_id, false).await?;
            disabled = true;
            warn!(
                channel_id,
                name = %channel.name,
                balance,
                "channel balance exhausted, auto-disabling"
            );
        } else {
            debug!(channel_id, balance, "channel balance updated");
        }
        Ok(BalanceReport { balance, disabled })
    }

    /// Probe every enabled channel, pausing between probes.
    ///
    /// Per-channel failures and kinds without a billing surface are logged
    /// and counted; only a store failure aborts the sweep.
    pub async fn sweep(&self) -> RelayResult<SweepOutcome> {
        let channels = self.store.list_channels().await?;
        let mut outcome = SweepOutcome::default();
        for channel in channels {
            if channel.status != ChannelStatus::Enabled {
                continue;
            }
            match self.update_channel_balance(channel.id).await {
                Ok(report) => {
                    outcome.probed += 1;
                    if report.disabled {
                        outcome.disabled += 1;
                    }
                }
                Err(err @ RelayError::BalanceUnsupported { .. }) => {
                    outcome.skipped += 1;
                    debug!(channel_id = channel.id, error = %err, "skipping balance probe");
                }
                Err(err) => {
                    outcome.failed += 1;
                    warn!(channel_id = channel.id, error = %err, "balance probe failed");
                }
            }
            if !self.probe_pause.is_zero() {
                tokio::time::sleep(self.probe_pause).await;
            }
        }
        info!(
            probed = outcome.probed,
            failed = outcome.failed,
            skipped = outcome.skipped,
            disabled = outcome.disabled,
            "balance sweep finished"
        );
        Ok(outcome)
    }

    /// Run [`sweep`](Self::sweep) on a fixed interval until aborted.
    #[must_use]
    pub fn spawn_sweep(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let sweeper = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval's first tick completes immediately; wait out a full
            // period before the first sweep.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = sweeper.sweep().await {
                    warn!(error = %err, "balance sweep aborted by store failure");
                }
            }
        })
    }

    async fn probe_deepseek(&self, channel: &Channel) -> RelayResult<f64> {
        let url = format!("{}/user/balance", channel.base_url);
        let body: DeepSeekBalance = self.get_json(&url, &channel.api_key).await?;
        if !body.is_available {
            return Ok(0.0);
        }
        let rate = self.rate.usd_cny();
        let mut total = 0.0;
        for info in &body.balance_infos {
            let amount: f64 = info.total_balance.parse().map_err(|_| {
                RelayError::decode(format!("unparsable balance amount: {}", info.total_balance))
            })?;
            if info.currency.eq_ignore_ascii_case("cny") {
                total += amount / rate;
            } else {
                total += amount;
            }
        }
        Ok(total)
    }

    async fn probe_openai(&self, channel: &Channel) -> RelayResult<f64> {
        let subscription: OpenAiSubscription = self
            .get_json(
                &format!("{}/v1/dashboard/billing/subscription", channel.base_url),
                &channel.api_key,
            )
            .await?;

        let now = Utc::now();
        let end_date = now.format("%Y-%m-%d");
        // Accounts without a payment method are limited to a 100 day usage
        // window; billed accounts are queried for the current month.
        let start_date = if subscription.has_payment_method {
            now.format("%Y-%m-01").to_string()
        } else {
            (now - chrono::Duration::days(100)).format("%Y-%m-%d").to_string()
        };
        let usage: OpenAiUsage = self
            .get_json(
                &format!(
                    "{}/v1/dashboard/billing/usage?start_date={start_date}&end_date={end_date}",
                    channel.base_url
                ),
                &channel.api_key,
            )
            .await?;
        // total_usage is reported in hundredths of a dollar.
        Ok(subscription.hard_limit_usd - usage.total_usage / 100.0)
    }

    async fn get_json<T>(&self, url: &str, api_key: &SecretString) -> RelayResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .http
            .get(url)
            .bearer_auth(api_key.expose_secret())
            .send()
            .await
            .map_err(RelayError::transport)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(RelayError::transport)?;
        if !status.is_success() {
            return Err(upstream_error(status, &bytes));
        }
        serde_json::from_slice(&bytes).map_err(RelayError::decode)
    }
}

/// USD/CNY conversion with periodic refresh.
///
/// The rate starts from configuration and is only replaced by a successful
/// refresh; failures keep the previous value.
pub struct ExchangeRate {
    usd_cny: RwLock<f64>,
    api_key: Option<SecretString>,
    endpoint: String,
    http: reqwest::Client,
}

impl ExchangeRate {
    /// Conversion source seeded with the configured fallback rate.
    pub fn new(default_usd_cny: f64, api_key: Option<SecretString>) -> RelayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(RelayError::transport)?;
        Ok(Self {
            usd_cny: RwLock::new(default_usd_cny),
            api_key,
            endpoint: EXCHANGE_RATE_ENDPOINT.to_string(),
            http,
        })
    }

    /// Point the refresh call at a different endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Current USD/CNY rate.
    #[must_use]
    pub fn usd_cny(&self) -> f64 {
        *self.usd_cny.read()
    }

    /// Fetch a fresh rate; the stored value only changes on success.
    pub async fn refresh(&self) -> RelayResult<f64> {
        let Some(api_key) = self.api_key.as_ref() else {
            return Err(RelayError::config("no exchange rate api key configured"));
        };
        let response = self
            .http
            .get(&self.endpoint)
            .header("X-Api-Key", api_key.expose_secret())
            .send()
            .await
            .map_err(RelayError::transport)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(RelayError::transport)?;
        if !status.is_success() {
            return Err(upstream_error(status, &bytes));
        }
        let body: ExchangeRateResponse =
            serde_json::from_slice(&bytes).map_err(RelayError::decode)?;
        let rate = body
            .result
            .filter(|_| body.success)
            .map(|r| r.rate)
            .ok_or_else(|| RelayError::decode("exchange rate response carried no rate"))?;
        if rate <= 0.0 {
            return Err(RelayError::decode(format!("implausible exchange rate: {rate}")));
        }
        *self.usd_cny.write() = rate;
        info!(rate, "exchange rate refreshed");
        Ok(rate)
    }

    /// Refresh on a fixed interval until aborted.
    #[must_use]
    pub fn spawn_refresh(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let rates = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = rates.refresh().await {
                    warn!(error = %err, "exchange rate refresh failed, keeping previous rate");
                }
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct DeepSeekBalance {
    #[serde(default)]
    is_available: bool,
    #[serde(default)]
    balance_infos: Vec<DeepSeekBalanceInfo>,
}

/// Amounts come over the wire as decimal strings.
#[derive(Debug, Deserialize)]
struct DeepSeekBalanceInfo {
    currency: String,
    total_balance: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiSubscription {
    #[serde(default)]
    hard_limit_usd: f64,
    #[serde(default)]
    has_payment_method: bool,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    total_usage: f64,
}

#[derive(Debug, Deserialize)]
struct ExchangeRateResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<ExchangeRateResult>,
}

#[derive(Debug, Deserialize)]
struct ExchangeRateResult {
    rate: f64,
}
