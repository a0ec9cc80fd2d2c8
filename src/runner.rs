use std::collections::BTreeSet;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::bruteforcer::{Engine, EngineConfig, EngineEvent, StopReason, SuccessRecord};
use crate::detector::{CriteriaConfig, CriteriaError, FlagExtractor, SuccessCriteria};
use crate::generator::{GeneratorError, PayloadSlot, PayloadSource, PayloadSpace};
use crate::request::{RequestMethod, RequestTemplate};
use crate::stats::{RunStats, StatsSnapshot};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const DEFAULT_EXCERPT_LEN: usize = 2000;

#[derive(Clone, Debug)]
pub struct Options {
    pub url: String,
    pub method: RequestMethod,
    pub data: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub payloads: Vec<PayloadSlot>,
    pub concurrency: usize,
    pub timeout: Duration,
    pub retries: u32,
    pub batch_size: usize,
    pub rate: Option<u32>,
    pub criteria: CriteriaConfig,
    pub auto_stop: bool,
    pub proxy: Option<String>,
    pub follow_redirects: bool,
    pub flag_patterns: Vec<String>,
    pub excerpt_len: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1/".to_string(),
            method: RequestMethod::Post,
            data: vec![
                ("username".to_string(), "{USER}".to_string()),
                ("password".to_string(), "{PASS}".to_string()),
            ],
            headers: vec![
                ("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string()),
                (
                    "Accept".to_string(),
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
                ),
                (
                    "Accept-Language".to_string(),
                    "zh-CN,zh;q=0.9,en;q=0.8".to_string(),
                ),
            ],
            cookies: Vec::new(),
            payloads: vec![
                PayloadSlot::new(
                    "USER",
                    PayloadSource::Enumerated {
                        values: vec!["admin".to_string()],
                    },
                ),
                PayloadSlot::new(
                    "PASS",
                    PayloadSource::Dictionary {
                        path: "rockyou.txt".into(),
                    },
                ),
            ],
            concurrency: 500,
            timeout: Duration::from_secs(5),
            retries: 2,
            batch_size: 2000,
            rate: None,
            criteria: CriteriaConfig::default(),
            auto_stop: true,
            proxy: None,
            follow_redirects: false,
            flag_patterns: Vec::new(),
            excerpt_len: DEFAULT_EXCERPT_LEN,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    #[error("timeout must be greater than zero")]
    InvalidTimeout,

    #[error("rate must be at least 1 request per second")]
    InvalidRate,

    #[error("invalid header {name:?}: {message}")]
    InvalidHeader { name: String, message: String },

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    Criteria(#[from] CriteriaError),

    #[error("failed to build HTTP client: {source}")]
    HttpClientBuild {
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to setup proxy: {proxy}: {source}")]
    ProxySetup {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub url: String,
    pub method: RequestMethod,
    pub stop_reason: StopReason,
    pub results: Vec<SuccessRecord>,
    pub flags: BTreeSet<String>,
    pub stats: StatsSnapshot,
}

#[derive(Clone, Debug)]
pub struct Runner {
    options: Options,
    criteria: SuccessCriteria,
    flags: FlagExtractor,
    rate: Option<NonZeroU32>,
}

impl Runner {
    pub fn new(options: Options) -> Result<Self, RunnerError> {
        match reqwest::Url::parse(&options.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(RunnerError::InvalidUrl {
                    url: options.url.clone(),
                })
            }
        }
        if options.concurrency == 0 {
            return Err(RunnerError::InvalidConcurrency);
        }
        if options.batch_size == 0 {
            return Err(RunnerError::InvalidBatchSize);
        }
        if options.timeout.is_zero() {
            return Err(RunnerError::InvalidTimeout);
        }
        let rate = match options.rate {
            Some(rate) => Some(NonZeroU32::new(rate).ok_or(RunnerError::InvalidRate)?),
            None => None,
        };
        let criteria = SuccessCriteria::new(options.criteria.clone())?;
        let flags = FlagExtractor::new(&options.flag_patterns)?;
        Ok(Self {
            options,
            criteria,
            flags,
            rate,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Materializes every payload slot and builds the client. Nothing is sent yet.
    pub async fn prepare(&self) -> Result<PreparedRun, RunnerError> {
        let space = PayloadSpace::build(&self.options.payloads).await?;

        let template = RequestTemplate::new(self.options.data.iter().cloned());
        for name in template.placeholders() {
            if !self.options.payloads.iter().any(|s| s.name == name) {
                warn!(placeholder = %name, "placeholder has no payload slot and will be sent verbatim");
            }
        }

        let client = build_client(&self.options)?;
        let stats = Arc::new(RunStats::new(space.total()));
        let engine = Engine::new(
            client,
            EngineConfig {
                url: self.options.url.clone(),
                method: self.options.method,
                template,
                concurrency: self.options.concurrency,
                batch_size: self.options.batch_size,
                retries: self.options.retries,
                auto_stop: self.options.auto_stop,
                rate: self.rate,
                excerpt_len: self.options.excerpt_len,
            },
            self.criteria.clone(),
            self.flags.clone(),
            stats,
        );
        debug!(total = space.total(), slots = space.slots().len(), "payload space ready");
        Ok(PreparedRun { space, engine })
    }

    pub async fn run(&self) -> Result<RunReport, RunnerError> {
        let prepared = self.prepare().await?;
        Ok(prepared
            .execute(std::future::pending::<()>(), |_: EngineEvent<'_>| {})
            .await)
    }
}

pub struct PreparedRun {
    space: PayloadSpace,
    engine: Engine,
}

impl PreparedRun {
    pub fn space(&self) -> &PayloadSpace {
        &self.space
    }

    pub fn stats(&self) -> Arc<RunStats> {
        self.engine.stats()
    }

    pub async fn execute<F, P>(self, shutdown: F, on_event: P) -> RunReport
    where
        F: Future<Output = ()>,
        P: FnMut(EngineEvent<'_>),
    {
        let PreparedRun { space, engine } = self;
        let url = engine.config().url.clone();
        let method = engine.config().method;
        let report = engine.run_until(space.iter(), shutdown, on_event).await;
        let flags = report
            .successes
            .iter()
            .flat_map(|r| r.flags.iter().cloned())
            .collect();
        RunReport {
            url,
            method,
            stop_reason: report.stop_reason,
            results: report.successes,
            flags,
            stats: report.stats,
        }
    }
}

fn build_client(options: &Options) -> Result<reqwest::Client, RunnerError> {
    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in options.headers.iter() {
        let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            RunnerError::InvalidHeader {
                name: name.clone(),
                message: e.to_string(),
            }
        })?;
        let header_value = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
            RunnerError::InvalidHeader {
                name: name.clone(),
                message: e.to_string(),
            }
        })?;
        headers.insert(header_name, header_value);
    }
    if !options.cookies.is_empty() {
        let cookie = options
            .cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");
        let value = reqwest::header::HeaderValue::from_str(&cookie).map_err(|e| {
            RunnerError::InvalidHeader {
                name: "Cookie".to_string(),
                message: e.to_string(),
            }
        })?;
        headers.insert(reqwest::header::COOKIE, value);
    }

    let redirect_policy = if options.follow_redirects {
        reqwest::redirect::Policy::limited(10)
    } else {
        reqwest::redirect::Policy::none()
    };

    let mut builder = reqwest::Client::builder()
        .default_headers(headers)
        .redirect(redirect_policy)
        .timeout(options.timeout)
        .pool_max_idle_per_host(options.concurrency)
        .danger_accept_invalid_hostnames(true)
        .danger_accept_invalid_certs(true);

    if let Some(proxy) = options.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
        let proxy = reqwest::Proxy::all(proxy).map_err(|e| RunnerError::ProxySetup {
            proxy: proxy.to_string(),
            source: e,
        })?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| RunnerError::HttpClientBuild { source: e })
}
