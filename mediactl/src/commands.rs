use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ipfs_gateway::{FallbackSource, GatewayProber, GatewayResolver, HttpConfig};
use media_cache::{
    CacheKey, CacheStorage, Classifier, Fetcher, HttpFetcher, PartitionSet, Registration, Request,
    Response, StorageConfig,
};
use reqwest::Method;
use tracing::{debug, info, warn};
use url::Url;

use crate::cli::{CacheAction, Command};
use crate::config::AppConfig;
use crate::error::AppError;

pub struct CommandExecutor {
    config: AppConfig,
}

impl CommandExecutor {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, command: Command) -> Result<(), AppError> {
        match command {
            Command::Resolve {
                cid,
                count,
                gateway,
                proxy,
            } => self.resolve(&cid, count, gateway.as_deref(), proxy),
            Command::Gateways { random } => self.gateways(random),
            Command::Probe { gateway, timeout } => self.probe(gateway.as_deref(), timeout).await,
            Command::Classify {
                url,
                method,
                headers,
            } => self.classify(&url, &method, &headers),
            Command::Fetch {
                target,
                count,
                no_worker,
                output,
            } => self.fetch(&target, count, no_worker, output.as_deref()).await,
            Command::Cache { action } => match action {
                CacheAction::List { entries } => self.list_cache(entries).await,
                CacheAction::Purge { all } => {
                    let purged = self.purge_partitions(all).await?;
                    if purged.is_empty() {
                        println!("Nothing to purge");
                    }
                    for name in purged {
                        println!("purged {name}");
                    }
                    Ok(())
                }
            },
            Command::Config => {
                println!("{}", self.config.show()?);
                Ok(())
            }
        }
    }

    fn resolver(&self) -> Result<GatewayResolver, AppError> {
        Ok(GatewayResolver::new(self.config.worker.gateways.clone())?)
    }

    fn resolve(
        &self,
        cid: &str,
        count: usize,
        gateway: Option<&str>,
        proxy: bool,
    ) -> Result<(), AppError> {
        if cid.trim().is_empty() {
            return Err(AppError::InvalidInput("CID must not be empty".to_string()));
        }

        let resolver = self.resolver()?;
        if count <= 1 {
            println!("{}", resolver.build_url(cid, gateway, proxy));
            return Ok(());
        }

        let urls = match gateway {
            Some(preferred) => resolver.build_preferred_url_list(cid, preferred, count, proxy),
            None => resolver.build_url_list(cid, count, proxy),
        };
        for (index, url) in urls.iter().enumerate() {
            println!("{index:>2}  {url}");
        }
        Ok(())
    }

    fn gateways(&self, random: bool) -> Result<(), AppError> {
        let resolver = self.resolver()?;
        if random {
            let gateway = resolver.pick_random_gateway();
            println!("{}  {}", gateway.name, gateway.base_url);
            return Ok(());
        }

        let primary = resolver.primary().name.clone();
        for gateway in resolver.list_gateways() {
            let marker = if gateway.name == primary { "*" } else { " " };
            println!("{marker} {:<12} {}", gateway.name, gateway.base_url);
        }
        println!("  proxy        {}", self.config.worker.gateways.proxy_base());
        Ok(())
    }

    async fn probe(&self, only: Option<&str>, timeout_secs: Option<u64>) -> Result<(), AppError> {
        let mut gateway_config = self.config.worker.gateways.clone();
        if let Some(secs) = timeout_secs {
            gateway_config.probe_timeout_secs = secs;
        }
        gateway_config.validate()?;

        let gateways: Vec<_> = gateway_config
            .gateways
            .iter()
            .filter(|g| only.is_none_or(|name| g.name == name))
            .cloned()
            .collect();
        if gateways.is_empty() {
            return Err(AppError::InvalidInput(format!(
                "unknown gateway '{}'",
                only.unwrap_or_default()
            )));
        }

        let prober = GatewayProber::new(&gateway_config)?;
        info!(
            count = gateways.len(),
            timeout = ?prober.timeout(),
            "Probing gateways"
        );

        let reports = prober.probe_all(&gateways).await;
        let healthy = reports.iter().filter(|r| r.healthy).count();
        for report in &reports {
            println!(
                "{:<5} {:<12} {:>6} ms  {}",
                if report.healthy { "up" } else { "down" },
                report.gateway.name,
                report.elapsed.as_millis(),
                report.gateway.base_url
            );
        }
        println!("{healthy}/{} gateways healthy", reports.len());
        Ok(())
    }

    fn classify(&self, url: &str, method: &str, headers: &[String]) -> Result<(), AppError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| AppError::InvalidInput(format!("invalid method '{method}'")))?;

        let mut request = Request::parse(method, url)?;
        for header in headers {
            let (name, value) = header.split_once(':').ok_or_else(|| {
                AppError::InvalidInput(format!("header '{header}' must look like 'Name: value'"))
            })?;
            request = request.with_header(name.trim(), value.trim());
        }

        let worker = &self.config.worker;
        let classifier = Classifier::new(
            worker.origin_url()?,
            &worker.gateways,
            worker.classifier.clone(),
        );
        let class = classifier.classify(&request);

        println!("class:       {class}");
        println!("strategy:    {:?}", class.strategy());
        println!(
            "intercepted: {}",
            if !request.is_get() {
                "no (only GET requests are intercepted)"
            } else if class.is_intercepted() {
                "yes"
            } else {
                "no"
            }
        );
        Ok(())
    }

    /// Candidate URLs for `target`: itself when it is an absolute URL,
    /// otherwise the gateway list for it as a CID with the proxy last
    pub(crate) fn candidates(&self, target: &str, count: usize) -> Result<Vec<String>, AppError> {
        if let Ok(url) = Url::parse(target) {
            if matches!(url.scheme(), "http" | "https") {
                return Ok(vec![url.to_string()]);
            }
        }

        let urls = self.resolver()?.build_url_list(target, count, true);
        if urls.is_empty() {
            return Err(AppError::InvalidInput(format!(
                "nothing to fetch for '{target}'"
            )));
        }

        // The proxy route is relative to the app origin
        urls.into_iter()
            .map(|url| -> Result<String, AppError> {
                if url.starts_with('/') {
                    Ok(self.config.worker.resolve(&url)?.to_string())
                } else {
                    Ok(url)
                }
            })
            .collect()
    }

    async fn fetch(
        &self,
        target: &str,
        count: usize,
        no_worker: bool,
        output: Option<&Path>,
    ) -> Result<(), AppError> {
        let candidates = self.candidates(target, count)?;

        let http = HttpConfig::builder()
            .with_timeout(Duration::from_secs(self.config.request_timeout_secs))
            .build();
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&http)?);
        let registration = Registration::new(self.config.storage.build(), fetcher);

        if no_worker {
            info!("Fetching without a cache worker");
        } else {
            let report = registration.register(self.config.worker.clone()).await?;
            for (url, reason) in &report.failed {
                debug!(url = %url, reason = %reason, "App shell asset not cached");
            }
            registration.promote_waiting().await?;
        }

        let mut source = FallbackSource::new(candidates).on_exhausted(|report| {
            warn!(attempted = report.attempted.len(), "Every candidate URL failed");
        });

        let (url, response) = source
            .resolve_first(|url| {
                let registration = &registration;
                async move {
                    let request = Request::parse(Method::GET, &url)?;
                    let response = registration.fetch(&request).await?;
                    if !response.is_success() {
                        return Err(AppError::Status(response.status.as_u16()));
                    }
                    Ok::<Response, AppError>(response)
                }
            })
            .await?;

        if let Some(worker) = registration.controller() {
            worker.wait_until_idle().await;
        }

        println!("url:          {url}");
        println!("attempt:      {}/{}", source.index() + 1, source.candidates().len());
        println!("status:       {}", response.status);
        println!("content-type: {}", response.content_type());
        println!("bytes:        {}", response.body.len());

        if let Some(path) = output {
            tokio::fs::write(path, &response.body).await?;
            println!("written to:   {}", path.display());
        }
        Ok(())
    }

    pub(crate) async fn partitions(&self) -> Result<Vec<(String, Vec<CacheKey>)>, AppError> {
        let storage = self.storage();
        let mut partitions = Vec::new();
        for name in storage.keys().await? {
            let partition = storage.open(&name).await?;
            let mut keys = partition.keys().await?;
            keys.sort_by(|a, b| a.url.cmp(&b.url));
            partitions.push((name, keys));
        }
        Ok(partitions)
    }

    async fn list_cache(&self, entries: bool) -> Result<(), AppError> {
        let current = self.current_partitions();
        let partitions = self.partitions().await?;
        if partitions.is_empty() {
            println!("No cache partitions");
        }

        for (name, keys) in partitions {
            let marker = if current.contains(&name) { "*" } else { " " };
            println!("{marker} {name:<24} {} entries", keys.len());
            if entries {
                for key in keys {
                    println!("      {key}");
                }
            }
        }
        Ok(())
    }

    /// Delete stale partitions (or all of them). Returns the deleted names.
    pub(crate) async fn purge_partitions(&self, all: bool) -> Result<Vec<String>, AppError> {
        let storage = self.storage();
        let current = self.current_partitions();

        let mut purged = Vec::new();
        for name in storage.keys().await? {
            if !all && current.contains(&name) {
                continue;
            }
            if storage.delete(&name).await? {
                info!(partition = %name, "Partition deleted");
                purged.push(name);
            }
        }
        Ok(purged)
    }

    fn current_partitions(&self) -> PartitionSet {
        let worker = &self.config.worker;
        PartitionSet::new(&worker.cache_prefix, &worker.version)
    }

    fn storage(&self) -> Arc<dyn CacheStorage> {
        if matches!(self.config.storage, StorageConfig::Memory { .. }) {
            warn!("Memory cache storage is empty in a fresh process; pass --cache-dir to inspect a file cache");
        }
        self.config.storage.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_cache::FileStorage;

    fn executor(root: &Path) -> CommandExecutor {
        let mut config = AppConfig::default().with_cache_dir(Some(root.to_path_buf()));
        config.worker.version = "v2".to_string();
        config.worker.origin = "https://tunes.example".to_string();
        CommandExecutor::new(config)
    }

    #[test]
    fn test_candidates_for_cid_end_with_absolute_proxy() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path());

        let urls = executor.candidates("bafyExample123", 3).unwrap();
        assert_eq!(urls.len(), 3);
        assert!(urls[0].starts_with("https://gateway.pinata.cloud/ipfs/"));
        assert_eq!(urls[2], "https://tunes.example/api/ipfs/bafyExample123");
    }

    #[test]
    fn test_candidates_for_url_and_empty_target() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path());

        assert_eq!(
            executor.candidates("https://ipfs.io/ipfs/bafy", 5).unwrap(),
            vec!["https://ipfs.io/ipfs/bafy"]
        );
        assert!(matches!(
            executor.candidates("  ", 5),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_keeps_current_version() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().to_path_buf());
        let old = storage.open("tunes-static-v1").await.unwrap();
        let current = storage.open("tunes-static-v2").await.unwrap();
        let request = Request::parse(Method::GET, "https://tunes.example/index.html").unwrap();
        let response = Response::ok("<shell>", "https://tunes.example/index.html");
        old.put(&request, &response).await.unwrap();
        current.put(&request, &response).await.unwrap();

        let executor = executor(dir.path());
        let listed = executor.partitions().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|(_, keys)| keys.len() == 1));

        assert_eq!(
            executor.purge_partitions(false).await.unwrap(),
            vec!["tunes-static-v1"]
        );
        assert_eq!(
            executor.purge_partitions(true).await.unwrap(),
            vec!["tunes-static-v2"]
        );
        assert!(executor.partitions().await.unwrap().is_empty());
    }
}
