//! Moving bytes from a source into a staged cache write.

use crate::error::{FetchError, FetchResult};
use pkgmesh_cache::StagedWrite;
use pkgmesh_core::IpMode;
use pkgmesh_core::config::FetchConfig;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncReadExt;

const READ_BUFFER: usize = 64 * 1024;

/// One HTTP client per address family preference.
#[derive(Clone, Debug)]
pub(crate) struct HttpClients {
    auto: reqwest::Client,
    ipv4: reqwest::Client,
    ipv6: reqwest::Client,
}

impl HttpClients {
    pub(crate) fn new(config: &FetchConfig) -> FetchResult<Self> {
        let build = |local: Option<IpAddr>| {
            let mut builder = reqwest::Client::builder()
                .connect_timeout(config.connect_timeout())
                .user_agent(concat!("pkgmesh/", env!("CARGO_PKG_VERSION")));
            if let Some(local) = local {
                builder = builder.local_address(local);
            }
            builder
                .build()
                .map_err(|e| FetchError::LocalResource(format!("HTTP client: {e}")))
        };
        Ok(Self {
            auto: build(None)?,
            ipv4: build(Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)))?,
            ipv6: build(Some(IpAddr::V6(Ipv6Addr::UNSPECIFIED)))?,
        })
    }

    pub(crate) fn for_mode(&self, mode: IpMode) -> &reqwest::Client {
        match mode {
            IpMode::Ipv4 => &self.ipv4,
            IpMode::Ipv6 => &self.ipv6,
            IpMode::Auto | IpMode::Dual => &self.auto,
        }
    }
}

fn stalled(stall: Duration) -> FetchError {
    FetchError::SourceUnavailable(format!("no data received for {}s", stall.as_secs()))
}

/// `GET url`, failing on non-success statuses.
pub(crate) async fn get(
    client: &reqwest::Client,
    url: &str,
    stall: Duration,
) -> FetchResult<reqwest::Response> {
    let response = tokio::time::timeout(stall, client.get(url).send())
        .await
        .map_err(|_| stalled(stall))??;
    Ok(response.error_for_status()?)
}

/// Stream a response body into `staged`. A gap longer than `stall` between
/// chunks fails the transfer.
pub(crate) async fn stream_into(
    mut response: reqwest::Response,
    staged: &mut StagedWrite,
    stall: Duration,
) -> FetchResult<()> {
    loop {
        let chunk = tokio::time::timeout(stall, response.chunk())
            .await
            .map_err(|_| stalled(stall))??;
        match chunk {
            Some(bytes) => staged.write(&bytes).await?,
            None => return Ok(()),
        }
    }
}

/// Copy a file from a local mirror into `staged`.
pub(crate) async fn copy_file(path: &Path, staged: &mut StagedWrite) -> FetchResult<()> {
    let mut file = match fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FetchError::NotFound(path.display().to_string()));
        }
        Err(e) => {
            return Err(FetchError::SourceUnavailable(format!(
                "{}: {e}",
                path.display()
            )));
        }
    };
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| FetchError::SourceUnavailable(format!("{}: {e}", path.display())))?;
        if n == 0 {
            return Ok(());
        }
        staged.write(&buf[..n]).await?;
    }
}
