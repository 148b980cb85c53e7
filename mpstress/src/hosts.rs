//! Host list input

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// One host per line; blank lines are skipped, order and duplicates kept
pub fn parse_hosts(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read the whole host list from `reader`
pub async fn read_hosts<R: AsyncRead + Unpin>(mut reader: R) -> Result<Vec<String>> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .await
        .context("unable to read host list")?;

    let hosts = parse_hosts(&text);
    if hosts.is_empty() {
        bail!("host list is empty");
    }
    Ok(hosts)
}
