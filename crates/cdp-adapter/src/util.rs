use chromiumoxide::async_process::Child;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use tokio::time::{timeout, Duration};

use crate::error::{AdapterError, AdapterErrorKind};

/// DevTools websocket URL from one line of Chromium stderr, if present.
pub fn parse_ws_line(line: &str) -> Option<&str> {
    let (_, ws) = line.rsplit_once("listening on ")?;
    let ws = ws.trim();
    (ws.starts_with("ws") && ws.contains("devtools/browser")).then_some(ws)
}

/// Read Chromium stderr until it announces the DevTools websocket URL.
pub async fn extract_ws_url(child: &mut Child, wait: Duration) -> Result<String, AdapterError> {
    let stderr = child.stderr.take().ok_or_else(|| {
        AdapterError::new(AdapterErrorKind::Launch).with_hint("chromium process missing stderr handle")
    })?;
    let mut lines = BufReader::new(stderr).lines();
    let mut captured = Vec::new();

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line.map_err(|err| AdapterError::io(err.to_string()))?;
            if let Some(ws) = parse_ws_line(&line) {
                return Ok(ws.to_string());
            }
            captured.push(line);
        }
        Err(AdapterError::new(AdapterErrorKind::Launch).with_hint(format!(
            "chromium exited before exposing devtools websocket url. stderr preview: {}",
            captured.iter().take(8).cloned().collect::<Vec<_>>().join(" | ")
        )))
    };

    timeout(wait, reader).await.map_err(|_| {
        AdapterError::new(AdapterErrorKind::Launch)
            .with_hint("timed out waiting for chromium devtools websocket url")
    })?
}
