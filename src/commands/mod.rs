//! CLI commands
//!
//! Commands validate their inputs before any remote call, invoke the
//! library operations, and render the structured results. All rendering
//! lives here; the library modules never print.

use std::collections::BTreeMap;

use futures::StreamExt;
use tracing::warn;

use crate::poll::PodLogs;
use crate::validate::parse_env_pair;
use crate::Result;

pub mod experiment;
pub mod model;

/// Parse repeated `KEY=VALUE` CLI arguments into an env map
pub(crate) fn parse_env_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    for pair in pairs {
        let (key, value) = parse_env_pair(pair)?;
        env.insert(key, value);
    }
    Ok(env)
}

/// Drain a merged pod log stream to stdout.
///
/// Lines are prefixed with their pod name only when more than one pod is
/// being observed. Ends when every underlying connection closes or the
/// process is interrupted.
pub(crate) async fn print_log_stream(mut logs: PodLogs) {
    let tag_pods = logs.pods.len() > 1;
    while let Some(item) = logs.stream.next().await {
        match item {
            Ok(line) => {
                if tag_pods {
                    println!("[{}] {}", line.pod, line.line);
                } else {
                    println!("{}", line.line);
                }
            }
            Err(e) => {
                warn!(error = %e, "log stream ended with error");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_pairs_collect_into_map() {
        let env = parse_env_pairs(&[
            "LR=0.001".to_string(),
            "EPOCHS=10".to_string(),
        ])
        .unwrap();
        assert_eq!(env.get("LR").map(String::as_str), Some("0.001"));
        assert_eq!(env.get("EPOCHS").map(String::as_str), Some("10"));
    }

    #[test]
    fn later_duplicate_keys_win() {
        let env = parse_env_pairs(&["LR=0.1".to_string(), "LR=0.2".to_string()]).unwrap();
        assert_eq!(env.get("LR").map(String::as_str), Some("0.2"));
    }

    #[test]
    fn bad_pair_is_rejected() {
        assert!(parse_env_pairs(&["NOEQUALS".to_string()]).is_err());
    }
}
