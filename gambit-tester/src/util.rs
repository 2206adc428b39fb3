use anyhow::{Context, Result};
use chrono::Utc;
use std::{fs, path::Path};

use crate::harness::Harness;

pub fn artifacts_dir(base: &str, scenario: &str, seed: u64) -> String {
    let ts = Utc::now().format("%Y%m%dT%H%M%S");
    format!("{base}/{scenario}/seed-{seed}/{ts}")
}

/// Dump what the seat held when a replay failed.
pub fn capture_artifacts(dir: &str, harness: &Harness, err: &anyhow::Error) -> Result<()> {
    let state = serde_json::to_value(harness.driver().state()).ok();
    let sent = serde_json::to_value(harness.sent()).ok();
    let chain = format!("{err:#}");
    write_artifact_files(Path::new(dir), state.as_ref(), sent.as_ref(), &chain)
}

fn write_artifact_files(
    dir: &Path,
    state: Option<&serde_json::Value>,
    sent: Option<&serde_json::Value>,
    error_chain: &str,
) -> Result<()> {
    fs::create_dir_all(dir).context("creating artifacts dir")?;

    if let Some(state_json) = state {
        let payload = serde_json::to_vec_pretty(state_json).unwrap_or_default();
        let _ = fs::write(dir.join("state.json"), payload);
    }

    if let Some(sent_json) = sent {
        let payload = serde_json::to_vec_pretty(sent_json).unwrap_or_default();
        let _ = fs::write(dir.join("sent.json"), payload);
    }

    let _ = fs::write(dir.join("error.txt"), error_chain);

    Ok(())
}

pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

/// Parse the `--seeds` list.
///
/// # Errors
///
/// Returns an error naming the first token that is not a `u64`.
pub fn parse_seeds(s: &str) -> Result<Vec<u64>> {
    split_csv(s)
        .iter()
        .map(|token| {
            token
                .parse::<u64>()
                .with_context(|| format!("invalid seed '{token}'"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn split_csv_trims_and_filters() {
        let parts = split_csv(" alpha, ,beta,  gamma ");
        assert_eq!(parts, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn seeds_parse_or_name_the_bad_token() {
        assert_eq!(parse_seeds("1, 2,3").unwrap(), vec![1, 2, 3]);
        let err = parse_seeds("1,x").unwrap_err();
        assert!(err.to_string().contains("'x'"));
    }

    #[test]
    fn artifacts_dir_includes_key_segments() {
        let dir = artifacts_dir("target/out", "smoke-turn", 42);
        assert!(dir.contains("target/out/smoke-turn/seed-42/"));
    }

    #[test]
    fn write_artifact_files_writes_expected_payloads() {
        let base = std::env::temp_dir().join(format!(
            "gambit-artifacts-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        let state = json!({ "turnOwner": "white" });
        let sent = json!([{ "type": "endTurn" }]);
        write_artifact_files(&base, Some(&state), Some(&sent), "boom").expect("write artifacts");

        assert!(base.join("state.json").exists());
        assert!(base.join("sent.json").exists());
        assert!(base.join("error.txt").exists());
    }
}
