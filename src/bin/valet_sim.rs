//! Valet approach simulator
//!
//! Posts a scripted approach for one or more users to a running valet-gate
//! server and prints each returned dispatch status.
//!
//! Usage:
//!   cargo run --bin valet-sim                              # One user heading to gate B
//!   cargo run --bin valet-sim -- --users 5 --gate A
//!   cargo run --bin valet-sim -- --gate A --turn-to C      # Change of mind half way
//!   cargo run --bin valet-sim -- --gate A --gap-ms 95000   # Stale stream before the last post

use anyhow::{bail, Context};
use clap::Parser;
use serde::Deserialize;
use std::time::Duration;
use valet_gate::infra::clock::epoch_ms;
use valet_gate::services::SensorInputs;

#[derive(Parser, Debug)]
#[command(name = "valet-sim")]
#[command(about = "Valet approach simulator - drives the HTTP API with scripted approaches")]
struct Args {
    /// Base URL of the valet-gate HTTP API
    #[arg(long, default_value = "http://127.0.0.1:4000")]
    url: String,

    /// Number of simulated users (sim-user-0, sim-user-1, ...)
    #[arg(short, long, default_value_t = 1)]
    users: usize,

    /// Gate the users approach
    #[arg(short, long, default_value = "B")]
    gate: String,

    /// Gate the users turn toward half way through
    #[arg(long)]
    turn_to: Option<String>,

    /// Submissions per user
    #[arg(short, long, default_value_t = 6)]
    steps: u64,

    /// Sample spacing on the device clock (ms)
    #[arg(long, default_value_t = 6_000)]
    interval_ms: u64,

    /// Extra device-clock gap before the final submission (ms)
    #[arg(long, default_value_t = 0)]
    gap_ms: u64,

    /// Wall-clock pause between posts (ms)
    #[arg(long, default_value_t = 100)]
    pace_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictionView {
    predicted_gate: String,
    confidence: u8,
    dispatch: serde_json::Value,
}

/// Confidence for step `i`: a steady climb from 92 toward 99
fn approach_signal(step: u64) -> f64 {
    (92 + step.min(7)) as f64
}

fn script_step(args: &Args, user: &str, step: u64, start_ms: u64) -> SensorInputs {
    let target = match &args.turn_to {
        Some(turn) if step >= args.steps / 2 => turn.as_str(),
        _ => args.gate.as_str(),
    };

    let mut ts = start_ms + step * args.interval_ms;
    if step + 1 == args.steps {
        ts += args.gap_ms;
    }

    SensorInputs::new(user)
        .with_uniform(target, approach_signal(step))
        .with_timestamp(ts)
}

fn describe(dispatch: &serde_json::Value) -> String {
    let status = dispatch["status"].as_str().unwrap_or("?");
    match status {
        "dispatched" => {
            let mut s = format!("dispatched -> {}", dispatch["gate"].as_str().unwrap_or("?"));
            if dispatch["inTransit"].as_bool() == Some(true) {
                s.push_str(" (in transit)");
            }
            if let Some(advisory) = dispatch["advisory"].as_str() {
                s.push_str(&format!(" [{advisory}]"));
            }
            s
        }
        "redirected" => format!(
            "redirected {} -> {}",
            dispatch["fromGate"].as_str().unwrap_or("?"),
            dispatch["toGate"].as_str().unwrap_or("?")
        ),
        "signal_lost" => format!("signal_lost ({})", dispatch["message"].as_str().unwrap_or("")),
        other => other.to_string(),
    }
}

async fn run_user(client: &reqwest::Client, args: &Args, user: &str) -> anyhow::Result<()> {
    let start_ms = epoch_ms();
    let endpoint = format!("{}/api/sensordata", args.url);

    for step in 0..args.steps {
        let inputs = script_step(args, user, step, start_ms);
        let resp = client
            .post(&endpoint)
            .json(&inputs)
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("{user} step {step}: {status} {body}");
        }

        let view: PredictionView = resp.json().await.context("decode prediction")?;
        println!(
            "[{user}] step {step}: predicted {} @ {} -> {}",
            view.predicted_gate,
            view.confidence,
            describe(&view.dispatch)
        );

        if args.pace_ms > 0 {
            tokio::time::sleep(Duration::from_millis(args.pace_ms)).await;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.steps == 0 {
        bail!("--steps must be at least 1");
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("build HTTP client")?;

    let mut failures = 0usize;
    for i in 0..args.users {
        let user = format!("sim-user-{i}");
        if let Err(e) = run_user(&client, &args, &user).await {
            eprintln!("[{user}] failed: {e:#}");
            failures += 1;
        }
    }

    println!("done: {} users, {} failed", args.users, failures);
    if failures > 0 {
        bail!("{failures} simulated users failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["valet-sim"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_script_turns_half_way() {
        let args = args(&["--gate", "A", "--turn-to", "C", "--steps", "4"]);
        let first = script_step(&args, "u", 1, 0);
        let third = script_step(&args, "u", 2, 0);

        assert!(first.ble.unwrap().contains_key("A"));
        assert!(third.ble.unwrap().contains_key("C"));
    }

    #[test]
    fn test_script_spacing_and_gap() {
        let args = args(&["--steps", "3", "--interval-ms", "7000", "--gap-ms", "91000"]);
        assert_eq!(script_step(&args, "u", 1, 1_000).timestamp, Some(8_000));
        assert_eq!(script_step(&args, "u", 2, 1_000).timestamp, Some(1_000 + 14_000 + 91_000));
    }

    #[test]
    fn test_describe() {
        let v = serde_json::json!({"status": "redirected", "fromGate": "A", "toGate": "C"});
        assert_eq!(describe(&v), "redirected A -> C");
    }
}
