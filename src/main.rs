// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use std::env;
use std::path::PathBuf;
use std::time::Instant;
use the_runwood::config::{load_and_validate_config, InstanceConfig, RuntimeBuilder};
use the_runwood::demo;
use the_runwood::instance::{ConcurrencyLimit, Instance};
use the_runwood::observability::init_tracing;

/// Ledger used when no config file is given, so limits persist between invocations.
const DEFAULT_LEDGER_PATH: &str = ".runwood/concurrency.json";

const USAGE: &str = "\
Usage: runwood [--config <path>] <command>

Commands:
  concurrency get <key>        Show slot usage of one concurrency key
  concurrency get --all        Show slot usage of every limited key
  concurrency set <key> <n>    Set the limit of a key (0 clears it)
  status                       Print the instance snapshot as JSON
  demo                         Run the built-in dynamic fan-out jobs";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let config_path = take_config_flag(&mut args)?;
    let config = match &config_path {
        Some(path) => load_and_validate_config(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => {
            let mut config = InstanceConfig::default();
            config.concurrency.storage_path = Some(PathBuf::from(DEFAULT_LEDGER_PATH));
            config
        }
    };
    let instance = RuntimeBuilder::from_config(&config)?;

    let words: Vec<&str> = args.iter().map(String::as_str).collect();
    match words.as_slice() {
        ["concurrency", "get", "--all"] => concurrency_get_all(&instance),
        ["concurrency", "get", key] => {
            print_limit(&instance.reporter().concurrency_limit(key));
            Ok(())
        }
        ["concurrency", "set", key, limit] => {
            let limit: i64 = limit
                .parse()
                .with_context(|| format!("limit '{}' is not an integer", limit))?;
            instance.set_concurrency_limit(key, limit)?;
            println!("Set concurrency limit for {} to {}.", key, limit);
            Ok(())
        }
        ["status"] => {
            let snapshot = instance.reporter().instance_snapshot().await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        ["demo"] => run_demo(&instance).await,
        [] | ["help"] | ["--help"] | ["-h"] => {
            println!("{}", USAGE);
            Ok(())
        }
        _ => bail!("unrecognized command: {}\n\n{}", args.join(" "), USAGE),
    }
}

/// Removes `--config <path>` from the argument list.
fn take_config_flag(args: &mut Vec<String>) -> Result<Option<PathBuf>> {
    let Some(pos) = args.iter().position(|a| a == "--config") else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        return Err(anyhow!("--config requires a path\n\n{}", USAGE));
    }
    let path = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(PathBuf::from(path)))
}

fn concurrency_get_all(instance: &Instance) -> Result<()> {
    if instance.store().get_concurrency_limited_keys().is_empty() {
        println!(
            "No concurrency limits set. Run `runwood concurrency set <key> <limit>` to set limits."
        );
        return Ok(());
    }
    for limit in instance.reporter().concurrency_limits() {
        print_limit(&limit);
    }
    Ok(())
}

fn print_limit(limit: &ConcurrencyLimit) {
    println!(
        "\"{}\": {} / {} slots occupied",
        limit.key, limit.num_active, limit.limit
    );
}

async fn run_demo(instance: &Instance) -> Result<()> {
    let jobs = demo::demo_jobs().map_err(|errors| {
        anyhow!(
            "demo jobs failed validation: {}",
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        )
    })?;

    println!("🚀 Runwood dynamic fan-out demo");
    println!("═══════════════════════════════");

    for (job, judged_op) in jobs {
        let job = instance.register_job(job);
        let started = Instant::now();
        let run_id = instance.submit_run(job.name()).await?;
        let outcome = instance.execute_run(&run_id).await?;
        let run = instance.tracker().run(&run_id).await?;

        let values: Vec<String> = outcome
            .output_values(judged_op)
            .iter()
            .map(Value::to_string)
            .collect();
        println!(
            "\n{} ({})\n  status: {}\n  steps:  {}\n  {}: [{}]\n  time:   {:?}",
            job.name(),
            run_id,
            outcome.status,
            run.steps.len(),
            judged_op,
            values.join(", "),
            started.elapsed()
        );
    }

    println!("\n🎉 Demo complete!");
    Ok(())
}
