use chrono::{DateTime, Duration, Utc};
use clap::Args;
use manifestos_core::recognition::ScriptedRecognizer;
use manifestos_core::verification::{Clock, ManualClock};
use manifestos_core::{
    Event, Evidence, GlobalVerificationManager, GoldBalance, GoldLedger, MemoryTaskStore,
    RewardCalculator, SignalBus, Task, VerificationStore, VerificationType,
};
use serde_json::json;
use std::path::{Path, PathBuf};

use super::load_config;

#[derive(Args)]
pub struct SimulateArgs {
    /// JSON file with an array of tasks
    tasks: PathBuf,
    /// Submit matching evidence when a start verification opens
    #[arg(long)]
    accept_start: bool,
    /// Submit matching evidence when a completion verification opens
    #[arg(long)]
    accept_complete: bool,
    /// Completion quality rating applied to every task, 1-5
    #[arg(long)]
    quality: Option<u8>,
    /// Simulation start (RFC 3339); defaults to 5 seconds before the first scheduled start
    #[arg(long)]
    from: Option<DateTime<Utc>>,
    /// Stop after this many simulated seconds
    #[arg(long, default_value_t = 24 * 3600)]
    max_secs: u64,
}

pub fn run(args: SimulateArgs, config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(&args.tasks)?;
    let tasks: Vec<Task> = serde_json::from_str(&content)?;
    let config = load_config(config_path)?;

    let start = args
        .from
        .or_else(|| tasks.iter().filter_map(|t| t.scheduled_start).min().map(|s| s - Duration::seconds(5)))
        .unwrap_or_else(Utc::now);
    let clock = ManualClock::new(start);

    let bus = SignalBus::default();
    let recognizer = ScriptedRecognizer::new();
    let mut manager = GlobalVerificationManager::new(
        &bus,
        recognizer.clone(),
        &config.verification,
        config.recognition.retry_backoff(),
    );
    let task_ids: Vec<String> = tasks
        .iter()
        .filter(|t| t.verification.is_some())
        .map(|t| t.id.clone())
        .collect();
    let mut store = VerificationStore::new(
        config.verification.clone(),
        RewardCalculator::new(config.rewards.clone()),
        bus,
        GoldLedger::default(),
        tasks.into_iter().collect::<MemoryTaskStore>(),
    );

    for id in &task_ids {
        print_events(&store.enable(id, clock.now())?)?;
        if let Some(quality) = args.quality {
            store.rate_completion(id, quality)?;
        }
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;

    runtime.block_on(async {
        for _ in 0..=args.max_secs {
            let now = clock.now();
            print_events(&store.tick(now))?;
            print_events(&manager.poll(now))?;

            let accept = manager.active().map(|modal| {
                let request = modal.request();
                let accept = match request.verification_type {
                    VerificationType::Start => args.accept_start,
                    VerificationType::Complete => args.accept_complete,
                };
                (accept, request.keywords.clone())
            });
            if let Some((true, keywords)) = accept {
                recognizer.push_labels(keywords);
                if let Err(e) = manager
                    .submit_evidence(&Evidence::photo_bytes(b"simulated evidence"), now)
                    .await
                {
                    tracing::warn!(error = %e, "simulated submission failed");
                }
                // deliver the result within the same second
                print_events(&manager.poll(now))?;
                print_events(&store.tick(now))?;
            }

            let done = task_ids
                .iter()
                .all(|id| store.state(id).map_or(true, |s| s.status().is_terminal()));
            if done {
                break;
            }
            clock.advance_secs(1);
        }
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;

    let summary = json!({
        "finished_at": clock.now(),
        "balance": store.gold().balance(),
        "tasks": task_ids
            .iter()
            .filter_map(|id| store.state(id))
            .map(|s| json!({
                "id": s.task_id(),
                "status": s.status(),
                "gold": s.gold_earned(),
                "start_timed_out": s.start_timed_out(),
                "completion_timed_out": s.completion_timed_out(),
            }))
            .collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn print_events(events: &[Event]) -> Result<(), serde_json::Error> {
    for event in events {
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}
