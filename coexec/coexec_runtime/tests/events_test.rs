//! Integration tests for scheduler events and log routing.

use std::sync::{Arc, Mutex};

use coexec_runtime::*;
use tokio::sync::broadcast;

fn job() -> Task {
    Task::generator("job", |co| async move {
        let n = co.suspend(20).await?;
        Ok(Value::from(n.as_i64().unwrap_or_default() + 1))
    })
}

/// Collect log lines until the scheduler reports it is done.
async fn until_done(events: &mut broadcast::Receiver<SchedulerEvent>) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        match events.recv().await.unwrap() {
            SchedulerEvent::Done { finished } => {
                assert!(finished);
                return lines;
            }
            SchedulerEvent::Log(line) => lines.push(line),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_done_follows_completion() {
    let s = Scheduler::new("events").unwrap();
    let mut events = s.subscribe();

    let handle = s.submit(job()).unwrap();
    let lines = until_done(&mut events).await;

    assert!(lines.is_empty());
    assert!(handle.is_settled());
    assert!(s.is_idle());
    assert_eq!(handle.await.unwrap().as_i64(), Some(21));
}

#[tokio::test(start_paused = true)]
async fn test_silent_scheduler_emits_log_events() {
    let s = Scheduler::new(SchedulerConfig {
        name: "quiet".to_string(),
        silent: true,
        ..Default::default()
    })
    .unwrap();
    let mut events = s.subscribe();

    s.submit(job()).unwrap();
    let lines = until_done(&mut events).await;

    assert_eq!(
        lines,
        [
            "<exec::quiet> [main] added process <job>",
            "<exec::quiet> [main] process <job> completed in 2 cycles",
            "<exec::quiet> [main] done",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_custom_log_sink_receives_lines() {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let captured = lines.clone();
    let s = Scheduler::new(SchedulerConfig {
        name: "sink".to_string(),
        retries: 1,
        retry_interval: 5,
        log: Some(LogSink::new(move |line| {
            captured.lock().unwrap().push(line.to_string())
        })),
        ..Default::default()
    })
    .unwrap();
    let mut events = s.subscribe();

    let failing = Task::new("broken", Factory::new(|| Frame::ready(TaskError::raised("nope"))));
    let failure = s.submit(failing).unwrap().await.unwrap_err();
    assert_eq!(failure.len(), 2);
    until_done(&mut events).await;

    let lines = lines.lock().unwrap();
    assert_eq!(lines[0], "<exec::sink> [main] added process <broken>");
    for expected in [
        "<exec::sink> [main] process <broken> retrying (1/1)",
        "<exec::sink> [main] process <broken> failed in cycle 2",
    ] {
        assert!(lines.iter().any(|line| line == expected));
    }
    assert_eq!(lines.last().map(String::as_str), Some("<exec::sink> [main] done"));
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_from_json_config() {
    let config =
        SchedulerConfig::from_json(r#"{"name": "json", "cores": 4, "silent": true}"#).unwrap();
    let s = Scheduler::new(config).unwrap();
    let mut events = s.subscribe();

    assert_eq!(s.name(), "json");
    assert_eq!(s.config().cores, 4);
    assert_eq!(s.config().retries, 1);

    s.submit(job()).unwrap();
    let lines = until_done(&mut events).await;
    assert!(lines.iter().all(|line| line.starts_with("<exec::json>")));
}
