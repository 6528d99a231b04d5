use chrono::TimeZone;
use rr_protocol::*;
use uuid::Uuid;

#[test]
fn test_launch_request_deserialization_with_defaults() {
    let json = r#"{
        "user_id": "u-1",
        "process_id": "p1",
        "version": 2,
        "robot_code": "{\"name\":\"Demo\"}"
    }"#;

    let request: LaunchRequest =
        serde_json::from_str(json).expect("Failed to deserialize LaunchRequest");

    assert_eq!(request.process_id, "p1");
    assert_eq!(request.version, 2);
    assert_eq!(request.trigger_type, "manual");
    assert!(!request.is_simulate);
    assert_eq!(request.run_type, RunMode::RunAll);
}

#[test]
fn test_run_type_wire_names() {
    let json = r#"{
        "user_id": "u-1",
        "process_id": "p2",
        "version": 1,
        "robot_code": "",
        "run_type": "step-by-step"
    }"#;

    let request: LaunchRequest = serde_json::from_str(json).unwrap();
    assert_eq!(request.run_type, RunMode::StepByStep);
    assert_eq!(serde_json::to_value(RunMode::RunAll).unwrap(), "run-all");
}

#[test]
fn test_process_status_serialization() {
    let json = serde_json::to_value(ProcessStatus::WaitingStep).unwrap();
    assert_eq!(json, "waiting_step");

    let status: ProcessStatus = serde_json::from_str("\"stopped\"").unwrap();
    assert_eq!(status, ProcessStatus::Stopped);
    assert!(status.is_terminal());
    assert!(!ProcessStatus::WaitingStep.is_terminal());
}

#[test]
fn test_event_wire_shape() {
    let event = Event {
        process_id: "p1".to_string(),
        execution_id: Uuid::nil(),
        kind: EventKind::StepEnd,
        seq: 2,
        payload: EventPayload {
            step: Some(StepInfo {
                name: "Log".to_string(),
                lib: None,
                args: vec![],
            }),
            status: Some("SUCCESS".to_string()),
            duration_ms: Some(12),
            ..EventPayload::default()
        },
        timestamp: chrono::Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
    };

    let value = serde_json::to_value(&event).unwrap();

    assert_eq!(value["processId"], "p1");
    assert_eq!(value["type"], "step-end");
    assert_eq!(value["seq"], 2);
    assert_eq!(value["payload"]["step"]["name"], "Log");
    assert_eq!(value["payload"]["durationMs"], 12);
    assert!(value["payload"].get("logs").is_none());
    assert!(value["payload"]["step"].get("lib").is_none());
    assert!(value["ts"].as_str().unwrap().starts_with("2026-01-02T03:04:05"));
}

#[test]
fn test_control_signal_constructors() {
    assert_eq!(
        ControlSignal::continue_step("p2"),
        ControlSignal {
            process_id: "p2".to_string(),
            kind: SignalKind::Continue,
        }
    );
    assert_eq!(ControlSignal::stop("p2").kind, SignalKind::Stop);
}

#[test]
fn test_process_ref_uses_camel_case() {
    let body: ProcessRef = serde_json::from_str(r#"{"processId":"p9"}"#).unwrap();
    assert_eq!(body.process_id, "p9");
}

#[test]
fn test_config_defaults_from_empty_toml() {
    let config: OrchestratorConfig = toml::from_str("").unwrap();

    assert_eq!(config, OrchestratorConfig::default());
    assert!(config.event_bus.url.is_none());
    assert_eq!(config.interpreter.program, "rpa-runner-interpreter");
    assert_eq!(config.gate.idle_timeout(), None);
    assert_eq!(config.supervisor.stop_grace_secs, 5);
    assert_eq!(config.supervisor.retention_secs, 300);
}

#[test]
fn test_config_partial_sections() {
    let config: OrchestratorConfig = toml::from_str(
        r#"
[event_bus]
url = "ws://localhost:8080/bus"

[workspace]
root = "/tmp/work"

[workspace.path_rewrites]
"/home/ec2-user/robot/devdata/" = "/srv/devdata/"

[gate]
idle_timeout_secs = 60
"#,
    )
    .unwrap();

    assert_eq!(config.event_bus.url.as_deref(), Some("ws://localhost:8080/bus"));
    assert_eq!(config.workspace.root, std::path::PathBuf::from("/tmp/work"));
    assert_eq!(config.workspace.log_dir, std::path::PathBuf::from("logs"));
    assert_eq!(config.workspace.path_rewrites.len(), 1);
    assert_eq!(
        config.gate.idle_timeout(),
        Some(std::time::Duration::from_secs(60))
    );
    assert_eq!(config.supervisor.retention_secs, 300);
}
