use std::sync::Arc;
use std::time::Duration;

use halstream_communication::connection::spawn_stream;
use halstream_communication::{spawn_controller, ControllerCommand, ControllerRegistry};
use halstream_core::data::{LineContext, WorkflowState};
use halstream_core::event_bus::{AppEvent, ConnectionEvent, ControllerEvent, EventBus, JobEvent};
use halstream_settings::Config;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

const STATUS: &[u8] = b"<Idle|MPos:0.000,0.000,0.000|FS:0,0>\r\n";
const PARSER_STATE: &[u8] = b"[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]\r\nok\r\n";

/// Answers every line with `ok` and every status query with an idle report
async fn firmware(stream: DuplexStream) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut chunk = [0u8; 256];
    let mut line = Vec::new();
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        for &byte in &chunk[..n] {
            let reply: &[u8] = match byte {
                b'?' | 0x87 => STATUS,
                b'\n' => {
                    let text = String::from_utf8_lossy(&line).to_string();
                    line.clear();
                    if text == "$G" {
                        PARSER_STATE
                    } else {
                        &b"ok\r\n"[..]
                    }
                }
                b'!' | b'~' | 0x18 | 0x80..=0xff => continue,
                other => {
                    line.push(other);
                    continue;
                }
            };
            if writer.write_all(reply).await.is_err() {
                return;
            }
        }
    }
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.streaming.poll_interval_ms = 10;
    config.streaming.completion_idle_ms = 50;
    config
}

async fn wait_for(bus: &EventBus, what: &str, matches: impl Fn(&AppEvent) -> bool) {
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while !bus.history(None).iter().any(&matches) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(found.is_ok(), "timed out waiting for {}", what);
}

#[tokio::test]
async fn test_streams_program_against_simulated_firmware() {
    let (local, remote) = tokio::io::duplex(4096);
    tokio::spawn(firmware(remote));
    let (connection, events) = spawn_stream("sim", local);
    let bus = Arc::new(EventBus::recording());
    let registry = Arc::new(ControllerRegistry::new());
    let handle = spawn_controller(connection, events, fast_config(), bus.clone(), Some(registry.clone()));
    assert_eq!(registry.idents(), vec!["sim".to_string()]);

    wait_for(&bus, "ready", |e| {
        matches!(e, AppEvent::Controller(ControllerEvent::Ready { .. }))
    })
    .await;

    let program: String = (1..=40).map(|i| format!("G1 X{} Y{} F500\n", i, i * 2)).collect();
    handle
        .command(ControllerCommand::GcodeLoad {
            name: "grid.nc".to_string(),
            gcode: program,
            context: LineContext::new(),
        })
        .await
        .unwrap();
    handle.dispatch("gcode:start", &[]).await.unwrap();

    wait_for(&bus, "completion", |e| {
        matches!(e, AppEvent::Job(JobEvent::Completed { .. }))
    })
    .await;

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.workflow, WorkflowState::Idle);
    assert_eq!(snapshot.sender.total, 40);
    assert!(snapshot.ready);

    handle.close().await;
    wait_for(&bus, "close", |e| {
        matches!(e, AppEvent::Connection(ConnectionEvent::Closed { .. }))
    })
    .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_unknown_command_is_rejected() {
    let (local, remote) = tokio::io::duplex(1024);
    tokio::spawn(firmware(remote));
    let (connection, events) = spawn_stream("sim", local);
    let bus = Arc::new(EventBus::recording());
    let handle = spawn_controller(connection, events, fast_config(), bus, None);
    assert!(handle.dispatch("gcode:teleport", &[]).await.is_err());
    assert!(handle.is_alive());
    handle.close().await;
}

#[tokio::test]
async fn test_peer_close_deregisters_controller() {
    let (local, remote) = tokio::io::duplex(1024);
    let (connection, events) = spawn_stream("gone", local);
    let bus = Arc::new(EventBus::recording());
    let registry = Arc::new(ControllerRegistry::new());
    let handle = spawn_controller(connection, events, fast_config(), bus.clone(), Some(registry.clone()));
    drop(remote);

    wait_for(&bus, "close", |e| {
        matches!(e, AppEvent::Connection(ConnectionEvent::Closed { .. }))
    })
    .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(registry.get("gone").is_none());
    assert!(handle.command(ControllerCommand::Unlock).await.is_err());
}

#[tokio::test]
async fn test_reconnect_keeps_newer_registration() {
    let registry = Arc::new(ControllerRegistry::new());
    let bus = Arc::new(EventBus::recording());

    let (first_local, first_remote) = tokio::io::duplex(1024);
    tokio::spawn(firmware(first_remote));
    let (connection, events) = spawn_stream("port", first_local);
    let first = spawn_controller(connection, events, fast_config(), bus.clone(), Some(registry.clone()));

    let (second_local, second_remote) = tokio::io::duplex(1024);
    tokio::spawn(firmware(second_remote));
    let (connection, events) = spawn_stream("port", second_local);
    let second = spawn_controller(connection, events, fast_config(), bus.clone(), Some(registry.clone()));

    first.close().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.get("port").map(|h| h.id()), Some(second.id()));
    second.close().await;
}
