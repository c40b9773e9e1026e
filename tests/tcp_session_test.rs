//! End-to-end session over a TCP socket against a minimal simulated instrument.

use dmm_scan::data::{read_log, values, CsvSessionLog, LogEntry};
use dmm_scan::error::{FailureKind, ScanError};
use dmm_scan::instrument::{InstrumentPort, TcpScpiPort};
use dmm_scan::measurement::{ChannelAddress, MeasurementKind};
use dmm_scan::scan::{FailurePolicy, ScanPlan, ScanSequencer, SessionStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Answers `MEASure` queries by function; goes silent on current queries for `mute_channel`.
async fn spawn_instrument(mute_channel: Option<&'static str>) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut socket = BufReader::new(socket);
        let mut received = Vec::new();
        loop {
            let mut line = String::new();
            match socket.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if line.starts_with(":MEASure") {
                let muted = mute_channel
                    .is_some_and(|ch| line.contains(ch) && line.contains("CURRent"));
                let reply = if line.contains("VOLTage") {
                    Some("+1.25000000E+01\n")
                } else if line.contains("CURRent") {
                    (!muted).then_some("+3.00000000E-03\n")
                } else {
                    Some("+4.16670000E+03\n")
                };
                if let Some(reply) = reply {
                    if socket.get_mut().write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                }
            }
            received.push(line);
        }
        received
    });
    (port, server)
}

#[tokio::test]
async fn scans_over_raw_socket() {
    let (port, server) = spawn_instrument(None).await;
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.csv");
    let mut log = CsvSessionLog::open(&path).unwrap();

    let tcp = TcpScpiPort::connect("127.0.0.1", port, Duration::from_secs(1))
        .await
        .unwrap()
        .with_timeout(Duration::from_millis(500));
    let mut sequencer = ScanSequencer::new(tcp);
    let plan = ScanPlan::new(vec![
        ChannelAddress::parse("@1001").unwrap(),
        ChannelAddress::parse("@1002").unwrap(),
    ]);

    let report = sequencer.run_scan(&plan, &mut log).await.unwrap();
    assert_eq!(report.status(), SessionStatus::Complete);
    sequencer.into_port().close().await.unwrap();

    assert_eq!(
        values(&read_log(&path).unwrap()),
        vec![12.5, 0.003, 4166.7, 12.5, 0.003, 4166.7]
    );

    let received = server.await.unwrap();
    assert_eq!(received.len(), 3 + 2 * 12);
    assert_eq!(received[2], ":ROUTe:CHANnel:DELay 0.002,(@1001,@1002)");
}

#[tokio::test]
async fn reply_timeout_is_a_transport_failure() {
    let (port, _server) = spawn_instrument(Some("@1002")).await;
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.csv");
    let mut log = CsvSessionLog::open(&path).unwrap();

    let tcp = TcpScpiPort::connect("127.0.0.1", port, Duration::from_secs(1))
        .await
        .unwrap()
        .with_timeout(Duration::from_millis(100));
    let mut sequencer = ScanSequencer::new(tcp).with_policy(FailurePolicy::Abort);
    let plan = ScanPlan::new(vec![
        ChannelAddress::parse("@1001").unwrap(),
        ChannelAddress::parse("@1002").unwrap(),
    ]);

    let report = sequencer.run_scan(&plan, &mut log).await.unwrap();

    assert_eq!(report.status(), SessionStatus::Aborted);
    assert_eq!(
        report.aborted_by.as_ref().map(|f| f.failure),
        Some(FailureKind::Transport)
    );
    assert_eq!(read_log(&path).unwrap().len(), 3);
}

/// Accepts any number of connections. The first current query is answered 150 ms late;
/// every other query is answered at once.
async fn spawn_slow_current_instrument() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let delayed = Arc::new(AtomicBool::new(false));
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let delayed = delayed.clone();
            tokio::spawn(async move {
                let mut socket = BufReader::new(socket);
                loop {
                    let mut line = String::new();
                    match socket.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                    if !line.starts_with(":MEASure") {
                        continue;
                    }
                    let reply = if line.contains("VOLTage") {
                        "+1.25000000E+01\n"
                    } else if line.contains("CURRent") {
                        if !delayed.swap(true, Ordering::SeqCst) {
                            tokio::time::sleep(Duration::from_millis(150)).await;
                        }
                        "+3.00000000E-03\n"
                    } else {
                        "+4.16670000E+03\n"
                    };
                    if socket.get_mut().write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    port
}

#[tokio::test]
async fn late_reply_is_never_taken_as_the_next_answer() {
    let port = spawn_slow_current_instrument().await;
    let mut tcp = TcpScpiPort::connect("127.0.0.1", port, Duration::from_secs(1))
        .await
        .unwrap()
        .with_timeout(Duration::from_millis(50));

    let current = tcp.query(":MEASure:SCALar:CURRent:DC? (@1001)").await;
    assert!(matches!(current, Err(ScanError::Transport(_))));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let resistance = tcp.query(":MEASure:SCALar:RESistance? (@1001)").await;
    assert!(matches!(resistance, Err(ScanError::Transport(_))));

    tcp.reconnect(Duration::from_secs(1)).await.unwrap();
    assert!(!tcp.is_desynchronised());
    let resistance = tcp.query(":MEASure:SCALar:RESistance? (@1001)").await.unwrap();
    assert_eq!(resistance, vec![4166.7]);
}

#[tokio::test]
async fn skipped_timeout_does_not_shift_later_readings() {
    let port = spawn_slow_current_instrument().await;
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.csv");
    let mut log = CsvSessionLog::open(&path).unwrap();

    let tcp = TcpScpiPort::connect("127.0.0.1", port, Duration::from_secs(1))
        .await
        .unwrap()
        .with_timeout(Duration::from_millis(50));
    let mut sequencer = ScanSequencer::new(tcp).with_policy(FailurePolicy::SkipAndContinue);
    let plan = ScanPlan::new(vec![ChannelAddress::parse("@1001").unwrap()]);

    let report = sequencer.run_scan(&plan, &mut log).await.unwrap();

    assert_eq!(report.status(), SessionStatus::Incomplete);
    let kinds: Vec<MeasurementKind> = report.failures.iter().map(|f| f.kind).collect();
    assert_eq!(kinds, vec![MeasurementKind::Current, MeasurementKind::Resistance]);

    let lines = read_log(&path).unwrap();
    assert_eq!(lines[0].entry, LogEntry::Value(12.5));
    assert!(matches!(lines[1].entry, LogEntry::Failure(_)));
    assert!(matches!(lines[2].entry, LogEntry::Failure(_)));
}
