use std::f64::consts::TAU;
use std::time::Duration;

use vmix_kit::latency::LocatorSettings;
use vmix_kit::{
    ClientError, ClientHandle, Engine, LoopState, LoopbackBackend, MixLoop, OpenOptions, Settings,
};

const SAMPLE_RATE: u32 = 48_000;
const BLOCK_FRAMES: usize = 64;
const FRAME_BYTES: usize = 4;

fn start(line: &str) -> (Engine, MixLoop) {
    let settings = Settings {
        sample_rate: SAMPLE_RATE,
        samples: BLOCK_FRAMES,
        reopen_delay: Duration::ZERO,
        ..Settings::default()
    };
    let engine = Engine::with_directives(settings, line).expect("engine");
    let (rx, tx) = LoopbackBackend::pair();
    let mut mix = engine.mix_loop(Box::new(rx), Box::new(tx));
    assert_eq!(mix.step(), LoopState::Running);
    (engine, mix)
}

fn nonblocking() -> OpenOptions {
    OpenOptions {
        nonblocking: true,
        ..OpenOptions::default()
    }
}

fn read_available(client: &ClientHandle, into: &mut Vec<u8>) {
    let mut buf = vec![0u8; 4_096];
    loop {
        match client.read(&mut buf) {
            Ok(n) => into.extend_from_slice(&buf[..n]),
            Err(ClientError::WouldBlock) => break,
            Err(err) => panic!("read failed: {err}"),
        }
    }
}

fn sine_bytes(frames: usize, frequency: f64, amplitude: f64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frames * FRAME_BYTES);
    for n in 0..frames {
        let phase = TAU * frequency * n as f64 / f64::from(SAMPLE_RATE);
        let left = (phase.sin() * amplitude).round() as i16;
        let right = (phase.cos() * amplitude * 0.5).round() as i16;
        bytes.extend_from_slice(&left.to_le_bytes());
        bytes.extend_from_slice(&right.to_le_bytes());
    }
    bytes
}

fn samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[test]
fn sine_played_is_recorded_bit_identical() {
    let (engine, mut mix) = start("-c 2 -b 16 -d pcm");
    let client = engine.open_client("pcm", nonblocking()).expect("client");

    // start receiving and let the priming write go out silent
    let mut received = Vec::new();
    read_available(&client, &mut received);
    assert_eq!(mix.step(), LoopState::Running);

    let sent = sine_bytes(SAMPLE_RATE as usize / 10, 1_000.0, 12_000.0);
    let mut cursor = 0;
    for _ in 0..120 {
        if cursor < sent.len() {
            match client.write(&sent[cursor..]) {
                Ok(n) => cursor += n,
                Err(ClientError::WouldBlock) => {}
                Err(err) => panic!("write failed: {err}"),
            }
        }
        assert_eq!(mix.step(), LoopState::Running);
        read_available(&client, &mut received);
    }
    assert_eq!(cursor, sent.len());

    let sent = samples(&sent);
    let received = samples(&received);
    let first_sent = sent.iter().position(|s| *s != 0).expect("sent signal");
    let first_received = received.iter().position(|s| *s != 0).expect("received signal");
    // left and right stay in their lanes
    assert_eq!(first_sent % 2, first_received % 2);

    let expected = &sent[first_sent..];
    let actual = &received[first_received..];
    assert!(actual.len() >= expected.len(), "only {} samples came back", actual.len());
    assert_eq!(&actual[..expected.len()], expected);

    let status = engine.control().status();
    assert_eq!(status.clients[0].overruns, 0);
}

#[test]
fn stalled_client_does_not_hold_back_others() {
    let (engine, mut mix) = start("-d pcm");
    let busy = engine.open_client("pcm", nonblocking()).expect("busy");
    let stalled = engine.open_client("pcm", nonblocking()).expect("stalled");

    let mut received = Vec::new();
    read_available(&busy, &mut received);
    stalled
        .poll(vmix_kit::PollFlags::READ)
        .expect("start stalled client");

    let iterations = 40;
    for _ in 0..iterations {
        assert_eq!(mix.step(), LoopState::Running);
        read_available(&busy, &mut received);
    }
    assert_eq!(received.len(), iterations * BLOCK_FRAMES * FRAME_BYTES);

    let status = engine.control().status();
    let busy_status = status.clients.iter().find(|c| c.id == busy.id()).unwrap();
    let stalled_status = status.clients.iter().find(|c| c.id == stalled.id()).unwrap();
    assert_eq!(busy_status.overruns, 0);
    assert!(stalled_status.overruns > 0);
    assert_eq!(status.iterations, iterations as u64);
}

#[test]
fn delay_locator_measures_the_loopback_path() {
    let (engine, mut mix) = start("");
    let control = engine.control();
    control
        .set_locator(LocatorSettings {
            enabled: true,
            period_frames: 4_096,
            burst_frames: 256,
            ..LocatorSettings::default()
        })
        .expect("locator");

    // three full periods; the first one also sees the priming write
    for _ in 0..3 * 4_096 / BLOCK_FRAMES {
        assert_eq!(mix.step(), LoopState::Running);
    }
    let report = control.locator_report().expect("report");
    // playback is read back two iterations later
    assert_eq!(report.offset_frames, 2 * BLOCK_FRAMES);
    assert!(report.correlation > 0.9, "correlation {}", report.correlation);
}

#[test]
fn close_during_loop_is_clean() {
    let (engine, mut mix) = start("-d pcm");
    let client = engine.open_client("pcm", nonblocking()).expect("client");
    client.write(&sine_bytes(BLOCK_FRAMES * 3, 440.0, 8_000.0)).expect("write");
    mix.step();
    drop(client);
    assert_eq!(mix.step(), LoopState::Running);
    assert!(engine.control().status().clients.is_empty());
    engine.shutdown();
    assert_eq!(mix.step(), LoopState::Exiting);
}
