use crate::client::{Client, ClientId, Geometry, OpenOptions, partial_or};
use crate::error::{ClientError, ConfigError, ResampleError};
use crate::compressor::{CompressorSettings, CompressorState};
use crate::format::SampleFormat;
use crate::mixer::Dither;
use crate::profile::{ChannelRoute, Direction, Profile, ProfileKind};
use crate::resample::ResampleQuality;

use super::BLOCK;

const GEOMETRY: Geometry = Geometry {
    mix_rate: 48_000,
    block_frames: BLOCK,
    quality: ResampleQuality::Medium,
};

fn client(profile: &Profile, options: OpenOptions) -> Client {
    let mut client = Client::new(ClientId(1), 0, profile, &GEOMETRY, &options).unwrap();
    client.set_enabled(Direction::Rx, true);
    client.set_enabled(Direction::Tx, true);
    client
}

fn stereo_block(left: i64, right: i64) -> Vec<i64> {
    (0..BLOCK).flat_map(|_| [left, right]).collect()
}

fn render(profile: &mut Profile, mix: &[i64], mix_bits: u32) -> Vec<i64> {
    let mut block = vec![0; BLOCK * profile.channels];
    let channels = profile.channels;
    profile.render_rx(mix, 2, BLOCK, mix_bits, channels, &mut block, &mut Dither::default());
    block
}

fn deliver(client: &mut Client, profile: &mut Profile, mix: &[i64], mix_bits: u32) -> bool {
    let block = render(profile, mix, mix_bits);
    client.fan_out(&block, profile.channels, profile.bits, BLOCK, &mut Dither::default())
}

fn drain_canonical(client: &mut Client) -> Vec<i64> {
    let mut out = vec![0; client.rx.canonical.unread_samples()];
    client.rx.canonical.read_samples(&mut out);
    out
}

#[test]
fn fan_out_scales_mix_up_to_client_depth() {
    let mut profile = Profile::new("wide", ProfileKind::Dsp, 2, 24).unwrap();
    let mut client = client(&profile, OpenOptions::default());
    assert_eq!(client.layout().format, SampleFormat::S24Le);

    assert!(deliver(&mut client, &mut profile, &stereo_block(100, -3), 16));
    let received = drain_canonical(&mut client);
    assert_eq!(received, stereo_block(25_600, -768));
    assert_eq!(client.rx.peaks, vec![25_600, 768]);
}

#[test]
fn clients_of_one_profile_share_a_single_compressor_pass() {
    let mut profile = Profile::new("loud", ProfileKind::Dsp, 2, 16).unwrap();
    profile.set_compressor(CompressorSettings::new(85, 3, 20).unwrap()).unwrap();
    let mut first = client(&profile, OpenOptions::default());
    let mut second = client(&profile, OpenOptions::default());
    let mix = stereo_block(30_000, -30_000);

    let mut reference = mix.clone();
    let mut state = CompressorState::default();
    for _ in 0..2 {
        let block = render(&mut profile, &mix, 16);
        let mut dither = Dither::default();
        assert!(first.fan_out(&block, 2, 16, BLOCK, &mut dither));
        assert!(second.fan_out(&block, 2, 16, BLOCK, &mut dither));

        reference.copy_from_slice(&mix);
        state.process(&profile.compressor, &mut reference, 2, BLOCK, 32_767);
        assert_eq!(block, reference);
    }

    let a = drain_canonical(&mut first);
    let b = drain_canonical(&mut second);
    assert_eq!(a, b);
    assert_eq!(profile.compressor_state.gain(0), state.gain(0));

    let threshold = profile.compressor.threshold(32_767);
    let settled = a[a.len() - 2..].to_vec();
    assert!(settled[0] > 0 && (settled[0] as f64) < threshold * 1.01, "{settled:?}");
    assert!(settled[1] < 0 && (settled[1].abs() as f64) < threshold * 1.01, "{settled:?}");
}

#[test]
fn extra_client_channels_past_the_profile_block_are_silent() {
    let mut profile = Profile::new("narrow", ProfileKind::Dsp, 1, 16).unwrap();
    let options = OpenOptions {
        channels: Some(2),
        ..OpenOptions::default()
    };
    let mut client = client(&profile, options);
    let block = render(&mut profile, &stereo_block(40, 90), 16);
    assert!(client.fan_out(&block, 1, 16, BLOCK, &mut Dither::default()));
    assert_eq!(drain_canonical(&mut client), stereo_block(40, 0));
}

#[test]
fn routes_select_swap_and_mute_channels() {
    let mut profile = Profile::new("swap", ProfileKind::Dsp, 2, 16).unwrap();
    profile.set_route(Direction::Rx, 0, ChannelRoute::to_channel(1)).unwrap();
    profile
        .set_route(
            Direction::Rx,
            1,
            ChannelRoute {
                mute: true,
                ..ChannelRoute::to_channel(0)
            },
        )
        .unwrap();
    let mut client = client(&profile, OpenOptions::default());

    deliver(&mut client, &mut profile, &stereo_block(5, 9), 16);
    assert_eq!(drain_canonical(&mut client), stereo_block(9, 0));

    // a route past the mix width is silent
    profile.set_route(Direction::Rx, 0, ChannelRoute::to_channel(7)).unwrap();
    deliver(&mut client, &mut profile, &stereo_block(5, 9), 16);
    assert_eq!(drain_canonical(&mut client), stereo_block(0, 0));
}

#[test]
fn recording_delay_is_queued_once_per_start() {
    let mut profile = Profile::new("late", ProfileKind::Dsp, 2, 16).unwrap();
    let mut client = client(&profile, OpenOptions::default());
    let layout = crate::client::Layout {
        rx_delay: 32,
        ..*client.layout()
    };
    client.relayout(layout, &profile, &GEOMETRY).unwrap();
    assert!(client.rx.enabled);

    deliver(&mut client, &mut profile, &stereo_block(7, 7), 16);
    deliver(&mut client, &mut profile, &stereo_block(7, 7), 16);
    let received = drain_canonical(&mut client);
    assert_eq!(received.len(), (32 + 2 * BLOCK) * 2);
    assert!(received[..64].iter().all(|s| *s == 0));
    assert!(received[64..].iter().all(|s| *s == 7));

    client.set_enabled(Direction::Rx, false);
    client.set_enabled(Direction::Rx, true);
    deliver(&mut client, &mut profile, &stereo_block(7, 7), 16);
    assert_eq!(drain_canonical(&mut client).len(), (32 + BLOCK) * 2);
}

#[test]
fn full_receive_side_drops_the_block() {
    let mut profile = Profile::new("slow", ProfileKind::Dsp, 2, 16).unwrap();
    let mut client = client(&profile, OpenOptions::default());
    let block = stereo_block(1, 1);

    for _ in 0..crate::client::CANONICAL_BLOCKS {
        assert!(deliver(&mut client, &mut profile, &block, 16));
    }
    assert!(!deliver(&mut client, &mut profile, &block, 16));
    assert_eq!(client.rx.xruns, 1);

    client.pump_rx().unwrap();
    assert!(deliver(&mut client, &mut profile, &block, 16));
    assert_eq!(client.status("slow").overruns, 1);
}

#[test]
fn stopped_direction_is_skipped() {
    let mut profile = Profile::new("idle", ProfileKind::Dsp, 2, 16).unwrap();
    let mut client =
        Client::new(ClientId(3), 0, &profile, &GEOMETRY, &OpenOptions::default()).unwrap();
    assert!(deliver(&mut client, &mut profile, &stereo_block(1, 1), 16));
    assert_eq!(client.rx.canonical.unread_samples(), 0);

    let mut mix = vec![0; BLOCK * 2];
    assert!(client.fan_in(&profile.tx.routes, &mut mix, 2, BLOCK, 16, &mut Dither::default()));
    assert_eq!(client.tx.xruns, 0);
}

#[test]
fn fan_in_accumulates_and_counts_underruns() {
    let mut profile = Profile::new("play", ProfileKind::Dsp, 2, 16).unwrap();
    profile
        .set_route(
            Direction::Tx,
            1,
            ChannelRoute {
                invert: true,
                ..ChannelRoute::to_channel(1)
            },
        )
        .unwrap();
    let mut a = client(&profile, OpenOptions::default());
    let mut b = client(&profile, OpenOptions::default());
    let mut dither = Dither::default();
    let mut mix = vec![0; BLOCK * 2];

    assert!(!a.fan_in(&profile.tx.routes, &mut mix, 2, BLOCK, 16, &mut dither));
    assert_eq!(a.tx.xruns, 1);
    assert!(mix.iter().all(|s| *s == 0));

    a.tx.canonical.write_samples(&stereo_block(100, 10));
    b.tx.canonical.write_samples(&stereo_block(-30, 5));
    assert!(a.fan_in(&profile.tx.routes, &mut mix, 2, BLOCK, 16, &mut dither));
    assert!(b.fan_in(&profile.tx.routes, &mut mix, 2, BLOCK, 16, &mut dither));
    assert_eq!(mix, stereo_block(70, -15));
}

#[test]
fn fan_in_scales_client_depth_to_mix() {
    let profile = Profile::new("eight", ProfileKind::Dsp, 1, 8).unwrap();
    let mut client = client(&profile, OpenOptions::default());
    client.tx.canonical.write_samples(&vec![-2; BLOCK]);
    let mut mix = vec![0; BLOCK * 2];
    client.fan_in(&profile.tx.routes, &mut mix, 2, BLOCK, 24, &mut Dither::default());
    assert_eq!(mix, stereo_block(-2 << 16, 0));
}

#[test]
fn wire_pumps_convert_formats() {
    let profile = Profile::new("float", ProfileKind::Dsp, 2, 32).unwrap();
    let options = OpenOptions {
        format: Some(SampleFormat::F32Le),
        ..OpenOptions::default()
    };
    let mut client = client(&profile, options);

    let mut wire = Vec::new();
    for _ in 0..BLOCK {
        wire.extend_from_slice(&0.5f32.to_le_bytes());
        wire.extend_from_slice(&(-0.25f32).to_le_bytes());
    }
    assert_eq!(client.tx.wire.write_linear(&wire), wire.len());
    client.pump_tx().unwrap();
    let mut canonical = vec![0; BLOCK * 2];
    assert_eq!(client.tx.canonical.read_samples(&mut canonical), BLOCK * 2);
    assert_eq!(canonical, stereo_block(1 << 30, -(1 << 29)));

    client.rx.canonical.write_samples(&canonical);
    client.pump_rx().unwrap();
    let mut bytes = vec![0u8; wire.len()];
    assert_eq!(client.rx.wire.read_linear(&mut bytes), wire.len());
    assert_eq!(bytes, wire);
}

#[test]
fn rate_converting_client_receives_fewer_frames() {
    let mut profile = Profile::new("half", ProfileKind::Dsp, 2, 16).unwrap();
    let options = OpenOptions {
        rate: Some(24_000),
        ..OpenOptions::default()
    };
    let mut client = client(&profile, options);
    assert!(client.rx.converter.is_some());

    for _ in 0..4 {
        assert!(deliver(&mut client, &mut profile, &stereo_block(1_000, -1_000), 16));
    }
    client.pump_rx().unwrap();
    let queued = client.rx.wire.total_unread();
    assert!(queued > 0);
    assert_eq!(queued % client.layout().frame_bytes(), 0);
    assert!(queued <= 4 * BLOCK / 2 * client.layout().frame_bytes());
}

#[test]
fn relayout_keeps_run_state_and_drops_audio() {
    let mut profile = Profile::new("re", ProfileKind::Dsp, 2, 16).unwrap();
    let mut client = client(&profile, OpenOptions::default());
    deliver(&mut client, &mut profile, &stereo_block(1, 1), 16);
    client.rx.xruns = 5;
    client.pump_rx().unwrap();
    assert_eq!(client.queue_depth(Direction::Rx), BLOCK * 4);

    let layout = crate::client::Layout {
        channels: 1,
        ..*client.layout()
    };
    client.relayout(layout, &profile, &GEOMETRY).unwrap();
    assert!(client.rx.enabled && client.tx.enabled);
    assert_eq!(client.rx.xruns, 5);
    assert_eq!(client.queue_depth(Direction::Rx), 0);
    assert_eq!(client.rx.peaks.len(), 1);
}

#[test]
fn committed_bytes_are_reported_over_a_later_failure() {
    let failure = ClientError::from(ConfigError::from(ResampleError::Process("stalled".into())));
    assert_eq!(partial_or(256, failure.clone()), Ok(256));
    assert_eq!(partial_or(0, failure.clone()), Err(failure));
    assert_eq!(partial_or(0, ClientError::WouldBlock), Err(ClientError::WouldBlock));
}
