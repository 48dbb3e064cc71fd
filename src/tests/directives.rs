use std::time::Duration;

use crate::config::{Directive, Settings, parse_directives};
use crate::engine::Engine;
use crate::error::ConfigError;
use crate::profile::{ChannelRoute, Direction, ProfileKind, TapPoint};
use crate::resample::ResampleQuality;

use super::test_settings;

fn profile(directives: &[Directive], index: usize) -> &crate::profile::Profile {
    let profiles: Vec<_> = directives
        .iter()
        .filter_map(|d| match d {
            Directive::Profile(p) => Some(p.as_ref()),
            _ => None,
        })
        .collect();
    profiles[index]
}

#[test]
fn engine_options_parse_in_order() {
    let parsed = parse_directives("-r 44100 -C 4 -s 256 -Q 0 -f hw:1").unwrap();
    assert!(matches!(parsed[0], Directive::Rate(44_100)));
    assert!(matches!(parsed[1], Directive::MixChannels(4)));
    assert!(matches!(parsed[2], Directive::Samples(256)));
    assert!(matches!(parsed[3], Directive::Quality(ResampleQuality::Fast)));
    match &parsed[4] {
        Directive::Device { rx, tx } => {
            assert_eq!(rx.as_deref(), Some("hw:1"));
            assert_eq!(tx.as_deref(), Some("hw:1"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(parsed.iter().take(3).all(Directive::needs_refresh));
    assert!(!parsed[3].needs_refresh());
}

#[test]
fn profile_options_accumulate_until_declared() {
    let parsed = parse_directives("-c 1 -b 24 -a -2 -m 1,0 -p -d mic -e 1,0 -l rec").unwrap();
    let mic = profile(&parsed, 0);
    assert_eq!(mic.name, "mic");
    assert_eq!(mic.kind, ProfileKind::Dsp);
    assert_eq!((mic.channels, mic.bits), (1, 24));
    assert_eq!(
        mic.route(Direction::Rx, 0).unwrap(),
        ChannelRoute {
            channel: 1,
            shift: -2,
            invert: true,
            mute: false,
        }
    );
    assert_eq!(mic.route(Direction::Tx, 0).unwrap().channel, 0);

    let rec = profile(&parsed, 1);
    assert_eq!(rec.kind, ProfileKind::Loopback);
    assert!(rec.route(Direction::Rx, 0).unwrap().mute);
    assert!(!rec.route(Direction::Tx, 0).unwrap().mute);
    assert_eq!(rec.route(Direction::Rx, 0).unwrap().shift, -2);
}

#[test]
fn unmapped_channels_keep_identity_routes() {
    let parsed = parse_directives("-c 4 -m 3,2 -d quad").unwrap();
    let quad = profile(&parsed, 0);
    assert_eq!(quad.route(Direction::Rx, 0).unwrap().channel, 3);
    assert_eq!(quad.route(Direction::Tx, 0).unwrap().channel, 2);
    assert_eq!(quad.route(Direction::Rx, 3).unwrap().channel, 3);
}

#[test]
fn compressor_and_filter_options() {
    let parsed = parse_directives("-x 100,2,10 -F 8 -d eq -g 200,1,20").unwrap();
    let eq = profile(&parsed, 0);
    assert!(eq.compressor.enabled);
    assert_eq!((eq.compressor.knee, eq.compressor.attack, eq.compressor.decay), (100, 2, 10));
    let kernel = eq.rx.filters[1].as_ref().unwrap();
    assert_eq!(kernel.len(), 8);
    assert_eq!(kernel[0], 1.0);
    assert!(kernel[1..].iter().all(|t| *t == 0.0));
    assert!(matches!(parsed[1], Directive::MasterCompressor(c) if c.knee == 200));
}

#[test]
fn monitor_tap_option() {
    let parsed = parse_directives("-M o,0,1,1,0,-3").unwrap();
    match parsed[0] {
        Directive::Tap(tap) => {
            assert_eq!(tap.point, TapPoint::Output);
            assert_eq!(
                (tap.src, tap.dst, tap.invert, tap.mute, tap.shift),
                (0, 1, true, false, -3)
            );
        }
        ref other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn malformed_lines_are_rejected() {
    assert_eq!(parse_directives("-r 7000").unwrap_err(), ConfigError::InvalidRate(7_000));
    assert_eq!(parse_directives("-b 12 -d x").unwrap_err(), ConfigError::InvalidBits(12));
    assert_eq!(parse_directives("-C 65").unwrap_err(), ConfigError::InvalidChannels(65));
    assert_eq!(parse_directives("-s 0").unwrap_err(), ConfigError::InvalidBufferSize(0));
    assert!(matches!(parse_directives("-z"), Err(ConfigError::Directive { .. })));
    assert!(matches!(parse_directives("-r"), Err(ConfigError::Directive { .. })));
    assert!(matches!(parse_directives("-r fast"), Err(ConfigError::Directive { .. })));
    assert!(matches!(parse_directives("-m 1,2,3"), Err(ConfigError::Directive { .. })));
    assert!(matches!(parse_directives("-x 1,2"), Err(ConfigError::Directive { .. })));
    assert!(matches!(parse_directives("-x 1,2,99"), Err(ConfigError::InvalidCompressor(_))));
    assert!(matches!(parse_directives("-M q,0,0,0,0,0"), Err(ConfigError::Directive { .. })));
    assert!(parse_directives("").unwrap().is_empty());
}

#[test]
fn failed_line_leaves_engine_untouched() {
    let engine = Engine::with_directives(test_settings(), "-d a").unwrap();
    let control = engine.control();

    let err = control.apply_directives("-s 256 -d b -d a").unwrap_err();
    assert_eq!(err, ConfigError::DuplicateProfile("a".into()));

    let status = control.status();
    assert_eq!(status.samples, super::BLOCK);
    let names: Vec<_> = status.profiles.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["a"]);
    assert!(!engine.shared.enter().refresh);
}

#[test]
fn geometry_change_requests_refresh() {
    let engine = Engine::with_directives(test_settings(), "").unwrap();
    engine.control().apply_directives("-Q 2").unwrap();
    assert!(!engine.shared.enter().refresh);
    engine.control().apply_directives("-r 44100").unwrap();
    let cs = engine.shared.enter();
    assert!(cs.refresh);
    assert_eq!(cs.settings.sample_rate, 44_100);
    assert_eq!(cs.settings.quality, ResampleQuality::High);
}

#[test]
fn settings_are_range_checked() {
    let bad_rate = Settings {
        sample_rate: 400_000,
        ..Settings::default()
    };
    assert_eq!(bad_rate.validated().unwrap_err(), ConfigError::InvalidRate(400_000));

    let no_channels = Settings {
        mix_channels: 0,
        ..Settings::default()
    };
    assert!(Engine::new(no_channels).is_err());

    let settings = Settings::default();
    assert_eq!(settings.format_preferences()[0], settings.hw_format);
    assert_eq!(
        Settings {
            samples: 480,
            ..settings
        }
        .iteration_period(),
        Duration::from_millis(10)
    );
}
