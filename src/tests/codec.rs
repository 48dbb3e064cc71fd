use crate::format::{self, SampleFormat, max_value, min_value};

fn import_one(fmt: SampleFormat, raw: &[u8]) -> i64 {
    let mut out = [0i64; 1];
    assert_eq!(format::import(fmt, raw, &mut out), 1);
    out[0]
}

fn export_one(fmt: SampleFormat, value: i64) -> Vec<u8> {
    let mut raw = vec![0u8; fmt.bytes()];
    assert_eq!(format::export(fmt, &[value], &mut raw), 1);
    raw
}

#[test]
fn integer_formats_sign_extend_and_unbias() {
    assert_eq!(import_one(SampleFormat::U8, &[0x80]), 0);
    assert_eq!(import_one(SampleFormat::U8, &[0x00]), -128);
    assert_eq!(import_one(SampleFormat::S8, &[0xff]), -1);
    assert_eq!(import_one(SampleFormat::S16Le, &[0x00, 0x80]), -32_768);
    assert_eq!(import_one(SampleFormat::S16Be, &[0x7f, 0xff]), 32_767);
    assert_eq!(import_one(SampleFormat::U16Le, &[0x00, 0x80]), 0);
    assert_eq!(import_one(SampleFormat::S24Le, &[0xff, 0xff, 0xff]), -1);
    assert_eq!(import_one(SampleFormat::S24Be, &[0x80, 0x00, 0x00]), -(1 << 23));
    assert_eq!(import_one(SampleFormat::U24Be, &[0x80, 0x00, 0x01]), 1);
    assert_eq!(import_one(SampleFormat::S32Le, &[0, 0, 0, 0x80]), i64::from(i32::MIN));
    assert_eq!(import_one(SampleFormat::U32Be, &[0xff, 0xff, 0xff, 0xff]), i64::from(i32::MAX));
}

#[test]
fn export_clamps_to_format_range() {
    assert_eq!(export_one(SampleFormat::S16Le, 40_000), vec![0xff, 0x7f]);
    assert_eq!(export_one(SampleFormat::S16Le, -40_000), vec![0x00, 0x80]);
    assert_eq!(export_one(SampleFormat::U8, 1_000), vec![0xff]);
    assert_eq!(export_one(SampleFormat::U8, -1_000), vec![0x00]);
    assert_eq!(export_one(SampleFormat::S24Be, 1 << 30), vec![0x7f, 0xff, 0xff]);
}

#[test]
fn integer_extremes_survive_every_format() {
    for fmt in SampleFormat::ALL {
        for value in [min_value(fmt), -1, 0, 1, max_value(fmt)] {
            let raw = export_one(fmt, value);
            let back = import_one(fmt, &raw);
            if fmt == SampleFormat::F32Le || fmt == SampleFormat::F32Be {
                // float only carries 24 significant bits
                assert!((back - value).abs() <= 1 << 8, "{fmt:?}: {value} -> {back}");
            } else {
                assert_eq!(back, value, "{fmt:?}");
            }
        }
    }
}

#[test]
fn float_import_scales_to_thirty_two_bits() {
    let half = 0.5f32.to_bits().to_le_bytes();
    assert_eq!(import_one(SampleFormat::F32Le, &half), 1 << 30);

    let minus_one = (-1.0f32).to_bits().to_be_bytes();
    assert_eq!(import_one(SampleFormat::F32Be, &minus_one), i64::from(i32::MIN));

    for loud in [1.0f32, 2.0, f32::INFINITY] {
        let raw = loud.to_bits().to_le_bytes();
        assert_eq!(import_one(SampleFormat::F32Le, &raw), i64::from(i32::MAX));
    }
    let raw = f32::NEG_INFINITY.to_bits().to_le_bytes();
    assert_eq!(import_one(SampleFormat::F32Le, &raw), i64::from(i32::MIN));

    let nan = f32::NAN.to_bits().to_le_bytes();
    assert_eq!(import_one(SampleFormat::F32Le, &nan), 0);
    let tiny = f32::MIN_POSITIVE.to_bits().to_le_bytes();
    assert_eq!(import_one(SampleFormat::F32Le, &tiny), 0);
}

#[test]
fn float_export_produces_exact_bits() {
    let raw = export_one(SampleFormat::F32Le, 1 << 29);
    assert_eq!(f32::from_bits(u32::from_le_bytes(raw.try_into().unwrap())), 0.25);

    let raw = export_one(SampleFormat::F32Be, -(1 << 30));
    assert_eq!(f32::from_bits(u32::from_be_bytes(raw.try_into().unwrap())), -0.5);

    let raw = export_one(SampleFormat::F32Le, i64::MAX);
    assert_eq!(f32::from_bits(u32::from_le_bytes(raw.try_into().unwrap())), 1.0);

    assert_eq!(export_one(SampleFormat::F32Le, 0), vec![0, 0, 0, 0]);
}

#[test]
fn silence_is_the_zero_level() {
    let mut raw = [0u8; 6];
    format::silence(SampleFormat::U16Be, &mut raw);
    assert_eq!(raw, [0x80, 0x00, 0x80, 0x00, 0x80, 0x00]);

    let mut decoded = [7i64; 3];
    format::import(SampleFormat::U16Be, &raw, &mut decoded);
    assert_eq!(decoded, [0, 0, 0]);
}

#[test]
fn masks_round_trip_and_reject_unknown() {
    for fmt in SampleFormat::ALL {
        assert_eq!(SampleFormat::from_mask(fmt.mask()), Ok(fmt));
    }
    assert!(SampleFormat::from_mask(0x0000_0001).is_err());
    assert_eq!(SampleFormat::signed_le(24), Ok(SampleFormat::S24Le));
    assert!(SampleFormat::signed_le(20).is_err());
}
