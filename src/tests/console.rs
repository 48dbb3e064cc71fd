use crate::control::ui::{Prompt, PromptKind, level_db, meter};

fn bars(text: &str) -> usize {
    text.chars().filter(|c| *c == '|').count()
}

#[test]
fn meter_spans_sixty_decibels_of_the_loudest_channel() {
    let full = meter(&[3, 100, -7], 100, 6);
    assert_eq!(full, "||||||    0.0");

    let half = meter(&[0, 31_623], 1_000_000, 6);
    assert_eq!(bars(&half), 3);
    assert!(half.ends_with(" -30.0"), "{half}");

    let below_floor = meter(&[1], 1_000_000, 6);
    assert_eq!(bars(&below_floor), 0);
    assert!(below_floor.ends_with("-120.0"), "{below_floor}");
}

#[test]
fn silent_meter_reads_minus_infinity() {
    let silent = meter(&[0, 0], 100, 6);
    assert_eq!(bars(&silent), 0);
    assert!(silent.ends_with("-inf"));
    assert_eq!(meter(&[], 100, 6), silent);
    assert_eq!(level_db(5, 0), f32::NEG_INFINITY);
}

#[test]
fn shift_prompt_takes_only_signed_digits() {
    let mut prompt = Prompt::new(PromptKind::Shift);
    assert_eq!(prompt.buffer, "0");
    prompt.buffer.clear();
    for c in "-1x2".chars() {
        prompt.push(c);
    }
    assert_eq!(prompt.buffer, "-12");
}

#[test]
fn directive_prompt_takes_printable_text() {
    let mut prompt = Prompt::new(PromptKind::Directive);
    assert!(prompt.buffer.is_empty());
    for c in "-d pcm -c 2".chars() {
        assert!(prompt.push(c));
    }
    assert!(!prompt.push('\t'));
    assert_eq!(prompt.buffer, "-d pcm -c 2");
}
