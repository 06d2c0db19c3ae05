// Unit tests for transcript assembly
//
// These tests verify the merge rules for partial and final fragments:
// partials replace the trailing span wholesale, finals append and clear it.

use voxstream::protocol::TranscriptFragment;
use voxstream::session::TranscriptAssembler;

fn partial(text: &str) -> TranscriptFragment {
    TranscriptFragment {
        text: text.to_string(),
        is_partial: true,
    }
}

fn final_fragment(text: &str) -> TranscriptFragment {
    TranscriptFragment {
        text: text.to_string(),
        is_partial: false,
    }
}

#[test]
fn test_partial_replaces_pending_text() {
    let mut assembler = TranscriptAssembler::new();

    assembler.apply(&partial("hel"));
    assert_eq!(assembler.display_text(), "hel");

    assembler.apply(&partial("hello wor"));
    assert_eq!(
        assembler.display_text(),
        "hello wor",
        "a new partial should replace the previous one, not concatenate"
    );
    assert_eq!(assembler.committed(), "");
}

#[test]
fn test_final_appends_with_separator_and_clears_partial() {
    let mut assembler = TranscriptAssembler::new();

    assembler.apply(&partial("hello wor"));
    assembler.apply(&final_fragment("hello world"));

    assert_eq!(assembler.committed(), "hello world ");
    assert_eq!(assembler.pending_partial(), "");
    assert_eq!(assembler.display_text(), "hello world ");
}

#[test]
fn test_partials_leave_no_residue_after_final() {
    // For any sequence of partials P1..Pn followed by a final F, the text
    // equals committed_before + F.text + " " with no trace of P1..Pn.
    let mut assembler = TranscriptAssembler::new();
    assembler.apply(&final_fragment("first sentence"));
    let committed_before = assembler.committed().to_string();

    for p in ["s", "se", "seco", "second sent"] {
        assembler.apply(&partial(p));
    }
    assembler.apply(&final_fragment("second sentence"));

    assert_eq!(
        assembler.display_text(),
        format!("{committed_before}second sentence ")
    );
    assert!(!assembler.display_text().contains("second sent second"));
}

#[test]
fn test_committed_text_is_append_only() {
    let mut assembler = TranscriptAssembler::new();

    assembler.apply(&final_fragment("one"));
    assembler.apply(&final_fragment("two"));
    assembler.apply(&final_fragment("three"));

    assert_eq!(assembler.committed(), "one two three ");
}

#[test]
fn test_display_is_committed_plus_pending() {
    let mut assembler = TranscriptAssembler::new();

    assembler.apply(&final_fragment("done"));
    assembler.apply(&partial("in prog"));

    assert_eq!(assembler.committed(), "done ");
    assert_eq!(assembler.pending_partial(), "in prog");
    assert_eq!(assembler.display_text(), "done in prog");
}

#[test]
fn test_clear_then_final_yields_exactly_that_text() {
    let mut assembler = TranscriptAssembler::new();

    assembler.apply(&final_fragment("old content"));
    assembler.apply(&partial("more"));
    assembler.clear();

    assert!(assembler.is_empty());
    assert_eq!(assembler.display_text(), "");

    assembler.apply(&final_fragment("hello"));
    assert_eq!(assembler.display_text(), "hello ");
}

#[test]
fn test_fragments_apply_in_arrival_order() {
    // No reordering buffer: a partial arriving after a final starts the
    // next pending span.
    let mut assembler = TranscriptAssembler::new();

    assembler.apply(&partial("abc"));
    assembler.apply(&final_fragment("abc"));
    assembler.apply(&partial("d"));

    assert_eq!(assembler.display_text(), "abc d");
}
