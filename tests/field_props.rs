use proptest::prelude::*;
use rowjoin::{ColumnType, FieldMapper};

#[derive(Default)]
struct Sample {
    n: Option<i64>,
    small: Option<i32>,
    text: Option<String>,
}

fn long_field() -> FieldMapper<Sample, i64, i64> {
    FieldMapper::new("n", ColumnType::LONG, |s: &Sample| s.n, |s, v| s.n = v)
}

fn int_field() -> FieldMapper<Sample, i32, i32> {
    FieldMapper::new("small", ColumnType::INT, |s: &Sample| s.small, |s, v| s.small = v)
}

fn text_field(column: ColumnType<String>) -> FieldMapper<Sample, String, String> {
    FieldMapper::new("text", column, |s: &Sample| s.text.clone(), |s, v| s.text = v)
}

/// Strings that fit a short string column unchanged.
fn arb_short_text() -> impl Strategy<Value = String> {
    "\\PC{0,15}"
}

proptest! {
    #[test]
    fn prop_long_round_trips(v in any::<i64>()) {
        let f = long_field();
        prop_assert_eq!(f.des(f.ser(Some(v))).unwrap(), Some(v));
    }

    #[test]
    fn prop_int_round_trips(v in any::<i32>()) {
        let f = int_field();
        prop_assert_eq!(f.des(f.ser(Some(v))).unwrap(), Some(v));
    }

    #[test]
    fn prop_short_text_round_trips(v in arb_short_text()) {
        let f = text_field(ColumnType::SHORT_STRING);
        prop_assert_eq!(f.des(f.ser(Some(v.clone()))).unwrap(), Some(v));
    }

    #[test]
    fn prop_text_is_never_cut(v in "\\PC{0,400}") {
        let f = text_field(ColumnType::TEXT);
        prop_assert_eq!(f.ser(Some(v.clone())), Some(v));
    }

    #[test]
    fn prop_fixed_strings_keep_a_prefix(v in "\\PC{0,40}", len in 1usize..20) {
        let f = text_field(ColumnType::fixed(len));
        let stored = f.ser(Some(v.clone())).unwrap();
        prop_assert!(v.starts_with(&stored));
        prop_assert_eq!(stored.chars().count(), v.chars().count().min(len));
    }
}

#[test]
fn test_null_passes_through() {
    let f = text_field(ColumnType::LONG_STRING);
    assert_eq!(f.ser(None), None);
    assert_eq!(f.des(None).unwrap(), None);
    let n = long_field();
    assert_eq!(n.ser(None), None);
    assert_eq!(n.des(None).unwrap(), None);
}

#[test]
fn test_string_limits_at_boundaries() {
    let short = text_field(ColumnType::SHORT_STRING);
    assert_eq!(short.ser(Some("a".repeat(16))), Some("a".repeat(15)));
    assert_eq!(short.ser(Some("b".repeat(15))), Some("b".repeat(15)));

    let long = text_field(ColumnType::LONG_STRING);
    assert_eq!(long.ser(Some("c".repeat(256))), Some("c".repeat(255)));
    assert_eq!(long.ser(Some("d".repeat(255))), Some("d".repeat(255)));
}

#[test]
fn test_ordinals_are_set_once() {
    let f = long_field();
    f.set_insert_ordinal(2).unwrap();
    f.set_insert_ordinal(2).unwrap();
    assert!(f.set_insert_ordinal(3).unwrap_err().is_setup());
    assert_eq!(f.insert_ordinal(), Some(2));
}
