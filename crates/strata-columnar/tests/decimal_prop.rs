use proptest::prelude::*;
use std::cmp::Ordering;
use strata_columnar::decimal::{decode, encode};
use strata_columnar::DecimalValue;

proptest! {
    #[test]
    fn decode_then_encode_recovers_raw(raw in -999_999_999_999i128..=999_999_999_999i128, scale in 0i8..=6) {
        let decoded = decode(raw, scale);
        prop_assert_eq!(encode(decoded, 18, scale).unwrap(), raw);
        // Negative raw values decode to negative reals.
        prop_assert_eq!(decoded < 0.0, raw < 0);
    }

    #[test]
    fn word_split_roundtrips_signed_values(raw in any::<i128>()) {
        let (high, low) = DecimalValue::new(raw, 2).to_words();
        let rebuilt = DecimalValue::from_words(high, low, 2);
        prop_assert_eq!(rebuilt.raw(), raw);
        prop_assert_eq!(rebuilt.to_f64() < 0.0, raw < 0);
    }

    #[test]
    fn encode_then_decode_stays_within_half_a_unit(value in -1.0e9f64..1.0e9, scale in 0i8..=6) {
        let raw = encode(value, 18, scale).unwrap();
        let unit = 10f64.powi(-i32::from(scale));
        let back = decode(raw, scale);
        prop_assert!((back - value).abs() <= unit / 2.0 + value.abs() * 1e-15, "{} -> {} -> {}", value, raw, back);
        // A representable value survives the trip unchanged.
        prop_assert_eq!(encode(back, 18, scale).unwrap(), raw);
        if raw != 0 {
            prop_assert_eq!(raw < 0, value < 0.0);
        }
    }

    #[test]
    fn narrowing_to_scale_zero_never_overflows(raw in any::<i128>()) {
        let narrowed = DecimalValue::new(raw, 38).rescale(0).unwrap();
        prop_assert!((-2..=2).contains(&narrowed.raw()));
        if narrowed.raw() != 0 {
            prop_assert_eq!(narrowed.raw() < 0, raw < 0);
        }
    }

    #[test]
    fn compare_matches_float_order(a in -1_000_000i128..1_000_000, sa in 0i8..4, b in -1_000_000i128..1_000_000, sb in 0i8..4) {
        let x = DecimalValue::new(a, sa);
        let y = DecimalValue::new(b, sb);
        let exact = x.compare(&y);
        let approx = x.to_f64().partial_cmp(&y.to_f64()).unwrap();
        if exact != Ordering::Equal {
            prop_assert_eq!(exact, approx);
        }
    }
}

#[test]
fn literal_thresholds_are_exact() {
    let lo = DecimalValue::parse("0.05").unwrap();
    let hi = DecimalValue::parse("0.07").unwrap();
    let stored = DecimalValue::new(6, 2);
    assert_eq!(stored.compare(&lo), Ordering::Greater);
    assert_eq!(stored.compare(&hi), Ordering::Less);
    assert_eq!(DecimalValue::new(5, 2).compare(&lo), Ordering::Equal);
}

#[test]
fn encode_ties_round_away_from_zero() {
    assert_eq!(encode(-0.005, 10, 2).unwrap(), -1);
    assert_eq!(encode(0.005, 10, 2).unwrap(), 1);
    assert_eq!(encode(0.125, 10, 2).unwrap(), 13);
    assert_eq!(encode(-0.125, 10, 2).unwrap(), -13);
    assert_eq!(encode(2.5, 10, 0).unwrap(), 3);
    assert_eq!(encode(-2.5, 10, 0).unwrap(), -3);
    assert_eq!(encode(-0.5, 10, 0).unwrap(), -1);
    assert_eq!(decode(-1, 2), -0.01);
}

#[test]
fn narrowing_a_full_width_decimal_rounds_instead_of_overflowing() {
    let nines = 99_999_999_999_999_999_999_999_999_999_999_999_999i128;
    assert_eq!(DecimalValue::new(nines, 38).rescale(0), Some(DecimalValue::new(1, 0)));
    assert_eq!(DecimalValue::new(-nines, 38).rescale(0), Some(DecimalValue::new(-1, 0)));
    assert_eq!(
        DecimalValue::new(49_999_999_999_999_999_999_999_999_999_999_999_999, 38).rescale(0),
        Some(DecimalValue::new(0, 0))
    );
    assert_eq!(DecimalValue::new(i128::MIN, 38).rescale(0), Some(DecimalValue::new(-2, 0)));
}
