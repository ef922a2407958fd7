/// Property-based tests using proptest
/// Tests invariants of CNPJ normalization and check digits
use cnpj_enrichment::cnpj::{check_digits, normalize, validate};
use cnpj_enrichment::models::CnaeCode;
use proptest::prelude::*;

fn with_check_digits(base: &str) -> String {
    let dv = check_digits(base).unwrap();
    format!("{}{}{}", base, dv[0], dv[1])
}

fn is_repeated(digits: &str) -> bool {
    digits.bytes().all(|b| b == digits.as_bytes()[0])
}

// Property: normalization and validation never panic
proptest! {
    #[test]
    fn normalize_never_panics(raw in "\\PC*") {
        if let Some(cnpj) = normalize(&raw) {
            let _ = validate(&cnpj);
        }
    }

    #[test]
    fn normalize_output_is_digits_and_padded(raw in "[0-9 ./-]{0,20}") {
        let digit_count = raw.chars().filter(|c| c.is_ascii_digit()).count();
        match normalize(&raw) {
            None => prop_assert_eq!(digit_count, 0),
            Some(cnpj) => {
                prop_assert!(cnpj.as_str().chars().all(|c| c.is_ascii_digit()));
                prop_assert_eq!(cnpj.as_str().len(), digit_count.max(14));
            }
        }
    }
}

// Property: check digits are a deterministic function of the base
proptest! {
    #[test]
    fn check_digits_deterministic(base in "[0-9]{12}") {
        let first = check_digits(&base);
        let second = check_digits(&base);
        prop_assert!(first.is_some());
        prop_assert_eq!(first, second);
        let dv = first.unwrap();
        prop_assert!(dv[0] <= 9 && dv[1] <= 9);
    }

    #[test]
    fn computed_identifiers_validate(base in "[0-9]{12}") {
        let full = with_check_digits(&base);
        let cnpj = normalize(&full).unwrap();
        prop_assert_eq!(validate(&cnpj), !is_repeated(&full));
    }

    #[test]
    fn masked_identifiers_normalize_to_digits(base in "[0-9]{12}") {
        let full = with_check_digits(&base);
        let masked = format!(
            "{}.{}.{}/{}-{}",
            &full[0..2], &full[2..5], &full[5..8], &full[8..12], &full[12..14]
        );
        let normalized = normalize(&masked).unwrap();
        prop_assert_eq!(normalized.as_str(), full.as_str());
    }

    #[test]
    fn wrong_check_digit_always_rejected(
        base in "[0-9]{12}",
        position in 12usize..14,
        bump in 1u8..10
    ) {
        let full = with_check_digits(&base);
        let mut bytes = full.into_bytes();
        bytes[position] = b'0' + (bytes[position] - b'0' + bump) % 10;
        let tampered = String::from_utf8(bytes).unwrap();

        prop_assert!(!validate(&normalize(&tampered).unwrap()));
    }

    #[test]
    fn wrong_length_always_rejected(digits in "[0-9]{15,20}") {
        prop_assert!(!validate(&normalize(&digits).unwrap()));
    }
}

// Property: CNAE codes compare equal masked or bare
proptest! {
    #[test]
    fn cnae_masked_and_bare_match(code in 100000u32..=9999999u32) {
        let bare = CnaeCode::parse(&code.to_string()).unwrap();
        let masked = CnaeCode::parse(&bare.to_string()).unwrap();
        prop_assert_eq!(bare, masked);
    }
}
