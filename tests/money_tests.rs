use chrono::NaiveDate;
use closing::money::{
    amount_to_words, fixed, format_currency, format_hours, format_number_plain, round_amount,
    round_rate, VatMode,
};
use closing::package::resolve_rate_hour;
use closing::store::{
    Contract, ContractMeta, ContractStatus, IpTransferMode, PartyType, RateType,
};
use rust_decimal_macros::dec;

fn contract(rate_type: RateType, rate: rust_decimal::Decimal) -> Contract {
    Contract {
        id: 1,
        number: "Д-1".to_string(),
        contract_date: None,
        party_type: PartyType::Individual,
        company_id: None,
        performer_id: None,
        valid_from: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        valid_to: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
        vat_mode: VatMode::NoVat,
        rate_type,
        rate_value: rate,
        currency: "RUB".to_string(),
        act_by_projects: false,
        ip_transfer_mode: IpTransferMode::Embedded,
        status: ContractStatus::Active,
        meta: ContractMeta::default(),
    }
}

#[test]
fn test_rounding_is_half_up() {
    assert_eq!(round_amount(dec!(99.995)), dec!(100.00));
    assert_eq!(round_amount(dec!(0.125)), dec!(0.13));
    assert_eq!(round_amount(dec!(0.124)), dec!(0.12));
    assert_eq!(round_rate(dec!(1.00005)), dec!(1.0001));
}

#[test]
fn test_vat_is_rounded_to_kopeks() {
    assert_eq!(VatMode::Vat20.vat_on(dec!(100.00)), dec!(20.00));
    assert_eq!(VatMode::Vat20.vat_on(dec!(0.03)), dec!(0.01));
    assert_eq!(VatMode::Vat10.vat_on(dec!(12.35)), dec!(1.24));
    assert_eq!(VatMode::NoVat.vat_on(dec!(500)), dec!(0));
    assert_eq!(VatMode::Vat0.vat_on(dec!(500)), dec!(0));
}

#[test]
fn test_invoice_only_for_positive_vat() {
    assert!(VatMode::Vat20.requires_invoice());
    assert!(VatMode::Vat10.requires_invoice());
    assert!(!VatMode::Vat0.requires_invoice());
    assert!(!VatMode::NoVat.requires_invoice());
}

#[test]
fn test_fixed_pads_to_scale() {
    assert_eq!(fixed(dec!(7.5), 2), "7.50");
    assert_eq!(fixed(dec!(3), 2), "3.00");
    assert_eq!(format_hours(dec!(12.345)), "12.35");
}

#[test]
fn test_number_grouping() {
    assert_eq!(format_number_plain(dec!(1234567.891)), "1 234 567.89");
    assert_eq!(format_number_plain(dec!(999)), "999.00");
    assert_eq!(format_currency(dec!(12500), "RUB"), "12 500.00 RUB");
}

#[test]
fn test_amount_to_words() {
    assert_eq!(amount_to_words(dec!(0)), "Ноль рублей ноль копеек");
    assert_eq!(amount_to_words(dec!(1)), "Один рубль ноль копеек");
    assert_eq!(amount_to_words(dec!(21.01)), "Двадцать один рубль одна копейка");
    assert_eq!(
        amount_to_words(dec!(1234.56)),
        "Одна тысяча двести тридцать четыре рубля пятьдесят шесть копеек"
    );
    assert_eq!(amount_to_words(dec!(2000)), "Две тысячи рублей ноль копеек");
    assert_eq!(
        amount_to_words(dec!(5000000)),
        "Пять миллионов рублей ноль копеек"
    );
}

#[test]
fn test_words_use_rounded_amount() {
    assert_eq!(amount_to_words(dec!(11.999)), "Двенадцать рублей ноль копеек");
}

#[test]
fn test_hourly_rate_is_taken_as_is() {
    let c = contract(RateType::Hour, dec!(1500));
    assert_eq!(resolve_rate_hour(&c, Some(dec!(120))), dec!(1500));
}

#[test]
fn test_monthly_rate_uses_norm_hours() {
    let mut c = contract(RateType::Month, dec!(168000));
    assert_eq!(resolve_rate_hour(&c, None), dec!(1000));
    assert_eq!(resolve_rate_hour(&c, Some(dec!(160))), dec!(1050));

    c.meta.norm_hours = Some(dec!(120));
    assert_eq!(resolve_rate_hour(&c, None), dec!(1400));
    // the request option wins over the contract's own norm
    assert_eq!(resolve_rate_hour(&c, Some(dec!(160))), dec!(1050));
    // a non-positive norm falls back to 168
    assert_eq!(resolve_rate_hour(&c, Some(dec!(0))), dec!(1000));
}

#[test]
fn test_monthly_rate_is_rounded_to_four_places() {
    let c = contract(RateType::Month, dec!(100000));
    assert_eq!(resolve_rate_hour(&c, None), dec!(595.2381));
}

#[test]
fn test_vat_on_midpoint_rounds_half_up() {
    assert_eq!(VatMode::Vat20.vat_on(dec!(99.995)), dec!(20.00));
    assert_eq!(VatMode::Vat20.vat_on(dec!(0.025)), dec!(0.01));
    assert_eq!(VatMode::NoVat.vat_on(dec!(99.995)), dec!(0));
}

#[test]
fn test_words_beyond_u64_range() {
    assert_eq!(
        amount_to_words(dec!(100000000000000000000)),
        "Сто квинтиллионов рублей ноль копеек"
    );

    let max = amount_to_words(rust_decimal::Decimal::MAX);
    assert!(max.starts_with("Семьдесят девять октиллионов двести двадцать восемь септиллионов"));
    assert!(max.ends_with("триста тридцать пять рублей ноль копеек"));
}
