use rust_decimal::Decimal;

use super::round_amount;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Gender {
    Masculine,
    Feminine,
}

type Forms = [&'static str; 3];

const RUBLES: Forms = ["рубль", "рубля", "рублей"];
const KOPEKS: Forms = ["копейка", "копейки", "копеек"];

const SCALES: [(Forms, Gender); 9] = [
    (["тысяча", "тысячи", "тысяч"], Gender::Feminine),
    (["миллион", "миллиона", "миллионов"], Gender::Masculine),
    (["миллиард", "миллиарда", "миллиардов"], Gender::Masculine),
    (["триллион", "триллиона", "триллионов"], Gender::Masculine),
    (["квадриллион", "квадриллиона", "квадриллионов"], Gender::Masculine),
    (["квинтиллион", "квинтиллиона", "квинтиллионов"], Gender::Masculine),
    (["секстиллион", "секстиллиона", "секстиллионов"], Gender::Masculine),
    (["септиллион", "септиллиона", "септиллионов"], Gender::Masculine),
    (["октиллион", "октиллиона", "октиллионов"], Gender::Masculine),
];

const UNITS_MASC: [&str; 10] = [
    "", "один", "два", "три", "четыре", "пять", "шесть", "семь", "восемь", "девять",
];
const UNITS_FEM: [&str; 10] = [
    "", "одна", "две", "три", "четыре", "пять", "шесть", "семь", "восемь", "девять",
];
const TEENS: [&str; 10] = [
    "десять",
    "одиннадцать",
    "двенадцать",
    "тринадцать",
    "четырнадцать",
    "пятнадцать",
    "шестнадцать",
    "семнадцать",
    "восемнадцать",
    "девятнадцать",
];
const TENS: [&str; 10] = [
    "", "десять", "двадцать", "тридцать", "сорок", "пятьдесят", "шестьдесят", "семьдесят",
    "восемьдесят", "девяносто",
];
const HUNDREDS: [&str; 10] = [
    "", "сто", "двести", "триста", "четыреста", "пятьсот", "шестьсот", "семьсот", "восемьсот",
    "девятьсот",
];

/// Spell a money amount in Russian: `1.00` → `Один рубль ноль копеек`.
///
/// The amount is rounded half-up to kopeks first; the sign is ignored.
/// Every `Decimal` is covered, up to octillions of rubles.
pub fn amount_to_words(value: Decimal) -> String {
    let kopeks = total_kopeks(round_amount(value.abs()));

    let rubles_part = spell(kopeks / 100, Gender::Masculine, RUBLES);
    let kopeks_part = spell(kopeks % 100, Gender::Feminine, KOPEKS);
    capitalize(&format!("{rubles_part} {kopeks_part}"))
}

/// Whole kopeks in a non-negative amount. A `Decimal` mantissa is under
/// 2^96, so the result always fits.
fn total_kopeks(amount: Decimal) -> u128 {
    let mantissa = amount.mantissa().unsigned_abs();
    match amount.scale() {
        0 => mantissa * 100,
        1 => mantissa * 10,
        2 => mantissa,
        scale => mantissa / 10u128.pow(scale - 2),
    }
}

fn spell(value: u128, gender: Gender, unit: Forms) -> String {
    if value == 0 {
        return format!("ноль {}", unit[2]);
    }

    let mut groups: Vec<String> = Vec::new();
    let mut remainder = value;
    let mut index = 0usize;
    while remainder > 0 {
        let triplet = (remainder % 1000) as usize;
        remainder /= 1000;
        if triplet > 0 {
            let mut words = if index == 0 {
                triplet_words(triplet, gender)
            } else {
                let (forms, scale_gender) = SCALES[(index - 1).min(SCALES.len() - 1)];
                let mut words = triplet_words(triplet, scale_gender);
                words.push(choose_form(triplet as u128, forms));
                words
            };
            words.retain(|w| !w.is_empty());
            groups.push(words.join(" "));
        }
        index += 1;
    }
    groups.reverse();
    groups.push(choose_form(value % 1000, unit).to_string());
    groups.join(" ")
}

fn triplet_words(triplet: usize, gender: Gender) -> Vec<&'static str> {
    let mut words = Vec::with_capacity(4);
    let hundreds = triplet / 100;
    let rest = triplet % 100;
    words.push(HUNDREDS[hundreds]);
    if (10..20).contains(&rest) {
        words.push(TEENS[rest - 10]);
    } else {
        words.push(TENS[rest / 10]);
        let units = if gender == Gender::Feminine {
            UNITS_FEM
        } else {
            UNITS_MASC
        };
        words.push(units[rest % 10]);
    }
    words
}

/// Pick singular, few or many form for a count.
fn choose_form(value: u128, forms: Forms) -> &'static str {
    let last_two = value % 100;
    if (11..20).contains(&last_two) {
        return forms[2];
    }
    match last_two % 10 {
        1 => forms[0],
        2..=4 => forms[1],
        _ => forms[2],
    }
}

/// Upper-case the first character, Cyrillic included.
pub(crate) fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
