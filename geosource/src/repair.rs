//! Réparation des textes doublement encodés
//!
//! Les sources anciennes contiennent des libellés UTF-8 relus en Latin-1/CP1252
//! puis réencodés ("ChÃªne" au lieu de "Chêne"). La réparation applique une table
//! de séquences connues, puis une règle générique qui réinterprète chaque séquence
//! suspecte comme des octets UTF-8. Elle est répétée jusqu'à point fixe, ce qui la
//! rend idempotente.

use std::borrow::Cow;

/// Séquences corrompues connues et leur remplacement
///
/// Utilisée telle quelle pour construire les `replace()` SQL de post-traitement.
pub const MOJIBAKE_TABLE: &[(&str, &str)] = &[
    ("â€™", "’"),
    ("â€“", "–"),
    ("â€œ", "“"),
    ("Å“", "œ"),
    ("Ã©", "é"),
    ("Ã¨", "è"),
    ("Ãª", "ê"),
    ("Ã«", "ë"),
    ("Ã\u{a0}", "à"),
    ("Ã  ", "à "),
    ("Ã¢", "â"),
    ("Ã®", "î"),
    ("Ã¯", "ï"),
    ("Ã´", "ô"),
    ("Ã¶", "ö"),
    ("Ã¹", "ù"),
    ("Ã»", "û"),
    ("Ã¼", "ü"),
    ("Ã§", "ç"),
    ("Ã‰", "É"),
    ("Ãˆ", "È"),
    ("Ã€", "À"),
    ("Ã‡", "Ç"),
    ("Â°", "°"),
];

/// Octet de tête commun à toutes les séquences corrompues ('Ã', 'Â', 'â', 'Å' en UTF-8)
const MARKER: u8 = 0xC3;

/// Indique si le texte contient potentiellement une séquence corrompue
#[inline]
pub fn needs_repair(text: &str) -> bool {
    memchr::memchr(MARKER, text.as_bytes()).is_some()
}

/// Répare un texte doublement encodé
///
/// Retourne le texte emprunté tel quel s'il n'y a rien à réparer.
/// `repair_text(repair_text(x)) == repair_text(x)` pour tout `x`.
pub fn repair_text(text: &str) -> Cow<'_, str> {
    if !needs_repair(text) {
        return Cow::Borrowed(text);
    }

    // Chaque passe qui modifie le texte le raccourcit strictement : la boucle termine
    let mut current: Option<String> = None;
    while let Some(next) = repair_pass(current.as_deref().unwrap_or(text)) {
        current = Some(next);
    }

    match current {
        Some(fixed) => Cow::Owned(fixed),
        None => Cow::Borrowed(text),
    }
}

/// Répare un texte optionnel (les valeurs vides restent vides)
pub fn repair_opt(value: Option<String>) -> Option<String> {
    value.map(|v| match repair_text(&v) {
        Cow::Borrowed(_) => v,
        Cow::Owned(fixed) => fixed,
    })
}

/// Une passe : table connue puis règle générique. `None` si rien n'a changé.
fn repair_pass(text: &str) -> Option<String> {
    let mut out = Cow::Borrowed(text);

    for (from, to) in MOJIBAKE_TABLE {
        if out.contains(from) {
            out = Cow::Owned(out.replace(from, to));
        }
    }

    if let Some(fixed) = reinterpret_sequences(&out) {
        out = Cow::Owned(fixed);
    }

    match out {
        Cow::Owned(fixed) if fixed != text => Some(fixed),
        _ => None,
    }
}

/// Caractères de tête possibles d'une séquence corrompue et largeur de la séquence
///
/// 'Â'..'Å' sont les têtes à 2 octets (U+0080..U+017F), 'â' la tête à 3 octets
/// (ponctuation typographique). Les autres lettres accentuées ne sont jamais
/// considérées comme une tête : "classé\u{a0}»" est un texte correct.
fn lead_width(c: char) -> Option<usize> {
    match c {
        '\u{c2}'..='\u{c5}' => Some(2),
        '\u{e2}' => Some(3),
        _ => None,
    }
}

/// Règle générique : une tête de séquence suivie d'octets de continuation,
/// tous lus comme des caractères CP1252/Latin-1, est réinterprétée en UTF-8.
fn reinterpret_sequences(text: &str) -> Option<String> {
    if !needs_repair(text) {
        return None;
    }

    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut changed = false;
    let mut i = 0;

    while i < chars.len() {
        if let Some((decoded, width)) = decode_at(&chars[i..]) {
            out.push(decoded);
            i += width;
            changed = true;
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }

    changed.then_some(out)
}

/// Tente de décoder la séquence commençant en tête de `chars`
fn decode_at(chars: &[char]) -> Option<(char, usize)> {
    let width = lead_width(chars[0])?;
    if chars.len() < width {
        return None;
    }

    let mut buf = [0u8; 4];
    buf[0] = single_byte(chars[0])?;
    for (slot, c) in buf[1..width].iter_mut().zip(&chars[1..width]) {
        *slot = continuation_byte(*c)?;
    }

    let decoded = simdutf8::basic::from_utf8(&buf[..width]).ok()?;
    decoded.chars().next().map(|c| (c, width))
}

/// Octet de continuation UTF-8 (0x80..0xBF) relu comme un caractère CP1252/Latin-1
fn continuation_byte(c: char) -> Option<u8> {
    if c.is_ascii() {
        return None;
    }
    single_byte(c).filter(|b| (0x80..=0xBF).contains(b))
}

/// Octet CP1252 (ou Latin-1 à défaut) correspondant à un caractère
fn single_byte(c: char) -> Option<u8> {
    if c.is_ascii() {
        return Some(c as u8);
    }

    let mut tmp = [0u8; 4];
    let (bytes, _, had_errors) = encoding_rs::WINDOWS_1252.encode(c.encode_utf8(&mut tmp));
    if !had_errors && bytes.len() == 1 {
        return Some(bytes[0]);
    }

    // Caractères de contrôle C1 laissés par un décodage Latin-1 strict
    u8::try_from(u32::from(c)).ok().filter(|b| *b >= 0x80)
}
