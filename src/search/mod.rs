pub mod fallback;

use regex::Regex;
use std::sync::OnceLock;
use crate::api::Song;

fn annotations() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\([^)]*\)|\[[^\]]*\]|（[^）]*）|【[^】]*】|［[^］]*］|〔[^〕]*〕")
            .expect("annotation pattern is valid")
    })
}

/// Lower-cases, drops bracketed annotations and punctuation, collapses whitespace.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = annotations().replace_all(&lowered, " ");
    let kept: String = stripped
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether two results from different sources denote the same recording.
pub fn is_same_song(a: &Song, b: &Song) -> bool {
    names_match(&a.name, &a.artist, &b.name, &b.artist)
}

/// Same name with artists equal or one crediting the other, or one name extending
/// the other with identical artists. An empty artist is only equal to another empty
/// artist; it is never treated as contained in a non-empty credit list.
pub fn names_match(name_a: &str, artist_a: &str, name_b: &str, artist_b: &str) -> bool {
    let name_a = normalize(name_a);
    let name_b = normalize(name_b);
    if name_a.is_empty() || name_b.is_empty() {
        return false;
    }
    let artist_a = normalize(artist_a);
    let artist_b = normalize(artist_b);

    if name_a == name_b {
        return artist_a == artist_b
            || (!artist_a.is_empty() && !artist_b.is_empty()
                && (artist_a.contains(&artist_b) || artist_b.contains(&artist_a)));
    }

    artist_a == artist_b && (extends(&name_a, &name_b) || extends(&name_b, &name_a))
}

// `longer` is `shorter` followed by extra words, e.g. "song acoustic version" / "song".
// CJK titles carry no spaces, so a CJK character also starts a new word ("稻香伴奏").
fn extends(longer: &str, shorter: &str) -> bool {
    longer
        .strip_prefix(shorter)
        .and_then(|rest| rest.chars().next())
        .is_some_and(|next| next == ' ' || is_cjk(next))
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'   // kana
        | '\u{3400}'..='\u{4DBF}' // CJK extension A
        | '\u{4E00}'..='\u{9FFF}' // CJK unified
        | '\u{AC00}'..='\u{D7AF}' // hangul
        | '\u{F900}'..='\u{FAFF}' // compatibility ideographs
    )
}
